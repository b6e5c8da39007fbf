pub mod decoder_process;
pub mod diagnostics;
pub mod ffmpeg_launcher;
pub mod frame_demuxer;
pub mod throttle;
