//! Live stream face annotation: decoder process management, frame
//! demuxing, throttled detection and per-connection session control.

pub mod detection;
pub mod pipeline;
pub mod shared;
pub mod stream;
pub mod video;
