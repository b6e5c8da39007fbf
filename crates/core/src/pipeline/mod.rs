pub mod frame_dispatcher;
pub mod protocol;
pub mod result_publisher;
pub mod stream_session;
