pub const YOLO_MODEL_NAME: &str = "yolo11n-pose_widerface.onnx";
pub const YOLO_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/yolo11n-pose_widerface.onnx";

/// JPEG start-of-image marker.
pub const FRAME_START_MARKER: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker.
pub const FRAME_END_MARKER: [u8; 2] = [0xFF, 0xD9];

pub const DEFAULT_FFMPEG_PROGRAM: &str = "ffmpeg";
pub const DEFAULT_TARGET_FPS: u32 = 10;
/// ffmpeg `-q:v` for mjpeg output (2 = best, 31 = worst).
pub const DEFAULT_JPEG_QUALITY: u32 = 5;

/// Notification sent for any fault of the decoder subprocess.
pub const PROCESSING_ERROR_MESSAGE: &str = "Error processing video stream";
/// Notification sent when a client message cannot be handled.
pub const MALFORMED_REQUEST_MESSAGE: &str = "Failed to process message";

/// Minimum wait between face model load attempts after a failure.
pub const MODEL_RETRY_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
/// Messages buffered per connection before new ones are dropped.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;
