pub mod detector_service;
pub mod model_resolver;
pub mod onnx_yolo_detector;
