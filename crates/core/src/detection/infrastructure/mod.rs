pub mod cached_face_detector;
pub mod detector_factory;
pub mod execution_provider;
pub mod math;
pub mod model_resolver;
pub mod onnx_blazeface_detector;
pub mod onnx_yolo_detector;
pub mod shared_face_detector;
