pub const YOLO_MODEL_NAME: &str = "yolo11n-pose_widerface.onnx";
pub const YOLO_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/yolo11n-pose_widerface.onnx";

/// Reply for a request whose path is empty after trimming.
pub const EMPTY_IMAGE_PATH: &str = "EMPTY_IMAGE_PATH";

/// Reply for any request that failed to load, detect, or encode.
pub const ERROR_SENTINEL: &str = "ERROR";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3333;

/// Per-read buffer size; one read is one request in `read` framing mode.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

pub const DEFAULT_MAX_REQUEST_BYTES: usize = 4096;
