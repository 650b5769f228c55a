use crate::detection::domain::detection_record::DetectionRecord;
use crate::shared::constants::{EMPTY_IMAGE_PATH, ERROR_SENTINEL};

/// Outcome of one request, before it is put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// JSON array of detection records. May be empty.
    Detections(Vec<DetectionRecord>),
    /// The request decoded to an empty path.
    EmptyPath,
    /// Loading, detection or encoding failed.
    Error,
}

impl Response {
    /// Wire bytes of this response, without any framing terminator.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Response::Detections(records) => serde_json::to_vec(records),
            Response::EmptyPath => Ok(EMPTY_IMAGE_PATH.as_bytes().to_vec()),
            Response::Error => Ok(error_bytes()),
        }
    }
}

/// Wire bytes of the `ERROR` sentinel.
pub fn error_bytes() -> Vec<u8> {
    ERROR_SENTINEL.as_bytes().to_vec()
}
