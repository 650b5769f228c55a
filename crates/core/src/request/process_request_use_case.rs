use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::detection::domain::detection_record::DetectionRecord;
use crate::detection::domain::face_detector::FaceDetector;
use crate::imaging::domain::image_loader::{ImageLoadError, ImageLoader};
use crate::request::request_logger::{RequestLogger, RequestOutcome};
use crate::request::response::{error_bytes, Response};

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("request is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error(transparent)]
    Load(#[from] ImageLoadError),
    #[error("detection failed: {0}")]
    Detect(String),
    #[error("failed to encode detections: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One request end to end: bytes → path → load → detect → wire bytes.
///
/// Never fails. Every problem is logged and answered with the `ERROR`
/// sentinel so the connection stays usable.
pub struct ProcessRequestUseCase {
    loader: Arc<dyn ImageLoader>,
    detector: Box<dyn FaceDetector>,
    logger: Box<dyn RequestLogger>,
}

impl ProcessRequestUseCase {
    pub fn new(
        loader: Arc<dyn ImageLoader>,
        detector: Box<dyn FaceDetector>,
        logger: Box<dyn RequestLogger>,
    ) -> Self {
        Self {
            loader,
            detector,
            logger,
        }
    }

    /// Processes one request. The result is always non-empty.
    pub fn execute(&mut self, request: &[u8]) -> Vec<u8> {
        let (response, outcome) = match self.respond(request) {
            Ok(Some(records)) => {
                let count = records.len();
                (Response::Detections(records), RequestOutcome::Detected(count))
            }
            Ok(None) => (Response::EmptyPath, RequestOutcome::EmptyPath),
            Err(e) => {
                log::warn!("{e}");
                (Response::Error, RequestOutcome::Failed)
            }
        };

        let started = Instant::now();
        let encoded = response.encode();
        self.logger.timing("encode", elapsed_ms(started));

        match encoded {
            Ok(bytes) => {
                self.logger.outcome(outcome);
                bytes
            }
            Err(e) => {
                log::warn!("{}", ProcessError::Encode(e));
                self.logger.outcome(RequestOutcome::Failed);
                error_bytes()
            }
        }
    }

    /// `Ok(None)` for an empty path.
    fn respond(
        &mut self,
        request: &[u8],
    ) -> Result<Option<Vec<DetectionRecord>>, RequestFailure> {
        let path = decode_path(request).map_err(|e| RequestFailure::new("<undecodable>", e))?;
        if path.is_empty() {
            log::debug!("Empty image path");
            return Ok(None);
        }

        log::debug!("Processing {path}");
        self.detect_path(Path::new(path))
            .map(Some)
            .map_err(|e| RequestFailure::new(path, e))
    }

    fn detect_path(&mut self, path: &Path) -> Result<Vec<DetectionRecord>, ProcessError> {
        let started = Instant::now();
        let frame = self.loader.load(path)?;
        self.logger.timing("load", elapsed_ms(started));

        let started = Instant::now();
        let records = self
            .detector
            .detect(&frame)
            .map_err(|e| ProcessError::Detect(e.to_string()))?;
        let detect_ms = elapsed_ms(started);
        self.logger.timing("detect", detect_ms);

        log::debug!(
            "{}: {} face(s) in {detect_ms:.1}ms",
            path.display(),
            records.len()
        );
        Ok(records)
    }
}

/// Decodes request bytes as UTF-8 and trims surrounding whitespace.
pub fn decode_path(request: &[u8]) -> Result<&str, ProcessError> {
    Ok(std::str::from_utf8(request)?.trim())
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// A processing error paired with the path it concerns, for logging.
#[derive(Debug)]
struct RequestFailure {
    path: String,
    error: ProcessError,
}

impl RequestFailure {
    fn new(path: &str, error: ProcessError) -> Self {
        Self {
            path: path.to_string(),
            error,
        }
    }
}

impl std::fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Request for {} failed: {}", self.path, self.error)
    }
}
