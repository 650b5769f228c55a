use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum ImageLoadError {
    #[error("failed to open image {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Turns a filesystem path into an RGB [`Frame`].
///
/// Called synchronously from request processing; implementations must be
/// shareable across worker threads.
pub trait ImageLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Frame, ImageLoadError>;
}
