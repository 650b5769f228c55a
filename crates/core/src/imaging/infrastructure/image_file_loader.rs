use std::path::Path;

use crate::imaging::domain::image_loader::{ImageLoadError, ImageLoader};
use crate::shared::frame::Frame;

/// Decodes image files with the `image` crate.
///
/// The format is sniffed from the file contents, not the extension, and
/// every decoded image is converted to 8-bit RGB so detectors see one
/// canonical channel order.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageFileLoader;

impl ImageFileLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ImageLoader for ImageFileLoader {
    fn load(&self, path: &Path) -> Result<Frame, ImageLoadError> {
        let open_err = |source| ImageLoadError::Open {
            path: path.to_path_buf(),
            source,
        };
        let reader = image::ImageReader::open(path)
            .map_err(open_err)?
            .with_guessed_format()
            .map_err(open_err)?;
        let decoded = reader.decode().map_err(|source| ImageLoadError::Decode {
            path: path.to_path_buf(),
            source,
        })?;

        let rgb = decoded.into_rgb8();
        let (width, height) = rgb.dimensions();
        Ok(Frame::new(rgb.into_raw(), width, height, 3))
    }
}
