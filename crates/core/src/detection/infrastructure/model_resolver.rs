use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

const CACHE_DIR_NAME: &str = "facedetect";
const DOWNLOAD_CHUNK: usize = 1024 * 1024;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("failed to create model directory {path}: {source}")]
    ModelDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not determine a model directory; pass one explicitly")]
    NoCacheDir,
}

/// Progress callback: `(bytes_downloaded, total_bytes)`.
/// `total_bytes` is 0 if the server didn't provide Content-Length.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// Returns the path of model `name`, downloading it from `url` into the
/// model directory on first use.
///
/// `model_dir` overrides [`default_model_dir`].
pub fn resolve(
    name: &str,
    url: &str,
    model_dir: Option<&Path>,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    let dir = match model_dir {
        Some(dir) => dir.to_path_buf(),
        None => default_model_dir()?,
    };

    let path = dir.join(name);
    if path.is_file() {
        log::debug!("Model {name} found at {}", path.display());
        return Ok(path);
    }

    fs::create_dir_all(&dir).map_err(|source| ModelResolveError::ModelDir {
        path: dir.clone(),
        source,
    })?;
    log::info!("Downloading model {name} from {url}");
    download(url, &path, progress.as_deref())?;
    Ok(path)
}

/// `$XDG_CACHE_HOME/facedetect/models` on Linux, the platform cache
/// directory elsewhere.
pub fn default_model_dir() -> Result<PathBuf, ModelResolveError> {
    dirs::cache_dir()
        .map(|d| d.join(CACHE_DIR_NAME).join("models"))
        .ok_or(ModelResolveError::NoCacheDir)
}

/// Streams `url` into `<dest>.part`, then renames it over `dest`. The
/// partial file is removed on any failure.
fn download(
    url: &str,
    dest: &Path,
    progress: Option<&(dyn Fn(u64, u64) + Send)>,
) -> Result<(), ModelResolveError> {
    let part = dest.with_extension("part");
    let result = fetch_to(url, &part, progress).and_then(|()| {
        fs::rename(&part, dest).map_err(|source| ModelResolveError::Write {
            path: dest.to_path_buf(),
            source,
        })
    });
    if result.is_err() {
        let _ = fs::remove_file(&part);
    }
    result
}

fn fetch_to(
    url: &str,
    part: &Path,
    progress: Option<&(dyn Fn(u64, u64) + Send)>,
) -> Result<(), ModelResolveError> {
    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|source| ModelResolveError::Download {
            url: url.to_string(),
            source,
        })?;
    let total = response.content_length().unwrap_or(0);

    let write_err = |source| ModelResolveError::Write {
        path: part.to_path_buf(),
        source,
    };
    let mut file = fs::File::create(part).map_err(write_err)?;
    let mut buf = vec![0u8; DOWNLOAD_CHUNK];
    let mut downloaded = 0u64;
    loop {
        let n = response.read(&mut buf).map_err(write_err)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(write_err)?;
        downloaded += n as u64;
        if let Some(report) = progress {
            report(downloaded, total);
        }
    }
    file.sync_all().map_err(write_err)
}
