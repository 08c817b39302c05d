//! Filesystem-backed object store.
//!
//! Objects live at `{root}/{destination}`. Writes go to a uniquely named
//! sibling temp file which is then renamed over the object, so a reader sees
//! either the previous object or the new one.

use anyhow::{Context, Result};
use rand::RngCore;
use std::io::Write;
use std::path::{Path, PathBuf};
use url::Url;

use super::{Destination, UploadSink};
use crate::error::{UploadError, UploadErrorKind};

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Open (creating if needed) the store rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)
            .with_context(|| format!("create object store root {}", root.display()))?;
        let root = root
            .canonicalize()
            .with_context(|| format!("resolve object store root {}", root.display()))?;
        log::info!("LocalObjectStore: storing objects under {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, destination: &Destination) -> PathBuf {
        let mut path = self.root.clone();
        for segment in destination.segments() {
            path.push(segment);
        }
        path
    }
}

fn io_upload_error(context: String, err: std::io::Error) -> UploadError {
    let kind = match err.kind() {
        std::io::ErrorKind::PermissionDenied => UploadErrorKind::Auth,
        _ => UploadErrorKind::Io,
    };
    UploadError::new(kind, format!("{}: {}", context, err))
}

impl UploadSink for LocalObjectStore {
    fn name(&self) -> &str {
        "LocalObjectStore"
    }

    fn put_object(&self, destination: &Destination, bytes: &[u8]) -> Result<Url, UploadError> {
        let path = self.object_path(destination);
        let parent = path.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(parent)
            .map_err(|e| io_upload_error(format!("create {}", parent.display()), e))?;

        let mut nonce = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut nonce);
        let temp = parent.join(format!(
            ".{}.{}.partial",
            destination.file_name(),
            hex::encode(nonce)
        ));

        let written = std::fs::File::create(&temp)
            .and_then(|mut file| {
                file.write_all(bytes)?;
                file.sync_all()
            })
            .and_then(|_| std::fs::rename(&temp, &path));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&temp);
            return Err(io_upload_error(format!("write {}", path.display()), e));
        }

        Url::from_file_path(&path).map_err(|_| {
            UploadError::new(
                UploadErrorKind::Io,
                format!("{} is not representable as a file URL", path.display()),
            )
        })
    }
}
