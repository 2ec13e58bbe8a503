//! Write-temp → verify → rename.
//!
//! A reader of `path` sees either the previous complete file or the new
//! complete file, never a mix. The temp file `<path>.tmp` is removed when
//! verification or the rename fails.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::StorageBackend;
use crate::canonical::to_json_bytes;
use crate::error::{PublishError, Result};

/// Temp path used while writing `path`.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("file"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Durable read/write primitive.
#[derive(Debug)]
pub struct AtomicFileStore<B: StorageBackend> {
    backend: Arc<B>,
}

impl<B: StorageBackend> Clone for AtomicFileStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: StorageBackend> AtomicFileStore<B> {
    /// Create a store over `backend`.
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Underlying backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Atomically replace `path` with `bytes`.
    pub fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = temp_path(path);
        self.backend
            .write(&tmp, bytes)
            .map_err(|e| PublishError::io(&tmp, e))?;

        let readback = match self.backend.read(&tmp) {
            Ok(readback) => readback,
            Err(e) => {
                self.discard(&tmp);
                return Err(PublishError::io(&tmp, e));
            }
        };
        if readback != bytes {
            self.discard(&tmp);
            tracing::error!(
                path = %path.display(),
                expected_len = bytes.len(),
                actual_len = readback.len(),
                "atomic write readback mismatch"
            );
            return Err(PublishError::WriteVerificationFailed {
                path: path.to_path_buf(),
            });
        }

        if let Err(e) = self.backend.rename(&tmp, path) {
            self.discard(&tmp);
            return Err(PublishError::io(path, e));
        }
        Ok(())
    }

    /// Read raw bytes; `NotFound` if absent.
    pub fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.backend.read(path).map_err(|e| PublishError::io(path, e))
    }

    /// Serialize `value` as JSON and write it atomically.
    pub fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes = to_json_bytes(value).map_err(|e| PublishError::serialization(path, e))?;
        self.write(path, &bytes)
    }

    /// Read and decode a JSON file.
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let bytes = self.read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| PublishError::serialization(path, e))
    }

    /// Whether `path` exists.
    pub fn exists(&self, path: &Path) -> bool {
        self.backend.exists(path)
    }

    /// Delete `path`. Missing files are not an error.
    pub fn remove(&self, path: &Path) -> Result<()> {
        match self.backend.remove(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PublishError::io(path, e)),
        }
    }

    fn discard(&self, tmp: &Path) {
        if let Err(e) = self.backend.remove(tmp) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %tmp.display(), error = %e, "failed to remove temp file");
            }
        }
    }
}
