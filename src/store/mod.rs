//! Storage backends and the atomic file store.
//!
//! Every durable write in the crate goes through [`AtomicFileStore`], which
//! sits on a [`StorageBackend`]. Production uses [`OsBackend`]; tests use
//! [`InMemoryBackend`] with fault injection.

pub mod atomic;
pub mod memory;
pub mod os;

use std::io;
use std::path::{Path, PathBuf};

/// Minimal filesystem surface the store needs.
///
/// `rename` must replace the destination atomically (same volume).
/// `create_new` must fail with [`io::ErrorKind::AlreadyExists`] when the
/// path exists: it is the mutex primitive for the lock manager.
pub trait StorageBackend: Send + Sync {
    /// Read a whole file. Missing files yield [`io::ErrorKind::NotFound`].
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Create or truncate a file, creating parent directories.
    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;

    /// Exclusively create a file, creating parent directories.
    fn create_new(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;

    /// Atomically move `from` over `to`.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Delete a file.
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Whether a file exists.
    fn exists(&self, path: &Path) -> bool;

    /// Files directly inside `dir`, sorted. A missing directory is empty.
    fn list_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;
}

pub use atomic::{AtomicFileStore, temp_path};
pub use memory::InMemoryBackend;
pub use os::OsBackend;
