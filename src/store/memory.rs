//! In-memory backend for testing.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::StorageBackend;

#[derive(Debug, Default)]
struct Faults {
    fail_next_rename: bool,
    corrupt_next_write: bool,
    fail_listings: bool,
}

/// In-memory backend for testing.
///
/// Uses a BTreeMap for deterministic listing order. Fault injection hooks
/// simulate an interrupted rename and a write whose readback mismatches.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    faults: Mutex<Faults>,
}

impl InMemoryBackend {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `rename` fail without moving anything.
    pub fn fail_next_rename(&self) {
        self.faults.lock().fail_next_rename = true;
    }

    /// Make the next `write` store bytes that differ from the input.
    pub fn corrupt_next_write(&self) {
        self.faults.lock().corrupt_next_write = true;
    }

    /// Make every `list_files` call fail until reset.
    pub fn fail_listings(&self, fail: bool) {
        self.faults.lock().fail_listings = fail;
    }

    /// All stored paths.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.lock().keys().cloned().collect()
    }

    /// Number of stored files.
    pub fn num_files(&self) -> usize {
        self.files.lock().len()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let corrupt = std::mem::take(&mut self.faults.lock().corrupt_next_write);
        let mut stored = bytes.to_vec();
        if corrupt {
            // Drop the tail to mimic a short write.
            let keep = stored.len() / 2;
            stored.truncate(keep);
            stored.push(b'#');
        }
        self.files.lock().insert(path.to_path_buf(), stored);
        Ok(())
    }

    fn create_new(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut files = self.files.lock();
        if files.contains_key(path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                path.display().to_string(),
            ));
        }
        files.insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if std::mem::take(&mut self.faults.lock().fail_next_rename) {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "injected rename failure"));
        }
        let mut files = self.files.lock();
        let bytes = files
            .remove(from)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, from.display().to_string()))?;
        files.insert(to.to_path_buf(), bytes);
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.files
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }

    fn list_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        if self.faults.lock().fail_listings {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "injected listing failure"));
        }
        Ok(self
            .files
            .lock()
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_new_collides() {
        let backend = InMemoryBackend::new();
        let path = Path::new("/store/system/.indexLock");
        backend.create_new(path, b"a").unwrap();
        let err = backend.create_new(path, b"b").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_injected_rename_failure_leaves_source() {
        let backend = InMemoryBackend::new();
        let from = Path::new("/a.tmp");
        let to = Path::new("/a");
        backend.write(from, b"new").unwrap();
        backend.fail_next_rename();
        assert!(backend.rename(from, to).is_err());
        assert!(backend.exists(from));
        assert!(!backend.exists(to));
        backend.rename(from, to).unwrap();
        assert_eq!(backend.read(to).unwrap(), b"new");
    }

    #[test]
    fn test_list_files_direct_children_only() {
        let backend = InMemoryBackend::new();
        backend.write(Path::new("/d/a.json"), b"1").unwrap();
        backend.write(Path::new("/d/sub/b.json"), b"2").unwrap();
        let files = backend.list_files(Path::new("/d")).unwrap();
        assert_eq!(files, vec![PathBuf::from("/d/a.json")]);
    }
}
