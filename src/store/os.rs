//! Local filesystem backend.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::StorageBackend;

/// Backend over `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsBackend;

impl OsBackend {
    /// Create a new backend.
    pub fn new() -> Self {
        Self
    }
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

impl StorageBackend for OsBackend {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        ensure_parent(path)?;
        let mut file = fs::File::create(path)?;
        file.write_all(bytes)?;
        file.sync_all()
    }

    fn create_new(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        ensure_parent(path)?;
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        file.write_all(bytes)?;
        file.sync_all()
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn list_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_new_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system/.indexLock");
        let backend = OsBackend::new();

        backend.create_new(&path, b"first").unwrap();
        let err = backend.create_new(&path, b"second").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(backend.read(&path).unwrap(), b"first");
    }

    #[test]
    fn test_list_files_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = OsBackend::new();
        assert!(backend.list_files(&dir.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn test_list_files_sorted_and_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let backend = OsBackend::new();
        backend.write(&dir.path().join("b.json"), b"{}").unwrap();
        backend.write(&dir.path().join("a.json"), b"{}").unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();

        let files = backend.list_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.json"));
    }
}
