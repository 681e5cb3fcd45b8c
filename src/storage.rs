//! Flat file store served by the server.
//!
//! Files live directly under one root directory and are keyed by their name. Uploads
//! only ever create new files; an existing name is never overwritten.
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use log::warn;

use crate::{TransferError, protocol::FIELD_DELIMITER};

/// Reject names that could escape the storage root or break the `name|size` encoding.
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name.contains(FIELD_DELIMITER);

    if invalid {
        return Err(TransferError::application(format!(
            "invalid file name: '{name}'"
        )));
    }
    Ok(())
}

/// Delete a partially written file, logging anything other than "already gone".
pub fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("failed to remove partial file {}: {e}", path.display());
        }
    }
}

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if it does not exist yet.
    pub fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    /// Names of the regular files directly under the root, sorted.
    pub fn list(&self) -> Result<Vec<String>, TransferError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => warn!("skipping non UTF-8 file name {name:?}"),
            }
        }
        names.sort();
        Ok(names)
    }

    /// Open a stored file for reading, returning it with its size.
    pub fn open(&self, name: &str) -> Result<(File, u64), TransferError> {
        validate_file_name(name)?;
        let not_found = || TransferError::application(format!("file not found: {name}"));

        let file = match File::open(self.root.join(name)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(not_found());
        }
        Ok((file, metadata.len()))
    }

    /// Create a new file for an upload. Fails if the name is already taken.
    ///
    /// Creation is atomic (`create_new`), so of two concurrent uploads of one name
    /// exactly one wins and the other sees "file already exists".
    pub fn create(&self, name: &str) -> Result<(File, PathBuf), TransferError> {
        validate_file_name(name)?;
        self.ensure()?;

        let path = self.root.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => Ok((file, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(
                TransferError::application(format!("file already exists: {name}")),
            ),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use tempdir::TempDir;

    use super::*;

    #[test]
    fn file_name_validation() {
        for name in ["a.txt", "report 2024.pdf", ".hidden", "a..b"] {
            assert!(validate_file_name(name).is_ok(), "{name}");
        }
        for name in ["", ".", "..", "../etc/passwd", "a/b", "a\\b", "a|3"] {
            assert!(validate_file_name(name).is_err(), "{name}");
        }
    }

    #[test]
    fn list_of_missing_root_is_empty() {
        let temp = TempDir::new("storage").unwrap();
        let storage = Storage::new(temp.path().join("not-yet"));

        assert!(storage.list().unwrap().is_empty());
    }

    #[test]
    fn list_skips_directories() {
        let temp = TempDir::new("storage").unwrap();
        let storage = Storage::new(temp.path());
        fs::write(temp.path().join("b.txt"), b"b").unwrap();
        fs::write(temp.path().join("a.txt"), b"a").unwrap();
        fs::create_dir(temp.path().join("nested")).unwrap();

        assert_eq!(storage.list().unwrap(), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn create_never_overwrites() {
        let temp = TempDir::new("storage").unwrap();
        let storage = Storage::new(temp.path().join("uploads"));

        let (mut file, path) = storage.create("a.txt").unwrap();
        file.write_all(b"hello").unwrap();
        drop(file);

        let err = storage.create("a.txt").unwrap_err();
        assert!(matches!(err, TransferError::Application(_)));
        assert_eq!(fs::read(path).unwrap(), b"hello");
    }

    #[test]
    fn open_reports_size_and_missing_files() {
        let temp = TempDir::new("storage").unwrap();
        let storage = Storage::new(temp.path());
        fs::write(temp.path().join("a.txt"), b"hello").unwrap();
        fs::create_dir(temp.path().join("dir")).unwrap();

        let (mut file, size) = storage.open("a.txt").unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        assert_eq!((content.as_str(), size), ("hello", 5));

        for name in ["missing.txt", "dir"] {
            let err = storage.open(name).unwrap_err();
            assert_eq!(err.to_string(), format!("file not found: {name}"));
        }
    }

    #[test]
    fn remove_partial_tolerates_missing_files() {
        let temp = TempDir::new("storage").unwrap();
        let path = temp.path().join("partial");
        fs::write(&path, b"par").unwrap();

        remove_partial(&path);
        assert!(!path.exists());
        remove_partial(&path);
    }
}
