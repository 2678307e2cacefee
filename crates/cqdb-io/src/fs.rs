//! Thin filesystem helpers with path context on errors.

use std::path::Path;

use cqdb_error::{CqError, Result};

/// Create `path` and any missing parents.
///
/// Returns `true` if the directory was created, `false` if it already
/// existed.
pub fn ensure_dir(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    if path.is_dir() {
        return Ok(false);
    }
    std::fs::create_dir_all(path).map_err(|e| CqError::fs(path, e))?;
    Ok(true)
}

/// File names (not paths) of the entries directly under `path`.
pub fn list_dir(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let mut names = Vec::new();
    for entry in std::fs::read_dir(path).map_err(|e| CqError::fs(path, e))? {
        let entry = entry.map_err(|e| CqError::fs(path, e))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

/// Remove a file; `Ok(false)` when it did not exist.
pub fn remove_file(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CqError::fs(path, e)),
    }
}

/// Remove a directory tree; `Ok(false)` when it did not exist.
pub fn remove_dir_recursive(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CqError::fs(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_lifecycle() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("sub");

        assert!(ensure_dir(&dir).unwrap());
        assert!(!ensure_dir(&dir).unwrap());

        for name in ["a", "b", "c"] {
            std::fs::write(dir.join(name), b"hi").unwrap();
        }
        let mut listed = list_dir(&dir).unwrap();
        listed.sort();
        assert_eq!(listed, ["a", "b", "c"]);

        assert!(remove_file(dir.join("a")).unwrap());
        assert!(!remove_file(dir.join("a")).unwrap());

        assert!(remove_dir_recursive(&dir).unwrap());
        assert!(!remove_dir_recursive(&dir).unwrap());
    }
}
