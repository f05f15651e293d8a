//! File utilities for safe and robust file operations.
//!
//! Reading tolerates stray non-UTF-8 bytes (converted lossily with a warning)
//! and refuses binary files. Writing is atomic per file: content goes to a
//! sibling temporary file that is then renamed over the target.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use tracing::warn;

use crate::core::errors::{Result, ResultExt, SmellwrightError};

/// Bytes sampled when checking whether a file is binary
const BINARY_SAMPLE_BYTES: usize = 1024;

/// Safe file reading with UTF-8 validation and fallback handling
pub struct FileReader;

impl FileReader {
    /// Read a file to string, handling non-UTF-8 files gracefully
    pub fn read_to_string(file_path: &Path) -> Result<String> {
        if Self::is_likely_binary(file_path)? {
            return Err(SmellwrightError::validation(format!(
                "File appears to be binary: {}",
                file_path.display()
            )));
        }

        match fs::read_to_string(file_path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                let bytes = fs::read(file_path)
                    .map_err(|err| SmellwrightError::io("Failed to read file as bytes", err))?;
                warn!(
                    "File contained invalid UTF-8, converted with lossy encoding: {}",
                    file_path.display()
                );
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            Err(e) => Err(SmellwrightError::io(
                format!("Failed to read file {}", file_path.display()),
                e,
            )),
        }
    }

    /// Check if a file is likely to be binary by sampling its first bytes
    pub fn is_likely_binary(file_path: &Path) -> Result<bool> {
        let mut file = fs::File::open(file_path).map_err(|e| {
            SmellwrightError::io(format!("Failed to open {}", file_path.display()), e)
        })?;

        let mut buffer = vec![0u8; BINARY_SAMPLE_BYTES];
        let read = file
            .read(&mut buffer)
            .map_err(|e| SmellwrightError::io("Failed to read file sample", e))?;
        if read == 0 {
            return Ok(false);
        }

        let null_bytes = buffer[..read].iter().filter(|&&b| b == 0).count();
        let null_percentage = (null_bytes as f64 / read as f64) * 100.0;
        Ok(null_percentage > 1.0)
    }
}

/// Atomic single-file writer
pub struct FileWriter;

impl FileWriter {
    /// Write `content` to `path` via a temporary sibling and a rename
    pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| {
            SmellwrightError::io(
                format!("Failed to create temporary file in {}", parent.display()),
                e,
            )
        })?;
        temp.write_all(content.as_bytes())
            .context("Failed to write temporary file")?;
        temp.as_file().sync_all().context("Failed to flush temporary file")?;

        if let Ok(metadata) = fs::metadata(path) {
            // keep the original permissions (e.g. executable scripts)
            let _ = fs::set_permissions(temp.path(), metadata.permissions());
        }

        temp.persist(path).map_err(|e| {
            SmellwrightError::io(format!("Failed to replace {}", path.display()), e.error)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_utf8_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.py");
        fs::write(&path, "print('héllo')\n").unwrap();
        assert_eq!(FileReader::read_to_string(&path).unwrap(), "print('héllo')\n");
    }

    #[test]
    fn test_lossy_read_of_invalid_utf8() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("latin1.py");
        fs::write(&path, b"x = '\xe9'\n").unwrap();
        let content = FileReader::read_to_string(&path).unwrap();
        assert!(content.starts_with("x = '"));
    }

    #[test]
    fn test_binary_detection() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.py");
        fs::write(&path, [0u8, 1, 0, 2, 0, 3]).unwrap();
        assert!(FileReader::is_likely_binary(&path).unwrap());
        assert!(FileReader::read_to_string(&path).is_err());

        let empty = dir.path().join("empty.py");
        fs::write(&empty, "").unwrap();
        assert!(!FileReader::is_likely_binary(&empty).unwrap());
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mod.py");
        fs::write(&path, "old\n").unwrap();
        FileWriter::write_atomic(&path, "new\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new\n");
    }
}
