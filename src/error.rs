use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for archive operations
pub type Result<T> = std::result::Result<T, AldError>;

/// Unified error type for all archive operations
#[derive(Debug, Error)]
pub enum AldError {
    // Archive errors
    #[error("No archive files found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid archive format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported archive type: {0}")]
    UnsupportedKind(String),

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    // Argument errors
    #[error("Invalid argument: {0}")]
    ArgumentInvalid(String),

    // Patch errors
    #[error("Cannot create patch: {0}")]
    PatchPrecondition(String),

    // Container errors
    #[error("Container rebuild failed: {0}")]
    Container(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(String),
}

impl AldError {
    /// True when the archive (or one of its volumes) does not exist on disk.
    ///
    /// Callers use this to offer "browse for the file again" rather than
    /// reporting corruption.
    pub fn is_missing_file(&self) -> bool {
        match self {
            AldError::NotFound(_) => true,
            AldError::Io(err) => err.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// True when bytes were present but could not be parsed
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            AldError::InvalidFormat(_) | AldError::UnsupportedKind(_)
        )
    }

    pub(crate) fn truncated(what: &str) -> Self {
        AldError::InvalidFormat(format!("{} is truncated", what))
    }
}

impl From<toml::de::Error> for AldError {
    fn from(err: toml::de::Error) -> Self {
        AldError::Toml(err.to_string())
    }
}

impl From<toml::ser::Error> for AldError {
    fn from(err: toml::ser::Error) -> Self {
        AldError::Toml(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_classification() {
        let missing = AldError::NotFound(PathBuf::from("GAMEGA.ALD"));
        assert!(missing.is_missing_file());
        assert!(!missing.is_corrupt());

        let io_missing = AldError::Io(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(io_missing.is_missing_file());

        let corrupt = AldError::InvalidFormat("bad pointer table".to_string());
        assert!(corrupt.is_corrupt());
        assert!(!corrupt.is_missing_file());
    }

    #[test]
    fn test_error_messages() {
        let err = AldError::truncated("pointer table");
        assert_eq!(err.to_string(), "Invalid archive format: pointer table is truncated");
    }
}
