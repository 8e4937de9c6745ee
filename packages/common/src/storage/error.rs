use std::fmt;

/// Errors from the object store.
#[derive(Debug)]
pub enum StorageError {
    /// No object with the requested name and version.
    NotFound { name: String, version: String },
    /// An I/O error occurred.
    Io(std::io::Error),
    /// The version id is not a valid content hash.
    InvalidVersion(String),
    /// The object exceeds the configured size limit.
    SizeLimitExceeded { actual: u64, limit: u64 },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { name, version } => {
                write!(f, "object not found: {name} (version {version})")
            }
            Self::Io(err) => write!(f, "storage IO error: {err}"),
            Self::InvalidVersion(msg) => write!(f, "invalid version id: {msg}"),
            Self::SizeLimitExceeded { actual, limit } => {
                write!(f, "object exceeds size limit ({actual} > {limit} bytes)")
            }
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
