use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// A failure persisting or loading durable state.
///
/// Always returned to the caller; stores never retry on their own.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode store: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("corrupt store file {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("counter {key:?} holds non-integer value {value:?}")]
    InvalidCounter { key: String, value: String },

    #[error("value for {key:?} is not valid utf-8")]
    NonUtf8Value { key: String },
}

impl StorageError {
    /// Adapter for `map_err` that tags an io error with the path involved
    pub fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
