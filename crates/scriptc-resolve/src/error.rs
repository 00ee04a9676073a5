//! Resolution errors

use std::path::PathBuf;

use scriptc_lexer::Span;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ResolveError>;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{origin}:{span}: {message}")]
    Syntax {
        /// File path or snippet name the error was found in
        origin: String,
        span: Span,
        message: String,
    },

    #[error("cache serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ResolveError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
