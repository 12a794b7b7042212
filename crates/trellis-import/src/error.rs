//! Error types for the trellis-import crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Row {line}: {message}")]
    Row { line: usize, message: String },

    #[error("No rows to import")]
    Empty,

    #[error(transparent)]
    Engine(#[from] trellis_core::TrellisError),

    #[error("Graph error: {0}")]
    Graph(#[from] trellis_graph::GraphError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ImportError {
    pub fn row(line: usize, message: impl Into<String>) -> Self {
        Self::Row {
            line,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;
