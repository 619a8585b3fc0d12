//! Error types for the Tether engine.

use thiserror::Error;

/// A single write rejected by the backend inside a batch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemError {
    /// Class of the record the rejected write belonged to
    pub class_name: String,
    /// Object ID of the record, if it had one when submitted
    pub object_id: Option<String>,
    /// Backend error code
    pub code: i64,
    /// Backend error message
    pub message: String,
}

impl std::fmt::Display for ItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.object_id {
            Some(id) => write!(f, "{}/{}: [{}] {}", self.class_name, id, self.code, self.message),
            None => write!(f, "{} (new): [{}] {}", self.class_name, self.code, self.message),
        }
    }
}

/// All possible errors from the Tether engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    // Local validation errors
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("invalid operand for '{key}': {reason}")]
    InvalidOperand { key: String, reason: String },

    #[error("found a circular reference while saving a {class_name} record")]
    CircleReference { class_name: String },

    #[error("{class_name} record has no object ID")]
    MissingObjectId { class_name: String },

    // Encoding errors
    #[error("codec error: {0}")]
    Codec(String),

    // Remote errors
    #[error("{} batched write(s) rejected: {}", .0.len(), summarize(.0))]
    PerItemBatchFailure(Vec<ItemError>),

    #[error("transport failure: {message}")]
    Transport { code: Option<i64>, message: String },

    #[error("save cancelled")]
    Cancelled,
}

impl Error {
    /// Build an [`Error::InvalidOperand`].
    pub(crate) fn invalid_operand(key: &str, reason: impl Into<String>) -> Self {
        Error::InvalidOperand {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Build an [`Error::Transport`] without a backend code.
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            code: None,
            message: message.into(),
        }
    }
}

fn summarize(items: &[ItemError]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
