use std::fmt::{self, Display};

/// Errors produced by model constructors and parsers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A notification line did not split into exactly three fields.
    MalformedNotification { fields: usize, body: String },
    /// A notification body was not valid UTF-8.
    InvalidEncoding,
    /// A filename that would land outside the destination directory.
    UnsafeFilename(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::MalformedNotification { fields, body } => write!(
                f,
                "malformed notification: expected 3 fields, found {fields} in {body:?}"
            ),
            ModelError::InvalidEncoding => {
                write!(f, "notification body is not valid utf-8")
            }
            ModelError::UnsafeFilename(name) => {
                write!(f, "refusing to write {name:?} outside the destination")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
