use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("no history for {tag} run {index}")]
    NotFound { tag: String, index: u64 },

    #[error("unknown history provider: {name}")]
    UnknownProvider { name: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(tag: impl Into<String>, index: u64) -> Self {
        Self::NotFound {
            tag: tag.into(),
            index,
        }
    }
}

impl warren_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

warren_common::impl_context!();

pub type Result<T> = std::result::Result<T, Error>;
