use {thiserror::Error, warren_common::RetVal};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("invalid datum key: {key}")]
    InvalidKey { key: String },

    #[error("lock on {key} expired or held by someone else")]
    LockExpired { key: String },

    #[error("timed out waiting for lock on {key}")]
    LockTimeout { key: String },

    #[error("unknown brain: {name}")]
    UnknownBrain { name: String },

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
    }

    #[must_use]
    pub fn lock_expired(key: impl Into<String>) -> Self {
        Self::LockExpired { key: key.into() }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// The code a task sees for this failure.
    pub fn retval(&self) -> RetVal {
        match self {
            Self::InvalidKey { .. } => RetVal::InvalidDatumKey,
            Self::LockExpired { .. } => RetVal::DatumLockExpired,
            Self::Json(_) => RetVal::DataFormatError,
            Self::LockTimeout { .. }
            | Self::Io(_)
            | Self::UnknownBrain { .. }
            | Self::Message { .. }
            | Self::External { .. } => RetVal::BrainFailed,
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
