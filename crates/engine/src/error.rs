use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] warren_config::Error),

    #[error(transparent)]
    Brain(#[from] warren_brain::Error),

    #[error(transparent)]
    History(#[from] warren_history::Error),

    #[error(transparent)]
    Channel(#[from] warren_channels::Error),

    #[error(transparent)]
    Address(#[from] warren_routing::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("configuration has {errors} error(s):\n{report}")]
    Invalid { errors: usize, report: String },

    #[error("invalid task name: {name}")]
    InvalidTaskName { name: String },

    #[error("task registered twice: {name}")]
    DuplicateTask { name: String },

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
}

impl warren_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

warren_common::impl_context!();

pub type Result<T> = std::result::Result<T, Error>;
