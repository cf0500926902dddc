//! Return codes surfaced to tasks.
//!
//! [`RetVal`] is what Robot API calls return; [`TaskRetVal`] is what task
//! handlers return to the pipeline. Both serialize as their variant names so
//! they can cross a process boundary to external tasks unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of a Robot API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetVal {
    Ok,

    // ── Connector ───────────────────────────────────────────────────────────
    UserNotFound,
    ChannelNotFound,
    AttributeNotFound,
    FailedMessageSend,
    FailedChannelJoin,

    // ── Brain ───────────────────────────────────────────────────────────────
    DatumNotFound,
    DatumLockExpired,
    DataFormatError,
    BrainFailed,
    InvalidDatumKey,

    // ── Task configuration ──────────────────────────────────────────────────
    InvalidConfigPointer,
    ConfigUnmarshalError,
    NoConfigFound,

    // ── Prompting ───────────────────────────────────────────────────────────
    RetryPrompt,
    ReplyNotMatched,
    UseDefaultValue,
    TimeoutExpired,
    Interrupted,
    MatcherNotFound,

    // ── Email ───────────────────────────────────────────────────────────────
    NoUserEmail,
    NoBotEmail,
    MailError,

    // ── Pipeline ────────────────────────────────────────────────────────────
    TaskNotFound,
    MissingArguments,
    InvalidStage,
    InvalidTaskType,
    CommandNotMatched,
    TaskDisabled,
    PrivilegeViolation,
    /// Shutdown has begun; the pipeline will not grow.
    RobotStopping,

    /// Generic failure; always accompanied by a log entry.
    Failed,
}

impl RetVal {
    /// Numeric code, stable across releases.
    pub fn code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::UserNotFound => 1,
            Self::ChannelNotFound => 2,
            Self::AttributeNotFound => 3,
            Self::FailedMessageSend => 4,
            Self::FailedChannelJoin => 5,
            Self::DatumNotFound => 6,
            Self::DatumLockExpired => 7,
            Self::DataFormatError => 8,
            Self::BrainFailed => 9,
            Self::InvalidDatumKey => 10,
            Self::InvalidConfigPointer => 11,
            Self::ConfigUnmarshalError => 12,
            Self::NoConfigFound => 13,
            Self::RetryPrompt => 14,
            Self::ReplyNotMatched => 15,
            Self::UseDefaultValue => 16,
            Self::TimeoutExpired => 17,
            Self::Interrupted => 18,
            Self::MatcherNotFound => 19,
            Self::NoUserEmail => 20,
            Self::NoBotEmail => 21,
            Self::MailError => 22,
            Self::TaskNotFound => 23,
            Self::MissingArguments => 24,
            Self::InvalidStage => 25,
            Self::InvalidTaskType => 26,
            Self::CommandNotMatched => 27,
            Self::TaskDisabled => 28,
            Self::PrivilegeViolation => 29,
            Self::RobotStopping => 30,
            Self::Failed => 63,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl fmt::Display for RetVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Outcome of a task handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskRetVal {
    /// Ordinary successful completion.
    #[default]
    Normal,
    /// The task ran and reports a negative outcome; authorization or
    /// elevation was refused.
    Fail,
    /// Something technical went wrong; logged at error.
    MechanismFail,
    ConfigurationError,
    /// Exclusive lock held elsewhere and the task asked not to queue.
    PipelineAborted,
    RobotStopping,
    NotFound,
    /// Positive authorization / elevation result. Counts as success for the
    /// pipeline as well.
    Success,
}

impl TaskRetVal {
    /// Map a process exit status onto a task result.
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => Self::Normal,
            1 => Self::Fail,
            2 => Self::MechanismFail,
            3 => Self::ConfigurationError,
            4 => Self::PipelineAborted,
            5 => Self::RobotStopping,
            6 => Self::NotFound,
            7 => Self::Success,
            _ => Self::MechanismFail,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Normal | Self::Success)
    }

    /// Ranking used when accumulating a pipeline result; higher wins.
    pub fn severity(self) -> u8 {
        match self {
            Self::Normal | Self::Success => 0,
            Self::NotFound => 1,
            Self::Fail => 2,
            Self::PipelineAborted => 3,
            Self::RobotStopping => 4,
            Self::ConfigurationError => 5,
            Self::MechanismFail => 6,
        }
    }

    /// The more severe of two results.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for TaskRetVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
