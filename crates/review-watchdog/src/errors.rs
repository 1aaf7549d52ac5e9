//! Error taxonomy for the watchdog.
//!
//! | Error          | Raised by          | Handling                               |
//! |----------------|--------------------|----------------------------------------|
//! | `SourceError`  | `ReviewSource`     | logged at warn, treated as empty data  |
//! |                | `DeadlineSource`   | same; the loop then reports `TimedOut` |
//! | `ArgError`     | CLI argument parse | fatal, exit status 1                   |
//!
//! Timeouts are not errors: they are a `WatchOutcome` variant.

use thiserror::Error;

/// Failure of an external review-service call.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The CLI binary could not be started at all.
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The CLI ran but exited unsuccessfully.
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// The CLI succeeded but printed something we could not decode.
    #[error("malformed output from `{command}`: {source}")]
    Malformed {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    /// The query succeeded but the pull request was absent from the response.
    #[error("pull request {0} not found")]
    NotFound(String),

    /// The call was still pending when the run's deadline passed.
    #[error("`{call}` abandoned at the run deadline")]
    DeadlineExceeded { call: &'static str },
}

impl SourceError {
    /// Short machine-friendly label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn",
            Self::CommandFailed { .. } => "command_failed",
            Self::Malformed { .. } => "malformed",
            Self::NotFound(_) => "not_found",
            Self::DeadlineExceeded { .. } => "deadline",
        }
    }
}

/// Invalid command-line input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgError {
    #[error("repository must look like `owner/name`, got `{0}`")]
    InvalidRepo(String),

    #[error("pull request number must be positive")]
    ZeroPullNumber,
}
