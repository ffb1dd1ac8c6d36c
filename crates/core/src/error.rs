use thiserror::Error;

use crate::types::Step;

/// Failure of a single registration exchange
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timeout after {0}s")]
    Timeout(u64),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Error, Debug, Clone)]
pub enum MailboxError {
    #[error("mailbox connect failed: {0}")]
    Connect(String),

    #[error("mailbox login failed: {0}")]
    Login(String),

    #[error("mailbox command failed: {0}")]
    Command(String),

    #[error("fetch of message {id} failed: {reason}")]
    Fetch { id: u32, reason: String },

    #[error("mailbox session closed")]
    Disconnected,
}

/// Failure of one step for one candidate. Always recovered by moving to the next candidate.
#[derive(Error, Debug, Clone)]
pub enum StepError {
    #[error("{step} failed: {source}")]
    Transport {
        step: Step,
        #[source]
        source: TransportError,
    },

    #[error("{step} rejected by target (code {code}): {message}")]
    RejectedByTarget {
        step: Step,
        code: String,
        message: String,
    },

    #[error("no verification token after {waited_secs}s")]
    TokenNotFound { waited_secs: u64 },

    #[error("mailbox unavailable: {0}")]
    MailboxUnavailable(String),

    #[error("{step} could not be prepared: {reason}")]
    Request { step: Step, reason: String },
}

/// Terminal failure of a whole attempt
#[derive(Error, Debug, Clone)]
pub enum AttemptError {
    #[error("all {tried} candidates failed; last: {reason}")]
    CandidatesExhausted { tried: usize, reason: String },

    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
