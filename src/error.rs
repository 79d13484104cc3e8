//! Error types for the blast dispatcher.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Submission rejected: {0}")]
    Submit(#[from] SubmitError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Input errors raised synchronously when a blast is submitted. No job is
/// created when one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("No contacts provided")]
    NoContacts,

    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Channel must be either \"whatsapp\" or \"sms\", got \"{0}\"")]
    InvalidChannel(String),

    #[error("Channel {channel} has no configured transport")]
    ChannelUnavailable { channel: String },

    #[error("Invalid anti-spam setting {field}: {reason}")]
    InvalidAntiSpam { field: String, reason: String },
}

/// Job lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} not found")]
    NotFound { id: String },

    #[error("Job {id} already in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: String,
        state: String,
        target: String,
    },

    #[error("Job {id} is already queued")]
    AlreadyQueued { id: String },

    #[error("Job {id} failed: {reason}")]
    Failed { id: String, reason: String },

    #[error("Rate-limit budget is unavailable")]
    BudgetUnavailable,

    #[error("Dispatch queue is closed")]
    QueueClosed,
}

/// Failures reported by a message transport.
///
/// `NotReady`, `Transport` and `Timeout` only fail the contact being sent to.
/// `Unexpected` is unclassified and fails the whole job.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
    #[error("Channel {channel} is not ready: {reason}")]
    NotReady { channel: String, reason: String },

    #[error("Transport error on {channel}: {reason}")]
    Transport { channel: String, reason: String },

    #[error("Send timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Unexpected send failure: {0}")]
    Unexpected(String),
}

impl SendError {
    /// Whether this failure is confined to a single contact.
    pub fn is_contact_scoped(&self) -> bool {
        !matches!(self, Self::Unexpected(_))
    }
}

/// Member persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Record rejected for {key}: {reason}")]
    Rejected { key: String, reason: String },
}
