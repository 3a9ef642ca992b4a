//! Error types surfaced by the runtime.

use tether_core::{ApplicationError, CallKind, CodecError, ProviderRuntimeError, ReplyError};

/// Failure handing a message to the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("transport rejected message: {reason}")]
    Rejected { reason: String },
    #[error("no route to participant {participant_id}")]
    NoRoute { participant_id: String },
    #[error("transport closed")]
    Closed,
}

/// Correlation registry failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("correlation id already registered: {0}")]
    DuplicateCorrelationId(String),
}

/// Outcome of a failed call, delivered to the caller exactly once.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum CallError {
    #[error("{kind} calls require {expected} participant, got {actual}")]
    InvalidParticipantCount {
        kind: &'static str,
        expected: &'static str,
        actual: usize,
    },
    #[error("{actual:?} call cannot be issued as {expected:?}")]
    WrongCallKind { expected: CallKind, actual: CallKind },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("send failed: {0}")]
    Send(#[from] SendError),
    #[error("no reply within {ttl_ms}ms")]
    Timeout { ttl_ms: u64 },
    #[error("application error {0}")]
    Application(ApplicationError),
    #[error("provider runtime error {0}")]
    Runtime(ProviderRuntimeError),
    #[error(transparent)]
    Decode(#[from] CodecError),
    #[error("messaging runtime not started")]
    NotStarted,
    #[error("messaging runtime stopped")]
    Stopped,
}

impl CallError {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidParticipantCount { .. } | Self::WrongCallKind { .. } => "invalid",
            Self::Registry(_) => "registry",
            Self::Send(_) => "send",
            Self::Timeout { .. } => "timeout",
            Self::Application(_) => "application",
            Self::Runtime(_) => "runtime",
            Self::Decode(_) => "decode",
            Self::NotStarted | Self::Stopped => "stopped",
        }
    }
}

/// Failure reported to a subscription listener or registration future.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum SubscriptionError {
    #[error("subscription {subscription_id} rejected: {error}")]
    Rejected {
        subscription_id: String,
        error: ReplyError,
    },
    #[error("publication error on {subscription_id}: {error}")]
    Publication {
        subscription_id: String,
        error: ReplyError,
    },
    #[error("undecodable publication on {subscription_id}: {source}")]
    Decode {
        subscription_id: String,
        source: CodecError,
    },
    #[error("subscription {subscription_id} expired")]
    Expired { subscription_id: String },
    #[error("subscription {subscription_id} replaced before it was acknowledged")]
    Superseded { subscription_id: String },
    #[error("subscription {subscription_id} unsubscribed before it was acknowledged")]
    Unsubscribed { subscription_id: String },
    #[error("messaging runtime stopped")]
    Stopped,
}
