//! Provider-side invocation: a tower service stack that runs incoming
//! requests against registered [`RequestCaller`](crate::traits::RequestCaller)s.

pub mod middleware;
pub mod router;

use tether_core::{
    ExpiryDate, OneWayRequest, ProviderRuntimeError, Reply, ReplyError, Request, RuntimeErrorKind,
};

pub use middleware::{build_provider_pipeline, ProviderPipeline};
pub use router::ProviderRouter;

// ---------------------------------------------------------------------------
// ProviderCall
// ---------------------------------------------------------------------------

/// Inbound invocation addressed to a local provider.
#[derive(Debug, Clone)]
pub enum ProviderPayload {
    Request(Request),
    OneWay(OneWayRequest),
}

/// One inbound invocation flowing through the provider pipeline.
#[derive(Debug, Clone)]
pub struct ProviderCall {
    /// Addressed provider participant.
    pub participant_id: String,
    /// Calling participant.
    pub caller_id: String,
    pub payload: ProviderPayload,
    /// Time left before the inbound message expires.
    pub timeout_ms: u64,
}

impl ProviderCall {
    #[must_use]
    pub fn new(
        participant_id: impl Into<String>,
        caller_id: impl Into<String>,
        payload: ProviderPayload,
        expiry: ExpiryDate,
        now: u64,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            caller_id: caller_id.into(),
            payload,
            timeout_ms: expiry.remaining_ms(now),
        }
    }

    #[must_use]
    pub fn method_name(&self) -> &str {
        match &self.payload {
            ProviderPayload::Request(r) => &r.method_name,
            ProviderPayload::OneWay(r) => &r.method_name,
        }
    }

    /// Correlation id of a request, `None` for one-way calls.
    #[must_use]
    pub fn request_reply_id(&self) -> Option<&str> {
        match &self.payload {
            ProviderPayload::Request(r) => Some(&r.request_reply_id),
            ProviderPayload::OneWay(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ProviderError
// ---------------------------------------------------------------------------

/// Failure of the pipeline itself, as opposed to a failure the provider
/// returned (which travels inside the reply).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("no provider registered for participant {participant_id}")]
    NoProvider { participant_id: String },
}

impl ProviderError {
    /// Converts the failure into the error carried back to the caller.
    #[must_use]
    pub fn into_reply_error(self) -> ReplyError {
        let kind = match &self {
            Self::NoProvider { .. } => RuntimeErrorKind::NoProvider,
        };
        ReplyError::Runtime(ProviderRuntimeError::new(kind, self.to_string()))
    }
}

/// Reply for a request, `None` for one-way calls.
pub type ProviderResponse = Option<Reply>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_call_timeout_is_remaining_lifetime() {
        let call = ProviderCall::new(
            "provider",
            "consumer",
            ProviderPayload::OneWay(OneWayRequest {
                method_name: "ping".to_string(),
                params: vec![],
                param_datatypes: vec![],
            }),
            ExpiryDate::from_millis(1_500),
            1_000,
        );
        assert_eq!(call.timeout_ms, 500);
        assert_eq!(call.method_name(), "ping");
        assert_eq!(call.request_reply_id(), None);
    }

    #[test]
    fn provider_error_maps_to_runtime_reply_error() {
        let err = ProviderError::NoProvider {
            participant_id: "p-1".to_string(),
        }
        .into_reply_error();
        assert!(matches!(
            err,
            ReplyError::Runtime(ProviderRuntimeError { kind: RuntimeErrorKind::NoProvider, .. })
        ));
        assert_eq!(
            err.to_string(),
            "runtime error no provider: no provider registered for participant p-1"
        );
    }
}
