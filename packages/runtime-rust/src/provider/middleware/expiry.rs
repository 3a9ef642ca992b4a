//! Expiry middleware for provider calls.
//!
//! A provider call may only run for as long as its inbound message lives.
//! When that lifetime runs out, a request is answered with a runtime
//! `Timeout` reply produced here, so the caller learns why it got no result.
//! A one-way call has nobody to answer and is abandoned.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tether_core::{ProviderRuntimeError, Reply, RuntimeErrorKind};
use tower::{Layer, Service};

use crate::provider::{ProviderCall, ProviderError, ProviderResponse};

#[derive(Debug, Clone)]
pub struct ExpiryLayer;

impl<S> Layer<S> for ExpiryLayer {
    type Service = ExpiryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ExpiryService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct ExpiryService<S> {
    inner: S,
}

/// Enough of a call to answer for it once its message has expired.
struct Lapse {
    participant_id: String,
    method_name: String,
    request_reply_id: Option<String>,
    timeout_ms: u64,
}

impl Lapse {
    fn of(call: &ProviderCall) -> Self {
        Self {
            participant_id: call.participant_id.clone(),
            method_name: call.method_name().to_string(),
            request_reply_id: call.request_reply_id().map(str::to_string),
            timeout_ms: call.timeout_ms,
        }
    }

    fn into_response(self) -> ProviderResponse {
        let Some(request_reply_id) = self.request_reply_id else {
            tracing::warn!(
                participant_id = %self.participant_id,
                method = %self.method_name,
                "one-way call abandoned at message expiry"
            );
            return None;
        };
        let error = ProviderRuntimeError::new(
            RuntimeErrorKind::Timeout,
            format!(
                "{} did not answer {} within {}ms",
                self.participant_id, self.method_name, self.timeout_ms
            ),
        );
        Some(Reply::failure(request_reply_id, error))
    }
}

impl<S> Service<ProviderCall> for ExpiryService<S>
where
    S: Service<ProviderCall, Response = ProviderResponse, Error = ProviderError> + Send,
    S::Future: Send + 'static,
{
    type Response = ProviderResponse;
    type Error = ProviderError;
    type Future = Pin<Box<dyn Future<Output = Result<ProviderResponse, ProviderError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: ProviderCall) -> Self::Future {
        let lapse = Lapse::of(&call);
        if call.timeout_ms == 0 {
            // Nothing left of the lifetime: the provider is not invoked.
            return Box::pin(async move { Ok(lapse.into_response()) });
        }

        let budget = Duration::from_millis(call.timeout_ms);
        let fut = self.inner.call(call);
        Box::pin(async move {
            match tokio::time::timeout(budget, fut).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    metrics::counter!("tether_provider_calls_expired_total").increment(1);
                    Ok(lapse.into_response())
                }
            }
        })
    }
}
