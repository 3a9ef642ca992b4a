//! Metrics middleware for provider calls.
//!
//! Records duration and outcome on a `tracing` span and in `metrics`
//! counters and histograms.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tether_core::{ProviderRuntimeError, Reply, ReplyError, RuntimeErrorKind};
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::provider::{ProviderCall, ProviderError, ProviderResponse};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

fn outcome_of(result: &Result<ProviderResponse, ProviderError>) -> &'static str {
    match result {
        Ok(Some(Reply {
            error: Some(ReplyError::Runtime(ProviderRuntimeError { kind: RuntimeErrorKind::Timeout, .. })),
            ..
        })) => "expired",
        Ok(Some(reply)) if reply.is_error() => "error_reply",
        Ok(Some(_)) => "ok",
        Ok(None) => "one_way",
        Err(ProviderError::NoProvider { .. }) => "no_provider",
    }
}

impl<S> Service<ProviderCall> for MetricsService<S>
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
        let span = info_span!(
            "provider_call",
            participant_id = %call.participant_id,
            method = %call.method_name(),
            request_reply_id = call.request_reply_id().unwrap_or(""),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(call);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let outcome = outcome_of(&result);

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);
                tracing::debug!(duration_ms, outcome, "provider call complete");

                metrics::counter!("tether_provider_calls_total", "outcome" => outcome).increment(1);
                #[allow(clippy::cast_precision_loss)]
                let duration = duration_ms as f64;
                metrics::histogram!("tether_provider_call_duration_ms").record(duration);

                result
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use rmpv::Value;
    use tether_core::{ApplicationError, ExpiryDate, Request};
    use tower::ServiceExt;

    use super::*;
    use crate::provider::ProviderPayload;

    struct EchoService;

    impl Service<ProviderCall> for EchoService {
        type Response = ProviderResponse;
        type Error = ProviderError;
        type Future =
            Pin<Box<dyn Future<Output = Result<ProviderResponse, ProviderError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, call: ProviderCall) -> Self::Future {
            let id = call.request_reply_id().unwrap_or_default().to_string();
            Box::pin(async move { Ok(Some(Reply::success(id, vec![Value::from(true)]))) })
        }
    }

    #[tokio::test]
    async fn metrics_layer_passes_through_response() {
        let call = ProviderCall::new(
            "provider",
            "consumer",
            ProviderPayload::Request(Request {
                request_reply_id: "corr-42".to_string(),
                method_name: "echo".to_string(),
                params: vec![],
                param_datatypes: vec![],
            }),
            ExpiryDate::NEVER,
            0,
        );
        let reply = MetricsLayer.layer(EchoService).oneshot(call).await.unwrap().unwrap();
        assert_eq!(reply.request_reply_id, "corr-42");
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome_of(&Ok(None)), "one_way");
        assert_eq!(outcome_of(&Ok(Some(Reply::success("c", vec![])))), "ok");
        let expired = Reply::failure("c", ProviderRuntimeError::new(RuntimeErrorKind::Timeout, "late"));
        assert_eq!(outcome_of(&Ok(Some(expired))), "expired");
        let failed = Reply::failure("c", ApplicationError::new("E", "BAD"));
        assert_eq!(outcome_of(&Ok(Some(failed))), "error_reply");
        let missing = ProviderError::NoProvider {
            participant_id: "p".to_string(),
        };
        assert_eq!(outcome_of(&Err(missing)), "no_provider");
    }
}
