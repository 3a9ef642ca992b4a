//! Pipeline composition: wraps the provider router in the middleware layers.

use tower::ServiceBuilder;

use super::expiry::{ExpiryLayer, ExpiryService};
use super::metrics::{MetricsLayer, MetricsService};
use crate::provider::router::ProviderRouter;

/// Concrete type of the composed provider pipeline.
pub type ProviderPipeline = MetricsService<ExpiryService<ProviderRouter>>;

/// Builds the provider pipeline around `router`.
///
/// `MetricsLayer` sits outside `ExpiryLayer` so expired calls are counted
/// with the timeout reply they produced.
#[must_use]
pub fn build_provider_pipeline(router: ProviderRouter) -> ProviderPipeline {
    ServiceBuilder::new()
        .layer(MetricsLayer)
        .layer(ExpiryLayer)
        .service(router)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use rmpv::Value;
    use tether_core::{ExpiryDate, ProviderRuntimeError, ReplyError, Request, RuntimeErrorKind};
    use tower::ServiceExt;

    use super::*;
    use crate::directory::{CallerDirectory, RequestCallerDirectory};
    use crate::provider::{ProviderCall, ProviderError, ProviderPayload};
    use crate::traits::RequestCaller;

    struct SleepyCaller;

    #[async_trait]
    impl RequestCaller for SleepyCaller {
        async fn invoke(&self, request: Request) -> Result<Vec<Value>, ReplyError> {
            if request.method_name == "sleep" {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(vec![Value::from(request.method_name)])
        }
    }

    fn pipeline() -> ProviderPipeline {
        let providers: Arc<RequestCallerDirectory> = Arc::new(CallerDirectory::new("provider"));
        providers.add("p", Arc::new(SleepyCaller));
        build_provider_pipeline(ProviderRouter::new(providers))
    }

    fn call(method: &str, expiry: ExpiryDate) -> ProviderCall {
        ProviderCall::new(
            "p",
            "c",
            ProviderPayload::Request(Request {
                request_reply_id: "corr".to_string(),
                method_name: method.to_string(),
                params: vec![],
                param_datatypes: vec![],
            }),
            expiry,
            0,
        )
    }

    #[tokio::test]
    async fn pipeline_routes_through_all_layers() {
        let reply = pipeline()
            .oneshot(call("ping", ExpiryDate::NEVER))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.response, vec![Value::from("ping")]);
    }

    #[tokio::test(start_paused = true)]
    async fn pipeline_answers_expired_call_with_timeout() {
        let reply = pipeline()
            .oneshot(call("sleep", ExpiryDate::from_millis(100)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.request_reply_id, "corr");
        assert!(matches!(
            reply.error,
            Some(ReplyError::Runtime(ProviderRuntimeError { kind: RuntimeErrorKind::Timeout, .. }))
        ));
    }

    #[tokio::test]
    async fn pipeline_reports_missing_provider() {
        let mut missing = call("ping", ExpiryDate::NEVER);
        missing.participant_id = "gone".to_string();
        let err = pipeline().oneshot(missing).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::NoProvider {
                participant_id: "gone".to_string()
            }
        );
    }
}
