//! Routes provider calls to the request caller registered for the addressed
//! participant.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tether_core::Reply;
use tower::Service;

use super::{ProviderCall, ProviderError, ProviderPayload, ProviderResponse};
use crate::directory::RequestCallerDirectory;

/// Innermost service of the provider pipeline.
///
/// A provider failure is returned inside the reply; only a missing provider
/// is a [`ProviderError`].
#[derive(Clone)]
pub struct ProviderRouter {
    providers: Arc<RequestCallerDirectory>,
}

impl ProviderRouter {
    #[must_use]
    pub fn new(providers: Arc<RequestCallerDirectory>) -> Self {
        Self { providers }
    }
}

impl Service<ProviderCall> for ProviderRouter {
    type Response = ProviderResponse;
    type Error = ProviderError;
    type Future = Pin<Box<dyn Future<Output = Result<ProviderResponse, ProviderError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: ProviderCall) -> Self::Future {
        let Some(caller) = self.providers.lookup(&call.participant_id) else {
            let participant_id = call.participant_id;
            return Box::pin(async move { Err(ProviderError::NoProvider { participant_id }) });
        };

        Box::pin(async move {
            match call.payload {
                ProviderPayload::Request(request) => {
                    let request_reply_id = request.request_reply_id.clone();
                    let reply = match caller.invoke(request).await {
                        Ok(response) => Reply::success(request_reply_id, response),
                        Err(error) => Reply::failure(request_reply_id, error),
                    };
                    Ok(Some(reply))
                }
                ProviderPayload::OneWay(request) => {
                    let method_name = request.method_name.clone();
                    if let Err(error) = caller.invoke_one_way(request).await {
                        tracing::warn!(
                            participant_id = %call.participant_id,
                            %method_name,
                            %error,
                            "one-way invocation failed"
                        );
                    }
                    Ok(None)
                }
            }
        })
    }
}
