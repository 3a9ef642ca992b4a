//! Consumer-facing subscription callbacks and their type-erased sink.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use rmpv::Value;
use serde::de::DeserializeOwned;
use tether_core::decode_response;
use tokio::sync::oneshot;

use crate::error::SubscriptionError;

/// Receives updates for one subscription.
///
/// Callbacks run on the runtime's delivery task and must not block.
pub trait SubscriptionListener<T>: Send + Sync + 'static {
    /// The provider acknowledged the subscription under `subscription_id`.
    fn on_subscribed(&self, _subscription_id: &str) {}

    /// A new value was published.
    fn on_receive(&self, value: T);

    /// The subscription failed, expired, or a publication carried an error.
    fn on_error(&self, _error: &SubscriptionError) {}
}

/// Type-erased listener stored by the subscription manager.
pub trait PublicationSink: Send + Sync {
    /// Name of the type publications decode into.
    fn value_type(&self) -> &'static str;

    fn on_subscribed(&self, subscription_id: &str);

    /// Decodes `values` and hands them to the listener.
    fn deliver(&self, subscription_id: &str, values: Vec<Value>);

    fn on_error(&self, error: &SubscriptionError);
}

/// Adapts a typed [`SubscriptionListener`] to [`PublicationSink`].
pub struct TypedSink<T, L> {
    listener: L,
    _marker: PhantomData<fn() -> T>,
}

impl<T, L> TypedSink<T, L> {
    #[must_use]
    pub fn new(listener: L) -> Self {
        Self {
            listener,
            _marker: PhantomData,
        }
    }
}

impl<T, L> PublicationSink for TypedSink<T, L>
where
    T: DeserializeOwned + 'static,
    L: SubscriptionListener<T>,
{
    fn value_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn on_subscribed(&self, subscription_id: &str) {
        self.listener.on_subscribed(subscription_id);
    }

    fn deliver(&self, subscription_id: &str, values: Vec<Value>) {
        match decode_response::<T>(values) {
            Ok(value) => self.listener.on_receive(value),
            Err(source) => {
                tracing::warn!(%subscription_id, error = %source, "undecodable publication");
                self.listener.on_error(&SubscriptionError::Decode {
                    subscription_id: subscription_id.to_string(),
                    source,
                });
            }
        }
    }

    fn on_error(&self, error: &SubscriptionError) {
        self.listener.on_error(error);
    }
}

/// Resolves with the effective subscription id once the provider acknowledges,
/// or with the registration failure.
pub struct SubscriptionFuture {
    subscription_id: String,
    rx: oneshot::Receiver<Result<String, SubscriptionError>>,
}

impl SubscriptionFuture {
    pub(crate) fn new(
        subscription_id: String,
        rx: oneshot::Receiver<Result<String, SubscriptionError>>,
    ) -> Self {
        Self { subscription_id, rx }
    }

    /// The id the subscription was requested under.
    #[must_use]
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }
}

impl Future for SubscriptionFuture {
    type Output = Result<String, SubscriptionError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_closed)) => Poll::Ready(Err(SubscriptionError::Stopped)),
            Poll::Pending => Poll::Pending,
        }
    }
}
