//! Trait seams between the runtime and its surroundings.
//!
//! - [`MessageSender`]: hands messages to the transport
//! - [`RequestCaller`]: provider-side method dispatch
//! - [`PublicationHandler`]: provider-side subscription bookkeeping

use async_trait::async_trait;
use rmpv::Value;
use tether_core::{
    BroadcastSubscriptionRequest, Message, MessagingQos, OneWayRequest, ReplyError, Request,
    SubscriptionReply, SubscriptionRequest, SubscriptionStop,
};

use crate::error::SendError;

/// Outbound transport.
///
/// Returns once the transport has accepted the message, not once it is
/// delivered. The envelope expiry is `now + qos.ttl_ms`.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Sends `message` from `from` to every participant in `to`.
    async fn send(
        &self,
        from: &str,
        to: &[String],
        message: Message,
        qos: &MessagingQos,
    ) -> Result<(), SendError>;
}

/// Provider-side dispatch of incoming requests to business logic.
#[async_trait]
pub trait RequestCaller: Send + Sync {
    /// Invokes the requested method and returns its response values.
    async fn invoke(&self, request: Request) -> Result<Vec<Value>, ReplyError>;

    /// Invokes a fire-and-forget method. Defaults to [`RequestCaller::invoke`]
    /// with the result discarded.
    async fn invoke_one_way(&self, request: OneWayRequest) -> Result<(), ReplyError> {
        self.invoke(request.into()).await.map(|_| ())
    }
}

/// Provider-side handling of subscription requests and stops.
#[async_trait]
pub trait PublicationHandler: Send + Sync {
    async fn handle_subscription_request(
        &self,
        subscriber: &str,
        provider: &str,
        request: SubscriptionRequest,
    ) -> SubscriptionReply;

    async fn handle_broadcast_subscription_request(
        &self,
        subscriber: &str,
        provider: &str,
        request: BroadcastSubscriptionRequest,
    ) -> SubscriptionReply;

    async fn handle_subscription_stop(&self, subscriber: &str, stop: SubscriptionStop);
}
