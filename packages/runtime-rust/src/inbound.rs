//! Inbound routing: classifies each received envelope and hands it to the
//! provider pipeline, correlation registry, subscription manager, or
//! publication handler.

use std::collections::HashMap;
use std::sync::Arc;

use tether_core::{
    ClockSource, Envelope, ExpiryDate, Message, MessagingQos, ProviderRuntimeError, Reply,
    RuntimeErrorKind, SubscriptionReply,
};
use tower::ServiceExt;

use crate::correlation::CorrelationRegistry;
use crate::provider::{ProviderCall, ProviderPayload, ProviderPipeline};
use crate::subscription::SubscriptionManager;
use crate::traits::{MessageSender, PublicationHandler};

// ---------------------------------------------------------------------------
// InboundOutcome
// ---------------------------------------------------------------------------

/// Where an inbound message went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Provider,
    Reply,
    SubscriptionReply,
    Publication,
    PublicationHandler,
}

/// Why an inbound message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The envelope's expiry date had passed on arrival.
    Expired,
    /// No pending request, registration, or subscription matched the id.
    Unmatched,
    /// The provider pipeline refused a one-way call.
    Rejected,
    /// No publication handler is installed.
    NoPublicationHandler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    Delivered(Route),
    Dropped(DropReason),
}

// ---------------------------------------------------------------------------
// InboundRouter
// ---------------------------------------------------------------------------

/// Entry point for every message the transport receives.
pub struct InboundRouter {
    registry: Arc<CorrelationRegistry>,
    subscriptions: Arc<SubscriptionManager>,
    pipeline: ProviderPipeline,
    publication_handler: Option<Arc<dyn PublicationHandler>>,
    sender: Arc<dyn MessageSender>,
    clock: Arc<dyn ClockSource>,
}

impl InboundRouter {
    #[must_use]
    pub fn new(
        registry: Arc<CorrelationRegistry>,
        subscriptions: Arc<SubscriptionManager>,
        pipeline: ProviderPipeline,
        publication_handler: Option<Arc<dyn PublicationHandler>>,
        sender: Arc<dyn MessageSender>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            registry,
            subscriptions,
            pipeline,
            publication_handler,
            sender,
            clock,
        }
    }

    /// Routes `envelope` on a spawned task so the transport is never held up
    /// by provider logic.
    pub fn dispatch(self: &Arc<Self>, envelope: Envelope) {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            router.receive(envelope).await;
        });
    }

    /// Routes one envelope and reports where it went.
    pub async fn receive(&self, envelope: Envelope) -> InboundOutcome {
        let now = self.clock.now();
        let kind = envelope.payload.kind();
        if envelope.is_expired(now) {
            tracing::debug!(
                message_id = %envelope.message_id,
                kind,
                expiry = envelope.expiry_date.millis(),
                now,
                "dropping expired message"
            );
            metrics::counter!("tether_messages_expired_total", "kind" => kind).increment(1);
            return InboundOutcome::Dropped(DropReason::Expired);
        }
        metrics::counter!("tether_messages_received_total", "kind" => kind).increment(1);

        let Envelope {
            from,
            to,
            expiry_date,
            custom_headers,
            payload,
            ..
        } = envelope;

        let outcome = match payload {
            Message::Request { payload } => {
                self.invoke_provider(from, to, ProviderPayload::Request(payload), expiry_date, &custom_headers)
                    .await
            }
            Message::OneWayRequest { payload } => {
                self.invoke_provider(from, to, ProviderPayload::OneWay(payload), expiry_date, &custom_headers)
                    .await
            }
            Message::Reply { payload } => delivered_if(self.registry.resolve(payload), Route::Reply),
            Message::SubscriptionReply { payload } => delivered_if(
                self.subscriptions.handle_subscription_reply(payload),
                Route::SubscriptionReply,
            ),
            Message::Publication { payload } => delivered_if(
                self.subscriptions.handle_publication(payload),
                Route::Publication,
            ),
            Message::SubscriptionRequest { payload } => match &self.publication_handler {
                Some(handler) => {
                    let reply = handler.handle_subscription_request(&from, &to, payload).await;
                    self.answer_subscription(&from, &to, reply, expiry_date, &custom_headers)
                        .await
                }
                None => {
                    self.reject_subscription(&from, &to, payload.subscription_id, expiry_date, &custom_headers)
                        .await
                }
            },
            Message::BroadcastSubscriptionRequest { payload } => match &self.publication_handler {
                Some(handler) => {
                    let reply = handler
                        .handle_broadcast_subscription_request(&from, &to, payload)
                        .await;
                    self.answer_subscription(&from, &to, reply, expiry_date, &custom_headers)
                        .await
                }
                None => {
                    self.reject_subscription(&from, &to, payload.subscription_id, expiry_date, &custom_headers)
                        .await
                }
            },
            Message::SubscriptionStop { payload } => match &self.publication_handler {
                Some(handler) => {
                    handler.handle_subscription_stop(&from, payload).await;
                    InboundOutcome::Delivered(Route::PublicationHandler)
                }
                None => {
                    tracing::debug!(subscription_id = %payload.subscription_id, "no publication handler for stop");
                    InboundOutcome::Dropped(DropReason::NoPublicationHandler)
                }
            },
        };

        if let InboundOutcome::Dropped(reason) = outcome {
            tracing::debug!(kind, ?reason, "inbound message dropped");
        }
        outcome
    }

    async fn invoke_provider(
        &self,
        from: String,
        to: String,
        payload: ProviderPayload,
        expiry: ExpiryDate,
        headers: &HashMap<String, String>,
    ) -> InboundOutcome {
        let call = ProviderCall::new(to.as_str(), from.as_str(), payload, expiry, self.clock.now());
        let request_reply_id = call.request_reply_id().map(str::to_string);

        let reply = match (self.pipeline.clone().oneshot(call).await, request_reply_id) {
            (Ok(Some(reply)), _) => reply,
            (Ok(None), _) => return InboundOutcome::Delivered(Route::Provider),
            (Err(error), Some(request_reply_id)) => {
                tracing::warn!(provider = %to, %request_reply_id, %error, "provider call failed");
                Reply::failure(request_reply_id, error.into_reply_error())
            }
            (Err(error), None) => {
                tracing::warn!(provider = %to, %error, "one-way call rejected");
                return InboundOutcome::Dropped(DropReason::Rejected);
            }
        };

        self.respond(&to, &from, Message::Reply { payload: reply }, expiry, headers)
            .await;
        InboundOutcome::Delivered(Route::Provider)
    }

    async fn answer_subscription(
        &self,
        subscriber: &str,
        provider: &str,
        reply: SubscriptionReply,
        expiry: ExpiryDate,
        headers: &HashMap<String, String>,
    ) -> InboundOutcome {
        self.respond(provider, subscriber, Message::SubscriptionReply { payload: reply }, expiry, headers)
            .await;
        InboundOutcome::Delivered(Route::PublicationHandler)
    }

    async fn reject_subscription(
        &self,
        subscriber: &str,
        provider: &str,
        subscription_id: String,
        expiry: ExpiryDate,
        headers: &HashMap<String, String>,
    ) -> InboundOutcome {
        let reply = SubscriptionReply::rejected(
            subscription_id,
            ProviderRuntimeError::new(
                RuntimeErrorKind::SubscriptionRejected,
                "no publication handler installed",
            ),
        );
        self.respond(provider, subscriber, Message::SubscriptionReply { payload: reply }, expiry, headers)
            .await;
        InboundOutcome::Dropped(DropReason::NoPublicationHandler)
    }

    /// Sends a response with whatever lifetime the inbound message had left.
    async fn respond(
        &self,
        from: &str,
        to: &str,
        message: Message,
        expiry: ExpiryDate,
        headers: &HashMap<String, String>,
    ) {
        let ttl_ms = expiry.remaining_ms(self.clock.now());
        if ttl_ms == 0 {
            tracing::debug!(kind = message.kind(), %to, "response expired before it could be sent");
            return;
        }
        let qos = MessagingQos {
            ttl_ms,
            custom_headers: headers.clone(),
        };
        if let Err(error) = self.sender.send(from, &[to.to_string()], message, &qos).await {
            tracing::warn!(%to, %error, "failed to send response");
        }
    }
}

fn delivered_if(handled: bool, route: Route) -> InboundOutcome {
    if handled {
        InboundOutcome::Delivered(route)
    } else {
        InboundOutcome::Dropped(DropReason::Unmatched)
    }
}
