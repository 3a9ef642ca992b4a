//! Consumer-side subscription state machine.
//!
//! ```text
//! REGISTERING --ack--> ACTIVE --no publication before deadline--> EXPIRED
//!      |                  |
//!      |                  +--unregister--> UNSUBSCRIBED
//!      +--error ack--> FAILED
//! ```
//!
//! Entries leave the table on every terminal transition. Publications for an
//! id with no entry are dropped. Publications are delivered in arrival order;
//! they are not resequenced.
//!
//! Listener callbacks are never invoked while a table entry is locked, so a
//! listener may call back into the manager.

pub mod listener;

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use tether_core::{
    BroadcastSubscriptionRequest, ClockSource, ExpiryDate, Message, MessagingQos, ReplyError,
    SubscriptionPublication, SubscriptionQos, SubscriptionReply, SubscriptionRequest,
    SubscriptionStop,
};
use tokio::sync::oneshot;

use crate::error::{CallError, SubscriptionError};
use crate::traits::MessageSender;

pub use listener::{PublicationSink, SubscriptionFuture, SubscriptionListener, TypedSink};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Registering,
    Active,
    Expired,
    Unsubscribed,
    Failed,
}

impl SubscriptionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Expired | Self::Unsubscribed | Self::Failed)
    }
}

/// Subscription to a provider attribute.
#[derive(Debug, Clone)]
pub struct AttributeSubscription {
    pub attribute_name: String,
    pub qos: SubscriptionQos,
    /// Set to update an existing subscription in place.
    pub subscription_id: Option<String>,
}

impl AttributeSubscription {
    #[must_use]
    pub fn new(attribute_name: impl Into<String>, qos: SubscriptionQos) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            qos,
            subscription_id: None,
        }
    }

    #[must_use]
    pub fn updating(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }
}

/// Subscription to a provider broadcast.
#[derive(Debug, Clone)]
pub struct BroadcastSubscription {
    pub broadcast_name: String,
    pub filter_parameters: BTreeMap<String, String>,
    pub qos: SubscriptionQos,
    pub subscription_id: Option<String>,
}

impl BroadcastSubscription {
    #[must_use]
    pub fn new(broadcast_name: impl Into<String>, qos: SubscriptionQos) -> Self {
        Self {
            broadcast_name: broadcast_name.into(),
            filter_parameters: BTreeMap::new(),
            qos,
            subscription_id: None,
        }
    }

    #[must_use]
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter_parameters.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn updating(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }
}

// ---------------------------------------------------------------------------
// SubscriptionEntry
// ---------------------------------------------------------------------------

struct SubscriptionEntry {
    name: String,
    is_broadcast: bool,
    state: SubscriptionState,
    qos: SubscriptionQos,
    sink: Arc<dyn PublicationSink>,
    last_touch_ms: u64,
    /// Bounds the wait for the acknowledgement while registering.
    registration_expiry: ExpiryDate,
    ack: Option<oneshot::Sender<Result<String, SubscriptionError>>>,
}

impl SubscriptionEntry {
    fn transition(&mut self, subscription_id: &str, next: SubscriptionState) {
        tracing::debug!(
            %subscription_id,
            name = %self.name,
            from = ?self.state,
            to = ?next,
            "subscription state change"
        );
        self.state = next;
    }

    fn deadline_ms(&self) -> Option<u64> {
        let deadline = self.qos.deadline_ms(self.last_touch_ms);
        if self.state == SubscriptionState::Registering {
            let registration = self.registration_expiry.millis();
            return Some(deadline.map_or(registration, |d| d.min(registration)));
        }
        deadline
    }

    fn is_lapsed(&self, now: u64) -> bool {
        self.deadline_ms().is_some_and(|deadline| deadline <= now)
    }

    fn complete_ack(&mut self, outcome: Result<String, SubscriptionError>) {
        if let Some(tx) = self.ack.take() {
            let _ = tx.send(outcome);
        }
    }
}

// ---------------------------------------------------------------------------
// SubscriptionManager
// ---------------------------------------------------------------------------

/// Table of consumer-side subscriptions keyed by subscription id.
pub struct SubscriptionManager {
    subscriptions: DashMap<String, SubscriptionEntry>,
    sender: Arc<dyn MessageSender>,
    clock: Arc<dyn ClockSource>,
}

impl SubscriptionManager {
    #[must_use]
    pub fn new(sender: Arc<dyn MessageSender>, clock: Arc<dyn ClockSource>) -> Self {
        Self {
            subscriptions: DashMap::new(),
            sender,
            clock,
        }
    }

    /// Registers (or updates) an attribute subscription and sends the request.
    ///
    /// The returned future resolves once the provider acknowledges.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Send`] if the request cannot be sent. No new
    /// state is kept in that case, and a subscription the call was meant to
    /// update stays as it was.
    pub async fn register_attribute_subscription<T, L>(
        &self,
        from: &str,
        to: &[String],
        subscription: AttributeSubscription,
        listener: L,
        messaging_qos: &MessagingQos,
    ) -> Result<SubscriptionFuture, CallError>
    where
        T: DeserializeOwned + 'static,
        L: SubscriptionListener<T>,
    {
        let subscription_id = subscription
            .subscription_id
            .unwrap_or_else(tether_core::new_correlation_id);
        let message = Message::SubscriptionRequest {
            payload: SubscriptionRequest {
                subscription_id: subscription_id.clone(),
                subscribed_to_name: subscription.attribute_name.clone(),
                qos: subscription.qos.clone(),
            },
        };
        let sink: Arc<dyn PublicationSink> = Arc::new(TypedSink::<T, L>::new(listener));
        self.register(
            from,
            to,
            subscription_id,
            (subscription.attribute_name, false),
            subscription.qos,
            sink,
            message,
            messaging_qos,
        )
        .await
    }

    /// Registers (or updates) a broadcast subscription and sends the request.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Send`] if the request cannot be sent.
    pub async fn register_broadcast_subscription<T, L>(
        &self,
        from: &str,
        to: &[String],
        subscription: BroadcastSubscription,
        listener: L,
        messaging_qos: &MessagingQos,
    ) -> Result<SubscriptionFuture, CallError>
    where
        T: DeserializeOwned + 'static,
        L: SubscriptionListener<T>,
    {
        let subscription_id = subscription
            .subscription_id
            .unwrap_or_else(tether_core::new_correlation_id);
        let message = Message::BroadcastSubscriptionRequest {
            payload: BroadcastSubscriptionRequest {
                subscription_id: subscription_id.clone(),
                subscribed_to_name: subscription.broadcast_name.clone(),
                filter_parameters: subscription.filter_parameters,
                qos: subscription.qos.clone(),
            },
        };
        let sink: Arc<dyn PublicationSink> = Arc::new(TypedSink::<T, L>::new(listener));
        self.register(
            from,
            to,
            subscription_id,
            (subscription.broadcast_name, true),
            subscription.qos,
            sink,
            message,
            messaging_qos,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn register(
        &self,
        from: &str,
        to: &[String],
        subscription_id: String,
        (name, is_broadcast): (String, bool),
        qos: SubscriptionQos,
        sink: Arc<dyn PublicationSink>,
        message: Message,
        messaging_qos: &MessagingQos,
    ) -> Result<SubscriptionFuture, CallError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let now = self.clock.now();
        let entry = SubscriptionEntry {
            name,
            is_broadcast,
            state: SubscriptionState::Registering,
            qos,
            sink,
            last_touch_ms: now,
            registration_expiry: ExpiryDate::from_ttl(messaging_qos.ttl_ms, self.clock.as_ref()),
            ack: Some(ack_tx),
        };

        let ours = Arc::clone(&entry.sink);
        let previous = self.subscriptions.insert(subscription_id.clone(), entry);
        if previous.is_some() {
            tracing::debug!(%subscription_id, "updating existing subscription");
        }

        if let Err(e) = self.sender.send(from, to, message, messaging_qos).await {
            tracing::warn!(%subscription_id, error = %e, "subscription request not sent");
            let removed = self
                .subscriptions
                .remove_if(&subscription_id, |_, entry| Arc::ptr_eq(&entry.sink, &ours))
                .is_some();
            // A failed update leaves the subscription it was meant to replace in place.
            if let (true, Some(previous)) = (removed, previous) {
                self.subscriptions.insert(subscription_id, previous);
            }
            return Err(CallError::Send(e));
        }

        if let Some(mut previous) = previous {
            previous.complete_ack(Err(SubscriptionError::Superseded {
                subscription_id: subscription_id.clone(),
            }));
        }

        metrics::counter!("tether_subscriptions_registered_total").increment(1);
        Ok(SubscriptionFuture::new(subscription_id, ack_rx))
    }

    /// Applies the provider's acknowledgement to a pending registration.
    ///
    /// On success the entry becomes ACTIVE under the effective id. On error it
    /// becomes FAILED, the listener is notified, and the entry is discarded.
    /// Returns `false` if no registration was pending for the id.
    pub fn handle_subscription_reply(&self, reply: SubscriptionReply) -> bool {
        let requested_id = reply.subscription_id.clone();

        if let Some(error) = reply.error {
            let Some((_, mut entry)) = self
                .subscriptions
                .remove_if(&requested_id, |_, e| e.state == SubscriptionState::Registering)
            else {
                tracing::debug!(subscription_id = %requested_id, "subscription reply without pending registration");
                return false;
            };
            entry.transition(&requested_id, SubscriptionState::Failed);
            let failure = SubscriptionError::Rejected {
                subscription_id: requested_id,
                error,
            };
            entry.sink.on_error(&failure);
            entry.complete_ack(Err(failure));
            return true;
        }

        let effective_id = reply
            .assigned_subscription_id
            .unwrap_or_else(|| requested_id.clone());
        let now = self.clock.now();

        let (sink, ack) = if effective_id == requested_id {
            let Some(mut entry) = self.subscriptions.get_mut(&requested_id) else {
                tracing::debug!(subscription_id = %requested_id, "subscription reply for unknown id");
                return false;
            };
            if entry.state != SubscriptionState::Registering {
                tracing::debug!(subscription_id = %requested_id, "duplicate subscription reply");
                return false;
            }
            entry.transition(&requested_id, SubscriptionState::Active);
            entry.last_touch_ms = now;
            (Arc::clone(&entry.sink), entry.ack.take())
        } else {
            let Some((_, mut entry)) = self
                .subscriptions
                .remove_if(&requested_id, |_, e| e.state == SubscriptionState::Registering)
            else {
                tracing::debug!(subscription_id = %requested_id, "subscription reply without pending registration");
                return false;
            };
            entry.transition(&effective_id, SubscriptionState::Active);
            entry.last_touch_ms = now;
            let handoff = (Arc::clone(&entry.sink), entry.ack.take());
            self.subscriptions.insert(effective_id.clone(), entry);
            handoff
        };

        sink.on_subscribed(&effective_id);
        if let Some(tx) = ack {
            let _ = tx.send(Ok(effective_id));
        }
        true
    }

    /// Delivers a publication to its listener and re-arms the expiry.
    ///
    /// Publications carrying an error go to [`Self::handle_publication_error`].
    /// Returns `false` if the publication was dropped.
    pub fn handle_publication(&self, publication: SubscriptionPublication) -> bool {
        let subscription_id = publication.subscription_id;
        if let Some(error) = publication.error {
            return self.handle_publication_error(&subscription_id, error);
        }

        let now = self.clock.now();
        let sink = {
            let Some(mut entry) = self.subscriptions.get_mut(&subscription_id) else {
                tracing::debug!(%subscription_id, "dropping publication for unknown subscription");
                metrics::counter!("tether_publications_dropped_total").increment(1);
                return false;
            };
            if entry.is_lapsed(now) {
                None
            } else {
                entry.last_touch_ms = now;
                Some(Arc::clone(&entry.sink))
            }
        };

        let Some(sink) = sink else {
            // Deadline passed before the sweep got to it.
            self.expire(&subscription_id, now);
            metrics::counter!("tether_publications_dropped_total").increment(1);
            return false;
        };

        sink.deliver(&subscription_id, publication.response);
        metrics::counter!("tether_publications_delivered_total").increment(1);
        true
    }

    /// Reports a failed publication to the listener without touching the
    /// subscription or changing its state.
    pub fn handle_publication_error(&self, subscription_id: &str, error: ReplyError) -> bool {
        let Some(sink) = self.listener(subscription_id) else {
            tracing::debug!(%subscription_id, "dropping publication error for unknown subscription");
            return false;
        };
        sink.on_error(&SubscriptionError::Publication {
            subscription_id: subscription_id.to_string(),
            error,
        });
        true
    }

    /// Removes local state and sends a best-effort stop to the provider.
    ///
    /// Returns `true` if local state existed.
    pub async fn unregister_subscription(
        &self,
        from: &str,
        to: &[String],
        subscription_id: &str,
        messaging_qos: &MessagingQos,
    ) -> bool {
        let existed = match self.subscriptions.remove(subscription_id) {
            Some((_, mut entry)) => {
                entry.transition(subscription_id, SubscriptionState::Unsubscribed);
                entry.complete_ack(Err(SubscriptionError::Unsubscribed {
                    subscription_id: subscription_id.to_string(),
                }));
                true
            }
            None => false,
        };

        let stop = Message::SubscriptionStop {
            payload: SubscriptionStop {
                subscription_id: subscription_id.to_string(),
            },
        };
        if let Err(e) = self.sender.send(from, to, stop, messaging_qos).await {
            tracing::warn!(%subscription_id, error = %e, "subscription stop not sent");
        }
        existed
    }

    /// Marks activity on a subscription, pushing its keep-alive deadline out.
    pub fn touch(&self, subscription_id: &str) -> bool {
        let now = self.clock.now();
        match self.subscriptions.get_mut(subscription_id) {
            Some(mut entry) => {
                entry.last_touch_ms = now;
                true
            }
            None => false,
        }
    }

    /// Expires every subscription whose deadline is at or before `now`.
    ///
    /// Nothing is sent to the provider. Returns the number expired.
    pub fn sweep(&self, now: u64) -> usize {
        let lapsed: Vec<String> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.value().is_lapsed(now))
            .map(|entry| entry.key().clone())
            .collect();
        lapsed
            .iter()
            .filter(|subscription_id| self.expire(subscription_id, now))
            .count()
    }

    fn expire(&self, subscription_id: &str, now: u64) -> bool {
        let Some((_, mut entry)) = self
            .subscriptions
            .remove_if(subscription_id, |_, e| e.is_lapsed(now))
        else {
            return false;
        };
        entry.transition(subscription_id, SubscriptionState::Expired);
        let error = SubscriptionError::Expired {
            subscription_id: subscription_id.to_string(),
        };
        entry.sink.on_error(&error);
        entry.complete_ack(Err(error));
        metrics::counter!("tether_subscriptions_expired_total").increment(1);
        true
    }

    /// Removes a subscription without notifying its listener.
    ///
    /// For callers that report the failure themselves.
    pub(crate) fn discard(&self, subscription_id: &str) -> bool {
        self.subscriptions.remove(subscription_id).is_some()
    }

    /// Drops every subscription, reporting [`SubscriptionError::Stopped`].
    pub fn fail_all(&self) -> usize {
        let ids: Vec<String> = self.subscriptions.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for subscription_id in ids {
            if let Some((_, mut entry)) = self.subscriptions.remove(&subscription_id) {
                entry.sink.on_error(&SubscriptionError::Stopped);
                entry.complete_ack(Err(SubscriptionError::Stopped));
                failed += 1;
            }
        }
        failed
    }

    // -- lookups ------------------------------------------------------------

    #[must_use]
    pub fn state(&self, subscription_id: &str) -> Option<SubscriptionState> {
        self.subscriptions.get(subscription_id).map(|e| e.state)
    }

    /// Type name publications for this subscription decode into.
    #[must_use]
    pub fn value_type(&self, subscription_id: &str) -> Option<&'static str> {
        self.subscriptions
            .get(subscription_id)
            .map(|e| e.sink.value_type())
    }

    #[must_use]
    pub fn is_broadcast(&self, subscription_id: &str) -> Option<bool> {
        self.subscriptions.get(subscription_id).map(|e| e.is_broadcast)
    }

    #[must_use]
    pub fn listener(&self, subscription_id: &str) -> Option<Arc<dyn PublicationSink>> {
        self.subscriptions
            .get(subscription_id)
            .map(|e| Arc::clone(&e.sink))
    }

    /// Current deadline in ms since epoch, `None` if it never lapses.
    #[must_use]
    pub fn deadline_ms(&self, subscription_id: &str) -> Option<u64> {
        self.subscriptions
            .get(subscription_id)
            .and_then(|e| e.deadline_ms())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
