//! Test doubles shared by unit tests across the crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tether_core::codec::{decode, encode};
use tether_core::{ClockSource, Envelope, ExpiryDate, Message, MessagingQos};
use tokio::sync::mpsc;

use crate::error::{SendError, SubscriptionError};
use crate::inbound::InboundRouter;
use crate::subscription::SubscriptionListener;
use crate::traits::MessageSender;

// ---------------------------------------------------------------------------
// RecordingSender
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) struct SentMessage {
    pub from: String,
    pub to: Vec<String>,
    pub message: Message,
    pub ttl_ms: u64,
}

/// Accepts and records every message, or rejects all of them when failing.
#[derive(Default)]
pub(crate) struct RecordingSender {
    sent: Mutex<Vec<SentMessage>>,
    failing: AtomicBool,
}

impl RecordingSender {
    pub fn failing() -> Self {
        let sender = Self::default();
        sender.set_failing(true);
        sender
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn last(&self) -> Option<SentMessage> {
        self.sent.lock().last().cloned()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(
        &self,
        from: &str,
        to: &[String],
        message: Message,
        qos: &MessagingQos,
    ) -> Result<(), SendError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SendError::Rejected {
                reason: "test transport down".to_string(),
            });
        }
        self.sent.lock().push(SentMessage {
            from: from.to_string(),
            to: to.to_vec(),
            message,
            ttl_ms: qos.ttl_ms,
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LoopbackSender
// ---------------------------------------------------------------------------

/// In-process transport: wraps each message in an envelope, pushes it through
/// the wire codec, and queues it for [`spawn_pump`].
pub(crate) struct LoopbackSender {
    tx: mpsc::UnboundedSender<Envelope>,
    clock: Arc<dyn ClockSource>,
}

pub(crate) fn loopback(
    clock: Arc<dyn ClockSource>,
) -> (Arc<LoopbackSender>, mpsc::UnboundedReceiver<Envelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(LoopbackSender { tx, clock }), rx)
}

#[async_trait]
impl MessageSender for LoopbackSender {
    async fn send(
        &self,
        from: &str,
        to: &[String],
        message: Message,
        qos: &MessagingQos,
    ) -> Result<(), SendError> {
        let expiry = ExpiryDate::from_ttl(qos.ttl_ms, self.clock.as_ref());
        for participant in to {
            let envelope = Envelope::new(from, participant.as_str(), message.clone(), expiry)
                .with_headers(&qos.custom_headers);
            let bytes = encode(&envelope).map_err(|e| SendError::Rejected {
                reason: e.to_string(),
            })?;
            let envelope = decode(&bytes).map_err(|e| SendError::Rejected {
                reason: e.to_string(),
            })?;
            self.tx.send(envelope).map_err(|_| SendError::Closed)?;
        }
        Ok(())
    }
}

/// Feeds queued envelopes into `router` until the sender side closes.
pub(crate) fn spawn_pump(
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    router: Arc<InboundRouter>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            router.dispatch(envelope);
        }
    })
}

// ---------------------------------------------------------------------------
// RecordingListener
// ---------------------------------------------------------------------------

pub(crate) struct RecordingListener<T> {
    pub subscribed: Mutex<Vec<String>>,
    pub received: Mutex<Vec<T>>,
    pub errors: Mutex<Vec<SubscriptionError>>,
}

impl<T> RecordingListener<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribed: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
        })
    }
}

impl<T: Clone> RecordingListener<T> {
    pub fn received(&self) -> Vec<T> {
        self.received.lock().clone()
    }

    pub fn errors(&self) -> Vec<SubscriptionError> {
        self.errors.lock().clone()
    }
}

impl<T: Send + 'static> SubscriptionListener<T> for Arc<RecordingListener<T>> {
    fn on_subscribed(&self, subscription_id: &str) {
        self.subscribed.lock().push(subscription_id.to_string());
    }

    fn on_receive(&self, value: T) {
        self.received.lock().push(value);
    }

    fn on_error(&self, error: &SubscriptionError) {
        self.errors.lock().push(error.clone());
    }
}
