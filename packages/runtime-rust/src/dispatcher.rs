//! Invocation dispatcher: the entry point generated proxies call.
//!
//! Each proxy method builds a [`Call`] with an explicit kind and hands it to
//! one of the `call_*` methods (or [`InvocationDispatcher::invoke`]). The
//! dispatcher validates the participant set, registers correlation state
//! before sending, and drives the completion path for the kind.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use tether_core::{Call, CallKind, ClockSource, ExpiryDate, Message, MessagingQos};

use crate::correlation::{
    decode_reply, BlockingReplyHandler, CallFuture, CallbackReplyHandler, CorrelationRegistry,
    ReplyCallback, ReplyHandler,
};
use crate::error::CallError;
use crate::runtime::LifecycleState;
use crate::subscription::{
    AttributeSubscription, BroadcastSubscription, SubscriptionFuture, SubscriptionListener,
    SubscriptionManager,
};
use crate::traits::MessageSender;

/// Shared state every dispatcher of one runtime works against.
#[derive(Clone)]
pub(crate) struct DispatchContext {
    pub registry: Arc<CorrelationRegistry>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub sender: Arc<dyn MessageSender>,
    pub clock: Arc<dyn ClockSource>,
    pub lifecycle: Arc<ArcSwap<LifecycleState>>,
}

/// Result of [`InvocationDispatcher::invoke`], shaped by the call kind.
pub enum InvocationResult<T> {
    /// A synchronous call's decoded result.
    Value(T),
    /// An asynchronous call's pending outcome.
    Pending(CallFuture<T>),
    /// A one-way call the transport accepted.
    Sent,
}

/// Issues calls from one participant to a fixed participant set.
#[derive(Clone)]
pub struct InvocationDispatcher {
    from: String,
    to: Vec<String>,
    qos: MessagingQos,
    ctx: DispatchContext,
}

impl InvocationDispatcher {
    pub(crate) fn new(from: String, to: Vec<String>, qos: MessagingQos, ctx: DispatchContext) -> Self {
        Self { from, to, qos, ctx }
    }

    #[must_use]
    pub fn participant_id(&self) -> &str {
        &self.from
    }

    #[must_use]
    pub fn participants(&self) -> &[String] {
        &self.to
    }

    #[must_use]
    pub fn qos(&self) -> &MessagingQos {
        &self.qos
    }

    /// Returns a copy of this dispatcher that sends with `qos`.
    #[must_use]
    pub fn with_qos(&self, qos: MessagingQos) -> Self {
        Self {
            qos,
            ..self.clone()
        }
    }

    // -- validation -----------------------------------------------------------

    fn ensure_running(&self) -> Result<(), CallError> {
        match **self.ctx.lifecycle.load() {
            LifecycleState::Running => Ok(()),
            LifecycleState::Created => Err(CallError::NotStarted),
            LifecycleState::Stopped => Err(CallError::Stopped),
        }
    }

    /// `stop()` publishes `Stopped` before draining the tables, so an entry
    /// added after the drain is caught by this check and removed by its owner.
    fn stopped(&self) -> bool {
        **self.ctx.lifecycle.load() == LifecycleState::Stopped
    }

    fn register_call(
        &self,
        correlation_id: &str,
        handler: Arc<dyn ReplyHandler>,
        expiry: ExpiryDate,
        ttl_ms: u64,
    ) -> Result<(), CallError> {
        self.ctx
            .registry
            .register(correlation_id, handler, expiry, ttl_ms)?;
        if self.stopped() && self.ctx.registry.discard(correlation_id) {
            return Err(CallError::Stopped);
        }
        Ok(())
    }

    fn single_participant(&self, kind: CallKind) -> Result<&String, CallError> {
        match self.to.as_slice() {
            [provider] => Ok(provider),
            others => Err(CallError::InvalidParticipantCount {
                kind: kind.as_str(),
                expected: "exactly one",
                actual: others.len(),
            }),
        }
    }

    fn some_participants(&self, kind: &'static str) -> Result<(), CallError> {
        if self.to.is_empty() {
            return Err(CallError::InvalidParticipantCount {
                kind,
                expected: "at least one",
                actual: 0,
            });
        }
        Ok(())
    }

    fn expect_kind(call: &Call, expected: CallKind) -> Result<(), CallError> {
        if call.kind() == expected {
            Ok(())
        } else {
            Err(CallError::WrongCallKind {
                expected,
                actual: call.kind(),
            })
        }
    }

    // -- calls ----------------------------------------------------------------

    /// Dispatches `call` according to its kind.
    ///
    /// # Errors
    ///
    /// See [`call_sync`](Self::call_sync), [`call_async`](Self::call_async),
    /// and [`call_one_way`](Self::call_one_way).
    pub async fn invoke<T>(&self, call: Call) -> Result<InvocationResult<T>, CallError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        match call.kind() {
            CallKind::Sync => self.call_sync(call).await.map(InvocationResult::Value),
            CallKind::Async => self.call_async(call).await.map(InvocationResult::Pending),
            CallKind::OneWay => self.call_one_way(call).await.map(|()| InvocationResult::Sent),
        }
    }

    /// Sends `call` and waits up to the messaging TTL for its reply.
    ///
    /// # Errors
    ///
    /// Fails before sending on a wrong participant count or call kind.
    /// Otherwise returns [`CallError::Send`], [`CallError::Timeout`], the
    /// provider's declared application error, a runtime error, or a decode
    /// error.
    pub async fn call_sync<T: DeserializeOwned>(&self, call: Call) -> Result<T, CallError> {
        self.ensure_running()?;
        Self::expect_kind(&call, CallKind::Sync)?;
        let provider = self.single_participant(CallKind::Sync)?.clone();

        let ttl_ms = self.qos.ttl_ms;
        let expiry = ExpiryDate::from_ttl(ttl_ms, self.ctx.clock.as_ref());
        let (request, declared_errors) = call.into_request();
        let correlation_id = request.request_reply_id.clone();

        let (handler, mut rx) = BlockingReplyHandler::new(correlation_id.as_str());
        self.register_call(&correlation_id, handler, expiry, ttl_ms)?;
        metrics::counter!("tether_calls_total", "kind" => CallKind::Sync.as_str()).increment(1);
        tracing::debug!(%correlation_id, %provider, method = %request.method_name, ttl_ms, "sync call");

        if let Err(e) = self
            .ctx
            .sender
            .send(&self.from, &[provider], Message::Request { payload: request }, &self.qos)
            .await
        {
            self.ctx.registry.discard(&correlation_id);
            return Err(CallError::Send(e));
        }

        let wait_ms = expiry.remaining_ms(self.ctx.clock.now());
        let outcome = match tokio::time::timeout(Duration::from_millis(wait_ms), &mut rx).await {
            Ok(received) => received,
            Err(_elapsed) => {
                if self.ctx.registry.discard(&correlation_id) {
                    tracing::debug!(%correlation_id, ttl_ms, "sync call timed out");
                    metrics::counter!("tether_reply_timeouts_total").increment(1);
                    return Err(CallError::Timeout { ttl_ms });
                }
                // A reply or the sweeper got there first and owns delivery.
                rx.await
            }
        };
        let reply = outcome.map_err(|_| CallError::Stopped)??;
        decode_reply(reply, &declared_errors)
    }

    /// Sends `call` and returns a future for its outcome.
    ///
    /// # Errors
    ///
    /// Fails before sending on a wrong participant count or call kind, and
    /// with [`CallError::Send`] if the transport refuses the request.
    pub async fn call_async<T>(&self, call: Call) -> Result<CallFuture<T>, CallError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.send_async(call, None).await
    }

    /// Like [`call_async`](Self::call_async), and also notifies `callback`
    /// when the call completes.
    ///
    /// # Errors
    ///
    /// Same as [`call_async`](Self::call_async); the callback is not invoked
    /// for failures returned here.
    pub async fn call_async_with_callback<T, C>(
        &self,
        call: Call,
        callback: C,
    ) -> Result<CallFuture<T>, CallError>
    where
        T: DeserializeOwned + Send + 'static,
        C: ReplyCallback<T>,
    {
        self.send_async(call, Some(Arc::new(callback))).await
    }

    async fn send_async<T>(
        &self,
        call: Call,
        callback: Option<Arc<dyn ReplyCallback<T>>>,
    ) -> Result<CallFuture<T>, CallError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.ensure_running()?;
        Self::expect_kind(&call, CallKind::Async)?;
        let provider = self.single_participant(CallKind::Async)?.clone();

        let ttl_ms = self.qos.ttl_ms;
        let expiry = ExpiryDate::from_ttl(ttl_ms, self.ctx.clock.as_ref());
        let (request, declared_errors) = call.into_request();
        let correlation_id = request.request_reply_id.clone();

        let (handler, future) =
            CallbackReplyHandler::<T>::new(correlation_id.as_str(), declared_errors, callback);
        self.register_call(&correlation_id, handler, expiry, ttl_ms)?;
        metrics::counter!("tether_calls_total", "kind" => CallKind::Async.as_str()).increment(1);
        tracing::debug!(%correlation_id, %provider, method = %request.method_name, ttl_ms, "async call");

        if let Err(e) = self
            .ctx
            .sender
            .send(&self.from, &[provider], Message::Request { payload: request }, &self.qos)
            .await
        {
            self.ctx.registry.discard(&correlation_id);
            return Err(CallError::Send(e));
        }
        Ok(future)
    }

    /// Sends `call` to every participant; no reply is expected.
    ///
    /// # Errors
    ///
    /// Fails before sending if there are no participants or the call is not
    /// one-way, and with [`CallError::Send`] if the transport refuses it.
    pub async fn call_one_way(&self, call: Call) -> Result<(), CallError> {
        self.ensure_running()?;
        Self::expect_kind(&call, CallKind::OneWay)?;
        self.some_participants(CallKind::OneWay.as_str())?;

        metrics::counter!("tether_calls_total", "kind" => CallKind::OneWay.as_str()).increment(1);
        tracing::debug!(method = %call.method_name(), participants = self.to.len(), "one-way call");
        self.ctx
            .sender
            .send(
                &self.from,
                &self.to,
                Message::OneWayRequest {
                    payload: call.into_one_way(),
                },
                &self.qos,
            )
            .await?;
        Ok(())
    }

    // -- subscriptions --------------------------------------------------------

    /// Subscribes `listener` to an attribute on the participant set.
    ///
    /// # Errors
    ///
    /// Fails before sending if there are no participants, and with
    /// [`CallError::Send`] if the request cannot be sent.
    pub async fn subscribe_attribute<T, L>(
        &self,
        subscription: AttributeSubscription,
        listener: L,
    ) -> Result<SubscriptionFuture, CallError>
    where
        T: DeserializeOwned + 'static,
        L: SubscriptionListener<T>,
    {
        self.ensure_running()?;
        self.some_participants("subscription")?;
        metrics::counter!("tether_calls_total", "kind" => "subscribe").increment(1);
        let future = self
            .ctx
            .subscriptions
            .register_attribute_subscription::<T, L>(&self.from, &self.to, subscription, listener, &self.qos)
            .await?;
        self.unless_stopped(future)
    }

    /// Subscribes `listener` to a broadcast on the participant set.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe_attribute`](Self::subscribe_attribute).
    pub async fn subscribe_broadcast<T, L>(
        &self,
        subscription: BroadcastSubscription,
        listener: L,
    ) -> Result<SubscriptionFuture, CallError>
    where
        T: DeserializeOwned + 'static,
        L: SubscriptionListener<T>,
    {
        self.ensure_running()?;
        self.some_participants("subscription")?;
        metrics::counter!("tether_calls_total", "kind" => "subscribe").increment(1);
        let future = self
            .ctx
            .subscriptions
            .register_broadcast_subscription::<T, L>(&self.from, &self.to, subscription, listener, &self.qos)
            .await?;
        self.unless_stopped(future)
    }

    fn unless_stopped(&self, future: SubscriptionFuture) -> Result<SubscriptionFuture, CallError> {
        if self.stopped() && self.ctx.subscriptions.discard(future.subscription_id()) {
            return Err(CallError::Stopped);
        }
        Ok(future)
    }

    /// Drops local state for `subscription_id` and tells the providers.
    ///
    /// Returns whether local state existed.
    ///
    /// # Errors
    ///
    /// Fails if there are no participants to notify.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<bool, CallError> {
        self.some_participants("unsubscribe")?;
        metrics::counter!("tether_calls_total", "kind" => "unsubscribe").increment(1);
        Ok(self
            .ctx
            .subscriptions
            .unregister_subscription(&self.from, &self.to, subscription_id, &self.qos)
            .await)
    }
}
