//! Messaging runtime: owns the shared tables, the inbound router, and the
//! expiry sweeper, and hands out dispatchers bound to them.

use std::sync::Arc;

use anyhow::Context as _;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tether_core::{ClockSource, MessagingQos, SystemClock};

use crate::config::RuntimeConfig;
use crate::correlation::CorrelationRegistry;
use crate::directory::{CallerDirectory, RequestCallerDirectory};
use crate::dispatcher::{DispatchContext, InvocationDispatcher};
use crate::inbound::InboundRouter;
use crate::provider::{build_provider_pipeline, ProviderRouter};
use crate::subscription::SubscriptionManager;
use crate::traits::{MessageSender, PublicationHandler, RequestCaller};
use crate::worker::{BackgroundWorker, ExpirySweeper, SweepReport, SweepTask};

// ---------------------------------------------------------------------------
// LifecycleState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Running,
    Stopped,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct MessagingRuntimeBuilder {
    config: RuntimeConfig,
    sender: Arc<dyn MessageSender>,
    clock: Option<Arc<dyn ClockSource>>,
    publication_handler: Option<Arc<dyn PublicationHandler>>,
}

impl MessagingRuntimeBuilder {
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the wall clock used for expiry dates.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Installs the provider-side handler for inbound subscription requests.
    #[must_use]
    pub fn publication_handler(mut self, handler: Arc<dyn PublicationHandler>) -> Self {
        self.publication_handler = Some(handler);
        self
    }

    #[must_use]
    pub fn build(self) -> MessagingRuntime {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let registry = Arc::new(CorrelationRegistry::new());
        let subscriptions = Arc::new(SubscriptionManager::new(self.sender.clone(), clock.clone()));
        let providers: Arc<RequestCallerDirectory> = Arc::new(CallerDirectory::new("provider"));

        let pipeline = build_provider_pipeline(ProviderRouter::new(providers.clone()));
        let inbound = Arc::new(InboundRouter::new(
            registry.clone(),
            subscriptions.clone(),
            pipeline,
            self.publication_handler,
            self.sender.clone(),
            clock.clone(),
        ));

        MessagingRuntime {
            config: self.config,
            ctx: DispatchContext {
                registry,
                subscriptions,
                sender: self.sender,
                clock,
                lifecycle: Arc::new(ArcSwap::from_pointee(LifecycleState::Created)),
            },
            providers,
            inbound,
            sweeper: Mutex::new(None),
        }
    }
}

// ---------------------------------------------------------------------------
// MessagingRuntime
// ---------------------------------------------------------------------------

/// One participant host: issues calls, serves providers, tracks subscriptions.
///
/// Created stopped; [`start`](Self::start) spawns the expiry sweeper and
/// [`stop`](Self::stop) fails everything still outstanding.
pub struct MessagingRuntime {
    config: RuntimeConfig,
    ctx: DispatchContext,
    providers: Arc<RequestCallerDirectory>,
    inbound: Arc<InboundRouter>,
    sweeper: Mutex<Option<BackgroundWorker<ExpirySweeper>>>,
}

impl MessagingRuntime {
    /// Starts building a runtime that sends through `sender`.
    #[must_use]
    pub fn builder(sender: Arc<dyn MessageSender>) -> MessagingRuntimeBuilder {
        MessagingRuntimeBuilder {
            config: RuntimeConfig::default(),
            sender,
            clock: None,
            publication_handler: None,
        }
    }

    /// Spawns the expiry sweeper and opens the runtime for calls.
    ///
    /// # Errors
    ///
    /// Fails outside a tokio runtime, or if the runtime was already started
    /// or has been stopped.
    pub fn start(&self) -> anyhow::Result<()> {
        tokio::runtime::Handle::try_current().context("messaging runtime needs a tokio runtime")?;

        let mut slot = self.sweeper.lock();
        match self.state() {
            LifecycleState::Created => {}
            LifecycleState::Running => anyhow::bail!("messaging runtime already running"),
            LifecycleState::Stopped => anyhow::bail!("messaging runtime cannot be restarted"),
        }

        let sweeper = ExpirySweeper::new(
            self.ctx.registry.clone(),
            self.ctx.subscriptions.clone(),
            self.ctx.clock.clone(),
        );
        *slot = Some(BackgroundWorker::start(sweeper, self.config.sweep_interval_ms));
        self.ctx.lifecycle.store(Arc::new(LifecycleState::Running));
        tracing::info!(sweep_interval_ms = self.config.sweep_interval_ms, "messaging runtime started");
        Ok(())
    }

    /// Stops the sweeper and fails every pending call and registration.
    ///
    /// Idempotent.
    pub async fn stop(&self) {
        let worker = {
            let mut slot = self.sweeper.lock();
            if self.state() == LifecycleState::Stopped {
                return;
            }
            self.ctx.lifecycle.store(Arc::new(LifecycleState::Stopped));
            slot.take()
        };
        if let Some(mut worker) = worker {
            worker.stop().await;
        }

        let calls = self.ctx.registry.fail_all();
        let subscriptions = self.ctx.subscriptions.fail_all();
        tracing::info!(calls, subscriptions, "messaging runtime stopped");
    }

    /// Runs an expiry sweep now instead of waiting for the next tick.
    ///
    /// # Errors
    ///
    /// Fails if the runtime is not running.
    pub async fn sweep_now(&self) -> anyhow::Result<SweepReport> {
        let (done, report) = tokio::sync::oneshot::channel();
        {
            let slot = self.sweeper.lock();
            let worker = slot.as_ref().context("messaging runtime not running")?;
            worker.try_submit(SweepTask::SweepNow { done: Some(done) })?;
        }
        report.await.context("expiry sweeper stopped")
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.ctx.lifecycle.load()
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Generates a fresh participant id with the configured prefix.
    #[must_use]
    pub fn new_participant_id(&self) -> String {
        format!("{}{}", self.config.participant_id_prefix, uuid::Uuid::new_v4())
    }

    /// Returns a dispatcher issuing calls from `from` to `to`.
    ///
    /// Uses the configured default messaging QoS when `qos` is `None`.
    #[must_use]
    pub fn proxy(
        &self,
        from: impl Into<String>,
        to: Vec<String>,
        qos: Option<MessagingQos>,
    ) -> InvocationDispatcher {
        InvocationDispatcher::new(
            from.into(),
            to,
            qos.unwrap_or_else(|| self.config.default_messaging_qos.clone()),
            self.ctx.clone(),
        )
    }

    /// Serves `participant_id` with `caller`, replacing any previous provider.
    pub fn register_provider(
        &self,
        participant_id: impl Into<String>,
        caller: Arc<dyn RequestCaller>,
    ) -> Option<Arc<dyn RequestCaller>> {
        let participant_id = participant_id.into();
        tracing::debug!(%participant_id, "provider registered");
        self.providers.add(participant_id, caller)
    }

    pub fn unregister_provider(&self, participant_id: &str) -> Option<Arc<dyn RequestCaller>> {
        self.providers.take(participant_id)
    }

    #[must_use]
    pub fn has_provider(&self, participant_id: &str) -> bool {
        self.providers.contains(participant_id)
    }

    /// Router the transport feeds received envelopes into.
    #[must_use]
    pub fn inbound(&self) -> &Arc<InboundRouter> {
        &self.inbound
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.ctx.registry
    }

    #[must_use]
    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.ctx.subscriptions
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use rmpv::Value;
    use tether_core::{
        BroadcastSubscriptionRequest, Call, Envelope, ExpiryDate, ManualClock, Message, Reply,
        ReplyError, Request, SubscriptionPublication, SubscriptionQos, SubscriptionReply,
        SubscriptionRequest, SubscriptionStop,
    };

    use super::*;
    use crate::error::{CallError, SubscriptionError};
    use crate::inbound::{DropReason, InboundOutcome};
    use crate::subscription::{AttributeSubscription, SubscriptionState};
    use crate::test_support::{loopback, spawn_pump, LoopbackSender, RecordingListener, RecordingSender};

    struct Calculator;

    #[async_trait]
    impl RequestCaller for Calculator {
        async fn invoke(&self, request: Request) -> Result<Vec<Value>, ReplyError> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let sum: i64 = request.params.iter().filter_map(Value::as_i64).sum();
            Ok(vec![Value::from(sum)])
        }
    }

    #[derive(Default)]
    struct AcceptingHandler {
        requests: parking_lot::Mutex<HashMap<String, String>>,
        stops: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PublicationHandler for AcceptingHandler {
        async fn handle_subscription_request(
            &self,
            _subscriber: &str,
            _provider: &str,
            request: SubscriptionRequest,
        ) -> SubscriptionReply {
            self.requests
                .lock()
                .insert(request.subscription_id.clone(), request.subscribed_to_name);
            SubscriptionReply::accepted(request.subscription_id)
        }

        async fn handle_broadcast_subscription_request(
            &self,
            _subscriber: &str,
            _provider: &str,
            request: BroadcastSubscriptionRequest,
        ) -> SubscriptionReply {
            SubscriptionReply::accepted(request.subscription_id)
        }

        async fn handle_subscription_stop(&self, _subscriber: &str, stop: SubscriptionStop) {
            self.stops.lock().push(stop.subscription_id);
        }
    }

    struct Loopback {
        runtime: MessagingRuntime,
        sender: Arc<LoopbackSender>,
        handler: Arc<AcceptingHandler>,
        _pump: tokio::task::JoinHandle<()>,
    }

    fn loopback_runtime(clock: Arc<dyn ClockSource>) -> Loopback {
        let (sender, rx) = loopback(clock.clone());
        let handler = Arc::new(AcceptingHandler::default());
        let runtime = MessagingRuntime::builder(sender.clone())
            .config(RuntimeConfig {
                sweep_interval_ms: 10,
                ..RuntimeConfig::default()
            })
            .clock(clock)
            .publication_handler(handler.clone())
            .build();
        runtime.register_provider("calc", Arc::new(Calculator));
        runtime.start().unwrap();
        let pump = spawn_pump(rx, runtime.inbound().clone());
        Loopback {
            runtime,
            sender,
            handler,
            _pump: pump,
        }
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn publish(sender: &LoopbackSender, subscription_id: &str, value: i64) {
        sender
            .send(
                "calc",
                &["client".to_string()],
                Message::Publication {
                    payload: SubscriptionPublication::value(subscription_id, vec![Value::from(value)]),
                },
                &MessagingQos::with_ttl(1_000),
            )
            .await
            .unwrap();
    }

    fn add(a: i64, b: i64) -> Call {
        Call::sync("add")
            .param("Integer", &a)
            .unwrap()
            .param("Integer", &b)
            .unwrap()
    }

    #[tokio::test]
    async fn sync_add_over_loopback() {
        let lb = loopback_runtime(Arc::new(SystemClock));
        let proxy = lb
            .runtime
            .proxy("client", vec!["calc".to_string()], Some(MessagingQos::with_ttl(5_000)));

        assert_eq!(proxy.call_sync::<i64>(add(2, 3)).await.unwrap(), 5);
        assert!(lb.runtime.registry().is_empty());
        lb.runtime.stop().await;
    }

    #[tokio::test]
    async fn call_to_unknown_participant_fails_with_runtime_error() {
        let lb = loopback_runtime(Arc::new(SystemClock));
        let proxy = lb.runtime.proxy("client", vec!["nobody".to_string()], None);

        match proxy.call_sync::<i64>(add(1, 1)).await.unwrap_err() {
            CallError::Runtime(e) => assert_eq!(e.kind, tether_core::RuntimeErrorKind::NoProvider),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_call_times_out_and_late_reply_is_dropped() {
        let sender = Arc::new(RecordingSender::default());
        let runtime = MessagingRuntime::builder(sender.clone()).build();
        runtime.start().unwrap();
        let proxy = runtime.proxy("client", vec!["calc".to_string()], Some(MessagingQos::with_ttl(5_000)));

        let started = tokio::time::Instant::now();
        let err = proxy.call_sync::<i64>(add(2, 3)).await.unwrap_err();
        let elapsed = started.elapsed();
        assert!(matches!(err, CallError::Timeout { ttl_ms: 5_000 }));
        assert!(elapsed >= Duration::from_millis(5_000));
        assert!(elapsed < Duration::from_millis(5_100));

        let Some(Message::Request { payload }) = sender.last().map(|s| s.message) else {
            panic!("request not sent");
        };
        let late = Envelope::new(
            "calc",
            "client",
            Message::Reply {
                payload: Reply::success(payload.request_reply_id, vec![Value::from(5)]),
            },
            ExpiryDate::NEVER,
        );
        assert_eq!(
            runtime.inbound().receive(late).await,
            InboundOutcome::Dropped(DropReason::Unmatched)
        );
        runtime.stop().await;
    }

    #[tokio::test]
    async fn interleaved_publications_reach_only_their_listener() {
        let lb = loopback_runtime(Arc::new(SystemClock));
        let proxy = lb.runtime.proxy("client", vec!["calc".to_string()], None);

        let first = RecordingListener::<i64>::new();
        let second = RecordingListener::<i64>::new();
        let first_id = proxy
            .subscribe_attribute::<i64, _>(
                AttributeSubscription::new("temperature", SubscriptionQos::new()),
                first.clone(),
            )
            .await
            .unwrap()
            .await
            .unwrap();
        let second_id = proxy
            .subscribe_attribute::<i64, _>(
                AttributeSubscription::new("humidity", SubscriptionQos::new()),
                second.clone(),
            )
            .await
            .unwrap()
            .await
            .unwrap();
        assert_eq!(lb.handler.requests.lock().len(), 2);
        assert_eq!(lb.runtime.subscriptions().state(&first_id), Some(SubscriptionState::Active));

        for value in 0..6 {
            let target = if value % 2 == 0 { &first_id } else { &second_id };
            publish(&lb.sender, target, value).await;
        }
        eventually(|| first.received.lock().len() == 3 && second.received.lock().len() == 3).await;

        let mut got_first = first.received();
        let mut got_second = second.received();
        got_first.sort_unstable();
        got_second.sort_unstable();
        assert_eq!(got_first, vec![0, 2, 4]);
        assert_eq!(got_second, vec![1, 3, 5]);
        assert!(first.errors().is_empty());
        assert!(second.errors().is_empty());
    }

    #[tokio::test]
    async fn publication_extends_deadline_and_silence_expires() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let lb = loopback_runtime(clock.clone());
        let proxy = lb.runtime.proxy("client", vec!["calc".to_string()], None);

        let listener = RecordingListener::<i64>::new();
        let qos = SubscriptionQos::new()
            .max_interval_ms(1_000)
            .alert_after_interval_ms(2_000);
        let id = proxy
            .subscribe_attribute::<i64, _>(AttributeSubscription::new("temperature", qos), listener.clone())
            .await
            .unwrap()
            .await
            .unwrap();

        clock.advance(1_500);
        publish(&lb.sender, &id, 42).await;
        eventually(|| listener.received() == vec![42]).await;

        clock.advance(1_500);
        lb.runtime.sweep_now().await.unwrap();
        assert_eq!(lb.runtime.subscriptions().state(&id), Some(SubscriptionState::Active));

        clock.advance(600);
        eventually(|| !listener.errors().is_empty()).await;
        assert_eq!(
            listener.errors(),
            vec![SubscriptionError::Expired {
                subscription_id: id.clone()
            }]
        );
        assert_eq!(lb.runtime.subscriptions().state(&id), None);

        let late = Envelope::new(
            "calc",
            "client",
            Message::Publication {
                payload: SubscriptionPublication::value(id.as_str(), vec![Value::from(7)]),
            },
            ExpiryDate::NEVER,
        );
        assert_eq!(
            lb.runtime.inbound().receive(late).await,
            InboundOutcome::Dropped(DropReason::Unmatched)
        );
        assert_eq!(listener.received(), vec![42]);
    }

    #[tokio::test]
    async fn no_callbacks_after_unsubscribe() {
        let lb = loopback_runtime(Arc::new(SystemClock));
        let proxy = lb.runtime.proxy("client", vec!["calc".to_string()], None);

        let listener = RecordingListener::<i64>::new();
        let id = proxy
            .subscribe_attribute::<i64, _>(
                AttributeSubscription::new("temperature", SubscriptionQos::new()),
                listener.clone(),
            )
            .await
            .unwrap()
            .await
            .unwrap();
        assert_eq!(*listener.subscribed.lock(), vec![id.clone()]);

        publish(&lb.sender, &id, 42).await;
        eventually(|| listener.received() == vec![42]).await;

        assert!(proxy.unsubscribe(&id).await.unwrap());
        eventually(|| lb.handler.stops.lock().contains(&id)).await;

        let late = Envelope::new(
            "calc",
            "client",
            Message::Publication {
                payload: SubscriptionPublication::value(id.as_str(), vec![Value::from(43)]),
            },
            ExpiryDate::NEVER,
        );
        assert_eq!(
            lb.runtime.inbound().receive(late).await,
            InboundOutcome::Dropped(DropReason::Unmatched)
        );
        assert_eq!(listener.received(), vec![42]);
        assert!(listener.errors().is_empty());
    }

    #[tokio::test]
    async fn stop_fails_pending_calls_and_refuses_new_ones() {
        let sender = Arc::new(RecordingSender::default());
        let runtime = MessagingRuntime::builder(sender).build();

        let proxy = runtime.proxy("client", vec!["calc".to_string()], None);
        assert!(matches!(
            proxy.call_async::<i64>(Call::asynchronous("add")).await,
            Err(CallError::NotStarted)
        ));

        runtime.start().unwrap();
        assert!(runtime.start().is_err());
        let pending = proxy.call_async::<i64>(Call::asynchronous("add")).await.unwrap();
        let registration = proxy
            .subscribe_attribute::<i64, _>(
                AttributeSubscription::new("temperature", SubscriptionQos::new()),
                RecordingListener::<i64>::new(),
            )
            .await
            .unwrap();

        runtime.stop().await;
        assert_eq!(runtime.state(), LifecycleState::Stopped);
        assert!(matches!(pending.await, Err(CallError::Stopped)));
        assert_eq!(registration.await, Err(SubscriptionError::Stopped));
        assert!(runtime.registry().is_empty());
        assert!(runtime.subscriptions().is_empty());

        assert!(matches!(
            proxy.call_one_way(Call::one_way("ping")).await,
            Err(CallError::Stopped)
        ));
        assert!(runtime.start().is_err());
        assert!(runtime.sweep_now().await.is_err());
        runtime.stop().await;
    }

    #[test]
    fn participant_ids_carry_prefix() {
        let runtime = MessagingRuntime::builder(Arc::new(RecordingSender::default())).build();
        let a = runtime.new_participant_id();
        let b = runtime.new_participant_id();
        assert!(a.starts_with("tether-"));
        assert_ne!(a, b);
        assert_eq!(runtime.state(), LifecycleState::Created);
    }

    #[test]
    fn start_outside_tokio_fails() {
        let runtime = MessagingRuntime::builder(Arc::new(RecordingSender::default())).build();
        assert!(runtime.start().is_err());
        assert_eq!(runtime.state(), LifecycleState::Created);
    }

    #[test]
    fn providers_can_be_replaced_and_removed() {
        let runtime = MessagingRuntime::builder(Arc::new(RecordingSender::default())).build();
        assert!(runtime.register_provider("calc", Arc::new(Calculator)).is_none());
        assert!(runtime.register_provider("calc", Arc::new(Calculator)).is_some());
        assert!(runtime.has_provider("calc"));
        assert!(runtime.unregister_provider("calc").is_some());
        assert!(!runtime.has_provider("calc"));
    }
}
