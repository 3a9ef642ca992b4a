//! Reply handlers: the per-call objects that receive a reply or failure.
//!
//! A handler delivers at most once. Whichever of reply, timeout, or shutdown
//! reaches it first wins; later deliveries are ignored.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tether_core::{decode_response, ProviderRuntimeError, Reply, ReplyError, RuntimeErrorKind};
use tokio::sync::oneshot;

use crate::error::CallError;

// ---------------------------------------------------------------------------
// ReplyHandler trait
// ---------------------------------------------------------------------------

/// Receives the outcome of one outstanding request.
pub trait ReplyHandler: Send + Sync {
    fn correlation_id(&self) -> &str;

    /// Called when the reply arrives.
    fn on_reply(&self, reply: Reply);

    /// Called on timeout or shutdown.
    fn on_error(&self, error: CallError);
}

/// Converts a reply into the caller's typed result.
///
/// Application errors whose type is not in `declared_errors` are reported as
/// runtime errors.
///
/// # Errors
///
/// Returns the reply's error, or [`CallError::Decode`] if the response values
/// do not fit `T`.
pub fn decode_reply<T: DeserializeOwned>(reply: Reply, declared_errors: &[String]) -> Result<T, CallError> {
    match reply.error {
        None => decode_response(reply.response).map_err(CallError::Decode),
        Some(ReplyError::Application(e)) if declared_errors.iter().any(|d| *d == e.error_type) => {
            Err(CallError::Application(e))
        }
        Some(ReplyError::Application(e)) => Err(CallError::Runtime(ProviderRuntimeError::new(
            RuntimeErrorKind::ProviderRuntime,
            format!("undeclared application error {e}"),
        ))),
        Some(ReplyError::Runtime(e)) => Err(CallError::Runtime(e)),
    }
}

// ---------------------------------------------------------------------------
// BlockingReplyHandler
// ---------------------------------------------------------------------------

/// Single-slot handoff for a caller awaiting the raw reply.
///
/// The first delivery fills the slot; the waiting side decodes on its own task.
pub struct BlockingReplyHandler {
    correlation_id: String,
    slot: Mutex<Option<oneshot::Sender<Result<Reply, CallError>>>>,
}

impl BlockingReplyHandler {
    /// Creates the handler and the receiver the caller waits on.
    #[must_use]
    pub fn new(
        correlation_id: impl Into<String>,
    ) -> (Arc<Self>, oneshot::Receiver<Result<Reply, CallError>>) {
        let (tx, rx) = oneshot::channel();
        let handler = Arc::new(Self {
            correlation_id: correlation_id.into(),
            slot: Mutex::new(Some(tx)),
        });
        (handler, rx)
    }

    fn deliver(&self, outcome: Result<Reply, CallError>) {
        let Some(tx) = self.slot.lock().take() else {
            tracing::debug!(correlation_id = %self.correlation_id, "reply slot already filled");
            return;
        };
        // The caller may have given up already.
        let _ = tx.send(outcome);
    }
}

impl ReplyHandler for BlockingReplyHandler {
    fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    fn on_reply(&self, reply: Reply) {
        self.deliver(Ok(reply));
    }

    fn on_error(&self, error: CallError) {
        self.deliver(Err(error));
    }
}

// ---------------------------------------------------------------------------
// CallbackReplyHandler
// ---------------------------------------------------------------------------

/// Callback invoked when an asynchronous call completes.
///
/// Runs on whichever task delivers the outcome and must not block.
pub trait ReplyCallback<T>: Send + Sync + 'static {
    fn on_success(&self, value: &T);
    fn on_failure(&self, error: &CallError);
}

/// Decodes the reply, invokes an optional callback, then completes a [`CallFuture`].
pub struct CallbackReplyHandler<T> {
    correlation_id: String,
    declared_errors: Vec<String>,
    callback: Option<Arc<dyn ReplyCallback<T>>>,
    slot: Mutex<Option<oneshot::Sender<Result<T, CallError>>>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned + Send + 'static> CallbackReplyHandler<T> {
    #[must_use]
    pub fn new(
        correlation_id: impl Into<String>,
        declared_errors: Vec<String>,
        callback: Option<Arc<dyn ReplyCallback<T>>>,
    ) -> (Arc<Self>, CallFuture<T>) {
        let correlation_id = correlation_id.into();
        let (tx, rx) = oneshot::channel();
        let handler = Arc::new(Self {
            correlation_id: correlation_id.clone(),
            declared_errors,
            callback,
            slot: Mutex::new(Some(tx)),
            _marker: PhantomData,
        });
        (handler, CallFuture { correlation_id, rx })
    }

    fn complete(&self, outcome: Result<T, CallError>) {
        let Some(tx) = self.slot.lock().take() else {
            tracing::debug!(correlation_id = %self.correlation_id, "call already completed");
            return;
        };
        if let Some(callback) = &self.callback {
            match &outcome {
                Ok(value) => callback.on_success(value),
                Err(error) => callback.on_failure(error),
            }
        }
        let _ = tx.send(outcome);
    }
}

impl<T: DeserializeOwned + Send + 'static> ReplyHandler for CallbackReplyHandler<T> {
    fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    fn on_reply(&self, reply: Reply) {
        self.complete(decode_reply(reply, &self.declared_errors));
    }

    fn on_error(&self, error: CallError) {
        self.complete(Err(error));
    }
}

// ---------------------------------------------------------------------------
// CallFuture
// ---------------------------------------------------------------------------

/// Resolves with the outcome of an asynchronous call.
///
/// Resolves to [`CallError::Stopped`] if the handler is dropped undelivered.
pub struct CallFuture<T> {
    correlation_id: String,
    rx: oneshot::Receiver<Result<T, CallError>>,
}

impl<T> CallFuture<T> {
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

impl<T> Future for CallFuture<T> {
    type Output = Result<T, CallError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_closed)) => Poll::Ready(Err(CallError::Stopped)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use rmpv::Value;
    use tether_core::ApplicationError;

    use super::*;

    #[derive(Default)]
    struct CountingCallback {
        successes: AtomicU32,
        failures: AtomicU32,
        last_value: Mutex<Option<i32>>,
    }

    impl ReplyCallback<i32> for CountingCallback {
        fn on_success(&self, value: &i32) {
            self.successes.fetch_add(1, Ordering::SeqCst);
            *self.last_value.lock() = Some(*value);
        }

        fn on_failure(&self, _error: &CallError) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn declared() -> Vec<String> {
        vec!["CalculatorError".to_string()]
    }

    #[test]
    fn decode_reply_success_and_errors() {
        let ok: i32 = decode_reply(Reply::success("c", vec![Value::from(5)]), &declared()).unwrap();
        assert_eq!(ok, 5);

        let declared_err = Reply::failure("c", ApplicationError::new("CalculatorError", "OVERFLOW"));
        assert!(matches!(
            decode_reply::<i32>(declared_err, &declared()),
            Err(CallError::Application(e)) if e.name == "OVERFLOW"
        ));

        let undeclared = Reply::failure("c", ApplicationError::new("OtherError", "X"));
        assert!(matches!(
            decode_reply::<i32>(undeclared, &declared()),
            Err(CallError::Runtime(e)) if e.kind == RuntimeErrorKind::ProviderRuntime
        ));

        let bad_shape = Reply::success("c", vec![Value::from("five")]);
        assert!(matches!(decode_reply::<i32>(bad_shape, &declared()), Err(CallError::Decode(_))));
    }

    #[tokio::test]
    async fn blocking_handler_delivers_once() {
        let (handler, rx) = BlockingReplyHandler::new("corr-1");
        assert_eq!(handler.correlation_id(), "corr-1");
        handler.on_reply(Reply::success("corr-1", vec![Value::from(1)]));
        handler.on_error(CallError::Timeout { ttl_ms: 1 });

        let reply = rx.await.unwrap().unwrap();
        assert_eq!(reply.response, vec![Value::from(1)]);
    }

    #[tokio::test]
    async fn blocking_handler_tolerates_departed_waiter() {
        let (handler, rx) = BlockingReplyHandler::new("corr-2");
        drop(rx);
        handler.on_reply(Reply::success("corr-2", vec![]));
    }

    #[tokio::test]
    async fn callback_handler_invokes_callback_then_future() {
        let callback = Arc::new(CountingCallback::default());
        let (handler, future) =
            CallbackReplyHandler::<i32>::new("corr-3", declared(), Some(callback.clone()));
        assert_eq!(future.correlation_id(), "corr-3");

        handler.on_reply(Reply::success("corr-3", vec![Value::from(42)]));
        // Second delivery is ignored.
        handler.on_error(CallError::Stopped);

        assert_eq!(future.await.unwrap(), 42);
        assert_eq!(callback.successes.load(Ordering::SeqCst), 1);
        assert_eq!(callback.failures.load(Ordering::SeqCst), 0);
        assert_eq!(*callback.last_value.lock(), Some(42));
    }

    #[tokio::test]
    async fn callback_handler_reports_failure() {
        let callback = Arc::new(CountingCallback::default());
        let (handler, future) =
            CallbackReplyHandler::<i32>::new("corr-4", declared(), Some(callback.clone()));
        handler.on_error(CallError::Timeout { ttl_ms: 10 });

        assert!(matches!(future.await, Err(CallError::Timeout { ttl_ms: 10 })));
        assert_eq!(callback.failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_handler_resolves_future_as_stopped() {
        let (handler, future) = CallbackReplyHandler::<i32>::new("corr-5", vec![], None);
        drop(handler);
        assert!(matches!(future.await, Err(CallError::Stopped)));
    }
}
