//! Correlation registry: outstanding requests keyed by correlation id.
//!
//! Every entry is delivered at most once. Removal from the directory is the
//! single point of arbitration between a reply, the expiry sweep, a caller
//! giving up, and shutdown: whoever removes the entry delivers it.

pub mod handler;

use std::sync::Arc;

use tether_core::{ExpiryDate, Reply};

use crate::directory::CallerDirectory;
use crate::error::{CallError, RegistryError};

pub use handler::{
    decode_reply, BlockingReplyHandler, CallFuture, CallbackReplyHandler, ReplyCallback,
    ReplyHandler,
};

/// A registered handler with its expiry.
#[derive(Clone)]
pub struct PendingReply {
    handler: Arc<dyn ReplyHandler>,
    expiry: ExpiryDate,
    ttl_ms: u64,
}

impl PendingReply {
    #[must_use]
    pub fn expiry(&self) -> ExpiryDate {
        self.expiry
    }
}

/// Registry of outstanding requests.
pub struct CorrelationRegistry {
    pending: CallerDirectory<PendingReply>,
}

impl CorrelationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: CallerDirectory::new("reply"),
        }
    }

    /// Registers `handler` under `correlation_id` until `expiry`.
    ///
    /// `ttl_ms` is reported in the timeout error if the entry expires.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateCorrelationId`] if the id is taken.
    pub fn register(
        &self,
        correlation_id: &str,
        handler: Arc<dyn ReplyHandler>,
        expiry: ExpiryDate,
        ttl_ms: u64,
    ) -> Result<(), RegistryError> {
        let entry = PendingReply {
            handler,
            expiry,
            ttl_ms,
        };
        self.pending
            .try_add(correlation_id, entry)
            .map_err(|_| RegistryError::DuplicateCorrelationId(correlation_id.to_string()))
    }

    /// Delivers `reply` to the handler registered under its correlation id.
    ///
    /// Returns `false` if no such entry exists (late, duplicate, or unknown
    /// reply); the reply is dropped.
    pub fn resolve(&self, reply: Reply) -> bool {
        let Some(entry) = self.pending.take(&reply.request_reply_id) else {
            tracing::debug!(
                correlation_id = %reply.request_reply_id,
                "dropping reply without pending request"
            );
            metrics::counter!("tether_replies_dropped_total").increment(1);
            return false;
        };
        metrics::counter!("tether_replies_resolved_total").increment(1);
        entry.handler.on_reply(reply);
        true
    }

    /// Removes the entry without delivering anything.
    ///
    /// Returns `true` if this call removed it; the caller then owns the outcome.
    pub fn discard(&self, correlation_id: &str) -> bool {
        self.pending.take(correlation_id).is_some()
    }

    /// Removes the entry and delivers `error` to its handler.
    pub fn fail(&self, correlation_id: &str, error: CallError) -> bool {
        match self.pending.take(correlation_id) {
            Some(entry) => {
                entry.handler.on_error(error);
                true
            }
            None => false,
        }
    }

    /// Delivers a timeout to every entry whose expiry is at or before `now`.
    ///
    /// Returns the number of entries expired.
    pub fn sweep(&self, now: u64) -> usize {
        let expired = self.pending.remove_where(|entry| entry.expiry.is_expired(now));
        for (correlation_id, entry) in &expired {
            tracing::debug!(%correlation_id, ttl_ms = entry.ttl_ms, "request expired without reply");
            entry.handler.on_error(CallError::Timeout {
                ttl_ms: entry.ttl_ms,
            });
        }
        if !expired.is_empty() {
            metrics::counter!("tether_reply_timeouts_total").increment(expired.len() as u64);
        }
        expired.len()
    }

    /// Delivers [`CallError::Stopped`] to every outstanding entry.
    pub fn fail_all(&self) -> usize {
        let drained = self.pending.drain();
        for (_, entry) in &drained {
            entry.handler.on_error(CallError::Stopped);
        }
        drained.len()
    }

    #[must_use]
    pub fn contains(&self, correlation_id: &str) -> bool {
        self.pending.contains(correlation_id)
    }

    #[must_use]
    pub fn expiry_of(&self, correlation_id: &str) -> Option<ExpiryDate> {
        self.pending.lookup(correlation_id).map(|entry| entry.expiry())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
