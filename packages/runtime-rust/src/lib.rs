//! Tether runtime: request/reply correlation, subscription lifecycle, and
//! inbound routing on top of a pluggable message transport.

pub mod config;
pub mod correlation;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod inbound;
pub mod provider;
pub mod runtime;
pub mod subscription;
pub mod telemetry;
pub mod traits;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::RuntimeConfig;
pub use correlation::{CallFuture, CorrelationRegistry, ReplyCallback};
pub use dispatcher::{InvocationDispatcher, InvocationResult};
pub use error::{CallError, RegistryError, SendError, SubscriptionError};
pub use inbound::{InboundOutcome, InboundRouter};
pub use runtime::{LifecycleState, MessagingRuntime, MessagingRuntimeBuilder};
pub use subscription::{
    AttributeSubscription, BroadcastSubscription, SubscriptionFuture, SubscriptionListener,
    SubscriptionManager, SubscriptionState,
};
pub use traits::{MessageSender, PublicationHandler, RequestCaller};
