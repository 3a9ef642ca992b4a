//! Tower middleware layers for the provider pipeline.
//!
//! - [`metrics`]: call timing and outcome
//! - [`expiry`]: bounds each call by its message's remaining lifetime
//! - [`pipeline`]: composes the layers around the router

pub mod expiry;
pub mod metrics;
pub mod pipeline;

pub use expiry::ExpiryLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_provider_pipeline, ProviderPipeline};
