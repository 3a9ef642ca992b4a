//! Runtime configuration with defaults suitable for a single host.

use tether_core::MessagingQos;

/// Runtime-level configuration.
///
/// Controls default messaging QoS, the expiry sweep cadence, and the prefix
/// of generated participant ids.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Prefix for participant ids generated by the runtime.
    pub participant_id_prefix: String,
    /// QoS used by proxies that do not supply their own.
    pub default_messaging_qos: MessagingQos,
    /// Interval between expiry sweeps in milliseconds.
    pub sweep_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            participant_id_prefix: "tether-".to_string(),
            default_messaging_qos: MessagingQos::default(),
            sweep_interval_ms: 1_000,
        }
    }
}
