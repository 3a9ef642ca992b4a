//! Quality-of-service parameters for messages and subscriptions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default time-to-live for a request/reply exchange.
pub const DEFAULT_TTL_MS: u64 = 60_000;

/// Per-message delivery parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagingQos {
    /// Time-to-live in milliseconds; the message expiry is `now + ttl_ms`.
    pub ttl_ms: u64,
    /// Headers copied onto every envelope sent with this QoS.
    pub custom_headers: HashMap<String, String>,
}

impl MessagingQos {
    /// QoS with the given TTL and no custom headers.
    #[must_use]
    pub fn with_ttl(ttl_ms: u64) -> Self {
        Self {
            ttl_ms,
            custom_headers: HashMap::new(),
        }
    }

    /// Adds a custom header.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(key.into(), value.into());
        self
    }
}

impl Default for MessagingQos {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_TTL_MS)
    }
}

// ---------------------------------------------------------------------------
// SubscriptionQos
// ---------------------------------------------------------------------------

/// Thirty days, the upper bound for every subscription interval.
const THIRTY_DAYS_MS: u64 = 30 * 24 * 60 * 60 * 1000;

pub const MIN_PUBLICATION_TTL_MS: u64 = 100;
pub const MAX_PUBLICATION_TTL_MS: u64 = THIRTY_DAYS_MS;
pub const DEFAULT_PUBLICATION_TTL_MS: u64 = 10_000;

pub const MIN_MIN_INTERVAL_MS: u64 = 0;
pub const MAX_MIN_INTERVAL_MS: u64 = THIRTY_DAYS_MS;
pub const DEFAULT_MIN_INTERVAL_MS: u64 = 1_000;

pub const MIN_MAX_INTERVAL_MS: u64 = 50;
pub const MAX_MAX_INTERVAL_MS: u64 = THIRTY_DAYS_MS;
pub const DEFAULT_MAX_INTERVAL_MS: u64 = 60_000;

pub const MAX_ALERT_AFTER_INTERVAL_MS: u64 = THIRTY_DAYS_MS;

/// Subscription parameters.
///
/// Values outside their permitted ranges are clamped (with a warning) when set
/// through the builder methods; the struct never holds an out-of-range value.
///
/// - `expiry_date_ms`: absolute end of the subscription, `None` for no end.
/// - `alert_after_interval_ms`: if set, the subscription expires when no
///   publication arrives for this long. Never shorter than `max_interval_ms`.
/// - `publication_ttl_ms`: TTL the provider uses for each publication.
/// - `min_interval_ms` / `max_interval_ms`: publication pacing hints for the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionQos {
    expiry_date_ms: Option<u64>,
    alert_after_interval_ms: Option<u64>,
    publication_ttl_ms: u64,
    min_interval_ms: u64,
    max_interval_ms: u64,
}

impl SubscriptionQos {
    /// Subscription with no expiry and no alert interval.
    #[must_use]
    pub fn new() -> Self {
        Self {
            expiry_date_ms: None,
            alert_after_interval_ms: None,
            publication_ttl_ms: DEFAULT_PUBLICATION_TTL_MS,
            min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
            max_interval_ms: DEFAULT_MAX_INTERVAL_MS,
        }
    }

    /// Sets the absolute expiry date (ms since epoch).
    #[must_use]
    pub fn expiry_date_ms(mut self, expiry_date_ms: u64) -> Self {
        self.expiry_date_ms = Some(expiry_date_ms);
        self
    }

    /// Sets the expiry date to `now + validity_ms`.
    #[must_use]
    pub fn valid_for_ms(self, now: u64, validity_ms: u64) -> Self {
        self.expiry_date_ms(now.saturating_add(validity_ms))
    }

    /// Sets the alert-after interval. Zero disables it.
    #[must_use]
    pub fn alert_after_interval_ms(mut self, interval_ms: u64) -> Self {
        self.alert_after_interval_ms = if interval_ms == 0 {
            None
        } else {
            Some(clamp("alertAfterInterval", interval_ms, self.max_interval_ms, MAX_ALERT_AFTER_INTERVAL_MS))
        };
        self
    }

    #[must_use]
    pub fn publication_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.publication_ttl_ms = clamp(
            "publicationTtl",
            ttl_ms,
            MIN_PUBLICATION_TTL_MS,
            MAX_PUBLICATION_TTL_MS,
        );
        self
    }

    /// Sets the min interval. Raises the max interval if it would now be shorter.
    #[must_use]
    pub fn min_interval_ms(mut self, interval_ms: u64) -> Self {
        self.min_interval_ms = clamp("minInterval", interval_ms, MIN_MIN_INTERVAL_MS, MAX_MIN_INTERVAL_MS);
        if self.max_interval_ms < self.min_interval_ms {
            self.max_interval_ms = self.min_interval_ms;
            self.raise_alert_to_max_interval();
        }
        self
    }

    /// Sets the max interval. Raises the alert interval if it would now be shorter.
    #[must_use]
    pub fn max_interval_ms(mut self, interval_ms: u64) -> Self {
        let lower = MIN_MAX_INTERVAL_MS.max(self.min_interval_ms);
        self.max_interval_ms = clamp("maxInterval", interval_ms, lower, MAX_MAX_INTERVAL_MS);
        self.raise_alert_to_max_interval();
        self
    }

    fn raise_alert_to_max_interval(&mut self) {
        if let Some(alert) = self.alert_after_interval_ms {
            if alert < self.max_interval_ms {
                self.alert_after_interval_ms = Some(self.max_interval_ms);
            }
        }
    }

    #[must_use]
    pub fn expiry(&self) -> Option<u64> {
        self.expiry_date_ms
    }

    #[must_use]
    pub fn alert_after_interval(&self) -> Option<u64> {
        self.alert_after_interval_ms
    }

    #[must_use]
    pub fn publication_ttl(&self) -> u64 {
        self.publication_ttl_ms
    }

    #[must_use]
    pub fn min_interval(&self) -> u64 {
        self.min_interval_ms
    }

    #[must_use]
    pub fn max_interval(&self) -> u64 {
        self.max_interval_ms
    }

    /// Earliest moment the subscription lapses given its last activity at
    /// `last_touch_ms`, or `None` if it never lapses.
    #[must_use]
    pub fn deadline_ms(&self, last_touch_ms: u64) -> Option<u64> {
        let keep_alive = self
            .alert_after_interval_ms
            .map(|interval| last_touch_ms.saturating_add(interval));
        match (self.expiry_date_ms, keep_alive) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

impl Default for SubscriptionQos {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp(field: &'static str, value: u64, min: u64, max: u64) -> u64 {
    let clamped = value.clamp(min, max);
    if clamped != value {
        tracing::warn!(field, value, clamped, "subscription qos value out of range, clamping");
    }
    clamped
}
