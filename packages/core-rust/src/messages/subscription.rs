//! Subscription payloads: requests, acknowledgements, stops and publications.

use std::collections::BTreeMap;

use rmpv::Value;
use serde::{Deserialize, Serialize};

use crate::error::ReplyError;
use crate::qos::SubscriptionQos;

/// Subscribe to changes of a provider attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub subscription_id: String,
    pub subscribed_to_name: String,
    pub qos: SubscriptionQos,
}

/// Subscribe to a provider broadcast, optionally filtered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastSubscriptionRequest {
    pub subscription_id: String,
    pub subscribed_to_name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filter_parameters: BTreeMap<String, String>,
    pub qos: SubscriptionQos,
}

/// Provider acknowledgement of a subscription request.
///
/// On success the provider may assign a different id than the one requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionReply {
    pub subscription_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl SubscriptionReply {
    #[must_use]
    pub fn accepted(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            assigned_subscription_id: None,
            error: None,
        }
    }

    #[must_use]
    pub fn rejected(subscription_id: impl Into<String>, error: impl Into<ReplyError>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            assigned_subscription_id: None,
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn with_assigned_id(mut self, assigned: impl Into<String>) -> Self {
        self.assigned_subscription_id = Some(assigned.into());
        self
    }

    /// The id the subscription is known by after this reply.
    #[must_use]
    pub fn effective_id(&self) -> &str {
        self.assigned_subscription_id
            .as_deref()
            .unwrap_or(&self.subscription_id)
    }
}

/// Ends a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStop {
    pub subscription_id: String,
}

/// A value update (or error) pushed for an active subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPublication {
    pub subscription_id: String,
    #[serde(default)]
    pub response: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl SubscriptionPublication {
    #[must_use]
    pub fn value(subscription_id: impl Into<String>, response: Vec<Value>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            response,
            error: None,
        }
    }

    #[must_use]
    pub fn error(subscription_id: impl Into<String>, error: impl Into<ReplyError>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            response: Vec::new(),
            error: Some(error.into()),
        }
    }
}
