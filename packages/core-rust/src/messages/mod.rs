//! Wire message schemas.
//!
//! All types use named `MsgPack` serialization (`rmp_serde::to_vec_named()`)
//! with camelCase field names. [`Message`] is internally tagged by `type`
//! and wraps each payload under a `payload` key.

pub mod rpc;
pub mod subscription;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::clock::ExpiryDate;

pub use rpc::{OneWayRequest, Reply, Request};
pub use subscription::{
    BroadcastSubscriptionRequest, SubscriptionPublication, SubscriptionReply,
    SubscriptionRequest, SubscriptionStop,
};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Every message kind exchanged between participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Request { payload: Request },
    OneWayRequest { payload: OneWayRequest },
    Reply { payload: Reply },
    SubscriptionRequest { payload: SubscriptionRequest },
    BroadcastSubscriptionRequest { payload: BroadcastSubscriptionRequest },
    SubscriptionReply { payload: SubscriptionReply },
    SubscriptionStop { payload: SubscriptionStop },
    Publication { payload: SubscriptionPublication },
}

impl Message {
    /// The wire tag, used as a log and metric label.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "REQUEST",
            Self::OneWayRequest { .. } => "ONE_WAY_REQUEST",
            Self::Reply { .. } => "REPLY",
            Self::SubscriptionRequest { .. } => "SUBSCRIPTION_REQUEST",
            Self::BroadcastSubscriptionRequest { .. } => "BROADCAST_SUBSCRIPTION_REQUEST",
            Self::SubscriptionReply { .. } => "SUBSCRIPTION_REPLY",
            Self::SubscriptionStop { .. } => "SUBSCRIPTION_STOP",
            Self::Publication { .. } => "PUBLICATION",
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Routing header around a [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub message_id: String,
    pub from: String,
    pub to: String,
    pub expiry_date: ExpiryDate,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom_headers: HashMap<String, String>,
    pub payload: Message,
}

impl Envelope {
    /// Wraps `payload` with a fresh message id.
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        payload: Message,
        expiry_date: ExpiryDate,
    ) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            expiry_date,
            custom_headers: HashMap::new(),
            payload,
        }
    }

    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: &HashMap<String, String>) -> Self {
        self.custom_headers
            .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expiry_date.is_expired(now)
    }
}
