//! Request/reply payloads.

use rmpv::Value;
use serde::{Deserialize, Serialize};

use crate::error::ReplyError;

/// A method call expecting a reply correlated by `request_reply_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub request_reply_id: String,
    pub method_name: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default)]
    pub param_datatypes: Vec<String>,
}

/// A fire-and-forget method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneWayRequest {
    pub method_name: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default)]
    pub param_datatypes: Vec<String>,
}

impl From<OneWayRequest> for Request {
    /// Lifts a one-way request into a request with no correlation id.
    fn from(request: OneWayRequest) -> Self {
        Self {
            request_reply_id: String::new(),
            method_name: request.method_name,
            params: request.params,
            param_datatypes: request.param_datatypes,
        }
    }
}

/// Outcome of a [`Request`]: either response values or an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub request_reply_id: String,
    #[serde(default)]
    pub response: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl Reply {
    #[must_use]
    pub fn success(request_reply_id: impl Into<String>, response: Vec<Value>) -> Self {
        Self {
            request_reply_id: request_reply_id.into(),
            response,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(request_reply_id: impl Into<String>, error: impl Into<ReplyError>) -> Self {
        Self {
            request_reply_id: request_reply_id.into(),
            response: Vec::new(),
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
