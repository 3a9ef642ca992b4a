//! Error payloads carried on the wire inside replies and publications.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::CodecError;

/// A failure the provider declared in its interface contract.
///
/// `error_type` names the declared error enumeration and `name` the literal
/// within it. Consumers turn it back into a typed enum with [`ApplicationError::decode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationError {
    pub error_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApplicationError {
    #[must_use]
    pub fn new(error_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            name: name.into(),
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Converts the literal name into the caller's error enum.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if `name` is not a unit variant of `E`.
    pub fn decode<E: DeserializeOwned>(&self) -> Result<E, CodecError> {
        serde_json::from_value(serde_json::Value::String(self.name.clone())).map_err(|e| {
            CodecError::Decode {
                target: std::any::type_name::<E>(),
                reason: e.to_string(),
            }
        })
    }
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.error_type, self.name)?;
        if let Some(message) = &self.message {
            write!(f, " ({message})")?;
        }
        Ok(())
    }
}

/// Category of a runtime failure on the provider side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum RuntimeErrorKind {
    /// The provider code failed in a way its interface does not declare.
    ProviderRuntime,
    /// The method or its signature is unknown to the provider.
    MethodInvocation,
    /// No provider is registered for the addressed participant.
    NoProvider,
    /// The provider did not finish before the request expired.
    Timeout,
    /// The provider refused a subscription request.
    SubscriptionRejected,
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ProviderRuntime => "provider runtime",
            Self::MethodInvocation => "method invocation",
            Self::NoProvider => "no provider",
            Self::Timeout => "timeout",
            Self::SubscriptionRejected => "subscription rejected",
        };
        f.write_str(s)
    }
}

/// A failure the provider's interface contract does not cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRuntimeError {
    pub kind: RuntimeErrorKind,
    pub message: String,
}

impl ProviderRuntimeError {
    #[must_use]
    pub fn new(kind: RuntimeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ProviderRuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Error attached to a reply, subscription reply, or publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "errorKind", rename_all = "camelCase")]
pub enum ReplyError {
    Application(ApplicationError),
    Runtime(ProviderRuntimeError),
}

impl fmt::Display for ReplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Application(e) => write!(f, "application error {e}"),
            Self::Runtime(e) => write!(f, "runtime error {e}"),
        }
    }
}

impl From<ApplicationError> for ReplyError {
    fn from(e: ApplicationError) -> Self {
        Self::Application(e)
    }
}

impl From<ProviderRuntimeError> for ReplyError {
    fn from(e: ProviderRuntimeError) -> Self {
        Self::Runtime(e)
    }
}
