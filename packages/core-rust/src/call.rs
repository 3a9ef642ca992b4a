//! Outgoing call description built by generated proxies.

use rmpv::Value;
use serde::Serialize;

use crate::codec::{to_value, CodecError};
use crate::messages::{OneWayRequest, Request};

/// How a call expects its outcome to be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// The caller waits for the reply.
    Sync,
    /// The caller gets a future and optionally a callback.
    Async,
    /// Fire-and-forget, no reply expected.
    OneWay,
}

impl CallKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Async => "async",
            Self::OneWay => "one_way",
        }
    }
}

/// Generates a fresh globally unique correlation id.
#[must_use]
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A method invocation: name, ordered parameters with their datatype names,
/// the declared application error types, and a correlation id.
///
/// The correlation id is assigned at construction and does not change.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    kind: CallKind,
    method_name: String,
    params: Vec<Value>,
    param_datatypes: Vec<String>,
    declared_errors: Vec<String>,
    correlation_id: String,
}

impl Call {
    #[must_use]
    pub fn new(kind: CallKind, method_name: impl Into<String>) -> Self {
        Self {
            kind,
            method_name: method_name.into(),
            params: Vec::new(),
            param_datatypes: Vec::new(),
            declared_errors: Vec::new(),
            correlation_id: new_correlation_id(),
        }
    }

    #[must_use]
    pub fn sync(method_name: impl Into<String>) -> Self {
        Self::new(CallKind::Sync, method_name)
    }

    #[must_use]
    pub fn asynchronous(method_name: impl Into<String>) -> Self {
        Self::new(CallKind::Async, method_name)
    }

    #[must_use]
    pub fn one_way(method_name: impl Into<String>) -> Self {
        Self::new(CallKind::OneWay, method_name)
    }

    /// Appends a parameter.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the value cannot be represented.
    pub fn param<P: Serialize>(
        mut self,
        datatype: impl Into<String>,
        value: &P,
    ) -> Result<Self, CodecError> {
        self.params.push(to_value(value)?);
        self.param_datatypes.push(datatype.into());
        Ok(self)
    }

    /// Declares an application error type the method may return.
    #[must_use]
    pub fn declares(mut self, error_type: impl Into<String>) -> Self {
        self.declared_errors.push(error_type.into());
        self
    }

    #[must_use]
    pub fn kind(&self) -> CallKind {
        self.kind
    }

    #[must_use]
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    #[must_use]
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    #[must_use]
    pub fn declared_errors(&self) -> &[String] {
        &self.declared_errors
    }

    /// Splits the call into its wire request and its declared error types.
    #[must_use]
    pub fn into_request(self) -> (Request, Vec<String>) {
        let request = Request {
            request_reply_id: self.correlation_id,
            method_name: self.method_name,
            params: self.params,
            param_datatypes: self.param_datatypes,
        };
        (request, self.declared_errors)
    }

    #[must_use]
    pub fn into_one_way(self) -> OneWayRequest {
        OneWayRequest {
            method_name: self.method_name,
            params: self.params,
            param_datatypes: self.param_datatypes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_ids_are_unique() {
        let a = Call::sync("add");
        let b = Call::sync("add");
        assert_ne!(a.correlation_id(), b.correlation_id());
        assert_eq!(a.correlation_id().len(), 36);
    }

    #[test]
    fn builder_records_params_and_errors() {
        let call = Call::asynchronous("divide")
            .param("Double", &1.5)
            .unwrap()
            .param("Double", &0.5)
            .unwrap()
            .declares("CalculatorError");

        assert_eq!(call.kind(), CallKind::Async);
        assert_eq!(call.method_name(), "divide");
        assert_eq!(call.params().len(), 2);
        assert_eq!(call.declared_errors(), ["CalculatorError".to_string()]);

        let id = call.correlation_id().to_string();
        let (request, declared) = call.into_request();
        assert_eq!(request.request_reply_id, id);
        assert_eq!(request.param_datatypes, vec!["Double", "Double"]);
        assert_eq!(declared, vec!["CalculatorError"]);
    }

    #[test]
    fn one_way_request_has_no_correlation() {
        let req = Call::one_way("ping").param("String", &"x").unwrap().into_one_way();
        assert_eq!(req.method_name, "ping");
        assert_eq!(req.params, vec![Value::from("x")]);
    }

    #[test]
    fn call_kind_labels() {
        assert_eq!(CallKind::Sync.as_str(), "sync");
        assert_eq!(CallKind::Async.as_str(), "async");
        assert_eq!(CallKind::OneWay.as_str(), "one_way");
    }
}
