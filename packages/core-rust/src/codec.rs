//! `MsgPack` wire codec and response-value decoding.

use rmpv::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::messages::Envelope;

/// Encoding or decoding failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode {target}: {reason}")]
    Encode { target: &'static str, reason: String },
    #[error("failed to decode {target}: {reason}")]
    Decode { target: &'static str, reason: String },
}

/// Serializes an envelope to `MsgPack` with named fields.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    rmp_serde::to_vec_named(envelope).map_err(|e| CodecError::Encode {
        target: "Envelope",
        reason: e.to_string(),
    })
}

/// Deserializes an envelope from `MsgPack` bytes.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] on malformed input.
pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    rmp_serde::from_slice(bytes).map_err(|e| CodecError::Decode {
        target: "Envelope",
        reason: e.to_string(),
    })
}

/// Converts a typed value into a dynamic parameter or response value.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if `T` cannot be represented.
pub fn to_value<T: Serialize>(value: &T) -> Result<Value, CodecError> {
    rmpv::ext::to_value(value).map_err(|e| CodecError::Encode {
        target: std::any::type_name::<T>(),
        reason: e.to_string(),
    })
}

/// Decodes the response values of a reply or publication into `T`.
///
/// - no values decodes from nil, so `()` and `Option<_>` accept an empty response;
/// - one value decodes from that value;
/// - several values decode as a tuple.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the values do not fit `T`.
pub fn decode_response<T: DeserializeOwned>(mut values: Vec<Value>) -> Result<T, CodecError> {
    let value = match values.len() {
        0 => Value::Nil,
        1 => values.swap_remove(0),
        _ => Value::Array(values),
    };
    rmpv::ext::from_value(value).map_err(|e| CodecError::Decode {
        target: std::any::type_name::<T>(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ExpiryDate;
    use crate::messages::{Message, Request};

    #[test]
    fn empty_response_decodes_to_unit_and_none() {
        decode_response::<()>(vec![]).unwrap();
        assert_eq!(decode_response::<Option<i32>>(vec![]).unwrap(), None);
    }

    #[test]
    fn single_response_value_decodes_directly() {
        let n: i64 = decode_response(vec![Value::from(5)]).unwrap();
        assert_eq!(n, 5);
        let s: String = decode_response(vec![Value::from("hello")]).unwrap();
        assert_eq!(s, "hello");
    }

    #[test]
    fn multiple_response_values_decode_as_tuple() {
        let (n, s): (i32, String) =
            decode_response(vec![Value::from(7), Value::from("seven")]).unwrap();
        assert_eq!(n, 7);
        assert_eq!(s, "seven");
    }

    #[test]
    fn mismatched_response_is_decode_error() {
        let result = decode_response::<i32>(vec![Value::from("not a number")]);
        assert!(matches!(result, Err(CodecError::Decode { .. })));
    }

    #[test]
    fn envelope_survives_the_wire() {
        let request = Request {
            request_reply_id: "corr-1".to_string(),
            method_name: "add".to_string(),
            params: vec![to_value(&2).unwrap(), to_value(&3).unwrap()],
            param_datatypes: vec!["Integer".to_string(), "Integer".to_string()],
        };
        let envelope = Envelope::new(
            "consumer",
            "provider",
            Message::Request { payload: request },
            ExpiryDate::from_millis(1_700_000_000_000),
        )
        .with_header("trace", "t-1");

        let bytes = encode(&envelope).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn truncated_bytes_fail_to_decode() {
        assert!(matches!(decode(&[0x85, 0x01]), Err(CodecError::Decode { .. })));
    }
}
