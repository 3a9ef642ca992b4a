//! Tether core: message model, QoS, expiry dates, and response decoding for
//! request/reply and publish/subscribe between participants.

pub mod call;
pub mod clock;
pub mod codec;
pub mod error;
pub mod messages;
pub mod qos;

pub use call::{new_correlation_id, Call, CallKind};
pub use clock::{ClockSource, ExpiryDate, ManualClock, SystemClock};
pub use codec::{decode_response, to_value, CodecError};
pub use error::{ApplicationError, ProviderRuntimeError, ReplyError, RuntimeErrorKind};
pub use messages::{
    BroadcastSubscriptionRequest, Envelope, Message, OneWayRequest, Reply, Request,
    SubscriptionPublication, SubscriptionReply, SubscriptionRequest, SubscriptionStop,
};
pub use qos::{MessagingQos, SubscriptionQos};
