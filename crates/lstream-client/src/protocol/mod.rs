//! Text protocol support
//!
//! Stateless parsers for the lines read from the push stream and for the
//! bodies returned by control requests, plus form encoding of request
//! parameters.
//!
//! Stream lines are matched in this order, first match wins:
//!
//! ```text
//! <table>,<item>|<v1>|...|<vn>           update
//! <table>,<item>,OV<n>                   overflow
//! MSG,<seq>,<prog>,DONE                  message outcome (success)
//! MSG,<seq>,<prog>,ERR,<code>,<message>  message outcome (failure)
//! ```
//!
//! Item numbers on the wire are 1-based; parsed results carry 0-based
//! indices into the subscription's item list.

mod control;
mod stream;

pub use control::{parse_bulk_response, parse_control_response};
pub use stream::{
    decode_value, parse_message_outcome, parse_overflow, parse_signal, parse_update,
    refusal_error, FieldChange, OverflowMessage, SessionHeader, StreamSignal, UpdateMessage,
};

/// Encode request parameters as an `application/x-www-form-urlencoded` body
pub fn encode_params<K, V>(params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key.as_ref(), value.as_ref());
    }
    serializer.finish()
}
