//! Push stream line parsers

use tracing::trace;

use crate::message::{MessageError, MessageOutcome};
use crate::transport::TransportError;
use crate::types::ItemData;

/// An update addressed to one item of a subscription
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateMessage {
    /// 0-based index into the subscription's items
    pub item_index: usize,
    /// Fields carried by the update; unchanged fields are absent
    pub values: ItemData,
}

/// Server notice that updates for an item were dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverflowMessage {
    /// 0-based index into the subscription's items
    pub item_index: usize,
    /// Number of updates lost
    pub size: u64,
}

/// Stream-level control lines that never reach the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSignal {
    /// Keepalive
    Probe,
    /// Server asks the client to rebind the stream
    Loop,
    /// Session closed by the server, with an optional cause code
    End(Option<i32>),
}

/// Decoded form of a single field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldChange {
    /// Empty on the wire: the field did not change
    Unchanged,
    /// New value (`None` is a null value)
    Value(Option<String>),
}

/// Decode one raw field value
///
/// `""` means unchanged, `$` is the empty string and `#` is null.
pub fn decode_value(raw: &str) -> FieldChange {
    match raw {
        "" => FieldChange::Unchanged,
        "$" => FieldChange::Value(Some(String::new())),
        "#" => FieldChange::Value(None),
        _ => FieldChange::Value(Some(raw.to_string())),
    }
}

/// Match `<table>,<item>` against a table id and item count
fn parse_table_item(head: &str, table: u64, item_count: usize) -> Option<usize> {
    let (table_str, item_str) = head.split_once(',')?;
    if table_str.parse::<u64>().ok()? != table {
        return None;
    }
    let item: usize = item_str.parse().ok()?;
    if item == 0 || item > item_count {
        return None;
    }
    Some(item - 1)
}

/// Try to parse an update line for the given table
///
/// Returns `None` if the line belongs to another table, names an item out
/// of range, or does not carry exactly one value per field.
pub fn parse_update(
    line: &str,
    table: u64,
    items: &[String],
    fields: &[String],
) -> Option<UpdateMessage> {
    let (head, rest) = line.split_once('|')?;
    let item_index = parse_table_item(head, table, items.len())?;

    let raw_values: Vec<&str> = rest.split('|').collect();
    if raw_values.len() != fields.len() {
        trace!(
            table,
            expected = fields.len(),
            got = raw_values.len(),
            "Update field count mismatch"
        );
        return None;
    }

    let values = fields
        .iter()
        .zip(raw_values)
        .filter_map(|(field, raw)| match decode_value(raw) {
            FieldChange::Unchanged => None,
            FieldChange::Value(value) => Some((field.clone(), value)),
        })
        .collect();

    Some(UpdateMessage { item_index, values })
}

/// Try to parse an overflow line for the given table
pub fn parse_overflow(line: &str, table: u64, items: &[String]) -> Option<OverflowMessage> {
    let (head, overflow) = line.rsplit_once(',')?;
    let size = overflow.strip_prefix("OV")?.parse::<u64>().ok()?;
    let item_index = parse_table_item(head, table, items.len())?;
    Some(OverflowMessage { item_index, size })
}

/// Try to parse an asynchronous message outcome line
pub fn parse_message_outcome(line: &str) -> Option<MessageOutcome> {
    let rest = line.strip_prefix("MSG,")?;
    let parts: Vec<&str> = rest.splitn(5, ',').collect();
    if parts.len() < 3 || parts[0].is_empty() {
        return None;
    }

    let sequence = parts[0].to_string();
    let number = parts[1].parse::<u64>().ok()?;

    let error = match (parts[2], parts.len()) {
        ("DONE", 3) => None,
        ("ERR", n) if n >= 4 => Some(MessageError {
            code: parts[3].parse().ok()?,
            message: parts.get(4).copied().unwrap_or_default().to_string(),
        }),
        _ => return None,
    };

    Some(MessageOutcome {
        sequence,
        numbers: vec![number],
        error,
    })
}

/// Recognize stream-level control lines
pub fn parse_signal(line: &str) -> Option<StreamSignal> {
    match line {
        "PROBE" => Some(StreamSignal::Probe),
        "LOOP" => Some(StreamSignal::Loop),
        "END" => Some(StreamSignal::End(None)),
        _ => {
            let cause = line.strip_prefix("END ")?;
            Some(StreamSignal::End(cause.trim().parse().ok()))
        }
    }
}

/// Header sent at the start of every stream connection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionHeader {
    pub session_id: String,
    /// Host that control requests must be sent to, if different
    pub control_address: Option<String>,
    pub keepalive_ms: Option<u64>,
    pub max_bandwidth: Option<String>,
}

impl SessionHeader {
    /// Apply one `Key:value` header line; returns false for unknown keys
    pub fn apply_line(&mut self, line: &str) -> bool {
        let Some((key, value)) = line.split_once(':') else {
            return false;
        };
        let value = value.trim();
        match key.trim() {
            "SessionId" => self.session_id = value.to_string(),
            "ControlAddress" => self.control_address = Some(value.to_string()),
            "KeepaliveMillis" => self.keepalive_ms = value.parse().ok(),
            "MaxBandwidth" => self.max_bandwidth = Some(value.to_string()),
            _ => return false,
        }
        true
    }
}

/// Build the error for an `ERROR` response from its code and message lines
pub fn refusal_error(code_line: &str, message_line: &str) -> TransportError {
    match code_line.trim().parse() {
        Ok(code) => TransportError::Refused {
            code,
            message: message_line.trim().to_string(),
        },
        Err(_) => TransportError::ProtocolError(format!("Invalid error code: {}", code_line)),
    }
}
