//! Message sending types
//!
//! Messages are opaque text payloads sent to the server. Asynchronous
//! messages belong to a named sequence and carry a progressive number
//! starting at 1; their outcome is reported later on the stream and
//! delivered to the observers registered with
//! [`Session::on_message_result`](crate::Session::on_message_result).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Options for [`Session::send_message`](crate::Session::send_message)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageOptions {
    /// Send asynchronously; the outcome arrives on the stream
    pub asynchronous: bool,
    /// Sequence name (required when asynchronous)
    pub sequence: Option<String>,
    /// Progressive number within the sequence (required when asynchronous)
    pub number: Option<u64>,
    /// How long the server may wait for earlier messages of the sequence
    pub max_wait: Option<Duration>,
}

impl MessageOptions {
    /// Synchronous send
    pub fn sync() -> Self {
        Self::default()
    }

    /// Asynchronous send as message `number` of `sequence`
    pub fn asynchronous(sequence: impl Into<String>, number: u64) -> Self {
        Self {
            asynchronous: true,
            sequence: Some(sequence.into()),
            number: Some(number),
            max_wait: None,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Protocol parameters for these options
    ///
    /// Synchronous sends carry no ordering parameters even if some were set.
    pub(crate) fn params(&self) -> Result<Vec<(String, String)>> {
        if !self.asynchronous {
            return Ok(Vec::new());
        }

        let sequence = self
            .sequence
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ClientError::Config("Asynchronous messages require a sequence".into())
            })?;
        let number = self.number.ok_or_else(|| {
            ClientError::Config("Asynchronous messages require a number".into())
        })?;
        if number == 0 {
            return Err(ClientError::Config("Message numbers start at 1".into()));
        }

        let mut params = vec![
            ("LS_sequence".to_string(), sequence.to_string()),
            ("LS_msg_prog".to_string(), number.to_string()),
        ];
        if let Some(max_wait) = self.max_wait {
            params.push(("LS_max_wait".to_string(), max_wait.as_millis().to_string()));
        }
        Ok(params)
    }
}

/// Failure reported for an asynchronous message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageError {
    pub code: i32,
    pub message: String,
}

/// Outcome of asynchronous message(s), as read from the stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageOutcome {
    pub sequence: String,
    /// Progressive numbers the outcome applies to
    pub numbers: Vec<u64>,
    /// `None` when the messages were processed successfully
    pub error: Option<MessageError>,
}

/// Observer for asynchronous message outcomes: `(sequence, numbers, error)`
pub type MessageResultCallback = Arc<dyn Fn(&str, &[u64], Option<&MessageError>) + Send + Sync>;
