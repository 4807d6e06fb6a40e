//! Control channel
//!
//! Control commands (`add`, `delete`, `destroy`, ...) and message sends
//! are short-lived form POSTs, independent of the push stream. A
//! [`ControlExecutor`] performs them, singly or batched into one round
//! trip.

mod http;

pub use http::HttpControlExecutor;

use async_trait::async_trait;
use url::Url;

use crate::error::Result;
use crate::protocol;

/// Endpoint a control request is posted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlTarget {
    /// Session and subscription commands
    Control,
    /// Message sends
    SendMessage,
}

impl ControlTarget {
    pub fn path(&self) -> &'static str {
        match self {
            ControlTarget::Control => "/lightstreamer/control.txt",
            ControlTarget::SendMessage => "/lightstreamer/send_message.txt",
        }
    }
}

/// One control command: a target and flat key/value parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    target: ControlTarget,
    params: Vec<(String, String)>,
}

impl ControlRequest {
    /// A control command for `operation` on the given session
    pub fn control(session_id: &str, operation: &str) -> Self {
        Self {
            target: ControlTarget::Control,
            params: vec![
                ("LS_session".to_string(), session_id.to_string()),
                ("LS_op".to_string(), operation.to_string()),
            ],
        }
    }

    /// A message send on the given session
    pub fn message(session_id: &str, message: &str) -> Self {
        Self {
            target: ControlTarget::SendMessage,
            params: vec![
                ("LS_session".to_string(), session_id.to_string()),
                ("LS_message".to_string(), message.to_string()),
            ],
        }
    }

    /// Set a parameter, replacing any earlier value for the same key
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.params.push((key, value)),
        }
        self
    }

    /// Set every parameter in `params`
    pub fn with_params<I>(self, params: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        params
            .into_iter()
            .fold(self, |request, (key, value)| request.set(key, value))
    }

    pub fn target(&self) -> ControlTarget {
        self.target
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Value of a parameter, if set
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Operation name, used to label errors
    pub fn operation(&self) -> &str {
        match self.target {
            ControlTarget::Control => self.param("LS_op").unwrap_or("control"),
            ControlTarget::SendMessage => "send_message",
        }
    }

    /// Form-encoded request body
    pub fn encode(&self) -> String {
        protocol::encode_params(&self.params)
    }
}

/// Performs control requests against a control endpoint
#[async_trait]
pub trait ControlExecutor: Send + Sync {
    /// Execute one request; a rejection is returned as an error
    async fn execute(&self, endpoint: &Url, request: &ControlRequest) -> Result<()>;

    /// Execute a batch of requests in one round trip
    ///
    /// The outer error is a failure of the whole batch; otherwise there is
    /// one result per request, in request order.
    async fn execute_bulk(
        &self,
        endpoint: &Url,
        requests: &[ControlRequest],
    ) -> Result<Vec<Result<()>>>;
}
