//! Stream transport layer
//!
//! A [`StreamTransport`] owns one streaming connection and hands out its
//! lines one at a time. A [`StreamConnector`] opens transports; the
//! session asks it for a fresh transport on every `connect`.
//!
//! - [`http`]: HTTP streaming over reqwest
//! - [`testing::MockConnector`](crate::testing::MockConnector) for tests

pub mod error;
pub mod http;

pub use error::TransportError;
pub use http::{HttpConnector, HttpStreamTransport};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use url::Url;

use crate::config::{bandwidth_param, SessionConfig};
use crate::error::Result;

/// One live streaming connection
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Read the next data line, or `None` once the stream has ended
    ///
    /// Keepalives and stream-level signals are handled internally and
    /// never returned.
    async fn read_line(&self) -> Option<String>;

    /// Server-assigned session identifier
    fn session_id(&self) -> String;

    /// Base URL control requests must currently be sent to
    ///
    /// May change over the lifetime of the transport (e.g. after a rebind).
    fn control_url(&self) -> Url;

    /// Why the stream ended, if it ended abnormally or was closed by the
    /// server
    fn error(&self) -> Option<TransportError>;

    /// Close the connection; a pending `read_line` returns `None`
    async fn close(&self);
}

/// Opens stream transports
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(
        &self,
        request: &ConnectRequest,
    ) -> std::result::Result<Arc<dyn StreamTransport>, TransportError>;
}

/// Parameters for opening a new session stream
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub server_url: Url,
    pub username: Option<String>,
    pub password: Option<String>,
    pub adapter_set: Option<String>,
    /// Bandwidth limit in kbit/s (0 = unlimited)
    pub requested_max_bandwidth: f64,
}

impl ConnectRequest {
    pub fn new(config: &SessionConfig, requested_max_bandwidth: f64) -> Result<Self> {
        Ok(Self {
            server_url: config.parsed_server_url()?,
            username: config.username.clone(),
            password: config.password.clone(),
            adapter_set: config.adapter_set.clone(),
            requested_max_bandwidth,
        })
    }

    /// Form parameters for the session creation request
    pub fn params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(ref user) = self.username {
            params.push(("LS_user".to_string(), user.clone()));
        }
        if let Some(ref password) = self.password {
            params.push(("LS_password".to_string(), password.clone()));
        }
        if let Some(ref adapter_set) = self.adapter_set {
            params.push(("LS_adapter_set".to_string(), adapter_set.clone()));
        }
        if self.requested_max_bandwidth > 0.0 {
            params.push((
                "LS_requested_max_bandwidth".to_string(),
                bandwidth_param(self.requested_max_bandwidth),
            ));
        }
        params
    }
}

/// Resolves once the watched flag becomes true
///
/// Never resolves if the sender is dropped without setting it.
pub(crate) async fn closed_signal(mut closed: watch::Receiver<bool>) {
    loop {
        let is_closed = *closed.borrow_and_update();
        if is_closed {
            return;
        }
        if closed.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
