//! Session lifecycle and stream dispatch
//!
//! A [`Session`] owns at most one stream transport at a time. While
//! connected, a background task reads the stream line by line and offers
//! each line to the registered subscriptions in registration order; the
//! first one that consumes it ends the search. Lines no subscription
//! claims are checked for asynchronous message outcomes, anything else is
//! logged and dropped.
//!
//! # Stream termination
//!
//! When the stream ends the dispatch task records the cause in
//! [`Session::error`] and the session returns to the disconnected state.
//! An `END` that follows the `destroy` sent by [`Session::disconnect`] is
//! recorded as [`ClientError::SessionEnded`]; any other termination,
//! including an `END` the server sends on its own, stays a transport
//! error.
//! Subscriptions keep their `active` flag in that case; only
//! [`Session::disconnect`] clears it.
//!
//! A panicking callback stops the dispatch task: the panic is recorded as
//! a [`ClientError::Dispatch`] error and the stream is closed.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::{bandwidth_param, validate_bandwidth, SessionConfig, SubscriptionConfig};
use crate::control::{ControlExecutor, ControlRequest, HttpControlExecutor};
use crate::error::{ClientError, Result};
use crate::message::{MessageError, MessageOptions, MessageResultCallback};
use crate::protocol;
use crate::subscription::Subscription;
use crate::transport::{
    ConnectRequest, HttpConnector, StreamConnector, StreamTransport, TransportError,
};

/// Connection state, present only while connected
#[derive(Default)]
struct ConnectionState {
    transport: Option<Arc<dyn StreamTransport>>,
    dispatch: Option<JoinHandle<()>>,
    /// Set once `disconnect` sends `destroy` for this connection
    destroy_sent: bool,
    /// Why the last stream ended
    error: Option<ClientError>,
}

/// State shared between session handles, subscriptions and the dispatch task
pub(crate) struct SessionShared {
    config: SessionConfig,
    connector: Arc<dyn StreamConnector>,
    executor: Arc<dyn ControlExecutor>,
    /// Serializes connect and disconnect
    lifecycle: tokio::sync::Mutex<()>,
    /// Bumped by `disconnect` to abandon a connect still in progress
    cancel: watch::Sender<u64>,
    connection: Mutex<ConnectionState>,
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    message_callbacks: RwLock<Vec<MessageResultCallback>>,
    requested_max_bandwidth: RwLock<f64>,
}

impl SessionShared {
    fn transport(&self) -> Option<Arc<dyn StreamTransport>> {
        self.connection.lock().transport.clone()
    }

    /// Send a control command for the current session
    ///
    /// The control URL is read from the transport on every call since a
    /// rebind may move it.
    pub(crate) async fn control_request(
        &self,
        operation: &str,
        params: Vec<(String, String)>,
    ) -> Result<()> {
        let transport = self.transport().ok_or(ClientError::NotConnected)?;
        self.execute_control(transport.as_ref(), operation, params)
            .await
    }

    async fn execute_control(
        &self,
        transport: &dyn StreamTransport,
        operation: &str,
        params: Vec<(String, String)>,
    ) -> Result<()> {
        let request = ControlRequest::control(&transport.session_id(), operation).with_params(params);
        debug!(operation, "Sending control request");
        self.executor
            .execute(&transport.control_url(), &request)
            .await
    }

    /// Offer one stream line to subscriptions, then to message observers
    fn dispatch_line(&self, line: &str) {
        let subscriptions = self.subscriptions.read().clone();
        if subscriptions
            .iter()
            .any(|subscription| subscription.process_stream_data(line))
        {
            return;
        }

        if let Some(outcome) = protocol::parse_message_outcome(line) {
            let callbacks = self.message_callbacks.read().clone();
            for callback in &callbacks {
                callback(&outcome.sequence, &outcome.numbers, outcome.error.as_ref());
            }
            return;
        }

        warn!(line, "Dropping unrecognized stream line");
    }

    /// Record why the stream ended and return to the disconnected state
    ///
    /// Only touches the connection state if it still belongs to `transport`;
    /// a newer connection may already have replaced it.
    fn finish_dispatch(&self, transport: &Arc<dyn StreamTransport>, failure: Option<ClientError>) {
        let mut connection = self.connection.lock();
        let current = connection
            .transport
            .as_ref()
            .is_some_and(|t| Arc::ptr_eq(t, transport));
        if !current {
            return;
        }

        // An END only counts as a session end when we asked for it
        let destroy_sent = connection.destroy_sent;
        let error = failure.or_else(|| {
            transport.error().map(|e| match e {
                TransportError::SessionEnded(cause) if destroy_sent => {
                    ClientError::SessionEnded(cause)
                }
                other => ClientError::from(other),
            })
        });
        match &error {
            Some(err) => info!(error = %err, "Stream ended"),
            None => info!("Stream ended"),
        }
        connection.error = error;
        connection.transport = None;
        connection.dispatch = None;
    }
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        if let Some(handle) = self.connection.get_mut().dispatch.take() {
            handle.abort();
        }
    }
}

/// Read the stream until it ends, dispatching every line
async fn dispatch_loop(session: Weak<SessionShared>, transport: Arc<dyn StreamTransport>) {
    let mut failure = None;

    while let Some(line) = transport.read_line().await {
        let Some(shared) = session.upgrade() else {
            debug!("Session dropped, stopping dispatch");
            return;
        };
        trace!(line = %line, "Stream line");

        if let Err(panic) =
            std::panic::catch_unwind(AssertUnwindSafe(|| shared.dispatch_line(&line)))
        {
            let reason = panic_message(panic.as_ref());
            error!(reason = %reason, "Callback panicked, stopping dispatch");
            failure = Some(ClientError::Dispatch(reason));
            break;
        }
    }

    if failure.is_some() {
        transport.close().await;
    }
    if let Some(shared) = session.upgrade() {
        shared.finish_dispatch(&transport, failure);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "callback panicked".to_string()
    }
}

/// Client session for a push server
///
/// Cheap to clone; clones share the same connection and subscriptions.
///
/// # Example
///
/// ```rust,no_run
/// use lstream_client::{Session, SessionConfig, StartOptions, SubscriptionConfig, SubscriptionMode};
///
/// #[tokio::main]
/// async fn main() -> lstream_client::Result<()> {
///     let session = Session::new(SessionConfig::new("http://localhost:8080"))?;
///     session.connect().await?;
///
///     let quotes = session.build_subscription(SubscriptionConfig::new(
///         ["item1"],
///         ["bid", "ask"],
///         SubscriptionMode::Merge,
///     ))?;
///     quotes.on_data(|_, item, current, _| println!("{}: {:?}", item, current));
///     quotes.start(StartOptions::default()).await?;
///
///     session.disconnect().await
/// }
/// ```
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    /// Create a session using HTTP for both the stream and control requests
    pub fn new(config: SessionConfig) -> Result<Self> {
        let connector = HttpConnector::with_connect_timeout(config.connect_timeout())?;
        let executor =
            HttpControlExecutor::with_config(config.request_timeout(), config.connect_timeout())?;
        Self::with_collaborators(config, Arc::new(connector), Arc::new(executor))
    }

    /// Create a session with custom stream and control collaborators
    pub fn with_collaborators(
        config: SessionConfig,
        connector: Arc<dyn StreamConnector>,
        executor: Arc<dyn ControlExecutor>,
    ) -> Result<Self> {
        config.validate()?;
        let requested_max_bandwidth = config.requested_max_bandwidth;

        Ok(Self {
            shared: Arc::new(SessionShared {
                config,
                connector,
                executor,
                lifecycle: tokio::sync::Mutex::new(()),
                cancel: watch::channel(0).0,
                connection: Mutex::new(ConnectionState::default()),
                subscriptions: RwLock::new(Vec::new()),
                message_callbacks: RwLock::new(Vec::new()),
                requested_max_bandwidth: RwLock::new(requested_max_bandwidth),
            }),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open the stream and start dispatching
    ///
    /// Does nothing if already connected. Clears the previous stream
    /// error. If the stream cannot be opened the session stays
    /// disconnected and the failure is returned. A [`disconnect`] issued
    /// while the stream is being opened abandons the attempt with
    /// [`TransportError::Cancelled`].
    ///
    /// [`disconnect`]: Self::disconnect
    #[instrument(skip(self), fields(server = %self.shared.config.server_url))]
    pub async fn connect(&self) -> Result<()> {
        let mut cancel = self.shared.cancel.subscribe();
        let _lifecycle = self.shared.lifecycle.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.shared.connection.lock().error = None;

        let request = ConnectRequest::new(&self.shared.config, self.requested_max_bandwidth())?;
        let opened = tokio::select! {
            opened = self.shared.connector.connect(&request) => opened,
            _ = cancel.changed() => Err(TransportError::Cancelled),
        };
        let transport = opened.map_err(|e| {
            warn!(error = %e, "Failed to open stream");
            ClientError::from(e)
        })?;
        info!(session_id = %transport.session_id(), "Session connected");

        let mut connection = self.shared.connection.lock();
        connection.transport = Some(transport.clone());
        connection.destroy_sent = false;
        connection.dispatch = Some(tokio::spawn(dispatch_loop(
            Arc::downgrade(&self.shared),
            transport,
        )));
        Ok(())
    }

    /// Destroy the server session and tear down the connection
    ///
    /// Always leaves the session disconnected with every subscription
    /// inactive. A failing `destroy` request is returned after cleanup.
    /// A [`connect`](Self::connect) still opening the stream is abandoned
    /// rather than waited for.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        self.shared.cancel.send_modify(|generation| *generation += 1);
        let _lifecycle = self.shared.lifecycle.lock().await;

        let (transport, mut dispatch) = {
            let mut connection = self.shared.connection.lock();
            connection.destroy_sent = connection.transport.is_some();
            (connection.transport.clone(), connection.dispatch.take())
        };

        let destroyed = match transport {
            Some(ref transport) => {
                self.shared
                    .execute_control(transport.as_ref(), "destroy", Vec::new())
                    .await
            }
            None => Ok(()),
        };

        if destroyed.is_ok() {
            if let Some(handle) = dispatch.as_mut() {
                let timeout = self.shared.config.disconnect_timeout();
                if tokio::time::timeout(timeout, handle).await.is_err() {
                    warn!(?timeout, "Dispatch loop did not stop in time");
                }
            }
        }

        if let Some(ref transport) = transport {
            transport.close().await;
        }
        if let Some(handle) = dispatch {
            if !handle.is_finished() {
                handle.abort();
            }
        }
        for subscription in self.subscriptions() {
            subscription.set_active(false);
        }
        {
            let mut connection = self.shared.connection.lock();
            connection.transport = None;
            connection.dispatch = None;
            connection.destroy_sent = false;
        }

        if let Err(ref e) = destroyed {
            warn!(error = %e, "Session destroy failed");
        } else if transport.is_some() {
            info!("Session disconnected");
        }
        destroyed
    }

    /// Ask the server to close and rebind the stream, keeping the session
    ///
    /// Does nothing if not connected.
    #[instrument(skip(self))]
    pub async fn force_rebind(&self) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }
        self.shared.control_request("force_rebind", Vec::new()).await
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connection.lock().transport.is_some()
    }

    /// Server-assigned id of the current session, if connected
    pub fn session_id(&self) -> Option<String> {
        self.shared.transport().map(|t| t.session_id())
    }

    /// Why the last stream ended, if it ended with an error
    pub fn error(&self) -> Option<ClientError> {
        self.shared.connection.lock().error.clone()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Create a subscription and register it with this session
    ///
    /// The subscription is not started.
    pub fn build_subscription(&self, config: SubscriptionConfig) -> Result<Arc<Subscription>> {
        config.validate()?;
        let subscription = Arc::new(Subscription::new(config, Arc::downgrade(&self.shared)));
        self.shared.subscriptions.write().push(subscription.clone());
        debug!(table = subscription.id(), "Subscription registered");
        Ok(subscription)
    }

    /// Registered subscriptions, in registration order
    pub fn subscriptions(&self) -> Vec<Arc<Subscription>> {
        self.shared.subscriptions.read().clone()
    }

    /// Stop a subscription and unregister it
    ///
    /// The subscription is unregistered even if stopping it fails; the
    /// stop error is still returned.
    #[instrument(skip(self), fields(table = subscription.id()))]
    pub async fn remove_subscription(&self, subscription: &Arc<Subscription>) -> Result<()> {
        let registered = self
            .shared
            .subscriptions
            .read()
            .iter()
            .any(|s| Arc::ptr_eq(s, subscription));
        if !registered {
            return Err(ClientError::Config(format!(
                "Subscription {} is not registered with this session",
                subscription.id()
            )));
        }

        let stopped = subscription.stop().await;
        self.shared
            .subscriptions
            .write()
            .retain(|s| !Arc::ptr_eq(s, subscription));
        stopped
    }

    /// Start several subscriptions with one batched request
    ///
    /// Returns one result per subscription, in order. Subscriptions whose
    /// request succeeded are marked active; the others are left as they
    /// were.
    #[instrument(skip(self, subscriptions), fields(count = subscriptions.len()))]
    pub async fn bulk_start(&self, subscriptions: &[Arc<Subscription>]) -> Result<Vec<Result<()>>> {
        if subscriptions.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(foreign) = subscriptions.iter().find(|s| !s.belongs_to(&self.shared)) {
            return Err(ClientError::Config(format!(
                "Subscription {} belongs to another session",
                foreign.id()
            )));
        }

        let transport = self.shared.transport().ok_or(ClientError::NotConnected)?;
        let session_id = transport.session_id();
        let requests: Vec<ControlRequest> = subscriptions
            .iter()
            .map(|s| ControlRequest::control(&session_id, "add").with_params(s.add_params()))
            .collect();

        let results = self
            .shared
            .executor
            .execute_bulk(&transport.control_url(), &requests)
            .await?;
        if results.len() != requests.len() {
            return Err(TransportError::ProtocolError(format!(
                "Expected {} bulk results, got {}",
                requests.len(),
                results.len()
            ))
            .into());
        }

        for (subscription, result) in subscriptions.iter().zip(&results) {
            match result {
                Ok(()) => subscription.set_active(true),
                Err(e) => warn!(table = subscription.id(), error = %e, "Bulk start failed"),
            }
        }
        Ok(results)
    }

    // =========================================================================
    // Control and messages
    // =========================================================================

    /// Bandwidth limit in kbit/s (0 = unlimited)
    pub fn requested_max_bandwidth(&self) -> f64 {
        *self.shared.requested_max_bandwidth.read()
    }

    /// Change the bandwidth limit, informing the server if connected
    #[instrument(skip(self))]
    pub async fn set_requested_max_bandwidth(&self, bandwidth: f64) -> Result<()> {
        validate_bandwidth(bandwidth)?;
        *self.shared.requested_max_bandwidth.write() = bandwidth;

        if !self.is_connected() {
            return Ok(());
        }
        self.shared
            .control_request(
                "constrain",
                vec![(
                    "LS_requested_max_bandwidth".to_string(),
                    bandwidth_param(bandwidth),
                )],
            )
            .await
    }

    /// Send an arbitrary control command for the current session
    ///
    /// `params` are merged over `LS_session` and `LS_op`.
    pub async fn control_request(
        &self,
        operation: &str,
        params: Vec<(String, String)>,
    ) -> Result<()> {
        self.shared.control_request(operation, params).await
    }

    /// Send a message to the server
    ///
    /// Asynchronous sends return once the request is accepted; the outcome
    /// is delivered later to the [`on_message_result`](Self::on_message_result)
    /// observers.
    #[instrument(skip(self, message))]
    pub async fn send_message(&self, message: &str, options: MessageOptions) -> Result<()> {
        let params = options.params()?;
        let transport = self.shared.transport().ok_or(ClientError::NotConnected)?;

        let request = ControlRequest::message(&transport.session_id(), message).with_params(params);
        debug!(asynchronous = options.asynchronous, "Sending message");
        self.shared
            .executor
            .execute(&transport.control_url(), &request)
            .await
    }

    /// Register an observer for asynchronous message outcomes
    ///
    /// Observers run on the dispatch task, in registration order, for
    /// every outcome whatever its sequence.
    pub fn on_message_result<F>(&self, callback: F)
    where
        F: Fn(&str, &[u64], Option<&MessageError>) + Send + Sync + 'static,
    {
        self.shared.message_callbacks.write().push(Arc::new(callback));
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("server_url", &self.shared.config.server_url)
            .field("session_id", &self.session_id())
            .field("subscriptions", &self.shared.subscriptions.read().len())
            .finish()
    }
}
