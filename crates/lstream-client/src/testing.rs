//! Test utilities for lstream-client
//!
//! In-memory stand-ins for the stream connector and control executor, plus
//! a small axum server for exercising the HTTP implementations.
//!
//! ```rust,ignore
//! use lstream_client::testing::mock_session;
//!
//! let (session, connector, executor) = mock_session("http://push.test")?;
//! session.connect().await?;
//! connector.transport().unwrap().push_line("1,1|10|20");
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use url::Url;

use crate::config::SessionConfig;
use crate::control::{ControlExecutor, ControlRequest};
use crate::error::{ClientError, Result};
use crate::session::Session;
use crate::transport::{
    closed_signal, ConnectRequest, StreamConnector, StreamTransport, TransportError,
};

// =============================================================================
// Mock Stream
// =============================================================================

enum StreamEvent {
    Line(String),
    End(Option<TransportError>),
}

/// In-memory stream transport fed by the test
pub struct MockTransport {
    session_id: String,
    control_url: RwLock<Url>,
    events_tx: mpsc::UnboundedSender<StreamEvent>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<StreamEvent>>,
    error: RwLock<Option<TransportError>>,
    closed: watch::Sender<bool>,
}

impl MockTransport {
    pub fn new(session_id: impl Into<String>, control_url: Url) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        Self {
            session_id: session_id.into(),
            control_url: RwLock::new(control_url),
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
            error: RwLock::new(None),
            closed,
        }
    }

    /// Queue a line for the reader
    pub fn push_line(&self, line: impl Into<String>) {
        let _ = self.events_tx.send(StreamEvent::Line(line.into()));
    }

    /// End the stream after the queued lines, optionally with an error
    pub fn end(&self, error: Option<TransportError>) {
        let _ = self.events_tx.send(StreamEvent::End(error));
    }

    /// Move the control endpoint, as a rebind to another host would
    pub fn set_control_url(&self, url: Url) {
        *self.control_url.write() = url;
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl StreamTransport for MockTransport {
    async fn read_line(&self) -> Option<String> {
        let mut events = self.events_rx.lock().await;
        tokio::select! {
            event = events.recv() => match event {
                Some(StreamEvent::Line(line)) => Some(line),
                Some(StreamEvent::End(error)) => {
                    if let Some(error) = error {
                        *self.error.write() = Some(error);
                    }
                    None
                }
                None => None,
            },
            _ = closed_signal(self.closed.subscribe()) => None,
        }
    }

    fn session_id(&self) -> String {
        self.session_id.clone()
    }

    fn control_url(&self) -> Url {
        self.control_url.read().clone()
    }

    fn error(&self) -> Option<TransportError> {
        self.error.read().clone()
    }

    async fn close(&self) {
        self.closed.send_replace(true);
    }
}

/// Connector handing out [`MockTransport`]s
#[derive(Default)]
pub struct MockConnector {
    transports: Mutex<Vec<Arc<MockTransport>>>,
    requests: Mutex<Vec<ConnectRequest>>,
    fail_next: Mutex<Option<TransportError>>,
    stall_next: AtomicBool,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next connect attempt fail with `error`
    pub fn fail_next_connect(&self, error: TransportError) {
        *self.fail_next.lock() = Some(error);
    }

    /// Make the next connect attempt hang until it is dropped, like a
    /// server that never sends the stream header
    pub fn stall_next_connect(&self) {
        self.stall_next.store(true, Ordering::SeqCst);
    }

    /// Most recently opened transport
    pub fn transport(&self) -> Option<Arc<MockTransport>> {
        self.transports.lock().last().cloned()
    }

    /// Number of connect attempts, failed ones included
    pub fn connect_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl StreamConnector for MockConnector {
    async fn connect(
        &self,
        request: &ConnectRequest,
    ) -> std::result::Result<Arc<dyn StreamTransport>, TransportError> {
        self.requests.lock().push(request.clone());
        if let Some(error) = self.fail_next.lock().take() {
            return Err(error);
        }
        if self.stall_next.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let mut transports = self.transports.lock();
        let transport = Arc::new(MockTransport::new(
            format!("S{}", transports.len() + 1),
            request.server_url.clone(),
        ));
        transports.push(transport.clone());
        Ok(transport)
    }
}

// =============================================================================
// Mock Control Executor
// =============================================================================

type FailureRule = (
    Box<dyn Fn(&ControlRequest) -> bool + Send + Sync>,
    ClientError,
);

/// Executor that records requests and answers from scripted rules
///
/// Requests succeed unless a failure rule matches. A successful `destroy`
/// ends the linked connector's current stream, like a real server.
#[derive(Default)]
pub struct MockExecutor {
    requests: Mutex<Vec<(Url, ControlRequest)>>,
    batches: Mutex<Vec<Vec<ControlRequest>>>,
    failures: Mutex<Vec<FailureRule>>,
    connector: Mutex<Option<Arc<MockConnector>>>,
    bulk_calls: AtomicUsize,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// End the connector's stream when a session is destroyed
    pub fn link_connector(&self, connector: Arc<MockConnector>) {
        *self.connector.lock() = Some(connector);
    }

    /// Fail every request matching `predicate` with `error`
    pub fn fail_when<F>(&self, predicate: F, error: ClientError)
    where
        F: Fn(&ControlRequest) -> bool + Send + Sync + 'static,
    {
        self.failures.lock().push((Box::new(predicate), error));
    }

    /// Reject every `operation` request with a server error
    pub fn fail_operation(&self, operation: &str, code: i32, message: &str) {
        let op = operation.to_string();
        self.fail_when(
            move |request| request.operation() == op,
            ClientError::control(operation, code, message),
        );
    }

    /// All requests executed so far, batched ones included
    pub fn requests(&self) -> Vec<ControlRequest> {
        self.requests.lock().iter().map(|(_, r)| r.clone()).collect()
    }

    /// Endpoints the requests were sent to, in order
    pub fn endpoints(&self) -> Vec<Url> {
        self.requests.lock().iter().map(|(u, _)| u.clone()).collect()
    }

    /// Operation names, in order
    pub fn operations(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|(_, r)| r.operation().to_string())
            .collect()
    }

    pub fn batches(&self) -> Vec<Vec<ControlRequest>> {
        self.batches.lock().clone()
    }

    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    fn answer(&self, endpoint: &Url, request: &ControlRequest) -> Result<()> {
        self.requests
            .lock()
            .push((endpoint.clone(), request.clone()));

        let failures = self.failures.lock();
        match failures.iter().find(|(predicate, _)| predicate(request)) {
            Some((_, error)) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ControlExecutor for MockExecutor {
    async fn execute(&self, endpoint: &Url, request: &ControlRequest) -> Result<()> {
        self.answer(endpoint, request)?;

        if request.operation() == "destroy" {
            let transport = self
                .connector
                .lock()
                .as_ref()
                .and_then(|connector| connector.transport());
            if let Some(transport) = transport {
                transport.end(Some(TransportError::SessionEnded(None)));
            }
        }
        Ok(())
    }

    async fn execute_bulk(
        &self,
        endpoint: &Url,
        requests: &[ControlRequest],
    ) -> Result<Vec<Result<()>>> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        self.batches.lock().push(requests.to_vec());
        Ok(requests
            .iter()
            .map(|request| self.answer(endpoint, request))
            .collect())
    }
}

/// Session wired to linked mock collaborators
pub fn mock_session(
    server_url: &str,
) -> Result<(Session, Arc<MockConnector>, Arc<MockExecutor>)> {
    let connector = Arc::new(MockConnector::new());
    let executor = Arc::new(MockExecutor::new());
    executor.link_connector(connector.clone());

    let config =
        SessionConfig::new(server_url).with_disconnect_timeout(Duration::from_millis(500));
    let session = Session::with_collaborators(config, connector.clone(), executor.clone())?;
    Ok((session, connector, executor))
}

// =============================================================================
// Test Server
// =============================================================================

/// Push server stand-in on an ephemeral local port, stopped on drop
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Serve `router` until the returned server is dropped
    pub async fn start(router: axum::Router) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let addr = listener
            .local_addr()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let shutdown = watch::channel(false).0;
        let stopped = closed_signal(shutdown.subscribe());
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(stopped)
                .await
            {
                tracing::warn!(error = %e, "Test server failed");
            }
        });

        Ok(Self {
            addr,
            shutdown,
            handle,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Session configuration pointing at this server
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(self.base_url()).with_disconnect_timeout(Duration::from_millis(500))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        self.handle.abort();
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses
pub async fn wait_for<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(timeout, poll).await.is_ok() || condition()
}
