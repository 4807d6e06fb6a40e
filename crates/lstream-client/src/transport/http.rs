//! HTTP streaming transport
//!
//! Opens a session with `POST /lightstreamer/create_session.txt` and keeps
//! reading the chunked response body line by line. The body starts with a
//! header block:
//!
//! ```text
//! OK
//! SessionId:<id>
//! ControlAddress:<host>
//! KeepaliveMillis:<ms>
//! MaxBandwidth:<kbps>
//!
//! ...data lines...
//! ```
//!
//! or with `ERROR`, a numeric code and a message. `PROBE` lines are
//! keepalives; `LOOP` asks the client to rebind the stream through
//! `bind_session.txt`; `END [cause]` closes the session.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use parking_lot::RwLock;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, trace, warn};
use url::Url;

use super::{closed_signal, ConnectRequest, StreamConnector, StreamTransport, TransportError};
use crate::protocol::{self, SessionHeader, StreamSignal};

const CREATE_SESSION_PATH: &str = "/lightstreamer/create_session.txt";
const BIND_SESSION_PATH: &str = "/lightstreamer/bind_session.txt";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Default connection timeout for stream requests
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Splits a chunked byte stream into text lines
struct LineReader {
    byte_stream: ByteStream,
    /// Bytes of an incomplete line
    buffer: Vec<u8>,
    /// Complete lines not yet returned
    lines: VecDeque<String>,
}

impl LineReader {
    fn new(byte_stream: ByteStream) -> Self {
        Self {
            byte_stream,
            buffer: Vec::new(),
            lines: VecDeque::new(),
        }
    }

    /// Next line without its terminator, or `None` at end of body
    async fn next_line(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            if let Some(line) = self.lines.pop_front() {
                return Ok(Some(line));
            }

            match self.byte_stream.next().await {
                Some(Ok(bytes)) => self.feed(&bytes)?,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    if self.buffer.is_empty() {
                        return Ok(None);
                    }
                    // Unterminated last line
                    let rest = std::mem::take(&mut self.buffer);
                    return decode_line(rest).map(Some);
                }
            }
        }
    }

    fn feed(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            // Handle \r\n line endings
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.lines.push_back(decode_line(line)?);
        }

        Ok(())
    }
}

fn decode_line(line: Vec<u8>) -> Result<String, TransportError> {
    String::from_utf8(line)
        .map_err(|_| TransportError::ProtocolError("Invalid UTF-8 in stream line".into()))
}

/// POST a form and return the response body as a line reader
async fn open_stream(
    client: &Client,
    url: Url,
    params: &[(String, String)],
) -> Result<LineReader, TransportError> {
    debug!("Opening stream: {}", url);

    let response = client
        .post(url)
        .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
        .body(protocol::encode_params(params))
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        return Err(TransportError::Server { status, message });
    }

    Ok(LineReader::new(Box::pin(response.bytes_stream())))
}

/// Open a stream and read its header, giving up after `deadline`
///
/// A server that accepts the request but never sends the header would
/// otherwise hold the caller forever.
async fn handshake(
    client: &Client,
    url: Url,
    params: &[(String, String)],
    deadline: Duration,
) -> Result<(LineReader, SessionHeader), TransportError> {
    let opened = tokio::time::timeout(deadline, async {
        let mut reader = open_stream(client, url, params).await?;
        let header = read_header(&mut reader).await?;
        Ok::<_, TransportError>((reader, header))
    })
    .await;

    opened.unwrap_or_else(|_| {
        Err(TransportError::ConnectionFailed(format!(
            "No stream header within {:?}",
            deadline
        )))
    })
}

/// Read the header block that starts every stream connection
async fn read_header(reader: &mut LineReader) -> Result<SessionHeader, TransportError> {
    let status = reader
        .next_line()
        .await?
        .ok_or(TransportError::ConnectionClosed)?;

    match status.trim() {
        "OK" => {
            let mut header = SessionHeader::default();
            loop {
                let line = reader
                    .next_line()
                    .await?
                    .ok_or(TransportError::ConnectionClosed)?;
                if line.is_empty() {
                    break;
                }
                if !header.apply_line(&line) {
                    trace!(line, "Ignoring header line");
                }
            }
            if header.session_id.is_empty() {
                return Err(TransportError::ProtocolError(
                    "Stream header without SessionId".into(),
                ));
            }
            Ok(header)
        }
        "ERROR" => {
            let code = reader.next_line().await?.unwrap_or_default();
            let message = reader.next_line().await?.unwrap_or_default();
            Err(protocol::refusal_error(&code, &message))
        }
        "SYNC ERROR" => Err(TransportError::Refused {
            code: 0,
            message: "Session unknown to server".into(),
        }),
        other => Err(TransportError::ProtocolError(format!(
            "Unexpected stream status: {}",
            other
        ))),
    }
}

/// Control requests go to the server URL, with the host replaced by the
/// header's control address when one is given
fn resolve_control_url(
    server_url: &Url,
    control_address: Option<&str>,
) -> Result<Url, TransportError> {
    let mut url = server_url.clone();
    if let Some(address) = control_address.filter(|a| !a.is_empty()) {
        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => {
                (host, port.parse::<u16>().ok())
            }
            _ => (address, None),
        };
        url.set_host(Some(host))?;
        if port.is_some() {
            url.set_port(port).map_err(|_| {
                TransportError::InvalidConfig(format!("Invalid control address: {}", address))
            })?;
        }
    }
    Ok(url)
}

// =============================================================================
// Connector
// =============================================================================

/// Opens [`HttpStreamTransport`]s
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: Client,
    /// Deadline for opening a stream and reading its header
    handshake_timeout: Duration,
}

impl HttpConnector {
    /// Create a connector with the default connect timeout
    pub fn new() -> Result<Self, TransportError> {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a connector with a custom connect timeout
    ///
    /// No overall request timeout is set: the stream stays open for the
    /// lifetime of the session. The same timeout bounds the wait for the
    /// stream header.
    pub fn with_connect_timeout(connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            client,
            handshake_timeout: connect_timeout,
        })
    }

    /// Use an existing reqwest client
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            handshake_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

#[async_trait]
impl StreamConnector for HttpConnector {
    async fn connect(
        &self,
        request: &ConnectRequest,
    ) -> Result<Arc<dyn StreamTransport>, TransportError> {
        let url = request.server_url.join(CREATE_SESSION_PATH)?;
        let (reader, header) =
            handshake(&self.client, url, &request.params(), self.handshake_timeout).await?;
        let control_url =
            resolve_control_url(&request.server_url, header.control_address.as_deref())?;

        info!(
            session_id = %header.session_id,
            control_url = %control_url,
            keepalive_ms = ?header.keepalive_ms,
            "Stream session created"
        );

        Ok(Arc::new(HttpStreamTransport {
            client: self.client.clone(),
            handshake_timeout: self.handshake_timeout,
            server_url: request.server_url.clone(),
            info: RwLock::new(StreamInfo {
                session_id: header.session_id,
                control_url,
            }),
            reader: Mutex::new(reader),
            error: RwLock::new(None),
            closed: watch::channel(false).0,
        }))
    }
}

// =============================================================================
// Transport
// =============================================================================

struct StreamInfo {
    session_id: String,
    control_url: Url,
}

/// A session stream read over HTTP
pub struct HttpStreamTransport {
    client: Client,
    handshake_timeout: Duration,
    server_url: Url,
    info: RwLock<StreamInfo>,
    reader: Mutex<LineReader>,
    error: RwLock<Option<TransportError>>,
    closed: watch::Sender<bool>,
}

impl HttpStreamTransport {
    /// Record the first terminal error
    fn fail(&self, error: TransportError) {
        let mut slot = self.error.write();
        if slot.is_none() {
            debug!(%error, "Stream failed");
            *slot = Some(error);
        }
    }

    /// Replace the exhausted stream with a freshly bound one
    async fn rebind(&self, reader: &mut LineReader) -> Result<(), TransportError> {
        let (session_id, control_url) = {
            let info = self.info.read();
            (info.session_id.clone(), info.control_url.clone())
        };

        let url = control_url.join(BIND_SESSION_PATH)?;
        let params = [("LS_session".to_string(), session_id)];
        let (fresh, header) =
            handshake(&self.client, url, &params, self.handshake_timeout).await?;

        let control_url =
            resolve_control_url(&self.server_url, header.control_address.as_deref())?;
        {
            let mut info = self.info.write();
            info.control_url = control_url;
        }
        *reader = fresh;

        info!(session_id = %header.session_id, "Stream rebound");
        Ok(())
    }
}

#[async_trait]
impl StreamTransport for HttpStreamTransport {
    async fn read_line(&self) -> Option<String> {
        let closed = self.closed.subscribe();
        let already_closed = *closed.borrow();
        if already_closed {
            return None;
        }
        let mut reader = self.reader.lock().await;

        loop {
            let next = tokio::select! {
                next = reader.next_line() => next,
                _ = closed_signal(closed.clone()) => return None,
            };

            match next {
                Ok(Some(line)) => match protocol::parse_signal(&line) {
                    Some(StreamSignal::Probe) => trace!("Stream keepalive"),
                    Some(StreamSignal::Loop) => {
                        debug!("Server requested rebind");
                        if let Err(e) = self.rebind(&mut reader).await {
                            warn!(error = %e, "Stream rebind failed");
                            self.fail(e);
                            return None;
                        }
                    }
                    Some(StreamSignal::End(cause)) => {
                        self.fail(TransportError::SessionEnded(cause));
                        return None;
                    }
                    None => return Some(line),
                },
                Ok(None) => {
                    self.fail(TransportError::ConnectionClosed);
                    return None;
                }
                Err(e) => {
                    self.fail(e);
                    return None;
                }
            }
        }
    }

    fn session_id(&self) -> String {
        self.info.read().session_id.clone()
    }

    fn control_url(&self) -> Url {
        self.info.read().control_url.clone()
    }

    fn error(&self) -> Option<TransportError> {
        self.error.read().clone()
    }

    async fn close(&self) {
        if !self.closed.send_replace(true) {
            debug!(session_id = %self.session_id(), "Stream closed by client");
        }
    }
}
