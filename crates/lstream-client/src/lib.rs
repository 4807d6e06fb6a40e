//! Lightstreamer-style push stream client
//!
//! A [`Session`] keeps one long-lived HTTP stream open and dispatches the
//! lines it carries to [`Subscription`]s. Session and subscription
//! commands travel over a separate control channel.
//!
//! # Example
//!
//! ```rust,no_run
//! use lstream_client::{
//!     MessageOptions, Session, SessionConfig, StartOptions, SubscriptionConfig,
//!     SubscriptionMode,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = Session::new(
//!         SessionConfig::new("http://localhost:8080").with_adapter_set("DEMO"),
//!     )?;
//!     session.connect().await?;
//!
//!     let stocks = session.build_subscription(
//!         SubscriptionConfig::new(["item1", "item2"], ["last_price", "time"], SubscriptionMode::Merge)
//!             .with_adapter("QUOTE_ADAPTER"),
//!     )?;
//!     stocks.on_data(|_, item, current, _update| {
//!         println!("{} -> {:?}", item, current);
//!     });
//!     stocks.start(StartOptions::default()).await?;
//!
//!     session.on_message_result(|sequence, numbers, error| {
//!         println!("{} {:?}: {:?}", sequence, numbers, error);
//!     });
//!     session
//!         .send_message("hello", MessageOptions::asynchronous("chat", 1))
//!         .await?;
//!
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! The `testing` module provides in-memory collaborators:
//!
//! ```rust,ignore
//! use lstream_client::testing::mock_session;
//!
//! let (session, connector, executor) = mock_session("http://push.test")?;
//! session.connect().await?;
//! connector.transport().unwrap().push_line("1,1|10|20");
//! ```

pub mod config;
pub mod control;
mod error;
pub mod message;
pub mod protocol;
mod session;
mod subscription;
pub mod testing;
pub mod transport;
mod types;

pub use config::{MaxFrequency, SessionConfig, SubscriptionConfig, SubscriptionMode};
pub use control::{ControlExecutor, ControlRequest, ControlTarget, HttpControlExecutor};
pub use error::{ClientError, ErrorKind, Result};
pub use message::{MessageError, MessageOptions, MessageOutcome, MessageResultCallback};
pub use session::Session;
pub use subscription::{DataCallback, OverflowCallback, StartOptions, Subscription};
pub use transport::{
    ConnectRequest, HttpConnector, HttpStreamTransport, StreamConnector, StreamTransport,
    TransportError,
};
pub use types::ItemData;
