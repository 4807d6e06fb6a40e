//! Subscription implementation
//!
//! A [`Subscription`] is created by [`Session::build_subscription`] and
//! stays registered with that session until removed. The session's
//! dispatch loop offers it every stream line; lines addressed to its table
//! are folded into the per-item data and handed to the registered
//! callbacks.
//!
//! # Callbacks
//!
//! Callbacks run on the dispatch task, after the subscription's data lock
//! has been released. They receive a snapshot of the item's values taken
//! right after the update was applied, so calling [`Subscription::item_data`]
//! or [`Subscription::set_item_data`] from inside a callback is safe.
//!
//! [`Session::build_subscription`]: crate::Session::build_subscription

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use crate::config::{SubscriptionConfig, SubscriptionMode};
use crate::error::{ClientError, Result};
use crate::protocol;
use crate::session::SessionShared;
use crate::types::ItemData;

/// Process-wide subscription id counter; ids are never reused
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Data observer: `(subscription, item, current values, update values)`
pub type DataCallback = Arc<dyn Fn(&Subscription, &str, &ItemData, &ItemData) + Send + Sync>;

/// Overflow observer: `(subscription, item, lost update count)`
pub type OverflowCallback = Arc<dyn Fn(&Subscription, &str, u64) + Send + Sync>;

/// Options for [`Subscription::start`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Hold data server-side until [`Subscription::unsilence`] is called
    pub silent: bool,
}

impl StartOptions {
    pub fn silent() -> Self {
        Self { silent: true }
    }
}

struct SubscriptionState {
    /// One map per item, index-aligned with the configured items
    item_data: Vec<ItemData>,
    on_data: Vec<DataCallback>,
    on_overflow: Vec<OverflowCallback>,
}

/// A set of items and fields subscribed through a session
pub struct Subscription {
    id: OnceLock<u64>,
    config: SubscriptionConfig,
    session: Weak<SessionShared>,
    active: AtomicBool,
    state: Mutex<SubscriptionState>,
}

impl Subscription {
    pub(crate) fn new(config: SubscriptionConfig, session: Weak<SessionShared>) -> Self {
        let item_data = vec![ItemData::new(); config.items.len()];
        Self {
            id: OnceLock::new(),
            config,
            session,
            active: AtomicBool::new(false),
            state: Mutex::new(SubscriptionState {
                item_data,
                on_data: Vec::new(),
                on_overflow: Vec::new(),
            }),
        }
    }

    /// Process-unique id, also used as the table id on the wire
    ///
    /// Assigned on first access and stable afterwards.
    pub fn id(&self) -> u64 {
        *self
            .id
            .get_or_init(|| NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn items(&self) -> &[String] {
        &self.config.items
    }

    pub fn fields(&self) -> &[String] {
        &self.config.fields
    }

    pub fn mode(&self) -> SubscriptionMode {
        self.config.mode
    }

    pub fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    /// Whether the server has accepted this subscription
    ///
    /// Only cleared by [`stop`](Self::stop) or a session disconnect. If the
    /// stream dies unexpectedly the flag stays set even though no data
    /// arrives until the session reconnects and the subscription is
    /// started again.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    fn session(&self) -> Result<Arc<SessionShared>> {
        self.session.upgrade().ok_or(ClientError::SessionDropped)
    }

    pub(crate) fn belongs_to(&self, session: &Arc<SessionShared>) -> bool {
        std::ptr::eq(self.session.as_ptr(), Arc::as_ptr(session))
    }

    // =========================================================================
    // Activation
    // =========================================================================

    /// Ask the server to start delivering data for this subscription
    ///
    /// Does nothing if already active.
    #[instrument(skip(self), fields(table = self.id()))]
    pub async fn start(&self, options: StartOptions) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }

        let operation = if options.silent { "add_silent" } else { "add" };
        self.session()?
            .control_request(operation, self.add_params())
            .await?;

        self.set_active(true);
        info!(items = ?self.config.items, silent = options.silent, "Subscription started");
        Ok(())
    }

    /// Release data held for a silently started subscription
    ///
    /// Does nothing unless active.
    #[instrument(skip(self), fields(table = self.id()))]
    pub async fn unsilence(&self) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }

        self.session()?
            .control_request("start", vec![("LS_table".to_string(), self.id().to_string())])
            .await
    }

    /// Ask the server to stop delivering data for this subscription
    ///
    /// Does nothing unless active. The subscription is only marked inactive
    /// once the server has accepted the request.
    #[instrument(skip(self), fields(table = self.id()))]
    pub async fn stop(&self) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }

        self.session()?
            .control_request("delete", vec![("LS_table".to_string(), self.id().to_string())])
            .await?;

        self.set_active(false);
        info!("Subscription stopped");
        Ok(())
    }

    /// Parameters of the `add` request for this subscription
    pub(crate) fn add_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("LS_table".to_string(), self.id().to_string()),
            ("LS_mode".to_string(), self.config.mode.as_protocol().to_string()),
            ("LS_id".to_string(), self.config.items.join(" ")),
            ("LS_schema".to_string(), self.config.fields.join(" ")),
        ];
        if let Some(ref adapter) = self.config.adapter {
            params.push(("LS_data_adapter".to_string(), adapter.clone()));
        }
        if let Some(ref selector) = self.config.selector {
            params.push(("LS_selector".to_string(), selector.clone()));
        }
        params.push((
            "LS_requested_max_frequency".to_string(),
            self.config.max_frequency.as_param(),
        ));
        params
    }

    // =========================================================================
    // Stream data
    // =========================================================================

    /// Try to consume one stream line
    ///
    /// Returns true if the line was an update or overflow notice for this
    /// subscription.
    pub fn process_stream_data(&self, line: &str) -> bool {
        let table = self.id();

        if let Some(update) =
            protocol::parse_update(line, table, &self.config.items, &self.config.fields)
        {
            let (callbacks, current) = {
                let mut state = self.state.lock();
                let entry = &mut state.item_data[update.item_index];
                match self.config.mode {
                    SubscriptionMode::Distinct => *entry = update.values.clone(),
                    SubscriptionMode::Merge => entry.extend(update.values.clone()),
                }
                let current = entry.clone();
                (state.on_data.clone(), current)
            };

            let item = &self.config.items[update.item_index];
            for callback in &callbacks {
                callback(self, item, &current, &update.values);
            }
            return true;
        }

        if let Some(overflow) = protocol::parse_overflow(line, table, &self.config.items) {
            let item = &self.config.items[overflow.item_index];
            debug!(table, item = %item, size = overflow.size, "Overflow");

            let callbacks = self.state.lock().on_overflow.clone();
            for callback in &callbacks {
                callback(self, item, overflow.size);
            }
            return true;
        }

        false
    }

    // =========================================================================
    // Data access
    // =========================================================================

    fn item_index(&self, item: &str) -> Result<usize> {
        self.config
            .items
            .iter()
            .position(|name| name == item)
            .ok_or_else(|| ClientError::UnknownItem(item.to_string()))
    }

    /// Copy of the values currently stored for `item`
    pub fn item_data(&self, item: &str) -> Result<ItemData> {
        let index = self.item_index(item)?;
        Ok(self.state.lock().item_data[index].clone())
    }

    /// Replace the values stored for `item`
    pub fn set_item_data(&self, item: &str, data: ItemData) -> Result<()> {
        let index = self.item_index(item)?;
        self.state.lock().item_data[index] = data;
        Ok(())
    }

    /// Forget the values stored for every item
    pub fn clear_data(&self) {
        let mut state = self.state.lock();
        for data in state.item_data.iter_mut() {
            *data = ItemData::new();
        }
    }

    // =========================================================================
    // Callbacks
    // =========================================================================

    /// Register a callback for updates, called in registration order
    pub fn on_data<F>(&self, callback: F)
    where
        F: Fn(&Subscription, &str, &ItemData, &ItemData) + Send + Sync + 'static,
    {
        self.state.lock().on_data.push(Arc::new(callback));
    }

    /// Register a callback for overflow notices
    pub fn on_overflow<F>(&self, callback: F)
    where
        F: Fn(&Subscription, &str, u64) + Send + Sync + 'static,
    {
        self.state.lock().on_overflow.push(Arc::new(callback));
    }

    /// Remove all data and overflow callbacks
    pub fn clear_callbacks(&self) {
        let mut state = self.state.lock();
        state.on_data.clear();
        state.on_overflow.clear();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id())
            .field("items", &self.config.items)
            .field("fields", &self.config.fields)
            .field("mode", &self.config.mode)
            .field("active", &self.is_active())
            .finish()
    }
}
