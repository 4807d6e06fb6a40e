//! Monitor command - print subscription updates as they arrive

use anyhow::{Context, Result};
use lstream_client::{Session, StartOptions, SubscriptionConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::output::{display_value, print_update, ItemRow, OutputContext};

/// Subscribe and print updates until Ctrl+C or the stream ends
pub async fn monitor(
    session: &Session,
    config: SubscriptionConfig,
    silent: bool,
    ctx: &OutputContext,
) -> Result<()> {
    let subscription = session
        .build_subscription(config)
        .context("Invalid subscription")?;

    let format = ctx.format;
    let fields = subscription.fields().to_vec();
    subscription.on_data(move |_, item, current, update| {
        print_update(format, item, &fields, current, update);
    });
    subscription.on_overflow(|_, item, lost| {
        eprintln!("[{}] {} update(s) lost", item, lost);
    });

    session.connect().await.context("Failed to connect")?;
    ctx.info(&format!(
        "Connected, session {}",
        session.session_id().unwrap_or_default()
    ));

    subscription
        .start(StartOptions { silent })
        .await
        .context("Failed to start subscription")?;
    if silent {
        debug!("Releasing silent subscription");
        subscription.unsilence().await?;
    }
    ctx.info(&format!(
        "Subscribed to {} item(s), press Ctrl+C to stop",
        subscription.items().len()
    ));

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) && session.is_connected() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if let Some(error) = session.error() {
        ctx.warn(&format!("Stream ended: {}", error));
    }

    // Last known values
    let mut rows = Vec::new();
    for item in subscription.items() {
        let data = subscription.item_data(item)?;
        for field in subscription.fields() {
            if let Some(value) = data.get(field) {
                rows.push(ItemRow {
                    item: item.clone(),
                    field: field.clone(),
                    value: display_value(value),
                });
            }
        }
    }
    ctx.print_rows(&rows);

    ctx.info("Disconnecting...");
    match session.disconnect().await {
        Ok(()) => ctx.success("Disconnected"),
        Err(e) => ctx.error(&format!("Disconnect failed: {}", e)),
    }

    Ok(())
}
