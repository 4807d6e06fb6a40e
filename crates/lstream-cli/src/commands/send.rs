//! Send command - send one message and report its outcome

use anyhow::{Context, Result};
use lstream_client::{MessageOptions, Session};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::output::{OutcomeRow, OutputContext};

/// Send `message`, waiting up to `wait` for the outcome of an asynchronous send
pub async fn send(
    session: &Session,
    message: &str,
    options: MessageOptions,
    wait: Duration,
    ctx: &OutputContext,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    if let (Some(sequence), Some(number)) = (options.sequence.clone(), options.number) {
        session.on_message_result(move |seq, numbers, error| {
            if seq == sequence && numbers.contains(&number) {
                let _ = tx.send(OutcomeRow {
                    sequence: seq.to_string(),
                    numbers: numbers
                        .iter()
                        .map(|n| n.to_string())
                        .collect::<Vec<_>>()
                        .join(","),
                    status: if error.is_some() { "error" } else { "done" }.to_string(),
                    error: error
                        .map(|e| format!("{} ({})", e.message, e.code))
                        .unwrap_or_default(),
                });
            }
        });
    }

    session.connect().await.context("Failed to connect")?;
    let asynchronous = options.asynchronous;
    let sent = session.send_message(message, options).await;

    let result = match sent {
        Ok(()) if asynchronous => {
            ctx.info("Message accepted, waiting for outcome...");
            match tokio::time::timeout(wait, rx.recv()).await {
                Ok(Some(outcome)) => {
                    ctx.print_rows(std::slice::from_ref(&outcome));
                    Ok(())
                }
                _ => {
                    ctx.warn("No outcome received");
                    Ok(())
                }
            }
        }
        Ok(()) => {
            ctx.success("Message sent");
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context("Failed to send message")),
    };

    if let Err(e) = session.disconnect().await {
        ctx.error(&format!("Disconnect failed: {}", e));
    }
    result
}
