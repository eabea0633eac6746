use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use shared::protocol::{decode_announcement, encode_announcement};
use crate::config::AnnouncerConfig;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Read and validate a service definition file, returning its canonical wire encoding.
pub fn load_announcement(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let raw = std::fs::read(path)
        .with_context(|| format!("Failed to read service definition: {}", path.display()))?;

    let services = decode_announcement(&raw)
        .with_context(|| format!("Invalid service definition: {}", path.display()))?;

    tracing::info!("Loaded {} service definitions from {}", services.len(), path.display());

    encode_announcement(&services).context("Failed to encode service definition")
}

/// One fire-and-forget delivery: connect, write the payload, close.
pub async fn send_announcement(payload: &[u8], address: &str, connect_timeout: Duration) -> Result<()> {
    let mut stream = tokio::time::timeout(connect_timeout, TcpStream::connect(address))
        .await
        .with_context(|| format!("Timed out connecting to {}", address))?
        .with_context(|| format!("Failed to connect to {}", address))?;

    stream
        .write_all(payload)
        .await
        .with_context(|| format!("Failed to send announcement to {}", address))?;

    stream
        .shutdown()
        .await
        .with_context(|| format!("Failed to close connection to {}", address))?;

    Ok(())
}

/// Announce `payload` to `address` every interval until cancelled.
///
/// A transport error ends the loop unless `retry_on_error` is set, in which case
/// the failure is logged and retried with exponential backoff.
pub async fn run_announcer(
    payload: Vec<u8>,
    address: String,
    config: AnnouncerConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let mut failures = 0u32;

    loop {
        let delay = match send_announcement(&payload, &address, config.connect_timeout()).await {
            Ok(()) => {
                tracing::debug!("Announced {} bytes to {}", payload.len(), address);
                failures = 0;
                config.interval()
            }
            Err(e) if config.retry_on_error => {
                failures = failures.saturating_add(1);
                let delay = backoff_delay(failures, config.max_backoff());
                tracing::warn!("Announcement failed ({:#}), retrying in {:?}", e, delay);
                delay
            }
            Err(e) => return Err(e),
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                tracing::info!("Announcer shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// 1s, 2s, 4s, ... capped at `max`
fn backoff_delay(failures: u32, max: Duration) -> Duration {
    let exponent = failures.saturating_sub(1).min(31);
    INITIAL_BACKOFF
        .checked_mul(1u32 << exponent)
        .unwrap_or(max)
        .min(max)
}
