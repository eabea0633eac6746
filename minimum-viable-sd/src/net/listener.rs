use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use shared::protocol::decode_announcement;
use shared::types::ServiceSpec;
use crate::config::CollectorConfig;
use crate::store::records::AnnouncementRecord;

/// Limits applied to every inbound connection
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub read_timeout: Duration,
    pub max_payload_bytes: usize,
}

impl From<&CollectorConfig> for ConnectionLimits {
    fn from(config: &CollectorConfig) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            max_payload_bytes: config.max_payload_bytes,
        }
    }
}

pub async fn bind(address: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("Failed to bind to {}", address))?;

    tracing::info!("Listening for announcements on {}", address);
    Ok(listener)
}

/// Accept loop. Every connection is handled on its own task; a bad connection is
/// logged and dropped without affecting the others. Only an accept error is fatal.
pub async fn run_listener(
    listener: TcpListener,
    tx: mpsc::Sender<AnnouncementRecord>,
    config: CollectorConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let limits = ConnectionLimits::from(&config);
    let slots = config.max_connections.map(|n| Arc::new(Semaphore::new(n)));

    loop {
        let permit = match &slots {
            Some(slots) => tokio::select! {
                permit = slots.clone().acquire_owned() => {
                    Some(permit.context("Connection limiter closed")?)
                }
                _ = cancel.cancelled() => break,
            },
            None => None,
        };

        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted.context("Failed to accept connection")?;
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, tx, limits).await {
                        tracing::warn!("Dropping connection from {}: {:#}", peer, e);
                    }
                    drop(permit);
                });
            }
            _ = cancel.cancelled() => break,
        }
    }

    tracing::info!("Listener shutting down");
    Ok(())
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    tx: mpsc::Sender<AnnouncementRecord>,
    limits: ConnectionLimits,
) -> Result<()> {
    let services = read_announcement(&mut stream, limits).await?;
    let record = AnnouncementRecord {
        source_host: source_host(&peer),
        received_at: Utc::now(),
        services,
    };
    drop(stream);

    if tx.send(record).await.is_err() {
        tracing::debug!("Reconciler gone, discarding announcement from {}", peer);
    }
    Ok(())
}

/// Read the connection to EOF and decode it as a single announcement
async fn read_announcement(stream: &mut TcpStream, limits: ConnectionLimits) -> Result<Vec<ServiceSpec>> {
    let mut buf = Vec::new();
    let mut bounded = stream.take((limits.max_payload_bytes as u64).saturating_add(1));

    tokio::time::timeout(limits.read_timeout, bounded.read_to_end(&mut buf))
        .await
        .context("Timed out reading announcement")?
        .context("Failed to read announcement")?;

    if buf.len() > limits.max_payload_bytes {
        bail!("Announcement exceeds {} bytes", limits.max_payload_bytes);
    }

    decode_announcement(&buf).context("Failed to decode announcement")
}

/// Host part of the peer address, with IPv4-mapped IPv6 shown as plain IPv4
fn source_host(peer: &SocketAddr) -> String {
    peer.ip().to_canonical().to_string()
}
