use std::path::PathBuf;
use std::time::Duration;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::config::CollectorConfig;
use crate::store::output;
use crate::store::records::{AnnouncementRecord, AnnouncementStore};

/// Summary of the most recent snapshot written to disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    /// Number of writes since startup
    pub writes: u64,
    /// Service specs in the last snapshot
    pub entries: usize,
    /// Hosts contributing to the last snapshot
    pub hosts: usize,
}

/// Wall-clock time advanced by the runtime's monotonic clock
struct TickClock {
    wall: DateTime<Utc>,
    mono: Instant,
}

impl TickClock {
    fn start() -> Self {
        Self {
            wall: Utc::now(),
            mono: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.mono.elapsed())
            .ok()
            .and_then(|elapsed| self.wall.checked_add_signed(elapsed))
            .unwrap_or_else(Utc::now)
    }
}

/// Sole owner of the announcement store.
///
/// Applies announcements, evicts stale hosts on every tick and writes snapshots.
/// Writes are held back until the gate opens: immediately on a fresh start,
/// otherwise at the first tick, so a restart never replaces a good snapshot
/// with one missing hosts that have not re-announced yet.
pub struct Reconciler {
    store: AnnouncementStore,
    output_path: PathBuf,
    gate_open: bool,
    tick_interval: Duration,
    stale_after: chrono::Duration,
    snapshot_tx: watch::Sender<SnapshotStats>,
}

impl Reconciler {
    pub fn new(output_path: impl Into<PathBuf>, config: &CollectorConfig, gate_open: bool) -> Self {
        let (snapshot_tx, _) = watch::channel(SnapshotStats::default());
        Self {
            store: AnnouncementStore::new(),
            output_path: output_path.into(),
            gate_open,
            tick_interval: config.tick_interval(),
            stale_after: config.stale_after(),
            snapshot_tx,
        }
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<SnapshotStats> {
        self.snapshot_tx.subscribe()
    }

    #[cfg(test)]
    pub fn store(&self) -> &AnnouncementStore {
        &self.store
    }

    pub fn handle_announcement(&mut self, record: AnnouncementRecord) -> Result<()> {
        tracing::debug!(
            "Received announcement from {} ({} services)",
            record.source_host,
            record.services.len()
        );
        self.store.insert(record);

        if self.gate_open {
            self.write_snapshot()?;
        }
        Ok(())
    }

    pub fn handle_tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        // a cutoff before the earliest representable time evicts nothing
        let cutoff = now
            .checked_sub_signed(self.stale_after)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        for host in self.store.collect_garbage(cutoff) {
            tracing::debug!("Garbage-collecting announcement from {}", host);
        }
        if self.store.is_empty() {
            tracing::debug!("No live announcements");
        }

        self.gate_open = true;
        // Unconditional, so the file's mtime keeps advancing while the collector is alive
        self.write_snapshot()
    }

    fn write_snapshot(&mut self) -> Result<()> {
        let entries = output::write_output_file(&self.output_path, &self.store)?;
        let hosts = self.store.len();
        self.snapshot_tx.send_modify(|stats| {
            stats.writes += 1;
            stats.entries = entries;
            stats.hosts = hosts;
        });

        let stats = *self.snapshot_tx.borrow();
        tracing::debug!(
            "Snapshot #{} written: {} entries from {} hosts",
            stats.writes,
            stats.entries,
            stats.hosts
        );
        Ok(())
    }

    /// Event loop. Returns on cancellation or when every sender is gone;
    /// a failed snapshot write ends it with an error.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<AnnouncementRecord>,
        cancel: CancellationToken,
    ) -> Result<()> {
        // first tick one full interval after startup, not immediately
        let first_tick = Instant::now()
            .checked_add(self.tick_interval)
            .context("Tick interval out of range")?;
        let mut ticker = tokio::time::interval_at(first_tick, self.tick_interval);
        let clock = TickClock::start();
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_record = rx.recv() => {
                    match maybe_record {
                        Some(record) => self.handle_announcement(record)?,
                        None => {
                            tracing::info!("Announcement channel closed");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.handle_tick(clock.now())?;
                }
                _ = cancel.cancelled() => {
                    tracing::info!("Reconciler shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}
