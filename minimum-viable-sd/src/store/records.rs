use std::collections::HashMap;
use chrono::{DateTime, Utc};
use shared::types::ServiceSpec;

/// One decoded announcement, keyed by the host it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnouncementRecord {
    /// Peer address without port
    pub source_host: String,

    /// Wall-clock time the payload finished decoding
    pub received_at: DateTime<Utc>,

    pub services: Vec<ServiceSpec>,
}

/// Latest announcement per source host.
///
/// Owned by the reconciler task; nothing else reads or mutates it.
#[derive(Debug, Default)]
pub struct AnnouncementStore {
    records: HashMap<String, AnnouncementRecord>,
}

impl AnnouncementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever the host announced before. Returns the superseded record.
    pub fn insert(&mut self, record: AnnouncementRecord) -> Option<AnnouncementRecord> {
        self.records.insert(record.source_host.clone(), record)
    }

    /// Evict every host whose last announcement is strictly older than `cutoff`.
    /// Returns the evicted hosts.
    pub fn collect_garbage(&mut self, cutoff: DateTime<Utc>) -> Vec<String> {
        let mut evicted = Vec::new();
        self.records.retain(|host, record| {
            if record.received_at < cutoff {
                evicted.push(host.clone());
                false
            } else {
                true
            }
        });
        evicted
    }

    /// All live service specs, concatenated across hosts in map iteration order.
    pub fn flatten(&self) -> Vec<&ServiceSpec> {
        self.records
            .values()
            .flat_map(|record| record.services.iter())
            .collect()
    }

    #[cfg(test)]
    pub fn get(&self, host: &str) -> Option<&AnnouncementRecord> {
        self.records.get(host)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
