use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

/// A scrape target group in Prometheus `file_sd` format.
/// This is the unit of discovery data shared by the announcer, the collector and the output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Scrape targets, e.g. "node1.example.com:9100"
    pub targets: Vec<String>,

    /// Labels attached to every target in this group.
    /// Ordered so that serialization is canonical.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ServiceSpec {
    pub fn new<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}
