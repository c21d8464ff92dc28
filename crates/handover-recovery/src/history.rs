//! Append-only anomaly log

use crate::{Anomaly, AnomalyType, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct AnomalyHistory {
    entries: RwLock<Vec<Anomaly>>,
}

impl AnomalyHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, anomaly: Anomaly) {
        self.entries.write().push(anomaly);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Anomalies matching an optional UE and an optional `[from, to)` window,
    /// in insertion order
    pub fn query(
        &self,
        ue_id: Option<&str>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Vec<Anomaly> {
        self.entries
            .read()
            .iter()
            .filter(|a| ue_id.map_or(true, |ue| a.ue_id == ue))
            .filter(|a| from.map_or(true, |f| a.detected_at >= f))
            .filter(|a| to.map_or(true, |t| a.detected_at < t))
            .cloned()
            .collect()
    }

    pub fn for_ue(&self, ue_id: &str) -> Vec<Anomaly> {
        self.query(Some(ue_id), None, None)
    }

    pub fn for_handover(&self, handover_id: &str) -> Vec<Anomaly> {
        self.entries
            .read()
            .iter()
            .filter(|a| a.handover_id == handover_id)
            .cloned()
            .collect()
    }

    pub fn counts_by_type(&self) -> BTreeMap<AnomalyType, usize> {
        let mut counts = BTreeMap::new();
        for a in self.entries.read().iter() {
            *counts.entry(a.anomaly_type).or_insert(0) += 1;
        }
        counts
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&*self.entries.read())?)
    }
}
