//! In-flight handover state

use chrono::{DateTime, Utc};
use handover_predictor::HandoverTrigger;
use orbital_mechanics::GeoPosition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// RSRP assumed when nothing was measured
pub const UNKNOWN_RSRP_DBM: f64 = -130.000000000;
/// Congestion assumed when nothing was measured
pub const UNKNOWN_CONGESTION: f64 = 0.500000000;

/// Latest link measurements. `None` means not reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub rsrp_dbm: Option<f64>,
    pub sinr_db: Option<f64>,
}

impl SignalSnapshot {
    pub fn new(rsrp_dbm: f64, sinr_db: f64) -> Self {
        Self {
            rsrp_dbm: Some(rsrp_dbm),
            sinr_db: Some(sinr_db),
        }
    }

    /// Unknown RSRP counts as poor
    pub fn rsrp_or_poor(&self) -> f64 {
        self.rsrp_dbm.unwrap_or(UNKNOWN_RSRP_DBM)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConditions {
    /// 0..1
    pub interference_level: Option<f64>,
    /// 0..1
    pub congestion_level: Option<f64>,
    pub latency_ms: Option<f64>,
    /// 0..1
    pub system_load: Option<f64>,
}

impl NetworkConditions {
    pub fn congestion_or_default(&self) -> f64 {
        self.congestion_level
            .filter(|c| c.is_finite())
            .unwrap_or(UNKNOWN_CONGESTION)
    }

    pub fn system_load_or_default(&self) -> f64 {
        self.system_load.filter(|l| l.is_finite()).unwrap_or(0.0)
    }
}

/// Unique per in-flight handover; dropped on completion or abort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoverContext {
    pub handover_id: String,
    pub ue_id: String,
    pub source_satellite: String,
    pub target_satellite: String,
    pub started_at: DateTime<Utc>,
    pub position: GeoPosition,
    pub signal: SignalSnapshot,
    pub network: NetworkConditions,
    pub retry_count: u32,
    /// Satellites the UE could fall back to
    pub available_satellites: Vec<String>,
    /// RSRP per alternative, where measured
    pub alternative_rsrp_dbm: BTreeMap<String, f64>,
    /// Seconds left before the handover must settle
    pub time_budget_s: Option<f64>,
}

impl HandoverContext {
    pub fn new(
        ue_id: impl Into<String>,
        source_satellite: impl Into<String>,
        target_satellite: impl Into<String>,
        position: GeoPosition,
    ) -> Self {
        Self {
            handover_id: uuid::Uuid::new_v4().to_string(),
            ue_id: ue_id.into(),
            source_satellite: source_satellite.into(),
            target_satellite: target_satellite.into(),
            started_at: Utc::now(),
            position,
            signal: SignalSnapshot::default(),
            network: NetworkConditions::default(),
            retry_count: 0,
            available_satellites: Vec::new(),
            alternative_rsrp_dbm: BTreeMap::new(),
            time_budget_s: None,
        }
    }

    /// Open a context for a handover that just became due
    pub fn from_trigger(trigger: &HandoverTrigger, signal: SignalSnapshot) -> Self {
        let mut context = Self::new(
            trigger.ue_id.clone(),
            trigger.source_satellite.clone(),
            trigger.target_satellite.clone(),
            trigger.position,
        );
        context.signal = signal;
        context
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn with_signal(mut self, signal: SignalSnapshot) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_network(mut self, network: NetworkConditions) -> Self {
        self.network = network;
        self
    }

    pub fn with_alternatives<I, S>(mut self, satellites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.available_satellites = satellites.into_iter().map(Into::into).collect();
        self
    }

    pub fn elapsed_s(&self, now: DateTime<Utc>) -> f64 {
        (now - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Available satellites other than source and target
    pub fn alternatives(&self) -> impl Iterator<Item = &String> {
        self.available_satellites
            .iter()
            .filter(move |s| **s != self.source_satellite && **s != self.target_satellite)
    }
}
