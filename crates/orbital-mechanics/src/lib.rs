//! Orbital Mechanics Library
//!
//! Shared satellite model for pool planning and handover control: candidate
//! satellites with their orbital elements and pre-computed visibility windows,
//! the visibility/reachability interfaces consumed from the link-budget layer,
//! and Walker Delta pass synthesis for planning studies.
//!
//! All instants are seconds since the start of the planning epoch.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod passes;
pub mod walker;

pub use passes::PassTableProvider;
pub use walker::{PassGeometry, WalkerDelta};

/// WGS-84 equatorial radius (km)
pub const EARTH_RADIUS_KM: f64 = 6378.137000000;

/// Earth gravitational parameter (km³/s²)
pub const EARTH_MU_KM3_S2: f64 = 398600.441800000;

#[derive(Error, Debug)]
pub enum OrbitalError {
    #[error("Invalid orbital elements: {0}")]
    InvalidElements(String),
    #[error("Invalid visibility window for {0}: {1}")]
    InvalidWindow(String, String),
    #[error("Invalid constellation layout: {0}")]
    InvalidLayout(String),
}

pub type Result<T> = std::result::Result<T, OrbitalError>;

/// Operator constellations the planner knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Constellation {
    Starlink,
    OneWeb,
    Kuiper,
}

impl Constellation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Constellation::Starlink => "starlink",
            Constellation::OneWeb => "oneweb",
            Constellation::Kuiper => "kuiper",
        }
    }
}

impl fmt::Display for Constellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classical elements used for diversity scoring (degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrbitalElements {
    pub inclination_deg: f64,
    pub raan_deg: f64,
    pub mean_anomaly_deg: f64,
}

impl OrbitalElements {
    pub fn new(inclination_deg: f64, raan_deg: f64, mean_anomaly_deg: f64) -> Result<Self> {
        if !(0.0..=180.0).contains(&inclination_deg) || !inclination_deg.is_finite() {
            return Err(OrbitalError::InvalidElements(format!(
                "inclination {} outside [0, 180]",
                inclination_deg
            )));
        }
        if !raan_deg.is_finite() || !mean_anomaly_deg.is_finite() {
            return Err(OrbitalError::InvalidElements(
                "non-finite angle".to_string(),
            ));
        }
        Ok(Self {
            inclination_deg,
            raan_deg: raan_deg.rem_euclid(360.0),
            mean_anomaly_deg: mean_anomaly_deg.rem_euclid(360.0),
        })
    }
}

/// Interval during which a satellite is above the observer's elevation mask
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisibilityWindow {
    pub start_s: f64,
    pub end_s: f64,
    pub peak_elevation_deg: f64,
    /// Mean RSRP over the pass, when the link budget supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_rsrp_dbm: Option<f64>,
}

impl VisibilityWindow {
    /// Half-open: visible at `start_s`, not at `end_s`
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start_s && t < self.end_s
    }

    pub fn duration_s(&self) -> f64 {
        (self.end_s - self.start_s).max(0.0)
    }
}

/// A satellite eligible for an active pool. Immutable once ingested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatelliteCandidate {
    pub id: String,
    pub constellation: Constellation,
    pub elements: OrbitalElements,
    #[serde(default)]
    pub windows: Vec<VisibilityWindow>,
}

impl SatelliteCandidate {
    pub fn is_visible_at(&self, t: f64) -> bool {
        self.windows.iter().any(|w| w.contains(t))
    }

    /// Earliest window start at or after `t`, or the window covering `t`
    pub fn first_visible_after(&self, t: f64) -> Option<f64> {
        self.windows
            .iter()
            .filter(|w| w.end_s > t)
            .map(|w| w.start_s.max(t))
            .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.min(s))))
    }

    pub fn peak_elevation_deg(&self) -> f64 {
        self.windows
            .iter()
            .map(|w| w.peak_elevation_deg)
            .fold(0.0, f64::max)
    }

    /// Duration-weighted mean RSRP across windows that report one
    pub fn mean_rsrp_dbm(&self) -> Option<f64> {
        let (sum, weight) = self
            .windows
            .iter()
            .filter_map(|w| w.mean_rsrp_dbm.map(|r| (r, w.duration_s())))
            .fold((0.0, 0.0), |(s, d), (r, dur)| (s + r * dur, d + dur));
        if weight > 0.0 {
            Some(sum / weight)
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<()> {
        for w in &self.windows {
            if !(w.start_s.is_finite() && w.end_s.is_finite()) || w.end_s < w.start_s {
                return Err(OrbitalError::InvalidWindow(
                    self.id.clone(),
                    format!("[{}, {})", w.start_s, w.end_s),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude_km: f64,
}

impl GeoPosition {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude_km: 0.0,
        }
    }
}

/// One link-budget answer for a (satellite, instant) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisibilitySample {
    pub elevation_deg: f64,
    pub azimuth_deg: f64,
    pub distance_km: f64,
    pub rsrp_dbm: f64,
    pub sinr_db: f64,
}

/// Pre-computed geometry and signal per satellite and instant.
///
/// Implementations must be deterministic for identical arguments; handover
/// prediction relies on that for reproducibility. `None` means the provider
/// has no data for that satellite.
pub trait VisibilityProvider: Send + Sync {
    fn sample(
        &self,
        observer: &GeoPosition,
        satellite_id: &str,
        timestamp_s: f64,
    ) -> Option<VisibilitySample>;
}

/// Whether a satellite currently answers on its control link
pub trait SatelliteReachability: Send + Sync {
    fn is_reachable(&self, satellite_id: &str) -> bool;
}

impl<T: VisibilityProvider + ?Sized> VisibilityProvider for std::sync::Arc<T> {
    fn sample(
        &self,
        observer: &GeoPosition,
        satellite_id: &str,
        timestamp_s: f64,
    ) -> Option<VisibilitySample> {
        (**self).sample(observer, satellite_id, timestamp_s)
    }
}

/// Slant range from observer to a satellite at `altitude_km` seen at `elevation_deg`
pub fn slant_range_km(altitude_km: f64, elevation_deg: f64) -> f64 {
    let el = elevation_deg.to_radians();
    let r = EARTH_RADIUS_KM;
    let rs = EARTH_RADIUS_KM + altitude_km;
    ((rs * rs) - (r * el.cos()).powi(2)).sqrt() - r * el.sin()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(windows: Vec<VisibilityWindow>) -> SatelliteCandidate {
        SatelliteCandidate {
            id: "SL-0-0".to_string(),
            constellation: Constellation::Starlink,
            elements: OrbitalElements::new(53.0, 0.0, 0.0).unwrap(),
            windows,
        }
    }

    fn window(start_s: f64, end_s: f64, rsrp: Option<f64>) -> VisibilityWindow {
        VisibilityWindow {
            start_s,
            end_s,
            peak_elevation_deg: 40.0,
            mean_rsrp_dbm: rsrp,
        }
    }

    #[test]
    fn test_window_half_open() {
        let w = window(30.0, 90.0, None);
        assert!(w.contains(30.0));
        assert!(w.contains(89.9));
        assert!(!w.contains(90.0));
    }

    #[test]
    fn test_first_visible_after() {
        let c = candidate(vec![window(300.0, 600.0, None), window(60.0, 120.0, None)]);
        assert_eq!(c.first_visible_after(0.0), Some(60.0));
        assert_eq!(c.first_visible_after(100.0), Some(100.0));
        assert_eq!(c.first_visible_after(200.0), Some(300.0));
        assert_eq!(c.first_visible_after(700.0), None);
    }

    #[test]
    fn test_mean_rsrp_is_duration_weighted() {
        let c = candidate(vec![
            window(0.0, 100.0, Some(-90.0)),
            window(200.0, 500.0, Some(-110.0)),
            window(600.0, 700.0, None),
        ]);
        let rsrp = c.mean_rsrp_dbm().unwrap();
        assert!((rsrp - (-105.0)).abs() < 1e-9);
        assert!(candidate(vec![]).mean_rsrp_dbm().is_none());
    }

    #[test]
    fn test_elements_normalized() {
        let e = OrbitalElements::new(87.9, 370.0, -30.0).unwrap();
        assert!((e.raan_deg - 10.0).abs() < 1e-9);
        assert!((e.mean_anomaly_deg - 330.0).abs() < 1e-9);
        assert!(OrbitalElements::new(190.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_slant_range() {
        // Zenith pass equals altitude
        assert!((slant_range_km(550.0, 90.0) - 550.0).abs() < 1e-6);
        // Low elevation is much longer
        assert!(slant_range_km(550.0, 10.0) > 1500.0);
    }

    #[test]
    fn test_candidate_json() {
        let json = r#"{
            "id": "OW-3-7",
            "constellation": "oneweb",
            "elements": {"inclination_deg": 87.9, "raan_deg": 108.0, "mean_anomaly_deg": 126.0},
            "windows": [{"start_s": 0.0, "end_s": 330.0, "peak_elevation_deg": 55.0}]
        }"#;
        let c: SatelliteCandidate = serde_json::from_str(json).unwrap();
        assert_eq!(c.constellation, Constellation::OneWeb);
        assert!(c.validate().is_ok());
        assert!(c.windows[0].mean_rsrp_dbm.is_none());
    }
}
