//! Table-backed visibility provider
//!
//! Answers visibility queries from pre-computed pass windows for one site.
//! Elevation rises as a half-sine from the mask to the pass peak.

use crate::walker::nominal_rsrp_dbm;
use crate::{
    slant_range_km, GeoPosition, SatelliteCandidate, VisibilityProvider, VisibilitySample,
    VisibilityWindow,
};
use std::collections::HashMap;

/// Elevation reported while a satellite is below the mask
const BELOW_MASK_ELEVATION_DEG: f64 = -5.000000000;

#[derive(Debug, Clone)]
struct PassTrack {
    raan_deg: f64,
    altitude_km: f64,
    windows: Vec<VisibilityWindow>,
}

#[derive(Debug, Clone, Default)]
pub struct PassTableProvider {
    min_elevation_deg: f64,
    tracks: HashMap<String, PassTrack>,
}

impl PassTableProvider {
    pub fn new(min_elevation_deg: f64) -> Self {
        Self {
            min_elevation_deg,
            tracks: HashMap::new(),
        }
    }

    pub fn insert(&mut self, candidate: &SatelliteCandidate, altitude_km: f64) {
        self.tracks.insert(
            candidate.id.clone(),
            PassTrack {
                raan_deg: candidate.elements.raan_deg,
                altitude_km,
                windows: candidate.windows.clone(),
            },
        );
    }

    pub fn with_candidates<'a>(
        mut self,
        candidates: impl IntoIterator<Item = &'a SatelliteCandidate>,
        altitude_km: f64,
    ) -> Self {
        for c in candidates {
            self.insert(c, altitude_km);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl VisibilityProvider for PassTableProvider {
    fn sample(
        &self,
        _observer: &GeoPosition,
        satellite_id: &str,
        timestamp_s: f64,
    ) -> Option<VisibilitySample> {
        let track = self.tracks.get(satellite_id)?;

        let (elevation_deg, progress) = match track.windows.iter().find(|w| w.contains(timestamp_s))
        {
            Some(w) => {
                let frac = ((timestamp_s - w.start_s) / w.duration_s().max(f64::EPSILON))
                    .clamp(0.0, 1.0);
                let el = self.min_elevation_deg
                    + (w.peak_elevation_deg - self.min_elevation_deg)
                        * (std::f64::consts::PI * frac).sin();
                (el, frac)
            }
            None => (BELOW_MASK_ELEVATION_DEG, 0.0),
        };

        let distance_km = slant_range_km(track.altitude_km, elevation_deg.max(0.0));
        Some(VisibilitySample {
            elevation_deg,
            azimuth_deg: (track.raan_deg + 180.0 * progress).rem_euclid(360.0),
            distance_km,
            rsrp_dbm: nominal_rsrp_dbm(elevation_deg),
            sinr_db: 0.25 * elevation_deg - 3.0,
        })
    }
}
