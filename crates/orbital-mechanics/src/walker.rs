//! Walker Delta constellation layout and pass synthesis
//!
//! Generates a repeatable candidate set with visibility windows for a single
//! observer site. Each plane crosses the site at a fixed orbital argument;
//! its ground-track offset from the site sets pass duration and peak elevation.

use crate::{
    Constellation, OrbitalElements, OrbitalError, Result, SatelliteCandidate, VisibilityWindow,
    EARTH_MU_KM3_S2, EARTH_RADIUS_KM,
};

/// Golden-ratio step that scatters plane offsets across [0, 1)
const PLANE_OFFSET_STEP: f64 = 0.618034000;
const PLANE_OFFSET_BASE: f64 = 0.137000000;

#[derive(Debug, Clone)]
pub struct WalkerDelta {
    pub total_satellites: u32,
    pub planes: u32,
    pub phasing: u32,
    pub altitude_km: f64,
    pub inclination_deg: f64,
}

impl WalkerDelta {
    /// 53° shell at 550 km
    pub fn starlink_shell() -> Self {
        WalkerDelta {
            total_satellites: 600,
            planes: 24,
            phasing: 1,
            altitude_km: 550.0,
            inclination_deg: 53.0,
        }
    }

    /// Near-polar shell at 1200 km
    pub fn oneweb_shell() -> Self {
        WalkerDelta {
            total_satellites: 200,
            planes: 10,
            phasing: 1,
            altitude_km: 1200.0,
            inclination_deg: 87.9,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.planes == 0 || self.total_satellites == 0 {
            return Err(OrbitalError::InvalidLayout(
                "planes and total_satellites must be positive".to_string(),
            ));
        }
        if self.total_satellites % self.planes != 0 {
            return Err(OrbitalError::InvalidLayout(format!(
                "{} satellites do not divide evenly into {} planes",
                self.total_satellites, self.planes
            )));
        }
        if self.phasing >= self.planes {
            return Err(OrbitalError::InvalidLayout(format!(
                "phasing {} must be below plane count {}",
                self.phasing, self.planes
            )));
        }
        Ok(())
    }

    pub fn satellites_per_plane(&self) -> u32 {
        self.total_satellites / self.planes
    }

    pub fn plane_spacing_deg(&self) -> f64 {
        360.0 / self.planes as f64
    }

    pub fn in_plane_spacing_deg(&self) -> f64 {
        360.0 / self.satellites_per_plane() as f64
    }

    /// Circular-orbit period from Kepler's third law
    pub fn orbital_period_s(&self) -> f64 {
        let a = EARTH_RADIUS_KM + self.altitude_km;
        2.0 * std::f64::consts::PI * (a.powi(3) / EARTH_MU_KM3_S2).sqrt()
    }

    pub fn elements(&self, plane: u32, slot: u32) -> Result<OrbitalElements> {
        let raan = plane as f64 * self.plane_spacing_deg();
        let anomaly = slot as f64 * self.in_plane_spacing_deg()
            + plane as f64 * self.phasing as f64 * 360.0 / self.total_satellites as f64;
        OrbitalElements::new(self.inclination_deg, raan, anomaly)
    }
}

/// Observer-side pass shape for a shell
#[derive(Debug, Clone)]
pub struct PassGeometry {
    /// Elevation mask (deg)
    pub min_elevation_deg: f64,
    /// Peak elevation for an overhead plane (deg)
    pub max_elevation_deg: f64,
    /// Shortest pass, in time steps, for the farthest plane
    pub base_pass_steps: f64,
    /// Extra steps an overhead plane gains
    pub pass_step_spread: f64,
    pub time_step_s: f64,
}

impl PassGeometry {
    pub fn starlink() -> Self {
        Self {
            min_elevation_deg: 5.0,
            max_elevation_deg: 85.0,
            base_pass_steps: 8.0,
            pass_step_spread: 6.0,
            time_step_s: 30.0,
        }
    }

    pub fn oneweb() -> Self {
        Self {
            min_elevation_deg: 10.0,
            max_elevation_deg: 80.0,
            base_pass_steps: 11.0,
            pass_step_spread: 6.0,
            time_step_s: 30.0,
        }
    }
}

/// Peak elevation and duration as a function of a plane's offset in [0, 1)
fn pass_shape(geometry: &PassGeometry, offset: f64) -> (f64, f64) {
    let closeness = 1.0 - offset;
    let duration_s =
        (geometry.base_pass_steps + geometry.pass_step_spread * closeness) * geometry.time_step_s;
    let peak = geometry.min_elevation_deg
        + (geometry.max_elevation_deg - geometry.min_elevation_deg) * closeness;
    (duration_s, peak)
}

/// Nominal RSRP seen at `elevation_deg`
pub fn nominal_rsrp_dbm(elevation_deg: f64) -> f64 {
    -105.0 + 0.3 * elevation_deg
}

/// Synthesize every satellite of `shell` with its windows over `[0, horizon_s)`
pub fn synthesize_candidates(
    constellation: Constellation,
    shell: &WalkerDelta,
    geometry: &PassGeometry,
    horizon_s: f64,
) -> Result<Vec<SatelliteCandidate>> {
    shell.validate()?;
    let period_s = shell.orbital_period_s();
    let prefix = match constellation {
        Constellation::Starlink => "SL",
        Constellation::OneWeb => "OW",
        Constellation::Kuiper => "KU",
    };

    let mut candidates = Vec::with_capacity(shell.total_satellites as usize);
    for plane in 0..shell.planes {
        let offset = (plane as f64 * PLANE_OFFSET_STEP + PLANE_OFFSET_BASE).rem_euclid(1.0);
        let (duration_s, peak) = pass_shape(geometry, offset);

        for slot in 0..shell.satellites_per_plane() {
            let elements = shell.elements(plane, slot)?;
            let crossing_deg = (elements.raan_deg * 1.7 + 41.0).rem_euclid(360.0);
            let first_start =
                (elements.mean_anomaly_deg - crossing_deg).rem_euclid(360.0) / 360.0 * period_s;

            // Start one period early so a pass already in progress at t=0 is kept
            let mut windows = Vec::new();
            let mut t = first_start - period_s;
            while t < horizon_s {
                let start = t.max(0.0);
                let end = (t + duration_s).min(horizon_s);
                if end > start {
                    windows.push(VisibilityWindow {
                        start_s: start,
                        end_s: end,
                        peak_elevation_deg: peak,
                        mean_rsrp_dbm: Some(nominal_rsrp_dbm(peak)),
                    });
                }
                t += period_s;
            }

            candidates.push(SatelliteCandidate {
                id: format!("{}-{}-{}", prefix, plane, slot),
                constellation,
                elements,
                windows,
            });
        }
    }

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starlink_shell_layout() {
        let shell = WalkerDelta::starlink_shell();
        assert!(shell.validate().is_ok());
        assert_eq!(shell.satellites_per_plane(), 25);
        assert!((shell.plane_spacing_deg() - 15.0).abs() < 1e-9);
        let period_min = shell.orbital_period_s() / 60.0;
        assert!((period_min - 95.65).abs() < 0.1);
    }

    #[test]
    fn test_invalid_layout_rejected() {
        let shell = WalkerDelta {
            total_satellites: 10,
            planes: 3,
            phasing: 1,
            altitude_km: 550.0,
            inclination_deg: 53.0,
        };
        assert!(shell.validate().is_err());
    }

    #[test]
    fn test_synthesis_is_repeatable() {
        let shell = WalkerDelta::oneweb_shell();
        let geom = PassGeometry::oneweb();
        let a = synthesize_candidates(Constellation::OneWeb, &shell, &geom, 6600.0).unwrap();
        let b = synthesize_candidates(Constellation::OneWeb, &shell, &geom, 6600.0).unwrap();
        assert_eq!(a.len(), 200);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.windows, y.windows);
        }
    }

    #[test]
    fn test_windows_inside_horizon() {
        let shell = WalkerDelta::starlink_shell();
        let geom = PassGeometry::starlink();
        let horizon = 6600.0;
        let sats = synthesize_candidates(Constellation::Starlink, &shell, &geom, horizon).unwrap();
        for sat in &sats {
            assert!(!sat.windows.is_empty(), "{} never passes", sat.id);
            for w in &sat.windows {
                assert!(w.start_s >= 0.0 && w.end_s <= horizon && w.end_s > w.start_s);
                assert!(w.peak_elevation_deg >= geom.min_elevation_deg);
            }
        }
    }
}
