use chrono::NaiveDateTime;
use serde::Serialize;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Coordinates as claimed by a web/mobile client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoClaim {
    pub lat: f64,
    pub lon: f64,
    pub accuracy_m: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct GeofencePolicy {
    pub radius_m: f64,
    pub accuracy_ceiling_m: f64,
    pub max_speed_kmh: f64,
}

/// Distinct rejection kinds so clients can tell the user why. An
/// implausible jump is reported as spoofing, not as merely out of range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeofenceViolation {
    OutOfRange { distance_m: f64, radius_m: f64 },
    LowAccuracy { accuracy_m: f64, ceiling_m: f64 },
    ImplausibleMovement { speed_kmh: f64, limit_kmh: f64 },
}

impl std::fmt::Display for GeofenceViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeofenceViolation::OutOfRange { distance_m, radius_m } => write!(
                f,
                "location {distance_m:.0}m from branch, allowed radius {radius_m:.0}m"
            ),
            GeofenceViolation::LowAccuracy { accuracy_m, ceiling_m } => write!(
                f,
                "location accuracy {accuracy_m:.0}m worse than ceiling {ceiling_m:.0}m"
            ),
            GeofenceViolation::ImplausibleMovement { speed_kmh, limit_kmh } => write!(
                f,
                "implied movement {speed_kmh:.0}km/h exceeds plausible {limit_kmh:.0}km/h"
            ),
        }
    }
}

impl GeofenceViolation {
    pub fn kind(&self) -> &'static str {
        match self {
            GeofenceViolation::OutOfRange { .. } => "out_of_range",
            GeofenceViolation::LowAccuracy { .. } => "low_accuracy",
            GeofenceViolation::ImplausibleMovement { .. } => "implausible_movement",
        }
    }
}

/// Great-circle distance in meters (haversine).
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Validate a claimed fix against the branch reference point.
///
/// Checked in order: accuracy ceiling, movement plausibility against the
/// subject's last located punch, then the radius itself. Returns the
/// distance on success so callers can log it. Advisory input to
/// ingestion: only user-initiated punches go through here, terminals are
/// physically fixed.
pub fn validate(
    claim: GeoClaim,
    reference: GeoPoint,
    policy: GeofencePolicy,
    last_fix: Option<(GeoPoint, NaiveDateTime)>,
    now: NaiveDateTime,
) -> Result<f64, GeofenceViolation> {
    if claim.accuracy_m > policy.accuracy_ceiling_m {
        return Err(GeofenceViolation::LowAccuracy {
            accuracy_m: claim.accuracy_m,
            ceiling_m: policy.accuracy_ceiling_m,
        });
    }

    let here = GeoPoint {
        lat: claim.lat,
        lon: claim.lon,
    };

    if let Some((prev, prev_at)) = last_fix {
        let elapsed_s = (now - prev_at).num_seconds();
        if elapsed_s > 0 {
            let moved_m = haversine_m(prev, here);
            let speed_kmh = moved_m / elapsed_s as f64 * 3.6;
            if speed_kmh > policy.max_speed_kmh {
                return Err(GeofenceViolation::ImplausibleMovement {
                    speed_kmh,
                    limit_kmh: policy.max_speed_kmh,
                });
            }
        }
    }

    let distance_m = haversine_m(here, reference);
    if distance_m > policy.radius_m {
        return Err(GeofenceViolation::OutOfRange {
            distance_m,
            radius_m: policy.radius_m,
        });
    }

    Ok(distance_m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const BRANCH: GeoPoint = GeoPoint {
        lat: 23.8103,
        lon: 90.4125,
    };

    fn policy() -> GeofencePolicy {
        GeofencePolicy {
            radius_m: 100.0,
            accuracy_ceiling_m: 100.0,
            max_speed_kmh: 150.0,
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    /// Offset a point north by roughly `m` meters.
    fn north_of(p: GeoPoint, m: f64) -> GeoPoint {
        GeoPoint {
            lat: p.lat + m / 111_320.0,
            lon: p.lon,
        }
    }

    #[test]
    fn haversine_zero_for_same_point() {
        assert!(haversine_m(BRANCH, BRANCH) < 1e-6);
    }

    #[test]
    fn haversine_known_offset() {
        let d = haversine_m(BRANCH, north_of(BRANCH, 150.0));
        assert!((d - 150.0).abs() < 1.0, "got {d}");
    }

    #[test]
    fn inside_radius_passes() {
        let p = north_of(BRANCH, 50.0);
        let claim = GeoClaim {
            lat: p.lat,
            lon: p.lon,
            accuracy_m: 20.0,
        };
        let d = validate(claim, BRANCH, policy(), None, at(9, 0)).unwrap();
        assert!(d < 100.0);
    }

    #[test]
    fn out_of_range_is_distinct() {
        let p = north_of(BRANCH, 150.0);
        let claim = GeoClaim {
            lat: p.lat,
            lon: p.lon,
            accuracy_m: 20.0,
        };
        let err = validate(claim, BRANCH, policy(), None, at(9, 0)).unwrap_err();
        assert_eq!(err.kind(), "out_of_range");
    }

    #[test]
    fn low_accuracy_wins_over_out_of_range() {
        // Same 150m offset, but a 500m accuracy claim: the fix itself is
        // unusable and must be reported as such, not as out-of-range.
        let p = north_of(BRANCH, 150.0);
        let claim = GeoClaim {
            lat: p.lat,
            lon: p.lon,
            accuracy_m: 500.0,
        };
        let err = validate(claim, BRANCH, policy(), None, at(9, 0)).unwrap_err();
        assert_eq!(err.kind(), "low_accuracy");
    }

    #[test]
    fn teleporting_subject_is_spoofing() {
        // 50km away from the last fix one minute ago: ~3000km/h.
        let claim = GeoClaim {
            lat: BRANCH.lat,
            lon: BRANCH.lon,
            accuracy_m: 10.0,
        };
        let far = north_of(BRANCH, 50_000.0);
        let err = validate(claim, BRANCH, policy(), Some((far, at(8, 59))), at(9, 0)).unwrap_err();
        assert_eq!(err.kind(), "implausible_movement");
    }

    #[test]
    fn slow_movement_passes_plausibility() {
        let claim = GeoClaim {
            lat: BRANCH.lat,
            lon: BRANCH.lon,
            accuracy_m: 10.0,
        };
        let near = north_of(BRANCH, 500.0);
        // 500m in 30 minutes: walking pace.
        let d = validate(claim, BRANCH, policy(), Some((near, at(8, 30))), at(9, 0)).unwrap();
        assert!(d < 1.0);
    }
}
