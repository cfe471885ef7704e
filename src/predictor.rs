//! Predictor (§4.6): fuses persistence and wind-drift extrapolation into
//! future positions, and scores a method's historical accuracy against a
//! held-out trajectory suffix. Grounded on `sat_api::tracker`'s forward
//! propagation style (iteratively stepping an anchor position hour by hour)
//! combined with the Wind Client this crate built for §4.3.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;

use crate::error::{BalloonError, Result};
use crate::geo::{destination, haversine_km};
use crate::model::{PredictedPosition, PredictionMethod, ScoredHour, TrackedPosition, ValueScore};
use crate::store::SnapshotStore;
use crate::tracker::{history_from_trajectory, smoothed_velocity};
use crate::wind::{CacheKey, Location, WindClient};

const HYBRID_WIND_WEIGHT: f64 = 0.6;
const HYBRID_PERSISTENCE_WEIGHT: f64 = 0.4;

const PERSISTENCE_CONFIDENCE_BASE: f64 = 0.8;
const PERSISTENCE_CONFIDENCE_SLOPE: f64 = 0.15;
const PERSISTENCE_CONFIDENCE_FLOOR: f64 = 0.2;

const WIND_CONFIDENCE_BASE: f64 = 0.9;
const WIND_CONFIDENCE_SLOPE: f64 = 0.12;
const WIND_CONFIDENCE_FLOOR: f64 = 0.3;
const WIND_UNAVAILABLE_CONFIDENCE: f64 = 0.3;

const HYBRID_CONFIDENCE_BASE: f64 = 0.95;
const HYBRID_CONFIDENCE_SLOPE: f64 = 0.1;
const HYBRID_CONFIDENCE_FLOOR: f64 = 0.4;

pub struct Predictor {
    store: Arc<dyn SnapshotStore>,
    wind_client: Arc<WindClient>,
}

impl Predictor {
    pub fn new(store: Arc<dyn SnapshotStore>, wind_client: Arc<WindClient>) -> Self {
        Self { store, wind_client }
    }

    /// Predicts `hours` steps ahead from the trajectory's last known
    /// position, each predicted point becoming the anchor for the next.
    pub async fn predict_future(
        &self,
        trajectory: &[TrackedPosition],
        hours: u32,
        method: PredictionMethod,
    ) -> Vec<PredictedPosition> {
        let Some(last) = trajectory.last() else {
            return Vec::new();
        };

        let smoothed = smoothed_velocity(&history_from_trajectory(trajectory));

        let mut anchor_lat = last.lat;
        let mut anchor_lon = last.lon;
        let mut anchor_time = last.timestamp;
        let mut out = Vec::with_capacity(hours as usize);

        for k in 1..=hours {
            anchor_time += ChronoDuration::hours(1);

            let (lat, lon, confidence) = match method {
                PredictionMethod::Persistence => {
                    let (point, _) = persistence_step((anchor_lat, anchor_lon), smoothed);
                    (point.0, point.1, persistence_confidence(k))
                }
                PredictionMethod::Wind => {
                    match self.wind_step(anchor_lat, anchor_lon, last.alt_km, anchor_time).await {
                        Some(point) => (point.0, point.1, wind_confidence(k)),
                        None => (anchor_lat, anchor_lon, WIND_UNAVAILABLE_CONFIDENCE),
                    }
                }
                PredictionMethod::Hybrid => {
                    let (persistence_point, _) = persistence_step((anchor_lat, anchor_lon), smoothed);
                    let wind_point = self
                        .wind_step(anchor_lat, anchor_lon, last.alt_km, anchor_time)
                        .await
                        .unwrap_or(persistence_point);
                    let point = convex_combine(wind_point, persistence_point);
                    (point.0, point.1, hybrid_confidence(k))
                }
            };

            out.push(PredictedPosition {
                lat,
                lon,
                alt_km: last.alt_km,
                timestamp: anchor_time,
                confidence,
                method,
            });

            anchor_lat = lat;
            anchor_lon = lon;
        }

        out
    }

    /// `score(id, hours, method)` (§4.6): mean 1h-ahead prediction error over
    /// up to `hours` held-out steps of the id's actual trajectory.
    pub async fn score(&self, balloon_id: &str, hours: u32, method: PredictionMethod) -> Result<ValueScore> {
        let trajectory = self.store.trajectory(balloon_id).await?;
        if trajectory.len() < 2 {
            return Err(BalloonError::InvalidArgument(format!(
                "balloon {balloon_id} has fewer than 2 tracked positions, cannot score"
            )));
        }

        let n = (hours as usize).min(trajectory.len() - 1);

        let wind_map = if matches!(method, PredictionMethod::Wind | PredictionMethod::Hybrid) {
            let locations: Vec<Location> = trajectory[..n]
                .iter()
                .map(|p| Location {
                    lat: p.lat,
                    lon: p.lon,
                    alt_km: p.alt_km,
                    timestamp: Some(p.timestamp),
                })
                .collect();
            self.wind_client.wind_for(&locations).await
        } else {
            Default::default()
        };

        let mut hours_scored = Vec::with_capacity(n);
        let mut total_error = 0.0;

        for i in 0..n {
            let anchor = &trajectory[i];
            let actual = &trajectory[i + 1];

            // The trajectory's very first position never carries a
            // speed/heading (the Tracker has nothing to derive one from),
            // so no smoothed velocity exists to extrapolate from yet. An
            // anchor this early can't be scored against persistence at
            // all; skip it rather than falsely charging it the full
            // stationary-guess error.
            let Some(persistence_smoothed) = smoothed_velocity(&history_from_trajectory(&trajectory[..=i])) else {
                continue;
            };
            let (persistence_point, _) = persistence_step((anchor.lat, anchor.lon), Some(persistence_smoothed));

            let wind_point = wind_map
                .get(&CacheKey::new(anchor.lat, anchor.lon, anchor.alt_km, anchor.timestamp))
                .map(|vector| wind_displacement((anchor.lat, anchor.lon), vector.speed_kmh, vector.direction_from_deg));

            let predicted = match method {
                PredictionMethod::Persistence => persistence_point,
                PredictionMethod::Wind => wind_point.unwrap_or(persistence_point),
                PredictionMethod::Hybrid => convex_combine(wind_point.unwrap_or(persistence_point), persistence_point),
            };

            let error_km = haversine_km(predicted, (actual.lat, actual.lon));
            total_error += error_km;
            hours_scored.push(ScoredHour {
                hour: i as u32,
                actual: (actual.lat, actual.lon),
                predicted,
                error_km,
            });
        }

        let scored_count = hours_scored.len();
        let overall_value_score = if scored_count > 0 { total_error / scored_count as f64 } else { 0.0 };

        Ok(ValueScore {
            balloon_id: balloon_id.to_string(),
            method,
            hours: hours_scored,
            overall_value_score,
        })
    }

    async fn wind_step(
        &self,
        lat: f64,
        lon: f64,
        alt_km: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Option<(f64, f64)> {
        let locations = [Location { lat, lon, alt_km, timestamp: Some(timestamp) }];
        let map = self.wind_client.wind_for(&locations).await;
        let key = CacheKey::new(lat, lon, alt_km, timestamp);
        map.get(&key).map(|vector| wind_displacement((lat, lon), vector.speed_kmh, vector.direction_from_deg))
    }
}

/// Displaces 1h along the smoothed `(speed, heading)`; returns the point and
/// echoes the smoothed pair back for callers that also want it (`predict_future`
/// currently discards it, `score` needs only the point).
fn persistence_step(anchor: (f64, f64), smoothed: Option<(f64, f64)>) -> ((f64, f64), Option<(f64, f64)>) {
    match smoothed {
        Some((speed, heading)) => (destination(anchor, heading, speed), smoothed),
        None => (anchor, None),
    }
}

/// Wind direction is "from" bearing (meteorological convention); the
/// displacement travels the reciprocal bearing, the direction the air is
/// actually moving toward.
fn wind_displacement(anchor: (f64, f64), speed_kmh: f64, direction_from_deg: f64) -> (f64, f64) {
    let bearing_toward = (direction_from_deg + 180.0) % 360.0;
    destination(anchor, bearing_toward, speed_kmh)
}

fn convex_combine(wind_point: (f64, f64), persistence_point: (f64, f64)) -> (f64, f64) {
    (
        HYBRID_WIND_WEIGHT * wind_point.0 + HYBRID_PERSISTENCE_WEIGHT * persistence_point.0,
        HYBRID_WIND_WEIGHT * wind_point.1 + HYBRID_PERSISTENCE_WEIGHT * persistence_point.1,
    )
}

fn persistence_confidence(k: u32) -> f64 {
    (PERSISTENCE_CONFIDENCE_BASE - PERSISTENCE_CONFIDENCE_SLOPE * k as f64).max(PERSISTENCE_CONFIDENCE_FLOOR)
}

fn wind_confidence(k: u32) -> f64 {
    (WIND_CONFIDENCE_BASE - WIND_CONFIDENCE_SLOPE * k as f64).max(WIND_CONFIDENCE_FLOOR)
}

fn hybrid_confidence(k: u32) -> f64 {
    (HYBRID_CONFIDENCE_BASE - HYBRID_CONFIDENCE_SLOPE * k as f64).max(HYBRID_CONFIDENCE_FLOOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TrackStatus;
    use crate::store::InMemoryStore;
    use crate::wind::WindCache;
    use chrono::{TimeZone, Utc};

    fn hour(n: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + n * 3600, 0).unwrap()
    }

    fn make_predictor() -> Predictor {
        let store: Arc<dyn SnapshotStore> = Arc::new(InMemoryStore::new());
        let wind_client = Arc::new(WindClient::new("http://unused.invalid", Arc::new(WindCache::new())));
        Predictor::new(store, wind_client)
    }

    /// A trajectory generated by exactly the persistence formula (100 km/h
    /// due east) should score 0 under `method=persistence` (§8 property 7 /
    /// scenario S4).
    fn straight_line_east_trajectory(len: usize) -> Vec<TrackedPosition> {
        let mut positions = Vec::with_capacity(len);
        let mut lat = 0.0;
        let mut lon = 0.0;
        for i in 0..len {
            let (speed, heading) = if i == 0 { (None, None) } else { (Some(100.0), Some(90.0)) };
            positions.push(TrackedPosition {
                balloon_id: "balloon_0001".to_string(),
                timestamp: hour(i as i64),
                lat,
                lon,
                alt_km: 15.0,
                speed_kmh: speed,
                heading_deg: heading,
                status: if i == 0 { TrackStatus::New } else { TrackStatus::Active },
                confidence: 1.0,
            });
            if i + 1 < len {
                let next = destination((lat, lon), 90.0, 100.0);
                lat = next.0;
                lon = next.1;
            }
        }
        positions
    }

    #[tokio::test]
    async fn persistence_score_is_zero_for_matching_synthetic_trajectory() {
        let predictor = make_predictor();
        let trajectory = straight_line_east_trajectory(6);
        for pos in &trajectory {
            predictor.store.put_tracked(vec![pos.clone()]).await.unwrap();
        }

        let score = predictor
            .score("balloon_0001", 5, PredictionMethod::Persistence)
            .await
            .unwrap();
        // hour 0's anchor is the trajectory's first position, which has no
        // derivable smoothed velocity yet and is skipped (see `score`).
        assert_eq!(score.hours.len(), 4);
        assert!(score.overall_value_score < 1e-6, "got {}", score.overall_value_score);
    }

    #[tokio::test]
    async fn score_rejects_trajectories_shorter_than_two() {
        let predictor = make_predictor();
        predictor
            .store
            .put_tracked(vec![straight_line_east_trajectory(1).remove(0)])
            .await
            .unwrap();

        let result = predictor.score("balloon_0001", 5, PredictionMethod::Persistence).await;
        assert!(matches!(result, Err(BalloonError::InvalidArgument(_))));
    }

    #[test]
    fn confidence_is_monotonically_non_increasing_with_horizon() {
        for k in 1..12 {
            assert!(persistence_confidence(k) >= persistence_confidence(k + 1));
            assert!(wind_confidence(k) >= wind_confidence(k + 1));
            assert!(hybrid_confidence(k) >= hybrid_confidence(k + 1));
        }
    }

    #[test]
    fn wind_displacement_follows_reciprocal_of_from_bearing() {
        // Wind from the east (90) blows toward the west: longitude decreases.
        let (lat, lon) = wind_displacement((0.0, 0.0), 50.0, 90.0);
        assert!(lon < 0.0);
        assert!((lat).abs() < 0.5);
    }
}
