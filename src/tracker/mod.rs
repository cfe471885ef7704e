//! Tracker (§4.5): assigns persistent ids across consecutive hourly
//! snapshots. Grounded on `sat_api::tracker::SatelliteTracker`'s shape (a
//! free function consuming the previous epoch's state plus the current
//! observations and returning the next epoch's state, no internal I/O), with
//! the spatial pre-filter contributed by the `rstar` usage in the
//! `pkvartsianyi-spatio` example — the teacher itself has no spatial index.
//!
//! The Tracker is pure: it takes a history snapshot by value (per the
//! design note on avoiding a stale in-memory cache racing the Store — the
//! Ingest Controller rebuilds `HistoryMap` from `trajectory()` each tick) and
//! returns the new tracked positions with no internal mutable state.

pub mod assignment;

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::geo::{bearing_deg, destination, haversine_km, heading_delta_deg, weighted_circular_mean_deg};
use crate::id::IdCounter;
use crate::model::{RawObservation, TrackStatus, TrackedPosition};

use self::assignment::{greedy_phase, hungarian_assign, REJECTED};

pub const MAX_DISTANCE_PER_HOUR_KM: f64 = 600.0;
pub const MAX_ALT_DELTA_KM: f64 = 10.0;
pub const MAX_DIR_CHANGE_DEG: f64 = 45.0;
const TYPICAL_HOURLY_DRIFT_KM: f64 = 150.0;
const KM_PER_DEGREE: f64 = 111.0;
const PREFILTER_HALF_WIDTH_FACTOR: f64 = 1.5;

const WEIGHT_DISTANCE: f64 = 0.15;
const WEIGHT_HEADING: f64 = 0.55;
const WEIGHT_SPEED: f64 = 0.10;
const WEIGHT_ALTITUDE: f64 = 0.20;
const HEADING_TERM_SPEED_FLOOR_KMH: f64 = 10.0;

const GREEDY_MAX_COST: f64 = 30.0;
const GREEDY_MAX_ALT_DELTA_KM: f64 = 5.0;
const HUNGARIAN_MAX_COST: f64 = 70.0;

const HISTORY_MAX_SEGMENTS: usize = 3;
const NEW_TRACK_CONFIDENCE: f64 = 0.5;
const FIRST_HOUR_CONFIDENCE: f64 = 1.0;
const MIN_MATCH_CONFIDENCE: f64 = 0.3;

/// One hour's worth of observed motion for an id, used to compute the
/// smoothed velocity that anchors the next hour's cost function.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub speed_kmh: f64,
    pub heading_deg: f64,
}

pub type HistoryMap = HashMap<String, VecDeque<Segment>>;

/// Builds the up-to-3-segment history an id needs for smoothed velocity,
/// from its most recent tracked positions (oldest first). Positions whose
/// speed/heading are `None` (the very first position of an id) are skipped.
pub fn history_from_trajectory(trajectory: &[TrackedPosition]) -> VecDeque<Segment> {
    trajectory
        .iter()
        .rev()
        .filter_map(|p| match (p.speed_kmh, p.heading_deg) {
            (Some(speed_kmh), Some(heading_deg)) => Some(Segment { speed_kmh, heading_deg }),
            _ => None,
        })
        .take(HISTORY_MAX_SEGMENTS)
        .collect::<VecDeque<_>>()
        .into_iter()
        .rev()
        .collect()
}

/// Given an id's history (oldest first, ≤3 entries), the weighted smoothed
/// `(speed_kmh, heading_deg)`, weights 1,2,3 newest-heaviest. Shared with the
/// Predictor, which anchors persistence extrapolation on the same smoothing.
pub fn smoothed_velocity(segments: &VecDeque<Segment>) -> Option<(f64, f64)> {
    if segments.is_empty() {
        return None;
    }
    let n = segments.len();
    let weighted_speed: f64 = segments
        .iter()
        .enumerate()
        .map(|(i, s)| s.speed_kmh * (i + 1) as f64)
        .sum();
    let weight_sum: f64 = (1..=n).map(|w| w as f64).sum();
    let speed = weighted_speed / weight_sum;

    let headings_and_weights: Vec<(f64, f64)> = segments
        .iter()
        .enumerate()
        .map(|(i, s)| (s.heading_deg, (i + 1) as f64))
        .collect();
    let heading = weighted_circular_mean_deg(&headings_and_weights)?;

    Some((speed, heading))
}

struct IndexedPrev {
    index: usize,
    lat: f64,
    lon: f64,
}

impl RTreeObject for IndexedPrev {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lon, self.lat])
    }
}

impl PointDistance for IndexedPrev {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.lon - point[0];
        let dy = self.lat - point[1];
        dx * dx + dy * dy
    }
}

struct CandidateCost {
    cost: f64,
    alt_delta: f64,
}

/// Per-candidate cost (§4.5): hard gates return `REJECTED`; otherwise the
/// weighted soft cost, scaled to a 0-100 range.
fn candidate_cost(prev: &TrackedPosition, curr: &RawObservation, history: Option<&VecDeque<Segment>>) -> CandidateCost {
    let prev_point = (prev.lat, prev.lon);
    let curr_point = (curr.lat, curr.lon);

    let distance_actual = haversine_km(prev_point, curr_point);
    let alt_delta = (curr.alt_km - prev.alt_km).abs();

    if distance_actual > MAX_DISTANCE_PER_HOUR_KM || alt_delta > MAX_ALT_DELTA_KM {
        return CandidateCost { cost: REJECTED, alt_delta };
    }

    let curr_heading = bearing_deg(prev_point, curr_point);

    // Hard gate uses the id's own last recorded velocity, not the smoothed
    // multi-segment average — §4.5 distinguishes "if prev carries a
    // velocity" (raw) from the smoothed anchor used in the soft cost below.
    if let (Some(_), Some(prev_heading_raw)) = (prev.speed_kmh, prev.heading_deg) {
        let implied_change = heading_delta_deg(prev_heading_raw, curr_heading).abs();
        if implied_change > MAX_DIR_CHANGE_DEG {
            return CandidateCost { cost: REJECTED, alt_delta };
        }
    }

    let smoothed = history.and_then(smoothed_velocity).or_else(|| match (prev.speed_kmh, prev.heading_deg) {
        (Some(speed), Some(heading)) => Some((speed, heading)),
        _ => None,
    });

    let d_pred = match smoothed {
        Some((speed, heading)) => {
            let predicted = destination(prev_point, heading, speed);
            haversine_km(predicted, curr_point)
        }
        None => distance_actual,
    };

    let distance_term = (d_pred / TYPICAL_HOURLY_DRIFT_KM).clamp(0.0, 1.0).powi(2);

    let heading_term = match smoothed {
        Some((prev_speed, prev_heading)) if prev_speed > HEADING_TERM_SPEED_FLOOR_KMH => {
            let delta = heading_delta_deg(prev_heading, curr_heading).abs();
            (delta / MAX_DIR_CHANGE_DEG).powi(3)
        }
        _ => 0.0,
    };

    let speed_term = match smoothed {
        Some((prev_speed, _)) if prev_speed > 0.0 && distance_actual > 0.0 => {
            (distance_actual / prev_speed).ln().abs() / 4.0_f64.ln()
        }
        _ => 0.0,
    }
    .min(1.0);

    let alt_term = (alt_delta / MAX_ALT_DELTA_KM).powi(2);

    let cost = 100.0
        * (WEIGHT_DISTANCE * distance_term
            + WEIGHT_HEADING * heading_term
            + WEIGHT_SPEED * speed_term
            + WEIGHT_ALTITUDE * alt_term);

    CandidateCost { cost, alt_delta }
}

/// Runs one hour of identity resolution. `current_obs` are untyped raw
/// positions at `timestamp`; `prev_tracked` are identified positions at
/// `timestamp - 1h`; `history` supplies each prior id's last-up-to-3
/// segments for smoothed-velocity prediction.
pub fn track(
    current_obs: &[RawObservation],
    prev_tracked: &[TrackedPosition],
    history: &HistoryMap,
    timestamp: DateTime<Utc>,
    id_counter: &IdCounter,
) -> Vec<TrackedPosition> {
    if prev_tracked.is_empty() {
        return current_obs
            .iter()
            .map(|obs| new_position(obs, timestamp, id_counter, FIRST_HOUR_CONFIDENCE))
            .collect();
    }

    let tree: RTree<IndexedPrev> = RTree::bulk_load(
        prev_tracked
            .iter()
            .enumerate()
            .map(|(index, p)| IndexedPrev { index, lat: p.lat, lon: p.lon })
            .collect(),
    );

    let half_width_deg = PREFILTER_HALF_WIDTH_FACTOR * MAX_DISTANCE_PER_HOUR_KM / KM_PER_DEGREE;

    let rows = current_obs.len();
    let cols = prev_tracked.len();
    let mut cost = vec![vec![REJECTED; cols]; rows];
    let mut alt_deltas = vec![vec![f64::MAX; cols]; rows];

    for (r, obs) in current_obs.iter().enumerate() {
        let envelope = AABB::from_corners(
            [obs.lon - half_width_deg, obs.lat - half_width_deg],
            [obs.lon + half_width_deg, obs.lat + half_width_deg],
        );
        for candidate in tree.locate_in_envelope_intersecting(&envelope) {
            let c = candidate.index;
            let prev = &prev_tracked[c];
            let candidate_history = history.get(&prev.balloon_id);
            let result = candidate_cost(prev, obs, candidate_history);
            cost[r][c] = result.cost;
            alt_deltas[r][c] = result.alt_delta;
        }
    }

    let (mut assignment, unmatched_rows, unmatched_cols) =
        greedy_phase(&cost, &alt_deltas, GREEDY_MAX_COST, GREEDY_MAX_ALT_DELTA_KM);

    if !unmatched_rows.is_empty() && !unmatched_cols.is_empty() {
        let deferred_cost: Vec<Vec<f64>> = unmatched_rows
            .iter()
            .map(|&r| unmatched_cols.iter().map(|&c| cost[r][c]).collect())
            .collect();

        let deferred_assignment = hungarian_assign(&deferred_cost);
        for (local_r, maybe_local_c) in deferred_assignment.into_iter().enumerate() {
            let r = unmatched_rows[local_r];
            if let Some(local_c) = maybe_local_c {
                let c = unmatched_cols[local_c];
                if cost[r][c] < HUNGARIAN_MAX_COST {
                    assignment[r] = Some(c);
                }
            }
        }
    }

    current_obs
        .iter()
        .enumerate()
        .map(|(r, obs)| match assignment[r] {
            Some(c) => matched_position(&prev_tracked[c], obs, timestamp, cost[r][c]),
            None => new_position(obs, timestamp, id_counter, NEW_TRACK_CONFIDENCE),
        })
        .collect()
}

fn matched_position(prev: &TrackedPosition, obs: &RawObservation, timestamp: DateTime<Utc>, cost: f64) -> TrackedPosition {
    let speed_kmh = haversine_km((prev.lat, prev.lon), (obs.lat, obs.lon));
    let heading_deg = bearing_deg((prev.lat, prev.lon), (obs.lat, obs.lon));
    let confidence = (-2.0 * cost / 100.0).exp().max(MIN_MATCH_CONFIDENCE);

    TrackedPosition {
        balloon_id: prev.balloon_id.clone(),
        timestamp,
        lat: obs.lat,
        lon: obs.lon,
        alt_km: obs.alt_km,
        speed_kmh: Some(speed_kmh),
        heading_deg: Some(heading_deg),
        status: TrackStatus::Active,
        confidence,
    }
}

fn new_position(
    obs: &RawObservation,
    timestamp: DateTime<Utc>,
    id_counter: &IdCounter,
    confidence: f64,
) -> TrackedPosition {
    TrackedPosition {
        balloon_id: id_counter.issue(),
        timestamp,
        lat: obs.lat,
        lon: obs.lon,
        alt_km: obs.alt_km,
        speed_kmh: None,
        heading_deg: None,
        status: TrackStatus::New,
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hour(n: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + n * 3600, 0).unwrap()
    }

    #[test]
    fn first_hour_mints_all_new_with_full_confidence() {
        let counter = IdCounter::starting_at(1);
        let obs = vec![
            RawObservation { lat: 10.0, lon: 20.0, alt_km: 15.0 },
            RawObservation { lat: -5.0, lon: 30.0, alt_km: 16.0 },
        ];
        let result = track(&obs, &[], &HashMap::new(), hour(0), &counter);
        assert_eq!(result.len(), 2);
        assert!(result.iter().all(|p| p.status == TrackStatus::New));
        assert!(result.iter().all(|p| p.confidence == FIRST_HOUR_CONFIDENCE));
    }

    #[test]
    fn continuity_match_preserves_id_for_small_drift() {
        let counter = IdCounter::starting_at(1);
        let prev = vec![TrackedPosition {
            balloon_id: "balloon_0001".to_string(),
            timestamp: hour(0),
            lat: 10.0,
            lon: 20.0,
            alt_km: 15.0,
            speed_kmh: None,
            heading_deg: None,
            status: TrackStatus::New,
            confidence: 1.0,
        }];
        // ~50 km east, well within the typical-drift budget.
        let obs = vec![RawObservation { lat: 10.0, lon: 20.45, alt_km: 15.2 }];
        let result = track(&obs, &prev, &HashMap::new(), hour(1), &counter);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].balloon_id, "balloon_0001");
        assert_eq!(result[0].status, TrackStatus::Active);
    }

    #[test]
    fn large_jump_mints_new_id_instead_of_matching() {
        let counter = IdCounter::starting_at(1);
        let prev = vec![TrackedPosition {
            balloon_id: "balloon_0001".to_string(),
            timestamp: hour(0),
            lat: 10.0,
            lon: 20.0,
            alt_km: 15.0,
            speed_kmh: None,
            heading_deg: None,
            status: TrackStatus::New,
            confidence: 1.0,
        }];
        // ~800 km away, beyond the hard gate.
        let obs = vec![RawObservation { lat: 17.2, lon: 20.0, alt_km: 15.0 }];
        let result = track(&obs, &prev, &HashMap::new(), hour(1), &counter);
        assert_eq!(result.len(), 1);
        assert_ne!(result[0].balloon_id, "balloon_0001");
        assert_eq!(result[0].status, TrackStatus::New);
    }

    #[test]
    fn swap_prevention_keeps_each_balloon_on_its_own_heading() {
        let counter = IdCounter::starting_at(1);
        // A heads east, B heads west; both histories show a prior eastward /
        // westward segment respectively so the heading-change term dominates.
        let prev = vec![
            TrackedPosition {
                balloon_id: "balloon_A".to_string(),
                timestamp: hour(0),
                lat: 0.0,
                lon: 0.0,
                alt_km: 15.0,
                speed_kmh: Some(100.0),
                heading_deg: Some(90.0),
                status: TrackStatus::Active,
                confidence: 0.9,
            },
            TrackedPosition {
                balloon_id: "balloon_B".to_string(),
                timestamp: hour(0),
                lat: 0.9,
                lon: 0.0,
                alt_km: 15.0,
                speed_kmh: Some(100.0),
                heading_deg: Some(270.0),
                status: TrackStatus::Active,
                confidence: 0.9,
            },
        ];
        let mut history = HistoryMap::new();
        history.insert(
            "balloon_A".to_string(),
            VecDeque::from([Segment { speed_kmh: 100.0, heading_deg: 90.0 }]),
        );
        history.insert(
            "balloon_B".to_string(),
            VecDeque::from([Segment { speed_kmh: 100.0, heading_deg: 270.0 }]),
        );

        // A continues east, B continues west; both end up roughly equidistant
        // from each other's previous point, but heading continuity should
        // keep them from swapping.
        let obs = vec![
            RawObservation { lat: 0.0, lon: 0.9, alt_km: 15.0 },
            RawObservation { lat: 0.9, lon: -0.9, alt_km: 15.0 },
        ];
        let result = track(&obs, &prev, &history, hour(1), &counter);
        let a_result = result.iter().find(|p| (p.lon - 0.9).abs() < 1e-6).unwrap();
        assert_eq!(a_result.balloon_id, "balloon_A");
    }

    #[test]
    fn history_from_trajectory_skips_first_position_and_caps_at_three() {
        let positions: Vec<TrackedPosition> = (0..5)
            .map(|i| TrackedPosition {
                balloon_id: "balloon_0001".to_string(),
                timestamp: hour(i),
                lat: 0.0,
                lon: 0.0,
                alt_km: 15.0,
                speed_kmh: if i == 0 { None } else { Some(100.0) },
                heading_deg: if i == 0 { None } else { Some(90.0) },
                status: TrackStatus::Active,
                confidence: 0.9,
            })
            .collect();
        let history = history_from_trajectory(&positions);
        assert_eq!(history.len(), HISTORY_MAX_SEGMENTS);
    }
}
