//! Property-law tests (§8) using `proptest`, the dev-dependency the teacher
//! already reaches for in `tests/property_test.rs`. Two laws are checked
//! here that unit tests elsewhere don't already cover end-to-end:
//! hard-gate enforcement across randomized tracker inputs, and corruption
//! robustness of the feed parser.

use balloon_track::model::RawObservation;
use balloon_track::source::parse_observations;
use balloon_track::tracker::{self, HistoryMap, MAX_ALT_DELTA_KM, MAX_DISTANCE_PER_HOUR_KM};
use proptest::prelude::*;

fn valid_lat() -> impl Strategy<Value = f64> {
    -89.0..89.0
}

fn valid_lon() -> impl Strategy<Value = f64> {
    -179.0..179.0
}

fn valid_alt() -> impl Strategy<Value = f64> {
    0.1..49.0
}

proptest! {
    /// Law 3: for any pair of consecutive tracked positions sharing an id,
    /// horizontal distance and altitude delta never exceed the hard gates.
    #[test]
    fn hard_gates_never_violated(
        prev_lat in valid_lat(), prev_lon in valid_lon(), prev_alt in valid_alt(),
        curr_lat in valid_lat(), curr_lon in valid_lon(), curr_alt in valid_alt(),
    ) {
        use balloon_track::id::IdCounter;
        use balloon_track::model::{TrackStatus, TrackedPosition};
        use chrono::{TimeZone, Utc};

        let counter = IdCounter::starting_at(1);
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let t1 = t0 + chrono::Duration::hours(1);

        let prev = vec![TrackedPosition {
            balloon_id: "balloon_0001".to_string(),
            timestamp: t0,
            lat: prev_lat,
            lon: prev_lon,
            alt_km: prev_alt,
            speed_kmh: None,
            heading_deg: None,
            status: TrackStatus::New,
            confidence: 1.0,
        }];

        let current = vec![RawObservation { lat: curr_lat, lon: curr_lon, alt_km: curr_alt }];
        let result = tracker::track(&current, &prev, &HistoryMap::new(), t1, &counter);

        for pos in &result {
            if pos.balloon_id == "balloon_0001" {
                let distance = balloon_track::geo::haversine_km((prev_lat, prev_lon), (pos.lat, pos.lon));
                let alt_delta = (pos.alt_km - prev_alt).abs();
                prop_assert!(distance <= MAX_DISTANCE_PER_HOUR_KM + 1e-6);
                prop_assert!(alt_delta <= MAX_ALT_DELTA_KM + 1e-6);
            }
        }
    }

    /// Law 5: arbitrary non-tuple / out-of-range junk mixed into a feed
    /// response never panics the parser and never drops a valid record.
    #[test]
    fn corruption_never_drops_valid_records_or_panics(
        valid_count in 1usize..50,
        junk_count in 0usize..50,
    ) {
        use serde_json::json;

        let mut records = Vec::new();
        for i in 0..valid_count {
            records.push(json!([((i % 170) as f64) - 85.0, 10.0, 5.0]));
        }
        for i in 0..junk_count {
            records.push(match i % 5 {
                0 => json!("not an array"),
                1 => json!([1.0]),
                2 => json!([200.0, 0.0, 5.0]),
                3 => json!([0.0, 0.0, -5.0]),
                _ => json!(null),
            });
        }

        let parsed = parse_observations(&records);

        prop_assert_eq!(parsed.len(), valid_count);
    }
}
