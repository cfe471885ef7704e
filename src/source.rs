//! Source Client (§4.2): fetches one hour's raw snapshot from the upstream
//! balloon feed and filters out corrupted records. Grounded on
//! `sat_api::tle::TleFetcher`'s shape (a thin `reqwest::Client` wrapper with
//! one fetch-and-parse method per concern, logging counts rather than
//! failing the caller on partial corruption).

use std::time::Duration;

use tracing::{info, warn};

use crate::model::RawObservation;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct SourceClient {
    client: reqwest::Client,
    base_url: String,
}

impl SourceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .expect("reqwest client construction"),
            base_url: base_url.into(),
        }
    }

    /// Fetches and validates the snapshot for `offset` hours back from now
    /// (`offset` in `[0, 23]`). Never fails the caller: any HTTP, network, or
    /// parse problem is logged and an empty sequence is returned, per §4.2's
    /// result contract. Retry policy is the Ingest Controller's concern, not
    /// this client's.
    pub async fn fetch_hour(&self, offset: u32) -> Vec<RawObservation> {
        let url = format!("{}/{:02}.json", self.base_url, offset);

        let response = match self.client.get(&url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!("source fetch for offset {offset} failed: {err}");
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            warn!(
                "source fetch for offset {offset} returned HTTP {}",
                response.status()
            );
            return Vec::new();
        }

        let raw: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(err) => {
                warn!("source fetch for offset {offset} returned unparseable JSON: {err}");
                return Vec::new();
            }
        };

        let Some(array) = raw.as_array() else {
            warn!("source fetch for offset {offset} returned a non-array body");
            return Vec::new();
        };

        let total = array.len();
        let observations = parse_observations(array);

        let dropped = total.saturating_sub(observations.len());
        if dropped > 0 {
            info!(
                "source fetch for offset {offset}: kept {}/{} records, dropped {dropped}",
                observations.len(),
                total
            );
        }

        observations
    }
}

/// Parses one raw `[lat, lon, alt_km]` triple, or `None` if the shape
/// doesn't match. Public so the corruption-handling behavior (§8 property 5,
/// scenario S5) can be exercised against the shipped parsing path rather
/// than a copy of it.
pub fn parse_triple(value: &serde_json::Value) -> Option<RawObservation> {
    let arr = value.as_array()?;
    if arr.len() != 3 {
        return None;
    }
    let lat = arr[0].as_f64()?;
    let lon = arr[1].as_f64()?;
    let alt_km = arr[2].as_f64()?;
    Some(RawObservation { lat, lon, alt_km })
}

/// Parses and validates a whole batch of raw triples, dropping anything
/// malformed or out of range — the same two-stage filter `fetch_hour`
/// applies to a feed response.
pub fn parse_observations(array: &[serde_json::Value]) -> Vec<RawObservation> {
    array
        .iter()
        .filter_map(parse_triple)
        .filter(RawObservation::is_valid)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_valid_triple() {
        let v = json!([10.0, 20.0, 15.0]);
        let obs = parse_triple(&v).unwrap();
        assert_eq!(obs.lat, 10.0);
        assert_eq!(obs.lon, 20.0);
        assert_eq!(obs.alt_km, 15.0);
    }

    #[test]
    fn rejects_non_triples() {
        assert!(parse_triple(&json!([1.0, 2.0])).is_none());
        assert!(parse_triple(&json!("not an array")).is_none());
        assert!(parse_triple(&json!([1.0, 2.0, "three"])).is_none());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(!RawObservation {
            lat: 91.0,
            lon: 0.0,
            alt_km: 10.0
        }
        .is_valid());
        assert!(!RawObservation {
            lat: 0.0,
            lon: 0.0,
            alt_km: 200.0
        }
        .is_valid());
        assert!(!RawObservation {
            lat: f64::NAN,
            lon: 0.0,
            alt_km: 10.0
        }
        .is_valid());
    }

    #[test]
    fn accepts_mixed_corrupted_batch_keeping_only_valid() {
        let body = json!([
            [10.0, 20.0, 15.0],
            "garbage",
            [1.0, 2.0],
            [0.0, 0.0, 200.0],
            [f64::NAN, 1.0, 1.0],
            [5.0, 5.0, 5.0],
        ]);
        let array = body.as_array().unwrap();
        let observations: Vec<RawObservation> = array
            .iter()
            .filter_map(parse_triple)
            .filter(RawObservation::is_valid)
            .collect();
        assert_eq!(observations.len(), 2);
    }
}
