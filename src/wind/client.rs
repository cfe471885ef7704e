//! Wind Client (§4.3): batched fetch from the external atmospheric provider.
//! Grounded on `backend/src/n2yo_service.rs`'s thin-`reqwest::Client`-plus-
//! per-concern-method shape, and the Open-Meteo hourly response shape used
//! by the weather clients in the retrieval pack (`hourly.time[]` alongside
//! parallel per-variable arrays, local-naive timestamps treated as UTC).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, TimeZone, Utc};
use tracing::{debug, info, warn};

use crate::model::WindVector;
use crate::wind::cache::{CacheKey, WindCache};

/// Barometric approximation constants (§4.3 step 1).
const SEA_LEVEL_PRESSURE_HPA: f64 = 1013.25;
const SCALE_HEIGHT_KM: f64 = 7.4;

const PRESSURE_LADDER_HPA: &[u32] = &[
    1000, 975, 950, 925, 900, 850, 800, 700, 600, 500, 400, 300, 250, 200, 150, 100, 70, 50, 30,
];

const MAX_LOCATIONS_PER_REQUEST: usize = 300;
const MAX_FRAMING_DAYS: i64 = 3;
const BINDING_TOLERANCE_MINUTES: i64 = 90;
const RATE_LIMIT_SLEEP_SECS: u64 = 10;
const BATCH_PACING_SECS: u64 = 1;

#[derive(Debug, Clone, Copy)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub alt_km: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

pub struct WindClient {
    client: reqwest::Client,
    base_url: String,
    cache: Arc<WindCache>,
}

impl WindClient {
    pub fn new(base_url: impl Into<String>, cache: Arc<WindCache>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            cache,
        }
    }

    /// Resolves a wind vector for every requested location, consulting the
    /// cache first and only hitting the network for misses, grouped by
    /// pressure level and spatially batched. Never fails the caller: a
    /// location whose batch was rate-limited or unresolvable is simply
    /// absent from the returned map, and callers (the Predictor) fall back
    /// to persistence for it.
    pub async fn wind_for(&self, locations: &[Location]) -> HashMap<CacheKey, WindVector> {
        let mut resolved = HashMap::new();
        let mut misses: Vec<Location> = Vec::new();

        for loc in locations {
            let hour = loc.timestamp.unwrap_or_else(Utc::now);
            let key = CacheKey::new(loc.lat, loc.lon, loc.alt_km, hour);
            if let Some(vector) = self.cache.get(&key).await {
                resolved.insert(key, vector);
            } else {
                misses.push(*loc);
            }
        }

        if misses.is_empty() {
            return resolved;
        }

        let groups = group_by_pressure_level(&misses);
        let mut first_batch = true;

        for (pressure_hpa, group) in groups {
            for chunk in group.chunks(MAX_LOCATIONS_PER_REQUEST) {
                if !first_batch {
                    tokio::time::sleep(StdDuration::from_secs(BATCH_PACING_SECS)).await;
                }
                first_batch = false;

                match self.fetch_batch(pressure_hpa, chunk).await {
                    Ok(batch_results) => {
                        for (key, vector) in batch_results {
                            self.cache.insert(key, vector).await;
                            resolved.insert(key, vector);
                        }
                    }
                    Err(BatchError::RateLimited) => {
                        warn!(
                            "wind provider rate limited pressure-level {pressure_hpa}hPa batch of {}, skipping",
                            chunk.len()
                        );
                        tokio::time::sleep(StdDuration::from_secs(RATE_LIMIT_SLEEP_SECS)).await;
                    }
                    Err(BatchError::Other(msg)) => {
                        warn!("wind fetch failed for pressure-level {pressure_hpa}hPa batch: {msg}");
                    }
                }
            }
        }

        resolved
    }

    async fn fetch_batch(
        &self,
        pressure_hpa: u32,
        locations: &[Location],
    ) -> Result<Vec<(CacheKey, WindVector)>, BatchError> {
        let now = Utc::now();
        let min_ts = locations
            .iter()
            .map(|l| l.timestamp.unwrap_or(now))
            .min()
            .unwrap_or(now);
        let max_ts = locations
            .iter()
            .map(|l| l.timestamp.unwrap_or(now))
            .max()
            .unwrap_or(now);

        let past_days = days_behind(now, min_ts);
        let forecast_days = days_ahead(now, max_ts);

        let lat_csv = locations
            .iter()
            .map(|l| format!("{:.4}", l.lat))
            .collect::<Vec<_>>()
            .join(",");
        let lon_csv = locations
            .iter()
            .map(|l| format!("{:.4}", l.lon))
            .collect::<Vec<_>>()
            .join(",");

        let url = format!(
            "{}?latitude={lat_csv}&longitude={lon_csv}&hourly=wind_speed_{p}hPa,wind_direction_{p}hPa&past_days={past_days}&forecast_days={forecast_days}&timezone=UTC",
            self.base_url,
            p = pressure_hpa,
        );

        debug!("fetching wind batch: {} locations at {pressure_hpa}hPa", locations.len());

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BatchError::Other(e.to_string()))?;

        if response.status().as_u16() == 429 {
            return Err(BatchError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(BatchError::Other(format!("HTTP {}", response.status())));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BatchError::Other(e.to_string()))?;

        let per_location = match &body {
            serde_json::Value::Array(items) => items.iter().collect::<Vec<_>>(),
            serde_json::Value::Object(_) => vec![&body],
            _ => return Err(BatchError::Other("unexpected response shape".to_string())),
        };

        if per_location.len() != locations.len() {
            warn!(
                "wind provider returned {} entries for {} requested locations",
                per_location.len(),
                locations.len()
            );
        }

        let mut out = Vec::new();
        for (loc, entry) in locations.iter().zip(per_location.into_iter()) {
            let wanted = loc.timestamp.unwrap_or(now);
            if let Some(vector) = bind_response(entry, pressure_hpa, *loc, wanted) {
                let key = CacheKey::new(loc.lat, loc.lon, loc.alt_km, wanted);
                out.push((key, vector));
            }
        }

        info!(
            "resolved {}/{} locations at {pressure_hpa}hPa",
            out.len(),
            locations.len()
        );

        Ok(out)
    }
}

enum BatchError {
    RateLimited,
    Other(String),
}

/// Converts altitude to the nearest supported pressure level (§4.3 step 1).
pub fn nearest_pressure_level(alt_km: f64) -> u32 {
    let pressure = SEA_LEVEL_PRESSURE_HPA * (-alt_km / SCALE_HEIGHT_KM).exp();
    PRESSURE_LADDER_HPA
        .iter()
        .copied()
        .min_by(|a, b| {
            (*a as f64 - pressure)
                .abs()
                .partial_cmp(&(*b as f64 - pressure).abs())
                .unwrap()
        })
        .unwrap_or(*PRESSURE_LADDER_HPA.last().unwrap())
}

/// Inverse of the barometric approximation: the altitude whose nearest
/// standard pressure level is `pressure_hpa`. Used by the wind-field grid
/// endpoint, which accepts either a pressure or an altitude axis.
pub fn altitude_for_pressure(pressure_hpa: f64) -> f64 {
    -SCALE_HEIGHT_KM * (pressure_hpa / SEA_LEVEL_PRESSURE_HPA).ln()
}

fn group_by_pressure_level(locations: &[Location]) -> Vec<(u32, Vec<Location>)> {
    let mut groups: HashMap<u32, Vec<Location>> = HashMap::new();
    for loc in locations {
        groups
            .entry(nearest_pressure_level(loc.alt_km))
            .or_default()
            .push(*loc);
    }
    let mut out: Vec<_> = groups.into_iter().collect();
    out.sort_by_key(|(pressure, _)| *pressure);
    out
}

fn days_behind(now: DateTime<Utc>, ts: DateTime<Utc>) -> i64 {
    let hours = (now - ts).num_hours().max(0);
    ((hours + 23) / 24).clamp(0, MAX_FRAMING_DAYS)
}

fn days_ahead(now: DateTime<Utc>, ts: DateTime<Utc>) -> i64 {
    let hours = (ts - now).num_hours().max(0);
    ((hours + 23) / 24).clamp(0, MAX_FRAMING_DAYS)
}

/// Picks the response hour closest to `wanted` and converts it into a
/// `WindVector`, or `None` if the closest candidate is more than the
/// binding tolerance away (§4.3 step 4) or the payload is malformed.
fn bind_response(
    entry: &serde_json::Value,
    pressure_hpa: u32,
    loc: Location,
    wanted: DateTime<Utc>,
) -> Option<WindVector> {
    let hourly = entry.get("hourly")?;
    let times = hourly.get("time")?.as_array()?;

    let speed_key = format!("wind_speed_{pressure_hpa}hPa");
    let dir_key = format!("wind_direction_{pressure_hpa}hPa");
    let speeds = hourly.get(&speed_key)?.as_array()?;
    let dirs = hourly.get(&dir_key)?.as_array()?;

    let mut best_idx = None;
    let mut best_diff = i64::MAX;
    for (i, t) in times.iter().enumerate() {
        let Some(ts) = parse_naive_as_utc(t.as_str()?) else {
            continue;
        };
        let diff = (ts - wanted).num_minutes().abs();
        if diff < best_diff {
            best_diff = diff;
            best_idx = Some((i, ts));
        }
    }

    let (idx, bound_hour) = best_idx?;
    if best_diff > BINDING_TOLERANCE_MINUTES {
        return None;
    }

    let speed_kmh = speeds.get(idx)?.as_f64()?;
    let direction_from_deg = dirs.get(idx)?.as_f64()?;

    let speed_ms = speed_kmh / 3.6;
    let theta = direction_from_deg.to_radians();
    let u_ms = -speed_ms * theta.sin();
    let v_ms = -speed_ms * theta.cos();

    Some(WindVector {
        lat: loc.lat,
        lon: loc.lon,
        alt_km: loc.alt_km,
        pressure_hpa: pressure_hpa as f64,
        u_ms,
        v_ms,
        speed_kmh,
        direction_from_deg,
        timestamp_hour: bound_hour,
    })
}

/// The provider returns local-naive ISO8601 strings which are treated as UTC
/// (§6, Atmospheric wind provider): `timezone=UTC` is always passed, so no
/// offset conversion is needed, only parsing.
fn parse_naive_as_utc(s: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}
