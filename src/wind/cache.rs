//! Wind Cache: a bounded, TTL'd lookup of wind vectors keyed by the
//! quantized `(lat_bucket, lon_bucket, alt_bucket, hour)` tuple (§4.3). It is
//! a pure consumer of an opaque key — the design notes call out avoiding a
//! two-way dependency between the Predictor and the Store by keeping this
//! cache standalone rather than folding it into `SnapshotStore`.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;

use crate::model::WindVector;

/// "Current" entries (queried within the last 30 minutes of being inserted)
/// are trusted; anything older is refetched. No entry survives past 48h
/// regardless of how often it's hit (§6, Persisted layout).
const CURRENT_TTL_SECS: u64 = 30 * 60;
const ABSOLUTE_RETENTION_HOURS: i64 = 48;
const MAX_ENTRIES: usize = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub lat_bucket: i64,
    pub lon_bucket: i64,
    pub alt_bucket: i64,
    pub hour: i64,
}

impl CacheKey {
    /// Rounds to the nearest 0.1 degree/km and the hour epoch, per §4.3's
    /// cache-key rationale (0.1 degree ~= 11 km, within the tracker's error
    /// budget).
    pub fn new(lat: f64, lon: f64, alt_km: f64, hour: DateTime<Utc>) -> Self {
        Self {
            lat_bucket: (lat * 10.0).round() as i64,
            lon_bucket: (lon * 10.0).round() as i64,
            alt_bucket: (alt_km * 10.0).round() as i64,
            hour: hour.timestamp() / 3600,
        }
    }
}

struct Entry {
    vector: WindVector,
    inserted_at: Instant,
    inserted_at_utc: DateTime<Utc>,
}

pub struct WindCache {
    entries: RwLock<HashMap<CacheKey, Entry>>,
}

impl WindCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<WindVector> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.inserted_at.elapsed().as_secs() > CURRENT_TTL_SECS {
            return None;
        }
        Some(entry.vector)
    }

    pub async fn insert(&self, key: CacheKey, vector: WindVector) {
        let mut entries = self.entries.write().await;
        if entries.len() >= MAX_ENTRIES && !entries.contains_key(&key) {
            self.evict_oldest(&mut entries);
        }
        entries.insert(
            key,
            Entry {
                vector,
                inserted_at: Instant::now(),
                inserted_at_utc: Utc::now(),
            },
        );
    }

    /// Drops every entry older than the absolute retention window,
    /// independent of the per-read TTL check in `get`.
    pub async fn prune_expired(&self) {
        let cutoff = Utc::now() - ChronoDuration::hours(ABSOLUTE_RETENTION_HOURS);
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.inserted_at_utc >= cutoff);
    }

    fn evict_oldest(&self, entries: &mut HashMap<CacheKey, Entry>) {
        if let Some(oldest_key) = entries
            .iter()
            .min_by_key(|(_, entry)| entry.inserted_at)
            .map(|(key, _)| *key)
        {
            entries.remove(&oldest_key);
        }
    }
}

impl Default for WindCache {
    fn default() -> Self {
        Self::new()
    }
}
