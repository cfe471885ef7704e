//! The Snapshot Store (§4.1): durable, idempotent storage of raw hourly
//! snapshots and tracked positions, shared by the ingest, tracker, and query
//! paths. The real database driver is an out-of-scope collaborator per
//! spec.md's Non-goals; this module defines the contract as a trait plus an
//! in-process implementation, the same split the teacher draws between
//! `AppState`'s cached `Vec<_>` fields and the Postgres-backed routes it
//! never actually wires sqlx through for satellite data (`backend/src/orbit.rs`
//! keeps its own `RwLock<Vec<OrbitEntry>>` cache rather than querying a table
//! per request).

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::id::numeric_suffix;
use crate::model::{Snapshot, TrackedPosition};

#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn put_snapshot(&self, snapshot: Snapshot) -> Result<()>;
    async fn get_snapshot(&self, hour: DateTime<Utc>) -> Result<Option<Snapshot>>;
    async fn latest_snapshot_time(&self) -> Result<Option<DateTime<Utc>>>;
    async fn list_snapshots(&self) -> Result<Vec<DateTime<Utc>>>;
    async fn put_tracked(&self, batch: Vec<TrackedPosition>) -> Result<()>;
    async fn tracked_at(&self, hour: DateTime<Utc>) -> Result<Vec<TrackedPosition>>;
    async fn trajectory(&self, balloon_id: &str) -> Result<Vec<TrackedPosition>>;
    async fn max_numeric_id(&self) -> Result<Option<u64>>;
    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<(usize, usize)>;
    async fn clear_all(&self) -> Result<()>;
}

#[derive(Default)]
struct Inner {
    snapshots: BTreeMap<DateTime<Utc>, Snapshot>,
    /// Keyed by `(balloon_id, timestamp)`, the store's stated primary key.
    tracked: HashMap<(String, DateTime<Utc>), TrackedPosition>,
    /// Secondary index: balloon id -> sorted timestamps, kept in lockstep
    /// with `tracked` so `trajectory` never needs a full scan.
    by_id: HashMap<String, BTreeMap<DateTime<Utc>, ()>>,
}

/// In-memory implementation of the Store contract. Every write takes the
/// single `RwLock` write guard for the whole operation, giving the
/// idempotent-upsert and total-cleanup guarantees §4.1 asks for without a
/// separate transaction mechanism — acceptable because no write here
/// performs I/O (the real durability boundary is out of scope per spec.md).
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SnapshotStore for InMemoryStore {
    async fn put_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.snapshots.insert(snapshot.hour, snapshot);
        Ok(())
    }

    async fn get_snapshot(&self, hour: DateTime<Utc>) -> Result<Option<Snapshot>> {
        let inner = self.inner.read().await;
        Ok(inner.snapshots.get(&hour).cloned())
    }

    async fn latest_snapshot_time(&self) -> Result<Option<DateTime<Utc>>> {
        let inner = self.inner.read().await;
        Ok(inner.snapshots.keys().next_back().copied())
    }

    async fn list_snapshots(&self) -> Result<Vec<DateTime<Utc>>> {
        let inner = self.inner.read().await;
        Ok(inner.snapshots.keys().rev().copied().collect())
    }

    async fn put_tracked(&self, batch: Vec<TrackedPosition>) -> Result<()> {
        let mut inner = self.inner.write().await;
        for pos in batch {
            let key = (pos.balloon_id.clone(), pos.timestamp);
            inner
                .by_id
                .entry(pos.balloon_id.clone())
                .or_default()
                .insert(pos.timestamp, ());
            inner.tracked.insert(key, pos);
        }
        Ok(())
    }

    async fn tracked_at(&self, hour: DateTime<Utc>) -> Result<Vec<TrackedPosition>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tracked
            .values()
            .filter(|pos| pos.timestamp == hour)
            .cloned()
            .collect())
    }

    async fn trajectory(&self, balloon_id: &str) -> Result<Vec<TrackedPosition>> {
        let inner = self.inner.read().await;
        let Some(timestamps) = inner.by_id.get(balloon_id) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(timestamps.len());
        for ts in timestamps.keys() {
            if let Some(pos) = inner.tracked.get(&(balloon_id.to_string(), *ts)) {
                out.push(pos.clone());
            }
        }
        Ok(out)
    }

    async fn max_numeric_id(&self) -> Result<Option<u64>> {
        let inner = self.inner.read().await;
        Ok(inner.by_id.keys().filter_map(|id| numeric_suffix(id)).max())
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<(usize, usize)> {
        let mut inner = self.inner.write().await;

        let stale_hours: Vec<DateTime<Utc>> = inner
            .snapshots
            .range(..older_than)
            .map(|(hour, _)| *hour)
            .collect();
        for hour in &stale_hours {
            inner.snapshots.remove(hour);
        }

        let stale_keys: Vec<(String, DateTime<Utc>)> = inner
            .tracked
            .keys()
            .filter(|(_, ts)| *ts < older_than)
            .cloned()
            .collect();
        for key in &stale_keys {
            inner.tracked.remove(key);
            if let Some(timestamps) = inner.by_id.get_mut(&key.0) {
                timestamps.remove(&key.1);
            }
        }
        inner.by_id.retain(|_, timestamps| !timestamps.is_empty());

        Ok((stale_keys.len(), stale_hours.len()))
    }

    async fn clear_all(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        *inner = Inner::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RawObservation, TrackStatus};
    use chrono::TimeZone;

    fn hour(h: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + h * 3600, 0).unwrap()
    }

    fn pos(id: &str, ts: DateTime<Utc>) -> TrackedPosition {
        TrackedPosition {
            balloon_id: id.to_string(),
            timestamp: ts,
            lat: 10.0,
            lon: 20.0,
            alt_km: 15.0,
            speed_kmh: None,
            heading_deg: None,
            status: TrackStatus::New,
            confidence: 1.0,
        }
    }

    #[tokio::test]
    async fn put_snapshot_is_idempotent_upsert() {
        let store = InMemoryStore::new();
        let h = hour(0);
        store
            .put_snapshot(Snapshot {
                hour: h,
                observations: vec![RawObservation {
                    lat: 1.0,
                    lon: 1.0,
                    alt_km: 10.0,
                }],
            })
            .await
            .unwrap();
        store
            .put_snapshot(Snapshot {
                hour: h,
                observations: vec![
                    RawObservation {
                        lat: 1.0,
                        lon: 1.0,
                        alt_km: 10.0,
                    },
                    RawObservation {
                        lat: 2.0,
                        lon: 2.0,
                        alt_km: 11.0,
                    },
                ],
            })
            .await
            .unwrap();

        assert_eq!(store.list_snapshots().await.unwrap().len(), 1);
        let snap = store.get_snapshot(h).await.unwrap().unwrap();
        assert_eq!(snap.observations.len(), 2);
    }

    #[tokio::test]
    async fn trajectory_is_sorted_ascending() {
        let store = InMemoryStore::new();
        store
            .put_tracked(vec![pos("balloon_0001", hour(2)), pos("balloon_0001", hour(0)), pos("balloon_0001", hour(1))])
            .await
            .unwrap();

        let traj = store.trajectory("balloon_0001").await.unwrap();
        let timestamps: Vec<_> = traj.iter().map(|p| p.timestamp).collect();
        assert_eq!(timestamps, vec![hour(0), hour(1), hour(2)]);
    }

    #[tokio::test]
    async fn cleanup_removes_everything_older_than_cutoff() {
        let store = InMemoryStore::new();
        for h in 0..5 {
            store
                .put_snapshot(Snapshot {
                    hour: hour(h),
                    observations: vec![],
                })
                .await
                .unwrap();
            store.put_tracked(vec![pos("balloon_0001", hour(h))]).await.unwrap();
        }

        let (tracked_deleted, snapshots_deleted) = store.cleanup(hour(3)).await.unwrap();
        assert_eq!(tracked_deleted, 3);
        assert_eq!(snapshots_deleted, 3);
        assert_eq!(store.list_snapshots().await.unwrap().len(), 2);
        assert_eq!(store.trajectory("balloon_0001").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn max_numeric_id_ignores_malformed_ids() {
        let store = InMemoryStore::new();
        store
            .put_tracked(vec![pos("balloon_0003", hour(0)), pos("balloon_0010", hour(0))])
            .await
            .unwrap();
        assert_eq!(store.max_numeric_id().await.unwrap(), Some(10));
    }
}
