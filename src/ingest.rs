//! Ingest Controller (§4.4): the system's single logical writer. A small
//! state machine decides, per tick, between an incremental step, a gap-fill
//! catch-up, or a full rebuild, then drives Source Client → Tracker → Store.
//! Grounded on `sat_api::SatelliteApi`'s `initialize`/background-refresh
//! split (`backend/sat_api/src/api.rs`), generalized into an explicit state
//! enum since this system's bootstrapping has more branches than the
//! teacher's single always-fetch-on-start path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::error::Result;
use crate::id::IdCounter;
use crate::model::Snapshot;
use crate::source::SourceClient;
use crate::store::SnapshotStore;
use crate::tracker::{self, history_from_trajectory, HistoryMap, Segment};

/// Kept consistent with the §3 invariant ("min(snapshot.timestamp) >=
/// now_hour - 23h") rather than §4.4's literal `cleanup(t - 24h)` call,
/// which would retain one hour more than the stated window — see DESIGN.md.
const ROLLING_WINDOW_HOURS: i64 = 23;
const FULL_REBUILD_HOURS: u32 = 24;
const PARALLEL_FETCH_BATCH: usize = 6;
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Uninitialized,
    Bootstrapping,
    Steady,
    CatchUp,
    Rebuilding,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub state: IngestState,
    pub applied_records: usize,
    pub latest_snapshot_time: Option<DateTime<Utc>>,
}

pub struct IngestController {
    store: Arc<dyn SnapshotStore>,
    source: SourceClient,
    state: RwLock<IngestState>,
    id_counter: IdCounter,
    trigger_mutex: Mutex<()>,
    consecutive_failures: AtomicU32,
}

impl IngestController {
    /// Rehydrates the id counter floor from the store (§9, Global mutable
    /// state design note) and starts in `Uninitialized`.
    pub async fn new(store: Arc<dyn SnapshotStore>, source: SourceClient) -> Result<Self> {
        let next = store.max_numeric_id().await?.map(|n| n + 1).unwrap_or(1);
        Ok(Self {
            store,
            source,
            state: RwLock::new(IngestState::Uninitialized),
            id_counter: IdCounter::starting_at(next),
            trigger_mutex: Mutex::new(()),
            consecutive_failures: AtomicU32::new(0),
        })
    }

    pub async fn state(&self) -> IngestState {
        *self.state.read().await
    }

    /// Reentrant-safe: overlapping calls serialize on `trigger_mutex`; a
    /// caller that arrives after another completed typically observes an
    /// up-to-date `latest_snapshot_time` and no-ops (§4.4, Concurrency).
    pub async fn trigger_once(&self, now_hour: DateTime<Utc>) -> Result<TickOutcome> {
        let _guard = self.trigger_mutex.lock().await;

        match self.step(now_hour).await {
            Ok(outcome) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                Ok(outcome)
            }
            Err(err) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    error!("ingest failed {failures} times in a row, entering Failed state");
                    *self.state.write().await = IngestState::Failed;
                } else {
                    warn!("ingest tick failed ({failures}/{MAX_CONSECUTIVE_FAILURES}): {err}");
                }
                Err(err)
            }
        }
    }

    async fn step(&self, now_hour: DateTime<Utc>) -> Result<TickOutcome> {
        let state = *self.state.read().await;
        match state {
            IngestState::Uninitialized | IngestState::Failed => {
                *self.state.write().await = IngestState::Bootstrapping;
                self.bootstrap(now_hour).await
            }
            IngestState::Bootstrapping => self.bootstrap(now_hour).await,
            IngestState::Steady => self.incremental(now_hour).await,
            IngestState::CatchUp => self.catch_up(now_hour).await,
            IngestState::Rebuilding => self.rebuild(now_hour).await,
        }
    }

    async fn bootstrap(&self, now_hour: DateTime<Utc>) -> Result<TickOutcome> {
        let latest = self.store.latest_snapshot_time().await?;
        match latest {
            Some(t) if t == now_hour => {
                info!("bootstrap: already at {now_hour}, entering Steady");
                *self.state.write().await = IngestState::Steady;
                self.finish(IngestState::Steady, 0).await
            }
            Some(t) if t >= now_hour - ChronoDuration::hours(ROLLING_WINDOW_HOURS) && t < now_hour => {
                *self.state.write().await = IngestState::CatchUp;
                self.catch_up(now_hour).await
            }
            _ => {
                *self.state.write().await = IngestState::Rebuilding;
                self.rebuild(now_hour).await
            }
        }
    }

    async fn incremental(&self, now_hour: DateTime<Utc>) -> Result<TickOutcome> {
        if self.store.latest_snapshot_time().await? == Some(now_hour) {
            return self.finish(IngestState::Steady, 0).await;
        }

        let obs = self.source.fetch_hour(0).await;
        if obs.is_empty() {
            warn!("incremental fetch for {now_hour} returned no records, falling back to Rebuilding");
            *self.state.write().await = IngestState::Rebuilding;
            return self.finish(IngestState::Rebuilding, 0).await;
        }

        let prev = self.store.tracked_at(now_hour - ChronoDuration::hours(1)).await?;
        let history = self.gather_history(&prev).await?;
        let tracked = tracker::track(&obs, &prev, &history, now_hour, &self.id_counter);
        let applied = tracked.len();

        self.store
            .put_snapshot(Snapshot { hour: now_hour, observations: obs })
            .await?;
        self.store.put_tracked(tracked).await?;
        self.store
            .cleanup(now_hour - ChronoDuration::hours(ROLLING_WINDOW_HOURS))
            .await?;

        self.finish(IngestState::Steady, applied).await
    }

    async fn catch_up(&self, now_hour: DateTime<Utc>) -> Result<TickOutcome> {
        let Some(latest) = self.store.latest_snapshot_time().await? else {
            *self.state.write().await = IngestState::Rebuilding;
            return self.rebuild(now_hour).await;
        };

        let mut prev = self.store.tracked_at(latest).await?;
        let mut history = self.gather_history(&prev).await?;
        let mut applied = 0usize;
        let mut t = latest;

        while t < now_hour {
            t += ChronoDuration::hours(1);
            let offset = offset_for(now_hour, t);
            let obs = self.source.fetch_hour(offset).await;

            self.store
                .put_snapshot(Snapshot { hour: t, observations: obs.clone() })
                .await?;
            let tracked = tracker::track(&obs, &prev, &history, t, &self.id_counter);
            self.store.put_tracked(tracked.clone()).await?;
            advance_history(&mut history, &tracked);
            applied = tracked.len();
            prev = tracked;
        }

        self.store
            .cleanup(now_hour - ChronoDuration::hours(ROLLING_WINDOW_HOURS))
            .await?;
        self.finish(IngestState::Steady, applied).await
    }

    async fn rebuild(&self, now_hour: DateTime<Utc>) -> Result<TickOutcome> {
        info!("starting full rebuild for window ending {now_hour}");
        let offsets: Vec<u32> = (0..FULL_REBUILD_HOURS).collect();
        let mut fetched: HashMap<u32, Vec<crate::model::RawObservation>> = HashMap::new();

        for chunk in offsets.chunks(PARALLEL_FETCH_BATCH) {
            let futures = chunk.iter().map(|&offset| {
                let source = self.source.clone();
                async move { (offset, source.fetch_hour(offset).await) }
            });
            for (offset, obs) in join_all(futures).await {
                fetched.insert(offset, obs);
            }
        }

        let mut prev = Vec::new();
        let mut history: HistoryMap = HistoryMap::new();
        let mut applied = 0usize;

        for offset in (0..FULL_REBUILD_HOURS).rev() {
            let t = now_hour - ChronoDuration::hours(offset as i64);
            let obs = fetched.remove(&offset).unwrap_or_default();

            self.store
                .put_snapshot(Snapshot { hour: t, observations: obs.clone() })
                .await?;
            let tracked = tracker::track(&obs, &prev, &history, t, &self.id_counter);
            self.store.put_tracked(tracked.clone()).await?;
            advance_history(&mut history, &tracked);
            applied = tracked.len();
            prev = tracked;
        }

        self.store
            .cleanup(now_hour - ChronoDuration::hours(ROLLING_WINDOW_HOURS))
            .await?;
        self.finish(IngestState::Steady, applied).await
    }

    async fn gather_history(&self, prev: &[crate::model::TrackedPosition]) -> Result<HistoryMap> {
        let mut history = HistoryMap::new();
        for p in prev {
            let trajectory = self.store.trajectory(&p.balloon_id).await?;
            history.insert(p.balloon_id.clone(), history_from_trajectory(&trajectory));
        }
        Ok(history)
    }

    async fn finish(&self, state: IngestState, applied_records: usize) -> Result<TickOutcome> {
        *self.state.write().await = state;
        Ok(TickOutcome {
            state,
            applied_records,
            latest_snapshot_time: self.store.latest_snapshot_time().await?,
        })
    }
}

fn offset_for(now_hour: DateTime<Utc>, t: DateTime<Utc>) -> u32 {
    (now_hour - t).num_hours().clamp(0, 23) as u32
}

fn advance_history(history: &mut HistoryMap, tracked: &[crate::model::TrackedPosition]) {
    for pos in tracked {
        if let (Some(speed_kmh), Some(heading_deg)) = (pos.speed_kmh, pos.heading_deg) {
            let deque = history.entry(pos.balloon_id.clone()).or_default();
            deque.push_back(Segment { speed_kmh, heading_deg });
            while deque.len() > 3 {
                deque.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::TimeZone;

    fn hour(n: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + n * 3600, 0).unwrap()
    }

    #[tokio::test]
    async fn bootstraps_into_rebuilding_when_store_is_empty() {
        let store: Arc<dyn SnapshotStore> = Arc::new(InMemoryStore::new());
        let source = SourceClient::new("http://unused.invalid");
        let controller = IngestController::new(store, source).await.unwrap();
        assert_eq!(controller.state().await, IngestState::Uninitialized);

        // The upstream is unreachable in this test, so fetch_hour returns
        // empty for every offset; the rebuild still runs to completion and
        // lands in Steady with zero applied records.
        let outcome = controller.trigger_once(hour(0)).await.unwrap();
        assert_eq!(outcome.state, IngestState::Steady);
        assert_eq!(outcome.applied_records, 0);
    }

    #[tokio::test]
    async fn incremental_no_ops_when_hour_already_current() {
        let store = Arc::new(InMemoryStore::new());
        store
            .put_snapshot(Snapshot { hour: hour(0), observations: vec![] })
            .await
            .unwrap();
        let store: Arc<dyn SnapshotStore> = store;
        let source = SourceClient::new("http://unused.invalid");
        let controller = IngestController::new(store, source).await.unwrap();
        *controller.state.write().await = IngestState::Steady;

        let outcome = controller.trigger_once(hour(0)).await.unwrap();
        assert_eq!(outcome.state, IngestState::Steady);
        assert_eq!(outcome.applied_records, 0);
    }
}
