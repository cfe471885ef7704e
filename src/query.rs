//! Query Service (§4.7): the thin read side. Consumes the Store (and, for
//! `health()`, the Ingest Controller's state) with no writes of its own.
//! Grounded on `sat_api::api`'s handler-adjacent query helpers, which keep
//! the same "recompute relative to wall clock, never trust a stored offset"
//! discipline this module follows for `positions_at`.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use serde::Serialize;

use crate::error::{BalloonError, Result};
use crate::ingest::IngestController;
use crate::model::TrackedPosition;
use crate::store::SnapshotStore;

const HEALTHY_MAX_AGE_MINUTES: i64 = 65;
const DEGRADED_MAX_AGE_MINUTES: i64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: HealthStatus,
    pub updated_at: Option<DateTime<Utc>>,
    pub data_age_minutes: i64,
    pub balloon_count_at_offset_0: usize,
    pub auto_update: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrajectoryView {
    pub historical_positions: Vec<TrackedPosition>,
    pub future_positions: Vec<TrackedPosition>,
    pub reference_hour_offset: u32,
}

pub struct QueryService {
    store: Arc<dyn SnapshotStore>,
    ingest: Arc<IngestController>,
}

impl QueryService {
    pub fn new(store: Arc<dyn SnapshotStore>, ingest: Arc<IngestController>) -> Self {
        Self { store, ingest }
    }

    /// All tracked positions whose timestamp equals `now_hour - hour_offset`,
    /// `hour_offset` always recomputed against the current wall clock
    /// (§4.7 — a stored offset may be stale by the time it's read).
    pub async fn positions_at(&self, hour_offset: u32) -> Result<Vec<TrackedPosition>> {
        if hour_offset > 23 {
            return Err(BalloonError::InvalidArgument(format!(
                "hour_offset must be in [0,23], got {hour_offset}"
            )));
        }
        let now_hour = current_hour();
        let target = now_hour - ChronoDuration::hours(hour_offset as i64);
        self.store.tracked_at(target).await
    }

    /// Splits an id's full retained trajectory into historical and future
    /// halves around `reference_hour_offset`; the reference position itself
    /// belongs to both so a UI can draw one continuous line (§4.7).
    pub async fn trajectory(&self, balloon_id: &str, reference_hour_offset: u32) -> Result<TrajectoryView> {
        let trajectory = self.store.trajectory(balloon_id).await?;
        if trajectory.is_empty() {
            return Err(BalloonError::NotFound(format!("no trajectory for {balloon_id}")));
        }

        let now_hour = current_hour();
        let reference_time = now_hour - ChronoDuration::hours(reference_hour_offset as i64);

        let mut historical = Vec::new();
        let mut future = Vec::new();
        for pos in &trajectory {
            if pos.timestamp <= reference_time {
                historical.push(pos.clone());
            }
            if pos.timestamp >= reference_time {
                future.push(pos.clone());
            }
        }

        Ok(TrajectoryView {
            historical_positions: historical,
            future_positions: future,
            reference_hour_offset,
        })
    }

    /// §4.7: data age and classification, the sole inputs to health status.
    pub async fn health(&self) -> Result<Health> {
        let updated_at = self.store.latest_snapshot_time().await?;
        let data_age_minutes = match updated_at {
            Some(t) => (Utc::now() - t).num_minutes().max(0),
            None => i64::MAX,
        };

        let status = if data_age_minutes < HEALTHY_MAX_AGE_MINUTES {
            HealthStatus::Healthy
        } else if data_age_minutes <= DEGRADED_MAX_AGE_MINUTES {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        let balloon_count_at_offset_0 = self.positions_at(0).await.map(|v| v.len()).unwrap_or(0);

        Ok(Health {
            status,
            updated_at,
            data_age_minutes,
            balloon_count_at_offset_0,
            auto_update: matches!(
                self.ingest.state().await,
                crate::ingest::IngestState::Steady
                    | crate::ingest::IngestState::CatchUp
                    | crate::ingest::IngestState::Rebuilding
            ),
        })
    }
}

fn current_hour() -> DateTime<Utc> {
    let now = Utc::now();
    now.date_naive()
        .and_hms_opt(now.time().hour(), 0, 0)
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(now)
}
