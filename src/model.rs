use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw `(lat, lon, alt_km)` triple with no identity, as published by the
/// upstream feed for a single hour.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RawObservation {
    pub lat: f64,
    pub lon: f64,
    pub alt_km: f64,
}

impl RawObservation {
    /// §3 invariants: latitude/longitude in range, positive bounded altitude,
    /// and every field finite. Violations are dropped silently by the caller.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && self.alt_km.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
            && self.alt_km > 0.0
            && self.alt_km < 50.0
    }
}

/// All observations collected for one UTC hour. `hour` is the primary key;
/// upserts into the store are idempotent on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub hour: DateTime<Utc>,
    pub observations: Vec<RawObservation>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackStatus {
    Active,
    New,
    Lost,
}

/// An observation that has been assigned a persistent id. Primary key is
/// `(balloon_id, timestamp)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedPosition {
    pub balloon_id: String,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub alt_km: f64,
    pub speed_kmh: Option<f64>,
    pub heading_deg: Option<f64>,
    pub status: TrackStatus,
    pub confidence: f64,
}

/// Upper-air wind at a quantized `(lat, lon, alt, hour)` bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindVector {
    pub lat: f64,
    pub lon: f64,
    pub alt_km: f64,
    pub pressure_hpa: f64,
    pub u_ms: f64,
    pub v_ms: f64,
    pub speed_kmh: f64,
    pub direction_from_deg: f64,
    pub timestamp_hour: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PredictionMethod {
    Persistence,
    Wind,
    Hybrid,
}

impl PredictionMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "persistence" => Some(Self::Persistence),
            "wind" => Some(Self::Wind),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

/// A future position, never persisted — always recomputed on request.
#[derive(Debug, Clone, Serialize)]
pub struct PredictedPosition {
    pub lat: f64,
    pub lon: f64,
    pub alt_km: f64,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    pub method: PredictionMethod,
}

/// A single hour's recorded prediction error, produced by value scoring.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredHour {
    pub hour: u32,
    pub actual: (f64, f64),
    pub predicted: (f64, f64),
    pub error_km: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValueScore {
    pub balloon_id: String,
    pub method: PredictionMethod,
    pub hours: Vec<ScoredHour>,
    pub overall_value_score: f64,
}
