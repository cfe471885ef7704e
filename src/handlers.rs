//! Read API (§6): thin actix-web route handlers translating requests into
//! calls against `QueryService`/`Predictor`/`IngestController` and back into
//! JSON. Grounded on `backend/sat_api/src/handlers.rs`'s shape: one async fn
//! per route, `web::Data<AppState>`, query structs deserialized by serde,
//! errors mapped to an HTTP status with a JSON body rather than a panic.

use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::BalloonError;
use crate::model::PredictionMethod;
use crate::wind::{altitude_for_pressure, nearest_pressure_level, Location};
use crate::AppState;

const DEFAULT_HOURS: u32 = 6;
const MAX_TRAJECTORY_HOURS: u32 = 12;
const MAX_VALUE_HOURS: u32 = 24;
const MAX_WIND_FIELD_POINTS: usize = 1000;
const DEFAULT_GRID_SIZE: usize = 10;

fn current_hour() -> DateTime<Utc> {
    use chrono::Timelike;
    let now = Utc::now();
    now.date_naive()
        .and_hms_opt(now.time().hour(), 0, 0)
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(now)
}

fn error_response(err: &BalloonError) -> HttpResponse {
    let status = match err {
        BalloonError::NotFound(_) => actix_web::http::StatusCode::NOT_FOUND,
        BalloonError::InvalidArgument(_) => actix_web::http::StatusCode::BAD_REQUEST,
        BalloonError::Timeout(_) => actix_web::http::StatusCode::GATEWAY_TIMEOUT,
        _ => actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
    };
    HttpResponse::build(status).json(ErrorBody {
        error: error_kind(err),
        message: err.to_string(),
    })
}

fn error_kind(err: &BalloonError) -> &'static str {
    match err {
        BalloonError::UpstreamUnavailable(_) => "upstream_unavailable",
        BalloonError::UpstreamCorrupt(_) => "upstream_corrupt",
        BalloonError::WindRateLimited => "wind_rate_limited",
        BalloonError::WindUnavailable(_) => "wind_unavailable",
        BalloonError::StoreWriteFailed(_) => "store_write_failed",
        BalloonError::StoreReadFailed(_) => "store_read_failed",
        BalloonError::NotFound(_) => "not_found",
        BalloonError::InvalidArgument(_) => "invalid_argument",
        BalloonError::Timeout(_) => "timeout",
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

#[derive(Deserialize)]
pub struct HourOffsetQuery {
    #[serde(default)]
    hour_offset: u32,
}

#[derive(Serialize)]
struct BalloonsResponse {
    updated_at: Option<DateTime<Utc>>,
    data_age_minutes: i64,
    balloon_count: usize,
    balloons: Vec<crate::model::TrackedPosition>,
}

pub async fn list_balloons(state: web::Data<AppState>, query: web::Query<HourOffsetQuery>) -> impl Responder {
    match state.query.positions_at(query.hour_offset).await {
        Ok(balloons) => {
            let health = state.query.health().await.unwrap_or_else(|_| crate::query::Health {
                status: crate::query::HealthStatus::Unhealthy,
                updated_at: None,
                data_age_minutes: i64::MAX,
                balloon_count_at_offset_0: 0,
                auto_update: false,
            });
            HttpResponse::Ok().json(BalloonsResponse {
                updated_at: health.updated_at,
                data_age_minutes: health.data_age_minutes,
                balloon_count: balloons.len(),
                balloons,
            })
        }
        Err(err) => error_response(&err),
    }
}

#[derive(Serialize)]
struct BalloonDetailResponse {
    balloon_id: String,
    trajectory: crate::query::TrajectoryView,
    reference_hour_offset: u32,
}

pub async fn get_balloon(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<HourOffsetQuery>,
) -> impl Responder {
    let balloon_id = path.into_inner();
    match state.query.trajectory(&balloon_id, query.hour_offset).await {
        Ok(trajectory) => HttpResponse::Ok().json(BalloonDetailResponse {
            balloon_id,
            reference_hour_offset: query.hour_offset,
            trajectory,
        }),
        Err(err) => error_response(&err),
    }
}

#[derive(Deserialize)]
pub struct ValueQuery {
    #[serde(default = "default_hours")]
    hours: u32,
    #[serde(default = "default_method")]
    method: String,
}

fn default_hours() -> u32 {
    DEFAULT_HOURS
}

fn default_method() -> String {
    "persistence".to_string()
}

fn parse_method(raw: &str) -> Result<PredictionMethod, BalloonError> {
    PredictionMethod::parse(raw).ok_or_else(|| BalloonError::InvalidArgument(format!("unknown method '{raw}'")))
}

pub async fn balloon_value(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ValueQuery>,
) -> impl Responder {
    let balloon_id = path.into_inner();
    if query.hours == 0 || query.hours > MAX_VALUE_HOURS {
        return error_response(&BalloonError::InvalidArgument(format!(
            "hours must be in [1,{MAX_VALUE_HOURS}], got {}",
            query.hours
        )));
    }
    let method = match parse_method(&query.method) {
        Ok(m) => m,
        Err(err) => return error_response(&err),
    };

    match state.predictor.score(&balloon_id, query.hours, method).await {
        Ok(score) => HttpResponse::Ok().json(score),
        Err(err) => error_response(&err),
    }
}

#[derive(Serialize)]
struct HistoryEntry {
    id: String,
    trail: Vec<(f64, f64, f64, DateTime<Utc>)>,
}

pub async fn balloon_history(state: web::Data<AppState>) -> impl Responder {
    let current = match state.query.positions_at(0).await {
        Ok(v) => v,
        Err(err) => return error_response(&err),
    };

    let mut out = Vec::with_capacity(current.len());
    for pos in &current {
        match state.store.trajectory(&pos.balloon_id).await {
            Ok(trajectory) => {
                let trail = trajectory
                    .iter()
                    .map(|p| (p.lat, p.lon, p.alt_km, p.timestamp))
                    .collect();
                out.push(HistoryEntry { id: pos.balloon_id.clone(), trail });
            }
            Err(err) => {
                warn!("history: failed to load trajectory for {}: {err}", pos.balloon_id);
            }
        }
    }

    HttpResponse::Ok().json(out)
}

pub async fn trajectory_prediction(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ValueQuery>,
) -> impl Responder {
    let balloon_id = path.into_inner();
    if query.hours == 0 || query.hours > MAX_TRAJECTORY_HOURS {
        return error_response(&BalloonError::InvalidArgument(format!(
            "hours must be in [1,{MAX_TRAJECTORY_HOURS}], got {}",
            query.hours
        )));
    }
    let method = match parse_method(&query.method) {
        Ok(m) => m,
        Err(err) => return error_response(&err),
    };

    let trajectory = match state.store.trajectory(&balloon_id).await {
        Ok(t) if !t.is_empty() => t,
        Ok(_) => return error_response(&BalloonError::NotFound(format!("no trajectory for {balloon_id}"))),
        Err(err) => return error_response(&err),
    };

    let predicted = state.predictor.predict_future(&trajectory, query.hours, method).await;
    HttpResponse::Ok().json(predicted)
}

#[derive(Deserialize)]
pub struct WindFieldQuery {
    lat_min: f64,
    lat_max: f64,
    lng_min: f64,
    lng_max: f64,
    #[serde(default = "default_grid_size")]
    grid_size: usize,
    pressure: Option<f64>,
    altitude: Option<f64>,
}

fn default_grid_size() -> usize {
    DEFAULT_GRID_SIZE
}

#[derive(Serialize)]
struct WindFieldResponse {
    grid: usize,
    count: usize,
    data: Vec<crate::model::WindVector>,
}

pub async fn wind_field(state: web::Data<AppState>, query: web::Query<WindFieldQuery>) -> impl Responder {
    let mut grid = query.grid_size.max(1);
    if grid * grid > MAX_WIND_FIELD_POINTS {
        grid = (MAX_WIND_FIELD_POINTS as f64).sqrt().floor() as usize;
    }

    let alt_km = match (query.altitude, query.pressure) {
        (Some(alt), _) => alt,
        (None, Some(pressure)) => altitude_for_pressure(pressure),
        (None, None) => altitude_for_pressure(nearest_pressure_level(10.0) as f64),
    };

    let hour = current_hour();
    let lat_step = (query.lat_max - query.lat_min) / grid.max(1) as f64;
    let lng_step = (query.lng_max - query.lng_min) / grid.max(1) as f64;

    let mut locations = Vec::with_capacity(grid * grid);
    for i in 0..grid {
        for j in 0..grid {
            locations.push(Location {
                lat: query.lat_min + lat_step * i as f64,
                lon: query.lng_min + lng_step * j as f64,
                alt_km,
                timestamp: Some(hour),
            });
        }
    }

    let results = state.wind_client.wind_for(&locations).await;
    let data: Vec<_> = results.into_values().collect();

    HttpResponse::Ok().json(WindFieldResponse {
        grid,
        count: data.len(),
        data,
    })
}

#[derive(Serialize)]
struct RefreshResponse {
    state: String,
    applied_records: usize,
    latest_snapshot_time: Option<DateTime<Utc>>,
}

pub async fn refresh(state: web::Data<AppState>) -> impl Responder {
    match state.ingest.trigger_once(current_hour()).await {
        Ok(outcome) => HttpResponse::Ok().json(RefreshResponse {
            state: format!("{:?}", outcome.state),
            applied_records: outcome.applied_records,
            latest_snapshot_time: outcome.latest_snapshot_time,
        }),
        Err(err) => error_response(&err),
    }
}

pub async fn health(state: web::Data<AppState>) -> impl Responder {
    match state.query.health().await {
        Ok(health) => HttpResponse::Ok().json(health),
        Err(err) => error_response(&err),
    }
}

/// Liveness-only root route (SPEC_FULL.md, Supplemented features): confirms
/// the process is up without touching the Store, unlike `/health`.
pub async fn root() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "service": "balloon-track", "status": "alive" }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(root))
        .route("/health", web::get().to(health))
        .route("/refresh", web::post().to(refresh))
        .route("/balloons", web::get().to(list_balloons))
        .route("/balloons/history", web::get().to(balloon_history))
        .route("/balloons/{id}", web::get().to(get_balloon))
        .route("/balloons/{id}/value", web::get().to(balloon_value))
        .route("/trajectory/wind-field", web::get().to(wind_field))
        .route("/trajectory/{id}", web::get().to(trajectory_prediction));
}
