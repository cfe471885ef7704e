use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use balloon_track::config::Config;
use balloon_track::AppState;
use chrono::{DateTime, Duration, Timelike, Utc};
use tracing::{info, warn};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    dotenv::dotenv().ok();
    let config = Config::from_env()?;

    info!("starting balloon-track on {}:{}", config.bind_host, config.bind_port);

    let state = Arc::new(AppState::new(&config).await?);
    spawn_scheduler(state.clone());

    let bind_host = config.bind_host.clone();
    let bind_port = config.bind_port;

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(web::Data::from(state.clone()))
            .configure(balloon_track::handlers::configure)
    })
    .bind((bind_host, bind_port))?
    .run()
    .await?;

    Ok(())
}

const SCHEDULE_OFFSET_SECS: i64 = 90;

fn current_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(now.hour(), 0, 0)
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(now)
}

/// §4.4 Scheduling: next tick fires at the next wall-clock hour + 90s, to
/// absorb upstream publish latency.
fn seconds_until_next_tick(now: DateTime<Utc>) -> u64 {
    let next_hour = current_hour(now) + Duration::hours(1);
    let target = next_hour + Duration::seconds(SCHEDULE_OFFSET_SECS);
    (target - now).num_seconds().max(1) as u64
}

/// Drives `IngestController::trigger_once` on the §4.4 wall-clock schedule.
/// Deployments that disallow long-lived timers can instead call
/// `POST /refresh`, which reaches the same `trigger_once()` path.
fn spawn_scheduler(state: Arc<AppState>) {
    tokio::spawn(async move {
        loop {
            let sleep_for = seconds_until_next_tick(Utc::now());
            tokio::time::sleep(std::time::Duration::from_secs(sleep_for)).await;

            let tick_hour = current_hour(Utc::now());
            match state.ingest.trigger_once(tick_hour).await {
                Ok(outcome) => info!(
                    "scheduled tick applied {} records, state={:?}",
                    outcome.applied_records, outcome.state
                ),
                Err(err) => warn!("scheduled tick failed: {err}"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn schedules_ninety_seconds_past_the_next_hour() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 5).unwrap();
        let secs = seconds_until_next_tick(now);
        // 55 minutes to the top of the hour, plus the 90s offset.
        assert_eq!(secs, 55 * 60 + 90);
    }
}
