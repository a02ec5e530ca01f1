//! Control surface: scheduler toggles and anomaly triggers.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use lib_replay::core::SchedulerStatus;
use lib_replay::scenarios::{self, Scenario};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::replay_logic::state::AppState;

/// Upper bound on records fabricated by one scenario request.
pub const MAX_SCENARIO_COUNT: usize = 10_000;

#[derive(Debug)]
pub enum ControlError {
    InvalidParameter(String),
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let (status, error_json) = match self {
            ControlError::InvalidParameter(message) => {
                warn!("Rejected control request: {}", message);
                (
                    StatusCode::BAD_REQUEST,
                    json!({ "error_type": "InvalidParameter", "message": message }),
                )
            }
        };
        (status, Json(error_json)).into_response()
    }
}

impl std::fmt::Display for ControlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlError::InvalidParameter(s) => write!(f, "Invalid parameter: {}", s),
        }
    }
}

impl std::error::Error for ControlError {}

pub async fn start_handler(State(state): State<AppState>) -> Json<Value> {
    state.scheduler.start().await;
    info!("Replay started via control surface");
    Json(json!({ "status": "started", "message": "Replay started" }))
}

pub async fn stop_handler(State(state): State<AppState>) -> Json<Value> {
    state.scheduler.stop().await;
    info!("Replay stopped via control surface");
    Json(json!({ "status": "stopped", "message": "Replay stopped" }))
}

pub async fn restart_handler(State(state): State<AppState>) -> Json<Value> {
    state.scheduler.restart().await;
    Json(json!({ "status": "restarted", "message": "Replay restarted" }))
}

pub async fn status_handler(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status().await)
}

#[derive(Debug, Deserialize)]
pub struct SlowCountryParams {
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_slow_count")]
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct BrowserIssueParams {
    #[serde(default = "default_browser")]
    pub browser: String,
    #[serde(default = "default_browser_count")]
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct CountParams {
    pub count: Option<usize>,
}

fn default_country() -> String {
    "KR".to_string()
}
fn default_slow_count() -> usize {
    20
}
fn default_browser() -> String {
    "Firefox".to_string()
}
fn default_browser_count() -> usize {
    15
}

pub async fn slow_country_handler(
    State(state): State<AppState>,
    Query(params): Query<SlowCountryParams>,
) -> Result<Json<Value>, ControlError> {
    if params.country.trim().is_empty() {
        return Err(ControlError::InvalidParameter("country must not be empty".to_string()));
    }
    run_scenario(&state, Scenario::slow_country(params.country, checked(params.count)?))
}

pub async fn error_spike_handler(
    State(state): State<AppState>,
    Query(params): Query<CountParams>,
) -> Result<Json<Value>, ControlError> {
    run_scenario(&state, Scenario::error_spike(checked(params.count.unwrap_or(30))?))
}

pub async fn tcp_error_handler(
    State(state): State<AppState>,
    Query(params): Query<CountParams>,
) -> Result<Json<Value>, ControlError> {
    run_scenario(&state, Scenario::tcp_error(checked(params.count.unwrap_or(25))?))
}

pub async fn browser_issue_handler(
    State(state): State<AppState>,
    Query(params): Query<BrowserIssueParams>,
) -> Result<Json<Value>, ControlError> {
    if params.browser.trim().is_empty() {
        return Err(ControlError::InvalidParameter("browser must not be empty".to_string()));
    }
    run_scenario(&state, Scenario::browser_issue(params.browser, checked(params.count)?))
}

pub async fn recover_handler(
    State(state): State<AppState>,
    Query(params): Query<CountParams>,
) -> Result<Json<Value>, ControlError> {
    run_scenario(&state, Scenario::recover(checked(params.count.unwrap_or(50))?))
}

fn checked(count: usize) -> Result<usize, ControlError> {
    if count > MAX_SCENARIO_COUNT {
        return Err(ControlError::InvalidParameter(format!(
            "count must be at most {MAX_SCENARIO_COUNT}, got {count}"
        )));
    }
    Ok(count)
}

fn run_scenario(state: &AppState, scenario: Scenario) -> Result<Json<Value>, ControlError> {
    let delivered = scenarios::trigger(&scenario, &state.fanout)
        .map(|report| report.delivered)
        .unwrap_or(0);
    Ok(Json(json!({
        "status": "triggered",
        "scenario": scenario.name(),
        "count": scenario.count(),
        "delivered": delivered,
        "message": format!("{} scenario emitted {} records", scenario.name(), scenario.count()),
    })))
}
