use crate::domain::plan::GeneratedBy;
use crate::services::planner::GenerateError;
use crate::state::SharedState;
use crate::time_utils::{is_valid_timezone, parse_iso_date};
use crate::web::session::UserSession;
use crate::web::ApiError;
use axum::{
    extract::rejection::JsonRejection,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateWeekRequest {
    pub week_start: Option<String>,
    pub timezone: Option<String>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/weekly-generate", post(weekly_generate))
        .route("/regenerate-week", post(regenerate_week))
        .with_state(state)
}

/// Shared request validation: strict ISO week start, known timezone.
pub fn parse_week_request(body: &GenerateWeekRequest) -> Result<(NaiveDate, String), ApiError> {
    let week_start = body
        .week_start
        .as_deref()
        .and_then(parse_iso_date)
        .ok_or_else(|| ApiError::bad_request("Missing or invalid weekStart"))?;
    let timezone = body
        .timezone
        .as_deref()
        .filter(|tz| is_valid_timezone(tz))
        .ok_or_else(|| ApiError::bad_request("Missing or invalid timezone"))?;
    Ok((week_start, timezone.to_string()))
}

fn generate_error_response(err: GenerateError) -> ApiError {
    match err {
        GenerateError::MissingMetrics => {
            ApiError::bad_request("Missing body metrics. Please fill your profile metrics first.")
        }
        GenerateError::Llm(_) => ApiError::new(StatusCode::BAD_GATEWAY, "LLM request failed"),
        GenerateError::EmptyResponse => {
            ApiError::new(StatusCode::BAD_GATEWAY, "Empty LLM response")
        }
        GenerateError::InvalidResponse => {
            ApiError::new(StatusCode::BAD_GATEWAY, "Invalid LLM response")
        }
        GenerateError::EmptyPlan => ApiError::new(StatusCode::BAD_GATEWAY, "Empty plan output"),
        GenerateError::Storage { stage, .. } => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to {stage}"),
        ),
    }
}

/// Bulk generation for every profiled user. Reached by the cron trigger
/// (or an operator) with the shared secret; never by end users.
async fn weekly_generate(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Result<Json<GenerateWeekRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let provided = headers
        .get("x-cron-secret")
        .and_then(|v| v.to_str().ok());
    let expected = state.cron.secret.as_deref();
    match (provided, expected) {
        (Some(provided), Some(expected)) if provided == expected => {}
        _ => return Err(ApiError::unauthorized()),
    }

    let Ok(Json(body)) = body else {
        return Err(ApiError::bad_request("Invalid JSON body"));
    };
    let (week_start, timezone) = parse_week_request(&body)?;

    let generated_count = state
        .planner
        .generate_for_all(week_start, &timezone)
        .await
        .map_err(|err| {
            tracing::error!("Bulk generation failed before the user loop: {err}");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load body metrics",
            )
        })?;

    Ok(Json(json!({ "ok": true, "generatedCount": generated_count })))
}

/// Interactive regeneration of the caller's own week.
async fn regenerate_week(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    body: Result<Json<GenerateWeekRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Ok(Json(body)) = body else {
        return Err(ApiError::bad_request("Invalid JSON body"));
    };
    let (week_start, timezone) = parse_week_request(&body)?;

    state
        .planner
        .generate_for_user(user_id, week_start, &timezone, GeneratedBy::User)
        .await
        .map_err(generate_error_response)?;

    Ok(Json(json!({ "ok": true })))
}
