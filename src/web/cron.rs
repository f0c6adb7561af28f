use crate::state::SharedState;
use crate::time_utils::{compute_next_monday_week_start, is_valid_timezone};
use crate::web::ApiError;
use axum::{
    extract::{Query, State},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct CronQuery {
    secret: Option<String>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health-weekly", get(trigger_weekly))
        .with_state(state)
}

/// External scheduler entry point. Authenticates via the shared secret
/// (query param or header). Without a configured secret it only admits the
/// known scheduler user-agent and then still refuses to run, so that a
/// misdeployed instance cannot be driven anonymously.
async fn trigger_weekly(
    State(state): State<SharedState>,
    Query(query): Query<CronQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let provided = query.secret.clone().or_else(|| {
        headers
            .get("x-cron-secret")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });

    match &state.cron.secret {
        Some(expected) => {
            if provided.as_deref() != Some(expected.as_str()) {
                return Err(ApiError::unauthorized());
            }
        }
        None => {
            let user_agent = headers
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if !user_agent.contains(state.cron.allowed_user_agent.as_str()) {
                return Err(ApiError::unauthorized());
            }
            return Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Missing HEALTH_CRON_SECRET configuration",
            ));
        }
    }

    let timezone = state.cron.timezone.clone();
    if !is_valid_timezone(&timezone) {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Invalid HEALTH_CRON_TIMEZONE",
        ));
    }

    let week_start = compute_next_monday_week_start(chrono::Utc::now(), &timezone).ok_or_else(
        || ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to compute weekStart"),
    )?;

    match state.planner.generate_for_all(week_start, &timezone).await {
        Ok(generated_count) => Ok(Json(json!({
            "ok": true,
            "weekStart": week_start.to_string(),
            "timezone": timezone,
            "result": { "ok": true, "generatedCount": generated_count },
        }))),
        Err(err) => {
            tracing::error!("Weekly generation failed: {err}");
            Err(ApiError {
                status: StatusCode::BAD_GATEWAY,
                body: json!({
                    "error": "Weekly generation failed",
                    "weekStart": week_start.to_string(),
                    "timezone": timezone,
                    "details": err.to_string(),
                }),
            })
        }
    }
}
