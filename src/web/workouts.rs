use crate::db::WorkoutDayUpdate;
use crate::domain::plan::WORKOUT_FIELDS;
use crate::state::SharedState;
use crate::time_utils::{is_date_in_week, parse_iso_date};
use crate::web::session::UserSession;
use crate::web::ApiError;
use axum::{
    extract::rejection::JsonRejection,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WeekQuery {
    week_start: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkoutUpdateRequest {
    date: Option<String>,
    week_start: Option<String>,
    updates: Option<Value>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/workout", get(get_week))
        .route("/workout/update", post(update_day))
        .with_state(state)
}

async fn get_week(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    Query(query): Query<WeekQuery>,
) -> Result<Json<Value>, ApiError> {
    let week_start = query
        .week_start
        .as_deref()
        .and_then(parse_iso_date)
        .ok_or_else(|| ApiError::bad_request("Missing or invalid weekStart"))?;

    let loaded = state
        .store
        .get_workout_week(user_id, week_start)
        .await
        .map_err(|err| {
            tracing::error!(%user_id, "failed to load workout week: {err}");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load workout plan",
            )
        })?;

    match loaded {
        Some((week, days)) => Ok(Json(json!({ "weekPlan": week, "dayPlans": days }))),
        None => Ok(Json(json!({ "weekPlan": null, "dayPlans": [] }))),
    }
}

/// Normalizes and validates one update value under the manual-edit rules:
/// null always passes, `duration_min` must end up a positive integer (no
/// rounding here, unlike the agent path), everything else a string.
fn clean_workout_value(key: &str, value: &Value) -> Result<Value, ()> {
    if key == "duration_min" {
        return match value {
            Value::Null => Ok(Value::Null),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.is_finite() && f.fract() == 0.0 && f > 0.0 => Ok(json!(f as i64)),
                _ => Err(()),
            },
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Ok(Value::Null);
                }
                match trimmed.parse::<f64>() {
                    Ok(f) if f.is_finite() && f.fract() == 0.0 && f > 0.0 => {
                        Ok(json!(f as i64))
                    }
                    _ => Err(()),
                }
            }
            _ => Err(()),
        };
    }
    match value {
        Value::Null => Ok(Value::Null),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(Value::String(trimmed.to_string()))
            }
        }
        _ => Err(()),
    }
}

fn build_update(cleaned: &Map<String, Value>) -> WorkoutDayUpdate {
    let mut update = WorkoutDayUpdate::default();
    let text = |v: &Value| v.as_str().map(str::to_string);
    if let Some(v) = cleaned.get("cardio") {
        update.cardio = Some(text(v));
    }
    if let Some(v) = cleaned.get("strength") {
        update.strength = Some(text(v));
    }
    if let Some(v) = cleaned.get("duration_min") {
        update.duration_min = Some(v.as_i64().map(|i| i as i32));
    }
    if let Some(v) = cleaned.get("intensity") {
        update.intensity = Some(text(v));
    }
    if let Some(v) = cleaned.get("notes") {
        update.notes = Some(text(v));
    }
    update
}

async fn update_day(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    body: Result<Json<WorkoutUpdateRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Ok(Json(body)) = body else {
        return Err(ApiError::bad_request("Invalid JSON body"));
    };

    let date = body
        .date
        .as_deref()
        .and_then(parse_iso_date)
        .ok_or_else(|| ApiError::bad_request("Missing or invalid date"))?;
    let week_start = body
        .week_start
        .as_deref()
        .and_then(parse_iso_date)
        .ok_or_else(|| ApiError::bad_request("Missing or invalid weekStart"))?;

    let updates = match body.updates {
        Some(Value::Object(map)) => map,
        _ => return Err(ApiError::bad_request("Missing or invalid updates")),
    };

    if updates.keys().any(|key| !WORKOUT_FIELDS.contains(&key.as_str())) {
        return Err(ApiError::bad_request("Invalid update fields"));
    }

    if updates.is_empty() {
        return Err(ApiError::bad_request("Missing or invalid updates"));
    }

    if !is_date_in_week(date, week_start) {
        return Err(ApiError::bad_request("Date is outside the requested week"));
    }

    let mut cleaned = Map::new();
    for (key, value) in &updates {
        let normalized = clean_workout_value(key, value)
            .map_err(|_| ApiError::bad_request("Invalid update value"))?;
        cleaned.insert(key.clone(), normalized);
    }

    let week = state
        .store
        .get_workout_week(user_id, week_start)
        .await
        .map_err(|err| {
            tracing::error!(%user_id, "failed to load workout week: {err}");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load workout plan",
            )
        })?;
    let Some((week, _)) = week else {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "Week plan not found"));
    };

    state
        .store
        .upsert_workout_day_fields(week.id, date, &build_update(&cleaned))
        .await
        .map_err(|err| {
            tracing::error!(%user_id, "failed to update workout day: {err}");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to update workout plan",
            )
        })?;

    let refreshed = state
        .store
        .get_workout_week(user_id, week_start)
        .await
        .map_err(|err| {
            tracing::error!(%user_id, "failed to reload workout week: {err}");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load updated workout plan",
            )
        })?;
    let Some((week, days)) = refreshed else {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "Week plan not found"));
    };

    Ok(Json(json!({ "weekPlan": week, "dayPlans": days })))
}
