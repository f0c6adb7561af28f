use crate::services::agent::{AgentContext, AgentError};
use crate::state::SharedState;
use crate::web::plans::{parse_week_request, GenerateWeekRequest};
use crate::web::session::UserSession;
use crate::web::ApiError;
use axum::{
    extract::rejection::JsonRejection,
    extract::State,
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    message: Option<String>,
    week_start: Option<String>,
    timezone: Option<String>,
    /// Optional UI selection (date, slotType, view) echoed back and passed
    /// to the agent as context.
    context: Option<Value>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/agent-chat", post(agent_chat))
        .with_state(state)
}

async fn agent_chat(
    UserSession(user_id): UserSession,
    State(state): State<SharedState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Ok(Json(body)) = body else {
        return Err(ApiError::bad_request("Invalid JSON body"));
    };

    let message = body
        .message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing or invalid message"))?
        .to_string();

    let (week_start, timezone) = parse_week_request(&GenerateWeekRequest {
        week_start: body.week_start.clone(),
        timezone: body.timezone.clone(),
    })?;

    let ctx = AgentContext {
        user_id,
        week_start,
        timezone,
    };

    let reply = state
        .agent
        .chat(&message, &ctx, body.context.as_ref())
        .await
        .map_err(|err| match err {
            AgentError::Execution(source) => {
                tracing::warn!(%user_id, "agent execution failed: {source}");
                ApiError::new(StatusCode::BAD_GATEWAY, "Agent execution failed")
            }
            AgentError::EmptyReply => {
                ApiError::new(StatusCode::BAD_GATEWAY, "Empty agent response")
            }
        })?;

    Ok(Json(json!({
        "reply": reply,
        "context": body.context.unwrap_or(Value::Null),
    })))
}
