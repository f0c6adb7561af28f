use crate::db::{MealDayUpdate, PlanStore, WorkoutDayUpdate};
use crate::domain::plan::{duration_field, text_field, PlanKind, MEAL_FIELDS, WORKOUT_FIELDS};
use crate::services::llm::{ChatMessage, ChatModel, ToolSpec};
use crate::time_utils::{is_date_in_week, parse_iso_date};
use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use uuid::Uuid;

const CHAT_TEMPERATURE: f32 = 0.3;
const MAX_TOOL_TURNS: usize = 5;

const CHAT_SYSTEM_PROMPT: &str = "You are a health assistant. Use tools to update plans when needed.\n\
Context includes weekStart, timezone, and optional selection fields. Use raw slotType text as provided.\n\
When updating plans, call tools with JSON input strings. Keep replies concise and helpful.";

/// The single week a conversation is authorized to touch. Tools cannot act
/// outside it.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub user_id: Uuid,
    pub week_start: NaiveDate,
    pub timezone: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent execution failed")]
    Execution(#[source] anyhow::Error),
    #[error("empty agent response")]
    EmptyReply,
}

fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "update_meal_item".to_string(),
            description:
                "Update a single meal slot. Input JSON: { weekStart, date, mealType|slotType, content }"
                    .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "weekStart": {"type": "string", "description": "Monday of the plan week, YYYY-MM-DD; defaults to the conversation's week"},
                    "date": {"type": "string", "description": "Day to update, YYYY-MM-DD"},
                    "mealType": {"type": "string", "enum": MEAL_FIELDS},
                    "content": {"type": ["string", "null"]}
                },
                "required": ["date"]
            }),
        },
        ToolSpec {
            name: "update_meal_day".to_string(),
            description:
                "Update meal plan for a day. Input JSON: { weekStart, date, breakfast, lunch, dinner, snacks, notes }"
                    .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "weekStart": {"type": "string"},
                    "date": {"type": "string"},
                    "breakfast": {"type": ["string", "null"]},
                    "lunch": {"type": ["string", "null"]},
                    "dinner": {"type": ["string", "null"]},
                    "snacks": {"type": ["string", "null"]},
                    "notes": {"type": ["string", "null"]}
                },
                "required": ["date"]
            }),
        },
        ToolSpec {
            name: "update_workout_day".to_string(),
            description:
                "Update workout plan for a day. Input JSON: { weekStart, date, cardio, strength, duration_min, intensity, notes }"
                    .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "weekStart": {"type": "string"},
                    "date": {"type": "string"},
                    "cardio": {"type": ["string", "null"]},
                    "strength": {"type": ["string", "null"]},
                    "duration_min": {"type": ["integer", "null"]},
                    "intensity": {"type": ["string", "null"]},
                    "notes": {"type": ["string", "null"]}
                },
                "required": ["date"]
            }),
        },
    ]
}

fn parse_json_input(input: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(input) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Accepts an omitted weekStart (defaults to the bound week) or an exact
/// match of the bound week; anything else is rejected.
fn validate_week_start(value: Option<&Value>, bound: NaiveDate) -> Option<NaiveDate> {
    match value {
        None => Some(bound),
        Some(Value::String(raw)) => {
            let parsed = parse_iso_date(raw)?;
            if parsed == bound {
                Some(parsed)
            } else {
                None
            }
        }
        Some(_) => None,
    }
}

fn validate_date(value: Option<&Value>, week_start: NaiveDate) -> Option<NaiveDate> {
    let raw = value?.as_str()?;
    let date = parse_iso_date(raw)?;
    if is_date_in_week(date, week_start) {
        Some(date)
    } else {
        None
    }
}

fn build_meal_updates(payload: &Map<String, Value>) -> Option<MealDayUpdate> {
    let mut updates = MealDayUpdate::default();
    for field in MEAL_FIELDS {
        let Some(value) = payload.get(field) else {
            continue;
        };
        let normalized = text_field(value).ok()?;
        match field {
            "breakfast" => updates.breakfast = Some(normalized),
            "lunch" => updates.lunch = Some(normalized),
            "dinner" => updates.dinner = Some(normalized),
            "snacks" => updates.snacks = Some(normalized),
            "notes" => updates.notes = Some(normalized),
            _ => unreachable!(),
        }
    }
    if updates.is_empty() {
        None
    } else {
        Some(updates)
    }
}

fn build_workout_updates(payload: &Map<String, Value>) -> Option<WorkoutDayUpdate> {
    let mut updates = WorkoutDayUpdate::default();
    for field in WORKOUT_FIELDS {
        let Some(value) = payload.get(field) else {
            continue;
        };
        if field == "duration_min" {
            updates.duration_min = Some(duration_field(value).ok()?);
        } else {
            let normalized = text_field(value).ok()?;
            match field {
                "cardio" => updates.cardio = Some(normalized),
                "strength" => updates.strength = Some(normalized),
                "intensity" => updates.intensity = Some(normalized),
                "notes" => updates.notes = Some(normalized),
                _ => unreachable!(),
            }
        }
    }
    if updates.is_empty() {
        None
    } else {
        Some(updates)
    }
}

/// Tool bridge plus the bounded tool-calling chat loop. Every tool returns
/// a short human-readable status string, since the caller is a
/// conversational agent relaying text to the end user.
#[derive(Clone)]
pub struct PlanAgent {
    store: Arc<dyn PlanStore>,
    llm: Arc<dyn ChatModel>,
}

impl PlanAgent {
    pub fn new(store: Arc<dyn PlanStore>, llm: Arc<dyn ChatModel>) -> Self {
        Self { store, llm }
    }

    pub async fn chat(
        &self,
        message: &str,
        ctx: &AgentContext,
        selection: Option<&Value>,
    ) -> Result<String, AgentError> {
        let context_json = json!({
            "weekStart": ctx.week_start.to_string(),
            "timezone": ctx.timezone,
            "selected": selection.cloned().unwrap_or(Value::Null),
        });
        let mut messages = vec![
            ChatMessage::System(CHAT_SYSTEM_PROMPT.to_string()),
            ChatMessage::User(format!(
                "User message: {message}\nContext: {context_json}\nReturn plain text for the reply."
            )),
        ];
        let tools = tool_specs();

        for _ in 0..MAX_TOOL_TURNS {
            let turn = self
                .llm
                .invoke(&messages, &tools, CHAT_TEMPERATURE)
                .await
                .map_err(AgentError::Execution)?;

            if turn.tool_calls.is_empty() {
                let reply = turn
                    .content
                    .as_str()
                    .map(str::trim)
                    .unwrap_or_default()
                    .to_string();
                if reply.is_empty() {
                    return Err(AgentError::EmptyReply);
                }
                return Ok(reply);
            }

            messages.push(ChatMessage::Assistant {
                content: turn.content.as_str().map(str::to_string),
                tool_calls: turn.tool_calls.clone(),
            });
            for call in turn.tool_calls {
                let result = self.execute_tool(&call.name, &call.arguments, ctx).await;
                messages.push(ChatMessage::Tool {
                    call_id: call.id,
                    content: result,
                });
            }
        }

        Err(AgentError::Execution(anyhow::anyhow!(
            "exceeded {MAX_TOOL_TURNS} tool turns"
        )))
    }

    pub async fn execute_tool(&self, name: &str, input: &str, ctx: &AgentContext) -> String {
        match name {
            "update_meal_item" => self.update_meal_item(input, ctx).await,
            "update_meal_day" => self.update_meal_day(input, ctx).await,
            "update_workout_day" => self.update_workout_day(input, ctx).await,
            _ => format!("Unknown tool: {name}."),
        }
    }

    async fn load_week_plan_id(
        &self,
        kind: PlanKind,
        user_id: Uuid,
        week_start: NaiveDate,
    ) -> Option<Uuid> {
        self.store
            .find_week_plan(kind, user_id, week_start)
            .await
            .ok()
            .flatten()
    }

    async fn update_meal_item(&self, input: &str, ctx: &AgentContext) -> String {
        let Some(payload) = parse_json_input(input) else {
            return "Invalid tool input. Provide JSON.".to_string();
        };

        let Some(week_start) = validate_week_start(payload.get("weekStart"), ctx.week_start) else {
            return "Invalid weekStart.".to_string();
        };

        let Some(date) = validate_date(payload.get("date"), week_start) else {
            return "Invalid date.".to_string();
        };

        let meal_type = payload
            .get("mealType")
            .or_else(|| payload.get("slotType"))
            .and_then(Value::as_str);
        let Some(meal_type) = meal_type.filter(|t| MEAL_FIELDS.contains(t)) else {
            return "Invalid meal type.".to_string();
        };

        let content = match text_field(payload.get("content").unwrap_or(&Value::Null)) {
            Ok(value) => value,
            Err(_) => return "Invalid meal content.".to_string(),
        };

        // Tools never create a week plan.
        let Some(week_plan_id) = self
            .load_week_plan_id(PlanKind::Meal, ctx.user_id, week_start)
            .await
        else {
            return "Meal week plan not found.".to_string();
        };

        let mut update = MealDayUpdate::default();
        match meal_type {
            "breakfast" => update.breakfast = Some(content),
            "lunch" => update.lunch = Some(content),
            "dinner" => update.dinner = Some(content),
            "snacks" => update.snacks = Some(content),
            "notes" => update.notes = Some(content),
            _ => unreachable!(),
        }

        if self
            .store
            .upsert_meal_day_fields(week_plan_id, date, &update)
            .await
            .is_err()
        {
            return "Failed to update meal plan.".to_string();
        }
        "Meal plan updated.".to_string()
    }

    async fn update_meal_day(&self, input: &str, ctx: &AgentContext) -> String {
        let Some(payload) = parse_json_input(input) else {
            return "Invalid tool input. Provide JSON.".to_string();
        };

        let Some(week_start) = validate_week_start(payload.get("weekStart"), ctx.week_start) else {
            return "Invalid weekStart.".to_string();
        };

        let Some(date) = validate_date(payload.get("date"), week_start) else {
            return "Invalid date.".to_string();
        };

        let Some(updates) = build_meal_updates(&payload) else {
            return "Invalid meal updates.".to_string();
        };

        let Some(week_plan_id) = self
            .load_week_plan_id(PlanKind::Meal, ctx.user_id, week_start)
            .await
        else {
            return "Meal week plan not found.".to_string();
        };

        if self
            .store
            .upsert_meal_day_fields(week_plan_id, date, &updates)
            .await
            .is_err()
        {
            return "Failed to update meal plan.".to_string();
        }
        "Meal day plan updated.".to_string()
    }

    async fn update_workout_day(&self, input: &str, ctx: &AgentContext) -> String {
        let Some(payload) = parse_json_input(input) else {
            return "Invalid tool input. Provide JSON.".to_string();
        };

        let Some(week_start) = validate_week_start(payload.get("weekStart"), ctx.week_start) else {
            return "Invalid weekStart.".to_string();
        };

        let Some(date) = validate_date(payload.get("date"), week_start) else {
            return "Invalid date.".to_string();
        };

        let Some(updates) = build_workout_updates(&payload) else {
            return "Invalid workout updates.".to_string();
        };

        let Some(week_plan_id) = self
            .load_week_plan_id(PlanKind::Workout, ctx.user_id, week_start)
            .await
        else {
            return "Workout week plan not found.".to_string();
        };

        if self
            .store
            .upsert_workout_day_fields(week_plan_id, date, &updates)
            .await
            .is_err()
        {
            return "Failed to update workout plan.".to_string();
        }
        "Workout day plan updated.".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryPlanStore;
    use crate::services::llm::{ModelTurn, ToolCallRequest};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedModel {
        replies: Mutex<VecDeque<anyhow::Result<ModelTurn>>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<anyhow::Result<ModelTurn>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn invoke(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSpec],
            _temperature: f32,
        ) -> anyhow::Result<ModelTurn> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("no scripted reply left")))
        }
    }

    fn week_start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 9).unwrap()
    }

    fn context(user_id: Uuid) -> AgentContext {
        AgentContext {
            user_id,
            week_start: week_start(),
            timezone: "UTC".to_string(),
        }
    }

    fn agent_without_model(store: Arc<MemoryPlanStore>) -> PlanAgent {
        PlanAgent::new(store, Arc::new(ScriptedModel::new(Vec::new())))
    }

    #[tokio::test]
    async fn meal_item_update_writes_single_slot() {
        let user = Uuid::new_v4();
        let store = Arc::new(MemoryPlanStore::default());
        let week_id = store.seed_week_plan(PlanKind::Meal, user, week_start());
        let agent = agent_without_model(store.clone());

        let input = json!({
            "date": "2026-02-10",
            "mealType": "lunch",
            "content": "  Chicken wrap  "
        })
        .to_string();
        let reply = agent
            .execute_tool("update_meal_item", &input, &context(user))
            .await;
        assert_eq!(reply, "Meal plan updated.");

        let days = store.meal_days.lock().unwrap();
        let day = days
            .get(&(week_id, NaiveDate::from_ymd_opt(2026, 2, 10).unwrap()))
            .unwrap();
        assert_eq!(day.lunch.as_deref(), Some("Chicken wrap"));
        assert!(day.breakfast.is_none());
    }

    #[tokio::test]
    async fn slot_type_alias_is_accepted() {
        let user = Uuid::new_v4();
        let store = Arc::new(MemoryPlanStore::default());
        store.seed_week_plan(PlanKind::Meal, user, week_start());
        let agent = agent_without_model(store);

        let input = json!({
            "date": "2026-02-09",
            "slotType": "breakfast",
            "content": "Eggs"
        })
        .to_string();
        let reply = agent
            .execute_tool("update_meal_item", &input, &context(user))
            .await;
        assert_eq!(reply, "Meal plan updated.");
    }

    #[tokio::test]
    async fn date_outside_bound_week_is_rejected_without_writes() {
        let user = Uuid::new_v4();
        let store = Arc::new(MemoryPlanStore::default());
        store.seed_week_plan(PlanKind::Meal, user, week_start());
        let agent = agent_without_model(store.clone());

        // One day past the week's Sunday.
        let input = json!({
            "date": "2026-02-16",
            "mealType": "dinner",
            "content": "Pasta"
        })
        .to_string();
        let reply = agent
            .execute_tool("update_meal_item", &input, &context(user))
            .await;
        assert_eq!(reply, "Invalid date.");
        assert!(store.meal_days.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn foreign_week_start_is_rejected() {
        let user = Uuid::new_v4();
        let store = Arc::new(MemoryPlanStore::default());
        store.seed_week_plan(PlanKind::Meal, user, week_start());
        let agent = agent_without_model(store.clone());

        let input = json!({
            "weekStart": "2026-02-16",
            "date": "2026-02-16",
            "mealType": "dinner",
            "content": "Pasta"
        })
        .to_string();
        let reply = agent
            .execute_tool("update_meal_item", &input, &context(user))
            .await;
        assert_eq!(reply, "Invalid weekStart.");
        assert!(store.meal_days.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tools_never_create_a_week_plan() {
        let user = Uuid::new_v4();
        let store = Arc::new(MemoryPlanStore::default());
        let agent = agent_without_model(store.clone());

        let input = json!({
            "date": "2026-02-10",
            "mealType": "lunch",
            "content": "Soup"
        })
        .to_string();
        let reply = agent
            .execute_tool("update_meal_item", &input, &context(user))
            .await;
        assert_eq!(reply, "Meal week plan not found.");
        assert_eq!(store.week_plan_count(), 0);
    }

    #[tokio::test]
    async fn meal_day_update_requires_at_least_one_field() {
        let user = Uuid::new_v4();
        let store = Arc::new(MemoryPlanStore::default());
        store.seed_week_plan(PlanKind::Meal, user, week_start());
        let agent = agent_without_model(store);

        let input = json!({"date": "2026-02-10"}).to_string();
        let reply = agent
            .execute_tool("update_meal_day", &input, &context(user))
            .await;
        assert_eq!(reply, "Invalid meal updates.");
    }

    #[tokio::test]
    async fn workout_day_update_normalizes_duration() {
        let user = Uuid::new_v4();
        let store = Arc::new(MemoryPlanStore::default());
        let week_id = store.seed_week_plan(PlanKind::Workout, user, week_start());
        let agent = agent_without_model(store.clone());

        let input = json!({
            "date": "2026-02-12",
            "cardio": "Row",
            "duration_min": "45"
        })
        .to_string();
        let reply = agent
            .execute_tool("update_workout_day", &input, &context(user))
            .await;
        assert_eq!(reply, "Workout day plan updated.");

        let days = store.workout_days.lock().unwrap();
        let day = days
            .get(&(week_id, NaiveDate::from_ymd_opt(2026, 2, 12).unwrap()))
            .unwrap();
        assert_eq!(day.duration_min, Some(45));
        assert_eq!(day.cardio.as_deref(), Some("Row"));
    }

    #[tokio::test]
    async fn workout_duration_of_wrong_type_is_rejected() {
        let user = Uuid::new_v4();
        let store = Arc::new(MemoryPlanStore::default());
        store.seed_week_plan(PlanKind::Workout, user, week_start());
        let agent = agent_without_model(store.clone());

        let input = json!({
            "date": "2026-02-12",
            "duration_min": true
        })
        .to_string();
        let reply = agent
            .execute_tool("update_workout_day", &input, &context(user))
            .await;
        assert_eq!(reply, "Invalid workout updates.");
        assert!(store.workout_days.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_tool_input_is_rejected() {
        let user = Uuid::new_v4();
        let store = Arc::new(MemoryPlanStore::default());
        let agent = agent_without_model(store);

        let reply = agent
            .execute_tool("update_meal_item", "not json", &context(user))
            .await;
        assert_eq!(reply, "Invalid tool input. Provide JSON.");
    }

    #[tokio::test]
    async fn chat_runs_tool_call_then_returns_final_text() {
        let user = Uuid::new_v4();
        let store = Arc::new(MemoryPlanStore::default());
        let week_id = store.seed_week_plan(PlanKind::Meal, user, week_start());

        let tool_turn = ModelTurn {
            content: Value::Null,
            tool_calls: vec![ToolCallRequest {
                id: "call_1".to_string(),
                name: "update_meal_item".to_string(),
                arguments: json!({
                    "date": "2026-02-11",
                    "mealType": "dinner",
                    "content": "Stir fry"
                })
                .to_string(),
            }],
        };
        let final_turn = ModelTurn {
            content: Value::String("  Updated Wednesday's dinner for you. ".to_string()),
            tool_calls: Vec::new(),
        };
        let llm = Arc::new(ScriptedModel::new(vec![Ok(tool_turn), Ok(final_turn)]));
        let agent = PlanAgent::new(store.clone(), llm);

        let reply = agent
            .chat("set wednesday dinner to stir fry", &context(user), None)
            .await
            .unwrap();
        assert_eq!(reply, "Updated Wednesday's dinner for you.");

        let days = store.meal_days.lock().unwrap();
        let day = days
            .get(&(week_id, NaiveDate::from_ymd_opt(2026, 2, 11).unwrap()))
            .unwrap();
        assert_eq!(day.dinner.as_deref(), Some("Stir fry"));
    }

    #[tokio::test]
    async fn chat_empty_reply_is_an_error() {
        let user = Uuid::new_v4();
        let store = Arc::new(MemoryPlanStore::default());
        let llm = Arc::new(ScriptedModel::new(vec![Ok(ModelTurn {
            content: Value::String("   ".to_string()),
            tool_calls: Vec::new(),
        })]));
        let agent = PlanAgent::new(store, llm);

        let err = agent.chat("hello", &context(user), None).await.unwrap_err();
        assert!(matches!(err, AgentError::EmptyReply));
    }
}
