use crate::db::{BodyMetrics, PlanStore};
use crate::domain::plan::{self, GeneratedBy, PlanKind};
use crate::services::llm::{ChatMessage, ChatModel};
use crate::time_utils::build_week_days;
use chrono::NaiveDate;
use std::sync::Arc;
use uuid::Uuid;

const SYSTEM_PROMPT: &str = "You are a health planning assistant. Return JSON only, no markdown.";
const GENERATION_TEMPERATURE: f32 = 0.0;

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("missing body metrics")]
    MissingMetrics,
    #[error("LLM request failed")]
    Llm(#[source] anyhow::Error),
    #[error("empty LLM response")]
    EmptyResponse,
    #[error("invalid LLM response")]
    InvalidResponse,
    #[error("empty plan output")]
    EmptyPlan,
    #[error("failed to {stage}")]
    Storage {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

fn storage(stage: &'static str) -> impl FnOnce(anyhow::Error) -> GenerateError {
    move |source| GenerateError::Storage { stage, source }
}

fn build_user_prompt(
    week_start: NaiveDate,
    timezone: &str,
    days: &[NaiveDate],
    metrics: &BodyMetrics,
) -> String {
    let dates = days
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Create a simple 7-day meal and workout plan.\n\
         Week start: {week_start}\n\
         Timezone: {timezone}\n\
         Dates: {dates}\n\
         User metrics: {metrics}\n\
         Return JSON with keys meals and workouts.\n\
         Meals: array of 7 items with date, breakfast, lunch, dinner, snacks, notes.\n\
         Workouts: array of 7 items with date, cardio, strength, duration_min, intensity, notes.\n\
         Use short plain text. Use null for rest day fields. Duration_min should be an integer or null.",
        metrics = metrics.prompt_json()
    )
}

/// Generates and persists one user's week, or a whole week for every user
/// with a body-metrics profile. Both entry points run the same pipeline:
/// prompt, parse, validate, week upserts, day upserts, best-effort rollback
/// of week rows created by a failed attempt.
#[derive(Clone)]
pub struct WeeklyPlanner {
    store: Arc<dyn PlanStore>,
    llm: Arc<dyn ChatModel>,
}

impl WeeklyPlanner {
    pub fn new(store: Arc<dyn PlanStore>, llm: Arc<dyn ChatModel>) -> Self {
        Self { store, llm }
    }

    pub async fn generate_for_user(
        &self,
        user_id: Uuid,
        week_start: NaiveDate,
        timezone: &str,
        generated_by: GeneratedBy,
    ) -> Result<(), GenerateError> {
        let metrics = self
            .store
            .get_body_metrics(user_id)
            .await
            .map_err(storage("load body metrics"))?
            .ok_or(GenerateError::MissingMetrics)?;
        self.generate_with_metrics(&metrics, week_start, timezone, generated_by)
            .await
    }

    /// Sequential loop over every profiled user. One user's failure is a
    /// logged skip, never an abort. Returns the number of fully committed
    /// plans.
    pub async fn generate_for_all(
        &self,
        week_start: NaiveDate,
        timezone: &str,
    ) -> anyhow::Result<u32> {
        let users = self.store.list_body_metrics().await?;
        let mut generated: u32 = 0;
        for metrics in &users {
            match self
                .generate_with_metrics(metrics, week_start, timezone, GeneratedBy::Cron)
                .await
            {
                Ok(()) => generated += 1,
                Err(err) => {
                    tracing::warn!(user_id = %metrics.user_id, "skipping user: {err}");
                }
            }
        }
        Ok(generated)
    }

    async fn generate_with_metrics(
        &self,
        metrics: &BodyMetrics,
        week_start: NaiveDate,
        timezone: &str,
        generated_by: GeneratedBy,
    ) -> Result<(), GenerateError> {
        let user_id = metrics.user_id;
        let days = build_week_days(week_start);
        let messages = [
            ChatMessage::System(SYSTEM_PROMPT.to_string()),
            ChatMessage::User(build_user_prompt(week_start, timezone, &days, metrics)),
        ];

        let turn = self
            .llm
            .invoke(&messages, &[], GENERATION_TEMPERATURE)
            .await
            .map_err(GenerateError::Llm)?;

        let content =
            plan::extract_content_text(&turn.content).ok_or(GenerateError::EmptyResponse)?;
        let plans = plan::parse_plans(&content, &days).ok_or(GenerateError::InvalidResponse)?;
        if !plan::has_plan_content(&plans) {
            return Err(GenerateError::EmptyPlan);
        }

        // Created-this-attempt flags drive the rollback below.
        let meal_created = self
            .store
            .find_week_plan(PlanKind::Meal, user_id, week_start)
            .await
            .map_err(storage("load meal week plan"))?
            .is_none();
        let workout_created = self
            .store
            .find_week_plan(PlanKind::Workout, user_id, week_start)
            .await
            .map_err(storage("load workout week plan"))?
            .is_none();

        let meal_week = self
            .store
            .upsert_week_plan(PlanKind::Meal, user_id, week_start, timezone, generated_by)
            .await
            .map_err(storage("upsert meal week plan"))?;

        let workout_week = match self
            .store
            .upsert_week_plan(
                PlanKind::Workout,
                user_id,
                week_start,
                timezone,
                generated_by,
            )
            .await
        {
            Ok(id) => id,
            Err(source) => {
                if meal_created {
                    self.cleanup_week(PlanKind::Meal, meal_week, user_id).await;
                }
                return Err(GenerateError::Storage {
                    stage: "upsert workout week plan",
                    source,
                });
            }
        };

        if let Err(source) = self.store.upsert_meal_days(meal_week, &plans.meals).await {
            if meal_created {
                self.cleanup_week(PlanKind::Meal, meal_week, user_id).await;
            }
            if workout_created {
                self.cleanup_week(PlanKind::Workout, workout_week, user_id)
                    .await;
            }
            return Err(GenerateError::Storage {
                stage: "upsert meal day plans",
                source,
            });
        }

        if let Err(source) = self
            .store
            .upsert_workout_days(workout_week, &plans.workouts)
            .await
        {
            if workout_created {
                self.cleanup_week(PlanKind::Workout, workout_week, user_id)
                    .await;
            }
            if meal_created {
                self.cleanup_week(PlanKind::Meal, meal_week, user_id).await;
            }
            return Err(GenerateError::Storage {
                stage: "upsert workout day plans",
                source,
            });
        }

        Ok(())
    }

    /// Rollback compensation. A failed delete is logged and swallowed; it
    /// must not mask the error that triggered the rollback.
    async fn cleanup_week(&self, kind: PlanKind, id: Uuid, user_id: Uuid) {
        if let Err(err) = self.store.delete_week_plan(kind, id).await {
            tracing::warn!(%user_id, ?kind, %id, "failed to clean up week plan: {err}");
        }
    }
}
