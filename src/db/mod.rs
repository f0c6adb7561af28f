use crate::domain::plan::{GeneratedBy, MealDayPlan, PlanKind, WorkoutDayPlan};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Per-user body composition profile. Written by the profile flow; this
/// service only reads it as prompt context.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BodyMetrics {
    pub user_id: Uuid,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    pub gender: Option<String>,
    pub age: Option<i32>,
    pub body_fat_pct: Option<f64>,
    pub muscle_pct: Option<f64>,
    pub subcutaneous_fat: Option<f64>,
    pub visceral_fat: Option<f64>,
    pub bmi: Option<f64>,
    pub water_pct: Option<f64>,
    pub protein_pct: Option<f64>,
    pub bone_mass: Option<f64>,
    pub bmr: Option<f64>,
}

impl BodyMetrics {
    /// JSON for the LLM prompt, with the user identifier stripped.
    pub fn prompt_json(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.remove("user_id");
        }
        value
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct WeekPlanRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub week_start_date: NaiveDate,
    pub timezone: String,
    pub generated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct WorkoutDayRow {
    pub id: Uuid,
    pub week_plan_id: Uuid,
    pub date: NaiveDate,
    pub cardio: Option<String>,
    pub strength: Option<String>,
    pub duration_min: Option<i32>,
    pub intensity: Option<String>,
    pub notes: Option<String>,
}

/// Partial update for one meal day. Outer None = field untouched,
/// inner None = field cleared to null.
#[derive(Debug, Clone, Default)]
pub struct MealDayUpdate {
    pub breakfast: Option<Option<String>>,
    pub lunch: Option<Option<String>>,
    pub dinner: Option<Option<String>>,
    pub snacks: Option<Option<String>>,
    pub notes: Option<Option<String>>,
}

impl MealDayUpdate {
    pub fn is_empty(&self) -> bool {
        self.breakfast.is_none()
            && self.lunch.is_none()
            && self.dinner.is_none()
            && self.snacks.is_none()
            && self.notes.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkoutDayUpdate {
    pub cardio: Option<Option<String>>,
    pub strength: Option<Option<String>>,
    pub duration_min: Option<Option<i32>>,
    pub intensity: Option<Option<String>>,
    pub notes: Option<Option<String>>,
}

impl WorkoutDayUpdate {
    pub fn is_empty(&self) -> bool {
        self.cardio.is_none()
            && self.strength.is_none()
            && self.duration_min.is_none()
            && self.intensity.is_none()
            && self.notes.is_none()
    }
}

/// Typed storage operations for the plan tables. Upserts are keyed by the
/// declared conflict keys: `(user_id, week_start_date)` for week rows,
/// `(week_plan_id, date)` for day rows.
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn list_body_metrics(&self) -> Result<Vec<BodyMetrics>>;
    async fn get_body_metrics(&self, user_id: Uuid) -> Result<Option<BodyMetrics>>;

    async fn find_week_plan(
        &self,
        kind: PlanKind,
        user_id: Uuid,
        week_start: NaiveDate,
    ) -> Result<Option<Uuid>>;

    async fn upsert_week_plan(
        &self,
        kind: PlanKind,
        user_id: Uuid,
        week_start: NaiveDate,
        timezone: &str,
        generated_by: GeneratedBy,
    ) -> Result<Uuid>;

    async fn delete_week_plan(&self, kind: PlanKind, id: Uuid) -> Result<()>;

    async fn upsert_meal_days(&self, week_plan_id: Uuid, days: &[MealDayPlan]) -> Result<()>;
    async fn upsert_workout_days(&self, week_plan_id: Uuid, days: &[WorkoutDayPlan]) -> Result<()>;

    async fn upsert_meal_day_fields(
        &self,
        week_plan_id: Uuid,
        date: NaiveDate,
        update: &MealDayUpdate,
    ) -> Result<()>;

    async fn upsert_workout_day_fields(
        &self,
        week_plan_id: Uuid,
        date: NaiveDate,
        update: &WorkoutDayUpdate,
    ) -> Result<()>;

    async fn get_workout_week(
        &self,
        user_id: Uuid,
        week_start: NaiveDate,
    ) -> Result<Option<(WeekPlanRow, Vec<WorkoutDayRow>)>>;
}

fn week_table(kind: PlanKind) -> &'static str {
    match kind {
        PlanKind::Meal => "meal_week_plans",
        PlanKind::Workout => "workout_week_plans",
    }
}

#[derive(Clone)]
pub struct PgPlanStore {
    pool: PgPool,
}

impl PgPlanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlanStore for PgPlanStore {
    async fn list_body_metrics(&self) -> Result<Vec<BodyMetrics>> {
        let rows = sqlx::query_as::<_, BodyMetrics>(
            r#"
            SELECT
                user_id, height_cm, weight_kg, gender, age, body_fat_pct,
                muscle_pct, subcutaneous_fat, visceral_fat, bmi, water_pct,
                protein_pct, bone_mass, bmr
            FROM body_metrics
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_body_metrics(&self, user_id: Uuid) -> Result<Option<BodyMetrics>> {
        let row = sqlx::query_as::<_, BodyMetrics>(
            r#"
            SELECT
                user_id, height_cm, weight_kg, gender, age, body_fat_pct,
                muscle_pct, subcutaneous_fat, visceral_fat, bmi, water_pct,
                protein_pct, bone_mass, bmr
            FROM body_metrics
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_week_plan(
        &self,
        kind: PlanKind,
        user_id: Uuid,
        week_start: NaiveDate,
    ) -> Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(&format!(
            r#"
            SELECT id FROM {}
            WHERE user_id = $1
              AND week_start_date = $2
            "#,
            week_table(kind)
        ))
        .bind(user_id)
        .bind(week_start)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn upsert_week_plan(
        &self,
        kind: PlanKind,
        user_id: Uuid,
        week_start: NaiveDate,
        timezone: &str,
        generated_by: GeneratedBy,
    ) -> Result<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(&format!(
            r#"
            INSERT INTO {} (user_id, week_start_date, timezone, generated_by)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, week_start_date) DO UPDATE
            SET timezone = EXCLUDED.timezone,
                generated_by = EXCLUDED.generated_by,
                updated_at = NOW()
            RETURNING id
            "#,
            week_table(kind)
        ))
        .bind(user_id)
        .bind(week_start)
        .bind(timezone)
        .bind(generated_by.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn delete_week_plan(&self, kind: PlanKind, id: Uuid) -> Result<()> {
        sqlx::query(&format!("DELETE FROM {} WHERE id = $1", week_table(kind)))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_meal_days(&self, week_plan_id: Uuid, days: &[MealDayPlan]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for day in days {
            sqlx::query(
                r#"
                INSERT INTO meal_day_plans (week_plan_id, date, breakfast, lunch, dinner, snacks, notes)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (week_plan_id, date) DO UPDATE
                SET breakfast = EXCLUDED.breakfast,
                    lunch = EXCLUDED.lunch,
                    dinner = EXCLUDED.dinner,
                    snacks = EXCLUDED.snacks,
                    notes = EXCLUDED.notes,
                    updated_at = NOW()
                "#,
            )
            .bind(week_plan_id)
            .bind(day.date)
            .bind(&day.breakfast)
            .bind(&day.lunch)
            .bind(&day.dinner)
            .bind(&day.snacks)
            .bind(&day.notes)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_workout_days(&self, week_plan_id: Uuid, days: &[WorkoutDayPlan]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for day in days {
            sqlx::query(
                r#"
                INSERT INTO workout_day_plans (week_plan_id, date, cardio, strength, duration_min, intensity, notes)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (week_plan_id, date) DO UPDATE
                SET cardio = EXCLUDED.cardio,
                    strength = EXCLUDED.strength,
                    duration_min = EXCLUDED.duration_min,
                    intensity = EXCLUDED.intensity,
                    notes = EXCLUDED.notes,
                    updated_at = NOW()
                "#,
            )
            .bind(week_plan_id)
            .bind(day.date)
            .bind(&day.cardio)
            .bind(&day.strength)
            .bind(day.duration_min)
            .bind(&day.intensity)
            .bind(&day.notes)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_meal_day_fields(
        &self,
        week_plan_id: Uuid,
        date: NaiveDate,
        update: &MealDayUpdate,
    ) -> Result<()> {
        // Absent fields keep their stored values on conflict.
        sqlx::query(
            r#"
            INSERT INTO meal_day_plans (week_plan_id, date, breakfast, lunch, dinner, snacks, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (week_plan_id, date) DO UPDATE
            SET breakfast = CASE WHEN $8 THEN EXCLUDED.breakfast ELSE meal_day_plans.breakfast END,
                lunch = CASE WHEN $9 THEN EXCLUDED.lunch ELSE meal_day_plans.lunch END,
                dinner = CASE WHEN $10 THEN EXCLUDED.dinner ELSE meal_day_plans.dinner END,
                snacks = CASE WHEN $11 THEN EXCLUDED.snacks ELSE meal_day_plans.snacks END,
                notes = CASE WHEN $12 THEN EXCLUDED.notes ELSE meal_day_plans.notes END,
                updated_at = NOW()
            "#,
        )
        .bind(week_plan_id)
        .bind(date)
        .bind(update.breakfast.clone().flatten())
        .bind(update.lunch.clone().flatten())
        .bind(update.dinner.clone().flatten())
        .bind(update.snacks.clone().flatten())
        .bind(update.notes.clone().flatten())
        .bind(update.breakfast.is_some())
        .bind(update.lunch.is_some())
        .bind(update.dinner.is_some())
        .bind(update.snacks.is_some())
        .bind(update.notes.is_some())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_workout_day_fields(
        &self,
        week_plan_id: Uuid,
        date: NaiveDate,
        update: &WorkoutDayUpdate,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workout_day_plans (week_plan_id, date, cardio, strength, duration_min, intensity, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (week_plan_id, date) DO UPDATE
            SET cardio = CASE WHEN $8 THEN EXCLUDED.cardio ELSE workout_day_plans.cardio END,
                strength = CASE WHEN $9 THEN EXCLUDED.strength ELSE workout_day_plans.strength END,
                duration_min = CASE WHEN $10 THEN EXCLUDED.duration_min ELSE workout_day_plans.duration_min END,
                intensity = CASE WHEN $11 THEN EXCLUDED.intensity ELSE workout_day_plans.intensity END,
                notes = CASE WHEN $12 THEN EXCLUDED.notes ELSE workout_day_plans.notes END,
                updated_at = NOW()
            "#,
        )
        .bind(week_plan_id)
        .bind(date)
        .bind(update.cardio.clone().flatten())
        .bind(update.strength.clone().flatten())
        .bind(update.duration_min.flatten())
        .bind(update.intensity.clone().flatten())
        .bind(update.notes.clone().flatten())
        .bind(update.cardio.is_some())
        .bind(update.strength.is_some())
        .bind(update.duration_min.is_some())
        .bind(update.intensity.is_some())
        .bind(update.notes.is_some())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_workout_week(
        &self,
        user_id: Uuid,
        week_start: NaiveDate,
    ) -> Result<Option<(WeekPlanRow, Vec<WorkoutDayRow>)>> {
        let week = sqlx::query_as::<_, WeekPlanRow>(
            r#"
            SELECT id, user_id, week_start_date, timezone, generated_by, created_at, updated_at
            FROM workout_week_plans
            WHERE user_id = $1
              AND week_start_date = $2
            "#,
        )
        .bind(user_id)
        .bind(week_start)
        .fetch_optional(&self.pool)
        .await?;

        let Some(week) = week else {
            return Ok(None);
        };

        let days = sqlx::query_as::<_, WorkoutDayRow>(
            r#"
            SELECT id, week_plan_id, date, cardio, strength, duration_min, intensity, notes
            FROM workout_day_plans
            WHERE week_plan_id = $1
            ORDER BY date ASC
            "#,
        )
        .bind(week.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some((week, days)))
    }
}

#[cfg(test)]
pub mod memory {
    //! In-memory [`PlanStore`] with injectable failures for scenario tests.

    use super::*;
    use anyhow::anyhow;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryPlanStore {
        pub metrics: Mutex<Vec<BodyMetrics>>,
        pub week_plans: Mutex<HashMap<(PlanKind, Uuid, NaiveDate), WeekPlanRow>>,
        pub meal_days: Mutex<HashMap<(Uuid, NaiveDate), MealDayPlan>>,
        pub workout_days: Mutex<HashMap<(Uuid, NaiveDate), WorkoutDayRow>>,
        pub fail_meal_week: AtomicBool,
        pub fail_workout_week: AtomicBool,
        pub fail_meal_days: AtomicBool,
        pub fail_workout_days: AtomicBool,
    }

    impl MemoryPlanStore {
        pub fn with_metrics(users: &[Uuid]) -> Self {
            let store = Self::default();
            {
                let mut metrics = store.metrics.lock().unwrap();
                for &user_id in users {
                    metrics.push(sample_metrics(user_id));
                }
            }
            store
        }

        pub fn seed_week_plan(&self, kind: PlanKind, user_id: Uuid, week_start: NaiveDate) -> Uuid {
            let id = Uuid::new_v4();
            self.week_plans.lock().unwrap().insert(
                (kind, user_id, week_start),
                WeekPlanRow {
                    id,
                    user_id,
                    week_start_date: week_start,
                    timezone: "UTC".to_string(),
                    generated_by: "user".to_string(),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                },
            );
            id
        }

        pub fn week_plan_count(&self) -> usize {
            self.week_plans.lock().unwrap().len()
        }

        pub fn has_week_plan(&self, kind: PlanKind, user_id: Uuid, week_start: NaiveDate) -> bool {
            self.week_plans
                .lock()
                .unwrap()
                .contains_key(&(kind, user_id, week_start))
        }
    }

    pub fn sample_metrics(user_id: Uuid) -> BodyMetrics {
        BodyMetrics {
            user_id,
            height_cm: Some(178.0),
            weight_kg: Some(74.5),
            gender: Some("male".to_string()),
            age: Some(33),
            body_fat_pct: Some(18.2),
            muscle_pct: Some(42.0),
            subcutaneous_fat: Some(15.1),
            visceral_fat: Some(7.0),
            bmi: Some(23.5),
            water_pct: Some(55.0),
            protein_pct: Some(17.8),
            bone_mass: Some(3.2),
            bmr: Some(1700.0),
        }
    }

    #[async_trait]
    impl PlanStore for MemoryPlanStore {
        async fn list_body_metrics(&self) -> Result<Vec<BodyMetrics>> {
            Ok(self.metrics.lock().unwrap().clone())
        }

        async fn get_body_metrics(&self, user_id: Uuid) -> Result<Option<BodyMetrics>> {
            Ok(self
                .metrics
                .lock()
                .unwrap()
                .iter()
                .find(|m| m.user_id == user_id)
                .cloned())
        }

        async fn find_week_plan(
            &self,
            kind: PlanKind,
            user_id: Uuid,
            week_start: NaiveDate,
        ) -> Result<Option<Uuid>> {
            Ok(self
                .week_plans
                .lock()
                .unwrap()
                .get(&(kind, user_id, week_start))
                .map(|row| row.id))
        }

        async fn upsert_week_plan(
            &self,
            kind: PlanKind,
            user_id: Uuid,
            week_start: NaiveDate,
            timezone: &str,
            generated_by: GeneratedBy,
        ) -> Result<Uuid> {
            let failed = match kind {
                PlanKind::Meal => self.fail_meal_week.load(Ordering::SeqCst),
                PlanKind::Workout => self.fail_workout_week.load(Ordering::SeqCst),
            };
            if failed {
                return Err(anyhow!("injected week upsert failure"));
            }
            let mut plans = self.week_plans.lock().unwrap();
            let row = plans
                .entry((kind, user_id, week_start))
                .or_insert_with(|| WeekPlanRow {
                    id: Uuid::new_v4(),
                    user_id,
                    week_start_date: week_start,
                    timezone: timezone.to_string(),
                    generated_by: generated_by.as_str().to_string(),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                });
            row.timezone = timezone.to_string();
            row.generated_by = generated_by.as_str().to_string();
            row.updated_at = Utc::now();
            Ok(row.id)
        }

        async fn delete_week_plan(&self, kind: PlanKind, id: Uuid) -> Result<()> {
            self.week_plans
                .lock()
                .unwrap()
                .retain(|_, row| row.id != id);
            match kind {
                PlanKind::Meal => self
                    .meal_days
                    .lock()
                    .unwrap()
                    .retain(|(week_id, _), _| *week_id != id),
                PlanKind::Workout => self
                    .workout_days
                    .lock()
                    .unwrap()
                    .retain(|(week_id, _), _| *week_id != id),
            }
            Ok(())
        }

        async fn upsert_meal_days(&self, week_plan_id: Uuid, days: &[MealDayPlan]) -> Result<()> {
            if self.fail_meal_days.load(Ordering::SeqCst) {
                return Err(anyhow!("injected meal day upsert failure"));
            }
            let mut stored = self.meal_days.lock().unwrap();
            for day in days {
                stored.insert((week_plan_id, day.date), day.clone());
            }
            Ok(())
        }

        async fn upsert_workout_days(
            &self,
            week_plan_id: Uuid,
            days: &[WorkoutDayPlan],
        ) -> Result<()> {
            if self.fail_workout_days.load(Ordering::SeqCst) {
                return Err(anyhow!("injected workout day upsert failure"));
            }
            let mut stored = self.workout_days.lock().unwrap();
            for day in days {
                stored.insert(
                    (week_plan_id, day.date),
                    WorkoutDayRow {
                        id: Uuid::new_v4(),
                        week_plan_id,
                        date: day.date,
                        cardio: day.cardio.clone(),
                        strength: day.strength.clone(),
                        duration_min: day.duration_min,
                        intensity: day.intensity.clone(),
                        notes: day.notes.clone(),
                    },
                );
            }
            Ok(())
        }

        async fn upsert_meal_day_fields(
            &self,
            week_plan_id: Uuid,
            date: NaiveDate,
            update: &MealDayUpdate,
        ) -> Result<()> {
            if self.fail_meal_days.load(Ordering::SeqCst) {
                return Err(anyhow!("injected meal day upsert failure"));
            }
            let mut stored = self.meal_days.lock().unwrap();
            let day = stored.entry((week_plan_id, date)).or_insert(MealDayPlan {
                date,
                breakfast: None,
                lunch: None,
                dinner: None,
                snacks: None,
                notes: None,
            });
            if let Some(v) = &update.breakfast {
                day.breakfast = v.clone();
            }
            if let Some(v) = &update.lunch {
                day.lunch = v.clone();
            }
            if let Some(v) = &update.dinner {
                day.dinner = v.clone();
            }
            if let Some(v) = &update.snacks {
                day.snacks = v.clone();
            }
            if let Some(v) = &update.notes {
                day.notes = v.clone();
            }
            Ok(())
        }

        async fn upsert_workout_day_fields(
            &self,
            week_plan_id: Uuid,
            date: NaiveDate,
            update: &WorkoutDayUpdate,
        ) -> Result<()> {
            if self.fail_workout_days.load(Ordering::SeqCst) {
                return Err(anyhow!("injected workout day upsert failure"));
            }
            let mut stored = self.workout_days.lock().unwrap();
            let day = stored.entry((week_plan_id, date)).or_insert(WorkoutDayRow {
                id: Uuid::new_v4(),
                week_plan_id,
                date,
                cardio: None,
                strength: None,
                duration_min: None,
                intensity: None,
                notes: None,
            });
            if let Some(v) = &update.cardio {
                day.cardio = v.clone();
            }
            if let Some(v) = &update.strength {
                day.strength = v.clone();
            }
            if let Some(v) = update.duration_min {
                day.duration_min = v;
            }
            if let Some(v) = &update.intensity {
                day.intensity = v.clone();
            }
            if let Some(v) = &update.notes {
                day.notes = v.clone();
            }
            Ok(())
        }

        async fn get_workout_week(
            &self,
            user_id: Uuid,
            week_start: NaiveDate,
        ) -> Result<Option<(WeekPlanRow, Vec<WorkoutDayRow>)>> {
            let week = self
                .week_plans
                .lock()
                .unwrap()
                .get(&(PlanKind::Workout, user_id, week_start))
                .cloned();
            let Some(week) = week else {
                return Ok(None);
            };
            let mut days: Vec<WorkoutDayRow> = self
                .workout_days
                .lock()
                .unwrap()
                .values()
                .filter(|row| row.week_plan_id == week.id)
                .cloned()
                .collect();
            days.sort_by_key(|row| row.date);
            Ok(Some((week, days)))
        }
    }
}
