use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

pub const MEAL_FIELDS: [&str; 5] = ["breakfast", "lunch", "dinner", "snacks", "notes"];
pub const WORKOUT_FIELDS: [&str; 5] = ["cardio", "strength", "duration_min", "intensity", "notes"];

/// Which of the two plan tables a week belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanKind {
    Meal,
    Workout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratedBy {
    User,
    Cron,
}

impl GeneratedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            GeneratedBy::User => "user",
            GeneratedBy::Cron => "cron",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MealDayPlan {
    pub date: NaiveDate,
    pub breakfast: Option<String>,
    pub lunch: Option<String>,
    pub dinner: Option<String>,
    pub snacks: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkoutDayPlan {
    pub date: NaiveDate,
    pub cardio: Option<String>,
    pub strength: Option<String>,
    pub duration_min: Option<i32>,
    pub intensity: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeekPlans {
    pub meals: Vec<MealDayPlan>,
    pub workouts: Vec<WorkoutDayPlan>,
}

/// A field value whose JSON type is not acceptable for the target column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidField;

/// Generation-path text rule: only strings survive, trimmed, with
/// empty-after-trim collapsing to None.
pub fn normalize_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        _ => None,
    }
}

/// Generation-path duration rule: finite positive numbers round to the
/// nearest integer; numeric strings are parsed under the same rule; zero,
/// negatives, and everything else collapse to None.
pub fn normalize_duration(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => {
            let f = n.as_f64()?;
            if f > 0.0 {
                Some(f.round() as i32)
            } else {
                None
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<f64>() {
                Ok(f) if f.is_finite() && f > 0.0 => Some(f.round() as i32),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Agent-tool text rule: null is a valid "clear this field", a wrong JSON
/// type is an error rather than a silent null.
pub fn text_field(value: &Value) -> Result<Option<String>, InvalidField> {
    match value {
        Value::Null => Ok(None),
        Value::String(_) => Ok(normalize_text(value)),
        _ => Err(InvalidField),
    }
}

/// Agent-tool duration rule, same error semantics as [`text_field`].
pub fn duration_field(value: &Value) -> Result<Option<i32>, InvalidField> {
    match value {
        Value::Null => Ok(None),
        Value::Number(_) | Value::String(_) => Ok(normalize_duration(value)),
        _ => Err(InvalidField),
    }
}

/// Flattens model reply content to plain text. Providers return either a
/// bare string, a list of text parts, or a single `{text}` object.
pub fn extract_content_text(content: &Value) -> Option<String> {
    let combined = match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    Value::String(s) => out.push_str(s),
                    Value::Object(map) => out.push_str(&object_text(map)),
                    _ => {}
                }
            }
            out
        }
        Value::Object(map) if map.contains_key("text") => object_text(map),
        _ => return None,
    };
    if combined.is_empty() {
        None
    } else {
        Some(combined)
    }
}

fn object_text(map: &Map<String, Value>) -> String {
    match map.get("text") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn index_by_date(items: &[Value]) -> HashMap<&str, &Map<String, Value>> {
    let mut index = HashMap::new();
    for item in items {
        if let Some(record) = item.as_object() {
            if let Some(Value::String(date)) = record.get("date") {
                // Later duplicates win.
                index.insert(date.as_str(), record);
            }
        }
    }
    index
}

fn record_field(record: Option<&&Map<String, Value>>, key: &str) -> Option<String> {
    record
        .and_then(|r| r.get(key))
        .and_then(|v| normalize_text(v))
}

/// Parses raw model output into exactly one record per target date.
///
/// Tolerates prose around the JSON object by retrying on the first-`{` to
/// last-`}` substring. Missing days come back with every field null.
/// Returns None only when no JSON object can be recovered at all.
pub fn parse_plans(raw: &str, days: &[NaiveDate]) -> Option<WeekPlans> {
    let parsed: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => {
            let start = raw.find('{')?;
            let end = raw.rfind('}')?;
            if end <= start {
                return None;
            }
            serde_json::from_str(&raw[start..=end]).ok()?
        }
    };

    if !(parsed.is_object() || parsed.is_array()) {
        return None;
    }

    let empty = Vec::new();
    let meal_items = parsed
        .get("meals")
        .and_then(Value::as_array)
        .unwrap_or(&empty);
    let workout_items = parsed
        .get("workouts")
        .and_then(Value::as_array)
        .unwrap_or(&empty);

    let meal_index = index_by_date(meal_items);
    let workout_index = index_by_date(workout_items);

    let meals = days
        .iter()
        .map(|&date| {
            let key = date.to_string();
            let record = meal_index.get(key.as_str());
            MealDayPlan {
                date,
                breakfast: record_field(record, "breakfast"),
                lunch: record_field(record, "lunch"),
                dinner: record_field(record, "dinner"),
                snacks: record_field(record, "snacks"),
                notes: record_field(record, "notes"),
            }
        })
        .collect();

    let workouts = days
        .iter()
        .map(|&date| {
            let key = date.to_string();
            let record = workout_index.get(key.as_str());
            WorkoutDayPlan {
                date,
                cardio: record_field(record, "cardio"),
                strength: record_field(record, "strength"),
                duration_min: record
                    .and_then(|r| r.get("duration_min"))
                    .and_then(normalize_duration),
                intensity: record_field(record, "intensity"),
                notes: record_field(record, "notes"),
            }
        })
        .collect();

    Some(WeekPlans { meals, workouts })
}

/// True iff at least one non-null field exists anywhere in the week. An
/// all-empty week means the model produced nothing usable.
pub fn has_plan_content(plans: &WeekPlans) -> bool {
    let meal_content = plans.meals.iter().any(|m| {
        m.breakfast.is_some()
            || m.lunch.is_some()
            || m.dinner.is_some()
            || m.snacks.is_some()
            || m.notes.is_some()
    });
    let workout_content = plans.workouts.iter().any(|w| {
        w.cardio.is_some()
            || w.strength.is_some()
            || w.intensity.is_some()
            || w.notes.is_some()
            || w.duration_min.is_some()
    });
    meal_content || workout_content
}
