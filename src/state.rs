use crate::config::CronConfig;
use crate::db::PlanStore;
use crate::services::agent::PlanAgent;
use crate::services::planner::WeeklyPlanner;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PlanStore>,
    pub planner: WeeklyPlanner,
    pub agent: PlanAgent,
    pub session_key: Vec<u8>,
    pub cron: CronConfig,
}

pub type SharedState = Arc<AppState>;
