use anyhow::{anyhow, Context};
use base64::{engine::general_purpose, Engine as _};

const ZHIPU_DEFAULT_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4";
const ZHIPU_DEFAULT_MODEL: &str = "glm-4.7";
const DEFAULT_CRON_TIMEZONE: &str = "Asia/Shanghai";
const DEFAULT_CRON_USER_AGENT: &str = "vercel-cron/1.0";

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
}

impl LlmConfig {
    /// Zhipu credentials take precedence; otherwise any OpenAI-compatible
    /// endpoint via the HEALTH_LLM_* triple.
    pub fn from_env() -> Option<Self> {
        if let Some(api_key) = non_empty_env("ZHIPUAI_API_KEY") {
            let api_base = non_empty_env("ZHIPUAI_API_BASE")
                .unwrap_or_else(|| ZHIPU_DEFAULT_BASE_URL.to_string());
            let model =
                non_empty_env("ZHIPUAI_MODEL").unwrap_or_else(|| ZHIPU_DEFAULT_MODEL.to_string());
            return Some(Self {
                api_key,
                api_base: api_base.trim_end_matches('/').to_string(),
                model,
            });
        }

        let api_key = non_empty_env("HEALTH_LLM_API_KEY")?;
        let model = non_empty_env("HEALTH_LLM_MODEL")?;
        let api_base = non_empty_env("HEALTH_LLM_API_BASE")?;
        Some(Self {
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            model,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CronConfig {
    pub secret: Option<String>,
    pub timezone: String,
    /// Scheduler user-agent accepted when no secret is configured. A
    /// local/dev convenience, not a secure path.
    pub allowed_user_agent: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub session_key: Vec<u8>,
    pub cron: CronConfig,
    pub llm: LlmConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL missing")?;

        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| {
            let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
            format!("0.0.0.0:{}", port)
        });

        let session_key_b64 = std::env::var("SESSION_KEY").context("SESSION_KEY missing")?;
        let session_key = general_purpose::STANDARD
            .decode(session_key_b64)
            .map_err(|_| anyhow!("SESSION_KEY must be base64"))?;

        let cron = CronConfig {
            secret: non_empty_env("HEALTH_CRON_SECRET"),
            timezone: non_empty_env("HEALTH_CRON_TIMEZONE")
                .unwrap_or_else(|| DEFAULT_CRON_TIMEZONE.to_string()),
            allowed_user_agent: non_empty_env("HEALTH_CRON_USER_AGENT")
                .unwrap_or_else(|| DEFAULT_CRON_USER_AGENT.to_string()),
        };

        let llm = LlmConfig::from_env().ok_or_else(|| {
            anyhow!("Missing LLM configuration: set ZHIPUAI_API_KEY or the HEALTH_LLM_* variables")
        })?;

        Ok(Self {
            database_url,
            bind_addr,
            session_key,
            cron,
            llm,
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
