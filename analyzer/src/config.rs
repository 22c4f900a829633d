use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::worker::WorkerSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_env(value: &str) -> anyhow::Result<Self> {
        match value {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(anyhow::anyhow!(
                "Invalid LOG_FORMAT '{other}'. Expected 'pretty' or 'json'"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the service listens on
    pub port: u16,
    /// SQLite database for tasks, bindings and the analysis catalog
    pub database_url: String,
    /// Connection lookup policy used by the worker
    pub resolve_policy: RetryPolicy,
    /// Bounds of the random pause after each progress step
    pub step_delay_min: Duration,
    pub step_delay_max: Duration,
    /// External websocket gateway to push through. Unset means pushes go to
    /// sockets accepted by this process on `/ws`.
    pub websocket_endpoint: Option<String>,
    /// Remote worker base URL. Unset means the worker runs in-process.
    pub worker_url: Option<String>,
    /// Allowed CORS origins; empty allows any origin.
    pub cors_allowed_origins: Vec<String>,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let resolve_policy = RetryPolicy {
            max_attempts: env_parse("MAX_RETRIES", 20)?,
            initial_delay: Duration::from_millis(env_parse("RETRY_INITIAL_DELAY_MS", 100)?),
            max_delay: Duration::from_millis(env_parse("RETRY_MAX_DELAY_MS", 5000)?),
            jitter_fraction: env_parse("RETRY_JITTER", 0.3)?,
        };
        if resolve_policy.max_attempts == 0 {
            anyhow::bail!("MAX_RETRIES must be at least 1");
        }
        if !(0.0..=1.0).contains(&resolve_policy.jitter_fraction) {
            anyhow::bail!("RETRY_JITTER must be between 0 and 1");
        }

        let step_delay_min = Duration::from_millis(env_parse("STEP_DELAY_MIN_MS", 5000)?);
        let step_delay_max = Duration::from_millis(env_parse("STEP_DELAY_MAX_MS", 10000)?);
        if step_delay_max < step_delay_min {
            anyhow::bail!("STEP_DELAY_MAX_MS must not be below STEP_DELAY_MIN_MS");
        }

        Ok(Self {
            port: env_parse("ANALYZER_PORT", 9191)?,
            database_url: env_str("ANALYZER_DATABASE_URL", "sqlite:./data/analyzer.db"),
            resolve_policy,
            step_delay_min,
            step_delay_max,
            websocket_endpoint: env_opt("WEBSOCKET_ENDPOINT"),
            worker_url: env_opt("WORKER_URL"),
            cors_allowed_origins: env_csv("CORS_ALLOWED_ORIGINS", &[]),
            log_format: LogFormat::from_env(&env_str("LOG_FORMAT", "pretty"))?,
        })
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            resolve_policy: self.resolve_policy,
            step_delay_min: self.step_delay_min,
            step_delay_max: self.step_delay_max,
            ..WorkerSettings::default()
        }
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_csv(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        Err(_) => default.iter().map(|s| (*s).to_string()).collect(),
    }
}
