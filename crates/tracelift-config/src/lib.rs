//! Service settings loaded from `LANGFUSE_*` environment variables.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const PREFIX: &str = "LANGFUSE_";

// ─────────────────────────────────────────────────────────────────────────────
// Error
// ─────────────────────────────────────────────────────────────────────────────

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(String),

    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Credentials and tuning for the tracing backend.
#[derive(Clone)]
pub struct BackendSettings {
    pub public_key: String,
    pub secret_key: String,
    pub api_url: String,
    pub project_name: String,
    pub environment: String,
    pub flush_batch_size: usize,
    pub request_timeout: Duration,
}

impl fmt::Debug for BackendSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSettings")
            .field("public_key", &self.public_key)
            .field("secret_key", &"***")
            .field("api_url", &self.api_url)
            .field("project_name", &self.project_name)
            .field("environment", &self.environment)
            .field("flush_batch_size", &self.flush_batch_size)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Queue, worker pool and job store tuning.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub db_path: PathBuf,
    pub worker_concurrency: usize,
    pub max_jobs_per_worker: usize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub job_ttl: Duration,
    pub lease: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub backend: BackendSettings,
    pub server: ServerSettings,
    pub jobs: JobSettings,
}

impl Settings {
    /// Loads `.env` if present, then reads the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("No .env file loaded: {}", e);
        }
        Self::from_env()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup. Keys include the prefix.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let backend = BackendSettings {
            public_key: env.required("PUBLIC_KEY")?,
            secret_key: env.required("SECRET_KEY")?,
            api_url: env
                .string("API_URL", "https://us.cloud.langfuse.com")
                .trim_end_matches('/')
                .to_string(),
            project_name: env.string("PROJECT_NAME", "Agent Observability"),
            environment: env.string("ENVIRONMENT", "development"),
            flush_batch_size: env.number("FLUSH_BATCH_SIZE", 50)?,
            request_timeout: Duration::from_secs(env.number("REQUEST_TIMEOUT_SECS", 30)?),
        };

        let server = ServerSettings {
            host: env.string("HOST", "0.0.0.0"),
            port: env.number("PORT", 8000)?,
            log_level: env.string("LOG_LEVEL", "info").to_lowercase(),
        };

        let jobs = JobSettings {
            db_path: PathBuf::from(env.string("DB_PATH", "data/jobs.db")),
            worker_concurrency: env.positive("WORKER_CONCURRENCY", 4)?,
            max_jobs_per_worker: env.positive("MAX_JOBS_PER_WORKER", 100)?,
            max_retries: env.number("MAX_RETRIES", 3)?,
            retry_backoff: Duration::from_secs(env.number("RETRY_BACKOFF_SECS", 60)?),
            job_ttl: Duration::from_secs(env.number("JOB_TTL_SECS", 86_400)?),
            lease: Duration::from_secs(env.positive("LEASE_SECS", 300)?),
            poll_interval: Duration::from_millis(env.positive("POLL_INTERVAL_MS", 500)?),
        };

        Ok(Self {
            backend,
            server,
            jobs,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{PREFIX}{name}"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &str) -> Result<String, ConfigError> {
        self.raw(name)
            .ok_or_else(|| ConfigError::Missing(format!("{PREFIX}{name}")))
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.raw(name).unwrap_or_else(|| default.to_string())
    }

    fn number<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let Some(value) = self.raw(name) else {
            return Ok(default);
        };
        value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: format!("{PREFIX}{name}"),
            value,
            reason: e.to_string(),
        })
    }

    fn positive<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialEq + Default,
        T::Err: fmt::Display,
    {
        let value = self.number(name, default)?;
        if value == T::default() {
            return Err(ConfigError::Invalid {
                key: format!("{PREFIX}{name}"),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    const KEYS: [(&str, &str); 2] = [
        ("LANGFUSE_PUBLIC_KEY", "pk-lf-test"),
        ("LANGFUSE_SECRET_KEY", "sk-lf-test"),
    ];

    #[test]
    fn test_defaults() {
        let s = settings(&KEYS).unwrap();
        assert_eq!(s.backend.api_url, "https://us.cloud.langfuse.com");
        assert_eq!(s.backend.project_name, "Agent Observability");
        assert_eq!(s.backend.environment, "development");
        assert_eq!(s.server.bind_addr(), "0.0.0.0:8000");
        assert_eq!(s.jobs.worker_concurrency, 4);
        assert_eq!(s.jobs.max_jobs_per_worker, 100);
        assert_eq!(s.jobs.max_retries, 3);
        assert_eq!(s.jobs.retry_backoff, Duration::from_secs(60));
        assert_eq!(s.jobs.job_ttl, Duration::from_secs(86_400));
        assert_eq!(s.jobs.db_path, PathBuf::from("data/jobs.db"));
    }

    #[test]
    fn test_missing_credentials() {
        let err = settings(&KEYS[..1]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("LANGFUSE_SECRET_KEY".into()));
    }

    #[test]
    fn test_overrides_and_trailing_slash() {
        let mut pairs = KEYS.to_vec();
        pairs.push(("LANGFUSE_API_URL", "https://cloud.langfuse.com/"));
        pairs.push(("LANGFUSE_PORT", "9100"));
        pairs.push(("LANGFUSE_MAX_RETRIES", "0"));
        let s = settings(&pairs).unwrap();
        assert_eq!(s.backend.api_url, "https://cloud.langfuse.com");
        assert_eq!(s.server.port, 9100);
        assert_eq!(s.jobs.max_retries, 0);
    }

    #[test]
    fn test_invalid_numbers() {
        let mut pairs = KEYS.to_vec();
        pairs.push(("LANGFUSE_PORT", "eighty"));
        assert!(matches!(
            settings(&pairs),
            Err(ConfigError::Invalid { ref key, .. }) if key == "LANGFUSE_PORT"
        ));

        let mut pairs = KEYS.to_vec();
        pairs.push(("LANGFUSE_WORKER_CONCURRENCY", "0"));
        assert!(matches!(settings(&pairs), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_debug_hides_secret() {
        let s = settings(&KEYS).unwrap();
        let rendered = format!("{:?}", s.backend);
        assert!(!rendered.contains("sk-lf-test"));
        assert!(rendered.contains("pk-lf-test"));
    }
}
