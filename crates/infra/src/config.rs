//! Configuration loading and representation.
//!
//! Everything comes from environment variables (binaries may load a `.env`
//! file first). Unset variables fall back to defaults; set-but-invalid ones
//! are an error rather than a silent fallback.

use std::time::Duration;

use thiserror::Error;

use jobping_core::ResearchPolicy;
use jobping_queue::{QueueId, ReceiveOptions};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Queue names and polling parameters shared by every stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    pub enrichment: QueueId,
    pub fanout: QueueId,
    pub scoring: QueueId,
    pub notification: QueueId,
    pub wait: Duration,
    pub visibility_timeout: Duration,
    pub poll_interval: Duration,
    pub max_messages: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            enrichment: QueueId::new("job-analysis-queue"),
            fanout: QueueId::new("user-fanout-queue"),
            scoring: QueueId::new("user-analysis-queue"),
            notification: QueueId::new("notification-queue"),
            wait: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            max_messages: 1,
        }
    }
}

impl QueueSettings {
    pub fn receive_options(&self) -> ReceiveOptions {
        ReceiveOptions::default()
            .with_max_messages(self.max_messages)
            .with_wait(self.wait)
            .with_visibility_timeout(self.visibility_timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleSettings {
    /// No key means the placeholder oracle is used.
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: jobping_ai::openai::DEFAULT_MODEL.to_string(),
            base_url: jobping_ai::openai::DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Where the Notification stage sends rendered notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SinkKind {
    #[default]
    Log,
    Webhook,
}

impl std::str::FromStr for SinkKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "log" => Ok(SinkKind::Log),
            "webhook" => Ok(SinkKind::Webhook),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// No URL means the in-memory store is used.
    pub database_url: Option<String>,
    /// No URL means in-memory queues are used.
    pub redis_url: Option<String>,
    pub queues: QueueSettings,
    pub oracle: OracleSettings,
    pub research: ResearchPolicy,
    pub sink: SinkKind,
    /// Raw comma list of stage names this worker runs (`all` for every stage).
    pub worker_stages: String,
    pub api_bind_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            queues: QueueSettings::default(),
            oracle: OracleSettings::default(),
            research: ResearchPolicy::default(),
            sink: SinkKind::default(),
            worker_stages: "all".to_string(),
            api_bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Settings::default();

        let queues = QueueSettings {
            enrichment: get("ENRICHMENT_QUEUE").map(QueueId::new).unwrap_or(defaults.queues.enrichment),
            fanout: get("USER_FANOUT_QUEUE").map(QueueId::new).unwrap_or(defaults.queues.fanout),
            scoring: get("USER_ANALYSIS_QUEUE").map(QueueId::new).unwrap_or(defaults.queues.scoring),
            notification: get("NOTIFICATION_QUEUE")
                .map(QueueId::new)
                .unwrap_or(defaults.queues.notification),
            wait: seconds(&get, "QUEUE_WAIT_SECONDS", defaults.queues.wait)?,
            visibility_timeout: seconds(
                &get,
                "QUEUE_VISIBILITY_TIMEOUT_SECONDS",
                defaults.queues.visibility_timeout,
            )?,
            poll_interval: seconds(&get, "QUEUE_POLL_INTERVAL_SECONDS", defaults.queues.poll_interval)?,
            max_messages: parse(&get, "QUEUE_MAX_MESSAGES", defaults.queues.max_messages)?,
        };

        if queues.max_messages == 0 {
            return Err(ConfigError::Invalid {
                key: "QUEUE_MAX_MESSAGES",
                value: "0".to_string(),
            });
        }

        let oracle = OracleSettings {
            api_key: get("OPENAI_API_KEY"),
            model: get("OPENAI_MODEL").unwrap_or(defaults.oracle.model),
            base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.oracle.base_url),
        };

        Ok(Settings {
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            queues,
            oracle,
            research: ResearchPolicy::new(parse(
                &get,
                "RESEARCH_MAX_AGE_MONTHS",
                defaults.research.max_age_months,
            )?),
            sink: parse(&get, "NOTIFICATION_SINK", defaults.sink)?,
            worker_stages: get("WORKER_STAGES").unwrap_or(defaults.worker_stages),
            api_bind_addr: get("API_BIND_ADDR").unwrap_or(defaults.api_bind_addr),
        })
    }
}

fn parse<G, T>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn seconds<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    parse(get, key, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.queues.scoring.as_str(), "user-analysis-queue");
        assert_eq!(s.queues.wait, Duration::from_secs(20));
        assert_eq!(s.queues.visibility_timeout, Duration::from_secs(60));
        assert_eq!(s.queues.poll_interval, Duration::from_secs(5));
        assert_eq!(s.queues.max_messages, 1);
        assert_eq!(s.research.max_age_months, 6);
        assert_eq!(s.oracle.model, "gpt-3.5-turbo");
        assert_eq!(s.oracle.api_key, None);
        assert_eq!(s.database_url, None);
        assert_eq!(s.worker_stages, "all");
        assert_eq!(s.sink, SinkKind::Log);
    }

    #[test]
    fn overrides_are_applied() {
        let s = settings(&[
            ("NOTIFICATION_QUEUE", "notify-dev"),
            ("QUEUE_MAX_MESSAGES", "10"),
            ("OPENAI_API_KEY", "sk-live"),
            ("DATABASE_URL", "postgres://localhost/jobs"),
            ("NOTIFICATION_SINK", "Webhook"),
        ])
        .unwrap();
        assert_eq!(s.queues.notification.as_str(), "notify-dev");
        assert_eq!(s.queues.receive_options().max_messages, 10);
        assert_eq!(s.oracle.api_key.as_deref(), Some("sk-live"));
        assert_eq!(s.database_url.as_deref(), Some("postgres://localhost/jobs"));
        assert_eq!(s.sink, SinkKind::Webhook);
    }

    #[test]
    fn blank_values_count_as_unset() {
        let s = settings(&[("OPENAI_API_KEY", "   "), ("QUEUE_WAIT_SECONDS", "")]).unwrap();
        assert_eq!(s.oracle.api_key, None);
        assert_eq!(s.queues.wait, Duration::from_secs(20));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert_eq!(
            settings(&[("QUEUE_WAIT_SECONDS", "soon")]).unwrap_err(),
            ConfigError::Invalid {
                key: "QUEUE_WAIT_SECONDS",
                value: "soon".to_string()
            }
        );
        assert!(settings(&[("QUEUE_MAX_MESSAGES", "0")]).is_err());
        assert!(settings(&[("RESEARCH_MAX_AGE_MONTHS", "-1")]).is_err());
        assert!(settings(&[("NOTIFICATION_SINK", "pigeon")]).is_err());
    }
}
