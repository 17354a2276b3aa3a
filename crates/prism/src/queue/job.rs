use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::LaneConfig;

/// Independently retried queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Analyze,
    Notify,
}

impl Lane {
    pub const ALL: [Lane; 2] = [Lane::Analyze, Lane::Notify];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Analyze => "analyze",
            Lane::Notify => "notify",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lane {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analyze" => Ok(Lane::Analyze),
            "notify" => Ok(Lane::Notify),
            other => Err(format!("unknown lane '{}'", other)),
        }
    }
}

/// `Failed` is terminal: the job exhausted its attempts or hit a
/// permanent error and has been dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub lane: Lane,
    pub payload: serde_json::Value,
    pub dedupe_key: Option<String>,
    pub state: JobState,
    /// Attempts started so far, including the one in progress.
    pub attempts: u32,
    pub max_attempts: u32,
    pub progress: u8,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn is_final_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, crate::error::QueueError> {
        serde_json::from_value(self.payload.clone()).map_err(|source| {
            crate::error::QueueError::Decode {
                id: self.id.clone(),
                source,
            }
        })
    }
}

/// Retry and concurrency settings of one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneSettings {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub concurrency: usize,
}

impl LaneSettings {
    pub fn defaults(lane: Lane) -> Self {
        match lane {
            Lane::Analyze => Self {
                max_attempts: 3,
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(60),
                concurrency: num_cpus::get().clamp(1, 4),
            },
            // Delivery gets more attempts than analysis.
            Lane::Notify => Self {
                max_attempts: 5,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                concurrency: 4,
            },
        }
    }

    pub fn from_config(lane: Lane, config: &LaneConfig) -> Self {
        let defaults = Self::defaults(lane);
        Self {
            max_attempts: config.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            base_delay: config
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: config
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            concurrency: config.concurrency.unwrap_or(defaults.concurrency).max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_defaults() {
        assert_eq!(LaneSettings::defaults(Lane::Analyze).max_attempts, 3);
        assert_eq!(LaneSettings::defaults(Lane::Notify).max_attempts, 5);
    }

    #[test]
    fn test_overrides_apply_per_field() {
        let config = LaneConfig {
            max_attempts: Some(7),
            base_delay_ms: Some(10),
            ..Default::default()
        };
        let settings = LaneSettings::from_config(Lane::Notify, &config);
        assert_eq!(settings.max_attempts, 7);
        assert_eq!(settings.base_delay, Duration::from_millis(10));
        assert_eq!(settings.max_delay, Duration::from_secs(30));
        assert_eq!(settings.concurrency, 4);
    }
}
