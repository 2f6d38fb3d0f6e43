use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Defines when and how often a job should run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Run exactly once at the given UTC instant.
    Once { at: DateTime<Utc> },

    /// Run repeatedly with a fixed interval in milliseconds, anchored at
    /// `anchor_ms` (a unix-ms instant; defaults to job creation time).
    Interval { every_ms: i64, anchor_ms: Option<i64> },

    /// Standard cron expression with seconds (`sec min hour dom mon dow`).
    Cron { expression: String, tz: Option<String> },
}

/// What a fired job does to its target session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// Injected as a synthetic user message without invoking the LLM, or
    /// with a bracketed "[system event]" prefix, per the handler's policy.
    SystemEvent { text: String },
    /// Starts a fresh agent turn in an isolated session.
    AgentTurn { message: String, model: Option<String> },
}

/// Which session a fired job targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionTarget {
    Main,
    Isolated,
}

/// A persisted job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub schedule: Schedule,
    pub payload: Payload,
    pub session_target: SessionTarget,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_result: Option<String>,
}

impl Job {
    pub fn new(name: impl Into<String>, schedule: Schedule, payload: Payload, session_target: SessionTarget) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            schedule,
            payload,
            session_target,
            enabled: true,
            created_at: Utc::now(),
            next_run_at: None,
            last_run_at: None,
            last_result: None,
        }
    }
}

/// A patch applied by `update_job`; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPatch {
    pub name: Option<String>,
    pub schedule: Option<Schedule>,
    pub payload: Option<Payload>,
    pub enabled: Option<bool>,
}
