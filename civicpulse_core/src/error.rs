//! Error taxonomy for the replay engine and the scenario scheduler.

use civicpulse_env::{EnvError, Timestamp};
use thiserror::Error;
use uuid::Uuid;

/// How an error should surface at the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input from the caller, never retried
    Client,
    /// Routine conflict (a scenario is already running)
    Conflict,
    /// Unknown resource
    NotFound,
    /// Infrastructure failure, retry is the caller's call
    Server,
}

impl ErrorClass {
    /// HTTP status code for this class.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorClass::Client => 400,
            ErrorClass::Conflict => 409,
            ErrorClass::NotFound => 404,
            ErrorClass::Server => 503,
        }
    }
}

/// Timeline, snapshot and replay-stream errors.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Invalid range: start {start} is not before end {end}")]
    InvalidRange { start: Timestamp, end: Timestamp },

    #[error("Invalid filter: no recognized event type in {0:?}")]
    InvalidFilter(Vec<String>),

    #[error("Store unavailable while {context}: {source}")]
    StoreUnavailable {
        context: String,
        #[source]
        source: EnvError,
    },
}

impl ReplayError {
    /// Wraps a store failure with context.
    pub fn store(context: impl Into<String>, source: EnvError) -> Self {
        Self::StoreUnavailable {
            context: context.into(),
            source,
        }
    }

    /// Boundary classification.
    pub fn class(&self) -> ErrorClass {
        match self {
            ReplayError::InvalidRange { .. } | ReplayError::InvalidFilter(_) => ErrorClass::Client,
            ReplayError::StoreUnavailable { .. } => ErrorClass::Server,
        }
    }
}

/// Scenario scheduler errors.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Scenario '{active}' is already active (run {run_id})")]
    Conflict { active: String, run_id: Uuid },

    #[error("Scenario not found: {0}")]
    NotFound(String),

    #[error("Scenario '{id}' cannot be scheduled: {reason}")]
    Unschedulable { id: String, reason: String },

    #[error("Scenario scheduler is not running")]
    SchedulerUnavailable,
}

impl ScenarioError {
    /// Boundary classification.
    pub fn class(&self) -> ErrorClass {
        match self {
            ScenarioError::Conflict { .. } => ErrorClass::Conflict,
            ScenarioError::NotFound(_) => ErrorClass::NotFound,
            ScenarioError::Unschedulable { .. } => ErrorClass::Client,
            ScenarioError::SchedulerUnavailable => ErrorClass::Server,
        }
    }
}

/// Scenario catalog loading errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Duplicate scenario id: {0}")]
    DuplicateId(String),

    #[error("Invalid scenario '{id}': {reason}")]
    InvalidDefinition { id: String, reason: String },

    #[error("Catalog parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
