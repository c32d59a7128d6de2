//! Enqueuer and scheduler configuration structures.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::{EnqueuerError, Executor};

/// Default inbound queue capacity.
pub const DEFAULT_CAPACITY: usize = 1024;
/// Default number of consecutive activations per drive task.
pub const DEFAULT_THROUGHPUT: usize = 64;
/// Default bound on tasks planned by an exact-date scheduler.
pub const DEFAULT_PLANNED_TASKS_LIMIT: usize = 4096;

/// Enqueuer configuration.
///
/// The executor is an in-process handle and is never serialized; when it is
/// left unset the enqueuer binds to the ambient tokio runtime at construction.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnqueuerConfig {
    /// Name used in logs and rejection errors. Generated when absent.
    pub name: Option<String>,
    /// Capacity of the bounded inbound queue.
    pub capacity: usize,
    /// Maximum consecutive activations before the drive task yields the executor.
    pub throughput: usize,
    /// Where activations run.
    #[serde(skip)]
    pub executor: Option<Executor>,
}

impl Default for EnqueuerConfig {
    fn default() -> Self {
        Self {
            name: None,
            capacity: DEFAULT_CAPACITY,
            throughput: DEFAULT_THROUGHPUT,
            executor: None,
        }
    }
}

impl fmt::Debug for EnqueuerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnqueuerConfig")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("throughput", &self.throughput)
            .field("executor", &self.executor.as_ref().map(|_| "<executor>"))
            .finish()
    }
}

impl EnqueuerConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the enqueuer name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the inbound queue capacity.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the activation throughput.
    #[must_use]
    pub const fn with_throughput(mut self, throughput: usize) -> Self {
        self.throughput = throughput;
        self
    }

    /// Set the executor activations run on.
    #[must_use]
    pub fn with_executor(mut self, executor: Executor) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("capacity must be greater than 0".into());
        }
        if self.throughput == 0 {
            return Err("throughput must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the environment (and a `.env` file, if present).
    ///
    /// Recognized variables: `ENQUEUER_NAME`, `ENQUEUER_CAPACITY`,
    /// `ENQUEUER_THROUGHPUT`. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();
        let mut cfg = Self::default();
        if let Ok(name) = dotenvy::var("ENQUEUER_NAME") {
            cfg.name = Some(name);
        }
        if let Some(capacity) = env_number("ENQUEUER_CAPACITY")? {
            cfg.capacity = capacity;
        }
        if let Some(throughput) = env_number("ENQUEUER_THROUGHPUT")? {
            cfg.throughput = throughput;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub(crate) fn check(&self) -> Result<(), EnqueuerError> {
        self.validate().map_err(EnqueuerError::InvalidConfig)
    }
}

/// Exact-date scheduler configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Configuration of the inbound enqueuer.
    pub enqueuer: EnqueuerConfig,
    /// Maximum number of admitted, not yet executed tasks.
    pub planned_tasks_limit: usize,
    /// Where value-producing scheduled calls run. Defaults to the enqueuer's executor.
    #[serde(skip)]
    pub completion_executor: Option<Executor>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enqueuer: EnqueuerConfig::default(),
            planned_tasks_limit: DEFAULT_PLANNED_TASKS_LIMIT,
            completion_executor: None,
        }
    }
}

impl fmt::Debug for SchedulerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerConfig")
            .field("enqueuer", &self.enqueuer)
            .field("planned_tasks_limit", &self.planned_tasks_limit)
            .field(
                "completion_executor",
                &self.completion_executor.as_ref().map(|_| "<executor>"),
            )
            .finish()
    }
}

impl SchedulerConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the inbound enqueuer configuration.
    #[must_use]
    pub fn with_enqueuer(mut self, enqueuer: EnqueuerConfig) -> Self {
        self.enqueuer = enqueuer;
        self
    }

    /// Set the planned task limit.
    #[must_use]
    pub const fn with_planned_tasks_limit(mut self, limit: usize) -> Self {
        self.planned_tasks_limit = limit;
        self
    }

    /// Set the executor for value-producing scheduled calls.
    #[must_use]
    pub fn with_completion_executor(mut self, executor: Executor) -> Self {
        self.completion_executor = Some(executor);
        self
    }

    /// Validate the scheduler and its enqueuer.
    pub fn validate(&self) -> Result<(), String> {
        if self.planned_tasks_limit == 0 {
            return Err("planned_tasks_limit must be greater than 0".into());
        }
        self.enqueuer
            .validate()
            .map_err(|e| format!("enqueuer invalid: {e}"))
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the environment (and a `.env` file, if present).
    ///
    /// Reads `SCHEDULER_PLANNED_TASKS_LIMIT` plus the variables understood by
    /// [`EnqueuerConfig::from_env`].
    pub fn from_env() -> Result<Self, String> {
        let mut cfg = Self {
            enqueuer: EnqueuerConfig::from_env()?,
            ..Self::default()
        };
        if let Some(limit) = env_number("SCHEDULER_PLANNED_TASKS_LIMIT")? {
            cfg.planned_tasks_limit = limit;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn env_number<N>(key: &str) -> Result<Option<N>, String>
where
    N: FromStr,
    N::Err: fmt::Display,
{
    match dotenvy::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| format!("{key}: {e}")),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EnqueuerConfig::default().validate().is_ok());
        assert!(SchedulerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg = EnqueuerConfig::from_json_str(r#"{ "capacity": 16 }"#).unwrap();
        assert_eq!(cfg.capacity, 16);
        assert_eq!(cfg.throughput, DEFAULT_THROUGHPUT);
        assert!(cfg.name.is_none());
        assert!(cfg.executor.is_none());
    }

    #[test]
    fn test_debug_hides_executor() {
        let rendered = format!("{:?}", EnqueuerConfig::new().with_name("x"));
        assert!(rendered.contains("\"x\""));
        assert!(rendered.contains("executor: None"));
    }
}
