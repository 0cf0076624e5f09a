//! Narrow logging collaborator used by the engine to classify run events.
//!
//! The engine only decides the level of a message. Rendering, coloring and
//! dashboards belong to whoever implements [`RunLogger`].

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Classification of a run event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Progress information.
    Info,
    /// A module completed cleanly.
    Success,
    /// Something degraded but the run continues.
    Warning,
    /// A module failed.
    Error,
}

/// Sink for `(level, message)` run events.
pub trait RunLogger: Send + Sync {
    /// Progress information.
    fn info(&self, message: &str);
    /// A module completed cleanly.
    fn success(&self, message: &str);
    /// Degraded but non-fatal condition.
    fn warn(&self, message: &str);
    /// Module or run failure.
    fn error(&self, message: &str);

    /// Dispatch by level.
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => self.info(message),
            LogLevel::Success => self.success(message),
            LogLevel::Warning => self.warn(message),
            LogLevel::Error => self.error(message),
        }
    }
}

/// Forwards run events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl RunLogger for TracingLogger {
    fn info(&self, message: &str) {
        info!("{message}");
    }

    fn success(&self, message: &str) {
        info!(outcome = "success", "{message}");
    }

    fn warn(&self, message: &str) {
        warn!("{message}");
    }

    fn error(&self, message: &str) {
        error!("{message}");
    }
}

/// Records run events in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    events: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLogger {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events.
    pub fn events(&self) -> Vec<(LogLevel, String)> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(e) => {
                warn!(error = %e, "memory logger lock poisoned in events");
                Vec::new()
            }
        }
    }

    /// Messages recorded at `level`.
    pub fn messages_at(&self, level: LogLevel) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }

    fn push(&self, level: LogLevel, message: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push((level, message.to_owned()));
        }
    }
}

impl RunLogger for MemoryLogger {
    fn info(&self, message: &str) {
        self.push(LogLevel::Info, message);
    }

    fn success(&self, message: &str) {
        self.push(LogLevel::Success, message);
    }

    fn warn(&self, message: &str) {
        self.push(LogLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.push(LogLevel::Error, message);
    }
}
