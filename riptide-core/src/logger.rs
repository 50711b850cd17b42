//! Logger collaborator contract
//!
//! The logger is itself a lifecycle dependency: it is the first thing
//! initialised and the last thing shut down. Logging backends live outside
//! the core; [`crate::default_plugins::TracingLogger`] bridges onto
//! `tracing` for embedders that do not bring their own.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dependency::Dependency;

/// Log severity, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Event kind attached to every log call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent {
    Info,
    PluginError,
    PluginInitializationError,
    PluginInitializationTimeout,
    InvalidStateTransition,
    UnknownTopic,
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogEvent::Info => "INFO",
            LogEvent::PluginError => "PLUGIN_ERROR",
            LogEvent::PluginInitializationError => "PLUGIN_INITIALIZATION_ERROR",
            LogEvent::PluginInitializationTimeout => "PLUGIN_INITIALIZATION_TIMEOUT",
            LogEvent::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            LogEvent::UnknownTopic => "UNKNOWN_TOPIC",
        };
        f.write_str(s)
    }
}

/// Logging collaborator. Also a [`Dependency`]: the lifecycle gates on its
/// readiness before anything else runs, and closes it last.
pub trait Logger: Dependency {
    fn log(&self, level: LogLevel, event: LogEvent, message: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn events_render_as_constants() {
        assert_eq!(LogEvent::PluginError.to_string(), "PLUGIN_ERROR");
        assert_eq!(
            LogEvent::PluginInitializationTimeout.to_string(),
            "PLUGIN_INITIALIZATION_TIMEOUT"
        );
    }
}
