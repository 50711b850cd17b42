//! Error types for riptide-core

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::lifecycle::{ServerState, TransitionName};
use crate::message::Topic;

/// Top-level error type for the server control plane.
///
/// The first three variants are fatal caller-misuse errors: they are raised
/// synchronously and abort the offending call. `DependencyTimeout` is an
/// environmental failure that halts the startup phase it occurred in.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid state transition {transition:?} from {from:?}")]
    InvalidTransition {
        transition: TransitionName,
        from: ServerState,
    },

    #[error("Server can only start after it stops successfully. Current state: {0:?}")]
    NotStopped(ServerState),

    #[error("The server is already stopped")]
    AlreadyStopped,

    #[error("Dependency `{dependency}` was not ready within {timeout:?}")]
    DependencyTimeout {
        dependency: String,
        timeout: Duration,
    },

    #[error("A handler is already registered for topic {0:?}")]
    TopicAlreadyRegistered(Topic),

    #[error("The server core task is no longer running")]
    CoreGone,
}

/// Errors raised while loading one plugin candidate.
///
/// These never escape the plugin host: each one is converted into a
/// per-candidate rejection in the discovery report, so one broken plugin
/// cannot abort discovery of the rest.
#[derive(Error, Debug)]
pub enum PluginHostError {
    #[error("Library load error: {0}")]
    Library(#[from] libloading::Error),

    #[error("No plugin library found in {0}")]
    MissingLibrary(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ServerError::NotStopped(ServerState::Running);
        assert!(err.to_string().contains("Running"));

        let err = ServerError::DependencyTimeout {
            dependency: "cache".to_string(),
            timeout: Duration::from_secs(2),
        };
        assert!(err.to_string().contains("cache"));
    }

    #[test]
    fn invalid_transition_names_both_sides() {
        let err = ServerError::InvalidTransition {
            transition: TransitionName::Start,
            from: ServerState::Running,
        };
        let msg = err.to_string();
        assert!(msg.contains("Start"));
        assert!(msg.contains("Running"));
    }
}
