//! Server states and the transition table
//!
//! The lifecycle is a flat state machine: the table below is the single
//! source of truth for which transition is legal from which state. Startup
//! walks the init states in order; `Stop` is accepted from every init state
//! and from `Running`, entering the shutdown sequence at the matching depth
//! so only what was started gets torn down.

use serde::{Deserialize, Serialize};

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerState {
    Stopped,
    LoggerInit,
    PluginInit,
    ServiceInit,
    ConnectionEndpointInit,
    Running,
    ConnectionEndpointShutdown,
    ServiceShutdown,
    PluginShutdown,
    LoggerShutdown,
}

impl ServerState {
    /// True for every state on the startup path, `Running` excluded.
    pub fn is_initializing(self) -> bool {
        matches!(
            self,
            ServerState::LoggerInit
                | ServerState::PluginInit
                | ServerState::ServiceInit
                | ServerState::ConnectionEndpointInit
        )
    }

    pub fn is_shutting_down(self) -> bool {
        matches!(
            self,
            ServerState::ConnectionEndpointShutdown
                | ServerState::ServiceShutdown
                | ServerState::PluginShutdown
                | ServerState::LoggerShutdown
        )
    }
}

/// Named edges of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionName {
    Start,
    LoggerStarted,
    PluginsStarted,
    ServicesStarted,
    ConnectionEndpointsStarted,
    Stop,
    ConnectionEndpointsClosed,
    ServicesClosed,
    PluginsClosed,
    LoggerClosed,
}

/// The complete transition table. Anything not listed here is invalid.
pub(crate) const TRANSITIONS: [(TransitionName, ServerState, ServerState); 14] = [
    (TransitionName::Start, ServerState::Stopped, ServerState::LoggerInit),
    (TransitionName::LoggerStarted, ServerState::LoggerInit, ServerState::PluginInit),
    (TransitionName::PluginsStarted, ServerState::PluginInit, ServerState::ServiceInit),
    (TransitionName::ServicesStarted, ServerState::ServiceInit, ServerState::ConnectionEndpointInit),
    (
        TransitionName::ConnectionEndpointsStarted,
        ServerState::ConnectionEndpointInit,
        ServerState::Running,
    ),
    (TransitionName::Stop, ServerState::LoggerInit, ServerState::LoggerShutdown),
    (TransitionName::Stop, ServerState::PluginInit, ServerState::PluginShutdown),
    (TransitionName::Stop, ServerState::ServiceInit, ServerState::ServiceShutdown),
    (
        TransitionName::Stop,
        ServerState::ConnectionEndpointInit,
        ServerState::ConnectionEndpointShutdown,
    ),
    (TransitionName::Stop, ServerState::Running, ServerState::ConnectionEndpointShutdown),
    (
        TransitionName::ConnectionEndpointsClosed,
        ServerState::ConnectionEndpointShutdown,
        ServerState::ServiceShutdown,
    ),
    (TransitionName::ServicesClosed, ServerState::ServiceShutdown, ServerState::PluginShutdown),
    (TransitionName::PluginsClosed, ServerState::PluginShutdown, ServerState::LoggerShutdown),
    (TransitionName::LoggerClosed, ServerState::LoggerShutdown, ServerState::Stopped),
];

/// Resolve one transition from the table. `None` means the transition is
/// invalid from `from`.
pub(crate) fn next_state(from: ServerState, transition: TransitionName) -> Option<ServerState> {
    TRANSITIONS
        .iter()
        .find(|(name, source, _)| *name == transition && *source == from)
        .map(|(_, _, target)| *target)
}
