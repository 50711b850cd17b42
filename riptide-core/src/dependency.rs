//! Dependency contract and readiness gate
//!
//! Every external collaborator the lifecycle waits on - the logger, each
//! configured plugin, the connection endpoint - implements [`Dependency`].
//! A [`ReadinessGate`] wraps one of them for the duration of a startup phase
//! and resolves exactly once: ready, or timed out.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::ServerError;
use crate::logger::{LogEvent, LogLevel, Logger};

/// Notifications a dependency may emit over its event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyEvent {
    /// The dependency became usable. Emitted at most meaningfully once;
    /// duplicates are tolerated and ignored.
    Ready,
    /// A runtime error. Before readiness this is logged and waiting
    /// continues; after readiness it is routed to the plugin-error log.
    Error(String),
    /// The dependency finished closing, in response to [`Dependency::close`].
    Closed,
}

/// Minimum contract for anything the lifecycle initialises or tears down.
pub trait Dependency: Send + Sync {
    /// Human-readable type name, used in log output and timeout errors.
    fn dependency_type(&self) -> &str;

    /// Whether the dependency is usable right now. A gate over an
    /// already-ready dependency resolves without subscribing.
    fn is_ready(&self) -> bool;

    /// Subscribe to this dependency's notifications.
    fn events(&self) -> broadcast::Receiver<DependencyEvent>;

    /// Whether the dependency supports an orderly close.
    fn closeable(&self) -> bool {
        false
    }

    /// Request an orderly close. Completion is signaled by a later
    /// [`DependencyEvent::Closed`], never by this call returning.
    fn close(&self) {}
}

/// Waits for one dependency to become ready, or fails with a timeout.
pub struct ReadinessGate<D: Dependency + ?Sized> {
    kind: String,
    dep: Arc<D>,
    timeout: Duration,
}

impl<D: Dependency + ?Sized> ReadinessGate<D> {
    pub fn new(kind: impl Into<String>, dep: Arc<D>, timeout: Duration) -> Self {
        Self {
            kind: kind.into(),
            dep,
            timeout,
        }
    }

    /// Resolve the gate: immediately if the dependency is already ready,
    /// otherwise on the first `Ready` notification. First-wins race against
    /// the configured timeout.
    ///
    /// Errors emitted before readiness are logged and do not resolve the
    /// gate either way; the dependency may still become ready in time.
    pub async fn wait(&self) -> Result<(), ServerError> {
        // Subscribe before the readiness check: a Ready signalled in between
        // lands in the channel instead of being broadcast to no one.
        let mut events = self.dep.events();
        if self.dep.is_ready() {
            return Ok(());
        }

        let waited = tokio::time::timeout(self.timeout, async {
            loop {
                match events.recv().await {
                    Ok(DependencyEvent::Ready) => break,
                    Ok(DependencyEvent::Error(e)) => {
                        tracing::warn!(dependency = %self.kind, error = %e, "error while waiting for dependency");
                    }
                    Ok(DependencyEvent::Closed) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        // Notifications were dropped; the Ready may be among them.
                        if self.dep.is_ready() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        // Emitter gone without ever signaling ready. Nothing
                        // further will arrive; let the timeout decide.
                        std::future::pending::<()>().await;
                    }
                }
            }
        })
        .await;

        match waited {
            Ok(()) => Ok(()),
            Err(_) => Err(ServerError::DependencyTimeout {
                dependency: self.kind.clone(),
                timeout: self.timeout,
            }),
        }
    }
}

/// Route post-ready runtime errors from a dependency to the logger.
///
/// Runs until cancelled or until the dependency drops its event channel.
/// Errors here never affect lifecycle state.
pub(crate) fn forward_runtime_errors(
    kind: String,
    mut events: broadcast::Receiver<DependencyEvent>,
    logger: Arc<dyn Logger>,
    cancel: tokio_util::sync::CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = events.recv() => received,
            };
            match received {
                Ok(DependencyEvent::Error(e)) => {
                    logger.log(
                        LogLevel::Warn,
                        LogEvent::PluginError,
                        &format!("Error from {kind} plugin: {e}"),
                    );
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
