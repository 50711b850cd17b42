//! Server lifecycle: the state machine and the core task that drives it
//!
//! All lifecycle state lives in one task. The [`Server`] handle validates
//! commands against the published state and forwards them to the core; the
//! core applies transitions from the table in [`state`], spawns a worker per
//! startup or shutdown phase, and advances when the worker reports back.
//! Workers carry the epoch current when they were spawned, so a report that
//! arrives after a later transition is discarded instead of corrupting the
//! machine.

mod state;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use riptide_plugin_api::{HookContext, events};

use crate::dependency::{Dependency, ReadinessGate, forward_runtime_errors};
use crate::dispatch::{MessageDistributor, spawn_inbound_pump};
use crate::endpoint::EndpointEvent;
use crate::error::ServerError;
use crate::hooks::HookHost;
use crate::logger::{LogEvent, LogLevel};
use crate::message::{CodecError, Topic};
use crate::options::ServerOptions;
use crate::plugins::PluginHost;
use crate::plugins::discovery::{DirectoryScan, PluginDiscovery};
use crate::services::{PresenceHandler, TopicHandler};
use crate::shutdown::{ShutdownBarrier, signal_on_closed};

pub use state::{ServerState, TransitionName};
use state::next_state;

const NOTIFICATION_CAPACITY: usize = 16;

/// Broadcast notifications about lifecycle milestones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerNotification {
    /// The server reached `Running` and the startup hooks completed.
    Started,
    /// The server reached `Stopped`.
    Stopped,
    /// A startup phase failed; the server is stuck in its current init
    /// state until `stop()` is called.
    StartupFailed { dependency: String },
}

enum CoreEvent {
    Start,
    Stop,
    PhaseComplete {
        epoch: u64,
        transition: TransitionName,
    },
    PhaseFailed {
        epoch: u64,
        error: ServerError,
    },
}

/// Handle to a server instance.
///
/// Construction spawns the core task onto the current tokio runtime; the
/// server starts in `Stopped` and does nothing until [`Server::start`].
/// Dropping the last handle shuts the core task down without an orderly
/// close.
pub struct Server {
    options: ServerOptions,
    tx: mpsc::UnboundedSender<CoreEvent>,
    state: watch::Receiver<ServerState>,
    notifications: broadcast::Sender<ServerNotification>,
}

impl Server {
    pub fn new(options: ServerOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ServerState::Stopped);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let core = Core {
            options: options.clone(),
            tx: tx.clone(),
            state: state_tx,
            notifications: notifications.clone(),
            epoch: 0,
            run: None,
        };
        tokio::spawn(core.run(rx));

        Self {
            options,
            tx,
            state: state_rx,
            notifications,
        }
    }

    /// Begin startup. Fails unless the server is currently `Stopped`.
    ///
    /// Returns once the command is accepted; progress is observable through
    /// [`Server::watch_state`] and [`Server::subscribe`].
    pub fn start(&self) -> Result<(), ServerError> {
        let current = *self.state.borrow();
        if current != ServerState::Stopped {
            return Err(ServerError::NotStopped(current));
        }
        self.tx
            .send(CoreEvent::Start)
            .map_err(|_| ServerError::CoreGone)
    }

    /// Begin an orderly shutdown from any non-stopped state. During startup
    /// this tears down only what was already started.
    pub fn stop(&self) -> Result<(), ServerError> {
        if *self.state.borrow() == ServerState::Stopped {
            return Err(ServerError::AlreadyStopped);
        }
        self.tx
            .send(CoreEvent::Stop)
            .map_err(|_| ServerError::CoreGone)
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// Watch lifecycle state changes.
    pub fn watch_state(&self) -> watch::Receiver<ServerState> {
        self.state.clone()
    }

    /// Subscribe to lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerNotification> {
        self.notifications.subscribe()
    }

    /// Render a JSON value as a type-prefixed string, via the configured
    /// codec.
    pub fn to_typed(&self, value: &serde_json::Value) -> String {
        self.options.codec.to_typed(value)
    }

    /// Parse a type-prefixed string back into a JSON value, via the
    /// configured codec.
    pub fn convert_typed(&self, raw: &str) -> Result<serde_json::Value, CodecError> {
        self.options.codec.convert_typed(raw)
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }
}

/// Per-run state, created on `Start` and torn down on reaching `Stopped`.
///
/// Field order is load-bearing: hooks and the distributor reference code in
/// plugin libraries, so both must drop before the plugin host.
struct RunState {
    hooks: Arc<HookHost>,
    distributor: Option<Arc<MessageDistributor>>,
    plugin_host: Option<PluginHost>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RunState {
    fn new(hooks_enabled: bool) -> Self {
        Self {
            hooks: Arc::new(HookHost::new(hooks_enabled)),
            distributor: None,
            plugin_host: None,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }
}

struct Core {
    options: ServerOptions,
    tx: mpsc::UnboundedSender<CoreEvent>,
    state: watch::Sender<ServerState>,
    notifications: broadcast::Sender<ServerNotification>,
    /// Bumped on every applied transition; phase workers report with the
    /// epoch they were spawned under.
    epoch: u64,
    run: Option<RunState>,
}

impl Core {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<CoreEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle(event);
        }
        // All handles dropped; tear down whatever run was in flight.
        self.finish_run();
    }

    fn handle(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::Start => {
                if *self.state.borrow() != ServerState::Stopped {
                    tracing::warn!(state = ?*self.state.borrow(), "discarding start command");
                    return;
                }
                self.run = Some(RunState::new(self.options.plugin_loader.enabled));
                let next = self.apply(TransitionName::Start);
                self.enter(next);
            }
            CoreEvent::Stop => {
                let current = *self.state.borrow();
                if current == ServerState::Running || current.is_initializing() {
                    let next = self.apply(TransitionName::Stop);
                    self.enter(next);
                } else {
                    self.options.logger.log(
                        LogLevel::Warn,
                        LogEvent::InvalidStateTransition,
                        &format!("Ignoring stop request in state {current:?}"),
                    );
                }
            }
            CoreEvent::PhaseComplete { epoch, transition } => {
                if epoch != self.epoch {
                    tracing::debug!(?transition, "discarding late phase completion");
                    return;
                }
                let next = self.apply(transition);
                self.enter(next);
            }
            CoreEvent::PhaseFailed { epoch, error } => {
                if epoch != self.epoch {
                    tracing::debug!(%error, "discarding late phase failure");
                    return;
                }
                self.startup_failed(error);
            }
        }
    }

    /// Apply one transition from the table and publish the new state.
    ///
    /// Commands are validated before they get here and phase reports are
    /// epoch-guarded, so an invalid transition means the table or the driver
    /// is wrong. That is unrecoverable.
    fn apply(&mut self, transition: TransitionName) -> ServerState {
        let from = *self.state.borrow();
        let Some(next) = next_state(from, transition) else {
            self.options.logger.log(
                LogLevel::Error,
                LogEvent::InvalidStateTransition,
                &format!("Invalid state transition {transition:?} from {from:?}"),
            );
            panic!("invalid state transition {transition:?} from {from:?}");
        };
        self.epoch += 1;
        self.state.send_replace(next);
        tracing::debug!(?from, to = ?next, ?transition, "state transition");
        next
    }

    fn enter(&mut self, state: ServerState) {
        match state {
            ServerState::LoggerInit => self.enter_logger_init(),
            ServerState::PluginInit => self.enter_plugin_init(),
            ServerState::ServiceInit => self.enter_service_init(),
            ServerState::ConnectionEndpointInit => self.enter_endpoint_init(),
            ServerState::Running => self.enter_running(),
            ServerState::ConnectionEndpointShutdown => self.enter_endpoint_shutdown(),
            ServerState::ServiceShutdown => self.enter_service_shutdown(),
            ServerState::PluginShutdown => self.enter_plugin_shutdown(),
            ServerState::LoggerShutdown => self.enter_logger_shutdown(),
            ServerState::Stopped => self.finish_run(),
        }
    }

    fn enter_logger_init(&mut self) {
        let logger: Arc<dyn Dependency> = self.options.logger.clone();
        let fut = await_ready(
            vec![("logger".to_string(), logger)],
            self.options.dependency_init_timeout,
        );
        self.complete_after(TransitionName::LoggerStarted, fut);
    }

    fn enter_plugin_init(&mut self) {
        // First log line of a run; the logger is ready from here on.
        self.options.logger.log(
            LogLevel::Info,
            LogEvent::Info,
            &format!(
                "Starting server {} (riptide-core {})",
                self.options.server_name,
                env!("CARGO_PKG_VERSION")
            ),
        );

        let config = self.options.plugin_loader.clone();
        let discovery: Arc<dyn PluginDiscovery> =
            match (&self.options.plugin_discovery, &config.plugins_dir) {
                (Some(discovery), _) => discovery.clone(),
                (None, Some(dir)) => Arc::new(DirectoryScan::new(vec![dir.clone()])),
                (None, None) => Arc::new(DirectoryScan::conventional()),
            };

        let plugins = self.options.plugins.clone();
        let timeout = self.options.dependency_init_timeout;
        let payload = serde_json::json!({
            "server_name": self.options.server_name,
            "log_level": self.options.log_level,
            "plugins": plugins.iter().map(|(kind, _)| kind).collect::<Vec<_>>(),
        });

        let hooks = {
            let Some(run) = self.run.as_mut() else { return };
            // The logger is past its gate; from here its runtime errors
            // route to the plugin-error log.
            run.tasks.push(forward_runtime_errors(
                "logger".to_string(),
                self.options.logger.events(),
                self.options.logger.clone(),
                run.cancel.clone(),
            ));
            let (host, report) = PluginHost::load(&config, discovery.as_ref(), &run.hooks);
            if config.enabled {
                tracing::info!(
                    admitted = report.admitted.len(),
                    rejected = report.rejected.len(),
                    "plugin discovery finished"
                );
            }
            run.plugin_host = Some(host);
            run.hooks.clone()
        };

        let fut = async move {
            hooks
                .emit_parallel(events::CONFIG, &HookContext::new(payload))
                .await;
            await_ready(plugins, timeout).await
        };
        self.complete_after(TransitionName::PluginsStarted, fut);
    }

    fn enter_service_init(&mut self) {
        let logger = self.options.logger.clone();
        let handlers = self.options.handlers.clone();
        let endpoints = self.options.connection_endpoints.clone();
        let plugins = self.options.plugins.clone();

        let Some(run) = self.run.as_mut() else { return };

        let distributor = Arc::new(MessageDistributor::new(run.hooks.clone(), logger.clone()));
        let presence_as_topic: Arc<dyn TopicHandler> = handlers.presence.clone();
        let registrations = [
            (Topic::Event, handlers.event.clone()),
            (Topic::Rpc, handlers.rpc.clone()),
            (Topic::Record, handlers.record.clone()),
            (Topic::Presence, presence_as_topic),
        ];
        for (topic, handler) in registrations {
            if let Err(e) = distributor.register_for_topic(topic, handler) {
                // Unreachable with a fresh distributor; surfaced rather than
                // silently dropped if that ever changes.
                tracing::error!(error = %e, "topic registration failed");
            }
        }
        run.distributor = Some(distributor);

        for endpoint in &endpoints {
            run.tasks.push(spawn_presence_forwarder(
                endpoint.connection_events(),
                handlers.presence.clone(),
                run.cancel.clone(),
            ));
            run.tasks.push(forward_runtime_errors(
                endpoint.dependency_type().to_string(),
                endpoint.events(),
                logger.clone(),
                run.cancel.clone(),
            ));
        }
        for (kind, dep) in &plugins {
            run.tasks.push(forward_runtime_errors(
                kind.clone(),
                dep.events(),
                logger.clone(),
                run.cancel.clone(),
            ));
        }

        // Handler registration is in-process and synchronous.
        self.send_internal(TransitionName::ServicesStarted);
    }

    fn enter_endpoint_init(&mut self) {
        let endpoints = self.options.connection_endpoints.clone();
        let timeout = self.options.dependency_init_timeout;

        {
            let Some(run) = self.run.as_mut() else { return };
            let Some(distributor) = run.distributor.clone() else {
                return;
            };
            let (sink, inbound) = mpsc::unbounded_channel();
            for endpoint in &endpoints {
                endpoint.on_messages(sink.clone());
            }
            run.tasks
                .push(spawn_inbound_pump(inbound, distributor, run.cancel.clone()));
        }

        let deps: Vec<(String, Arc<dyn Dependency>)> = endpoints
            .iter()
            .map(|endpoint| {
                let dep: Arc<dyn Dependency> = endpoint.clone();
                (endpoint.dependency_type().to_string(), dep)
            })
            .collect();
        let fut = await_ready(deps, timeout);
        self.complete_after(TransitionName::ConnectionEndpointsStarted, fut);
    }

    fn enter_running(&mut self) {
        self.options.logger.log(
            LogLevel::Info,
            LogEvent::Info,
            &format!("Server {} is running", self.options.server_name),
        );

        let notifications = self.notifications.clone();
        let Some(run) = self.run.as_mut() else { return };
        let hooks = run.hooks.clone();
        run.tasks.push(tokio::spawn(async move {
            hooks
                .emit_serial(events::CORE_STARTED, &HookContext::empty())
                .await;
            let _ = notifications.send(ServerNotification::Started);
        }));
    }

    fn enter_endpoint_shutdown(&mut self) {
        let endpoints = self.options.connection_endpoints.clone();
        let Some(run) = self.run.as_mut() else { return };

        // No further inbound traffic; in-flight messages finish on their own.
        run.cancel.cancel();

        let closeable: Vec<_> = endpoints.iter().filter(|e| e.closeable()).collect();
        let barrier = Arc::new(ShutdownBarrier::new(closeable.len()));
        for endpoint in &closeable {
            run.tasks
                .push(signal_on_closed(endpoint.events(), barrier.clone()));
        }
        for endpoint in &closeable {
            endpoint.close();
        }

        let fut = async move {
            barrier.wait().await;
            Ok(())
        };
        self.complete_after(TransitionName::ConnectionEndpointsClosed, fut);
    }

    fn enter_service_shutdown(&mut self) {
        self.options.cluster.leave_cluster();
        if let Some(run) = self.run.as_mut() {
            run.distributor = None;
        }
        self.send_internal(TransitionName::ServicesClosed);
    }

    fn enter_plugin_shutdown(&mut self) {
        let plugins = self.options.plugins.clone();
        let Some(run) = self.run.as_mut() else { return };

        let closeable: Vec<_> = plugins
            .iter()
            .filter(|(_, dep)| dep.closeable())
            .map(|(_, dep)| dep.clone())
            .collect();
        let barrier = Arc::new(ShutdownBarrier::new(closeable.len()));
        for dep in &closeable {
            run.tasks.push(signal_on_closed(dep.events(), barrier.clone()));
        }
        for dep in &closeable {
            dep.close();
        }

        let fut = async move {
            barrier.wait().await;
            Ok(())
        };
        self.complete_after(TransitionName::PluginsClosed, fut);
    }

    fn enter_logger_shutdown(&mut self) {
        let logger = self.options.logger.clone();
        let Some(run) = self.run.as_mut() else { return };

        let barrier = Arc::new(ShutdownBarrier::new(usize::from(logger.closeable())));
        if logger.closeable() {
            run.tasks
                .push(signal_on_closed(logger.events(), barrier.clone()));
            logger.close();
        }

        let fut = async move {
            barrier.wait().await;
            Ok(())
        };
        self.complete_after(TransitionName::LoggerClosed, fut);
    }

    /// Tear down the finished run and notify.
    ///
    /// The run's resources are handed to a reaper task that joins every
    /// worker before dropping them, so nothing referencing plugin library
    /// code can outlive the libraries.
    fn finish_run(&mut self) {
        if let Some(run) = self.run.take() {
            run.cancel.cancel();
            tokio::spawn(async move {
                let mut run = run;
                for task in run.tasks.drain(..) {
                    let _ = task.await;
                }
                drop(run);
            });
        }
        let _ = self.notifications.send(ServerNotification::Stopped);
    }

    fn startup_failed(&mut self, error: ServerError) {
        let (event, dependency) = match &error {
            ServerError::DependencyTimeout { dependency, .. } => (
                LogEvent::PluginInitializationTimeout,
                dependency.clone(),
            ),
            _ => (LogEvent::PluginInitializationError, String::new()),
        };
        self.options
            .logger
            .log(LogLevel::Error, event, &error.to_string());
        let _ = self
            .notifications
            .send(ServerNotification::StartupFailed { dependency });
    }

    /// Report a synchronously completed phase through the normal channel so
    /// every transition flows through `handle`.
    fn send_internal(&self, transition: TransitionName) {
        let _ = self.tx.send(CoreEvent::PhaseComplete {
            epoch: self.epoch,
            transition,
        });
    }

    /// Spawn a phase worker; its outcome advances or fails the phase unless
    /// a later transition superseded it.
    fn complete_after<F>(&mut self, transition: TransitionName, fut: F)
    where
        F: Future<Output = Result<(), ServerError>> + Send + 'static,
    {
        let tx = self.tx.clone();
        let epoch = self.epoch;
        let Some(run) = self.run.as_mut() else { return };
        run.tasks.push(tokio::spawn(async move {
            let event = match fut.await {
                Ok(()) => CoreEvent::PhaseComplete { epoch, transition },
                Err(error) => CoreEvent::PhaseFailed { epoch, error },
            };
            let _ = tx.send(event);
        }));
    }
}

/// Wait for every listed dependency concurrently; the first timeout fails
/// the whole phase.
async fn await_ready(
    deps: Vec<(String, Arc<dyn Dependency>)>,
    timeout: Duration,
) -> Result<(), ServerError> {
    let gates: Vec<ReadinessGate<dyn Dependency>> = deps
        .into_iter()
        .map(|(kind, dep)| ReadinessGate::new(kind, dep, timeout))
        .collect();
    try_join_all(gates.iter().map(|gate| gate.wait())).await?;
    Ok(())
}

/// Forward client connect/disconnect notifications to the presence handler.
fn spawn_presence_forwarder(
    mut events: broadcast::Receiver<EndpointEvent>,
    presence: Arc<dyn PresenceHandler>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = events.recv() => received,
            };
            match received {
                Ok(EndpointEvent::ClientConnected(conn)) => presence.handle_join(&conn).await,
                Ok(EndpointEvent::ClientDisconnected(conn)) => presence.handle_leave(&conn).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(missed = n, "presence forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
