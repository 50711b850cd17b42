//! End-to-end lifecycle tests over the mock collaborators.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use riptide_core::mock::{
    MockCluster, MockDependency, MockEndpoint, MockLogger, RecordingHandler,
    RecordingPresenceHandler, recording_handlers,
};
use riptide_core::{
    ConnectionEndpoint, Hook, HookBus, HookContext, Message, Plugin, PluginError,
    PluginLoaderConfig, PluginManifest, Server, ServerError, ServerNotification, ServerOptions,
    ServerState, StaticRegistry, Topic, events,
};

const WAIT: Duration = Duration::from_secs(5);

struct Fixture {
    server: Server,
    endpoint: Arc<MockEndpoint>,
    logger: Arc<MockLogger>,
    cluster: Arc<MockCluster>,
    recorders: [Arc<RecordingHandler>; 3],
    presence: Arc<RecordingPresenceHandler>,
}

fn fixture_with(configure: impl FnOnce(ServerOptions) -> ServerOptions) -> Fixture {
    let endpoint = MockEndpoint::ready();
    let logger = MockLogger::closing();
    let cluster = MockCluster::new();
    let (handlers, recorders, presence) = recording_handlers();

    let endpoint_dyn: Arc<dyn ConnectionEndpoint> = endpoint.clone();
    let options = ServerOptions::new(vec![endpoint_dyn], handlers)
        .with_logger(logger.clone())
        .with_cluster(cluster.clone());

    Fixture {
        server: Server::new(configure(options)),
        endpoint,
        logger,
        cluster,
        recorders,
        presence,
    }
}

fn fixture() -> Fixture {
    fixture_with(|options| options)
}

async fn wait_for_notification(
    rx: &mut broadcast::Receiver<ServerNotification>,
    matches: impl Fn(&ServerNotification) -> bool,
) -> ServerNotification {
    loop {
        let notification = tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for notification")
            .expect("notification channel closed");
        if matches(&notification) {
            return notification;
        }
    }
}

async fn wait_for_state(server: &Server, state: ServerState) {
    let mut watch = server.watch_state();
    tokio::time::timeout(WAIT, watch.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

async fn wait_for_log(
    logger: &MockLogger,
    matches: impl Fn(&riptide_core::LogEvent, &str) -> bool,
) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !logger.entries().iter().any(|(_, event, msg)| matches(event, msg)) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for log entry"
        );
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn startup_reaches_running_and_wires_the_endpoint() {
    let f = fixture();
    let mut notifications = f.server.subscribe();

    f.server.start().unwrap();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Started).await;

    assert!(f.server.is_running());
    assert!(f.endpoint.has_sink());

    // Version line logged once the logger was ready.
    let entries = f.logger.entries();
    assert!(entries.iter().any(|(_, _, msg)| msg.contains("Starting server")));
}

#[tokio::test]
async fn orderly_shutdown_closes_everything_once() {
    let f = fixture_with(|options| {
        options.with_plugin("cache", MockDependency::auto_closing("cache"))
    });
    let mut notifications = f.server.subscribe();

    f.server.start().unwrap();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Started).await;

    f.server.stop().unwrap();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Stopped).await;

    assert_eq!(f.server.state(), ServerState::Stopped);
    assert_eq!(f.endpoint.close_requests(), 1);
    assert_eq!(f.cluster.leave_count(), 1);
    assert_eq!(f.logger.close_requests(), 1);
}

#[tokio::test]
async fn start_is_rejected_unless_stopped() {
    let f = fixture();
    let mut notifications = f.server.subscribe();

    f.server.start().unwrap();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Started).await;

    assert!(matches!(
        f.server.start(),
        Err(ServerError::NotStopped(ServerState::Running))
    ));

    f.server.stop().unwrap();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Stopped).await;
    assert!(matches!(f.server.stop(), Err(ServerError::AlreadyStopped)));
}

#[tokio::test]
async fn stop_during_plugin_init_never_touches_the_endpoint() {
    let slow = MockDependency::pending("slow-cache");
    let f = fixture_with(|options| options.with_plugin("slow-cache", slow.clone()));
    let mut notifications = f.server.subscribe();

    f.server.start().unwrap();
    wait_for_state(&f.server, ServerState::PluginInit).await;

    f.server.stop().unwrap();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Stopped).await;

    // The endpoint was never initialised, so shutdown skipped it entirely.
    assert_eq!(f.endpoint.close_requests(), 0);
    assert!(!f.endpoint.has_sink());
    assert_eq!(f.cluster.leave_count(), 0);
    assert_eq!(f.logger.close_requests(), 1);
}

#[tokio::test(start_paused = true)]
async fn dependency_timeout_fails_startup_with_the_culprit_named() {
    let f = fixture_with(|options| {
        options.with_plugin("slow-cache", MockDependency::pending("slow-cache"))
    });
    let mut notifications = f.server.subscribe();

    f.server.start().unwrap();
    let failed = wait_for_notification(&mut notifications, |n| {
        matches!(n, ServerNotification::StartupFailed { .. })
    })
    .await;
    assert_eq!(
        failed,
        ServerNotification::StartupFailed {
            dependency: "slow-cache".to_string()
        }
    );

    // The server halts in the failed phase; it never reaches Running.
    assert_eq!(f.server.state(), ServerState::PluginInit);
    assert!(
        f.logger
            .entries()
            .iter()
            .any(|(_, event, msg)| {
                *event == riptide_core::LogEvent::PluginInitializationTimeout
                    && msg.contains("slow-cache")
            })
    );

    // A stop still tears down cleanly.
    f.server.stop().unwrap();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Stopped).await;
}

#[tokio::test]
async fn logger_runtime_errors_reach_the_plugin_error_log() {
    let f = fixture();
    let mut notifications = f.server.subscribe();

    f.server.start().unwrap();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Started).await;

    f.logger.emit_error("sink went away");
    wait_for_log(&f.logger, |event, msg| {
        *event == riptide_core::LogEvent::PluginError && msg.contains("sink went away")
    })
    .await;

    f.server.stop().unwrap();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Stopped).await;
}

#[tokio::test]
async fn late_readiness_from_a_stopped_run_is_ignored() {
    let slow = MockDependency::pending("slow-cache");
    let f = fixture_with(|options| options.with_plugin("slow-cache", slow.clone()));
    let mut notifications = f.server.subscribe();

    f.server.start().unwrap();
    wait_for_state(&f.server, ServerState::PluginInit).await;
    f.server.stop().unwrap();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Stopped).await;

    // The readiness the first run was waiting for arrives after the fact.
    slow.mark_ready();
    tokio::task::yield_now().await;
    assert_eq!(f.server.state(), ServerState::Stopped);

    // A fresh start is unaffected by the first run's late completion.
    f.server.start().unwrap();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Started).await;
    assert!(f.server.is_running());

    f.server.stop().unwrap();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Stopped).await;
}

#[tokio::test]
async fn stop_during_shutdown_is_reported_and_ignored() {
    let cache = MockDependency::manual_closing("cache");
    let f = fixture_with(|options| options.with_plugin("cache", cache.clone()));
    let mut notifications = f.server.subscribe();

    f.server.start().unwrap();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Started).await;

    f.server.stop().unwrap();
    wait_for_state(&f.server, ServerState::PluginShutdown).await;

    // Accepted synchronously, then discarded by the core as invalid.
    f.server.stop().unwrap();
    wait_for_log(&f.logger, |event, _| {
        *event == riptide_core::LogEvent::InvalidStateTransition
    })
    .await;

    cache.emit_closed();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Stopped).await;
    assert_eq!(f.server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn messages_flow_to_handlers_and_presence_tracks_clients() {
    let f = fixture();
    let mut notifications = f.server.subscribe();

    f.server.start().unwrap();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Started).await;

    let conn = riptide_core::ConnectionHandle::with_user("alice");
    f.endpoint.connect_client(&conn);
    tokio::time::timeout(WAIT, f.presence.wait_for_joins(1))
        .await
        .unwrap();

    assert!(f.endpoint.push_message(&conn, Message::new(Topic::Event, "emit", vec![])));
    assert!(f.endpoint.push_message(&conn, Message::new(Topic::Rpc, "request", vec![])));
    tokio::time::timeout(WAIT, f.recorders[0].wait_for_calls(1))
        .await
        .unwrap();
    tokio::time::timeout(WAIT, f.recorders[1].wait_for_calls(1))
        .await
        .unwrap();
    assert_eq!(f.recorders[0].calls()[0].0.user.as_deref(), Some("alice"));

    f.endpoint.disconnect_client(&conn);
    tokio::time::timeout(WAIT, f.presence.wait_for_leaves(1))
        .await
        .unwrap();

    f.server.stop().unwrap();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Stopped).await;
}

/// Vetoes every rpc message; traces nothing else.
#[derive(Default)]
struct RpcMuzzle;

struct SkipHook;

#[async_trait::async_trait]
impl Hook for SkipHook {
    async fn invoke(&self, ctx: &HookContext) {
        ctx.set_skip();
    }
}

impl Plugin for RpcMuzzle {
    fn manifest(&self) -> PluginManifest {
        PluginManifest {
            name: "rpc-muzzle".to_string(),
            riptide_plugin: true,
            ..Default::default()
        }
    }

    fn register(
        &self,
        bus: &dyn HookBus,
        _options: Option<&serde_json::Value>,
    ) -> Result<(), PluginError> {
        bus.register(events::TOPIC_RPC, Arc::new(SkipHook));
        Ok(())
    }
}

#[tokio::test]
async fn plugin_hooks_can_veto_one_topic_pipeline() {
    let f = fixture_with(|options| {
        options
            .with_plugin_loader(PluginLoaderConfig {
                enabled: true,
                ..Default::default()
            })
            .with_plugin_discovery(Arc::new(StaticRegistry::new(vec![
                Arc::new(RpcMuzzle) as Arc<dyn Plugin>,
            ])))
    });
    let mut notifications = f.server.subscribe();

    f.server.start().unwrap();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Started).await;

    let conn = riptide_core::ConnectionHandle::new();
    f.endpoint.push_message(&conn, Message::new(Topic::Rpc, "request", vec![]));
    f.endpoint.push_message(&conn, Message::new(Topic::Event, "emit", vec![]));

    tokio::time::timeout(WAIT, f.recorders[0].wait_for_calls(1))
        .await
        .unwrap();
    // The event message arrived after the rpc one was pumped, so the rpc
    // veto has already happened.
    assert_eq!(f.recorders[1].call_count(), 0);

    f.server.stop().unwrap();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Stopped).await;
}

#[tokio::test]
async fn server_restarts_cleanly_after_a_stop() {
    let f = fixture();
    let mut notifications = f.server.subscribe();

    f.server.start().unwrap();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Started).await;
    f.server.stop().unwrap();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Stopped).await;

    f.server.start().unwrap();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Started).await;
    assert!(f.server.is_running());

    // The fresh run wired a fresh sink; traffic still flows.
    let conn = riptide_core::ConnectionHandle::new();
    assert!(f.endpoint.push_message(&conn, Message::new(Topic::Record, "write", vec![])));
    tokio::time::timeout(WAIT, f.recorders[2].wait_for_calls(1))
        .await
        .unwrap();

    f.server.stop().unwrap();
    wait_for_notification(&mut notifications, |n| *n == ServerNotification::Stopped).await;
    assert_eq!(f.endpoint.close_requests(), 2);
}
