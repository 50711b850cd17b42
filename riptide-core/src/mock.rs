//! Mock collaborators for tests
//!
//! Scriptable implementations of every collaborator contract the lifecycle
//! touches. Exported so embedders can test their own wiring against the
//! same mocks the core uses.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Notify, broadcast, mpsc};

use crate::dependency::{Dependency, DependencyEvent};
use crate::endpoint::{ConnectionEndpoint, EndpointEvent};
use crate::logger::{LogEvent, LogLevel, Logger};
use crate::message::{ConnectionHandle, Message};
use crate::services::{ClusterRegistry, PresenceHandler, TopicHandler, TopicHandlers};

const EVENT_CHANNEL_CAPACITY: usize = 16;

fn lock<'a, T>(m: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A dependency whose readiness, errors, and close behavior are driven by
/// the test.
pub struct MockDependency {
    kind: String,
    ready: AtomicBool,
    closeable: bool,
    auto_close: bool,
    close_requests: AtomicUsize,
    events: broadcast::Sender<DependencyEvent>,
}

impl MockDependency {
    fn build(kind: &str, ready: bool, closeable: bool, auto_close: bool) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            kind: kind.to_string(),
            ready: AtomicBool::new(ready),
            closeable,
            auto_close,
            close_requests: AtomicUsize::new(0),
            events,
        })
    }

    /// Ready immediately, not closeable.
    pub fn ready(kind: &str) -> Arc<Self> {
        Self::build(kind, true, false, false)
    }

    /// Not ready until [`MockDependency::mark_ready`] is called.
    pub fn pending(kind: &str) -> Arc<Self> {
        Self::build(kind, false, false, false)
    }

    /// Ready, closeable, and emits `Closed` as soon as close is requested.
    pub fn auto_closing(kind: &str) -> Arc<Self> {
        Self::build(kind, true, true, true)
    }

    /// Ready and closeable, but close completion waits for
    /// [`MockDependency::emit_closed`].
    pub fn manual_closing(kind: &str) -> Arc<Self> {
        Self::build(kind, true, true, false)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        let _ = self.events.send(DependencyEvent::Ready);
    }

    pub fn emit_error(&self, message: &str) {
        let _ = self.events.send(DependencyEvent::Error(message.to_string()));
    }

    pub fn emit_closed(&self) {
        let _ = self.events.send(DependencyEvent::Closed);
    }

    pub fn close_requests(&self) -> usize {
        self.close_requests.load(Ordering::SeqCst)
    }
}

impl Dependency for MockDependency {
    fn dependency_type(&self) -> &str {
        &self.kind
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn events(&self) -> broadcast::Receiver<DependencyEvent> {
        self.events.subscribe()
    }

    fn closeable(&self) -> bool {
        self.closeable
    }

    fn close(&self) {
        self.close_requests.fetch_add(1, Ordering::SeqCst);
        if self.auto_close {
            self.emit_closed();
        }
    }
}

/// Records every log entry; ready immediately.
pub struct MockLogger {
    entries: Mutex<Vec<(LogLevel, LogEvent, String)>>,
    closeable: bool,
    close_requests: AtomicUsize,
    events: broadcast::Sender<DependencyEvent>,
}

impl MockLogger {
    fn build(closeable: bool) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
            closeable,
            close_requests: AtomicUsize::new(0),
            events,
        })
    }

    pub fn ready() -> Arc<Self> {
        Self::build(false)
    }

    /// A logger with a close capability; emits `Closed` on request.
    pub fn closing() -> Arc<Self> {
        Self::build(true)
    }

    pub fn entries(&self) -> Vec<(LogLevel, LogEvent, String)> {
        lock(&self.entries).clone()
    }

    pub fn emit_error(&self, message: &str) {
        let _ = self.events.send(DependencyEvent::Error(message.to_string()));
    }

    pub fn close_requests(&self) -> usize {
        self.close_requests.load(Ordering::SeqCst)
    }
}

impl Dependency for MockLogger {
    fn dependency_type(&self) -> &str {
        "mock logger"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn events(&self) -> broadcast::Receiver<DependencyEvent> {
        self.events.subscribe()
    }

    fn closeable(&self) -> bool {
        self.closeable
    }

    fn close(&self) {
        self.close_requests.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(DependencyEvent::Closed);
    }
}

impl Logger for MockLogger {
    fn log(&self, level: LogLevel, event: LogEvent, message: &str) {
        lock(&self.entries).push((level, event, message.to_string()));
    }
}

/// A connection endpoint driven by the test: inject messages, connect and
/// disconnect clients, observe close requests.
pub struct MockEndpoint {
    ready: AtomicBool,
    close_requests: AtomicUsize,
    events: broadcast::Sender<DependencyEvent>,
    conn_events: broadcast::Sender<EndpointEvent>,
    sink: Mutex<Option<mpsc::UnboundedSender<(ConnectionHandle, Message)>>>,
}

impl MockEndpoint {
    fn build(ready: bool) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (conn_events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            ready: AtomicBool::new(ready),
            close_requests: AtomicUsize::new(0),
            events,
            conn_events,
            sink: Mutex::new(None),
        })
    }

    pub fn ready() -> Arc<Self> {
        Self::build(true)
    }

    pub fn pending() -> Arc<Self> {
        Self::build(false)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        let _ = self.events.send(DependencyEvent::Ready);
    }

    /// Deliver an inbound message. Returns false if no sink was assigned.
    pub fn push_message(&self, conn: &ConnectionHandle, message: Message) -> bool {
        match lock(&self.sink).as_ref() {
            Some(sink) => sink.send((conn.clone(), message)).is_ok(),
            None => false,
        }
    }

    pub fn connect_client(&self, conn: &ConnectionHandle) {
        let _ = self
            .conn_events
            .send(EndpointEvent::ClientConnected(conn.clone()));
    }

    pub fn disconnect_client(&self, conn: &ConnectionHandle) {
        let _ = self
            .conn_events
            .send(EndpointEvent::ClientDisconnected(conn.clone()));
    }

    pub fn has_sink(&self) -> bool {
        lock(&self.sink).is_some()
    }

    pub fn close_requests(&self) -> usize {
        self.close_requests.load(Ordering::SeqCst)
    }
}

impl Dependency for MockEndpoint {
    fn dependency_type(&self) -> &str {
        "mock endpoint"
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn events(&self) -> broadcast::Receiver<DependencyEvent> {
        self.events.subscribe()
    }

    fn closeable(&self) -> bool {
        true
    }

    fn close(&self) {
        self.close_requests.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(DependencyEvent::Closed);
    }
}

impl ConnectionEndpoint for MockEndpoint {
    fn on_messages(&self, sink: mpsc::UnboundedSender<(ConnectionHandle, Message)>) {
        *lock(&self.sink) = Some(sink);
    }

    fn connection_events(&self) -> broadcast::Receiver<EndpointEvent> {
        self.conn_events.subscribe()
    }
}

/// Records every handled message.
pub struct RecordingHandler {
    calls: Mutex<Vec<(ConnectionHandle, Message)>>,
    notify: Notify,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            notify: Notify::new(),
        })
    }

    pub fn calls(&self) -> Vec<(ConnectionHandle, Message)> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Wait until at least `n` messages were handled.
    pub async fn wait_for_calls(&self, n: usize) {
        loop {
            let notified = self.notify.notified();
            if self.call_count() >= n {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl TopicHandler for RecordingHandler {
    async fn handle(&self, conn: &ConnectionHandle, message: Message) {
        lock(&self.calls).push((conn.clone(), message));
        self.notify.notify_waiters();
    }
}

/// Presence handler recording messages, joins, and leaves.
pub struct RecordingPresenceHandler {
    calls: Mutex<Vec<(ConnectionHandle, Message)>>,
    joins: Mutex<Vec<ConnectionHandle>>,
    leaves: Mutex<Vec<ConnectionHandle>>,
    notify: Notify,
}

impl RecordingPresenceHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            joins: Mutex::new(Vec::new()),
            leaves: Mutex::new(Vec::new()),
            notify: Notify::new(),
        })
    }

    pub fn calls(&self) -> Vec<(ConnectionHandle, Message)> {
        lock(&self.calls).clone()
    }

    pub fn joins(&self) -> Vec<ConnectionHandle> {
        lock(&self.joins).clone()
    }

    pub fn leaves(&self) -> Vec<ConnectionHandle> {
        lock(&self.leaves).clone()
    }

    pub async fn wait_for_joins(&self, n: usize) {
        loop {
            let notified = self.notify.notified();
            if lock(&self.joins).len() >= n {
                return;
            }
            notified.await;
        }
    }

    pub async fn wait_for_leaves(&self, n: usize) {
        loop {
            let notified = self.notify.notified();
            if lock(&self.leaves).len() >= n {
                return;
            }
            notified.await;
        }
    }

    pub async fn wait_for_calls(&self, n: usize) {
        loop {
            let notified = self.notify.notified();
            if lock(&self.calls).len() >= n {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl TopicHandler for RecordingPresenceHandler {
    async fn handle(&self, conn: &ConnectionHandle, message: Message) {
        lock(&self.calls).push((conn.clone(), message));
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl PresenceHandler for RecordingPresenceHandler {
    async fn handle_join(&self, conn: &ConnectionHandle) {
        lock(&self.joins).push(conn.clone());
        self.notify.notify_waiters();
    }

    async fn handle_leave(&self, conn: &ConnectionHandle) {
        lock(&self.leaves).push(conn.clone());
        self.notify.notify_waiters();
    }
}

/// Counts cluster departures.
pub struct MockCluster {
    leaves: AtomicUsize,
}

impl MockCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            leaves: AtomicUsize::new(0),
        })
    }

    pub fn leave_count(&self) -> usize {
        self.leaves.load(Ordering::SeqCst)
    }
}

impl ClusterRegistry for MockCluster {
    fn leave_cluster(&self) {
        self.leaves.fetch_add(1, Ordering::SeqCst);
    }
}

/// A full recording handler set: `(handlers, [event, rpc, record], presence)`.
pub fn recording_handlers() -> (
    TopicHandlers,
    [Arc<RecordingHandler>; 3],
    Arc<RecordingPresenceHandler>,
) {
    let event = RecordingHandler::new();
    let rpc = RecordingHandler::new();
    let record = RecordingHandler::new();
    let presence = RecordingPresenceHandler::new();
    let handlers = TopicHandlers {
        event: event.clone(),
        rpc: rpc.clone(),
        record: record.clone(),
        presence: presence.clone(),
    };
    (handlers, [event, rpc, record], presence)
}
