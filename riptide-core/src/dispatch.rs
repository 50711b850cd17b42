//! Message distribution: hook pipeline in front of topic handlers
//!
//! Every inbound message passes the serial hook pipeline for its topic
//! before the registered handler runs. Any hook can set the skip flag to
//! veto handler delivery; the message is then dropped without further
//! processing.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use riptide_plugin_api::{HookContext, events};

use crate::error::ServerError;
use crate::hooks::HookHost;
use crate::logger::{LogEvent, LogLevel, Logger};
use crate::message::{ConnectionHandle, Message, Topic};
use crate::services::TopicHandler;

/// Routes messages to per-topic handlers, hooks first.
pub struct MessageDistributor {
    hooks: Arc<HookHost>,
    logger: Arc<dyn Logger>,
    handlers: RwLock<HashMap<Topic, Arc<dyn TopicHandler>>>,
}

impl MessageDistributor {
    pub fn new(hooks: Arc<HookHost>, logger: Arc<dyn Logger>) -> Self {
        Self {
            hooks,
            logger,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register the handler for one topic. At most one handler per topic.
    pub fn register_for_topic(
        &self,
        topic: Topic,
        handler: Arc<dyn TopicHandler>,
    ) -> Result<(), ServerError> {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.contains_key(&topic) {
            return Err(ServerError::TopicAlreadyRegistered(topic));
        }
        handlers.insert(topic, handler);
        Ok(())
    }

    /// Run the topic's serial hook pipeline, then the handler.
    ///
    /// The handler is invoked only if no hook set the skip flag. A message
    /// for a topic with no registered handler is logged and dropped.
    pub async fn distribute(&self, conn: &ConnectionHandle, message: Message) {
        let topic = message.topic;
        let Some(handler) = self.handler_for(topic) else {
            self.logger.log(
                LogLevel::Warn,
                LogEvent::UnknownTopic,
                &format!("Received message for unhandled topic {topic:?}"),
            );
            return;
        };

        let ctx = HookContext::new(message_payload(conn, &message));
        self.hooks.emit_serial(topic.hook_event_id(), &ctx).await;
        if ctx.skipped() {
            return;
        }

        handler.handle(conn, message).await;
    }

    // Clone the handler and drop the guard before any await.
    fn handler_for(&self, topic: Topic) -> Option<Arc<dyn TopicHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .cloned()
    }
}

/// The payload hooks see for inbound traffic: who sent what.
fn message_payload(conn: &ConnectionHandle, message: &Message) -> serde_json::Value {
    serde_json::json!({
        "connection": conn,
        "message": message,
    })
}

/// Drain inbound messages from the connection endpoints until cancelled.
///
/// Each message first passes the authentication hook pipeline; a skip there
/// rejects the message before it reaches any topic pipeline.
pub(crate) fn spawn_inbound_pump(
    mut rx: mpsc::UnboundedReceiver<(ConnectionHandle, Message)>,
    distributor: Arc<MessageDistributor>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let (conn, message) = tokio::select! {
                _ = cancel.cancelled() => break,
                received = rx.recv() => match received {
                    Some(pair) => pair,
                    None => break,
                },
            };

            let ctx = HookContext::new(message_payload(&conn, &message));
            distributor.hooks.emit_serial(events::AUTH, &ctx).await;
            if ctx.skipped() {
                tracing::debug!(connection = %conn.id, "Message rejected by auth hook");
                continue;
            }

            distributor.distribute(&conn, message).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use riptide_plugin_api::{Hook, HookBus};

    use super::*;
    use crate::mock::{MockLogger, RecordingHandler, recording_handlers};

    struct SkipHook;

    #[async_trait]
    impl Hook for SkipHook {
        async fn invoke(&self, ctx: &HookContext) {
            ctx.set_skip();
        }
    }

    fn distributor_with_handlers() -> (
        Arc<MessageDistributor>,
        [Arc<RecordingHandler>; 3],
        Arc<crate::mock::RecordingPresenceHandler>,
    ) {
        let hooks = Arc::new(HookHost::new(true));
        let distributor = Arc::new(MessageDistributor::new(hooks, MockLogger::ready()));
        let (handlers, recorders, presence) = recording_handlers();

        distributor
            .register_for_topic(Topic::Event, handlers.event)
            .unwrap();
        distributor
            .register_for_topic(Topic::Rpc, handlers.rpc)
            .unwrap();
        distributor
            .register_for_topic(Topic::Record, handlers.record)
            .unwrap();
        let presence_handler: Arc<dyn TopicHandler> = presence.clone();
        distributor
            .register_for_topic(Topic::Presence, presence_handler)
            .unwrap();

        (distributor, recorders, presence)
    }

    #[tokio::test]
    async fn delivers_to_the_registered_handler() {
        let (distributor, recorders, _presence) = distributor_with_handlers();
        let conn = ConnectionHandle::new();
        let message = Message::new(Topic::Rpc, "request", vec!["add".to_string()]);

        distributor.distribute(&conn, message.clone()).await;

        let calls = recorders[1].calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, message);
        assert_eq!(recorders[0].call_count(), 0);
        assert_eq!(recorders[2].call_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_topic_registration_is_rejected() {
        let hooks = Arc::new(HookHost::disabled());
        let distributor = MessageDistributor::new(hooks, MockLogger::ready());
        let (handlers, _, _) = recording_handlers();

        distributor
            .register_for_topic(Topic::Event, handlers.event.clone())
            .unwrap();
        let err = distributor
            .register_for_topic(Topic::Event, handlers.event)
            .unwrap_err();
        assert!(matches!(
            err,
            ServerError::TopicAlreadyRegistered(Topic::Event)
        ));
    }

    #[tokio::test]
    async fn skip_hook_vetoes_exactly_its_own_topic() {
        // Each topic gets its own distributor with a skip hook on that topic
        // alone; the other three pipelines must stay open.
        for vetoed in Topic::ALL {
            let (distributor, recorders, presence) = distributor_with_handlers();
            distributor
                .hooks
                .register(vetoed.hook_event_id(), Arc::new(SkipHook));

            let conn = ConnectionHandle::new();
            for topic in Topic::ALL {
                distributor
                    .distribute(&conn, Message::new(topic, "action", vec![]))
                    .await;
            }

            for (idx, topic) in [Topic::Event, Topic::Rpc, Topic::Record].iter().enumerate() {
                let expected = usize::from(*topic != vetoed);
                assert_eq!(recorders[idx].call_count(), expected, "topic {topic:?}");
            }
            let expected = usize::from(Topic::Presence != vetoed);
            assert_eq!(presence.calls().len(), expected, "topic Presence");
        }
    }

    #[tokio::test]
    async fn unhandled_topic_is_logged_and_dropped() {
        let hooks = Arc::new(HookHost::disabled());
        let logger = MockLogger::ready();
        let distributor = MessageDistributor::new(hooks, logger.clone());

        distributor
            .distribute(
                &ConnectionHandle::new(),
                Message::new(Topic::Presence, "query", vec![]),
            )
            .await;

        let entries = logger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, LogLevel::Warn);
        assert_eq!(entries[0].1, LogEvent::UnknownTopic);
    }

    #[tokio::test]
    async fn pump_routes_until_cancelled() {
        let (distributor, recorders, _presence) = distributor_with_handlers();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let pump = spawn_inbound_pump(rx, distributor, cancel.clone());

        let conn = ConnectionHandle::new();
        tx.send((conn.clone(), Message::new(Topic::Event, "emit", vec![])))
            .unwrap();
        recorders[0].wait_for_calls(1).await;

        cancel.cancel();
        pump.await.unwrap();

        // Messages after cancellation are not delivered.
        let _ = tx.send((conn, Message::new(Topic::Event, "emit", vec![])));
        tokio::task::yield_now().await;
        assert_eq!(recorders[0].call_count(), 1);
    }

    #[tokio::test]
    async fn auth_skip_rejects_before_any_topic_pipeline() {
        struct ProbeHook {
            seen: Arc<tokio::sync::Notify>,
        }

        #[async_trait]
        impl Hook for ProbeHook {
            async fn invoke(&self, _ctx: &HookContext) {
                self.seen.notify_one();
            }
        }

        let (distributor, recorders, _presence) = distributor_with_handlers();
        let seen = Arc::new(tokio::sync::Notify::new());
        distributor.hooks.register(events::AUTH, Arc::new(SkipHook));
        distributor
            .hooks
            .register(events::AUTH, Arc::new(ProbeHook { seen: seen.clone() }));

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let pump = spawn_inbound_pump(rx, distributor, cancel.clone());

        tx.send((
            ConnectionHandle::new(),
            Message::new(Topic::Rpc, "request", vec![]),
        ))
        .unwrap();

        // The probe runs after the skip hook in the same auth pipeline.
        seen.notified().await;
        tokio::task::yield_now().await;
        assert_eq!(recorders[1].call_count(), 0);

        cancel.cancel();
        pump.await.unwrap();
    }
}
