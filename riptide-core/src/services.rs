//! Topic handler and cluster collaborator contracts
//!
//! The business logic behind each topic (event distribution, RPC routing,
//! record sync, presence) lives outside the core. The core registers one
//! handler per topic during service initialisation and invokes it after the
//! hook pipeline, unless a hook set the skip flag.

use std::sync::Arc;

use async_trait::async_trait;

use crate::message::{ConnectionHandle, Message};

/// Handles all messages of one topic, post hook pipeline.
#[async_trait]
pub trait TopicHandler: Send + Sync {
    async fn handle(&self, conn: &ConnectionHandle, message: Message);
}

/// The presence handler additionally receives client connect/disconnect
/// notifications from the connection endpoint.
#[async_trait]
pub trait PresenceHandler: TopicHandler {
    async fn handle_join(&self, conn: &ConnectionHandle);
    async fn handle_leave(&self, conn: &ConnectionHandle);
}

/// Cluster membership collaborator. `leave_cluster` is invoked synchronously
/// when service shutdown begins; consensus and membership live elsewhere.
pub trait ClusterRegistry: Send + Sync {
    fn leave_cluster(&self);
}

/// The full handler set registered during service initialisation.
#[derive(Clone)]
pub struct TopicHandlers {
    pub event: Arc<dyn TopicHandler>,
    pub rpc: Arc<dyn TopicHandler>,
    pub record: Arc<dyn TopicHandler>,
    pub presence: Arc<dyn PresenceHandler>,
}
