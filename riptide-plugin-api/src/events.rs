//! Well-known hook event ids emitted by the server core
//!
//! Plugins register hooks against these ids. Topic-scoped ids fire serially
//! per inbound message; the others fire at fixed points in the server
//! lifecycle.

/// Serial. Fired once the server reaches `Running`, before the started
/// notification goes out.
pub const CORE_STARTED: &str = "core:started";

/// Parallel. Fired during plugin initialisation with a configuration
/// snapshot.
pub const CONFIG: &str = "rt:config";

/// Serial. Fired for every authenticated inbound message before topic
/// distribution.
pub const AUTH: &str = "rt:auth";

/// Serial, topic-scoped. A set skip flag suppresses the topic handler.
pub const TOPIC_EVENT: &str = "rt:event";
/// Serial, topic-scoped. A set skip flag suppresses the topic handler.
pub const TOPIC_RPC: &str = "rt:rpc";
/// Serial, topic-scoped. A set skip flag suppresses the topic handler.
pub const TOPIC_RECORD: &str = "rt:record";
/// Serial, topic-scoped. A set skip flag suppresses the topic handler.
pub const TOPIC_PRESENCE: &str = "rt:presence";
