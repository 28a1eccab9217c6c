//! Node-scoped client over the mock engine

use crate::{GroupHandle, Message, MockEngine, Result};
use std::sync::Arc;
use std::time::Duration;

/// Mock client for interacting with the mock engine
#[derive(Clone)]
pub struct MockClient {
    /// Node ID
    node_id: String,

    /// Reference to the mock engine
    engine: Arc<MockEngine>,
}

impl MockClient {
    /// Create a new mock client
    pub fn new(node_id: String, engine: Arc<MockEngine>) -> Self {
        Self { node_id, engine }
    }

    /// Get the node ID of this client
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Join a replication group as this node
    pub fn join_group(&self, group: &str) -> Result<GroupHandle> {
        self.engine.open_group(group, &self.node_id)
    }

    /// Send a request and wait for a reply
    pub async fn request(
        &self,
        subject: &str,
        message: impl Into<Message>,
        timeout: Duration,
    ) -> Result<Message> {
        let message = message
            .into()
            .with_header("from".to_string(), self.node_id.clone());
        self.engine.request(subject, message, timeout).await
    }
}
