//! Core mock engine implementation
//!
//! This module provides the central mock engine that owns the replication
//! groups and the request/reply routing table.

use crate::group::{GroupHandle, ReplicationLog};
use crate::{Message, MockEngineError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Type alias for request handler channels
type RequestHandler = mpsc::UnboundedSender<(Message, oneshot::Sender<Message>)>;

/// Mock engine that simulates the consensus and transport layers
pub struct MockEngine {
    /// Replication groups by name
    groups: Mutex<HashMap<String, Arc<Mutex<ReplicationLog>>>>,

    /// Request/reply handlers
    request_handlers: Arc<Mutex<HashMap<String, RequestHandler>>>,
}

impl MockEngine {
    /// Create a new mock engine
    pub fn new() -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
            request_handlers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a replication group and start its sequencer
    ///
    /// Must be called from within a tokio runtime.
    pub fn create_group(&self, name: &str) -> Result<()> {
        let mut groups = self.groups.lock();
        if groups.contains_key(name) {
            return Err(MockEngineError::GroupExists(name.to_string()));
        }
        groups.insert(name.to_string(), ReplicationLog::start(name.to_string()));
        Ok(())
    }

    fn group(&self, name: &str) -> Result<Arc<Mutex<ReplicationLog>>> {
        self.groups
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| MockEngineError::GroupNotFound(name.to_string()))
    }

    /// Join a group as `member`, receiving its propose/commit/error channels
    pub fn open_group(&self, name: &str, member: &str) -> Result<GroupHandle> {
        self.group(name)?.lock().open(member.to_string())
    }

    /// Index of the last appended entry (0 when empty)
    pub fn last_index(&self, name: &str) -> Result<u64> {
        Ok(self.group(name)?.lock().last_index())
    }

    /// Discard log entries covered by a snapshot
    pub fn compact(&self, name: &str, through: u64) -> Result<()> {
        self.group(name)?.lock().compact(through);
        Ok(())
    }

    /// Push a snapshot control signal to every member of a group
    pub fn signal_snapshot(&self, name: &str) -> Result<()> {
        self.group(name)?.lock().signal_snapshot();
        Ok(())
    }

    /// Fail a group: members receive the reason on their error stream
    pub fn fail_group(&self, name: &str, reason: &str) -> Result<()> {
        self.group(name)?.lock().fail(reason.to_string());
        Ok(())
    }

    /// Close every group's commit streams and drop all request handlers
    pub fn shutdown(&self) {
        for group in self.groups.lock().values() {
            group.lock().close();
        }
        self.request_handlers.lock().clear();
    }

    /// Register a request handler for a subject
    pub fn register_handler(
        &self,
        subject: &str,
    ) -> mpsc::UnboundedReceiver<(Message, oneshot::Sender<Message>)> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut handlers = self.request_handlers.lock();
        handlers.insert(subject.to_string(), tx);

        rx
    }

    /// Remove the handler for a subject
    pub fn unregister_handler(&self, subject: &str) {
        self.request_handlers.lock().remove(subject);
    }

    /// Send a request and wait for reply
    pub async fn request(
        &self,
        subject: &str,
        message: Message,
        timeout: Duration,
    ) -> Result<Message> {
        let reply_rx = {
            let handlers = self.request_handlers.lock();
            let handler = handlers
                .get(subject)
                .ok_or_else(|| MockEngineError::NoSubscribers(subject.to_string()))?;

            let (reply_tx, reply_rx) = oneshot::channel();
            if handler.send((message, reply_tx)).is_err() {
                return Err(MockEngineError::ChannelClosed);
            }
            reply_rx
        };

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(MockEngineError::ChannelClosed),
            Err(_) => Err(MockEngineError::Timeout),
        }
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}
