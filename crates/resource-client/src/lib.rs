//! Resource-manager client
//!
//! A client addresses one partition through its bucket: the ordered list of
//! replica addresses owning the partition. Requests go to the replica that
//! last answered and move down the bucket only when a replica provably did
//! not act on the request.

use async_trait::async_trait;
use mas_common::{AccountInfo, Instruction, TransactionId};
use mas_engine::{Message, MockClient, MockEngineError};
use mas_resource::{RmRequest, RmResponse};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Resource client errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("Bucket has no peers")]
    NoPeers,

    #[error("Operation failed: {0}")]
    OperationError(String),

    #[error("No peer could serve the request: {0}")]
    Unavailable(String),

    #[error("Request to {peer} timed out")]
    Timeout { peer: String },

    #[error("Outcome unknown: {0}")]
    Indeterminate(String),

    #[error("Unexpected response type")]
    UnexpectedResponse,

    #[error("Codec error: {0}")]
    Codec(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Operations on one resource-manager partition
#[async_trait]
pub trait ResourceManagerClient: Send + Sync {
    /// Validate and reserve without applying. `Ok(false)` is a refusal.
    async fn prepare(&self, local_txn_id: TransactionId, instruction: &Instruction)
    -> Result<bool>;

    /// Replicate and apply. `Ok(false)` means the instruction was ordered
    /// but rejected when applied.
    async fn commit(&self, local_txn_id: TransactionId, instruction: &Instruction)
    -> Result<bool>;

    /// Drop whatever prepare reserved
    async fn rollback(
        &self,
        local_txn_id: TransactionId,
        instruction: &Instruction,
    ) -> Result<bool>;

    /// Read the instruction's subject account
    async fn query(&self, instruction: &Instruction) -> Result<AccountInfo>;
}

/// Builds clients for buckets
pub trait ResourceManagerConnector: Send + Sync {
    fn connect(&self, bucket: &[String]) -> Arc<dyn ResourceManagerClient>;
}

/// Client over the engine's request/reply transport
pub struct RmClient {
    client: MockClient,
    peers: Vec<String>,
    timeout: Duration,
    /// Index of the peer that last answered
    preferred: AtomicUsize,
}

impl RmClient {
    pub fn new(client: MockClient, peers: Vec<String>, timeout: Duration) -> Self {
        Self {
            client,
            peers,
            timeout,
            preferred: AtomicUsize::new(0),
        }
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Send a request starting at the preferred peer. Moves to the next
    /// peer when the current one has no handler or answers `Unavailable`;
    /// a timeout moves on only for `retry_on_timeout` requests.
    async fn send(&self, request: &RmRequest, retry_on_timeout: bool) -> Result<RmResponse> {
        if self.peers.is_empty() {
            return Err(ClientError::NoPeers);
        }

        let body = serde_json::to_vec(request).map_err(|e| ClientError::Codec(e.to_string()))?;
        let start = self.preferred.load(Ordering::Relaxed) % self.peers.len();
        let mut last_error = String::new();

        for offset in 0..self.peers.len() {
            let index = (start + offset) % self.peers.len();
            let peer = &self.peers[index];

            let reply = match self
                .client
                .request(peer, Message::with_body(body.clone()), self.timeout)
                .await
            {
                Ok(reply) => reply,
                Err(MockEngineError::Timeout) if !retry_on_timeout => {
                    return Err(ClientError::Timeout { peer: peer.clone() });
                }
                Err(e) => {
                    tracing::debug!(%peer, op = request.name(), error = %e, "Peer unreachable, trying next");
                    last_error = format!("{}: {}", peer, e);
                    continue;
                }
            };

            let response: RmResponse = serde_json::from_slice(&reply.body)
                .map_err(|e| ClientError::Codec(e.to_string()))?;

            if let RmResponse::Unavailable(reason) = &response {
                tracing::debug!(%peer, op = request.name(), %reason, "Peer unavailable, trying next");
                last_error = format!("{}: {}", peer, reason);
                continue;
            }

            self.preferred.store(index, Ordering::Relaxed);
            return Ok(response);
        }

        Err(ClientError::Unavailable(last_error))
    }

    fn acknowledgement(response: RmResponse) -> Result<bool> {
        match response {
            RmResponse::Ok => Ok(true),
            RmResponse::Fail(reason) => {
                tracing::debug!(%reason, "Request refused");
                Ok(false)
            }
            RmResponse::Unknown(reason) => Err(ClientError::Indeterminate(reason)),
            RmResponse::Unavailable(reason) => Err(ClientError::Unavailable(reason)),
            RmResponse::Account(_) => Err(ClientError::UnexpectedResponse),
        }
    }
}

#[async_trait]
impl ResourceManagerClient for RmClient {
    async fn prepare(
        &self,
        local_txn_id: TransactionId,
        instruction: &Instruction,
    ) -> Result<bool> {
        let request = RmRequest::Prepare {
            local_txn_id,
            instruction: instruction.clone(),
        };
        Self::acknowledgement(self.send(&request, false).await?)
    }

    async fn commit(
        &self,
        local_txn_id: TransactionId,
        instruction: &Instruction,
    ) -> Result<bool> {
        let request = RmRequest::Commit {
            local_txn_id,
            instruction: instruction.clone(),
        };
        Self::acknowledgement(self.send(&request, false).await?)
    }

    async fn rollback(
        &self,
        local_txn_id: TransactionId,
        instruction: &Instruction,
    ) -> Result<bool> {
        let request = RmRequest::Rollback {
            local_txn_id,
            instruction: instruction.clone(),
        };
        // Releasing a reservation twice is harmless
        Self::acknowledgement(self.send(&request, true).await?)
    }

    async fn query(&self, instruction: &Instruction) -> Result<AccountInfo> {
        let request = RmRequest::Query {
            instruction: instruction.clone(),
        };
        match self.send(&request, true).await? {
            RmResponse::Account(account) => Ok(account),
            RmResponse::Fail(reason) => Err(ClientError::OperationError(reason)),
            RmResponse::Unknown(reason) => Err(ClientError::Indeterminate(reason)),
            RmResponse::Unavailable(reason) => Err(ClientError::Unavailable(reason)),
            RmResponse::Ok => Err(ClientError::UnexpectedResponse),
        }
    }
}

/// Connector producing [`RmClient`]s that share one transport client
#[derive(Clone)]
pub struct RmConnector {
    client: MockClient,
    timeout: Duration,
}

impl RmConnector {
    pub fn new(client: MockClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl ResourceManagerConnector for RmConnector {
    fn connect(&self, bucket: &[String]) -> Arc<dyn ResourceManagerClient> {
        Arc::new(RmClient::new(
            self.client.clone(),
            bucket.to_vec(),
            self.timeout,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mas_common::{Amount, PaymentInfo};
    use mas_engine::MockEngine;
    use mas_resource::{Applier, ApplierConfig, RmService};
    use mas_snapshot_memory::MemorySnapshotStore;

    const TIMEOUT: Duration = Duration::from_secs(1);

    /// One partition with `replicas` replicas serving on `rm.p0.r{n}`
    fn partition(engine: &Arc<MockEngine>, replicas: usize) -> Vec<Arc<RmService>> {
        engine.create_group("p0").unwrap();
        let snapshots = Arc::new(MemorySnapshotStore::new());
        (0..replicas)
            .map(|r| {
                let handle = engine.open_group("p0", &format!("r{}", r)).unwrap();
                let applier = Applier::new(&handle, snapshots.clone(), ApplierConfig::default());
                let runner = applier.clone();
                tokio::spawn(async move { runner.run(handle).await });
                let service = RmService::new(format!("rm.p0.r{}", r), applier);
                let _ = service.serve(engine);
                service
            })
            .collect()
    }

    fn client(engine: &Arc<MockEngine>, peers: &[&str]) -> RmClient {
        RmClient::new(
            MockClient::new("coordinator".to_string(), engine.clone()),
            peers.iter().map(|p| p.to_string()).collect(),
            TIMEOUT,
        )
    }

    #[tokio::test]
    async fn test_two_phase_round_trip() {
        let engine = Arc::new(MockEngine::new());
        let _services = partition(&engine, 1);
        let rm = client(&engine, &["rm.p0.r0"]);

        let xid = TransactionId::new();
        let create = Instruction::create_account(xid, AccountInfo::new("A1", Amount::from(30)));
        let local = TransactionId::new();
        assert!(rm.prepare(local, &create).await.unwrap());
        assert!(rm.commit(local, &create).await.unwrap());

        let debit = Instruction::send_payment(xid, PaymentInfo::new("A1", "A2", Amount::from(31)));
        assert!(!rm.prepare(TransactionId::new(), &debit).await.unwrap());

        let account = rm.query(&Instruction::query_account("A1")).await.unwrap();
        assert_eq!(account.balance, Amount::from(30));

        assert!(matches!(
            rm.query(&Instruction::query_account("nope")).await,
            Err(ClientError::OperationError(_))
        ));
    }

    #[tokio::test]
    async fn test_fails_over_to_live_peer() {
        let engine = Arc::new(MockEngine::new());
        let _services = partition(&engine, 2);
        // First address has no listener
        let rm = client(&engine, &["rm.p0.gone", "rm.p0.r1"]);

        let create = Instruction::create_account(
            TransactionId::new(),
            AccountInfo::new("A1", Amount::zero()),
        );
        let local = TransactionId::new();
        assert!(rm.prepare(local, &create).await.unwrap());
        assert!(rm.commit(local, &create).await.unwrap());
        assert_eq!(rm.preferred.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_no_peers() {
        let engine = Arc::new(MockEngine::new());
        let rm = client(&engine, &[]);
        assert_eq!(
            rm.query(&Instruction::query_account("A1")).await,
            Err(ClientError::NoPeers)
        );

        let rm = client(&engine, &["rm.p9.r0"]);
        assert!(matches!(
            rm.query(&Instruction::query_account("A1")).await,
            Err(ClientError::Unavailable(_))
        ));
    }
}
