//! Resource-manager RPC service
//!
//! Serves prepare/commit/rollback/query for one partition replica over the
//! engine's request/reply transport. Prepare validates against local state
//! and records a reservation; commit replicates the instruction through the
//! applier and waits for it to apply.

use crate::messages::{RmRequest, RmResponse};
use crate::storage::ReservationManager;
use crate::{Applier, ApplierError, ApplyOutcome, ResourceError};
use mas_common::{Instruction, InstructionPayload, TransactionId};
use mas_engine::{Message, MockEngine};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// RPC front end of one replica
pub struct RmService {
    address: String,
    applier: Applier,
    reservations: Mutex<ReservationManager>,
}

impl RmService {
    pub fn new(address: impl Into<String>, applier: Applier) -> Arc<Self> {
        Arc::new(Self {
            address: address.into(),
            applier,
            reservations: Mutex::new(ReservationManager::new()),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn applier(&self) -> &Applier {
        &self.applier
    }

    /// Register on the engine under this replica's address and answer
    /// requests until the handler is dropped. Each request runs on its own
    /// task since commits wait on the apply loop.
    pub fn serve(self: &Arc<Self>, engine: &MockEngine) -> JoinHandle<()> {
        let mut requests = engine.register_handler(&self.address);
        let service = self.clone();

        tokio::spawn(async move {
            tracing::debug!(address = %service.address, "RM service listening");
            while let Some((message, reply)) = requests.recv().await {
                let service = service.clone();
                tokio::spawn(async move {
                    let response = service.handle_message(&message).await;
                    let body = match serde_json::to_vec(&response) {
                        Ok(body) => body,
                        Err(e) => {
                            tracing::error!(address = %service.address, error = %e, "Failed to encode response");
                            return;
                        }
                    };
                    let _ = reply.send(Message::with_body(body));
                });
            }
            tracing::debug!(address = %service.address, "RM service stopped");
        })
    }

    async fn handle_message(&self, message: &Message) -> RmResponse {
        match serde_json::from_slice::<RmRequest>(&message.body) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                tracing::warn!(address = %self.address, error = %e, "Malformed RM request");
                RmResponse::Fail(format!("malformed request: {}", e))
            }
        }
    }

    /// Dispatch one request
    pub async fn handle(&self, request: RmRequest) -> RmResponse {
        if !self.applier.is_healthy() {
            return RmResponse::Unavailable(format!(
                "{} is unhealthy: {}",
                self.address,
                self.applier.phase()
            ));
        }

        tracing::debug!(address = %self.address, op = request.name(), "RM request");

        match request {
            RmRequest::Prepare {
                local_txn_id,
                instruction,
            } => match self.prepare(local_txn_id, &instruction) {
                Ok(()) => RmResponse::Ok,
                Err(e) => RmResponse::Fail(e.to_string()),
            },
            RmRequest::Commit {
                local_txn_id,
                instruction,
            } => self.commit(local_txn_id, instruction).await,
            RmRequest::Rollback { local_txn_id, .. } => {
                self.rollback(local_txn_id);
                RmResponse::Ok
            }
            RmRequest::Query { instruction } => self.query(&instruction),
        }
    }

    fn prepare(
        &self,
        local_txn_id: TransactionId,
        instruction: &Instruction,
    ) -> Result<(), ResourceError> {
        let mut reservations = self.reservations.lock();

        match &instruction.payload {
            InstructionPayload::CreateAccount(account) => {
                if self.applier.account(&account.number).is_some() {
                    return Err(ResourceError::AccountExists(account.number.clone()));
                }
                if account.balance.is_negative() {
                    return Err(ResourceError::InvalidAmount(account.balance));
                }
                reservations.reserve_create(local_txn_id, &account.number)
            }
            InstructionPayload::SendPayment(payment) => {
                if !payment.amount.is_positive() {
                    return Err(ResourceError::InvalidAmount(payment.amount));
                }
                let balance = self
                    .applier
                    .account(&payment.from)
                    .map(|a| a.balance)
                    .ok_or_else(|| ResourceError::UnknownAccount(payment.from.clone()))?;
                reservations.reserve_debit(local_txn_id, &payment.from, payment.amount, balance)
            }
            InstructionPayload::ReceivePayment(payment) => {
                if !payment.amount.is_positive() {
                    return Err(ResourceError::InvalidAmount(payment.amount));
                }
                if self.applier.account(&payment.to).is_none() {
                    return Err(ResourceError::UnknownAccount(payment.to.clone()));
                }
                reservations.reserve_credit(local_txn_id, &payment.to, payment.amount);
                Ok(())
            }
            InstructionPayload::QueryAccount(account) => self
                .applier
                .account(&account.number)
                .map(|_| ())
                .ok_or_else(|| ResourceError::UnknownAccount(account.number.clone())),
        }
    }

    async fn commit(&self, local_txn_id: TransactionId, instruction: Instruction) -> RmResponse {
        let timeout = self.applier.config().apply_timeout;
        let result = self.applier.propose_and_wait(instruction, timeout).await;

        // Released only after the apply so the debited balance is never
        // spendable twice
        self.reservations.lock().release_transaction(local_txn_id);

        match result {
            Ok(ApplyOutcome::Applied) => RmResponse::Ok,
            Ok(ApplyOutcome::Rejected(reason)) => RmResponse::Fail(reason),
            Err(e @ (ApplierError::Encode(_) | ApplierError::ProposalsClosed)) => {
                RmResponse::Unavailable(e.to_string())
            }
            Err(e) => {
                tracing::warn!(address = %self.address, %local_txn_id, error = %e, "Commit outcome unknown");
                RmResponse::Unknown(e.to_string())
            }
        }
    }

    fn rollback(&self, local_txn_id: TransactionId) {
        if self.reservations.lock().release_transaction(local_txn_id) {
            tracing::debug!(address = %self.address, %local_txn_id, "Reservation released");
        }
    }

    fn query(&self, instruction: &Instruction) -> RmResponse {
        let number = instruction.subject_account();
        match self.applier.account(number) {
            Some(account) => RmResponse::Account(account),
            None => RmResponse::Fail(ResourceError::UnknownAccount(number.to_string()).to_string()),
        }
    }

    /// Outstanding reservations held by this replica
    pub fn has_reservations(&self) -> bool {
        !self.reservations.lock().is_empty()
    }
}
