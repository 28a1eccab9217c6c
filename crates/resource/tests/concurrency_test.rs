//! Concurrent requests against one replica must never overdraw an account

use mas_common::{AccountInfo, Amount, Instruction, PaymentInfo, TransactionId};
use mas_engine::MockEngine;
use mas_resource::{Applier, ApplierConfig, RmRequest, RmResponse, RmService};
use mas_snapshot_memory::MemorySnapshotStore;
use std::sync::Arc;

fn start_service(engine: &MockEngine, member: &str) -> Arc<RmService> {
    let handle = engine.open_group("p0", member).unwrap();
    let applier = Applier::new(
        &handle,
        Arc::new(MemorySnapshotStore::new()),
        ApplierConfig::default(),
    );
    let runner = applier.clone();
    tokio::spawn(async move { runner.run(handle).await });
    RmService::new(format!("rm.p0.{}", member), applier)
}

async fn prepare_and_commit(service: &RmService, instruction: Instruction) -> RmResponse {
    let local_txn_id = TransactionId::new();
    let vote = service
        .handle(RmRequest::Prepare {
            local_txn_id,
            instruction: instruction.clone(),
        })
        .await;
    if vote != RmResponse::Ok {
        return vote;
    }
    service
        .handle(RmRequest::Commit {
            local_txn_id,
            instruction,
        })
        .await
}

fn debit(amount: i64) -> Instruction {
    Instruction::send_payment(
        TransactionId::new(),
        PaymentInfo::new("alice", "bob", Amount::from(amount)),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_debits_respect_balance() {
    let engine = MockEngine::new();
    engine.create_group("p0").unwrap();
    let service = start_service(&engine, "r0");

    let open = Instruction::create_account(
        TransactionId::new(),
        AccountInfo::new("alice", Amount::from(100)),
    );
    assert_eq!(prepare_and_commit(&service, open).await, RmResponse::Ok);

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            let local_txn_id = TransactionId::new();
            let instruction = debit(30);
            let vote = service
                .handle(RmRequest::Prepare {
                    local_txn_id,
                    instruction: instruction.clone(),
                })
                .await;
            (vote == RmResponse::Ok).then_some((local_txn_id, instruction))
        }));
    }

    let mut prepared = Vec::new();
    for task in tasks {
        prepared.extend(task.await.unwrap());
    }
    assert_eq!(prepared.len(), 3);

    let mut commits = Vec::new();
    for (local_txn_id, instruction) in prepared {
        let service = service.clone();
        commits.push(tokio::spawn(async move {
            service
                .handle(RmRequest::Commit {
                    local_txn_id,
                    instruction,
                })
                .await
        }));
    }
    for commit in commits {
        assert_eq!(commit.await.unwrap(), RmResponse::Ok);
    }

    assert_eq!(
        service.applier().account("alice").unwrap().balance,
        Amount::from(10)
    );
    assert!(!service.has_reservations());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replicas_apply_concurrent_proposals_in_one_order() {
    let engine = MockEngine::new();
    engine.create_group("p0").unwrap();
    let left = start_service(&engine, "r0");
    let right = start_service(&engine, "r1");

    let mut tasks = Vec::new();
    for i in 0..20 {
        let service = if i % 2 == 0 { left.clone() } else { right.clone() };
        tasks.push(tokio::spawn(async move {
            let open = Instruction::create_account(
                TransactionId::new(),
                AccountInfo::new(format!("acct-{}", i), Amount::from(i)),
            );
            prepare_and_commit(&service, open).await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), RmResponse::Ok);
    }

    for _ in 0..200 {
        if left.applier().applied_index() == 20 && right.applier().applied_index() == 20 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(left.applier().state(), right.applier().state());
}
