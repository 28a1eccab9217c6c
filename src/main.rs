//! Money-movement service demo
//!
//! Starts an in-process cluster from `MAS_*` environment variables, opens a
//! few accounts and runs payments between them through the coordinator.

use anyhow::{Context, Result};
use mas_common::Amount;
use mas_coordinator::CoordinatorConfig;
use mas_runner::{ClusterConfig, Runner};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("mas=info,mas_coordinator=info,mas_resource=info,warn")
            }),
        )
        .init();

    let cluster = ClusterConfig::from_env().context("invalid cluster configuration")?;
    let config = CoordinatorConfig::from_env().context("invalid coordinator configuration")?;
    let runner = Runner::start(cluster, config)
        .await
        .context("failed to start cluster")?;
    let coordinator = runner.coordinator();

    for (number, balance) in [("alice", 100), ("bob", 20), ("carol", 0)] {
        let reply = coordinator
            .create_account(number, Amount::from(balance))
            .await?;
        tracing::info!(target: "mas", account = number, reply = %reply.message, "create_account");
    }

    let payments = [
        ("alice", "bob", 30),
        ("bob", "carol", 45),
        ("carol", "alice", 500),
        ("alice", "alice", 1),
        ("alice", "dave", 1),
    ];
    for (from, to, amount) in payments {
        let reply = coordinator
            .create_payment(from, to, Amount::from(amount))
            .await?;
        tracing::info!(target: "mas", %from, %to, amount, reply = %reply.message, "create_payment");
    }

    for number in ["alice", "bob", "carol", "dave"] {
        let reply = coordinator.get_account(number).await?;
        match reply.account {
            Some(account) => {
                tracing::info!(target: "mas", account = number, balance = %account.balance, "get_account")
            }
            None => tracing::info!(target: "mas", account = number, reply = %reply.message, "get_account"),
        }
    }

    let metrics = coordinator.metrics();
    tracing::info!(
        target: "mas",
        committed = metrics.committed,
        aborted = metrics.aborted,
        rejected = metrics.rejected,
        partial_commits = metrics.partial_commits,
        "Workload finished"
    );

    runner.shutdown().await;
    Ok(())
}
