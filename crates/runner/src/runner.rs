//! In-process cluster runner
//!
//! Starts one replication group per partition with its replicas, the lock
//! service, the metadata store and a coordinator wired to all of them.

use crate::config::ClusterConfig;
use crate::error::{Result, RunnerError};
use mas_coordinator::{CoordinatorConfig, CoordinatorContext, TxnCoordinator};
use mas_engine::{MockClient, MockEngine};
use mas_lock::LockService;
use mas_meta::{MemoryMetaStore, PeerDirectory, PeerInfo};
use mas_resource::{Applier, ApplierConfig, RmService};
use mas_resource_client::{ResourceManagerConnector, RmConnector};
use mas_snapshot::SnapshotStore;
use mas_snapshot_file::FileSnapshotStore;
use mas_snapshot_memory::MemorySnapshotStore;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// One partition: its replicas share a snapshot store so late joiners can
/// recover from snapshots taken by any of them
struct Partition {
    snapshots: Arc<dyn SnapshotStore>,
    replicas: Vec<Replica>,
}

struct Replica {
    address: String,
    applier: Applier,
    apply_task: JoinHandle<()>,
    serve_task: JoinHandle<()>,
    stopped: bool,
}

/// Running cluster
pub struct Runner {
    cluster: ClusterConfig,
    engine: Arc<MockEngine>,
    meta: MemoryMetaStore,
    locks: LockService,
    coordinator: TxnCoordinator,
    partitions: Mutex<BTreeMap<String, Partition>>,
}

impl Runner {
    /// Start every partition and the coordinator
    pub async fn start(cluster: ClusterConfig, coordinator: CoordinatorConfig) -> Result<Self> {
        Self::start_with_connector(cluster, coordinator, |connector| {
            Arc::new(connector) as Arc<dyn ResourceManagerConnector>
        })
        .await
    }

    /// Like [`Runner::start`], with the coordinator reaching partitions
    /// through whatever `wrap` builds around the transport connector
    pub async fn start_with_connector(
        cluster: ClusterConfig,
        coordinator: CoordinatorConfig,
        wrap: impl FnOnce(RmConnector) -> Arc<dyn ResourceManagerConnector>,
    ) -> Result<Self> {
        cluster.validate()?;
        if cluster.replicas_per_partition < coordinator.replication_factor {
            return Err(RunnerError::Config(format!(
                "replication factor {} exceeds {} replicas per partition",
                coordinator.replication_factor, cluster.replicas_per_partition
            )));
        }

        let engine = Arc::new(MockEngine::new());
        let meta = MemoryMetaStore::new();
        let locks = LockService::new(coordinator.lock_timeout);

        let mut partitions = BTreeMap::new();
        for p in 0..cluster.partitions {
            let name = format!("p{}", p);
            engine.create_group(&name)?;
            let snapshots = snapshot_store(&cluster, &name)?;

            let mut replicas = Vec::with_capacity(cluster.replicas_per_partition);
            for r in 0..cluster.replicas_per_partition {
                replicas.push(
                    start_replica(&engine, &meta, &name, r, &snapshots, &cluster.applier).await?,
                );
            }
            partitions.insert(name, Partition { snapshots, replicas });
        }

        let client = MockClient::new("coordinator".to_string(), engine.clone());
        let coordinator = TxnCoordinator::new(CoordinatorContext {
            directory: Arc::new(meta.clone()),
            transaction_log: Arc::new(meta.clone()),
            locks: Arc::new(locks.clone()),
            connector: wrap(RmConnector::new(client, coordinator.commit_timeout)),
            config: coordinator,
        });
        coordinator.refresh_peer_list().await?;

        tracing::info!(
            partitions = cluster.partitions,
            replicas = cluster.replicas_per_partition,
            "Cluster started"
        );

        Ok(Self {
            cluster,
            engine,
            meta,
            locks,
            coordinator,
            partitions: Mutex::new(partitions),
        })
    }

    pub fn coordinator(&self) -> &TxnCoordinator {
        &self.coordinator
    }

    pub fn meta(&self) -> &MemoryMetaStore {
        &self.meta
    }

    pub fn locks(&self) -> &LockService {
        &self.locks
    }

    pub fn engine(&self) -> &Arc<MockEngine> {
        &self.engine
    }

    pub fn partition_names(&self) -> Vec<String> {
        self.partitions.lock().keys().cloned().collect()
    }

    /// Appliers of every replica of `partition`, in replica order
    pub fn appliers(&self, partition: &str) -> Result<Vec<Applier>> {
        let partitions = self.partitions.lock();
        let partition = partitions
            .get(partition)
            .ok_or_else(|| RunnerError::UnknownPartition(partition.to_string()))?;
        Ok(partition
            .replicas
            .iter()
            .map(|replica| replica.applier.clone())
            .collect())
    }

    /// Start an extra replica; it catches up from the latest snapshot and
    /// the retained log
    pub async fn add_replica(&self, partition: &str) -> Result<Applier> {
        let (index, snapshots) = {
            let partitions = self.partitions.lock();
            let existing = partitions
                .get(partition)
                .ok_or_else(|| RunnerError::UnknownPartition(partition.to_string()))?;
            (existing.replicas.len(), existing.snapshots.clone())
        };

        let replica = start_replica(
            &self.engine,
            &self.meta,
            partition,
            index,
            &snapshots,
            &self.cluster.applier,
        )
        .await?;
        let applier = replica.applier.clone();

        if let Some(existing) = self.partitions.lock().get_mut(partition) {
            existing.replicas.push(replica);
        }
        self.coordinator.refresh_peer_list().await?;
        Ok(applier)
    }

    /// Crash one replica: its address stops answering and its apply loop
    /// ends. The partition keeps running on the others.
    pub fn stop_replica(&self, partition: &str, index: usize) -> Result<()> {
        let mut partitions = self.partitions.lock();
        let replica = partitions
            .get_mut(partition)
            .ok_or_else(|| RunnerError::UnknownPartition(partition.to_string()))?
            .replicas
            .get_mut(index)
            .ok_or_else(|| RunnerError::UnknownReplica(format!("{}.r{}", partition, index)))?;

        if !replica.stopped {
            self.engine.unregister_handler(&replica.address);
            replica.serve_task.abort();
            replica.apply_task.abort();
            replica.stopped = true;
            tracing::warn!(address = %replica.address, "Replica stopped");
        }
        Ok(())
    }

    /// Snapshot `partition` and drop the log entries the snapshot covers.
    /// Returns the snapshot index.
    pub fn compact_partition(&self, partition: &str) -> Result<u64> {
        let applier = {
            let partitions = self.partitions.lock();
            partitions
                .get(partition)
                .ok_or_else(|| RunnerError::UnknownPartition(partition.to_string()))?
                .replicas
                .iter()
                .find(|replica| !replica.stopped && replica.applier.is_healthy())
                .map(|replica| replica.applier.clone())
                .ok_or_else(|| RunnerError::UnknownReplica(format!("{} has no live replica", partition)))?
        };

        let metadata = applier.save_snapshot()?;
        self.engine.compact(partition, metadata.index)?;
        tracing::info!(%partition, index = metadata.index, "Partition compacted");
        Ok(metadata.index)
    }

    /// Fail the whole replication group of `partition`
    pub fn fail_partition(&self, partition: &str, reason: &str) -> Result<()> {
        if !self.partitions.lock().contains_key(partition) {
            return Err(RunnerError::UnknownPartition(partition.to_string()));
        }
        self.engine.fail_group(partition, reason)?;
        Ok(())
    }

    /// Close the commit streams, stop serving and wait for the apply loops
    pub async fn shutdown(self) {
        tracing::info!("Shutting down cluster");
        self.locks.close();
        self.engine.shutdown();

        let replicas: Vec<Replica> = std::mem::take(&mut *self.partitions.lock())
            .into_values()
            .flat_map(|partition| partition.replicas)
            .collect();
        for replica in replicas {
            replica.serve_task.abort();
            let _ = replica.apply_task.await;
        }
    }
}

fn snapshot_store(cluster: &ClusterConfig, partition: &str) -> Result<Arc<dyn SnapshotStore>> {
    Ok(match &cluster.snapshot_dir {
        Some(dir) => Arc::new(FileSnapshotStore::new(dir.join(partition))?),
        None => Arc::new(MemorySnapshotStore::new()),
    })
}

async fn start_replica(
    engine: &Arc<MockEngine>,
    meta: &MemoryMetaStore,
    partition: &str,
    index: usize,
    snapshots: &Arc<dyn SnapshotStore>,
    config: &ApplierConfig,
) -> Result<Replica> {
    let member = format!("r{}", index);
    let address = format!("rm.{}.{}", partition, member);

    let handle = engine.open_group(partition, &member)?;
    let applier = Applier::new(&handle, snapshots.clone(), config.clone());

    let apply_task = tokio::spawn({
        let applier = applier.clone();
        async move {
            // Failures are logged and surfaced through the applier's phase
            let _ = applier.run(handle).await;
        }
    });

    let service = RmService::new(address.clone(), applier.clone());
    let serve_task = service.serve(engine);

    meta.register_peer(PeerInfo::new(address.clone(), partition))
        .await?;
    tracing::debug!(%address, "Replica started");

    Ok(Replica {
        address,
        applier,
        apply_task,
        serve_task,
        stopped: false,
    })
}
