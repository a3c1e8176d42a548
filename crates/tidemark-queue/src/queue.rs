//! The ordered queue facade.
//!
//! [`OrderedQueue`] wires a validated [`QueueConfig`] and a shared
//! coordinator client into the layout, lease, and claim components. It is
//! the only construction path the surrounding ingestion scheduler needs.

use std::sync::Arc;

use tidemark_core::{Coordinator, CreateOutcome, NodeMode, SetOutcome};

use crate::bootstrap;
use crate::claim::{CURSOR_RETRY_LIMIT, FileClaim};
use crate::config::{ProcessorInfo, QueueConfig};
use crate::error::{QueueError, Result};
use crate::lease::{BucketLease, LeaseOutcome};
use crate::metadata::FileMetadata;
use crate::metrics::record_cursor_retry;
use crate::paths::QueuePaths;
use crate::shard::bucket_for_path;

/// One ordered ingestion queue rooted at a coordinator path.
///
/// The coordinator client is an explicit dependency shared behind `Arc`;
/// tests substitute the in-memory implementation.
pub struct OrderedQueue<C: Coordinator + ?Sized> {
    coordinator: Arc<C>,
    config: QueueConfig,
    paths: QueuePaths,
}

impl<C: Coordinator + ?Sized> OrderedQueue<C> {
    /// Creates a queue handle over the given coordinator client.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the config fails validation.
    pub fn new(coordinator: Arc<C>, config: QueueConfig) -> Result<Self> {
        config.validate()?;
        let paths = QueuePaths::new(config.root_path.clone(), config.buckets);
        Ok(Self {
            coordinator,
            config,
            paths,
        })
    }

    /// Returns the queue configuration.
    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Returns the canonical path generator for this queue.
    #[must_use]
    pub fn paths(&self) -> &QueuePaths {
        &self.paths
    }

    /// Returns the bucket a path belongs to.
    #[must_use]
    pub fn bucket_for(&self, file_path: &str) -> u32 {
        bucket_for_path(file_path, self.config.hash_seed, self.config.buckets)
    }

    /// Idempotently creates the persistent layout under the queue root.
    ///
    /// # Errors
    ///
    /// Returns a transient error when the coordinator connection failed.
    pub async fn ensure_layout(&self) -> Result<()> {
        bootstrap::ensure_layout(self.coordinator.as_ref(), &self.paths).await
    }

    /// Attempts to acquire the lease for a bucket.
    ///
    /// # Errors
    ///
    /// Returns an invariant violation when the queue is unsharded (leases
    /// are disabled; cursor versioning alone serializes the single shard)
    /// or the bucket id is out of range, and a transient error when the
    /// coordinator connection failed.
    pub async fn try_acquire_bucket(&self, bucket: u32) -> Result<LeaseOutcome<C>> {
        if !self.config.is_sharded() {
            return Err(QueueError::invariant(
                "bucket leases are disabled for an unsharded queue",
            ));
        }
        if bucket >= self.config.buckets {
            return Err(QueueError::invariant(format!(
                "bucket {bucket} out of range [0, {})",
                self.config.buckets
            )));
        }
        let processor = ProcessorInfo::for_lease(&self.config.processor_identity);
        BucketLease::try_acquire(&self.coordinator, &self.paths, bucket, &processor).await
    }

    /// Creates the claim state machine for a candidate file path.
    #[must_use]
    pub fn claim(&self, file_path: &str) -> FileClaim<C> {
        FileClaim::new(
            Arc::clone(&self.coordinator),
            &self.paths,
            self.config.processor_identity.clone(),
            self.config.max_loading_retries,
            self.config.hash_seed,
            file_path,
        )
    }

    /// Seeds every bucket cursor with a high-water mark when the queue is
    /// (re)attached, so prior objects are skipped.
    ///
    /// A cursor that already subsumes the mark is left unchanged rather
    /// than rejected. No claim nodes are involved; each bucket advances in
    /// its own transaction.
    ///
    /// # Errors
    ///
    /// Returns a transient error when the coordinator connection failed or
    /// cursor contention persisted past the retry bound.
    pub async fn set_processed_at_start(&self, high_water_mark: &str) -> Result<()> {
        let payload = FileMetadata::new(high_water_mark).to_payload()?;

        for bucket in 0..self.config.buckets {
            let processed_path = self.paths.processed(bucket);
            let mut advanced = false;

            for _ in 0..CURSOR_RETRY_LIMIT {
                match self.coordinator.get(&processed_path).await? {
                    Some(read) => {
                        if !read.payload.is_empty() {
                            let cursor = FileMetadata::from_payload(&read.payload)?;
                            if cursor.file_path.as_str() >= high_water_mark {
                                advanced = true;
                                break;
                            }
                        }
                        match self
                            .coordinator
                            .set(&processed_path, payload.clone(), read.version)
                            .await?
                        {
                            SetOutcome::Set { .. } => {
                                advanced = true;
                                break;
                            }
                            SetOutcome::BadVersion | SetOutcome::NoNode => {
                                record_cursor_retry("set_processed_at_start");
                            }
                        }
                    }
                    None => {
                        match self
                            .coordinator
                            .create(
                                &processed_path,
                                payload.clone(),
                                NodeMode::Persistent,
                                false,
                            )
                            .await?
                        {
                            CreateOutcome::Created => {
                                advanced = true;
                                break;
                            }
                            CreateOutcome::Exists => {
                                record_cursor_retry("set_processed_at_start");
                            }
                        }
                    }
                }
            }

            if !advanced {
                return Err(QueueError::transient(format!(
                    "cursor contention persisted for bucket {bucket} after {CURSOR_RETRY_LIMIT} attempts"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_core::MemoryCluster;

    fn config(buckets: u32) -> QueueConfig {
        let mut config = QueueConfig::new("/queues/events");
        config.buckets = buckets;
        config.processor_identity = "test-worker".to_string();
        config
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let cluster = MemoryCluster::new();
        let session = Arc::new(cluster.session());
        let result = OrderedQueue::new(session, QueueConfig::new("relative/root"));
        assert!(matches!(result, Err(QueueError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_lease_disabled_when_unsharded() {
        let cluster = MemoryCluster::new();
        let session = Arc::new(cluster.session());
        let queue = OrderedQueue::new(session, config(1)).expect("queue");
        queue.ensure_layout().await.expect("bootstrap");

        let result = queue.try_acquire_bucket(0).await;
        assert!(matches!(result, Err(QueueError::InvariantViolation { .. })));
    }

    #[tokio::test]
    async fn test_bucket_out_of_range_is_invariant_violation() {
        let cluster = MemoryCluster::new();
        let session = Arc::new(cluster.session());
        let queue = OrderedQueue::new(session, config(4)).expect("queue");
        queue.ensure_layout().await.expect("bootstrap");

        let result = queue.try_acquire_bucket(4).await;
        assert!(matches!(result, Err(QueueError::InvariantViolation { .. })));
    }

    #[tokio::test]
    async fn test_set_processed_at_start_seeds_all_buckets() {
        let cluster = MemoryCluster::new();
        let session = Arc::new(cluster.session());
        let queue = OrderedQueue::new(session, config(3)).expect("queue");
        queue.ensure_layout().await.expect("bootstrap");

        queue
            .set_processed_at_start("imports/2024-06-01/zzz.csv")
            .await
            .expect("seed cursors");

        for bucket in 0..3 {
            let payload = cluster
                .payload(&queue.paths().processed(bucket))
                .expect("cursor exists");
            let cursor = FileMetadata::from_payload(&payload).expect("decode");
            assert_eq!(cursor.file_path, "imports/2024-06-01/zzz.csv");
        }
    }

    #[tokio::test]
    async fn test_set_processed_at_start_keeps_greater_cursor() {
        let cluster = MemoryCluster::new();
        let session = Arc::new(cluster.session());
        let queue = OrderedQueue::new(session, config(1)).expect("queue");
        queue.ensure_layout().await.expect("bootstrap");

        queue
            .set_processed_at_start("imports/m.csv")
            .await
            .expect("first seed");
        queue
            .set_processed_at_start("imports/f.csv")
            .await
            .expect("second seed is a no-op");

        let payload = cluster
            .payload(&queue.paths().processed(0))
            .expect("cursor exists");
        let cursor = FileMetadata::from_payload(&payload).expect("decode");
        assert_eq!(cursor.file_path, "imports/m.csv");
    }
}
