//! Bucket leases.
//!
//! A lease is an ephemeral `buckets/<i>/lock` node identifying the current
//! processor of bucket `i`. Acquisition is a single conditional create: the
//! node either appears (we own the bucket) or already exists (someone else
//! does). The lease is bound to the coordinator session, so a crashed
//! worker frees its bucket without any cleanup step.
//!
//! Callers should [`release`] a lease before reusing the state machine for
//! another file to keep bucket turnover responsive; correctness does not
//! depend on it.
//!
//! [`release`]: BucketLease::release

use std::sync::{Arc, Weak};

use tidemark_core::{ANY_VERSION, Coordinator, CreateOutcome, NodeMode, RemoveOutcome};

use crate::config::ProcessorInfo;
use crate::error::{QueueError, Result};
use crate::metrics::record_lease_attempt;
use crate::paths::QueuePaths;

/// Result of a lease acquisition attempt.
#[derive(Debug)]
pub enum LeaseOutcome<C: Coordinator + ?Sized> {
    /// The bucket is now owned by this worker.
    Acquired(BucketLease<C>),
    /// Another worker currently holds the bucket.
    Busy,
}

/// A held bucket lease.
///
/// The handle owns only its lock path and a weak reference to the
/// coordinator client: if the client has gone away, so has the session, and
/// the ephemeral lock with it.
#[derive(Debug)]
pub struct BucketLease<C: Coordinator + ?Sized> {
    coordinator: Weak<C>,
    lock_path: String,
    bucket: u32,
    released: bool,
}

impl<C: Coordinator + ?Sized> BucketLease<C> {
    /// Attempts to acquire the lease for a bucket.
    ///
    /// # Errors
    ///
    /// Returns a transient error when the coordinator connection failed,
    /// a serialization error if the processor record cannot be encoded,
    /// and an invariant violation if the bucket directory is missing
    /// (layout bootstrap has not run).
    pub async fn try_acquire(
        coordinator: &Arc<C>,
        paths: &QueuePaths,
        bucket: u32,
        processor: &ProcessorInfo,
    ) -> Result<LeaseOutcome<C>> {
        let lock_path = paths.bucket_lock(bucket);
        let payload = serde_json::to_vec(processor).map_err(|e| QueueError::Serialization {
            message: format!("encode processor info: {e}"),
        })?;

        let outcome = match coordinator
            .create(&lock_path, payload.into(), NodeMode::Ephemeral, false)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                record_lease_attempt("error");
                return Err(err.into());
            }
        };

        match outcome {
            CreateOutcome::Created => {
                tracing::debug!(
                    bucket,
                    processor = %processor.identity,
                    "acquired bucket lease"
                );
                record_lease_attempt("acquired");
                Ok(LeaseOutcome::Acquired(Self {
                    coordinator: Arc::downgrade(coordinator),
                    lock_path,
                    bucket,
                    released: false,
                }))
            }
            CreateOutcome::Exists => {
                record_lease_attempt("busy");
                Ok(LeaseOutcome::Busy)
            }
        }
    }

    /// Returns the leased bucket id.
    #[must_use]
    pub fn bucket(&self) -> u32 {
        self.bucket
    }

    /// Returns the coordinator path of the lock node.
    #[must_use]
    pub fn lock_path(&self) -> &str {
        &self.lock_path
    }

    /// Releases the lease by removing the lock node.
    ///
    /// A missing node is not an error: the session may already have
    /// dropped it. If the coordinator client itself is gone, the session
    /// is gone and the ephemeral with it.
    ///
    /// # Errors
    ///
    /// Returns a transient error when the coordinator connection failed;
    /// the ephemeral still vanishes with the session in that case.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let Some(coordinator) = self.coordinator.upgrade() else {
            return Ok(());
        };
        match coordinator.remove(&self.lock_path, ANY_VERSION).await? {
            RemoveOutcome::Removed | RemoveOutcome::NoNode => Ok(()),
            RemoveOutcome::BadVersion => Err(QueueError::invariant(format!(
                "version-matched removal of {} cannot fail with ANY_VERSION",
                self.lock_path
            ))),
        }
    }
}

impl<C: Coordinator + ?Sized> Drop for BucketLease<C> {
    fn drop(&mut self) {
        if !self.released {
            // The ephemeral is reclaimed at session end; this only delays
            // bucket turnover.
            tracing::debug!(
                bucket = self.bucket,
                "bucket lease dropped without release"
            );
        }
    }
}
