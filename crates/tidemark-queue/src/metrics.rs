//! Queue metrics.
//!
//! Provides metrics for claim outcomes, cursor contention, and bucket lease
//! acquisition. These complement the structured logging already in place.

use metrics::{counter, describe_counter};

/// Claim-transition outcomes counter.
pub const CLAIM_OUTCOMES: &str = "tidemark_queue_claim_outcomes_total";

/// Cursor-contention retry counter.
pub const CURSOR_RETRIES: &str = "tidemark_queue_cursor_retries_total";

/// Bucket lease acquisition attempts counter.
pub const LEASE_ATTEMPTS: &str = "tidemark_queue_lease_attempts_total";

/// Registers all queue metric descriptions.
///
/// Call this once at application startup after initializing the metrics
/// recorder.
pub fn register_metrics() {
    describe_counter!(
        CLAIM_OUTCOMES,
        "Total file-claim state machine outcomes by operation and result"
    );
    describe_counter!(
        CURSOR_RETRIES,
        "Total retries caused by concurrent cursor advancement"
    );
    describe_counter!(
        LEASE_ATTEMPTS,
        "Total bucket lease acquisition attempts by result"
    );
}

/// Records a state-machine outcome.
pub fn record_claim_outcome(operation: &str, outcome: &str) {
    counter!(
        CLAIM_OUTCOMES,
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Records one cursor-contention retry.
pub fn record_cursor_retry(operation: &str) {
    counter!(CURSOR_RETRIES, "operation" => operation.to_string()).increment(1);
}

/// Records a lease acquisition attempt.
pub fn record_lease_attempt(result: &str) {
    counter!(LEASE_ATTEMPTS, "result" => result.to_string()).increment(1);
}
