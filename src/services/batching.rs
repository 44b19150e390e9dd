//! Tiered batch sizing for generation calls.
//!
//! The generation backend has high fixed latency per call, so the first
//! batch is kept small for a fast initial page, the second is larger and
//! fetched eagerly while the user reads page one, and the steady-state
//! batch amortizes per-call overhead for deep pagination.

/// Items requested by the very first generation call for a key
pub const FIRST_BATCH: usize = 15;

/// Items requested by the eager follow-up call
pub const SECOND_BATCH: usize = 35;

/// Items requested once a list is past its first two batches
pub const STEADY_BATCH: usize = 50;

/// Maps how many items are already cached to how many more to request next
pub fn next_batch_size(existing_count: usize) -> usize {
    if existing_count == 0 {
        FIRST_BATCH
    } else if existing_count < FIRST_BATCH + SECOND_BATCH {
        SECOND_BATCH
    } else {
        STEADY_BATCH
    }
}
