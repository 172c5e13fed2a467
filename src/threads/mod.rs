//! Thread infrastructure: ingest pool, merge loop, status reporter.

pub(crate) mod ingest_pool;
pub(crate) mod merge_thread;
pub(crate) mod status_thread;

pub(crate) use ingest_pool::IngestPool;
pub(crate) use merge_thread::MergeThread;
pub(crate) use status_thread::StatusThread;

use std::time::{Duration, Instant};

use crate::server::context::ServerContext;

/// Sleep in short slices, returning early once shutdown is requested.
pub(crate) fn interruptible_sleep(context: &ServerContext, total: Duration) {
    const SLICE: Duration = Duration::from_millis(20);
    let deadline = Instant::now() + total;
    loop {
        if context.shutdown_requested() {
            return;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        std::thread::sleep(remaining.min(SLICE));
    }
}
