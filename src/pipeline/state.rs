//! # Parser State
//!
//! Per-job counters shared by the tokenizer, the enrichment workers and the
//! assembler. Every field is an atomic so the three stages update it without
//! locking; the overseer reads snapshots for reporting.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Live counters of the job bound to one pipeline instance
#[derive(Debug, Default)]
pub struct ParserState {
    reader_active: AtomicBool,
    active_workers: AtomicUsize,
    writer_active: AtomicBool,
    decoded: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`ParserState`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserStats {
    pub reader_active: bool,
    pub active_workers: usize,
    pub writer_active: bool,
    pub decoded: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl ParserState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reader_active(&self, active: bool) {
        self.reader_active.store(active, Ordering::SeqCst);
    }

    pub fn set_writer_active(&self, active: bool) {
        self.writer_active.store(active, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_reader_active(&self) -> bool {
        self.reader_active.load(Ordering::SeqCst)
    }

    /// Marks one unit of enrichment work as started; the guard ends it
    #[must_use]
    pub fn begin_work(&self) -> ActiveWorkGuard<'_> {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
        ActiveWorkGuard { state: self }
    }

    pub fn record_decoded(&self) -> u64 {
        self.decoded.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn snapshot(&self) -> ParserStats {
        ParserStats {
            reader_active: self.reader_active.load(Ordering::SeqCst),
            active_workers: self.active_workers.load(Ordering::SeqCst),
            writer_active: self.writer_active.load(Ordering::SeqCst),
            decoded: self.decoded.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }

    /// Clears every counter once the job has finished
    pub fn reset(&self) {
        self.reader_active.store(false, Ordering::SeqCst);
        self.active_workers.store(0, Ordering::SeqCst);
        self.writer_active.store(false, Ordering::SeqCst);
        self.decoded.store(0, Ordering::SeqCst);
        self.succeeded.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
    }
}

/// Decrements the active-worker count when dropped
#[derive(Debug)]
pub struct ActiveWorkGuard<'a> {
    state: &'a ParserState,
}

impl Drop for ActiveWorkGuard<'_> {
    fn drop(&mut self) {
        self.state.active_workers.fetch_sub(1, Ordering::SeqCst);
    }
}
