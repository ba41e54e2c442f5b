//! Bridge counters.
//!
//! One aggregate owned by the bridge; every update goes through a method
//! here. Concurrent readers (an admin surface, tests) take a
//! [`StatsSnapshot`], which serializes directly.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counter aggregate for the bridge.
#[derive(Debug, Default)]
pub struct Stats {
    msg_total: AtomicU64,
    msg_ok: AtomicU64,
    msg_crc_errors: AtomicU64,
    msg_parse_errors: AtomicU64,
    msg_suppressed: AtomicU64,
    frame_resyncs: AtomicU64,
    frame_oversize: AtomicU64,
    posted: AtomicU64,
    post_failures: AtomicU64,
    enqueued: AtomicU64,
    drained: AtomicU64,
    connects: AtomicU64,
    connected: AtomicBool,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub msg_total: u64,
    pub msg_ok: u64,
    pub msg_crc_errors: u64,
    pub msg_parse_errors: u64,
    pub msg_suppressed: u64,
    pub frame_resyncs: u64,
    pub frame_oversize: u64,
    pub posted: u64,
    pub post_failures: u64,
    pub enqueued: u64,
    pub drained: u64,
    pub connects: u64,
    pub connected: bool,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A frame reached the parser.
    pub fn record_parsed(&self, crc_ok: bool) {
        self.msg_total.fetch_add(1, Ordering::Relaxed);
        if crc_ok {
            self.msg_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.msg_crc_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A frame failed to parse.
    pub fn record_parse_error(&self) {
        self.msg_total.fetch_add(1, Ordering::Relaxed);
        self.msg_parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A record was dropped by status suppression.
    pub fn record_suppressed(&self) {
        self.msg_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    /// The framer dropped bytes while resynchronizing.
    pub fn frame_resync(&self) {
        self.frame_resyncs.fetch_add(1, Ordering::Relaxed);
    }

    /// The framer abandoned an oversize frame.
    pub fn frame_oversize(&self) {
        self.frame_oversize.fetch_add(1, Ordering::Relaxed);
    }

    /// An inline POST succeeded.
    pub fn post_ok(&self) {
        self.posted.fetch_add(1, Ordering::Relaxed);
    }

    /// A record exhausted its inline attempts (or was rejected) and was
    /// handed to the queue.
    pub fn post_failed(&self) {
        self.post_failures.fetch_add(1, Ordering::Relaxed);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// A queued entry was replayed successfully.
    pub fn drain_ok(&self) {
        self.drained.fetch_add(1, Ordering::Relaxed);
    }

    /// Decoder connection established / lost.
    pub fn set_connected(&self, connected: bool) {
        if connected {
            self.connects.fetch_add(1, Ordering::Relaxed);
        }
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            msg_total: self.msg_total.load(Ordering::Relaxed),
            msg_ok: self.msg_ok.load(Ordering::Relaxed),
            msg_crc_errors: self.msg_crc_errors.load(Ordering::Relaxed),
            msg_parse_errors: self.msg_parse_errors.load(Ordering::Relaxed),
            msg_suppressed: self.msg_suppressed.load(Ordering::Relaxed),
            frame_resyncs: self.frame_resyncs.load(Ordering::Relaxed),
            frame_oversize: self.frame_oversize.load(Ordering::Relaxed),
            posted: self.posted.load(Ordering::Relaxed),
            post_failures: self.post_failures.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
        }
    }
}
