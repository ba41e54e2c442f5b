//! Persistent retry queue.
//!
//! Entries that exhausted their inline attempts are appended to a single
//! JSON-array file, strictly FIFO by enqueue time. Persistence is atomic:
//! write to a `.tmp` sibling on the same filesystem, rename over the
//! target, then fsync the directory so the rename survives a crash.
//!
//! A drain replays entries from the head. The head blocking the rest is
//! the accepted cost of simplicity; entries never expire on their own (an
//! operator may edit the file while the bridge is stopped).

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::delivery::poster::Outcome;
use crate::error::{BridgeError, Result};

/// One queued request, stored verbatim so replay does not depend on the
/// live configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_tried_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub payload: Value,
    pub last_error: Option<String>,
}

impl QueueEntry {
    pub fn new(
        method: String,
        url: String,
        headers: BTreeMap<String, String>,
        payload: Value,
        last_error: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            last_tried_at: None,
            attempts: 0,
            method,
            url,
            headers,
            payload,
            last_error: Some(last_error),
        }
    }
}

/// Result of one drain invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another drain was already in flight; nothing was done.
    Skipped,
    /// The drain ran (possibly replaying nothing).
    Completed { delivered: usize, remaining: usize },
}

/// On-disk FIFO queue of failed deliveries.
pub struct RetryQueue {
    path: PathBuf,
    entries: Mutex<VecDeque<QueueEntry>>,
    draining: AtomicBool,
}

impl RetryQueue {
    /// Load the queue file. Missing, empty, or malformed files are an
    /// empty queue; the file is rewritten on the first persist.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => VecDeque::new(),
            Ok(text) => match serde_json::from_str::<VecDeque<QueueEntry>>(&text) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "malformed queue file, starting empty");
                    VecDeque::new()
                }
            },
            Err(_) => VecDeque::new(),
        };
        if !entries.is_empty() {
            debug!(path = %path.display(), pending = entries.len(), "loaded retry queue");
        }
        Self {
            path,
            entries: Mutex::new(entries),
            draining: AtomicBool::new(false),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Append an entry and persist synchronously.
    pub async fn enqueue(&self, entry: QueueEntry) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.push_back(entry);
        self.persist(&entries)
    }

    /// Replay up to `max` entries from the head.
    ///
    /// A successful replay shifts the head; any failure updates the head's
    /// `attempts`/`last_error`, persists, and aborts the drain so a down
    /// endpoint is not hammered. Concurrent invocations short-circuit.
    pub async fn drain_with<F, Fut>(&self, max: usize, post: F) -> DrainOutcome
    where
        F: Fn(QueueEntry) -> Fut,
        Fut: Future<Output = Outcome>,
    {
        if self.draining.swap(true, Ordering::AcqRel) {
            return DrainOutcome::Skipped;
        }

        let mut delivered = 0;
        for _ in 0..max {
            let head = {
                let entries = self.entries.lock().await;
                entries.front().cloned()
            };
            let Some(head) = head else { break };

            let outcome = post(head).await;

            let mut entries = self.entries.lock().await;
            match outcome {
                Outcome::Delivered => {
                    entries.pop_front();
                    delivered += 1;
                    if let Err(e) = self.persist(&entries) {
                        warn!(error = %e, "queue persist after replay failed");
                    }
                }
                Outcome::Rejected(status) => {
                    self.mark_failed(&mut entries, format!("HTTP {status}"));
                    break;
                }
                Outcome::Retryable(reason) => {
                    self.mark_failed(&mut entries, reason);
                    break;
                }
            }
        }

        let remaining = self.entries.lock().await.len();
        self.draining.store(false, Ordering::Release);
        DrainOutcome::Completed {
            delivered,
            remaining,
        }
    }

    fn mark_failed(&self, entries: &mut VecDeque<QueueEntry>, error: String) {
        if let Some(head) = entries.front_mut() {
            head.attempts += 1;
            head.last_tried_at = Some(Utc::now());
            head.last_error = Some(error);
        }
        if let Err(e) = self.persist(entries) {
            warn!(error = %e, "queue persist after failed replay failed");
        }
    }

    /// Atomic replace: temp file beside the target, fsync, rename, fsync
    /// the directory.
    fn persist(&self, entries: &VecDeque<QueueEntry>) -> Result<()> {
        let mut text = serde_json::to_string_pretty(entries)?;
        text.push('\n');

        let tmp = self.path.with_extension("tmp");
        let write = || -> std::io::Result<()> {
            fs::write(&tmp, &text)?;
            let file = fs::File::open(&tmp)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)?;
            sync_parent_dir(&self.path);
            Ok(())
        };
        write().map_err(BridgeError::QueueIo)
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}
