//! Delivery module - HTTP forwarding with a durable retry queue.
//!
//! Each parsed record becomes one JSON envelope, logged and POSTed to the
//! configured endpoint. Inline failures persist the request into the
//! on-disk FIFO queue, which a drainer replays on a periodic tick and
//! after every successful inline POST.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::protocol::Record;
use crate::stats::Stats;

pub mod envelope;
pub mod poster;
pub mod queue;

#[cfg(test)]
pub(crate) mod testing;

pub use envelope::envelope;
pub use poster::{classify, DeliveryResult, Outcome, Poster};
pub use queue::{DrainOutcome, QueueEntry, RetryQueue};

/// The record delivery pipeline: poster plus queue.
///
/// Owns each record from parse until either a 2xx response discards it or
/// the on-disk queue takes it over.
pub struct Delivery {
    enabled: bool,
    poster: Poster,
    queue: Arc<RetryQueue>,
    drain_max: usize,
    stats: Arc<Stats>,
}

impl Delivery {
    /// Build the pipeline. Fails fast on an unusable post URL or method.
    pub fn new(config: &Config, stats: Arc<Stats>) -> Result<Self> {
        let poster = Poster::new(&config.post, &config.post_url())?;
        let queue = Arc::new(RetryQueue::load(&config.post.queue_file));
        Ok(Self {
            enabled: config.post.enabled,
            poster,
            queue,
            drain_max: config.post.queue_drain_max_per_tick,
            stats,
        })
    }

    /// Pending queue depth.
    pub async fn queue_len(&self) -> usize {
        self.queue.len().await
    }

    /// Handle one parsed record: log it, then POST or enqueue.
    ///
    /// After a successful inline POST the drain runs (and completes or
    /// short-circuits against an in-flight one) before this returns, so a
    /// reachable endpoint empties the queue promptly.
    pub async fn deliver(&self, record: &Record) {
        let body = envelope(record);
        info!(target: "p3_bridge::record", "{body}");

        if !self.enabled {
            debug!(tor = %record.tor_name(), "delivery disabled, record dropped");
            return;
        }

        match self.poster.deliver(&body).await {
            DeliveryResult::Delivered => {
                self.stats.post_ok();
                self.drain().await;
            }
            DeliveryResult::Failed { last_error } => {
                self.stats.post_failed();
                warn!(%last_error, "record delivery failed, enqueueing");
                let entry = QueueEntry::new(
                    self.poster.method(),
                    self.poster.url(),
                    self.poster.headers().clone(),
                    body,
                    last_error,
                );
                if let Err(e) = self.queue.enqueue(entry).await {
                    warn!(error = %e, "could not persist queue entry");
                }
            }
        }
    }

    /// Replay queued entries against their stored targets.
    pub async fn drain(&self) -> DrainOutcome {
        let outcome = self
            .queue
            .drain_with(self.drain_max, |entry| async move {
                self.poster
                    .post_stored(&entry.method, &entry.url, &entry.headers, &entry.payload)
                    .await
            })
            .await;

        if let DrainOutcome::Completed { delivered, remaining } = outcome {
            for _ in 0..delivered {
                self.stats.drain_ok();
            }
            if delivered > 0 {
                debug!(delivered, remaining, "queue drained");
            }
        }
        outcome
    }
}
