//! Bridge runtime: wiring, lifecycle, and the record pipeline.
//!
//! [`Bridge::start`] builds the stack from a [`Config`], spawns the
//! transport and the queue drainer, and returns a handle for runtime
//! control. The [`Pipeline`] keeps a single-writer discipline: framer,
//! parser, and inline delivery run on one logical task, one frame fully
//! handled before the next.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Config, Mode};
use crate::delivery::Delivery;
use crate::error::{BridgeError, Result};
use crate::protocol::{parse_payload, FrameDiagnostic, Framer, Tor};
use crate::stats::{Stats, StatsSnapshot};
use crate::transport::{TcpCommand, TcpSupervisor, UdpCommand, UdpTransport};

/// Grace given to an in-flight drain during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// The single-writer record path: bytes in, delivered records out.
///
/// Owned by whichever transport is running; no other task touches the
/// framer or calls the parser.
pub struct Pipeline {
    framer: Framer,
    delivery: Arc<Delivery>,
    stats: Arc<Stats>,
    suppress_status: bool,
}

impl Pipeline {
    pub fn new(delivery: Arc<Delivery>, stats: Arc<Stats>, suppress_status: bool) -> Self {
        Self {
            framer: Framer::new(),
            delivery,
            stats,
            suppress_status,
        }
    }

    /// Feed transport bytes through framer, parser, and delivery.
    ///
    /// Records from one frame are fully handled before the next frame is
    /// touched, preserving per-record causal order on the inline path.
    pub async fn ingest(&mut self, bytes: &[u8]) {
        let out = self.framer.push(bytes);

        for diagnostic in &out.diagnostics {
            self.note_diagnostic(diagnostic);
        }
        for payload in out.frames {
            self.handle_payload(&payload).await;
        }
    }

    /// The transport lost its stream; drop any partial frame.
    pub fn on_disconnect(&mut self) {
        if let Some(diagnostic) = self.framer.finish() {
            self.note_diagnostic(&diagnostic);
        }
    }

    async fn handle_payload(&mut self, payload: &[u8]) {
        let record = match parse_payload(payload) {
            Ok(record) => record,
            Err(e) => {
                self.stats.record_parse_error();
                warn!(error = %e, "frame dropped");
                return;
            }
        };

        self.stats.record_parsed(record.crc.ok);
        if !record.crc.ok {
            warn!(
                received = record.crc.received,
                computed = record.crc.computed,
                "CRC mismatch, record kept"
            );
        }

        if self.suppress_status && record.tor == Tor::Status {
            self.stats.record_suppressed();
            debug!("status record suppressed");
            return;
        }

        self.delivery.deliver(&record).await;
    }

    fn note_diagnostic(&self, diagnostic: &FrameDiagnostic) {
        match diagnostic {
            FrameDiagnostic::Resync { dropped } => {
                self.stats.frame_resync();
                warn!(dropped, "framing resync");
            }
            FrameDiagnostic::Oversize { buffered } => {
                self.stats.frame_oversize();
                warn!(buffered, "oversize frame abandoned");
            }
            FrameDiagnostic::DleAtEof => {
                warn!("stream ended inside an escape sequence");
            }
        }
    }
}

enum TransportHandle {
    Tcp(mpsc::Sender<TcpCommand>),
    Udp(mpsc::Sender<UdpCommand>),
}

/// Handle to a running bridge.
pub struct Bridge {
    transport: TransportHandle,
    transport_task: JoinHandle<()>,
    drain_task: JoinHandle<()>,
    drain_stop: mpsc::Sender<()>,
    delivery: Arc<Delivery>,
    stats: Arc<Stats>,
}

impl Bridge {
    /// Validate the config, wire the stack, and spawn the transport and
    /// drainer tasks. Fatal errors: an unusable post URL/method, or (in
    /// UDP mode) a failed bind.
    pub async fn start(config: Config) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(Stats::new());
        let delivery = Arc::new(Delivery::new(&config, stats.clone())?);
        let pipeline = Pipeline::new(
            delivery.clone(),
            stats.clone(),
            config.logging.suppress_status,
        );

        let (drain_stop, drain_task) = spawn_drainer(
            delivery.clone(),
            Duration::from_secs(config.post.queue_drain_interval_secs),
        );

        let (transport, transport_task) = match config.defaults.mode {
            Mode::Tcp => {
                let (tx, rx) = mpsc::channel(8);
                let supervisor = TcpSupervisor::new(
                    config.defaults.tcp_host.clone(),
                    config.defaults.tcp_port,
                    &config.decoder.reconnect,
                    rx,
                    stats.clone(),
                );
                let task = tokio::spawn(supervisor.run(pipeline));
                (TransportHandle::Tcp(tx), task)
            }
            Mode::Udp => {
                let (tx, rx) = mpsc::channel(8);
                let transport =
                    UdpTransport::bind("0.0.0.0", config.defaults.udp_listen_port, rx, stats.clone())
                        .await?;
                let task = tokio::spawn(transport.run(pipeline));
                (TransportHandle::Udp(tx), task)
            }
        };

        info!(mode = ?config.defaults.mode, "bridge started");
        Ok(Self {
            transport,
            transport_task,
            drain_task,
            drain_stop,
            delivery,
            stats,
        })
    }

    /// Replace the decoder target at runtime (TCP mode only).
    pub async fn set_target(&self, host: String, port: u16) -> Result<()> {
        match &self.transport {
            TransportHandle::Tcp(tx) => tx
                .send(TcpCommand::SetTarget { host, port })
                .await
                .map_err(|_| BridgeError::Stopped),
            TransportHandle::Udp(_) => Err(BridgeError::Config(
                "target replacement requires TCP mode".to_string(),
            )),
        }
    }

    /// Point-in-time counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Pending retry-queue depth.
    pub async fn queue_len(&self) -> usize {
        self.delivery.queue_len().await
    }

    /// Orderly shutdown: stop the transport, cancel the drain timer, and
    /// give an in-flight drain a short grace to finish.
    pub async fn shutdown(self) -> Result<()> {
        match &self.transport {
            TransportHandle::Tcp(tx) => {
                let _ = tx.send(TcpCommand::Shutdown).await;
            }
            TransportHandle::Udp(tx) => {
                let _ = tx.send(UdpCommand::Shutdown).await;
            }
        }
        let _ = self.drain_stop.send(()).await;

        if let Err(e) = self.transport_task.await {
            warn!(error = %e, "transport task ended abnormally");
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, self.drain_task)
            .await
            .is_err()
        {
            warn!("drain did not finish within the shutdown grace");
        }
        info!("bridge stopped");
        Ok(())
    }
}

/// Periodic queue drain, plus an immediate pass at startup to replay any
/// backlog left by a previous run.
fn spawn_drainer(
    delivery: Arc<Delivery>,
    every: Duration,
) -> (mpsc::Sender<()>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(1);
    let task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    delivery.drain().await;
                }
                _ = rx.recv() => {
                    // One last best-effort pass; shutdown bounds it with
                    // a grace timeout.
                    delivery.drain().await;
                    break;
                }
            }
        }
        debug!("drain timer stopped");
    });
    (tx, task)
}
