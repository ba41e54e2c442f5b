//! TCP client supervisor.
//!
//! Owns the outbound connection to the decoder and drives an explicit
//! state machine:
//!
//! ```text
//! Idle → Connecting → Connected → Backoff → Connecting → …
//!                 └──────────────────┴──────→ Stopped
//! ```
//!
//! The supervisor is the single writer of the pipeline: bytes read from
//! the socket are pushed straight into the framer, and each record is
//! fully handled before the next read. Commands (target replacement,
//! shutdown) arrive on an mpsc channel and are honoured in every state.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::backoff::BackoffPolicy;
use crate::bridge::Pipeline;
use crate::config::ReconnectConfig;
use crate::stats::Stats;

/// Runtime commands accepted by the supervisor.
#[derive(Debug)]
pub enum Command {
    /// Replace the decoder target. While connected this closes the
    /// current socket and reconnects immediately; while backing off it
    /// cancels the pending timer.
    SetTarget { host: String, port: u16 },
    /// Stop the supervisor.
    Shutdown,
}

enum State {
    Connecting,
    Connected(TcpStream),
    Backoff(Duration),
    Stopped,
}

/// Supervises the decoder TCP connection and feeds the pipeline.
pub struct TcpSupervisor {
    target: (String, u16),
    connect_timeout: Duration,
    backoff: BackoffPolicy,
    commands: mpsc::Receiver<Command>,
    stats: Arc<Stats>,
}

impl TcpSupervisor {
    pub fn new(
        host: String,
        port: u16,
        reconnect: &ReconnectConfig,
        commands: mpsc::Receiver<Command>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            target: (host, port),
            connect_timeout: Duration::from_millis(reconnect.connect_timeout_ms),
            backoff: BackoffPolicy {
                base_delay_ms: reconnect.base_delay_ms,
                max_delay_ms: reconnect.max_delay_ms,
                factor: reconnect.backoff_factor,
                jitter: reconnect.jitter_ratio,
            },
            commands,
            stats,
        }
    }

    /// Run until shutdown. Consumes the supervisor and the pipeline.
    pub async fn run(mut self, mut pipeline: Pipeline) {
        // The attempt counter increments on every scheduled reconnect and
        // resets only on a successful connect.
        let mut attempt: u32 = 0;
        let mut state = State::Connecting;

        loop {
            state = match state {
                State::Connecting => self.connecting(&mut attempt).await,
                State::Connected(stream) => {
                    self.connected(stream, &mut pipeline, &mut attempt).await
                }
                State::Backoff(delay) => self.backing_off(delay).await,
                State::Stopped => break,
            };
        }
        info!("transport supervisor stopped");
    }

    async fn connecting(&mut self, attempt: &mut u32) -> State {
        let addr = format!("{}:{}", self.target.0, self.target.1);
        debug!(%addr, attempt = *attempt, "connecting to decoder");

        tokio::select! {
            result = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr)) => {
                match result {
                    Ok(Ok(stream)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!(error = %e, "could not disable Nagle");
                        }
                        *attempt = 0;
                        self.stats.set_connected(true);
                        info!(%addr, "decoder connected");
                        State::Connected(stream)
                    }
                    Ok(Err(e)) => {
                        warn!(%addr, error = %e, "connect failed");
                        self.schedule_reconnect(attempt)
                    }
                    Err(_) => {
                        warn!(%addr, timeout_ms = self.connect_timeout.as_millis() as u64,
                            "connect timed out");
                        self.schedule_reconnect(attempt)
                    }
                }
            }
            command = self.commands.recv() => self.handle_idle_command(command),
        }
    }

    async fn connected(
        &mut self,
        mut stream: TcpStream,
        pipeline: &mut Pipeline,
        attempt: &mut u32,
    ) -> State {
        let mut buf = vec![0u8; 8192];

        loop {
            tokio::select! {
                result = stream.read(&mut buf) => match result {
                    Ok(0) => {
                        info!("decoder closed the connection");
                        break;
                    }
                    Ok(n) => pipeline.ingest(&buf[..n]).await,
                    Err(e) => {
                        warn!(error = %e, "socket error");
                        break;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::SetTarget { host, port }) => {
                        info!(%host, port, "decoder target replaced, reconnecting");
                        self.target = (host, port);
                        pipeline.on_disconnect();
                        self.stats.set_connected(false);
                        return State::Backoff(Duration::ZERO);
                    }
                    Some(Command::Shutdown) | None => {
                        pipeline.on_disconnect();
                        self.stats.set_connected(false);
                        return State::Stopped;
                    }
                },
            }
        }

        pipeline.on_disconnect();
        self.stats.set_connected(false);
        self.schedule_reconnect(attempt)
    }

    async fn backing_off(&mut self, delay: Duration) -> State {
        debug!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");

        tokio::select! {
            _ = tokio::time::sleep(delay) => State::Connecting,
            command = self.commands.recv() => self.handle_idle_command(command),
        }
    }

    fn schedule_reconnect(&self, attempt: &mut u32) -> State {
        *attempt += 1;
        State::Backoff(self.backoff.delay(*attempt))
    }

    /// Command handling shared by the states without an open socket. A
    /// target replacement cancels whatever was pending and reconnects
    /// immediately.
    fn handle_idle_command(&mut self, command: Option<Command>) -> State {
        match command {
            Some(Command::SetTarget { host, port }) => {
                info!(%host, port, "decoder target replaced");
                self.target = (host, port);
                State::Connecting
            }
            Some(Command::Shutdown) | None => State::Stopped,
        }
    }
}
