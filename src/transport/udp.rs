//! UDP listener transport.
//!
//! Binds the configured port and forwards each datagram's bytes to the
//! framer. The framer does not care that datagrams arrive whole; the
//! byte stream is treated exactly like TCP. A bind failure is fatal at
//! startup; socket errors after that are logged and the loop continues.

use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bridge::Pipeline;
use crate::error::{BridgeError, Result};
use crate::stats::Stats;

/// Largest datagram the listener will accept. P3 frames are a few KiB;
/// this leaves generous headroom.
const MAX_DATAGRAM: usize = 16 * 1024;

/// Commands accepted by the listener (shutdown only; a UDP socket has no
/// target to replace).
#[derive(Debug)]
pub enum Command {
    Shutdown,
}

/// Receives decoder datagrams and feeds the pipeline.
pub struct UdpTransport {
    socket: UdpSocket,
    commands: mpsc::Receiver<Command>,
    stats: Arc<Stats>,
}

impl UdpTransport {
    /// Bind the listen socket. Failure here is fatal.
    pub async fn bind(
        host: &str,
        port: u16,
        commands: mpsc::Receiver<Command>,
        stats: Arc<Stats>,
    ) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let socket = UdpSocket::bind(&addr)
            .await
            .map_err(|source| BridgeError::UdpBind { addr: addr.clone(), source })?;
        info!(%addr, "UDP listener bound");
        stats.set_connected(true);
        Ok(Self {
            socket,
            commands,
            stats,
        })
    }

    /// Run until shutdown.
    pub async fn run(mut self, mut pipeline: Pipeline) {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((n, peer)) => {
                        debug!(%peer, bytes = n, "datagram received");
                        pipeline.ingest(&buf[..n]).await;
                    }
                    Err(e) => warn!(error = %e, "UDP receive error"),
                },
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                },
            }
        }

        pipeline.on_disconnect();
        self.stats.set_connected(false);
        info!("UDP listener stopped");
    }
}
