//! Transport module - decoder-side byte sources.
//!
//! Two variants: an outbound TCP client with reconnect/backoff, and a UDP
//! listener. Both feed the same pipeline; neither ever writes to the
//! decoder.

pub mod backoff;
pub mod tcp;
pub mod udp;

pub use backoff::BackoffPolicy;
pub use tcp::{Command as TcpCommand, TcpSupervisor};
pub use udp::{Command as UdpCommand, UdpTransport};
