//! Transport bindings
//!
//! Concrete [`Transport`](crate::traits::Transport) implementations for the
//! four link types: serial line, outbound TCP, single-client TCP listener,
//! and UDP datagrams. Each binding keeps connection establishment inside
//! `connect` (or an accept task for the listener) so the channel workers can
//! stay transport-agnostic.

pub mod serial;
pub mod tcp_client;
pub mod tcp_listener;
pub mod udp;

pub use serial::SerialTransport;
pub use tcp_client::TcpClientTransport;
pub use tcp_listener::TcpListenerTransport;
pub use udp::UdpTransport;

use std::time::Duration;

/// Dial timeout for outbound connections
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on one idle read; data arriving earlier returns immediately
pub(crate) const READ_POLL: Duration = Duration::from_millis(200);

/// Raw read buffer size
pub(crate) const READ_BUFFER: usize = 4096;
