//! # plclink-channel
//!
//! Transport-agnostic framed messaging for PLC links.
//!
//! A [`FramedChannel`] owns one [`Transport`] (serial, TCP client, TCP
//! listener, or UDP) and runs four cooperative workers that keep the link
//! alive, move bytes in both directions, and cut the inbound stream into
//! delimiter-framed messages. Protocol codecs sit on top and speak through
//! [`FramedChannel::send`] / [`FramedChannel::send_receive`].
//!
//! ## Design notes
//!
//! - Connection state changes and errors surface through edge-triggered
//!   callbacks; repeated errors of one kind are reported once per
//!   connection.
//! - All operations are permissive: sending while disconnected drops the
//!   message, a timed-out exchange returns an empty reply.

pub mod channel;
pub mod config;
pub mod error;
pub mod framing;
pub mod traits;
pub mod transport;

pub use channel::{ConnectionCallback, ErrorCallback, FrameCallback, FramedChannel};
pub use config::{SerialConfig, TcpConfig, UdpConfig};
pub use error::{ChannelError, ErrorKind, Result};
pub use framing::FrameSplitter;
pub use traits::Transport;
pub use transport::{SerialTransport, TcpClientTransport, TcpListenerTransport, UdpTransport};
