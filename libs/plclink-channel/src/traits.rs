//! Transport capability trait
//!
//! One interface for the four concrete link types (serial port, TCP client,
//! single-peer TCP listener, UDP socket). The channel engine drives any of
//! them through this trait and never sees a concrete transport type.
//!
//! Implementations keep their own connection state behind interior
//! mutability: every method takes `&self` so the engine's workers can share
//! the transport without an outer lock.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// One duplex byte link.
///
/// The channel's connect worker calls `connect` whenever `is_connected`
/// reports false; the send/receive workers call `write_raw`/`read_raw` only
/// while connected. All methods may be called concurrently.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short human-readable endpoint description used in log events
    fn label(&self) -> &str;

    /// Cheap, non-blocking connection probe
    fn is_connected(&self) -> bool;

    /// Allocate/bind underlying resources. Called once per channel start,
    /// before the workers launch; the token mirrors the channel's lifetime
    /// for transports that run their own accept loop.
    async fn open(&self, cancel: CancellationToken) -> Result<()>;

    /// One reconnect step. May block until the link is established or fail;
    /// the connect worker retries on the next tick either way. Transports
    /// whose connection is established externally (the listener) treat this
    /// as a no-op.
    async fn connect(&self) -> Result<()>;

    /// One raw read. An idle link yields an empty chunk after a short poll
    /// interval; implementations translate EOF into an error and drop the
    /// dead connection.
    async fn read_raw(&self) -> Result<Vec<u8>>;

    /// One raw write of the whole message.
    async fn write_raw(&self, data: &[u8]) -> Result<()>;

    /// Release the link and any bound resources. Called on channel stop.
    async fn shutdown(&self);
}
