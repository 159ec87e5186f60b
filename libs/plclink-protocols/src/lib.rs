//! # plclink-protocols
//!
//! Vendor protocol codecs for PLC links.
//!
//! Two ASCII request/response codecs ride on a
//! [`FramedChannel`](plclink_channel::FramedChannel): Panasonic
//! Mewtocol-COM ([`MewtocolClient`]) and Omron Upperlink
//! ([`UpperlinkClient`]). Modbus goes through the [`ModbusBus`] trait,
//! implemented by [`ModbusMaster`] over `tokio-modbus` TCP.
//!
//! Every operation is one framed exchange; replies are validated (length,
//! status, checksum) before decoding, and a rejected exchange is logged with
//! the raw command and reply strings.

mod ascii;
pub mod error;
pub mod mewtocol;
pub mod modbus;
pub mod upperlink;

pub use error::{ProtocolError, Result};
pub use mewtocol::{ContactRef, MewtocolClient};
pub use modbus::{ModbusBus, ModbusConfig, ModbusMaster};
pub use upperlink::UpperlinkClient;
