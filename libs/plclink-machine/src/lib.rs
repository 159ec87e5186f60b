//! Polled PLC access behind a cached memory image
//!
//! A machine handle owns a protocol client and a background poll task. The
//! task keeps an in-memory image of the PLC regions the application has
//! actually touched: every read or write registers interest in the blocks
//! it covers, and the poll loop refreshes registered blocks on a ~20 ms
//! cadence. Reads are served from the image, writes go to the device and
//! are mirrored into the image on success, and interest lapses after ten
//! minutes without a touch.
//!
//! Three machine types share one [`PlcDevice`] trait: Panasonic FP series
//! over Mewtocol, Omron C series over Upperlink, and anything speaking
//! Modbus TCP.

pub mod device;
pub mod modbus_device;
pub mod omron;
pub mod panasonic;
pub mod region;

mod poll;
mod scan;
mod store;

pub use device::PlcDevice;
pub use modbus_device::ModbusDevice;
pub use omron::OmronDevice;
pub use panasonic::PanasonicDevice;
pub use region::Region;

pub use plclink_channel::{SerialConfig, UdpConfig};
pub use plclink_protocols::{ModbusBus, ModbusConfig};
