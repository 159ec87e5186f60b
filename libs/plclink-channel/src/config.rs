//! Transport endpoint configuration
//!
//! Plain serde structs describing where a channel connects. File loading is
//! the embedding process's concern; these only normalize the parameters.

use serde::{Deserialize, Serialize};

/// Serial port settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port path, e.g. `/dev/ttyUSB0` or `COM3`
    pub path: String,
    pub baud_rate: u32,
    /// 5..=8, anything else falls back to 8
    pub data_bits: u8,
    /// 1 or 2, anything else falls back to 1
    pub stop_bits: u8,
    /// "None" / "Even" / "Odd", anything else falls back to None
    pub parity: String,
}

impl SerialConfig {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            ..Self::default()
        }
    }

    pub fn parity(&self) -> tokio_serial::Parity {
        match self.parity.as_str() {
            "Even" => tokio_serial::Parity::Even,
            "Odd" => tokio_serial::Parity::Odd,
            _ => tokio_serial::Parity::None,
        }
    }

    pub fn data_bits(&self) -> tokio_serial::DataBits {
        match self.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        }
    }

    pub fn stop_bits(&self) -> tokio_serial::StopBits {
        match self.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: "None".to_string(),
        }
    }
}

/// TCP endpoint settings, for both the client and the single-peer listener
/// (where `host` is the one allow-listed peer address)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TcpConfig {
    pub host: String,
    pub port: u16,
}

impl TcpConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// UDP remote endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UdpConfig {
    pub host: String,
    pub port: u16,
}

impl UdpConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}
