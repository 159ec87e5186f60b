//! Memory region keys

use std::fmt;

/// PLC memory region. The string codes appear in address syntax and logs;
/// everything internal keys on the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// Panasonic data registers
    Dt,
    /// Panasonic internal relays
    R,
    /// Panasonic outputs
    Y,
    /// Panasonic inputs (read-only)
    X,
    /// Omron data memory
    Dm,
    /// Modbus holding registers
    Holding,
    /// Modbus coils
    Coil,
}

impl Region {
    pub fn code(&self) -> &'static str {
        match self {
            Region::Dt => "DT",
            Region::R => "R",
            Region::Y => "Y",
            Region::X => "X",
            Region::Dm => "DM",
            Region::Holding => "H",
            Region::Coil => "C",
        }
    }

    pub fn is_bit(&self) -> bool {
        matches!(self, Region::R | Region::Y | Region::X | Region::Coil)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_out() {
        assert_eq!(Region::Dt.code(), "DT");
        assert_eq!(Region::Coil.to_string(), "C");
        assert!(Region::X.is_bit());
        assert!(!Region::Dm.is_bit());
    }
}
