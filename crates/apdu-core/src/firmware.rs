//! Firmware descriptors
//!
//! Identifies the device model a backend drives. Backends only read it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Device firmware family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Firmware {
    /// Nano S
    NanoS,
    /// Nano S Plus
    NanoSP,
    /// Nano X
    NanoX,
    /// Stax (touchscreen)
    Stax,
    /// Flex (touchscreen)
    Flex,
}

impl Firmware {
    /// Short device name, as used in snapshot directories
    pub fn name(&self) -> &'static str {
        match self {
            Firmware::NanoS => "nanos",
            Firmware::NanoSP => "nanosp",
            Firmware::NanoX => "nanox",
            Firmware::Stax => "stax",
            Firmware::Flex => "flex",
        }
    }

    /// Button-driven device (as opposed to touchscreen)
    pub fn is_nano(&self) -> bool {
        matches!(self, Firmware::NanoS | Firmware::NanoSP | Firmware::NanoX)
    }
}

impl fmt::Display for Firmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Firmware {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nanos" => Ok(Firmware::NanoS),
            "nanosp" => Ok(Firmware::NanoSP),
            "nanox" => Ok(Firmware::NanoX),
            "stax" => Ok(Firmware::Stax),
            "flex" => Ok(Firmware::Flex),
            other => Err(format!("unknown firmware: {}", other)),
        }
    }
}
