use crate::error::TollgateError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Class minor ids 0 and 1 belong to the HTB root.
const MIN_CLASS_ID: u16 = 2;

/// A validated hardware (MAC) address identifying a client device.
///
/// Accepts six two-digit hex groups separated by `:` or `-`. The address is
/// stored lower-cased with `:` separators, so `AA-BB-...` and `aa:bb:...`
/// refer to the same device everywhere in the crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The six address bytes.
    pub fn octets(&self) -> [u8; 6] {
        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(self.0.split(':')) {
            // Validated on construction.
            *slot = u8::from_str_radix(part, 16).unwrap_or_default();
        }
        octets
    }

    /// Traffic-control class minor id for this device.
    ///
    /// Derived from the last byte only, so two devices sharing a final octet
    /// share a class. Values below 2 are clamped to 2.
    pub fn class_id(&self) -> u16 {
        let last = self.octets()[5];
        u16::from(last).max(MIN_CLASS_ID)
    }
}

impl FromStr for MacAddress {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TollgateError::InvalidMacAddress(s.to_string());
        let separator = if s.contains(':') { ':' } else { '-' };
        let parts: Vec<&str> = s.split(separator).collect();
        if parts.len() != 6 {
            return Err(invalid());
        }
        for part in &parts {
            if part.len() != 2 || !part.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid());
            }
        }
        Ok(Self(parts.join(":").to_ascii_lowercase()))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = TollgateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
