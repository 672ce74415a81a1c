use crate::error::{Result, RevmarkError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Presentation color attached to a reviewer's revisions during consolidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Hex form used in markup, e.g. `FF8000`.
    pub fn to_hex(self) -> String {
        format!("{:02X}{:02X}{:02X}", self.0, self.1, self.2)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Rgb {
    type Err = RevmarkError;

    fn from_str(s: &str) -> Result<Self> {
        let hex = s.trim().trim_start_matches('#');
        let invalid = || RevmarkError::InvalidSettings {
            message: format!("'{s}' is not an RRGGBB color"),
        };
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(invalid());
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|_| invalid())
        };
        Ok(Rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

impl From<Rgb> for String {
    fn from(color: Rgb) -> Self {
        color.to_hex()
    }
}

impl TryFrom<String> for Rgb {
    type Error = RevmarkError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_parses_with_and_without_hash() {
        assert_eq!("FF8000".parse::<Rgb>().unwrap(), Rgb(255, 128, 0));
        assert_eq!("#0a0b0c".parse::<Rgb>().unwrap(), Rgb(10, 11, 12));
    }

    #[test]
    fn rgb_rejects_bad_input() {
        assert!("FF80".parse::<Rgb>().is_err());
        assert!("GG0000".parse::<Rgb>().is_err());
    }

    #[test]
    fn rgb_serializes_as_hex_string() {
        let json = serde_json::to_string(&Rgb(1, 2, 255)).unwrap();
        assert_eq!(json, "\"0102FF\"");
    }
}
