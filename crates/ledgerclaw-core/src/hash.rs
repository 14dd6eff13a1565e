//! 160-bit ledger identifiers (contract script hashes, account hashes).
//!
//! Bytes are kept in ledger (little-endian) order. The canonical text form is
//! `0x`-prefixed big-endian hex; a bare 40-char string is read as little-endian.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash160([u8; 20]);

impl Hash160 {
    pub const ZERO: Hash160 = Hash160([0u8; 20]);

    pub fn from_le_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, String> {
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| format!("expected 20 bytes, got {}", bytes.len()))?;
        Ok(Self(arr))
    }

    pub fn as_le_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Big-endian hex with `0x` prefix.
    pub fn to_be_string(&self) -> String {
        let mut be = self.0;
        be.reverse();
        format!("0x{}", hex::encode(be))
    }

    /// Little-endian hex without prefix.
    pub fn to_le_string(&self) -> String {
        hex::encode(self.0)
    }

    fn decode_hex(s: &str) -> Result<[u8; 20], String> {
        if s.len() != 40 {
            return Err(format!("expected 40 hex characters, got {}", s.len()));
        }
        let bytes = hex::decode(s).map_err(|e| e.to_string())?;
        bytes
            .try_into()
            .map_err(|_| "expected 20 bytes".to_string())
    }
}

impl FromStr for Hash160 {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(be) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            let mut bytes = Self::decode_hex(be)?;
            bytes.reverse();
            Ok(Self(bytes))
        } else {
            Ok(Self(Self::decode_hex(s)?))
        }
    }
}

impl fmt::Display for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_be_string())
    }
}

impl Serialize for Hash160 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_be_string())
    }
}

impl<'de> Deserialize<'de> for Hash160 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok(Self::ZERO);
        }
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_be_and_le_forms_agree() {
        let be = "0xd2a4cff31913016155e38e474a2c06d08be276cf";
        let h: Hash160 = be.parse().unwrap();
        assert_eq!(h.to_be_string(), be);

        let le: Hash160 = h.to_le_string().parse().unwrap();
        assert_eq!(le, h);
        assert_eq!(h.as_le_bytes()[0], 0xcf);
    }

    #[test]
    fn test_rejects_bad_length() {
        assert!("0x1234".parse::<Hash160>().is_err());
        assert!("zz".repeat(20).parse::<Hash160>().is_err());
    }

    #[test]
    fn test_serde_uses_be_string() {
        let h: Hash160 = "0x0000000000000000000000000000000000000001".parse().unwrap();
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, "\"0x0000000000000000000000000000000000000001\"");
        let back: Hash160 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
        let empty: Hash160 = serde_json::from_str("\"\"").unwrap();
        assert!(empty.is_zero());
    }
}
