//! Backend-opaque region identifiers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Identifies a region inside a target.
///
/// The byte content is produced and interpreted by the owning backend;
/// everything else (dispatch, clients, the wire) treats it as an opaque,
/// copyable key with a stable serialized form — lowercase hex, the same
/// rendering used in logs and URLs. Kept short (both built-in backends use
/// an 8-byte index) so it stays cheap to ship around.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegionId(Vec<u8>);

impl Serialize for RegionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RegionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        RegionId::from_hex(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("malformed region id \"{}\"", text)))
    }
}

impl RegionId {
    pub fn new(bytes: Vec<u8>) -> Self {
        RegionId(bytes)
    }

    /// Build an id from a backend-local region index.
    pub fn from_index(index: u64) -> Self {
        RegionId(index.to_le_bytes().to_vec())
    }

    /// Recover the region index, if this id holds one.
    pub fn to_index(&self) -> Option<u64> {
        let bytes: [u8; 8] = self.0.as_slice().try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex rendering, used in logs and URLs.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parse the hex rendering produced by [`RegionId::to_hex`].
    pub fn from_hex(text: &str) -> Option<Self> {
        if text.is_empty() || text.len() % 2 != 0 {
            return None;
        }
        let mut bytes = Vec::with_capacity(text.len() / 2);
        for i in (0..text.len()).step_by(2) {
            bytes.push(u8::from_str_radix(text.get(i..i + 2)?, 16).ok()?);
        }
        Some(RegionId(bytes))
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
