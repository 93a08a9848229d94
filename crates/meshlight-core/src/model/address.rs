// ── Identity and wire-name types ──
//
// MacAddress is the stable identity of a peripheral across scans.
// MeshName is the fixed 16-byte encoding every mesh name, password and
// out-of-mesh name takes on the wire and in membership comparisons.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Width of every mesh name / password field on the wire.
pub const MESH_NAME_LEN: usize = 16;

// ── MacAddress ──────────────────────────────────────────────────────

/// Hardware address, normalized to lowercase colon-separated format (aa:bb:cc:dd:ee:ff).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    /// Create a normalized address from any common format.
    /// Accepts colon-separated, dash-separated, or bare hex.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let lowered = raw.as_ref().trim().to_lowercase().replace('-', ":");
        if lowered.len() == 12 && !lowered.contains(':') {
            let grouped: Vec<&str> = (0..6)
                .filter_map(|i| lowered.get(i * 2..i * 2 + 2))
                .collect();
            return Self(grouped.join(":"));
        }
        Self(lowered)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MacAddress {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<String> for MacAddress {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for MacAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.0
    }
}

// ── MeshName ────────────────────────────────────────────────────────

/// A mesh name or password in its 16-byte wire form.
///
/// Shorter inputs are zero-padded, longer inputs truncated. Two names are
/// equal iff their wire forms are equal, which is how devices compare them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MeshName([u8; MESH_NAME_LEN]);

impl MeshName {
    pub fn new(text: &str) -> Self {
        Self::from_bytes(text.as_bytes())
    }

    pub fn from_bytes(raw: &[u8]) -> Self {
        let mut buf = [0u8; MESH_NAME_LEN];
        let len = raw.len().min(MESH_NAME_LEN);
        buf[..len].copy_from_slice(&raw[..len]);
        Self(buf)
    }

    pub fn as_bytes(&self) -> &[u8; MESH_NAME_LEN] {
        &self.0
    }

    /// Printable form with trailing padding stripped.
    pub fn to_lossy_string(&self) -> String {
        let end = self.0.iter().position(|b| *b == 0).unwrap_or(MESH_NAME_LEN);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }
}

impl fmt::Debug for MeshName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MeshName").field(&self.to_lossy_string()).finish()
    }
}

impl fmt::Display for MeshName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_lossy_string())
    }
}

impl From<&str> for MeshName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn mac_address_normalizes_dashes() {
        let mac = MacAddress::new("AA-BB-CC-DD-EE-FF");
        assert_eq!(mac.as_str(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn mac_address_normalizes_case() {
        let mac = MacAddress::new("AA:BB:CC:DD:EE:FF");
        assert_eq!(mac, MacAddress::new("aa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn mac_address_groups_bare_hex() {
        let mac: MacAddress = "AABBCCDDEEFF".parse().unwrap();
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn mesh_name_pads_short_input() {
        let name = MeshName::new("telink");
        assert_eq!(&name.as_bytes()[..6], b"telink");
        assert!(name.as_bytes()[6..].iter().all(|b| *b == 0));
        assert_eq!(name.to_lossy_string(), "telink");
    }

    #[test]
    fn mesh_name_truncates_long_input() {
        let name = MeshName::new("a-very-long-mesh-name-indeed");
        assert_eq!(name.as_bytes(), b"a-very-long-mesh");
    }

    #[test]
    fn mesh_names_compare_by_wire_form() {
        assert_eq!(MeshName::new("home"), MeshName::from_bytes(b"home\0\0"));
        assert_ne!(MeshName::new("home"), MeshName::new("out_of_mesh"));
    }
}
