// ── Peripheral domain types ──

use bytes::Bytes;
use serde::Serialize;

use super::address::{MacAddress, MeshName};

/// A raw discovery record as handed over by the scanner, before any
/// advertisement filter has looked at it.
#[derive(Debug, Clone)]
pub struct RawAdvertisement {
    pub address: MacAddress,
    pub local_name: Option<String>,
    pub rssi: i16,
    pub record: Bytes,
}

impl RawAdvertisement {
    pub fn new(address: impl Into<MacAddress>, rssi: i16, record: impl Into<Bytes>) -> Self {
        Self {
            address: address.into(),
            local_name: None,
            rssi,
            record: record.into(),
        }
    }

    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }
}

/// A light device in the mesh, as decoded by an advertisement filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Peripheral {
    pub address: MacAddress,
    pub name: Option<String>,
    #[serde(serialize_with = "serialize_mesh_name")]
    pub mesh_name: MeshName,
    pub rssi: i16,
    pub connected: bool,
    /// Logical address inside the mesh.
    pub mesh_address: u16,
    /// Address to assign on the next mesh re-provisioning.
    pub new_mesh_address: Option<u16>,
    /// Set once this device has been re-provisioned in the current run.
    pub mesh_changed: bool,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

impl Peripheral {
    pub fn new(address: impl Into<MacAddress>, mesh_name: MeshName, mesh_address: u16) -> Self {
        Self {
            address: address.into(),
            name: None,
            mesh_name,
            rssi: 0,
            connected: false,
            mesh_address,
            new_mesh_address: None,
            mesh_changed: false,
            vendor_id: None,
            product_id: None,
        }
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

fn serialize_mesh_name<S: serde::Serializer>(name: &MeshName, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&name.to_lossy_string())
}
