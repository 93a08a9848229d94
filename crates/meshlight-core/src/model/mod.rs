// ── Domain model ──

pub mod address;
pub mod mode;
pub mod peripheral;

pub use address::{MESH_NAME_LEN, MacAddress, MeshName};
pub use mode::{EmitPolicy, Gate, Mode, Status, StatusPolicies};
pub use peripheral::{Peripheral, RawAdvertisement};
