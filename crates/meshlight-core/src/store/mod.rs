// ── Peripheral storage ──
//
// Address-unique registries with push-based change notification.

mod registry;

pub use registry::Registry;
