//! Controller for BLE mesh lighting networks.
//!
//! This crate owns the orchestration logic that sits between the radio
//! drivers of an embedding application and its user interface:
//!
//! - **[`MeshController`]**: Central facade. [`start()`](MeshController::start)
//!   binds a [`Scanner`] and a [`LinkController`] and spawns the background
//!   tasks; the mode operations ([`start_scan`](MeshController::start_scan),
//!   [`update_mesh`](MeshController::update_mesh),
//!   [`auto_connect`](MeshController::auto_connect),
//!   [`start_ota`](MeshController::start_ota),
//!   [`delete`](MeshController::delete)) select the single active workflow.
//!
//! - **[`Registry`]**: Ordered, address-unique peripheral storage with a
//!   `tokio::sync::watch` snapshot for observers.
//!
//! - **[`FilterChain`]**: Caller-supplied [`AdvertiseFilter`]s that decode raw
//!   advertisements into [`Peripheral`]s.
//!
//! - **[`MeshCallback`]**: Progress surface of the running operation: status
//!   changes, discoveries, notifications and command responses.
//!
//! - **[`PeriodicTimer`]**: Cancellable repeating task shared by the event
//!   loop and the notification refresher.

pub mod callback;
pub mod config;
pub mod controller;
pub mod error;
pub mod link;
pub mod model;
pub mod notify;
pub mod params;
pub mod scan;
pub mod store;
pub mod timer;

// ── Primary re-exports ──────────────────────────────────────────────
pub use callback::{MeshCallback, SCAN_REFUSED};
pub use config::{ControllerConfig, DEFAULT_VENDOR_ID};
pub use controller::{MeshController, Progress};
pub use error::{FilterError, MeshError};
pub use link::{Command, LinkController, LinkEvent, LinkEventKind, LinkListener};
pub use notify::{FrameError, NotificationFrame};
pub use params::{DeviceInfo, DeviceTarget, Parameters, RefreshSettings};
pub use scan::{AdvertiseFilter, FilterChain, FnFilter, ScanListener, Scanner, filter_fn};
pub use store::Registry;
pub use timer::{PeriodicTimer, TimerHandle};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    EmitPolicy, Gate, MESH_NAME_LEN, MacAddress, MeshName, Mode, Peripheral, RawAdvertisement,
    Status, StatusPolicies,
};
