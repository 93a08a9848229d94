// ── Runtime controller configuration ──
//
// Tuning knobs for the controller itself. Per-operation settings live in
// `Parameters`; core never reads config files; `meshlight-config`
// builds a `ControllerConfig` and hands it in.

use std::time::Duration;

use crate::model::StatusPolicies;

/// Vendor id carried in notification frames of the stock firmware.
pub const DEFAULT_VENDOR_ID: u16 = 0x0211;

/// Configuration for one [`MeshController`](crate::MeshController).
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Period of the event loop step.
    pub loop_interval: Duration,
    /// Notification frames whose vendor id differs are discarded.
    pub vendor_id: u16,
    /// How long auto-connect waits before re-scanning after the mesh went offline.
    pub offline_backoff: Duration,
    /// Offline grace period used when `offline_timeout_seconds` is not positive.
    pub default_offline_timeout: Duration,
    /// Keep-alive delay used when `refresh_delay_ms` is not positive.
    pub default_refresh_delay: Duration,
    /// Per-status emission policy.
    pub status_policies: StatusPolicies,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            loop_interval: Duration::from_millis(200),
            vendor_id: DEFAULT_VENDOR_ID,
            offline_backoff: Duration::from_secs(5),
            default_offline_timeout: Duration::from_secs(10),
            default_refresh_delay: Duration::from_secs(2),
            status_policies: StatusPolicies::default(),
        }
    }
}
