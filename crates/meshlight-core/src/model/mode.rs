// ── Operating mode, progress status, emission policy ──

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// The single active operation of the controller.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Mode {
    #[default]
    Idle,
    ScanMesh,
    UpdateMesh,
    AutoConnectMesh,
    Ota,
    Delete,
}

/// Fine-grained progress signal, independent of [`Mode`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
    IntoStaticStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    Connecting,
    Connected,
    LoggingIn,
    LoggedIn,
    LoggedOut,
    UpdatingMesh,
    MeshOffline,
    ScanCompleted,
    ScanTimeout,
    OtaProgress,
    OtaCompleted,
    OtaFailure,
    FirmwareCompleted,
    FirmwareFailure,
    LtkCompleted,
    LtkFailure,
    DeleteCompleted,
    DeleteFailure,
    UpdateMeshCompleted,
    UpdateMeshFailure,
    UpdateAllCompleted,
}

/// Progression gate for the event loop. `Pending` means a hardware
/// operation is outstanding and no new one may be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Gate {
    Pending,
    #[default]
    Running,
}

/// How a status update is filtered before reaching the callback.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EmitPolicy {
    /// Suppressed while idle or when the status is unchanged.
    #[default]
    Normal,
    /// Emitted while idle, still suppressed when unchanged.
    IgnoreIdle,
    /// Always emitted (progress ticks).
    Always,
}

impl EmitPolicy {
    pub(crate) fn allows(self, mode: Mode, current: Option<Status>, next: Status) -> bool {
        match self {
            Self::Always => true,
            Self::IgnoreIdle => current != Some(next),
            Self::Normal => mode != Mode::Idle && current != Some(next),
        }
    }
}

/// Per-status default emission policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPolicies {
    overrides: HashMap<Status, EmitPolicy>,
}

impl StatusPolicies {
    /// Table with no overrides: every status uses [`EmitPolicy::Normal`].
    pub fn empty() -> Self {
        Self {
            overrides: HashMap::new(),
        }
    }

    pub fn policy(&self, status: Status) -> EmitPolicy {
        self.overrides.get(&status).copied().unwrap_or_default()
    }

    pub fn set(&mut self, status: Status, policy: EmitPolicy) {
        if policy == EmitPolicy::Normal {
            self.overrides.remove(&status);
        } else {
            self.overrides.insert(status, policy);
        }
    }

    pub fn with(mut self, status: Status, policy: EmitPolicy) -> Self {
        self.set(status, policy);
        self
    }
}

impl Default for StatusPolicies {
    /// A link that comes up while idle is still reported, so are
    /// firmware answers to a manual query. OTA progress ticks repeat the
    /// same status and are never deduplicated.
    fn default() -> Self {
        Self::empty()
            .with(Status::Connected, EmitPolicy::IgnoreIdle)
            .with(Status::FirmwareCompleted, EmitPolicy::IgnoreIdle)
            .with(Status::FirmwareFailure, EmitPolicy::IgnoreIdle)
            .with(Status::OtaProgress, EmitPolicy::Always)
    }
}
