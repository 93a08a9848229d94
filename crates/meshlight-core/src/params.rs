// ── Per-operation parameters ──
//
// One immutable bag per mode-start call. The controller installs it
// wholesale and never mutates it; starting a new operation replaces it.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use secrecy::{ExposeSecret, SecretSlice, SecretString};

use crate::model::{MacAddress, MeshName};

/// A device selected for an operation, with the mesh address it should
/// receive when the operation re-provisions the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub address: MacAddress,
    pub mesh_address: Option<u16>,
}

impl DeviceInfo {
    pub fn new(address: impl Into<MacAddress>) -> Self {
        Self {
            address: address.into(),
            mesh_address: None,
        }
    }

    pub fn with_mesh_address(mut self, mesh_address: u16) -> Self {
        self.mesh_address = Some(mesh_address);
        self
    }
}

/// The `device_target` parameter: one device, or a list of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceTarget {
    Single(DeviceInfo),
    List(Vec<DeviceInfo>),
}

impl DeviceTarget {
    /// The device single-target modes (OTA, delete) act on.
    pub fn primary(&self) -> Option<&DeviceInfo> {
        match self {
            Self::Single(info) => Some(info),
            Self::List(list) => list.first(),
        }
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        match self {
            Self::Single(info) => std::slice::from_ref(info),
            Self::List(list) => list,
        }
    }
}

impl From<DeviceInfo> for DeviceTarget {
    fn from(info: DeviceInfo) -> Self {
        Self::Single(info)
    }
}

impl From<Vec<DeviceInfo>> for DeviceTarget {
    fn from(list: Vec<DeviceInfo>) -> Self {
        Self::List(list)
    }
}

impl From<MacAddress> for DeviceTarget {
    fn from(address: MacAddress) -> Self {
        Self::Single(DeviceInfo {
            address,
            mesh_address: None,
        })
    }
}

/// Keep-alive schedule for the notification refresher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    pub delay: Duration,
    /// Number of keep-alives before the refresher stops. Zero or negative
    /// means unlimited.
    pub repeat: i32,
}

impl RefreshSettings {
    pub fn limit(&self) -> Option<u32> {
        u32::try_from(self.repeat).ok().filter(|n| *n > 0)
    }
}

/// Configuration for a single operation invocation.
///
/// Integer timeouts of zero mean "not configured". Secrets are redacted
/// from `Debug` output.
#[derive(Default)]
pub struct Parameters {
    pub mesh_name: Option<String>,
    pub mesh_password: Option<SecretString>,
    pub new_mesh_name: Option<String>,
    pub new_mesh_password: Option<SecretString>,
    pub long_term_key: Option<SecretSlice<u8>>,
    /// Factory mesh name of unprovisioned devices, accepted while scanning.
    pub out_of_mesh_name: Option<String>,
    pub scan_type_single: bool,
    pub scan_timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
    pub offline_timeout_seconds: u64,
    pub auto_enable_notification: bool,
    pub refresh_delay_ms: Option<u64>,
    pub refresh_repeat_count: i32,
    pub device_target: Option<DeviceTarget>,
    /// Firmware image pushed in OTA mode.
    pub firmware: Option<Bytes>,
}

impl Parameters {
    pub fn mesh(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            mesh_name: Some(name.into()),
            mesh_password: Some(SecretString::from(password.into())),
            ..Self::default()
        }
    }

    // ── Builder ──────────────────────────────────────────────────────

    /// Credentials an update-mesh run provisions targets with.
    pub fn with_new_mesh(mut self, name: impl Into<String>, password: impl Into<String>) -> Self {
        self.new_mesh_name = Some(name.into());
        self.new_mesh_password = Some(SecretString::from(password.into()));
        self
    }

    pub fn with_long_term_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.long_term_key = Some(SecretSlice::from(key.into()));
        self
    }

    pub fn with_out_of_mesh_name(mut self, name: impl Into<String>) -> Self {
        self.out_of_mesh_name = Some(name.into());
        self
    }

    /// Stop the scan at the first accepted peripheral.
    pub fn single_scan(mut self) -> Self {
        self.scan_type_single = true;
        self
    }

    pub fn with_scan_timeout(mut self, seconds: u64) -> Self {
        self.scan_timeout_seconds = seconds;
        self
    }

    pub fn with_connect_timeout(mut self, seconds: u64) -> Self {
        self.connect_timeout_seconds = seconds;
        self
    }

    pub fn with_offline_timeout(mut self, seconds: u64) -> Self {
        self.offline_timeout_seconds = seconds;
        self
    }

    /// Enable notifications after login, refreshed every `delay_ms` for
    /// `repeat` keep-alives.
    pub fn with_auto_refresh(mut self, delay_ms: u64, repeat: i32) -> Self {
        self.auto_enable_notification = true;
        self.refresh_delay_ms = Some(delay_ms);
        self.refresh_repeat_count = repeat;
        self
    }

    pub fn with_target(mut self, target: impl Into<DeviceTarget>) -> Self {
        self.device_target = Some(target.into());
        self
    }

    pub fn with_firmware(mut self, image: impl Into<Bytes>) -> Self {
        self.firmware = Some(image.into());
        self
    }

    // ── Wire-form accessors ──────────────────────────────────────────

    pub fn mesh_name_bytes(&self) -> MeshName {
        MeshName::new(self.mesh_name.as_deref().unwrap_or_default())
    }

    pub fn mesh_password_bytes(&self) -> MeshName {
        secret_name(self.mesh_password.as_ref())
    }

    pub fn new_mesh_name_bytes(&self) -> MeshName {
        MeshName::new(self.new_mesh_name.as_deref().unwrap_or_default())
    }

    pub fn new_mesh_password_bytes(&self) -> MeshName {
        secret_name(self.new_mesh_password.as_ref())
    }

    pub fn out_of_mesh_name_bytes(&self) -> MeshName {
        MeshName::new(self.out_of_mesh_name.as_deref().unwrap_or_default())
    }

    pub fn long_term_key(&self) -> Option<&[u8]> {
        self.long_term_key.as_ref().map(|key| key.expose_secret())
    }

    // ── Durations ────────────────────────────────────────────────────

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn scan_timeout(&self) -> Option<Duration> {
        (self.scan_timeout_seconds > 0).then(|| Duration::from_secs(self.scan_timeout_seconds))
    }

    pub fn offline_timeout(&self) -> Option<Duration> {
        (self.offline_timeout_seconds > 0).then(|| Duration::from_secs(self.offline_timeout_seconds))
    }

    /// Refresher schedule carried by these parameters, if any.
    pub fn refresh_settings(&self, default_delay: Duration) -> Option<RefreshSettings> {
        let delay_ms = self.refresh_delay_ms?;
        let delay = if delay_ms == 0 {
            default_delay
        } else {
            Duration::from_millis(delay_ms)
        };
        Some(RefreshSettings {
            delay,
            repeat: self.refresh_repeat_count,
        })
    }
}

fn secret_name(secret: Option<&SecretString>) -> MeshName {
    secret.map_or_else(MeshName::default, |s| MeshName::new(s.expose_secret()))
}

impl fmt::Debug for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameters")
            .field("mesh_name", &self.mesh_name)
            .field("mesh_password", &self.mesh_password)
            .field("new_mesh_name", &self.new_mesh_name)
            .field("new_mesh_password", &self.new_mesh_password)
            .field("long_term_key", &self.long_term_key)
            .field("out_of_mesh_name", &self.out_of_mesh_name)
            .field("scan_type_single", &self.scan_type_single)
            .field("scan_timeout_seconds", &self.scan_timeout_seconds)
            .field("connect_timeout_seconds", &self.connect_timeout_seconds)
            .field("offline_timeout_seconds", &self.offline_timeout_seconds)
            .field("auto_enable_notification", &self.auto_enable_notification)
            .field("refresh_delay_ms", &self.refresh_delay_ms)
            .field("refresh_repeat_count", &self.refresh_repeat_count)
            .field("device_target", &self.device_target)
            .field("firmware_len", &self.firmware.as_ref().map(Bytes::len))
            .finish()
    }
}
