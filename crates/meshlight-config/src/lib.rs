//! Shared configuration for meshlight embedders.
//!
//! TOML profiles, mesh password resolution (env + keyring + plaintext),
//! translation to `meshlight_core::ControllerConfig` and per-operation
//! `Parameters`, and a `tracing` subscriber setup for binaries.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use meshlight_core::{
    ControllerConfig, DEFAULT_VENDOR_ID, EmitPolicy, MESH_NAME_LEN, Parameters, Status,
    StatusPolicies,
};

/// Keyring service all mesh secrets are stored under.
pub const KEYRING_SERVICE: &str = "meshlight";

/// Fallback env var for the mesh password of any profile.
pub const PASSWORD_ENV: &str = "MESHLIGHT_MESH_PASSWORD";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no mesh password configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Controller tuning and per-operation defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named mesh profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,

    /// Emission policy overrides keyed by status name (e.g. `mesh_offline = "always"`).
    #[serde(default)]
    pub status_policy: BTreeMap<String, EmitPolicy>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
            status_policy: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_loop_interval_ms")]
    pub loop_interval_ms: u64,

    #[serde(default = "default_vendor_id")]
    pub vendor_id: u16,

    #[serde(default = "default_offline_backoff")]
    pub offline_backoff_secs: u64,

    #[serde(default = "default_offline_timeout")]
    pub offline_timeout_secs: u64,

    #[serde(default = "default_refresh_delay_ms")]
    pub refresh_delay_ms: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            loop_interval_ms: default_loop_interval_ms(),
            vendor_id: default_vendor_id(),
            offline_backoff_secs: default_offline_backoff(),
            offline_timeout_secs: default_offline_timeout(),
            refresh_delay_ms: default_refresh_delay_ms(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_loop_interval_ms() -> u64 {
    200
}
fn default_vendor_id() -> u16 {
    DEFAULT_VENDOR_ID
}
fn default_offline_backoff() -> u64 {
    5
}
fn default_offline_timeout() -> u64 {
    10
}
fn default_refresh_delay_ms() -> u64 {
    2000
}
fn default_connect_timeout() -> u64 {
    10
}

/// A named mesh profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Mesh name, at most 16 bytes.
    pub mesh_name: String,

    /// Mesh password (plaintext; prefer keyring or env var).
    pub mesh_password: Option<String>,

    /// Environment variable name containing the mesh password.
    pub mesh_password_env: Option<String>,

    /// Factory name of devices not yet provisioned into this mesh.
    pub out_of_mesh_name: Option<String>,

    /// Override connect timeout.
    pub connect_timeout: Option<u64>,

    /// Scan timeout; unset or 0 scans until stopped.
    pub scan_timeout: Option<u64>,

    /// Override offline grace period of auto-connect.
    pub offline_timeout: Option<u64>,

    #[serde(default)]
    pub auto_enable_notification: bool,

    /// Keep-alive delay; unset disables the refresher.
    pub refresh_delay_ms: Option<u64>,

    /// Keep-alives per login; 0 or negative means unlimited.
    #[serde(default)]
    pub refresh_repeat_count: i32,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "meshlight", "meshlight").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("meshlight");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load defaults, then `path` if it exists, then `MESHLIGHT_*` env vars
/// (`__` separates nested keys, e.g. `MESHLIGHT_DEFAULTS__VENDOR_ID`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MESHLIGHT_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    debug!(path = %path.display(), "config saved");
    Ok(())
}

// ── Profile selection ───────────────────────────────────────────────

/// Pick `name`, or the configured default profile.
pub fn select_profile<'a>(
    cfg: &'a Config,
    name: Option<&'a str>,
) -> Result<(&'a str, &'a Profile), ConfigError> {
    let name = name
        .or(cfg.default_profile.as_deref())
        .ok_or_else(|| invalid("profile", "no profile given and no default_profile set"))?;
    cfg.profiles
        .get(name)
        .map(|profile| (name, profile))
        .ok_or_else(|| invalid("profile", format!("unknown profile '{name}'")))
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the mesh password of a profile.
///
/// Order: the profile's `mesh_password_env`, then `MESHLIGHT_MESH_PASSWORD`,
/// then the system keyring, then the plaintext `mesh_password`.
pub fn resolve_mesh_password(
    profile: &Profile,
    profile_name: &str,
) -> Result<SecretString, ConfigError> {
    // 1. Env vars
    if let Some(ref env_name) = profile.mesh_password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }
    if let Ok(val) = std::env::var(PASSWORD_ENV) {
        return Ok(SecretString::from(val));
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &keyring_user(profile_name)) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref pw) = profile.mesh_password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Store a mesh password in the system keyring.
pub fn store_mesh_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &keyring_user(profile_name))
        .and_then(|entry| entry.set_password(password))
        .map_err(|e| invalid("keyring", e.to_string()))
}

fn keyring_user(profile_name: &str) -> String {
    format!("{profile_name}/mesh-password")
}

// ── Translation to core types ───────────────────────────────────────

/// Build the `ControllerConfig` from `[defaults]` and `[status_policy]`.
pub fn to_controller_config(cfg: &Config) -> Result<ControllerConfig, ConfigError> {
    let d = &cfg.defaults;
    if d.loop_interval_ms == 0 {
        return Err(invalid("defaults.loop_interval_ms", "must be positive"));
    }

    let mut status_policies = StatusPolicies::default();
    for (name, policy) in &cfg.status_policy {
        let status = Status::from_str(name)
            .map_err(|_| invalid("status_policy", format!("unknown status '{name}'")))?;
        status_policies.set(status, *policy);
    }

    Ok(ControllerConfig {
        loop_interval: Duration::from_millis(d.loop_interval_ms),
        vendor_id: d.vendor_id,
        offline_backoff: Duration::from_secs(d.offline_backoff_secs),
        default_offline_timeout: Duration::from_secs(d.offline_timeout_secs),
        default_refresh_delay: Duration::from_millis(d.refresh_delay_ms),
        status_policies,
    })
}

/// Build base `Parameters` from a profile. Operation-specific fields
/// (`device_target`, `firmware`, new mesh credentials) are left to the caller.
pub fn profile_to_parameters(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<Parameters, ConfigError> {
    validate_mesh_name("mesh_name", &profile.mesh_name)?;
    if let Some(ref name) = profile.out_of_mesh_name {
        validate_mesh_name("out_of_mesh_name", name)?;
    }
    let password = resolve_mesh_password(profile, profile_name)?;

    Ok(Parameters {
        mesh_name: Some(profile.mesh_name.clone()),
        mesh_password: Some(password),
        out_of_mesh_name: profile.out_of_mesh_name.clone(),
        connect_timeout_seconds: profile
            .connect_timeout
            .unwrap_or(defaults.connect_timeout_secs),
        scan_timeout_seconds: profile.scan_timeout.unwrap_or(0),
        offline_timeout_seconds: profile
            .offline_timeout
            .unwrap_or(defaults.offline_timeout_secs),
        auto_enable_notification: profile.auto_enable_notification,
        refresh_delay_ms: profile.refresh_delay_ms,
        refresh_repeat_count: profile.refresh_repeat_count,
        ..Parameters::default()
    })
}

fn validate_mesh_name(field: &str, name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    if name.len() > MESH_NAME_LEN {
        return Err(invalid(
            field,
            format!("'{name}' exceeds {MESH_NAME_LEN} bytes"),
        ));
    }
    Ok(())
}

// ── Tracing ─────────────────────────────────────────────────────────

/// Install a `fmt` subscriber. `RUST_LOG` wins; otherwise the level
/// follows `verbosity` (0 = warn .. 3+ = trace).
pub fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // A subscriber installed by the embedder takes precedence.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .try_init();
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    const SAMPLE: &str = r#"
default_profile = "living-room"

[defaults]
loop_interval_ms = 100
offline_timeout_secs = 20

[profiles.living-room]
mesh_name = "home"
mesh_password = "plain-pw"
connect_timeout = 4
refresh_delay_ms = 1500
refresh_repeat_count = 3
auto_enable_notification = true

[profiles.garage]
mesh_name = "this-name-is-far-too-long"

[status_policy]
mesh_offline = "always"
connected = "normal"
"#;

    fn write_sample() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        (dir, path)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(cfg.default_profile.as_deref(), Some("default"));
        assert_eq!(cfg.defaults.loop_interval_ms, 200);
        assert_eq!(cfg.defaults.vendor_id, 0x0211);
        assert!(cfg.profiles.is_empty());
    }

    #[test]
    fn file_values_override_defaults() {
        let (_dir, path) = write_sample();
        let cfg = load_config_from(&path).unwrap();

        assert_eq!(cfg.defaults.loop_interval_ms, 100);
        assert_eq!(cfg.defaults.offline_timeout_secs, 20);
        assert_eq!(cfg.defaults.refresh_delay_ms, 2000);
        assert_eq!(cfg.profiles.len(), 2);
    }

    #[test]
    fn save_then_load_preserves_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "default".into(),
            Profile {
                mesh_name: "office".into(),
                refresh_repeat_count: 7,
                ..Profile::default()
            },
        );

        save_config_to(&cfg, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        let (name, profile) = select_profile(&loaded, None).unwrap();
        assert_eq!(name, "default");
        assert_eq!(profile.mesh_name, "office");
        assert_eq!(profile.refresh_repeat_count, 7);
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let (_dir, path) = write_sample();
        let cfg = load_config_from(&path).unwrap();

        let err = select_profile(&cfg, Some("attic")).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "profile"));
    }

    #[test]
    fn controller_config_applies_policy_overrides() {
        let (_dir, path) = write_sample();
        let cfg = load_config_from(&path).unwrap();
        let controller = to_controller_config(&cfg).unwrap();

        assert_eq!(controller.loop_interval, Duration::from_millis(100));
        assert_eq!(controller.default_offline_timeout, Duration::from_secs(20));
        let policies = &controller.status_policies;
        assert_eq!(policies.policy(Status::MeshOffline), EmitPolicy::Always);
        assert_eq!(policies.policy(Status::Connected), EmitPolicy::Normal);
        assert_eq!(policies.policy(Status::OtaProgress), EmitPolicy::Always);
    }

    #[test]
    fn unknown_status_policy_is_rejected() {
        let mut cfg = Config::default();
        cfg.status_policy
            .insert("lights_on".into(), EmitPolicy::Always);

        let err = to_controller_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "status_policy"));
    }

    #[test]
    fn profile_translates_to_parameters() {
        let (_dir, path) = write_sample();
        let cfg = load_config_from(&path).unwrap();
        let (name, profile) = select_profile(&cfg, None).unwrap();

        let params = profile_to_parameters(profile, name, &cfg.defaults).unwrap();

        assert_eq!(params.mesh_name.as_deref(), Some("home"));
        assert_eq!(
            params.mesh_password.as_ref().unwrap().expose_secret(),
            "plain-pw"
        );
        assert_eq!(params.connect_timeout_seconds, 4);
        assert_eq!(params.offline_timeout_seconds, 20);
        assert_eq!(params.refresh_delay_ms, Some(1500));
        assert_eq!(params.refresh_repeat_count, 3);
        assert!(params.auto_enable_notification);
        assert!(params.device_target.is_none());
    }

    #[test]
    fn oversized_mesh_name_is_rejected() {
        let (_dir, path) = write_sample();
        let cfg = load_config_from(&path).unwrap();
        let (name, profile) = select_profile(&cfg, Some("garage")).unwrap();

        let err = profile_to_parameters(profile, name, &cfg.defaults).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "mesh_name"));
    }

    #[test]
    fn zero_loop_interval_is_rejected() {
        let mut cfg = Config::default();
        cfg.defaults.loop_interval_ms = 0;
        assert!(to_controller_config(&cfg).is_err());
    }
}
