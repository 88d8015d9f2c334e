//! Configuration Vault – reads/writes `~/.facelink/config.toml`.

use facelink_capture::ScheduleConfig;
use facelink_types::RecognitionParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted operator configuration stored in `~/.facelink/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Recognition service endpoint (multipart `POST`).
    #[serde(default = "default_recognition_url")]
    pub recognition_url: String,

    /// Registration endpoint the gateway forwards `/api/register` to.
    #[serde(default = "default_register_url")]
    pub register_url: String,

    /// Answering service endpoint (JSON `POST`).
    #[serde(default = "default_query_url")]
    pub query_url: String,

    /// Relay URL dialled by `/connect`.
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    /// Port the relay server binds when started with `/serve`.
    #[serde(default = "default_relay_port")]
    pub relay_port: u16,

    /// Port the HTTP gateway binds when started with `/serve`.
    #[serde(default = "default_gateway_port")]
    pub gateway_port: u16,

    /// Capture cadence in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    #[serde(default = "default_max_faces")]
    pub max_faces: u32,

    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

fn default_recognition_url() -> String {
    "http://localhost:8000/recognize-face".to_string()
}
fn default_register_url() -> String {
    "http://localhost:8000/register-face".to_string()
}
fn default_query_url() -> String {
    "http://localhost:8000/query".to_string()
}
fn default_relay_url() -> String {
    "ws://localhost:5001".to_string()
}
fn default_relay_port() -> u16 {
    5001
}
fn default_gateway_port() -> u16 {
    5000
}
fn default_interval_ms() -> u64 {
    2000
}
fn default_similarity_threshold() -> f32 {
    RecognitionParams::default().similarity_threshold
}
fn default_max_faces() -> u32 {
    RecognitionParams::default().max_faces
}
fn default_max_results() -> u32 {
    RecognitionParams::default().max_results
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recognition_url: default_recognition_url(),
            register_url: default_register_url(),
            query_url: default_query_url(),
            relay_url: default_relay_url(),
            relay_port: default_relay_port(),
            gateway_port: default_gateway_port(),
            interval_ms: default_interval_ms(),
            similarity_threshold: default_similarity_threshold(),
            max_faces: default_max_faces(),
            max_results: default_max_results(),
        }
    }
}

impl Config {
    pub fn recognition_params(&self) -> RecognitionParams {
        RecognitionParams {
            similarity_threshold: self.similarity_threshold,
            max_faces: self.max_faces,
            max_results: self.max_results,
        }
    }

    /// Capture timing derived from `interval_ms`.
    pub fn schedule(&self) -> Result<ScheduleConfig, String> {
        ScheduleConfig::new(self.interval_ms).map_err(|e| e.to_string())
    }

    /// Reject values the services cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_ms == 0 {
            return Err("interval_ms must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(format!(
                "similarity_threshold must be within [0, 1], got {}",
                self.similarity_threshold
            ));
        }
        if self.max_faces == 0 || self.max_results == 0 {
            return Err("max_faces and max_results must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Return the path to `~/.facelink/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".facelink").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(Some(cfg))
}

/// Apply `FACELINK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `FACELINK_RECOGNITION_URL` | `recognition_url` |
/// | `FACELINK_REGISTER_URL` | `register_url` |
/// | `FACELINK_QUERY_URL` | `query_url` |
/// | `FACELINK_RELAY_URL` | `relay_url` |
/// | `FACELINK_RELAY_PORT` | `relay_port` |
/// | `FACELINK_GATEWAY_PORT` | `gateway_port` |
/// | `FACELINK_INTERVAL_MS` | `interval_ms` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

/// Same as [`apply_env_overrides`] with an injectable lookup.
pub(crate) fn apply_overrides_from(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("FACELINK_RECOGNITION_URL") {
        cfg.recognition_url = v;
    }
    if let Some(v) = lookup("FACELINK_REGISTER_URL") {
        cfg.register_url = v;
    }
    if let Some(v) = lookup("FACELINK_QUERY_URL") {
        cfg.query_url = v;
    }
    if let Some(v) = lookup("FACELINK_RELAY_URL") {
        cfg.relay_url = v;
    }
    if let Some(port) = lookup("FACELINK_RELAY_PORT").and_then(|v| v.parse::<u16>().ok()) {
        cfg.relay_port = port;
    }
    if let Some(port) = lookup("FACELINK_GATEWAY_PORT").and_then(|v| v.parse::<u16>().ok()) {
        cfg.gateway_port = port;
    }
    if let Some(ms) = lookup("FACELINK_INTERVAL_MS")
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
    {
        cfg.interval_ms = ms;
    }
}

/// Save the config to disk, creating `~/.facelink/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
