//! TOML-based configuration for the autocomplete server.
//!
//! Read from an explicit path, or from the platform-appropriate file:
//! - Windows:  `%APPDATA%\PianoML\server.toml`
//! - Linux:    `~/.config/pianoml/server.toml`
//! - macOS:    `~/Library/Application Support/PianoML/server.toml`
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 7611
//! log_level = "info"
//!
//! [protocol]
//! receive_timeout_ms = 5000
//! max_frame_len = 67108864
//!
//! [codec]
//! time_shift_increment = 0.01
//! time_shift_count = 100
//! velocity_count = 32
//!
//! [autocomplete]
//! default_velocity = 0.8
//! generate_count = 20
//! pending_notes = "flush"
//!
//! [predictor]
//! kind = "command"
//! program = "python3"
//! args = ["ml/predict.py"]
//! serialize_calls = true
//!
//! [predictor.codec]          # optional: what the model was trained with
//! time_shift_increment = 0.01
//! time_shift_count = 100
//! velocity_count = 32
//! ```
//!
//! Every field has a serde default, so a missing file, a missing section or
//! a missing key all fall back to the values above.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use piano_core::protocol::frame::{DEFAULT_MAX_FRAME_LEN, DEFAULT_RECEIVE_TIMEOUT};
use piano_core::{CodecConfig, PendingPolicy, ReceivePolicy};
use serde::Deserialize;
use thiserror::Error;

use crate::application::autocomplete::{DEFAULT_GENERATE_COUNT, DEFAULT_VELOCITY};
use crate::application::AutocompleteSettings;

/// Port the original front end expects.
pub const DEFAULT_PORT: u16 = 7611;

const CONFIG_FILE_NAME: &str = "server.toml";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid bind address `{0}`")]
    InvalidBindAddress(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ListenConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub codec: CodecConfig,
    #[serde(default)]
    pub autocomplete: AutocompleteConfig,
    #[serde(default)]
    pub predictor: PredictorConfig,
}

/// Listener and logging settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ListenConfig {
    /// IP address to bind.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Framing limits.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProtocolConfig {
    /// Budget for each bounded receive, in milliseconds.
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    /// Largest request payload accepted, in bytes.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

/// Request handling settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AutocompleteConfig {
    #[serde(default = "default_velocity")]
    pub default_velocity: f64,
    #[serde(default = "default_generate_count")]
    pub generate_count: usize,
    /// What happens to notes the model never releases.
    #[serde(default = "default_pending_notes")]
    pub pending_notes: PendingPolicy,
}

/// Which predictor implementation to run.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PredictorKind {
    /// Echo the input tokens back.
    #[default]
    Identity,
    /// Run an external model process per request.
    Command,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PredictorConfig {
    #[serde(default)]
    pub kind: PredictorKind,
    /// Program to run for `kind = "command"`.
    #[serde(default)]
    pub program: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Run predictions one at a time.
    #[serde(default = "default_true")]
    pub serialize_calls: bool,
    /// Codec configuration the model was trained with, if known.
    #[serde(default)]
    pub codec: Option<CodecConfig>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_receive_timeout_ms() -> u64 {
    DEFAULT_RECEIVE_TIMEOUT.as_millis() as u64
}
fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}
fn default_velocity() -> f64 {
    DEFAULT_VELOCITY
}
fn default_generate_count() -> usize {
    DEFAULT_GENERATE_COUNT
}
fn default_pending_notes() -> PendingPolicy {
    PendingPolicy::Flush
}
fn default_true() -> bool {
    true
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            receive_timeout_ms: default_receive_timeout_ms(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl Default for AutocompleteConfig {
    fn default() -> Self {
        Self {
            default_velocity: default_velocity(),
            generate_count: default_generate_count(),
            pending_notes: default_pending_notes(),
        }
    }
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            kind: PredictorKind::default(),
            program: None,
            args: Vec::new(),
            serialize_calls: default_true(),
            codec: None,
        }
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl ListenConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBindAddress`] if `bind_address` is not
    /// an IP address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let text = format!("{}:{}", self.bind_address, self.port);
        text.parse().map_err(|_| ConfigError::InvalidBindAddress(text))
    }
}

impl ProtocolConfig {
    pub fn receive_policy(&self) -> ReceivePolicy {
        ReceivePolicy {
            timeout: Duration::from_millis(self.receive_timeout_ms),
            max_frame_len: self.max_frame_len,
        }
    }
}

impl AutocompleteConfig {
    pub fn settings(&self) -> AutocompleteSettings {
        AutocompleteSettings {
            default_velocity: self.default_velocity,
            generate_count: self.generate_count,
            pending_policy: self.pending_notes,
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the platform config file path.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot
/// be determined from the environment.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the configuration from `path`, or from the platform file when
/// `path` is `None`.
///
/// A missing platform file yields [`ServerConfig::default`]; a missing
/// explicit file is an error.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors and
/// [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let (path, must_exist) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => match config_file_path() {
            Ok(p) => (p, false),
            Err(ConfigError::NoPlatformConfigDir) => return Ok(ServerConfig::default()),
            Err(e) => return Err(e),
        },
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !must_exist => {
            Ok(ServerConfig::default())
        }
        Err(source) => Err(ConfigError::Io { path, source }),
    }
}

/// Resolves the platform config base directory including the `PianoML`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("PianoML"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("pianoml"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("PianoML")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
