//! Configuration handling.
//!
//! Two layers:
//! - an on-disk config file (`~/.config/nimbusctl/config.json`) holding
//!   defaults such as the auth URL, region, and extension plugin names
//! - command-line flags / `NIMBUS_*` environment variables, which override
//!   the file

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::auth::AuthParams;

/// Configuration file name.
const CONFIG_FILE: &str = "config.json";

/// Get the config directory path.
fn config_dir() -> Result<PathBuf> {
    ProjectDirs::from("io", "nimbus", "nimbusctl")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
}

/// On-disk CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity service URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,

    /// Default region name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_name: Option<String>,

    /// Default endpoint interface (public/internal/admin).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,

    /// Identity API version ("3", "2.0", ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_api_version: Option<String>,

    /// Domain id used to backfill v3 scope options.
    #[serde(default = "default_domain")]
    pub default_domain: String,

    /// Extension client plugins to register after the base group.
    #[serde(default)]
    pub extensions: Vec<String>,
}

fn default_domain() -> String {
    "default".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth_url: None,
            region_name: None,
            interface: None,
            identity_api_version: None,
            default_domain: default_domain(),
            extensions: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from disk, or return default.
    pub fn load() -> Result<Self> {
        let path = config_dir()?.join(CONFIG_FILE);

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", path))
    }

    /// Save config to disk.
    pub fn save(&self) -> Result<()> {
        let dir = config_dir()?;
        fs::create_dir_all(&dir)?;

        let path = dir.join(CONFIG_FILE);
        let contents = serde_json::to_string_pretty(self)?;

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;

            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&path)?;
            file.write_all(contents.as_bytes())?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&path, contents)
                .with_context(|| format!("Failed to write config to {:?}", path))
                .map(|_| ())?;
        }

        Ok(())
    }
}

/// Everything the session manager needs, collected from the command line,
/// environment, and config file. Static for the process lifetime.
#[derive(Debug, Clone)]
pub struct CliOptions {
    /// Flat credential parameter mapping.
    pub auth: AuthParams,

    /// Explicit auth plugin name (`--auth-type`), if any.
    pub auth_type: Option<String>,

    /// Identity API version string.
    pub identity_api_version: String,

    pub region_name: Option<String>,

    /// Endpoint interface. Empty/absent means "public".
    pub interface: Option<String>,

    /// Domain id used to backfill v3 scope options.
    pub default_domain: String,

    /// TLS verification: `true`/`false`, or a CA bundle path (implies true).
    pub verify: TlsVerify,

    /// Optional client certificate / key pair (PEM paths).
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,

    /// Record wall-clock duration per network call.
    pub timing: bool,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            auth: AuthParams::new(),
            auth_type: None,
            identity_api_version: "3".to_string(),
            region_name: None,
            interface: None,
            default_domain: default_domain(),
            verify: TlsVerify::Enabled,
            client_cert: None,
            client_key: None,
            timing: false,
        }
    }
}

/// TLS server verification mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsVerify {
    Enabled,
    Disabled,
    /// Verify against a CA bundle at this path.
    CaBundle(PathBuf),
}

impl TlsVerify {
    pub fn from_flags(insecure: bool, cacert: Option<PathBuf>) -> Self {
        match (insecure, cacert) {
            (_, Some(path)) => Self::CaBundle(path),
            (true, None) => Self::Disabled,
            (false, None) => Self::Enabled,
        }
    }
}
