//! Configuration loading and validation.
//!
//! One human-owned `config.toml` lists the RPC timeouts and every account
//! with the services to attach for it. Passwords are best kept out of it:
//! `password_env` names a key in `~/.pbchat/.env` or the process
//! environment instead.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::rpc::RpcTimeouts;
use crate::session::ServiceDescriptor;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Remote call limits.
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Configured accounts, in file order.
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

/// Remote call limits, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// Bound on any single remote call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Bound on reaching the root object.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl RpcConfig {
    /// Limits as durations.
    pub fn timeouts(&self) -> RpcTimeouts {
        RpcTimeouts {
            call: Duration::from_secs(self.call_timeout_secs),
            connect: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}

/// One `[[accounts]]` entry.
#[derive(Clone, Deserialize)]
pub struct AccountConfig {
    /// Unique account name.
    pub name: String,

    /// Log on when the client starts.
    #[serde(default)]
    pub auto_login: bool,

    /// Remote host.
    pub host: String,

    /// Remote port.
    pub port: u16,

    /// Identity presented on logon.
    pub identity: String,

    /// Inline password.
    #[serde(default)]
    pub password: Option<String>,

    /// Name of the credential or environment variable holding the password.
    #[serde(default)]
    pub password_env: Option<String>,

    /// Services to attach after logon.
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("name", &self.name)
            .field("auto_login", &self.auto_login)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("identity", &self.identity)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("password_env", &self.password_env)
            .field("services", &self.services)
            .finish()
    }
}

fn default_call_timeout_secs() -> u64 {
    30
}
fn default_connect_timeout_secs() -> u64 {
    5
}

impl Config {
    /// Check cross-field rules serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rpc.call_timeout_secs == 0 || self.rpc.connect_timeout_secs == 0 {
            anyhow::bail!("rpc timeouts must be non-zero");
        }

        let mut names = HashSet::new();
        for account in &self.accounts {
            let name = &account.name;
            if name.trim().is_empty() {
                anyhow::bail!("account name must not be empty");
            }
            if !names.insert(name.as_str()) {
                anyhow::bail!("duplicate account name: {name}");
            }
            if account.port == 0 {
                anyhow::bail!("account {name}: port must be non-zero");
            }
            if account.identity.trim().is_empty() {
                anyhow::bail!("account {name}: identity must not be empty");
            }
            if account.password.is_some() && account.password_env.is_some() {
                anyhow::bail!("account {name}: set only one of password and password_env");
            }
            if account.services.is_empty() {
                anyhow::bail!("account {name}: no services configured");
            }
        }
        Ok(())
    }
}

/// Load the config from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed. An unknown
/// `service_type` is a parse error.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config at {}", path.display()))?;
    Ok(config)
}

/// Resolve the default config directory (`~/.pbchat/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".pbchat"))
}

/// Files under the config directory.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// `~/.pbchat`
    pub root: PathBuf,
    /// `~/.pbchat/config.toml`
    pub config_toml: PathBuf,
    /// `~/.pbchat/.env`
    pub env_file: PathBuf,
    /// `~/.pbchat/logs`
    pub logs_dir: PathBuf,
}

impl RuntimePaths {
    /// Paths rooted at `root`.
    pub fn under(root: PathBuf) -> Self {
        Self {
            config_toml: root.join("config.toml"),
            env_file: root.join(".env"),
            logs_dir: root.join("logs"),
            root,
        }
    }
}

/// Paths rooted at [`config_dir`].
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn runtime_paths() -> anyhow::Result<RuntimePaths> {
    Ok(RuntimePaths::under(config_dir()?))
}
