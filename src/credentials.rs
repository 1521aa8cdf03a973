//! Credential loading from the runtime `.env` file.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::debug;

use crate::config::runtime_paths;

/// Runtime credentials loaded from the `.env` file.
#[derive(Clone, Default)]
pub struct Credentials {
    vars: BTreeMap<String, String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .field("values", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// Build credentials from a key-value map.
    pub fn from_map(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    /// Returns a credential value for a key, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Look `key` up here, then in the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error when neither source has a non-empty value.
    pub fn resolve(&self, key: &str) -> anyhow::Result<String> {
        if let Some(value) = self.get(key).filter(|v| !v.is_empty()) {
            return Ok(value.to_owned());
        }
        match std::env::var(key) {
            Ok(value) if !value.is_empty() => {
                debug!(key, "credential taken from process environment");
                Ok(value)
            }
            _ => Err(anyhow::anyhow!("missing required credential: {key}")),
        }
    }

    /// Number of loaded entries.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// True when nothing was loaded.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Load credentials from a specific `.env` path.
///
/// # Errors
///
/// Returns an error if the file does not exist, permissions are too broad,
/// or parsing fails.
pub fn load_credentials(path: &Path) -> anyhow::Result<Credentials> {
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "credentials file does not exist: {}",
            path.display()
        ));
    }

    validate_private_permissions(path)?;

    let mut vars = BTreeMap::new();
    let iter = dotenvy::from_path_iter(path)
        .with_context(|| format!("failed to read credentials at {}", path.display()))?;

    for item in iter {
        let (key, value) = item.with_context(|| {
            format!(
                "failed to parse key-value entry in credentials file {}",
                path.display()
            )
        })?;
        vars.insert(key, value);
    }

    Ok(Credentials { vars })
}

/// Load credentials from `~/.pbchat/.env`.
///
/// A missing file yields empty credentials; passwords may still come from
/// the config or the process environment.
///
/// # Errors
///
/// Returns an error when runtime paths cannot be resolved or an existing
/// credentials file is invalid.
pub fn load_default_credentials() -> anyhow::Result<Credentials> {
    let paths = runtime_paths()?;
    if !paths.env_file.exists() {
        debug!(path = %paths.env_file.display(), "no credentials file");
        return Ok(Credentials::default());
    }
    load_credentials(&paths.env_file)
}

/// Restrict a file to its owner when supported.
///
/// # Errors
///
/// Returns an error if permissions cannot be updated.
pub fn enforce_private_file_permissions(path: &Path) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

#[cfg(unix)]
fn validate_private_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path)
        .with_context(|| format!("failed to inspect credentials file {}", path.display()))?;
    let mode = metadata.permissions().mode() & 0o777;

    if mode & 0o077 != 0 {
        return Err(anyhow::anyhow!(
            "credentials file {} must be 0600, found {:o}",
            path.display(),
            mode
        ));
    }

    Ok(())
}

#[cfg(not(unix))]
fn validate_private_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}
