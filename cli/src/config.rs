use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use tend_core::hosted::HostedStore;

pub struct Config {
    pub db_path: PathBuf,
    pub hosted_db_path: PathBuf,
    pub data_dir: PathBuf,
}

/// Connection state for the sync backend. Written by `tend connect`; the
/// account id doubles as the authenticated identity for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    pub token: String,
    pub account: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "tend").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = data_dir.join("tend.db");
        let hosted_db_path = data_dir.join("hosted.db");

        Ok(Config {
            db_path,
            hosted_db_path,
            data_dir,
        })
    }

    fn remote_path(&self) -> PathBuf {
        self.data_dir.join("remote.json")
    }

    pub fn load_remote(&self) -> Result<Option<RemoteConfig>> {
        let path = self.remote_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path).context("Failed to read remote config")?;
        let remote: RemoteConfig =
            serde_json::from_str(&raw).context("Failed to parse remote config")?;
        Ok(Some(remote))
    }

    pub fn store_remote(&self, remote: &RemoteConfig) -> Result<()> {
        let path = self.remote_path();
        let raw = serde_json::to_string_pretty(remote)?;
        std::fs::write(&path, raw).context("Failed to write remote config")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set remote config permissions")?;
        }
        Ok(())
    }

    /// Load the server's access token from disk, or generate a new one and
    /// register an account for it.
    ///
    /// Returns `(token, account, newly_created)` where `newly_created` is
    /// true when a fresh token was just generated (first run).
    pub fn load_or_create_server_token(&self, store: &HostedStore) -> Result<(String, String, bool)> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("server_token");

        if path.exists() {
            let token = std::fs::read_to_string(&path).context("Failed to read token file")?;
            let token = token.trim().to_string();
            if !token.is_empty() {
                let account = match store.account_for_token(&token)? {
                    Some(account) => account,
                    None => store.create_account(&token)?,
                };
                return Ok((token, account, false));
            }
        }

        let bytes: [u8; 32] = rand::rng().random();
        let token = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &token).context("Failed to write token file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set token file permissions")?;
        }
        let account = store.create_account(&token)?;
        eprintln!("Generated new access token: {token}");
        eprintln!("Connect a device with: tend connect <server-url> {token}");
        Ok((token, account, true))
    }
}
