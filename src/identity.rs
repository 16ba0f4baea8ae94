use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::info;

const TOKEN_DIR: &str = "keiba_terminal";
const TOKEN_FILE: &str = "token";
const TOKEN_LEN: usize = 21;

/// Opaque per-device credential sent with every API request.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceToken(String);

impl fmt::Debug for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head: String = self.0.chars().take(4).collect();
        write!(f, "DeviceToken({head}…)")
    }
}

impl DeviceToken {
    pub fn generate() -> Self {
        let token = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect();
        Self(token)
    }

    /// Reads the token at `path`, creating and persisting one if missing.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if let Ok(raw) = fs::read_to_string(path) {
            let raw = raw.trim();
            if !raw.is_empty() {
                return Ok(Self(raw.to_string()));
            }
        }

        let token = Self::generate();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("create token dir {}", dir.display()))?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &token.0).context("write device token")?;
        fs::rename(&tmp, path).context("swap device token")?;
        info!(path = %path.display(), "created device token");
        Ok(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub fn default_token_path() -> Result<PathBuf> {
    if let Ok(base) = std::env::var("XDG_CONFIG_HOME")
        && !base.trim().is_empty()
    {
        return Ok(PathBuf::from(base).join(TOKEN_DIR).join(TOKEN_FILE));
    }
    let home = std::env::var("HOME").unwrap_or_default();
    if home.trim().is_empty() {
        return Err(anyhow!("cannot resolve token path: HOME is not set"));
    }
    Ok(PathBuf::from(home)
        .join(".config")
        .join(TOKEN_DIR)
        .join(TOKEN_FILE))
}
