//! The thin account/config seam `cli` needs: current working directory
//! plus a loaded [`AccessConfig`]. Not a rebuild of account management —
//! just enough to hand a [`objsh_token::AccessKeyProvider`] to a command.

use std::path::{Path, PathBuf};

use objsh_core::error::{Error, Kind};
use objsh_token::AccessKeyProvider;
use serde::{Deserialize, Serialize};

/// The access-key/secret-key pair persisted to disk by an external
/// account-setup step; this crate only reads it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Access key.
    pub access_key: String,
    /// Secret key.
    pub secret_key: String,
}

impl AccessConfig {
    /// Builds an [`AccessKeyProvider`] from this config.
    #[must_use]
    pub fn into_provider(self) -> AccessKeyProvider {
        AccessKeyProvider::new(self.access_key, self.secret_key)
    }
}

/// A job's working context: its directory plus the loaded credentials.
/// Deliberately not a process-wide singleton — constructed once per
/// command invocation and threaded through explicitly.
pub struct Workspace {
    /// Current working directory at the time the workspace was opened.
    pub cwd: PathBuf,
    /// Loaded account credentials.
    pub access: AccessConfig,
}

impl Workspace {
    /// Loads a workspace from a JSON credentials file.
    pub fn open(cwd: impl Into<PathBuf>, access_config_path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = std::fs::File::open(access_config_path)
            .map_err(|e| Error::new(Kind::InvalidArg, "failed to open access config").with_cause(e))?;
        let access: AccessConfig = serde_json::from_reader(file)
            .map_err(|e| Error::new(Kind::InvalidArg, "failed to parse access config").with_cause(e))?;
        Ok(Self {
            cwd: cwd.into(),
            access,
        })
    }
}
