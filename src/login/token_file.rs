//! Local persistence of the issued client token.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::expand_home;
use crate::credential::IssuedCredential;
use crate::{Error, Result};

/// Default token file, relative to the home directory
pub const DEFAULT_TOKEN_FILE: &str = "~/.oidc-login/token";

/// File holding the most recently issued client token
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    /// Token file at `path` (supports ~)
    #[must_use]
    pub fn new(path: &str) -> Self {
        Self {
            path: PathBuf::from(expand_home(path)),
        }
    }

    /// Location on disk
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the credential's client token, owner read/write only
    pub fn save(&self, credential: &IssuedCredential) -> Result<()> {
        if credential.client_token.is_empty() {
            return Err(Error::MissingCredential);
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::Internal(format!("Failed to create token directory: {e}"))
                })?;
            }
        }

        fs::write(&self.path, &credential.client_token)
            .map_err(|e| Error::Internal(format!("Failed to write token file: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        info!(path = %self.path.display(), "Saved client token");
        Ok(())
    }

    /// Read the stored token, if any
    pub fn load(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(token) => Ok(Some(token.trim().to_string()).filter(|t| !t.is_empty())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
