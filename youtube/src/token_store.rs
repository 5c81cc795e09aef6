//! On-disk credential cache.
//!
//! Each datastore is a JSON file named after the datastore inside the store directory. The file
//! maps a user id to that user's [`Credential`].

use crate::auth::Credential;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, datastore: &str) -> PathBuf {
        self.dir.join(datastore)
    }

    async fn read_all(&self, datastore: &str) -> Result<BTreeMap<String, Credential>> {
        let path = self.path(datastore);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(Error::transport(
                    format!("read token store {}", path.display()),
                    e,
                ));
            }
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                // An unreadable cache only costs the user a trip through the browser.
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt token store");
                Ok(BTreeMap::new())
            }
        }
    }

    /// Looks up the credential stored for `user` in `datastore`.
    pub async fn load(&self, datastore: &str, user: &str) -> Result<Option<Credential>> {
        let mut entries = self.read_all(datastore).await?;
        Ok(entries.remove(user))
    }

    /// Stores `credential` for `user` in `datastore`, keeping other users' entries.
    #[tracing::instrument(skip(self, credential), fields(dir = %self.dir.display()))]
    pub async fn save(&self, datastore: &str, user: &str, credential: &Credential) -> Result<()> {
        let mut entries = self.read_all(datastore).await?;
        entries.insert(user.to_string(), credential.clone());

        self.ensure_dir().await?;
        let path = self.path(datastore);
        let json = serde_json::to_vec_pretty(&entries)
            .map_err(|e| Error::Unknown(eyre::Report::new(e).wrap_err("serialize credentials")))?;
        // Readers only ever see the old file or the complete new one.
        let staging = self.dir.join(format!(".{datastore}.tmp"));
        write_owner_only(&staging, &json).await?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| Error::transport(format!("replace token store {}", path.display()), e))?;

        tracing::debug!("persisted credential");
        Ok(())
    }

    async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::transport(format!("create token store {}", self.dir.display()), e)
        })?;
        restrict_permissions(&self.dir, 0o700).await
    }
}

/// Writes `contents` to a fresh file at `path` that only the owner can read.
async fn write_owner_only(path: &Path, contents: &[u8]) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let context = || format!("write token store {}", path.display());
    // A leftover from an interrupted run may carry looser permissions.
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::transport(context(), e)),
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options
        .open(path)
        .await
        .map_err(|e| Error::transport(context(), e))?;
    file.write_all(contents)
        .await
        .map_err(|e| Error::transport(context(), e))?;
    file.sync_all()
        .await
        .map_err(|e| Error::transport(context(), e))
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| Error::transport(format!("restrict permissions of {}", path.display()), e))
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
