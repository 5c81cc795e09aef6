//! Run configuration: command-line flags and the OAuth client identity file.

use crate::auth::ScopeSet;
use crate::error::{Error, Result, USAGE_EXIT_CODE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Base URL of the YouTube Data API v3.
pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Directory under the user's home where OAuth tokens are stored.
const CREDENTIALS_DIRECTORY: &str = "oauth-credentials";

/// Which of the channel's related playlists to walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RelatedPlaylist {
    Likes,
    Uploads,
}

/// Print the tags of every video in your YouTube likes (or uploads) playlist.
#[derive(Debug, Clone, clap::Parser)]
#[command(version)]
pub struct Settings {
    /// Path to the OAuth client secrets file downloaded from the Google API console.
    #[arg(long, env = "YOUTUBE_CLIENT_SECRETS", default_value = "client_secrets.json")]
    pub client_secrets: PathBuf,

    /// Directory holding cached OAuth tokens [default: ~/oauth-credentials].
    #[arg(long, env = "YOUTUBE_CREDENTIALS_DIR")]
    pub credentials_dir: Option<PathBuf>,

    /// Name of the token datastore inside the credentials directory.
    #[arg(long, default_value = "uploadvideo")]
    pub datastore: String,

    /// User id the token is stored under within the datastore.
    #[arg(long, default_value = "user")]
    pub user: String,

    /// Local port that receives the OAuth redirect.
    #[arg(long, default_value_t = 8081)]
    pub port: u16,

    /// Seconds to wait for the browser authorization to complete (0 waits forever).
    #[arg(long, default_value_t = 300)]
    pub auth_timeout: u64,

    /// Which related playlist of the channel to read.
    #[arg(long, value_enum, default_value_t = RelatedPlaylist::Likes)]
    pub playlist: RelatedPlaylist,

    /// Number of items requested per page.
    #[arg(long, default_value_t = 50)]
    pub page_size: u32,

    /// Use this access token instead of running the OAuth flow.
    #[arg(long, env = "YOUTUBE_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// OAuth scope to request; may be repeated.
    #[arg(long = "scope", value_name = "SCOPE")]
    pub scopes: Vec<String>,

    #[arg(long, default_value = DEFAULT_API_BASE_URL, hide = true)]
    pub api_base_url: String,
}

impl Settings {
    /// Requested scopes, falling back to full YouTube access.
    pub fn scope_set(&self) -> ScopeSet {
        if self.scopes.is_empty() {
            ScopeSet::youtube()
        } else {
            self.scopes.iter().cloned().collect()
        }
    }

    pub fn auth_timeout(&self) -> Option<Duration> {
        (self.auth_timeout > 0).then(|| Duration::from_secs(self.auth_timeout))
    }

    pub fn page_size(&self) -> Option<u32> {
        (self.page_size > 0).then_some(self.page_size)
    }

    pub fn credentials_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.credentials_dir {
            return Ok(dir.clone());
        }
        let home = dirs::home_dir().ok_or_else(|| {
            Error::Configuration(
                "cannot locate home directory; pass --credentials-dir".to_string(),
            )
        })?;
        Ok(home.join(CREDENTIALS_DIRECTORY))
    }
}

/// Exit code for a command line that [`Settings`] rejected.
///
/// `--help` and `--version` also arrive as errors but are successful runs.
pub fn command_line_exit_code(e: &clap::Error) -> i32 {
    if e.use_stderr() { USAGE_EXIT_CODE } else { 0 }
}

/// OAuth client identity, as found in Google's `client_secrets.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URL.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

/// The file wraps the identity in an `installed` or a `web` section.
#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Configuration(format!("read client secrets {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Parses and validates a client secrets document.
    pub fn from_json(raw: &str) -> Result<Self> {
        let file: ClientSecretsFile = serde_json::from_str(raw)
            .map_err(|e| Error::Configuration(format!("parse client secrets: {e}")))?;
        let secrets = file.installed.or(file.web).ok_or_else(|| {
            Error::Configuration("client secrets have neither `installed` nor `web` section".into())
        })?;
        secrets.validate()?;
        Ok(secrets)
    }

    /// Rejects the values shipped in the template file ("Enter X here").
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() || self.client_secret.trim().is_empty() {
            return Err(Error::Configuration(
                "client_id and client_secret must be set".to_string(),
            ));
        }
        if self.client_id.starts_with("Enter") || self.client_secret.starts_with("Enter ") {
            return Err(Error::Configuration(
                "enter the client ID and secret from \
                https://console.developers.google.com/project/_/apiui/credential \
                into the client secrets file"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
