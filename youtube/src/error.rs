//! Error taxonomy shared by the authorizer, the API client and the collector.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exit code for malformed command lines (`EX_USAGE`), kept apart from every [`Error`] code.
pub const USAGE_EXIT_CODE: i32 = 64;

/// Everything that can end a run.
///
/// None of these are recovered from locally; the binary reports the error and exits with
/// [`Error::exit_code`].
#[derive(Debug, Error)]
pub enum Error {
    /// Client identity configuration is missing, malformed, or still holds template values.
    #[error("invalid client configuration: {0}")]
    Configuration(String),

    /// The user or the provider aborted or rejected the authorization flow.
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// The API answered with a structured error.
    #[error("YouTube API error {code}: {message}")]
    Provider { code: u16, message: String },

    /// Network or local I/O failure.
    #[error("transport error: {context}")]
    Transport {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A single page of a paginated walk failed, which aborts the whole walk.
    #[error("fetching page {page} failed")]
    Fetch {
        page: usize,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Unknown(#[from] eyre::Report),
}

impl Error {
    /// Wraps a network or local I/O failure with what was being attempted.
    ///
    /// ```
    /// use youtube_tags::Error;
    ///
    /// let e = Error::transport("write tags to stdout", std::io::Error::other("broken pipe"));
    /// assert_eq!(e.kind(), "transport");
    /// assert_eq!(e.exit_code(), 4);
    /// ```
    pub fn transport(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Transport {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Short, stable name of the error kind for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Authorization(_) => "authorization",
            Self::Provider { .. } => "provider",
            Self::Transport { .. } => "transport",
            Self::Fetch { source, .. } => source.kind(),
            Self::Unknown(_) => "unknown",
        }
    }

    /// Process exit code for this error.
    ///
    /// A failed page reports the code of whatever made it fail.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Authorization(_) => 2,
            Self::Provider { .. } => 3,
            Self::Transport { .. } => 4,
            Self::Fetch { source, .. } => source.exit_code(),
            Self::Unknown(_) => 5,
        }
    }
}
