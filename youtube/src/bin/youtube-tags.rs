use clap::Parser;
use std::io::IsTerminal;
use std::process::ExitCode;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use youtube_tags::auth::{Authorizer, Credential, PreProvisionedToken};
use youtube_tags::config::{ClientSecrets, Settings, command_line_exit_code};
use youtube_tags::oauth::OAuthManager;
use youtube_tags::token_store::FileTokenStore;
use youtube_tags::youtube_api::YouTubeClient;
use youtube_tags::{Error, Result};

#[tokio::main]
async fn main() -> ExitCode {
    let settings = match Settings::try_parse() {
        Ok(settings) => settings,
        Err(e) => {
            let _ = e.print();
            return exit_code(command_line_exit_code(&e));
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    match run(&settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e.exit_code();
            tracing::error!(kind = e.kind(), code, "{e}");
            eprintln!("Error: {:?}", eyre::Report::new(e));
            exit_code(code)
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn run(settings: &Settings) -> Result<()> {
    let credential = authorize(settings).await?;
    tracing::info!(
        source = ?credential.source(),
        expires_at = %credential.expires_at(),
        "authorized"
    );

    let http = reqwest::Client::builder()
        .build()
        .map_err(|e| Error::transport("build HTTP client", e))?;
    let yt = YouTubeClient::new(&credential, http)
        .with_base_url(&settings.api_base_url)
        .with_page_size(settings.page_size());

    let tags = youtube_tags::collect_tags(&yt, settings.playlist).await?;
    youtube_tags::tags::write_tags(std::io::stdout().lock(), &tags)
}

/// Produces a credential either from a token on the command line or from the cached OAuth flow.
async fn authorize(settings: &Settings) -> Result<Credential> {
    let scopes = settings.scope_set();

    if let Some(access_token) = &settings.access_token {
        tracing::debug!("using pre-provisioned access token");
        return Authorizer::uncached(PreProvisionedToken::new(access_token.clone()))
            .authorize(&scopes, &settings.datastore)
            .await;
    }

    // Secrets are checked before anything touches the network or the token store.
    let secrets = ClientSecrets::load(&settings.client_secrets).await?;
    let flow = OAuthManager::new(secrets, settings.port, settings.auth_timeout())?;
    let store = FileTokenStore::new(settings.credentials_dir()?);
    tracing::debug!(dir = %store.dir().display(), "using token store");

    Authorizer::new(flow, store, settings.user.clone())
        .authorize(&scopes, &settings.datastore)
        .await
}
