//! OAuth 2.0 authorization-code flow for installed applications.
//!
//! The user is sent to Google's consent page in their browser, and Google redirects back to a
//! listener on a fixed local port with the authorization code, which is then exchanged for a
//! token.

use crate::auth::{AuthorizationFlow, CredentialSource, ScopeSet};
use crate::config::ClientSecrets;
use crate::error::{Error, Result};
use http::StatusCode;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response, body};
use oauth2::basic::{BasicClient, BasicErrorResponseType, BasicTokenResponse};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge, RedirectUrl,
    RequestTokenError, TokenResponse, TokenUrl, reqwest,
};
use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;

/// Path of the redirect endpoint on the local listener.
const CALLBACK_PATH: &str = "/Callback";

/// How long one connection to the redirect listener may take before it is dropped.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

const OAUTH_DONE: &str = "<html><head><title>OAuth 2.0 Authentication Token Received</title></head>\
<body>Received verification code. You may now close this window.</body></html>";

const OAUTH_FAILED: &str = "<html><head><title>OAuth 2.0 Authentication Failed</title></head>\
<body>Authorization did not complete. Check the terminal for details.</body></html>";

/// Runs the interactive browser flow and refreshes tokens it produced.
#[derive(Debug, Clone)]
pub struct OAuthManager {
    secrets: ClientSecrets,
    port: u16,
    timeout: Option<Duration>,
    http_client: reqwest::Client,
}

impl OAuthManager {
    /// Creates a manager for the given client identity.
    ///
    /// # Arguments
    ///
    /// * `secrets` - The OAuth client identity
    /// * `port` - Local port the provider redirects back to
    /// * `timeout` - How long to wait for the user to finish in the browser; `None` waits forever
    pub fn new(secrets: ClientSecrets, port: u16, timeout: Option<Duration>) -> Result<Self> {
        secrets.validate()?;
        let http_client = reqwest::ClientBuilder::new()
            // SSRF no thank you.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::transport("build OAuth HTTP client", e))?;
        Ok(Self {
            secrets,
            port,
            timeout,
            http_client,
        })
    }

    fn client_id(&self) -> ClientId {
        ClientId::new(self.secrets.client_id.clone())
    }

    fn client_secret(&self) -> ClientSecret {
        ClientSecret::new(self.secrets.client_secret.clone())
    }

    fn token_url(&self) -> Result<TokenUrl> {
        TokenUrl::new(self.secrets.token_uri.clone())
            .map_err(|e| Error::Configuration(format!("malformed token_uri: {e}")))
    }

    /// Performs a complete authorization flow to obtain a new token.
    ///
    /// Binds the redirect listener, sends the user to the consent page, waits for the redirect
    /// and exchanges the authorization code for a token.
    #[tracing::instrument(skip(self, scopes), fields(port = self.port))]
    pub async fn authenticate(&self, scopes: &ScopeSet) -> Result<BasicTokenResponse> {
        let csrf = CsrfToken::new_random();
        let (redirect_url, eventually_authorization_code) =
            self.setup_redirect(csrf.clone()).await?;

        let auth_url = AuthUrl::new(self.secrets.auth_uri.clone())
            .map_err(|e| Error::Configuration(format!("malformed auth_uri: {e}")))?;
        let client = BasicClient::new(self.client_id())
            .set_client_secret(self.client_secret())
            .set_auth_uri(auth_url)
            .set_token_uri(self.token_url()?)
            .set_redirect_uri(redirect_url);

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, _csrf_token) = client
            // We never re-use the CSRF since we only go through the flow exactly once.
            .authorize_url(move || csrf.clone())
            .add_scopes(scopes.to_oauth_scopes())
            // Without offline access Google issues no refresh token.
            .add_extra_param("access_type", "offline")
            .set_pkce_challenge(pkce_challenge)
            .url();

        tracing::info!(url = %auth_url, "asking user to follow OAuth flow");
        if let Err(e) = webbrowser::open(auth_url.as_ref()) {
            tracing::warn!(error = %e, "could not open browser");
            eprintln!("Please open the following address in your browser:\n  {auth_url}");
        }

        let authorization_code = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, eventually_authorization_code)
                .await
                .map_err(|_| {
                    Error::Authorization(format!(
                        "no authorization received within {}s",
                        limit.as_secs()
                    ))
                })??,
            None => eventually_authorization_code.await?,
        };

        let token = client
            .exchange_code(authorization_code)
            .set_pkce_verifier(pkce_verifier)
            .request_async(&self.http_client)
            .await
            .map_err(|e| match e {
                RequestTokenError::ServerResponse(sr) => Error::Authorization(format!(
                    "provider rejected authorization code: {sr}"
                )),
                RequestTokenError::Request(e) => {
                    Error::transport("exchange authorization code for access token", e)
                }
                e => Error::Unknown(
                    eyre::Report::new(e).wrap_err("exchange authorization code for access token"),
                ),
            })?;

        tracing::info!("user authorized access");
        Ok(token)
    }

    /// Exchanges the refresh token of `token` for a new access token.
    ///
    /// Returns `Ok(None)` if there is no refresh token or the provider considers it an invalid
    /// grant, in which case the user has to go through [`Self::authenticate`] again.
    pub async fn refresh_token(
        &self,
        token: &BasicTokenResponse,
    ) -> Result<Option<BasicTokenResponse>> {
        let Some(refresh_token) = token.refresh_token() else {
            tracing::warn!("no refresh token available, cannot refresh");
            return Ok(None);
        };

        tracing::debug!("attempting to refresh OAuth token");

        // No redirect URL needed for refresh.
        let client = BasicClient::new(self.client_id())
            .set_client_secret(self.client_secret())
            .set_token_uri(self.token_url()?);

        match client
            .exchange_refresh_token(refresh_token)
            .request_async(&self.http_client)
            .await
        {
            Ok(new_token) => Ok(Some(new_token)),
            Err(ref e @ RequestTokenError::ServerResponse(ref sr))
                if matches!(sr.error(), BasicErrorResponseType::InvalidGrant) =>
            {
                tracing::warn!("OAuth refresh token considered invalid grant: {}", e);
                Ok(None)
            }
            Err(RequestTokenError::Request(e)) => {
                Err(Error::transport("exchange refresh token", e))
            }
            Err(e) => Err(Error::Authorization(format!("refresh token rejected: {e}"))),
        }
    }

    /// Binds the redirect listener.
    ///
    /// Returns the redirect URL to hand to the provider, and a future that serves the listener
    /// until the provider's redirect arrives. The listener is closed when that future completes
    /// or is dropped.
    async fn setup_redirect(
        &self,
        csrf: CsrfToken,
    ) -> Result<(RedirectUrl, impl Future<Output = Result<AuthorizationCode>>)> {
        let socket = tokio::net::TcpListener::bind(("127.0.0.1", self.port))
            .await
            .map_err(|e| Error::transport(format!("bind redirect listener on port {}", self.port), e))?;
        Ok((
            redirect_url(self.port)?,
            serve_redirect(socket, csrf, CONNECTION_TIMEOUT),
        ))
    }
}

/// The redirect URL names the loopback address the listener is bound to.
fn redirect_url(port: u16) -> Result<RedirectUrl> {
    RedirectUrl::new(format!("http://127.0.0.1:{port}{CALLBACK_PATH}"))
        .map_err(|e| Error::Configuration(format!("construct redirect url: {e}")))
}

/// Accepts connections one at a time until one of them carries the provider's redirect.
///
/// A connection that has not finished within `per_connection` is dropped.
async fn serve_redirect(
    socket: tokio::net::TcpListener,
    csrf: CsrfToken,
    per_connection: Duration,
) -> Result<AuthorizationCode> {
    let (got, mut gotten) = tokio::sync::mpsc::channel(1);
    loop {
        let (conn, peer) = socket
            .accept()
            .await
            .map_err(|e| Error::transport("accept redirect connection", e))?;
        tracing::trace!(%peer, "redirect listener accepted connection");

        let conn = hyper_util::rt::TokioIo::new(conn);
        let csrf = csrf.clone();
        let got = got.clone();
        let service = service_fn(move |req: Request<body::Incoming>| {
            let (response, outcome) = handle_callback(req.uri(), &csrf);
            if let Some(outcome) = outcome {
                let _ = got.try_send(outcome);
            }
            async move { Ok::<_, Infallible>(response) }
        });

        let serving = hyper::server::conn::http1::Builder::new()
            .keep_alive(false)
            .serve_connection(conn, service);
        match tokio::time::timeout(per_connection, serving).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "redirect connection ended with error"),
            Err(_) => tracing::debug!(%peer, "dropping idle redirect connection"),
        }

        if let Ok(outcome) = gotten.try_recv() {
            return outcome;
        }
    }
}

/// Interprets one request to the redirect listener.
///
/// Returns the response to send back, and the outcome of the flow if this request was the
/// provider's redirect.
fn handle_callback(
    uri: &http::Uri,
    csrf: &CsrfToken,
) -> (Response<Full<Bytes>>, Option<Result<AuthorizationCode>>) {
    if uri.path() != CALLBACK_PATH {
        return (respond(StatusCode::NOT_FOUND, "not found"), None);
    }

    let mut presented_state = None;
    let mut presented_code = None;
    let mut presented_error = None;
    for (k, v) in form_urlencoded::parse(uri.query().unwrap_or("").as_bytes()) {
        match &*k {
            "state" => presented_state = Some(v),
            "code" => presented_code = Some(v),
            "error" => presented_error = Some(v),
            _ => {}
        }
    }

    let outcome = if let Some(error) = presented_error {
        Err(Error::Authorization(format!(
            "provider redirected with error: {error}"
        )))
    } else if presented_state.as_deref() != Some(csrf.secret().as_str()) {
        Err(Error::Authorization(
            "redirect carried an invalid CSRF state".to_string(),
        ))
    } else if let Some(code) = presented_code {
        Ok(AuthorizationCode::new(code.into_owned()))
    } else {
        Err(Error::Authorization(
            "redirect carried no authorization code".to_string(),
        ))
    };

    let response = match &outcome {
        Ok(_) => respond(StatusCode::OK, OAUTH_DONE),
        Err(_) => respond(StatusCode::BAD_REQUEST, OAUTH_FAILED),
    };
    (response, Some(outcome))
}

fn respond(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::from(body));
    *response.status_mut() = status;
    response
}

impl AuthorizationFlow for OAuthManager {
    fn source(&self) -> CredentialSource {
        CredentialSource::InteractiveBrowserFlow
    }

    async fn authorize(&self, scopes: &ScopeSet) -> Result<BasicTokenResponse> {
        self.authenticate(scopes).await
    }

    async fn refresh(&self, token: &BasicTokenResponse) -> Result<Option<BasicTokenResponse>> {
        self.refresh_token(token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets(token_uri: String) -> ClientSecrets {
        ClientSecrets {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            auth_uri: "https://accounts.example.com/auth".to_string(),
            token_uri,
        }
    }

    fn uri(s: &str) -> http::Uri {
        s.parse().unwrap()
    }

    #[test]
    fn callback_with_code_and_matching_state_succeeds() {
        let csrf = CsrfToken::new("abc".to_string());
        let (response, outcome) = handle_callback(&uri("/Callback?state=abc&code=4%2Fxyz"), &csrf);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(outcome.unwrap().unwrap().secret(), "4/xyz");
    }

    #[test]
    fn other_paths_do_not_end_the_wait() {
        let csrf = CsrfToken::new("abc".to_string());
        let (response, outcome) = handle_callback(&uri("/favicon.ico"), &csrf);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(outcome.is_none());
    }

    #[test]
    fn denied_consent_is_an_authorization_error() {
        let csrf = CsrfToken::new("abc".to_string());
        let (response, outcome) =
            handle_callback(&uri("/Callback?error=access_denied&state=abc"), &csrf);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let e = outcome.unwrap().unwrap_err();
        assert!(matches!(e, Error::Authorization(ref m) if m.contains("access_denied")));
    }

    #[test]
    fn mismatched_state_is_rejected() {
        let csrf = CsrfToken::new("abc".to_string());
        let (_, outcome) = handle_callback(&uri("/Callback?state=evil&code=c"), &csrf);
        assert!(matches!(outcome, Some(Err(Error::Authorization(_)))));
    }

    #[tokio::test]
    async fn redirect_listener_ignores_noise_and_returns_code() {
        let socket = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let waiting = tokio::spawn(serve_redirect(
            socket,
            CsrfToken::new("st".to_string()),
            CONNECTION_TIMEOUT,
        ));

        let http = reqwest::Client::new();
        let favicon = http
            .get(format!("http://127.0.0.1:{port}/favicon.ico"))
            .send()
            .await
            .unwrap();
        assert_eq!(favicon.status(), StatusCode::NOT_FOUND);

        let callback = http
            .get(format!("http://127.0.0.1:{port}/Callback?state=st&code=the-code"))
            .send()
            .await
            .unwrap();
        assert_eq!(callback.status(), StatusCode::OK);

        let code = waiting.await.unwrap().unwrap();
        assert_eq!(code.secret(), "the-code");
    }

    #[tokio::test]
    async fn refresh_parses_new_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::UrlEncoded(
                "grant_type".into(),
                "refresh_token".into(),
            ))
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "new", "token_type": "Bearer", "expires_in": 3599}"#)
            .create_async()
            .await;

        let manager =
            OAuthManager::new(secrets(format!("{}/token", server.url())), 8081, None).unwrap();
        let old = crate::auth::tests::token("old", Some("r"), 3600);
        let new = manager.refresh_token(&old).await.unwrap().unwrap();
        assert_eq!(new.access_token().secret(), "new");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn invalid_grant_means_reauthorize() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": "invalid_grant", "error_description": "Token has been expired or revoked."}"#)
            .create_async()
            .await;

        let manager =
            OAuthManager::new(secrets(format!("{}/token", server.url())), 8081, None).unwrap();
        let old = crate::auth::tests::token("old", Some("r"), 3600);
        assert!(manager.refresh_token(&old).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn no_refresh_token_means_reauthorize() {
        let manager =
            OAuthManager::new(secrets("https://oauth2.example.com/token".into()), 8081, None)
                .unwrap();
        let old = crate::auth::tests::token("old", None, 3600);
        assert!(manager.refresh_token(&old).await.unwrap().is_none());
    }

    #[test]
    fn redirect_url_uses_the_bound_loopback_address() {
        assert_eq!(
            redirect_url(8081).unwrap().as_str(),
            "http://127.0.0.1:8081/Callback"
        );
    }

    #[tokio::test]
    async fn idle_connection_does_not_block_the_callback() {
        let socket = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let waiting = tokio::spawn(serve_redirect(
            socket,
            CsrfToken::new("st".to_string()),
            Duration::from_millis(200),
        ));

        // Connected first but never sends a request.
        let _idle = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();

        let callback = reqwest::Client::new()
            .get(format!("http://127.0.0.1:{port}/Callback?state=st&code=late"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .unwrap();
        assert_eq!(callback.status(), StatusCode::OK);

        let code = tokio::time::timeout(Duration::from_secs(5), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(code.secret(), "late");
    }
}
