//! Credential acquisition and caching.
//!
//! The [`Authorizer`] looks up a cached [`Credential`] in the [`FileTokenStore`], refreshes it
//! if it has expired, and only falls back to its [`AuthorizationFlow`] when there is nothing
//! usable on disk. Whatever the flow produces is persisted before it is handed out, so the next
//! run can skip the browser.

use crate::error::Result;
use crate::token_store::FileTokenStore;
use jiff::{SignedDuration, Timestamp};
use oauth2::basic::BasicTokenResponse;
use oauth2::{AccessToken, Scope, TokenResponse};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Safety margin subtracted from a token's advertised lifetime.
const EXPIRY_BUFFER: SignedDuration = SignedDuration::from_secs(300);

/// Lifetime assumed for tokens that do not say when they expire.
const DEFAULT_LIFETIME: SignedDuration = SignedDuration::from_secs(3300);

/// Ordered set of OAuth scopes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(Vec<String>);

impl ScopeSet {
    /// Full read/write access to the user's YouTube account.
    pub fn youtube() -> Self {
        [
            "https://www.googleapis.com/auth/youtube",
            "https://www.googleapis.com/auth/youtube.force-ssl",
        ]
        .into_iter()
        .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every scope in `requested` is also in `self`.
    pub fn covers(&self, requested: &ScopeSet) -> bool {
        requested.iter().all(|s| self.0.iter().any(|have| have == s))
    }

    pub fn to_oauth_scopes(&self) -> impl Iterator<Item = Scope> + '_ {
        self.iter().map(|s| Scope::new(s.to_string()))
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut scopes: Vec<String> = Vec::new();
        for scope in iter {
            let scope = scope.into();
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }
        Self(scopes)
    }
}

/// Where the credential handed out by [`Authorizer::authorize`] came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CredentialSource {
    /// Read from the token store and still valid.
    #[default]
    CachedToken,
    /// Read from the token store and refreshed.
    Refreshed,
    /// Obtained through the browser and the local redirect listener.
    InteractiveBrowserFlow,
    /// Supplied by configuration.
    PreProvisionedToken,
}

/// An OAuth token together with when it stops being usable and what it grants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    token: BasicTokenResponse,
    expires_at: Timestamp,
    scopes: ScopeSet,
    #[serde(skip)]
    source: CredentialSource,
}

impl Credential {
    /// Wraps a token that was issued just now for `requested` scopes.
    pub fn new(token: BasicTokenResponse, requested: &ScopeSet) -> Self {
        Self::issued_at(token, requested, Timestamp::now())
    }

    pub(crate) fn issued_at(
        token: BasicTokenResponse,
        requested: &ScopeSet,
        issued: Timestamp,
    ) -> Self {
        // The provider may narrow the grant; trust what it says over what we asked for.
        let scopes = match token.scopes() {
            Some(granted) if !granted.is_empty() => granted.iter().map(|s| s.as_str()).collect(),
            _ => requested.clone(),
        };
        Self {
            expires_at: expiry(&token, issued),
            token,
            scopes,
            source: CredentialSource::default(),
        }
    }

    pub fn access_token(&self) -> &AccessToken {
        self.token.access_token()
    }

    pub fn raw_token(&self) -> &BasicTokenResponse {
        &self.token
    }

    pub fn expires_at(&self) -> Timestamp {
        self.expires_at
    }

    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn is_expired(&self) -> bool {
        Timestamp::now() >= self.expires_at
    }

    pub fn is_refreshable(&self) -> bool {
        self.token.refresh_token().is_some()
    }

    fn with_source(mut self, source: CredentialSource) -> Self {
        self.source = source;
        self
    }

    /// Replaces the token with a refreshed one, keeping the refresh token if the provider did
    /// not issue a new one.
    fn refreshed(self, mut token: BasicTokenResponse) -> Self {
        if token.refresh_token().is_none() {
            tracing::trace!("new token lacks refresh token, keeping the previous one");
            token.set_refresh_token(self.token.refresh_token().cloned());
        }
        Self::issued_at(token, &self.scopes, Timestamp::now())
    }
}

fn expiry(token: &BasicTokenResponse, issued: Timestamp) -> Timestamp {
    let lifetime = match token.expires_in() {
        Some(expires_in) => lifetime_from(expires_in),
        None => DEFAULT_LIFETIME,
    };
    issued.checked_add(lifetime).unwrap_or(Timestamp::MAX)
}

fn lifetime_from(expires_in: Duration) -> SignedDuration {
    let secs = i64::try_from(expires_in.as_secs()).unwrap_or(i64::MAX);
    SignedDuration::from_secs(secs)
        .checked_sub(EXPIRY_BUFFER)
        .unwrap_or(SignedDuration::ZERO)
        .max(SignedDuration::ZERO)
}

/// A way of obtaining tokens when the cache has nothing usable.
#[allow(async_fn_in_trait)]
pub trait AuthorizationFlow {
    /// Which [`CredentialSource`] tokens from [`Self::authorize`] are reported as.
    fn source(&self) -> CredentialSource;

    /// Obtains a new token covering `scopes`, interacting with the user if need be.
    async fn authorize(&self, scopes: &ScopeSet) -> Result<BasicTokenResponse>;

    /// Exchanges the refresh token held by `token` for a new access token.
    ///
    /// Returns `Ok(None)` if the grant is no longer valid and the user has to authorize again.
    async fn refresh(&self, token: &BasicTokenResponse) -> Result<Option<BasicTokenResponse>>;
}

/// A flow that always hands out one fixed token.
#[derive(Debug, Clone)]
pub struct PreProvisionedToken {
    token: BasicTokenResponse,
}

impl PreProvisionedToken {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            token: BasicTokenResponse::new(
                AccessToken::new(access_token.into()),
                oauth2::basic::BasicTokenType::Bearer,
                oauth2::EmptyExtraTokenFields {},
            ),
        }
    }
}

impl AuthorizationFlow for PreProvisionedToken {
    fn source(&self) -> CredentialSource {
        CredentialSource::PreProvisionedToken
    }

    async fn authorize(&self, _scopes: &ScopeSet) -> Result<BasicTokenResponse> {
        Ok(self.token.clone())
    }

    async fn refresh(&self, _token: &BasicTokenResponse) -> Result<Option<BasicTokenResponse>> {
        Ok(None)
    }
}

/// Hands out credentials, preferring the on-disk cache over the authorization flow.
#[derive(Debug)]
pub struct Authorizer<F> {
    flow: F,
    store: Option<FileTokenStore>,
    user: String,
}

impl<F: AuthorizationFlow> Authorizer<F> {
    /// An authorizer that caches credentials for `user` in `store`.
    pub fn new(flow: F, store: FileTokenStore, user: impl Into<String>) -> Self {
        Self {
            flow,
            store: Some(store),
            user: user.into(),
        }
    }

    /// An authorizer that neither reads nor writes a token store.
    pub fn uncached(flow: F) -> Self {
        Self {
            flow,
            store: None,
            user: String::new(),
        }
    }

    /// Returns a usable credential for `scopes`, caching it under `datastore`.
    #[tracing::instrument(skip(self, scopes), fields(user = %self.user))]
    pub async fn authorize(&self, scopes: &ScopeSet, datastore: &str) -> Result<Credential> {
        if let Some(store) = &self.store {
            if let Some(cached) = store.load(datastore, &self.user).await? {
                if let Some(credential) = self.reuse(cached, scopes).await? {
                    if credential.source() == CredentialSource::Refreshed {
                        store.save(datastore, &self.user, &credential).await?;
                    }
                    return Ok(credential);
                }
            }
        }

        tracing::info!("no usable cached credential, running authorization flow");
        let token = self.flow.authorize(scopes).await?;
        let credential = Credential::new(token, scopes).with_source(self.flow.source());
        if let Some(store) = &self.store {
            store.save(datastore, &self.user, &credential).await?;
        }
        Ok(credential)
    }

    /// Decides whether a cached credential can be handed out, refreshing it if necessary.
    async fn reuse(&self, cached: Credential, scopes: &ScopeSet) -> Result<Option<Credential>> {
        if !cached.scopes().covers(scopes) {
            tracing::info!("cached credential does not cover requested scopes");
            return Ok(None);
        }
        if !cached.is_expired() {
            tracing::debug!(expires_at = %cached.expires_at(), "reusing cached credential");
            return Ok(Some(cached.with_source(CredentialSource::CachedToken)));
        }
        if !cached.is_refreshable() {
            tracing::warn!("cached credential expired and has no refresh token");
            return Ok(None);
        }

        tracing::debug!("cached credential expired, attempting refresh");
        match self.flow.refresh(cached.raw_token()).await? {
            Some(token) => {
                tracing::debug!("successfully refreshed OAuth token");
                Ok(Some(
                    cached
                        .refreshed(token)
                        .with_source(CredentialSource::Refreshed),
                ))
            }
            None => Ok(None),
        }
    }
}
