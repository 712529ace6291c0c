use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use url::Url;

use crate::clock::Clock;
use crate::config::RelayConfig;
use crate::error::Error;
use crate::pkce::PkcePair;
use crate::storage::{KeyValueStore, StorageKeys, read_record, write_record};
use crate::traits::IdentityBackend;
use crate::types::{Identity, OtpKind, Session, TokenPair};

/// Identity service endpoint configuration.
///
/// ```rust,ignore
/// let config = BackendConfig::new("https://project.example.com/auth/v1".parse()?, "anon-key");
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct BackendConfig {
    pub(crate) base_url: Url,
    pub(crate) api_key: String,
}

impl BackendConfig {
    #[must_use]
    pub fn new(base_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            base_url,
            api_key: api_key.into(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `SIGNIN_RELAY_AUTH_URL`: identity service base URL
    /// - `SIGNIN_RELAY_API_KEY`: public API key sent as `apikey`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is missing or the URL is invalid.
    pub fn from_env() -> Result<Self, Error> {
        let url_str = std::env::var("SIGNIN_RELAY_AUTH_URL")
            .map_err(|_| Error::Config("SIGNIN_RELAY_AUTH_URL is required".into()))?;
        let base_url: Url = url_str
            .parse()
            .map_err(|e| Error::Config(format!("SIGNIN_RELAY_AUTH_URL: {e}")))?;
        let api_key = std::env::var("SIGNIN_RELAY_API_KEY")
            .map_err(|_| Error::Config("SIGNIN_RELAY_API_KEY is required".into()))?;
        Ok(Self::new(base_url, api_key))
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: UserResponse,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl From<UserResponse> for Identity {
    fn from(user: UserResponse) -> Self {
        Identity::new(user.id, user.email.unwrap_or_default())
    }
}

impl TokenResponse {
    fn into_session(self, now: i64) -> Result<Session, Error> {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| now + secs))
            .ok_or_else(|| Error::InvalidSession("token response has no expiry".into()))?;
        Session::new(
            self.access_token,
            self.refresh_token,
            expires_at,
            self.user.into(),
        )
    }
}

/// [`IdentityBackend`] over a GoTrue-style REST API.
///
/// The current session is persisted through the given [`KeyValueStore`]; that
/// record is what [`SessionStore::has_stored_session`](crate::SessionStore::has_stored_session)
/// observes.
pub struct HttpIdentityBackend {
    config: BackendConfig,
    http: reqwest::Client,
    storage: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    keys: StorageKeys,
}

impl HttpIdentityBackend {
    #[must_use]
    pub fn new(
        config: BackendConfig,
        storage: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        relay: &RelayConfig,
    ) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            storage,
            clock,
            keys: relay.storage_keys(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Provider authorize URL for a PKCE code flow.
    ///
    /// The verifier is stored for the later code exchange, replacing any earlier one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the verifier cannot be stored.
    pub fn authorization_url(&self, provider: &str, redirect_to: &Url) -> Result<Url, Error> {
        let pkce = PkcePair::generate();
        write_record(self.storage.as_ref(), &self.keys.code_verifier(), &pkce.verifier)?;

        let mut url = self.endpoint("authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_to.as_str())
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "s256");
        Ok(url)
    }

    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Config(format!("{} cannot be a base URL", self.config.base_url)))?
            .pop_if_empty()
            .push(path);
        Ok(url)
    }

    fn now(&self) -> i64 {
        self.clock.now().unix_timestamp()
    }

    fn stored_session(&self) -> Option<Session> {
        read_record::<Session>(self.storage.as_ref(), &self.keys.session())
            .filter(|session| session.validate().is_ok())
    }

    fn persist(&self, session: &Session) -> Result<(), Error> {
        write_record(self.storage.as_ref(), &self.keys.session(), session)
    }

    async fn token_request(
        &self,
        grant_type: &str,
        body: JsonValue,
        operation: &'static str,
    ) -> Result<Session, Error> {
        let mut url = self.endpoint("token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);
        self.session_request(url, body, operation).await
    }

    async fn session_request(
        &self,
        url: Url,
        body: JsonValue,
        operation: &'static str,
    ) -> Result<Session, Error> {
        let response = self
            .http
            .post(url)
            .header("apikey", &self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let response = Self::ensure_success(response, operation).await?;
        let session = response
            .json::<TokenResponse>()
            .await?
            .into_session(self.now())?;
        self.persist(&session)?;
        Ok(session)
    }

    async fn refresh_with(&self, refresh_token: &str) -> Result<Session, Error> {
        self.token_request(
            "refresh_token",
            json!({ "refresh_token": refresh_token }),
            "session refresh",
        )
        .await
    }

    async fn get_user(&self, access_token: &str) -> Result<Identity, Error> {
        let response = self
            .http
            .get(self.endpoint("user")?)
            .header("apikey", &self.config.api_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        let response = Self::ensure_success(response, "user lookup").await?;
        Ok(response.json::<UserResponse>().await?.into())
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Backend {
            operation,
            status: Some(status),
            detail: body,
        })
    }
}

impl IdentityBackend for HttpIdentityBackend {
    async fn exchange_code_for_session(&self, code: &str) -> Result<Session, Error> {
        let key = self.keys.code_verifier();
        let verifier = read_record::<String>(self.storage.as_ref(), &key);
        // One-time: the verifier is gone whether or not the exchange succeeds.
        self.storage.remove(&key)?;
        let verifier =
            verifier.ok_or_else(|| Error::backend("code exchange", "no PKCE verifier stored"))?;

        self.token_request(
            "pkce",
            json!({ "auth_code": code, "code_verifier": verifier }),
            "code exchange",
        )
        .await
    }

    async fn set_session(&self, tokens: TokenPair) -> Result<Session, Error> {
        match jwt_expiry(&tokens.access_token) {
            Some(expires_at) if expires_at > self.now() => {
                let identity = self.get_user(&tokens.access_token).await?;
                let session =
                    Session::new(tokens.access_token, tokens.refresh_token, expires_at, identity)?;
                self.persist(&session)?;
                Ok(session)
            }
            _ => {
                tracing::debug!("Supplied access token expired or unreadable, refreshing");
                self.refresh_with(&tokens.refresh_token).await
            }
        }
    }

    async fn verify_otp(&self, token_hash: &str, kind: OtpKind) -> Result<Session, Error> {
        let url = self.endpoint("verify")?;
        self.session_request(
            url,
            json!({ "type": kind, "token_hash": token_hash }),
            "OTP verification",
        )
        .await
    }

    async fn get_session(&self) -> Result<Option<Session>, Error> {
        Ok(self.stored_session())
    }

    async fn refresh_session(&self) -> Result<Session, Error> {
        let session = self
            .stored_session()
            .ok_or_else(|| Error::backend("session refresh", "no session to refresh"))?;
        self.refresh_with(&session.refresh_token).await
    }

    async fn sign_out(&self) -> Result<(), Error> {
        if let Some(session) = self.stored_session() {
            let result = match self.endpoint("logout") {
                Ok(url) => self
                    .http
                    .post(url)
                    .header("apikey", &self.config.api_key)
                    .bearer_auth(&session.access_token)
                    .send()
                    .await
                    .map_err(Error::from),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "Remote sign-out failed, clearing local session anyway");
            }
        }
        self.storage.remove(&self.keys.session())
    }
}

/// Reads the `exp` claim of a JWT without verifying it.
fn jwt_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice::<JsonValue>(&bytes)
        .ok()?
        .get("exp")?
        .as_i64()
}
