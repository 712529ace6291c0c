use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use reqwest::header::CONTENT_TYPE;
use serde_json::Value as JsonValue;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

use super::response::{Redemption, error_message};
use crate::config::RelayConfig;
use crate::error::Error;
use crate::traits::{IdentityBackend, Navigator};
use crate::types::{QrToken, Session};

/// Redeemer page state: `Qr → Auth → Success | Error`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RedeemPhase {
    #[default]
    Qr,
    Auth,
    /// Carries the session when tokens were activated in place; `None` when
    /// the browser was sent to a sign-in link instead.
    Success(Option<Session>),
    /// Human-readable message; navigation home follows after a delay.
    Error(String),
}

/// Exchanges a QR token for a session via the redemption endpoint.
///
/// One redemption per page life, guarded like the callback exchanger. Once the
/// token is sent the request runs to completion even if the page goes away.
pub struct QrRedeemer<B, N> {
    http: reqwest::Client,
    endpoint: Url,
    backend: Arc<B>,
    navigator: Arc<N>,
    config: RelayConfig,
    phase: Arc<watch::Sender<RedeemPhase>>,
    alive: Arc<AtomicBool>,
    pending_home: Arc<Mutex<Option<JoinHandle<()>>>>,
}

// Manual Clone: avoid derive adding `B: Clone, N: Clone` bounds.
impl<B, N> Clone for QrRedeemer<B, N> {
    fn clone(&self) -> Self {
        Self {
            http: self.http.clone(),
            endpoint: self.endpoint.clone(),
            backend: self.backend.clone(),
            navigator: self.navigator.clone(),
            config: self.config.clone(),
            phase: self.phase.clone(),
            alive: self.alive.clone(),
            pending_home: self.pending_home.clone(),
        }
    }
}

impl<B: IdentityBackend, N: Navigator> QrRedeemer<B, N> {
    #[must_use]
    pub fn new(endpoint: Url, backend: Arc<B>, navigator: Arc<N>, config: RelayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            backend,
            navigator,
            config,
            phase: Arc::new(watch::Sender::new(RedeemPhase::Qr)),
            alive: Arc::new(AtomicBool::new(true)),
            pending_home: Arc::new(Mutex::new(None)),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn phase(&self) -> RedeemPhase {
        self.phase.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RedeemPhase> {
        self.phase.subscribe()
    }

    /// Marks the page as gone and cancels a pending error redirect.
    pub fn teardown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(handle) = self.lock_pending().take() {
            handle.abort();
        }
    }

    /// Redeems `token` once. Returns `None` if this page life already did.
    pub async fn redeem(&self, token: QrToken) -> Option<RedeemPhase> {
        let claimed = self.phase.send_if_modified(|phase| {
            if *phase == RedeemPhase::Qr {
                *phase = RedeemPhase::Auth;
                true
            } else {
                false
            }
        });
        if !claimed {
            tracing::debug!("QR redemption already claimed, skipping");
            return None;
        }

        let this = self.clone();
        match tokio::spawn(async move { this.complete(token).await }).await {
            Ok(phase) => Some(phase),
            Err(e) => Some(self.fail(&format!("unexpected failure: {e}"))),
        }
    }

    async fn complete(&self, token: QrToken) -> RedeemPhase {
        let redemption = match self.request(&token).await {
            Ok(redemption) => redemption,
            Err(e) => {
                tracing::error!(error = %e, "QR redemption failed");
                return self.fail(&user_message(&e));
            }
        };

        match redemption {
            Redemption::TokenPair(tokens) => match self.backend.set_session(tokens).await {
                Ok(session) => {
                    tracing::info!(user_id = %session.identity.id, "QR sign-in activated session");
                    let phase = RedeemPhase::Success(Some(session));
                    self.phase.send_replace(phase.clone());
                    if self.is_alive() {
                        self.navigator.soft_replace(&self.config.home_path);
                    }
                    phase
                }
                Err(e) => {
                    tracing::error!(error = %e, "Activating QR session failed");
                    self.fail("Sign-in could not be completed. Please scan again.")
                }
            },
            link => {
                let href = link.link().unwrap_or(self.config.home_path.as_str()).to_owned();
                tracing::info!(kind = link.kind(), "QR sign-in following link");
                self.phase.send_replace(RedeemPhase::Success(None));
                if self.is_alive() {
                    self.navigator.hard_navigate(&href);
                }
                RedeemPhase::Success(None)
            }
        }
    }

    async fn request(&self, token: &QrToken) -> Result<Redemption, Error> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&serde_json::json!({ "token": token.as_str() }))
            .send()
            .await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        if !content_type.to_ascii_lowercase().contains("json") {
            return Err(Error::NotJson { content_type });
        }

        let body: JsonValue = response.json().await?;
        if !status.is_success() {
            return Err(Error::Redemption(
                error_message(&body).unwrap_or_else(|| format!("server returned {status}")),
            ));
        }
        Redemption::parse(&body)
    }

    fn fail(&self, message: &str) -> RedeemPhase {
        let phase = RedeemPhase::Error(message.to_owned());
        self.phase.send_replace(phase.clone());
        if self.is_alive() {
            let navigator = self.navigator.clone();
            let alive = self.alive.clone();
            let home = self.config.home_path.clone();
            let delay = self.config.error_redirect_delay;
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if alive.load(Ordering::SeqCst) {
                    navigator.hard_navigate(&home);
                }
            });
            if let Some(previous) = self.lock_pending().replace(handle) {
                previous.abort();
            }
        }
        phase
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending_home.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

const UNEXPECTED_RESPONSE: &str =
    "The sign-in service returned an unexpected response. Please try again later.";

fn user_message(error: &Error) -> String {
    match error {
        Error::NotJson { .. } => UNEXPECTED_RESPONSE.into(),
        Error::Http(e) if e.is_decode() => UNEXPECTED_RESPONSE.into(),
        Error::Http(_) => "Could not reach the sign-in service. Check your connection.".into(),
        Error::Redemption(message) => message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::mocks::{BackendCall, MockIdentityBackend, Nav, RecordingNavigator};
    use crate::types::TokenPair;

    const TOKEN: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    struct Fixture {
        server: MockServer,
        redeemer: QrRedeemer<MockIdentityBackend, RecordingNavigator>,
        backend: Arc<MockIdentityBackend>,
        navigator: Arc<RecordingNavigator>,
    }

    async fn fixture(response: ResponseTemplate) -> Fixture {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth-by-qr-token"))
            .and(body_json(json!({ "token": TOKEN })))
            .respond_with(response)
            .mount(&server)
            .await;

        let backend = Arc::new(MockIdentityBackend::new());
        let navigator = Arc::new(RecordingNavigator::at(&format!("/qr-login/{TOKEN}")));
        let endpoint = format!("{}/auth-by-qr-token", server.uri()).parse().unwrap();
        let config = RelayConfig::default().with_error_redirect_delay(Duration::from_millis(20));
        let redeemer = QrRedeemer::new(endpoint, backend.clone(), navigator.clone(), config);
        Fixture {
            server,
            redeemer,
            backend,
            navigator,
        }
    }

    fn token() -> QrToken {
        TOKEN.parse().unwrap()
    }

    #[tokio::test]
    async fn redirect_url_triggers_full_navigation() {
        let url = format!("https://x/auth/callback?token={TOKEN}&type=magiclink");
        let f = fixture(
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "redirectUrl": url})),
        )
        .await;

        assert_eq!(f.redeemer.redeem(token()).await, Some(RedeemPhase::Success(None)));
        assert_eq!(f.navigator.events(), vec![Nav::Hard(url)]);
        assert!(f.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn token_pair_activates_session_and_soft_returns() {
        let f = fixture(ResponseTemplate::new(200).set_body_json(
            json!({"success": true, "accessToken": "a", "refreshToken": "b"}),
        ))
        .await;

        let Some(RedeemPhase::Success(Some(session))) = f.redeemer.redeem(token()).await else {
            panic!("expected an activated session");
        };
        assert_eq!(session.identity.email, "ada@example.com");
        assert_eq!(f.redeemer.phase(), RedeemPhase::Success(Some(session)));
        assert_eq!(
            f.backend.calls(),
            vec![BackendCall::SetSession(TokenPair::new("a", "b"))]
        );
        assert_eq!(f.navigator.events(), vec![Nav::SoftReplace("/".into())]);
    }

    #[tokio::test]
    async fn generic_link_fields_navigate() {
        let f = fixture(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true, "action_link": "https://x/verify?t=1"})),
        )
        .await;
        f.redeemer.redeem(token()).await;
        assert_eq!(f.navigator.events(), vec![Nav::Hard("https://x/verify?t=1".into())]);

        let f = fixture(
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "url": "https://x/u"})),
        )
        .await;
        f.redeemer.redeem(token()).await;
        assert_eq!(f.navigator.events(), vec![Nav::Hard("https://x/u".into())]);
    }

    #[tokio::test]
    async fn unknown_shape_errors_then_returns_home() {
        let f = fixture(ResponseTemplate::new(200).set_body_json(json!({"success": true}))).await;

        let phase = f.redeemer.redeem(token()).await.unwrap();
        assert!(matches!(phase, RedeemPhase::Error(_)));
        assert!(f.navigator.events().is_empty());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.navigator.events(), vec![Nav::Hard("/".into())]);
    }

    #[tokio::test]
    async fn html_response_is_a_format_error() {
        let f = fixture(
            ResponseTemplate::new(200).set_body_raw("<html>Not Found</html>", "text/html"),
        )
        .await;

        let phase = f.redeemer.redeem(token()).await.unwrap();
        assert_eq!(
            phase,
            RedeemPhase::Error(
                "The sign-in service returned an unexpected response. Please try again later."
                    .into()
            )
        );
    }

    #[tokio::test]
    async fn malformed_json_body_is_a_format_error() {
        let f = fixture(ResponseTemplate::new(200).set_body_raw("{oops", "application/json")).await;

        assert_eq!(
            f.redeemer.redeem(token()).await,
            Some(RedeemPhase::Error(UNEXPECTED_RESPONSE.into()))
        );
    }

    #[tokio::test]
    async fn server_error_message_is_surfaced() {
        let f = fixture(
            ResponseTemplate::new(404).set_body_json(json!({"error": "QR code is no longer active"})),
        )
        .await;
        assert_eq!(
            f.redeemer.redeem(token()).await,
            Some(RedeemPhase::Error("QR code is no longer active".into()))
        );
    }

    #[tokio::test]
    async fn activation_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth-by-qr-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"success": true, "accessToken": "a", "refreshToken": "b"}),
            ))
            .mount(&server)
            .await;
        let backend = Arc::new(MockIdentityBackend::new().failing(&["set_session"]));
        let navigator = Arc::new(RecordingNavigator::at("/"));
        let redeemer = QrRedeemer::new(
            format!("{}/auth-by-qr-token", server.uri()).parse().unwrap(),
            backend,
            navigator.clone(),
            RelayConfig::default().with_error_redirect_delay(Duration::from_millis(10)),
        );

        assert!(matches!(redeemer.redeem(token()).await, Some(RedeemPhase::Error(_))));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(navigator.events(), vec![Nav::Hard("/".into())]);
    }

    #[tokio::test]
    async fn redeems_only_once_per_page_life() {
        let f = fixture(
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "url": "https://x/u"})),
        )
        .await;

        assert!(f.redeemer.redeem(token()).await.is_some());
        assert!(f.redeemer.clone().redeem(token()).await.is_none());

        let requests = f.server.received_requests().await.unwrap_or_default();
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn teardown_cancels_pending_home_redirect() {
        let f = fixture(ResponseTemplate::new(500).set_body_json(json!({"error": "boom"}))).await;

        assert!(matches!(f.redeemer.redeem(token()).await, Some(RedeemPhase::Error(_))));
        f.redeemer.teardown();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.navigator.events().is_empty());
    }
}
