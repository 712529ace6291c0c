//! The canonical callback route: one exchange per page life.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

use crate::config::RelayConfig;
use crate::error::Error;
use crate::location::Location;
use crate::redirect::{AuthShape, strip_shape_params};
use crate::traits::{IdentityBackend, Navigator};
use crate::types::{OtpKind, Session, TokenPair};

/// Backend call chosen for a callback URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeMethod {
    AuthorizationCode,
    TokenPair,
    MagicLink,
}

impl ExchangeMethod {
    /// URL shape whose parameters this exchange consumes.
    #[must_use]
    pub fn shape(self) -> AuthShape {
        match self {
            Self::AuthorizationCode => AuthShape::AuthorizationCode,
            Self::TokenPair => AuthShape::ImplicitToken,
            Self::MagicLink => AuthShape::MagicLink,
        }
    }
}

/// A recognized callback payload, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeRequest {
    AuthorizationCode(String),
    TokenPair(TokenPair),
    MagicLink(String),
}

impl ExchangeRequest {
    /// Picks the first applicable exchange: code, then token pair, then token hash.
    #[must_use]
    pub fn from_location(location: &Location) -> Option<Self> {
        let search = location.search_params();
        let hash = location.hash_params();
        let find = |key: &str| search.non_empty(key).or_else(|| hash.non_empty(key));

        if let Some(code) = search.non_empty("code") {
            return Some(Self::AuthorizationCode(code.to_owned()));
        }
        if let (Some(access), Some(refresh)) = (find("access_token"), find("refresh_token")) {
            return Some(Self::TokenPair(TokenPair::new(access, refresh)));
        }
        find("token_hash")
            .or_else(|| find("token"))
            .map(|hash| Self::MagicLink(hash.to_owned()))
    }

    #[must_use]
    pub fn method(&self) -> ExchangeMethod {
        match self {
            Self::AuthorizationCode(_) => ExchangeMethod::AuthorizationCode,
            Self::TokenPair(_) => ExchangeMethod::TokenPair,
            Self::MagicLink(_) => ExchangeMethod::MagicLink,
        }
    }

    async fn send<B: IdentityBackend>(self, backend: &B) -> Result<Session, Error> {
        match self {
            Self::AuthorizationCode(code) => backend.exchange_code_for_session(&code).await,
            Self::TokenPair(tokens) => backend.set_session(tokens).await,
            Self::MagicLink(hash) => backend.verify_otp(&hash, OtpKind::MagicLink).await,
        }
    }
}

/// How a callback page life ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Session established; URL cleaned and soft return to the app.
    SignedIn {
        method: ExchangeMethod,
        session: Session,
    },
    /// Backend rejected the parameters, or the exchange crashed; hard navigation home.
    Failed {
        method: Option<ExchangeMethod>,
        reason: String,
    },
    /// No recognized parameters; hard navigation home.
    NothingToDo,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExchangePhase {
    #[default]
    Idle,
    Exchanging,
    Done(ExchangeOutcome),
}

/// Owns the callback route for one page life.
///
/// The first [`run`](Self::run) moves `Idle → Exchanging` atomically; any later
/// or concurrent call (clones included) is a no-op. Once claimed, the exchange
/// runs on its own task: dropping the `run` future does not abort the backend
/// call, and the outcome is always recorded in [`phase`](Self::phase).
/// After [`teardown`](Self::teardown) the outcome is still recorded but no URL
/// rewrite or navigation is applied.
pub struct CallbackExchanger<B, N> {
    backend: Arc<B>,
    navigator: Arc<N>,
    config: RelayConfig,
    phase: Arc<watch::Sender<ExchangePhase>>,
    alive: Arc<AtomicBool>,
}

// Manual Clone: avoid derive adding `B: Clone, N: Clone` bounds.
impl<B, N> Clone for CallbackExchanger<B, N> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            navigator: self.navigator.clone(),
            config: self.config.clone(),
            phase: self.phase.clone(),
            alive: self.alive.clone(),
        }
    }
}

impl<B: IdentityBackend, N: Navigator> CallbackExchanger<B, N> {
    #[must_use]
    pub fn new(backend: Arc<B>, navigator: Arc<N>, config: RelayConfig) -> Self {
        Self {
            backend,
            navigator,
            config,
            phase: Arc::new(watch::Sender::new(ExchangePhase::Idle)),
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    #[must_use]
    pub fn phase(&self) -> ExchangePhase {
        self.phase.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ExchangePhase> {
        self.phase.subscribe()
    }

    /// Marks the page as gone. In-flight exchanges finish but apply nothing.
    pub fn teardown(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Runs the exchange once. Returns `None` if this page life already claimed it.
    pub async fn run(&self) -> Option<ExchangeOutcome> {
        let claimed = self.phase.send_if_modified(|phase| {
            if *phase == ExchangePhase::Idle {
                *phase = ExchangePhase::Exchanging;
                true
            } else {
                false
            }
        });
        if !claimed {
            tracing::debug!("Callback exchange already claimed, skipping");
            return None;
        }

        let this = self.clone();
        match tokio::spawn(async move { this.exchange().await }).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!(error = %e, "Callback orchestration crashed");
                Some(self.finish(None, format!("unexpected failure: {e}")))
            }
        }
    }

    async fn exchange(&self) -> ExchangeOutcome {
        let location = self.navigator.location();

        let Some(request) = ExchangeRequest::from_location(&location) else {
            tracing::debug!("Callback route without authentication parameters");
            if self.is_alive() {
                self.navigator.hard_navigate(&self.config.home_path);
            }
            return self.record(ExchangeOutcome::NothingToDo);
        };

        let method = request.method();
        let backend = self.backend.clone();
        // Own task so a panic in the backend surfaces as a JoinError instead of
        // leaving the page stuck in `Exchanging`.
        let result = tokio::spawn(async move { request.send(backend.as_ref()).await }).await;

        match result {
            Ok(Ok(session)) => {
                tracing::info!(?method, user_id = %session.identity.id, "Callback exchange succeeded");
                if self.is_alive() {
                    self.navigator.replace_url(&strip_shape_params(&location, method.shape()));
                    self.navigator.soft_replace(&self.config.home_path);
                }
                self.record(ExchangeOutcome::SignedIn { method, session })
            }
            Ok(Err(e)) => {
                tracing::error!(?method, error = %e, "Callback exchange failed");
                self.finish(Some(method), e.to_string())
            }
            Err(e) => {
                tracing::error!(?method, error = %e, "Callback exchange crashed");
                self.finish(Some(method), format!("unexpected failure: {e}"))
            }
        }
    }

    fn finish(&self, method: Option<ExchangeMethod>, reason: String) -> ExchangeOutcome {
        if self.is_alive() {
            self.navigator.hard_navigate(&self.config.home_path);
        }
        self.record(ExchangeOutcome::Failed { method, reason })
    }

    fn record(&self, outcome: ExchangeOutcome) -> ExchangeOutcome {
        self.phase.send_replace(ExchangePhase::Done(outcome.clone()));
        outcome
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}
