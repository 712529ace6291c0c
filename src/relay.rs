use std::sync::Arc;

use crate::callback::{CallbackExchanger, ExchangeOutcome};
use crate::clock::Clock;
use crate::config::RelayConfig;
use crate::error::Error;
use crate::logout::LogoutMemento;
use crate::quick_login::{CachedUser, QuickLoginCache};
use crate::redirect::{Normalized, RedirectNormalizer};
use crate::session::SessionStore;
use crate::state::AuthStateCell;
use crate::storage::KeyValueStore;
use crate::traits::{IdentityBackend, Navigator, SessionProbe};
use crate::types::{Session, UserId};

/// Wires the relay components to one host.
///
/// ```rust,ignore
/// let relay = AuthRelay::new(backend, navigator, storage, Arc::new(SystemClock), config);
/// relay.bootstrap().await;
/// // on every route change:
/// relay.on_route_change();
/// ```
pub struct AuthRelay<B, N> {
    backend: Arc<B>,
    navigator: Arc<N>,
    config: RelayConfig,
    sessions: SessionStore<B>,
    quick_login: Arc<QuickLoginCache>,
    logout: Arc<LogoutMemento>,
    state: AuthStateCell,
}

// Manual Clone: avoid derive adding `B: Clone, N: Clone` bounds.
impl<B, N> Clone for AuthRelay<B, N> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            navigator: self.navigator.clone(),
            config: self.config.clone(),
            sessions: self.sessions.clone(),
            quick_login: self.quick_login.clone(),
            logout: self.logout.clone(),
            state: self.state.clone(),
        }
    }
}

impl<B: IdentityBackend, N: Navigator> AuthRelay<B, N> {
    #[must_use]
    pub fn new(
        backend: Arc<B>,
        navigator: Arc<N>,
        storage: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: RelayConfig,
    ) -> Self {
        Self {
            sessions: SessionStore::new(backend.clone(), storage.clone(), clock.clone(), &config),
            quick_login: Arc::new(QuickLoginCache::new(storage.clone(), clock.clone(), &config)),
            logout: Arc::new(LogoutMemento::new(storage, clock, &config)),
            state: AuthStateCell::new(),
            backend,
            navigator,
            config,
        }
    }

    #[must_use]
    pub fn state(&self) -> &AuthStateCell {
        &self.state
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore<B> {
        &self.sessions
    }

    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Restores a persisted session, if any, and publishes the result.
    pub async fn bootstrap(&self) -> Option<Session> {
        let session = self.sessions.initialize().await;
        match &session {
            Some(session) => self.state.set_signed_in(session.identity.clone()),
            None => self.state.set_signed_out(),
        }
        session
    }

    /// Normalizes the current URL. Call on every route change.
    pub fn on_route_change(&self) -> Normalized {
        let probe: Arc<dyn SessionProbe> = Arc::new(self.sessions.clone());
        RedirectNormalizer::new(self.navigator.clone(), probe, self.config.clone())
            .evaluate(self.state.user_present())
    }

    /// A fresh exchanger for one callback page life.
    #[must_use]
    pub fn callback_exchanger(&self) -> CallbackExchanger<B, N> {
        CallbackExchanger::new(self.backend.clone(), self.navigator.clone(), self.config.clone())
    }

    /// Runs `exchanger` and publishes the outcome.
    pub async fn complete_callback(
        &self,
        exchanger: &CallbackExchanger<B, N>,
    ) -> Option<ExchangeOutcome> {
        let outcome = exchanger.run().await?;
        match &outcome {
            ExchangeOutcome::SignedIn { session, .. } => {
                self.state.set_signed_in(session.identity.clone());
            }
            ExchangeOutcome::Failed { reason, .. } => self.state.set_error(reason.clone()),
            ExchangeOutcome::NothingToDo => {}
        }
        Some(outcome)
    }

    /// A fresh redeemer for one QR landing page life.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no redemption endpoint is configured.
    #[cfg(feature = "http")]
    pub fn qr_redeemer(&self) -> Result<crate::qr::QrRedeemer<B, N>, Error> {
        let endpoint = self
            .config
            .qr_redeem_url()
            .cloned()
            .ok_or_else(|| Error::Config("qr_redeem_url is not configured".into()))?;
        Ok(crate::qr::QrRedeemer::new(
            endpoint,
            self.backend.clone(),
            self.navigator.clone(),
            self.config.clone(),
        ))
    }

    /// Runs `redeemer` for `token` and publishes the outcome.
    ///
    /// A link redirect leaves the state alone; the callback route it lands
    /// on publishes the identity.
    #[cfg(feature = "http")]
    pub async fn complete_qr(
        &self,
        redeemer: &crate::qr::QrRedeemer<B, N>,
        token: crate::types::QrToken,
    ) -> Option<crate::qr::RedeemPhase> {
        use crate::qr::RedeemPhase;

        let phase = redeemer.redeem(token).await?;
        match &phase {
            RedeemPhase::Success(Some(session)) => {
                self.state.set_signed_in(session.identity.clone());
            }
            RedeemPhase::Error(message) => self.state.set_error(message.clone()),
            _ => {}
        }
        Some(phase)
    }

    /// Adds the signed-in profile to the quick-login list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the list cannot be written.
    pub fn remember_user(&self, user: CachedUser) -> Result<(), Error> {
        self.quick_login.save(user)
    }

    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the list cannot be written.
    pub fn forget_user(&self, id: &UserId) -> Result<(), Error> {
        self.quick_login.remove(id)
    }

    /// Entries still eligible for one-tap re-login, newest first.
    #[must_use]
    pub fn quick_login_candidates(&self) -> Vec<CachedUser> {
        self.quick_login.usable()
    }

    #[must_use]
    pub fn quick_login(&self) -> &QuickLoginCache {
        &self.quick_login
    }

    /// Remembers who left, ends the backend session, and resets state.
    ///
    /// State is reset even when the backend call fails.
    ///
    /// # Errors
    ///
    /// Returns the backend error after local state has been cleared.
    pub async fn sign_out(&self) -> Result<(), Error> {
        if let Some(user) = self.state.snapshot().user {
            if let Err(e) = self.logout.record(user.email.clone()) {
                tracing::warn!(error = %e, "Failed to record logout");
            }
        }
        let result = self.backend.sign_out().await;
        self.state.set_signed_out();
        match &result {
            Ok(()) => tracing::info!("Signed out"),
            Err(e) => tracing::error!(error = %e, "Backend sign-out failed"),
        }
        result
    }

    /// Whether the entry screen should offer to sign the last user back in.
    #[must_use]
    pub fn should_offer_relogin(&self) -> bool {
        self.logout.should_prompt()
    }

    #[must_use]
    pub fn logout_memento(&self) -> &LogoutMemento {
        &self.logout
    }
}
