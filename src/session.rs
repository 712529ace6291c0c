//! Session recovery across reloads, with proactive refresh.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::RelayConfig;
use crate::storage::{KeyValueStore, read_record};
use crate::traits::{IdentityBackend, SessionProbe};
use crate::types::Session;

/// Wraps the identity backend for restore-on-load.
///
/// Restoration never fabricates a session: it reports only what the backend
/// holds, refreshed first when it is close to expiry.
pub struct SessionStore<B> {
    backend: Arc<B>,
    storage: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    session_key: String,
    refresh_threshold: time::Duration,
}

impl<B> Clone for SessionStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            storage: self.storage.clone(),
            clock: self.clock.clone(),
            session_key: self.session_key.clone(),
            refresh_threshold: self.refresh_threshold,
        }
    }
}

impl<B: IdentityBackend> SessionStore<B> {
    #[must_use]
    pub fn new(
        backend: Arc<B>,
        storage: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: &RelayConfig,
    ) -> Self {
        Self {
            backend,
            storage,
            clock,
            session_key: config.storage_keys().session(),
            refresh_threshold: time::Duration::try_from(config.refresh_threshold)
                .unwrap_or(time::Duration::MAX),
        }
    }

    /// Read-only check for a well-formed persisted session. Never mutates storage.
    #[must_use]
    pub fn has_stored_session(&self) -> bool {
        read_record::<Session>(self.storage.as_ref(), &self.session_key)
            .is_some_and(|session| session.validate().is_ok())
    }

    /// Time left on `session` according to the store's clock.
    #[must_use]
    pub fn time_to_expiry(&self, session: &Session) -> time::Duration {
        session.expires_in(self.clock.now())
    }

    /// Fetches the current session and refreshes it if expiry is near.
    ///
    /// Returns the usable session, or `None` when there is none or the refresh
    /// failed. Callers must treat `None` as signed out; nothing is retried.
    pub async fn restore(&self) -> Option<Session> {
        let session = match self.backend.get_session().await {
            Ok(Some(session)) => session,
            Ok(None) => {
                tracing::debug!("No session to restore");
                return None;
            }
            Err(e) => {
                tracing::error!(error = %e, "Session fetch failed");
                return None;
            }
        };

        let remaining = self.time_to_expiry(&session);
        if remaining >= self.refresh_threshold {
            tracing::debug!(
                user_id = %session.identity.id,
                remaining_secs = remaining.whole_seconds(),
                "Session restored"
            );
            return Some(session);
        }

        tracing::info!(
            user_id = %session.identity.id,
            remaining_secs = remaining.whole_seconds(),
            "Session close to expiry, refreshing"
        );
        match self.backend.refresh_session().await {
            Ok(refreshed) => Some(refreshed),
            Err(e) => {
                tracing::warn!(error = %e, "Session refresh failed, treating as signed out");
                None
            }
        }
    }

    /// `true` if a session was restored (and refreshed when needed).
    pub async fn restore_session(&self) -> bool {
        self.restore().await.is_some()
    }

    /// Probe storage, then restore if anything is there. Absence is not an error.
    pub async fn initialize(&self) -> Option<Session> {
        if !self.has_stored_session() {
            tracing::info!("No stored session, starting signed out");
            return None;
        }
        self.restore().await
    }
}

impl<B: IdentityBackend> SessionProbe for SessionStore<B> {
    fn has_stored_session(&self) -> bool {
        SessionStore::has_stored_session(self)
    }
}
