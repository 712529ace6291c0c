use std::future::Future;

use crate::error::Error;
use crate::location::Location;
use crate::types::{OtpKind, Session, TokenPair};

/// Remote identity service.
///
/// Token issuance and verification happen on the other side of this trait;
/// the relay only ever surfaces sessions the backend hands back.
///
/// Implementations must persist the current session as a versioned record
/// (see [`write_record`](crate::storage::write_record)) under
/// [`StorageKeys::session`](crate::StorageKeys::session) in the same store the
/// [`SessionStore`](crate::SessionStore) reads, and remove it on sign-out.
/// [`SessionStore::initialize`](crate::SessionStore::initialize) checks that
/// record before calling [`get_session`](Self::get_session); without it the
/// host starts signed out. `HttpIdentityBackend` does this.
///
/// # Example
///
/// ```rust,ignore
/// impl IdentityBackend for MyBackend {
///     async fn exchange_code_for_session(&self, code: &str) -> Result<Session, Error> {
///         self.client.exchange(code).await
///     }
///     // ...
/// }
/// ```
pub trait IdentityBackend: Send + Sync + 'static {
    /// Trade a one-time authorization code for a session. Not safe to repeat.
    fn exchange_code_for_session(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<Session, Error>> + Send;

    /// Activate tokens delivered directly to the client as the current session.
    fn set_session(&self, tokens: TokenPair)
    -> impl Future<Output = Result<Session, Error>> + Send;

    /// Verify a one-time token hash (magic link).
    fn verify_otp(
        &self,
        token_hash: &str,
        kind: OtpKind,
    ) -> impl Future<Output = Result<Session, Error>> + Send;

    /// Current session, if the backend holds one.
    fn get_session(&self) -> impl Future<Output = Result<Option<Session>, Error>> + Send;

    /// Rotate the current session's tokens.
    fn refresh_session(&self) -> impl Future<Output = Result<Session, Error>> + Send;

    /// End the current session.
    fn sign_out(&self) -> impl Future<Output = Result<(), Error>> + Send;
}

/// The host's address bar and router.
///
/// In a browser these map to `location`, `history.replaceState`, the SPA
/// router's `navigate(path, { replace: true })`, and `location.replace`
/// respectively. None of them may push a history entry: a back navigation
/// must never land on a URL that still carries authentication parameters.
pub trait Navigator: Send + Sync + 'static {
    fn location(&self) -> Location;

    /// Rewrite the address without navigating or adding a history entry.
    fn replace_url(&self, href: &str);

    /// In-app route change replacing the current history entry; client state survives.
    fn soft_replace(&self, path: &str);

    /// Full page load replacing the current history entry; client state is discarded.
    fn hard_navigate(&self, href: &str);
}

/// Read-only probe for a persisted session blob.
pub trait SessionProbe: Send + Sync {
    fn has_stored_session(&self) -> bool;
}
