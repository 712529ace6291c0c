use std::sync::Arc;

use tokio::sync::watch;

use crate::types::Identity;

/// What the UI renders from: a loading flag, the signed-in identity, and the
/// last sign-in error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthState {
    pub loading: bool,
    pub user: Option<Identity>,
    pub error: Option<String>,
}

impl Default for AuthState {
    /// Nothing is known until the stored session has been checked.
    fn default() -> Self {
        Self {
            loading: true,
            user: None,
            error: None,
        }
    }
}

/// Shared, observable [`AuthState`]. Clones publish to the same subscribers.
#[derive(Clone)]
pub struct AuthStateCell {
    tx: Arc<watch::Sender<AuthState>>,
}

impl Default for AuthStateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthStateCell {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(AuthState::default())),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> AuthState {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn user_present(&self) -> bool {
        self.tx.borrow().user.is_some()
    }

    pub fn set_signed_in(&self, identity: Identity) {
        self.publish(AuthState {
            loading: false,
            user: Some(identity),
            error: None,
        });
    }

    pub fn set_signed_out(&self) {
        self.publish(AuthState {
            loading: false,
            user: None,
            error: None,
        });
    }

    /// Records a failed sign-in. Any previous identity is cleared.
    pub fn set_error(&self, message: impl Into<String>) {
        self.publish(AuthState {
            loading: false,
            user: None,
            error: Some(message.into()),
        });
    }

    // Subscribers only wake on a real change.
    fn publish(&self, next: AuthState) {
        self.tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_loading() {
        let cell = AuthStateCell::new();
        assert_eq!(cell.snapshot(), AuthState::default());
        assert!(cell.snapshot().loading);
        assert!(!cell.user_present());
    }

    #[test]
    fn sign_in_then_error_clears_user() {
        let cell = AuthStateCell::new();
        cell.set_signed_in(Identity::new("u1", "ada@example.com"));
        assert!(cell.user_present());

        cell.set_error("Sign-in link expired");
        let state = cell.snapshot();
        assert!(!state.loading);
        assert_eq!(state.user, None);
        assert_eq!(state.error.as_deref(), Some("Sign-in link expired"));
    }

    #[tokio::test]
    async fn subscribers_see_changes_only() {
        let cell = AuthStateCell::new();
        let mut rx = cell.subscribe();

        cell.set_signed_out();
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        cell.clone().set_signed_out();
        assert!(!rx.has_changed().unwrap());
    }
}
