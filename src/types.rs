use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::Error;

/// Identity-backend user identifier (opaque string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct UserId(pub String);

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// The authenticated principal carried by a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub email: String,
}

impl Identity {
    #[must_use]
    pub fn new(id: impl Into<UserId>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
        }
    }
}

/// Access/refresh token pair plus expiry and identity.
///
/// Every field is required when deserializing: a session is either complete
/// or it does not exist. Callers hold `Option<Session>`, never a partial one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry as unix epoch seconds.
    pub expires_at: i64,
    pub identity: Identity,
}

impl Session {
    /// Builds a session, rejecting empty tokens or identity fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSession`] naming the first missing field.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: i64,
        identity: Identity,
    ) -> Result<Self, Error> {
        let session = Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
            identity,
        };
        session.validate()?;
        Ok(session)
    }

    /// Checks that every field is populated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSession`] naming the first missing field.
    pub fn validate(&self) -> Result<(), Error> {
        let missing = if self.access_token.is_empty() {
            Some("access_token")
        } else if self.refresh_token.is_empty() {
            Some("refresh_token")
        } else if self.identity.id.0.is_empty() {
            Some("identity.id")
        } else if self.identity.email.is_empty() {
            Some("identity.email")
        } else if self.expires_at <= 0 {
            Some("expires_at")
        } else {
            None
        };
        match missing {
            Some(field) => Err(Error::InvalidSession(format!("missing {field}"))),
            None => Ok(()),
        }
    }

    /// Time left before the access token expires. Negative once expired.
    #[must_use]
    pub fn expires_in(&self, now: OffsetDateTime) -> time::Duration {
        time::Duration::seconds(self.expires_at - now.unix_timestamp())
    }

    #[must_use]
    pub fn token_pair(&self) -> TokenPair {
        TokenPair {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

/// Tokens delivered directly to the client (implicit callback or QR redemption).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

/// One-time password flavours accepted by `verify_otp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum OtpKind {
    #[display("magiclink")]
    MagicLink,
}

/// Long-lived cross-device login secret: exactly 64 lowercase hex characters.
///
/// Guaranteed valid by construction. Parse with `"…".parse::<QrToken>()`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QrToken(String);

impl QrToken {
    pub const LEN: usize = 64;

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for exactly 64 lowercase hex characters.
    #[must_use]
    pub fn is_valid(s: &str) -> bool {
        s.len() == Self::LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for QrToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "QrToken({}…)", &self.0[..8])
    }
}

impl std::fmt::Display for QrToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for QrToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl TryFrom<String> for QrToken {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if Self::is_valid(&s) {
            Ok(Self(s))
        } else {
            Err(Error::InvalidQrToken(s))
        }
    }
}

impl From<QrToken> for String {
    fn from(t: QrToken) -> Self {
        t.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn identity() -> Identity {
        Identity::new("u1", "ada@example.com")
    }

    #[test]
    fn qr_token_accepts_64_lowercase_hex() {
        assert!(TOKEN.parse::<QrToken>().is_ok());
        assert!("f".repeat(64).parse::<QrToken>().is_ok());
    }

    #[test]
    fn qr_token_rejects_wrong_length() {
        assert!(TOKEN[..63].parse::<QrToken>().is_err());
        assert!(format!("{TOKEN}0").parse::<QrToken>().is_err());
        assert!("".parse::<QrToken>().is_err());
    }

    #[test]
    fn qr_token_rejects_non_hex_and_uppercase() {
        assert!("g".repeat(64).parse::<QrToken>().is_err());
        assert!(TOKEN.to_uppercase().parse::<QrToken>().is_err());
        assert!(format!("{} ", &TOKEN[..63]).parse::<QrToken>().is_err());
    }

    #[test]
    fn qr_token_debug_is_redacted() {
        let token: QrToken = TOKEN.parse().unwrap();
        assert_eq!(format!("{token:?}"), "QrToken(01234567…)");
    }

    #[test]
    fn session_requires_every_field() {
        assert!(Session::new("a", "r", 1_700_000_000, identity()).is_ok());
        assert!(Session::new("", "r", 1_700_000_000, identity()).is_err());
        assert!(Session::new("a", "", 1_700_000_000, identity()).is_err());
        assert!(Session::new("a", "r", 0, identity()).is_err());
        assert!(Session::new("a", "r", 1_700_000_000, Identity::new("", "x@y")).is_err());
    }

    #[test]
    fn session_without_email_is_rejected() {
        let err = Session::new("a", "r", 1_700_000_000, Identity::new("u1", "")).unwrap_err();
        assert_eq!(err.to_string(), "invalid session: missing identity.email");
    }

    #[test]
    fn partial_session_json_does_not_deserialize() {
        let json = r#"{"access_token":"a","refresh_token":"r","expires_at":5}"#;
        assert!(serde_json::from_str::<Session>(json).is_err());
    }

    #[test]
    fn expires_in_counts_down() {
        let now = OffsetDateTime::from_unix_timestamp(1_000).unwrap();
        let session = Session::new("a", "r", 1_600, identity()).unwrap();
        assert_eq!(session.expires_in(now), time::Duration::minutes(10));
    }
}
