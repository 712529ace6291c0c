use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

/// PKCE verifier and its S256 challenge for one authorization round trip.
///
/// The verifier stays on the client (in storage, since the provider round trip
/// reloads the page); only the challenge leaves with the authorize request.
#[derive(Clone, PartialEq, Eq)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    /// Fresh 64-character verifier (48 random bytes, base64url) and its challenge.
    #[must_use]
    pub fn generate() -> Self {
        let random_bytes: [u8; 48] = rand::rng().random();
        Self::from_verifier(URL_SAFE_NO_PAD.encode(random_bytes))
    }

    /// `challenge = BASE64URL(SHA256(verifier))`
    #[must_use]
    pub fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_is_64_url_safe_chars() {
        let pair = PkcePair::generate();
        assert_eq!(pair.verifier.len(), 64);
        assert!(
            pair.verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "verifier should be URL-safe: {}",
            pair.verifier
        );
    }

    #[test]
    fn verifiers_are_unique() {
        assert_ne!(PkcePair::generate().verifier, PkcePair::generate().verifier);
    }

    #[test]
    fn challenge_matches_rfc7636_vector() {
        let pair = PkcePair::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".into());
        assert_eq!(pair.challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn debug_hides_verifier() {
        let pair = PkcePair::from_verifier("secret-verifier".into());
        assert!(!format!("{pair:?}").contains("secret-verifier"));
    }
}
