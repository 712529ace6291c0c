use serde_json::Value as JsonValue;

use crate::error::Error;
use crate::types::TokenPair;

/// A successful QR redemption, in the first shape the body matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redemption {
    /// `redirectUrl`: a ready magic-link URL.
    RedirectUrl(String),
    /// `accessToken` + `refreshToken`: activate directly.
    TokenPair(TokenPair),
    /// `action_link`: generic magic-link field.
    ActionLink(String),
    /// `url`: generic fallback link.
    Url(String),
}

impl Redemption {
    /// Parses a redemption body, trying each known shape in a fixed order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Redemption`] if the body reports failure or matches no shape.
    pub fn parse(body: &JsonValue) -> Result<Self, Error> {
        if body.get("success").and_then(JsonValue::as_bool) == Some(false) {
            return Err(Error::Redemption(
                error_message(body).unwrap_or_else(|| "sign-in was rejected".into()),
            ));
        }

        if let Some(url) = link(body, "redirectUrl") {
            return Ok(Self::RedirectUrl(url));
        }
        if let (Some(access), Some(refresh)) = (link(body, "accessToken"), link(body, "refreshToken"))
        {
            return Ok(Self::TokenPair(TokenPair::new(access, refresh)));
        }
        if let Some(url) = link(body, "action_link") {
            return Ok(Self::ActionLink(url));
        }
        if let Some(url) = link(body, "url") {
            return Ok(Self::Url(url));
        }

        Err(Error::Redemption(
            "response did not contain a sign-in link or session".into(),
        ))
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RedirectUrl(_) => "redirect_url",
            Self::TokenPair(_) => "token_pair",
            Self::ActionLink(_) => "action_link",
            Self::Url(_) => "url",
        }
    }

    /// The URL to load for link-shaped redemptions.
    #[must_use]
    pub fn link(&self) -> Option<&str> {
        match self {
            Self::RedirectUrl(url) | Self::ActionLink(url) | Self::Url(url) => Some(url),
            Self::TokenPair(_) => None,
        }
    }
}

/// The `error` (or `message`) field of an error body.
pub(crate) fn error_message(body: &JsonValue) -> Option<String> {
    ["error", "message"]
        .iter()
        .find_map(|key| body.get(*key).and_then(JsonValue::as_str))
        .map(str::to_owned)
}

fn link(body: &JsonValue, key: &str) -> Option<String> {
    body.get(key)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn redirect_url_wins() {
        let body = json!({
            "success": true,
            "redirectUrl": "https://x/auth/callback?token=t&type=magiclink",
            "accessToken": "a",
            "refreshToken": "b",
            "url": "https://x/other"
        });
        assert_eq!(
            Redemption::parse(&body).unwrap(),
            Redemption::RedirectUrl("https://x/auth/callback?token=t&type=magiclink".into())
        );
    }

    #[test]
    fn token_pair_before_generic_links() {
        let body = json!({"success": true, "accessToken": "a", "refreshToken": "b", "action_link": "https://x"});
        assert_eq!(
            Redemption::parse(&body).unwrap(),
            Redemption::TokenPair(TokenPair::new("a", "b"))
        );
    }

    #[test]
    fn lone_access_token_falls_through() {
        let body = json!({"success": true, "accessToken": "a", "url": "https://x/u"});
        assert_eq!(
            Redemption::parse(&body).unwrap(),
            Redemption::Url("https://x/u".into())
        );
    }

    #[test]
    fn action_link_then_url() {
        let body = json!({"action_link": "https://x/a", "url": "https://x/u"});
        let parsed = Redemption::parse(&body).unwrap();
        assert_eq!(parsed, Redemption::ActionLink("https://x/a".into()));
        assert_eq!(parsed.link(), Some("https://x/a"));
    }

    #[test]
    fn fails_closed_without_known_shape() {
        assert!(matches!(
            Redemption::parse(&json!({"success": true, "redirectUrl": ""})),
            Err(Error::Redemption(_))
        ));
        assert!(Redemption::parse(&json!({"success": true})).is_err());
        assert!(Redemption::parse(&json!("ok")).is_err());
    }

    #[test]
    fn explicit_failure_carries_server_message() {
        let err = Redemption::parse(&json!({"success": false, "error": "Token inactive"}))
            .unwrap_err();
        assert_eq!(err.to_string(), "QR redemption failed: Token inactive");
    }
}
