//! Route-change hook that funnels every authentication-completion URL shape
//! into the canonical callback route.

use std::sync::Arc;

use url::form_urlencoded;

use crate::config::RelayConfig;
use crate::location::{Location, Params};
use crate::traits::{Navigator, SessionProbe};

/// Recognized authentication-completion URL shapes, most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthShape {
    /// `?auth=success&user=<id>&token=<qr token>` from clients that cannot deliver fragments.
    DeviceComposite,
    /// `?code=…`
    AuthorizationCode,
    /// `?token=…&type=magiclink`
    MagicLink,
    /// `#access_token=…&refresh_token=…`, or a bare `token=` in hash or search.
    ImplicitToken,
}

impl AuthShape {
    /// Classifies a location, stopping at the first matching shape.
    #[must_use]
    pub fn classify(location: &Location) -> Option<Self> {
        let search = location.search_params();
        let hash = location.hash_params();

        if search.get("auth") == Some("success") {
            return Some(Self::DeviceComposite);
        }
        if search.has("code") {
            return Some(Self::AuthorizationCode);
        }
        if (search.has("token") || search.has("token_hash"))
            && search.get("type") == Some("magiclink")
        {
            return Some(Self::MagicLink);
        }
        let carries_token =
            |p: &Params| ["access_token", "refresh_token", "token"].iter().any(|k| p.has(k));
        if carries_token(&hash) || carries_token(&search) {
            return Some(Self::ImplicitToken);
        }
        None
    }

    /// Parameters this shape carries; they must not outlive their use.
    #[must_use]
    pub fn params(self) -> &'static [&'static str] {
        match self {
            Self::DeviceComposite => &["auth", "user", "token"],
            Self::AuthorizationCode => &["code", "state"],
            Self::MagicLink => &["token", "token_hash", "type"],
            Self::ImplicitToken => &[
                "access_token",
                "refresh_token",
                "expires_in",
                "expires_at",
                "token_type",
                "provider_token",
                "provider_refresh_token",
                "token",
                "type",
            ],
        }
    }
}

/// What [`RedirectNormalizer::evaluate`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// Already on the callback route; the exchanger owns it.
    AtCallback,
    /// A user is already signed in; leftover parameters were removed in place.
    StaleParamsStripped(AuthShape),
    /// Device-composite parameters were rewritten into a magic-link callback.
    DeviceRedirect { href: String },
    /// Device-composite shape without its required parameters; show sign-in.
    EntryScreen,
    /// Redirected to the callback route carrying the original parameters.
    Redirected { shape: AuthShape, href: String },
    /// Nothing to do. `stored_session` is diagnostic only.
    NoMatch { stored_session: bool },
}

/// Classifies the current URL on every route change and steers authentication
/// parameters to the canonical callback route with a single URL replacement.
pub struct RedirectNormalizer<N> {
    navigator: Arc<N>,
    probe: Arc<dyn SessionProbe>,
    config: RelayConfig,
}

impl<N: Navigator> RedirectNormalizer<N> {
    #[must_use]
    pub fn new(navigator: Arc<N>, probe: Arc<dyn SessionProbe>, config: RelayConfig) -> Self {
        Self {
            navigator,
            probe,
            config,
        }
    }

    /// Evaluates the navigator's current location.
    ///
    /// `user_present` is whether an identity is already established in memory.
    pub fn evaluate(&self, user_present: bool) -> Normalized {
        let location = self.navigator.location();

        if location.is_at(&self.config.callback_path) {
            return Normalized::AtCallback;
        }

        let Some(shape) = AuthShape::classify(&location) else {
            let stored_session = self.probe.has_stored_session();
            tracing::debug!(stored_session, path = %location.path, "No authentication parameters");
            return Normalized::NoMatch { stored_session };
        };

        if user_present && shape != AuthShape::DeviceComposite {
            tracing::warn!(?shape, "Ignoring authentication parameters, user already signed in");
            self.navigator.replace_url(&strip_auth_params(&location));
            return Normalized::StaleParamsStripped(shape);
        }

        match shape {
            AuthShape::DeviceComposite => self.device_redirect(&location),
            AuthShape::AuthorizationCode | AuthShape::MagicLink => {
                let href = format!("{}?{}", self.config.callback_path, location.search);
                self.redirect(shape, href)
            }
            AuthShape::ImplicitToken => {
                let in_hash = ["access_token", "refresh_token", "token"]
                    .iter()
                    .any(|k| location.hash_params().has(k));
                let href = if in_hash {
                    format!("{}#{}", self.config.callback_path, location.hash)
                } else {
                    format!("{}?{}", self.config.callback_path, location.search)
                };
                self.redirect(shape, href)
            }
        }
    }

    fn redirect(&self, shape: AuthShape, href: String) -> Normalized {
        tracing::info!(?shape, "Forwarding authentication parameters to callback route");
        self.navigator.soft_replace(&href);
        Normalized::Redirected { shape, href }
    }

    fn device_redirect(&self, location: &Location) -> Normalized {
        let params = location.search_params();
        let (Some(_user), Some(token)) = (params.non_empty("user"), params.non_empty("token"))
        else {
            tracing::warn!("Device sign-in callback is missing user or token");
            self.navigator.replace_url(&self.config.home_path);
            return Normalized::EntryScreen;
        };

        let prefixed = format!("{}{token}", self.config.device_token_prefix);
        let href = format!(
            "{}?token={}&type=magiclink",
            self.config.callback_path,
            urlencoding::encode(&prefixed)
        );
        tracing::info!("Rewriting device sign-in callback as magic link");
        self.navigator.hard_navigate(&href);
        Normalized::DeviceRedirect { href }
    }
}

/// The location with the recognized shape's parameters removed from search
/// and hash. Unrelated parameters, and URLs with no recognized shape, are kept.
#[must_use]
pub fn strip_auth_params(location: &Location) -> String {
    match AuthShape::classify(location) {
        Some(shape) => strip_shape_params(location, shape),
        None => location.href(),
    }
}

pub(crate) fn strip_shape_params(location: &Location, shape: AuthShape) -> String {
    let consumed = shape.params();
    let keep = |raw: &str| {
        let kept: Vec<(String, String)> = form_urlencoded::parse(raw.as_bytes())
            .into_owned()
            .filter(|(k, _)| !consumed.contains(&k.as_str()))
            .collect();
        if kept.is_empty() {
            String::new()
        } else {
            form_urlencoded::Serializer::new(String::new())
                .extend_pairs(kept)
                .finish()
        }
    };
    Location {
        path: location.path.clone(),
        search: keep(&location.search),
        hash: keep(location.hash.trim_start_matches(['/', '?'])),
    }
    .href()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{Nav, RecordingNavigator};

    const QR: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    struct Probe(bool);

    impl SessionProbe for Probe {
        fn has_stored_session(&self) -> bool {
            self.0
        }
    }

    fn normalizer_at(
        href: &str,
    ) -> (RedirectNormalizer<RecordingNavigator>, Arc<RecordingNavigator>) {
        let navigator = Arc::new(RecordingNavigator::at(href));
        let normalizer =
            RedirectNormalizer::new(navigator.clone(), Arc::new(Probe(false)), RelayConfig::default());
        (normalizer, navigator)
    }

    fn loc(href: &str) -> Location {
        Location::parse(href).unwrap()
    }

    #[test]
    fn classifies_each_literal_shape() {
        assert_eq!(
            AuthShape::classify(&loc("/?code=abc123")),
            Some(AuthShape::AuthorizationCode)
        );
        assert_eq!(
            AuthShape::classify(&loc("/#access_token=tok&refresh_token=rtok")),
            Some(AuthShape::ImplicitToken)
        );
        assert_eq!(
            AuthShape::classify(&loc("/?token=mlk&type=magiclink")),
            Some(AuthShape::MagicLink)
        );
        assert_eq!(
            AuthShape::classify(&loc(&format!("/?auth=success&user=u1&token={QR}"))),
            Some(AuthShape::DeviceComposite)
        );
        assert_eq!(AuthShape::classify(&loc("/?token=bare")), Some(AuthShape::ImplicitToken));
        assert_eq!(AuthShape::classify(&loc("/dashboard?tab=2")), None);
        assert_eq!(AuthShape::classify(&loc("/?auth_code=x")), None);
    }

    #[test]
    fn code_redirects_with_original_search() {
        let (normalizer, nav) = normalizer_at("/?code=abc123");
        let outcome = normalizer.evaluate(false);
        assert_eq!(
            outcome,
            Normalized::Redirected {
                shape: AuthShape::AuthorizationCode,
                href: "/auth/callback?code=abc123".into(),
            }
        );
        assert_eq!(nav.events(), vec![Nav::SoftReplace("/auth/callback?code=abc123".into())]);
    }

    #[test]
    fn implicit_tokens_redirect_with_hash() {
        let (normalizer, nav) = normalizer_at("/#access_token=tok&refresh_token=rtok");
        normalizer.evaluate(false);
        assert_eq!(
            nav.events(),
            vec![Nav::SoftReplace("/auth/callback#access_token=tok&refresh_token=rtok".into())]
        );
    }

    #[test]
    fn bare_search_token_redirects_with_search() {
        let (normalizer, nav) = normalizer_at("/welcome?token=t1");
        normalizer.evaluate(false);
        assert_eq!(nav.events(), vec![Nav::SoftReplace("/auth/callback?token=t1".into())]);
    }

    #[test]
    fn magic_link_redirects_with_search() {
        let (normalizer, nav) = normalizer_at("/?token=mlk&type=magiclink");
        let outcome = normalizer.evaluate(false);
        assert!(matches!(
            outcome,
            Normalized::Redirected { shape: AuthShape::MagicLink, .. }
        ));
        assert_eq!(
            nav.events(),
            vec![Nav::SoftReplace("/auth/callback?token=mlk&type=magiclink".into())]
        );
    }

    #[test]
    fn device_composite_synthesizes_prefixed_magic_link() {
        let (normalizer, nav) = normalizer_at(&format!("/?auth=success&user=u1&token={QR}"));
        let outcome = normalizer.evaluate(false);
        let expected = format!("/auth/callback?token=qr_{QR}&type=magiclink");
        assert_eq!(outcome, Normalized::DeviceRedirect { href: expected.clone() });
        assert_eq!(nav.events(), vec![Nav::Hard(expected)]);
    }

    #[test]
    fn device_composite_without_token_shows_entry_screen() {
        let (normalizer, nav) = normalizer_at("/?auth=success&user=u1&token=");
        assert_eq!(normalizer.evaluate(false), Normalized::EntryScreen);
        assert_eq!(nav.events(), vec![Nav::Replace("/".into())]);
    }

    #[test]
    fn callback_route_is_left_alone() {
        let (normalizer, nav) = normalizer_at("/auth/callback?code=abc123");
        assert_eq!(normalizer.evaluate(false), Normalized::AtCallback);
        assert!(nav.events().is_empty());
    }

    #[test]
    fn signed_in_user_strips_stale_params_without_navigating() {
        let (normalizer, nav) = normalizer_at("/projects?code=abc123&state=s&tab=2");
        assert_eq!(
            normalizer.evaluate(true),
            Normalized::StaleParamsStripped(AuthShape::AuthorizationCode)
        );
        assert_eq!(nav.events(), vec![Nav::Replace("/projects?tab=2".into())]);

        let (normalizer, nav) = normalizer_at("/#access_token=tok&refresh_token=rtok");
        normalizer.evaluate(true);
        assert_eq!(nav.events(), vec![Nav::Replace("/".into())]);
    }

    #[test]
    fn stripping_keeps_parameters_outside_the_shape() {
        let (normalizer, nav) = normalizer_at("/settings?code=abc&type=dark&user=me");
        assert_eq!(
            normalizer.evaluate(true),
            Normalized::StaleParamsStripped(AuthShape::AuthorizationCode)
        );
        assert_eq!(nav.events(), vec![Nav::Replace("/settings?type=dark&user=me".into())]);

        assert_eq!(
            strip_auth_params(&loc("/settings?user=me&type=dark")),
            "/settings?user=me&type=dark"
        );
    }

    #[test]
    fn device_redirect_lands_as_prefixed_magic_link() {
        let (normalizer, _) = normalizer_at(&format!("/?auth=success&user=u1&token={QR}"));
        let Normalized::DeviceRedirect { href } = normalizer.evaluate(false) else {
            panic!("expected a device redirect");
        };

        let landed = loc(&href);
        assert_eq!(AuthShape::classify(&landed), Some(AuthShape::MagicLink));
        assert_eq!(
            crate::callback::ExchangeRequest::from_location(&landed),
            Some(crate::callback::ExchangeRequest::MagicLink(format!("qr_{QR}")))
        );
    }

    #[test]
    fn no_match_only_probes_storage() {
        let navigator = Arc::new(RecordingNavigator::at("/dashboard"));
        let normalizer =
            RedirectNormalizer::new(navigator.clone(), Arc::new(Probe(true)), RelayConfig::default());
        assert_eq!(
            normalizer.evaluate(false),
            Normalized::NoMatch { stored_session: true }
        );
        assert!(navigator.events().is_empty());
    }

    #[test]
    fn custom_callback_path_is_honored() {
        let navigator = Arc::new(RecordingNavigator::at("/?code=c"));
        let config = RelayConfig::default().with_callback_path("/login/done");
        let normalizer = RedirectNormalizer::new(navigator.clone(), Arc::new(Probe(false)), config);
        normalizer.evaluate(false);
        assert_eq!(navigator.events(), vec![Nav::SoftReplace("/login/done?code=c".into())]);
    }
}
