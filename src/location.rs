use url::Url;
use url::form_urlencoded;

use crate::error::Error;

/// Base used to resolve path-relative hrefs; only path, query and fragment survive.
const RELATIVE_BASE: &str = "http://relay.invalid/";

/// The current address split the way a browser exposes it.
///
/// `search` and `hash` are stored without their leading `?` / `#`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    pub path: String,
    pub search: String,
    pub hash: String,
}

impl Location {
    /// Parses an absolute URL or a path-relative href such as `/x?a=1#b=2`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the input is not a URL or href.
    pub fn parse(href: &str) -> Result<Self, Error> {
        let url = match Url::parse(href) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(RELATIVE_BASE)
                .and_then(|base| base.join(href))
                .map_err(|e| Error::Config(format!("invalid location {href:?}: {e}")))?,
            Err(e) => return Err(Error::Config(format!("invalid location {href:?}: {e}"))),
        };
        Ok(Self::from(&url))
    }

    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Relative form: `path[?search][#hash]`.
    #[must_use]
    pub fn href(&self) -> String {
        let mut href = self.path.clone();
        if !self.search.is_empty() {
            href.push('?');
            href.push_str(&self.search);
        }
        if !self.hash.is_empty() {
            href.push('#');
            href.push_str(&self.hash);
        }
        href
    }

    /// Decoded query-string parameters.
    #[must_use]
    pub fn search_params(&self) -> Params {
        Params::parse(&self.search)
    }

    /// Decoded fragment parameters (`#a=1`, `#/a=1` and `#?a=1` all work).
    #[must_use]
    pub fn hash_params(&self) -> Params {
        Params::parse(self.hash.trim_start_matches(['/', '?']))
    }

    #[must_use]
    pub fn is_at(&self, path: &str) -> bool {
        self.path.trim_end_matches('/') == path.trim_end_matches('/')
    }
}

impl From<&Url> for Location {
    fn from(url: &Url) -> Self {
        Self {
            path: url.path().to_owned(),
            search: url.query().unwrap_or_default().to_owned(),
            hash: url.fragment().unwrap_or_default().to_owned(),
        }
    }
}

/// Ordered, decoded `key=value` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self(form_urlencoded::parse(raw.as_bytes()).into_owned().collect())
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    /// First value for `key`, if present (possibly empty).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First non-empty value for `key`.
    #[must_use]
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_relative_href() {
        let loc = Location::parse("/auth/callback?code=abc123#x=1").unwrap();
        assert_eq!(loc.path, "/auth/callback");
        assert_eq!(loc.search, "code=abc123");
        assert_eq!(loc.hash, "x=1");
        assert_eq!(loc.href(), "/auth/callback?code=abc123#x=1");
    }

    #[test]
    fn parses_absolute_url() {
        let loc = Location::parse("https://app.example.com/#access_token=tok&refresh_token=rtok")
            .unwrap();
        assert_eq!(loc.path, "/");
        assert!(loc.search.is_empty());
        assert_eq!(loc.hash_params().get("access_token"), Some("tok"));
        assert_eq!(loc.hash_params().get("refresh_token"), Some("rtok"));
    }

    #[test]
    fn params_are_decoded_and_keyed_exactly() {
        let params = Params::parse("auth_code=1&next=%2Fhome&empty=");
        assert!(!params.has("code"));
        assert_eq!(params.get("next"), Some("/home"));
        assert_eq!(params.get("empty"), Some(""));
        assert_eq!(params.non_empty("empty"), None);
    }

    #[test]
    fn hash_params_tolerate_router_prefixes() {
        let loc = Location::parse("/#/access_token=a&refresh_token=b").unwrap();
        assert_eq!(loc.hash_params().get("access_token"), Some("a"));
    }

    #[test]
    fn is_at_ignores_trailing_slash() {
        let loc = Location::new("/auth/callback/");
        assert!(loc.is_at("/auth/callback"));
        assert!(!loc.is_at("/auth"));
    }
}
