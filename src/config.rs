use std::time::Duration;

use url::Url;

use crate::error::Error;
use crate::storage::StorageKeys;

/// Routes, storage keys and timing for the sign-in relay.
///
/// All fields have working defaults. Override with `with_*` methods, or use
/// [`from_env()`](RelayConfig::from_env) for convention-based setup.
///
/// ```rust,ignore
/// let config = RelayConfig::default()
///     .with_callback_path("/login/callback")
///     .with_qr_redeem_url("https://api.example.com/auth-by-qr-token".parse()?);
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct RelayConfig {
    pub(crate) callback_path: String,
    pub(crate) home_path: String,
    pub(crate) qr_path: String,
    pub(crate) qr_redeem_url: Option<Url>,
    pub(crate) device_token_prefix: String,
    pub(crate) storage_prefix: String,
    pub(crate) refresh_threshold: Duration,
    pub(crate) quick_login_capacity: usize,
    pub(crate) quick_login_ttl: Duration,
    pub(crate) logout_prompt_window: Duration,
    pub(crate) error_redirect_delay: Duration,
    pub(crate) notice_ttl: Duration,
    pub(crate) scan_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            callback_path: "/auth/callback".into(),
            home_path: "/".into(),
            qr_path: "/qr-login".into(),
            qr_redeem_url: None,
            device_token_prefix: "qr_".into(),
            storage_prefix: "signin-relay".into(),
            refresh_threshold: Duration::from_secs(10 * 60),
            quick_login_capacity: 5,
            quick_login_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            logout_prompt_window: Duration::from_secs(5 * 60),
            error_redirect_delay: Duration::from_secs(3),
            notice_ttl: Duration::from_secs(3),
            scan_interval: Duration::from_millis(100),
        }
    }
}

impl RelayConfig {
    /// Create config from environment variables. Every variable is optional.
    ///
    /// - `SIGNIN_RELAY_CALLBACK_PATH`: canonical callback route (must start with `/`)
    /// - `SIGNIN_RELAY_HOME_PATH`: application root (must start with `/`)
    /// - `SIGNIN_RELAY_QR_PATH`: route prefix of QR login links (must start with `/`)
    /// - `SIGNIN_RELAY_QR_REDEEM_URL`: QR redemption endpoint (must be a valid URL)
    /// - `SIGNIN_RELAY_STORAGE_PREFIX`: prefix for persisted record keys
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a path is not absolute or the URL is invalid.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("SIGNIN_RELAY_CALLBACK_PATH") {
            config = config.with_callback_path(route("SIGNIN_RELAY_CALLBACK_PATH", path)?);
        }
        if let Ok(path) = std::env::var("SIGNIN_RELAY_HOME_PATH") {
            config = config.with_home_path(route("SIGNIN_RELAY_HOME_PATH", path)?);
        }
        if let Ok(path) = std::env::var("SIGNIN_RELAY_QR_PATH") {
            config = config.with_qr_path(route("SIGNIN_RELAY_QR_PATH", path)?);
        }
        if let Ok(url_str) = std::env::var("SIGNIN_RELAY_QR_REDEEM_URL") {
            let url: Url = url_str
                .parse()
                .map_err(|e| Error::Config(format!("SIGNIN_RELAY_QR_REDEEM_URL: {e}")))?;
            config = config.with_qr_redeem_url(url);
        }
        if let Ok(prefix) = std::env::var("SIGNIN_RELAY_STORAGE_PREFIX") {
            if prefix.trim().is_empty() {
                return Err(Error::Config(
                    "SIGNIN_RELAY_STORAGE_PREFIX is set but empty".into(),
                ));
            }
            config = config.with_storage_prefix(prefix.trim());
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_callback_path(mut self, path: impl Into<String>) -> Self {
        self.callback_path = path.into();
        self
    }

    #[must_use]
    pub fn with_home_path(mut self, path: impl Into<String>) -> Self {
        self.home_path = path.into();
        self
    }

    #[must_use]
    pub fn with_qr_path(mut self, path: impl Into<String>) -> Self {
        self.qr_path = path.into();
        self
    }

    #[must_use]
    pub fn with_qr_redeem_url(mut self, url: Url) -> Self {
        self.qr_redeem_url = Some(url);
        self
    }

    /// Prefix stamped onto tokens lifted from device-composite callbacks.
    #[must_use]
    pub fn with_device_token_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.device_token_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_storage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage_prefix = prefix.into();
        self
    }

    /// Sessions closer than this to expiry are refreshed during restore.
    #[must_use]
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_quick_login_capacity(mut self, capacity: usize) -> Self {
        self.quick_login_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_quick_login_ttl(mut self, ttl: Duration) -> Self {
        self.quick_login_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_logout_prompt_window(mut self, window: Duration) -> Self {
        self.logout_prompt_window = window;
        self
    }

    /// Delay between showing a redemption error and navigating home.
    #[must_use]
    pub fn with_error_redirect_delay(mut self, delay: Duration) -> Self {
        self.error_redirect_delay = delay;
        self
    }

    #[must_use]
    pub fn with_notice_ttl(mut self, ttl: Duration) -> Self {
        self.notice_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    /// Canonical callback route.
    #[must_use]
    pub fn callback_path(&self) -> &str {
        &self.callback_path
    }

    /// Application root used for soft and hard returns.
    #[must_use]
    pub fn home_path(&self) -> &str {
        &self.home_path
    }

    /// Route prefix of QR login links (`{qr_path}/{token}`).
    #[must_use]
    pub fn qr_path(&self) -> &str {
        &self.qr_path
    }

    #[must_use]
    pub fn qr_redeem_url(&self) -> Option<&Url> {
        self.qr_redeem_url.as_ref()
    }

    #[must_use]
    pub fn storage_keys(&self) -> StorageKeys {
        StorageKeys::new(self.storage_prefix.clone())
    }
}

fn route(var: &str, path: String) -> Result<String, Error> {
    let path = path.trim().to_owned();
    if path.starts_with('/') {
        Ok(path)
    } else {
        Err(Error::Config(format!("{var} must start with '/', got {path:?}")))
    }
}
