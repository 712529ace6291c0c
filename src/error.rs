#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The identity backend rejected a request (expired, reused or invalid credential).
    #[error("{operation} failed{}: {detail}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Backend {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },
    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with something other than JSON (usually an HTML error page).
    #[error("expected a JSON response, got content type {content_type:?}")]
    NotJson { content_type: String },
    #[error("QR redemption failed: {0}")]
    Redemption(String),
    #[error("invalid QR token: {0:?}")]
    InvalidQrToken(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("camera error: {0}")]
    Camera(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid session: {0}")]
    InvalidSession(String),
}

impl Error {
    pub(crate) fn backend(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::Backend {
            operation,
            status: None,
            detail: detail.into(),
        }
    }
}
