use regex::Regex;
use tokio::sync::watch;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::error::Error;
use crate::types::QrToken;

/// A captured camera frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Live camera capture.
pub trait CameraStream: Send {
    /// Grabs the current frame. `Ok(None)` means no frame is ready yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is gone; scanning stops.
    fn capture(&mut self) -> Result<Option<Frame>, Error>;

    /// Stops capture and frees the device.
    fn release(&mut self);
}

/// Extracts a QR payload from a frame, if one is visible.
pub trait QrDecoder: Send + Sync {
    fn decode(&self, frame: &Frame) -> Option<String>;
}

/// Transient message shown while scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanNotice {
    /// A QR code was read but it is not a sign-in code.
    InvalidCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Token(QrToken),
    Cancelled,
    CameraFailed(String),
}

/// Matches QR login links: `[scheme://host]{qr_path}/{64 hex}[/][?…|#…]`.
#[derive(Debug, Clone)]
pub struct QrPattern {
    regex: Regex,
}

impl QrPattern {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the pattern cannot be compiled.
    pub fn new(qr_path: &str) -> Result<Self, Error> {
        let path = regex::escape(qr_path.trim_end_matches('/'));
        let regex = Regex::new(&format!(
            r"^(?:[a-zA-Z][a-zA-Z0-9+.-]*://[^/\s]+)?{path}/([0-9a-f]{{64}})/?(?:[?#]\S*)?$"
        ))
        .map_err(|e| Error::Config(format!("QR path pattern: {e}")))?;
        Ok(Self { regex })
    }

    /// The token in a scanned payload, if the payload is a QR login link.
    #[must_use]
    pub fn extract(&self, payload: &str) -> Option<QrToken> {
        self.regex
            .captures(payload.trim())
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// Manual fallback: accepts a pasted link or a bare 64-character token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidQrToken`] if the input is neither.
    pub fn parse_manual(&self, input: &str) -> Result<QrToken, Error> {
        let input = input.trim();
        self.extract(input).map_or_else(|| input.parse(), Ok)
    }
}

/// Releases the camera on every exit path, including a dropped scan future.
struct CameraGuard<C: CameraStream>(C);

impl<C: CameraStream> Drop for CameraGuard<C> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Samples camera frames until a QR login link is found.
pub struct QrScanner<D> {
    decoder: D,
    pattern: QrPattern,
    interval: Duration,
    notice_ttl: Duration,
    notice: watch::Sender<Option<ScanNotice>>,
}

impl<D: QrDecoder> QrScanner<D> {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configured QR path cannot form a pattern.
    pub fn new(decoder: D, config: &RelayConfig) -> Result<Self, Error> {
        Ok(Self {
            decoder,
            pattern: QrPattern::new(&config.qr_path)?,
            interval: config.scan_interval,
            notice_ttl: config.notice_ttl,
            notice: watch::Sender::new(None),
        })
    }

    #[must_use]
    pub fn pattern(&self) -> &QrPattern {
        &self.pattern
    }

    /// The current notice; each invalid code shows one that clears itself.
    #[must_use]
    pub fn notices(&self) -> watch::Receiver<Option<ScanNotice>> {
        self.notice.subscribe()
    }

    /// Scans until a token is found, the camera fails, or `cancel` fires.
    /// The camera is released before this returns.
    pub async fn scan<C: CameraStream>(&self, camera: C, cancel: CancellationToken) -> ScanOutcome {
        let mut camera = CameraGuard(camera);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut notice_expires: Option<Instant> = None;

        let outcome = loop {
            let notice_timer = async {
                match notice_expires {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => break ScanOutcome::Cancelled,
                () = notice_timer => {
                    notice_expires = None;
                    self.notice.send_replace(None);
                    continue;
                }
                _ = ticker.tick() => {}
            }

            let frame = match camera.0.capture() {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "Camera capture failed, stopping scan");
                    break ScanOutcome::CameraFailed(e.to_string());
                }
            };
            let Some(payload) = self.decoder.decode(&frame) else {
                continue;
            };

            match self.pattern.extract(&payload) {
                Some(token) => {
                    tracing::info!("QR login code scanned");
                    break ScanOutcome::Token(token);
                }
                None => {
                    tracing::debug!("Scanned QR code is not a login code");
                    self.notice.send_replace(Some(ScanNotice::InvalidCode));
                    notice_expires = Some(Instant::now() + self.notice_ttl);
                }
            }
        };

        self.notice.send_replace(None);
        outcome
    }
}
