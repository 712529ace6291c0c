#![allow(clippy::unwrap_used)]

//! In-memory host seams for tests. Enable the `mocks` feature to use them
//! from downstream crates.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::Error;
use crate::location::Location;
use crate::qr::{CameraStream, Frame, QrDecoder};
use crate::traits::{IdentityBackend, Navigator};
use crate::types::{Identity, OtpKind, Session, TokenPair};

/// 2100-01-01 00:00 UTC; far enough out that nothing refreshes it.
const FAR_FUTURE: i64 = 4_102_444_800;

/// A complete session for `user-1` expiring at `expires_at`.
#[must_use]
pub fn test_session(expires_at: i64) -> Session {
    Session {
        access_token: "access-token".into(),
        refresh_token: "refresh-token".into(),
        expires_at,
        identity: Identity::new("user-1", "ada@example.com"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    ExchangeCode(String),
    SetSession(TokenPair),
    VerifyOtp(String),
    GetSession,
    RefreshSession,
    SignOut,
}

impl BackendCall {
    fn operation(&self) -> &'static str {
        match self {
            Self::ExchangeCode(_) => "exchange_code_for_session",
            Self::SetSession(_) => "set_session",
            Self::VerifyOtp(_) => "verify_otp",
            Self::GetSession => "get_session",
            Self::RefreshSession => "refresh_session",
            Self::SignOut => "sign_out",
        }
    }
}

/// Scriptable [`IdentityBackend`] that records every call.
///
/// Operations are named by their trait method (`"refresh_session"`, ...).
#[derive(Default)]
pub struct MockIdentityBackend {
    session: Mutex<Option<Session>>,
    refreshed: Option<Session>,
    failing: Vec<String>,
    panicking: Vec<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<BackendCall>>,
}

impl MockIdentityBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Session returned by `get_session`.
    #[must_use]
    pub fn with_session(self, session: Session) -> Self {
        *self.session.lock().unwrap() = Some(session);
        self
    }

    /// Session returned by `refresh_session`.
    #[must_use]
    pub fn with_refreshed(mut self, session: Session) -> Self {
        self.refreshed = Some(session);
        self
    }

    #[must_use]
    pub fn failing(mut self, operations: &[&str]) -> Self {
        self.failing.extend(operations.iter().map(ToString::to_string));
        self
    }

    #[must_use]
    pub fn panicking(mut self, operations: &[&str]) -> Self {
        self.panicking.extend(operations.iter().map(ToString::to_string));
        self
    }

    /// Every call sleeps this long before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.operation() == operation)
            .count()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.session.lock().unwrap().clone()
    }

    async fn enter(&self, call: BackendCall) -> Result<(), Error> {
        let operation = call.operation();
        self.calls.lock().unwrap().push(call);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panicking.iter().any(|op| op == operation) {
            panic!("{operation} panicked");
        }
        if self.failing.iter().any(|op| op == operation) {
            return Err(Error::backend(operation, "scripted failure"));
        }
        Ok(())
    }

    fn sign_in(&self) -> Session {
        let session = test_session(FAR_FUTURE);
        *self.session.lock().unwrap() = Some(session.clone());
        session
    }
}

impl IdentityBackend for MockIdentityBackend {
    async fn exchange_code_for_session(&self, code: &str) -> Result<Session, Error> {
        self.enter(BackendCall::ExchangeCode(code.to_owned())).await?;
        Ok(self.sign_in())
    }

    async fn set_session(&self, tokens: TokenPair) -> Result<Session, Error> {
        self.enter(BackendCall::SetSession(tokens)).await?;
        Ok(self.sign_in())
    }

    async fn verify_otp(&self, token_hash: &str, _kind: OtpKind) -> Result<Session, Error> {
        self.enter(BackendCall::VerifyOtp(token_hash.to_owned())).await?;
        Ok(self.sign_in())
    }

    async fn get_session(&self) -> Result<Option<Session>, Error> {
        self.enter(BackendCall::GetSession).await?;
        Ok(self.current_session())
    }

    async fn refresh_session(&self) -> Result<Session, Error> {
        self.enter(BackendCall::RefreshSession).await?;
        let session = self
            .refreshed
            .clone()
            .or_else(|| self.current_session())
            .ok_or_else(|| Error::backend("refresh_session", "no session"))?;
        *self.session.lock().unwrap() = Some(session.clone());
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), Error> {
        self.enter(BackendCall::SignOut).await?;
        *self.session.lock().unwrap() = None;
        Ok(())
    }
}

/// A navigation performed through [`RecordingNavigator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nav {
    Replace(String),
    SoftReplace(String),
    Hard(String),
}

/// [`Navigator`] that records navigations and follows them.
pub struct RecordingNavigator {
    location: Mutex<Location>,
    events: Mutex<Vec<Nav>>,
}

impl RecordingNavigator {
    /// Starts at `href` (path, query and fragment).
    pub fn at(href: &str) -> Self {
        Self {
            location: Mutex::new(Location::parse(href).unwrap()),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<Nav> {
        self.events.lock().unwrap().clone()
    }

    /// Moves the address bar without recording an event, like a user-driven navigation.
    pub fn go(&self, href: &str) {
        *self.location.lock().unwrap() = Location::parse(href).unwrap();
    }

    fn record(&self, event: Nav, href: &str) {
        if let Ok(location) = Location::parse(href) {
            *self.location.lock().unwrap() = location;
        }
        self.events.lock().unwrap().push(event);
    }
}

impl Navigator for RecordingNavigator {
    fn location(&self) -> Location {
        self.location.lock().unwrap().clone()
    }

    fn replace_url(&self, href: &str) {
        self.record(Nav::Replace(href.to_owned()), href);
    }

    fn soft_replace(&self, path: &str) {
        self.record(Nav::SoftReplace(path.to_owned()), path);
    }

    fn hard_navigate(&self, href: &str) {
        self.record(Nav::Hard(href.to_owned()), href);
    }
}

/// Camera that yields one scripted frame per capture, then empty captures.
///
/// `Some(payload)` becomes a frame carrying the payload bytes; `None` is a
/// capture with no frame ready.
pub struct ScriptedCamera {
    frames: VecDeque<Option<String>>,
    captures: usize,
    fail_after: Option<usize>,
    released: Arc<AtomicBool>,
}

impl ScriptedCamera {
    pub fn new(frames: impl IntoIterator<Item = Option<String>>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            captures: 0,
            fail_after: None,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Every capture after the first `captures` fails.
    #[must_use]
    pub fn failing_after(mut self, captures: usize) -> Self {
        self.fail_after = Some(captures);
        self
    }

    /// Set once the scanner releases the camera.
    pub fn released_flag(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }
}

impl CameraStream for ScriptedCamera {
    fn capture(&mut self) -> Result<Option<Frame>, Error> {
        if self.fail_after.is_some_and(|limit| self.captures >= limit) {
            return Err(Error::Camera("device disconnected".into()));
        }
        self.captures += 1;
        Ok(self.frames.pop_front().flatten().map(|payload| Frame {
            width: 1,
            height: 1,
            data: payload.into_bytes(),
        }))
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Treats the frame bytes as the QR payload.
pub struct Utf8Decoder;

impl QrDecoder for Utf8Decoder {
    fn decode(&self, frame: &Frame) -> Option<String> {
        String::from_utf8(frame.data.clone()).ok()
    }
}
