#![doc = include_str!("../README.md")]

#[cfg(feature = "http")]
pub mod backend;
pub mod callback;
pub mod clock;
pub mod config;
pub mod error;
pub mod location;
pub mod logout;
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
#[cfg(feature = "http")]
pub mod pkce;
pub mod qr;
pub mod quick_login;
pub mod redirect;
pub mod relay;
pub mod session;
pub mod state;
pub mod storage;
pub mod traits;
pub mod types;

// Re-exports for convenient access
#[cfg(feature = "http")]
pub use backend::{BackendConfig, HttpIdentityBackend};
pub use callback::{
    CallbackExchanger, ExchangeMethod, ExchangeOutcome, ExchangePhase, ExchangeRequest,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RelayConfig;
pub use error::Error;
pub use location::{Location, Params};
pub use logout::{LogoutInfo, LogoutMemento};
#[cfg(feature = "http")]
pub use pkce::PkcePair;
#[cfg(feature = "http")]
pub use qr::{QrRedeemer, RedeemPhase};
pub use qr::{
    CameraStream, Frame, QrDecoder, QrPattern, QrScanner, Redemption, ScanNotice, ScanOutcome,
};
pub use quick_login::{CachedUser, QuickLoginCache};
pub use redirect::{AuthShape, Normalized, RedirectNormalizer, strip_auth_params};
pub use relay::AuthRelay;
pub use session::SessionStore;
pub use state::{AuthState, AuthStateCell};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageKeys};
pub use traits::{IdentityBackend, Navigator, SessionProbe};
pub use types::{Identity, OtpKind, QrToken, Session, TokenPair, UserId};
