//! Cross-device sign-in through long-lived QR tokens.
//!
//! Two independent flows share one redemption contract:
//!
//! - [`QrScanner`] samples camera frames on the signed-in device's counterpart
//!   until it reads a QR login link (`{qr_path}/{64 hex}`), with a manual-entry
//!   fallback through [`QrPattern::parse_manual`].
//! - [`QrRedeemer`] (feature `http`) posts the token to the redemption endpoint
//!   and completes sign-in from whichever response shape comes back.

#[cfg(feature = "http")]
mod redeem;
mod response;
mod scanner;

#[cfg(feature = "http")]
pub use redeem::{QrRedeemer, RedeemPhase};
pub use response::Redemption;
pub use scanner::{
    CameraStream, Frame, QrDecoder, QrPattern, QrScanner, ScanNotice, ScanOutcome,
};
