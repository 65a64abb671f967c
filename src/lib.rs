//! Encrypted cookie sessions with no server-side storage.
//!
//! The whole session is a JSON object sealed with AES-256-GCM and stored in the client's cookies.
//! Secrets carry an id so they can be rotated: the newest secret seals every outgoing cookie, older
//! ones still open cookies issued before the rotation and those sessions are transparently
//! re-sealed. Sessions too large for one cookie can be split across several (`chunked`).
//!
//! [`CookieSession`] is the framework-independent engine; it reads and writes cookies through a
//! [`CookieController`]. With the `tower` feature (on by default), [`CookieSessionManagerLayer`]
//! runs it around every request and exposes a [`Session`] handle in the request extensions.
//!
//! ```no_run
//! use tower_cookie_session::{CookieSessionConfig, CookieSessionManagerLayer, SecretRegistry};
//!
//! # fn main() -> Result<(), tower_cookie_session::ConfigError> {
//! let secrets = SecretRegistry::from_pairs([(2, "new secret"), (1, "old secret")])?;
//! let layer = CookieSessionManagerLayer::new(CookieSessionConfig::new(secrets).with_chunked(true))?;
//! # let _ = layer;
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//! Cookies are confidential and tamper-evident, but a client can always replay a cookie it was
//! given earlier until that cookie expires. Store nothing in the session that must be revocable.

mod config;
mod controller;
pub mod crypto;
mod error;
pub mod expiry;
pub mod format;
#[cfg(feature = "tower")]
pub mod layer;
mod secret;
mod session;

pub use tower_cookies::cookie::SameSite;

pub use crate::config::{
    CookieOptions, CookieSessionConfig, DEFAULT_COOKIE_NAME, DEFAULT_EXPIRES,
    DEFAULT_MAX_COOKIE_BYTES, RollingOption, SameSiteOption, SecretEntry, SecretOption,
    SessionOptions,
};
pub use crate::controller::{CookieController, MemoryCookies};
pub use crate::error::{ConfigError, CryptoError, FormatError, SessionError};
pub use crate::expiry::{ExpiryUnit, Rolling};
pub use crate::secret::{DEFAULT_SECRET_ID, Secret, SecretId, SecretRegistry};
pub use crate::session::{CookieSession, EXPIRES_FIELD, Session, SessionData, SessionStatus};

#[cfg(feature = "tower")]
pub use crate::layer::CookieSessionManagerLayer;
