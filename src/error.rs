//! Error types.
//!
//! Only [`ConfigError`] is meant to abort anything: it is raised while building a configuration,
//! never per request. The codec and format errors are recovered inside the session state machine
//! by treating the incoming session as absent and scheduling a tombstone.

use thiserror::Error;
use time::Duration;

use crate::secret::SecretId;

/// Problems detected while building a session configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// No secret was supplied.
    #[error("Please provide at least one secret")]
    MissingSecret,

    /// Secret ids must be positive.
    #[error("Invalid secret id: {0} (ids must be positive)")]
    InvalidSecretId(SecretId),

    /// The same id appears twice in one registry.
    #[error("Duplicate secret id: {0}")]
    DuplicateSecretId(SecretId),

    /// A secret has no key material.
    #[error("Secret {0} has empty key material")]
    EmptySecret(SecretId),

    /// Key material could not be turned into an encryption key.
    #[error("Key derivation failed for secret {0}")]
    KeyDerivation(SecretId),

    /// Session lifetime is zero or negative.
    #[error("Invalid session lifetime: {0} (must be positive)")]
    InvalidMaxAge(Duration),

    /// Rolling percentage is not a finite number in `(0, 100]`.
    #[error("Invalid rolling percentage: {0}")]
    InvalidRolling(f64),

    /// Cookie name is empty or contains characters not allowed in a cookie name.
    #[error("Invalid cookie name: {0:?}")]
    InvalidCookieName(String),

    /// The per-cookie byte budget cannot fit a useful chunk.
    #[error("Cookie byte budget too small: {budget} bytes (minimum {minimum})")]
    CookieBudgetTooSmall { budget: usize, minimum: usize },
}

/// Failures of the AEAD codec.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The payload could not be serialized to JSON.
    #[error("Payload serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The cipher refused to encrypt.
    #[error("Encryption failed")]
    Encrypt,

    /// The blob is malformed, was tampered with, was sealed under another key, or does not
    /// contain a JSON object. The reason is for diagnostics only.
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(&'static str),
}

/// Problems reassembling a session cookie from the request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Chunk cookies are present but the meta cookie is not.
    #[error("Chunked session is missing its meta cookie")]
    MissingMeta,

    /// The meta cookie does not have the `<count>-<id>` shape.
    #[error("Malformed chunk meta cookie: {0:?}")]
    MalformedMeta(String),

    /// A chunk announced by the meta cookie is absent.
    #[error("Missing session chunk {0}")]
    MissingChunk(usize),

    /// The meta cookie announces more chunks than are ever written.
    #[error("Too many session chunks: {0}")]
    TooManyChunks(usize),
}

/// Errors surfaced while producing outgoing cookies or reading typed values.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("Session value (de)serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Unchunked cookie, name and reserved margin included, is larger than the byte budget.
    #[error("Session cookie exceeds max_cookie_bytes ({size} > {limit})")]
    CookieTooLarge { size: usize, limit: usize },
}
