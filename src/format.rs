//! Helpers for encoding/decoding the cookie session wire format.
//!
//! This is primarily useful for testing and debugging.
//!
//! Unchunked, a session lives in one cookie:
//!
//! ```text
//! <name>=<blob>&id=<secret id>
//! ```
//!
//! Chunked, the blob is split across numbered cookies and a meta cookie records how many chunks
//! there are and which secret sealed them:
//!
//! ```text
//! <name>.0=<chunk 0>
//! <name>.1=<chunk 1>
//! <name>.meta=<chunk count>-<secret id>
//! ```

use crate::{
    error::FormatError,
    secret::{DEFAULT_SECRET_ID, SecretId},
};

/// Separator between the blob and the secret id in an unchunked cookie.
pub const ID_TAG: &str = "&id=";
/// Suffix of the cookie carrying chunk count and secret id.
pub const META_SUFFIX: &str = "meta";
/// Largest chunk count ever written or read.
pub const MAX_CHUNKS: usize = 64;
/// Bytes reserved per cookie for attributes and browser bookkeeping.
pub const CHUNK_SAFETY_MARGIN: usize = 128;
/// Smallest chunk payload a configuration may leave room for.
pub const MIN_CHUNK_BYTES: usize = 64;

const INDEX_DIGITS: usize = 4;

/// A sealed blob together with the id of the secret that sealed it.
///
/// `secret_id` is `None` when the cookie carried an id that is not a number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireValue {
    pub blob: String,
    pub secret_id: Option<SecretId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedValue {
    pub name: String,
    pub value: String,
}

/// Cookies making up one chunked session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedValue {
    pub chunks: Vec<NamedValue>,
    pub meta: NamedValue,
}

/// Unchunked cookie value for `blob`.
pub fn serialize(blob: &str, secret_id: SecretId) -> String {
    format!("{blob}{ID_TAG}{secret_id}")
}

/// Split an unchunked cookie value. A value without an id tag predates key rotation and is taken
/// to be sealed with [`DEFAULT_SECRET_ID`].
pub fn parse(value: &str) -> WireValue {
    match value.split_once(ID_TAG) {
        Some((blob, id)) => WireValue {
            blob: blob.to_string(),
            secret_id: id.parse().ok(),
        },
        None => WireValue {
            blob: value.to_string(),
            secret_id: Some(DEFAULT_SECRET_ID),
        },
    }
}

pub fn chunk_name(key: &str, index: usize) -> String {
    format!("{key}.{index}")
}

pub fn meta_name(key: &str) -> String {
    format!("{key}.{META_SUFFIX}")
}

/// Smallest per-cookie byte budget that leaves [`MIN_CHUNK_BYTES`] for chunks of `key`.
pub fn minimum_budget(key: &str) -> usize {
    chunk_overhead(key) + MIN_CHUNK_BYTES
}

/// How many blob bytes fit in one chunk cookie of `key` under `budget`.
pub fn chunk_capacity(key: &str, budget: usize) -> Option<usize> {
    budget
        .checked_sub(chunk_overhead(key))
        .filter(|capacity| *capacity >= MIN_CHUNK_BYTES)
}

fn chunk_overhead(key: &str) -> usize {
    // "<key>.<index>=" plus room for attributes
    key.len() + 1 + INDEX_DIGITS + 1 + CHUNK_SAFETY_MARGIN
}

/// Split `blob` into chunk cookies for `key` that each fit `budget` bytes.
pub fn serialize_chunked(
    blob: &str,
    secret_id: SecretId,
    key: &str,
    budget: usize,
) -> Result<ChunkedValue, FormatError> {
    let capacity = chunk_capacity(key, budget).unwrap_or(MIN_CHUNK_BYTES);

    let mut pieces = Vec::new();
    let mut rest = blob;
    while !rest.is_empty() {
        let mut end = capacity.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (piece, tail) = rest.split_at(end);
        pieces.push(piece);
        rest = tail;
    }
    if pieces.is_empty() {
        pieces.push("");
    }

    if pieces.len() > MAX_CHUNKS {
        return Err(FormatError::TooManyChunks(pieces.len()));
    }

    let chunks = pieces
        .iter()
        .enumerate()
        .map(|(index, piece)| NamedValue {
            name: chunk_name(key, index),
            value: (*piece).to_string(),
        })
        .collect::<Vec<_>>();

    let meta = NamedValue {
        name: meta_name(key),
        value: format!("{}-{secret_id}", chunks.len()),
    };

    Ok(ChunkedValue { chunks, meta })
}

/// Parse a meta cookie value into `(chunk count, secret id)`.
pub fn parse_meta(value: &str) -> Result<(usize, SecretId), FormatError> {
    let malformed = || FormatError::MalformedMeta(value.to_string());

    let (count, id) = value.split_once('-').ok_or_else(malformed)?;
    let count: usize = count.parse().map_err(|_| malformed())?;
    let id: SecretId = id.parse().map_err(|_| malformed())?;

    if count == 0 {
        return Err(malformed());
    }
    if count > MAX_CHUNKS {
        return Err(FormatError::TooManyChunks(count));
    }

    Ok((count, id))
}

/// Read the session for `key` from the request cookies.
///
/// `lookup` returns the value of a request cookie by name. `Ok(None)` means the request carries no
/// session at all; an error means cookies are present but do not form a complete session, which
/// callers must treat as an invalid session rather than attempt recovery.
pub fn deserialize<F>(lookup: F, key: &str, chunked: bool) -> Result<Option<WireValue>, FormatError>
where
    F: Fn(&str) -> Option<String>,
{
    if !chunked {
        return Ok(lookup(key)
            .filter(|value| !value.is_empty())
            .map(|value| parse(&value)));
    }

    let Some(meta) = lookup(&meta_name(key)) else {
        if lookup(&chunk_name(key, 0)).is_some() {
            return Err(FormatError::MissingMeta);
        }
        return Ok(None);
    };

    let (count, secret_id) = parse_meta(&meta)?;

    let mut blob = String::new();
    for index in 0..count {
        let chunk = lookup(&chunk_name(key, index)).ok_or(FormatError::MissingChunk(index))?;
        blob.push_str(&chunk);
    }

    Ok(Some(WireValue {
        blob,
        secret_id: Some(secret_id),
    }))
}
