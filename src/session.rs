//! The per-request session state machine.
//!
//! A [`CookieSession`] is created from the request cookies, read and mutated by the handler, and
//! finally turned into the response cookies by [`CookieSession::commit`]. It never outlives one
//! request. [`Session`] is a cloneable handle to one instance, for frameworks that pass request
//! state around by value.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use http::request::Parts;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};
use tower_cookies::Cookie;

use crate::{
    config::CookieSessionConfig,
    controller::CookieController,
    crypto,
    error::SessionError,
    expiry, format,
    secret::SecretId,
};

/// Caller-visible session data.
pub type SessionData = Map<String, Value>;

/// Field the engine stores the expiry under. Callers cannot set it.
pub const EXPIRES_FIELD: &str = "expires";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// The request carried no session.
    Empty,
    /// A valid, unexpired session is held.
    Loaded,
    /// The request carried a session that failed to decode or had expired.
    Invalid,
    /// The handler destroyed the session.
    Destroyed,
}

/// What is sealed inside the cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Payload {
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    expires: Option<OffsetDateTime>,
    #[serde(flatten)]
    data: SessionData,
}

/// Session cookies found on the request, whether or not they decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Incoming {
    plain: bool,
    meta: bool,
    chunks: usize,
}

impl Incoming {
    fn scan<C: CookieController>(cookies: &C, name: &str) -> Self {
        let plain = cookies.get(name).is_some();

        let meta = cookies.get(&format::meta_name(name));
        let announced = meta
            .as_deref()
            .and_then(|value| format::parse_meta(value).ok())
            .map_or(0, |(count, _)| count);

        let present = (0..format::MAX_CHUNKS)
            .take_while(|index| cookies.get(&format::chunk_name(name, *index)).is_some())
            .count();

        Self {
            plain,
            meta: meta.is_some(),
            chunks: present.max(announced),
        }
    }

    fn has_chunks(&self) -> bool {
        self.meta || self.chunks > 0
    }
}

enum Decoded {
    Absent,
    Invalid,
    Expired,
    Loaded {
        payload: Payload,
        secret_id: Option<SecretId>,
    },
}

#[derive(Debug)]
pub struct CookieSession {
    config: Arc<CookieSessionConfig>,
    status: SessionStatus,
    payload: Option<Payload>,
    incoming: Incoming,
    is_expired: bool,
    needs_re_encrypt: bool,
    needs_destroy: bool,
    needs_sync: bool,
}

impl CookieSession {
    /// Decode the session carried by `cookies` and apply the configured policies.
    pub fn load<C: CookieController>(cookies: &C, config: Arc<CookieSessionConfig>) -> Self {
        Self::load_inner(cookies, config, None)
    }

    /// Like [`load`](Self::load), handing `request` to the configured initializer.
    pub fn load_with_request<C: CookieController>(
        cookies: &C,
        config: Arc<CookieSessionConfig>,
        request: &Parts,
    ) -> Self {
        Self::load_inner(cookies, config, Some(request))
    }

    fn load_inner<C: CookieController>(
        cookies: &C,
        config: Arc<CookieSessionConfig>,
        request: Option<&Parts>,
    ) -> Self {
        let incoming = Incoming::scan(cookies, config.name());
        let decoded = decode(cookies, &config);

        let mut session = Self {
            config,
            status: SessionStatus::Empty,
            payload: None,
            incoming,
            is_expired: false,
            needs_re_encrypt: false,
            needs_destroy: false,
            needs_sync: false,
        };

        match decoded {
            Decoded::Absent => {}
            Decoded::Invalid => session.invalidate(),
            Decoded::Expired => {
                session.is_expired = true;
                session.invalidate();
            }
            Decoded::Loaded { payload, secret_id } => {
                session.status = SessionStatus::Loaded;
                session.payload = Some(payload);

                let current = session.config.secrets().current().id();
                if secret_id != Some(current) {
                    tracing::debug!(
                        from = ?secret_id,
                        to = current,
                        "cookie session re-encrypting under current secret"
                    );
                    session.needs_re_encrypt = true;
                    session.needs_sync = true;
                }
            }
        }

        session.apply_rolling();
        session.apply_initializer(request);
        session
    }

    fn invalidate(&mut self) {
        self.status = SessionStatus::Invalid;
        self.payload = None;
        self.needs_destroy = true;
        self.needs_sync = true;
    }

    fn apply_rolling(&mut self) {
        if self.status != SessionStatus::Loaded {
            return;
        }
        let remaining = self.expires().map(expiry::remaining_max_age);
        if self
            .config
            .rolling()
            .should_refresh(remaining, self.config.max_age())
        {
            tracing::debug!("cookie session rolling refresh");
            self.refresh(None);
        }
    }

    fn apply_initializer(&mut self, request: Option<&Parts>) {
        let Some(init) = self.config.init.clone() else {
            return;
        };

        let seeds = match self.status {
            SessionStatus::Empty => true,
            SessionStatus::Invalid => self.config.save_uninitialized,
            SessionStatus::Loaded | SessionStatus::Destroyed => false,
        };
        if !seeds {
            return;
        }

        let data = match request {
            Some(request) => init.call(request),
            None => init.call(&http::Request::new(()).into_parts().0),
        };

        if self.config.save_uninitialized {
            self.set(data);
        } else {
            let mut data = data;
            data.remove(EXPIRES_FIELD);
            self.payload = Some(Payload {
                expires: Some(expiry::expiry_timestamp(self.config.max_age())),
                data,
            });
            self.status = SessionStatus::Loaded;
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// The incoming session had expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired
    }

    /// The incoming session was sealed with an older secret and will be re-sealed.
    pub fn needs_re_encrypt(&self) -> bool {
        self.needs_re_encrypt
    }

    pub fn needs_destroy(&self) -> bool {
        self.needs_destroy
    }

    /// Response cookies will be written.
    pub fn needs_sync(&self) -> bool {
        self.needs_sync
    }

    fn live(&self) -> Option<&Payload> {
        match self.status {
            SessionStatus::Loaded => self.payload.as_ref(),
            _ => None,
        }
    }

    /// Current data, or an empty map when there is no valid session.
    pub fn data(&self) -> SessionData {
        self.live()
            .map(|payload| payload.data.clone())
            .unwrap_or_default()
    }

    pub fn expires(&self) -> Option<OffsetDateTime> {
        self.live().and_then(|payload| payload.expires)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SessionError> {
        self.live()
            .and_then(|payload| payload.data.get(key))
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(SessionError::from)
    }

    /// Replace the session data. An existing session keeps its expiry; a new one gets the full
    /// configured lifetime.
    pub fn set(&mut self, mut data: SessionData) -> SessionData {
        if data.remove(EXPIRES_FIELD).is_some() {
            tracing::debug!("ignoring caller-supplied `{EXPIRES_FIELD}` in session data");
        }

        let expires = self
            .expires()
            .unwrap_or_else(|| expiry::expiry_timestamp(self.config.max_age()));

        self.payload = Some(Payload {
            expires: Some(expires),
            data: data.clone(),
        });
        self.status = SessionStatus::Loaded;
        self.needs_destroy = false;
        self.needs_sync = true;

        data
    }

    /// Merge what `update` returns over the current data, then [`set`](Self::set) the result.
    pub fn update<F>(&mut self, update: F) -> SessionData
    where
        F: FnOnce(&SessionData) -> SessionData,
    {
        let mut data = self.data();
        let patch = update(&data);
        data.extend(patch);
        self.set(data)
    }

    pub fn insert<T: Serialize>(&mut self, key: &str, value: T) -> Result<SessionData, SessionError> {
        let value = serde_json::to_value(value)?;
        Ok(self.update(|_| Map::from_iter([(key.to_string(), value)])))
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let mut data = self.data();
        let removed = data.remove(key)?;
        self.set(data);
        Some(removed)
    }

    /// Restart the session lifetime from now, for `expires_in` or the configured lifetime.
    /// Returns `false` when there is no session to refresh.
    pub fn refresh(&mut self, expires_in: Option<Duration>) -> bool {
        if self.status != SessionStatus::Loaded {
            return false;
        }
        let max_age = expires_in.unwrap_or(self.config.max_age());
        let Some(payload) = self.payload.as_mut() else {
            return false;
        };

        payload.expires = Some(expiry::expiry_timestamp(max_age));
        self.needs_sync = true;
        true
    }

    /// Drop the session and tell the client to forget it. Idempotent.
    pub fn destroy(&mut self) -> bool {
        self.payload = None;
        self.status = SessionStatus::Destroyed;
        self.needs_re_encrypt = false;
        self.needs_destroy = true;
        self.needs_sync = true;
        true
    }

    /// The response cookies this session calls for, without writing them.
    pub fn outgoing_cookies(&self) -> Result<Vec<Cookie<'static>>, SessionError> {
        if !self.needs_sync {
            return Ok(Vec::new());
        }
        if self.needs_destroy {
            return Ok(self.tombstones());
        }
        match self.live() {
            Some(payload) => self.sealed_cookies(payload),
            None => Ok(Vec::new()),
        }
    }

    /// Write the response cookies through `cookies`. Later calls write nothing until the session
    /// changes again.
    pub fn commit<C: CookieController>(&mut self, cookies: &C) -> Result<usize, SessionError> {
        let outgoing = self.outgoing_cookies()?;
        let written = outgoing.len();
        for cookie in outgoing {
            cookies.add(cookie);
        }
        self.needs_sync = false;
        Ok(written)
    }

    fn tombstones(&self) -> Vec<Cookie<'static>> {
        let config = &self.config;
        let name = config.name();
        let mut cookies = Vec::new();

        if config.chunked() {
            self.chunk_tombstones(0, &mut cookies);
            if !self.incoming.meta {
                cookies.push(config.tombstone(format::meta_name(name)));
            }
            if self.incoming.plain {
                cookies.push(config.tombstone(name.to_string()));
            }
        } else {
            cookies.push(config.tombstone(name.to_string()));
            self.chunk_tombstones(0, &mut cookies);
        }

        cookies
    }

    /// Tombstones for request chunk cookies from index `from` on, plus the meta cookie when it
    /// was sent and every chunk is being cleared.
    fn chunk_tombstones(&self, from: usize, cookies: &mut Vec<Cookie<'static>>) {
        let name = self.config.name();
        for index in from..self.incoming.chunks {
            cookies.push(self.config.tombstone(format::chunk_name(name, index)));
        }
        if from == 0 && self.incoming.meta {
            cookies.push(self.config.tombstone(format::meta_name(name)));
        }
    }

    fn sealed_cookies(&self, payload: &Payload) -> Result<Vec<Cookie<'static>>, SessionError> {
        let config = &self.config;
        let name = config.name();
        let secret = config.secrets().current();
        let blob = crypto::encrypt(payload, secret.key())?;
        let max_age = payload.expires.map(expiry::remaining_max_age);

        let mut cookies = Vec::new();

        if config.chunked() {
            let chunked =
                format::serialize_chunked(&blob, secret.id(), name, config.max_cookie_bytes)?;
            let count = chunked.chunks.len();

            for chunk in chunked.chunks {
                cookies.push(config.build_cookie(chunk.name, chunk.value, max_age));
            }
            cookies.push(config.build_cookie(chunked.meta.name, chunked.meta.value, max_age));

            if self.incoming.chunks > count {
                tracing::debug!(
                    from = self.incoming.chunks,
                    to = count,
                    "cookie session clearing stale chunks"
                );
            }
            self.chunk_tombstones(count, &mut cookies);
            if self.incoming.plain {
                cookies.push(config.tombstone(name.to_string()));
            }
        } else {
            let cookie = config.build_cookie(
                name.to_string(),
                format::serialize(&blob, secret.id()),
                max_age,
            );
            // Measured as sent: `name=value` percent-encoded, plus the margin chunks reserve.
            let size =
                cookie.encoded().stripped().to_string().len() + format::CHUNK_SAFETY_MARGIN;
            if size > config.max_cookie_bytes {
                return Err(SessionError::CookieTooLarge {
                    size,
                    limit: config.max_cookie_bytes,
                });
            }
            cookies.push(cookie);

            if self.incoming.has_chunks() {
                self.chunk_tombstones(0, &mut cookies);
            }
        }

        Ok(cookies)
    }
}

fn decode<C: CookieController>(cookies: &C, config: &CookieSessionConfig) -> Decoded {
    let wire = match format::deserialize(|name| cookies.get(name), config.name(), config.chunked())
    {
        Ok(Some(wire)) => wire,
        Ok(None) => return Decoded::Absent,
        Err(err) => {
            tracing::warn!(err = %err, "cookie session reassembly failed");
            return Decoded::Invalid;
        }
    };

    let secret = config.secrets().resolve(wire.secret_id);
    if wire.secret_id.is_none_or(|id| id != secret.id()) {
        tracing::debug!(
            requested = ?wire.secret_id,
            fallback = secret.id(),
            "cookie session secret id unknown, trying current secret"
        );
    }

    let payload: Payload = match crypto::decrypt(&wire.blob, secret.key()) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(
                err = %err,
                secret = secret.id(),
                fingerprint = %secret.fingerprint(),
                "cookie session decode failed"
            );
            return Decoded::Invalid;
        }
    };

    if payload
        .expires
        .is_some_and(|expires| expires <= OffsetDateTime::now_utc())
    {
        tracing::warn!("cookie session expired");
        return Decoded::Expired;
    }

    Decoded::Loaded {
        payload,
        secret_id: wire.secret_id,
    }
}

/// Cloneable handle to the [`CookieSession`] of one request.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<Mutex<CookieSession>>,
}

impl Session {
    pub fn new(session: CookieSession) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CookieSession> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn data(&self) -> SessionData {
        self.lock().data()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SessionError> {
        self.lock().get(key)
    }

    pub fn set(&self, data: SessionData) -> SessionData {
        self.lock().set(data)
    }

    /// See [`CookieSession::update`]. `update` runs without the session locked, so it may read
    /// the session through another handle.
    pub fn update<F>(&self, update: F) -> SessionData
    where
        F: FnOnce(&SessionData) -> SessionData,
    {
        let patch = update(&self.data());
        self.lock().update(|_| patch)
    }

    pub fn insert<T: Serialize>(&self, key: &str, value: T) -> Result<SessionData, SessionError> {
        self.lock().insert(key, value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }

    pub fn refresh(&self, expires_in: Option<Duration>) -> bool {
        self.lock().refresh(expires_in)
    }

    pub fn destroy(&self) -> bool {
        self.lock().destroy()
    }

    pub fn expires(&self) -> Option<OffsetDateTime> {
        self.lock().expires()
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().status()
    }

    pub fn needs_sync(&self) -> bool {
        self.lock().needs_sync()
    }

    pub fn needs_destroy(&self) -> bool {
        self.lock().needs_destroy()
    }

    pub fn commit<C: CookieController>(&self, cookies: &C) -> Result<usize, SessionError> {
        self.lock().commit(cookies)
    }
}
