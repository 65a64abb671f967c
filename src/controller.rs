//! The only I/O the session engine performs: reading request cookies and queueing response
//! cookies. Deleting a cookie is expressed as writing an expired one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use time::OffsetDateTime;
use tower_cookies::{Cookie, Cookies, cookie::CookieJar};

pub trait CookieController: Clone + Send + Sync + 'static {
    /// Value of the request cookie `name`.
    fn get(&self, name: &str) -> Option<String>;

    /// Queue `cookie` as a `Set-Cookie` on the response.
    fn add(&self, cookie: Cookie<'static>);
}

impl CookieController for Cookies {
    fn get(&self, name: &str) -> Option<String> {
        Cookies::get(self, name).map(|cookie| cookie.value().to_string())
    }

    fn add(&self, cookie: Cookie<'static>) {
        Cookies::add(self, cookie);
    }
}

/// Framework-independent cookie jar for driving sessions by hand.
///
/// Seed it from a request `Cookie` header, let a session read and write through it, then collect
/// the response cookies with [`MemoryCookies::response_cookies`].
#[derive(Debug, Clone, Default)]
pub struct MemoryCookies {
    jar: Arc<Mutex<CookieJar>>,
}

impl MemoryCookies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `Cookie` request header (`a=1; b=2`). Unparseable pairs are skipped.
    pub fn from_header(header: &str) -> Self {
        let mut jar = CookieJar::new();
        for pair in header.split(';').map(str::trim).filter(|pair| !pair.is_empty()) {
            if let Ok(cookie) = Cookie::parse_encoded(pair.to_string()) {
                jar.add_original(cookie);
            }
        }
        Self {
            jar: Arc::new(Mutex::new(jar)),
        }
    }

    fn jar(&self) -> MutexGuard<'_, CookieJar> {
        self.jar.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cookies written since the jar was created.
    pub fn response_cookies(&self) -> Vec<Cookie<'static>> {
        self.jar().delta().cloned().collect()
    }

    /// `Set-Cookie` header values for [`MemoryCookies::response_cookies`].
    pub fn set_cookie_headers(&self) -> Vec<String> {
        self.response_cookies()
            .iter()
            .map(|cookie| cookie.encoded().to_string())
            .collect()
    }

    /// The jar a browser would hold after applying the response: written cookies replace request
    /// cookies of the same name and expired cookies are dropped.
    pub fn next_request(&self) -> Self {
        let now = OffsetDateTime::now_utc();
        let mut next = CookieJar::new();
        for cookie in self.jar().iter() {
            let expired = cookie
                .expires_datetime()
                .is_some_and(|expires| expires <= now)
                || cookie
                    .max_age()
                    .is_some_and(|max_age| max_age <= time::Duration::ZERO);
            if !expired {
                next.add_original(Cookie::new(
                    cookie.name().to_string(),
                    cookie.value().to_string(),
                ));
            }
        }
        Self {
            jar: Arc::new(Mutex::new(next)),
        }
    }

    /// Replace or insert a request cookie, as a client tampering with its jar would.
    pub fn insert_request_cookie(&self, name: impl Into<String>, value: impl Into<String>) {
        self.jar()
            .add_original(Cookie::new(name.into(), value.into()));
    }

    /// Drop a request cookie without recording a removal. Pending response cookies are cleared.
    pub fn forget(&self, name: &str) {
        let mut jar = self.jar();
        let mut kept = CookieJar::new();
        for cookie in jar.iter().filter(|cookie| cookie.name() != name) {
            kept.add_original(cookie.clone());
        }
        *jar = kept;
    }

    /// `Cookie` request header carrying every cookie in the jar.
    pub fn cookie_header(&self) -> String {
        self.jar()
            .iter()
            .map(|cookie| cookie.encoded().stripped().to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn names(&self) -> Vec<String> {
        self.jar()
            .iter()
            .map(|cookie| cookie.name().to_string())
            .collect()
    }
}

impl CookieController for MemoryCookies {
    fn get(&self, name: &str) -> Option<String> {
        self.jar().get(name).map(|cookie| cookie.value().to_string())
    }

    fn add(&self, cookie: Cookie<'static>) {
        self.jar().add(cookie);
    }
}
