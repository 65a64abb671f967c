use std::{borrow::Cow, fmt, sync::Arc};

use http::request::Parts;
use serde::Deserialize;
use time::{Duration, OffsetDateTime};
use tower_cookies::Cookie;

use crate::{
    SameSite,
    error::ConfigError,
    expiry::{self, ExpiryUnit, Rolling},
    format,
    secret::{SecretId, SecretRegistry},
    session::SessionData,
};

pub const DEFAULT_COOKIE_NAME: &str = "kit.session";
pub const DEFAULT_EXPIRES: u64 = 7;
pub const DEFAULT_MAX_COOKIE_BYTES: usize = 4096;

/// Produces the data of a session that did not exist before the request, from the request head.
#[derive(Clone)]
pub struct Initializer(Arc<dyn Fn(&Parts) -> SessionData + Send + Sync>);

impl Initializer {
    pub(crate) fn call(&self, request: &Parts) -> SessionData {
        (self.0)(request)
    }
}

impl fmt::Debug for Initializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Initializer(..)")
    }
}

#[derive(Debug, Clone)]
pub struct CookieSessionConfig {
    pub(crate) name: Cow<'static, str>,
    pub(crate) secrets: SecretRegistry,
    pub(crate) max_age: Duration,
    pub(crate) rolling: Rolling,
    pub(crate) chunked: bool,
    pub(crate) http_only: bool,
    pub(crate) same_site: SameSite,
    pub(crate) secure: bool,
    pub(crate) path: Cow<'static, str>,
    pub(crate) domain: Option<Cow<'static, str>>,
    pub(crate) partitioned: bool,
    pub(crate) max_cookie_bytes: usize,
    pub(crate) init: Option<Initializer>,
    pub(crate) save_uninitialized: bool,
}

impl CookieSessionConfig {
    pub fn new(secrets: SecretRegistry) -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.into(),
            secrets,
            max_age: expiry::to_seconds(DEFAULT_EXPIRES, ExpiryUnit::Days),
            rolling: Rolling::Disabled,
            chunked: false,
            http_only: true,
            same_site: SameSite::Lax,
            secure: true,
            path: "/".into(),
            domain: None,
            partitioned: false,
            max_cookie_bytes: DEFAULT_MAX_COOKIE_BYTES,
            init: None,
            save_uninitialized: false,
        }
    }

    #[must_use]
    pub fn with_name<N: Into<Cow<'static, str>>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_secrets(mut self, secrets: SecretRegistry) -> Self {
        self.secrets = secrets;
        self
    }

    /// Session lifetime as `count` units.
    #[must_use]
    pub fn with_expires(mut self, count: u64, unit: ExpiryUnit) -> Self {
        self.max_age = expiry::to_seconds(count, unit);
        self
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    #[must_use]
    pub fn with_rolling(mut self, rolling: Rolling) -> Self {
        self.rolling = rolling;
        self
    }

    #[must_use]
    pub fn with_chunked(mut self, chunked: bool) -> Self {
        self.chunked = chunked;
        self
    }

    #[must_use]
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    #[must_use]
    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn with_path<P: Into<Cow<'static, str>>>(mut self, path: P) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn with_domain<D: Into<Cow<'static, str>>>(mut self, domain: D) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn without_domain(mut self) -> Self {
        self.domain = None;
        self
    }

    #[must_use]
    pub fn with_partitioned(mut self, partitioned: bool) -> Self {
        self.partitioned = partitioned;
        self
    }

    /// Per-cookie byte budget. Unchunked sessions larger than this fail to save; chunked sessions
    /// are split to fit it.
    #[must_use]
    pub fn with_max_cookie_bytes(mut self, max_cookie_bytes: usize) -> Self {
        self.max_cookie_bytes = max_cookie_bytes;
        self
    }

    /// Data for requests that arrive without a session cookie. The closure sees the request head,
    /// which is empty when the session is loaded without one.
    #[must_use]
    pub fn with_init<F>(mut self, init: F) -> Self
    where
        F: Fn(&Parts) -> SessionData + Send + Sync + 'static,
    {
        self.init = Some(Initializer(Arc::new(init)));
        self
    }

    /// Whether initializer data is written to the client before the handler changes it.
    #[must_use]
    pub fn with_save_uninitialized(mut self, save_uninitialized: bool) -> Self {
        self.save_uninitialized = save_uninitialized;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn secrets(&self) -> &SecretRegistry {
        &self.secrets
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn rolling(&self) -> Rolling {
        self.rolling
    }

    pub fn chunked(&self) -> bool {
        self.chunked
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_cookie_name(&self.name) {
            return Err(ConfigError::InvalidCookieName(self.name.to_string()));
        }

        if !self.max_age.is_positive() {
            return Err(ConfigError::InvalidMaxAge(self.max_age));
        }

        if let Rolling::Percentage(percentage) = self.rolling
            && !self.rolling.is_valid()
        {
            return Err(ConfigError::InvalidRolling(percentage));
        }

        if self.chunked {
            let minimum = format::minimum_budget(&self.name);
            if self.max_cookie_bytes < minimum {
                return Err(ConfigError::CookieBudgetTooSmall {
                    budget: self.max_cookie_bytes,
                    minimum,
                });
            }
        }

        Ok(())
    }

    /// Session cookie carrying `value` under `name`, living for `max_age` when given.
    pub(crate) fn build_cookie(
        &self,
        name: String,
        value: String,
        max_age: Option<Duration>,
    ) -> Cookie<'static> {
        let mut cookie_builder = Cookie::build((name, value))
            .http_only(self.http_only)
            .same_site(self.same_site)
            .secure(self.secure)
            .path(self.path.clone());

        if let Some(max_age) = max_age {
            cookie_builder = cookie_builder.max_age(std::cmp::max(max_age, Duration::ZERO));
        }

        if let Some(domain) = self.domain.clone() {
            cookie_builder = cookie_builder.domain(domain);
        }

        if self.partitioned {
            cookie_builder = cookie_builder.partitioned(true);
        }

        cookie_builder.build()
    }

    /// Cookie instructing the client to drop `name`: value `0`, no max-age, expired long ago.
    pub(crate) fn tombstone(&self, name: String) -> Cookie<'static> {
        let mut cookie = self.build_cookie(name, "0".to_string(), None);
        cookie.set_expires(OffsetDateTime::UNIX_EPOCH);
        cookie
    }
}

fn is_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_graphic()
                && !matches!(
                    b,
                    b'(' | b')'
                        | b'<'
                        | b'>'
                        | b'@'
                        | b','
                        | b';'
                        | b':'
                        | b'\\'
                        | b'"'
                        | b'/'
                        | b'['
                        | b']'
                        | b'?'
                        | b'='
                        | b'{'
                        | b'}'
                )
        })
}

/// User-facing session options, as they would appear in a configuration file.
///
/// ```json
/// {
///   "secret": [{ "id": 2, "secret": "new" }, { "id": 1, "secret": "old" }],
///   "key": "app.session",
///   "expires": 12,
///   "expires_in": "hours",
///   "rolling": 25,
///   "chunked": true,
///   "cookie": { "sameSite": "strict", "path": "/app" }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub secret: Option<SecretOption>,
    pub key: Option<String>,
    pub expires: Option<u64>,
    pub expires_in: Option<ExpiryUnit>,
    pub rolling: Option<RollingOption>,
    pub chunked: Option<bool>,
    #[serde(alias = "saveUninitialized")]
    pub save_uninitialized: Option<bool>,
    /// Plain-HTTP development; makes `secure` default to false.
    pub development: bool,
    pub cookie: CookieOptions,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SecretOption {
    Single(String),
    Rotating(Vec<SecretEntry>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecretEntry {
    pub id: SecretId,
    pub secret: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum RollingOption {
    Enabled(bool),
    Percentage(f64),
}

impl From<RollingOption> for Rolling {
    fn from(option: RollingOption) -> Self {
        match option {
            RollingOption::Enabled(true) => Rolling::Always,
            RollingOption::Enabled(false) => Rolling::Disabled,
            RollingOption::Percentage(percentage) if percentage == 0.0 => Rolling::Disabled,
            RollingOption::Percentage(percentage) => Rolling::Percentage(percentage),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CookieOptions {
    pub http_only: Option<bool>,
    pub same_site: Option<SameSiteOption>,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub secure: Option<bool>,
    pub partitioned: Option<bool>,
    pub max_bytes: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSiteOption {
    Strict,
    Lax,
    None,
}

impl From<SameSiteOption> for SameSite {
    fn from(option: SameSiteOption) -> Self {
        match option {
            SameSiteOption::Strict => SameSite::Strict,
            SameSiteOption::Lax => SameSite::Lax,
            SameSiteOption::None => SameSite::None,
        }
    }
}

impl SessionOptions {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(SecretOption::Single(secret.into())),
            ..Self::default()
        }
    }

    /// Resolve defaults and validate. Fails when no secret is configured.
    pub fn normalize(self) -> Result<CookieSessionConfig, ConfigError> {
        let secrets = match self.secret {
            None => return Err(ConfigError::MissingSecret),
            Some(SecretOption::Single(secret)) => SecretRegistry::single(secret)?,
            Some(SecretOption::Rotating(entries)) => SecretRegistry::from_pairs(
                entries.into_iter().map(|entry| (entry.id, entry.secret)),
            )?,
        };

        let expires = self
            .expires
            .filter(|expires| *expires > 0)
            .unwrap_or(DEFAULT_EXPIRES);
        let cookie = self.cookie;

        let mut config = CookieSessionConfig::new(secrets)
            .with_expires(expires, self.expires_in.unwrap_or_default())
            .with_rolling(self.rolling.map(Rolling::from).unwrap_or_default())
            .with_chunked(self.chunked.unwrap_or(false))
            .with_save_uninitialized(self.save_uninitialized.unwrap_or(false))
            .with_http_only(cookie.http_only.unwrap_or(true))
            .with_same_site(cookie.same_site.map(SameSite::from).unwrap_or(SameSite::Lax))
            .with_secure(cookie.secure.unwrap_or(!self.development))
            .with_path(cookie.path.unwrap_or_else(|| "/".to_string()))
            .with_partitioned(cookie.partitioned.unwrap_or(false))
            .with_max_cookie_bytes(cookie.max_bytes.unwrap_or(DEFAULT_MAX_COOKIE_BYTES));

        if let Some(key) = self.key.filter(|key| !key.is_empty()) {
            config = config.with_name(key);
        }
        if let Some(domain) = cookie.domain {
            config = config.with_domain(domain);
        }

        config.validate()?;
        Ok(config)
    }
}
