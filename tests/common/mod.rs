#![allow(dead_code)]

// Shared helpers for integration tests.
//
// Responses are read the way a browser would: every `Set-Cookie` header is parsed with
// `tower_cookies::Cookie::parse_encoded` and applied to a jar, and the next request sends what is
// left in that jar.
use std::convert::Infallible;

use axum::body::Body;
use http::{HeaderMap, Request, Response, header};
use http_body_util::BodyExt as _;
use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tower_cookies::Cookie;
use tower_cookie_session::{
    CookieController as _, CookieSessionConfig, CookieSessionManagerLayer, DEFAULT_COOKIE_NAME,
    EXPIRES_FIELD, MemoryCookies, SecretRegistry, Session, crypto, format,
};

pub const SECRET: &str = "integration test secret, never used in production";

pub async fn body_string(body: Body) -> String {
    // Collect an Axum body into a UTF-8 string for assertions.
    let bytes = body
        .collect()
        .await
        .expect("body collects successfully")
        .to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

pub async fn handler(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    // Basic handler used by many tests: write a single key into the session.
    let session = req
        .extensions()
        .get::<Session>()
        .cloned()
        .expect("request includes Session extension");

    session.insert("foo", 42).expect("session insert succeeds");

    Ok(Response::new(Body::empty()))
}

pub async fn noop_handler(_: Request<Body>) -> Result<Response<Body>, Infallible> {
    // Handler that does not access the session at all.
    Ok(Response::new(Body::empty()))
}

pub async fn read_handler(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    // Echo the session data as JSON without changing it.
    let session = req
        .extensions()
        .get::<Session>()
        .cloned()
        .expect("request includes Session extension");

    Ok(Response::new(Body::from(Value::Object(session.data()).to_string())))
}

pub fn secrets() -> SecretRegistry {
    SecretRegistry::single(SECRET).expect("registry builds")
}

pub fn config() -> CookieSessionConfig {
    CookieSessionConfig::new(secrets())
}

pub fn make_layer(config: CookieSessionConfig) -> CookieSessionManagerLayer {
    CookieSessionManagerLayer::new(config).expect("layer builds")
}

pub fn set_cookies(headers: &HeaderMap) -> Vec<Cookie<'static>> {
    // Parse every `Set-Cookie` header on a response.
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|value| {
            let value = value.to_str().expect("set-cookie header is valid utf-8");
            Cookie::parse_encoded(value)
                .expect("set-cookie parses successfully")
                .into_owned()
        })
        .collect()
}

pub fn get_session_cookie(res: &Response<Body>) -> Cookie<'static> {
    // Convenience: the cookie written under the default session name.
    get_named_cookie(res.headers(), DEFAULT_COOKIE_NAME)
}

pub fn get_named_cookie(headers: &HeaderMap, name: &str) -> Cookie<'static> {
    set_cookies(headers)
        .into_iter()
        .find(|cookie| cookie.name() == name)
        .expect("response sets the named cookie")
}

pub fn cookie_header_value(cookie: &Cookie<'_>) -> String {
    // Encode a cookie for use in a `Cookie` request header.
    cookie.encoded().stripped().to_string()
}

pub fn next_cookie_header(request: &str, headers: &HeaderMap) -> String {
    // What a browser sends next: the request cookies with the response applied and expired
    // cookies dropped.
    let jar = MemoryCookies::from_header(request);
    for cookie in set_cookies(headers) {
        jar.add(cookie);
    }
    jar.next_request().cookie_header()
}

pub fn is_tombstone(cookie: &Cookie<'_>) -> bool {
    cookie.value() == "0"
        && cookie
            .expires_datetime()
            .is_some_and(|expires| expires <= OffsetDateTime::now_utc())
}

pub fn seal(secrets: &SecretRegistry, expires: OffsetDateTime, data: Value) -> String {
    // Build a session cookie value with a chosen expiry, sealed under the current secret.
    let Value::Object(mut payload) = data else {
        panic!("session data is a JSON object");
    };
    payload.insert(
        EXPIRES_FIELD.to_string(),
        Value::String(expires.format(&Rfc3339).expect("timestamp formats")),
    );
    let secret = secrets.current();
    let blob = crypto::encrypt(&payload, secret.key()).expect("payload encrypts");
    format::serialize(&blob, secret.id())
}

pub fn sealed_cookie_header(secrets: &SecretRegistry, expires: OffsetDateTime, data: Value) -> String {
    cookie_header_value(&Cookie::new(DEFAULT_COOKIE_NAME, seal(secrets, expires, data)))
}
