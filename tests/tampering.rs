// Tampered, forged and foreign cookies must never yield session data.
mod common;

use axum::{Extension, Router, body::Body, routing::get};
use http::{Request, Response, header};
use tower::ServiceExt as _;
use tower_cookies::Cookie;
use tower_cookie_session::{CookieSessionConfig, SecretRegistry, Session, format};

fn tamper_cookie_value(cookie: &mut Cookie<'_>) {
    // Flip the last character of the sealed blob, keeping the id tag intact.
    let wire = format::parse(cookie.value());
    let mut blob = wire.blob;
    let last = blob.pop().expect("cookie value has at least one character");
    let replacement = if last == 'A' { 'B' } else { 'A' };
    blob.push(replacement);
    cookie.set_value(format::serialize(
        &blob,
        wire.secret_id.expect("cookie carries a secret id"),
    ));
}

fn routes(config: CookieSessionConfig) -> Router {
    Router::new()
        .route(
            "/set-user",
            get(|Extension(session): Extension<Session>| async move {
                session
                    .insert("user", "alice")
                    .expect("session insert succeeds");
            }),
        )
        .route(
            "/get-user",
            get(|Extension(session): Extension<Session>| async move {
                session
                    .get::<String>("user")
                    .expect("session get succeeds")
                    .unwrap_or_else(|| "none".to_string())
            }),
        )
        .layer(common::make_layer(config))
}

async fn call(app: &Router, uri: &str, cookie: Option<&Cookie<'_>>) -> Response<Body> {
    let mut req = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        req = req.header(header::COOKIE, common::cookie_header_value(cookie));
    }
    let req = req
        .body(Body::empty())
        .expect("request builds successfully");
    app.clone()
        .oneshot(req)
        .await
        .expect("service call succeeds")
}

async fn issued_cookie(app: &Router) -> Cookie<'static> {
    let res = call(app, "/set-user", None).await;
    common::get_session_cookie(&res)
}

#[tokio::test]
async fn untampered_cookie_is_accepted() {
    // Exercise: send back the cookie exactly as issued.
    // Expectation: the session data is visible.
    let app = routes(common::config());
    let cookie = issued_cookie(&app).await;

    let res = call(&app, "/get-user", Some(&cookie)).await;

    assert_eq!(common::body_string(res.into_body()).await, "alice");
}

#[tokio::test]
async fn rejects_tampering() {
    // Exercise: modify one character of the sealed blob.
    // Expectation: the session is treated as absent and the cookie is cleared.
    let app = routes(common::config());
    let mut cookie = issued_cookie(&app).await;
    tamper_cookie_value(&mut cookie);

    let res = call(&app, "/get-user", Some(&cookie)).await;

    assert!(common::is_tombstone(&common::get_session_cookie(&res)));
    assert_eq!(common::body_string(res.into_body()).await, "none");
}

#[tokio::test]
async fn rejects_truncation() {
    // Exercise: drop the authentication tag from the end of the blob.
    // Expectation: the session is treated as absent.
    let app = routes(common::config());
    let mut cookie = issued_cookie(&app).await;
    let wire = format::parse(cookie.value());
    let truncated = &wire.blob[..wire.blob.len() - 22];
    cookie.set_value(format::serialize(truncated, 1));

    let res = call(&app, "/get-user", Some(&cookie)).await;

    assert_eq!(common::body_string(res.into_body()).await, "none");
}

#[tokio::test]
async fn rejects_foreign_secret() {
    // Exercise: a cookie issued by an app with a different secret.
    // Expectation: it does not open here.
    let foreign = routes(CookieSessionConfig::new(
        SecretRegistry::single("someone else's secret").expect("registry builds"),
    ));
    let cookie = issued_cookie(&foreign).await;

    let app = routes(common::config());
    let res = call(&app, "/get-user", Some(&cookie)).await;

    assert!(common::is_tombstone(&common::get_session_cookie(&res)));
    assert_eq!(common::body_string(res.into_body()).await, "none");
}

#[tokio::test]
async fn rejects_rewritten_secret_id() {
    // Exercise: a cookie sealed under an older secret has its id tag changed to an unknown one.
    // Expectation: decryption falls back to the current secret, fails, and the cookie is cleared.
    let previous = routes(CookieSessionConfig::new(
        SecretRegistry::from_pairs([(1, "previous")]).expect("registry builds"),
    ));
    let mut cookie = issued_cookie(&previous).await;

    let app = routes(CookieSessionConfig::new(
        SecretRegistry::from_pairs([(2, "current"), (1, "previous")]).expect("registry builds"),
    ));
    let wire = format::parse(cookie.value());
    cookie.set_value(format::serialize(&wire.blob, 9));

    let res = call(&app, "/get-user", Some(&cookie)).await;

    assert!(common::is_tombstone(&common::get_session_cookie(&res)));
    assert_eq!(common::body_string(res.into_body()).await, "none");
}

#[tokio::test]
async fn non_numeric_secret_id_tries_current_secret() {
    // Exercise: the id tag is not a number.
    // Expectation: the current secret is tried; a cookie it sealed still opens and is re-sealed.
    let app = routes(common::config());
    let mut cookie = issued_cookie(&app).await;
    let wire = format::parse(cookie.value());
    cookie.set_value(format!("{}&id=abc", wire.blob));

    let res = call(&app, "/get-user", Some(&cookie)).await;

    assert!(common::get_session_cookie(&res).value().ends_with("&id=1"));
    assert_eq!(common::body_string(res.into_body()).await, "alice");
}

#[tokio::test]
async fn rejects_plaintext_json() {
    // Exercise: the client forges a cookie holding readable JSON.
    // Expectation: it is rejected like any other undecryptable value.
    let app = routes(common::config());
    let cookie = Cookie::new("kit.session", r#"{"user":"admin"}&id=1"#);

    let res = call(&app, "/get-user", Some(&cookie)).await;

    assert_eq!(common::body_string(res.into_body()).await, "none");
}
