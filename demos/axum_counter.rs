use std::net::SocketAddr;

use axum::{Extension, Router, routing::get};
use tower_cookie_session::{
    CookieSessionConfig, CookieSessionManagerLayer, ExpiryUnit, Rolling, SameSite, SecretRegistry,
    Session,
};

async fn index(Extension(session): Extension<Session>) -> String {
    let n: usize = session
        .get("n")
        .expect("session get succeeds")
        .unwrap_or(0);
    session
        .insert("n", n + 1)
        .expect("session insert succeeds");
    format!("n={n}")
}

async fn logout(Extension(session): Extension<Session>) -> &'static str {
    session.destroy();
    "bye"
}

#[tokio::main]
async fn main() {
    // Newest first: id 2 seals new cookies, id 1 still opens cookies issued before the rotation.
    let secrets = SecretRegistry::from_pairs([
        (2, "728hH4HPFNCduN6js58D3ZAfHeoRZc4v"),
        (1, "6t2WQxmFY0ubWb5lZeUHgkSq2O5M64kR"),
    ])
    .expect("secrets are valid");

    let session_config = CookieSessionConfig::new(secrets)
        // Default: "session"
        .with_name("session")
        // Default: 7 days
        .with_expires(1, ExpiryUnit::Hours)
        // Default: Rolling::Disabled
        .with_rolling(Rolling::Percentage(50.0))
        // Default: false
        .with_chunked(true)
        // Default: true
        .with_http_only(true)
        // Default: SameSite::Lax
        .with_same_site(SameSite::Strict)
        // Default: true (set to false for local HTTP development)
        .with_secure(false)
        // Default: "/"
        .with_path("/")
        // Default: None
        .without_domain()
        // Default: 4096
        .with_max_cookie_bytes(4096);
    let session_layer =
        CookieSessionManagerLayer::new(session_config).expect("session config is valid");

    let app = Router::new()
        .route("/", get(index))
        .route("/logout", get(logout))
        .layer(session_layer);

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("tcp listener binds successfully");
    let local_addr = listener.local_addr().expect("local address is available");
    println!("listening at http://{local_addr}");

    axum::serve(listener, app)
        .await
        .expect("server runs successfully");
}
