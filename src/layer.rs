use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use http::{Request, Response, StatusCode};
use tower_cookies::{CookieManager, Cookies};
use tower_layer::Layer;
use tower_service::Service;

use crate::{
    config::CookieSessionConfig,
    error::ConfigError,
    session::{CookieSession, Session},
};

/// Loads the encrypted session of every request into a [`Session`] request extension and writes
/// the resulting cookies to the response.
#[derive(Debug, Clone)]
pub struct CookieSessionManagerLayer {
    config: Arc<CookieSessionConfig>,
}

impl CookieSessionManagerLayer {
    /// Fails when `config` does not [`validate`](CookieSessionConfig::validate).
    pub fn new(config: CookieSessionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &CookieSessionConfig {
        &self.config
    }
}

#[derive(Debug, Clone)]
pub struct CookieSessionManager<S> {
    inner: S,
    config: Arc<CookieSessionConfig>,
}

impl<S> Layer<S> for CookieSessionManagerLayer {
    type Service = CookieManager<CookieSessionManager<S>>;

    fn layer(&self, inner: S) -> Self::Service {
        CookieManager::new(CookieSessionManager {
            inner,
            config: self.config.clone(),
        })
    }
}

impl<ReqBody, ResBody, S> Service<Request<ReqBody>> for CookieSessionManager<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: Default + Send,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let config = self.config.clone();

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();
            let Some(cookies) = parts.extensions.get::<Cookies>().cloned() else {
                return Ok(internal_server_error());
            };

            let session = Session::new(CookieSession::load_with_request(&cookies, config, &parts));
            parts.extensions.insert(session.clone());

            let res = inner.call(Request::from_parts(parts, body)).await?;

            // Failed handlers keep the client's cookies, unless they asked for a logout.
            if res.status().is_server_error() && !session.needs_destroy() {
                return Ok(res);
            }

            if let Err(err) = session.commit(&cookies) {
                tracing::error!(err = %err, "cookie session save failed");
                return Ok(internal_server_error());
            }

            Ok(res)
        })
    }
}

fn internal_server_error<B: Default>() -> Response<B> {
    let mut res = Response::default();
    *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    res
}
