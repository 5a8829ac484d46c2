use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;

use futures_util::FutureExt;
use http::{Request, Response, StatusCode};
use hyper::service::Service;
use tracing::error;

use crate::header::Header;
use crate::middleware::{Config, inject};

/// A boxed, `Send` response future.
type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// hyper [`Service`] decorator that binds a [`Header`] to each request and
/// injects it into the response.
///
/// The response head is fixed when the inner future resolves, so that is the
/// commit point: whatever the header holds then is what gets sent. The
/// inner service's status code (including the implicit `200 OK` of
/// `Response::new`) is kept as is.
///
/// A panic in the inner service becomes an empty
/// `500 Internal Server Error`, still carrying the metrics recorded so far.
#[derive(Debug, Clone)]
pub struct ServerTimingService<S> {
    inner: S,
    config: Config,
}

impl<S> ServerTimingService<S> {
    pub fn new(inner: S, config: Config) -> Self {
        Self { inner, config }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ServerTimingService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<Result<Response<ResBody>, S::Error>>;

    fn call(&self, mut req: Request<ReqBody>) -> Self::Future {
        let timing = Header::new();
        req.extensions_mut().insert(timing.clone());
        let config = self.config;

        let fut = panic::catch_unwind(AssertUnwindSafe(|| self.inner.call(req)));

        Box::pin(async move {
            let outcome = match fut {
                Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                Err(payload) => Err(payload),
            };

            let mut response = match outcome {
                Ok(result) => result?,
                Err(payload) => {
                    error!(panic = panic_message(&*payload), "handler panicked");
                    internal_error()
                }
            };

            inject(response.headers_mut(), &timing, config);
            Ok::<_, S::Error>(response)
        })
    }
}

fn internal_error<B: Default>() -> Response<B> {
    let mut response = Response::new(B::default());
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}
