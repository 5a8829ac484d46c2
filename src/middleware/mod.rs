//! Server-Timing middleware.
//!
//! For every request the middleware creates a fresh [`Header`], stores it in
//! the request's [`Extensions`], runs the handler, and injects the serialized
//! value as `server-timing` at the moment the response is committed. The
//! status, the body and every other header pass through untouched.
//!
//! Handlers find the header with [`from_request`]:
//!
//! ```rust
//! use http::Request;
//! use server_timing::middleware;
//!
//! fn handler<B>(req: &Request<B>) {
//!     // `None` when the handler runs outside the middleware.
//!     if let Some(timing) = middleware::from_request(req) {
//!         let _span = timing.new_metric("handler").timed();
//!     }
//! }
//! ```
//!
//! Two integration styles are provided:
//!
//! - [`ServerTiming::service`] wraps a hyper [`Service`] returning an
//!   `http::Response`; the commit point is the response value itself.
//! - [`ServerTiming::run`] drives a streaming handler over any
//!   [`ResponseWriter`]; the commit point is the first `write_header`,
//!   `write` or `finish`.
//!
//! Metrics recorded after the commit are kept in the header but never reach
//! the client. Join spawned work before committing when it has to be in the
//! response.
//!
//! [`Service`]: hyper::service::Service
//! [`ResponseWriter`]: crate::writer::ResponseWriter

mod service;
mod writer;

use std::io;

use http::{Extensions, HeaderMap, Request};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::SERVER_TIMING;
use crate::header::Header;
use crate::writer::ResponseWriter;

pub use service::ServerTimingService;
pub use writer::TimingWriter;

/// Middleware options.
///
/// Deserializes from `{ "disable-headers": true }`; missing keys take their
/// defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Record metrics but never send the `server-timing` header.
    pub disable_headers: bool,
}

/// The Server-Timing middleware.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerTiming {
    config: Config,
}

impl ServerTiming {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> Config {
        self.config
    }

    /// Wraps a hyper service. See [`ServerTimingService`].
    pub fn service<S>(&self, inner: S) -> ServerTimingService<S> {
        ServerTimingService::new(inner, self.config)
    }

    /// Runs a streaming handler under the middleware.
    ///
    /// The handler receives the request, with its [`Header`] already in the
    /// extensions, and a [`TimingWriter`] around `writer`. When the handler
    /// returns, the response is finished, committing `200 OK` if the handler
    /// never wrote anything. Returns the underlying writer.
    ///
    /// A panicking handler unwinds through this call; catching it is up to
    /// the caller.
    pub async fn run<B, W, F>(&self, mut req: Request<B>, writer: W, handler: F) -> io::Result<W>
    where
        W: ResponseWriter + Send,
        F: AsyncFnOnce(Request<B>, &mut TimingWriter<W>) -> io::Result<()>,
    {
        let timing = Header::new();
        req.extensions_mut().insert(timing.clone());

        let mut writer = TimingWriter::new(writer, timing, self.config);
        handler(req, &mut writer).await?;
        writer.finish().await?;
        Ok(writer.into_inner())
    }
}

/// The [`Header`] bound to `req` by the middleware, if any.
pub fn from_request<B>(req: &Request<B>) -> Option<Header> {
    from_extensions(req.extensions())
}

/// Same as [`from_request`], for code that only holds the extensions (for
/// example after `Request::into_parts`).
pub fn from_extensions(extensions: &Extensions) -> Option<Header> {
    extensions.get::<Header>().cloned()
}

/// Serializes `timing` into `headers` unless disabled or empty.
fn inject(headers: &mut HeaderMap, timing: &Header, config: Config) {
    if config.disable_headers {
        debug!("server-timing header disabled");
        return;
    }
    if timing.is_empty() {
        return;
    }

    match timing.to_header_value() {
        Ok(value) if value.is_empty() => {}
        Ok(value) => {
            debug!(metrics = timing.len(), len = value.len(), "injecting server-timing header");
            headers.insert(SERVER_TIMING, value);
        }
        Err(e) => warn!(error = %e, "server-timing header dropped"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::StatusCode;

    use super::*;
    use crate::metric::Metric;
    use crate::writer::Recorder;

    const BODY: &[u8] = b"response";

    fn sql() -> Metric {
        Metric::new("sql-1")
            .with_duration(Duration::from_millis(100))
            .with_description("MySQL; lookup Server")
    }

    struct Case {
        name: &'static str,
        config: Config,
        metrics: Vec<Metric>,
        skip_write_header: bool,
        expected: Option<&'static str>,
    }

    fn cases() -> Vec<Case> {
        vec![
            Case {
                name: "empty metrics",
                config: Config::default(),
                metrics: vec![],
                skip_write_header: false,
                expected: None,
            },
            Case {
                name: "single metric disable headers option",
                config: Config { disable_headers: true },
                metrics: vec![sql()],
                skip_write_header: false,
                expected: None,
            },
            Case {
                name: "single metric",
                config: Config::default(),
                metrics: vec![sql()],
                skip_write_header: false,
                expected: Some(r#"sql-1;desc="MySQL; lookup Server";dur=100"#),
            },
            Case {
                name: "single metric without write_header",
                config: Config::default(),
                metrics: vec![sql()],
                skip_write_header: true,
                expected: Some(r#"sql-1;desc="MySQL; lookup Server";dur=100"#),
            },
        ]
    }

    #[tokio::test]
    async fn run_injects_header_on_commit() {
        for case in cases() {
            let req = Request::new(());
            let metrics = case.metrics.clone();
            let skip = case.skip_write_header;

            let rec = ServerTiming::with_config(case.config)
                .run(req, Recorder::new(), async move |req, w| {
                    let timing = from_request(&req).expect("header bound to the request");
                    for m in metrics {
                        timing.add(m);
                    }
                    if !skip {
                        w.write_header(StatusCode::CREATED).await?;
                    }
                    w.write(BODY).await
                })
                .await
                .unwrap();

            let actual = rec.headers().get(SERVER_TIMING).map(|v| v.to_str().unwrap());
            assert_eq!(actual, case.expected, "{}", case.name);

            let expected_status = if skip { StatusCode::OK } else { StatusCode::CREATED };
            assert_eq!(rec.status(), expected_status, "{}", case.name);
            assert_eq!(rec.body(), BODY, "{}", case.name);
        }
    }

    #[tokio::test]
    async fn run_commits_empty_handler_with_ok() {
        let rec = ServerTiming::new()
            .run(Request::new(()), Recorder::new(), async |req, _w| {
                from_request(&req).unwrap().add(sql());
                Ok(())
            })
            .await
            .unwrap();

        assert!(rec.is_finished());
        assert_eq!(rec.status(), StatusCode::OK);
        assert!(rec.headers().contains_key(SERVER_TIMING));
    }

    #[tokio::test]
    async fn metrics_after_commit_are_not_sent() {
        let rec = ServerTiming::new()
            .run(Request::new(()), Recorder::new(), async |req, w| {
                let timing = from_request(&req).unwrap();
                timing.new_metric("early");
                w.write(BODY).await?;
                timing.new_metric("late");
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(rec.headers()[SERVER_TIMING], "early");
    }

    #[test]
    fn lookup_outside_middleware_is_none() {
        assert!(from_request(&Request::new(())).is_none());
    }

    #[test]
    fn lookup_returns_the_bound_header() {
        let timing = Header::new();
        let mut req = Request::new(());
        req.extensions_mut().insert(timing.clone());

        from_request(&req).unwrap().new_metric("shared");
        assert_eq!(timing.len(), 1);
    }

    #[test]
    fn config_deserializes_kebab_case() {
        let config: Config = serde_json::from_str(r#"{"disable-headers": true}"#).unwrap();
        assert!(config.disable_headers);

        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
    }
}
