//! # server-timing
//!
//! The [`Server-Timing`] response header for hyper services: a data model,
//! an RFC7230-compliant codec and a middleware that attaches the header to
//! each response exactly once.
//!
//! ## The contract
//!
//! - Every request gets a fresh [`Header`], reachable from the handler via
//!   [`middleware::from_request`].
//! - Any number of tasks may record metrics on it concurrently.
//! - When the response is committed (the inner service returns its
//!   `Response`, or a streaming handler writes its status or first body
//!   byte) the header is serialized and inserted as `server-timing`.
//! - Status, body and other headers are never touched. An empty header, or
//!   [`middleware::Config::disable_headers`], sends nothing.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::convert::Infallible;
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use http_body_util::Full;
//! use hyper::body::Incoming;
//! use hyper::service::service_fn;
//! use server_timing::{Server, middleware};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), server_timing::Error> {
//!     Server::bind("0.0.0.0:3000").await?.serve(service_fn(handler)).await
//! }
//!
//! async fn handler(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
//!     let timing = middleware::from_request(&req).expect("served under the middleware");
//!
//!     let sql = timing.new_metric("sql").with_description("SQL query");
//!     sql.start();
//!     tokio::time::sleep(Duration::from_millis(20)).await;
//!     sql.stop();
//!
//!     // server-timing: sql;desc="SQL query";dur=20.1234
//!     Ok(Response::new(Full::from("done")))
//! }
//! ```
//!
//! ## Parsing
//!
//! ```rust
//! use server_timing::Header;
//!
//! let header: Header = r#"cache;desc="Cache, L2";dur=0.5, db;dur=53"#.parse()?;
//! let metrics = header.metrics();
//! assert_eq!(metrics[0].description, "Cache, L2");
//! assert_eq!(header.to_string(), r#"cache;desc="Cache, L2";dur=0.5,db;dur=53"#);
//! # Ok::<(), server_timing::Error>(())
//! ```
//!
//! [`Server-Timing`]: https://www.w3.org/TR/server-timing/

mod codec;
mod error;
mod header;
mod metric;
mod server;

pub mod middleware;
pub mod writer;

use http::HeaderName;

pub use error::Error;
pub use header::Header;
pub use metric::{Metric, MetricHandle, Span};
pub use middleware::{Config, ServerTiming};
pub use server::Server;

/// `server-timing`
pub const SERVER_TIMING: HeaderName = HeaderName::from_static("server-timing");
