//! Minimal server-timing example: concurrent work timed with spans plus one
//! sequential metric.
//!
//! Run with:
//!   cargo run --example basic
//!
//! Then open http://127.0.0.1:8080 and check the timing tab of the browser's
//! network inspector, or:
//!   curl -i http://127.0.0.1:8080

use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use server_timing::{Server, middleware};

#[tokio::main]
async fn main() -> Result<(), server_timing::Error> {
    tracing_subscriber::fmt::init();

    println!("Visit http://127.0.0.1:8080");

    Server::bind("0.0.0.0:8080")
        .await?
        .serve(service_fn(handler))
        .await
}

async fn handler(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let Some(timing) = middleware::from_request(&req) else {
        let mut res = Response::new(Full::from("server-timing middleware missing"));
        *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        return Ok(res);
    };

    // Five concurrent calls to some remote service. Each task owns its
    // metric; the span stops it when the task ends.
    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..5u64 {
        let metric = timing.new_metric(format!("service-{i}"));
        tasks.spawn(async move {
            let _span = metric.timed();
            tokio::time::sleep(Duration::from_millis(25 + i * 10)).await;
        });
    }

    // Blocking work in the handler itself, such as a SQL query.
    let sql = timing.new_metric("sql").with_description("SQL query");
    sql.start();
    tokio::time::sleep(Duration::from_millis(35)).await;
    sql.stop();

    // Anything still running at commit time would be left out.
    tasks.join_all().await;

    Ok(Response::new(Full::from(
        "Done. Check your browser inspector timing details.",
    )))
}
