//! Streaming response writers.
//!
//! A [`ResponseWriter`] lets a handler mutate headers until the response is
//! *committed*, then streams body bytes. Commit happens on the first of:
//!
//! - [`write_header`](ResponseWriter::write_header) with an explicit status,
//! - [`write`](ResponseWriter::write), which implies `200 OK`,
//! - [`finish`](ResponseWriter::finish), which also implies `200 OK`.
//!
//! Header changes after the commit are ignored by the transport, and a second
//! `write_header` is a no-op.
//!
//! Two writers ship with the crate: [`Recorder`] keeps everything in memory,
//! [`Http1Writer`] streams raw HTTP/1.1 to any tokio `AsyncWrite`.

use std::future::Future;
use std::io;

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// The writer capability set a streaming handler works against.
pub trait ResponseWriter {
    /// Headers to send with the response. Mutations only reach the client
    /// before the commit.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// `true` once the status line and headers are fixed.
    fn is_committed(&self) -> bool;

    /// Commits the response with `status`. No-op if already committed.
    fn write_header(&mut self, status: StatusCode) -> impl Future<Output = io::Result<()>> + Send;

    /// Writes body bytes, committing with `200 OK` first if needed.
    fn write(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Ends the response, committing with `200 OK` first if needed.
    fn finish(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

// ── Recorder ──────────────────────────────────────────────────────────────────

/// In-memory [`ResponseWriter`].
///
/// The header set is captured at the moment of the commit, so headers added
/// afterwards do not show up in [`headers`](Recorder::headers), the same as
/// on a real connection.
#[derive(Debug, Default)]
pub struct Recorder {
    headers: HeaderMap,
    sent: Option<(StatusCode, HeaderMap)>,
    body: BytesMut,
    finished: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The committed status, or `200 OK` if nothing was committed yet.
    pub fn status(&self) -> StatusCode {
        self.sent.as_ref().map_or(StatusCode::OK, |(status, _)| *status)
    }

    /// The headers as sent, or the pending headers if not committed yet.
    pub fn headers(&self) -> &HeaderMap {
        self.sent.as_ref().map_or(&self.headers, |(_, headers)| headers)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn into_response(self) -> Response<Bytes> {
        let status = self.status();
        let headers = match self.sent {
            Some((_, headers)) => headers,
            None => self.headers,
        };

        let mut response = Response::new(self.body.freeze());
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }

    fn commit(&mut self, status: StatusCode) {
        if self.sent.is_none() {
            self.sent = Some((status, self.headers.clone()));
        }
    }
}

impl ResponseWriter for Recorder {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn is_committed(&self) -> bool {
        self.sent.is_some()
    }

    async fn write_header(&mut self, status: StatusCode) -> io::Result<()> {
        self.commit(status);
        Ok(())
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.commit(StatusCode::OK);
        self.body.extend_from_slice(buf);
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.commit(StatusCode::OK);
        self.finished = true;
        Ok(())
    }
}

// ── Http1Writer ───────────────────────────────────────────────────────────────

/// Streams an HTTP/1.1 response to a tokio writer.
///
/// Body framing is chosen at commit: the handler's `content-length` if it set
/// one, otherwise `transfer-encoding: chunked`. Statuses that never carry a
/// body (`1xx`, `204`, `304`) get no framing at all.
#[derive(Debug)]
pub struct Http1Writer<T> {
    io: T,
    headers: HeaderMap,
    state: State,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    /// `body` is false for statuses that must not carry one (1xx, 204, 304).
    Streaming { chunked: bool, body: bool },
    Finished,
}

impl<T: AsyncWrite + Unpin + Send> Http1Writer<T> {
    pub fn new(io: T) -> Self {
        Self { io, headers: HeaderMap::new(), state: State::Pending }
    }

    pub fn into_inner(self) -> T {
        self.io
    }

    async fn commit(&mut self, status: StatusCode) -> io::Result<()> {
        if self.state != State::Pending {
            debug!(%status, "superfluous write_header call");
            return Ok(());
        }

        let body = permits_body(status);
        let chunked = body && !self.headers.contains_key(CONTENT_LENGTH);
        if chunked {
            self.headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        }

        let mut head = Vec::with_capacity(128);
        head.extend_from_slice(
            format!(
                "HTTP/1.1 {} {}\r\n",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )
            .as_bytes(),
        );
        for (name, value) in &self.headers {
            head.extend_from_slice(name.as_str().as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");

        self.io.write_all(&head).await?;
        self.state = State::Streaming { chunked, body };
        Ok(())
    }
}

impl<T: AsyncWrite + Unpin + Send> ResponseWriter for Http1Writer<T> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn is_committed(&self) -> bool {
        self.state != State::Pending
    }

    async fn write_header(&mut self, status: StatusCode) -> io::Result<()> {
        self.commit(status).await
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.state == State::Pending {
            self.commit(StatusCode::OK).await?;
        }
        match self.state {
            // A zero-sized chunk would terminate the body.
            _ if buf.is_empty() => Ok(()),
            State::Streaming { body: false, .. } => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "response status does not permit a body",
            )),
            State::Streaming { chunked: true, .. } => {
                self.io.write_all(format!("{:x}\r\n", buf.len()).as_bytes()).await?;
                self.io.write_all(buf).await?;
                self.io.write_all(b"\r\n").await
            }
            State::Streaming { chunked: false, .. } => self.io.write_all(buf).await,
            State::Pending | State::Finished => {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "response already finished"))
            }
        }
    }

    async fn finish(&mut self) -> io::Result<()> {
        if self.state == State::Pending {
            self.commit(StatusCode::OK).await?;
        }
        if let State::Streaming { chunked, .. } = self.state {
            if chunked {
                self.io.write_all(b"0\r\n\r\n").await?;
            }
            self.state = State::Finished;
        }
        self.io.flush().await
    }
}

fn permits_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recorder_implicit_commit_on_write() {
        let mut w = Recorder::new();
        w.write(b"hello").await.unwrap();
        w.headers_mut().insert("x-late", HeaderValue::from_static("1"));
        w.finish().await.unwrap();

        assert_eq!(w.status(), StatusCode::OK);
        assert!(!w.headers().contains_key("x-late"));
        assert_eq!(w.body(), b"hello");
        assert!(w.is_finished());
    }

    #[tokio::test]
    async fn recorder_second_write_header_is_ignored() {
        let mut w = Recorder::new();
        w.write_header(StatusCode::CREATED).await.unwrap();
        w.write_header(StatusCode::IM_A_TEAPOT).await.unwrap();
        assert_eq!(w.into_response().status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn http1_chunked_body() {
        let mut w = Http1Writer::new(Vec::new());
        w.headers_mut().insert("content-type", HeaderValue::from_static("text/plain"));
        w.write(b"hello").await.unwrap();
        w.write(b"").await.unwrap();
        w.write(b", world").await.unwrap();
        w.finish().await.unwrap();

        let out = String::from_utf8(w.into_inner()).unwrap();
        assert_eq!(
            out,
            "HTTP/1.1 200 OK\r\n\
             content-type: text/plain\r\n\
             transfer-encoding: chunked\r\n\
             \r\n\
             5\r\nhello\r\n\
             7\r\n, world\r\n\
             0\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn http1_content_length_body() {
        let mut w = Http1Writer::new(Vec::new());
        w.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from_static("2"));
        w.write_header(StatusCode::CREATED).await.unwrap();
        w.write(b"ok").await.unwrap();
        w.finish().await.unwrap();

        let out = String::from_utf8(w.into_inner()).unwrap();
        assert_eq!(out, "HTTP/1.1 201 Created\r\ncontent-length: 2\r\n\r\nok");
    }

    #[tokio::test]
    async fn http1_no_content_has_no_framing() {
        let mut w = Http1Writer::new(Vec::new());
        w.write_header(StatusCode::NO_CONTENT).await.unwrap();
        w.finish().await.unwrap();

        let out = String::from_utf8(w.into_inner()).unwrap();
        assert_eq!(out, "HTTP/1.1 204 No Content\r\n\r\n");
    }

    #[tokio::test]
    async fn http1_no_content_rejects_body() {
        let mut w = Http1Writer::new(Vec::new());
        w.write_header(StatusCode::NO_CONTENT).await.unwrap();

        let err = w.write(b"junk").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        w.write(b"").await.unwrap();
        w.finish().await.unwrap();

        let out = String::from_utf8(w.into_inner()).unwrap();
        assert_eq!(out, "HTTP/1.1 204 No Content\r\n\r\n");
    }

    #[tokio::test]
    async fn http1_write_after_finish_fails() {
        let mut w = Http1Writer::new(Vec::new());
        w.finish().await.unwrap();
        assert!(w.write(b"late").await.is_err());
    }
}
