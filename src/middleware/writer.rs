use std::io;

use http::{HeaderMap, StatusCode};

use crate::header::Header;
use crate::middleware::{Config, inject};
use crate::writer::ResponseWriter;

/// [`ResponseWriter`] decorator that adds `server-timing` on commit.
///
/// The first `write_header`, `write` or `finish` flips a one-shot latch,
/// serializes the header as it is at that instant and inserts it before the
/// call is forwarded. Body bytes are never buffered.
#[derive(Debug)]
pub struct TimingWriter<W> {
    inner: W,
    timing: Header,
    config: Config,
    injected: bool,
}

impl<W: ResponseWriter> TimingWriter<W> {
    pub fn new(inner: W, timing: Header, config: Config) -> Self {
        Self { inner, timing, config, injected: false }
    }

    /// The header this writer will send.
    pub fn timing(&self) -> &Header {
        &self.timing
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn latch(&mut self) {
        if self.injected {
            return;
        }
        self.injected = true;

        // Committed behind our back: too late to add anything.
        if !self.inner.is_committed() {
            inject(self.inner.headers_mut(), &self.timing, self.config);
        }
    }
}

impl<W: ResponseWriter + Send> ResponseWriter for TimingWriter<W> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn is_committed(&self) -> bool {
        self.inner.is_committed()
    }

    async fn write_header(&mut self, status: StatusCode) -> io::Result<()> {
        self.latch();
        self.inner.write_header(status).await
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.latch();
        self.inner.write(buf).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.latch();
        self.inner.finish().await
    }
}
