//! A single Server-Timing metric and the handles used to record it.
//!
//! # Recording
//!
//! Metrics are normally created through [`Header::new_metric`], which appends
//! the metric to the request's header immediately and hands back a
//! [`MetricHandle`]. The handle is cheap to clone and safe to move into a
//! spawned task:
//!
//! ```rust
//! use server_timing::Header;
//!
//! let timing = Header::new();
//!
//! let sql = timing.new_metric("sql").with_description("SQL query");
//! sql.start();
//! // ... run the query ...
//! sql.stop();
//!
//! {
//!     // Stopped when `_span` goes out of scope, whatever the exit path.
//!     let _span = timing.new_metric("render").timed();
//! }
//! ```
//!
//! [`Header::new_metric`]: crate::Header::new_metric

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::codec;

// ── Metric ────────────────────────────────────────────────────────────────────

/// One entry of a `Server-Timing` header.
///
/// `name` must be an RFC7230 token (no whitespace, no separators). It is
/// common to use a short identifier such as `sql-1` and put the human-readable
/// part in `description`.
///
/// Equality ignores a timer that is currently running.
#[derive(Debug, Clone, Default)]
pub struct Metric {
    pub name: String,

    /// Zero means "not reported" and is left out of the encoding.
    pub duration: Duration,

    /// Free text; empty means "not reported".
    pub description: String,

    /// Extension parameters, in insertion order.
    ///
    /// A `desc` or `dur` key here takes priority over `description` and
    /// `duration` when the metric is serialized.
    pub extra: IndexMap<String, String>,

    started_at: Option<Instant>,
}

impl Metric {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Records now as the begin instant. Calling it again before [`stop`]
    /// restarts the timer.
    ///
    /// [`stop`]: Metric::stop
    pub fn start(&mut self) -> &mut Self {
        self.started_at = Some(Instant::now());
        self
    }

    /// Sets `duration` to the time elapsed since [`start`] and clears the
    /// begin instant.
    ///
    /// Without a running timer this does nothing, so only the first call
    /// after a `start` has any effect.
    ///
    /// [`start`]: Metric::start
    pub fn stop(&mut self) -> &mut Self {
        if let Some(started_at) = self.started_at.take() {
            self.duration = started_at.elapsed();
        }
        self
    }

    /// Finalizes the metric unless a previous [`stop`](Metric::stop) already
    /// did. Never recomputes or resets a finalized duration, so it can be
    /// called unconditionally at scope exit.
    pub fn stop_unless_stopped(&mut self) -> &mut Self {
        self.stop()
    }

    /// `true` between a `start` and the matching `stop`.
    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }
}

impl PartialEq for Metric {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.duration == other.duration
            && self.description == other.description
            && self.extra == other.extra
    }
}

impl Eq for Metric {}

/// Writes the metric the way it appears inside a `Server-Timing` value:
/// `name;desc=...;dur=...;key=value`.
///
/// `desc` and `dur` always sit right after the name, whether they come from
/// the dedicated fields or from a shadowing `extra` entry, so parsing the
/// output and writing it again gives the same text.
impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;

        match self.reserved(codec::PARAM_DESC) {
            Some(desc) => codec::write_param(f, codec::PARAM_DESC, desc)?,
            None if !self.description.is_empty() => {
                codec::write_param(f, codec::PARAM_DESC, &self.description)?
            }
            None => {}
        }

        match self.reserved(codec::PARAM_DUR) {
            Some(dur) => codec::write_param(f, codec::PARAM_DUR, dur)?,
            None if !self.duration.is_zero() => {
                f.write_str(";dur=")?;
                codec::write_millis(f, self.duration)?;
            }
            None => {}
        }

        for (key, value) in &self.extra {
            if codec::is_reserved(key) {
                continue;
            }
            codec::write_param(f, key, value)?;
        }

        Ok(())
    }
}

impl Metric {
    /// The first `extra` value whose key matches `name`, ignoring case.
    fn reserved(&self, name: &str) -> Option<&str> {
        self.extra
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// ── MetricHandle ──────────────────────────────────────────────────────────────

/// Shared handle to a metric that already lives inside a [`Header`].
///
/// Cloning the handle does not copy the metric: every clone and the header
/// observe the same value. Give each concurrent unit of work its own metric;
/// starting and stopping one metric from several tasks at once is memory-safe
/// but the recorded duration is then meaningless.
///
/// [`Header`]: crate::Header
#[derive(Debug, Clone)]
pub struct MetricHandle(Arc<Mutex<Metric>>);

impl MetricHandle {
    pub(crate) fn new(metric: Metric) -> Self {
        Self(Arc::new(Mutex::new(metric)))
    }

    pub fn with_description(self, description: impl Into<String>) -> Self {
        self.0.lock().description = description.into();
        self
    }

    pub fn with_extra(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.lock().extra.insert(key.into(), value.into());
        self
    }

    pub fn set_duration(&self, duration: Duration) -> &Self {
        self.0.lock().duration = duration;
        self
    }

    /// See [`Metric::start`].
    pub fn start(&self) -> &Self {
        self.0.lock().start();
        self
    }

    /// See [`Metric::stop`].
    pub fn stop(&self) -> &Self {
        self.0.lock().stop();
        self
    }

    /// See [`Metric::stop_unless_stopped`].
    pub fn stop_unless_stopped(&self) -> &Self {
        self.0.lock().stop_unless_stopped();
        self
    }

    /// Starts the timer and returns a guard that stops it when dropped.
    pub fn timed(self) -> Span {
        self.start();
        Span(self)
    }

    pub fn duration(&self) -> Duration {
        self.0.lock().duration
    }

    /// A copy of the metric as it is right now.
    pub fn snapshot(&self) -> Metric {
        self.0.lock().clone()
    }

    pub(crate) fn with_metric<R>(&self, f: impl FnOnce(&Metric) -> R) -> R {
        f(&self.0.lock())
    }
}

// ── Span ──────────────────────────────────────────────────────────────────────

/// Scope guard returned by [`MetricHandle::timed`].
///
/// Calls [`Metric::stop_unless_stopped`] on drop: early returns, `?` and
/// unwinding all finalize the metric exactly once.
#[derive(Debug)]
#[must_use = "the metric stops as soon as the span is dropped"]
pub struct Span(MetricHandle);

impl Span {
    pub fn metric(&self) -> &MetricHandle {
        &self.0
    }

    /// Stops the metric now instead of at scope exit.
    pub fn finish(self) -> MetricHandle {
        self.0.stop_unless_stopped();
        self.0.clone()
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        self.0.stop_unless_stopped();
    }
}
