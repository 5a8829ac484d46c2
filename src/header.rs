//! The `Server-Timing` header: an ordered, shared list of metrics.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use http::HeaderValue;
use parking_lot::Mutex;

use crate::codec;
use crate::error::Error;
use crate::metric::{Metric, MetricHandle};

/// An ordered collection of [`Metric`]s, serialized with [`Display`] and
/// decoded with [`Header::parse`].
///
/// `Header` is a handle: cloning it shares the same list, which is how the
/// middleware and every task of a request see one header. Appending is
/// serialized by a mutex, so [`new_metric`](Header::new_metric) can be called
/// from any number of tasks at once.
///
/// ```rust
/// use std::time::Duration;
/// use server_timing::{Header, Metric};
///
/// let timing = Header::new();
/// timing.add(
///     Metric::new("sql-1")
///         .with_description("MySQL lookup Server")
///         .with_duration(Duration::from_millis(100)),
/// );
/// assert_eq!(timing.to_string(), r#"sql-1;desc="MySQL lookup Server";dur=100"#);
/// ```
///
/// [`Display`]: fmt::Display
#[derive(Debug, Clone, Default)]
pub struct Header {
    metrics: Arc<Mutex<Vec<MetricHandle>>>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a `Server-Timing` header value.
    ///
    /// `desc` and a numeric `dur` move into [`Metric::description`] and
    /// [`Metric::duration`]; everything else, including a `dur` that is not a
    /// number, lands in [`Metric::extra`]. An empty value is an empty header.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let entries = codec::parse_list(input)?;
        Ok(entries.into_iter().map(metric_from_entry).collect())
    }

    /// Appends an empty metric named `name` and returns a handle to it.
    ///
    /// The metric is part of the header from this point on, even before it
    /// is started or stopped.
    pub fn new_metric(&self, name: impl Into<String>) -> MetricHandle {
        self.add(Metric::new(name))
    }

    /// Appends an already built metric.
    pub fn add(&self, metric: Metric) -> MetricHandle {
        let handle = MetricHandle::new(metric);
        self.metrics.lock().push(handle.clone());
        handle
    }

    /// A copy of every metric, in order.
    pub fn metrics(&self) -> Vec<Metric> {
        self.metrics.lock().iter().map(MetricHandle::snapshot).collect()
    }

    pub fn len(&self) -> usize {
        self.metrics.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.lock().is_empty()
    }

    /// The serialized header as an [`HeaderValue`], ready to insert under
    /// [`SERVER_TIMING`](crate::SERVER_TIMING).
    pub fn to_header_value(&self) -> Result<HeaderValue, Error> {
        Ok(HeaderValue::try_from(self.to_string())?)
    }
}

fn metric_from_entry(entry: codec::Entry) -> Metric {
    let mut metric = Metric::new(entry.name);
    metric.extra.extend(entry.params);

    if let Some(i) = reserved_index(&metric, codec::PARAM_DESC) {
        if let Some((_, desc)) = metric.extra.shift_remove_index(i) {
            metric.description = desc;
        }
    }

    // A `dur` that does not parse stays in `extra` verbatim.
    if let Some(i) = reserved_index(&metric, codec::PARAM_DUR) {
        if let Some(duration) = codec::parse_millis(&metric.extra[i]) {
            metric.duration = duration;
            metric.extra.shift_remove_index(i);
        }
    }

    metric
}

fn reserved_index(metric: &Metric, name: &str) -> Option<usize> {
    metric.extra.keys().position(|k| k.eq_ignore_ascii_case(name))
}

impl FromIterator<Metric> for Header {
    fn from_iter<I: IntoIterator<Item = Metric>>(iter: I) -> Self {
        let metrics = iter.into_iter().map(MetricHandle::new).collect();
        Self { metrics: Arc::new(Mutex::new(metrics)) }
    }
}

impl FromStr for Header {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Metrics joined by `,`. The list lock is held for the whole pass, so a
/// concurrent append is either fully in the output or not at all.
impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metrics = self.metrics.lock();
        for (i, handle) in metrics.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            handle.with_metric(|m| fmt::Display::fmt(m, f))?;
        }
        Ok(())
    }
}
