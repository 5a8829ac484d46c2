//! Unified error type.

use thiserror::Error;

/// The error type returned by the crate's fallible operations.
///
/// Semantic oddities in a `Server-Timing` value (a `dur` that is not a
/// number, parameters nobody knows about) are not errors: they are kept in
/// [`Metric::extra`](crate::Metric::extra). Only structural damage surfaces
/// here.
#[derive(Debug, Error)]
pub enum Error {
    /// The header value does not follow the list / parameter grammar.
    #[error("malformed Server-Timing value near `{fragment}`: {reason}")]
    Format {
        /// The element of the list the parser gave up on.
        fragment: String,
        reason: &'static str,
    },

    /// The serialized header contains bytes that cannot appear in an HTTP
    /// header value (control characters).
    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Binding, accepting or writing failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
