//! RFC7230 token / quoted-string grammar for `Server-Timing` values.
//!
//! ```text
//! Server-Timing = #server-timing-metric
//! server-timing-metric = metric-name *( OWS ";" OWS server-timing-param )
//! server-timing-param  = param-name OWS "=" OWS param-value
//! param-value          = token / quoted-string
//! ```

use std::fmt::{self, Write};
use std::time::Duration;

use crate::error::Error;

pub(crate) const PARAM_DESC: &str = "desc";
pub(crate) const PARAM_DUR: &str = "dur";

const NANOS_PER_MILLI: u128 = 1_000_000;

// ── Grammar ───────────────────────────────────────────────────────────────────

/// `tchar` from RFC7230 §3.2.6.
pub(crate) fn is_tchar(b: u8) -> bool {
    matches!(
        b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
            | b'^' | b'_' | b'`' | b'|' | b'~'
    ) || b.is_ascii_alphanumeric()
}

pub(crate) fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(is_tchar)
}

/// `desc` or `dur`, in any case.
pub(crate) fn is_reserved(key: &str) -> bool {
    key.eq_ignore_ascii_case(PARAM_DESC) || key.eq_ignore_ascii_case(PARAM_DUR)
}

fn is_ows(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Writes `;key=value`.
pub(crate) fn write_param<W: Write>(out: &mut W, key: &str, value: &str) -> fmt::Result {
    out.write_char(';')?;
    out.write_str(key)?;
    out.write_char('=')?;
    write_value(out, value)
}

/// Writes `value` as a bare token when it is one, as a quoted-string otherwise.
pub(crate) fn write_value<W: Write>(out: &mut W, value: &str) -> fmt::Result {
    if is_token(value) {
        return out.write_str(value);
    }

    out.write_char('"')?;
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.write_char('\\')?;
        }
        out.write_char(c)?;
    }
    out.write_char('"')
}

/// Writes `d` in milliseconds: an integer when there is no fractional
/// millisecond, else the shortest exact decimal.
pub(crate) fn write_millis<W: Write>(out: &mut W, d: Duration) -> fmt::Result {
    let nanos = d.as_nanos();
    let whole = nanos / NANOS_PER_MILLI;
    let frac = nanos % NANOS_PER_MILLI;

    if frac == 0 {
        return write!(out, "{whole}");
    }

    let digits = format!("{frac:06}");
    write!(out, "{whole}.{}", digits.trim_end_matches('0'))
}

/// Parses a `dur` value. `None` for anything that is not a finite,
/// non-negative number of milliseconds.
pub(crate) fn parse_millis(s: &str) -> Option<Duration> {
    let ms: f64 = s.parse().ok()?;
    if !ms.is_finite() || ms < 0.0 {
        return None;
    }

    let nanos = (ms * NANOS_PER_MILLI as f64).round();
    if nanos > u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(nanos as u64))
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// One list element: the metric name and its parameters in wire order.
///
/// Parameter names keep their case; a repeated parameter (compared without
/// case) keeps its first value.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Entry {
    pub(crate) name: String,
    pub(crate) params: Vec<(String, String)>,
}

/// Splits a `Server-Timing` value into its metrics.
///
/// Empty list elements and surrounding whitespace are skipped, so an empty
/// input yields an empty list.
pub(crate) fn parse_list(input: &str) -> Result<Vec<Entry>, Error> {
    let mut cursor = Cursor { input, pos: 0, element_start: 0 };
    let mut entries = Vec::new();

    loop {
        cursor.skip_ows();
        match cursor.peek() {
            None => break,
            Some(b',') => {
                cursor.pos += 1;
                continue;
            }
            Some(_) => {}
        }

        cursor.element_start = cursor.pos;
        entries.push(cursor.entry()?);
    }

    Ok(entries)
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
    element_start: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn skip_ows(&mut self) {
        while self.peek().is_some_and(is_ows) {
            self.pos += 1;
        }
    }

    /// Parses one element up to and including its terminating comma.
    fn entry(&mut self) -> Result<Entry, Error> {
        let name = self.token();
        if name.is_empty() {
            return Err(self.error("expected a metric name"));
        }

        let mut entry = Entry { name: name.to_owned(), params: Vec::new() };

        loop {
            self.skip_ows();
            match self.peek() {
                None => return Ok(entry),
                Some(b',') => {
                    self.pos += 1;
                    return Ok(entry);
                }
                Some(b';') => {
                    self.pos += 1;
                    let (key, value) = self.param()?;
                    if !entry.params.iter().any(|(k, _)| k.eq_ignore_ascii_case(&key)) {
                        entry.params.push((key, value));
                    }
                }
                Some(_) => return Err(self.error("unexpected character after parameter")),
            }
        }
    }

    /// `OWS param-name [ OWS "=" OWS param-value ]`, after the `;`.
    fn param(&mut self) -> Result<(String, String), Error> {
        self.skip_ows();
        let key = self.token();
        if key.is_empty() {
            return Err(self.error("expected a parameter name"));
        }
        let key = key.to_owned();

        self.skip_ows();
        if self.peek() != Some(b'=') {
            return Ok((key, String::new()));
        }
        self.pos += 1;
        self.skip_ows();

        let value = match self.peek() {
            Some(b'"') => self.quoted_string()?,
            _ => self.token().to_owned(),
        };
        Ok((key, value))
    }

    /// The longest run of token characters at the cursor, possibly empty.
    fn token(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(is_tchar) {
            self.pos += 1;
        }
        &self.input[start..self.pos]
    }

    /// Reads a quoted-string starting at the opening `"`, returning the
    /// unescaped content.
    fn quoted_string(&mut self) -> Result<String, Error> {
        self.pos += 1;
        let mut out = Vec::new();

        loop {
            match self.peek() {
                None => return Err(self.error("unterminated quoted-string")),
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b) => {
                            out.push(b);
                            self.pos += 1;
                        }
                        None => return Err(self.error("unterminated quoted-string")),
                    }
                }
                Some(b) => {
                    out.push(b);
                    self.pos += 1;
                }
            }
        }

        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Index of the comma closing the current element, skipping commas inside
    /// quoted-strings, or the end of input.
    fn element_end(&self) -> usize {
        let bytes = self.input.as_bytes();
        let mut in_quotes = false;
        let mut i = self.element_start;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' if in_quotes => i += 1,
                b'"' => in_quotes = !in_quotes,
                b',' if !in_quotes => return i,
                _ => {}
            }
            i += 1;
        }
        bytes.len()
    }

    fn error(&self, reason: &'static str) -> Error {
        let end = self.element_end();
        let fragment = self.input[self.element_start..end].trim().to_owned();
        Error::Format { fragment, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(s: &str) -> String {
        let mut out = String::new();
        write_value(&mut out, s).unwrap();
        out
    }

    fn millis(d: Duration) -> String {
        let mut out = String::new();
        write_millis(&mut out, d).unwrap();
        out
    }

    #[test]
    fn tokens_are_written_bare() {
        assert_eq!(value("SQL"), "SQL");
        assert_eq!(value("cache-hit.v2"), "cache-hit.v2");
    }

    #[test]
    fn non_tokens_are_quoted_and_escaped() {
        assert_eq!(value("MySQL lookup"), r#""MySQL lookup""#);
        assert_eq!(value("a,b;c"), r#""a,b;c""#);
        assert_eq!(value(r#"say "hi" \o/"#), r#""say \"hi\" \\o/""#);
        assert_eq!(value(""), r#""""#);
    }

    #[test]
    fn millis_integer_and_minimal_decimal() {
        assert_eq!(millis(Duration::from_millis(100)), "100");
        assert_eq!(millis(Duration::from_micros(100_100)), "100.1");
        assert_eq!(millis(Duration::from_nanos(1_500_001)), "1.500001");
        assert_eq!(millis(Duration::from_nanos(250)), "0.00025");
    }

    #[test]
    fn parse_millis_accepts_fractions() {
        assert_eq!(parse_millis("100"), Some(Duration::from_millis(100)));
        assert_eq!(parse_millis("100.1"), Some(Duration::from_micros(100_100)));
        assert_eq!(parse_millis("0.5"), Some(Duration::from_micros(500)));
    }

    #[test]
    fn parse_millis_rejects_garbage() {
        assert_eq!(parse_millis("fast"), None);
        assert_eq!(parse_millis("-3"), None);
        assert_eq!(parse_millis("NaN"), None);
        assert_eq!(parse_millis("inf"), None);
        assert_eq!(parse_millis(""), None);
    }

    #[test]
    fn parse_list_splits_on_unquoted_commas() {
        let entries = parse_list(r#"a;desc="x, y";dur=1 , b ,, c;k=v"#).unwrap();
        assert_eq!(
            entries,
            vec![
                Entry {
                    name: "a".into(),
                    params: vec![("desc".into(), "x, y".into()), ("dur".into(), "1".into())],
                },
                Entry { name: "b".into(), params: vec![] },
                Entry { name: "c".into(), params: vec![("k".into(), "v".into())] },
            ]
        );
    }

    #[test]
    fn parse_list_keeps_key_case_and_first_duplicate() {
        let entries = parse_list("m; DESC = one ; desc=two; Hit=1").unwrap();
        assert_eq!(
            entries[0].params,
            vec![("DESC".to_owned(), "one".to_owned()), ("Hit".to_owned(), "1".to_owned())]
        );
    }

    #[test]
    fn parse_list_keeps_valueless_params() {
        let entries = parse_list("m;flag;k=v").unwrap();
        assert_eq!(
            entries[0].params,
            vec![("flag".to_owned(), String::new()), ("k".to_owned(), "v".to_owned())]
        );
    }

    #[test]
    fn parse_list_unescapes_quoted_pairs() {
        let entries = parse_list(r#"m;desc="a \"quoted\" \\ value""#).unwrap();
        assert_eq!(entries[0].params[0].1, r#"a "quoted" \ value"#);
    }

    #[test]
    fn empty_input_is_an_empty_list() {
        assert!(parse_list("").unwrap().is_empty());
        assert!(parse_list("  ,  , ").unwrap().is_empty());
    }

    #[test]
    fn unterminated_quote_is_a_format_error() {
        let err = parse_list(r#"ok, m;desc="never closed"#).unwrap_err();
        match err {
            Error::Format { fragment, reason } => {
                assert_eq!(fragment, r#"m;desc="never closed"#);
                assert_eq!(reason, "unterminated quoted-string");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn structural_errors_name_the_fragment() {
        for (input, fragment) in [
            (";desc=x", ";desc=x"),
            ("m;=x, n", "m;=x"),
            (r#"m;desc="x"y, n"#, r#"m;desc="x"y"#),
            ("m n", "m n"),
            (r#"m;desc="x"y;note="a,b", n"#, r#"m;desc="x"y;note="a,b""#),
        ] {
            match parse_list(input) {
                Err(Error::Format { fragment: got, .. }) => assert_eq!(got, fragment, "{input}"),
                other => panic!("{input}: expected format error, got {other:?}"),
            }
        }
    }
}
