//! URL query-string and `application/x-www-form-urlencoded` decoding.
//!
//! Percent-decoding maps `%HH` to a byte; `+` decodes to space only in the
//! form (query-string) context — in a path context `+` is left literal, so
//! callers that need that distinction should not route path segments through
//! [`Query::parse`].

use memchr::memchr;
use std::{collections::HashMap, error, fmt};

/// Percent-decodes a byte sequence, additionally turning `+` into a space
/// when `form_context` is set (query strings and url-encoded bodies; not
/// path segments).
///
/// Malformed escapes (`%` not followed by two hex digits) are passed
/// through byte-for-byte rather than rejected — the base crate had no
/// decoder to begin with, so we pick the common "be lenient on input"
/// convention used by the surrounding HTTP corpus rather than invent a new
/// rejection case `spec.md` doesn't ask for.
pub(crate) fn percent_decode(input: &[u8], form_context: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        match input[i] {
            b'%' => match (input.get(i + 1).copied().and_then(hex_val), input.get(i + 2).copied().and_then(hex_val)) {
                (Some(h), Some(l)) => {
                    out.push((h << 4) | l);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b'+' if form_context => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }

    out
}

#[inline(always)]
fn hex_val(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

fn decode_to_string(raw: &[u8], form_context: bool) -> String {
    String::from_utf8_lossy(&percent_decode(raw, form_context)).into_owned()
}

/// Query-string / url-encoded form parser, splitting on `&` then the first
/// `=`, percent-decoding each key and value.
pub struct Query;

impl Query {
    /// Parses a query string (or url-encoded body) into a new collection.
    ///
    /// Handles an optional leading `?`, so `?a=1` and `a=1` are equivalent.
    #[inline(always)]
    pub fn parse<C: QueryCollector>(query: &[u8], limit: usize) -> Result<C, Error> {
        let mut result = C::with_capacity(limit);
        Self::parse_into(&mut result, query, limit)?;
        Ok(result)
    }

    /// Parses into an existing collection, appending.
    #[inline]
    pub fn parse_into<C: QueryCollector>(
        result: &mut C,
        query: &[u8],
        limit: usize,
    ) -> Result<(), Error> {
        let data = match query.first() {
            Some(b'?') => &query[1..],
            Some(_) => query,
            None => return Ok(()),
        };

        if data.is_empty() {
            return Ok(());
        }

        let mut start = 0;
        while start < data.len() {
            if result.length() >= limit {
                return Err(Error::OverLimit(limit));
            }

            let end = memchr(b'&', &data[start..])
                .map(|pos| start + pos)
                .unwrap_or(data.len());

            let index = memchr(b'=', &data[start..end]).unwrap_or(end - start);
            let split_index = start + index;

            let key = &data[start..split_index];
            let value: &[u8] = if split_index < end {
                &data[split_index + 1..end]
            } else {
                b""
            };

            result.add_param(decode_to_string(key, true), decode_to_string(value, true));
            start = end + 1;
        }

        Ok(())
    }
}

/// A trait for types that can collect decoded `(key, value)` parameter pairs.
pub trait QueryCollector
where
    Self: Sized,
{
    /// Adds a decoded parameter to the collection.
    fn add_param(&mut self, key: String, value: String);

    /// Returns the current number of parameters in the collection.
    fn length(&self) -> usize;

    /// Creates a new collection with the specified capacity.
    fn with_capacity(capacity: usize) -> Self;
}

// Implementation for Vec - preserves parameter order (the ordered multimap
// spec.md §3 requires for query/post parameters).
impl QueryCollector for Vec<(String, String)> {
    #[inline(always)]
    fn add_param(&mut self, key: String, value: String) {
        self.push((key, value));
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        Vec::with_capacity(capacity)
    }
}

// Implementation for HashMap - deduplicates parameters (last wins).
impl QueryCollector for HashMap<String, String> {
    #[inline(always)]
    fn add_param(&mut self, key: String, value: String) {
        self.insert(key, value);
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        HashMap::with_capacity(capacity)
    }
}

/// Error types that can occur during query parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The number of parameters exceeded the specified limit.
    OverLimit(usize),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OverLimit(limit) => {
                write!(f, "Query parameter limit exceeded: limit={}", limit)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic() {
        let cases = ["a=1&b=2", "?a=1&b=2"];

        for line in cases {
            let params: Vec<(String, String)> = Query::parse(line.as_bytes(), 8).unwrap();

            assert_eq!(params.len(), 2);
            assert_eq!(params[0], ("a".to_string(), "1".to_string()));
            assert_eq!(params[1], ("b".to_string(), "2".to_string()));
        }
    }

    #[test]
    fn full() {
        let line = b"flag&empty=&=val&&key=value";
        let params: Vec<(String, String)> = Query::parse(line, 10).unwrap();

        assert_eq!(params.len(), 5);
        assert_eq!(params[0], ("flag".to_string(), "".to_string()));
        assert_eq!(params[1], ("empty".to_string(), "".to_string()));
        assert_eq!(params[2], ("".to_string(), "val".to_string()));
        assert_eq!(params[3], ("".to_string(), "".to_string()));
        assert_eq!(params[4], ("key".to_string(), "value".to_string()));
    }

    #[test]
    fn limit_error() {
        assert_eq!(
            Query::parse::<Vec<(String, String)>>(b"a&a", 1),
            Err(Error::OverLimit(1))
        );
    }

    #[test]
    fn empty_is_no_params() {
        let params: Vec<(String, String)> = Query::parse(b"", 10).unwrap();
        assert!(params.is_empty());
    }

    #[test]
    fn percent_and_plus_decode_in_form_context() {
        let params: Vec<(String, String)> =
            Query::parse(b"email=user%40example.com&b=hi+u", 10).unwrap();
        assert_eq!(params[0].1, "user@example.com");
        assert_eq!(params[1].1, "hi u");
    }

    #[test]
    fn roundtrip_preserves_order_and_multimap_shape() {
        let params: Vec<(String, String)> = Query::parse(b"a=1&a=2&b=3", 10).unwrap();
        assert_eq!(
            params,
            vec![
                ("a".to_string(), "1".to_string()),
                ("a".to_string(), "2".to_string()),
                ("b".to_string(), "3".to_string()),
            ]
        );
    }
}
