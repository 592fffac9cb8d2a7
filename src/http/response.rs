//! Response model: mutable fields serialized into the wire format on write
//! (`spec.md` §4.4), rather than the append-as-you-go byte builder this
//! crate started from — header order (`Cache-Control`, `Content-Type`,
//! `Expires`, `Location`, user headers, `Connection`, `Content-Length`,
//! `Set-Cookie`) is fixed by the protocol, not by call order, so the fields
//! are set in any order and only assembled once, at write time.

use crate::{
    http::{
        cookie::Cookie,
        types::{StatusCode, Url, Version},
    },
    limits::RespLimits,
};
use std::time::SystemTime;

#[doc(hidden)]
pub struct Handled(());

/// HTTP response builder passed to [`Handler::handle`](crate::Handler::handle).
///
/// # Examples
/// ```
/// use embedway::{Handled, Request, Response, StatusCode};
///
/// async fn handle(_req: &Request, resp: &mut Response) -> Handled {
///     resp.status(StatusCode::Ok)
///         .header("content-type", "text/html")
///         .body("<h1>Hello World</h1>")
/// }
/// ```
pub struct Response {
    status: StatusCode,
    reason_override: Option<String>,
    content_type: String,
    charset: String,
    cache_control: String,
    expires: String,
    location: Option<String>,
    headers: Vec<(String, String)>,
    cookies: Vec<Cookie>,
    body: Vec<u8>,
    pub(crate) version: Version,
    pub(crate) keep_alive: bool,
}

/// `Thu, 01 Jan 1970 00:00:00 GMT` — the default `Expires` value, signaling
/// "already expired" until a handler sets one explicitly.
const EPOCH_HTTP_DATE: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

impl Response {
    #[inline(always)]
    pub(crate) fn new(limits: &RespLimits) -> Self {
        Self {
            status: StatusCode::Ok,
            reason_override: None,
            content_type: "text/html".to_string(),
            charset: "utf-8".to_string(),
            cache_control: "private".to_string(),
            expires: EPOCH_HTTP_DATE.to_string(),
            location: None,
            headers: Vec::new(),
            cookies: Vec::new(),
            body: Vec::with_capacity(limits.default_capacity),
            version: Version::Http11,
            keep_alive: true,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self, limits: &RespLimits) {
        self.status = StatusCode::Ok;
        self.reason_override = None;
        self.content_type = "text/html".to_string();
        self.charset = "utf-8".to_string();
        self.cache_control = "private".to_string();
        self.expires = EPOCH_HTTP_DATE.to_string();
        self.location = None;
        self.headers.clear();
        self.cookies.clear();

        if self.body.capacity() > limits.max_capacity {
            self.body = Vec::with_capacity(limits.default_capacity);
        } else {
            self.body.clear();
        }

        self.version = Version::Http11;
        self.keep_alive = true;
    }

    pub(crate) fn status_code(&self) -> StatusCode {
        self.status
    }
}

// Public API
impl Response {
    /// Sets the HTTP status code. Overwrites any previous call.
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    /// Overrides the default reason phrase for the current status code.
    pub fn status_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.reason_override = Some(text.into());
        self
    }

    /// Sets `Content-Type` (default `"text/html"`).
    pub fn content_type(&mut self, content_type: impl Into<String>) -> &mut Self {
        self.content_type = content_type.into();
        self
    }

    /// Sets the `charset` parameter on `Content-Type` (default `"utf-8"`).
    /// An empty charset omits the parameter entirely.
    pub fn charset(&mut self, charset: impl Into<String>) -> &mut Self {
        self.charset = charset.into();
        self
    }

    /// Sets `Cache-Control` (default `"private"`). An empty value omits the header.
    pub fn cache_control(&mut self, cache_control: impl Into<String>) -> &mut Self {
        self.cache_control = cache_control.into();
        self
    }

    /// Sets `Expires` to the RFC 1123 formatting of the given time.
    pub fn expires_at(&mut self, time: SystemTime) -> &mut Self {
        self.expires = httpdate::fmt_http_date(time);
        self
    }

    /// Sets status 301/302 (per `permanent`), reason "Moved", and a
    /// resolved `Location` header (`spec.md` §4.4).
    ///
    /// If `location` carries a scheme (contains `:`), it is used as-is.
    /// Otherwise it is resolved against `request_url`: a leading `/` makes
    /// it an absolute path on the request's scheme/host/port; anything else
    /// is resolved against the request path's directory.
    pub fn redirect(&mut self, location: &str, permanent: bool, request_url: &Url) -> &mut Self {
        let resolved = if location.contains(':') {
            location.to_string()
        } else {
            let path = if location.starts_with('/') {
                location.to_string()
            } else {
                let dir = match request_url.path().rfind('/') {
                    Some(idx) => &request_url.path()[..=idx],
                    None => "/",
                };
                format!("{dir}{location}")
            };
            format!("{}://{}{}", request_url.scheme(), authority(request_url), path)
        };

        self.location = Some(resolved);
        self.status = if permanent {
            StatusCode::MovedPermanently
        } else {
            StatusCode::Found
        };
        self.reason_override = Some("Moved".to_string());
        self
    }

    /// Adds a response header. Does not deduplicate by name — repeated
    /// calls append, matching the ordered multimap headers are modeled as.
    ///
    /// Do not set `content-length` or `connection` here: both are computed
    /// automatically.
    pub fn header<N: WriteBuffer, V: WriteBuffer>(&mut self, name: N, value: V) -> &mut Self {
        self.headers.push((to_owned_string(&name), to_owned_string(&value)));
        self
    }

    /// Adds a multi-value header, joining values with `split`.
    pub fn header_multi<N, S, I, V>(&mut self, name: N, split: S, values: I) -> &mut Self
    where
        N: WriteBuffer,
        S: WriteBuffer,
        I: IntoIterator<Item = V>,
        V: WriteBuffer,
    {
        let mut buf = Vec::new();
        let mut iter = values.into_iter();
        if let Some(first) = iter.next() {
            first.write_to(&mut buf);
            for value in iter {
                split.write_to(&mut buf);
                value.write_to(&mut buf);
            }
        }
        self.headers
            .push((to_owned_string(&name), String::from_utf8_lossy(&buf).into_owned()));
        self
    }

    /// Adds a header with `key[=value]` parameters, joined with `split`.
    pub fn header_params<N, S, I, K, V>(&mut self, name: N, split: S, params: I) -> &mut Self
    where
        N: WriteBuffer,
        S: WriteBuffer,
        I: IntoIterator<Item = (K, Option<V>)>,
        K: WriteBuffer,
        V: WriteBuffer,
    {
        let mut buf = Vec::new();
        let mut iter = params.into_iter();
        if let Some((first_key, first_val)) = iter.next() {
            first_key.write_to(&mut buf);
            if let Some(val) = first_val {
                buf.push(b'=');
                val.write_to(&mut buf);
            }
            for (key, value) in iter {
                split.write_to(&mut buf);
                key.write_to(&mut buf);
                if let Some(val) = value {
                    buf.push(b'=');
                    val.write_to(&mut buf);
                }
            }
        }
        self.headers
            .push((to_owned_string(&name), String::from_utf8_lossy(&buf).into_owned()));
        self
    }

    /// Adds a `Set-Cookie` header for the given cookie.
    pub fn cookie(&mut self, cookie: Cookie) -> &mut Self {
        self.cookies.push(cookie);
        self
    }

    /// Forces the connection to close after this response.
    pub fn close(&mut self) -> &mut Self {
        self.keep_alive = false;
        self
    }

    /// Sets the response body and returns the sentinel the handler returns
    /// to signal the response is ready to be written.
    pub fn body<T: WriteBuffer>(&mut self, data: T) -> Handled {
        self.body.clear();
        data.write_to(&mut self.body);
        Handled(())
    }

    /// Writes the response body via closure.
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(&mut self, f: F) -> Handled {
        self.body.clear();
        f(&mut BodyWriter(&mut self.body));
        Handled(())
    }
}

fn authority(url: &Url) -> String {
    let default_port = if url.scheme() == "https" { 443 } else { 80 };
    if url.port() == default_port {
        url.host().to_string()
    } else {
        format!("{}:{}", url.host(), url.port())
    }
}

fn to_owned_string<T: WriteBuffer>(value: &T) -> String {
    let mut buf = Vec::new();
    value.write_to(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

// Wire serialization
impl Response {
    /// Serializes the full response (status line, headers, body) into `out`.
    pub(crate) fn write_to(&self, out: &mut Vec<u8>, banner: &str) {
        out.extend_from_slice(self.version.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.status.code().to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(
            self.reason_override
                .as_deref()
                .unwrap_or(self.status.reason())
                .as_bytes(),
        );
        out.extend_from_slice(b"\r\n");

        write_header(out, "Server", banner);

        if !self.cache_control.is_empty() {
            write_header(out, "Cache-Control", &self.cache_control);
        }
        if !self.content_type.is_empty() {
            if self.charset.is_empty() {
                write_header(out, "Content-Type", &self.content_type);
            } else {
                write_header(out, "Content-Type", &format!("{}; charset={}", self.content_type, self.charset));
            }
        }
        write_header(out, "Expires", &self.expires);
        if let Some(location) = &self.location {
            write_header(out, "Location", location);
        }
        for (name, value) in &self.headers {
            write_header(out, name, value);
        }
        if let Some(conn) = connection_header(self.version, self.keep_alive) {
            write_header(out, "Connection", conn);
        }
        write_header(out, "Content-Length", &self.body.len().to_string());
        for cookie in &self.cookies {
            write_header(out, "Set-Cookie", &cookie.to_header_value());
        }

        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
    }
}

fn write_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

const fn connection_header(version: Version, keep_alive: bool) -> Option<&'static str> {
    match (version, keep_alive) {
        (Version::Http11, true) => None,
        (Version::Http11, false) => Some("close"),
        (Version::Http10, true) => Some("keep-alive"),
        (Version::Http10, false) => Some("close"),
    }
}

pub mod write {
    use super::*;
    use std::{borrow::Cow, rc::Rc, sync::Arc};

    /// Writer for constructing the response body with [`Response::body_with`].
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        /// Appends content to the response body.
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Trait for writing data to a response/header buffer without an
    /// intermediate allocation for common scalar and string-ish types.
    ///
    /// Floating-point numbers are deliberately not implemented, to avoid
    /// locale-dependent formatting and precision issues in protocol headers.
    pub trait WriteBuffer {
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (bytes, $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let closure = $conn;
                    closure(self, buffer);
                }
            })*
        };
        (number($type:ty), $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(*self as $type, buffer);
                }
            })*
        };
        (non_zero($type:ty), $conn:expr => $($t:ident),*) => {
            $(impl WriteBuffer for std::num::$t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(self.get() as $type, buffer);
                }
            })*
        };
    }

    impl<T: WriteBuffer> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl<T: WriteBuffer> WriteBuffer for &mut T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl_write_buffer! {
        bytes, |value: &str, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value.as_bytes());
        } => &str, String, Box<str>, Cow<'_, str>,
        Arc<str>, Rc<str>, Arc<String>, Rc<String>
    }
    impl_write_buffer! {
        bytes, |value: &[u8], buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value);
        } => &[u8], Vec<u8>, Box<[u8]>, Cow<'_, [u8]>,
        Arc<[u8]>, Rc<[u8]>, Arc<Vec<u8>>, Rc<Vec<u8>>
    }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        number(u128), impl_write_buffer_u128 => u8, u16, u32, u64, u128, usize
    }
    impl_write_buffer! {
        non_zero(u128), impl_write_buffer_u128 => NonZeroU8,
        NonZeroU16, NonZeroU32, NonZeroU64, NonZeroU128, NonZeroUsize
    }
    impl_write_buffer! {
        number(i128), impl_write_buffer_i128 => i8, i16, i32, i64, i128, isize
    }
    impl_write_buffer! {
        non_zero(i128), impl_write_buffer_i128 => NonZeroI8,
        NonZeroI16, NonZeroI32, NonZeroI64, NonZeroI128, NonZeroIsize
    }
    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(match self {
                true => b"true",
                false => b"false",
            });
        }
    }
    impl WriteBuffer for char {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            let mut buf = [0u8; 4];
            buffer.extend_from_slice(self.encode_utf8(&mut buf).as_bytes());
        }
    }

    #[inline(always)]
    fn impl_write_buffer_u128(value: u128, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(value.to_string().as_bytes());
    }

    #[inline(always)]
    fn impl_write_buffer_i128(value: i128, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(value.to_string().as_bytes());
    }
}

pub use write::{BodyWriter, WriteBuffer};

#[cfg(test)]
mod tests {
    use super::*;

    fn render(resp: &Response) -> String {
        let mut out = Vec::new();
        resp.write_to(&mut out, "embedway");
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn default_status_line_and_defaults() {
        let mut resp = Response::new(&RespLimits::default());
        resp.body("");
        let text = render(&resp);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Cache-Control: private\r\n"));
        assert!(text.contains("Content-Type: text/html; charset=utf-8\r\n"));
        assert!(text.contains(&format!("Expires: {EPOCH_HTTP_DATE}\r\n")));
        assert!(text.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn body_sets_content_length() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("hello");
        assert!(render(&resp).contains("Content-Length: 5\r\n"));
        assert!(render(&resp).ends_with("hello"));
    }

    #[test]
    fn custom_headers_preserve_insertion_order() {
        let mut resp = Response::new(&RespLimits::default());
        resp.header("x-a", "1").header("x-b", "2").body("");
        let text = render(&resp);
        assert!(text.find("x-a: 1").unwrap() < text.find("x-b: 2").unwrap());
    }

    #[test]
    fn close_emits_connection_header_on_http11() {
        let mut resp = Response::new(&RespLimits::default());
        resp.close().body("");
        assert!(render(&resp).contains("Connection: close\r\n"));
    }

    #[test]
    fn http10_keep_alive_is_explicit() {
        let mut resp = Response::new(&RespLimits::default());
        resp.version = Version::Http10;
        resp.body("");
        assert!(render(&resp).contains("Connection: keep-alive\r\n"));
    }

    fn url_at(path: &str, host: &str, port: u16) -> Url {
        Url {
            target: path.to_string(),
            scheme: "http".to_string(),
            host: host.to_string(),
            port,
            path: path.to_string(),
            parts: path.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect(),
            raw_query: None,
        }
    }

    #[test]
    fn redirect_to_absolute_path_resolves_against_request_authority() {
        let mut resp = Response::new(&RespLimits::default());
        let url = url_at("/a/b", "h", 81);
        resp.redirect("/new/place", false, &url).body("");
        assert!(render(&resp).contains("Location: http://h:81/new/place\r\n"));
        assert_eq!(resp.status_code(), StatusCode::Found);
    }

    #[test]
    fn redirect_relative_joins_onto_request_path_directory() {
        let mut resp = Response::new(&RespLimits::default());
        let url = url_at("/a/b", "h", 81);
        resp.redirect("c", false, &url).body("");
        assert!(render(&resp).contains("Location: http://h:81/a/c\r\n"));
    }

    #[test]
    fn redirect_permanent_uses_301() {
        let mut resp = Response::new(&RespLimits::default());
        let url = url_at("/a", "h", 80);
        resp.redirect("/b", true, &url).body("");
        assert_eq!(resp.status_code(), StatusCode::MovedPermanently);
        assert!(render(&resp).contains("http://h/b"));
    }

    #[test]
    fn cookies_emit_one_set_cookie_header_each() {
        let mut resp = Response::new(&RespLimits::default());
        resp.cookie(Cookie::new("a", "1"))
            .cookie(Cookie::new("b", "2"))
            .body("");
        let text = render(&resp);
        assert_eq!(text.matches("Set-Cookie:").count(), 2);
    }
}
