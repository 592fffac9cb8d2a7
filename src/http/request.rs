//! Request model and the prolog/header parsing stage (`spec.md` §3, §4.2).

use crate::{
    errors::ErrorKind,
    http::{
        body::{MultipartItem, SeekableStream},
        query::{self, Query},
        types::{self, HeaderMap, Method, Url, Version},
    },
    io::readbuf::ReadBuffer,
    limits::ReqLimits,
};
use std::cell::OnceCell;
use tokio::io::AsyncRead;

/// An owned, fully-parsed request.
///
/// Unlike the zero-copy design this crate started from, every field here
/// owns its bytes: a multipart file part's data needs to outlive the parse
/// call and cross `.await` points while it is streamed to a handler, which a
/// buffer-borrowed `&[u8]` cannot do safely.
pub struct Request {
    method: Method,
    version: Version,
    headers: HeaderMap,
    url: Url,
    query_limit: usize,
    query_cache: OnceCell<Result<Vec<(String, String)>, usize>>,
    post: Vec<(String, String)>,
    multipart: Vec<MultipartItem>,
    body: Option<SeekableStream>,
}

impl Request {
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Self {
            method: Method::Get,
            version: Version::Http11,
            headers: HeaderMap::new(limits.header_count),
            url: Url::empty(),
            query_limit: limits.url_query_parts,
            query_cache: OnceCell::new(),
            post: Vec::new(),
            multipart: Vec::new(),
            body: None,
        }
    }

    pub(crate) fn reset(&mut self, limits: &ReqLimits) {
        self.method = Method::Get;
        self.version = Version::Http11;
        self.headers.reset();
        self.url = Url::empty();
        self.query_limit = limits.url_query_parts;
        self.query_cache = OnceCell::new();
        self.post.clear();
        self.multipart.clear();
        self.body = None;
    }
}

// Public API
impl Request {
    #[inline(always)]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    #[inline(always)]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the first header value with case-insensitive name matching.
    #[inline(always)]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Iterates all headers in the order they appeared on the wire.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter()
    }

    #[inline(always)]
    pub const fn content_length(&self) -> Option<usize> {
        self.headers.content_length
    }

    /// Returns a single query-string parameter, parsing the query string on
    /// first access and caching the result for subsequent calls.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query_params()
            .ok()?
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns all query-string parameters in wire order (a multimap: a
    /// repeated key keeps every occurrence), parsed lazily on first access.
    pub fn query_params(&self) -> Result<&[(String, String)], ErrorKind> {
        let cached = self.query_cache.get_or_init(|| match self.url.raw_query() {
            Some(raw) => Query::parse(raw.as_bytes(), self.query_limit).map_err(|_| self.query_limit),
            None => Ok(Vec::new()),
        });

        match cached {
            Ok(params) => Ok(params.as_slice()),
            Err(_) => Err(ErrorKind::TooManyQueryParams),
        }
    }

    /// Returns a single `application/x-www-form-urlencoded` body parameter.
    pub fn post(&self, name: &str) -> Option<&str> {
        self.post.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Returns all url-encoded body parameters in wire order.
    pub fn post_params(&self) -> &[(String, String)] {
        &self.post
    }

    /// Returns the multipart parts parsed from the body, if any.
    pub fn multipart(&self) -> &[MultipartItem] {
        &self.multipart
    }

    /// Mutable access to multipart parts, needed to read a file-backed part's stream.
    pub fn multipart_mut(&mut self) -> &mut [MultipartItem] {
        &mut self.multipart
    }

    /// Returns the opaque request body stream, for any content type other
    /// than url-encoded or multipart.
    pub fn body(&mut self) -> Option<&mut SeekableStream> {
        self.body.as_mut()
    }
}

// Parsing
impl Request {
    pub(crate) fn set_url_encoded(&mut self, params: Vec<(String, String)>) {
        self.post = params;
    }

    pub(crate) fn set_multipart(&mut self, items: Vec<MultipartItem>) {
        self.multipart = items;
    }

    pub(crate) fn set_opaque_body(&mut self, stream: SeekableStream) {
        self.body = Some(stream);
    }

    /// Reads one line of raw input that will become the next request's
    /// prolog, without parsing it. Returns `Ok(None)` on a clean EOF before
    /// any bytes of a new request arrived.
    ///
    /// A connection sits in `ReadingProlog` (`spec.md` §4.5) for exactly the
    /// duration of this call; shutdown is only allowed to race this step,
    /// never [`Self::parse_from_prolog`] (`spec.md` §4.7: "connections
    /// sitting in `ReadingProlog`" are the ones torn down on `Stop` — an
    /// in-progress request is allowed to finish).
    pub(crate) async fn read_prolog_line<R: AsyncRead + Unpin>(
        stream: &mut R,
        buffer: &mut ReadBuffer,
    ) -> Result<Option<String>, ErrorKind> {
        if !buffer.data_available() {
            // Peek for EOF before committing to a read, so a client that
            // closes between requests doesn't look like a protocol error.
            if buffer.fill_from(stream).await? == 0 {
                return Ok(None);
            }
        }
        Ok(Some(read_line(stream, buffer, ErrorKind::MalformedRequestLine).await?))
    }

    /// Parses a prolog line already read by [`Self::read_prolog_line`], then
    /// reads and parses the headers. Body parsing happens separately once
    /// the caller has decided how to handle `Content-Length` and
    /// `Content-Type` (`spec.md` §4.3's selection step).
    pub(crate) async fn parse_from_prolog<R: AsyncRead + Unpin>(
        prolog: &str,
        stream: &mut R,
        buffer: &mut ReadBuffer,
        limits: &ReqLimits,
        local_host: &str,
        local_port: u16,
        is_tls: bool,
    ) -> Result<Self, ErrorKind> {
        let (method, target, target_authority, version) = parse_prolog_line(prolog)?;

        if target.len() > limits.url_size {
            return Err(ErrorKind::InvalidUrl);
        }

        let mut headers = HeaderMap::new(limits.header_count);
        loop {
            let line = read_line(stream, buffer, ErrorKind::InvalidHeader).await?;
            if line.is_empty() {
                break;
            }
            if headers.headers.len() >= limits.header_count {
                return Err(ErrorKind::TooManyHeaders);
            }
            parse_header_line(&line, limits, &mut headers)?;
        }

        // Absolute-form's authority overrides `Host` (`spec.md` §6).
        let authority = target_authority.or_else(|| headers.get("host").map(str::to_string));
        let scheme = if is_tls { "https" } else { "http" };
        let url = build_url(target, authority.as_deref(), scheme, local_host, local_port, limits)?;

        Ok(Self {
            method,
            version,
            headers,
            url,
            query_limit: limits.url_query_parts,
            query_cache: OnceCell::new(),
            post: Vec::new(),
            multipart: Vec::new(),
            body: None,
        })
    }

    /// Convenience combining [`Self::read_prolog_line`] and
    /// [`Self::parse_from_prolog`] for callers that don't need shutdown to
    /// race only the prolog read.
    #[cfg(test)]
    async fn parse<R: AsyncRead + Unpin>(
        stream: &mut R,
        buffer: &mut ReadBuffer,
        limits: &ReqLimits,
        local_host: &str,
        local_port: u16,
        is_tls: bool,
    ) -> Result<Option<Self>, ErrorKind> {
        match Self::read_prolog_line(stream, buffer).await? {
            None => Ok(None),
            Some(prolog) => {
                Self::parse_from_prolog(&prolog, stream, buffer, limits, local_host, local_port, is_tls)
                    .await
                    .map(Some)
            }
        }
    }
}

async fn read_line<R: AsyncRead + Unpin>(
    stream: &mut R,
    buffer: &mut ReadBuffer,
    eof_error: ErrorKind,
) -> Result<String, ErrorKind> {
    loop {
        if let Some(line) = buffer.read_line()? {
            return Ok(line);
        }
        if buffer.fill_from(stream).await? == 0 {
            return Err(eof_error);
        }
    }
}

/// Splits and validates `METHOD TARGET HTTP/x.y`. A line that doesn't even
/// have this shape (missing tokens, a method token with lowercase/mixed
/// case, or a third token that isn't an `HTTP/`-prefixed version) never
/// matched the request-line grammar at all — `spec.md` §7 treats that as
/// nothing having been parsed yet, so callers must not attempt a
/// best-effort error response for [`ErrorKind::MalformedRequestLine`]. A
/// target that *does* fit the grammar but is otherwise unusable (empty, or
/// absolute-form with no authority) is a distinct, more specific error and
/// does get a best-effort response.
///
/// Returns the target's authority separately when it arrived in
/// absolute-form (`spec.md` §6: "absolute-form's authority overrides
/// `Host`").
fn parse_prolog_line(line: &str) -> Result<(Method, String, Option<String>, Version), ErrorKind> {
    let mut parts = line.splitn(3, ' ');
    let method_token = parts.next().ok_or(ErrorKind::MalformedRequestLine)?;
    let target = parts.next().ok_or(ErrorKind::MalformedRequestLine)?;
    let version_token = parts.next().ok_or(ErrorKind::MalformedRequestLine)?;

    if !version_token.starts_with("HTTP/") {
        return Err(ErrorKind::MalformedRequestLine);
    }
    if method_token.is_empty() || !method_token.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(ErrorKind::MalformedRequestLine);
    }

    let method = Method::from_token(method_token);
    let (target, authority) = resolve_target(target)?;
    let version = Version::from_bytes(version_token.as_bytes())?;

    Ok((method, target, authority, version))
}

/// Splits an absolute-form target (`http://host[:port]/path?query`) into its
/// origin-form equivalent and the authority it carries. Origin-form targets
/// (the common case, starting with `/`) pass through unchanged with no
/// authority override.
fn resolve_target(target: &str) -> Result<(String, Option<String>), ErrorKind> {
    if target.is_empty() {
        return Err(ErrorKind::InvalidUrl);
    }
    if target.starts_with('/') {
        return Ok((target.to_string(), None));
    }

    let after_scheme = target.find("://").map(|idx| idx + 3).ok_or(ErrorKind::InvalidUrl)?;
    let rest = &target[after_scheme..];
    let path_start = rest.find('/').unwrap_or(rest.len());
    let authority = &rest[..path_start];
    if authority.is_empty() {
        return Err(ErrorKind::InvalidUrl);
    }
    let path = if path_start < rest.len() { &rest[path_start..] } else { "/" };

    Ok((path.to_string(), Some(authority.to_string())))
}

fn parse_header_line(line: &str, limits: &ReqLimits, headers: &mut HeaderMap) -> Result<(), ErrorKind> {
    let Some(colon) = line.find(':') else {
        return Err(ErrorKind::InvalidHeader);
    };
    if colon == 0 {
        return Err(ErrorKind::InvalidHeader);
    }

    let name_part = &line[..colon];
    let value_part = line[colon + 1..].trim();

    if name_part.len() > limits.header_name_size || value_part.len() > limits.header_value_size {
        return Err(ErrorKind::InvalidHeader);
    }

    let mut name_bytes = name_part.as_bytes().to_vec();
    types::to_lower_case(&mut name_bytes);
    let name = String::from_utf8(name_bytes).map_err(|_| ErrorKind::InvalidHeader)?;
    let value = value_part.to_string();

    match name.as_str() {
        "content-length" => {
            let len = types::slice_to_usize(value.as_bytes()).ok_or(ErrorKind::InvalidContentLength)?;
            if len > limits.body_size {
                return Err(ErrorKind::BodyTooLarge);
            }
            headers.content_length = Some(len);
        }
        "connection" => {
            if !value.eq_ignore_ascii_case("keep-alive") && !value.eq_ignore_ascii_case("close") {
                return Err(ErrorKind::InvalidConnection);
            }
        }
        _ => {}
    }

    headers.set(name, value);
    Ok(())
}

fn build_url(
    target: String,
    host_header: Option<&str>,
    scheme: &str,
    local_host: &str,
    local_port: u16,
    limits: &ReqLimits,
) -> Result<Url, ErrorKind> {
    let (path_enc, raw_query) = match target.find('?') {
        Some(idx) => (&target[..idx], Some(target[idx + 1..].to_string())),
        None => (target.as_str(), None),
    };

    if let Some(q) = &raw_query {
        if q.len() > limits.url_query_size {
            return Err(ErrorKind::InvalidUrl);
        }
    }

    let decoded_path = String::from_utf8_lossy(&query::percent_decode(path_enc.as_bytes(), false)).into_owned();
    let mut parts = Vec::new();
    for segment in decoded_path.split('/') {
        if segment.is_empty() {
            continue;
        }
        if parts.len() >= limits.url_parts {
            return Err(ErrorKind::InvalidUrl);
        }
        parts.push(segment.to_string());
    }

    let (host, port) = match host_header.and_then(split_host_port) {
        Some((h, p)) => (h, p),
        None => (local_host.to_string(), local_port),
    };

    Ok(Url {
        target,
        scheme: scheme.to_string(),
        host,
        port,
        path: decoded_path,
        parts,
        raw_query,
    })
}

fn split_host_port(value: &str) -> Option<(String, u16)> {
    match value.rfind(':') {
        Some(idx) => {
            let port = value[idx + 1..].parse::<u16>().ok()?;
            Some((value[..idx].to_string(), port))
        }
        None => Some((value.to_string(), 80)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(req: &str, limits: &ReqLimits) -> Result<Request, ErrorKind> {
        let mut buffer = ReadBuffer::new(64, 8192);
        let mut stream: &[u8] = req.as_bytes();
        buffer.fill_from(&mut stream).await.unwrap();
        Request::parse(&mut stream, &mut buffer, limits, "127.0.0.1", 8080, false)
            .await
            .map(|opt| opt.expect("test fixtures always carry a full request"))
    }

    #[tokio::test]
    async fn parses_method_target_version() {
        let limits = ReqLimits::default();
        let req = parse("GET /api/users HTTP/1.1\r\nHost: example.com\r\n\r\n", &limits)
            .await
            .unwrap();

        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.version(), Version::Http11);
        assert_eq!(req.url().target(), "/api/users");
        assert_eq!(req.url().host(), "example.com");
        assert_eq!(req.header("host"), Some("example.com"));
    }

    #[tokio::test]
    async fn header_names_are_case_insensitive_and_lowercased() {
        let limits = ReqLimits::default();
        let req = parse("GET / HTTP/1.1\r\nCoNtEnt-Type: text/plain\r\n\r\n", &limits)
            .await
            .unwrap();
        assert_eq!(req.header("content-type"), Some("text/plain"));
        assert_eq!(req.header("CONTENT-TYPE"), Some("text/plain"));
    }

    #[tokio::test]
    async fn query_params_are_parsed_lazily_and_cached() {
        let limits = ReqLimits::default();
        let req = parse("GET /search?q=rust&lang=en HTTP/1.1\r\n\r\n", &limits)
            .await
            .unwrap();

        assert_eq!(req.query("q"), Some("rust"));
        assert_eq!(req.query("lang"), Some("en"));
        assert_eq!(req.query_params().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn path_segments_are_percent_decoded() {
        let limits = ReqLimits::default();
        let req = parse("GET /api/hello%20world HTTP/1.1\r\n\r\n", &limits)
            .await
            .unwrap();
        assert_eq!(req.url().path_segment(1), Some("hello world"));
    }

    #[tokio::test]
    async fn uncommon_methods_are_accepted_verbatim() {
        let limits = ReqLimits::default();
        let req = parse("TRACE / HTTP/1.1\r\n\r\n", &limits).await.unwrap();
        assert_eq!(req.method(), &Method::Other("TRACE".to_string()));
    }

    #[tokio::test]
    async fn request_line_that_never_matches_the_grammar_is_malformed() {
        let limits = ReqLimits::default();
        assert_eq!(
            parse("NOT A REQUEST\r\n\r\n", &limits).await.unwrap_err(),
            ErrorKind::MalformedRequestLine
        );
    }

    #[tokio::test]
    async fn lowercase_method_token_is_malformed() {
        let limits = ReqLimits::default();
        assert_eq!(
            parse("get / HTTP/1.1\r\n\r\n", &limits).await.unwrap_err(),
            ErrorKind::MalformedRequestLine
        );
    }

    #[tokio::test]
    async fn malformed_connection_header_is_rejected() {
        let limits = ReqLimits::default();
        assert_eq!(
            parse("GET / HTTP/1.1\r\nConnection: sorta\r\n\r\n", &limits)
                .await
                .unwrap_err(),
            ErrorKind::InvalidConnection
        );
    }

    #[tokio::test]
    async fn too_many_headers_is_rejected() {
        let mut limits = ReqLimits::default();
        limits.header_count = 2;
        let req = "GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n";
        assert_eq!(parse(req, &limits).await.unwrap_err(), ErrorKind::TooManyHeaders);
    }

    #[tokio::test]
    async fn content_length_over_limit_is_body_too_large() {
        let mut limits = ReqLimits::default();
        limits.body_size = 4;
        let req = "POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\n";
        assert_eq!(parse(req, &limits).await.unwrap_err(), ErrorKind::BodyTooLarge);
    }
}
