//! Body parser family: opaque, url-encoded, multipart (`spec.md` §4.3).
//!
//! Represented as a tagged variant rather than a trait-object hierarchy, per
//! the "Parser as polymorphic variant" design note: the three parsers share
//! the shape "consume exactly `Content-Length` bytes from the read buffer
//! plus the stream, producing artifacts into the request."

use crate::{
    errors::ErrorKind,
    http::{query::Query, types::HeaderMap},
    io::readbuf::ReadBuffer,
    limits::ReqLimits,
};
use memchr::memmem;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use tokio::io::AsyncRead;

/// An owned, seekable byte sequence: in memory up to a threshold, then
/// spilled to a temporary file (`spec.md` §4.3's "spill threshold policy").
pub enum SeekableStream {
    Memory(Cursor<Vec<u8>>),
    File(std::fs::File),
}

impl SeekableStream {
    fn empty() -> Self {
        SeekableStream::Memory(Cursor::new(Vec::new()))
    }
}

impl Read for SeekableStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SeekableStream::Memory(c) => c.read(buf),
            SeekableStream::File(f) => f.read(buf),
        }
    }
}

impl Seek for SeekableStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            SeekableStream::Memory(c) => c.seek(pos),
            SeekableStream::File(f) => f.seek(pos),
        }
    }
}

/// One multipart part: its own header mapping, and either an inline string
/// value or a file-backed seekable stream (`spec.md` §3 Multipart item).
pub struct MultipartItem {
    pub(crate) headers: HeaderMap,
    pub(crate) value: PartValue,
}

pub enum PartValue {
    Inline(String),
    Stream(SeekableStream),
}

impl MultipartItem {
    /// The part's own headers (e.g. `Content-Disposition`, `Content-Type`).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// The inline string value, if this part was not a file upload.
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            PartValue::Inline(s) => Some(s),
            PartValue::Stream(_) => None,
        }
    }

    /// The file-backed stream, if this part carried `filename=`.
    pub fn as_stream(&mut self) -> Option<&mut SeekableStream> {
        match &mut self.value {
            PartValue::Stream(s) => Some(s),
            PartValue::Inline(_) => None,
        }
    }
}

/// Reads exactly `len` bytes from the buffer + stream.
async fn read_exact<R: AsyncRead + Unpin>(
    stream: &mut R,
    buffer: &mut ReadBuffer,
    len: usize,
) -> Result<Vec<u8>, ErrorKind> {
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        let need = len - out.len();
        let avail = buffer.unread().len();
        if avail > 0 {
            let take = avail.min(need);
            out.extend_from_slice(&buffer.unread()[..take]);
            buffer.advance(take);
            continue;
        }
        if buffer.fill_from(stream).await? == 0 {
            return Err(ErrorKind::IncompleteBody);
        }
    }
    Ok(out)
}

fn spill_stream(data: Vec<u8>, threshold: usize) -> SeekableStream {
    if data.len() <= threshold {
        SeekableStream::Memory(Cursor::new(data))
    } else {
        match tempfile_with(&data) {
            Ok(f) => SeekableStream::File(f),
            Err(_) => SeekableStream::Memory(Cursor::new(data)),
        }
    }
}

fn tempfile_with(data: &[u8]) -> io::Result<std::fs::File> {
    use std::io::Write;
    let mut file = tempfile_handle()?;
    file.write_all(data)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(file)
}

fn tempfile_handle() -> io::Result<std::fs::File> {
    // `std::fs` has no built-in anonymous temp file; create-then-unlink in
    // the platform temp dir gives us a file descriptor nothing else can
    // reach, which is all a spilled part/body needs.
    let mut path = std::env::temp_dir();
    let unique = format!(
        "embedway-{}-{}.part",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default()
    );
    path.push(unique);

    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)?;
    let _ = std::fs::remove_file(&path);
    Ok(file)
}

pub(crate) enum ParsedBody {
    Opaque(SeekableStream),
    UrlEncoded(Vec<(String, String)>),
    Multipart(Vec<MultipartItem>),
}

/// Selects and runs a body parser by the `Content-Type`'s first token
/// (`spec.md` §4.3 "Selection"). Unknown content types use the opaque
/// parser.
pub(crate) async fn parse_body<R: AsyncRead + Unpin>(
    stream: &mut R,
    buffer: &mut ReadBuffer,
    content_length: usize,
    content_type: Option<&str>,
    limits: &ReqLimits,
) -> Result<ParsedBody, ErrorKind> {
    if content_length > limits.body_size {
        return Err(ErrorKind::BodyTooLarge);
    }

    let first_token = content_type
        .and_then(|ct| ct.split(';').next())
        .map(str::trim)
        .unwrap_or("");

    match first_token {
        "application/x-www-form-urlencoded" => {
            let raw = read_exact(stream, buffer, content_length).await?;
            let params: Vec<(String, String)> =
                Query::parse(&raw, usize::MAX).map_err(ErrorKind::from)?;
            Ok(ParsedBody::UrlEncoded(params))
        }
        "multipart/form-data" => {
            let boundary = content_type
                .and_then(|ct| ct.split(';').skip(1).find_map(|part| {
                    let part = part.trim();
                    part.strip_prefix("boundary=").map(|b| b.trim_matches('"').to_string())
                }))
                .ok_or(ErrorKind::MultipartNoBoundary)?;

            let raw = read_exact(stream, buffer, content_length).await?;
            let items = parse_multipart(&raw, &boundary, limits)?;
            Ok(ParsedBody::Multipart(items))
        }
        _ => {
            let raw = read_exact(stream, buffer, content_length).await?;
            Ok(ParsedBody::Opaque(spill_stream(
                raw,
                limits.multipart_spill_threshold,
            )))
        }
    }
}

fn parse_multipart(
    body: &[u8],
    boundary: &str,
    limits: &ReqLimits,
) -> Result<Vec<MultipartItem>, ErrorKind> {
    let delim = format!("--{boundary}");
    let delim_bytes = delim.as_bytes();
    let finder = memmem::Finder::new(delim_bytes);

    let mut items = Vec::new();
    let mut positions: Vec<usize> = finder.find_iter(body).collect();
    if positions.is_empty() {
        return Err(ErrorKind::MultipartNoBoundary);
    }
    positions.push(body.len());

    for window in positions.windows(2) {
        let part_start = window[0] + delim_bytes.len();
        // terminating boundary `--X--`
        if body[part_start..].starts_with(b"--") {
            break;
        }
        let part_end = window[1];
        let part = &body[part_start..part_end];
        // each part begins with CRLF after the boundary line
        let part = part.strip_prefix(b"\r\n").unwrap_or(part);
        let part = part.strip_suffix(b"\r\n").unwrap_or(part);

        if let Some(item) = parse_part(part, limits)? {
            items.push(item);
        }
    }

    Ok(items)
}

fn parse_part(part: &[u8], limits: &ReqLimits) -> Result<Option<MultipartItem>, ErrorKind> {
    let header_end = memmem::find(part, b"\r\n\r\n")
        .map(|pos| pos + 4)
        .or_else(|| memmem::find(part, b"\n\n").map(|pos| pos + 2));
    let Some(header_end) = header_end else {
        return Ok(None);
    };

    let header_block = &part[..header_end];
    let content = &part[header_end..];

    let mut headers = HeaderMap::new(4);
    for line in header_block.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        let name = String::from_utf8_lossy(line[..colon].trim_ascii()).into_owned();
        let value = String::from_utf8_lossy(line[colon + 1..].trim_ascii()).into_owned();
        headers.set(name, value);
    }

    let disposition = headers.get("content-disposition").unwrap_or("");
    let filename = extract_directive(disposition, "filename");
    let charset = headers
        .get("content-type")
        .and_then(|ct| extract_directive(ct, "charset"));

    let value = if filename.is_some() {
        PartValue::Stream(spill_stream(
            content.to_vec(),
            limits.multipart_spill_threshold,
        ))
    } else {
        PartValue::Inline(decode_part_text(content, charset.as_deref()))
    };

    Ok(Some(MultipartItem { headers, value }))
}

fn decode_part_text(bytes: &[u8], charset: Option<&str>) -> String {
    // Per the pinned Open Question decision (DESIGN.md): honor a recognized
    // charset name, otherwise fall back to UTF-8 lossy conversion.
    match charset.map(str::to_ascii_lowercase).as_deref() {
        Some("utf-8") | Some("utf8") | None => String::from_utf8_lossy(bytes).into_owned(),
        Some("us-ascii") | Some("ascii") => bytes.iter().map(|&b| b as char).collect(),
        Some(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn extract_directive(header_value: &str, directive: &str) -> Option<String> {
    header_value.split(';').find_map(|part| {
        let part = part.trim();
        let prefix = format!("{directive}=");
        part.strip_prefix(&prefix)
            .map(|v| v.trim_matches('"').to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::ReqLimits;

    fn limits() -> ReqLimits {
        ReqLimits::default()
    }

    #[tokio::test]
    async fn url_encoded_body_decodes_into_post_params() {
        let mut buf = ReadBuffer::new(64, 1024);
        let body = b"a=1&b=hi%20u";
        let mut stream: &[u8] = body;
        buf.fill_from(&mut stream).await.unwrap();

        let mut empty: &[u8] = b"";
        let result = parse_body(
            &mut empty,
            &mut buf,
            body.len(),
            Some("application/x-www-form-urlencoded"),
            &limits(),
        )
        .await
        .unwrap();

        match result {
            ParsedBody::UrlEncoded(params) => {
                assert_eq!(params[0], ("a".to_string(), "1".to_string()));
                assert_eq!(params[1], ("b".to_string(), "hi u".to_string()));
            }
            _ => panic!("expected url-encoded body"),
        }
    }

    #[tokio::test]
    async fn multipart_file_part_round_trips_content() {
        let raw = b"--XYZ\r\nContent-Disposition: form-data; name=\"f\"; filename=\"x.txt\"\r\nContent-Type: text/plain\r\n\r\nHELLO\r\n--XYZ--\r\n";
        let mut buf = ReadBuffer::new(64, 4096);
        let mut stream: &[u8] = raw;
        buf.fill_from(&mut stream).await.unwrap();

        let mut empty: &[u8] = b"";
        let result = parse_body(
            &mut empty,
            &mut buf,
            raw.len(),
            Some("multipart/form-data; boundary=XYZ"),
            &limits(),
        )
        .await
        .unwrap();

        match result {
            ParsedBody::Multipart(mut items) => {
                assert_eq!(items.len(), 1);
                let item = &mut items[0];
                assert!(item.header("content-disposition").unwrap().contains("filename"));
                let mut out = String::new();
                item.as_stream().unwrap().read_to_string(&mut out).unwrap();
                assert_eq!(out, "HELLO");
            }
            _ => panic!("expected multipart body"),
        }
    }

    #[tokio::test]
    async fn opaque_body_streams_arbitrary_bytes() {
        let raw = b"\x00\x01binary-ish";
        let mut buf = ReadBuffer::new(64, 1024);
        let mut stream: &[u8] = raw;
        buf.fill_from(&mut stream).await.unwrap();

        let mut empty: &[u8] = b"";
        let result = parse_body(&mut empty, &mut buf, raw.len(), Some("application/octet-stream"), &limits())
            .await
            .unwrap();

        match result {
            ParsedBody::Opaque(mut s) => {
                let mut out = Vec::new();
                s.read_to_end(&mut out).unwrap();
                assert_eq!(out, raw);
            }
            _ => panic!("expected opaque body"),
        }
    }

    #[tokio::test]
    async fn missing_boundary_is_a_protocol_error() {
        let mut buf = ReadBuffer::new(64, 1024);
        let mut stream: &[u8] = b"";
        buf.fill_from(&mut stream).await.unwrap();
        let mut empty: &[u8] = b"";

        let err = parse_body(&mut empty, &mut buf, 0, Some("multipart/form-data"), &limits())
            .await
            .unwrap_err();
        assert_eq!(err, ErrorKind::MultipartNoBoundary);
    }
}
