//! Growable read buffer with line extraction (`spec.md` §4.1).

use crate::errors::ErrorKind;
use memchr::memchr;
use tokio::io::AsyncReadExt;

/// A growable byte buffer backing a sequential reader.
///
/// Bytes before `consumed` have already been parsed and are logically gone;
/// `reset()` compacts them away. The buffer doubles on demand, capped at
/// `max_len`, matching `spec.md` §4.1's "doubles on demand up to a hard
/// maximum" rule.
pub(crate) struct ReadBuffer {
    data: Vec<u8>,
    consumed: usize,
    filled: usize,
    max_len: usize,
}

impl ReadBuffer {
    pub(crate) fn new(initial_capacity: usize, max_len: usize) -> Self {
        Self {
            data: vec![0u8; initial_capacity.max(256)],
            consumed: 0,
            filled: 0,
            max_len,
        }
    }

    /// Issues one async read into the free tail, growing the buffer first
    /// if the tail is empty. Returns the number of bytes read (`0` means EOF).
    pub(crate) async fn fill_from<R: tokio::io::AsyncRead + Unpin>(
        &mut self,
        stream: &mut R,
    ) -> Result<usize, ErrorKind> {
        if self.filled == self.data.len() {
            self.grow()?;
        }

        let n = stream.read(&mut self.data[self.filled..]).await?;
        self.filled += n;
        Ok(n)
    }

    fn grow(&mut self) -> Result<(), ErrorKind> {
        let new_len = (self.data.len() * 2).min(self.max_len);
        if new_len <= self.data.len() {
            return Err(ErrorKind::BodyTooLarge);
        }
        self.data.resize(new_len, 0);
        Ok(())
    }

    /// Returns the next CRLF- (or bare-LF-) terminated line from the
    /// consumed cursor, with the terminator stripped. `None` if no complete
    /// line is buffered yet.
    pub(crate) fn read_line(&mut self) -> Result<Option<String>, ErrorKind> {
        let window = &self.data[self.consumed..self.filled];
        let Some(lf_pos) = memchr(b'\n', window) else {
            if window.len() >= self.max_len {
                return Err(ErrorKind::InvalidHeader);
            }
            return Ok(None);
        };

        let end = if lf_pos > 0 && window[lf_pos - 1] == b'\r' {
            lf_pos - 1
        } else {
            lf_pos
        };

        let line = String::from_utf8_lossy(&window[..end]).into_owned();
        self.consumed += lf_pos + 1;
        Ok(Some(line))
    }

    /// Consumes and returns exactly `len` raw bytes, if available.
    pub(crate) fn take_exact(&mut self, len: usize) -> Option<&[u8]> {
        if self.filled - self.consumed < len {
            return None;
        }
        let slice = &self.data[self.consumed..self.consumed + len];
        self.consumed += len;
        Some(slice)
    }

    /// True iff unread bytes remain.
    pub(crate) fn data_available(&self) -> bool {
        self.consumed < self.filled
    }

    pub(crate) fn unread(&self) -> &[u8] {
        &self.data[self.consumed..self.filled]
    }

    pub(crate) fn advance(&mut self, n: usize) {
        self.consumed = (self.consumed + n).min(self.filled);
    }

    /// Drops the consumed prefix, retaining any unparsed tail — used both
    /// between prolog/header/body phases and on keep-alive reset, so any
    /// pipelined bytes the client already sent survive into the next parse.
    pub(crate) fn reset(&mut self) {
        if self.consumed == 0 {
            return;
        }
        self.data.copy_within(self.consumed..self.filled, 0);
        self.filled -= self.consumed;
        self.consumed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fill_and_read_line() {
        let mut buf = ReadBuffer::new(16, 1024);
        let mut stream: &[u8] = b"GET / HTTP/1.1\r\nHost: h\r\n\r\n";
        buf.fill_from(&mut stream).await.unwrap();

        assert_eq!(buf.read_line().unwrap().as_deref(), Some("GET / HTTP/1.1"));
        assert_eq!(buf.read_line().unwrap().as_deref(), Some("Host: h"));
        assert_eq!(buf.read_line().unwrap().as_deref(), Some(""));
    }

    #[tokio::test]
    async fn bare_lf_is_accepted_lone_cr_is_not_a_terminator() {
        let mut buf = ReadBuffer::new(16, 1024);
        let mut stream: &[u8] = b"a\nb\r\rc\r\n";
        buf.fill_from(&mut stream).await.unwrap();

        assert_eq!(buf.read_line().unwrap().as_deref(), Some("a"));
        assert_eq!(buf.read_line().unwrap().as_deref(), Some("b\r\rc"));
    }

    #[tokio::test]
    async fn reset_preserves_unparsed_tail() {
        let mut buf = ReadBuffer::new(16, 1024);
        let mut stream: &[u8] = b"GET / HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        buf.fill_from(&mut stream).await.unwrap();

        buf.read_line().unwrap();
        buf.read_line().unwrap();
        buf.reset();

        assert_eq!(
            buf.read_line().unwrap().as_deref(),
            Some("GET /b HTTP/1.1")
        );
    }

    #[tokio::test]
    async fn grows_on_demand_and_caps_out() {
        let mut buf = ReadBuffer::new(4, 8);
        let mut stream: &[u8] = b"0123456789";
        // first fill fills the 4-byte buffer
        buf.fill_from(&mut stream).await.unwrap();
        // second fill grows to 8 (cap)
        buf.fill_from(&mut stream).await.unwrap();
        // third fill would need to grow past the cap
        assert!(buf.fill_from(&mut stream).await.is_err());
    }
}
