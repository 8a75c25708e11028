//! Line-and-literal framing over a full-duplex byte stream (SPEC_FULL.md §4.5, §9).
//!
//! The teacher's `imap::Stream` drives a PEG grammar over an internal buffer and resorts to a
//! NOOP-chunking trick to find response boundaries without a length indication. We don't need a
//! full grammar here — just tag/verb extraction plus byte-exact literal passthrough — so this is
//! a plain CRLF line reader that additionally understands the `{N}` literal syntax.

use anyhow::Context as _;
use std::io::{self, BufRead as _, Write as _};

/// Backstop against a peer that never sends CRLF; not a protocol limit, just sanity.
const MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

/// A full-duplex byte stream, object-safe so the session can hold a client connection (plaintext
/// or server-TLS) and an upstream connection (always TLS) behind the same field type.
pub trait Duplex: io::Read + io::Write + Send {}
impl<T: io::Read + io::Write + Send> Duplex for T {}

pub type BoxedTransport = Transport<Box<dyn Duplex>>;

/// A CRLF-delimited, literal-aware reader/writer over any full-duplex byte stream.
///
/// One `Transport` wraps one side of a session (client or upstream); the mediator holds one of
/// each. `RW` is boxed at the call site so plaintext and TLS streams share one session type.
pub struct Transport<RW> {
  reader: io::BufReader<RW>,
}

impl<RW> Transport<RW>
where
  RW: io::Read + io::Write,
{
  pub fn new(rw: RW) -> Self {
    Self { reader: io::BufReader::new(rw) }
  }

  /// Reads one CRLF-terminated line, CRLF included, trailing an inline literal's raw octets
  /// when the line ends with `{N}` or `{N+}` (SPEC_FULL.md §4.5's "reading an inline IMAP
  /// literal").
  ///
  /// For use on a peer that never waits for *us* to grant a continuation before sending literal
  /// octets — i.e. an upstream server's responses, which include literal data inline with no
  /// round-trip back to the proxy. Client requests must go through [`Self::read_request_line`]
  /// instead, since a synchronizing literal there means the client is waiting on our `+`.
  ///
  /// The returned bytes are exactly what came off the wire: callers that need tag/verb fields
  /// decode with `String::from_utf8_lossy`, matching the source's `decode(..., 'replace')`.
  pub fn read_line(&mut self) -> anyhow::Result<Vec<u8>> {
    let mut line = self.read_raw_line()?;
    if let Some((length, _non_sync)) = literal_announcement(&line) {
      let literal = self.read_exact(length)?;
      line.extend_from_slice(&literal);
    }
    Ok(line)
  }

  /// Reads one client request line the way RFC 3501 requires a server to: a synchronizing
  /// literal announcement (`{N}`) is returned unconsumed, because the client won't send the
  /// announced octets until it sees our `+` continuation — reading immediately here would block
  /// forever on bytes the client hasn't sent yet (SPEC_FULL.md §9 "Line size (REDESIGNED)"). A
  /// non-synchronizing literal (`{N+}`, RFC 7888) is consumed immediately instead, since a client
  /// that sends one never waits for a continuation in the first place.
  pub fn read_request_line(&mut self) -> anyhow::Result<Request> {
    let mut request = Vec::new();
    loop {
      let line = self.read_raw_line()?;
      match literal_announcement(&line) {
        Some((length, false)) => {
          request.extend_from_slice(&line);
          return Ok(Request::Literal { announced: request, length });
        }
        Some((length, true)) => {
          request.extend_from_slice(&line);
          let literal = self.read_exact(length)?;
          request.extend_from_slice(&literal);
          // More of the command (possibly another literal, then the line's real CRLF
          // terminator) follows immediately; keep assembling instead of returning early.
        }
        None => {
          request.extend_from_slice(&line);
          return Ok(Request::Line(request));
        }
      }
    }
  }

  /// Reads exactly `length` raw octets, for consuming a synchronizing literal's announced body
  /// once a continuation has been granted.
  pub fn read_exact(&mut self, length: usize) -> anyhow::Result<Vec<u8>> {
    let mut literal = vec![0u8; length];
    self.reader.read_exact(&mut literal).context("reading a literal's announced octets")?;
    Ok(literal)
  }

  fn read_raw_line(&mut self) -> anyhow::Result<Vec<u8>> {
    let mut line = Vec::new();
    loop {
      let read = self
        .reader
        .read_until(b'\n', &mut line)
        .context("reading a line from the peer")?;
      if read == 0 {
        anyhow::bail!("end of stream");
      }
      anyhow::ensure!(line.len() <= MAX_LINE_BYTES, "line exceeds {MAX_LINE_BYTES} bytes");
      if line.ends_with(b"\r\n") {
        return Ok(line);
      }
      // BufReader::read_until stops at `\n` even without a preceding `\r`; keep reading until we
      // see the real line terminator rather than treating a bare LF as the end of the line.
    }
  }

  pub fn write_all(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
    self.reader.get_mut().write_all(bytes).context("writing to the peer")
  }

  pub fn write_line(&mut self, text: &str) -> anyhow::Result<()> {
    self.write_all(text.as_bytes())?;
    self.write_all(b"\r\n")
  }
}

/// The outcome of reading one client request line: either complete, or paused on a
/// synchronizing literal announcement whose octets haven't been read yet.
pub enum Request {
  /// A full line, CRLF included, with any non-synchronizing literal already appended.
  Line(Vec<u8>),
  /// `announced` is the line up to and including the `{N}\r\n` trailer; the caller must grant a
  /// continuation before reading `length` more octets with [`Transport::read_exact`].
  Literal { announced: Vec<u8>, length: usize },
}

/// A trailing `{N}` or `{N+}` immediately before the line's CRLF announces N raw octets to
/// follow, per RFC 3501 §4.3 (synchronizing) and RFC 7888 (non-synchronizing, `bool` is `true`).
fn literal_announcement(line: &[u8]) -> Option<(usize, bool)> {
  let body = line.strip_suffix(b"\r\n")?;
  let digits = body.strip_suffix(b"}")?;
  let (digits, non_sync) = match digits.strip_suffix(b"+") {
    Some(digits) => (digits, true),
    None => (digits, false),
  };
  let start = digits.iter().rposition(|byte| *byte == b'{')? + 1;
  if start == digits.len() {
    return None;
  }
  let length = std::str::from_utf8(&digits[start..]).ok()?.parse().ok()?;
  Some((length, non_sync))
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn literal_announcement_parses_sync_and_non_sync_forms() {
    assert_eq!(literal_announcement(b"a1 LOGIN {5}\r\n"), Some((5, false)));
    assert_eq!(literal_announcement(b"a1 APPEND INBOX {123+}\r\n"), Some((123, true)));
    assert_eq!(literal_announcement(b"a1 LOGIN alice pw\r\n"), None);
    assert_eq!(literal_announcement(b"a1 LOGIN {}\r\n"), None);
  }

  #[test]
  fn reads_a_plain_line() {
    let socket = io::Cursor::new(b"a1 NOOP\r\n".to_vec());
    let mut transport = Transport::new(socket);
    assert_eq!(transport.read_line().unwrap(), b"a1 NOOP\r\n");
  }

  #[test]
  fn reads_a_line_with_an_inline_literal() {
    let socket = io::Cursor::new(b"a1 APPEND INBOX {3}\r\nabc\r\n".to_vec());
    let mut transport = Transport::new(socket);
    assert_eq!(transport.read_line().unwrap(), b"a1 APPEND INBOX {3}\r\nabc");
  }

  #[test]
  fn end_of_stream_is_an_error() {
    let socket = io::Cursor::new(Vec::new());
    let mut transport = Transport::new(socket);
    assert!(transport.read_line().is_err());
  }

  #[test]
  fn request_line_pauses_on_a_synchronizing_literal() {
    let socket = io::Cursor::new(b"a1 APPEND INBOX {3}\r\nabc".to_vec());
    let mut transport = Transport::new(socket);
    match transport.read_request_line().unwrap() {
      Request::Literal { announced, length } => {
        assert_eq!(announced, b"a1 APPEND INBOX {3}\r\n");
        assert_eq!(length, 3);
      }
      Request::Line(_) => panic!("expected a paused literal, not a complete line"),
    }
    assert_eq!(transport.read_exact(3).unwrap(), b"abc");
  }

  #[test]
  fn request_line_consumes_a_non_synchronizing_literal_immediately() {
    let socket = io::Cursor::new(b"a1 APPEND INBOX {3+}\r\nabc\r\n".to_vec());
    let mut transport = Transport::new(socket);
    match transport.read_request_line().unwrap() {
      Request::Line(line) => assert_eq!(line, b"a1 APPEND INBOX {3+}\r\nabc\r\n"),
      Request::Literal { .. } => panic!("a non-synchronizing literal must not pause for a continuation"),
    }
  }
}
