//! A scripted stand-in for the real upstream IMAP server (SPEC_FULL.md §10 "Test tooling"). It
//! understands just enough of the wire protocol to answer the handful of commands the session
//! mediator issues, dispatching on keywords rather than tracking an exact tag sequence — the
//! mediator is free to interleave `relay()` and the narrow `upstream_*` operations however the
//! sanitizer/forwarder pipelines need.

use std::io::{BufRead as _, BufReader, Read as _, Write as _};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Served back for any full-body fetch; a minimal but complete RFC 5322 message.
pub const MESSAGE: &[u8] =
  b"From: sender@example.com\r\nTo: recipient@example.com\r\nSubject: hello\r\nDate: Fri, 25 Jun 2021 12:34:56 +0000\r\n\r\nbody\r\n";

#[derive(Default)]
pub struct Counters {
  pub commands: AtomicUsize,
  pub appends: AtomicUsize,
  pub expunges: AtomicUsize,
}

impl Counters {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }
}

/// Serves requests off `stream` until the peer disconnects or sends `LOGOUT`.
pub fn serve(stream: TcpStream, counters: Arc<Counters>) {
  let mut writer = stream.try_clone().expect("cloning the fake upstream socket");
  let mut reader = BufReader::new(stream);
  loop {
    let Some(line) = read_line(&mut reader) else { break };
    counters.commands.fetch_add(1, Ordering::SeqCst);

    let trimmed = line.trim_end_matches(['\r', '\n']);
    let mut tokens = trimmed.splitn(2, ' ');
    let tag = tokens.next().unwrap_or("*").to_string();
    let rest = tokens.next().unwrap_or("").to_string();
    let upper = rest.to_ascii_uppercase();

    if upper.starts_with("SELECT") {
      write!(writer, "* 1 EXISTS\r\n{tag} OK [READ-WRITE] SELECT completed.\r\n").unwrap();
    } else if upper.contains("HEADER.FIELDS (X-CIRCL-SANITIZER)") {
      write!(
        writer,
        "* 1 FETCH (FLAGS () BODY[HEADER.FIELDS (X-CIRCL-Sanitizer)] {{2}}\r\n\r\n)\r\n{tag} OK FETCH completed.\r\n"
      )
      .unwrap();
    } else if upper.starts_with("APPEND") {
      let length = literal_length(&line).expect("APPEND line announces a literal length");
      write!(writer, "+ Ready for literal data\r\n").unwrap();
      let mut body = vec![0u8; length];
      reader.read_exact(&mut body).expect("reading the APPEND literal");
      let mut trailer = [0u8; 2];
      reader.read_exact(&mut trailer).expect("reading the APPEND literal's trailing CRLF");
      counters.appends.fetch_add(1, Ordering::SeqCst);
      write!(writer, "{tag} OK APPEND completed.\r\n").unwrap();
    } else if upper.contains("STORE") {
      write!(writer, "{tag} OK STORE completed.\r\n").unwrap();
    } else if upper.starts_with("EXPUNGE") {
      counters.expunges.fetch_add(1, Ordering::SeqCst);
      write!(writer, "{tag} OK EXPUNGE completed.\r\n").unwrap();
    } else if upper.contains("BODY.PEEK[]") || upper.contains("BODY[]") {
      write!(writer, "* 1 FETCH (BODY[] {{{}}}\r\n", MESSAGE.len()).unwrap();
      writer.write_all(MESSAGE).unwrap();
      write!(writer, ")\r\n{tag} OK FETCH completed.\r\n").unwrap();
    } else if upper.starts_with("MOVE") {
      write!(writer, "{tag} OK MOVE completed.\r\n").unwrap();
    } else if upper.starts_with("LOGOUT") {
      write!(writer, "* BYE\r\n{tag} OK LOGOUT completed.\r\n").unwrap();
      break;
    } else {
      write!(writer, "{tag} OK {rest} completed.\r\n").unwrap();
    }
  }
}

fn read_line(reader: &mut BufReader<TcpStream>) -> Option<String> {
  let mut line = Vec::new();
  match reader.read_until(b'\n', &mut line) {
    Ok(0) | Err(_) => None,
    Ok(_) => Some(String::from_utf8_lossy(&line).into_owned()),
  }
}

/// Mirrors `source/transport.rs`'s `literal_announcement`: a trailing `{N}` before the line's
/// CRLF announces N raw octets immediately following. The fake upstream never sends `{N+}`, so
/// unlike the real parser this doesn't need to handle the non-synchronizing suffix.
fn literal_length(line: &str) -> Option<usize> {
  let body = line.strip_suffix("\r\n").or_else(|| line.strip_suffix('\n'))?;
  let digits = body.strip_suffix('}')?;
  let start = digits.rfind('{')? + 1;
  if start == digits.len() {
    return None;
  }
  digits[start..].parse().ok()
}
