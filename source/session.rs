//! C5 — the per-client session mediator (SPEC_FULL.md §4.5). The largest component: this is
//! `IMAP_Client`/`IMAP_Client_SSL` from the source, restructured around an explicit dispatch
//! table (SPEC_FULL.md §9) and the narrow capability interface the sanitizer/forwarder modules
//! consume (`current_folder`, `mac_key`, and a handful of `upstream_*` operations) instead of a
//! single grab-bag `client`.

use crate::{
  config::Config,
  error::{Completion, ProxyError},
  groomer::Groom,
  misp, registry, sanitizer,
  transport::{self, BoxedTransport, Duplex},
  upstream,
};
use base64::Engine as _;

pub struct Session {
  client: BoxedTransport,
  upstream: Option<BoxedTransport>,
  pub current_folder: Option<String>,
  pub mac_key: Vec<u8>,
  misp: crate::config::MispSink,
  groomer: Box<dyn Groom>,
  tag_counter: u64,
  running: bool,
}

struct Request {
  tag: String,
  uid: bool,
  command: String,
  /// Everything after the command token, unparsed.
  rest: String,
  /// The raw line exactly as read off the wire (used for tag substitution during relay).
  raw: Vec<u8>,
}

/// The outcome of [`Session::upstream_header_probe`] (SPEC_FULL.md §4.3 step 5 / §7).
pub enum HeaderProbe {
  /// The header was present with this value.
  Present(String),
  /// The response parsed fine; the header just isn't there — a normal, unsanitized message.
  Absent,
  /// The response didn't have the shape the probe expects at all (no parseable literal).
  Malformed(ProxyError),
}

impl Session {
  pub fn new(client: Box<dyn Duplex>, config: &Config, groomer: Box<dyn Groom>) -> Self {
    Self {
      client: BoxedTransport::new(client),
      upstream: None,
      current_folder: None,
      mac_key: config.mac_key.clone(),
      misp: config.misp.clone(),
      groomer,
      tag_counter: 0,
      running: true,
    }
  }

  /// Wires `upstream` directly instead of dialing `upstream::connect` (SPEC_FULL.md §10 "Test
  /// tooling"): integration tests drive a fake upstream over this seam without touching DNS/TLS.
  #[doc(hidden)]
  pub fn for_integration_test(
    client: impl std::io::Read + std::io::Write + Send + 'static,
    upstream: impl std::io::Read + std::io::Write + Send + 'static,
    config: &Config,
    groomer: Box<dyn Groom>,
  ) -> Self {
    let mut session = Self::new(Box::new(client), config, groomer);
    session.upstream = Some(BoxedTransport::new(Box::new(upstream)));
    session
  }

  /// Greets the client and runs the request loop until LOGOUT, a protocol error, or peer
  /// disconnect (SPEC_FULL.md §4.5's state machine, `GREETED -> ... -> CLOSED`).
  pub fn run(&mut self) {
    if let Err(error) = self.client.write_line("* OK Service Ready.") {
      log::warn!("couldn't send the greeting: {error}");
      return;
    }
    while self.running {
      match self.read_client_request() {
        Ok(line) => {
          if let Err(error) = self.handle(&line) {
            log::warn!("session terminating: {error}");
            break;
          }
        }
        Err(error) => {
          log::debug!("client disconnected: {error}");
          break;
        }
      }
    }
  }

  /// Reads one full client request, granting any synchronizing-literal continuation ourselves
  /// (SPEC_FULL.md §9 "Line size (REDESIGNED)"): a bare `{N}` only tells the client to wait for
  /// *our* `+` before sending the announced octets, so unlike `Transport::read_line` (used for
  /// upstream responses, which a server sends without waiting on us), we must answer that
  /// continuation locally before the next read can produce any bytes at all.
  fn read_client_request(&mut self) -> anyhow::Result<Vec<u8>> {
    let mut request = Vec::new();
    loop {
      match self.client.read_request_line()? {
        transport::Request::Line(line) => {
          request.extend_from_slice(&line);
          return Ok(request);
        }
        transport::Request::Literal { announced, length } => {
          request.extend_from_slice(&announced);
          self.client.write_line("+ OK")?;
          let literal = self.client.read_exact(length)?;
          request.extend_from_slice(&literal);
        }
      }
    }
  }

  fn handle(&mut self, line: &[u8]) -> anyhow::Result<()> {
    let text = String::from_utf8_lossy(line).into_owned();
    let request = match parse(&text, line) {
      Some(request) => request,
      None => {
        self.client.write_line(&error_completion("*", "Incorrect request"))?;
        anyhow::bail!("{:?} contains no tag and/or no command", text.trim_end());
      }
    };

    if !registry::is_intercepted(&request.command) {
      return self.relay(&request);
    }

    match request.command.to_ascii_uppercase().as_str() {
      "CAPABILITY" => self.handle_capability(&request),
      "AUTHENTICATE" => self.handle_authenticate(&request),
      "LOGIN" => self.handle_login(&request),
      "LOGOUT" => self.handle_logout(&request),
      "SELECT" => self.handle_select(&request),
      "MOVE" => self.handle_move(&request),
      "FETCH" => self.handle_fetch(&request),
      _ => unreachable!("registry::is_intercepted admitted an unhandled verb"),
    }
  }

  fn handle_capability(&mut self, request: &Request) -> anyhow::Result<()> {
    self
      .client
      .write_line(&format!("* CAPABILITY {}", registry::CAPABILITIES.join(" ")))?;
    self.client.write_line(&success_completion(&request.tag, &request.command))?;
    Ok(())
  }

  fn handle_authenticate(&mut self, request: &Request) -> anyhow::Result<()> {
    let mechanism = request.rest.split_whitespace().next().unwrap_or_default();
    if !mechanism.eq_ignore_ascii_case("PLAIN") {
      self
        .client
        .write_line(&error_completion(&request.tag, "Unsupported authentication mechanism"))?;
      anyhow::bail!("unsupported AUTHENTICATE mechanism {mechanism:?}");
    }
    self.client.write_line("+")?;
    let line = self.client.read_line()?;
    let decoded = base64::engine::general_purpose::STANDARD
      .decode(strip_crlf(&line))
      .map_err(|error| ProxyError::ProtocolParse(error.to_string()))?;
    let mut parts = decoded.split(|byte| *byte == 0);
    parts.next(); // authzid, unused
    let username = String::from_utf8_lossy(parts.next().unwrap_or_default()).into_owned();
    let password = String::from_utf8_lossy(parts.next().unwrap_or_default()).into_owned();
    self.connect_upstream(request, &username, &password)
  }

  fn handle_login(&mut self, request: &Request) -> anyhow::Result<()> {
    let mut fields = request.rest.splitn(2, char::is_whitespace);
    let username = unquote(fields.next().unwrap_or_default());
    let password = unquote(fields.next().unwrap_or_default().trim());
    self.connect_upstream(request, &username, &password)
  }

  /// Maps a failed upstream connect onto the client completion `ProxyError::completion()` says
  /// it deserves (SPEC_FULL.md §7's error table): `BAD`/`NO`, or nothing for variants this path
  /// never actually produces.
  fn connect_upstream(&mut self, request: &Request, username: &str, password: &str) -> anyhow::Result<()> {
    match upstream::connect(username, password) {
      Ok(transport) => {
        self.upstream = Some(transport);
        self.client.write_line(&success_completion(&request.tag, &request.command))?;
        Ok(())
      }
      Err(error) => {
        match error.completion() {
          Some(Completion::Bad) => self.client.write_line(&error_completion(&request.tag, "Unknown hostname"))?,
          Some(Completion::No) => self.client.write_line(&failure_completion(&request.tag, &request.command))?,
          None => {}
        }
        Err(error.into())
      }
    }
  }

  fn handle_select(&mut self, request: &Request) -> anyhow::Result<()> {
    self.current_folder = Some(unquote(request.rest.trim()));
    self.relay(request)
  }

  fn handle_move(&mut self, request: &Request) -> anyhow::Result<()> {
    if let Err(error) = misp::process(self, &request.tag, request.uid, &request.rest) {
      log::warn!("MISP forwarding failed: {error}");
    }
    self.relay(request)
  }

  fn handle_fetch(&mut self, request: &Request) -> anyhow::Result<()> {
    let full_request = format!("{} {}FETCH {}", request.tag, if request.uid { "UID " } else { "" }, request.rest);
    if let Err(error) = sanitizer::process(self, &full_request, self.groomer.as_ref()) {
      log::warn!("sanitization failed: {error}");
    }
    self.relay(request)
  }

  fn handle_logout(&mut self, request: &Request) -> anyhow::Result<()> {
    self.running = false;
    self.relay(request)
  }

  /// The central data-plane contract (SPEC_FULL.md §4.5 "Transparent relay"): substitute tags,
  /// stream intervening lines verbatim, and handle the continuation sub-loop.
  fn relay(&mut self, request: &Request) -> anyhow::Result<()> {
    let upstream = self
      .upstream
      .as_mut()
      .ok_or_else(|| ProxyError::ProtocolParse("no upstream session".to_string()))?;

    let upstream_tag = format!("P{}", {
      self.tag_counter += 1;
      self.tag_counter
    });
    let rewritten = replace_first(&request.raw, request.tag.as_bytes(), upstream_tag.as_bytes());
    upstream.write_all(&rewritten)?;

    loop {
      let line = upstream.read_line()?;
      if line.starts_with(b"+") && !request.command.eq_ignore_ascii_case("FETCH") {
        self.client.write_all(&line)?;
        loop {
          let client_line = self.client.read_line()?;
          let is_empty_line = client_line == b"\r\n";
          upstream.write_all(&client_line)?;
          if is_empty_line {
            break;
          }
        }
        continue;
      }
      let (tag, text_start) = split_tag(&line);
      if tag == upstream_tag.as_bytes() {
        let mut out = request.tag.clone().into_bytes();
        out.extend_from_slice(&line[text_start..]);
        self.client.write_all(&out)?;
        return Ok(());
      }
      self.client.write_all(&line)?;
    }
  }

  // --- narrow upstream surface consumed by sanitizer.rs / misp.rs (SPEC_FULL.md §9) ---

  pub fn upstream_select(&mut self, folder: &str) -> anyhow::Result<()> {
    self.upstream_command(&format!("SELECT \"{folder}\""))?;
    Ok(())
  }

  /// Runs the `(FLAGS BODY.PEEK[HEADER.FIELDS (<header>)])` probe (SPEC_FULL.md §4.3 step 5,
  /// second bullet). Distinguishes a genuinely absent header (normal, unsanitized message) from
  /// a response we couldn't even parse a literal out of — SPEC_FULL.md §7's "Malformed FETCH
  /// response" row requires the latter be treated conservatively as already-sanitized rather than
  /// falling through to a full sanitize-and-append.
  pub fn upstream_header_probe(&mut self, id: &str, uid: bool, header: &str) -> anyhow::Result<HeaderProbe> {
    let command = format!(
      "{}FETCH {id} (FLAGS BODY.PEEK[HEADER.FIELDS ({header})])",
      if uid { "UID " } else { "" }
    );
    let (_, untagged) = self.upstream_command(&command)?;
    Ok(match extract_literal(&untagged) {
      None => HeaderProbe::Malformed(ProxyError::MalformedFetchResponse(format!(
        "no parseable literal in the header probe response for id {id:?}"
      ))),
      Some(literal) => match extract_header_value(&literal, header) {
        Some(value) => HeaderProbe::Present(value),
        None => HeaderProbe::Absent,
      },
    })
  }

  /// Fetches `BODY.PEEK[]`; `None` means the upstream reported an invalid or empty message set.
  pub fn upstream_fetch_body(&mut self, id: &str, uid: bool) -> anyhow::Result<Option<Vec<u8>>> {
    let command = format!("{}FETCH {id} BODY.PEEK[]", if uid { "UID " } else { "" });
    let (ok, untagged) = self.upstream_command(&command)?;
    if !ok {
      return Ok(None);
    }
    Ok(extract_literal(&untagged))
  }

  pub fn upstream_append(&mut self, folder: &str, internal_date: &str, message: &[u8]) -> anyhow::Result<()> {
    let upstream = self.upstream.as_mut().ok_or_else(|| anyhow::anyhow!("no upstream session"))?;
    self.tag_counter += 1;
    let tag = format!("P{}", self.tag_counter);
    upstream.write_all(format!("{tag} APPEND \"{folder}\" \"{internal_date}\" {{{}}}\r\n", message.len()).as_bytes())?;
    let continuation = upstream.read_line()?;
    anyhow::ensure!(continuation.starts_with(b"+"), "upstream refused the APPEND literal");
    upstream.write_all(message)?;
    upstream.write_all(b"\r\n")?;
    loop {
      let line = upstream.read_line()?;
      let (line_tag, _) = split_tag(&line);
      if line_tag == tag.as_bytes() {
        anyhow::ensure!(is_ok_response(&line), "APPEND to {folder:?} failed: {:?}", String::from_utf8_lossy(&line));
        return Ok(());
      }
    }
  }

  pub fn upstream_delete(&mut self, id: &str, uid: bool) -> anyhow::Result<()> {
    let store = format!("{}STORE {id} +FLAGS (\\Deleted)", if uid { "UID " } else { "" });
    self.upstream_command(&store)?;
    self.upstream_command("EXPUNGE")?;
    Ok(())
  }

  pub fn misp_sink(&self) -> &crate::config::MispSink {
    &self.misp
  }

  /// Issues `<fresh-tag> <command>\r\n` upstream and reads until the matching tagged
  /// completion, returning whether it was OK and the concatenation of every intervening
  /// (untagged/literal) byte.
  fn upstream_command(&mut self, command: &str) -> anyhow::Result<(bool, Vec<u8>)> {
    let upstream = self.upstream.as_mut().ok_or_else(|| anyhow::anyhow!("no upstream session"))?;
    self.tag_counter += 1;
    let tag = format!("P{}", self.tag_counter);
    upstream.write_line(&format!("{tag} {command}"))?;
    let mut untagged = Vec::new();
    loop {
      let line = upstream.read_line()?;
      let (line_tag, _) = split_tag(&line);
      if line_tag == tag.as_bytes() {
        return Ok((is_ok_response(&line), untagged));
      }
      untagged.extend_from_slice(&line);
    }
  }
}

fn is_ok_response(line: &[u8]) -> bool {
  let (_, text_start) = split_tag(line);
  String::from_utf8_lossy(&line[text_start..]).trim_start().to_ascii_uppercase().starts_with("OK")
}

/// Splits a tagged response line into `(tag_bytes, offset_of_text_after_the_space)`.
fn split_tag(line: &[u8]) -> (&[u8], usize) {
  match line.iter().position(|byte| *byte == b' ') {
    Some(position) => (&line[..position], position + 1),
    None => (&line[..0], 0),
  }
}

fn replace_first(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
  match haystack.windows(needle.len().max(1)).position(|window| window == needle) {
    Some(position) => {
      let mut out = Vec::with_capacity(haystack.len() - needle.len() + replacement.len());
      out.extend_from_slice(&haystack[..position]);
      out.extend_from_slice(replacement);
      out.extend_from_slice(&haystack[position + needle.len()..]);
      out
    }
    None => haystack.to_vec(),
  }
}

/// Finds the first `{N}\r\n` literal announcement in `bytes` and returns the N octets after it.
fn extract_literal(bytes: &[u8]) -> Option<Vec<u8>> {
  let open = bytes.iter().position(|byte| *byte == b'{')?;
  let close = open + bytes[open..].iter().position(|byte| *byte == b'}')?;
  let length: usize = std::str::from_utf8(&bytes[open + 1..close]).ok()?.parse().ok()?;
  let start = close + 1 + 2; // skip "}\r\n"
  bytes.get(start..start + length).map(<[u8]>::to_vec)
}

/// Finds `header` within an already-extracted literal's text (SPEC_FULL.md §4.3 step 5).
fn extract_header_value(literal: &[u8], header: &str) -> Option<String> {
  let text = String::from_utf8_lossy(literal);
  let prefix = format!("{header}:");
  text
    .lines()
    .find(|line| line.to_ascii_lowercase().starts_with(&prefix.to_ascii_lowercase()))
    .map(|line| line[prefix.len()..].trim().to_string())
}

fn strip_crlf(line: &[u8]) -> &[u8] {
  line.strip_suffix(b"\r\n").or_else(|| line.strip_suffix(b"\n")).unwrap_or(line)
}

fn unquote(text: &str) -> String {
  let text = text.trim();
  text.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')).unwrap_or(text).to_string()
}

fn success_completion(tag: &str, command: &str) -> String {
  format!("{tag} OK {command} completed.")
}

fn failure_completion(tag: &str, command: &str) -> String {
  format!("{tag} NO {command} failed.")
}

fn error_completion(tag: &str, message: &str) -> String {
  format!("{tag} BAD {message}")
}

/// Parses `<tag> [UID] <COMMAND> [<rest>]`, case-insensitive on `UID`/command (SPEC_FULL.md
/// §4.5 "Request loop").
fn parse(text: &str, raw: &[u8]) -> Option<Request> {
  let trimmed = text.trim_end_matches(['\r', '\n']);
  let mut tokens = trimmed.splitn(2, char::is_whitespace);
  let tag = tokens.next()?.to_string();
  if tag.is_empty() {
    return None;
  }
  let remainder = tokens.next().unwrap_or_default().trim_start();
  let mut tokens = remainder.splitn(2, char::is_whitespace);
  let mut next = tokens.next()?.to_string();
  if next.is_empty() {
    return None;
  }
  let uid = next.eq_ignore_ascii_case("UID");
  let rest_after_first = tokens.next().unwrap_or_default().trim_start();
  let (command, rest) = if uid {
    let mut tokens = rest_after_first.splitn(2, char::is_whitespace);
    next = tokens.next()?.to_string();
    if next.is_empty() {
      return None;
    }
    (next, tokens.next().unwrap_or_default().trim_start().to_string())
  } else {
    (next, rest_after_first.to_string())
  };
  Some(Request { tag, uid, command, rest, raw: raw.to_vec() })
}
