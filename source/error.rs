/// One variant per row of the error table (SPEC_FULL.md §7 / §10 "Error handling"). The
/// session loop matches on the variant to pick BAD / NO / silent-close, instead of sniffing
/// error message text the way the original Python proxy did.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
  #[error("request has no tag and/or no command: {0:?}")]
  ProtocolParse(String),

  #[error("unknown hostname for domain {0:?}")]
  UnknownDomain(String),

  #[error("upstream rejected LOGIN for {0:?}")]
  UpstreamAuth(String),

  #[error("upstream I/O failed: {0}")]
  UpstreamIo(#[source] std::io::Error),

  #[error("client I/O failed: {0}")]
  ClientIo(#[source] std::io::Error),

  #[error("TLS handshake failed: {0}")]
  TlsHandshake(String),

  #[error("groomer failed for message {0}: {1}")]
  Groomer(String, String),

  #[error("upstream reports invalid message set for id {0}")]
  InvalidId(String),

  #[error("malformed FETCH response probing for sanitizer header: {0}")]
  MalformedFetchResponse(String),
}

impl ProxyError {
  /// Whether this error should be surfaced to the client as a tagged completion, and if so, which
  /// one (SPEC_FULL.md §7's "Surface" column); `None` for variants the sanitizer/forwarder catch
  /// and log one id at a time instead, per the "Local recovery" column. `session::connect_upstream`
  /// matches on this to decide BAD vs NO instead of re-deriving the table per call site.
  pub fn completion(&self) -> Option<Completion> {
    match self {
      ProxyError::ProtocolParse(_) | ProxyError::UnknownDomain(_) => Some(Completion::Bad),
      ProxyError::UpstreamAuth(_) => Some(Completion::No),
      ProxyError::UpstreamIo(_) | ProxyError::ClientIo(_) | ProxyError::TlsHandshake(_) => None,
      ProxyError::Groomer(..) | ProxyError::InvalidId(_) | ProxyError::MalformedFetchResponse(_) => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
  Bad,
  No,
}
