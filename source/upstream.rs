//! C6 — upstream connector: domain → host resolution, TLS dial, LOGIN (SPEC_FULL.md §4.6).

use crate::{
  error::ProxyError,
  tls,
  transport::{BoxedTransport, Transport},
};
use std::collections::HashMap;

const UPSTREAM_PORT: u16 = 993;

fn host_map() -> HashMap<&'static str, &'static str> {
  HashMap::from([
    ("hotmail", "imap-mail.outlook.com"),
    ("outlook", "imap-mail.outlook.com"),
    ("yahoo", "imap.mail.yahoo.com"),
    ("gmail", "imap.gmail.com"),
  ])
}

/// Derives the host-map key from `local@sub.domain.tld`: everything between `@` and the final
/// `.`-separated label, labels joined by a space (matching the source's
/// `' '.join(domains[:-1])`).
fn domain_key(username: &str) -> Option<String> {
  let domain = username.split('@').nth(1)?;
  let mut labels: Vec<&str> = domain.split('.').collect();
  if labels.len() < 2 {
    return None;
  }
  labels.pop();
  Some(labels.join(" "))
}

/// Resolves `username`'s upstream host, opens a TLS-authenticated IMAP session on port 993, and
/// logs in. Returns a framed [`Transport`], ready for the mediator to relay through.
pub fn connect(username: &str, password: &str) -> Result<BoxedTransport, ProxyError> {
  let key = domain_key(username).ok_or_else(|| ProxyError::UnknownDomain(username.to_string()))?;
  let host = *host_map()
    .get(key.as_str())
    .ok_or_else(|| ProxyError::UnknownDomain(key.clone()))?;
  let stream = tls::dial(host, UPSTREAM_PORT).map_err(|error| ProxyError::TlsHandshake(error.to_string()))?;
  let mut transport = Transport::new(Box::new(stream) as Box<dyn crate::transport::Duplex>);
  login(&mut transport, username, password)?;
  Ok(transport)
}

fn login(transport: &mut BoxedTransport, username: &str, password: &str) -> Result<(), ProxyError> {
  let to_io = |error: anyhow::Error| ProxyError::UpstreamIo(io_error(error));

  // Drain the server greeting before issuing LOGIN.
  transport.read_line().map_err(to_io)?;

  transport
    .write_line(&format!("proxy1 LOGIN {username} {password}"))
    .map_err(to_io)?;
  loop {
    let line = transport.read_line().map_err(to_io)?;
    let line = String::from_utf8_lossy(&line);
    if let Some(rest) = line.strip_prefix("proxy1 ") {
      return if rest.trim_start().to_ascii_uppercase().starts_with("OK") {
        Ok(())
      } else {
        Err(ProxyError::UpstreamAuth(username.to_string()))
      };
    }
    // Untagged line (capabilities, etc.) — ignore and keep reading for the tagged completion.
  }
}

fn io_error(error: anyhow::Error) -> std::io::Error {
  std::io::Error::new(std::io::ErrorKind::Other, error.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn domain_key_joins_subdomain_labels() {
    assert_eq!(domain_key("alice@gmail.com"), Some("gmail".to_string()));
    assert_eq!(domain_key("bob@mail.corp.yahoo.com"), Some("mail corp yahoo".to_string()));
  }

  #[test]
  fn domain_key_rejects_malformed_addresses() {
    assert_eq!(domain_key("no-at-sign"), None);
    assert_eq!(domain_key("alice@onelabel"), None);
  }
}
