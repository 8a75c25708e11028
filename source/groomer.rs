//! The attachment-defanging engine is deliberately out of scope (SPEC_FULL.md §1, §6): it's an
//! opaque collaborator behind a single operation. This module only names the seam — an injected
//! trait object — plus a hermetic fake good enough to exercise P1–P5 without a real groomer.

/// `groom(bytes) -> bytes`, synchronous, returning a fully formed RFC 5322 message
/// (SPEC_FULL.md §6 "Groomer collaborator").
pub trait Groom: Send + Sync {
  fn groom(&self, message: &[u8]) -> anyhow::Result<Vec<u8>>;
}

/// Tags the message with a marker header and returns it unchanged otherwise — sufficient for
/// tests that only need to observe "the groomer ran exactly once" and get back a parseable
/// message, not a faithful simulation of real defanging.
pub struct EchoGroomer;

impl Groom for EchoGroomer {
  fn groom(&self, message: &[u8]) -> anyhow::Result<Vec<u8>> {
    let marker = &b"X-Groomed-By: echo-groomer\r\n"[..];
    let header_end = message
      .windows(4)
      .position(|window| window == b"\r\n\r\n")
      .map(|position| position + 2)
      .unwrap_or(message.len());
    let mut groomed = Vec::with_capacity(message.len() + marker.len());
    groomed.extend_from_slice(&message[..header_end]);
    groomed.extend_from_slice(marker);
    groomed.extend_from_slice(&message[header_end..]);
    Ok(groomed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn echo_groomer_appends_a_marker_header() {
    let groomed = EchoGroomer.groom(b"Subject: hi\r\n\r\nbody").unwrap();
    assert!(String::from_utf8_lossy(&groomed).contains("X-Groomed-By"));
  }
}
