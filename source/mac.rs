//! C2 — message-integrity MAC (SPEC_FULL.md §4.2).
//!
//! A keyed MAC over the message payload, used purely as a stable fingerprint (not as a defense
//! against an adversary who controls the key). HMAC-SHA1 satisfies that; a stronger MAC could be
//! swapped in without changing any call site, as long as append-time and verify-time agree.

use hmac::Mac as _;
use mail_parser::MimeHeaders as _;

type HmacSha1 = hmac::Hmac<sha1::Sha1>;

/// Lowercase hex MAC of `payload` keyed by `key`.
pub fn mac(payload: &[u8], key: &[u8]) -> String {
  let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts keys of any length");
  mac.update(payload);
  hex::encode(mac.finalize().into_bytes())
}

/// Concatenates each MIME part's body in declaration order, matching SPEC_FULL.md §4.2's
/// definition of "payload" for a multipart message.
pub fn payload(message: &mail_parser::Message<'_>) -> Vec<u8> {
  if message.parts.is_empty() {
    return Vec::new();
  }
  let mut bytes = Vec::new();
  for part in &message.parts {
    bytes.extend_from_slice(part.contents());
  }
  bytes
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn deterministic_and_key_sensitive() {
    let a = mac(b"hello", b"key-one");
    let b = mac(b"hello", b"key-one");
    let c = mac(b"hello", b"key-two");
    assert_eq!(a, b);
    assert_ne!(a, c);
  }

  #[test]
  fn is_lowercase_hex() {
    let digest = mac(b"payload", b"secret-proxy");
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    assert_eq!(digest.len(), 40); // SHA-1 output size in hex.
  }
}
