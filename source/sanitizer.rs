//! C3 — the sanitize-on-FETCH pipeline (SPEC_FULL.md §4.3).
//!
//! Ported from `pycircleanmail.py`'s `process`/`sanitize`, restructured around the session's
//! narrow capability interface (SPEC_FULL.md §9 "module boundary") instead of a grab-bag
//! `client` object, and driven by an injected [`crate::groomer::Groom`] rather than importing
//! `kittengroomer_email` directly.

use crate::{
  error::ProxyError,
  groomer::Groom,
  idset, mac,
  session::{HeaderProbe, Session},
};
use mail_parser::MimeHeaders as _;

const SIGNATURE: &str = "X-CIRCL-Sanitizer";
const VALUE_SANITIZED: &str = "Sanitized";
const VALUE_ORIGINAL: &str = "Original";
const QUARANTINE_FOLDER: &str = "Quarantine";

const MONTHS: [&str; 12] = [
  "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Applies the sanitizer to `request` if it is a FETCH the folder filter admits; otherwise
/// returns silently (SPEC_FULL.md §4.3 steps 1-2).
pub fn process(session: &mut Session, request: &str, groomer: &dyn Groom) -> anyhow::Result<()> {
  let folder = match &session.current_folder {
    Some(folder) => folder.clone(),
    None => return Ok(()),
  };
  let upper = folder.to_ascii_uppercase();
  if upper.contains("QUARANTINE") || upper.contains("SENT") {
    log::debug!("skipping sanitization in folder {folder:?}");
    return Ok(());
  }

  let Some(captures) = fetch_ids(request) else {
    return Ok(());
  };
  let (uid_mode, ids_text) = captures;

  let ids: Vec<String> = if ids_text.chars().all(|c| c.is_ascii_digit()) {
    vec![ids_text.to_string()]
  } else {
    idset::parse_ids(ids_text)?.iter().map(u64::to_string).collect()
  };

  for id in ids {
    if let Err(error) = sanitize_one(session, &folder, &id, uid_mode, groomer) {
      // SPEC_FULL.md §4.3 "Error policy": failures are per-id, never propagated to siblings.
      log::warn!("sanitizing id {id} in {folder:?} failed: {error}");
    }
  }
  Ok(())
}

/// Matches `<tag> [UID] FETCH <ids> <rest>` case-insensitively; returns `(uid_mode, ids)`.
fn fetch_ids(request: &str) -> Option<(bool, &str)> {
  let mut tokens = request.split_whitespace();
  tokens.next()?; // tag
  let mut next = tokens.next()?;
  let uid_mode = next.eq_ignore_ascii_case("UID");
  if uid_mode {
    next = tokens.next()?;
  }
  if !next.eq_ignore_ascii_case("FETCH") {
    return None;
  }
  let ids_start = request.find(next)? + next.len();
  let rest = request[ids_start..].trim_start();
  let ids_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
  if ids_end == 0 {
    return None;
  }
  Some((uid_mode, &rest[..ids_end]))
}

fn sanitize_one(session: &mut Session, folder: &str, id: &str, uid_mode: bool, groomer: &dyn Groom) -> anyhow::Result<()> {
  session.upstream_select(folder)?;

  match session.upstream_header_probe(id, uid_mode, SIGNATURE)? {
    HeaderProbe::Present(value) if value.contains(VALUE_SANITIZED) => {
      log::debug!("id {id} in {folder:?} already sanitized");
      return Ok(());
    }
    HeaderProbe::Malformed(error) => {
      // SPEC_FULL.md §7 "Malformed FETCH response": conservative, treat as already sanitized.
      log::warn!("{error}; skipping id {id} in {folder:?}");
      return Ok(());
    }
    HeaderProbe::Present(_) | HeaderProbe::Absent => {}
  }

  let Some(raw) = session.upstream_fetch_body(id, uid_mode)? else {
    log::debug!("id {id} in {folder:?} is not a valid message set ({})", ProxyError::InvalidId(id.to_string()));
    return Ok(());
  };

  let original = mail_parser::MessageParser::default()
    .parse(&raw)
    .ok_or_else(|| ProxyError::Groomer(id.to_string(), "could not parse the fetched message".to_string()))?;
  let internal_date = original
    .date()
    .map(format_internal_date)
    .unwrap_or_else(current_internal_date);
  let digest_original = mac::mac(&mac::payload(&original), &session.mac_key);

  let groomed = groomer
    .groom(&raw)
    .map_err(|error| ProxyError::Groomer(id.to_string(), error.to_string()))?;
  let sanitized = mail_parser::MessageParser::default()
    .parse(&groomed)
    .ok_or_else(|| ProxyError::Groomer(id.to_string(), "groomer returned an unparseable message".to_string()))?;
  let digest_sanitized = mac::mac(&mac::payload(&sanitized), &session.mac_key);

  session.upstream_append(
    folder,
    &internal_date,
    &with_headers(&groomed, &[(SIGNATURE, VALUE_SANITIZED), ("X-Proxy-Sign", &digest_sanitized)]),
  )?;
  session.upstream_append(
    QUARANTINE_FOLDER,
    &internal_date,
    &with_headers(&raw, &[(SIGNATURE, VALUE_ORIGINAL), ("X-Proxy-Sign", &digest_original)]),
  )?;

  session.upstream_select(folder)?;
  session.upstream_delete(id, uid_mode)?;
  Ok(())
}

/// Prepends `headers` to `message`, ahead of its existing header block, matching the source's
/// `EmailMessage.add_header` (which prepends rather than appends).
fn with_headers(message: &[u8], headers: &[(&str, &str)]) -> Vec<u8> {
  let mut out = Vec::with_capacity(message.len() + 64);
  for (name, value) in headers {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
  }
  out.extend_from_slice(message);
  out
}

fn format_internal_date(date: &mail_parser::DateTime) -> String {
  let sign = if date.tz_before_gmt { '-' } else { '+' };
  format!(
    "{:02}-{}-{:04} {:02}:{:02}:{:02} {sign}{:02}{:02}",
    date.day,
    MONTHS[(date.month.max(1) as usize - 1).min(11)],
    date.year,
    date.hour,
    date.minute,
    date.second,
    date.tz_hour,
    date.tz_minute,
  )
}

fn current_internal_date() -> String {
  let now = chrono::Utc::now();
  format!("{}", now.format("%d-%b-%Y %H:%M:%S +0000"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn fetch_ids_parses_uid_and_plain_forms() {
    assert_eq!(fetch_ids("a4 FETCH 1 (BODY[])"), Some((false, "1")));
    assert_eq!(fetch_ids("a4 UID FETCH 42 (BODY[])"), Some((true, "42")));
    assert_eq!(fetch_ids("a4 UID FETCH 1,3:5 (BODY[])"), Some((true, "1,3:5")));
  }

  #[test]
  fn fetch_ids_rejects_other_verbs() {
    assert_eq!(fetch_ids("a4 NOOP"), None);
    assert_eq!(fetch_ids("* 2 EXISTS"), None);
  }

  #[test]
  fn with_headers_prepends_in_order() {
    let message = b"Subject: hi\r\n\r\nbody";
    let out = with_headers(message, &[("X-A", "1"), ("X-B", "2")]);
    assert!(String::from_utf8_lossy(&out).starts_with("X-A: 1\r\nX-B: 2\r\nSubject: hi"));
  }

  #[test]
  fn format_internal_date_matches_imap_shape() {
    let date = mail_parser::DateTime {
      year: 2021,
      month: 6,
      day: 25,
      hour: 12,
      minute: 34,
      second: 56,
      tz_before_gmt: false,
      tz_hour: 0,
      tz_minute: 0,
    };
    assert_eq!(format_internal_date(&date), "25-Jun-2021 12:34:56 +0000");
  }
}
