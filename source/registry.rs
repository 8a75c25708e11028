//! C8 — the static intercepted-verb table and advertised capability list (SPEC_FULL.md §4.8).
//!
//! Built once as plain `const` data instead of the source's reflective `getattr(self, command)`
//! lookup (SPEC_FULL.md §9's "control flow via reflective dispatch" note). `session.rs` matches
//! on `Verb` directly; nothing here allocates or needs `once_cell`.

/// One entry per command the mediator intercepts; everything else is transparent relay.
pub const INTERCEPTED: &[&str] = &["AUTHENTICATE", "CAPABILITY", "LOGIN", "LOGOUT", "SELECT", "MOVE", "FETCH"];

/// SPEC_FULL.md §6's advertised capability line, space-joined at the call site.
pub const CAPABILITIES: &[&str] = &[
  "IMAP4",
  "IMAP4rev1",
  "AUTH=PLAIN",
  "UIDPLUS",
  "MOVE",
  "ID",
  "UNSELECT",
  "CHILDREN",
  "NAMESPACE",
];

/// Case-insensitive membership test against [`INTERCEPTED`].
pub fn is_intercepted(verb: &str) -> bool {
  INTERCEPTED.iter().any(|candidate| candidate.eq_ignore_ascii_case(verb))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn intercepted_lookup_is_case_insensitive() {
    assert!(is_intercepted("fetch"));
    assert!(is_intercepted("FETCH"));
    assert!(!is_intercepted("noop"));
  }
}
