//! C1 — id-set parser (SPEC_FULL.md §4.1).
//!
//! `set = part ("," part)*`, `part = integer | integer ":" integer`. Ranges are inclusive and
//! ascending; `end < start` yields an empty range. No dedup, no reordering beyond left-to-right
//! range expansion.

use std::fmt;

#[derive(Debug, PartialEq, Eq)]
pub struct ParseError(String);

impl fmt::Display for ParseError {
  fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
    write!(formatter, "invalid id-set: {}", self.0)
  }
}

impl std::error::Error for ParseError {}

fn parse_integer(part: &str) -> Result<u64, ParseError> {
  part
    .parse()
    .map_err(|_| ParseError(format!("{part:?} is not a positive integer")))
}

/// Expands `str_ids` (e.g. `"1,3:5,8"`) into the ordered sequence of ids it denotes.
pub fn parse_ids(str_ids: &str) -> Result<Vec<u64>, ParseError> {
  if str_ids.is_empty() {
    return Err(ParseError("empty id-set".to_string()));
  }
  let mut ids = Vec::new();
  for part in str_ids.split(',') {
    match part.split_once(':') {
      Some((start, end)) => {
        let start = parse_integer(start)?;
        let end = parse_integer(end)?;
        if end >= start {
          ids.extend(start..=end);
        }
      }
      None => ids.push(parse_integer(part)?),
    }
  }
  Ok(ids)
}
