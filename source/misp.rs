//! C4 — MOVE-to-MISP forwarder (SPEC_FULL.md §4.4), ported from `modules/misp.py`. The source
//! builds the attachment with `email.message.EmailMessage`/`smtplib`; here that's `lettre`'s
//! message builder plus its blocking SMTP transport (the teacher has no SMTP needs of its own,
//! so this is grounded in the other examples' `lettre` usage instead).

use crate::{idset, session::Session};
use lettre::{
  message::{header::ContentType, Attachment, MultiPart, SinglePart},
  Message, SmtpTransport, Transport as _,
};

const BODY: &str = "m2m:attach_original_mail:1";
const FILENAME: &str = "email.eml";
const TARGET_FOLDER: &str = "MISP";

/// Applies the forwarder if `rest` names the `"MISP"` folder as a MOVE target; otherwise
/// returns silently (SPEC_FULL.md §4.4).
pub fn process(session: &mut Session, tag: &str, uid: bool, rest: &str) -> anyhow::Result<()> {
  let Some(ids_text) = move_to_misp_ids(rest) else {
    return Ok(());
  };
  log::debug!("{tag}: forwarding to MISP: {ids_text}");

  let ids: Vec<String> = if ids_text.chars().all(|c| c.is_ascii_digit()) {
    vec![ids_text.to_string()]
  } else {
    idset::parse_ids(ids_text)?.iter().map(u64::to_string).collect()
  };

  let folder = session.current_folder.clone().unwrap_or_default();
  for id in ids {
    if let Err(error) = forward_one(session, &folder, &id, uid) {
      log::warn!("forwarding id {id} to MISP failed: {error}");
    }
  }
  Ok(())
}

/// Matches `MOVE <ids> "MISP"` within the command's remainder; `rest` is already past
/// `<tag> [UID] MOVE`.
fn move_to_misp_ids(rest: &str) -> Option<&str> {
  let rest = rest.trim();
  let mut tokens = rest.splitn(2, char::is_whitespace);
  let ids = tokens.next()?;
  let target = tokens.next()?.trim();
  let target = target.strip_prefix('"').and_then(|t| t.strip_suffix('"')).unwrap_or(target);
  if target.eq_ignore_ascii_case(TARGET_FOLDER) {
    Some(ids)
  } else {
    None
  }
}

fn forward_one(session: &mut Session, folder: &str, id: &str, uid: bool) -> anyhow::Result<()> {
  session.upstream_select(folder)?;
  let Some(raw) = session.upstream_fetch_body(id, uid)? else {
    anyhow::bail!("id {id} is not a valid message set");
  };

  let sink = session.misp_sink().clone();
  let message = Message::builder()
    .from(sink.from.parse()?)
    .to(sink.to.parse()?)
    .subject(sink.subject.clone())
    .multipart(
      MultiPart::mixed()
        .build()
        .singlepart(SinglePart::plain(BODY.to_string()))
        .singlepart(
          Attachment::new(FILENAME.to_string()).body(raw, ContentType::parse("message/rfc822")?),
        ),
    )?;

  let transport = SmtpTransport::builder_dangerous(&sink.smtp_host).build();
  transport.send(&message)?;
  log::info!("forwarded id {id} to MISP via {}", sink.smtp_host);
  Ok(())
}
