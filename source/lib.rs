// https://www.rfc-editor.org/rfc/rfc3501 - IMAP4rev1
// https://www.rfc-editor.org/rfc/rfc4315 - [...] UIDPLUS extension
// https://www.rfc-editor.org/rfc/rfc5321 - Simple Mail Transfer Protocol
// https://www.rfc-editor.org/rfc/rfc5322 - Internet Message Format

#![allow(clippy::upper_case_acronyms)]

pub mod acceptor;
pub mod config;
pub mod error;
pub mod groomer;
mod idset;
mod mac;
mod misp;
mod registry;
mod sanitizer;
pub mod session;
mod tls;
mod transport;
mod upstream;

pub use config::{Arguments, Config};
pub use groomer::{EchoGroomer, Groom};

/// Binds the listener from `config` and runs the acceptor loop (SPEC_FULL.md §4.7) until
/// `SIGINT`/Ctrl-C. `groomer_factory` is invoked once per accepted session (SPEC_FULL.md §9
/// "Groomer plug-point") so each session gets its own collaborator instance.
pub fn run(config: Config, groomer_factory: impl Fn() -> Box<dyn Groom> + Send + Sync + 'static) -> anyhow::Result<()> {
  acceptor::run(config, groomer_factory)
}
