//! C7 — the acceptor: bind, optionally TLS-wrap, spawn one mediator thread per connection
//! (SPEC_FULL.md §4.7), mirroring the source's `IMAP_Proxy.listen()` but with one OS thread per
//! session instead of Python's non-blocking socket loop (SPEC_FULL.md §5's scheduling model).

use crate::{config::Config, groomer::Groom, session::Session, tls};
use anyhow::Context as _;
use std::{net, sync::Arc, thread, time::Duration};

/// How often the accept loop wakes up to recheck `running` while otherwise parked in
/// `accept()`. Keeps Ctrl-C responsive on an idle listener instead of only being noticed once
/// another connection arrives.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Binds the listening socket and accepts connections until `SIGINT`/Ctrl-C
/// (SPEC_FULL.md §4.7's "keyboard interrupt cleanly closes the listening socket").
pub fn run(config: Config, groomer_factory: impl Fn() -> Box<dyn Groom> + Send + Sync + 'static) -> anyhow::Result<()> {
  let listener = net::TcpListener::bind((config.bind_address(), config.listen_port))
    .with_context(|| format!("binding {}:{}", config.bind_address(), config.listen_port))?;
  // Non-blocking so the loop below can recheck `running` between accept attempts instead of
  // sitting in a blocking `accept()` call that a Ctrl-C on an idle listener would never interrupt.
  listener.set_nonblocking(true).context("setting the listener non-blocking")?;
  log::info!("listening on {}:{}", config.bind_address(), config.listen_port);

  let tls_config = config
    .tls
    .as_ref()
    .map(tls::server_config)
    .transpose()
    .context("loading server-side TLS material")?;

  let running = Arc::new(std::sync::atomic::AtomicBool::new(true));
  {
    let running = Arc::clone(&running);
    ctrlc::set_handler(move || {
      log::info!("received interrupt, no longer accepting new connections");
      running.store(false, std::sync::atomic::Ordering::SeqCst);
    })
    .context("installing the Ctrl-C handler")?;
  }

  let config = Arc::new(config);
  let groomer_factory = Arc::new(groomer_factory);
  while running.load(std::sync::atomic::Ordering::SeqCst) {
    let (socket, peer) = match listener.accept() {
      Ok(accepted) => accepted,
      Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
        thread::sleep(ACCEPT_POLL_INTERVAL);
        continue;
      }
      Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
      Err(error) => {
        log::warn!("accept failed: {error}");
        continue;
      }
    };
    log::debug!("accepted connection from {peer}");
    if let Err(error) = socket.set_nonblocking(false) {
      log::warn!("couldn't put the accepted socket from {peer} back into blocking mode: {error}");
      continue;
    }

    let config = Arc::clone(&config);
    let tls_config = tls_config.clone();
    let groomer_factory = Arc::clone(&groomer_factory);
    thread::spawn(move || match wrap(socket, tls_config.as_ref()) {
      Ok(stream) => Session::new(stream, &config, groomer_factory()).run(),
      Err(error) => log::warn!("TLS handshake with {peer} failed: {error}"),
    });
  }
  log::info!("no longer accepting connections");
  Ok(())
}

fn wrap(
  socket: net::TcpStream,
  tls_config: Option<&Arc<rustls::ServerConfig>>,
) -> anyhow::Result<Box<dyn crate::transport::Duplex>> {
  Ok(match tls_config {
    Some(tls_config) => Box::new(tls::accept(Arc::clone(tls_config), socket)?),
    None => Box::new(socket),
  })
}
