//! TLS dial (upstream, client role) and wrap (acceptor, server role) for C6/C7.
//!
//! The teacher reaches for `rustls` 0.20 plus an `ouroboros` self-referencing struct because
//! `rustls::Stream<'a, _, _>` borrows both sides. `rustls::StreamOwned` (available since rustls
//! 0.21) owns both the connection and the transport instead of borrowing either, which removes
//! the need for the self-referencing workaround entirely — same crate family, simpler shape.

use crate::config;
use anyhow::Context as _;
use std::{fs, io, net, sync::Arc};

pub type UpstreamStream = rustls::StreamOwned<rustls::ClientConnection, net::TcpStream>;
pub type ClientTlsStream = rustls::StreamOwned<rustls::ServerConnection, net::TcpStream>;

fn root_store() -> anyhow::Result<rustls::RootCertStore> {
  let mut store = rustls::RootCertStore::empty();
  for certificate in rustls_native_certs::load_native_certs().certs {
    store.add(certificate)?;
  }
  Ok(store)
}

/// Dials `host:port` over TCP and completes a TLS handshake with full certificate validation
/// (SPEC_FULL.md §4.6: "default port 993, full certificate validation").
pub fn dial(host: &str, port: u16) -> anyhow::Result<UpstreamStream> {
  let tcp_stream = net::TcpStream::connect((host, port))
    .with_context(|| format!("connecting to {host}:{port}"))?;
  let config = rustls::ClientConfig::builder()
    .with_root_certificates(root_store()?)
    .with_no_client_auth();
  let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
    .with_context(|| format!("{host} is not a valid TLS server name"))?;
  let connection = rustls::ClientConnection::new(Arc::new(config), server_name)
    .context("starting the TLS handshake with upstream")?;
  Ok(rustls::StreamOwned::new(connection, tcp_stream))
}

/// Loads a PEM certificate chain and private key for server-side TLS (C7's optional
/// acceptor-side wrap).
pub fn server_config(material: &config::TlsMaterial) -> anyhow::Result<Arc<rustls::ServerConfig>> {
  let certificates = rustls_pemfile::certs(&mut io::BufReader::new(
    fs::File::open(&material.cert_path)
      .with_context(|| format!("opening {:?}", material.cert_path))?,
  ))
  .collect::<Result<Vec<_>, _>>()
  .with_context(|| format!("parsing certificate chain in {:?}", material.cert_path))?;
  let key = rustls_pemfile::private_key(&mut io::BufReader::new(
    fs::File::open(&material.key_path).with_context(|| format!("opening {:?}", material.key_path))?,
  ))
  .with_context(|| format!("parsing private key in {:?}", material.key_path))?
  .with_context(|| format!("{:?} contains no private key", material.key_path))?;
  let config = rustls::ServerConfig::builder()
    .with_no_client_auth()
    .with_single_cert(certificates, key)
    .context("building the server-side TLS configuration")?;
  Ok(Arc::new(config))
}

/// Wraps an accepted plaintext socket in server-side TLS (SPEC_FULL.md §4.7).
pub fn accept(config: Arc<rustls::ServerConfig>, tcp_stream: net::TcpStream) -> anyhow::Result<ClientTlsStream> {
  let connection = rustls::ServerConnection::new(config).context("starting the client-side TLS handshake")?;
  Ok(rustls::StreamOwned::new(connection, tcp_stream))
}
