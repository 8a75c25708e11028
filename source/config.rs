use std::{net, path};

// Defaults from the Configuration Surface (spec.md §6 / SPEC_FULL.md §6, §10).
const DEFAULT_PLAIN_PORT: u16 = 143;
const DEFAULT_TLS_PORT: u16 = 993;
const DEFAULT_MAX_CLIENTS: usize = 5;
const DEFAULT_MAC_KEY: &str = "secret-proxy";
const DEFAULT_MISP_SUBJECT: &str = "IMAP proxy email";
const DEFAULT_MISP_FROM: &str = "imapproxy";
const DEFAULT_MISP_TO: &str = "mail2misp@freeblind.net";

#[derive(Clone)]
pub struct TlsMaterial {
  pub cert_path: path::PathBuf,
  pub key_path: path::PathBuf,
}

/// Process-wide, read-only once the acceptor starts (SPEC_FULL.md §5 "Shared mutable state").
#[derive(Clone)]
pub struct Config {
  pub listen_port: u16,
  pub tls: Option<TlsMaterial>,
  pub mac_key: Vec<u8>,
  pub max_clients: usize,
  pub ipv6: bool,
  pub verbose: bool,
  pub misp: MispSink,
}

#[derive(Clone)]
pub struct MispSink {
  pub smtp_host: String,
  pub from: String,
  pub to: String,
  pub subject: String,
}

impl Config {
  pub fn bind_address(&self) -> net::IpAddr {
    if self.ipv6 {
      net::IpAddr::V6(net::Ipv6Addr::UNSPECIFIED)
    } else {
      net::IpAddr::V4(net::Ipv4Addr::UNSPECIFIED)
    }
  }
}

/// Command-line surface for the binary entry point (SPEC_FULL.md §10, modeled after the
/// teacher's `#[derive(clap::Parser)]` / `#[derive(clap::Args)]` split).
#[derive(clap::Parser)]
pub struct Arguments {
  #[arg(long = "port", help = "Listening port (default: 143, or 993 with --cert)")]
  pub port: Option<u16>,

  #[arg(
    long = "cert",
    help = "PEM certificate chain for server-side TLS (requires --key)",
    requires = "key"
  )]
  pub cert: Option<path::PathBuf>,
  #[arg(
    long = "key",
    help = "PEM private key matching --cert",
    requires = "cert"
  )]
  pub key: Option<path::PathBuf>,

  #[arg(
    long = "mac-key",
    help = "Shared secret for the X-Proxy-Sign MAC",
    default_value = DEFAULT_MAC_KEY
  )]
  pub mac_key: String,

  #[arg(
    long = "max-clients",
    help = "Listen backlog / maximum concurrent clients",
    default_value_t = DEFAULT_MAX_CLIENTS
  )]
  pub max_clients: usize,

  #[arg(long = "ipv6", help = "Bind on IPv6 instead of IPv4", default_value_t = false)]
  pub ipv6: bool,

  #[arg(
    long = "misp-host",
    help = "SMTP relay host used to forward MOVE-to-MISP messages",
    default_value = "freeblind.net"
  )]
  pub misp_host: String,
  #[arg(long = "misp-from", default_value = DEFAULT_MISP_FROM)]
  pub misp_from: String,
  #[arg(long = "misp-to", default_value = DEFAULT_MISP_TO)]
  pub misp_to: String,
  #[arg(long = "misp-subject", default_value = DEFAULT_MISP_SUBJECT)]
  pub misp_subject: String,

  #[clap(flatten)]
  pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,
}

impl Arguments {
  pub fn into_config(self) -> Config {
    let tls = match (self.cert, self.key) {
      (Some(cert_path), Some(key_path)) => Some(TlsMaterial { cert_path, key_path }),
      _ => None,
    };
    let listen_port = self
      .port
      .unwrap_or(if tls.is_some() { DEFAULT_TLS_PORT } else { DEFAULT_PLAIN_PORT });
    Config {
      listen_port,
      tls,
      mac_key: self.mac_key.into_bytes(),
      max_clients: self.max_clients,
      ipv6: self.ipv6,
      verbose: self.verbose.log_level_filter() >= log::LevelFilter::Debug,
      misp: MispSink {
        smtp_host: self.misp_host,
        from: self.misp_from,
        to: self.misp_to,
        subject: self.misp_subject,
      },
    }
  }
}
