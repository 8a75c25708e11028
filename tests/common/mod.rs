use std::io::BufRead as _;
use std::net::{TcpListener, TcpStream};

pub mod fake_upstream;

/// Two ends of a loopback TCP connection, standing in for a real socket pair
/// (SPEC_FULL.md §10 "Test tooling"): `Session::for_integration_test` needs real
/// `Read + Write + Send` streams rather than an in-process channel.
pub fn connected_pair() -> (TcpStream, TcpStream) {
  let port = portpicker::pick_unused_port().expect("no free loopback port for the test harness");
  let listener = TcpListener::bind(("127.0.0.1", port)).expect("binding a loopback listener");
  let client = TcpStream::connect(("127.0.0.1", port)).expect("connecting to the loopback listener");
  let (server, _) = listener.accept().expect("accepting the loopback connection");
  (client, server)
}

pub fn test_config() -> imap_proxy::Config {
  imap_proxy::Arguments {
    port: None,
    cert: None,
    key: None,
    mac_key: "test-mac-key".to_string(),
    max_clients: 5,
    ipv6: false,
    misp_host: "127.0.0.1".to_string(),
    misp_from: "imapproxy".to_string(),
    misp_to: "mail2misp@example.com".to_string(),
    misp_subject: "IMAP proxy email".to_string(),
    verbose: clap_verbosity_flag::Verbosity::new(0, 0),
  }
  .into_config()
}

/// Reads lines until one begins with `"{tag} "`, returning that line. Tests use this instead of a
/// literal-aware reader, since only the tagged completion's content is under test — the embedded
/// literal bytes of an intervening `FETCH` response are allowed to confuse a plain line split.
pub fn read_until_tag(reader: &mut impl BufRead, tag: &str) -> String {
  let prefix = format!("{tag} ");
  loop {
    let mut line = String::new();
    let read = reader.read_line(&mut line).expect("reading from the fake client socket");
    assert_ne!(read, 0, "connection closed before {tag} responded");
    if line.starts_with(&prefix) {
      return line;
    }
  }
}
