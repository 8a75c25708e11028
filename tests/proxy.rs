//! End-to-end coverage over real loopback sockets (SPEC_FULL.md §8): a `Session` wired to a fake
//! upstream via `Session::for_integration_test`, driven from the other end exactly as a real
//! client would drive it.

use imap_proxy::session::Session;
use imap_proxy::{EchoGroomer, Groom};
use std::io::{BufRead as _, BufReader, Write as _};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use test_log::test;

mod common;

struct CountingGroomer {
  calls: Arc<AtomicUsize>,
}

impl Groom for CountingGroomer {
  fn groom(&self, message: &[u8]) -> anyhow::Result<Vec<u8>> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    EchoGroomer.groom(message)
  }
}

#[test]
fn relay_round_trips_the_client_tag() {
  let (client, server_side_client) = common::connected_pair();
  let (upstream, server_side_upstream) = common::connected_pair();
  let counters = common::fake_upstream::Counters::new();
  thread::spawn({
    let counters = Arc::clone(&counters);
    move || common::fake_upstream::serve(server_side_upstream, counters)
  });

  let config = common::test_config();
  let session_thread =
    thread::spawn(move || Session::for_integration_test(server_side_client, upstream, &config, Box::new(EchoGroomer)).run());

  let mut writer = client.try_clone().unwrap();
  let mut reader = BufReader::new(client);

  let mut greeting = String::new();
  reader.read_line(&mut greeting).unwrap();
  assert_eq!(greeting, "* OK Service Ready.\r\n");

  write!(writer, "a1 NOOP\r\n").unwrap();
  assert_eq!(common::read_until_tag(&mut reader, "a1"), "a1 OK NOOP completed.\r\n");

  write!(writer, "a2 LOGOUT\r\n").unwrap();
  assert_eq!(common::read_until_tag(&mut reader, "a2"), "a2 OK LOGOUT completed.\r\n");

  session_thread.join().unwrap();
}

#[test]
fn quarantine_folder_bypasses_the_sanitizer() {
  let (client, server_side_client) = common::connected_pair();
  let (upstream, server_side_upstream) = common::connected_pair();
  let counters = common::fake_upstream::Counters::new();
  thread::spawn({
    let counters = Arc::clone(&counters);
    move || common::fake_upstream::serve(server_side_upstream, counters)
  });

  let config = common::test_config();
  let session_thread =
    thread::spawn(move || Session::for_integration_test(server_side_client, upstream, &config, Box::new(EchoGroomer)).run());

  let mut writer = client.try_clone().unwrap();
  let mut reader = BufReader::new(client);
  let mut greeting = String::new();
  reader.read_line(&mut greeting).unwrap();

  write!(writer, "a1 SELECT Quarantine\r\n").unwrap();
  assert_eq!(common::read_until_tag(&mut reader, "a1"), "a1 OK [READ-WRITE] SELECT completed.\r\n");

  write!(writer, "a2 FETCH 1 (BODY.PEEK[])\r\n").unwrap();
  common::read_until_tag(&mut reader, "a2");

  write!(writer, "a3 LOGOUT\r\n").unwrap();
  common::read_until_tag(&mut reader, "a3");
  session_thread.join().unwrap();

  assert_eq!(counters.appends.load(Ordering::SeqCst), 0, "the sanitizer must not run in a quarantine folder");
  assert_eq!(counters.commands.load(Ordering::SeqCst), 3, "only SELECT, FETCH and LOGOUT should reach upstream");
}

#[test]
fn sanitizing_a_new_message_appends_sanitized_and_quarantined_copies() {
  let (client, server_side_client) = common::connected_pair();
  let (upstream, server_side_upstream) = common::connected_pair();
  let counters = common::fake_upstream::Counters::new();
  thread::spawn({
    let counters = Arc::clone(&counters);
    move || common::fake_upstream::serve(server_side_upstream, counters)
  });

  let groomer_calls = Arc::new(AtomicUsize::new(0));
  let groomer = CountingGroomer { calls: Arc::clone(&groomer_calls) };

  let config = common::test_config();
  let session_thread =
    thread::spawn(move || Session::for_integration_test(server_side_client, upstream, &config, Box::new(groomer)).run());

  let mut writer = client.try_clone().unwrap();
  let mut reader = BufReader::new(client);
  let mut greeting = String::new();
  reader.read_line(&mut greeting).unwrap();

  write!(writer, "a1 SELECT INBOX\r\n").unwrap();
  assert_eq!(common::read_until_tag(&mut reader, "a1"), "a1 OK [READ-WRITE] SELECT completed.\r\n");

  write!(writer, "a2 FETCH 1 (BODY.PEEK[])\r\n").unwrap();
  assert_eq!(common::read_until_tag(&mut reader, "a2"), "a2 OK FETCH completed.\r\n");

  write!(writer, "a3 LOGOUT\r\n").unwrap();
  common::read_until_tag(&mut reader, "a3");
  session_thread.join().unwrap();

  assert_eq!(groomer_calls.load(Ordering::SeqCst), 1, "the groomer should run exactly once for a new message");
  assert_eq!(counters.appends.load(Ordering::SeqCst), 2, "a sanitized copy and a quarantined original should both be appended");
  assert_eq!(counters.expunges.load(Ordering::SeqCst), 1, "the original message should be expunged after sanitizing");
}
