//! Integration tests: a real server on a random port, driven over TCP.

use chat_relay::protocol::WELCOME;
use chat_relay::relay::RelayState;
use chat_relay::{Server, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// Helper: start a server over the given data dir and return its address and state.
async fn start_test_server(data_dir: &std::path::Path) -> (SocketAddr, Arc<RelayState>) {
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        history_dir: data_dir.join("chat_history"),
        db_path: data_dir.join("chat.db"),
    };
    let server = Server::bind(&config).await.expect("Failed to bind server");
    let addr = server.local_addr().unwrap();
    let state = server.state();
    tokio::spawn(server.run());
    (addr, state)
}

struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    /// Connect, announce `username`, and return the lines replayed before the welcome.
    async fn connect(addr: SocketAddr, username: &str) -> (Self, Vec<String>) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        let mut client = Self {
            lines: BufReader::new(reader).lines(),
            writer,
        };
        client.send(username).await;

        let mut replay = Vec::new();
        loop {
            let line = client.recv().await.expect("closed before welcome");
            if line == WELCOME {
                break;
            }
            replay.push(line);
        }
        (client, replay)
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(format!("{line}\n").as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
    }

    /// Round-trip a throwaway line so every earlier command has been handled.
    async fn sync(&mut self) {
        self.send("/ping").await;
        assert_eq!(self.recv().await.unwrap(), "[ERROR] Unknown command");
    }

    async fn exit(mut self) {
        self.send("/exit").await;
        assert_eq!(self.recv().await, None);
    }
}

fn parse_history(line: &str) -> serde_json::Value {
    let json = line.strip_prefix("[HISTORY] ").expect("not a history line");
    serde_json::from_str(json).unwrap()
}

#[tokio::test]
async fn group_creator_must_list_themself() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state) = start_test_server(dir.path()).await;

    let (mut alice, _) = TestClient::connect(addr, "alice").await;
    alice.send("/group friends bob carol").await;
    assert_eq!(
        alice.recv().await.unwrap(),
        "[INFO] Group 'friends' created with: bob, carol"
    );
    alice.send("/sendgroup friends hello").await;
    assert_eq!(
        alice.recv().await.unwrap(),
        "[ERROR] You are not a member of this group"
    );
}

#[tokio::test]
async fn group_message_reaches_online_members() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state) = start_test_server(dir.path()).await;

    let (mut bob, _) = TestClient::connect(addr, "bob").await;
    let (mut alice, _) = TestClient::connect(addr, "alice").await;

    alice.send("/group friends alice bob carol").await;
    alice.recv().await.unwrap();
    alice.send("/sendgroup friends hello all").await;

    assert_eq!(bob.recv().await.unwrap(), "[alice to friends] hello all");
    assert_eq!(alice.recv().await.unwrap(), "[alice to friends] hello all");
    alice.sync().await;

    // carol was offline; she gets it on replay.
    let (_carol, replay) = TestClient::connect(addr, "carol").await;
    assert_eq!(replay.len(), 1);
    let record = parse_history(&replay[0]);
    assert_eq!(record["sender"], "alice");
    assert_eq!(record["group"], "friends");
    assert!(record["recipient"].is_null());
    assert_eq!(record["content"], "hello all");
}

#[tokio::test]
async fn direct_message_is_replayed_to_offline_recipient() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state) = start_test_server(dir.path()).await;

    let (mut alice, _) = TestClient::connect(addr, "alice").await;
    alice.send("/send bob are you there").await;
    alice.sync().await;
    alice.exit().await;

    let (_bob, replay) = TestClient::connect(addr, "BOB").await;
    assert_eq!(replay.len(), 1);
    let record = parse_history(&replay[0]);
    assert_eq!(record["sender"], "alice");
    assert_eq!(record["recipient"], "bob");
    assert_eq!(record["content"], "are you there");

    let (_alice, replay) = TestClient::connect(addr, "alice").await;
    assert_eq!(replay.len(), 1);
    assert_eq!(parse_history(&replay[0])["recipient"], "bob");
}

#[tokio::test]
async fn replay_is_identical_across_reconnects() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state) = start_test_server(dir.path()).await;

    let (mut alice, _) = TestClient::connect(addr, "alice").await;
    alice.send("/send bob one").await;
    alice.send("/send bob two").await;
    alice.sync().await;
    alice.exit().await;

    let (bob, first) = TestClient::connect(addr, "bob").await;
    bob.exit().await;
    let (_bob, second) = TestClient::connect(addr, "bob").await;

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
}

#[tokio::test]
async fn later_registration_takes_over_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, state) = start_test_server(dir.path()).await;

    let (mut old_alice, _) = TestClient::connect(addr, "alice").await;
    let (mut new_alice, _) = TestClient::connect(addr, "alice").await;
    let new_id = state.registry.lookup("alice").unwrap().id;

    let (mut bob, _) = TestClient::connect(addr, "bob").await;
    bob.send("/send alice ping").await;
    assert_eq!(new_alice.recv().await.unwrap(), "[bob] ping");

    // The displaced session leaving must not evict the live one.
    old_alice.sync().await;
    old_alice.exit().await;
    new_alice.sync().await;
    assert_eq!(state.registry.lookup("alice").unwrap().id, new_id);
}

#[tokio::test]
async fn groups_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (addr, _state) = start_test_server(dir.path()).await;
        let (mut alice, _) = TestClient::connect(addr, "alice").await;
        alice.send("/group g a b").await;
        alice.recv().await.unwrap();
        alice.send("/group g alice c").await;
        alice.recv().await.unwrap();
    }

    let (_addr, state) = start_test_server(dir.path()).await;
    assert_eq!(
        state.groups.members_of("g").await,
        Some(vec!["alice".to_string(), "c".to_string()])
    );
    assert!(!state.groups.is_member("g", "a").await);
}

#[tokio::test]
async fn closing_the_socket_deregisters() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, state) = start_test_server(dir.path()).await;

    let (alice, _) = TestClient::connect(addr, "alice").await;
    assert!(state.registry.lookup("alice").is_some());
    drop(alice);

    for _ in 0..50 {
        if state.registry.lookup("alice").is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("alice still registered after disconnect");
}
