#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tinytftp::tftp::core::packet::{encode_ack, encode_request};
use tinytftp::tftp::core::{Opcode, Packet};
use tinytftp::tftp::server::{Config, Server};
use tokio::net::UdpSocket;

pub const WAIT: Duration = Duration::from_secs(2);

pub fn local_config(root: &Path) -> Config {
    Config::new("127.0.0.1".parse().unwrap(), 0, root.to_path_buf(), false)
}

pub async fn start(config: &Config) -> (Server, SocketAddr) {
    let mut server = Server::new(config).unwrap();
    let addr = server.start().await.unwrap();
    (server, addr)
}

pub async fn peer() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

pub async fn send_rrq(peer: &UdpSocket, server: SocketAddr, filename: &str) {
    peer.send_to(&encode_request(Opcode::Rrq, filename, "octet"), server)
        .await
        .unwrap();
}

pub async fn send_wrq(peer: &UdpSocket, server: SocketAddr, filename: &str) {
    peer.send_to(&encode_request(Opcode::Wrq, filename, "octet"), server)
        .await
        .unwrap();
}

/// Next packet within [`WAIT`], with its source
pub async fn recv(peer: &UdpSocket) -> (Packet, SocketAddr) {
    let mut buf = [0u8; 1024];
    let (n, from) = tokio::time::timeout(WAIT, peer.recv_from(&mut buf))
        .await
        .expect("no packet from server")
        .unwrap();
    (Packet::deserialize(&buf[..n]).unwrap(), from)
}

/// Asserts nothing arrives for `quiet`
pub async fn expect_silence(peer: &UdpSocket, quiet: Duration) {
    let mut buf = [0u8; 1024];
    if let Ok(received) = tokio::time::timeout(quiet, peer.recv_from(&mut buf)).await {
        let (n, from) = received.unwrap();
        panic!(
            "unexpected packet from {}: {:?}",
            from,
            Packet::deserialize(&buf[..n])
        );
    }
}

/// Reads a whole file over RRQ, acknowledging every block. Returns the
/// payloads as received.
pub async fn read_blocks(peer: &UdpSocket, server: SocketAddr, filename: &str) -> Vec<Vec<u8>> {
    send_rrq(peer, server, filename).await;

    let mut blocks: Vec<Vec<u8>> = Vec::new();
    loop {
        let (packet, from) = recv(peer).await;
        let Packet::Data { block_num, data } = packet else {
            panic!("expected DATA, got {:?}", packet);
        };
        assert_ne!(from, server, "session traffic must use its own port");

        if usize::from(block_num) == blocks.len() {
            // retransmission of a block already acknowledged
            continue;
        }
        assert_eq!(usize::from(block_num), blocks.len() + 1);
        peer.send_to(&encode_ack(block_num), from).await.unwrap();

        let last = data.len() < 512;
        blocks.push(data);
        if last {
            return blocks;
        }
    }
}

/// Polls until the server reports `count` completed transfers
pub async fn wait_for_transfers(server: &Server, count: usize) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while server.files_transferred() < count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {} transfers, saw {}",
            count,
            server.files_transferred()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.files_transferred(), count);
}

/// Polls until no session is running
pub async fn wait_for_idle(server: &Server, within: Duration) {
    let deadline = tokio::time::Instant::now() + within;
    while server.active_sessions() > 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "{} sessions still active",
            server.active_sessions()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
