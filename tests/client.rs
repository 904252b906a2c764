mod common;

use std::time::Duration;

use tinytftp::tftp::client::{Client, ClientConfig};
use tinytftp::tftp::core::Backoff;

use common::*;

fn client_for(addr: std::net::SocketAddr) -> Client {
    let config = ClientConfig::new(addr.ip(), addr.port())
        .with_timeout(Duration::from_secs(1))
        .with_retries(3, Backoff::Exponential);
    Client::new(config).unwrap()
}

#[tokio::test]
async fn put_then_get_round_trip() {
    let root = tempfile::tempdir().unwrap();
    let (mut server, addr) = start(&local_config(root.path())).await;
    let client = client_for(addr);

    for size in [0usize, 100, 512, 1536, 5000] {
        let name = format!("up/{}.bin", size);
        let content: Vec<u8> = (0..size).map(|b| (b * 7 % 256) as u8).collect();

        client.put_bytes(&name, &content).await.unwrap();
        assert_eq!(std::fs::read(root.path().join(&name)).unwrap(), content);

        let fetched = client.get_bytes(&name).await.unwrap();
        assert_eq!(fetched, content, "{} bytes", size);
    }

    wait_for_transfers(&server, 10).await;
    server.stop().await;
}

#[tokio::test]
async fn file_transfers_use_local_paths() {
    let root = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let source = local.path().join("source.txt");
    std::fs::write(&source, b"over the wire").unwrap();

    let (mut server, addr) = start(&local_config(root.path())).await;
    let client = client_for(addr);

    assert_eq!(client.put(&source, "copy.txt").await.unwrap(), 13);
    let target = local.path().join("back.txt");
    assert_eq!(client.get("copy.txt", &target).await.unwrap(), 13);
    assert_eq!(std::fs::read(&target).unwrap(), b"over the wire");

    server.stop().await;
}

#[tokio::test]
async fn server_errors_surface_as_client_errors() {
    let root = tempfile::tempdir().unwrap();
    let mut config = local_config(root.path());
    config.read_only = true;
    let (mut server, addr) = start(&config).await;
    let client = client_for(addr);

    let err = client.get_bytes("missing.bin").await.unwrap_err();
    assert!(err.to_string().contains("File not found."), "{}", err);

    let err = client.put_bytes("upload.bin", b"data").await.unwrap_err();
    assert!(err.to_string().contains("Access violation."), "{}", err);

    server.stop().await;
}

#[tokio::test]
async fn get_gives_up_when_nobody_answers() {
    // bound but never read from
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = silent.local_addr().unwrap();
    let config = ClientConfig::new(addr.ip(), addr.port())
        .with_timeout(Duration::from_millis(50))
        .with_retries(2, Backoff::Fixed);
    let client = Client::new(config).unwrap();

    let err = client.get_bytes("anything").await.unwrap_err();
    assert!(err.to_string().contains("Timed out after 3 attempts"), "{}", err);
}
