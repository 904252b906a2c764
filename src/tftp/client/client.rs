use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;

use anyhow::{Context, Result, bail};
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};

use super::config::ClientConfig;
use crate::tftp::core::packet::{block_count, encode_ack, encode_data, encode_error};
use crate::tftp::core::{BLOCK_SIZE, ErrorCode, MAX_PACKET_SIZE, Packet, TransferOptions};

/// TFTP client
///
/// Supports file upload (PUT) and download (GET) operations
///
/// # Example
///
/// ```rust,no_run
/// use tinytftp::tftp::client::{Client, ClientConfig};
/// use std::path::Path;
///
/// # async fn demo() -> anyhow::Result<()> {
/// let config = ClientConfig::new("192.168.1.100".parse()?, 69);
/// let client = Client::new(config)?;
///
/// // Download file
/// client.get("remote.txt", Path::new("local.txt")).await?;
///
/// // Upload file
/// client.put(Path::new("local.txt"), "remote.txt").await?;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: ClientConfig,
}

/// What to do with a packet received while waiting for a reply
enum Reply {
    Take,
    /// Peer repeated itself; send our last packet again
    Resend,
    Ignore,
}

/// One exchange with the server. The server answers from a fresh port
/// (its transfer ID); the first accepted reply pins it.
struct Transfer {
    socket: UdpSocket,
    server: SocketAddr,
    tid: Option<SocketAddr>,
    options: TransferOptions,
}

impl Transfer {
    async fn open(server: SocketAddr, options: TransferOptions) -> Result<Self> {
        let local = match server {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = UdpSocket::bind(SocketAddr::new(local, 0)).await?;
        Ok(Self {
            socket,
            server,
            tid: None,
            options,
        })
    }

    fn destination(&self) -> SocketAddr {
        self.tid.unwrap_or(self.server)
    }

    async fn send(&self, packet: &[u8]) -> Result<()> {
        self.socket.send_to(packet, self.destination()).await?;
        Ok(())
    }

    /// Sends `packet` and waits for a reply `classify` takes, retransmitting on timeout
    async fn exchange<F>(&mut self, packet: &[u8], mut classify: F) -> Result<Packet>
    where
        F: FnMut(&Packet) -> Reply,
    {
        let mut buf = [0u8; MAX_PACKET_SIZE + 1];

        for attempt in 0..=self.options.max_retries {
            self.send(packet).await?;
            let deadline = Instant::now() + self.options.wait_for(attempt);

            loop {
                let (n, from) = match timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                    Ok(received) => received?,
                    Err(_) => break,
                };

                match self.tid {
                    Some(tid) if tid != from => {
                        log::warn!("Ignoring datagram from unknown transfer ID {}", from);
                        let code = ErrorCode::UnknownTid;
                        let _ = self
                            .socket
                            .send_to(&encode_error(code, code.message()), from)
                            .await;
                        continue;
                    }
                    None if from.ip() != self.server.ip() => continue,
                    _ => {}
                }

                let reply = match Packet::deserialize(&buf[..n]) {
                    Ok(reply) => reply,
                    Err(e) => {
                        log::warn!("Received malformed packet: {}", e);
                        continue;
                    }
                };

                if let Packet::Error { code, msg } = &reply {
                    bail!("Server error {}: {}", code, msg);
                }

                match classify(&reply) {
                    Reply::Take => {
                        self.tid.get_or_insert(from);
                        return Ok(reply);
                    }
                    Reply::Resend => self.send(packet).await?,
                    Reply::Ignore => log::debug!("Received unexpected {} packet", reply.opcode()),
                }
            }
        }

        bail!(
            "Timed out after {} attempts waiting for {}",
            self.options.max_retries + 1,
            self.destination()
        )
    }
}

impl Client {
    /// Create a new TFTP client
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self { config })
    }

    /// Download a file from the server (RRQ - Read Request)
    ///
    /// # Arguments
    ///
    /// * `remote_file` - File name on the server
    /// * `local_file` - Local save path
    pub async fn get(&self, remote_file: &str, local_file: &Path) -> Result<u64> {
        log::info!("Downloading {} to {}", remote_file, local_file.display());

        let content = self.get_bytes(remote_file).await?;
        tokio::fs::write(local_file, &content)
            .await
            .with_context(|| format!("Failed to write {}", local_file.display()))?;

        log::info!("Download complete: {}", local_file.display());
        Ok(content.len() as u64)
    }

    /// Upload a file to the server (WRQ - Write Request)
    ///
    /// # Arguments
    ///
    /// * `local_file` - Local file path
    /// * `remote_file` - File name on the server
    pub async fn put(&self, local_file: &Path, remote_file: &str) -> Result<u64> {
        log::info!("Uploading {} to {}", local_file.display(), remote_file);

        let content = tokio::fs::read(local_file)
            .await
            .with_context(|| format!("Failed to read {}", local_file.display()))?;
        self.put_bytes(remote_file, &content).await?;

        log::info!("Upload complete: {}", remote_file);
        Ok(content.len() as u64)
    }

    /// Download `remote_file` into memory
    pub async fn get_bytes(&self, remote_file: &str) -> Result<Vec<u8>> {
        let mut transfer = Transfer::open(self.config.server_addr(), self.config.options).await?;
        let mut content = Vec::new();
        let mut expected: u16 = 1;
        let mut outgoing = Packet::Rrq {
            filename: remote_file.to_string(),
            mode: self.config.mode.clone(),
        }
        .serialize();

        loop {
            let reply = transfer
                .exchange(&outgoing, |packet| match packet {
                    Packet::Data { block_num, .. } if *block_num == expected => Reply::Take,
                    Packet::Data { block_num, .. } if *block_num == expected.wrapping_sub(1) => {
                        Reply::Resend
                    }
                    _ => Reply::Ignore,
                })
                .await?;

            let Packet::Data { block_num, data } = reply else {
                bail!("Unexpected packet type");
            };
            content.extend_from_slice(&data);
            outgoing = encode_ack(block_num);

            if data.len() < BLOCK_SIZE {
                transfer.send(&outgoing).await?;
                log::debug!("Transfer complete. Total bytes: {}", content.len());
                return Ok(content);
            }

            expected = expected
                .checked_add(1)
                .context("Server sent more than 65535 blocks")?;
        }
    }

    /// Upload `content` as `remote_file`
    pub async fn put_bytes(&self, remote_file: &str, content: &[u8]) -> Result<()> {
        let Some(blocks) = block_count(content.len() as u64) else {
            bail!("File too large: {} bytes", content.len());
        };

        let mut transfer = Transfer::open(self.config.server_addr(), self.config.options).await?;
        let wrq = Packet::Wrq {
            filename: remote_file.to_string(),
            mode: self.config.mode.clone(),
        }
        .serialize();
        transfer
            .exchange(&wrq, |packet| match packet {
                Packet::Ack(0) => Reply::Take,
                _ => Reply::Ignore,
            })
            .await?;

        for index in 0..usize::from(blocks) {
            let start = index * BLOCK_SIZE;
            let end = (start + BLOCK_SIZE).min(content.len());
            let block = (index + 1) as u16;

            transfer
                .exchange(&encode_data(block, &content[start..end]), |packet| match packet {
                    Packet::Ack(ack) if *ack == block => Reply::Take,
                    _ => Reply::Ignore,
                })
                .await?;
        }

        log::debug!("Transfer complete. Total bytes: {}", content.len());
        Ok(())
    }
}
