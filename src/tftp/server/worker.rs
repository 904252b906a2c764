//! Transfer worker: moves one file between the server and one peer
//!
//! A [`Worker`] owns a [`Socket`] connected to its peer and runs the
//! lock-step DATA/ACK exchange for a single read or write request. Each
//! outgoing packet is retransmitted after a timeout, up to
//! [`TransferOptions::max_retries`] times, and the worker gives up as soon
//! as the server signals shutdown.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, trace, warn};
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::tftp::core::packet::{self, block_count, encode_ack, encode_data, encode_error};
use crate::tftp::core::{
    BLOCK_SIZE, ErrorCode, MAX_PACKET_SIZE, Packet, PartialFilePolicy, Socket, TransferOptions,
};

/// One byte of slack so oversized datagrams are detected instead of truncated
const RECV_BUFFER_SIZE: usize = MAX_PACKET_SIZE + 1;

pub(crate) const FILE_TOO_LARGE: &str = "File too large.";

/// Which way the file travels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Server sends the file (RRQ)
    Read,
    /// Server receives the file (WRQ)
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no response for block {block} after {attempts} attempts")]
    Timeout { block: u16, attempts: u32 },
    #[error("transfer cancelled by server shutdown")]
    Cancelled,
    #[error("peer aborted the transfer: error {code}: {message}")]
    Peer { code: ErrorCode, message: String },
    #[error("file needs more than 65535 blocks")]
    TooLarge,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SessionError {
    /// ERROR packet to send before giving up, if any
    fn reply(&self) -> Option<(ErrorCode, &'static str)> {
        match self {
            SessionError::Timeout { .. } => Some((ErrorCode::NotDefined, "Transfer timed out.")),
            SessionError::Cancelled => Some((ErrorCode::NotDefined, "Server shutting down.")),
            SessionError::TooLarge => Some((ErrorCode::NotDefined, FILE_TOO_LARGE)),
            SessionError::Io(err) => {
                let code = ErrorCode::from(err);
                Some((code, code.message()))
            }
            SessionError::Peer { .. } => None,
        }
    }
}

/// Outcome of a completed transfer
#[derive(Debug, Clone)]
pub struct TransferSummary {
    pub direction: Direction,
    pub path: PathBuf,
    pub peer: SocketAddr,
    pub blocks: u16,
    pub bytes: u64,
    pub elapsed: Duration,
}

/// A single transfer session
pub struct Worker {
    direction: Direction,
    file_path: PathBuf,
    socket: Socket,
    options: TransferOptions,
    shutdown: watch::Receiver<bool>,
    overwrite: bool,
    partial_files: PartialFilePolicy,
    /// Set once this session has opened the target for writing
    opened_file: bool,
    block: u16,
    bytes_transferred: u64,
    state: SessionState,
}

impl Worker {
    /// Create a worker for `file_path`, talking to the peer `socket` is connected to
    ///
    /// # Arguments
    ///
    /// * `direction` - Read (server sends) or Write (server receives)
    /// * `file_path` - Resolved path below the root directory
    /// * `socket` - Per-session socket
    /// * `options` - Timeout and retransmission policy
    /// * `shutdown` - Flips to `true` when the server stops
    pub fn new(
        direction: Direction,
        file_path: PathBuf,
        socket: Socket,
        options: TransferOptions,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            direction,
            file_path,
            socket,
            options,
            shutdown,
            overwrite: true,
            partial_files: PartialFilePolicy::Keep,
            opened_file: false,
            block: 0,
            bytes_transferred: 0,
            state: SessionState::Active,
        }
    }

    /// Refuse to replace an existing file on write
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_partial_files(mut self, policy: PartialFilePolicy) -> Self {
        self.partial_files = policy;
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn peer(&self) -> SocketAddr {
        self.socket.peer()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Last block sent and acknowledged (read) or received (write)
    pub fn block(&self) -> u16 {
        self.block
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the transfer to completion or failure.
    ///
    /// On failure the peer is sent an ERROR packet where one applies, and a
    /// partial upload is handled according to the partial-file policy.
    pub async fn run(&mut self) -> Result<TransferSummary, SessionError> {
        let started = Instant::now();

        let result = match self.direction {
            Direction::Read => self.send_file().await,
            Direction::Write => self.receive_file().await,
        };

        match result {
            Ok(()) => {
                self.state = SessionState::Completed;
                Ok(TransferSummary {
                    direction: self.direction,
                    path: self.file_path.clone(),
                    peer: self.socket.peer(),
                    blocks: self.block,
                    bytes: self.bytes_transferred,
                    elapsed: started.elapsed(),
                })
            }
            Err(err) => {
                self.state = SessionState::Failed;
                self.abort(&err).await;
                Err(err)
            }
        }
    }

    async fn abort(&mut self, err: &SessionError) {
        if let Some((code, message)) = err.reply() {
            // best effort, the peer may already be gone
            let _ = self.socket.send(&encode_error(code, message)).await;
        }

        if self.opened_file && self.partial_files == PartialFilePolicy::Delete {
            match tokio::fs::remove_file(&self.file_path).await {
                Ok(()) => debug!("Removed partial file {}", self.file_path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    "Failed to remove partial file {}: {}",
                    self.file_path.display(),
                    e
                ),
            }
        }
    }

    /// Waits for one datagram from the peer until `deadline`
    async fn recv(
        &mut self,
        buf: &mut [u8],
        deadline: Instant,
    ) -> Result<Option<usize>, SessionError> {
        if *self.shutdown.borrow_and_update() {
            return Err(SessionError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.shutdown.changed() => Err(SessionError::Cancelled),
            received = self.socket.recv_until(buf, deadline) => Ok(received?),
        }
    }

    /// Server -> peer. The whole file is loaded up front; every block waits
    /// for its ACK before the next one is sent.
    async fn send_file(&mut self) -> Result<(), SessionError> {
        // The last block is always shorter than BLOCK_SIZE, so an exact
        // multiple ends with an empty block.
        let size = tokio::fs::metadata(&self.file_path).await?.len();
        block_count(size).ok_or(SessionError::TooLarge)?;

        let content = tokio::fs::read(&self.file_path).await?;
        // the file may have grown since it was measured
        let blocks = block_count(content.len() as u64).ok_or(SessionError::TooLarge)?;

        for index in 0..usize::from(blocks) {
            let start = index * BLOCK_SIZE;
            let end = (start + BLOCK_SIZE).min(content.len());
            let chunk = &content[start..end];
            let block = (index + 1) as u16;

            self.send_block(block, &encode_data(block, chunk)).await?;
            self.block = block;
            self.bytes_transferred += chunk.len() as u64;
        }

        Ok(())
    }

    /// Sends one DATA packet and waits for its ACK, retransmitting on timeout.
    async fn send_block(&mut self, block: u16, data: &[u8]) -> Result<(), SessionError> {
        let peer = self.socket.peer();
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        for attempt in 0..=self.options.max_retries {
            if attempt > 0 {
                debug!("Retransmitting block {} to {} (retry {})", block, peer, attempt);
            }
            self.socket.send(data).await?;

            let deadline = Instant::now() + self.options.wait_for(attempt);
            while let Some(n) = self.recv(&mut buf, deadline).await? {
                match Packet::deserialize(&buf[..n]) {
                    Ok(Packet::Ack(ack)) if ack == block => {
                        trace!("ACK {} from {}", ack, peer);
                        return Ok(());
                    }
                    // A late duplicate; answering it would double the traffic
                    Ok(Packet::Ack(ack)) => debug!("Ignoring stale ACK {} from {}", ack, peer),
                    Ok(Packet::Error { code, msg }) => {
                        return Err(SessionError::Peer { code, message: msg });
                    }
                    Ok(other) => debug!("Ignoring {} from {} during read", other.opcode(), peer),
                    Err(e) => debug!("Discarding malformed packet from {}: {}", peer, e),
                }
            }
        }

        Err(SessionError::Timeout {
            block,
            attempts: self.options.max_retries + 1,
        })
    }

    /// Peer -> server. ACK 0 answers the request itself; every accepted DATA
    /// block is appended to the file and acknowledged.
    async fn receive_file(&mut self) -> Result<(), SessionError> {
        let mut options = OpenOptions::new();
        options.write(true);
        if self.overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let mut file = options.open(&self.file_path).await?;
        self.opened_file = true;

        loop {
            let expected = self.block.checked_add(1).ok_or(SessionError::TooLarge)?;
            let payload = self.receive_block(expected).await?;

            file.write_all(&payload).await?;
            self.block = expected;
            self.bytes_transferred += payload.len() as u64;

            if payload.len() < BLOCK_SIZE {
                file.flush().await?;
                file.sync_all().await?;
                self.socket.send(&encode_ack(expected)).await?;
                return Ok(());
            }
        }
    }

    /// Acknowledges the current block and waits for DATA `expected`.
    ///
    /// Duplicates and out-of-order blocks are discarded and answered with the
    /// current ACK again; only a timeout counts as a retry.
    async fn receive_block(&mut self, expected: u16) -> Result<Vec<u8>, SessionError> {
        let peer = self.socket.peer();
        let ack = encode_ack(self.block);
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        for attempt in 0..=self.options.max_retries {
            if attempt > 0 {
                debug!("Retransmitting ACK {} to {} (retry {})", self.block, peer, attempt);
            }
            self.socket.send(&ack).await?;

            let deadline = Instant::now() + self.options.wait_for(attempt);
            while let Some(n) = self.recv(&mut buf, deadline).await? {
                match Packet::deserialize(&buf[..n]) {
                    Ok(Packet::Data { block_num, data }) if block_num == expected => {
                        trace!("DATA {} ({} bytes) from {}", block_num, data.len(), peer);
                        return Ok(data);
                    }
                    Ok(Packet::Data { block_num, .. }) => {
                        debug!(
                            "Discarding DATA {} from {}, expected {}",
                            block_num, peer, expected
                        );
                        self.socket.send(&ack).await?;
                    }
                    Ok(Packet::Error { code, msg }) => {
                        return Err(SessionError::Peer { code, message: msg });
                    }
                    Ok(other) => debug!("Ignoring {} from {} during write", other.opcode(), peer),
                    Err(packet::PacketError::PayloadTooLarge(len)) => {
                        debug!("Discarding oversized DATA ({} bytes) from {}", len, peer)
                    }
                    Err(e) => debug!("Discarding malformed packet from {}: {}", peer, e),
                }
            }
        }

        Err(SessionError::Timeout {
            block: expected,
            attempts: self.options.max_retries + 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tftp::core::Backoff;
    use tokio::net::UdpSocket;

    fn fast_options() -> TransferOptions {
        TransferOptions {
            timeout: Duration::from_millis(100),
            max_retries: 2,
            backoff: Backoff::Fixed,
        }
    }

    async fn worker_and_peer(
        direction: Direction,
        path: PathBuf,
        options: TransferOptions,
    ) -> (Worker, UdpSocket, watch::Sender<bool>) {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = Socket::connect("127.0.0.1".parse().unwrap(), peer.local_addr().unwrap())
            .await
            .unwrap();
        peer.connect(socket.local_addr().unwrap()).await.unwrap();
        let (tx, rx) = watch::channel(false);
        let worker = Worker::new(direction, path, socket, options, rx);
        (worker, peer, tx)
    }

    async fn recv_packet(peer: &UdpSocket) -> Packet {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let n = tokio::time::timeout(Duration::from_secs(2), peer.recv(&mut buf))
            .await
            .expect("peer timed out")
            .unwrap();
        Packet::deserialize(&buf[..n]).unwrap()
    }

    #[tokio::test]
    async fn read_waits_for_each_ack() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        let content: Vec<u8> = (0..700u32).map(|i| i as u8).collect();
        std::fs::write(&path, &content).unwrap();

        let (mut worker, peer, _tx) =
            worker_and_peer(Direction::Read, path, TransferOptions::default()).await;
        let task = tokio::spawn(async move {
            let result = worker.run().await;
            (worker, result)
        });

        match recv_packet(&peer).await {
            Packet::Data { block_num, data } => {
                assert_eq!(block_num, 1);
                assert_eq!(data, &content[..512]);
            }
            other => panic!("unexpected {:?}", other),
        }
        // a stale ACK must not advance the session
        peer.send(&encode_ack(0)).await.unwrap();
        peer.send(&encode_ack(1)).await.unwrap();

        match recv_packet(&peer).await {
            Packet::Data { block_num, data } => {
                assert_eq!(block_num, 2);
                assert_eq!(data, &content[512..]);
            }
            other => panic!("unexpected {:?}", other),
        }
        peer.send(&encode_ack(2)).await.unwrap();

        let (worker, result) = task.await.unwrap();
        let summary = result.unwrap();
        assert_eq!(summary.blocks, 2);
        assert_eq!(summary.bytes, 700);
        assert_eq!(worker.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn read_retransmits_then_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"short").unwrap();

        let (mut worker, peer, _tx) = worker_and_peer(Direction::Read, path, fast_options()).await;
        let task = tokio::spawn(async move {
            let result = worker.run().await;
            (worker, result)
        });

        // original + 2 retransmissions, then an ERROR
        for _ in 0..3 {
            assert_eq!(
                recv_packet(&peer).await,
                Packet::Data {
                    block_num: 1,
                    data: b"short".to_vec()
                }
            );
        }
        assert!(matches!(recv_packet(&peer).await, Packet::Error { .. }));

        let (worker, result) = task.await.unwrap();
        assert!(matches!(
            result,
            Err(SessionError::Timeout {
                block: 1,
                attempts: 3
            })
        ));
        assert_eq!(worker.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn write_discards_duplicates_and_reacks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("up.bin");

        let (mut worker, peer, _tx) =
            worker_and_peer(Direction::Write, path.clone(), TransferOptions::default()).await;
        let task = tokio::spawn(async move { worker.run().await });

        assert_eq!(recv_packet(&peer).await, Packet::Ack(0));

        let first = vec![b'x'; BLOCK_SIZE];
        peer.send(&encode_data(1, &first)).await.unwrap();
        assert_eq!(recv_packet(&peer).await, Packet::Ack(1));

        // duplicate of block 1 and a block from the future
        peer.send(&encode_data(1, &first)).await.unwrap();
        assert_eq!(recv_packet(&peer).await, Packet::Ack(1));
        peer.send(&encode_data(3, b"zzz")).await.unwrap();
        assert_eq!(recv_packet(&peer).await, Packet::Ack(1));

        peer.send(&encode_data(2, b"tail")).await.unwrap();
        assert_eq!(recv_packet(&peer).await, Packet::Ack(2));

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.blocks, 2);
        assert_eq!(summary.bytes, (BLOCK_SIZE + 4) as u64);

        let mut expected = first;
        expected.extend_from_slice(b"tail");
        assert_eq!(std::fs::read(&path).unwrap(), expected);
    }

    #[tokio::test]
    async fn write_peer_error_deletes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("up.bin");

        let (worker, peer, _tx) =
            worker_and_peer(Direction::Write, path.clone(), TransferOptions::default()).await;
        let mut worker = worker.with_partial_files(PartialFilePolicy::Delete);
        let task = tokio::spawn(async move { worker.run().await });

        assert_eq!(recv_packet(&peer).await, Packet::Ack(0));
        peer.send(&encode_data(1, &[1u8; BLOCK_SIZE])).await.unwrap();
        assert_eq!(recv_packet(&peer).await, Packet::Ack(1));
        peer.send(&encode_error(ErrorCode::DiskFull, "client gave up"))
            .await
            .unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            SessionError::Peer {
                code: ErrorCode::DiskFull,
                ..
            }
        ));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn write_without_overwrite_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keep.txt");
        std::fs::write(&path, b"original").unwrap();

        let (worker, peer, _tx) =
            worker_and_peer(Direction::Write, path.clone(), TransferOptions::default()).await;
        let mut worker = worker
            .with_overwrite(false)
            .with_partial_files(PartialFilePolicy::Delete);
        let err = worker.run().await.unwrap_err();

        assert!(matches!(
            err,
            SessionError::Io(ref e) if e.kind() == io::ErrorKind::AlreadyExists
        ));
        assert_eq!(
            recv_packet(&peer).await,
            Packet::Error {
                code: ErrorCode::FileExists,
                msg: "File already exists.".to_string()
            }
        );
        assert_eq!(std::fs::read(&path).unwrap(), b"original");
    }

    #[tokio::test]
    async fn shutdown_cancels_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("up.bin");

        let options = TransferOptions {
            timeout: Duration::from_secs(30),
            ..fast_options()
        };
        let (mut worker, peer, tx) = worker_and_peer(Direction::Write, path, options).await;
        let task = tokio::spawn(async move { worker.run().await });

        assert_eq!(recv_packet(&peer).await, Packet::Ack(0));
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("session did not stop")
            .unwrap();
        assert!(matches!(result, Err(SessionError::Cancelled)));
        assert_eq!(
            recv_packet(&peer).await,
            Packet::Error {
                code: ErrorCode::NotDefined,
                msg: "Server shutting down.".to_string()
            }
        );
    }

    #[tokio::test]
    async fn read_refuses_file_over_block_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.img");
        // sparse; needs 65536 blocks
        std::fs::File::create(&path)
            .unwrap()
            .set_len(65535 * BLOCK_SIZE as u64)
            .unwrap();

        let (mut worker, peer, _tx) =
            worker_and_peer(Direction::Read, path, TransferOptions::default()).await;
        let result = worker.run().await;

        assert!(matches!(result, Err(SessionError::TooLarge)));
        assert_eq!(worker.bytes_transferred(), 0);
        assert_eq!(
            recv_packet(&peer).await,
            Packet::Error {
                code: ErrorCode::NotDefined,
                msg: "File too large.".to_string()
            }
        );
    }

    #[tokio::test]
    async fn write_stops_at_last_block_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("up.bin");

        let (mut worker, peer, _tx) =
            worker_and_peer(Direction::Write, path, TransferOptions::default()).await;
        // as if blocks 1..=65534 had already arrived
        worker.block = u16::MAX - 1;
        let task = tokio::spawn(async move {
            let result = worker.run().await;
            (worker, result)
        });

        assert_eq!(recv_packet(&peer).await, Packet::Ack(u16::MAX - 1));
        peer.send(&encode_data(u16::MAX, &[0u8; BLOCK_SIZE])).await.unwrap();

        // a full block 65535 leaves no number for the next one
        assert_eq!(
            recv_packet(&peer).await,
            Packet::Error {
                code: ErrorCode::NotDefined,
                msg: "File too large.".to_string()
            }
        );
        let (worker, result) = task.await.unwrap();
        assert!(matches!(result, Err(SessionError::TooLarge)));
        assert_eq!(worker.block(), u16::MAX);
        assert_eq!(worker.state(), SessionState::Failed);
    }
}
