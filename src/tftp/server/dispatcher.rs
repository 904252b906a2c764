use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;

use super::config::Config;
use super::events::EventLog;
use super::path::resolve;
use super::server::{Lifecycle, ServerState};
use super::worker::{Direction, FILE_TOO_LARGE, SessionError, Worker};
use crate::tftp::core::packet::{block_count, decode_request, encode_error};
use crate::tftp::core::{ErrorCode, Opcode, PacketError, Request, ServerSocket, Socket};

/// Requests carry a filename and a mode, so allow more than one DATA packet's worth
const REQUEST_BUFFER_SIZE: usize = 1024;

/// Accept loop on the well-known endpoint.
///
/// Only RRQ/WRQ are accepted here. Each accepted request is checked, then
/// handed to a [`Worker`] running on its own task and its own socket, so
/// the loop is back to waiting as soon as the session has started.
pub struct Dispatcher {
    socket: ServerSocket,
    config: Arc<Config>,
    state: Arc<ServerState>,
    events: EventLog,
    shutdown: watch::Receiver<bool>,
    sessions: JoinSet<()>,
}

impl Dispatcher {
    pub(crate) fn new(
        socket: ServerSocket,
        config: Arc<Config>,
        state: Arc<ServerState>,
        events: EventLog,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            socket,
            config,
            state,
            events,
            shutdown,
            sessions: JoinSet::new(),
        }
    }

    /// Runs until shutdown is signalled, then waits for every session to wind down.
    pub async fn run(mut self) {
        let mut buf = [0u8; REQUEST_BUFFER_SIZE];
        self.events.debug("Waiting for incoming TFTP requests...");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                Some(joined) = self.sessions.join_next(), if !self.sessions.is_empty() => {
                    if let Err(e) = joined {
                        self.events.error(format!("Transfer task failed: {}", e));
                    }
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((n, peer)) => {
                        self.dispatch(&buf[..n], peer).await;
                        self.events.debug("Waiting for incoming TFTP requests...");
                    }
                    Err(_) if self.state.lifecycle() != Lifecycle::Running => break,
                    Err(e) => {
                        self.events.error(format!("Socket error: {}", e));
                        // avoid spinning on a persistent fault
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
            }
        }

        while let Some(joined) = self.sessions.join_next().await {
            if let Err(e) = joined {
                self.events.error(format!("Transfer task failed: {}", e));
            }
        }
    }

    async fn dispatch(&mut self, datagram: &[u8], peer: SocketAddr) {
        let request = match decode_request(datagram) {
            Ok(request) => request,
            Err(PacketError::UnexpectedOpcode { found, .. }) => {
                self.events.debug(format!(
                    "Ignoring {} from {}: only RRQ/WRQ can open a transfer",
                    found, peer
                ));
                return;
            }
            Err(e) => {
                self.events
                    .warn(format!("Discarding malformed request from {}: {}", peer, e));
                return;
            }
        };

        match request.opcode {
            Opcode::Rrq => self.handle_read(request, peer).await,
            Opcode::Wrq => self.handle_write(request, peer).await,
            _ => {}
        }
    }

    async fn handle_read(&mut self, request: Request, peer: SocketAddr) {
        self.events.info(format!(
            "RRQ received for file: {} from {} (mode {})",
            request.filename,
            peer,
            request.mode.as_deref().unwrap_or("unspecified")
        ));

        let Some(path) = self.resolve_path(&request, peer).await else {
            return;
        };

        let size = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => {
                self.events.info(format!("File not found: {}", path.display()));
                self.reject(peer, ErrorCode::FileNotFound).await;
                return;
            }
        };

        if block_count(size).is_none() {
            self.events.warn(format!(
                "Rejected RRQ from {}: {} is {} bytes, more than 65535 blocks",
                peer,
                path.display(),
                size
            ));
            self.reject_with(peer, ErrorCode::NotDefined, FILE_TOO_LARGE).await;
            return;
        }

        self.events.info(format!("Sending file: {}", path.display()));
        self.start_session(Direction::Read, path, peer).await;
    }

    async fn handle_write(&mut self, request: Request, peer: SocketAddr) {
        self.events.info(format!(
            "WRQ received for file: {} from {} (mode {})",
            request.filename,
            peer,
            request.mode.as_deref().unwrap_or("unspecified")
        ));

        if self.config.read_only {
            self.events
                .warn(format!("Rejected WRQ from {}: server is read-only", peer));
            self.reject(peer, ErrorCode::AccessViolation).await;
            return;
        }

        let Some(path) = self.resolve_path(&request, peer).await else {
            return;
        };

        if !self.config.overwrite && tokio::fs::try_exists(&path).await.unwrap_or(false) {
            self.events
                .warn(format!("Rejected WRQ from {}: {} exists", peer, path.display()));
            self.reject(peer, ErrorCode::FileExists).await;
            return;
        }

        if let Some(parent) = path.parent() {
            if !tokio::fs::try_exists(parent).await.unwrap_or(false) {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    self.events.error(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ));
                    self.reject(peer, ErrorCode::from(&e)).await;
                    return;
                }
                self.events
                    .info(format!("Directory created: {}", parent.display()));
            }
        }

        self.events.info(format!("Receiving file: {}", path.display()));
        self.start_session(Direction::Write, path, peer).await;
    }

    async fn resolve_path(&self, request: &Request, peer: SocketAddr) -> Option<PathBuf> {
        match resolve(&self.config.directory, &request.filename).await {
            Ok(path) => Some(path),
            Err(e) => {
                self.events.warn(format!(
                    "Rejected {} for '{}' from {}: {}",
                    request.opcode, request.filename, peer, e
                ));
                self.reject(peer, ErrorCode::AccessViolation).await;
                None
            }
        }
    }

    /// Answers a request that never becomes a session
    async fn reject(&self, peer: SocketAddr, code: ErrorCode) {
        self.reject_with(peer, code, code.message()).await;
    }

    async fn reject_with(&self, peer: SocketAddr, code: ErrorCode, message: &str) {
        let packet = encode_error(code, message);
        if let Err(e) = self.socket.send_to(&packet, peer).await {
            self.events
                .error(format!("Failed to send error to {}: {}", peer, e));
        }
    }

    async fn start_session(&mut self, direction: Direction, path: PathBuf, peer: SocketAddr) {
        let socket = match Socket::connect(self.config.ip_address, peer).await {
            Ok(socket) => socket,
            Err(e) => {
                self.events
                    .error(format!("Failed to open transfer socket for {}: {}", peer, e));
                self.reject(peer, ErrorCode::NotDefined).await;
                return;
            }
        };

        let mut worker = Worker::new(
            direction,
            path,
            socket,
            self.config.opt_local,
            self.shutdown.clone(),
        )
        .with_overwrite(self.config.overwrite)
        .with_partial_files(self.config.partial_files);

        if let Ok(local) = worker.local_addr() {
            self.events.debug(format!("Transfer with {} runs on {}", peer, local));
        }

        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        state.session_started();

        self.sessions.spawn(async move {
            match worker.run().await {
                Ok(summary) => {
                    let total = state.transfer_completed();
                    let verb = match summary.direction {
                        Direction::Read => "File transfer complete",
                        Direction::Write => "File successfully received",
                    };
                    events.info(format!(
                        "{}: {} ({} bytes, {} blocks, {:.2?}, {} total)",
                        verb,
                        summary.path.display(),
                        summary.bytes,
                        summary.blocks,
                        summary.elapsed,
                        total
                    ));
                }
                Err(SessionError::Cancelled) => events.warn(format!(
                    "{} of {} with {} cancelled",
                    worker.direction(),
                    worker.file_path().display(),
                    worker.peer()
                )),
                Err(e) => events.error(format!(
                    "{} of {} with {} failed after {} bytes: {}",
                    worker.direction(),
                    worker.file_path().display(),
                    worker.peer(),
                    worker.bytes_transferred(),
                    e
                )),
            }
            state.session_finished();
        });
    }
}
