use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::config::Config;
use super::dispatcher::Dispatcher;
use super::events::{EventLog, LogSink};
use crate::tftp::core::ServerSocket;

/// Where the server is in its start/stop cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    Stopped = 0,
    Running = 1,
    Stopping = 2,
}

impl Lifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Lifecycle::Running,
            2 => Lifecycle::Stopping,
            _ => Lifecycle::Stopped,
        }
    }
}

/// State shared by the facade, the dispatcher and every session task
#[derive(Debug)]
pub struct ServerState {
    lifecycle: AtomicU8,
    files_transferred: AtomicUsize,
    active_sessions: AtomicUsize,
}

impl ServerState {
    fn new() -> Self {
        Self {
            lifecycle: AtomicU8::new(Lifecycle::Stopped as u8),
            files_transferred: AtomicUsize::new(0),
            active_sessions: AtomicUsize::new(0),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    fn set_lifecycle(&self, to: Lifecycle) {
        self.lifecycle.store(to as u8, Ordering::Release);
    }

    fn transition(&self, from: Lifecycle, to: Lifecycle) -> bool {
        self.lifecycle
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns the new total
    pub(crate) fn transfer_completed(&self) -> usize {
        self.files_transferred.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn session_started(&self) {
        self.active_sessions.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn session_finished(&self) {
        self.active_sessions.fetch_sub(1, Ordering::AcqRel);
    }
}

/// TFTP server
///
/// Binds the configured endpoint on [`start`](Server::start) and serves
/// requests on a background task until [`stop`](Server::stop). Every
/// transfer runs on its own task and socket, so a slow or vanished peer
/// never blocks other clients.
///
/// # Example
///
/// ```rust,no_run
/// use tinytftp::tftp::server::{Config, Server};
/// use std::path::PathBuf;
///
/// # async fn demo() -> anyhow::Result<()> {
/// let config = Config::new("0.0.0.0".parse()?, 69, PathBuf::from("/srv/tftp"), false);
/// let mut server = Server::new(&config)?;
/// server.start().await?;
/// // ...
/// server.stop().await;
/// println!("{} files transferred", server.files_transferred());
/// # Ok(())
/// # }
/// ```
pub struct Server {
    config: Arc<Config>,
    state: Arc<ServerState>,
    events: EventLog,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl Server {
    /// Create a stopped server; fails if the root directory is unusable
    pub fn new(config: &Config) -> Result<Self> {
        let config = config.clone().validate()?;

        Ok(Self {
            config: Arc::new(config),
            state: Arc::new(ServerState::new()),
            events: EventLog::default(),
            shutdown: None,
            task: None,
            local_addr: None,
        })
    }

    /// Forward every server event to `sink` in addition to the `log` facade
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.events = EventLog::new(sink);
        self
    }

    /// Bind the endpoint and start accepting requests.
    ///
    /// Returns the bound address, which differs from the configured one
    /// when port 0 was requested. Calling `start` on a running server
    /// returns the current address.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if let (Lifecycle::Running, Some(addr)) = (self.state.lifecycle(), self.local_addr) {
            return Ok(addr);
        }

        let requested = self.config.socket_addr();
        let socket = ServerSocket::bind(requested)
            .await
            .with_context(|| format!("Failed to bind TFTP server to {}", requested))?;
        let addr = socket.local_addr()?;

        let (tx, rx) = watch::channel(false);
        self.state.set_lifecycle(Lifecycle::Running);

        let dispatcher = Dispatcher::new(
            socket,
            Arc::clone(&self.config),
            Arc::clone(&self.state),
            self.events.clone(),
            rx,
        );
        self.task = Some(tokio::spawn(dispatcher.run()));
        self.shutdown = Some(tx);
        self.local_addr = Some(addr);

        self.events.info(format!(
            "Starting TFTP Server on {} serving {}",
            addr,
            self.config.directory.display()
        ));
        Ok(addr)
    }

    /// Stop accepting requests, cancel every transfer in flight and wait
    /// for them to finish. A no-op on a stopped server.
    pub async fn stop(&mut self) {
        if !self.state.transition(Lifecycle::Running, Lifecycle::Stopping) {
            return;
        }
        self.events.info("Stopping TFTP Server...");

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                self.events.error(format!("Dispatcher task failed: {}", e));
            }
        }

        self.local_addr = None;
        self.state.set_lifecycle(Lifecycle::Stopped);
        self.events.info("TFTP Server stopped.");
    }

    /// Start, serve until Ctrl+C, then stop
    pub async fn listen(&mut self) -> Result<()> {
        self.start().await?;
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        self.stop().await;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state.lifecycle() == Lifecycle::Running
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lifecycle()
    }

    /// Completed transfers since this server was created
    pub fn files_transferred(&self) -> usize {
        self.state.files_transferred.load(Ordering::Acquire)
    }

    /// Transfers currently in progress
    pub fn active_sessions(&self) -> usize {
        self.state.active_sessions.load(Ordering::Acquire)
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> Config {
        Config::new("127.0.0.1".parse().unwrap(), 0, dir.to_path_buf(), false)
    }

    #[test]
    fn lifecycle_transitions() {
        let state = ServerState::new();
        assert_eq!(state.lifecycle(), Lifecycle::Stopped);
        assert!(!state.transition(Lifecycle::Running, Lifecycle::Stopping));
        state.set_lifecycle(Lifecycle::Running);
        assert!(state.transition(Lifecycle::Running, Lifecycle::Stopping));
        assert_eq!(state.lifecycle(), Lifecycle::Stopping);
    }

    #[test]
    fn new_rejects_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Server::new(&config(&dir.path().join("nope"))).is_err());
    }

    #[tokio::test]
    async fn start_stop_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new(&config(dir.path())).unwrap();
        assert!(!server.is_running());
        assert_eq!(server.local_addr(), None);

        let addr = server.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(server.is_running());
        assert_eq!(server.start().await.unwrap(), addr);

        server.stop().await;
        assert_eq!(server.lifecycle(), Lifecycle::Stopped);
        assert_eq!(server.local_addr(), None);

        server.start().await.unwrap();
        assert!(server.is_running());
        server.stop().await;
        assert_eq!(server.files_transferred(), 0);
    }

    #[tokio::test]
    async fn stop_twice_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::new(&config(dir.path())).unwrap();
        server.stop().await;

        server.start().await.unwrap();
        server.stop().await;
        server.stop().await;
        assert!(!server.is_running());
    }
}
