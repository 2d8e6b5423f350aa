use crate::config::ServerConfig;
use crate::store::{EncryptedStore, ServerStatistics};
use crate::wire;
use spdlog::{debug, error, info, warn};
use std::io::{ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const ACCEPT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Listening,
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("server is already listening")]
    AlreadyListening,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// TCP ingestion server for encrypted meter batches.
///
/// One accept thread polls a non-blocking listener so it can observe the
/// stop flag promptly; every accepted connection gets its own handler
/// thread (unbounded fan-out — `max_connections` only sizes the listen
/// backlog). Handlers read one frame, store the ciphertext under the
/// single coarse store lock and answer with `ACK`. Any per-connection
/// failure is logged and the connection closed with nothing sent; the
/// server itself only terminates on an explicit stop.
pub struct AnalyticsServer {
    config: ServerConfig,
    store: Arc<Mutex<EncryptedStore>>,
    running: Arc<AtomicBool>,
    state: ServerState,
    local_addr: Option<SocketAddr>,
    accept_handle: Option<thread::JoinHandle<()>>,
}

impl AnalyticsServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            store: Arc::new(Mutex::new(EncryptedStore::new())),
            running: Arc::new(AtomicBool::new(false)),
            state: ServerState::Stopped,
            local_addr: None,
            accept_handle: None,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Address actually bound; with port 0 in the config this is where
    /// the OS placed us.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Shared handle to the encrypted store, for the aggregator and for
    /// persistence at shutdown.
    pub fn store_handle(&self) -> Arc<Mutex<EncryptedStore>> {
        self.store.clone()
    }

    pub fn statistics(&self) -> ServerStatistics {
        self.store.lock().unwrap().statistics()
    }

    pub fn start(&mut self) -> Result<(), ServerError> {
        if self.state == ServerState::Listening {
            return Err(ServerError::AlreadyListening);
        }
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        self.local_addr = Some(listener.local_addr()?);
        self.running.store(true, Relaxed);

        let running = self.running.clone();
        let store = self.store.clone();
        let buffer_size = self.config.buffer_size;
        let read_timeout = self.config.read_timeout;
        self.accept_handle = Some(thread::spawn(move || {
            accept_loop(listener, running, store, buffer_size, read_timeout);
        }));

        self.state = ServerState::Listening;
        info!("[Server] listening on {}", self.local_addr.unwrap());
        Ok(())
    }

    /// Stops the accept loop. Handler threads already inside a blocking
    /// read drain on their own within the read timeout; stop does not
    /// wait for them.
    pub fn stop(&mut self) {
        if self.state != ServerState::Listening {
            return;
        }
        self.running.store(false, Relaxed);
        if let Some(handle) = self.accept_handle.take() {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("[Server] accept loop still busy at stop deadline, detaching");
            }
        }
        self.state = ServerState::Stopped;
        info!(
            "[Server] stopped, total readings received: {}",
            self.store.lock().unwrap().total_readings_received()
        );
    }
}

impl Drop for AnalyticsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    running: Arc<AtomicBool>,
    store: Arc<Mutex<EncryptedStore>>,
    buffer_size: usize,
    read_timeout: Duration,
) {
    while running.load(Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let store = store.clone();
                thread::spawn(move || {
                    handle_connection(stream, peer, store, buffer_size, read_timeout);
                });
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                if running.load(Relaxed) {
                    error!("[Server] accept error: {}", e);
                }
            }
        }
    }
}

fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    store: Arc<Mutex<EncryptedStore>>,
    buffer_size: usize,
    read_timeout: Duration,
) {
    // Accepted sockets inherit non-blocking mode from the listener on
    // some platforms; handlers read with a plain bounded timeout.
    if stream.set_nonblocking(false).is_err() || stream.set_read_timeout(Some(read_timeout)).is_err()
    {
        return;
    }

    let frame = match wire::read_frame(&mut stream, buffer_size) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("[Server] read failure from {}: {}", peer, e);
            return;
        }
    };
    if frame.is_empty() {
        return;
    }

    let batch = match wire::decode_frame(&frame) {
        Ok(batch) => batch,
        Err(e) => {
            // Malformed frames are discarded with no response.
            warn!("[Server] dropping malformed frame from {}: {}", peer, e);
            return;
        }
    };
    if batch.count == 0 {
        warn!("[Server] dropping frame from {} with zero reading count", peer);
        return;
    }

    debug!(
        "[Server] received encrypted batch from meter {} ({} readings, encrypted in {:.2}ms)",
        batch.meter_id, batch.count, batch.encryption_time_ms
    );

    {
        let mut store = store.lock().unwrap();
        store.ingest(batch, frame.len());
    }

    if let Err(e) = stream.write_all(wire::ACK) {
        warn!("[Server] failed to acknowledge {}: {}", peer, e);
    }
}
