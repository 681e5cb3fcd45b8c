use std::{
    io, mem,
    net::{SocketAddr, TcpListener, TcpStream},
    num::NonZeroUsize,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::{
    TransferError,
    storage::{Storage, remove_partial},
};

use super::{
    FileInfo, Message, MessageType, ProtocolTransport, ThreadPool, TransferSession, receive_file,
    send_file,
};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to prepare storage directory: {0}")]
    Storage(io::Error),
    #[error("failed to bind listener: {0}")]
    Bind(io::Error),
    #[error("failed to spawn accept loop: {0}")]
    Spawn(io::Error),
    #[error("max_workers must be at least 1")]
    NoWorkers,
}

/// Server settings. `Default` matches the stock deployment: an `uploads` directory in
/// the working directory, all interfaces, unbounded worker pool.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub storage_dir: PathBuf,
    pub bind_host: String,
    /// Upper bound on concurrent connection workers; `None` grows without limit. Zero
    /// is rejected by [`FileServer::start`].
    pub max_workers: Option<usize>,
    /// How long a parked worker lingers before it is reclaimed.
    pub idle_timeout: Duration,
    /// How long `stop` waits for the accept loop to exit.
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("uploads"),
            bind_host: String::from("0.0.0.0"),
            max_workers: None,
            idle_timeout: ThreadPool::DEFAULT_IDLE_TIMEOUT,
            shutdown_grace: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    pub fn with_max_workers(mut self, max: Option<usize>) -> Self {
        self.max_workers = max;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

struct Running {
    address: SocketAddr,
    shutdown: Arc<AtomicBool>,
    acceptor: JoinHandle<()>,
    pool: Arc<ThreadPool>,
}

/// Lifecycle state. Only `start` and `stop` replace it.
enum ServerState {
    Stopped,
    Running(Running),
}

/// Accepts connections and serves one request per connection against a [`Storage`].
pub struct FileServer {
    config: ServerConfig,
    storage: Storage,
    state: ServerState,
}

impl FileServer {
    pub fn new(config: ServerConfig) -> Self {
        let storage = Storage::new(config.storage_dir.clone());
        Self {
            config,
            storage,
            state: ServerState::Stopped,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, ServerState::Running(_))
    }

    /// Address the listener is bound to, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.state {
            ServerState::Running(running) => Some(running.address),
            ServerState::Stopped => None,
        }
    }

    /// Bind `port` and start accepting connections on a background thread. A no-op when
    /// already running; on error the server stays stopped.
    pub fn start(&mut self, port: u16) -> Result<(), ServerError> {
        if self.is_running() {
            return Ok(());
        }

        let max_workers = match self.config.max_workers {
            Some(max) => Some(NonZeroUsize::new(max).ok_or(ServerError::NoWorkers)?),
            None => None,
        };

        self.storage.ensure().map_err(ServerError::Storage)?;
        let listener = TcpListener::bind((self.config.bind_host.as_str(), port))
            .map_err(ServerError::Bind)?;
        let address = listener.local_addr().map_err(ServerError::Bind)?;
        listener.set_nonblocking(true).map_err(ServerError::Bind)?;

        let pool = Arc::new(ThreadPool::new(max_workers, self.config.idle_timeout));
        let shutdown = Arc::new(AtomicBool::new(false));

        let acceptor = {
            let storage = self.storage.clone();
            let pool = Arc::clone(&pool);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name(String::from("courier-acceptor"))
                .spawn(move || accept_loop(listener, storage, pool, shutdown))
                .map_err(ServerError::Spawn)?
        };

        info!(
            "listening at {address}, storing files in {}",
            self.storage.root().display()
        );
        self.state = ServerState::Running(Running {
            address,
            shutdown,
            acceptor,
            pool,
        });
        Ok(())
    }

    /// Signal the accept loop, give it a bounded grace period to exit and drop the
    /// listener, then shut the worker pool down. Connections already being served keep
    /// running.
    pub fn stop(&mut self) {
        let ServerState::Running(running) = mem::replace(&mut self.state, ServerState::Stopped)
        else {
            return;
        };

        running.shutdown.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + self.config.shutdown_grace;
        while !running.acceptor.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if running.acceptor.is_finished() {
            if running.acceptor.join().is_err() {
                error!("accept loop panicked");
            }
        } else {
            warn!("accept loop did not exit within {:?}", self.config.shutdown_grace);
        }

        running.pool.shutdown();
        info!("server stopped");
    }
}

impl Drop for FileServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// How often the non-blocking accept loop checks for shutdown when idle.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

fn accept_loop(
    listener: TcpListener,
    storage: Storage,
    pool: Arc<ThreadPool>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        let stream = match listener.accept() {
            Ok((stream, _)) => stream,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
                continue;
            }
            Err(e) => {
                warn!("failed to accept connection: {e}");
                continue;
            }
        };

        // Some platforms hand out sockets inheriting the listener's mode.
        if let Err(e) = stream.set_nonblocking(false) {
            warn!("dropping connection: {e}");
            continue;
        }

        let storage = storage.clone();
        if let Err(e) = pool.execute(move || serve(stream, &storage)) {
            warn!("dropping connection: {e}");
        }
    }
    debug!("accept loop exited");
}

/// Connection boundary: every failure ends here, and the socket is always closed.
fn serve(stream: TcpStream, storage: &Storage) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| String::from("unknown peer"));
    debug!("accepted connection from {peer}");

    let mut transport = ProtocolTransport::new(stream);
    if let Err(err) = handle_connection(&mut transport, storage) {
        if err.is_reportable() {
            info!("request from {peer} refused: {err}");
            if let Err(e) = transport.write_message(&Message::error(&err)) {
                debug!("could not report error to {peer}: {e}");
            }
        } else {
            warn!("connection with {peer} failed: {err}");
        }
    }

    transport.close();
}

fn handle_connection<T>(
    transport: &mut ProtocolTransport<T>,
    storage: &Storage,
) -> Result<(), TransferError>
where
    T: io::Read + io::Write,
{
    let request = transport.read_message()?;
    debug!("received request: {}", request.kind());

    match request.kind() {
        MessageType::RequestFileList => {
            let names = storage.list()?;
            transport.write_message(&Message::file_list(&names))
        }
        MessageType::RequestFile => send_stored_file(transport, storage, &request.text()),
        MessageType::FileInfo => receive_upload(transport, storage, &request.text()),
        // Bare close notice from a client; nothing to answer.
        MessageType::TransferComplete => Ok(()),
        other => Err(TransferError::application(format!(
            "unknown request type: {}",
            other.tag()
        ))),
    }
}

fn send_stored_file<T>(
    transport: &mut ProtocolTransport<T>,
    storage: &Storage,
    name: &str,
) -> Result<(), TransferError>
where
    T: io::Read + io::Write,
{
    let (file, size) = storage.open(name)?;
    transport.write_message(&Message::file_info(&FileInfo::new(name, size)))?;

    let sent = send_file(transport, io::Read::take(file, size), |_| {})?;
    if sent < size {
        return Err(TransferError::application(format!(
            "file changed while sending: {name}"
        )));
    }

    transport.write_message(&Message::transfer_complete())?;
    info!("sent {name} ({size} bytes)");
    Ok(())
}

fn receive_upload<T>(
    transport: &mut ProtocolTransport<T>,
    storage: &Storage,
    payload: &str,
) -> Result<(), TransferError>
where
    T: io::Read + io::Write,
{
    let info: FileInfo = payload.parse()?;
    let (mut file, path) = storage.create(&info.name)?;

    let mut session = TransferSession::new(info.name.as_str(), info.size);
    let received = transport
        .write_message(&Message::ready())
        .and_then(|_| receive_file(transport, &mut session, &mut file, |_| {}));
    drop(file);

    if let Err(e) = received {
        remove_partial(&path);
        return Err(e);
    }
    info!("received {} ({} bytes)", info.name, info.size);

    // The client closes its side with TRANSFER_COMPLETE and waits for the same back.
    match transport.read_message() {
        Ok(msg) if msg.kind() == MessageType::TransferComplete => {
            transport.write_message(&Message::transfer_complete())
        }
        Ok(msg) => {
            warn!("expected TRANSFER_COMPLETE after upload, got {}", msg.kind());
            Ok(())
        }
        Err(e) => {
            debug!("client left without TRANSFER_COMPLETE: {e}");
            Ok(())
        }
    }
}
