//! Client side of the transfer protocol.
//!
//! [`TransferClient`] drives the three client operations (listing, uploading and
//! downloading). Each operation opens a fresh connection, performs one exchange with
//! the server and disconnects in a final step whatever the outcome, mirroring the
//! server's one-request-per-connection rule.
//!
//! All operations block the calling thread. Progress is reported through a
//! [`ProgressSink`]: callbacks arrive in non-decreasing order on the calling thread and
//! every upload or download ends with exactly one call to either
//! [`on_complete`](ProgressSink::on_complete) or [`on_error`](ProgressSink::on_error).
//! A front end that needs to stay responsive runs the operation on its own worker
//! thread and marshals those callbacks itself.
use std::{
    fs::{self, File},
    io::{self, Read},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    path::{Path, PathBuf},
};

use log::{debug, info, warn};

use crate::{
    TransferError,
    protocol::{
        FileInfo, Message, MessageType, ProtocolTransport, TransferSession, receive_file,
        send_file,
    },
    storage::{remove_partial, validate_file_name},
};

/// Suffix of the file a download is written to before it is complete.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Receives progress and the terminal outcome of one transfer.
pub trait ProgressSink {
    fn on_progress(&mut self, transferred: u64, total: u64);
    fn on_complete(&mut self);
    fn on_error(&mut self, message: &str);
}

/// Sink for callers that only care about the returned `Result`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&mut self, _transferred: u64, _total: u64) {}
    fn on_complete(&mut self) {}
    fn on_error(&mut self, _message: &str) {}
}

fn not_connected() -> TransferError {
    TransferError::Connection(io::Error::new(
        io::ErrorKind::NotConnected,
        "not connected to a server",
    ))
}

/// Report a finished operation to the sink exactly once.
fn finish<T>(
    sink: &mut dyn ProgressSink,
    result: Result<T, TransferError>,
) -> Result<T, TransferError> {
    match &result {
        Ok(_) => sink.on_complete(),
        Err(e) => sink.on_error(&e.to_string()),
    }
    result
}

/// Turn an `ERROR` response into the error it carries.
fn refuse_on_error(message: Message) -> Result<Message, TransferError> {
    match message.kind() {
        MessageType::Error => Err(TransferError::Application(message.text())),
        _ => Ok(message),
    }
}

pub struct TransferClient {
    addresses: Vec<SocketAddr>,
    transport: Option<ProtocolTransport<TcpStream>>,
}

impl TransferClient {
    /// Resolve the server address. Nothing is connected until an operation runs.
    pub fn new<A: ToSocketAddrs>(address: A) -> Result<Self, TransferError> {
        let addresses = address.to_socket_addrs()?.collect::<Vec<SocketAddr>>();
        if addresses.is_empty() {
            return Err(TransferError::Connection(io::Error::new(
                io::ErrorKind::InvalidInput,
                "server address did not resolve",
            )));
        }

        Ok(Self {
            addresses,
            transport: None,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Open a connection to the server, replacing any previous one.
    pub fn connect(&mut self) -> Result<(), TransferError> {
        self.disconnect();
        let stream = TcpStream::connect(self.addresses.as_slice())?;
        debug!("connected to {:?}", stream.peer_addr().ok());
        self.transport = Some(ProtocolTransport::new(stream));
        Ok(())
    }

    /// Close the current connection, if any. Safe to call repeatedly and from cleanup
    /// paths; failures while closing are ignored.
    pub fn disconnect(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
            debug!("disconnected");
        }
    }

    /// Run one exchange on a fresh connection and always disconnect afterwards.
    fn exchange<R, F>(&mut self, f: F) -> Result<R, TransferError>
    where
        F: FnOnce(&mut ProtocolTransport<TcpStream>) -> Result<R, TransferError>,
    {
        self.connect()?;
        let result = match self.transport.as_mut() {
            Some(transport) => f(transport),
            None => Err(not_connected()),
        };
        self.disconnect();
        result
    }

    /// Names of the files stored on the server, in server order.
    pub fn list_files(&mut self) -> Result<Vec<String>, TransferError> {
        self.exchange(|transport| {
            transport.write_message(&Message::request_file_list())?;
            let response = refuse_on_error(transport.read_message()?)?;
            if response.kind() != MessageType::FileList {
                warn!("expected FILE_LIST, got {}", response.kind());
            }
            Ok(response.file_names())
        })
    }

    /// Upload a local file under its own file name. The server refuses names it
    /// already stores.
    pub fn upload_file(
        &mut self,
        path: impl AsRef<Path>,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), TransferError> {
        let result = self.upload(path.as_ref(), sink);
        finish(sink, result)
    }

    fn upload(&mut self, path: &Path, sink: &mut dyn ProgressSink) -> Result<(), TransferError> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TransferError::application(format!(
                    "file not found: {}",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            return Err(TransferError::application(format!(
                "not a regular file: {}",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                TransferError::application(format!("invalid file name: {}", path.display()))
            })?;
        validate_file_name(name)?;

        let info = FileInfo::new(name, metadata.len());
        let mut file = File::open(path)?;

        self.exchange(|transport| {
            transport.write_message(&Message::file_info(&info))?;
            refuse_on_error(transport.read_message()?)?;

            let sent = send_file(transport, (&mut file).take(info.size), |sent| {
                sink.on_progress(sent, info.size)
            })?;
            if sent < info.size {
                let reason = format!("file shrank while uploading: {}", path.display());
                let _ = transport.write_message(&Message::error(&reason));
                return Err(TransferError::Application(reason));
            }

            transport.write_message(&Message::transfer_complete())?;
            match transport.read_message() {
                Ok(response) => {
                    refuse_on_error(response)?;
                }
                // Every byte is already on the server; a peer that hangs up instead of
                // acknowledging has still received the whole file.
                Err(TransferError::TruncatedStream) => {
                    warn!("server closed without acknowledging '{}'", info.name);
                }
                Err(e) => return Err(e),
            }

            info!("uploaded {} ({} bytes)", info.name, info.size);
            Ok(())
        })
    }

    /// Download `name` into `dir`, creating the directory if needed. Returns the path
    /// of the written file. A failed download leaves no partial file behind.
    pub fn download_file(
        &mut self,
        name: &str,
        dir: impl AsRef<Path>,
        sink: &mut dyn ProgressSink,
    ) -> Result<PathBuf, TransferError> {
        let result = self.download(name, dir.as_ref(), sink);
        finish(sink, result)
    }

    fn download(
        &mut self,
        name: &str,
        dir: &Path,
        sink: &mut dyn ProgressSink,
    ) -> Result<PathBuf, TransferError> {
        validate_file_name(name)?;

        self.exchange(|transport| {
            transport.write_message(&Message::request_file(name))?;
            let response = refuse_on_error(transport.read_message()?)?;
            if response.kind() != MessageType::FileInfo {
                return Err(TransferError::protocol(format!(
                    "expected FILE_INFO, got {}",
                    response.kind()
                )));
            }

            let info: FileInfo = response.text().parse()?;
            if info.name != name {
                return Err(TransferError::protocol(format!(
                    "requested '{name}' but server announced '{}'",
                    info.name
                )));
            }

            fs::create_dir_all(dir)?;
            let target = dir.join(name);
            // Bytes land beside the target and replace it only once complete, so a
            // failed download never clobbers an existing local copy.
            let partial = dir.join(format!("{name}{PARTIAL_SUFFIX}"));
            let mut file = File::create(&partial)?;
            debug!(
                "downloading {name} ({} bytes) to {}",
                info.size,
                target.display()
            );

            let mut session = TransferSession::new(info.name.as_str(), info.size);
            let received = receive_file(transport, &mut session, &mut file, |session| {
                sink.on_progress(session.transferred(), session.file_size())
            });
            drop(file);
            let finished = received
                .and_then(|_| fs::rename(&partial, &target).map_err(TransferError::from));
            if let Err(e) = finished {
                remove_partial(&partial);
                return Err(e);
            }

            match transport.read_message() {
                Ok(msg) if msg.kind() == MessageType::TransferComplete => {}
                Ok(msg) => warn!(
                    "expected TRANSFER_COMPLETE after '{name}', got {}",
                    msg.kind()
                ),
                Err(e) => warn!("no TRANSFER_COMPLETE after '{name}': {e}"),
            }

            info!("downloaded {name} ({} bytes)", info.size);
            Ok(target)
        })
    }
}

impl Drop for TransferClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}
