//! Client-server communication protocol.
//!
//! This module defines the wire contract between a Courier client and server: the
//! message catalog, the framing codec, the per-transfer bookkeeping shared by both
//! sides, and the server that accepts connections and dispatches requests.
//!
//! # Overview
//!
//! A connection carries exactly one request/response exchange. The client opens a
//! connection, sends one request message, drives the exchange to its end (listing,
//! uploading or downloading a single file) and closes the connection. There is no
//! multiplexing and no negotiation; both peers share one fixed format.
//!
//! # Key Components
//!
//! - [`Message`]: A type tag plus an optional payload.
//! - [`ProtocolTransport`]: Reads and writes framed messages over any `Read + Write` stream.
//! - [`TransferSession`]: Bytes moved versus bytes expected for one file.
//! - [`FileServer`]: Listener, accept loop and request dispatcher.
//!
//! # Binary Format
//!
//! Every message starts with a fixed 5 byte header:
//!
//! ```text
//! +----------------+-------------------------------+------------------------+
//! | tag (1 byte)   | payload length (4 bytes, BE)  | payload (length bytes) |
//! +----------------+-------------------------------+------------------------+
//! ```
//!
//! A message is at most [`MAX_PACKET_SIZE`] bytes when it carries file data, which bounds
//! a single chunk to [`MAX_CHUNK_SIZE`] bytes. Text payloads (`name|size`, file lists,
//! error messages) are UTF-8 and use `|` as the field delimiter.
//!
//! # Message Catalog
//!
//! | Tag | Name                | Payload                                   |
//! |-----|---------------------|-------------------------------------------|
//! | 1   | `REQUEST_FILE_LIST` | none                                      |
//! | 2   | `FILE_LIST`         | `name1\|name2\|...`                       |
//! | 3   | `REQUEST_FILE`      | file name                                 |
//! | 4   | `FILE_INFO`         | `name\|size`, also starts an upload       |
//! | 5   | `FILE_DATA`         | raw chunk                                 |
//! | 6   | `TRANSFER_COMPLETE` | none, also the upload ready-ack           |
//! | 7   | `ERROR`             | human readable reason                     |
//!
//! # See Also
//!
//! - [`client`](crate::client): Drives the client side of every exchange.
//! - [`storage`](crate::storage): Flat directory the server reads from and writes to.
mod message;
mod server;
mod session;
mod thread;
mod transport;

pub use message::{FileInfo, Message, MessageType};
pub use server::{FileServer, ServerConfig, ServerError};
pub use session::{TransferSession, receive_file, send_file};
pub use thread::{PoolError, ThreadPool};
pub use transport::{ProtocolTransport, decode, encode, write_message};

/// Fixed header: one tag byte and a four byte length.
pub const HEADER_SIZE: usize = 5;

/// Upper bound of a whole `FILE_DATA` message, header included.
pub const MAX_PACKET_SIZE: usize = 8192;

/// Largest payload a single `FILE_DATA` message may carry.
pub const MAX_CHUNK_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;

/// Separates fields in `FILE_INFO` and names in `FILE_LIST`.
pub const FIELD_DELIMITER: &str = "|";
