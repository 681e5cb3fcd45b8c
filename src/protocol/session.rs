//! Chunked file streaming shared by the upload and download paths.
//!
//! The sending side cuts a reader into `FILE_DATA` messages of at most
//! [`MAX_CHUNK_SIZE`] bytes. The receiving side owns a [`TransferSession`] and keeps
//! consuming `FILE_DATA` until exactly the announced number of bytes has been written.
use std::io::{self, Read, Write};

use log::warn;

use crate::TransferError;

use super::{MAX_CHUNK_SIZE, Message, MessageType, ProtocolTransport};

/// Bytes moved versus bytes expected for a single file.
///
/// `transferred` never exceeds `file_size`; chunks that would overshoot are cut down
/// to the remaining byte count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSession {
    file_name: String,
    file_size: u64,
    transferred: u64,
}

impl TransferSession {
    pub fn new(file_name: impl Into<String>, file_size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            file_size,
            transferred: 0,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn remaining(&self) -> u64 {
        self.file_size - self.transferred
    }

    pub fn is_complete(&self) -> bool {
        self.transferred == self.file_size
    }

    /// Account for an incoming chunk and return the part of it that belongs to the file.
    pub fn admit<'a>(&mut self, chunk: &'a [u8]) -> &'a [u8] {
        let remaining = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        let accepted = chunk.len().min(remaining);
        if accepted < chunk.len() {
            warn!(
                "'{}': chunk of {} bytes exceeds the {} bytes still expected, truncating",
                self.file_name,
                chunk.len(),
                self.remaining()
            );
        }
        self.transferred += accepted as u64;
        &chunk[..accepted]
    }
}

/// Fill `buf` from `reader`, stopping early only at end of input.
fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Stream `reader` as `FILE_DATA` messages, calling `on_chunk` with the cumulative
/// byte count after each one. Returns the number of bytes sent.
///
/// Every chunk except the last is exactly [`MAX_CHUNK_SIZE`] bytes, so `n` bytes take
/// `ceil(n / MAX_CHUNK_SIZE)` messages and an empty reader sends none. A local read
/// failure is reported to the peer with a best-effort `ERROR` before returning.
pub fn send_file<R, T, F>(
    transport: &mut ProtocolTransport<T>,
    mut reader: R,
    mut on_chunk: F,
) -> Result<u64, TransferError>
where
    R: Read,
    T: Read + Write,
    F: FnMut(u64),
{
    let mut buf = vec![0u8; MAX_CHUNK_SIZE];
    let mut sent = 0u64;

    loop {
        let n = match read_chunk(&mut reader, &mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                let report = Message::error(format!("failed to read file: {e}"));
                let _ = transport.write_message(&report);
                return Err(e.into());
            }
        };

        transport.write_message(&Message::file_data(&buf[..n]))?;
        sent += n as u64;
        on_chunk(sent);
    }

    Ok(sent)
}

/// Consume `FILE_DATA` messages into `writer` until `session` is complete, calling
/// `on_progress` after each chunk.
///
/// An `ERROR` from the peer ends the transfer with its text as an application error;
/// any other message type is a protocol violation. Cleaning up the partially written
/// output is the caller's job.
pub fn receive_file<T, W, F>(
    transport: &mut ProtocolTransport<T>,
    session: &mut TransferSession,
    writer: &mut W,
    mut on_progress: F,
) -> Result<(), TransferError>
where
    T: Read + Write,
    W: Write,
    F: FnMut(&TransferSession),
{
    while !session.is_complete() {
        let message = transport.read_message()?;
        match message.kind() {
            MessageType::FileData => {
                let accepted = session.admit(message.payload());
                writer.write_all(accepted)?;
                on_progress(session);
            }
            MessageType::Error => return Err(TransferError::Application(message.text())),
            other => {
                return Err(TransferError::protocol(format!(
                    "expected FILE_DATA for '{}', got {other}",
                    session.file_name()
                )));
            }
        }
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Seek, SeekFrom};

    use super::*;

    type MemoryTransport = ProtocolTransport<Cursor<Vec<u8>>>;

    fn replay(transport: MemoryTransport) -> MemoryTransport {
        let mut stream = transport.into_inner();
        stream.seek(SeekFrom::Start(0)).unwrap();
        ProtocolTransport::new(stream)
    }

    fn count_chunks(size: usize) -> (u64, Vec<Message>) {
        let data = vec![7u8; size];
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));
        let sent = send_file(&mut transport, data.as_slice(), |_| {}).unwrap();

        let mut transport = replay(transport);
        let mut messages = Vec::new();
        while let Ok(msg) = transport.read_message() {
            messages.push(msg);
        }
        (sent, messages)
    }

    #[test]
    fn session_truncates_oversized_chunks() {
        let mut session = TransferSession::new("a.txt", 5);

        assert_eq!(session.admit(b"hel"), b"hel");
        assert_eq!(session.admit(b"lo, world"), b"lo");
        assert!(session.is_complete());
        assert_eq!(session.admit(b"!"), b"");
        assert_eq!(session.transferred(), 5);
    }

    #[test]
    fn empty_file_sends_no_data_messages() {
        let (sent, messages) = count_chunks(0);
        assert_eq!(sent, 0);
        assert!(messages.is_empty());
    }

    #[test]
    fn chunk_count_is_ceiling_of_size() {
        for (size, chunks) in [
            (1, 1),
            (MAX_CHUNK_SIZE, 1),
            (MAX_CHUNK_SIZE + 1, 2),
            (2 * MAX_CHUNK_SIZE + 10, 3),
        ] {
            let (sent, messages) = count_chunks(size);
            assert_eq!(sent, size as u64);
            assert_eq!(messages.len(), chunks, "size {size}");
            assert!(
                messages
                    .iter()
                    .all(|m| m.kind() == MessageType::FileData
                        && m.payload().len() <= MAX_CHUNK_SIZE)
            );
        }
    }

    #[test]
    fn progress_is_cumulative() {
        let data = vec![1u8; MAX_CHUNK_SIZE + 3];
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));
        let mut seen = Vec::new();

        send_file(&mut transport, data.as_slice(), |sent| seen.push(sent)).unwrap();
        assert_eq!(seen, vec![MAX_CHUNK_SIZE as u64, MAX_CHUNK_SIZE as u64 + 3]);
    }

    #[test]
    fn receive_stops_at_announced_size() {
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));
        transport.write_message(&Message::file_data(b"hel")).unwrap();
        transport.write_message(&Message::file_data(b"lo!!")).unwrap();
        transport.write_message(&Message::transfer_complete()).unwrap();
        let mut transport = replay(transport);

        let mut session = TransferSession::new("a.txt", 5);
        let mut out = Vec::new();
        let mut progress = Vec::new();
        receive_file(&mut transport, &mut session, &mut out, |s| {
            progress.push((s.transferred(), s.file_size()))
        })
        .unwrap();

        assert_eq!(out, b"hello");
        assert_eq!(progress, vec![(3, 5), (5, 5)]);
        // The trailing completion message is left for the caller.
        assert_eq!(
            transport.read_message().unwrap().kind(),
            MessageType::TransferComplete
        );
    }

    #[test]
    fn receive_reports_peer_error() {
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));
        transport.write_message(&Message::file_data(b"he")).unwrap();
        transport.write_message(&Message::error("disk on fire")).unwrap();
        let mut transport = replay(transport);

        let mut session = TransferSession::new("a.txt", 5);
        let err =
            receive_file(&mut transport, &mut session, &mut Vec::new(), |_| {}).unwrap_err();
        match err {
            TransferError::Application(reason) => assert_eq!(reason, "disk on fire"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn receive_rejects_unexpected_type() {
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));
        transport.write_message(&Message::request_file_list()).unwrap();
        let mut transport = replay(transport);

        let mut session = TransferSession::new("a.txt", 5);
        let err =
            receive_file(&mut transport, &mut session, &mut Vec::new(), |_| {}).unwrap_err();
        assert!(matches!(err, TransferError::ProtocolViolation(_)));
    }

    #[test]
    fn receive_of_empty_file_reads_nothing() {
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));
        let mut session = TransferSession::new("empty", 0);
        let mut out = Vec::new();

        receive_file(&mut transport, &mut session, &mut out, |_| panic!("no progress"))
            .unwrap();
        assert!(out.is_empty());
    }
}
