use std::{
    io::{Read, Write},
    net::{Shutdown, TcpStream},
};

use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint},
    decode_from_std_read, encode_into_std_write,
};
use log::trace;

use crate::TransferError;

use super::{HEADER_SIZE, MAX_PACKET_SIZE, Message};

/// Fixed-width frame header; big-endian fixint encoding lays it out as exactly
/// one tag byte followed by a four byte length.
#[derive(Debug, Encode, Decode, PartialEq, Eq)]
struct Header {
    tag: u8,
    length: u32,
}

fn config() -> Configuration<BigEndian, Fixint> {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// Largest payload length accepted in either direction.
const MAX_PAYLOAD_LEN: u32 = i32::MAX as u32;

/// Serialize one message into a standalone frame.
pub fn encode(message: &Message) -> Result<Vec<u8>, TransferError> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + message.payload().len());
    write_message(&mut frame, message)?;
    Ok(frame)
}

/// Write one frame: header then payload verbatim.
pub fn write_message<W: Write>(writer: &mut W, message: &Message) -> Result<(), TransferError> {
    let length = u32::try_from(message.payload().len())
        .ok()
        .filter(|len| *len <= MAX_PAYLOAD_LEN)
        .ok_or_else(|| {
            TransferError::protocol(format!(
                "payload of {} bytes does not fit a frame",
                message.payload().len()
            ))
        })?;

    let header = Header {
        tag: message.kind().tag(),
        length,
    };
    encode_into_std_write(header, writer, config())?;
    writer.write_all(message.payload())?;
    Ok(())
}

/// Read exactly one frame. Never yields a partial message: running out of input
/// anywhere inside the frame is [`TransferError::TruncatedStream`].
pub fn decode<R: Read>(reader: &mut R) -> Result<Message, TransferError> {
    let header: Header = decode_from_std_read(reader, config())?;
    if header.length > MAX_PAYLOAD_LEN {
        return Err(TransferError::protocol(format!(
            "declared payload length {} is out of range",
            header.length
        )));
    }

    let expected = header.length as usize;
    // Grow with the data actually received rather than trusting the declared length.
    let mut payload = Vec::with_capacity(expected.min(MAX_PACKET_SIZE));
    reader
        .take(u64::from(header.length))
        .read_to_end(&mut payload)?;

    if payload.len() < expected {
        return Err(TransferError::TruncatedStream);
    }

    Ok(Message::new(header.tag.into(), payload))
}

/// Framed message stream over a bidirectional transport.
pub struct ProtocolTransport<T: Read + Write> {
    stream: T,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self { stream }
    }

    pub fn write_message(&mut self, message: &Message) -> Result<(), TransferError> {
        trace!(
            "-> {} ({} bytes)",
            message.kind(),
            message.payload().len()
        );
        let frame = encode(message)?;
        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        Ok(())
    }

    pub fn read_message(&mut self) -> Result<Message, TransferError> {
        let message = decode(&mut self.stream)?;
        trace!(
            "<- {} ({} bytes)",
            message.kind(),
            message.payload().len()
        );
        Ok(message)
    }

    pub fn get_ref(&self) -> &T {
        &self.stream
    }

    pub fn into_inner(self) -> T {
        self.stream
    }
}

impl ProtocolTransport<TcpStream> {
    /// Shut the socket down in both directions. Errors (already closed, reset by
    /// peer) are ignored.
    pub fn close(self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Seek, SeekFrom};

    use super::*;
    use crate::protocol::{MAX_CHUNK_SIZE, MessageType};

    #[test]
    fn header_layout_is_tag_then_big_endian_length() {
        let frame = encode(&Message::new(MessageType::RequestFile, "a.txt")).unwrap();

        assert_eq!(&frame[..HEADER_SIZE], &[3, 0, 0, 0, 5]);
        assert_eq!(&frame[HEADER_SIZE..], b"a.txt");
    }

    #[test]
    fn absent_payload_is_a_bare_header() {
        let frame = encode(&Message::request_file_list()).unwrap();
        assert_eq!(frame, vec![1, 0, 0, 0, 0]);
    }

    #[test]
    fn decode_inverts_encode_at_size_boundaries() {
        for size in [0, 1, MAX_CHUNK_SIZE] {
            let payload = (0..size).map(|i| (i % 251) as u8).collect::<Vec<u8>>();
            let message = Message::new(MessageType::FileData, payload);

            let frame = encode(&message).unwrap();
            assert_eq!(frame.len(), HEADER_SIZE + size);
            if size == MAX_CHUNK_SIZE {
                assert_eq!(frame.len(), MAX_PACKET_SIZE);
            }

            let decoded = decode(&mut Cursor::new(frame)).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn truncated_header() {
        let err = decode(&mut Cursor::new(vec![5, 0, 0])).unwrap_err();
        assert!(matches!(err, TransferError::TruncatedStream));

        let err = decode(&mut Cursor::new(Vec::new())).unwrap_err();
        assert!(matches!(err, TransferError::TruncatedStream));
    }

    #[test]
    fn truncated_payload() {
        let mut frame = encode(&Message::file_data(b"hello")).unwrap();
        frame.truncate(frame.len() - 2);

        let err = decode(&mut Cursor::new(frame)).unwrap_err();
        assert!(matches!(err, TransferError::TruncatedStream));
    }

    #[test]
    fn out_of_range_length_is_rejected() {
        let frame = vec![5, 0x80, 0, 0, 0];
        let err = decode(&mut Cursor::new(frame)).unwrap_err();
        assert!(matches!(err, TransferError::ProtocolViolation(_)));
    }

    #[test]
    fn unknown_tags_survive_decoding() {
        let frame = vec![99, 0, 0, 0, 1, b'x'];
        let msg = decode(&mut Cursor::new(frame)).unwrap();

        assert_eq!(msg.kind(), MessageType::Unknown(99));
        assert_eq!(msg.payload(), b"x");
    }

    #[test]
    fn read_write_sequence() {
        let stream = Cursor::new(Vec::new());
        let mut transport = ProtocolTransport::new(stream);

        transport
            .write_message(&Message::request_file("a.txt"))
            .unwrap();
        transport
            .write_message(&Message::transfer_complete())
            .unwrap();
        transport.stream.seek(SeekFrom::Start(0)).unwrap();

        assert_eq!(
            transport.read_message().unwrap(),
            Message::request_file("a.txt")
        );
        assert_eq!(
            transport.read_message().unwrap(),
            Message::transfer_complete()
        );
        assert!(matches!(
            transport.read_message(),
            Err(TransferError::TruncatedStream)
        ));
    }
}
