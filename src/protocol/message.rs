use std::{fmt, str::FromStr};

use crate::TransferError;

use super::FIELD_DELIMITER;

/// Type tag carried in the first byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    RequestFileList,
    FileList,
    RequestFile,
    FileInfo,
    FileData,
    TransferComplete,
    Error,
    /// Tag outside the catalog. Decoding keeps it so the server can refuse it.
    Unknown(u8),
}

impl MessageType {
    pub fn tag(self) -> u8 {
        match self {
            MessageType::RequestFileList => 1,
            MessageType::FileList => 2,
            MessageType::RequestFile => 3,
            MessageType::FileInfo => 4,
            MessageType::FileData => 5,
            MessageType::TransferComplete => 6,
            MessageType::Error => 7,
            MessageType::Unknown(tag) => tag,
        }
    }
}

impl From<u8> for MessageType {
    fn from(value: u8) -> Self {
        match value {
            1 => MessageType::RequestFileList,
            2 => MessageType::FileList,
            3 => MessageType::RequestFile,
            4 => MessageType::FileInfo,
            5 => MessageType::FileData,
            6 => MessageType::TransferComplete,
            7 => MessageType::Error,
            tag => MessageType::Unknown(tag),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::RequestFileList => write!(f, "REQUEST_FILE_LIST"),
            MessageType::FileList => write!(f, "FILE_LIST"),
            MessageType::RequestFile => write!(f, "REQUEST_FILE"),
            MessageType::FileInfo => write!(f, "FILE_INFO"),
            MessageType::FileData => write!(f, "FILE_DATA"),
            MessageType::TransferComplete => write!(f, "TRANSFER_COMPLETE"),
            MessageType::Error => write!(f, "ERROR"),
            MessageType::Unknown(tag) => write!(f, "UNKNOWN({tag})"),
        }
    }
}

/// One framed unit of the protocol.
///
/// An absent payload and an empty one are the same value: both travel as length 0
/// and both decode back to an empty payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageType,
    payload: Vec<u8>,
}

impl Message {
    pub fn new(kind: MessageType, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn empty(kind: MessageType) -> Self {
        Self::new(kind, Vec::new())
    }

    pub fn request_file_list() -> Self {
        Self::empty(MessageType::RequestFileList)
    }

    pub fn file_list<S: AsRef<str>>(names: &[S]) -> Self {
        let joined = names
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<&str>>()
            .join(FIELD_DELIMITER);
        Self::new(MessageType::FileList, joined)
    }

    pub fn request_file(name: &str) -> Self {
        Self::new(MessageType::RequestFile, name)
    }

    pub fn file_info(info: &FileInfo) -> Self {
        Self::new(MessageType::FileInfo, info.to_string())
    }

    pub fn file_data(chunk: &[u8]) -> Self {
        Self::new(MessageType::FileData, chunk)
    }

    pub fn transfer_complete() -> Self {
        Self::empty(MessageType::TransferComplete)
    }

    /// Upload ready-ack. Shares the `TRANSFER_COMPLETE` tag on the wire.
    pub fn ready() -> Self {
        Self::transfer_complete()
    }

    pub fn error(reason: impl fmt::Display) -> Self {
        Self::new(MessageType::Error, reason.to_string())
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Payload as text; invalid UTF-8 sequences are replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Names carried by a `FILE_LIST` payload. Empty text means no files.
    pub fn file_names(&self) -> Vec<String> {
        let text = self.text();
        if text.is_empty() {
            return Vec::new();
        }
        text.split(FIELD_DELIMITER).map(str::to_string).collect()
    }
}

/// `name|size` descriptor exchanged before any file bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
}

impl FileInfo {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

impl fmt::Display for FileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{FIELD_DELIMITER}{}", self.name, self.size)
    }
}

impl FromStr for FileInfo {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s.split(FIELD_DELIMITER).collect::<Vec<&str>>();
        if parts.len() != 2 {
            return Err(TransferError::protocol(format!(
                "invalid file info format: '{s}'"
            )));
        }

        let size = parts[1].parse::<u64>().map_err(|_| {
            TransferError::application(format!("invalid file size: '{}'", parts[1]))
        })?;

        Ok(FileInfo::new(parts[0], size))
    }
}
