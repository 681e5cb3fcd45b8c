pub mod cli;
pub mod client;
pub mod command;
pub mod error;
pub mod protocol;
pub mod storage;

pub use cli::{ConsoleProgress, prompt};
pub use client::{NoProgress, ProgressSink, TransferClient};
pub use command::Command;
pub use error::TransferError;
pub use protocol::{FileServer, ServerConfig, ServerError};
pub use storage::Storage;
