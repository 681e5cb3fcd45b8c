//! Commands understood by the interactive client.
//!
//! This module defines the [`Command`] enum, which encapsulates one line typed at the
//! `courier_cli` prompt, and the parsing from raw input into it.
//!
//! # Overview
//! The supported commands are:
//!
//! - `list`: Show the files stored on the server.
//! - `upload <path>`: Send a local file to the server.
//! - `download <name> [--to <dir>]`: Fetch a stored file into `dir` (default `downloads`).
//!   Everything before `--to` is the file name, spaces included.
//! - `help`: Print the command summary.
//! - `.exit`: Leave the prompt.
//!
//! # Example
//! ```rust
//! use courier::Command;
//!
//! let cmd = Command::try_from("download a.txt --to out").unwrap();
//! assert_eq!(
//!     cmd,
//!     Command::Download { name: "a.txt".into(), dir: Some("out".into()) }
//! );
//! ```
use std::{io, path::PathBuf};

use thiserror::Error;

/// Directory downloads land in when none is given.
pub const DEFAULT_DOWNLOAD_DIR: &str = "downloads";

pub const HELP: &str = "\
commands:
  list                    show files stored on the server
  upload <path>           send a local file
  download <name> [--to <dir>]
                          fetch a stored file (default dir: downloads)
  help                    show this message
  .exit                   quit";

/// List of possible errors when reading a command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid '{command}' command, {reason}")]
    InvalidCommandArguments { command: String, reason: String },

    #[error("no command provided")]
    Empty,

    #[error("failed to read command: {0}")]
    Io(#[from] io::Error),
}

/// Option introducing the target directory of a download.
const TARGET_FLAG: &str = "--to";

/// Split `<name> [--to <dir>]`. The last whitespace-separated `--to` wins, so names
/// may contain spaces.
fn split_download_args(rest: &str) -> (&str, Option<&str>) {
    let flag_at = rest
        .match_indices(TARGET_FLAG)
        .map(|(at, _)| at)
        .filter(|&at| {
            let before = rest[..at].chars().next_back();
            let after = rest[at + TARGET_FLAG.len()..].chars().next();
            before.is_none_or(char::is_whitespace) && after.is_none_or(char::is_whitespace)
        })
        .last();

    match flag_at {
        Some(at) => (
            rest[..at].trim(),
            Some(rest[at + TARGET_FLAG.len()..].trim()),
        ),
        None => (rest, None),
    }
}

/// High-level user supplied commands for a [`TransferClient`](crate::TransferClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List files on the server.
    List,
    /// Upload the file at the given local path.
    Upload(PathBuf),
    /// Download a stored file, optionally into a specific directory.
    Download { name: String, dir: Option<PathBuf> },
    /// Print the command summary.
    Help,
    /// Leave the prompt.
    Exit,
}

impl Command {
    /// Directory a download command writes into.
    pub fn download_dir(dir: &Option<PathBuf>) -> PathBuf {
        dir.clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR))
    }
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let value = value.trim();
        let (keyword, rest) = match value.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => (value, ""),
        };

        match keyword.to_lowercase().as_str() {
            "" => Err(CommandError::Empty),
            ".exit" | "exit" | "quit" => Ok(Command::Exit),
            "help" | "?" => Ok(Command::Help),
            "list" | "ls" => Ok(Command::List),
            "upload" | "put" => {
                if rest.is_empty() {
                    return Err(CommandError::InvalidCommandArguments {
                        command: keyword.to_string(),
                        reason: "requires a file path. Example: upload ./notes.txt".to_string(),
                    });
                }
                Ok(Command::Upload(PathBuf::from(rest)))
            }
            "download" | "get" => {
                let invalid = |reason: &str| CommandError::InvalidCommandArguments {
                    command: keyword.to_string(),
                    reason: reason.to_string(),
                };

                match split_download_args(rest) {
                    ("", _) => Err(invalid(
                        "requires a file name. Example: download a.txt --to ./out",
                    )),
                    (_, Some("")) => Err(invalid("'--to' requires a directory")),
                    (name, dir) => Ok(Command::Download {
                        name: name.to_string(),
                        dir: dir.map(PathBuf::from),
                    }),
                }
            }
            _ => Err(CommandError::UnrecognizedCommand(value.to_string())),
        }
    }
}
