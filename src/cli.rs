//! CLI utilities for Courier.
//!
//! The utilities present in this module back the interactive `courier_cli` binary: a
//! prompt that turns input lines into [`Command`]s, and a [`ProgressSink`] that renders
//! transfer progress as a single updating line.
use std::io::{BufRead, Write};

use crate::{Command, ProgressSink, command::CommandError};

/// Prompt user for a valid Courier command. End of input reads as [`Command::Exit`].
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, CommandError>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ")?;
    writer.flush()?;

    if reader.read_line(&mut s)? == 0 {
        return Ok(Command::Exit);
    }

    Command::try_from(s.as_str())
}

/// Writes `label: 42% (420/1000 bytes)` lines, rewriting the same terminal line.
pub struct ConsoleProgress<W: Write> {
    label: String,
    writer: W,
}

impl<W: Write> ConsoleProgress<W> {
    pub fn new(label: impl Into<String>, writer: W) -> Self {
        Self {
            label: label.into(),
            writer,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ProgressSink for ConsoleProgress<W> {
    fn on_progress(&mut self, transferred: u64, total: u64) {
        let percent = if total == 0 {
            100
        } else {
            transferred.saturating_mul(100) / total
        };
        let _ = write!(
            self.writer,
            "\r{}: {percent}% ({transferred}/{total} bytes)",
            self.label
        );
        let _ = self.writer.flush();
    }

    fn on_complete(&mut self) {
        let _ = writeln!(self.writer, "\r{}: done", self.label);
    }

    fn on_error(&mut self, message: &str) {
        let _ = writeln!(self.writer, "\r{}: failed: {message}", self.label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_prints_correctly() {
        let input = b".exit\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();

        let output = String::from_utf8(output).expect("not valid UTF-8");
        assert_eq!("> ", output);
    }

    #[test]
    fn prompt_handles_commands() {
        let input = b"list\n";
        let mut output = Vec::new();

        let res = prompt(&input[..], &mut output).unwrap();
        assert_eq!(Command::List, res);
    }

    #[test]
    fn prompt_treats_end_of_input_as_exit() {
        let input = b"";
        let mut output = Vec::new();

        assert_eq!(prompt(&input[..], &mut output).unwrap(), Command::Exit);
    }

    #[test]
    #[should_panic(expected = "unrecognized command '.something_wrong'")]
    fn prompt_unrecognized_command() {
        let input = b".something_wrong\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output)
            .map_err(|e| e.to_string())
            .unwrap();
    }

    #[test]
    fn console_progress_renders_percentages() {
        let mut sink = ConsoleProgress::new("a.txt", Vec::new());
        sink.on_progress(1, 4);
        sink.on_progress(4, 4);
        sink.on_complete();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(
            output,
            "\ra.txt: 25% (1/4 bytes)\ra.txt: 100% (4/4 bytes)\ra.txt: done\n"
        );
    }

    #[test]
    fn console_progress_reports_failure() {
        let mut sink = ConsoleProgress::new("a.txt", Vec::new());
        sink.on_error("file not found: a.txt");

        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(output, "\ra.txt: failed: file not found: a.txt\n");
    }
}
