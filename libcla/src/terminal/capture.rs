// Copyright 2025 The Command Line Assistant Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The capture side of the terminal module: spawn an interactive
//! shell under a pty, pass the user's bytes through transparently,
//! and frame commands and their output into the structured log using
//! the prompt marker the shell integration emits.

use std::{
    fs,
    io::{self, Read as _, Write},
    os::unix::{fs::OpenOptionsExt as _, io::AsFd as _, process::CommandExt as _},
    process,
};

use anyhow::{anyhow, Context};
use nix::{
    poll::{poll, PollFd, PollFlags, PollTimeout},
    sys::wait::waitpid,
    unistd::Pid,
};
use tracing::{debug, info, instrument};

use super::{capture_log_path, create_private_folder, parser::TerminalRecord, NamedFileLock};
use crate::{consts, tty, user};

enum State {
    InCommand,
    InOutput,
}

/// The framing state machine. Bytes coming off the pty master get
/// split into records at the prompt marker; a newline inside a
/// command closes the command field and everything after it is
/// output, until the next marker.
struct Recorder<W: Write> {
    handler: W,
    state: State,
    current_command: Vec<u8>,
    current_output: Vec<u8>,
}

impl<W: Write> Recorder<W> {
    fn new(handler: W) -> Self {
        Recorder {
            handler,
            state: State::InCommand,
            current_command: Vec::new(),
            current_output: Vec::new(),
        }
    }

    /// Feed one read's worth of pty output through the state machine.
    fn feed(&mut self, data: &[u8]) -> anyhow::Result<()> {
        if data.starts_with(consts::PROMPT_MARKER) {
            // A marker always opens a fresh record, flushing the
            // previous one if it captured anything. The marker bytes
            // themselves are not part of the command.
            self.write_json_block()?;
            self.state = State::InCommand;
            self.current_command.extend_from_slice(&data[consts::PROMPT_MARKER.len()..]);
            return Ok(());
        }

        if let State::InCommand = self.state {
            if data.contains(&b'\n') {
                // The command line is done; this chunk and everything
                // until the next marker belongs to the output.
                self.state = State::InOutput;
            }
        }

        match self.state {
            State::InCommand => self.current_command.extend_from_slice(data),
            State::InOutput => self.current_output.extend_from_slice(data),
        }

        Ok(())
    }

    /// Write a json block to the file once it's read.
    fn write_json_block(&mut self) -> anyhow::Result<()> {
        if self.current_command.is_empty() {
            self.current_output.clear();
            return Ok(());
        }

        let record = TerminalRecord {
            command: String::from(String::from_utf8_lossy(&self.current_command).trim()),
            output: String::from(String::from_utf8_lossy(&self.current_output).trim()),
        };
        serde_json::to_writer(&mut self.handler, &record).context("serializing record")?;
        self.handler.write_all(b"\n").context("terminating record")?;
        self.handler.flush().context("flushing record")?;

        self.current_command.clear();
        self.current_output.clear();
        Ok(())
    }
}

/// Start capturing the terminal output and store it in the log file.
///
/// This records every single piece of information displayed on the
/// terminal for as long as the spawned shell runs. Framing relies on
/// the shell integration emitting the prompt marker before each
/// prompt; without it everything lands in one record.
#[instrument(skip_all)]
pub fn start_capture() -> anyhow::Result<()> {
    let account = user::current().context("resolving the passwd entry")?;
    let shell = account.shell();

    let log_path = capture_log_path()?;
    let log_dir = log_path.parent().ok_or(anyhow!("no parent for the capture log"))?;
    create_private_folder(log_dir)?;

    // Refuse to race another capture session.
    let _lock = NamedFileLock::acquire("terminal")?;

    let handler = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&log_path)
        .with_context(|| format!("opening capture log {log_path:?}"))?;
    let mut recorder = Recorder::new(handler);

    info!("spawning capture shell '{}'", shell);
    let fork = shpool_pty::fork::Fork::from_ptmx().context("forking pty")?;
    if fork.is_child().is_ok() {
        let err = process::Command::new(&shell).exec();
        eprintln!("shell exec err: {err:?}");
        std::process::exit(1);
    }

    let mut master = fork.is_parent().context("getting pty master")?;
    let watchable_master = master;
    let master_raw = master.raw_fd().ok_or(anyhow!("no master fd"))?;
    let child_pid = fork.child_pid().ok_or(anyhow!("no child pid"))?;

    // Raw mode for the duration; the subshell's terminal owns the
    // line discipline.
    let tty_guard = tty::set_capture_flags()?;

    let mut stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut buf: Vec<u8> = vec![0; consts::BUF_SIZE];

    'capture: loop {
        // Scoped so the fd borrows end before we read.
        let (master_ready, stdin_ready) = {
            let stdin_fd = stdin.as_fd();
            let master_fd = watchable_master.borrow_fd().ok_or(anyhow!("no master fd"))?;
            let mut poll_fds = [
                PollFd::new(master_fd, PollFlags::POLLIN),
                PollFd::new(stdin_fd, PollFlags::POLLIN),
            ];
            poll(&mut poll_fds, PollTimeout::NONE).context("polling stdin and pty")?;

            (
                poll_fds[0]
                    .revents()
                    .map(|r| r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP))
                    .unwrap_or(false),
                poll_fds[1].revents().map(|r| r.intersects(PollFlags::POLLIN)).unwrap_or(false),
            )
        };

        if master_ready {
            // Keep the child pty's window in sync with ours on every
            // read so curses programs lay out correctly.
            if let Ok(size) = tty::Size::from_fd(consts::STDIN_FD) {
                let _ = size.set_fd(master_raw);
            }

            let nread = match master.read(&mut buf) {
                Ok(0) => break 'capture,
                Ok(n) => n,
                // EIO is how the pty reports that the child is gone.
                Err(e) if e.raw_os_error() == Some(libc::EIO) => break 'capture,
                Err(e) => return Err(e).context("reading from pty master"),
            };
            debug!("read {} bytes from pty", nread);

            recorder.feed(&buf[..nread])?;
            stdout.write_all(&buf[..nread]).context("echoing pty output")?;
            stdout.flush().context("flushing stdout")?;
        }

        if stdin_ready {
            let nread = match stdin.read(&mut buf) {
                Ok(0) => break 'capture,
                Ok(n) => n,
                Err(e) => return Err(e).context("reading stdin from user"),
            };
            master.write_all(&buf[..nread]).context("forwarding input to shell")?;
        }
    }

    // Restore the terminal before reaping so an error message from
    // waitpid doesn't end up garbled by raw mode.
    drop(tty_guard);

    // Write the final json block if it exists.
    recorder.write_json_block()?;

    info!("capture shell exited, reaping child {}", child_pid);
    waitpid(Pid::from_raw(child_pid), None).context("reaping capture shell")?;

    Ok(())
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::*;
    use crate::terminal::parser::parse_records;

    fn feed_all(chunks: &[&[u8]]) -> Vec<u8> {
        let mut recorder = Recorder::new(Vec::new());
        for chunk in chunks {
            recorder.feed(chunk).expect("feeding recorder");
        }
        recorder.write_json_block().expect("finalizing");
        recorder.handler
    }

    #[test]
    fn frames_one_command() {
        let written = feed_all(&[b"\x1b]echo hi", b"\n", b"hi\n", b"\x1b]"]);
        let records = parse_records(Cursor::new(written));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].command, "echo hi");
        assert_eq!(records[0].output, "hi");
    }

    #[test]
    fn trailing_marker_leaves_no_half_record() {
        // The final marker opens a new empty record which must not be
        // written by the end-of-capture flush.
        let written = feed_all(&[b"\x1b]echo hi", b"\n", b"hi\n", b"\x1b]"]);
        let text = String::from_utf8(written).expect("utf8 log");
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn frames_a_session_in_order() {
        let written = feed_all(&[
            b"\x1b]$ echo one",
            b"\r\n",
            b"one\r\n",
            b"\x1b]$ echo two",
            b"\r\n",
            b"two\r\n",
            b"\x1b]$ pwd",
            b"\r\n",
            b"/root\r\n",
        ]);
        let records = parse_records(Cursor::new(written));
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].command, "$ echo one");
        assert_eq!(records[0].output, "one");
        assert_eq!(records[2].output, "/root");
    }

    #[test]
    fn consecutive_markers_skip_empty_commands() {
        let written = feed_all(&[b"\x1b]", b"\x1b]echo hi", b"\n", b"hi\n", b"\x1b]"]);
        let records = parse_records(Cursor::new(written));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].command, "echo hi");
    }

    #[test]
    fn keystroke_sized_chunks_assemble_a_command() {
        let written = feed_all(&[
            b"\x1b]$ ",
            b"l",
            b"s",
            b"\r\n",
            b"file-a  file-b\r\n",
            b"\x1b]",
        ]);
        let records = parse_records(Cursor::new(written));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].command, "$ ls");
        assert_eq!(records[0].output, "file-a  file-b");
    }
}
