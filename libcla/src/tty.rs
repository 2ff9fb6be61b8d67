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

use std::{
    io::{self, IsTerminal as _},
    os::unix::io::{AsFd as _, AsRawFd as _, BorrowedFd, RawFd},
};

use anyhow::Context;
use nix::sys::{termios, termios::SetArg};
use tracing::error;

// see `man ioctl_tty` for info on these ioctl commands
nix::ioctl_read_bad!(tiocgwinsz, libc::TIOCGWINSZ, libc::winsize);
nix::ioctl_write_ptr_bad!(tiocswinsz, libc::TIOCSWINSZ, libc::winsize);

/// The size of a terminal window, as the kernel packs it: four
/// unsigned shorts (rows, cols, x pixels, y pixels).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Size {
    pub rows: u16,
    pub cols: u16,
    pub xpixel: u16,
    pub ypixel: u16,
}

impl Size {
    /// from_fd returns the terminal size for the given terminal.
    pub fn from_fd(fd: RawFd) -> anyhow::Result<Size> {
        let mut term_size = libc::winsize { ws_row: 0, ws_col: 0, ws_xpixel: 0, ws_ypixel: 0 };

        // Saftey: term_size is stack allocated and live for the whole
        //         call.
        unsafe {
            tiocgwinsz(fd, &mut term_size).context("fetching term size")?;
        }

        Ok(Size {
            rows: term_size.ws_row,
            cols: term_size.ws_col,
            xpixel: term_size.ws_xpixel,
            ypixel: term_size.ws_ypixel,
        })
    }

    /// set_fd sets the tty indicated by the given file descriptor
    /// to have this size.
    pub fn set_fd(&self, fd: RawFd) -> anyhow::Result<()> {
        let term_size = libc::winsize {
            ws_row: self.rows,
            ws_col: self.cols,
            ws_xpixel: self.xpixel,
            ws_ypixel: self.ypixel,
        };

        unsafe {
            tiocswinsz(fd, &term_size).context("setting term size")?;
        }

        Ok(())
    }
}

/// Switch the controlling terminal to raw mode for the duration of a
/// capture session, returning a guard that restores the saved
/// attributes. The captured subshell's own pty applies all the line
/// discipline, so ours must stop interpreting anything.
pub fn set_capture_flags() -> anyhow::Result<CaptureFlagsGuard> {
    let stdin = io::stdin();

    if !stdin.is_terminal() || !io::stdout().is_terminal() || !io::stderr().is_terminal() {
        // Not attached to a terminal, nothing to switch.
        return Ok(CaptureFlagsGuard { fd: stdin.as_raw_fd(), saved: None });
    }

    let saved = termios::tcgetattr(stdin.as_fd()).context("reading terminal attributes")?;

    let mut raw = saved.clone();
    termios::cfmakeraw(&mut raw);
    termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw)
        .context("switching the terminal to raw mode")?;

    Ok(CaptureFlagsGuard { fd: stdin.as_raw_fd(), saved: Some(saved) })
}

pub struct CaptureFlagsGuard {
    fd: RawFd,
    saved: Option<termios::Termios>,
}

impl std::ops::Drop for CaptureFlagsGuard {
    fn drop(&mut self) {
        if let Some(saved) = &self.saved {
            // Safety: the guarded fd is stdin, which outlives the guard.
            let fd = unsafe { BorrowedFd::borrow_raw(self.fd) };
            if let Err(e) = termios::tcsetattr(fd, SetArg::TCSANOW, saved) {
                error!("error restoring terminal settings: {:?}", e);
            }
        }
    }
}
