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

//! Lookup of the calling user's passwd entry. Only the client needs
//! this: the login shell for terminal capture and the home directory
//! for the bashrc.d integration files.

use std::{env, ffi::CStr, io, path::PathBuf, ptr};

use anyhow::{anyhow, Context};

/// The slice of the passwd entry this tool actually uses.
#[derive(Debug, Clone)]
pub struct Account {
    pub home_dir: PathBuf,
    login_shell: String,
}

impl Account {
    /// The shell terminal capture should spawn: $SHELL when set, the
    /// passwd entry otherwise, /usr/bin/sh as a last resort.
    pub fn shell(&self) -> String {
        if let Ok(shell) = env::var("SHELL") {
            if !shell.is_empty() {
                return shell;
            }
        }
        if !self.login_shell.is_empty() {
            return self.login_shell.clone();
        }
        String::from("/usr/bin/sh")
    }
}

/// Resolve the passwd entry for the effective user, growing the
/// lookup buffer until libc stops asking for more room.
pub fn current() -> anyhow::Result<Account> {
    // Safety: plain ffi, sysconf takes no pointers.
    let hint = unsafe { libc::sysconf(libc::_SC_GETPW_R_SIZE_MAX) };
    let mut buf_len = if hint > 0 { hint as usize } else { 1024 };

    loop {
        let mut buf = vec![0 as libc::c_char; buf_len];
        let mut entry: libc::passwd = unsafe { std::mem::zeroed() };
        let mut found: *mut libc::passwd = ptr::null_mut();

        // Safety: entry and buf are live for the whole call and buf
        // is as large as advertized.
        let errno = unsafe {
            libc::getpwuid_r(
                libc::getuid(),
                &mut entry,
                buf.as_mut_ptr(),
                buf.len(),
                &mut found,
            )
        };

        if errno == libc::ERANGE {
            // The entry didn't fit; come around with more room.
            buf_len *= 2;
            continue;
        }
        if errno != 0 {
            return Err(io::Error::from_raw_os_error(errno))
                .context("looking up the passwd entry");
        }
        if found.is_null() {
            return Err(anyhow!("no passwd entry for the current user"));
        }

        // Safety: a non-null result means the string fields point
        // into buf, which is still alive here.
        let (home_dir, login_shell) =
            unsafe { (cstring_field(entry.pw_dir), cstring_field(entry.pw_shell)) };

        return Ok(Account { home_dir: PathBuf::from(home_dir), login_shell });
    }
}

/// Copy one C-string field out of a passwd entry.
///
/// Safety: the pointer must come from a successful getpwuid_r call,
/// or be null.
unsafe fn cstring_field(field: *const libc::c_char) -> String {
    if field.is_null() {
        return String::new();
    }
    String::from_utf8_lossy(CStr::from_ptr(field).to_bytes()).into_owned()
}
