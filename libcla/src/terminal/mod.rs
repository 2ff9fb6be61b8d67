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

//! Terminal capture: record an interactive shell session into a
//! structured log and read it back as question context.

use std::{
    env, fs,
    io::Write as _,
    os::unix::fs::OpenOptionsExt as _,
    path::PathBuf,
};

use anyhow::Context;
use nix::{
    errno::Errno,
    fcntl::{Flock, FlockArg},
};
use thiserror::Error;
use tracing::info;

pub mod capture;
pub mod parser;

/// The name of the capture log under the state directory.
const CAPTURE_LOG_NAME: &str = "terminal.log";

/// Our slice of `$XDG_STATE_HOME` (default `~/.local/state`).
pub fn state_dir() -> anyhow::Result<PathBuf> {
    let base = match env::var("XDG_STATE_HOME") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let home = env::var("HOME").context("no XDG_STATE_HOME or HOME")?;
            PathBuf::from(home).join(".local").join("state")
        }
    };
    Ok(base.join("command-line-assistant"))
}

/// Where the structured capture log lives.
pub fn capture_log_path() -> anyhow::Result<PathBuf> {
    Ok(state_dir()?.join(CAPTURE_LOG_NAME))
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("the '{name}' lock is already held by pid '{pid}'")]
    Busy { name: String, pid: String },
    #[error("could not set up the '{name}' lock: {reason}")]
    Setup { name: String, reason: String },
}

/// A named advisory lock: a `flock`ed file under the state directory
/// with the holder's pid inside. Used to stop a second capture (or an
/// interactive chat) from racing a running capture session.
pub struct NamedFileLock {
    // Held for the flock; dropping it releases the lock.
    _lock: Flock<fs::File>,
    path: PathBuf,
}

impl NamedFileLock {
    pub fn acquire(name: &str) -> Result<Self, LockError> {
        let setup =
            |e: anyhow::Error| LockError::Setup { name: String::from(name), reason: e.to_string() };

        let dir = state_dir().map_err(setup)?;
        create_private_folder(&dir).map_err(setup)?;

        let path = dir.join(format!("{name}.lock"));
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(&path)
            .context("opening lock file")
            .map_err(setup)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(mut lock) => {
                lock.set_len(0).context("truncating lock file").map_err(setup)?;
                write!(&mut *lock, "{}", std::process::id())
                    .context("recording pid in lock file")
                    .map_err(setup)?;
                lock.flush().context("flushing lock file").map_err(setup)?;
                info!("acquired '{}' lock at {:?}", name, path);
                Ok(NamedFileLock { _lock: lock, path })
            }
            Err((_, Errno::EWOULDBLOCK)) => Err(LockError::Busy {
                name: String::from(name),
                pid: Self::holder_pid(name).unwrap_or_else(|| String::from("unknown")),
            }),
            Err((_, errno)) => Err(setup(anyhow::anyhow!("flock failed: {errno}"))),
        }
    }

    /// Check whether someone currently holds the named lock, without
    /// taking it.
    pub fn is_locked(name: &str) -> bool {
        let path = match state_dir() {
            Ok(dir) => dir.join(format!("{name}.lock")),
            Err(_) => return false,
        };
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(_) => return false,
        };
        match Flock::lock(file, FlockArg::LockSharedNonblock) {
            // We could take the shared lock, so no writer holds it.
            Ok(_) => false,
            Err((_, Errno::EWOULDBLOCK)) => true,
            Err(_) => false,
        }
    }

    /// The pid recorded by the current holder, if readable.
    pub fn holder_pid(name: &str) -> Option<String> {
        let path = state_dir().ok()?.join(format!("{name}.lock"));
        let contents = fs::read_to_string(path).ok()?;
        let pid = contents.trim();
        if pid.is_empty() {
            None
        } else {
            Some(String::from(pid))
        }
    }
}

impl Drop for NamedFileLock {
    fn drop(&mut self) {
        // Best effort; the flock itself dies with the fd.
        let _ = fs::remove_file(&self.path);
    }
}

/// Create the state directory with owner-only permissions.
pub(crate) fn create_private_folder(dir: &std::path::Path) -> anyhow::Result<()> {
    use std::os::unix::fs::DirBuilderExt as _;

    if dir.exists() {
        return Ok(());
    }
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .with_context(|| format!("creating state dir {dir:?}"))?;
    Ok(())
}
