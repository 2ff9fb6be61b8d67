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

//! Session identity: a stable, opaque per-user id derived from the
//! machine identity and the OS user id. The id is a name-based
//! (v5) UUID with the machine id as namespace, so it is the same on
//! every invocation on one machine and different everywhere else.

use std::{fs, path::PathBuf, sync::OnceLock};

use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// Where systemd keeps the machine identity.
///
/// See https://www.freedesktop.org/software/systemd/man/latest/machine-id.html
pub const MACHINE_ID_PATH: &str = "/etc/machine-id";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("could not read machine id at {path}: {reason}")]
    Unreadable { path: String, reason: String },
    #[error("machine id at {path} is empty or malformed")]
    Malformed { path: String },
}

/// Derives and memoizes the per-user session identity.
///
/// The machine id file is read at most once per process; after that
/// `user_id` is a pure function of `(machine_id, os_user_id)`.
#[derive(Debug)]
pub struct SessionManager {
    machine_id_path: PathBuf,
    machine_id: OnceLock<Uuid>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self::with_machine_id_path(PathBuf::from(MACHINE_ID_PATH))
    }

    /// Mostly useful for tests, which cannot touch /etc/machine-id.
    pub fn with_machine_id_path(machine_id_path: PathBuf) -> Self {
        SessionManager { machine_id_path, machine_id: OnceLock::new() }
    }

    /// The 128-bit machine identity, parsed from the machine id file.
    pub fn machine_id(&self) -> Result<Uuid, IdentityError> {
        if let Some(id) = self.machine_id.get() {
            return Ok(*id);
        }

        let path = self.machine_id_path.display().to_string();
        let raw = fs::read_to_string(&self.machine_id_path).map_err(|e| {
            error!("machine id file not found at {}", path);
            IdentityError::Unreadable { path: path.clone(), reason: e.to_string() }
        })?;

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            error!("machine id file at {} is empty", path);
            return Err(IdentityError::Malformed { path });
        }

        let id = Uuid::parse_str(trimmed).map_err(|_| {
            error!("machine id file at {} does not contain a 128 bit hex id", path);
            IdentityError::Malformed { path }
        })?;

        Ok(*self.machine_id.get_or_init(|| id))
    }

    /// The opaque user id for the given OS user: uuid5 with the
    /// machine id as namespace and the decimal user id as name.
    pub fn user_id(&self, os_user_id: u32) -> Result<Uuid, IdentityError> {
        let namespace = self.machine_id()?;
        Ok(Uuid::new_v5(&namespace, os_user_id.to_string().as_bytes()))
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    fn manager_with_machine_id(machine_id: &str) -> (tempfile::TempDir, SessionManager) {
        let dir = tempfile::tempdir().expect("creating tmp dir");
        let path = dir.path().join("machine-id");
        let mut f = fs::File::create(&path).expect("creating machine-id");
        writeln!(f, "{}", machine_id).expect("writing machine-id");
        (dir, SessionManager::with_machine_id_path(path))
    }

    #[test]
    fn derives_known_user_id() {
        let (_dir, manager) = manager_with_machine_id("09e28913cb074ed995a239c93b07fd8a");
        let user_id = manager.user_id(1000).expect("deriving user id");
        assert_eq!(user_id.to_string(), "4d465f1c-0507-5dfa-9ea0-e2de1a9e90a5");
    }

    #[test]
    fn stable_across_calls() {
        let (_dir, manager) = manager_with_machine_id("09e28913cb074ed995a239c93b07fd8a");
        assert_eq!(
            manager.user_id(1000).expect("first call"),
            manager.user_id(1000).expect("second call")
        );
    }

    #[test]
    fn differs_across_users() {
        let (_dir, manager) = manager_with_machine_id("09e28913cb074ed995a239c93b07fd8a");
        assert_ne!(
            manager.user_id(1000).expect("user 1000"),
            manager.user_id(1001).expect("user 1001")
        );
    }

    #[test]
    fn differs_across_machines() {
        let (_dir1, m1) = manager_with_machine_id("09e28913cb074ed995a239c93b07fd8a");
        let (_dir2, m2) = manager_with_machine_id("59271b2470c1457da5d3a0122578fbd1");
        assert_ne!(m1.user_id(1000).expect("machine 1"), m2.user_id(1000).expect("machine 2"));
    }

    #[test]
    fn empty_machine_id_errors() {
        let (_dir, manager) = manager_with_machine_id("");
        assert!(matches!(manager.user_id(1000), Err(IdentityError::Malformed { .. })));
    }

    #[test]
    fn garbage_machine_id_errors() {
        let (_dir, manager) = manager_with_machine_id("not-a-hex-id");
        assert!(matches!(manager.machine_id(), Err(IdentityError::Malformed { .. })));
    }

    #[test]
    fn missing_machine_id_errors() {
        let manager = SessionManager::with_machine_id_path(PathBuf::from("/does/not/exist"));
        assert!(matches!(manager.machine_id(), Err(IdentityError::Unreadable { .. })));
    }
}
