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

//! The authorization gate. The socket tells us which OS user dialed
//! in; every service method compares that against the user the
//! request claims to act for before touching anything. When in doubt,
//! deny.

use std::{os::unix::net::UnixStream, sync::Arc};

use cla_protocol::RpcError;
use nix::sys::socket;
use tracing::{debug, warn};

use crate::identity::SessionManager;

/// The identity of the process on the other end of a connection,
/// as reported by the kernel.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub uid: u32,
    pub pid: i32,
}

/// Read the peer credentials off an accepted stream. Failure to
/// identify the caller is a denial, not a pass.
pub fn peer_caller(stream: &UnixStream) -> Result<Caller, RpcError> {
    let creds = socket::getsockopt(stream, socket::sockopt::PeerCredentials).map_err(|e| {
        warn!(audit = true, "could not get peer credentials from socket: {}", e);
        RpcError::PermissionDenied(String::from("failed to retrieve caller information"))
    })?;

    Ok(Caller { uid: creds.uid(), pid: creds.pid() })
}

/// Compares request identities against the connection's caller.
#[derive(Clone)]
pub struct Gate {
    identity: Arc<SessionManager>,
    audit: bool,
}

impl Gate {
    pub fn new(identity: Arc<SessionManager>, audit: bool) -> Self {
        Gate { identity, audit }
    }

    pub fn identity(&self) -> &SessionManager {
        &self.identity
    }

    /// For calls parameterized by OS user id: the supplied value must
    /// equal the connection's.
    pub fn authorize_os_user(&self, caller: &Caller, requested: u32) -> Result<(), RpcError> {
        if caller.uid != requested {
            if self.audit {
                warn!(
                    audit = true,
                    caller_uid = caller.uid,
                    requested_uid = requested,
                    "authorization failed: caller OS user id does not match requested OS user id"
                );
            }
            return Err(RpcError::PermissionDenied(String::from(
                "OS user id mismatch: access denied",
            )));
        }

        debug!("OS user authorization successful for uid {}", requested);
        Ok(())
    }

    /// For calls parameterized by internal user id: convert the
    /// connection's OS user id and compare.
    pub fn authorize_user_id(&self, caller: &Caller, requested: &str) -> Result<(), RpcError> {
        let caller_id = self.identity.user_id(caller.uid).map_err(|e| {
            if self.audit {
                warn!(audit = true, "could not verify caller authorization: {}", e);
            }
            RpcError::PermissionDenied(String::from("authorization verification failed"))
        })?;

        if caller_id.to_string() != requested {
            if self.audit {
                warn!(
                    audit = true,
                    caller_uid = caller.uid,
                    requested_user_id = requested,
                    "authorization failed: caller user id does not match requested user id"
                );
            }
            return Err(RpcError::PermissionDenied(String::from(
                "user id mismatch: access denied",
            )));
        }

        debug!("internal user authorization successful for user '{}'", requested);
        Ok(())
    }
}
