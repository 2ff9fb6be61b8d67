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

//! The user service: the one place the opaque user id is minted.

use cla_protocol::{RpcError, RpcResult, UserIdReply};
use tracing::debug;

use crate::daemon::auth::{Caller, Gate};

pub struct UserService {
    gate: Gate,
}

impl UserService {
    pub fn new(gate: Gate) -> Self {
        UserService { gate }
    }

    /// Translate an OS user id into the machine-scoped opaque id.
    /// Callers may only ask about themselves.
    pub fn get_user_id(&self, caller: &Caller, os_user_id: u32) -> RpcResult<UserIdReply> {
        self.gate.authorize_os_user(caller, os_user_id)?;

        let user_id = self
            .gate
            .identity()
            .user_id(os_user_id)
            .map_err(|e| RpcError::IdentityUnavailable(e.to_string()))?;

        debug!("resolved user id for uid {}", os_user_id);
        Ok(UserIdReply { user_id: user_id.to_string() })
    }
}
