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

//! Shared plumbing for the client commands: dialing the daemon,
//! mapping the wire errors onto exit codes and message templates,
//! and the couple of call sequences every command needs.

use std::{
    io::{self, IsTerminal as _, Read as _},
    path::Path,
};

use cla_protocol::{
    ChatAvailableReply, ChatIdReply, ConnectHeader, ChatRequest, RpcError, RpcResult, UserIdReply,
    UserRequest,
};
use tracing::info;

use crate::{consts, context::ContextError, protocol};

/// A command failure carrying the exit code the process should die
/// with and the message the renderer shows. Raw dependency errors
/// never reach the user.
#[derive(Debug)]
pub struct CommandError {
    pub code: i32,
    pub message: String,
}

impl CommandError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        CommandError { code, message: message.into() }
    }
}

impl From<ContextError> for CommandError {
    fn from(e: ContextError) -> Self {
        CommandError::new(consts::EXIT_DATAERR, e.to_string())
    }
}

/// Map a daemon-side error onto the user-visible template and exit
/// code. `fallback` is the invoking command's own exit code, used for
/// backend failures which aren't tied to one service.
pub fn map_rpc_error(e: RpcError, fallback: i32) -> CommandError {
    match e {
        RpcError::ChatNotFound(m) => CommandError::new(consts::EXIT_CHAT, m),
        RpcError::HistoryNotEnabled(m) | RpcError::HistoryNotAvailable(m) => {
            CommandError::new(consts::EXIT_HISTORY, m)
        }
        RpcError::RequestFailed(m) => {
            info!("backend request failed: {}", m);
            CommandError::new(
                fallback,
                "Uh oh... the assistant could not answer your question. Please try again.",
            )
        }
        RpcError::CertificateError(m) => CommandError::new(consts::EXIT_UNAVAILABLE, m),
        RpcError::PermissionDenied(m)
        | RpcError::IdentityUnavailable(m)
        | RpcError::Internal(m) => CommandError::new(consts::EXIT_SOFTWARE, m),
    }
}

/// One request/reply round trip on a fresh connection. Transport
/// failures come back as `CommandError`; the service verdict is
/// returned as-is for the caller to interpret.
pub fn call<R>(socket: &Path, header: ConnectHeader) -> Result<RpcResult<R>, CommandError>
where
    R: for<'de> serde::Deserialize<'de>,
{
    let mut client = match protocol::Client::dial(socket) {
        Ok(client) => client,
        Err(err) => {
            let not_running = err
                .root_cause()
                .downcast_ref::<io::Error>()
                .map(|ioe| {
                    matches!(
                        ioe.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                    )
                })
                .unwrap_or(false);
            let message = if not_running {
                String::from("could not connect to the daemon, is it running?")
            } else {
                format!("could not connect to the daemon: {err}")
            };
            return Err(CommandError::new(consts::EXIT_UNAVAILABLE, message));
        }
    };
    if let Some(warning) = client.take_warning() {
        eprintln!("cla: warn: {warning}");
    }

    client.write_connect_header(header).map_err(|e| {
        CommandError::new(consts::EXIT_UNAVAILABLE, format!("failed talking to the daemon: {e}"))
    })?;
    client.read_reply().map_err(|e| {
        CommandError::new(consts::EXIT_UNAVAILABLE, format!("failed talking to the daemon: {e}"))
    })
}

/// `call`, with the error arm already mapped.
pub fn request<R>(
    socket: &Path,
    header: ConnectHeader,
    fallback: i32,
) -> Result<R, CommandError>
where
    R: for<'de> serde::Deserialize<'de>,
{
    call(socket, header)?.map_err(|e| map_rpc_error(e, fallback))
}

/// Ask the daemon for our opaque user id.
pub fn fetch_user_id(socket: &Path) -> Result<String, CommandError> {
    let os_user_id = nix::unistd::Uid::current().as_raw();
    let reply: UserIdReply = request(
        socket,
        ConnectHeader::User(UserRequest::GetUserId { os_user_id }),
        consts::EXIT_SOFTWARE,
    )?;
    Ok(reply.user_id)
}

/// Resolve a chat name to an id, creating the chat when the name is
/// not taken yet.
pub fn get_or_create_chat(
    socket: &Path,
    user_id: &str,
    name: &str,
    description: &str,
) -> Result<String, CommandError> {
    let available: ChatAvailableReply = request(
        socket,
        ConnectHeader::Chat(ChatRequest::IsChatAvailable {
            user_id: String::from(user_id),
            name: String::from(name),
        }),
        consts::EXIT_CHAT,
    )?;

    let header = if available.available {
        ConnectHeader::Chat(ChatRequest::GetChatId {
            user_id: String::from(user_id),
            name: String::from(name),
        })
    } else {
        ConnectHeader::Chat(ChatRequest::CreateChat {
            user_id: String::from(user_id),
            name: String::from(name),
            description: String::from(description),
        })
    };

    let reply: ChatIdReply = request(socket, header, consts::EXIT_CHAT)?;
    Ok(reply.chat_id)
}

/// Read piped-in data. When stdin is a tty there is nothing to read.
pub fn read_stdin_if_piped() -> Result<String, CommandError> {
    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(String::new());
    }

    let mut buf = Vec::new();
    stdin.read_to_end(&mut buf).map_err(|e| {
        CommandError::new(consts::EXIT_DATAERR, format!("could not read stdin: {e}"))
    })?;
    Ok(String::from(String::from_utf8_lossy(&buf).trim()))
}
