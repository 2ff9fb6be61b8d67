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

use std::fmt;

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The header used to advertize the daemon version.
///
/// This header gets written by the daemon to every stream as
/// soon as it is opened, which allows the client to compare
/// version strings for protocol negotiation (basically just
/// deciding if the user ought to be warned about mismatched
/// versions).
#[derive(Serialize, Deserialize, Debug)]
pub struct VersionHeader {
    pub version: String,
}

/// The blob of metadata that a client transmits when it
/// first connects.
///
/// The daemon publishes three logical services on the same socket,
/// so the header is an enum with one arm per service. Every request
/// carries the user identity it claims to act for; the daemon checks
/// that claim against the socket peer credentials before doing
/// anything else.
#[derive(Serialize, Deserialize, Debug)]
pub enum ConnectHeader {
    /// Session identity queries. Responds with `RpcResult<UserIdReply>`.
    User(UserRequest),
    /// Chat management and question submission.
    Chat(ChatRequest),
    /// Reading and clearing the conversation history.
    History(HistoryRequest),
}

/// Requests served by the user service.
#[derive(Serialize, Deserialize, Debug)]
pub enum UserRequest {
    /// Translate an OS user id into the opaque machine-scoped
    /// user id every other call is keyed on.
    GetUserId {
        #[serde(default)]
        os_user_id: u32,
    },
}

/// Requests served by the chat service.
#[derive(Serialize, Deserialize, Debug)]
pub enum ChatRequest {
    /// List every live chat owned by the user, oldest first.
    /// Responds with `RpcResult<ChatListReply>`.
    GetAllChatFromUser {
        #[serde(default)]
        user_id: String,
    },
    /// Look up the id of the live chat with the given name.
    /// Responds with `RpcResult<ChatIdReply>`.
    GetChatId {
        #[serde(default)]
        user_id: String,
        #[serde(default)]
        name: String,
    },
    /// Boolean form of `GetChatId`. Responds with
    /// `RpcResult<ChatAvailableReply>`.
    IsChatAvailable {
        #[serde(default)]
        user_id: String,
        #[serde(default)]
        name: String,
    },
    /// Fetch the id of the user's "latest" chat. Note that for
    /// compatibility this is the earliest live chat, not the
    /// most recently created one.
    GetLatestChatFromUser {
        #[serde(default)]
        user_id: String,
    },
    /// Insert a new chat and return its id. Callers are expected
    /// to check `IsChatAvailable` first; this method does not
    /// enforce name uniqueness on its own.
    CreateChat {
        #[serde(default)]
        user_id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        description: String,
    },
    /// Soft-delete the named chat. Responds with
    /// `RpcResult<ChatDeletedReply>`.
    DeleteChatForUser {
        #[serde(default)]
        user_id: String,
        #[serde(default)]
        name: String,
    },
    /// Soft-delete every chat the user owns.
    DeleteAllChatForUser {
        #[serde(default)]
        user_id: String,
    },
    /// Submit a question to the inference backend and return the
    /// answer. Persistence of the exchange is a separate
    /// `WriteHistory` call made by the client.
    AskQuestion {
        #[serde(default)]
        user_id: String,
        #[serde(default)]
        question: Question,
    },
}

/// Requests served by the history service.
#[derive(Serialize, Deserialize, Debug)]
pub enum HistoryRequest {
    /// Every interaction the user has recorded, across all chats,
    /// oldest first. Responds with `RpcResult<HistoryListReply>`.
    GetHistory {
        #[serde(default)]
        user_id: String,
    },
    /// The first interaction recorded in the named chat.
    GetFirstConversation {
        #[serde(default)]
        user_id: String,
        #[serde(default)]
        from_chat: String,
    },
    /// The most recent interaction recorded in the named chat.
    GetLastConversation {
        #[serde(default)]
        user_id: String,
        #[serde(default)]
        from_chat: String,
    },
    /// Interactions in the named chat whose question or response
    /// contains the keyword as a substring.
    GetFilteredConversation {
        #[serde(default)]
        user_id: String,
        #[serde(default)]
        keyword: String,
        #[serde(default)]
        from_chat: String,
    },
    /// Append one question/response exchange to the history of the
    /// given chat, creating the history row if this is the chat's
    /// first write.
    WriteHistory {
        #[serde(default)]
        chat_id: String,
        #[serde(default)]
        user_id: String,
        #[serde(default)]
        question: String,
        #[serde(default)]
        response: String,
    },
    /// Soft-delete the user's entire history.
    ClearAllHistory {
        #[serde(default)]
        user_id: String,
    },
    /// Soft-delete the history of the named chat.
    ClearHistory {
        #[serde(default)]
        user_id: String,
        #[serde(default)]
        from_chat: String,
    },
}

/// A question on its way to the inference backend, together with
/// all the context the client gathered for it.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct Question {
    /// The fully assembled prompt text.
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub stdin: StdinInput,
    #[serde(default)]
    pub attachment: AttachmentInput,
    #[serde(default)]
    pub terminal: TerminalContext,
    #[serde(default)]
    pub systeminfo: SystemInfo,
}

/// Data piped into the client on stdin, if any.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct StdinInput {
    #[serde(default)]
    pub stdin: String,
}

/// A file attachment supplied with `-a`.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct AttachmentInput {
    #[serde(default)]
    pub contents: String,
    #[serde(default)]
    pub mimetype: String,
}

/// Captured terminal output requested with `-w`.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct TerminalContext {
    #[serde(default)]
    pub output: String,
}

/// A thumbnail of the machine the question was asked on.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct SystemInfo {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub id: String,
}

/// The backend's answer to a `Question`.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct Response {
    #[serde(default)]
    pub message: String,
}

/// Reply to `UserRequest::GetUserId`.
#[derive(Serialize, Deserialize, Debug)]
pub struct UserIdReply {
    /// Lowercase hex-dashed rendering of the opaque user id.
    #[serde(default)]
    pub user_id: String,
}

/// One chat row as the client sees it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChatEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// Reply to `ChatRequest::GetAllChatFromUser`.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ChatListReply {
    #[serde(default)]
    pub chats: Vec<ChatEntry>,
}

/// Reply to `GetChatId`, `GetLatestChatFromUser` and `CreateChat`.
#[derive(Serialize, Deserialize, Debug)]
pub struct ChatIdReply {
    #[serde(default)]
    pub chat_id: String,
}

/// Reply to `ChatRequest::IsChatAvailable`.
#[derive(Serialize, Deserialize, Debug)]
pub struct ChatAvailableReply {
    #[serde(default)]
    pub available: bool,
}

/// Reply to the chat deletion requests.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ChatDeletedReply {}

/// One recorded question/response exchange.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HistoryEntry {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub chat_name: String,
    #[serde(default)]
    pub created_at: String,
}

/// Reply to the history read requests.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct HistoryListReply {
    #[serde(default)]
    pub entries: Vec<HistoryEntry>,
}

/// Reply to `WriteHistory` and the clear requests.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct HistoryWrittenReply {}

/// The daemon-side failure taxonomy, serialized verbatim back to the
/// client. The client maps each kind onto one of its user-visible
/// message templates and exit codes; none of these strings comes from
/// a dependency's error text.
#[derive(Serialize, Deserialize, Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The caller's identity did not match the user the request
    /// claimed to act for, or the identity could not be determined.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The machine identity file is missing or malformed, so the
    /// daemon cannot serve identity calls.
    #[error("machine identity unavailable: {0}")]
    IdentityUnavailable(String),
    /// No live chat matched the request.
    #[error("{0}")]
    ChatNotFound(String),
    /// History persistence is switched off in the daemon config.
    #[error("{0}")]
    HistoryNotEnabled(String),
    /// History is enabled but the user has no recorded interactions.
    #[error("{0}")]
    HistoryNotAvailable(String),
    /// The inference backend rejected or mangled the request.
    #[error("request to the inference backend failed: {0}")]
    RequestFailed(String),
    /// The configured mutual-TLS material could not be loaded.
    #[error("certificate error: {0}")]
    CertificateError(String),
    /// Storage engine failure or any other daemon-internal problem.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Every reply on the wire is one of these: the service result, or a
/// typed error the client knows how to present.
pub type RpcResult<T> = Result<T, RpcError>;

impl fmt::Display for ConnectHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectHeader::User(_) => write!(f, "user"),
            ConnectHeader::Chat(_) => write!(f, "chat"),
            ConnectHeader::History(_) => write!(f, "history"),
        }
    }
}
