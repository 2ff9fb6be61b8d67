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

//! The chat service: chat lifecycle plus the central question/answer
//! operation. Persistence of exchanges is the history service's job;
//! `ask_question` is purely request/response.

use chrono::NaiveDateTime;
use cla_protocol::{
    ChatAvailableReply, ChatDeletedReply, ChatEntry, ChatIdReply, ChatListReply, Question,
    Response, RpcError, RpcResult,
};
use tracing::{info, instrument};

use crate::daemon::{
    auth::{Caller, Gate},
    db::{models::ChatRow, repository::ChatRepository, QueryError},
    http::{Backend, HttpError},
};

pub struct ChatService {
    repo: ChatRepository,
    backend: Backend,
    gate: Gate,
    audit: bool,
}

fn internal(e: QueryError) -> RpcError {
    RpcError::Internal(e.to_string())
}

pub(crate) fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn chat_entry(row: ChatRow) -> ChatEntry {
    ChatEntry {
        id: row.id,
        name: row.name,
        description: row.description.unwrap_or_default(),
        created_at: format_timestamp(row.created_at),
        updated_at: format_timestamp(row.updated_at),
    }
}

impl ChatService {
    pub fn new(repo: ChatRepository, backend: Backend, gate: Gate, audit: bool) -> Self {
        ChatService { repo, backend, gate, audit }
    }

    #[instrument(skip_all)]
    pub fn get_all_chat_from_user(
        &self,
        caller: &Caller,
        user_id: &str,
    ) -> RpcResult<ChatListReply> {
        self.gate.authorize_user_id(caller, user_id)?;

        let rows = self.repo.select_all_by_user_id(user_id).map_err(internal)?;
        Ok(ChatListReply { chats: rows.into_iter().map(chat_entry).collect() })
    }

    #[instrument(skip_all)]
    pub fn get_chat_id(&self, caller: &Caller, user_id: &str, name: &str) -> RpcResult<ChatIdReply> {
        self.gate.authorize_user_id(caller, user_id)?;

        let chat = self.repo.select_by_name(user_id, name).map_err(internal)?.ok_or_else(|| {
            RpcError::ChatNotFound(format!(
                "No chat found with name '{name}'. Please, make sure that this chat exist first."
            ))
        })?;

        info!("found existing chat with id '{}' and name '{}'", chat.id, name);
        Ok(ChatIdReply { chat_id: chat.id })
    }

    #[instrument(skip_all)]
    pub fn is_chat_available(
        &self,
        caller: &Caller,
        user_id: &str,
        name: &str,
    ) -> RpcResult<ChatAvailableReply> {
        self.gate.authorize_user_id(caller, user_id)?;

        let available = self.repo.select_by_name(user_id, name).map_err(internal)?.is_some();
        info!("chat session with name '{}' {}", name, if available { "found" } else { "not found" });
        Ok(ChatAvailableReply { available })
    }

    /// The "latest" chat, which for compatibility is the earliest
    /// live one.
    #[instrument(skip_all)]
    pub fn get_latest_chat_from_user(
        &self,
        caller: &Caller,
        user_id: &str,
    ) -> RpcResult<ChatIdReply> {
        self.gate.authorize_user_id(caller, user_id)?;

        let chat = self
            .repo
            .select_latest(user_id)
            .map_err(internal)?
            .ok_or_else(|| RpcError::ChatNotFound(String::from("No chat found for user.")))?;
        Ok(ChatIdReply { chat_id: chat.id })
    }

    /// Insert a new chat. Name uniqueness among live chats is the
    /// caller's job via `is_chat_available`.
    #[instrument(skip_all)]
    pub fn create_chat(
        &self,
        caller: &Caller,
        user_id: &str,
        name: &str,
        description: &str,
    ) -> RpcResult<ChatIdReply> {
        self.gate.authorize_user_id(caller, user_id)?;

        let chat_id =
            self.repo.insert(ChatRow::new(user_id, name, description)).map_err(internal)?;
        if self.audit {
            info!(audit = true, chat_id = %chat_id, chat_name = name, "new chat session created for user");
        }
        Ok(ChatIdReply { chat_id })
    }

    #[instrument(skip_all)]
    pub fn delete_chat_for_user(
        &self,
        caller: &Caller,
        user_id: &str,
        name: &str,
    ) -> RpcResult<ChatDeletedReply> {
        self.gate.authorize_user_id(caller, user_id)?;

        let chat = self.repo.select_by_name(user_id, name).map_err(internal)?.ok_or_else(|| {
            info!("couldn't find chat with name '{}' for deletion", name);
            RpcError::ChatNotFound(format!(
                "Couldn't find chat with name '{name}'. Check the name requested and try again."
            ))
        })?;

        if self.audit {
            info!(audit = true, chat_id = %chat.id, "deleting chat for user");
        }
        self.repo.soft_delete(&chat.id).map_err(internal)?;
        Ok(ChatDeletedReply {})
    }

    #[instrument(skip_all)]
    pub fn delete_all_chat_for_user(
        &self,
        caller: &Caller,
        user_id: &str,
    ) -> RpcResult<ChatDeletedReply> {
        self.gate.authorize_user_id(caller, user_id)?;

        let all_chats = self.repo.select_all_by_user_id(user_id).map_err(internal)?;
        if all_chats.is_empty() {
            return Err(RpcError::ChatNotFound(String::from("No chat found to delete.")));
        }

        for chat in all_chats {
            if self.audit {
                info!(audit = true, chat_id = %chat.id, "deleting chat for user");
            }
            self.repo.soft_delete(&chat.id).map_err(internal)?;
        }
        Ok(ChatDeletedReply {})
    }

    /// Forward the question to the inference backend and hand the
    /// answer back. No rows are read or written here.
    #[instrument(skip_all)]
    pub fn ask_question(
        &self,
        caller: &Caller,
        user_id: &str,
        question: &Question,
    ) -> RpcResult<Response> {
        self.gate.authorize_user_id(caller, user_id)?;

        if self.audit {
            info!(audit = true, user_id = %user_id, "submitting question from user");
        }

        let message = self.backend.submit(question).map_err(|e| match e {
            HttpError::RequestFailed(msg) => RpcError::RequestFailed(msg),
            HttpError::Certificate(msg) => RpcError::CertificateError(msg),
        })?;

        Ok(Response { message })
    }
}

#[cfg(test)]
mod test {
    use std::{io::Write as _, sync::Arc};

    use super::*;
    use crate::{
        config::BackendConfig,
        daemon::{auth::Gate, db::test_support::in_memory},
        identity::SessionManager,
    };

    const OS_USER: u32 = 1000;

    struct Fixture {
        service: ChatService,
        user_id: String,
        caller: Caller,
        _machine_id_dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("creating tmp dir");
        let path = dir.path().join("machine-id");
        let mut f = std::fs::File::create(&path).expect("creating machine-id");
        writeln!(f, "09e28913cb074ed995a239c93b07fd8a").expect("writing machine-id");

        let identity = Arc::new(SessionManager::with_machine_id_path(path));
        let user_id = identity.user_id(OS_USER).expect("deriving user id").to_string();
        let gate = Gate::new(identity, false);

        Fixture {
            service: ChatService::new(
                ChatRepository::new(in_memory()),
                Backend::new(BackendConfig::default()),
                gate,
                false,
            ),
            user_id,
            caller: Caller { uid: OS_USER, pid: 42 },
            _machine_id_dir: dir,
        }
    }

    #[test]
    fn create_then_look_up_by_name() {
        let fx = fixture();

        let created = fx
            .service
            .create_chat(&fx.caller, &fx.user_id, "default", "a chat")
            .expect("creating a chat");

        let found =
            fx.service.get_chat_id(&fx.caller, &fx.user_id, "default").expect("looking up");
        assert_eq!(found.chat_id, created.chat_id);

        let available = fx
            .service
            .is_chat_available(&fx.caller, &fx.user_id, "default")
            .expect("checking availability");
        assert!(available.available);
    }

    #[test]
    fn missing_chat_is_chat_not_found() {
        let fx = fixture();

        let err = fx
            .service
            .get_chat_id(&fx.caller, &fx.user_id, "missing")
            .expect_err("lookup to fail");
        assert!(matches!(err, RpcError::ChatNotFound(_)));

        let err = fx
            .service
            .delete_chat_for_user(&fx.caller, &fx.user_id, "missing")
            .expect_err("deletion to fail");
        assert!(matches!(err, RpcError::ChatNotFound(_)));

        let err = fx
            .service
            .delete_all_chat_for_user(&fx.caller, &fx.user_id)
            .expect_err("bulk deletion to fail");
        assert!(matches!(err, RpcError::ChatNotFound(_)));
    }

    #[test]
    fn deletion_frees_the_name_and_repeats_fail() {
        let fx = fixture();

        fx.service.create_chat(&fx.caller, &fx.user_id, "a", "").expect("creating");
        fx.service.delete_chat_for_user(&fx.caller, &fx.user_id, "a").expect("deleting");

        let available = fx
            .service
            .is_chat_available(&fx.caller, &fx.user_id, "a")
            .expect("checking availability");
        assert!(!available.available);

        let err = fx
            .service
            .delete_chat_for_user(&fx.caller, &fx.user_id, "a")
            .expect_err("second deletion to fail");
        assert!(matches!(err, RpcError::ChatNotFound(_)));

        // the name is free again
        fx.service.create_chat(&fx.caller, &fx.user_id, "a", "").expect("recreating");
    }

    #[test]
    fn mismatched_caller_is_denied_before_any_row_exists() {
        let fx = fixture();

        let other = Caller { uid: OS_USER + 1, pid: 43 };
        let err = fx
            .service
            .create_chat(&other, &fx.user_id, "default", "")
            .expect_err("creation to be denied");
        assert!(matches!(err, RpcError::PermissionDenied(_)));

        // nothing was written on behalf of the denied caller
        let all = fx
            .service
            .get_all_chat_from_user(&fx.caller, &fx.user_id)
            .expect("listing as the real user");
        assert!(all.chats.is_empty());
    }

    #[test]
    fn latest_chat_is_the_earliest_live_one() {
        let fx = fixture();

        let err = fx
            .service
            .get_latest_chat_from_user(&fx.caller, &fx.user_id)
            .expect_err("no chats yet");
        assert!(matches!(err, RpcError::ChatNotFound(_)));

        let first =
            fx.service.create_chat(&fx.caller, &fx.user_id, "first", "").expect("creating");
        fx.service.create_chat(&fx.caller, &fx.user_id, "second", "").expect("creating");

        let latest = fx
            .service
            .get_latest_chat_from_user(&fx.caller, &fx.user_id)
            .expect("fetching the latest chat");
        assert_eq!(latest.chat_id, first.chat_id);
    }
}
