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

//! The history service: reading, filtering and clearing recorded
//! interactions, and the write path the client calls after every
//! answered question.

use cla_protocol::{
    HistoryEntry, HistoryListReply, HistoryWrittenReply, RpcError, RpcResult,
};
use tracing::{info, instrument};

use crate::daemon::{
    auth::{Caller, Gate},
    chat::format_timestamp,
    db::{
        models::{HistoryRow, InteractionRow},
        repository::{ChatRepository, HistoryRepository, InteractionRepository},
        QueryError,
    },
};

/// Default message in case a history chat is not available.
const HISTORY_NOT_AVAILABLE_MESSAGE: &str =
    "Looks like no history was found. Try asking something first!";
const HISTORY_NOT_ENABLED_MESSAGE: &str = "Looks like history is not enabled yet. Enable it in \
                                           the configuration file before trying to access history.";

/// Which part of a chat's conversation a read wants.
enum Selection {
    First,
    Last,
    Filtered(String),
}

pub struct HistoryService {
    chats: ChatRepository,
    histories: HistoryRepository,
    interactions: InteractionRepository,
    gate: Gate,
    enabled: bool,
    audit: bool,
}

fn internal(e: QueryError) -> RpcError {
    RpcError::Internal(e.to_string())
}

impl HistoryService {
    pub fn new(
        chats: ChatRepository,
        histories: HistoryRepository,
        interactions: InteractionRepository,
        gate: Gate,
        enabled: bool,
        audit: bool,
    ) -> Self {
        HistoryService { chats, histories, interactions, gate, enabled, audit }
    }

    fn ensure_enabled(&self) -> Result<(), RpcError> {
        if !self.enabled {
            return Err(RpcError::HistoryNotEnabled(String::from(HISTORY_NOT_ENABLED_MESSAGE)));
        }
        Ok(())
    }

    /// Every interaction the user ever recorded, across all chats.
    #[instrument(skip_all)]
    pub fn get_history(&self, caller: &Caller, user_id: &str) -> RpcResult<HistoryListReply> {
        self.gate.authorize_user_id(caller, user_id)?;
        self.ensure_enabled()?;

        info!("getting all history data for user");
        let mut entries = vec![];
        for history in self.histories.select_all_by_user_id(user_id).map_err(internal)? {
            let chat_name = self
                .chats
                .select_by_id(&history.chat_id)
                .map_err(internal)?
                .map(|chat| chat.name)
                .unwrap_or_default();

            for interaction in self.histories.interactions(&history.id).map_err(internal)? {
                entries.push(HistoryEntry {
                    question: interaction.question,
                    response: interaction.response,
                    chat_name: chat_name.clone(),
                    created_at: format_timestamp(interaction.created_at),
                });
            }
        }

        if entries.is_empty() {
            return Err(RpcError::HistoryNotAvailable(String::from(
                HISTORY_NOT_AVAILABLE_MESSAGE,
            )));
        }
        Ok(HistoryListReply { entries })
    }

    #[instrument(skip_all)]
    pub fn get_first_conversation(
        &self,
        caller: &Caller,
        user_id: &str,
        from_chat: &str,
    ) -> RpcResult<HistoryListReply> {
        info!("getting the first history log in chat '{}'", from_chat);
        self.conversation(caller, user_id, from_chat, Selection::First)
    }

    #[instrument(skip_all)]
    pub fn get_last_conversation(
        &self,
        caller: &Caller,
        user_id: &str,
        from_chat: &str,
    ) -> RpcResult<HistoryListReply> {
        info!("getting the most recent history log in chat '{}'", from_chat);
        self.conversation(caller, user_id, from_chat, Selection::Last)
    }

    #[instrument(skip_all)]
    pub fn get_filtered_conversation(
        &self,
        caller: &Caller,
        user_id: &str,
        keyword: &str,
        from_chat: &str,
    ) -> RpcResult<HistoryListReply> {
        info!("filtering history with a keyword in chat '{}'", from_chat);
        self.conversation(caller, user_id, from_chat, Selection::Filtered(String::from(keyword)))
    }

    fn conversation(
        &self,
        caller: &Caller,
        user_id: &str,
        from_chat: &str,
        selection: Selection,
    ) -> RpcResult<HistoryListReply> {
        self.gate.authorize_user_id(caller, user_id)?;
        self.ensure_enabled()?;

        let chat = self
            .chats
            .select_by_name(user_id, from_chat)
            .map_err(internal)?
            .ok_or_else(|| {
                RpcError::HistoryNotAvailable(String::from(HISTORY_NOT_AVAILABLE_MESSAGE))
            })?;
        let history = self
            .histories
            .select_by_chat_id(&chat.id)
            .map_err(internal)?
            .ok_or_else(|| {
                RpcError::HistoryNotAvailable(String::from(HISTORY_NOT_AVAILABLE_MESSAGE))
            })?;

        let mut interactions = self.histories.interactions(&history.id).map_err(internal)?;
        match selection {
            Selection::First => interactions.truncate(1),
            Selection::Last => {
                if interactions.len() > 1 {
                    interactions.drain(..interactions.len() - 1);
                }
            }
            Selection::Filtered(keyword) => interactions.retain(|interaction| {
                interaction.question.contains(&keyword) || interaction.response.contains(&keyword)
            }),
        }

        let entries = interactions
            .into_iter()
            .map(|interaction| HistoryEntry {
                question: interaction.question,
                response: interaction.response,
                chat_name: chat.name.clone(),
                created_at: format_timestamp(interaction.created_at),
            })
            .collect();
        Ok(HistoryListReply { entries })
    }

    /// Append one exchange to the chat's history, creating the
    /// history row on the chat's first write.
    #[instrument(skip_all)]
    pub fn write_history(
        &self,
        caller: &Caller,
        chat_id: &str,
        user_id: &str,
        question: &str,
        response: &str,
    ) -> RpcResult<HistoryWrittenReply> {
        self.gate.authorize_user_id(caller, user_id)?;
        self.ensure_enabled()?;

        let history_id = match self.histories.select_by_chat_id(chat_id).map_err(internal)? {
            Some(history) => history.id,
            None => self
                .histories
                .insert(HistoryRow::new(user_id, chat_id))
                .map_err(internal)?,
        };

        self.interactions
            .insert(InteractionRow::new(&history_id, question, response))
            .map_err(internal)?;

        if self.audit {
            info!(audit = true, chat_id = %chat_id, "wrote a new entry to the user history");
        }
        Ok(HistoryWrittenReply {})
    }

    #[instrument(skip_all)]
    pub fn clear_all_history(
        &self,
        caller: &Caller,
        user_id: &str,
    ) -> RpcResult<HistoryWrittenReply> {
        self.gate.authorize_user_id(caller, user_id)?;
        self.ensure_enabled()?;

        let cleared = self.histories.soft_delete_all(user_id).map_err(internal)?;
        if self.audit {
            info!(audit = true, cleared, "clearing history entries for user");
        }
        Ok(HistoryWrittenReply {})
    }

    #[instrument(skip_all)]
    pub fn clear_history(
        &self,
        caller: &Caller,
        user_id: &str,
        from_chat: &str,
    ) -> RpcResult<HistoryWrittenReply> {
        self.gate.authorize_user_id(caller, user_id)?;
        self.ensure_enabled()?;

        self.chats.select_by_name(user_id, from_chat).map_err(internal)?.ok_or_else(|| {
            RpcError::ChatNotFound(format!(
                "Couldn't find chat with name '{from_chat}'. Check the name requested and try again."
            ))
        })?;

        let cleared = self.histories.soft_delete_by_chat(user_id, from_chat).map_err(internal)?;
        if self.audit {
            info!(audit = true, from_chat, cleared, "clearing history entries for user");
        }
        Ok(HistoryWrittenReply {})
    }
}

#[cfg(test)]
mod test {
    use std::{io::Write as _, sync::Arc};

    use super::*;
    use crate::{
        daemon::db::{models::ChatRow, test_support::in_memory},
        identity::SessionManager,
    };

    const OS_USER: u32 = 1000;

    struct Fixture {
        service: HistoryService,
        chats: ChatRepository,
        user_id: String,
        caller: Caller,
        _machine_id_dir: tempfile::TempDir,
    }

    fn fixture(enabled: bool) -> Fixture {
        let dir = tempfile::tempdir().expect("creating tmp dir");
        let path = dir.path().join("machine-id");
        let mut f = std::fs::File::create(&path).expect("creating machine-id");
        writeln!(f, "09e28913cb074ed995a239c93b07fd8a").expect("writing machine-id");

        let identity = Arc::new(SessionManager::with_machine_id_path(path));
        let user_id = identity.user_id(OS_USER).expect("deriving user id").to_string();
        let gate = Gate::new(identity, false);

        let sessions = in_memory();
        let chats = ChatRepository::new(Arc::clone(&sessions));
        Fixture {
            service: HistoryService::new(
                chats.clone(),
                HistoryRepository::new(Arc::clone(&sessions)),
                InteractionRepository::new(sessions),
                gate,
                enabled,
                false,
            ),
            chats,
            user_id,
            caller: Caller { uid: OS_USER, pid: 42 },
            _machine_id_dir: dir,
        }
    }

    fn seeded_chat(fx: &Fixture, name: &str) -> String {
        fx.chats.insert(ChatRow::new(&fx.user_id, name, "")).expect("seeding a chat")
    }

    #[test]
    fn write_then_read_round_trips_exactly() {
        let fx = fixture(true);
        let chat_id = seeded_chat(&fx, "default");

        fx.service
            .write_history(&fx.caller, &chat_id, &fx.user_id, "list files", "Use ls.")
            .expect("writing history");

        let all = fx.service.get_history(&fx.caller, &fx.user_id).expect("reading history");
        assert_eq!(all.entries.len(), 1);
        assert_eq!(all.entries[0].question, "list files");
        assert_eq!(all.entries[0].response, "Use ls.");
        assert_eq!(all.entries[0].chat_name, "default");
    }

    #[test]
    fn disabled_history_rejects_reads_and_writes() {
        let fx = fixture(false);
        let chat_id = seeded_chat(&fx, "default");

        let err = fx
            .service
            .write_history(&fx.caller, &chat_id, &fx.user_id, "q", "r")
            .expect_err("write to fail");
        assert!(matches!(err, RpcError::HistoryNotEnabled(_)));

        let err =
            fx.service.get_history(&fx.caller, &fx.user_id).expect_err("read to fail");
        assert!(matches!(err, RpcError::HistoryNotEnabled(_)));
    }

    #[test]
    fn no_records_is_not_available() {
        let fx = fixture(true);

        let err =
            fx.service.get_history(&fx.caller, &fx.user_id).expect_err("read to fail");
        assert!(matches!(err, RpcError::HistoryNotAvailable(_)));
    }

    #[test]
    fn first_and_last_slice_one_each() {
        let fx = fixture(true);
        let chat_id = seeded_chat(&fx, "default");

        for (question, response) in [("q1", "r1"), ("q2", "r2"), ("q3", "r3")] {
            fx.service
                .write_history(&fx.caller, &chat_id, &fx.user_id, question, response)
                .expect("writing history");
        }

        let first = fx
            .service
            .get_first_conversation(&fx.caller, &fx.user_id, "default")
            .expect("first conversation");
        assert_eq!(first.entries.len(), 1);
        assert_eq!(first.entries[0].question, "q1");

        let last = fx
            .service
            .get_last_conversation(&fx.caller, &fx.user_id, "default")
            .expect("last conversation");
        assert_eq!(last.entries.len(), 1);
        assert_eq!(last.entries[0].question, "q3");
    }

    #[test]
    fn filter_matches_question_or_response_substring() {
        let fx = fixture(true);
        let chat_id = seeded_chat(&fx, "default");

        fx.service
            .write_history(&fx.caller, &chat_id, &fx.user_id, "mount the disk", "use mount")
            .expect("writing history");
        fx.service
            .write_history(&fx.caller, &chat_id, &fx.user_id, "list files", "try lsblk")
            .expect("writing history");

        let matched = fx
            .service
            .get_filtered_conversation(&fx.caller, &fx.user_id, "mount", "default")
            .expect("filtering");
        assert_eq!(matched.entries.len(), 1);
        assert_eq!(matched.entries[0].question, "mount the disk");

        // matches in the response count too
        let matched = fx
            .service
            .get_filtered_conversation(&fx.caller, &fx.user_id, "lsblk", "default")
            .expect("filtering");
        assert_eq!(matched.entries.len(), 1);
        assert_eq!(matched.entries[0].question, "list files");
    }

    #[test]
    fn clearing_hides_recorded_interactions() {
        let fx = fixture(true);
        let chat_id = seeded_chat(&fx, "default");

        fx.service
            .write_history(&fx.caller, &chat_id, &fx.user_id, "q", "r")
            .expect("writing history");
        fx.service.clear_all_history(&fx.caller, &fx.user_id).expect("clearing");

        let err =
            fx.service.get_history(&fx.caller, &fx.user_id).expect_err("read to fail");
        assert!(matches!(err, RpcError::HistoryNotAvailable(_)));
    }

    #[test]
    fn clearing_an_unknown_chat_is_chat_not_found() {
        let fx = fixture(true);

        let err = fx
            .service
            .clear_history(&fx.caller, &fx.user_id, "missing")
            .expect_err("clear to fail");
        assert!(matches!(err, RpcError::ChatNotFound(_)));
    }

    #[test]
    fn mismatched_caller_is_denied() {
        let fx = fixture(true);
        let chat_id = seeded_chat(&fx, "default");

        let other = Caller { uid: OS_USER + 1, pid: 43 };
        let err = fx
            .service
            .write_history(&other, &chat_id, &fx.user_id, "q", "r")
            .expect_err("write to be denied");
        assert!(matches!(err, RpcError::PermissionDenied(_)));

        // the denied write left nothing behind
        let err =
            fx.service.get_history(&fx.caller, &fx.user_id).expect_err("read to fail");
        assert!(matches!(err, RpcError::HistoryNotAvailable(_)));
    }
}
