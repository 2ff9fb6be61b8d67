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

//! One repository per entity. Every call runs in its own scoped
//! transactional session, every read goes through a `live_*` helper
//! so the soft-delete filter cannot be forgotten, and rows come back
//! as `Option`/`Vec` ordered by creation time ascending.

use std::sync::Arc;

use chrono::NaiveDateTime;
use diesel::{dsl, prelude::*};

use super::{
    models::{ChatRow, HistoryRow, InteractionRow},
    schema::{chats, histories, interactions},
    QueryError, SessionFactory,
};

fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

fn live_chats() -> dsl::Filter<chats::table, dsl::IsNull<chats::deleted_at>> {
    chats::table.filter(chats::deleted_at.is_null())
}

fn live_histories() -> dsl::Filter<histories::table, dsl::IsNull<histories::deleted_at>> {
    histories::table.filter(histories::deleted_at.is_null())
}

fn live_interactions() -> dsl::Filter<interactions::table, dsl::IsNull<interactions::deleted_at>>
{
    interactions::table.filter(interactions::deleted_at.is_null())
}

#[derive(Clone)]
pub struct ChatRepository {
    sessions: Arc<SessionFactory>,
}

impl ChatRepository {
    pub fn new(sessions: Arc<SessionFactory>) -> Self {
        ChatRepository { sessions }
    }

    /// Insert a chat row, returning its id.
    pub fn insert(&self, row: ChatRow) -> Result<String, QueryError> {
        let id = row.id.clone();
        self.sessions.with_session(|conn| {
            diesel::insert_into(chats::table).values(&row).execute(conn)
        })?;
        Ok(id)
    }

    pub fn select_by_id(&self, id: &str) -> Result<Option<ChatRow>, QueryError> {
        self.sessions.with_session(|conn| {
            live_chats()
                .filter(chats::id.eq(id))
                .select(ChatRow::as_select())
                .first(conn)
                .optional()
        })
    }

    pub fn select_by_name(&self, user_id: &str, name: &str) -> Result<Option<ChatRow>, QueryError> {
        self.sessions.with_session(|conn| {
            live_chats()
                .filter(chats::user_id.eq(user_id))
                .filter(chats::name.eq(name))
                .select(ChatRow::as_select())
                .first(conn)
                .optional()
        })
    }

    pub fn select_all_by_user_id(&self, user_id: &str) -> Result<Vec<ChatRow>, QueryError> {
        self.sessions.with_session(|conn| {
            live_chats()
                .filter(chats::user_id.eq(user_id))
                .order(chats::created_at.asc())
                .select(ChatRow::as_select())
                .load(conn)
        })
    }

    /// The user's "latest" chat. Orders ascending and takes the first
    /// row, so this is really the earliest live chat. The name/behavior
    /// mismatch is historical and callers depend on it.
    pub fn select_latest(&self, user_id: &str) -> Result<Option<ChatRow>, QueryError> {
        self.sessions.with_session(|conn| {
            live_chats()
                .filter(chats::user_id.eq(user_id))
                .order(chats::created_at.asc())
                .select(ChatRow::as_select())
                .first(conn)
                .optional()
        })
    }

    /// Soft-delete by id. Returns the number of rows touched.
    pub fn soft_delete(&self, id: &str) -> Result<usize, QueryError> {
        self.sessions.with_session(|conn| {
            diesel::update(chats::table.filter(chats::id.eq(id)))
                .set(chats::deleted_at.eq(Some(now())))
                .execute(conn)
        })
    }
}

#[derive(Clone)]
pub struct HistoryRepository {
    sessions: Arc<SessionFactory>,
}

impl HistoryRepository {
    pub fn new(sessions: Arc<SessionFactory>) -> Self {
        HistoryRepository { sessions }
    }

    pub fn insert(&self, row: HistoryRow) -> Result<String, QueryError> {
        let id = row.id.clone();
        self.sessions.with_session(|conn| {
            diesel::insert_into(histories::table).values(&row).execute(conn)
        })?;
        Ok(id)
    }

    pub fn select_by_chat_id(&self, chat_id: &str) -> Result<Option<HistoryRow>, QueryError> {
        self.sessions.with_session(|conn| {
            live_histories()
                .filter(histories::chat_id.eq(chat_id))
                .select(HistoryRow::as_select())
                .first(conn)
                .optional()
        })
    }

    pub fn select_all_by_user_id(&self, user_id: &str) -> Result<Vec<HistoryRow>, QueryError> {
        self.sessions.with_session(|conn| {
            live_histories()
                .filter(histories::user_id.eq(user_id))
                .order(histories::created_at.asc())
                .select(HistoryRow::as_select())
                .load(conn)
        })
    }

    /// The interactions recorded under one history row, oldest first.
    pub fn interactions(&self, history_id: &str) -> Result<Vec<InteractionRow>, QueryError> {
        self.sessions.with_session(|conn| {
            live_interactions()
                .filter(interactions::history_id.eq(history_id))
                .order(interactions::created_at.asc())
                .select(InteractionRow::as_select())
                .load(conn)
        })
    }

    /// Soft-delete every history row the user owns.
    pub fn soft_delete_all(&self, user_id: &str) -> Result<usize, QueryError> {
        self.sessions.with_session(|conn| {
            diesel::update(histories::table.filter(histories::user_id.eq(user_id)))
                .set(histories::deleted_at.eq(Some(now())))
                .execute(conn)
        })
    }

    /// Soft-delete the history attached to the named chat.
    ///
    /// Resolved as two statements in one session rather than a
    /// subquery because mysql refuses to update a table it is also
    /// selecting from.
    pub fn soft_delete_by_chat(&self, user_id: &str, chat_name: &str) -> Result<usize, QueryError> {
        self.sessions.with_session(|conn| {
            let chat_ids: Vec<String> = live_chats()
                .filter(chats::user_id.eq(user_id))
                .filter(chats::name.eq(chat_name))
                .select(chats::id)
                .load(conn)?;

            if chat_ids.is_empty() {
                return Ok(0);
            }

            diesel::update(
                histories::table
                    .filter(histories::user_id.eq(user_id))
                    .filter(histories::chat_id.eq_any(chat_ids)),
            )
            .set(histories::deleted_at.eq(Some(now())))
            .execute(conn)
        })
    }
}

#[derive(Clone)]
pub struct InteractionRepository {
    sessions: Arc<SessionFactory>,
}

impl InteractionRepository {
    pub fn new(sessions: Arc<SessionFactory>) -> Self {
        InteractionRepository { sessions }
    }

    pub fn insert(&self, row: InteractionRow) -> Result<String, QueryError> {
        let id = row.id.clone();
        self.sessions.with_session(|conn| {
            diesel::insert_into(interactions::table).values(&row).execute(conn)
        })?;
        Ok(id)
    }
}
