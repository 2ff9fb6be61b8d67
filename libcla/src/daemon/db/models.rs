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

use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use super::schema::{chats, histories, interactions};

fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

/// A named conversation container owned by one user.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = chats)]
pub struct ChatRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
}

impl ChatRow {
    pub fn new(user_id: &str, name: &str, description: &str) -> Self {
        let created = now();
        ChatRow {
            id: Uuid::new_v4().to_string(),
            user_id: String::from(user_id),
            name: String::from(name),
            description: if description.is_empty() {
                None
            } else {
                Some(String::from(description))
            },
            created_at: created,
            updated_at: created,
            deleted_at: None,
        }
    }
}

/// The container for one chat's interactions. Created lazily on the
/// first history write for the chat.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = histories)]
pub struct HistoryRow {
    pub id: String,
    pub user_id: String,
    pub chat_id: String,
    pub created_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
}

impl HistoryRow {
    pub fn new(user_id: &str, chat_id: &str) -> Self {
        HistoryRow {
            id: Uuid::new_v4().to_string(),
            user_id: String::from(user_id),
            chat_id: String::from(chat_id),
            created_at: now(),
            deleted_at: None,
        }
    }
}

/// One question/response exchange. Append-only per history.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = interactions)]
pub struct InteractionRow {
    pub id: String,
    pub history_id: String,
    pub question: String,
    pub response: String,
    pub created_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
}

impl InteractionRow {
    pub fn new(history_id: &str, question: &str, response: &str) -> Self {
        InteractionRow {
            id: Uuid::new_v4().to_string(),
            history_id: String::from(history_id),
            question: String::from(question),
            response: String::from(response),
            created_at: now(),
            deleted_at: None,
        }
    }
}
