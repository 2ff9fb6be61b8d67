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

//! Table definitions shared by every dialect. Ids are canonical
//! hex-dashed UUID strings so the storage and wire formats coincide.

diesel::table! {
    chats (id) {
        id -> Text,
        user_id -> Text,
        name -> Text,
        description -> Nullable<Text>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
        deleted_at -> Nullable<Timestamp>,
    }
}

diesel::table! {
    histories (id) {
        id -> Text,
        user_id -> Text,
        chat_id -> Text,
        created_at -> Timestamp,
        deleted_at -> Nullable<Timestamp>,
    }
}

diesel::table! {
    interactions (id) {
        id -> Text,
        history_id -> Text,
        question -> Text,
        response -> Text,
        created_at -> Timestamp,
        deleted_at -> Nullable<Timestamp>,
    }
}

diesel::joinable!(histories -> chats (chat_id));
diesel::joinable!(interactions -> histories (history_id));

diesel::allow_tables_to_appear_in_same_query!(chats, histories, interactions);
