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

//! The `history` command: read, filter and clear recorded
//! conversations.

use std::path::Path;

use cla_protocol::{ConnectHeader, HistoryListReply, HistoryRequest, HistoryWrittenReply};
use clap::Args;

use crate::{
    client::{self, CommandError},
    consts,
    render::Renderer,
};

#[derive(Args, Debug, Default)]
pub struct HistoryArgs {
    #[clap(long, action, help = "Get the first conversation from the chat")]
    pub first: bool,

    #[clap(long, action, help = "Get the most recent conversation from the chat")]
    pub last: bool,

    #[clap(long, help = "Find conversations that contain the given keyword")]
    pub filter: Option<String>,

    #[clap(long, action, help = "Clear the history of the chat")]
    pub clear: bool,

    #[clap(long, action, help = "Clear the history of every chat")]
    pub clear_all: bool,

    #[clap(
        long,
        default_value = consts::DEFAULT_CHAT_NAME,
        help = "The chat to read or clear"
    )]
    pub from: String,
}

pub fn run(args: HistoryArgs, plain: bool, socket: &Path) -> Result<(), CommandError> {
    let render = Renderer::new(plain);
    let user_id = client::fetch_user_id(socket)?;

    if args.clear_all {
        let _: HistoryWrittenReply = client::request(
            socket,
            ConnectHeader::History(HistoryRequest::ClearAllHistory {
                user_id: user_id.clone(),
            }),
            consts::EXIT_HISTORY,
        )?;
        render.normal("Cleared the history of every chat.");
        return Ok(());
    }

    if args.clear {
        let _: HistoryWrittenReply = client::request(
            socket,
            ConnectHeader::History(HistoryRequest::ClearHistory {
                user_id: user_id.clone(),
                from_chat: args.from.clone(),
            }),
            consts::EXIT_HISTORY,
        )?;
        render.normal(&format!("Cleared the history of chat '{}'.", args.from));
        return Ok(());
    }

    let header = if args.first {
        ConnectHeader::History(HistoryRequest::GetFirstConversation {
            user_id: user_id.clone(),
            from_chat: args.from.clone(),
        })
    } else if args.last {
        ConnectHeader::History(HistoryRequest::GetLastConversation {
            user_id: user_id.clone(),
            from_chat: args.from.clone(),
        })
    } else if let Some(keyword) = &args.filter {
        ConnectHeader::History(HistoryRequest::GetFilteredConversation {
            user_id: user_id.clone(),
            keyword: keyword.clone(),
            from_chat: args.from.clone(),
        })
    } else {
        ConnectHeader::History(HistoryRequest::GetHistory { user_id: user_id.clone() })
    };

    let reply: HistoryListReply = client::request(socket, header, consts::EXIT_HISTORY)?;
    if reply.entries.is_empty() {
        render.normal("No matching conversations found.");
        return Ok(());
    }

    for entry in reply.entries {
        render.normal(&format!("Question: {}", entry.question));
        render.response(&format!("Answer: {}", entry.response));
        render.normal(&format!("(chat '{}', {})", entry.chat_name, entry.created_at));
        render.normal("");
    }
    Ok(())
}
