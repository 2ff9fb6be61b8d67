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

//! The daemon's accept loop and request dispatch. Each connection is
//! one request: we advertize our version, read the request header,
//! identify the caller from the socket, and route to the matching
//! service.

use std::{
    io, net,
    os::unix::net::{UnixListener, UnixStream},
    sync::Arc,
    thread,
};

use anyhow::Context;
use cla_protocol::{ChatRequest, ConnectHeader, HistoryRequest, UserRequest, VersionHeader};
use tracing::{error, info, instrument};

use crate::{
    config,
    consts,
    daemon::{
        auth,
        auth::Caller,
        chat::ChatService,
        db::{
            repository::{ChatRepository, HistoryRepository, InteractionRepository},
            Database,
        },
        history::HistoryService,
        http::Backend,
        user::UserService,
    },
    identity::SessionManager,
    protocol,
};

pub struct Server {
    users: UserService,
    chats: ChatService,
    history: HistoryService,
}

impl Server {
    #[instrument(skip_all)]
    pub fn new(config: config::Config) -> anyhow::Result<Arc<Self>> {
        let database = Database::connect(&config.database).context("setting up storage")?;
        let sessions = database.sessions();

        let identity = Arc::new(SessionManager::new());
        let audit = config.logging.audit.enabled;
        let gate = auth::Gate::new(Arc::clone(&identity), audit);

        let chat_repo = ChatRepository::new(Arc::clone(&sessions));
        let history_repo = HistoryRepository::new(Arc::clone(&sessions));
        let interaction_repo = InteractionRepository::new(Arc::clone(&sessions));
        let backend = Backend::new(config.backend.clone());

        Ok(Arc::new(Server {
            users: UserService::new(gate.clone()),
            chats: ChatService::new(chat_repo.clone(), backend, gate.clone(), audit),
            history: HistoryService::new(
                chat_repo,
                history_repo,
                interaction_repo,
                gate,
                config.history.enabled,
                audit,
            ),
        }))
    }

    #[instrument(skip_all)]
    pub fn serve(server: Arc<Self>, listener: UnixListener) -> anyhow::Result<()> {
        let mut conn_counter = 0;
        for stream in listener.incoming() {
            info!("socket got a new connection");
            match stream {
                Ok(stream) => {
                    conn_counter += 1;
                    let conn_id = conn_counter;
                    let server = Arc::clone(&server);
                    thread::spawn(move || {
                        if let Err(err) = server.handle_conn(stream, conn_id) {
                            error!("handling new connection: {:?}", err)
                        }
                    });
                }
                Err(err) => {
                    error!("accepting stream: {:?}", err);
                }
            }
        }

        Ok(())
    }

    #[instrument(skip_all, fields(cid = conn_id))]
    fn handle_conn(&self, mut stream: UnixStream, conn_id: usize) -> anyhow::Result<()> {
        // We want to avoid timing out while blocking the main thread.
        stream
            .set_read_timeout(Some(consts::SOCK_STREAM_TIMEOUT))
            .context("setting read timeout on inbound session")?;

        // advertize our protocol version to the client so that it can
        // warn about mismatches
        match protocol::encode_to(
            &VersionHeader { version: String::from(cla_protocol::VERSION) },
            &mut stream,
        ) {
            Ok(_) => {}
            Err(e)
                if e.root_cause()
                    .downcast_ref::<io::Error>()
                    .map(|ioe| ioe.kind() == io::ErrorKind::BrokenPipe)
                    .unwrap_or(false) =>
            {
                info!("broken pipe while writing version, likely just a daemon presence probe");
                return Ok(());
            }
            Err(e) => return Err(e).context("while writing version"),
        }

        let header: ConnectHeader =
            protocol::decode_from(&mut stream).context("parsing request header")?;
        info!("dispatching a {} request", header);

        // Identify the caller before touching any request contents.
        // No identity means no service.
        let caller = match auth::peer_caller(&stream) {
            Ok(caller) => caller,
            Err(denied) => {
                write_reply(&mut stream, Err::<(), _>(denied))?;
                stream.shutdown(net::Shutdown::Both).context("closing stream")?;
                return Ok(());
            }
        };

        match header {
            ConnectHeader::User(req) => self.handle_user(&mut stream, &caller, req),
            ConnectHeader::Chat(req) => self.handle_chat(&mut stream, &caller, req),
            ConnectHeader::History(req) => self.handle_history(&mut stream, &caller, req),
        }
    }

    fn handle_user(
        &self,
        stream: &mut UnixStream,
        caller: &Caller,
        req: UserRequest,
    ) -> anyhow::Result<()> {
        match req {
            UserRequest::GetUserId { os_user_id } => {
                write_reply(stream, self.users.get_user_id(caller, os_user_id))
            }
        }
    }

    fn handle_chat(
        &self,
        stream: &mut UnixStream,
        caller: &Caller,
        req: ChatRequest,
    ) -> anyhow::Result<()> {
        use ChatRequest::*;

        match req {
            GetAllChatFromUser { user_id } => {
                write_reply(stream, self.chats.get_all_chat_from_user(caller, &user_id))
            }
            GetChatId { user_id, name } => {
                write_reply(stream, self.chats.get_chat_id(caller, &user_id, &name))
            }
            IsChatAvailable { user_id, name } => {
                write_reply(stream, self.chats.is_chat_available(caller, &user_id, &name))
            }
            GetLatestChatFromUser { user_id } => {
                write_reply(stream, self.chats.get_latest_chat_from_user(caller, &user_id))
            }
            CreateChat { user_id, name, description } => write_reply(
                stream,
                self.chats.create_chat(caller, &user_id, &name, &description),
            ),
            DeleteChatForUser { user_id, name } => {
                write_reply(stream, self.chats.delete_chat_for_user(caller, &user_id, &name))
            }
            DeleteAllChatForUser { user_id } => {
                write_reply(stream, self.chats.delete_all_chat_for_user(caller, &user_id))
            }
            AskQuestion { user_id, question } => {
                write_reply(stream, self.chats.ask_question(caller, &user_id, &question))
            }
        }
    }

    fn handle_history(
        &self,
        stream: &mut UnixStream,
        caller: &Caller,
        req: HistoryRequest,
    ) -> anyhow::Result<()> {
        use HistoryRequest::*;

        match req {
            GetHistory { user_id } => {
                write_reply(stream, self.history.get_history(caller, &user_id))
            }
            GetFirstConversation { user_id, from_chat } => write_reply(
                stream,
                self.history.get_first_conversation(caller, &user_id, &from_chat),
            ),
            GetLastConversation { user_id, from_chat } => write_reply(
                stream,
                self.history.get_last_conversation(caller, &user_id, &from_chat),
            ),
            GetFilteredConversation { user_id, keyword, from_chat } => write_reply(
                stream,
                self.history.get_filtered_conversation(caller, &user_id, &keyword, &from_chat),
            ),
            WriteHistory { chat_id, user_id, question, response } => write_reply(
                stream,
                self.history.write_history(caller, &chat_id, &user_id, &question, &response),
            ),
            ClearAllHistory { user_id } => {
                write_reply(stream, self.history.clear_all_history(caller, &user_id))
            }
            ClearHistory { user_id, from_chat } => {
                write_reply(stream, self.history.clear_history(caller, &user_id, &from_chat))
            }
        }
    }
}

#[instrument(skip_all)]
fn write_reply<R>(stream: &mut UnixStream, reply: R) -> anyhow::Result<()>
where
    R: serde::Serialize,
{
    stream
        .set_write_timeout(Some(consts::SOCK_STREAM_TIMEOUT))
        .context("setting write timeout on inbound session")?;

    let serializeable_stream = stream.try_clone().context("cloning stream handle")?;
    protocol::encode_to(&reply, serializeable_stream).context("writing reply")?;

    stream.set_write_timeout(None).context("unsetting write timeout on inbound session")?;

    Ok(())
}
