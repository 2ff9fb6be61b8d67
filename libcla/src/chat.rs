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

//! The `chat` command: gather the question and its context, hand it
//! to the daemon, and render the answer.

use std::{env, fs, path::Path, path::PathBuf};

use cla_protocol::{
    AttachmentInput, ChatListReply, ChatDeletedReply, ChatRequest, ConnectHeader, HistoryRequest,
    HistoryWrittenReply, Question, Response, RpcError, StdinInput, SystemInfo, TerminalContext,
};
use clap::Args;
use tracing::{debug, info};

use crate::{
    client::{self, CommandError},
    consts, context,
    render::{human_readable_size, Renderer, Spinner},
    terminal::{self, parser, NamedFileLock},
};

/// Shown once per user, before their first answer.
const AI_NOTICE: &str = "This feature uses AI technology. Do not include any personal \
                         information or other sensitive information in your input. Always \
                         review AI-generated content prior to use.";

/// Marker recording that the notice was already shown.
const NOTICE_MARKER: &str = "legal-notice";

#[derive(Args, Debug, Default)]
pub struct ChatArgs {
    #[clap(help = "The question that will be sent to the LLM")]
    pub query_string: Option<String>,

    #[clap(
        short,
        long,
        help = "File attachment to be read and sent alongside the query"
    )]
    pub attachment: Option<PathBuf>,

    #[clap(short, long, action, help = "Start an interactive chat session")]
    pub interactive: bool,

    #[clap(
        short = 'w',
        long = "with-output",
        help = "Add output from terminal as context for the query. Use 1 to retrieve the latest \
                output, 2 the one before it, and so on. Enable the terminal capture with \
                'cla shell --enable-capture' for this option to work."
    )]
    pub with_output: Option<usize>,

    #[clap(short, long, action, help = "List all chats")]
    pub list: bool,

    #[clap(short, long, help = "Delete a chat session. Specify the chat session by its name.")]
    pub delete: Option<String>,

    #[clap(long, action, help = "Delete all chats")]
    pub delete_all: bool,

    #[clap(short, long, help = "Give a name to the chat session")]
    pub name: Option<String>,

    #[clap(long, help = "Give a description to the chat session")]
    pub description: Option<String>,
}

pub fn run(args: ChatArgs, plain: bool, socket: &Path) -> Result<(), CommandError> {
    let render = Renderer::new(plain);
    let user_id = client::fetch_user_id(socket)?;

    let name = args.name.clone().unwrap_or_else(|| String::from(consts::DEFAULT_CHAT_NAME));
    let description = args
        .description
        .clone()
        .unwrap_or_else(|| String::from(consts::DEFAULT_CHAT_DESCRIPTION));

    if args.name.is_some() && args.description.is_none() {
        render.warning(&format!(
            "Chat description not provided. Using the default description: '{}'. You can \
             specify a custom description using the '--description' option.",
            consts::DEFAULT_CHAT_DESCRIPTION
        ));
    }
    if args.name.is_none() && args.description.is_some() {
        render.warning(&format!(
            "Chat name not provided. Using the default name: '{}'. You can specify a custom \
             name using the '--name' option.",
            consts::DEFAULT_CHAT_NAME
        ));
    }

    if args.list {
        list_chats(&render, socket, &user_id)
    } else if let Some(chat_name) = &args.delete {
        delete_chat(&render, socket, &user_id, chat_name)
    } else if args.delete_all {
        delete_all_chats(&render, socket, &user_id)
    } else if args.interactive {
        interactive_chat(&render, socket, &args, &user_id, &name, &description, plain)
    } else {
        single_question(&render, socket, &args, &user_id, &name, &description, plain)
    }
}

fn single_question(
    render: &Renderer,
    socket: &Path,
    args: &ChatArgs,
    user_id: &str,
    name: &str,
    description: &str,
    plain: bool,
) -> Result<(), CommandError> {
    let sources = gather_input_sources(args)?;
    context::validate_question(&sources.question)?;
    context::validate_stdin(&sources.stdin)?;

    maybe_show_ai_notice(render);
    let chat_id = client::get_or_create_chat(socket, user_id, name, description)?;
    let question = compose_question(render, &sources, user_id)?;
    let response = submit_question(socket, user_id, &chat_id, question, plain)?;

    render.response(&response);
    Ok(())
}

fn interactive_chat(
    render: &Renderer,
    socket: &Path,
    args: &ChatArgs,
    user_id: &str,
    name: &str,
    description: &str,
    plain: bool,
) -> Result<(), CommandError> {
    if NamedFileLock::is_locked("terminal") {
        let pid = NamedFileLock::holder_pid("terminal").unwrap_or_else(|| String::from("unknown"));
        return Err(CommandError::new(
            consts::EXIT_CHAT,
            format!(
                "Detected a terminal capture session running with pid '{pid}'. Interactive \
                 chat mode is not available while terminal capture is active, you must stop \
                 the previous one."
            ),
        ));
    }

    let mut sources = gather_input_sources(args)?;
    let chat_id = client::get_or_create_chat(socket, user_id, name, description)?;

    maybe_show_ai_notice(render);
    render.normal(
        "Welcome to the interactive mode for the command line assistant! To exit, press \
         Ctrl + D or type '.exit'.\nThe current session does not include running context.",
    );

    let mut editor = rustyline::DefaultEditor::new().map_err(|e| {
        CommandError::new(consts::EXIT_SOFTWARE, format!("could not start the prompt: {e}"))
    })?;

    loop {
        match editor.readline(">>> ") {
            Ok(line) => {
                let question = line.trim();
                if question == ".exit" {
                    break;
                }
                if question.is_empty() {
                    render.error("Your question can't be empty. Please, try again.");
                    continue;
                }
                let _ = editor.add_history_entry(question);

                sources.question = String::from(question);
                let composed = compose_question(render, &sources, user_id)?;
                match submit_question(socket, user_id, &chat_id, composed, plain) {
                    Ok(response) => render.response(&response),
                    Err(e) => render.error(&e.message),
                }
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(rustyline::error::ReadlineError::Interrupted) => {
                return Err(CommandError::new(
                    consts::EXIT_CHAT,
                    "Detected keyboard interrupt. Stopping interactive mode.",
                ));
            }
            Err(e) => {
                return Err(CommandError::new(
                    consts::EXIT_SOFTWARE,
                    format!("could not read the prompt: {e}"),
                ));
            }
        }
    }

    Ok(())
}

/// Collect stdin, the attachment and the requested terminal output.
fn gather_input_sources(args: &ChatArgs) -> Result<context::InputSources, CommandError> {
    let stdin = client::read_stdin_if_piped()?;

    let (attachment, attachment_mimetype) = match &args.attachment {
        Some(path) => read_attachment(path)?,
        None => (String::new(), String::new()),
    };

    let terminal_output = match args.with_output {
        Some(index) => read_last_terminal_output(index)?,
        None => String::new(),
    };

    Ok(context::InputSources {
        question: args.query_string.clone().unwrap_or_default(),
        stdin,
        attachment,
        attachment_mimetype,
        terminal_output,
    })
}

fn read_attachment(path: &Path) -> Result<(String, String), CommandError> {
    let bytes = fs::read(path).map_err(|e| {
        CommandError::new(consts::EXIT_DATAERR, format!("could not read attachment {path:?}: {e}"))
    })?;

    let mimetype = infer::get(&bytes)
        .map(|kind| String::from(kind.mime_type()))
        .unwrap_or_else(|| String::from("text/plain"));

    let contents = String::from_utf8(bytes).map_err(|_| {
        CommandError::new(
            consts::EXIT_DATAERR,
            format!("the attachment {path:?} is not valid text"),
        )
    })?;

    Ok((String::from(contents.trim()), mimetype))
}

/// `-w 1` is the most recent record, `-w 2` the one before it.
fn read_last_terminal_output(index: usize) -> Result<String, CommandError> {
    let log_exists =
        terminal::capture_log_path().map(|path| path.exists()).unwrap_or(false);
    if !log_exists {
        return Err(context::ContextError::CaptureNotActive.into());
    }

    debug!("reading the terminal context for index {}", index);
    let records = parser::parse_terminal_output()
        .map_err(|e| CommandError::new(consts::EXIT_SOFTWARE, e.to_string()))?;
    Ok(parser::find_output_by_index(-(index.max(1) as isize), &records))
}

/// Assemble, bound and wrap the prompt into the wire `Question`.
fn compose_question(
    render: &Renderer,
    sources: &context::InputSources,
    user_id: &str,
) -> Result<Question, CommandError> {
    let assembled = sources.assemble()?;

    let (message, notice) = context::trim_message(assembled);
    if let Some(notice) = notice {
        render.warning(&format!(
            "The total size of your question and context ({}) exceeds the limit of {}. \
             Trimming it down to fit in the expected size, you may lose some context.",
            human_readable_size(notice.original_size),
            human_readable_size(consts::MAX_QUESTION_SIZE),
        ));
    }

    Ok(Question {
        message,
        stdin: StdinInput { stdin: sources.stdin.clone() },
        attachment: AttachmentInput {
            contents: sources.attachment.clone(),
            mimetype: sources.attachment_mimetype.clone(),
        },
        terminal: TerminalContext { output: sources.terminal_output.clone() },
        systeminfo: system_info(user_id),
    })
}

/// Ask the daemon, then persist the exchange. A disabled history
/// downgrades to a log line instead of failing the question.
fn submit_question(
    socket: &Path,
    user_id: &str,
    chat_id: &str,
    question: Question,
    plain: bool,
) -> Result<String, CommandError> {
    let spinner = Spinner::start("Asking the assistant", plain);
    let result = client::call::<Response>(
        socket,
        ConnectHeader::Chat(ChatRequest::AskQuestion {
            user_id: String::from(user_id),
            question: question.clone(),
        }),
    );
    spinner.stop();

    let response = result?.map_err(|e| client::map_rpc_error(e, consts::EXIT_CHAT))?;

    let written = client::call::<HistoryWrittenReply>(
        socket,
        ConnectHeader::History(HistoryRequest::WriteHistory {
            chat_id: String::from(chat_id),
            user_id: String::from(user_id),
            question: question.message.clone(),
            response: response.message.clone(),
        }),
    )?;
    match written {
        Ok(_) => {}
        Err(RpcError::HistoryNotEnabled(_)) => {
            info!("history is disabled in the configuration file, skipping the write");
        }
        Err(e) => return Err(client::map_rpc_error(e, consts::EXIT_CHAT)),
    }

    Ok(response.message)
}

fn list_chats(render: &Renderer, socket: &Path, user_id: &str) -> Result<(), CommandError> {
    let reply: ChatListReply = client::request(
        socket,
        ConnectHeader::Chat(ChatRequest::GetAllChatFromUser { user_id: String::from(user_id) }),
        consts::EXIT_CHAT,
    )?;

    if reply.chats.is_empty() {
        render.normal("No chats available.");
        return Ok(());
    }

    render.normal(&format!("Found a total of {} chats:", reply.chats.len()));
    for (index, chat) in reply.chats.iter().enumerate() {
        render.normal(&format!(
            "{}. Chat: {} - {} (created at: {})",
            index,
            chat.name,
            chat.description,
            chat.created_at
        ));
    }
    Ok(())
}

fn delete_chat(
    render: &Renderer,
    socket: &Path,
    user_id: &str,
    name: &str,
) -> Result<(), CommandError> {
    let _: ChatDeletedReply = client::request(
        socket,
        ConnectHeader::Chat(ChatRequest::DeleteChatForUser {
            user_id: String::from(user_id),
            name: String::from(name),
        }),
        consts::EXIT_CHAT,
    )?;
    render.normal(&format!("Chat {name} deleted successfully."));
    Ok(())
}

fn delete_all_chats(render: &Renderer, socket: &Path, user_id: &str) -> Result<(), CommandError> {
    let _: ChatDeletedReply = client::request(
        socket,
        ConnectHeader::Chat(ChatRequest::DeleteAllChatForUser { user_id: String::from(user_id) }),
        consts::EXIT_CHAT,
    )?;
    render.normal("Deleted all chats successfully.");
    Ok(())
}

/// Show the AI usage notice the first time this user asks anything.
/// The marker lives under the data dir so it survives history wipes.
fn maybe_show_ai_notice(render: &Renderer) {
    let marker = match data_dir() {
        Some(dir) => dir.join(NOTICE_MARKER),
        None => return,
    };
    if marker.exists() {
        return;
    }

    render.warning(AI_NOTICE);

    if let Some(parent) = marker.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if let Err(e) = fs::write(&marker, b"") {
        debug!("could not record the notice marker at {:?}: {}", marker, e);
    }
}

/// Our slice of `$XDG_DATA_HOME` (default `~/.local/share`).
fn data_dir() -> Option<PathBuf> {
    let base = match env::var("XDG_DATA_HOME") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(env::var("HOME").ok()?).join(".local").join("share"),
    };
    Some(base.join("command-line-assistant"))
}

/// A thumbnail of this machine for the backend payload.
fn system_info(user_id: &str) -> SystemInfo {
    let mut os = String::from("linux");
    let mut version = String::new();

    if let Ok(contents) = fs::read_to_string("/etc/os-release") {
        for line in contents.lines() {
            if let Some(value) = line.strip_prefix("ID=") {
                os = String::from(value.trim_matches('"'));
            } else if let Some(value) = line.strip_prefix("VERSION_ID=") {
                version = String::from(value.trim_matches('"'));
            }
        }
    }

    SystemInfo {
        os,
        version,
        arch: String::from(std::env::consts::ARCH),
        id: String::from(user_id),
    }
}
