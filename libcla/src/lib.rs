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

use std::{fs, io, path::PathBuf, sync::Mutex};

use clap::{CommandFactory as _, Parser, Subcommand};
use tracing::error;
use tracing_subscriber::{
    filter::LevelFilter, fmt::format::FmtSpan, layer::SubscriberExt as _,
    util::SubscriberInitExt as _,
};

mod chat;
mod client;
mod config;
mod consts;
mod context;
mod daemon;
mod feedback;
mod history;
mod identity;
mod protocol;
mod render;
mod shell;
mod terminal;
mod tty;
mod user;

/// Where the daemon's socket lives when nothing overrides it. The
/// packaged systemd units manage this path via socket activation.
const DEFAULT_SOCKET: &str = "/run/command-line-assistant/cla.socket";

/// The command line arguments that cla expects.
///
/// NOTE: You must check `version()` and handle it yourself
/// if it is set. Clap won't do a good job with its
/// automatic version support for a library.
#[derive(Parser, Debug)]
#[clap(author, about, disable_version_flag = true)]
pub struct Args {
    #[clap(
        short,
        long,
        action,
        long_help = "The file to write logs to

In most modes logs are discarded by default, but if cla is
running in daemon mode, the logs will go to stderr by default."
    )]
    pub log_file: Option<String>,

    #[clap(long, action, help = "Show debug logs")]
    pub debug: bool,

    #[clap(short, long, action, help = "Plain output: no colors, decorations or spinner")]
    pub plain: bool,

    #[clap(short = 'v', long = "version", action, help = "Print version")]
    pub version: bool,

    #[clap(
        short,
        long,
        action,
        long_help = "The path for the unix socket to dial or listen on

This defaults to /run/command-line-assistant/cla.socket, which is
where the packaged systemd socket unit puts the daemon.

This flag gets overridden by systemd socket activation when
the daemon is launched by systemd."
    )]
    pub socket: Option<String>,

    #[clap(short, long, action, help = "a toml file containing configuration")]
    pub config_file: Option<String>,

    #[clap(subcommand)]
    pub command: Option<Commands>,
}

/// The subcommands that cla supports.
#[derive(Subcommand, Debug)]
pub enum Commands {
    #[clap(about = "Starts the daemon that owns the network, database and authorization surface")]
    Daemon,

    #[clap(about = "Command to ask a question to the LLM")]
    Chat(chat::ChatArgs),

    #[clap(about = "Read, filter or clear the conversation history")]
    History(history::HistoryArgs),

    #[clap(about = "Manage shell integrations and terminal capture")]
    Shell(shell::ShellArgs),

    #[clap(about = "Find out how to provide feedback about the assistant")]
    Feedback,
}

impl Args {
    /// Version indicates if the wrapping binary must display the
    /// version then exit.
    pub fn version(&self) -> bool {
        self.version
    }
}

/// Run the assistant with the given arguments, returning the process
/// exit code.
pub fn run(args: Args) -> i32 {
    let level = if args.debug { LevelFilter::TRACE } else { LevelFilter::INFO };

    let socket = PathBuf::from(
        args.socket.clone().unwrap_or_else(|| String::from(DEFAULT_SOCKET)),
    );

    let command = match args.command {
        Some(command) => command,
        None => {
            let _ = Args::command().print_help();
            return consts::EXIT_USAGE;
        }
    };

    if let Commands::Daemon = command {
        return run_daemon(args.log_file, args.config_file, level, socket);
    }

    // Client commands only log when asked to; their terminal belongs
    // to the renderer.
    if let Some(log_file) = &args.log_file {
        match fs::File::create(log_file) {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .with_max_level(level)
                    .with_thread_ids(true)
                    .with_target(false)
                    .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                    .with_writer(Mutex::new(file))
                    .init();
            }
            Err(e) => {
                eprintln!("cla: could not open log file: {e}");
                return consts::EXIT_SOFTWARE;
            }
        }
    }

    let result = match command {
        Commands::Daemon => unreachable!("handled above"),
        Commands::Chat(chat_args) => chat::run(chat_args, args.plain, &socket),
        Commands::History(history_args) => history::run(history_args, args.plain, &socket),
        Commands::Shell(shell_args) => shell::run(shell_args, args.plain),
        Commands::Feedback => feedback::run(args.plain),
    };

    match result {
        Ok(()) => consts::EXIT_OK,
        Err(e) => {
            if !e.message.is_empty() {
                render::Renderer::new(args.plain).error(&e.message);
            }
            e.code
        }
    }
}

fn run_daemon(
    log_file: Option<String>,
    config_file: Option<String>,
    level: LevelFilter,
    socket: PathBuf,
) -> i32 {
    let (filter_layer, log_level_handle) = tracing_subscriber::reload::Layer::new(level);
    let registry = tracing_subscriber::registry().with(filter_layer);

    if let Some(log_file) = log_file {
        let file = match fs::File::create(&log_file) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("cla: could not open log file: {e}");
                return consts::EXIT_SOFTWARE;
            }
        };
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_thread_ids(true)
                    .with_target(false)
                    .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                    .with_writer(Mutex::new(file)),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_thread_ids(true)
                    .with_target(false)
                    .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                    .with_writer(io::stderr),
            )
            .init();
    }

    if let Err(err) = daemon::run(config_file, log_level_handle, socket) {
        error!("{:?}", err);
        return 1;
    }

    consts::EXIT_OK
}
