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

use std::{env, fs, os::unix::net::UnixListener, path::PathBuf, thread};

use anyhow::Context;
use signal_hook::{consts::TERM_SIGNALS, iterator::Signals};
use tracing::{error, info, instrument, warn};

use crate::{config, consts};

mod auth;
mod chat;
mod db;
mod history;
mod http;
mod server;
mod systemd;
mod user;

#[instrument(skip_all)]
pub fn run(
    config_file: Option<String>,
    log_level_handle: tracing_subscriber::reload::Handle<
        tracing_subscriber::filter::LevelFilter,
        tracing_subscriber::registry::Registry,
    >,
    socket: PathBuf,
) -> anyhow::Result<()> {
    if let Ok(daemonize) = env::var(consts::AUTODAEMONIZE_VAR) {
        if daemonize == "true" {
            env::remove_var(consts::AUTODAEMONIZE_VAR); // avoid looping

            let pid_file = socket.with_file_name("daemonized-cla.pid");

            info!("daemonizing with pid_file={:?}", pid_file);
            daemonize::Daemonize::new().pid_file(pid_file).start().context("daemonizing")?;
        }
    }

    info!("\n\n======================== STARTING DAEMON ============================\n\n");

    let config = config::read_config(&config_file)?;

    // The config file has the last word on the log level.
    match config.logging.level_filter() {
        Ok(filter) => {
            if let Err(e) = log_level_handle.modify(|f| *f = filter) {
                warn!("could not apply logging.level: {}", e);
            }
        }
        Err(e) => warn!("{}", e),
    }

    let server = server::Server::new(config)?;

    let (cleanup_socket, listener) = match systemd::activation_socket() {
        Ok(l) => {
            info!("using systemd activation socket");
            (None, l)
        }
        Err(e) => {
            info!("no systemd activation socket: {:?}", e);
            if let Some(parent) = socket.parent() {
                fs::create_dir_all(parent).context("creating socket dir")?;
            }
            (Some(socket.clone()), UnixListener::bind(&socket).context("binding to socket")?)
        }
    };
    // spawn the signal handler thread in the background
    spawn_signal_cleanup(cleanup_socket.clone())?;

    server::Server::serve(server, listener)?;

    if let Some(sock) = cleanup_socket {
        std::fs::remove_file(sock).context("cleaning up socket on exit")?;
    } else {
        info!("systemd manages the socket, so not cleaning it up");
    }

    Ok(())
}

/// Remove the bound socket and exit when a termination signal
/// arrives. Socket-activated daemons have nothing on disk to clean
/// up, so they skip the removal.
fn spawn_signal_cleanup(sock: Option<PathBuf>) -> anyhow::Result<()> {
    let mut signals = Signals::new(TERM_SIGNALS).context("creating signal iterator")?;

    thread::spawn(move || {
        if signals.forever().next().is_some() {
            if let Some(sock) = sock {
                info!("term signal: removing socket before exit");
                if let Err(e) = fs::remove_file(&sock) {
                    error!("error cleaning up socket file: {}", e);
                }
            }
            std::process::exit(0);
        }
    });

    Ok(())
}
