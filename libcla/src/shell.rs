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

//! The `shell` command: the bashrc.d integration snippets and the
//! entry point for terminal capture.

use std::{fs, io::Write as _, os::unix::fs::OpenOptionsExt as _, path::PathBuf};

use clap::Args;
use tracing::info;

use crate::{
    client::CommandError,
    consts,
    render::Renderer,
    terminal::{self, capture, LockError},
    user,
};

/// Bash integration for interactive mode. Bound to Ctrl-J so the
/// binding works in the middle of a typed line.
const BASH_INTERACTIVE: &str = r#"# Command Line Assistant Interactive Mode Integration
__cla_interactive() {
    # Save current terminal state
    local old_tty=$(stty -g)

    # Function to restore terminal state
    cleanup() {
        stty "$old_tty"
    }

    # Set cleanup on exit
    trap cleanup EXIT

    # Configure terminal for interactive input
    stty sane  # Reset terminal to sane state
    stty echo  # Ensure input is echoed (visible)
    stty icanon # Enable canonical mode (line-by-line input)

    # Start interactive mode
    if command -v cla >/dev/null 2>&1; then
        cla chat --interactive
    else
        echo "Error: Command Line Assistant is not installed"
        return 1
    fi

    # Explicitly restore terminal state after the client exits
    cleanup
}

# Bind Ctrl+J to the interactive function
bind -x '"\C-j": __cla_interactive'
"#;

/// Starts a capture session whenever a new shell comes up.
const BASH_PERSISTENT_CAPTURE: &str = r#"# Command Line Assistant Persistent Terminal Capture
if command -v cla >/dev/null 2>&1; then
    cla shell --enable-capture
fi
"#;

const INTERACTIVE_INTEGRATION_FILE: &str = "cla-interactive.bashrc";
const PERSISTENT_CAPTURE_FILE: &str = "cla-persistent-capture.bashrc";

#[derive(Args, Debug, Default)]
pub struct ShellArgs {
    #[clap(long, action, help = "Enable terminal capture for the current terminal session")]
    pub enable_capture: bool,

    #[clap(
        long,
        action,
        help = "Enable the shell integration for interactive mode on the system. Currently, \
                only bash is supported. After the integration is sourced, hit Ctrl + J in your \
                terminal to enter interactive mode."
    )]
    pub enable_interactive: bool,

    #[clap(long, action, help = "Disable the shell integration for interactive mode")]
    pub disable_interactive: bool,

    #[clap(
        long,
        action,
        help = "Start a terminal capture session automatically whenever a shell starts"
    )]
    pub enable_persistent_capture: bool,

    #[clap(long, action, help = "Stop starting capture sessions on shell startup")]
    pub disable_persistent_capture: bool,
}

pub fn run(args: ShellArgs, plain: bool) -> Result<(), CommandError> {
    let render = Renderer::new(plain);

    if args.enable_interactive {
        return write_integration(&render, INTERACTIVE_INTEGRATION_FILE, BASH_INTERACTIVE);
    }
    if args.disable_interactive {
        return remove_integration(&render, INTERACTIVE_INTEGRATION_FILE);
    }
    if args.enable_persistent_capture {
        return write_integration(&render, PERSISTENT_CAPTURE_FILE, BASH_PERSISTENT_CAPTURE);
    }
    if args.disable_persistent_capture {
        return remove_integration(&render, PERSISTENT_CAPTURE_FILE);
    }
    if args.enable_capture {
        return enable_capture(&render);
    }

    render.warning("No operation specified. Use --help to see available options.");
    Err(CommandError::new(consts::EXIT_USAGE, ""))
}

fn bashrc_d_file(file_name: &str) -> Result<PathBuf, CommandError> {
    let account = user::current().map_err(|e| {
        CommandError::new(consts::EXIT_SHELL, format!("resolving the passwd entry: {e}"))
    })?;
    Ok(account.home_dir.join(".bashrc.d").join(file_name))
}

fn write_integration(
    render: &Renderer,
    file_name: &str,
    contents: &str,
) -> Result<(), CommandError> {
    let target = bashrc_d_file(file_name)?;
    let dir = target.parent().expect("the integration file always has a parent");

    terminal::create_private_folder(dir)
        .map_err(|e| CommandError::new(consts::EXIT_SHELL, e.to_string()))?;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&target)
        .map_err(|e| {
            CommandError::new(consts::EXIT_SHELL, format!("writing integration {target:?}: {e}"))
        })?;
    file.write_all(contents.as_bytes()).map_err(|e| {
        CommandError::new(consts::EXIT_SHELL, format!("writing integration {target:?}: {e}"))
    })?;

    info!("wrote integration to {:?}", target);
    render.normal(&format!(
        "Integration successfully added at {}. In case it doesn't take effect immediately, \
         please restart your shell.",
        target.display()
    ));
    Ok(())
}

fn remove_integration(render: &Renderer, file_name: &str) -> Result<(), CommandError> {
    let target = bashrc_d_file(file_name)?;

    if !target.exists() {
        render.warning("The integration is not enabled, nothing to remove.");
        return Ok(());
    }

    fs::remove_file(&target).map_err(|e| {
        CommandError::new(consts::EXIT_SHELL, format!("removing integration {target:?}: {e}"))
    })?;
    render.normal("Integration successfully removed.");
    Ok(())
}

fn enable_capture(render: &Renderer) -> Result<(), CommandError> {
    render.normal("Starting terminal capture. Type 'exit' in the spawned shell to stop it.");

    capture::start_capture().map_err(|e| {
        let code = consts::EXIT_SHELL;
        match e.downcast_ref::<LockError>() {
            Some(LockError::Busy { pid, .. }) => CommandError::new(
                code,
                format!("Detected a terminal capture session already running with pid '{pid}'."),
            ),
            _ => CommandError::new(code, e.to_string()),
        }
    })
}
