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

use std::{
    io::Read,
    path,
    process::{Command, Stdio},
    time,
};

use anyhow::Context;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use ntest::timeout;

mod support;

use crate::support::daemon::DaemonArgs;

#[test]
#[timeout(30000)]
fn start() -> anyhow::Result<()> {
    support::dump_err(|| {
        let tmp_dir = tempfile::Builder::new()
            .prefix("cla-test")
            .rand_bytes(20)
            .tempdir()
            .context("creating tmp dir")?;
        let db_path = tmp_dir.path().join("history.db");
        let config = tmp_dir.path().join("config.toml");
        std::fs::write(
            &config,
            format!(
                "[database]\ntype = \"sqlite\"\nconnection_string = \"{}\"\n",
                db_path.display()
            ),
        )?;

        let mut child = Command::new(support::cla_bin())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .arg("--socket")
            .arg(tmp_dir.path().join("cla.socket"))
            .arg("--config-file")
            .arg(&config)
            .arg("daemon")
            .spawn()
            .context("spawning daemon process")?;

        // The server should start up and run without incident for
        // half a second.
        std::thread::sleep(time::Duration::from_millis(500));

        child.kill().context("killing child")?;
        child.wait().context("reaping child")?;

        let mut stdout = child.stdout.take().context("missing stdout")?;
        let mut stdout_str = String::from("");
        stdout.read_to_string(&mut stdout_str).context("slurping stdout")?;

        if !stdout_str.is_empty() {
            println!("{}", stdout_str);
            return Err(anyhow::anyhow!("unexpected stdout output"));
        }

        let mut stderr = child.stderr.take().context("missing stderr")?;
        let mut stderr_str = String::from("");
        stderr.read_to_string(&mut stderr_str).context("slurping stderr")?;
        assert!(stderr_str.contains("STARTING DAEMON"));

        Ok(())
    })
}

#[test]
#[timeout(30000)]
fn cleanup_socket() -> anyhow::Result<()> {
    support::dump_err(|| {
        let daemon_proc =
            support::daemon::Proc::new(DaemonArgs::default()).context("starting daemon proc")?;
        assert!(daemon_proc.socket_path.exists());

        signal::kill(Pid::from_raw(daemon_proc.proc.id() as i32), Signal::SIGINT)?;

        // give the signal handler a moment to run
        let mut waited = 0;
        while daemon_proc.socket_path.exists() && waited < 50 {
            std::thread::sleep(time::Duration::from_millis(100));
            waited += 1;
        }

        assert!(!path::Path::new(&daemon_proc.socket_path).exists());
        Ok(())
    })
}

#[test]
#[timeout(30000)]
fn refuses_to_start_without_a_database_path() -> anyhow::Result<()> {
    support::dump_err(|| {
        let tmp_dir = tempfile::Builder::new()
            .prefix("cla-test")
            .rand_bytes(20)
            .tempdir()
            .context("creating tmp dir")?;
        let config = tmp_dir.path().join("config.toml");
        // sqlite with no connection_string is a startup error
        std::fs::write(&config, "[database]\ntype = \"sqlite\"\n")?;

        let output = Command::new(support::cla_bin())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .arg("--socket")
            .arg(tmp_dir.path().join("cla.socket"))
            .arg("--config-file")
            .arg(&config)
            .arg("daemon")
            .output()
            .context("running daemon process")?;

        assert!(!output.status.success());
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("connection_string"));

        Ok(())
    })
}

#[test]
#[timeout(30000)]
fn no_command_prints_usage() -> anyhow::Result<()> {
    support::dump_err(|| {
        let output = Command::new(support::cla_bin())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .context("running cla with no args")?;

        assert_eq!(output.status.code(), Some(64));
        Ok(())
    })
}

#[test]
#[timeout(30000)]
fn version_flag() -> anyhow::Result<()> {
    support::dump_err(|| {
        let output = Command::new(support::cla_bin())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .arg("--version")
            .output()
            .context("running cla --version")?;

        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.starts_with("cla "));
        Ok(())
    })
}
