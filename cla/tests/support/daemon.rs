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
    fs,
    os::unix::net::UnixStream,
    path::{Path, PathBuf},
    process,
    process::{Command, Stdio},
    time,
};

use anyhow::Context;
use tempfile::TempDir;

use super::cla_bin;

/// Knobs for the daemon config written into the scratch dir.
pub struct DaemonArgs {
    pub backend_endpoint: String,
    pub history_enabled: bool,
}

impl Default for DaemonArgs {
    fn default() -> Self {
        DaemonArgs {
            backend_endpoint: String::from("http://127.0.0.1:1"),
            history_enabled: true,
        }
    }
}

/// Proc is a helper handle for a `cla daemon` subprocess.
/// It kills the subprocess when it goes out of scope.
pub struct Proc {
    pub proc: process::Child,
    pub tmp_dir: TempDir,
    pub socket_path: PathBuf,
    pub config_path: PathBuf,
    log_file: PathBuf,
    subproc_counter: usize,
}

impl Proc {
    pub fn new(args: DaemonArgs) -> anyhow::Result<Proc> {
        let tmp_dir = tempfile::Builder::new()
            .prefix("cla-test")
            .rand_bytes(20)
            .tempdir()
            .context("creating tmp dir")?;

        let db_path = tmp_dir.path().join("history.db");
        let config_path = tmp_dir.path().join("config.toml");
        fs::write(
            &config_path,
            format!(
                r#"
[database]
type = "sqlite"
connection_string = "{}"

[history]
enabled = {}

[backend]
endpoint = "{}"

[logging]
level = "DEBUG"

[logging.audit]
enabled = true
"#,
                db_path.display(),
                args.history_enabled,
                args.backend_endpoint,
            ),
        )
        .context("writing daemon config")?;

        let socket_path = tmp_dir.path().join("cla.socket");
        let log_file = tmp_dir.path().join("daemon.log");
        eprintln!("spawning daemon proc with log {:?}", &log_file);

        let proc = Command::new(cla_bin())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .arg("--debug")
            .arg("--log-file")
            .arg(&log_file)
            .arg("--socket")
            .arg(&socket_path)
            .arg("--config-file")
            .arg(&config_path)
            .arg("daemon")
            .spawn()
            .context("spawning daemon process")?;

        // spin until we can dial the socket successfully
        let mut sleep_dur = time::Duration::from_millis(5);
        for _ in 0..12 {
            if UnixStream::connect(&socket_path).is_ok() {
                break;
            } else {
                std::thread::sleep(sleep_dur);
                sleep_dur *= 2;
            }
        }

        Ok(Proc { proc, tmp_dir, socket_path, config_path, log_file, subproc_counter: 0 })
    }

    /// Run one client invocation against this daemon and collect its
    /// output. Stdin is null so the client never mistakes the test
    /// harness for piped input.
    pub fn run_client(&mut self, args: &[&str]) -> anyhow::Result<process::Output> {
        let log_file =
            self.tmp_dir.path().join(format!("client_{}.log", self.subproc_counter));
        self.subproc_counter += 1;

        let mut cmd = Command::new(cla_bin());
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .arg("--plain")
            .arg("--log-file")
            .arg(&log_file)
            .arg("--socket")
            .arg(&self.socket_path);
        for arg in args {
            cmd.arg(arg);
        }

        cmd.output().context("running client invocation")
    }

    /// The opaque user id the daemon derives for this test process.
    pub fn user_id(&mut self) -> anyhow::Result<String> {
        let uid = nix::unistd::getuid().as_raw();
        let reply: cla_protocol::RpcResult<cla_protocol::UserIdReply> = self.raw_request(
            cla_protocol::ConnectHeader::User(cla_protocol::UserRequest::GetUserId {
                os_user_id: uid,
            }),
        )?;
        let reply = reply.map_err(|e| anyhow::anyhow!("GetUserId failed: {e}"))?;
        Ok(reply.user_id)
    }

    /// Speak the control protocol directly: read the version header,
    /// write one request, read one reply.
    pub fn raw_request<R>(
        &self,
        header: cla_protocol::ConnectHeader,
    ) -> anyhow::Result<R>
    where
        R: for<'de> serde::de::Deserialize<'de>,
    {
        let stream = UnixStream::connect(&self.socket_path).context("dialing daemon")?;

        let mut de = rmp_serde::Deserializer::new(&stream);
        let _version: cla_protocol::VersionHeader =
            serde::Deserialize::deserialize(&mut de).context("reading version header")?;

        let mut ser = rmp_serde::Serializer::new(&stream).with_struct_map();
        serde::Serialize::serialize(&header, &mut ser).context("writing request")?;

        let mut de = rmp_serde::Deserializer::new(&stream);
        let reply: R = serde::Deserialize::deserialize(&mut de).context("reading reply")?;
        Ok(reply)
    }

    pub fn daemon_log(&self) -> anyhow::Result<String> {
        fs::read_to_string(&self.log_file).context("reading daemon log")
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl std::ops::Drop for Proc {
    fn drop(&mut self) {
        if let Err(e) = self.proc.kill() {
            eprintln!("err killing daemon proc: {:?}", e);
        }
        let _ = self.proc.wait();
    }
}
