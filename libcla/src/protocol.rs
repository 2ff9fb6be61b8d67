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

//! The client side of the control protocol: dial the daemon socket,
//! read its version advertizement, write one request, read one reply.

use std::{io::{Read, Write}, os::unix::net::UnixStream, path::Path, str::FromStr};

use anyhow::{anyhow, Context};
use cla_protocol::{ConnectHeader, VersionHeader};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// The centralized encoding function that should be used for all protocol
/// serialization. Msgpack objects carry their own framing, so unknown
/// trailing fields cannot mangle followup data on the stream.
pub fn encode_to<T, W>(d: &T, w: W) -> anyhow::Result<()>
where
    T: Serialize,
    W: Write,
{
    let mut serializer = rmp_serde::Serializer::new(w).with_struct_map();
    d.serialize(&mut serializer).context("serializing data")?;
    Ok(())
}

/// The centralized decoding function that should be used for all protocol
/// deserialization.
pub fn decode_from<T, R>(r: R) -> anyhow::Result<T>
where
    for<'de> T: Deserialize<'de>,
    R: Read,
{
    let mut deserializer = rmp_serde::Deserializer::new(r);
    let d: T = Deserialize::deserialize(&mut deserializer).context("deserializing from reader")?;
    Ok(d)
}

/// One dialed-up connection to the daemon, good for a single
/// request/reply exchange.
pub struct Client {
    stream: UnixStream,
    warning: Option<String>,
}

impl Client {
    /// Dial the daemon socket and consume its version advertizement.
    ///
    /// A version skew (or an unreadable advertizement) does not fail
    /// the dial; it is recorded as a warning for the caller to show,
    /// since most calls keep working across adjacent releases.
    pub fn dial<P: AsRef<Path>>(sock: P) -> anyhow::Result<Client> {
        let stream = UnixStream::connect(sock).context("connecting to daemon")?;

        let warning = match decode_from::<VersionHeader, _>(&stream) {
            Ok(header) => {
                info!("daemon advertized protocol version {}", header.version);
                compat_warning(cla_protocol::VERSION, &header.version)
            }
            Err(e) => {
                warn!("could not read the daemon version advertizement: {:?}", e);
                Some(String::from("could not determine the daemon version"))
            }
        };

        Ok(Client { stream, warning })
    }

    /// The protocol mismatch warning from the handshake, if any.
    /// Meant to be surfaced to the user exactly once.
    pub fn take_warning(&mut self) -> Option<String> {
        self.warning.take()
    }

    pub fn write_connect_header(&self, header: ConnectHeader) -> anyhow::Result<()> {
        encode_to(&header, &self.stream).context("writing request")?;
        Ok(())
    }

    pub fn read_reply<R>(&mut self) -> anyhow::Result<R>
    where
        R: for<'de> serde::Deserialize<'de>,
    {
        let reply: R = decode_from(&mut self.stream).context("parsing reply")?;
        Ok(reply)
    }
}

/// Build the user-facing warning for a client/daemon version skew.
/// `None` means the two speak the same protocol series. A version we
/// cannot even parse warns too; guessing compatibility would be worse.
fn compat_warning(client: &str, daemon: &str) -> Option<String> {
    let client_version = match ProtocolVersion::from_str(client) {
        Ok(v) => v,
        Err(e) => {
            warn!("bad client version string: {:?}", e);
            return Some(format!("could not make sense of the client version '{client}'"));
        }
    };
    let daemon_version = match ProtocolVersion::from_str(daemon) {
        Ok(v) => v,
        Err(e) => {
            warn!("bad daemon version string: {:?}", e);
            return Some(format!("could not make sense of the daemon version '{daemon}'"));
        }
    };

    if client_version.series() == daemon_version.series() {
        return None;
    }

    Some(format!(
        "the client speaks protocol version {client} but the daemon speaks {daemon}; \
         restart the daemon or update one of the two, some calls may fail"
    ))
}

/// A `major.minor.patch` protocol version, reduced to what
/// compatibility decisions need. The patch component is validated
/// and then ignored, since it never gates the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProtocolVersion {
    major: u64,
    minor: u64,
}

impl ProtocolVersion {
    /// The compatibility series this version belongs to. Pre-1.0
    /// releases break protocol on the minor number; stable releases
    /// break it on the major number.
    fn series(&self) -> (u64, u64) {
        if self.major == 0 {
            (0, self.minor)
        } else {
            (self.major, 0)
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let components = s
            .split('.')
            .map(|c| c.parse::<u64>().with_context(|| format!("bad component in version '{s}'")))
            .collect::<anyhow::Result<Vec<u64>>>()?;

        match components.as_slice() {
            [major, minor, _patch] => Ok(ProtocolVersion { major: *major, minor: *minor }),
            _ => Err(anyhow!(
                "version '{}' has {} components, want 3",
                s,
                components.len()
            )),
        }
    }
}
