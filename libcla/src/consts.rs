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

use std::time;

pub const SOCK_STREAM_TIMEOUT: time::Duration = time::Duration::from_millis(200);

pub const BUF_SIZE: usize = 1024 * 16;

pub const STDIN_FD: i32 = 0;

// The escape sequence the shell integration emits right before every
// prompt. Terminal capture keys its framing state machine on it.
pub const PROMPT_MARKER: &[u8] = b"\x1b]";

// Max input size we allow to be submitted to the backend (32KB).
pub const MAX_QUESTION_SIZE: usize = 32_000;

pub const DEFAULT_CHAT_NAME: &str = "default";
pub const DEFAULT_CHAT_DESCRIPTION: &str = "Default Command Line Assistant Chat.";

// If set to "true", the daemon will autodaemonize after launch.
pub const AUTODAEMONIZE_VAR: &str = "CLA__INTERNAL__AUTODAEMONIZE";

// Exit codes, the sysexits.h values plus a per-command range.
pub const EXIT_OK: i32 = 0;
pub const EXIT_USAGE: i32 = 64;
pub const EXIT_DATAERR: i32 = 65;
pub const EXIT_UNAVAILABLE: i32 = 69;
pub const EXIT_SOFTWARE: i32 = 70;
pub const EXIT_CHAT: i32 = 80;
pub const EXIT_SHELL: i32 = 81;
pub const EXIT_HISTORY: i32 = 82;
pub const EXIT_FEEDBACK: i32 = 83;
