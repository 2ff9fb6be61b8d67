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

#![allow(dead_code)]

use std::path::PathBuf;

pub mod backend;
pub mod daemon;

/// The cla binary cargo built for this test run.
pub fn cla_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_cla"))
}

/// Run the test body and dump the error chain to stderr on failure
/// so cargo shows it with the failing test.
pub fn dump_err<F>(f: F) -> anyhow::Result<()>
where
    F: FnOnce() -> anyhow::Result<()>,
{
    let res = f();
    if let Err(e) = &res {
        eprintln!("TEST ERR: {:?}", e);
    }
    res
}
