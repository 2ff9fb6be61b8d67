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
/// cla is a command line assistant: ask a natural-language question
/// at the shell prompt and get an answer from a remote inference
/// service. The privileged daemon half runs as `cla daemon`; every
/// other subcommand is the per-invocation client.
use clap::Parser;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let args = libcla::Args::parse();

    if args.version() {
        println!("cla {VERSION}");
        std::process::exit(0);
    }

    std::process::exit(libcla::run(args));
}
