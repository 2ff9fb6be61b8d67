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

//! The `feedback` command. Deliberately offline: it only tells the
//! user where feedback goes, so nothing typed here ever leaves the
//! machine by accident.

use crate::{client::CommandError, render::Renderer};

const FEEDBACK_NOTICE: &str = "To submit feedback about the command line assistant, file an \
                               issue against the project tracker:\n\n    \
                               https://github.com/linux-cla/command-line-assistant/issues\n\n\
                               Please do not include personal or other sensitive information.";

pub fn run(plain: bool) -> Result<(), CommandError> {
    let render = Renderer::new(plain);
    render.normal(FEEDBACK_NOTICE);
    Ok(())
}
