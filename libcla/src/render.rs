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

//! Terminal output for the client: colored status decorations, a
//! waiting spinner, and a couple of formatting helpers. Not a
//! markdown engine.

use colored::Colorize;
use spinners::{Spinner as SpinnerImpl, Spinners};

#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    plain: bool,
}

impl Renderer {
    pub fn new(plain: bool) -> Self {
        Renderer { plain }
    }

    /// Ordinary output, stdout.
    pub fn normal(&self, message: &str) {
        println!("{message}");
    }

    /// The backend's answer. Bullet and heading lines get a light
    /// decoration unless plain mode is on.
    pub fn response(&self, message: &str) {
        if self.plain {
            println!("{message}");
            return;
        }

        for line in message.lines() {
            let trimmed = line.trim_start();
            if trimmed.starts_with('#') {
                println!("{}", line.bold());
            } else if trimmed.starts_with("* ") || trimmed.starts_with("- ") {
                println!("{}", line.cyan());
            } else {
                println!("{line}");
            }
        }
    }

    pub fn warning(&self, message: &str) {
        if self.plain {
            eprintln!("warning: {message}");
        } else {
            eprintln!("{} {message}", "warning:".yellow().bold());
        }
    }

    pub fn error(&self, message: &str) {
        if self.plain {
            eprintln!("error: {message}");
        } else {
            eprintln!("{} {message}", "error:".red().bold());
        }
    }
}

/// A spinner shown while we wait on the backend. A no-op in plain
/// mode so piped output stays clean.
pub struct Spinner {
    inner: Option<SpinnerImpl>,
}

impl Spinner {
    pub fn start(message: &str, plain: bool) -> Self {
        if plain {
            return Spinner { inner: None };
        }
        Spinner { inner: Some(SpinnerImpl::new(Spinners::Dots, String::from(message))) }
    }

    pub fn stop(mut self) {
        if let Some(mut spinner) = self.inner.take() {
            spinner.stop_with_newline();
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if let Some(mut spinner) = self.inner.take() {
            spinner.stop_with_newline();
        }
    }
}

/// Render a byte count the way a human wants to read it.
pub fn human_readable_size(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}
