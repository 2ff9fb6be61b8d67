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

//! Read the newline-delimited JSON capture log back into
//! command/output records, scrubbed of terminal escape sequences.

use std::{
    fs,
    io::{BufRead, BufReader},
};

use lazy_static::lazy_static;
use regex::Regex;
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::capture_log_path;

lazy_static! {
    // One expression covering both two-byte sequences (ESC @ .. ESC _,
    // which includes OSC) and CSI sequences with their parameter,
    // intermediate and final bytes.
    static ref ANSI_ESCAPE_SEQ: Regex =
        Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("a valid escape regex");
}

/// One captured command and everything it printed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TerminalRecord {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub output: String,
}

/// Parse the collected terminal output.
///
/// A missing log just yields an empty list. A corrupt line stops the
/// scan and returns what was parsed up to that point.
pub fn parse_terminal_output() -> anyhow::Result<Vec<TerminalRecord>> {
    let path = capture_log_path()?;
    let file = match fs::File::open(&path) {
        Ok(f) => f,
        Err(_) => {
            warn!(
                "terminal output requested but couldn't find file at {:?}, returning empty list",
                path
            );
            return Ok(vec![]);
        }
    };

    Ok(parse_records(BufReader::new(file)))
}

/// Parse records out of any line-oriented reader.
pub fn parse_records<R: BufRead>(reader: R) -> Vec<TerminalRecord> {
    let mut result = vec![];

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                info!("couldn't read a line from the terminal log: {}", e);
                return result;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let mut record: TerminalRecord = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                info!("couldn't deserialize the json output, stopping: {}", e);
                return result;
            }
        };
        record.command = clean_parsed_text(&record.command);
        record.output = clean_parsed_text(&record.output);

        // Just ignore the exit at the end.
        if record.output.ends_with("exit") {
            continue;
        }

        result.push(record);
    }

    result
}

/// Find a given output from the parsed record list by index. Negative
/// indices count from the end. Out of range yields an empty string.
pub fn find_output_by_index(index: isize, records: &[TerminalRecord]) -> String {
    let resolved = if index < 0 { records.len() as isize + index } else { index };

    if resolved < 0 || resolved as usize >= records.len() {
        warn!("couldn't find a match for index {}", index);
        return String::new();
    }

    let found = &records[resolved as usize].output;
    debug!("found output with index {}, {} bytes", index, found.len());
    found.clone()
}

/// Strip ANSI escape sequences and surrounding whitespace.
fn clean_parsed_text(text: &str) -> String {
    let cleaned = ANSI_ESCAPE_SEQ.replace_all(text, "");
    String::from(cleaned.trim())
}
