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

//! The context assembler: merge the question with stdin, the file
//! attachment and the last captured terminal output into one
//! size-bounded prompt for the inference backend.

use thiserror::Error;
use tracing::{debug, info};

use crate::consts;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("No input provided. Please provide input via file, stdin, or direct query.")]
    EmptyInput,
    #[error("Your query needs to have at least 2 characters.")]
    QuestionTooShort,
    #[error("Your stdin input needs to have at least 2 characters.")]
    StdinTooShort,
    #[error("Adding context from terminal output is only allowed if terminal capture is active.")]
    CaptureNotActive,
}

/// Everything the client gathered for one question.
#[derive(Debug, Default, Clone)]
pub struct InputSources {
    pub question: String,
    pub stdin: String,
    pub attachment: String,
    pub attachment_mimetype: String,
    pub terminal_output: String,
}

impl InputSources {
    /// Pick the prompt text out of the available sources.
    ///
    /// The rules are ordered and the first match wins. Note that when
    /// every source is present, stdin is dropped on purpose.
    pub fn assemble(&self) -> Result<String, ContextError> {
        let question = !self.question.is_empty();
        let stdin = !self.stdin.is_empty();
        let attachment = !self.attachment.is_empty();
        let terminal = !self.terminal_output.is_empty();

        if question && stdin && attachment && terminal {
            debug!("using positional query and file input, stdin will be ignored");
            return Ok(format!("{} {}", self.question, self.attachment));
        }

        if question && attachment && terminal {
            info!("positional query, attachment and last output found, using all of them at once");
            return Ok(format!("{} {} {}", self.question, self.attachment, self.terminal_output));
        }

        if question && terminal {
            info!("positional query and last output found, using them");
            return Ok(format!("{} {}", self.question, self.terminal_output));
        }

        if question && attachment {
            info!("positional query and attachment found, using them");
            return Ok(format!("{} {}", self.question, self.attachment));
        }

        if stdin && attachment {
            info!("stdin and attachment found, using them");
            return Ok(format!("{} {}", self.stdin, self.attachment));
        }

        if stdin && question {
            info!("positional query and stdin found, using them");
            return Ok(format!("{} {}", self.question, self.stdin));
        }

        info!("no combination matched, defaulting to the first non-empty source");
        [&self.question, &self.stdin, &self.attachment, &self.terminal_output]
            .into_iter()
            .find(|src| !src.is_empty())
            .cloned()
            .ok_or(ContextError::EmptyInput)
    }
}

/// Emitted when the assembled prompt had to be cut down to the size
/// cap; the caller is expected to show the user a warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimNotice {
    /// The byte size of the prompt before truncation.
    pub original_size: usize,
}

/// Cap the assembled prompt at `MAX_QUESTION_SIZE` bytes, keeping
/// the leading bytes. Cutting inside a multi-byte character backs off
/// to the previous boundary.
pub fn trim_message(message: String) -> (String, Option<TrimNotice>) {
    let original_size = message.len();
    if original_size < consts::MAX_QUESTION_SIZE {
        return (message, None);
    }

    let mut cut = consts::MAX_QUESTION_SIZE;
    while cut > 0 && !message.is_char_boundary(cut) {
        cut -= 1;
    }
    debug!("total size of question ({}) exceeds defined limit, cutting at {}", original_size, cut);

    let mut message = message;
    message.truncate(cut);
    (message, Some(TrimNotice { original_size }))
}

/// A question shorter than two characters after trimming is not worth
/// a round trip to the backend.
pub fn validate_question(question: &str) -> Result<(), ContextError> {
    if !question.is_empty() && question.trim().chars().count() <= 1 {
        debug!("query string has only 1 or 0 characters after stripping");
        return Err(ContextError::QuestionTooShort);
    }
    Ok(())
}

pub fn validate_stdin(stdin: &str) -> Result<(), ContextError> {
    if !stdin.is_empty() && stdin.trim().chars().count() <= 1 {
        debug!("stdin has only 1 or 0 characters after stripping");
        return Err(ContextError::StdinTooShort);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn sources(question: &str, stdin: &str, attachment: &str, terminal: &str) -> InputSources {
        InputSources {
            question: String::from(question),
            stdin: String::from(stdin),
            attachment: String::from(attachment),
            attachment_mimetype: String::new(),
            terminal_output: String::from(terminal),
        }
    }

    #[test]
    fn all_four_sources_drop_stdin() {
        let assembled = sources("q", "s", "a", "t").assemble().expect("assembly to succeed");
        assert_eq!(assembled, "q a");
    }

    #[test]
    fn question_attachment_terminal() {
        let assembled = sources("q", "", "a", "t").assemble().expect("assembly to succeed");
        assert_eq!(assembled, "q a t");
    }

    #[test]
    fn question_terminal() {
        let assembled = sources("q", "", "", "t").assemble().expect("assembly to succeed");
        assert_eq!(assembled, "q t");
    }

    #[test]
    fn question_attachment() {
        let assembled = sources("q", "", "a", "").assemble().expect("assembly to succeed");
        assert_eq!(assembled, "q a");
    }

    #[test]
    fn stdin_attachment() {
        let assembled = sources("", "s", "a", "").assemble().expect("assembly to succeed");
        assert_eq!(assembled, "s a");
    }

    #[test]
    fn stdin_question_puts_question_first() {
        let assembled =
            sources("query", "stdin", "", "").assemble().expect("assembly to succeed");
        assert_eq!(assembled, "query stdin");
    }

    #[test]
    fn single_sources_fall_through_in_order() {
        assert_eq!(sources("q", "", "", "").assemble().expect("question"), "q");
        assert_eq!(sources("", "s", "", "").assemble().expect("stdin"), "s");
        assert_eq!(sources("", "", "a", "").assemble().expect("attachment"), "a");
        assert_eq!(sources("", "", "", "t").assemble().expect("terminal"), "t");
    }

    #[test]
    fn stdin_terminal_prefers_stdin() {
        // No combination rule covers stdin + terminal, so the
        // fall-through ordering applies.
        let assembled = sources("", "s", "", "t").assemble().expect("assembly to succeed");
        assert_eq!(assembled, "s");
    }

    #[test]
    fn empty_input_errors() {
        assert_eq!(
            sources("", "", "", "").assemble().expect_err("assembly to fail"),
            ContextError::EmptyInput
        );
    }

    #[test]
    fn short_message_is_untouched() {
        let (message, notice) = trim_message(String::from("how do I list files?"));
        assert_eq!(message, "how do I list files?");
        assert_eq!(notice, None);
    }

    #[test]
    fn oversized_message_is_trimmed_to_the_cap() {
        let (message, notice) = trim_message("x".repeat(consts::MAX_QUESTION_SIZE + 500));
        assert_eq!(message.len(), consts::MAX_QUESTION_SIZE);
        assert_eq!(
            notice,
            Some(TrimNotice { original_size: consts::MAX_QUESTION_SIZE + 500 })
        );
    }

    #[test]
    fn trim_respects_char_boundaries() {
        // 3-byte characters that won't line up with the cap.
        let (message, notice) = trim_message("€".repeat(consts::MAX_QUESTION_SIZE / 3 + 10));
        assert!(message.len() <= consts::MAX_QUESTION_SIZE);
        assert!(notice.is_some());
        assert!(message.chars().all(|c| c == '€'));
    }

    #[test]
    fn question_length_boundaries() {
        assert_eq!(validate_question(""), Ok(()));
        assert_eq!(validate_question("a"), Err(ContextError::QuestionTooShort));
        assert_eq!(validate_question(" a "), Err(ContextError::QuestionTooShort));
        assert_eq!(validate_question("ab"), Ok(()));

        assert_eq!(validate_stdin("x"), Err(ContextError::StdinTooShort));
        assert_eq!(validate_stdin("xy"), Ok(()));
    }
}
