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

//! The HTTP client for the remote inference service: JSON POSTs with
//! a bounded retry policy, optional mutual TLS, and proxy routing.

use std::{fs, thread, time};

use cla_protocol::Question;
use serde_derive::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::BackendConfig;

/// Identifies the daemon to the backend.
const USER_AGENT: &str = concat!("cla-daemon/", env!("CARGO_PKG_VERSION"));

/// Total request budget, including retries.
const REQUEST_TIMEOUT: time::Duration = time::Duration::from_secs(30);

/// Total attempts for one submission.
const MAX_ATTEMPTS: u32 = 3;

/// Base of the exponential retry backoff.
const BACKOFF_BASE: time::Duration = time::Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum HttpError {
    /// Bad status, malformed response, or a connection-level failure.
    #[error("{0}")]
    RequestFailed(String),
    /// The configured client certificate chain could not be loaded.
    #[error("{0}")]
    Certificate(String),
}

/// The JSON body the inference service expects.
#[derive(Serialize, Debug)]
struct QueryPayload<'a> {
    question: &'a str,
    context: QueryContext<'a>,
}

#[derive(Serialize, Debug)]
struct QueryContext<'a> {
    stdin: &'a str,
    attachments: AttachmentsPayload<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    terminal: Option<TerminalPayload<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    systeminfo: Option<SystemInfoPayload<'a>>,
}

#[derive(Serialize, Debug)]
struct AttachmentsPayload<'a> {
    contents: &'a str,
    mimetype: &'a str,
}

#[derive(Serialize, Debug)]
struct TerminalPayload<'a> {
    output: &'a str,
}

#[derive(Serialize, Debug)]
struct SystemInfoPayload<'a> {
    os: &'a str,
    version: &'a str,
    arch: &'a str,
    id: &'a str,
}

impl<'a> QueryPayload<'a> {
    fn from_question(question: &'a Question) -> Self {
        QueryPayload {
            question: &question.message,
            context: QueryContext {
                stdin: &question.stdin.stdin,
                attachments: AttachmentsPayload {
                    contents: &question.attachment.contents,
                    mimetype: &question.attachment.mimetype,
                },
                terminal: if question.terminal.output.is_empty() {
                    None
                } else {
                    Some(TerminalPayload { output: &question.terminal.output })
                },
                systeminfo: if question.systeminfo.id.is_empty() {
                    None
                } else {
                    Some(SystemInfoPayload {
                        os: &question.systeminfo.os,
                        version: &question.systeminfo.version,
                        arch: &question.systeminfo.arch,
                        id: &question.systeminfo.id,
                    })
                },
            },
        }
    }
}

/// The inference backend as the daemon sees it.
pub struct Backend {
    config: BackendConfig,
}

impl Backend {
    pub fn new(config: BackendConfig) -> Self {
        Backend { config }
    }

    /// Submit the question to the backend and extract the answer text.
    ///
    /// Up to three attempts total; only 502/503/504 are retried (and
    /// only because this is a POST; nothing here issues GETs). Any
    /// other non-2xx status fails immediately.
    #[instrument(skip_all)]
    pub fn submit(&self, question: &Question) -> Result<String, HttpError> {
        let client = self.build_client()?;
        let payload = QueryPayload::from_question(question);
        let url = format!("{}/v1/query", self.config.endpoint.trim_end_matches('/'));

        info!("waiting for response from the backend");
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = client
                .post(&url)
                .json(&payload)
                .send()
                .map_err(|e| HttpError::RequestFailed(format!("sending query: {e}")))?;

            let status = response.status();
            if status.is_success() {
                return extract_answer(response);
            }

            if matches!(status.as_u16(), 502 | 503 | 504) && attempt < MAX_ATTEMPTS {
                let delay = BACKOFF_BASE * 2u32.pow(attempt - 1);
                warn!("backend returned {}, retrying in {:?}", status, delay);
                thread::sleep(delay);
                continue;
            }

            return Err(HttpError::RequestFailed(format!("backend returned status {status}")));
        }
    }

    /// A fresh client for this submission, so certificate problems
    /// surface on the call that hit them.
    fn build_client(&self) -> Result<reqwest::blocking::Client, HttpError> {
        let mut builder = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT);

        if !self.config.auth.verify_ssl {
            warn!("disabling TLS verification as per user request");
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let (Some(cert_file), Some(key_file)) =
            (&self.config.auth.cert_file, &self.config.auth.key_file)
        {
            debug!("loading client certificate from {:?}", cert_file);
            let mut pem = fs::read(cert_file).map_err(|e| {
                HttpError::Certificate(format!("reading cert file {cert_file:?}: {e}"))
            })?;
            let key = fs::read(key_file).map_err(|e| {
                HttpError::Certificate(format!("reading key file {key_file:?}: {e}"))
            })?;
            pem.extend_from_slice(&key);

            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| HttpError::Certificate(format!("loading cert chain: {e}")))?;
            builder = builder.identity(identity);
        }

        // Explicit proxies win; otherwise reqwest picks up http_proxy
        // and https_proxy from the environment on its own.
        if let Some(proxies) = &self.config.proxies {
            if let Some(http) = &proxies.http {
                let proxy = reqwest::Proxy::http(http)
                    .map_err(|e| HttpError::RequestFailed(format!("bad http proxy: {e}")))?;
                builder = builder.proxy(proxy);
            }
            if let Some(https) = &proxies.https {
                let proxy = reqwest::Proxy::https(https)
                    .map_err(|e| HttpError::RequestFailed(format!("bad https proxy: {e}")))?;
                builder = builder.proxy(proxy);
            }
        }

        builder
            .build()
            .map_err(|e| HttpError::RequestFailed(format!("building http client: {e}")))
    }
}

/// Pull `data.text` out of the response body. A missing or empty
/// text field is an empty answer, not an error; anything shaped
/// differently is.
fn extract_answer(response: reqwest::blocking::Response) -> Result<String, HttpError> {
    let body: serde_json::Value = response
        .json()
        .map_err(|e| HttpError::RequestFailed(format!("malformed response body: {e}")))?;

    let data = body
        .get("data")
        .and_then(serde_json::Value::as_object)
        .ok_or_else(|| HttpError::RequestFailed(String::from("response missing data object")))?;

    match data.get("text") {
        None | Some(serde_json::Value::Null) => Ok(String::new()),
        Some(serde_json::Value::String(text)) => Ok(text.clone()),
        Some(_) => Err(HttpError::RequestFailed(String::from("unexpected data.text shape"))),
    }
}

#[cfg(test)]
mod test {
    use std::{
        io::{Read as _, Write as _},
        net::TcpListener,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use super::*;
    use crate::config::BackendConfig;
    use ntest::timeout;

    /// A tiny canned-response HTTP server. Each connection consumes
    /// one entry from `responses`; the hit counter records how many
    /// requests actually arrived.
    fn stub_backend(responses: Vec<String>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("binding stub backend");
        let addr = listener.local_addr().expect("stub backend addr");
        let hits = Arc::new(AtomicUsize::new(0));

        let thread_hits = Arc::clone(&hits);
        std::thread::spawn(move || {
            for response in responses.into_iter() {
                let (mut stream, _) = match listener.accept() {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                thread_hits.fetch_add(1, Ordering::SeqCst);

                // Slurp the request until the blank line plus body;
                // we don't need to parse it.
                let mut buf = [0u8; 8192];
                let _ = stream.read(&mut buf);

                let _ = stream.write_all(response.as_bytes());
            }
        });

        (format!("http://{addr}"), hits)
    }

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn backend_for(endpoint: String) -> Backend {
        Backend::new(BackendConfig { endpoint, ..BackendConfig::default() })
    }

    fn question(message: &str) -> Question {
        Question { message: String::from(message), ..Question::default() }
    }

    #[test]
    #[timeout(30000)]
    fn extracts_the_answer_text() {
        let (endpoint, hits) =
            stub_backend(vec![http_response("200 OK", r#"{"data": {"text": "Use ls."}}"#)]);
        let answer = backend_for(endpoint).submit(&question("list files")).expect("an answer");
        assert_eq!(answer, "Use ls.");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[timeout(30000)]
    fn missing_text_field_is_an_empty_answer() {
        let (endpoint, _) = stub_backend(vec![http_response("200 OK", r#"{"data": {}}"#)]);
        let answer = backend_for(endpoint).submit(&question("list files")).expect("an answer");
        assert_eq!(answer, "");
    }

    #[test]
    #[timeout(30000)]
    fn missing_data_object_is_a_request_failure() {
        let (endpoint, _) =
            stub_backend(vec![http_response("200 OK", r#"{"text": "Use ls."}"#)]);
        let err = backend_for(endpoint)
            .submit(&question("list files"))
            .expect_err("a malformed response to fail");
        assert!(matches!(err, HttpError::RequestFailed(_)));
    }

    #[test]
    #[timeout(30000)]
    fn retries_503_three_times_then_fails() {
        let unavailable = http_response("503 Service Unavailable", "{}");
        let (endpoint, hits) = stub_backend(vec![
            unavailable.clone(),
            unavailable.clone(),
            unavailable.clone(),
        ]);

        let err = backend_for(endpoint)
            .submit(&question("list files"))
            .expect_err("retries to be exhausted");
        assert!(matches!(err, HttpError::RequestFailed(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    #[timeout(30000)]
    fn recovers_when_a_retry_succeeds() {
        let (endpoint, hits) = stub_backend(vec![
            http_response("502 Bad Gateway", "{}"),
            http_response("200 OK", r#"{"data": {"text": "Use ls."}}"#),
        ]);

        let answer = backend_for(endpoint).submit(&question("list files")).expect("an answer");
        assert_eq!(answer, "Use ls.");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    #[timeout(30000)]
    fn does_not_retry_500() {
        let (endpoint, hits) =
            stub_backend(vec![http_response("500 Internal Server Error", "{}")]);

        let err = backend_for(endpoint)
            .submit(&question("list files"))
            .expect_err("a 500 to fail immediately");
        assert!(matches!(err, HttpError::RequestFailed(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn payload_omits_empty_context_sections() {
        let q = question("list files");
        let payload = QueryPayload::from_question(&q);
        let body = serde_json::to_string(&payload).expect("serializing payload");
        assert_eq!(
            body,
            r#"{"question":"list files","context":{"stdin":"","attachments":{"contents":"","mimetype":""}}}"#
        );
    }

    #[test]
    fn payload_carries_terminal_and_systeminfo_when_present() {
        let mut q = question("why did this fail?");
        q.terminal.output = String::from("No such file or directory");
        q.systeminfo.os = String::from("linux");
        q.systeminfo.id = String::from("4d465f1c-0507-5dfa-9ea0-e2de1a9e90a5");

        let payload = QueryPayload::from_question(&q);
        let body = serde_json::to_value(&payload).expect("serializing payload");
        assert_eq!(body["context"]["terminal"]["output"], "No such file or directory");
        assert_eq!(body["context"]["systeminfo"]["os"], "linux");
    }

    #[test]
    fn missing_cert_files_error_before_any_request() {
        let mut config = BackendConfig::default();
        config.auth.cert_file = Some(std::path::PathBuf::from("/does/not/exist/cert.pem"));
        config.auth.key_file = Some(std::path::PathBuf::from("/does/not/exist/key.pem"));

        let err = Backend::new(config)
            .submit(&question("list files"))
            .expect_err("missing certs to fail");
        assert!(matches!(err, HttpError::Certificate(_)));
    }
}
