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

//! A stub inference backend: a bare TCP accept loop that answers
//! every POST with a canned `data.text` body. Keeps the tests
//! hermetic without pulling in an http server.

use std::{
    io::{Read as _, Write as _},
    net::TcpListener,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

pub struct StubBackend {
    /// `http://127.0.0.1:<port>`, ready for the daemon config.
    pub endpoint: String,
    hits: Arc<AtomicUsize>,
}

impl StubBackend {
    /// Serve `answer` forever on an ephemeral port.
    pub fn start(answer: &str) -> anyhow::Result<StubBackend> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let endpoint = format!("http://{}", listener.local_addr()?);
        let hits = Arc::new(AtomicUsize::new(0));

        let body = format!(r#"{{"data": {{"text": "{answer}"}}}}"#);
        let thread_hits = Arc::clone(&hits);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let mut stream = match stream {
                    Ok(s) => s,
                    Err(_) => return,
                };
                thread_hits.fetch_add(1, Ordering::SeqCst);

                let mut buf = [0u8; 16 * 1024];
                let _ = stream.read(&mut buf);

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });

        Ok(StubBackend { endpoint, hits })
    }

    /// How many requests the daemon actually sent us.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}
