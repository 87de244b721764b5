#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use harvester::{
    Checkpoint, Communicator, RawRecord, RecordHeader, RecordWriter, ResponseEnvelope, StateError,
    StateManager, TransportError, Verb, WriterError,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A scripted [`Communicator`]: each call to `request` pops the next queued
/// response (or error) and records the `(verb, params)` it was called with,
/// so a test can assert on exact call order and parameter shape.
pub struct FakeCommunicator {
    responses: Mutex<Vec<FakeResponse>>,
    calls: Mutex<Vec<RecordedCall>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub verb: &'static str,
    pub params: Vec<(String, String)>,
}

pub enum FakeResponse {
    Envelope(ResponseEnvelope),
    Transport(TransportError),
}

impl FakeCommunicator {
    pub fn new(responses: Vec<FakeResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().rev().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Communicator for FakeCommunicator {
    async fn request(
        &self,
        verb: Verb,
        params: &[(&str, &str)],
    ) -> Result<ResponseEnvelope, TransportError> {
        self.calls.lock().unwrap().push(RecordedCall {
            verb: verb.as_str(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });

        match self.responses.lock().unwrap().pop() {
            Some(FakeResponse::Envelope(envelope)) => Ok(envelope),
            Some(FakeResponse::Transport(err)) => Err(err),
            None => panic!("FakeCommunicator ran out of scripted responses"),
        }
    }
}

/// An in-memory [`StateManager`] that records every `save_state` call so a
/// test can assert on checkpoint ordering.
#[derive(Default)]
pub struct FakeStateManager {
    checkpoint: Mutex<Option<Checkpoint>>,
    date: Mutex<Option<String>>,
    saved_checkpoints: Mutex<Vec<Checkpoint>>,
    clear_count: Mutex<usize>,
}

impl FakeStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            checkpoint: Mutex::new(Some(checkpoint)),
            ..Self::default()
        }
    }

    pub fn saved_checkpoints(&self) -> Vec<Checkpoint> {
        self.saved_checkpoints.lock().unwrap().clone()
    }

    pub fn clear_count(&self) -> usize {
        *self.clear_count.lock().unwrap()
    }

    pub fn final_date(&self) -> Option<String> {
        self.date.lock().unwrap().clone()
    }

    pub fn has_checkpoint(&self) -> bool {
        self.checkpoint.lock().unwrap().is_some()
    }
}

/// A [`StateManager`] whose `load_state` always returns a corrupt result, to
/// exercise the `CorruptStateError` path without going through a real file.
pub struct CorruptStateManager {
    pub found: usize,
    clear_count: Mutex<usize>,
}

impl CorruptStateManager {
    pub fn new(found: usize) -> Self {
        Self {
            found,
            clear_count: Mutex::new(0),
        }
    }

    pub fn clear_count(&self) -> usize {
        *self.clear_count.lock().unwrap()
    }
}

#[async_trait]
impl StateManager for CorruptStateManager {
    async fn load_state(&self) -> Result<Option<Checkpoint>, StateError> {
        Err(StateError::Corrupt {
            path: "last_state.txt".to_string(),
            found: self.found,
        })
    }

    async fn save_state(&self, _checkpoint: &Checkpoint) -> Result<(), StateError> {
        panic!("save_state should not be called after a corrupt load");
    }

    async fn clear_state(&self) -> Result<(), StateError> {
        *self.clear_count.lock().unwrap() += 1;
        Ok(())
    }

    async fn load_date(&self) -> Result<Option<String>, StateError> {
        Ok(None)
    }

    async fn save_date(&self, _date: &str) -> Result<(), StateError> {
        panic!("save_date should not be called after a corrupt load");
    }
}

#[async_trait]
impl StateManager for FakeStateManager {
    async fn load_state(&self) -> Result<Option<Checkpoint>, StateError> {
        Ok(self.checkpoint.lock().unwrap().clone())
    }

    async fn save_state(&self, checkpoint: &Checkpoint) -> Result<(), StateError> {
        *self.checkpoint.lock().unwrap() = Some(checkpoint.clone());
        self.saved_checkpoints.lock().unwrap().push(checkpoint.clone());
        Ok(())
    }

    async fn clear_state(&self) -> Result<(), StateError> {
        *self.checkpoint.lock().unwrap() = None;
        *self.clear_count.lock().unwrap() += 1;
        Ok(())
    }

    async fn load_date(&self) -> Result<Option<String>, StateError> {
        Ok(self.date.lock().unwrap().clone())
    }

    async fn save_date(&self, date: &str) -> Result<(), StateError> {
        *self.date.lock().unwrap() = Some(date.to_string());
        Ok(())
    }
}

/// An in-memory [`RecordWriter`] that records every batch it was handed, in
/// order, so a test can assert on the exact record sequence and call count.
#[derive(Default)]
pub struct FakeRecordWriter {
    batches: Mutex<Vec<Vec<RawRecord>>>,
    latest_datestamp: Mutex<Option<String>>,
}

impl FakeRecordWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn all_identifiers(&self) -> Vec<String> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(|record| record.header.identifier.clone())
            .collect()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }
}

#[async_trait]
impl RecordWriter for FakeRecordWriter {
    async fn write(&self, records: &[RawRecord]) -> Result<Option<String>, WriterError> {
        let mut latest = self.latest_datestamp.lock().unwrap();
        for record in records {
            if latest.as_deref() < Some(record.header.datestamp.as_str()) {
                *latest = Some(record.header.datestamp.clone());
            }
        }
        self.batches.lock().unwrap().push(records.to_vec());
        Ok(latest.clone())
    }
}

pub fn record(identifier: &str, datestamp: &str, status: Option<&str>) -> RawRecord {
    RawRecord {
        header: RecordHeader {
            identifier: identifier.to_string(),
            datestamp: datestamp.to_string(),
            status: status.map(str::to_string),
        },
        xml: format!(
            "<record><header><identifier>{identifier}</identifier><datestamp>{datestamp}</datestamp></header></record>"
        ),
    }
}

pub fn list_records(
    response_date: &str,
    records: Vec<RawRecord>,
    resumption_token: Option<&str>,
) -> ResponseEnvelope {
    ResponseEnvelope::ListRecords {
        response_date: response_date.to_string(),
        records,
        resumption_token: resumption_token.map(str::to_string),
    }
}

pub fn identify(response_date: &str, granularity: Option<&str>) -> ResponseEnvelope {
    ResponseEnvelope::Identify {
        response_date: response_date.to_string(),
        granularity: granularity.map(str::to_string),
    }
}

pub fn error(response_date: &str, code: &str, text: &str) -> ResponseEnvelope {
    ResponseEnvelope::Error {
        response_date: response_date.to_string(),
        code: code.to_string(),
        text: text.to_string(),
    }
}

/// A raw-TCP mock OAI-PMH server, for the one end-to-end test that exercises
/// the real [`harvester::HttpCommunicator`] rather than a [`FakeCommunicator`].
pub struct MockOaiServer {
    pub endpoint: String,
    handle: JoinHandle<()>,
}

impl Drop for MockOaiServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Scripted pages, keyed by the request's effective cursor: `None` is the
/// initial request, `Some(token)` is a resumption request for that token.
pub struct MockOaiScript {
    pub identify: Option<String>,
    pub pages: HashMap<Option<String>, String>,
}

pub async fn start_mock_oai_server(script: MockOaiScript) -> anyhow::Result<MockOaiServer> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?;
    let endpoint = format!("http://{address}");

    let handle = tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(value) => value,
                Err(_) => break,
            };
            if let Err(error) = handle_connection(&mut socket, &script).await {
                eprintln!("mock OAI server request handling failed: {error}");
            }
        }
    });

    Ok(MockOaiServer { endpoint, handle })
}

async fn handle_connection(socket: &mut TcpStream, script: &MockOaiScript) -> anyhow::Result<()> {
    let mut buf = vec![0u8; 8192];
    let mut total = 0usize;
    loop {
        let bytes_read = socket.read(&mut buf[total..]).await?;
        if bytes_read == 0 {
            return Ok(());
        }
        total += bytes_read;
        if buf[..total].windows(4).any(|window| window == b"\r\n\r\n") {
            break;
        }
        if total == buf.len() {
            break;
        }
    }

    let request = String::from_utf8_lossy(&buf[..total]);
    let request_line = request.lines().next().unwrap_or_default();
    let path = request_line.split_whitespace().nth(1).unwrap_or("/");
    let params = parse_query_params(path);

    let body = match params.get("verb").map(String::as_str) {
        Some("Identify") => script
            .identify
            .clone()
            .unwrap_or_else(|| identify_body("2026-07-12T16:19:54Z", "YYYY-MM-DD")),
        Some("ListRecords") => {
            let key = params.get("resumptionToken").cloned();
            script
                .pages
                .get(&key)
                .cloned()
                .unwrap_or_else(|| error_body("badResumptionToken", "unscripted request"))
        }
        _ => error_body("badVerb", "unknown verb"),
    };

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/xml; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await?;
    Ok(())
}

fn parse_query_params(path: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let query = path.split_once('?').map(|(_, q)| q).unwrap_or("");
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.insert(
            key.to_string(),
            urlencoding_decode(value),
        );
    }
    params
}

fn urlencoding_decode(value: &str) -> String {
    value.replace("%3A", ":").replace("%2F", "/").replace('+', " ")
}

pub fn identify_body(response_date: &str, granularity: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <responseDate>{response_date}</responseDate>
  <Identify>
    <repositoryName>Mock Repository</repositoryName>
    <granularity>{granularity}</granularity>
  </Identify>
</OAI-PMH>"#
    )
}

pub fn list_records_body(
    response_date: &str,
    records_xml: &str,
    resumption_token: Option<&str>,
) -> String {
    let token_xml = resumption_token
        .map(|token| format!("<resumptionToken>{token}</resumptionToken>"))
        .unwrap_or_default();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <responseDate>{response_date}</responseDate>
  <ListRecords>{records_xml}{token_xml}</ListRecords>
</OAI-PMH>"#
    )
}

pub fn record_xml(identifier: &str, datestamp: &str) -> String {
    format!(
        r#"<record><header><identifier>{identifier}</identifier><datestamp>{datestamp}</datestamp></header><metadata><dc><title>x</title></dc></metadata></record>"#
    )
}

// `Harvester` takes ownership of its collaborators; these delegating impls
// let a test keep an `Arc` handle around to inspect recorded calls after
// `launch()` returns.

#[async_trait]
impl Communicator for Arc<FakeCommunicator> {
    async fn request(
        &self,
        verb: Verb,
        params: &[(&str, &str)],
    ) -> Result<ResponseEnvelope, TransportError> {
        (**self).request(verb, params).await
    }
}

#[async_trait]
impl StateManager for Arc<FakeStateManager> {
    async fn load_state(&self) -> Result<Option<Checkpoint>, StateError> {
        (**self).load_state().await
    }

    async fn save_state(&self, checkpoint: &Checkpoint) -> Result<(), StateError> {
        (**self).save_state(checkpoint).await
    }

    async fn clear_state(&self) -> Result<(), StateError> {
        (**self).clear_state().await
    }

    async fn load_date(&self) -> Result<Option<String>, StateError> {
        (**self).load_date().await
    }

    async fn save_date(&self, date: &str) -> Result<(), StateError> {
        (**self).save_date(date).await
    }
}

#[async_trait]
impl StateManager for Arc<CorruptStateManager> {
    async fn load_state(&self) -> Result<Option<Checkpoint>, StateError> {
        (**self).load_state().await
    }

    async fn save_state(&self, checkpoint: &Checkpoint) -> Result<(), StateError> {
        (**self).save_state(checkpoint).await
    }

    async fn clear_state(&self) -> Result<(), StateError> {
        (**self).clear_state().await
    }

    async fn load_date(&self) -> Result<Option<String>, StateError> {
        (**self).load_date().await
    }

    async fn save_date(&self, date: &str) -> Result<(), StateError> {
        (**self).save_date(date).await
    }
}

#[async_trait]
impl RecordWriter for Arc<FakeRecordWriter> {
    async fn write(&self, records: &[RawRecord]) -> Result<Option<String>, WriterError> {
        (**self).write(records).await
    }
}

pub fn error_body(code: &str, message: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <responseDate>2026-07-12T16:19:54Z</responseDate>
  <error code="{code}">{message}</error>
</OAI-PMH>"#
    )
}
