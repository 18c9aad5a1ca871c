//! In-process fake language server driven over `tokio::io::duplex`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use crate::codec::{FrameReader, FrameWriter};
use crate::registry::{ServerConfig, SpawnContext};
use crate::transport::{LaunchSpec, Launcher, Transport};

type PublishRule = Arc<dyn Fn(&str, &str) -> Vec<Value> + Send + Sync>;

/// Scripted server behavior. Unconfigured requests are answered with `null`.
#[derive(Clone, Default)]
pub(crate) struct FakeServer {
    results: HashMap<String, Value>,
    errors: HashMap<String, (i64, String)>,
    delays: HashMap<String, Duration>,
    publish: Option<PublishRule>,
    placeholder_first: bool,
    stall_initialize: bool,
    requests_after_init: Vec<(String, Value)>,
}

/// Every frame the fake server received, in order.
#[derive(Clone, Default)]
pub(crate) struct FakeLog(Arc<Mutex<Vec<Value>>>);

impl FakeLog {
    pub fn messages(&self) -> Vec<Value> {
        self.0.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.messages()
            .iter()
            .filter_map(|m| m["method"].as_str().map(String::from))
            .collect()
    }

    pub fn with_method(&self, method: &str) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter(|m| m["method"] == method)
            .collect()
    }

    /// Replies the client sent to server-initiated requests.
    pub fn replies(&self) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter(|m| m.get("method").is_none())
            .collect()
    }

    /// Poll until `done` holds for the recorded frames. Panics after 2 s.
    pub async fn wait_until(&self, what: &str, done: impl Fn(&[Value]) -> bool) {
        let poll = async {
            while !done(&self.messages()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(2), poll).await.is_err() {
            panic!("fake server never saw {what}; got {:?}", self.methods());
        }
    }

    /// Wait until at least `count` frames with `method` were recorded.
    pub async fn wait_for_method(&self, method: &str, count: usize) {
        self.wait_until(method, |msgs| {
            msgs.iter().filter(|m| m["method"] == method).count() >= count
        })
        .await;
    }

    fn push(&self, msg: Value) {
        self.0.lock().unwrap().push(msg);
    }
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn result(mut self, method: &str, value: Value) -> Self {
        self.results.insert(method.to_string(), value);
        self
    }

    pub fn error(mut self, method: &str, code: i64, message: &str) -> Self {
        self.errors
            .insert(method.to_string(), (code, message.to_string()));
        self
    }

    pub fn delay(mut self, method: &str, delay: Duration) -> Self {
        self.delays.insert(method.to_string(), delay);
        self
    }

    /// Publish diagnostics for the document after every didOpen/didChange.
    /// The rule gets the document URI and full text.
    pub fn publish_on_sync(
        mut self,
        rule: impl Fn(&str, &str) -> Vec<Value> + Send + Sync + 'static,
    ) -> Self {
        self.publish = Some(Arc::new(rule));
        self
    }

    /// Publish an empty list before the real one after didOpen.
    pub fn placeholder_first(mut self) -> Self {
        self.placeholder_first = true;
        self
    }

    pub fn stall_initialize(mut self) -> Self {
        self.stall_initialize = true;
        self
    }

    /// Send a request to the client once `initialized` arrives.
    pub fn request_after_init(mut self, method: &str, params: Value) -> Self {
        self.requests_after_init
            .push((method.to_string(), params));
        self
    }

    pub fn start(self) -> (Transport, FakeLog) {
        let (client_io, server_io) = tokio::io::duplex(256 * 1024);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, server_write) = tokio::io::split(server_io);
        let log = FakeLog::default();
        tokio::spawn(self.run(server_read, server_write, log.clone()));
        (
            Transport {
                reader: Box::new(client_read),
                writer: Box::new(client_write),
                process: None,
            },
            log,
        )
    }

    async fn run<R, W>(self, reader: R, writer: W, log: FakeLog)
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
        W: tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let mut reader = FrameReader::new(reader);
        let writer = Arc::new(tokio::sync::Mutex::new(FrameWriter::new(writer)));
        let mut next_server_id = 1000u64;

        while let Ok(Some(msg)) = reader.read_json().await {
            log.push(msg.clone());
            let method = msg["method"].as_str().map(String::from);
            let id = msg.get("id").cloned();

            match (method.as_deref(), id) {
                (Some("initialize"), Some(_)) if self.stall_initialize => {}
                (Some(method), Some(id)) => {
                    let reply = if let Some((code, message)) = self.errors.get(method) {
                        json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
                    } else {
                        let result = self.results.get(method).cloned().unwrap_or_else(|| {
                            if method == "initialize" {
                                json!({ "capabilities": {} })
                            } else {
                                Value::Null
                            }
                        });
                        json!({ "jsonrpc": "2.0", "id": id, "result": result })
                    };
                    match self.delays.get(method).copied() {
                        Some(delay) => {
                            let writer = writer.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                send(&writer, reply).await;
                            });
                        }
                        None => send(&writer, reply).await,
                    }
                }
                (Some("initialized"), None) => {
                    for (method, params) in &self.requests_after_init {
                        next_server_id += 1;
                        send(
                            &writer,
                            json!({ "jsonrpc": "2.0", "id": next_server_id, "method": method, "params": params }),
                        )
                        .await;
                    }
                }
                (Some("exit"), None) => break,
                (Some(method @ ("textDocument/didOpen" | "textDocument/didChange")), None) => {
                    let Some(rule) = &self.publish else { continue };
                    let uri = msg["params"]["textDocument"]["uri"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string();
                    let text = if method == "textDocument/didOpen" {
                        msg["params"]["textDocument"]["text"].as_str()
                    } else {
                        msg["params"]["contentChanges"][0]["text"].as_str()
                    }
                    .unwrap_or_default()
                    .to_string();

                    if self.placeholder_first && method == "textDocument/didOpen" {
                        send(&writer, publish_frame(&uri, &[])).await;
                    }
                    let diagnostics = rule(&uri, &text);
                    send(&writer, publish_frame(&uri, &diagnostics)).await;
                }
                _ => {}
            }
        }
    }
}

async fn send<W>(writer: &tokio::sync::Mutex<FrameWriter<W>>, msg: Value)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let _ = writer.lock().await.write_frame(&msg).await;
}

fn publish_frame(uri: &str, diagnostics: &[Value]) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "textDocument/publishDiagnostics",
        "params": { "uri": uri, "diagnostics": diagnostics }
    })
}

/// A wire diagnostic at `line`.
pub(crate) fn wire_diagnostic(line: u32, severity: u8, message: &str) -> Value {
    json!({
        "range": {
            "start": { "line": line, "character": 1 },
            "end": { "line": line, "character": 4 }
        },
        "severity": severity,
        "source": "compiler",
        "message": message
    })
}

/// Launcher that starts a fresh fake per launch and counts launches.
pub(crate) fn fake_launcher(server: FakeServer) -> (Launcher, Arc<AtomicUsize>, Arc<Mutex<Vec<FakeLog>>>) {
    let launches = Arc::new(AtomicUsize::new(0));
    let logs = Arc::new(Mutex::new(Vec::new()));
    let counter = launches.clone();
    let sink = logs.clone();
    let launcher: Launcher = Arc::new(move |_spec: &LaunchSpec, _root: &std::path::Path| {
        counter.fetch_add(1, Ordering::SeqCst);
        let (transport, log) = server.clone().start();
        sink.lock().unwrap().push(log);
        Ok(transport)
    });
    (launcher, launches, logs)
}

/// A server handling `keys` whose root is the nearest `marker` (else cwd) and
/// whose spawner succeeds without touching the filesystem. Spawn attempts are
/// counted.
pub(crate) fn counting_server(
    id: &str,
    keys: &[&str],
    marker: &'static str,
) -> (ServerConfig, Arc<AtomicUsize>) {
    let spawns = Arc::new(AtomicUsize::new(0));
    let counter = spawns.clone();
    let config = ServerConfig::new(
        id,
        keys.iter().copied(),
        Arc::new(move |file, cwd| {
            Some(crate::root::nearest_marker(file, &[marker]).unwrap_or_else(|| cwd.to_path_buf()))
        }),
        Arc::new(move |_root, _ctx: &SpawnContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(LaunchSpec::new("fake-server"))
        }),
    );
    (config, spawns)
}
