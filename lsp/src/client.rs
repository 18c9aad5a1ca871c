//! One language server process bound to one workspace root.
//!
//! A client is only handed out after the `initialize` handshake succeeded.
//! It tracks which documents it has opened (and their versions) and keeps
//! the latest diagnostics the server published for each file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::process::Child;
use tokio::sync::broadcast;

use crate::config::Timeouts;
use crate::connection::Connection;
use crate::diagnostics::{DiagnosticsStore, DiagnosticsWaiter};
use crate::error::{LspError, Result};
use crate::language;
use crate::protocol::{
    self, DefinitionResponse, DocumentSymbolResponse, NotificationKind, RequestKind,
    ServerNotification, WireDiagnostic, WireHover, WireLocation, WireSymbolInformation,
};
use crate::registry::ServerConfig;
use crate::transport::Transport;
use crate::types::{
    ClientState, ClientStatus, Diagnostic, DiagnosticsSnapshot, DocumentSymbols, HoverResult,
    Location, SymbolInformation,
};

const PUBLISH_CHANNEL_CAPACITY: usize = 64;

pub struct LspClient {
    server_id: String,
    root: PathBuf,
    language_id: Option<String>,
    connection: Connection,
    /// Open documents and their current version.
    documents: tokio::sync::Mutex<HashMap<PathBuf, i32>>,
    diagnostics: Arc<Mutex<DiagnosticsStore>>,
    published: broadcast::Sender<PathBuf>,
    state: Mutex<ClientState>,
    process: tokio::sync::Mutex<Option<Child>>,
    timeouts: Timeouts,
}

impl std::fmt::Debug for LspClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LspClient")
            .field("server_id", &self.server_id)
            .field("root", &self.root)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl LspClient {
    /// Connect over `transport` and run the initialize handshake.
    ///
    /// On any failure the connection is closed and the process killed before
    /// the error is returned.
    pub async fn start(
        server: &ServerConfig,
        root: PathBuf,
        transport: Transport,
        init_options: Option<Value>,
        timeouts: Timeouts,
    ) -> Result<Arc<Self>> {
        let Transport {
            reader,
            writer,
            process,
        } = transport;
        let connection = Connection::new(server.id(), reader, writer, timeouts.request);
        let (published, _) = broadcast::channel(PUBLISH_CHANNEL_CAPACITY);

        let client = Arc::new(Self {
            server_id: server.id().to_string(),
            root,
            language_id: server.language_id().map(String::from),
            connection,
            documents: tokio::sync::Mutex::new(HashMap::new()),
            diagnostics: Arc::new(Mutex::new(DiagnosticsStore::new())),
            published,
            state: Mutex::new(ClientState::Uninitialized),
            process: tokio::sync::Mutex::new(process),
            timeouts,
        });
        client.register_handlers(server.placeholder_first_publish(), init_options.clone());
        client.set_state(ClientState::Initializing);

        let handshake = tokio::time::timeout(
            timeouts.initialize,
            client.initialize(init_options.as_ref()),
        )
        .await;
        let outcome = match handshake {
            Ok(Ok(())) => Ok(()),
            Ok(Err(LspError::RequestTimeout { .. })) | Err(_) => {
                Err(LspError::InitializationTimeout {
                    server_id: client.server_id.clone(),
                    timeout: timeouts.initialize,
                })
            }
            Ok(Err(e)) => Err(LspError::Initialization {
                server_id: client.server_id.clone(),
                reason: e.to_string(),
            }),
        };

        if let Err(e) = outcome {
            client.abort().await;
            return Err(e);
        }

        client.set_state(ClientState::Ready);
        tracing::info!(
            "LSP server '{}' initialized for {}",
            client.server_id,
            client.root.display()
        );
        Ok(client)
    }

    fn register_handlers(&self, placeholder_first_publish: bool, init_options: Option<Value>) {
        let store = self.diagnostics.clone();
        let published = self.published.clone();
        let server_id = self.server_id.clone();
        self.connection.on_notification(
            NotificationKind::PublishDiagnostics,
            Arc::new(move |notification: ServerNotification| {
                let ServerNotification::PublishDiagnostics(params) = notification else {
                    return;
                };
                let Some(path) = protocol::file_uri_to_path(&params.uri) else {
                    tracing::debug!("'{server_id}' published diagnostics for non-file URI {}", params.uri);
                    return;
                };
                let items: Vec<Diagnostic> = params
                    .diagnostics
                    .into_iter()
                    .map(WireDiagnostic::into_diagnostic)
                    .collect();
                tracing::debug!(
                    server = %server_id,
                    path = %path.display(),
                    count = items.len(),
                    "Diagnostics updated"
                );
                let existed = store
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .replace(path.clone(), items);
                if placeholder_first_publish && !existed {
                    return;
                }
                let _ = published.send(path);
            }),
        );

        let server_id = self.server_id.clone();
        self.connection.on_notification(
            NotificationKind::LogMessage,
            Arc::new(move |notification: ServerNotification| {
                if let ServerNotification::LogMessage(msg) = notification {
                    if msg.kind <= 2 {
                        tracing::debug!("[{server_id}] {}", msg.message);
                    } else {
                        tracing::trace!("[{server_id}] {}", msg.message);
                    }
                }
            }),
        );
        let server_id = self.server_id.clone();
        self.connection.on_notification(
            NotificationKind::ShowMessage,
            Arc::new(move |notification: ServerNotification| {
                if let ServerNotification::ShowMessage(msg) = notification {
                    tracing::debug!("[{server_id}] {}", msg.message);
                }
            }),
        );
        self.connection.on_notification(
            NotificationKind::Progress,
            Arc::new(|notification: ServerNotification| {
                tracing::trace!(?notification, "progress");
            }),
        );

        for kind in [
            RequestKind::WorkDoneProgressCreate,
            RequestKind::RegisterCapability,
            RequestKind::UnregisterCapability,
        ] {
            self.connection
                .on_request(kind, Arc::new(|_: Option<Value>| Ok(Value::Null)));
        }
        self.connection.on_request(
            RequestKind::Configuration,
            Arc::new(move |params: Option<Value>| {
                let count = params
                    .as_ref()
                    .and_then(|p| p["items"].as_array())
                    .map_or(0, Vec::len);
                let entry = init_options.clone().unwrap_or_else(|| json!({}));
                Ok(Value::Array(vec![entry; count]))
            }),
        );
        let folders = protocol::path_to_file_uri(&self.root).map(|uri| {
            json!([{
                "uri": uri.as_str(),
                "name": self.root.file_name().map_or_else(
                    || String::from("workspace"),
                    |n| n.to_string_lossy().into_owned(),
                ),
            }])
        });
        self.connection.on_request(
            RequestKind::WorkspaceFolders,
            Arc::new(move |_: Option<Value>| match &folders {
                Ok(value) => Ok(value.clone()),
                Err(e) => Err(protocol::ResponseError::internal(e.to_string())),
            }),
        );
    }

    async fn initialize(&self, init_options: Option<&Value>) -> Result<()> {
        let root_uri = protocol::path_to_file_uri(&self.root)?;
        let params = protocol::initialize_params(root_uri.as_str(), &self.root, init_options);
        self.connection
            .send_request("initialize", Some(params), Some(self.timeouts.initialize))
            .await?;
        self.connection
            .send_notification("initialized", Some(json!({})))
            .await?;
        if let Some(options) = init_options {
            self.connection
                .send_notification(
                    "workspace/didChangeConfiguration",
                    Some(json!({ "settings": options })),
                )
                .await?;
        }
        Ok(())
    }

    fn set_state(&self, state: ClientState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    #[must_use]
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current state. A ready client whose server hung up reports `Closed`.
    #[must_use]
    pub fn state(&self) -> ClientState {
        let state = *self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state == ClientState::Ready && self.connection.is_closed() {
            ClientState::Closed
        } else {
            state
        }
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.state() == ClientState::Ready
    }

    #[must_use]
    pub fn status(&self) -> ClientStatus {
        ClientStatus {
            server_id: self.server_id.clone(),
            root: self.root.clone(),
            state: self.state(),
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(LspError::ConnectionClosed)
        }
    }

    fn language_for(&self, path: &Path) -> String {
        self.language_id
            .clone()
            .unwrap_or_else(|| language::language_id(path).to_string())
    }

    /// Open `path` (absolute) or resend its full text if already open.
    ///
    /// The first open sends `didOpen` at version 0 and forgets stale
    /// diagnostics; each later call sends `didChange` at the next version.
    pub async fn open_file(&self, path: &Path) -> Result<()> {
        self.ensure_ready()?;
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| LspError::FileRead {
                path: path.to_path_buf(),
                source,
            })?;
        let uri = protocol::path_to_file_uri(path)?;

        let mut documents = self.documents.lock().await;
        if let Some(version) = documents.get_mut(path) {
            *version += 1;
            let params = protocol::did_change_params(uri.as_str(), *version, &text);
            self.connection
                .send_notification("textDocument/didChange", Some(params))
                .await
        } else {
            documents.insert(path.to_path_buf(), 0);
            self.diagnostics
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear(path);
            let params =
                protocol::did_open_params(uri.as_str(), &self.language_for(path), 0, &text);
            self.connection
                .send_notification("textDocument/didOpen", Some(params))
                .await
        }
    }

    /// Version most recently sent for `path`, if it is open.
    pub async fn document_version(&self, path: &Path) -> Option<i32> {
        self.documents.lock().await.get(path).copied()
    }

    /// Start listening for publishes. Call before [`Self::open_file`].
    #[must_use]
    pub fn subscribe_diagnostics(&self) -> DiagnosticsWaiter {
        DiagnosticsWaiter::new(self.published.subscribe())
    }

    /// Wait for the next publish for `path`. Returns whether one arrived.
    pub async fn wait_for_diagnostics(&self, path: &Path, timeout: Option<Duration>) -> bool {
        self.subscribe_diagnostics()
            .wait(path, timeout.unwrap_or(self.timeouts.diagnostics))
            .await
    }

    /// Owned copy of every file's latest diagnostics.
    #[must_use]
    pub fn get_diagnostics(&self) -> HashMap<PathBuf, Vec<Diagnostic>> {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .to_map()
    }

    #[must_use]
    pub fn diagnostics_for(&self, path: &Path) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .map(<[Diagnostic]>::to_vec)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    async fn request(&self, method: &str, params: Value, timeout: Option<Duration>) -> Result<Value> {
        self.ensure_ready()?;
        self.connection
            .send_request(method, Some(params), timeout)
            .await
    }

    pub async fn hover(
        &self,
        path: &Path,
        line: u32,
        character: u32,
        timeout: Option<Duration>,
    ) -> Result<HoverResult> {
        const METHOD: &str = "textDocument/hover";
        self.open_file(path).await?;
        let uri = protocol::path_to_file_uri(path)?;
        let value = self
            .request(
                METHOD,
                protocol::text_document_position(uri.as_str(), line, character),
                timeout,
            )
            .await?;
        let hover: WireHover = protocol::decode_result(METHOD, value)?;
        let contents = hover.contents.normalize();
        if contents.trim().is_empty() {
            return Err(LspError::NoResult);
        }
        Ok(HoverResult {
            contents,
            range: hover.range,
            language: self.language_for(path),
        })
    }

    pub async fn definition(
        &self,
        path: &Path,
        line: u32,
        character: u32,
        timeout: Option<Duration>,
    ) -> Result<Vec<Location>> {
        const METHOD: &str = "textDocument/definition";
        self.open_file(path).await?;
        let uri = protocol::path_to_file_uri(path)?;
        let value = self
            .request(
                METHOD,
                protocol::text_document_position(uri.as_str(), line, character),
                timeout,
            )
            .await?;
        let response: DefinitionResponse = protocol::decode_result(METHOD, value)?;
        Ok(response.into_locations())
    }

    pub async fn references(
        &self,
        path: &Path,
        line: u32,
        character: u32,
        include_declaration: bool,
        timeout: Option<Duration>,
    ) -> Result<Vec<Location>> {
        const METHOD: &str = "textDocument/references";
        self.open_file(path).await?;
        let uri = protocol::path_to_file_uri(path)?;
        let value = self
            .request(
                METHOD,
                protocol::references_params(uri.as_str(), line, character, include_declaration),
                timeout,
            )
            .await?;
        let locations: Vec<WireLocation> = protocol::decode_result(METHOD, value)?;
        Ok(locations
            .into_iter()
            .map(WireLocation::into_location)
            .collect())
    }

    pub async fn workspace_symbol(
        &self,
        query: &str,
        timeout: Option<Duration>,
    ) -> Result<Vec<SymbolInformation>> {
        const METHOD: &str = "workspace/symbol";
        let value = self
            .request(METHOD, json!({ "query": query }), timeout)
            .await?;
        let symbols: Vec<WireSymbolInformation> = protocol::decode_result(METHOD, value)?;
        Ok(symbols
            .into_iter()
            .map(WireSymbolInformation::into_symbol)
            .collect())
    }

    pub async fn document_symbol(
        &self,
        path: &Path,
        timeout: Option<Duration>,
    ) -> Result<DocumentSymbols> {
        const METHOD: &str = "textDocument/documentSymbol";
        self.open_file(path).await?;
        let uri = protocol::path_to_file_uri(path)?;
        let value = self
            .request(
                METHOD,
                json!({ "textDocument": { "uri": uri.as_str() } }),
                timeout,
            )
            .await?;
        let response: DocumentSymbolResponse = protocol::decode_result(METHOD, value)?;
        Ok(response.into_symbols())
    }

    /// Graceful shutdown: `shutdown`, `exit`, close, then reap the process
    /// (killing it after the grace period). Repeated calls are no-ops.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(*state, ClientState::ShuttingDown | ClientState::Closed) {
                return;
            }
            *state = ClientState::ShuttingDown;
        }
        tracing::info!("Shutting down LSP server '{}'...", self.server_id);

        if !self.connection.is_closed()
            && self
                .connection
                .send_request("shutdown", None, Some(self.timeouts.shutdown))
                .await
                .is_ok()
        {
            let _ = self.connection.send_notification("exit", None).await;
        }
        self.connection.close().await;
        self.reap(self.timeouts.shutdown).await;
        self.set_state(ClientState::Closed);
    }

    /// Tear down after a failed handshake.
    async fn abort(&self) {
        self.connection.close().await;
        self.reap(Duration::ZERO).await;
        self.set_state(ClientState::Closed);
    }

    async fn reap(&self, grace: Duration) {
        let Some(mut child) = self.process.lock().await.take() else {
            return;
        };
        if tokio::time::timeout(grace, child.wait()).await.is_err() {
            tracing::debug!("LSP '{}' didn't exit in time, killing", self.server_id);
            let _ = child.kill().await;
        }
    }
}
