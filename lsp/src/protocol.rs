//! LSP message shapes: JSON-RPC envelopes, request params, and the wire
//! structs that are normalized into [`crate::types`] at the boundary.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LspError, Result};
use crate::types::{
    Diagnostic, DiagnosticCode, DiagnosticSeverity, DocumentSymbol, DocumentSymbols, Location,
    Range, SymbolInformation, SymbolKind,
};

/// JSON-RPC "method not found".
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC "internal error".
pub(crate) const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> Notification<'a> {
    pub fn new(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// JSON-RPC error object, both received from servers and sent in replies
/// to server-initiated requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
}

impl ResponseError {
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: INTERNAL_ERROR,
            message: message.into(),
        }
    }
}

impl From<ResponseError> for LspError {
    fn from(err: ResponseError) -> Self {
        LspError::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}

pub(crate) fn response(id: Value, outcome: std::result::Result<Value, ResponseError>) -> Value {
    match outcome {
        Ok(result) => serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err(error) => serde_json::json!({ "jsonrpc": "2.0", "id": id, "error": error }),
    }
}

// ── Server → client notifications ──────────────────────────────────────

/// Notification kinds a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    PublishDiagnostics,
    Progress,
    LogMessage,
    ShowMessage,
}

impl NotificationKind {
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "textDocument/publishDiagnostics" => Some(Self::PublishDiagnostics),
            "$/progress" => Some(Self::Progress),
            "window/logMessage" => Some(Self::LogMessage),
            "window/showMessage" => Some(Self::ShowMessage),
            _ => None,
        }
    }
}

/// A decoded server notification.
#[derive(Debug, Clone)]
pub enum ServerNotification {
    PublishDiagnostics(PublishDiagnosticsParams),
    Progress(Value),
    LogMessage(MessageParams),
    ShowMessage(MessageParams),
}

impl ServerNotification {
    /// Decode params for a known kind.
    pub fn decode(kind: NotificationKind, params: Option<Value>) -> serde_json::Result<Self> {
        let params = params.unwrap_or(Value::Null);
        Ok(match kind {
            NotificationKind::PublishDiagnostics => {
                Self::PublishDiagnostics(serde_json::from_value(params)?)
            }
            NotificationKind::Progress => Self::Progress(params),
            NotificationKind::LogMessage => Self::LogMessage(serde_json::from_value(params)?),
            NotificationKind::ShowMessage => Self::ShowMessage(serde_json::from_value(params)?),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishDiagnosticsParams {
    pub uri: String,
    #[serde(default)]
    pub version: Option<i32>,
    pub diagnostics: Vec<WireDiagnostic>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageParams {
    #[serde(rename = "type")]
    pub kind: u8,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireDiagnostic {
    pub range: Range,
    #[serde(default)]
    pub severity: Option<u64>,
    #[serde(default)]
    pub code: Option<DiagnosticCode>,
    #[serde(default)]
    pub source: Option<String>,
    pub message: String,
}

impl WireDiagnostic {
    /// Missing or out-of-range severity is reported as an error.
    pub fn into_diagnostic(self) -> Diagnostic {
        Diagnostic::new(
            self.range,
            self.severity
                .and_then(DiagnosticSeverity::from_lsp)
                .unwrap_or(DiagnosticSeverity::Error),
            self.code,
            self.source.filter(|s| !s.is_empty()),
            self.message,
        )
    }
}

// ── Server → client requests ───────────────────────────────────────────

/// Server-initiated requests the client knows how to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    WorkDoneProgressCreate,
    Configuration,
    RegisterCapability,
    UnregisterCapability,
    WorkspaceFolders,
}

impl RequestKind {
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "window/workDoneProgress/create" => Some(Self::WorkDoneProgressCreate),
            "workspace/configuration" => Some(Self::Configuration),
            "client/registerCapability" => Some(Self::RegisterCapability),
            "client/unregisterCapability" => Some(Self::UnregisterCapability),
            "workspace/workspaceFolders" => Some(Self::WorkspaceFolders),
            _ => None,
        }
    }
}

// ── Client → server params ─────────────────────────────────────────────

pub(crate) fn initialize_params(
    root_uri: &str,
    root: &Path,
    init_options: Option<&Value>,
) -> Value {
    let folder_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("workspace"));

    let mut params = serde_json::json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "rootPath": root.to_string_lossy(),
        "workspaceFolders": [{
            "uri": root_uri,
            "name": folder_name
        }],
        "capabilities": {
            "window": {
                "workDoneProgress": true
            },
            "workspace": {
                "configuration": true,
                "workspaceFolders": true,
                "symbol": {
                    "dynamicRegistration": false
                }
            },
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "didOpen": true,
                    "didChange": true,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": false
                },
                "hover": {
                    "contentFormat": ["markdown", "plaintext"]
                },
                "definition": {
                    "linkSupport": true
                },
                "references": {},
                "documentSymbol": {
                    "hierarchicalDocumentSymbolSupport": true
                },
                "publishDiagnostics": {
                    "relatedInformation": false,
                    "versionSupport": true
                }
            }
        }
    });

    if let Some(options) = init_options {
        params["initializationOptions"] = options.clone();
    }
    params
}

pub(crate) fn did_open_params(uri: &str, language_id: &str, version: i32, text: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn did_change_params(uri: &str, version: i32, text: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": [{
            "text": text
        }]
    })
}

pub(crate) fn text_document_position(uri: &str, line: u32, character: u32) -> Value {
    serde_json::json!({
        "textDocument": { "uri": uri },
        "position": { "line": line, "character": character }
    })
}

pub(crate) fn references_params(
    uri: &str,
    line: u32,
    character: u32,
    include_declaration: bool,
) -> Value {
    let mut params = text_document_position(uri, line, character);
    params["context"] = serde_json::json!({ "includeDeclaration": include_declaration });
    params
}

// ── Hover ──────────────────────────────────────────────────────────────

/// `MarkedString` entry: either bare text or a language-tagged code block.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MarkedString {
    Text(String),
    LanguageString { language: String, value: String },
}

impl MarkedString {
    fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::LanguageString { language, value } => fenced(language, value),
        }
    }
}

/// Every shape `Hover.contents` can take on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HoverContents {
    PlainText(String),
    Markup { kind: String, value: String },
    LanguageString { language: String, value: String },
    MarkedStrings(Vec<MarkedString>),
}

impl HoverContents {
    /// Flatten into a single markdown/plaintext string.
    pub fn normalize(&self) -> String {
        match self {
            Self::PlainText(text) => text.clone(),
            Self::Markup { value, .. } => value.clone(),
            Self::LanguageString { language, value } => fenced(language, value),
            Self::MarkedStrings(items) => items
                .iter()
                .map(MarkedString::render)
                .filter(|s| !s.trim().is_empty())
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

fn fenced(language: &str, value: &str) -> String {
    if language.is_empty() {
        return value.to_string();
    }
    format!("```{language}\n{value}\n```")
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireHover {
    pub contents: HoverContents,
    #[serde(default)]
    pub range: Option<Range>,
}

// ── Locations and symbols ──────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireLocation {
    pub uri: String,
    pub range: Range,
}

impl WireLocation {
    pub fn into_location(self) -> Location {
        Location {
            path: file_uri_to_path(&self.uri),
            uri: self.uri,
            range: self.range,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireLocationLink {
    pub target_uri: String,
    pub target_range: Range,
    #[serde(default)]
    pub target_selection_range: Option<Range>,
}

/// `textDocument/definition` returns `Location | Location[] | LocationLink[]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum DefinitionResponse {
    Single(WireLocation),
    Locations(Vec<WireLocation>),
    Links(Vec<WireLocationLink>),
}

impl DefinitionResponse {
    pub fn into_locations(self) -> Vec<Location> {
        match self {
            Self::Single(loc) => vec![loc.into_location()],
            Self::Locations(locs) => locs.into_iter().map(WireLocation::into_location).collect(),
            Self::Links(links) => links
                .into_iter()
                .map(|link| Location {
                    path: file_uri_to_path(&link.target_uri),
                    uri: link.target_uri,
                    range: link.target_selection_range.unwrap_or(link.target_range),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireSymbolInformation {
    pub name: String,
    pub kind: SymbolKind,
    pub location: WireLocation,
    #[serde(default)]
    pub container_name: Option<String>,
}

impl WireSymbolInformation {
    pub fn into_symbol(self) -> SymbolInformation {
        SymbolInformation {
            name: self.name,
            kind: self.kind,
            location: self.location.into_location(),
            container_name: self.container_name,
        }
    }
}

/// `textDocument/documentSymbol` returns `DocumentSymbol[] | SymbolInformation[]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum DocumentSymbolResponse {
    Nested(Vec<DocumentSymbol>),
    Flat(Vec<WireSymbolInformation>),
}

impl DocumentSymbolResponse {
    pub fn into_symbols(self) -> DocumentSymbols {
        match self {
            Self::Nested(items) => DocumentSymbols::Nested(items),
            Self::Flat(items) => DocumentSymbols::Flat(
                items
                    .into_iter()
                    .map(WireSymbolInformation::into_symbol)
                    .collect(),
            ),
        }
    }
}

/// Decode a non-null result, mapping `null` to [`LspError::NoResult`].
pub(crate) fn decode_result<T: serde::de::DeserializeOwned>(method: &str, value: Value) -> Result<T> {
    if value.is_null() {
        return Err(LspError::NoResult);
    }
    serde_json::from_value(value).map_err(|e| LspError::protocol(method, e))
}

// ── Paths and URIs ─────────────────────────────────────────────────────

pub(crate) fn path_to_file_uri(path: &Path) -> Result<url::Url> {
    url::Url::from_file_path(path).map_err(|()| LspError::InvalidPath {
        path: path.to_path_buf(),
    })
}

pub(crate) fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
        .map(|p| normalize_path(&p))
}

/// Lexically resolve `.` and `..` components without touching the filesystem.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                if matches!(out.last(), Some(Component::Normal(_))) {
                    out.pop();
                }
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Make `path` absolute against `cwd`, then normalize it.
pub(crate) fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&cwd.join(path))
    }
}
