//! Error taxonomy for the LSP subsystem.

use std::path::PathBuf;
use std::time::Duration;

/// Malformed or truncated wire data. Fatal to the connection that produced it.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),
    #[error("Content-Length {len} exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("header line is not valid UTF-8")]
    InvalidHeaderEncoding,
    #[error("unexpected EOF while reading headers")]
    EofInHeaders,
    #[error("unexpected EOF while reading frame body")]
    EofInBody,
    #[error("I/O error on LSP stream: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum LspError {
    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error("LSP request '{method}' timed out after {}ms", timeout.as_millis())]
    RequestTimeout { method: String, timeout: Duration },

    #[error("LSP server error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("LSP server '{server_id}' did not initialize within {}ms", timeout.as_millis())]
    InitializationTimeout { server_id: String, timeout: Duration },

    #[error("LSP server '{server_id}' failed to initialize: {reason}")]
    Initialization { server_id: String, reason: String },

    #[error("LSP server '{server_id}' is unavailable: {reason}. Install with: {hint}")]
    ServerUnavailable {
        server_id: String,
        reason: String,
        hint: String,
    },

    #[error("failed to spawn LSP server '{server_id}': {source}")]
    Spawn {
        server_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no LSP server available for {}", path.display())]
    NoServerAvailable { path: PathBuf },

    #[error("no result from language server")]
    NoResult,

    #[error("LSP connection closed")]
    ConnectionClosed,

    #[error("failed to read {}: {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot convert path to file URI: {}", path.display())]
    InvalidPath { path: PathBuf },

    #[error("unexpected response to '{method}': {reason}")]
    Protocol { method: String, reason: String },
}

impl LspError {
    /// The server answered, but had nothing to say about the position.
    #[must_use]
    pub fn is_no_result(&self) -> bool {
        matches!(self, Self::NoResult)
    }

    /// A deadline elapsed; retrying at a higher layer may succeed.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::RequestTimeout { .. } | Self::InitializationTimeout { .. }
        )
    }

    /// Installation hint for an unavailable server, if this error carries one.
    #[must_use]
    pub fn install_hint(&self) -> Option<&str> {
        match self {
            Self::ServerUnavailable { hint, .. } => Some(hint),
            _ => None,
        }
    }

    pub(crate) fn protocol(method: &str, reason: impl ToString) -> Self {
        Self::Protocol {
            method: method.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = LspError> = std::result::Result<T, E>;
