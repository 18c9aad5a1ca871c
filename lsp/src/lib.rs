//! Language server client and manager.
//!
//! Starts language servers on demand for the files a host touches, keeps one
//! client per (server, project root) pair, and answers hover, definition,
//! references, symbol and diagnostics queries through [`LspManager`].

pub mod client;
pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod manager;
pub mod registry;
pub mod servers;
pub mod transport;
pub mod types;

pub(crate) mod connection;
pub(crate) mod language;
pub(crate) mod protocol;
pub(crate) mod root;

#[cfg(test)]
mod test_support;

pub use client::LspClient;
pub use config::{CustomServer, LspConfig, Timeouts};
pub use diagnostics::DiagnosticsWaiter;
pub use error::{FramingError, LspError, Result};
pub use manager::{LspManager, ManagerSettings};
pub use registry::{ServerConfig, ServerRegistry, SpawnContext};
pub use transport::{LaunchSpec, Launcher, Transport};
pub use types::{
    ClientState, ClientStatus, Diagnostic, DiagnosticCode, DiagnosticSeverity,
    DiagnosticsSnapshot, DocumentSymbol, DocumentSymbols, HoverResult, Location, Position, Range,
    SymbolInformation, SymbolKind,
};
