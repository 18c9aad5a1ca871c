//! User-facing configuration for the LSP subsystem.
//!
//! Deserialized from the `[lsp]` table of the host's config file. Every field
//! has a default, so an absent table behaves like `enabled = true` with the
//! built-in servers only.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Environment variable that, when truthy, disables auto-install of servers.
pub const DISABLE_DOWNLOAD_ENV: &str = "OPENCODE_DISABLE_LSP_DOWNLOAD";

const fn default_true() -> bool {
    true
}

const fn default_request_timeout_ms() -> u64 {
    2_000
}

const fn default_initialize_timeout_ms() -> u64 {
    5_000
}

const fn default_diagnostics_timeout_ms() -> u64 {
    3_000
}

const fn default_shutdown_timeout_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LspConfig {
    /// Whether language servers are used at all. Default: true.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Never run installers for missing servers.
    #[serde(default)]
    pub disable_auto_install: bool,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_initialize_timeout_ms")]
    pub initialize_timeout_ms: u64,
    #[serde(default = "default_diagnostics_timeout_ms")]
    pub diagnostics_timeout_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Built-in server ids to drop from the registry (e.g. `["python"]`).
    #[serde(default)]
    pub disabled: Vec<String>,
    /// Where auto-installed servers go. Defaults to `<data dir>/plue/bin`.
    #[serde(default)]
    pub install_dir: Option<PathBuf>,
    /// Additional servers keyed by id. Registered after the built-ins.
    #[serde(default)]
    pub servers: BTreeMap<String, CustomServer>,
}

impl Default for LspConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            disable_auto_install: false,
            request_timeout_ms: default_request_timeout_ms(),
            initialize_timeout_ms: default_initialize_timeout_ms(),
            diagnostics_timeout_ms: default_diagnostics_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            disabled: Vec::new(),
            install_dir: None,
            servers: BTreeMap::new(),
        }
    }
}

impl LspConfig {
    #[must_use]
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            request: Duration::from_millis(self.request_timeout_ms),
            initialize: Duration::from_millis(self.initialize_timeout_ms),
            diagnostics: Duration::from_millis(self.diagnostics_timeout_ms),
            shutdown: Duration::from_millis(self.shutdown_timeout_ms),
        }
    }

    /// Auto-install policy after applying the environment override.
    #[must_use]
    pub fn auto_install(&self) -> bool {
        auto_install_enabled(
            self.disable_auto_install,
            std::env::var(DISABLE_DOWNLOAD_ENV).ok().as_deref(),
        )
    }

    #[must_use]
    pub fn resolved_install_dir(&self) -> Option<PathBuf> {
        self.install_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("plue").join("bin")))
    }
}

fn auto_install_enabled(config_disabled: bool, env_value: Option<&str>) -> bool {
    let env_disabled = env_value.is_some_and(|v| {
        let v = v.trim();
        v == "1" || v.eq_ignore_ascii_case("true")
    });
    !(config_disabled || env_disabled)
}

/// Deadlines applied by clients and the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub request: Duration,
    pub initialize: Duration,
    pub diagnostics: Duration,
    pub shutdown: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        LspConfig::default().timeouts()
    }
}

/// A server declared in configuration rather than built in.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomServer {
    /// Executable name or path (e.g. "zls").
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extensions handled, with or without the leading dot (`"zig"` or `".zig"`).
    #[serde(default)]
    pub file_extensions: Vec<String>,
    /// Exact basenames handled for extensionless files (e.g. `"Makefile"`).
    #[serde(default)]
    pub file_names: Vec<String>,
    /// Files that mark a workspace root. None found → the working directory.
    #[serde(default)]
    pub root_markers: Vec<String>,
    /// Overrides the extension-based language id.
    #[serde(default)]
    pub language_id: Option<String>,
    #[serde(default)]
    pub initialization_options: Option<serde_json::Value>,
}

impl CustomServer {
    /// Extensions with a leading dot, followed by the exact basenames.
    #[must_use]
    pub fn match_keys(&self) -> Vec<String> {
        self.file_extensions
            .iter()
            .map(|ext| {
                if ext.starts_with('.') {
                    ext.clone()
                } else {
                    format!(".{ext}")
                }
            })
            .chain(self.file_names.iter().cloned())
            .collect()
    }
}
