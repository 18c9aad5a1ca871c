//! The table of language servers and how files map onto them.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{CustomServer, LspConfig};
use crate::error::{LspError, Result};
use crate::transport::LaunchSpec;
use crate::{root, servers};

/// `(file, cwd) -> root`. `None` means the server does not apply to the file.
pub type RootFinder = Arc<dyn Fn(&Path, &Path) -> Option<PathBuf> + Send + Sync>;

/// `(root, context) -> launch spec`. May block (binary lookup, installers).
pub type Spawner = Arc<dyn Fn(&Path, &SpawnContext) -> Result<LaunchSpec> + Send + Sync>;

/// Inputs a spawner may consult besides the root.
#[derive(Debug, Clone, Default)]
pub struct SpawnContext {
    /// Whether missing servers may be installed.
    pub auto_install: bool,
    /// Binary search path. `None` uses the process `PATH`.
    pub search_path: Option<OsString>,
    /// Where installers put binaries; also searched before `search_path`.
    pub install_dir: Option<PathBuf>,
}

impl SpawnContext {
    /// Locate `name` in the install dir, then on the search path.
    pub fn find_binary(&self, name: &str, cwd: &Path) -> Option<PathBuf> {
        if let Some(dir) = &self.install_dir {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        let paths = self
            .search_path
            .clone()
            .or_else(|| std::env::var_os("PATH"))?;
        which::which_in(name, Some(paths), cwd).ok()
    }
}

/// Static description of one language server.
#[derive(Clone)]
pub struct ServerConfig {
    id: String,
    match_keys: Vec<String>,
    root_finder: RootFinder,
    spawner: Spawner,
    language_id: Option<String>,
    placeholder_first_publish: bool,
}

impl ServerConfig {
    /// `match_keys` are `.ext` entries or exact basenames for extensionless
    /// files.
    pub fn new<I, S>(id: impl Into<String>, match_keys: I, root_finder: RootFinder, spawner: Spawner) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            match_keys: match_keys.into_iter().map(Into::into).collect(),
            root_finder,
            spawner,
            language_id: None,
            placeholder_first_publish: false,
        }
    }

    pub fn with_language_id(mut self, language_id: impl Into<String>) -> Self {
        self.language_id = Some(language_id.into());
        self
    }

    /// Mark a server whose first publish after a fresh open is a placeholder
    /// that must not satisfy diagnostics waiters.
    pub fn with_placeholder_first_publish(mut self) -> Self {
        self.placeholder_first_publish = true;
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn match_keys(&self) -> &[String] {
        &self.match_keys
    }

    #[must_use]
    pub fn language_id(&self) -> Option<&str> {
        self.language_id.as_deref()
    }

    #[must_use]
    pub fn placeholder_first_publish(&self) -> bool {
        self.placeholder_first_publish
    }

    /// Case-sensitive match on `.ext`, or on the basename when the file has
    /// no extension.
    #[must_use]
    pub fn handles(&self, path: &Path) -> bool {
        let key = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!(".{ext}"),
            None => match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => return false,
            },
        };
        self.match_keys.iter().any(|k| *k == key)
    }

    pub fn find_root(&self, file: &Path, cwd: &Path) -> Option<PathBuf> {
        (self.root_finder)(file, cwd)
    }

    pub fn spawn(&self, root: &Path, ctx: &SpawnContext) -> Result<LaunchSpec> {
        (self.spawner)(root, ctx)
    }

    /// Build a server from a `[lsp.servers.<id>]` table.
    pub fn from_custom(id: &str, custom: &CustomServer) -> Self {
        let markers = custom.root_markers.clone();
        let root_finder: RootFinder = Arc::new(move |file, cwd| {
            let markers: Vec<&str> = markers.iter().map(String::as_str).collect();
            Some(root::nearest_marker(file, &markers).unwrap_or_else(|| cwd.to_path_buf()))
        });

        let server_id = id.to_string();
        let command = custom.command.clone();
        let args = custom.args.clone();
        let init_options = custom.initialization_options.clone();
        let spawner: Spawner = Arc::new(move |root, ctx| {
            let program = resolve_command(&command, root, ctx).ok_or_else(|| {
                LspError::ServerUnavailable {
                    server_id: server_id.clone(),
                    reason: format!("{command} not found in PATH"),
                    hint: format!("install {command} and make sure it is on PATH"),
                }
            })?;
            let mut spec = LaunchSpec::new(program);
            spec.args.clone_from(&args);
            spec.init_options.clone_from(&init_options);
            Ok(spec)
        });

        let mut config = Self::new(id, custom.match_keys(), root_finder, spawner);
        config.language_id.clone_from(&custom.language_id);
        config
    }
}

/// Commands containing a path separator are taken as paths, bare names are
/// looked up.
fn resolve_command(command: &str, cwd: &Path, ctx: &SpawnContext) -> Option<PathBuf> {
    let as_path = Path::new(command);
    if as_path.components().count() > 1 {
        let path = if as_path.is_absolute() {
            as_path.to_path_buf()
        } else {
            cwd.join(as_path)
        };
        return path.is_file().then_some(path);
    }
    ctx.find_binary(command, cwd)
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("id", &self.id)
            .field("match_keys", &self.match_keys)
            .field("language_id", &self.language_id)
            .field("placeholder_first_publish", &self.placeholder_first_publish)
            .finish_non_exhaustive()
    }
}

/// Ordered set of servers. Order decides which client answers
/// single-client operations.
#[derive(Debug, Clone, Default)]
pub struct ServerRegistry {
    servers: Vec<ServerConfig>,
}

impl ServerRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// typescript, gopls, python, rust.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            servers: servers::builtin(),
        }
    }

    /// Built-ins minus `disabled`, then every custom server in id order.
    #[must_use]
    pub fn from_config(config: &LspConfig) -> Self {
        let mut registry = Self::builtin();
        for id in &config.disabled {
            if !registry.remove(id) {
                tracing::warn!("Unknown LSP server '{id}' in disabled list");
            }
        }
        for (id, custom) in &config.servers {
            registry.register(ServerConfig::from_custom(id, custom));
        }
        registry
    }

    /// Append a server. A server with the same id is replaced in place.
    pub fn register(&mut self, config: ServerConfig) {
        if let Some(existing) = self.servers.iter_mut().find(|s| s.id == config.id) {
            tracing::debug!("Replacing LSP server '{}'", config.id);
            *existing = config;
        } else {
            self.servers.push(config);
        }
    }

    /// Returns whether a server was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.servers.len();
        self.servers.retain(|s| s.id != id);
        self.servers.len() != before
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.id == id)
    }

    /// Servers handling `path`, in registration order.
    pub fn matching<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = &'a ServerConfig> + 'a {
        self.servers.iter().filter(move |s| s.handles(path))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
