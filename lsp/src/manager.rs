//! LspManager: the entry point hosts talk to.
//!
//! Routes a file to the language servers that handle it, starting one client
//! per (server, root) pair on first use and reusing it afterwards. Pairs that
//! failed to start are remembered and never retried.
//!
//! Hosts construct the manager and share it as `Arc<LspManager>`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::client::LspClient;
use crate::config::{LspConfig, Timeouts};
use crate::error::{LspError, Result};
use crate::protocol;
use crate::registry::{ServerConfig, ServerRegistry, SpawnContext};
use crate::transport::{self, Launcher};
use crate::types::{
    ClientStatus, Diagnostic, DiagnosticsSnapshot, DocumentSymbols, HoverResult, Location,
    SymbolInformation,
};

/// (root, server id)
type ClientKey = (PathBuf, String);

/// Runtime inputs for a manager.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Fallback root and base for relative paths.
    pub cwd: PathBuf,
    pub timeouts: Timeouts,
    pub spawn: SpawnContext,
}

impl ManagerSettings {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            timeouts: Timeouts::default(),
            spawn: SpawnContext::default(),
        }
    }

    pub fn from_config(config: &LspConfig, cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            timeouts: config.timeouts(),
            spawn: SpawnContext {
                auto_install: config.auto_install(),
                search_path: None,
                install_dir: config.resolved_install_dir(),
            },
        }
    }
}

#[derive(Default)]
struct ManagerState {
    clients: Vec<Arc<LspClient>>,
    broken: HashSet<ClientKey>,
    /// Serializes concurrent spawns of the same pair.
    gates: HashMap<ClientKey, Arc<Mutex<()>>>,
}

/// Result of resolving clients for one file.
struct Resolved {
    clients: Vec<Arc<LspClient>>,
    /// First construction error seen during this call.
    error: Option<LspError>,
}

pub struct LspManager {
    registry: ServerRegistry,
    settings: ManagerSettings,
    launcher: Launcher,
    state: Mutex<ManagerState>,
}

impl std::fmt::Debug for LspManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LspManager")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl LspManager {
    #[must_use]
    pub fn new(registry: ServerRegistry, settings: ManagerSettings) -> Self {
        Self::with_launcher(registry, settings, transport::process_launcher())
    }

    /// Registry and settings from configuration. A disabled config yields a
    /// manager with no servers.
    pub fn from_config(config: &LspConfig, cwd: impl Into<PathBuf>) -> Self {
        let registry = if config.enabled {
            ServerRegistry::from_config(config)
        } else {
            ServerRegistry::empty()
        };
        Self::new(registry, ManagerSettings::from_config(config, cwd))
    }

    /// Use `launcher` instead of spawning processes.
    #[must_use]
    pub fn with_launcher(
        registry: ServerRegistry,
        settings: ManagerSettings,
        launcher: Launcher,
    ) -> Self {
        Self {
            registry,
            settings,
            launcher,
            state: Mutex::new(ManagerState::default()),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    #[must_use]
    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        protocol::absolutize(path, &self.settings.cwd)
    }

    /// Clients for every server handling `path`, starting them as needed.
    pub async fn get_clients(&self, path: &Path) -> Vec<Arc<LspClient>> {
        self.resolve(&self.absolute(path)).await.clients
    }

    async fn resolve(&self, path: &Path) -> Resolved {
        let mut resolved = Resolved {
            clients: Vec::new(),
            error: None,
        };

        for server in self.registry.matching(path) {
            let Some(root) = server.find_root(path, &self.settings.cwd) else {
                continue;
            };
            let key: ClientKey = (root, server.id().to_string());

            match self.client_for(server, &key).await {
                Ok(Some(client)) => resolved.clients.push(client),
                Ok(None) => {}
                Err(e) => {
                    if resolved.error.is_none() {
                        resolved.error = Some(e);
                    }
                }
            }
        }
        resolved
    }

    /// Existing client for `key`, or a freshly started one. `Ok(None)` for a
    /// pair already known to be broken.
    async fn client_for(
        &self,
        server: &ServerConfig,
        key: &ClientKey,
    ) -> Result<Option<Arc<LspClient>>> {
        let gate = {
            let mut state = self.state.lock().await;
            if state.broken.contains(key) {
                return Ok(None);
            }
            if let Some(client) = live_client(&mut state.clients, key) {
                return Ok(Some(client));
            }
            state.gates.entry(key.clone()).or_default().clone()
        };

        let _spawning = gate.lock().await;

        // Another caller may have finished while we waited on the gate.
        {
            let mut state = self.state.lock().await;
            if state.broken.contains(key) {
                return Ok(None);
            }
            if let Some(client) = live_client(&mut state.clients, key) {
                return Ok(Some(client));
            }
        }

        match self.spawn_client(server, &key.0).await {
            Ok(client) => {
                let mut state = self.state.lock().await;
                state.clients.push(client.clone());
                state.gates.remove(key);
                Ok(Some(client))
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to start LSP server '{}' for {}: {e}",
                    key.1,
                    key.0.display()
                );
                let mut state = self.state.lock().await;
                state.broken.insert(key.clone());
                state.gates.remove(key);
                Err(e)
            }
        }
    }

    async fn spawn_client(&self, server: &ServerConfig, root: &Path) -> Result<Arc<LspClient>> {
        tracing::info!("Starting LSP server '{}' for {}...", server.id(), root.display());

        // Spawners may search PATH or run installers.
        let spec = {
            let server = server.clone();
            let root = root.to_path_buf();
            let ctx = self.settings.spawn.clone();
            tokio::task::spawn_blocking(move || server.spawn(&root, &ctx))
        }
        .await
        .map_err(|e| LspError::Initialization {
            server_id: server.id().to_string(),
            reason: format!("spawner task failed: {e}"),
        })??;

        let transport = (self.launcher)(&spec, root).map_err(|source| LspError::Spawn {
            server_id: server.id().to_string(),
            source,
        })?;

        LspClient::start(
            server,
            root.to_path_buf(),
            transport,
            spec.init_options,
            self.settings.timeouts,
        )
        .await
    }

    /// Open `path` in every client that handles it. With
    /// `wait_for_diagnostics`, also wait (concurrently, per client) for the
    /// next publish for the file. Returns the number of clients touched.
    ///
    /// A client that fails to open the file is logged and skipped; the call
    /// fails only when every client did.
    pub async fn touch_file(
        &self,
        path: &Path,
        wait_for_diagnostics: bool,
        timeout: Option<Duration>,
    ) -> Result<usize> {
        let path = self.absolute(path);
        let clients = self.get_clients(&path).await;
        let timeout = timeout.unwrap_or(self.settings.timeouts.diagnostics);
        open_in_clients(&clients, &path, wait_for_diagnostics.then_some(timeout)).await
    }

    /// Every client's diagnostics. Lists for a path reported by several
    /// clients are concatenated.
    pub async fn get_all_diagnostics(&self) -> BTreeMap<PathBuf, Vec<Diagnostic>> {
        let clients = self.state.lock().await.clients.clone();
        let mut all: BTreeMap<PathBuf, Vec<Diagnostic>> = BTreeMap::new();
        for client in clients {
            for (path, items) in client.get_diagnostics() {
                all.entry(path).or_default().extend(items);
            }
        }
        all
    }

    /// All diagnostics, or only those for `path`.
    pub async fn diagnostics(&self, path: Option<&Path>) -> BTreeMap<PathBuf, Vec<Diagnostic>> {
        let mut all = self.get_all_diagnostics().await;
        if let Some(path) = path {
            let path = self.absolute(path);
            all.retain(|p, _| *p == path);
        }
        all
    }

    /// Errors-first snapshot with severity counts.
    pub async fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot::new(self.get_all_diagnostics().await.into_iter().collect())
    }

    /// First client for `path`, or the reason there is none.
    async fn first_client(&self, path: &Path) -> Result<Arc<LspClient>> {
        let resolved = self.resolve(path).await;
        if let Some(client) = resolved.clients.into_iter().next() {
            return Ok(client);
        }
        Err(resolved.error.unwrap_or_else(|| LspError::NoServerAvailable {
            path: path.to_path_buf(),
        }))
    }

    pub async fn hover(
        &self,
        path: &Path,
        line: u32,
        character: u32,
        timeout: Option<Duration>,
    ) -> Result<HoverResult> {
        let path = self.absolute(path);
        self.first_client(&path)
            .await?
            .hover(&path, line, character, timeout)
            .await
    }

    pub async fn go_to_definition(
        &self,
        path: &Path,
        line: u32,
        character: u32,
        timeout: Option<Duration>,
    ) -> Result<Vec<Location>> {
        let path = self.absolute(path);
        self.first_client(&path)
            .await?
            .definition(&path, line, character, timeout)
            .await
    }

    pub async fn find_references(
        &self,
        path: &Path,
        line: u32,
        character: u32,
        include_declaration: bool,
        timeout: Option<Duration>,
    ) -> Result<Vec<Location>> {
        let path = self.absolute(path);
        self.first_client(&path)
            .await?
            .references(&path, line, character, include_declaration, timeout)
            .await
    }

    pub async fn document_symbol(
        &self,
        path: &Path,
        timeout: Option<Duration>,
    ) -> Result<DocumentSymbols> {
        let path = self.absolute(path);
        self.first_client(&path)
            .await?
            .document_symbol(&path, timeout)
            .await
    }

    /// Query the first client for `path`, or the first live client when no
    /// path is given.
    pub async fn workspace_symbol(
        &self,
        query: &str,
        path: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<Vec<SymbolInformation>> {
        let client = match path {
            Some(path) => self.first_client(&self.absolute(path)).await?,
            None => self
                .state
                .lock()
                .await
                .clients
                .iter()
                .find(|c| c.is_alive())
                .cloned()
                .ok_or_else(|| LspError::NoServerAvailable {
                    path: self.settings.cwd.clone(),
                })?,
        };
        client.workspace_symbol(query, timeout).await
    }

    /// Touch `path`, wait for fresh diagnostics, and return them.
    pub async fn check_file_errors(
        &self,
        path: &Path,
        timeout: Option<Duration>,
    ) -> Result<Vec<Diagnostic>> {
        let path = self.absolute(path);
        let resolved = self.resolve(&path).await;
        if resolved.clients.is_empty() {
            return Err(resolved
                .error
                .unwrap_or_else(|| LspError::NoServerAvailable { path: path.clone() }));
        }
        self.touch_file(&path, true, timeout).await?;
        Ok(self
            .diagnostics(Some(&path))
            .await
            .remove(&path)
            .unwrap_or_default())
    }

    /// Server id, root and state of every client.
    pub async fn status(&self) -> Vec<ClientStatus> {
        self.state
            .lock()
            .await
            .clients
            .iter()
            .map(|c| c.status())
            .collect()
    }

    /// Shut down every client and forget them. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let clients = std::mem::take(&mut self.state.lock().await.clients);
        for client in clients {
            client.shutdown().await;
        }
    }
}

async fn open_in_clients(
    clients: &[Arc<LspClient>],
    path: &Path,
    wait: Option<Duration>,
) -> Result<usize> {
    let mut waits = JoinSet::new();
    let mut opened = 0;
    let mut first_err = None;
    for client in clients {
        let waiter = client.subscribe_diagnostics();
        if let Err(e) = client.open_file(path).await {
            tracing::warn!(
                "LSP server '{}' could not open {}: {e}",
                client.server_id(),
                path.display()
            );
            first_err.get_or_insert(e);
            continue;
        }
        opened += 1;
        if let Some(timeout) = wait {
            let path = path.to_path_buf();
            waits.spawn(async move { waiter.wait(&path, timeout).await });
        }
    }
    while let Some(joined) = waits.join_next().await {
        if let Ok(false) = joined {
            tracing::debug!("No diagnostics for {} in time", path.display());
        }
    }
    match first_err {
        Some(e) if opened == 0 => Err(e),
        _ => Ok(opened),
    }
}

/// Client for `key` if its server is still running. A client whose server
/// went away is dropped so the pair can be started again.
fn live_client(clients: &mut Vec<Arc<LspClient>>, key: &ClientKey) -> Option<Arc<LspClient>> {
    let pos = clients
        .iter()
        .position(|c| c.root() == key.0 && c.server_id() == key.1)?;
    if clients[pos].is_alive() {
        return Some(clients[pos].clone());
    }
    let dead = clients.remove(pos);
    tracing::info!(
        "LSP server '{}' for {} is no longer running",
        dead.server_id(),
        dead.root().display()
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeServer, counting_server, fake_launcher, wire_diagnostic};
    use std::sync::atomic::Ordering;

    fn settings(cwd: &Path) -> ManagerSettings {
        ManagerSettings {
            cwd: cwd.to_path_buf(),
            timeouts: Timeouts {
                request: Duration::from_secs(2),
                initialize: Duration::from_secs(2),
                diagnostics: Duration::from_secs(2),
                shutdown: Duration::from_millis(100),
            },
            spawn: SpawnContext::default(),
        }
    }

    fn write(path: &Path, body: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    fn undefined_foo_server() -> FakeServer {
        FakeServer::new().publish_on_sync(|_, text| {
            text.lines()
                .enumerate()
                .filter(|(_, l)| l.contains("foo()"))
                .map(|(i, _)| wire_diagnostic(i as u32, 1, "undefined: foo"))
                .collect()
        })
    }

    #[tokio::test]
    async fn test_client_is_reused_for_same_root() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("go.mod"), "module x\n");
        write(&dir.path().join("a.go"), "package x\n");
        write(&dir.path().join("sub/b.go"), "package sub\n");

        let (server, spawns) = counting_server("gopls", &[".go"], "go.mod");
        let mut registry = ServerRegistry::empty();
        registry.register(server);
        let (launcher, launches, _) = fake_launcher(FakeServer::new());
        let manager = LspManager::with_launcher(registry, settings(dir.path()), launcher);

        let first = manager.get_clients(&dir.path().join("a.go")).await;
        let second = manager.get_clients(&dir.path().join("sub/b.go")).await;
        assert_eq!(first.len(), 1);
        assert!(Arc::ptr_eq(&first[0], &second[0]));
        assert_eq!(spawns.load(Ordering::SeqCst), 1);
        assert_eq!(launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_get_clients_start_one_client() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("a.go"), "package x\n");

        let (server, spawns) = counting_server("gopls", &[".go"], "go.mod");
        let mut registry = ServerRegistry::empty();
        registry.register(server);
        let (launcher, _, _) = fake_launcher(FakeServer::new());
        let manager = Arc::new(LspManager::with_launcher(registry, settings(dir.path()), launcher));

        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let manager = manager.clone();
            let path = dir.path().join("a.go");
            tasks.spawn(async move { manager.get_clients(&path).await.len() });
        }
        while let Some(n) = tasks.join_next().await {
            assert_eq!(n.unwrap(), 1);
        }
        assert_eq!(spawns.load(Ordering::SeqCst), 1);
        assert_eq!(manager.status().await.len(), 1);
    }

    #[tokio::test]
    async fn test_exited_client_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("a.go"), "package x\n");

        let (server, spawns) = counting_server("gopls", &[".go"], "go.mod");
        let mut registry = ServerRegistry::empty();
        registry.register(server);
        let (launcher, _, _) = fake_launcher(FakeServer::new());
        let manager = LspManager::with_launcher(registry, settings(dir.path()), launcher);

        let path = dir.path().join("a.go");
        let first = manager.get_clients(&path).await;
        first[0].shutdown().await;

        let second = manager.get_clients(&path).await;
        assert_eq!(second.len(), 1);
        assert!(!Arc::ptr_eq(&first[0], &second[0]));
        assert!(second[0].is_alive());
        assert_eq!(spawns.load(Ordering::SeqCst), 2);
        assert_eq!(manager.status().await.len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_roots_get_distinct_clients() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("one/go.mod"), "module one\n");
        write(&dir.path().join("one/a.go"), "package one\n");
        write(&dir.path().join("two/go.mod"), "module two\n");
        write(&dir.path().join("two/b.go"), "package two\n");

        let (server, spawns) = counting_server("gopls", &[".go"], "go.mod");
        let mut registry = ServerRegistry::empty();
        registry.register(server);
        let (launcher, _, _) = fake_launcher(FakeServer::new());
        let manager = LspManager::with_launcher(registry, settings(dir.path()), launcher);

        let a = manager.get_clients(&dir.path().join("one/a.go")).await;
        let b = manager.get_clients(&dir.path().join("two/b.go")).await;
        assert!(!Arc::ptr_eq(&a[0], &b[0]));
        assert_eq!(a[0].root(), dir.path().join("one"));
        assert_eq!(b[0].root(), dir.path().join("two"));
        assert_eq!(spawns.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_broken_pair_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("a.go"), "package x\n");

        let (server, spawns) = counting_server("gopls", &[".go"], "go.mod");
        let mut registry = ServerRegistry::empty();
        registry.register(server);
        let (launcher, _, _) = fake_launcher(FakeServer::new().stall_initialize());
        let mut settings = settings(dir.path());
        settings.timeouts.initialize = Duration::from_millis(50);
        let manager = LspManager::with_launcher(registry, settings, launcher);

        let path = dir.path().join("a.go");
        let err = manager.hover(&path, 0, 0, None).await.unwrap_err();
        assert!(matches!(err, LspError::InitializationTimeout { .. }));
        assert!(manager.get_clients(&path).await.is_empty());
        assert!(manager.get_clients(&path).await.is_empty());
        assert_eq!(spawns.load(Ordering::SeqCst), 1);

        // Broken and no error this time: nothing available.
        let err = manager.hover(&path, 0, 0, None).await.unwrap_err();
        assert!(matches!(err, LspError::NoServerAvailable { .. }));
    }

    #[tokio::test]
    async fn test_unavailable_server_surfaces_install_hint() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("main.go"), "package main\n");

        let mut registry = ServerRegistry::empty();
        registry.register(crate::servers::gopls());
        let mut settings = settings(dir.path());
        settings.spawn = SpawnContext {
            auto_install: false,
            search_path: Some(dir.path().as_os_str().to_owned()),
            install_dir: None,
        };
        let (launcher, launches, _) = fake_launcher(FakeServer::new());
        let manager = LspManager::with_launcher(registry, settings, launcher);

        let err = manager
            .hover(&dir.path().join("main.go"), 0, 0, None)
            .await
            .unwrap_err();
        assert_eq!(err.install_hint(), Some(crate::servers::GOPLS_HINT));
        assert_eq!(launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_matching_server() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LspManager::with_launcher(
            ServerRegistry::empty(),
            settings(dir.path()),
            fake_launcher(FakeServer::new()).0,
        );
        let err = manager
            .go_to_definition(Path::new("notes.txt"), 0, 0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LspError::NoServerAvailable { ref path } if *path == dir.path().join("notes.txt")));
        assert_eq!(manager.touch_file(Path::new("notes.txt"), true, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_go_undefined_foo_scenario() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("go.mod"), "module demo\n");
        let main = dir.path().join("main.go");
        write(&main, "package main\n\nfunc main() {\n\tfoo()\n}\n");

        let (server, _) = counting_server("gopls", &[".go"], "go.mod");
        let mut registry = ServerRegistry::empty();
        registry.register(server);
        let (launcher, _, _) = fake_launcher(undefined_foo_server());
        let manager = LspManager::with_launcher(registry, settings(dir.path()), launcher);

        let errors = manager.check_file_errors(&main, None).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message(), "undefined: foo");
        assert!(errors[0].severity().is_error());
        assert_eq!(errors[0].line(), 3);

        let snapshot = manager.snapshot().await;
        assert_eq!(snapshot.error_count(), 1);
        assert_eq!(snapshot.status_string(), "E:1 W:0");

        // Fix the file: the next publish replaces the list.
        write(&main, "package main\n\nfunc main() {}\n");
        assert!(manager.check_file_errors(&main, None).await.unwrap().is_empty());
        assert!(manager.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_diagnostics_from_two_servers_are_concatenated() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main.go");
        write(&main, "package main\nfoo()\n");

        let (a, _) = counting_server("gopls", &[".go"], "go.mod");
        let (b, _) = counting_server("golint", &[".go"], "go.mod");
        let mut registry = ServerRegistry::empty();
        registry.register(a);
        registry.register(b);
        let (launcher, launches, _) = fake_launcher(undefined_foo_server());
        let manager = LspManager::with_launcher(registry, settings(dir.path()), launcher);

        assert_eq!(manager.touch_file(&main, true, None).await.unwrap(), 2);
        assert_eq!(launches.load(Ordering::SeqCst), 2);

        let all = manager.diagnostics(None).await;
        assert_eq!(all[&main].len(), 2);
        let one = manager.diagnostics(Some(&main)).await;
        assert_eq!(one.len(), 1);
        assert!(manager.diagnostics(Some(Path::new("other.go"))).await.is_empty());
    }

    #[tokio::test]
    async fn test_touch_skips_client_that_cannot_open() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main.go");
        write(&main, "package main\nfoo()\n");

        let (a, _) = counting_server("gopls", &[".go"], "go.mod");
        let (b, _) = counting_server("golint", &[".go"], "go.mod");
        let mut registry = ServerRegistry::empty();
        registry.register(a);
        registry.register(b);
        let (launcher, _, _) = fake_launcher(undefined_foo_server());
        let manager = LspManager::with_launcher(registry, settings(dir.path()), launcher);

        let clients = manager.get_clients(&main).await;
        assert_eq!(clients.len(), 2);
        clients[0].shutdown().await;

        let opened = open_in_clients(&clients, &main, Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(opened, 1);
        assert_eq!(clients[0].document_version(&main).await, None);
        assert_eq!(clients[1].document_version(&main).await, Some(0));
        assert_eq!(clients[1].diagnostics_for(&main).len(), 1);
    }

    #[tokio::test]
    async fn test_touch_fails_when_no_client_opens() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _) = counting_server("gopls", &[".go"], "go.mod");
        let (b, _) = counting_server("golint", &[".go"], "go.mod");
        let mut registry = ServerRegistry::empty();
        registry.register(a);
        registry.register(b);
        let (launcher, launches, _) = fake_launcher(FakeServer::new());
        let manager = LspManager::with_launcher(registry, settings(dir.path()), launcher);

        let missing = dir.path().join("missing.go");
        let err = manager.touch_file(&missing, false, None).await.unwrap_err();
        assert!(matches!(err, LspError::FileRead { ref path, .. } if *path == missing));
        assert_eq!(launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_hover_routes_to_first_client() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main.go");
        write(&main, "package main\n");

        let (server, _) = counting_server("gopls", &[".go"], "go.mod");
        let mut registry = ServerRegistry::empty();
        registry.register(server);
        let (launcher, _, logs) = fake_launcher(
            FakeServer::new()
                .result("textDocument/hover", serde_json::json!({ "contents": ["", "package main"] })),
        );
        let manager = LspManager::with_launcher(registry, settings(dir.path()), launcher);

        // Relative paths resolve against the manager's cwd.
        let hover = manager
            .hover(Path::new("main.go"), 0, 3, None)
            .await
            .unwrap();
        assert_eq!(hover.contents, "package main");
        let log = logs.lock().unwrap()[0].clone();
        let open = &log.with_method("textDocument/didOpen")[0];
        assert_eq!(
            open["params"]["textDocument"]["uri"],
            protocol::path_to_file_uri(&main).unwrap().as_str()
        );
    }

    #[tokio::test]
    async fn test_workspace_symbol_without_path_uses_live_client() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main.go");
        write(&main, "package main\n");

        let (server, _) = counting_server("gopls", &[".go"], "go.mod");
        let mut registry = ServerRegistry::empty();
        registry.register(server);
        let (launcher, _, _) = fake_launcher(
            FakeServer::new().result("workspace/symbol", serde_json::json!([])),
        );
        let manager = LspManager::with_launcher(registry, settings(dir.path()), launcher);

        let err = manager.workspace_symbol("Foo", None, None).await.unwrap_err();
        assert!(matches!(err, LspError::NoServerAvailable { .. }));

        manager.touch_file(&main, false, None).await.unwrap();
        assert!(manager.workspace_symbol("Foo", None, None).await.unwrap().is_empty());
        assert!(
            manager
                .workspace_symbol("Foo", Some(&main), None)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_clears_clients() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main.go");
        write(&main, "package main\n");

        let (server, _) = counting_server("gopls", &[".go"], "go.mod");
        let mut registry = ServerRegistry::empty();
        registry.register(server);
        let (launcher, _, _) = fake_launcher(FakeServer::new());
        let manager = LspManager::with_launcher(registry, settings(dir.path()), launcher);

        let clients = manager.get_clients(&main).await;
        assert_eq!(manager.status().await.len(), 1);
        manager.shutdown().await;
        manager.shutdown().await;
        assert!(manager.status().await.is_empty());
        assert!(!clients[0].is_alive());
    }

    #[tokio::test]
    async fn test_disabled_config_has_no_servers() {
        let config = LspConfig {
            enabled: false,
            ..LspConfig::default()
        };
        let manager = LspManager::from_config(&config, "/w");
        assert!(manager.registry().is_empty());
        assert_eq!(manager.settings().timeouts, config.timeouts());
    }
}
