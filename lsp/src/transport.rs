//! Launching language servers and wiring their stdio to a connection.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

/// Everything needed to start one language server process.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// Sent as `initializationOptions` and used to answer
    /// `workspace/configuration`.
    pub init_options: Option<Value>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            init_options: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn init_options(mut self, options: Value) -> Self {
        self.init_options = Some(options);
        self
    }
}

/// Byte pipes to a running server.
///
/// `process` is `None` for in-process servers. A real child is spawned with
/// `kill_on_drop`, so dropping the transport on any error path reaps it.
pub struct Transport {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub process: Option<Child>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("pid", &self.process.as_ref().and_then(Child::id))
            .finish_non_exhaustive()
    }
}

/// Turns a launch spec and workspace root into a transport.
pub type Launcher = Arc<dyn Fn(&LaunchSpec, &Path) -> io::Result<Transport> + Send + Sync>;

/// The default launcher: a child process with piped stdin/stdout.
pub fn process_launcher() -> Launcher {
    Arc::new(spawn_process)
}

pub fn spawn_process(spec: &LaunchSpec, root: &Path) -> io::Result<Transport> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .current_dir(root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("no stdout from child"))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| io::Error::other("no stdin from child"))?;

    tracing::debug!(
        program = %spec.program.display(),
        pid = ?child.id(),
        root = %root.display(),
        "Spawned language server"
    );

    Ok(Transport {
        reader: Box::new(stdout),
        writer: Box::new(stdin),
        process: Some(child),
    })
}
