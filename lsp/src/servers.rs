//! Built-in language server definitions.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use crate::error::{LspError, Result};
use crate::registry::{ServerConfig, SpawnContext};
use crate::root;
use crate::transport::LaunchSpec;

pub const TYPESCRIPT_HINT: &str = "npm install -g typescript-language-server typescript";
pub const GOPLS_HINT: &str = "go install golang.org/x/tools/gopls@latest";
pub const PYTHON_HINT: &str = "pip install python-lsp-server";
pub const RUST_HINT: &str = "rustup component add rust-analyzer";

const GOPLS_PACKAGE: &str = "golang.org/x/tools/gopls@latest";

const TS_MARKERS: &[&str] = &[
    "package-lock.json",
    "bun.lockb",
    "bun.lock",
    "pnpm-lock.yaml",
    "yarn.lock",
    "package.json",
    "tsconfig.json",
    "jsconfig.json",
];
const DENO_MARKERS: &[&str] = &["deno.json", "deno.jsonc"];
const PYTHON_MARKERS: &[&str] = &[
    "pyproject.toml",
    "setup.py",
    "setup.cfg",
    "requirements.txt",
    "Pipfile",
    "pyrightconfig.json",
];

pub(crate) fn builtin() -> Vec<ServerConfig> {
    vec![typescript(), gopls(), python(), rust_analyzer()]
}

fn unavailable(server_id: &str, reason: impl Into<String>, hint: &str) -> LspError {
    LspError::ServerUnavailable {
        server_id: server_id.to_string(),
        reason: reason.into(),
        hint: hint.to_string(),
    }
}

fn marker_or_cwd(file: &Path, cwd: &Path, markers: &[&str]) -> PathBuf {
    root::nearest_marker(file, markers).unwrap_or_else(|| cwd.to_path_buf())
}

pub fn typescript() -> ServerConfig {
    ServerConfig::new(
        "typescript",
        [".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs", ".mts", ".cts"],
        Arc::new(|file, cwd| {
            // Deno projects get their own server.
            if let Some(found) = root::nearest_marker_excluding(file, TS_MARKERS, DENO_MARKERS) {
                return Some(found);
            }
            if root::nearest_marker(file, DENO_MARKERS).is_some() {
                return None;
            }
            Some(cwd.to_path_buf())
        }),
        Arc::new(|root, ctx| {
            let tsserver = root.join("node_modules/typescript/lib/tsserver.js");
            if !tsserver.is_file() {
                return Err(unavailable(
                    "typescript",
                    format!("typescript is not installed in {}", root.display()),
                    TYPESCRIPT_HINT,
                ));
            }
            let program = ctx
                .find_binary("typescript-language-server", root)
                .ok_or_else(|| {
                    unavailable(
                        "typescript",
                        "typescript-language-server not found in PATH",
                        TYPESCRIPT_HINT,
                    )
                })?;
            Ok(LaunchSpec::new(program)
                .arg("--stdio")
                .init_options(serde_json::json!({
                    "tsserver": { "path": tsserver.to_string_lossy() }
                })))
        }),
    )
    .with_placeholder_first_publish()
}

pub fn gopls() -> ServerConfig {
    ServerConfig::new(
        "gopls",
        [".go"],
        Arc::new(|file, cwd| {
            Some(
                root::first_group_match(file, &[&["go.work"], &["go.mod", "go.sum"]])
                    .unwrap_or_else(|| cwd.to_path_buf()),
            )
        }),
        Arc::new(|root, ctx| {
            if let Some(program) = ctx.find_binary("gopls", root) {
                return Ok(LaunchSpec::new(program));
            }
            if !ctx.auto_install {
                return Err(unavailable(
                    "gopls",
                    "gopls not found in PATH and auto-install is disabled",
                    GOPLS_HINT,
                ));
            }
            install_gopls(root, ctx).map(LaunchSpec::new)
        }),
    )
}

/// Run `go install` into the context's install directory. Blocks.
fn install_gopls(root: &Path, ctx: &SpawnContext) -> Result<PathBuf> {
    let go = ctx
        .find_binary("go", root)
        .ok_or_else(|| unavailable("gopls", "gopls not found and go is not installed", GOPLS_HINT))?;
    let install_dir = ctx
        .install_dir
        .as_deref()
        .ok_or_else(|| unavailable("gopls", "no install directory available", GOPLS_HINT))?;
    std::fs::create_dir_all(install_dir).map_err(|e| {
        unavailable(
            "gopls",
            format!("cannot create {}: {e}", install_dir.display()),
            GOPLS_HINT,
        )
    })?;

    tracing::info!("Installing gopls into {}", install_dir.display());
    let status = std::process::Command::new(go)
        .args(["install", GOPLS_PACKAGE])
        .env("GOBIN", install_dir)
        .current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| LspError::Spawn {
            server_id: "gopls".to_string(),
            source: e,
        })?;
    if !status.success() {
        return Err(unavailable(
            "gopls",
            format!("go install exited with {status}"),
            GOPLS_HINT,
        ));
    }

    let binary = install_dir.join(if cfg!(windows) { "gopls.exe" } else { "gopls" });
    if binary.is_file() {
        Ok(binary)
    } else {
        Err(unavailable(
            "gopls",
            "go install succeeded but gopls was not produced",
            GOPLS_HINT,
        ))
    }
}

pub fn python() -> ServerConfig {
    ServerConfig::new(
        "python",
        [".py", ".pyi"],
        Arc::new(|file, cwd| Some(marker_or_cwd(file, cwd, PYTHON_MARKERS))),
        Arc::new(|root, ctx| {
            ctx.find_binary("pylsp", root)
                .map(LaunchSpec::new)
                .ok_or_else(|| unavailable("python", "pylsp not found in PATH", PYTHON_HINT))
        }),
    )
}

pub fn rust_analyzer() -> ServerConfig {
    ServerConfig::new(
        "rust",
        [".rs"],
        Arc::new(|file, cwd| Some(root::cargo_root(file).unwrap_or_else(|| cwd.to_path_buf()))),
        Arc::new(|root, ctx| {
            ctx.find_binary("rust-analyzer", root)
                .map(LaunchSpec::new)
                .ok_or_else(|| unavailable("rust", "rust-analyzer not found in PATH", RUST_HINT))
        }),
    )
}
