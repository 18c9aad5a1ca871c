//! Plue CLI - language server queries from the command line.
//!
//! Builds one [`LspManager`] from `~/.plue/config.toml`, runs a single query,
//! prints the result as text or JSON, and shuts every server down before
//! exiting.

mod config;
mod output;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use plue_lsp::{LspError, LspManager};

use crate::config::{ConfigError, PlueConfig};

/// Plue: hover, navigation and diagnostics from language servers.
#[derive(Parser)]
#[command(name = "plue")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Per-request timeout in milliseconds (overrides the config)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Config file (defaults to ~/.plue/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Lines and characters are 0-based.
#[derive(Subcommand)]
enum Commands {
    /// Show hover information at a position
    Hover {
        file: PathBuf,
        line: u32,
        character: u32,
    },

    /// Find where the symbol at a position is defined
    Definition {
        file: PathBuf,
        line: u32,
        character: u32,
    },

    /// Find references to the symbol at a position
    References {
        file: PathBuf,
        line: u32,
        character: u32,

        /// Leave the declaration itself out
        #[arg(long)]
        exclude_declaration: bool,
    },

    /// Search symbols across the workspace
    Symbols {
        query: String,

        /// File that selects the server and workspace
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List the symbols declared in a file
    DocumentSymbols { file: PathBuf },

    /// Open files and show every diagnostic the servers publish
    Diagnostics { files: Vec<PathBuf> },

    /// Show the diagnostics for one file; exits non-zero on errors
    Check { file: PathBuf },
}

fn init_tracing(log_file: Option<&Path>) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    if let Some(path) = log_file {
        match open_log_file(path) {
            Ok(file) => {
                tracing_subscriber::registry()
                    .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                    .with(env_filter)
                    .init();
                tracing::info!(path = %path.display(), "Logging initialized");
                return;
            }
            Err(e) => eprintln!("warning: cannot open log file {}: {e}", path.display()),
        }
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn open_log_file(path: &Path) -> std::io::Result<fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// What a command produced: text for humans, a value for `--json`.
struct Rendered {
    text: String,
    json: serde_json::Value,
    failed: bool,
}

impl Rendered {
    fn new(text: String, value: &impl Serialize) -> Self {
        Self {
            text,
            json: serde_json::to_value(value).unwrap_or_default(),
            failed: false,
        }
    }

    fn empty(text: &str) -> Self {
        Self {
            text: text.to_string(),
            json: serde_json::Value::Null,
            failed: false,
        }
    }
}

/// Turn "the server had nothing to say" into a placeholder message.
fn or_empty<T>(
    result: plue_lsp::Result<T>,
    empty: &str,
    render: impl FnOnce(T) -> Rendered,
) -> Result<Rendered> {
    match result {
        Ok(value) => Ok(render(value)),
        Err(e) if e.is_no_result() => Ok(Rendered::empty(empty)),
        Err(e) => Err(e.into()),
    }
}

async fn execute(
    manager: &LspManager,
    command: Commands,
    timeout: Option<Duration>,
) -> Result<Rendered> {
    match command {
        Commands::Hover {
            file,
            line,
            character,
        } => or_empty(
            manager.hover(&file, line, character, timeout).await,
            output::NO_HOVER,
            |hover| Rendered::new(output::hover(&hover), &hover),
        ),
        Commands::Definition {
            file,
            line,
            character,
        } => or_empty(
            manager.go_to_definition(&file, line, character, timeout).await,
            output::NO_DEFINITION,
            |locations| Rendered::new(output::definitions(&locations), &locations),
        ),
        Commands::References {
            file,
            line,
            character,
            exclude_declaration,
        } => or_empty(
            manager
                .find_references(&file, line, character, !exclude_declaration, timeout)
                .await,
            output::NO_REFERENCES,
            |locations| Rendered::new(output::references(&locations), &locations),
        ),
        Commands::Symbols { query, file } => {
            // A fresh process has no running server; the file starts one.
            let symbols = manager
                .workspace_symbol(&query, Some(&file), timeout)
                .await
                .context("workspace symbol search failed")?;
            Ok(Rendered::new(
                output::workspace_symbols(&query, &symbols),
                &symbols,
            ))
        }
        Commands::DocumentSymbols { file } => {
            let symbols = manager.document_symbol(&file, timeout).await?;
            Ok(Rendered::new(
                output::document_symbols(&file, &symbols),
                &symbols,
            ))
        }
        Commands::Diagnostics { files } => {
            for file in &files {
                let touched = manager.touch_file(file, true, timeout).await?;
                if touched == 0 {
                    tracing::warn!("No language server handles {}", file.display());
                }
            }
            let snapshot = manager.snapshot().await;
            Ok(Rendered::new(
                output::snapshot(&snapshot),
                &manager.diagnostics(None).await,
            ))
        }
        Commands::Check { file } => {
            let diagnostics = manager.check_file_errors(&file, timeout).await?;
            let mut rendered =
                Rendered::new(output::file_errors(&file, &diagnostics), &diagnostics);
            rendered.failed = diagnostics.iter().any(|d| d.severity().is_error());
            Ok(rendered)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = PlueConfig::load(cli.config.as_deref()).context("failed to load config")?;
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    let manager = LspManager::from_config(&config.lsp, cwd);
    let timeout = cli.timeout_ms.map(Duration::from_millis);

    let result = execute(&manager, cli.command, timeout).await;
    manager.shutdown().await;
    let rendered = result?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&rendered.json).context("failed to encode JSON")?
        );
    } else {
        println!("{}", rendered.text);
    }

    Ok(if rendered.failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref());

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            if let Some(hint) = hint_for(&e) {
                eprintln!("hint: {hint}");
            }
            ExitCode::FAILURE
        }
    }
}

/// Something the user can do about `err`, if the cause is known.
fn hint_for(err: &anyhow::Error) -> Option<String> {
    err.chain().find_map(|cause| {
        if let Some(hint) = cause
            .downcast_ref::<LspError>()
            .and_then(LspError::install_hint)
        {
            return Some(format!("install with `{hint}`"));
        }
        cause
            .downcast_ref::<ConfigError>()
            .map(|e| format!("fix or remove {}", e.path().display()))
    })
}
