//! LSP language identifiers by file extension.

use std::path::Path;

pub const PLAINTEXT: &str = "plaintext";

/// Language id for `path`, keyed on `.ext` or, for extensionless files, the
/// basename. Unknown files are `plaintext`.
pub fn language_id(path: &Path) -> &'static str {
    let key = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!(".{ext}"),
        None => match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => return PLAINTEXT,
        },
    };
    for_key(&key).unwrap_or(PLAINTEXT)
}

fn for_key(key: &str) -> Option<&'static str> {
    let id = match key {
        ".py" | ".pyi" => "python",
        ".ts" | ".mts" | ".cts" => "typescript",
        ".tsx" => "typescriptreact",
        ".js" | ".mjs" | ".cjs" => "javascript",
        ".jsx" => "javascriptreact",
        ".go" => "go",
        ".rs" => "rust",
        ".java" => "java",
        ".c" | ".h" => "c",
        ".cpp" | ".cc" | ".cxx" | ".hpp" | ".hh" | ".hxx" => "cpp",
        ".cs" => "csharp",
        ".rb" => "ruby",
        ".php" => "php",
        ".swift" => "swift",
        ".kt" | ".kts" => "kotlin",
        ".scala" => "scala",
        ".r" | ".R" => "r",
        ".lua" => "lua",
        ".dart" => "dart",
        ".zig" | ".zon" => "zig",
        ".sh" | ".bash" | ".zsh" => "shellscript",
        ".yaml" | ".yml" => "yaml",
        ".json" => "json",
        ".jsonc" => "jsonc",
        ".xml" => "xml",
        ".toml" => "toml",
        ".ini" => "ini",
        ".html" | ".htm" => "html",
        ".css" => "css",
        ".scss" => "scss",
        ".sass" => "sass",
        ".less" => "less",
        ".md" | ".markdown" => "markdown",
        ".sql" => "sql",
        ".dockerfile" | "Dockerfile" => "dockerfile",
        ".makefile" | ".mk" | "Makefile" => "makefile",
        ".ex" | ".exs" => "elixir",
        ".erl" => "erlang",
        ".hs" => "haskell",
        ".ml" | ".mli" => "ocaml",
        ".fs" | ".fsx" => "fsharp",
        ".clj" => "clojure",
        ".cljs" => "clojurescript",
        ".vue" => "vue",
        ".svelte" => "svelte",
        _ => return None,
    };
    Some(id)
}
