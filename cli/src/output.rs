//! Human-readable rendering of manager results.
//!
//! Lines and columns are shown 1-based; input positions stay 0-based.

use std::collections::BTreeMap;
use std::path::Path;

use plue_lsp::{
    Diagnostic, DiagnosticsSnapshot, DocumentSymbol, DocumentSymbols, HoverResult, Location,
    SymbolInformation,
};

pub const NO_HOVER: &str = "No hover information";
pub const NO_DEFINITION: &str = "No definition found at this position";
pub const NO_REFERENCES: &str = "No references found for this symbol";
pub const NO_ERRORS: &str = "No errors found";

const MAX_SYMBOLS: usize = 20;
const MAX_REFERENCE_FILES: usize = 5;
const MAX_REFERENCES_PER_FILE: usize = 10;

pub fn hover(result: &HoverResult) -> String {
    if result.contents.trim().is_empty() {
        NO_HOVER.to_string()
    } else {
        result.contents.clone()
    }
}

fn location_label(location: &Location) -> String {
    let target = match &location.path {
        Some(path) => path.display().to_string(),
        None => location.uri.clone(),
    };
    let start = location.range.start;
    format!("{target}:{}:{}", start.line + 1, start.character + 1)
}

pub fn definitions(locations: &[Location]) -> String {
    if locations.is_empty() {
        return NO_DEFINITION.to_string();
    }
    let mut out = format!("Found {} definition(s):\n", locations.len());
    for location in locations {
        out.push_str(&format!("\n  {}", location_label(location)));
    }
    out
}

pub fn references(locations: &[Location]) -> String {
    if locations.is_empty() {
        return NO_REFERENCES.to_string();
    }

    let mut by_file: BTreeMap<String, Vec<&Location>> = BTreeMap::new();
    for location in locations {
        let key = match &location.path {
            Some(path) => path.display().to_string(),
            None => location.uri.clone(),
        };
        by_file.entry(key).or_default().push(location);
    }

    let mut out = format!(
        "Found {} reference(s) across {} file(s):\n",
        locations.len(),
        by_file.len()
    );
    for (file, refs) in by_file.iter().take(MAX_REFERENCE_FILES) {
        out.push_str(&format!("\n  {file} ({} reference(s)):", refs.len()));
        for r in refs.iter().take(MAX_REFERENCES_PER_FILE) {
            let start = r.range.start;
            out.push_str(&format!(
                "\n    Line {}, Column {}",
                start.line + 1,
                start.character + 1
            ));
        }
        if refs.len() > MAX_REFERENCES_PER_FILE {
            out.push_str(&format!(
                "\n    ... and {} more in this file",
                refs.len() - MAX_REFERENCES_PER_FILE
            ));
        }
    }
    if by_file.len() > MAX_REFERENCE_FILES {
        out.push_str(&format!(
            "\n\n  ... and {} more file(s)",
            by_file.len() - MAX_REFERENCE_FILES
        ));
    }
    out
}

pub fn workspace_symbols(query: &str, symbols: &[SymbolInformation]) -> String {
    if symbols.is_empty() {
        return format!("No symbols found matching '{query}'");
    }
    let mut out = format!("Found {} symbol(s) matching '{query}':\n", symbols.len());
    for symbol in symbols.iter().take(MAX_SYMBOLS) {
        out.push_str(&format!("\n  {}", symbol_line(symbol)));
    }
    if symbols.len() > MAX_SYMBOLS {
        out.push_str(&format!("\n\n  ... and {} more", symbols.len() - MAX_SYMBOLS));
    }
    out
}

fn symbol_line(symbol: &SymbolInformation) -> String {
    let container = symbol
        .container_name
        .as_deref()
        .map(|c| format!(" in {c}"))
        .unwrap_or_default();
    format!(
        "{}: {}{container} @ {}",
        symbol.kind.name(),
        symbol.name,
        location_label(&symbol.location)
    )
}

pub fn document_symbols(path: &Path, symbols: &DocumentSymbols) -> String {
    if symbols.is_empty() {
        return format!("No symbols found in {}", path.display());
    }
    let mut out = format!("{} symbol(s) in {}:\n", symbols.len(), path.display());
    match symbols {
        DocumentSymbols::Nested(items) => {
            for item in items {
                push_nested(&mut out, item, 1);
            }
        }
        DocumentSymbols::Flat(items) => {
            for item in items {
                out.push_str(&format!("\n  {}", symbol_line(item)));
            }
        }
    }
    out
}

fn push_nested(out: &mut String, symbol: &DocumentSymbol, depth: usize) {
    let indent = "  ".repeat(depth);
    out.push_str(&format!(
        "\n{indent}{}: {} (line {})",
        symbol.kind.name(),
        symbol.name,
        symbol.selection_range.start.line + 1
    ));
    if let Some(detail) = symbol.detail.as_deref().filter(|d| !d.is_empty()) {
        out.push_str(&format!(" {detail}"));
    }
    for child in &symbol.children {
        push_nested(out, child, depth + 1);
    }
}

pub fn file_errors(path: &Path, diagnostics: &[Diagnostic]) -> String {
    if diagnostics.is_empty() {
        return NO_ERRORS.to_string();
    }
    diagnostics
        .iter()
        .map(|d| d.display_with_path(path))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn snapshot(snapshot: &DiagnosticsSnapshot) -> String {
    if snapshot.is_empty() {
        return NO_ERRORS.to_string();
    }
    let mut lines = vec![snapshot.status_string()];
    for (path, items) in snapshot.files() {
        lines.extend(items.iter().map(|d| d.display_with_path(path)));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use plue_lsp::{DiagnosticSeverity, Position, Range, SymbolKind};
    use std::path::PathBuf;

    fn location(path: &str, line: u32, character: u32) -> Location {
        Location {
            uri: format!("file://{path}"),
            path: Some(PathBuf::from(path)),
            range: Range::new(
                Position::new(line, character),
                Position::new(line, character + 3),
            ),
        }
    }

    #[test]
    fn empty_hover_has_placeholder() {
        let result = HoverResult {
            contents: "  ".to_string(),
            range: None,
            language: "go".to_string(),
        };
        assert_eq!(hover(&result), NO_HOVER);
    }

    #[test]
    fn definitions_are_one_based() {
        let out = definitions(&[location("/w/util.go", 9, 5)]);
        assert!(out.starts_with("Found 1 definition(s):"));
        assert!(out.contains("/w/util.go:10:6"));
        assert_eq!(definitions(&[]), NO_DEFINITION);
    }

    #[test]
    fn references_group_by_file() {
        let mut refs = vec![location("/w/b.go", 0, 0), location("/w/a.go", 4, 1)];
        refs.extend((0..12).map(|i| location("/w/a.go", i, 0)));
        let out = references(&refs);
        assert!(out.starts_with("Found 14 reference(s) across 2 file(s):"));
        assert!(out.contains("/w/a.go (13 reference(s)):"));
        assert!(out.contains("... and 3 more in this file"));
        assert!(out.find("/w/a.go").unwrap() < out.find("/w/b.go").unwrap());
    }

    #[test]
    fn workspace_symbols_show_kind_and_container() {
        let symbols = vec![SymbolInformation {
            name: "Serve".to_string(),
            kind: SymbolKind(6),
            location: location("/w/server.go", 41, 5),
            container_name: Some("Server".to_string()),
        }];
        let out = workspace_symbols("Serve", &symbols);
        assert!(out.contains("method: Serve in Server @ /w/server.go:42:6"));
        assert_eq!(
            workspace_symbols("Nope", &[]),
            "No symbols found matching 'Nope'"
        );
    }

    #[test]
    fn nested_symbols_are_indented() {
        let range = Range::new(Position::new(2, 0), Position::new(8, 1));
        let symbols = DocumentSymbols::Nested(vec![DocumentSymbol {
            name: "Server".to_string(),
            detail: None,
            kind: SymbolKind(23),
            range,
            selection_range: range,
            children: vec![DocumentSymbol {
                name: "addr".to_string(),
                detail: Some("string".to_string()),
                kind: SymbolKind(8),
                range,
                selection_range: range,
                children: vec![],
            }],
        }]);
        let out = document_symbols(Path::new("/w/server.go"), &symbols);
        assert!(out.contains("\n  struct: Server (line 3)"));
        assert!(out.contains("\n    field: addr (line 3) string"));
    }

    #[test]
    fn file_errors_lists_each_diagnostic() {
        let diag = Diagnostic::new(
            Range::new(Position::new(3, 1), Position::new(3, 4)),
            DiagnosticSeverity::Error,
            None,
            Some("compiler".to_string()),
            "undefined: foo".to_string(),
        );
        let path = Path::new("/w/main.go");
        assert_eq!(file_errors(path, &[]), NO_ERRORS);
        let out = file_errors(path, &[diag]);
        assert!(out.contains("/w/main.go:4:2"));
        assert!(out.contains("undefined: foo"));
    }

    #[test]
    fn empty_snapshot_reports_no_errors() {
        assert_eq!(snapshot(&DiagnosticsSnapshot::default()), NO_ERRORS);
    }
}
