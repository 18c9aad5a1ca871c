//! Workspace root detection by walking up from a file.

use std::path::{Path, PathBuf};

/// The directory a search starts from: the file's parent, or the path itself
/// when it names a directory.
fn start_dir(file: &Path) -> &Path {
    if file.is_dir() {
        return file;
    }
    file.parent().unwrap_or(file)
}

/// Nearest ancestor directory (starting at the file's own directory) that
/// contains any of `markers`.
pub fn nearest_marker(file: &Path, markers: &[&str]) -> Option<PathBuf> {
    start_dir(file)
        .ancestors()
        .find(|dir| markers.iter().any(|m| dir.join(m).exists()))
        .map(Path::to_path_buf)
}

/// Like [`nearest_marker`], but `None` when any ancestor holds one of
/// `excluded`.
pub fn nearest_marker_excluding(
    file: &Path,
    markers: &[&str],
    excluded: &[&str],
) -> Option<PathBuf> {
    if nearest_marker(file, excluded).is_some() {
        return None;
    }
    nearest_marker(file, markers)
}

/// Try each marker group in order; the first group with a hit wins.
///
/// Used where a higher-level manifest must beat a closer one (`go.work`
/// over `go.mod`).
pub fn first_group_match(file: &Path, groups: &[&[&str]]) -> Option<PathBuf> {
    groups
        .iter()
        .find_map(|markers| nearest_marker(file, markers))
}

/// Nearest `Cargo.toml`, promoted to the closest enclosing manifest that
/// declares a `[workspace]`.
pub fn cargo_root(file: &Path) -> Option<PathBuf> {
    let crate_root = nearest_marker(file, &["Cargo.toml"])?;
    let workspace = crate_root
        .ancestors()
        .find(|dir| declares_workspace(&dir.join("Cargo.toml")));
    Some(workspace.unwrap_or(&crate_root).to_path_buf())
}

/// Whether `manifest` parses and has a top-level `workspace` table. Missing
/// or unparsable manifests are not workspaces.
fn declares_workspace(manifest: &Path) -> bool {
    let Ok(text) = std::fs::read_to_string(manifest) else {
        return false;
    };
    match toml::from_str::<toml::Table>(&text) {
        Ok(table) => table.contains_key("workspace"),
        Err(e) => {
            tracing::debug!("Ignoring unparsable manifest {}: {e}", manifest.display());
            false
        }
    }
}
