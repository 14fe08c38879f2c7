//! Configuration types for `bnd-dyn.toml`.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::bind::Charset;

/// Library name that binds against the running process.
pub const SELF_LIBRARY: &str = "self";

/// Root configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Additional directories to search when resolving header and library
    /// paths.  Each entry is tried in order after `base_dir` (the TOML
    /// file's parent directory).
    #[serde(default)]
    pub include_paths: Vec<PathBuf>,
    #[serde(default)]
    pub binding: Vec<BindingConfig>,
}

/// One binding set: a list of headers parsed in order into one set of
/// tables, bound against a list of libraries.
#[derive(Debug, Deserialize)]
pub struct BindingConfig {
    /// Name the resulting namespace is reported under.
    pub name: String,
    /// Headers, parsed in order into shared tables.
    pub headers: Vec<PathBuf>,
    /// Libraries searched in order for each prototype. A bare name (`z`) is
    /// looked up with the platform file-name convention; `"self"` is the
    /// running process.
    #[serde(default)]
    pub libraries: Vec<String>,
    /// Preferred variant for `variants` aliases.
    #[serde(default)]
    pub charset: Charset,
    /// Base names to alias to their `A`/`W` variant.
    #[serde(default)]
    pub variants: Vec<String>,
}

/// Resolve a header path by searching `base_dir` first, then each
/// `include_paths` entry.  Absolute paths are returned as-is.  If the
/// file is not found anywhere, falls back to `base_dir.join(path)` so
/// that the caller gets a meaningful error when reading it.
pub fn resolve_header(path: &Path, base_dir: &Path, include_paths: &[PathBuf]) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let candidate = base_dir.join(path);
    if candidate.exists() {
        return candidate;
    }
    for inc in include_paths {
        let candidate = inc.join(path);
        if candidate.exists() {
            return candidate;
        }
    }
    base_dir.join(path)
}

/// Where a configured library comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibrarySource {
    /// The running process.
    Process,
    /// A file found on disk.
    Path(PathBuf),
    /// A file name left to the platform loader's search.
    System(std::ffi::OsString),
}

/// Resolve a `libraries` entry.
///
/// Entries with a directory component or an extension are paths, resolved
/// like headers. Bare names are tried as the platform file name under
/// `base_dir` and `include_paths`, then handed to the platform loader.
pub fn resolve_library(entry: &str, base_dir: &Path, include_paths: &[PathBuf]) -> LibrarySource {
    if entry == SELF_LIBRARY {
        return LibrarySource::Process;
    }
    let path = Path::new(entry);
    if path.components().count() > 1 || path.extension().is_some() {
        return LibrarySource::Path(resolve_header(path, base_dir, include_paths));
    }
    let file_name = libloading::library_filename(entry);
    for dir in std::iter::once(base_dir).chain(include_paths.iter().map(PathBuf::as_path)) {
        let candidate = dir.join(&file_name);
        if candidate.exists() {
            return LibrarySource::Path(candidate);
        }
    }
    LibrarySource::System(file_name)
}

/// Load and parse a `bnd-dyn.toml` configuration file.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let config: Config = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {}", path.display(), e))?;
    Ok(config)
}
