//! bnd-dyn: C headers → native bindings, at run time.
//!
//! Parses a constrained subset of C (typedefs, structs, `#define`s and
//! function prototypes) into a type registry, a constant table and a
//! prototype table, then binds the prototypes to symbols exported by
//! dynamically loaded libraries. Calls go through libffi.
//!
//! # Quick start
//!
//! Bind a header against the running process:
//!
//! ```no_run
//! use std::sync::Arc;
//! use bnd_dyn::{CallArg, Library, NativeLibrary};
//!
//! let tables = bnd_dyn::parse("int abs(int x);").unwrap();
//! let libc: Arc<dyn Library> = Arc::new(NativeLibrary::this().unwrap());
//! let ns = bnd_dyn::bind(&tables, &[libc]);
//! let abs = ns.function("abs").unwrap();
//! let v = unsafe { abs.call(&[CallArg::Int(-3)]) }.unwrap();
//! assert_eq!(v.as_i64(), Some(3));
//! ```
//!
//! Or load every binding set a `bnd-dyn.toml` describes:
//!
//! ```no_run
//! use std::path::Path;
//!
//! for (name, ns) in bnd_dyn::load(Path::new("bnd-dyn.toml")).unwrap() {
//!     println!("{name}: {} entries", ns.len());
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

pub mod bind;
pub mod call;
pub mod config;
pub mod derive;
pub mod error;
pub mod extract;
pub mod fields;
pub mod layout;
pub mod lexer;
pub mod library;
pub mod model;
pub mod preprocess;

pub use bind::{Charset, Item, Namespace, bind};
pub use call::{BoundFunction, CallArg};
pub use error::{Error, Result};
pub use extract::parse_header;
pub use layout::{Buffer, Value, wide};
pub use library::{Library, NativeLibrary, SymbolMap};
pub use model::{
    CallConv, ConstantValue, Field, FunctionSig, Layout, Param, Primitive, StructLayout, Tables,
};

/// Parse one header's text into fresh tables.
pub fn parse(text: &str) -> Result<Tables> {
    let mut tables = Tables::new();
    parse_header(text, &mut tables)?;
    Ok(tables)
}

/// Parse header files in order into one set of tables. Later headers see
/// everything earlier ones declared.
pub fn parse_headers<P: AsRef<Path>>(paths: &[P]) -> Result<Tables> {
    let mut tables = Tables::new();
    for path in paths {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "parsing header");
        parse_header(&text, &mut tables)?;
    }
    Ok(tables)
}

/// Load a `bnd-dyn.toml` config and build every namespace it describes.
///
/// Returns `(binding name, namespace)` pairs in config order.
pub fn load(config_path: &Path) -> anyhow::Result<Vec<(String, Namespace)>> {
    let cfg = config::load_config(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

    load_from_config(&cfg, base_dir)
}

/// Build namespaces from an already-loaded [`config::Config`].
///
/// `base_dir` is the directory relative to which header and library paths
/// in the config are resolved (typically the parent directory of the TOML
/// file).
pub fn load_from_config(
    cfg: &config::Config,
    base_dir: &Path,
) -> anyhow::Result<Vec<(String, Namespace)>> {
    info!(bindings = cfg.binding.len(), "loaded configuration");

    let mut namespaces = Vec::with_capacity(cfg.binding.len());
    for binding in &cfg.binding {
        let headers: Vec<PathBuf> = binding
            .headers
            .iter()
            .map(|h| config::resolve_header(h, base_dir, &cfg.include_paths))
            .collect();
        let tables = parse_headers(&headers)
            .with_context(|| format!("parsing headers of binding `{}`", binding.name))?;

        let libraries = open_libraries(&binding.libraries, base_dir, &cfg.include_paths)
            .with_context(|| format!("opening libraries of binding `{}`", binding.name))?;

        let mut ns = bind(&tables, &libraries);
        if !binding.variants.is_empty() {
            let names: Vec<&str> = binding.variants.iter().map(String::as_str).collect();
            ns = ns.with_variants(&names, binding.charset);
        }
        info!(
            binding = %binding.name,
            headers = headers.len(),
            entries = ns.len(),
            "built namespace"
        );
        namespaces.push((binding.name.clone(), ns));
    }
    Ok(namespaces)
}

/// Open configured libraries in search order.
pub fn open_libraries(
    entries: &[String],
    base_dir: &Path,
    include_paths: &[PathBuf],
) -> Result<Vec<Arc<dyn Library>>> {
    entries
        .iter()
        .map(|entry| -> Result<Arc<dyn Library>> {
            let library = match config::resolve_library(entry, base_dir, include_paths) {
                config::LibrarySource::Process => NativeLibrary::this()?,
                config::LibrarySource::Path(path) => NativeLibrary::open(path)?,
                config::LibrarySource::System(name) => NativeLibrary::open(name)?,
            };
            Ok(Arc::new(library) as Arc<dyn Library>)
        })
        .collect()
}

/// Render a namespace as C declarations, one entry per line, sorted by name.
pub fn describe(ns: &Namespace) -> String {
    let mut out = String::new();
    for (name, item) in ns.iter() {
        let line = match item {
            Item::Layout(Layout::Struct(s)) if s.name == name => s.definition(),
            Item::Layout(layout) => format!("typedef {};", layout.declaration(name)),
            Item::Constant(value) => format!("#define {name} {value}"),
            Item::Function(f) => format!("{};", f.signature().prototype(name)),
        };
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Load a config and write every namespace's declarations to `output`, or
/// stdout when `output` is `None`.
pub fn run(config_path: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let namespaces = load(config_path)?;

    let mut dump = String::new();
    for (name, ns) in &namespaces {
        dump.push_str(&format!("// binding `{name}`\n"));
        dump.push_str(&describe(ns));
        dump.push('\n');
    }

    match output {
        Some(path) => {
            std::fs::write(path, &dump)
                .with_context(|| format!("writing output to {}", path.display()))?;
            info!(path = %path.display(), size = dump.len(), "wrote declarations");
        }
        None => print!("{dump}"),
    }
    Ok(())
}
