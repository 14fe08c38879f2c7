//! Binding loader: parsed tables + native libraries → immutable namespace.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::call::BoundFunction;
use crate::error::{Error, Result};
use crate::library::Library;
use crate::model::{ConstantValue, Layout, Tables};

/// One namespace entry.
#[derive(Debug, Clone)]
pub enum Item {
    Layout(Layout),
    Constant(ConstantValue),
    Function(Arc<BoundFunction>),
}

impl Item {
    pub fn kind(&self) -> &'static str {
        match self {
            Item::Layout(_) => "layout",
            Item::Constant(_) => "constant",
            Item::Function(_) => "function",
        }
    }
}

/// Which suffix a variant alias prefers: `A` (ANSI) or `W` (wide).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Charset {
    Ansi,
    #[default]
    Wide,
}

impl Charset {
    fn suffixes(self) -> [char; 2] {
        match self {
            Charset::Ansi => ['A', 'W'],
            Charset::Wide => ['W', 'A'],
        }
    }
}

/// Read-only view of everything a header set declared and the libraries
/// bound.
///
/// Holds a strong reference to every library it was bound against.
#[derive(Clone, Default)]
pub struct Namespace {
    entries: BTreeMap<String, Item>,
    libraries: Vec<Arc<dyn Library>>,
}

impl Namespace {
    pub fn get(&self, name: &str) -> Result<&Item> {
        self.entries.get(name).ok_or_else(|| Error::NotFound {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn layout(&self, name: &str) -> Result<&Layout> {
        match self.get(name)? {
            Item::Layout(l) => Ok(l),
            other => Err(wrong_kind(name, "layout", other)),
        }
    }

    pub fn constant(&self, name: &str) -> Result<&ConstantValue> {
        match self.get(name)? {
            Item::Constant(c) => Ok(c),
            other => Err(wrong_kind(name, "constant", other)),
        }
    }

    pub fn function(&self, name: &str) -> Result<&Arc<BoundFunction>> {
        match self.get(name)? {
            Item::Function(f) => Ok(f),
            other => Err(wrong_kind(name, "function", other)),
        }
    }

    /// Entry names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Item)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn libraries(&self) -> &[Arc<dyn Library>] {
        &self.libraries
    }

    /// A new namespace with the admissible `entries` added; they replace
    /// existing names.
    pub fn merge<S: Into<String>>(&self, entries: impl IntoIterator<Item = (S, Item)>) -> Namespace {
        let mut merged = self.clone();
        for (name, item) in entries {
            let name = name.into();
            if !is_admissible(&name) {
                debug!(name = %name, "skipping inadmissible merge entry");
                continue;
            }
            merged.entries.insert(name, item);
        }
        merged
    }

    /// A new namespace where each of `names` aliases its `W` or `A` variant,
    /// `charset` first and the other as fallback. Names with neither variant
    /// are skipped.
    pub fn with_variants(&self, names: &[&str], charset: Charset) -> Namespace {
        let mut aliased = self.clone();
        for name in names {
            let found = charset.suffixes().into_iter().find_map(|suffix| {
                let variant = format!("{name}{suffix}");
                self.entries.get(&variant).map(|item| (variant, item))
            });
            match found {
                Some((variant, item)) => {
                    debug!(name, variant = %variant, "variant alias");
                    aliased.entries.insert(name.to_string(), item.clone());
                }
                None => debug!(name, "no A/W variant to alias"),
            }
        }
        aliased
    }
}

fn wrong_kind(name: &str, expected: &'static str, found: &Item) -> Error {
    Error::WrongKind {
        name: name.to_string(),
        expected,
        found: found.kind(),
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let libraries: Vec<&str> = self.libraries.iter().map(|l| l.path()).collect();
        f.debug_struct("Namespace")
            .field("entries", &self.entries.len())
            .field("libraries", &libraries)
            .finish()
    }
}

/// Names a namespace exposes: no spaces (`unsigned int`) and no leading
/// underscore (struct tags, reserved identifiers).
pub fn is_admissible(name: &str) -> bool {
    !name.contains(' ') && !name.starts_with('_')
}

/// Bind parsed tables against `libraries`.
///
/// For each prototype the first library exporting the exact symbol wins.
/// Prototypes no library exports are omitted, as are prototypes whose
/// by-value layouts the call interface cannot express.
pub fn bind(tables: &Tables, libraries: &[Arc<dyn Library>]) -> Namespace {
    let mut entries = BTreeMap::new();

    for (name, layout) in tables.types.iter() {
        if is_admissible(name) {
            entries.insert(name.to_string(), Item::Layout(layout.clone()));
        }
    }
    for (name, value) in tables.constants.iter() {
        if is_admissible(name) {
            entries.insert(name.to_string(), Item::Constant(value.clone()));
        }
    }

    let mut functions = 0;
    let mut missing = 0;
    for (name, sig) in tables.prototypes.iter() {
        if !is_admissible(name) {
            continue;
        }
        let Some((library, address)) = libraries
            .iter()
            .find_map(|lib| lib.symbol(name).map(|addr| (lib, addr)))
        else {
            debug!(name, "no library exports symbol, omitted");
            missing += 1;
            continue;
        };
        match BoundFunction::new(name, sig.clone(), address, Arc::clone(library)) {
            Ok(function) => {
                debug!(name, library = library.path(), "bound");
                entries.insert(name.to_string(), Item::Function(Arc::new(function)));
                functions += 1;
            }
            Err(e) => warn!(name, error = %e, "omitting function"),
        }
    }

    info!(
        entries = entries.len(),
        functions,
        missing,
        libraries = libraries.len(),
        "bound namespace"
    );
    Namespace {
        entries,
        libraries: libraries.to_vec(),
    }
}
