//! Where bound functions come from: native shared libraries, the running
//! process, or an explicit in-process symbol table.

use std::collections::HashMap;
use std::ffi::{CString, c_void};
use std::path::Path;
use std::ptr::NonNull;

use tracing::debug;

use crate::error::{Error, Result};

/// A source of exported symbols.
pub trait Library: Send + Sync {
    /// Display path, used in logs and errors.
    fn path(&self) -> &str;

    /// Address of the exported symbol `name`, if present.
    fn symbol(&self, name: &str) -> Option<NonNull<c_void>>;

    fn has_symbol(&self, name: &str) -> bool {
        self.symbol(name).is_some()
    }
}

/// A shared library opened through the platform loader.
pub struct NativeLibrary {
    library: libloading::Library,
    path: String,
}

impl NativeLibrary {
    /// Open a library by path (or by bare file name, searched the way the
    /// platform loader searches).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        // SAFETY: loading runs the library's initialisers; libraries named in
        // headers are trusted the same way a linker would trust them.
        let library = unsafe { libloading::Library::new(path) }.map_err(|source| {
            Error::LibraryLoad {
                path: path.display().to_string(),
                source,
            }
        })?;
        debug!(path = %path.display(), "opened library");
        Ok(Self {
            library,
            path: path.display().to_string(),
        })
    }

    /// The running executable and everything already loaded into it.
    #[cfg(unix)]
    pub fn this() -> Result<Self> {
        Ok(Self {
            library: libloading::os::unix::Library::this().into(),
            path: "<self>".to_string(),
        })
    }

    /// The running executable.
    #[cfg(windows)]
    pub fn this() -> Result<Self> {
        let library = libloading::os::windows::Library::this().map_err(|source| {
            Error::LibraryLoad {
                path: "<self>".to_string(),
                source,
            }
        })?;
        Ok(Self {
            library: library.into(),
            path: "<self>".to_string(),
        })
    }
}

impl Library for NativeLibrary {
    fn path(&self) -> &str {
        &self.path
    }

    fn symbol(&self, name: &str) -> Option<NonNull<c_void>> {
        let c_name = CString::new(name).ok()?;
        // SAFETY: the symbol is only read as an address, never called here.
        let symbol = unsafe {
            self.library
                .get::<*mut c_void>(c_name.as_bytes_with_nul())
                .ok()?
        };
        NonNull::new(*symbol)
    }
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("path", &self.path)
            .finish()
    }
}

/// An explicit name → address table, for functions that live in the
/// current binary.
#[derive(Debug, Default)]
pub struct SymbolMap {
    name: String,
    symbols: HashMap<String, usize>,
}

impl SymbolMap {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbols: HashMap::new(),
        }
    }

    /// Register `name` at `address`. A function item can be passed as
    /// `f as *const c_void`.
    pub fn with(mut self, name: &str, address: *const c_void) -> Self {
        self.insert(name, address);
        self
    }

    pub fn insert(&mut self, name: &str, address: *const c_void) {
        self.symbols.insert(name.to_string(), address as usize);
    }
}

impl Library for SymbolMap {
    fn path(&self) -> &str {
        &self.name
    }

    fn symbol(&self, name: &str) -> Option<NonNull<c_void>> {
        self.symbols
            .get(name)
            .and_then(|addr| NonNull::new(*addr as *mut c_void))
    }
}
