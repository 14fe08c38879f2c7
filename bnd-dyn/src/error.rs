//! Error type shared by the parser family, the binding loader and call
//! marshalling.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A declaration matched none of the parsers.
    #[error("unsupported or malformed declaration: `{text}`")]
    Grammar { text: String },

    /// An element of a field list did not match the field pattern.
    #[error("malformed field `{field}` in `{list}`")]
    BadField { field: String, list: String },

    /// A base type was used before it was registered.
    #[error("unsupported type `{name}` in field `{field}` of `{list}`")]
    UnresolvedType {
        name: String,
        field: String,
        list: String,
    },

    #[error("invalid array size `{token}`")]
    BadArraySize { token: String },

    #[error("failed to load library {path}: {source}")]
    LibraryLoad {
        path: String,
        #[source]
        source: libloading::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("`{name}` is not in the namespace")]
    NotFound { name: String },

    #[error("`{name}` is a {found}, not a {expected}")]
    WrongKind {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("`{layout}` has no field `{field}`")]
    NoField { layout: String, field: String },

    #[error("field `{field}`: {reason}")]
    FieldType { field: String, reason: String },

    #[error("`{function}` takes {expected} argument(s), got {got}")]
    Arity {
        function: String,
        expected: usize,
        got: usize,
    },

    #[error("`{function}` argument {index}: {reason}")]
    Argument {
        function: String,
        index: usize,
        reason: String,
    },

    #[error("cannot express {what} to the native call interface")]
    Unsupported { what: String },
}

impl Error {
    pub(crate) fn grammar(text: impl Into<String>) -> Self {
        Error::Grammar { text: text.into() }
    }
}
