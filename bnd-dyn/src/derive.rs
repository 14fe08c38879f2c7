//! Type derivation: base type + qualifiers + pointer stars + array size →
//! concrete [`Layout`].

use crate::error::{Error, Result};
use crate::extract::parse_integer;
use crate::model::{Layout, Primitive, Tables};

/// Qualifier keywords accepted in front of (or between) base type words.
pub const QUALIFIERS: &[&str] = &["const", "signed", "unsigned", "volatile"];

/// Case-insensitive qualifier test, so `CONST` from Windows headers works.
pub fn is_qualifier(word: &str) -> bool {
    QUALIFIERS.iter().any(|q| q.eq_ignore_ascii_case(word))
}

/// Normalise a base type spelling for registry lookup.
///
/// Only `unsigned` survives normalisation; `const`, `volatile` and `signed`
/// are dropped. A leading `struct` keyword is dropped so tags resolve.
pub fn lookup_name(qualifiers: &[&str], base: &[&str]) -> String {
    let words = match base.split_first() {
        Some((&"struct", rest)) if !rest.is_empty() => rest,
        _ => base,
    };
    let name = words.join(" ");
    if qualifiers.iter().any(|q| q.eq_ignore_ascii_case("unsigned")) {
        format!("unsigned {name}")
    } else {
        name
    }
}

/// Derive the layout for `qualifiers base <stars>name[array]`.
///
/// Pointer derivation happens before array derivation, so `T* x[N]` is an
/// array of pointers. The native-string and opaque-pointer special cases only
/// apply to the innermost star.
pub fn derive(
    tables: &Tables,
    qualifiers: &[&str],
    base: &[&str],
    stars: usize,
    array: Option<&str>,
) -> Result<Layout> {
    let name = lookup_name(qualifiers, base);
    let resolved = tables
        .types
        .get(&name)
        .cloned()
        .ok_or_else(|| Error::UnresolvedType {
            name: name.clone(),
            field: String::new(),
            list: String::new(),
        })?;

    let mut layout = if stars > 0 {
        let innermost = match resolved {
            Layout::Primitive(Primitive::Char) => Layout::Primitive(Primitive::CStr),
            Layout::Primitive(Primitive::WChar) => Layout::Primitive(Primitive::WStr),
            Layout::Primitive(Primitive::Void) => Layout::Primitive(Primitive::VoidPtr),
            other => other.pointer(),
        };
        (1..stars).fold(innermost, |l, _| l.pointer())
    } else {
        resolved
    };

    if let Some(token) = array {
        let len = array_len(tables, token, &layout)?;
        layout = layout.array(len);
    }
    Ok(layout)
}

/// Resolve an array size: a known constant name, else an integer literal.
/// The array's total byte size must fit in `isize`.
pub fn array_len(tables: &Tables, token: &str, element: &Layout) -> Result<usize> {
    let value = match tables.constants.get(token) {
        Some(v) => v.as_u64(),
        None => parse_integer(token).and_then(|v| v.as_u64()),
    };
    value
        .and_then(|v| usize::try_from(v).ok())
        .filter(|&len| {
            element
                .size()
                .checked_mul(len)
                .is_some_and(|bytes| isize::try_from(bytes).is_ok())
        })
        .ok_or_else(|| Error::BadArraySize {
            token: token.to_string(),
        })
}

impl Error {
    /// Attach field context to an [`Error::UnresolvedType`] raised by
    /// [`derive`].
    pub(crate) fn in_field(self, field: &str, list: &str) -> Self {
        match self {
            Error::UnresolvedType { name, .. } => Error::UnresolvedType {
                name,
                field: field.to_string(),
                list: list.to_string(),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConstantValue;

    #[test]
    fn unsigned_prefixes_lookup() {
        assert_eq!(lookup_name(&["unsigned"], &["int"]), "unsigned int");
        assert_eq!(lookup_name(&["const", "signed"], &["char"]), "char");
        assert_eq!(lookup_name(&["CONST"], &["WCHAR"]), "WCHAR");
        assert_eq!(lookup_name(&[], &["struct", "_FOO"]), "_FOO");
        assert_eq!(lookup_name(&[], &["long", "long"]), "long long");
    }

    #[test]
    fn array_len_from_constant_or_literal() {
        let mut tables = Tables::new();
        tables.constants.insert("MAX", ConstantValue::Signed(10));
        tables.constants.insert("NEG", ConstantValue::Signed(-1));
        let int = Layout::Primitive(Primitive::I32);
        assert_eq!(array_len(&tables, "MAX", &int).unwrap(), 10);
        assert_eq!(array_len(&tables, "0x10", &int).unwrap(), 16);
        assert!(matches!(
            array_len(&tables, "NEG", &int),
            Err(Error::BadArraySize { .. })
        ));
        assert!(matches!(
            array_len(&tables, "UNKNOWN", &int),
            Err(Error::BadArraySize { .. })
        ));
    }

    #[test]
    fn array_byte_size_must_fit() {
        let tables = Tables::new();
        let int = Layout::Primitive(Primitive::I32);
        let byte = Layout::Primitive(Primitive::U8);
        assert!(matches!(
            array_len(&tables, "0x7FFFFFFFFFFFFFFF", &int),
            Err(Error::BadArraySize { .. })
        ));
        assert!(matches!(
            array_len(&tables, "0xFFFFFFFFFFFFFFFF", &byte),
            Err(Error::BadArraySize { .. })
        ));
        assert_eq!(array_len(&tables, "4096", &byte).unwrap(), 4096);
    }
}
