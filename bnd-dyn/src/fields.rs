//! Field list parsing: `type name[, name...][size]` lists shared by
//! typedefs, struct bodies and function parameters.

use tracing::trace;

use crate::derive::{derive, is_qualifier};
use crate::error::{Error, Result};
use crate::lexer::{Kind, Token};
use crate::model::{Field, Tables};

/// How a list is being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListKind {
    pub separator: char,
    /// Whether the last declarator of an element may carry `[size]`.
    pub arrays: bool,
    /// Whether a declarator may omit its name (function parameters).
    pub unnamed: bool,
}

impl ListKind {
    /// Typedef lists and struct bodies.
    pub const MEMBERS: ListKind = ListKind {
        separator: ';',
        arrays: true,
        unnamed: false,
    };

    /// Function parameter lists.
    pub const PARAMS: ListKind = ListKind {
        separator: ',',
        arrays: false,
        unnamed: true,
    };
}

/// Source text covered by `tokens`.
pub fn span_text<'a>(src: &'a str, tokens: &[Token<'_>]) -> &'a str {
    match (tokens.first(), tokens.last()) {
        (Some(first), Some(last)) => &src[first.start..last.end()],
        _ => "",
    }
}

/// Split `tokens` on `separator` at nesting depth zero. A trailing empty
/// element is dropped.
pub fn split_top_level<'t, 'a>(tokens: &'t [Token<'a>], separator: char) -> Vec<&'t [Token<'a>]> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut begin = 0;
    for (i, t) in tokens.iter().enumerate() {
        match t.kind {
            Kind::Punct('(' | '[' | '{') => depth += 1,
            Kind::Punct(')' | ']' | '}') => depth = depth.saturating_sub(1),
            Kind::Punct(c) if c == separator && depth == 0 => {
                parts.push(&tokens[begin..i]);
                begin = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&tokens[begin..]);
    if parts.last().is_some_and(|p| p.is_empty()) {
        parts.pop();
    }
    parts
}

/// One parsed declarator before type derivation.
struct Declarator<'a> {
    name: Option<&'a str>,
    stars: usize,
}

/// Parse a declaration list into resolved fields, in declaration order.
pub fn parse_field_list(
    src: &str,
    tokens: &[Token<'_>],
    kind: ListKind,
    tables: &Tables,
) -> Result<Vec<Field>> {
    let list = span_text(src, tokens);
    let mut fields = Vec::new();
    for element in split_top_level(tokens, kind.separator) {
        let field_text = span_text(src, element);
        let bad = || Error::BadField {
            field: field_text.to_string(),
            list: list.to_string(),
        };
        let parsed = parse_element(element, kind).ok_or_else(bad)?;

        let last = parsed.declarators.len() - 1;
        for (i, d) in parsed.declarators.iter().enumerate() {
            let array = if i == last { parsed.array } else { None };
            let ty = derive(tables, &parsed.qualifiers, &parsed.base, d.stars, array)
                .map_err(|e| e.in_field(field_text, list))?;
            let name = match d.name {
                Some(n) => n.to_string(),
                None => format!("arg{}", fields.len()),
            };
            trace!(field = %name, ty = ?ty, "  field");
            fields.push(Field { name, ty });
        }
    }
    Ok(fields)
}

struct Element<'a> {
    qualifiers: Vec<&'a str>,
    base: Vec<&'a str>,
    declarators: Vec<Declarator<'a>>,
    array: Option<&'a str>,
}

/// Match one element against
/// `qualifier* word+ ((*)* ident)(, (*)* ident)* ([size])?`.
fn parse_element<'a>(el: &[Token<'a>], kind: ListKind) -> Option<Element<'a>> {
    let mut qualifiers = Vec::new();
    let mut words = Vec::new();
    let mut i = 0;
    while i < el.len() && el[i].is_ident() {
        if is_qualifier(el[i].text) {
            qualifiers.push(el[i].text);
        } else {
            words.push(el[i].text);
        }
        i += 1;
    }

    let mut declarators = Vec::new();
    let at_end = |i: usize| i == el.len() || el[i].is_punct(',') || el[i].is_punct('[');
    if i < el.len() && el[i].is_punct('*') {
        // `base *name`: every word so far is part of the base type.
    } else if at_end(i) && words.len() >= 2 {
        // `base name`: the last word is the first declarator.
        let name = words.pop();
        declarators.push(Declarator { name, stars: 0 });
    } else if at_end(i) && kind.unnamed && !words.is_empty() && i == el.len() {
        declarators.push(Declarator {
            name: None,
            stars: 0,
        });
    } else {
        return None;
    }
    if words.is_empty() {
        return None;
    }

    // Remaining declarators, each `(*)* ident`, separated by commas.
    if !declarators.is_empty() {
        if i < el.len() && el[i].is_punct(',') {
            i += 1;
        } else {
            return finish(el, i, kind, qualifiers, words, declarators);
        }
    }
    loop {
        let mut stars = 0;
        while i < el.len() && (el[i].is_punct('*') || (el[i].is_ident() && is_qualifier(el[i].text))) {
            if el[i].is_punct('*') {
                stars += 1;
            }
            i += 1;
        }
        let name = if i < el.len() && el[i].is_ident() {
            i += 1;
            Some(el[i - 1].text)
        } else if kind.unnamed && i == el.len() && stars > 0 {
            None
        } else {
            return None;
        };
        declarators.push(Declarator { name, stars });
        if i < el.len() && el[i].is_punct(',') {
            i += 1;
            continue;
        }
        break;
    }
    finish(el, i, kind, qualifiers, words, declarators)
}

fn finish<'a>(
    el: &[Token<'a>],
    mut i: usize,
    kind: ListKind,
    qualifiers: Vec<&'a str>,
    base: Vec<&'a str>,
    declarators: Vec<Declarator<'a>>,
) -> Option<Element<'a>> {
    let mut array = None;
    if i < el.len() && el[i].is_punct('[') {
        if !kind.arrays {
            return None;
        }
        let size = el.get(i + 1).filter(|t| matches!(t.kind, Kind::Ident | Kind::Number))?;
        if !el.get(i + 2).is_some_and(|t| t.is_punct(']')) {
            return None;
        }
        array = Some(size.text);
        i += 3;
    }
    if i != el.len() {
        return None;
    }
    Some(Element {
        qualifiers,
        base,
        declarators,
        array,
    })
}
