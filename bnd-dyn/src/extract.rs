//! Extraction: header text → type, constant and prototype tables.
//!
//! Four parsers are tried in a fixed order against the remaining tokens:
//! typedef, struct, directive (`#define` / `#pragma pack`), function. After
//! every match the loop restarts from the typedef parser. When a full pass
//! matches nothing, any token left over is a fatal grammar error.

use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::derive::{derive, is_qualifier};
use crate::error::{Error, Result};
use crate::fields::{ListKind, parse_field_list, span_text, split_top_level};
use crate::lexer::{Kind, Token, tokenize};
use crate::model::*;
use crate::preprocess;

/// Parse `text` into `tables`.
///
/// On error the tables may hold the declarations that preceded the failing
/// one; callers should discard them.
pub fn parse_header(text: &str, tables: &mut Tables) -> Result<()> {
    let stripped = preprocess::strip(text);
    let tokens = tokenize(&stripped);
    let mut session = Session {
        src: &stripped,
        tokens: &tokens,
        pos: 0,
        pack: None,
        pack_stack: Vec::new(),
    };

    loop {
        let matched = session.typedef(tables)?
            || session.structure(tables)?
            || session.directive(tables)?
            || session.function(tables)?;
        if !matched {
            break;
        }
    }

    if session.pos < tokens.len() {
        return Err(Error::grammar(session.offending_text()));
    }

    info!(
        types = tables.types.declared_len(),
        constants = tables.constants.len(),
        prototypes = tables.prototypes.len(),
        "header parsed"
    );
    Ok(())
}

/// Per-header parsing state. The tables are passed in explicitly.
struct Session<'s, 't> {
    src: &'s str,
    tokens: &'t [Token<'s>],
    pos: usize,
    /// Active `#pragma pack` width.
    pack: Option<usize>,
    pack_stack: Vec<Option<usize>>,
}

impl<'s, 't> Session<'s, 't> {
    fn rest(&self) -> &'t [Token<'s>] {
        &self.tokens[self.pos..]
    }

    /// Offset (within `rest`) of the first `;`.
    fn statement_end(&self) -> Option<usize> {
        self.rest().iter().position(|t| t.is_punct(';'))
    }

    /// Source text of the declaration starting at `pos`, for diagnostics.
    fn offending_text(&self) -> String {
        let rest = self.rest();
        let Some(first) = rest.first() else {
            return String::new();
        };
        if first.kind == Kind::Directive {
            return first.text.to_string();
        }
        let end = match self.statement_end() {
            Some(e) => rest[e].end(),
            None => self.src[first.start..]
                .find('\n')
                .map_or(self.src.len(), |n| first.start + n),
        };
        self.src[first.start..end].trim().to_string()
    }

    // -----------------------------------------------------------------------
    // typedef <field-list> ;
    // -----------------------------------------------------------------------

    fn typedef(&mut self, tables: &mut Tables) -> Result<bool> {
        let rest = self.rest();
        if !rest.first().is_some_and(|t| t.is_word("typedef")) {
            return Ok(false);
        }
        let Some(end) = self.statement_end() else {
            return Ok(false);
        };
        let body = &rest[1..end];
        let nested = body
            .iter()
            .any(|t| matches!(t.kind, Kind::Punct('(' | ')' | '{' | '}')));
        if nested {
            return Ok(false);
        }

        for field in parse_field_list(self.src, body, ListKind::MEMBERS, tables)? {
            debug!(name = %field.name, "registered typedef");
            tables.types.insert(&field.name, field.ty);
        }
        self.pos += end + 1;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // [typedef] struct [tag] { body } [alias, *alias, ...] ;
    // -----------------------------------------------------------------------

    fn structure(&mut self, tables: &mut Tables) -> Result<bool> {
        let rest = self.rest();
        let mut i = match rest {
            [t, s, ..] if t.is_word("typedef") && s.is_word("struct") => 2,
            [s, ..] if s.is_word("struct") => 1,
            _ => return Ok(false),
        };
        let tag = match rest.get(i) {
            Some(t) if t.is_ident() => {
                i += 1;
                Some(t.text)
            }
            _ => None,
        };
        if !rest.get(i).is_some_and(|t| t.is_punct('{')) {
            return Ok(false);
        }
        let open = i;
        let Some(close) = matching_brace(rest, open) else {
            return Ok(false);
        };
        let Some(semi) = rest[close..].iter().position(|t| t.is_punct(';')) else {
            return Ok(false);
        };
        let semi = close + semi;

        // Trailing alias list, each with an optional run of stars.
        let mut candidates: Vec<(&str, usize)> = Vec::new();
        for alias in split_top_level(&rest[close + 1..semi], ',') {
            let stars = alias.iter().filter(|t| t.is_punct('*')).count();
            let names: Vec<&Token<'_>> = alias
                .iter()
                .filter(|t| !t.is_punct('*') && !(t.is_ident() && is_qualifier(t.text)))
                .collect();
            match names.as_slice() {
                [name] if name.is_ident() => candidates.push((name.text, stars)),
                _ => return Ok(false),
            }
        }
        if let Some(tag) = tag {
            candidates.push((tag, 0));
        }

        let fields = parse_field_list(self.src, &rest[open + 1..close], ListKind::MEMBERS, tables)?;

        // Zero-star names first; the first one names the canonical body.
        let (plain, starred): (Vec<_>, Vec<_>) = candidates.into_iter().partition(|&(_, s)| s == 0);
        let name = match (plain.first(), starred.first()) {
            (Some((n, _)), _) => n.to_string(),
            (None, Some((n, _))) => format!("__struct_{n}"),
            (None, None) => "__struct_anonymous".to_string(),
        };
        let body = Arc::new(StructLayout {
            name,
            fields,
            pack: self.pack,
        });
        debug!(
            name = %body.name,
            fields = body.fields.len(),
            aliases = plain.len() + starred.len(),
            pack = ?body.pack,
            "extracted struct"
        );

        for (alias, stars) in plain.into_iter().chain(starred) {
            let layout = (0..stars).fold(Layout::Struct(body.clone()), |l, _| l.pointer());
            trace!(alias = %alias, stars, "  struct alias");
            tables.types.insert(alias, layout);
        }
        self.pos += semi + 1;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // #define NAME VALUE   /   #pragma pack(...)
    // -----------------------------------------------------------------------

    fn directive(&mut self, tables: &mut Tables) -> Result<bool> {
        let Some(token) = self.rest().first().filter(|t| t.kind == Kind::Directive) else {
            return Ok(false);
        };
        let line = token.text[1..].trim_start();
        let (word, args) = split_word(line);
        let handled = match word {
            "define" => define(args, tables),
            "pragma" => self.pragma(args, token.text)?,
            _ => false,
        };
        if handled {
            self.pos += 1;
        }
        Ok(handled)
    }

    fn pragma(&mut self, args: &str, line: &str) -> Result<bool> {
        let (word, rest) = split_word(args);
        if word != "pack" {
            debug!(pragma = %args, "ignoring pragma");
            return Ok(true);
        }
        let inner = rest
            .trim()
            .strip_prefix('(')
            .and_then(|r| r.strip_suffix(')'))
            .ok_or_else(|| Error::grammar(line))?;
        let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
        let width = |s: &str| {
            parse_integer(s)
                .and_then(|v| v.as_u64())
                .filter(|w| *w > 0)
                .map(|w| w as usize)
                .ok_or_else(|| Error::grammar(line))
        };
        match parts.as_slice() {
            [""] => self.pack = None,
            ["push"] => self.pack_stack.push(self.pack),
            ["push", n] => {
                self.pack_stack.push(self.pack);
                self.pack = Some(width(*n)?);
            }
            ["pop", ..] => self.pack = self.pack_stack.pop().flatten(),
            [n] => self.pack = Some(width(*n)?),
            _ => return Err(Error::grammar(line)),
        }
        debug!(pack = ?self.pack, "struct packing changed");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // typedef <ret> ( [conv] *name ) ( args ) ;
    // <ret> [conv] name ( args ) ;
    // -----------------------------------------------------------------------

    fn function(&mut self, tables: &mut Tables) -> Result<bool> {
        let Some(end) = self.statement_end() else {
            return Ok(false);
        };
        let decl = &self.rest()[..end];
        let is_typedef = decl.first().is_some_and(|t| t.is_word("typedef"));
        let head_start = usize::from(is_typedef);
        let Some(open) = decl.iter().position(|t| t.is_punct('(')) else {
            return Ok(false);
        };

        let mut conv = None;
        let mut keep = |t: &&Token<'_>| match CallConv::from_keyword(t.text) {
            Some(c) if t.is_ident() => {
                conv = Some(c);
                false
            }
            _ => true,
        };

        let (ret, name, args_open) = if is_typedef {
            // ( [conv] [*] name )
            let Some(close) = matching_paren(decl, open) else {
                return Ok(false);
            };
            let inner: Vec<&Token<'_>> = decl[open + 1..close].iter().filter(&mut keep).collect();
            let name = match inner.as_slice() {
                [n] | [_, n] if n.is_ident() && inner.iter().rev().skip(1).all(|t| t.is_punct('*')) => {
                    n.text
                }
                _ => return Ok(false),
            };
            let ret: Vec<&Token<'_>> = decl[head_start..open].iter().filter(&mut keep).collect();
            (ret, name, close + 1)
        } else {
            let mut head: Vec<&Token<'_>> = decl[..open].iter().filter(&mut keep).collect();
            let name = match head.pop() {
                Some(t) if t.is_ident() && !is_qualifier(t.text) => t.text,
                _ => return Ok(false),
            };
            (head, name, open)
        };

        if !decl.get(args_open).is_some_and(|t| t.is_punct('(')) {
            return Ok(false);
        }
        let Some(args_close) = matching_paren(decl, args_open) else {
            return Ok(false);
        };
        if args_close + 1 != decl.len() {
            return Ok(false);
        }
        let args = &decl[args_open + 1..args_close];
        if args.iter().any(|t| t.kind == Kind::Ellipsis) {
            return Ok(false);
        }

        let Some((qualifiers, base, stars)) = split_return_type(&ret) else {
            return Ok(false);
        };
        let return_type = derive(tables, &qualifiers, &base, stars, None)
            .map_err(|e| e.in_field(name, span_text(self.src, decl)))?;

        let params = match args {
            [] => Vec::new(),
            [v] if v.is_word("void") => Vec::new(),
            _ => parse_field_list(self.src, args, ListKind::PARAMS, tables)?
                .into_iter()
                .map(|f| Param {
                    name: f.name,
                    ty: f.ty,
                })
                .collect(),
        };

        let sig = FunctionSig {
            name: Some(name.to_string()),
            calling_convention: conv.unwrap_or_default(),
            return_type,
            params,
        };
        if is_typedef {
            debug!(name, params = sig.params.len(), "extracted function type");
            tables.types.insert(name, Layout::Function(Arc::new(sig)));
        } else {
            debug!(name, params = sig.params.len(), "extracted function");
            tables.prototypes.insert(name, sig);
        }
        self.pos += end + 1;
        Ok(true)
    }
}

/// Handle `NAME VALUE`. Returns `false` for function-like macros.
fn define(args: &str, tables: &mut Tables) -> bool {
    let (name, raw) = split_word(args);
    if name.is_empty() || raw.starts_with('(') {
        return false;
    }
    let raw = raw.trim();
    let value = constant_value(raw, tables);
    debug!(name, value = %value, "extracted #define constant");
    tables.constants.insert(name, value);
    true
}

/// Resolve a `#define` value: integer, float, then an already-defined macro
/// (resolved now, once), else kept as an opaque string.
fn constant_value(raw: &str, tables: &Tables) -> ConstantValue {
    let v = raw
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .map_or(raw, str::trim);
    if let Some(value) = parse_integer(v) {
        return value;
    }
    if let Some(value) = parse_float(v) {
        return ConstantValue::Float(value);
    }
    if let Some(existing) = tables.constants.get(v) {
        return existing.clone();
    }
    debug!(value = %raw, "keeping unresolved #define value as opaque text");
    ConstantValue::Opaque(raw.to_string())
}

/// Parse a C integer literal: decimal, `0x` hex or leading-zero octal, with
/// an optional sign and `u`/`l` suffixes.
pub fn parse_integer(s: &str) -> Option<ConstantValue> {
    let (negated, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let s = s.trim_end_matches(['u', 'U', 'l', 'L']);
    if s.is_empty() {
        return None;
    }

    let val = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()?
    } else if let Some(octal) = s.strip_prefix('0') {
        if octal.is_empty() {
            0
        } else {
            u64::from_str_radix(octal, 8).ok()?
        }
    } else if s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse::<u64>().ok()?
    } else {
        return None;
    };

    if negated {
        if val == 1 << 63 {
            return Some(ConstantValue::Signed(i64::MIN));
        }
        let v = i64::try_from(val).ok()?;
        Some(ConstantValue::Signed(-v))
    } else if let Ok(v) = i64::try_from(val) {
        Some(ConstantValue::Signed(v))
    } else {
        Some(ConstantValue::Unsigned(val))
    }
}

fn parse_float(s: &str) -> Option<f64> {
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    if !digits.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        return None;
    }
    s.trim_end_matches(['f', 'F']).parse().ok()
}

/// Split off the leading identifier-like word.
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    let end = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(s.len());
    (&s[..end], &s[end..])
}

/// `qualifier* word+ *` → (qualifiers, base words, star count).
fn split_return_type<'a>(ret: &[&Token<'a>]) -> Option<(Vec<&'a str>, Vec<&'a str>, usize)> {
    let mut qualifiers = Vec::new();
    let mut base = Vec::new();
    let mut stars = 0;
    for t in ret {
        if t.is_punct('*') {
            stars += 1;
        } else if t.is_ident() && stars == 0 {
            if is_qualifier(t.text) {
                qualifiers.push(t.text);
            } else {
                base.push(t.text);
            }
        } else if !(t.is_ident() && is_qualifier(t.text)) {
            return None;
        }
    }
    (!base.is_empty()).then_some((qualifiers, base, stars))
}

fn matching_brace(tokens: &[Token<'_>], open: usize) -> Option<usize> {
    matching(tokens, open, '{', '}')
}

fn matching_paren(tokens: &[Token<'_>], open: usize) -> Option<usize> {
    matching(tokens, open, '(', ')')
}

fn matching(tokens: &[Token<'_>], open: usize, l: char, r: char) -> Option<usize> {
    let mut depth = 0usize;
    for (i, t) in tokens.iter().enumerate().skip(open) {
        if t.is_punct(l) {
            depth += 1;
        } else if t.is_punct(r) {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}
