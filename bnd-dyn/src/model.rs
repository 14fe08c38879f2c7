//! Intermediate model types: the bridge between header parsing and binding.
//!
//! Everything here is independent of both the parser and the native call
//! layer, so the parser family and the binding loader can be tested in
//! isolation.

use std::collections::{HashMap, HashSet};
use std::ffi::{c_int, c_long, c_short};
use std::fmt;
use std::mem::size_of;
use std::sync::Arc;

use tracing::warn;

/// A fixed-width native primitive.
///
/// `CStr`/`WStr` are the native-string primitives a `char*`/`wchar*` decays
/// into, `VoidPtr` is what `void*` decays into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Void,
    Bool,
    Char,
    WChar,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    ISize,
    USize,
    F32,
    F64,
    CStr,
    WStr,
    VoidPtr,
}

impl Primitive {
    /// Size in bytes. `Void` has no storage.
    pub fn size(self) -> usize {
        match self {
            Primitive::Void => 0,
            Primitive::Bool | Primitive::Char | Primitive::I8 | Primitive::U8 => 1,
            Primitive::I16 | Primitive::U16 => 2,
            Primitive::WChar => size_of::<WChar>(),
            Primitive::I32 | Primitive::U32 | Primitive::F32 => 4,
            Primitive::I64 | Primitive::U64 | Primitive::F64 => 8,
            Primitive::ISize
            | Primitive::USize
            | Primitive::CStr
            | Primitive::WStr
            | Primitive::VoidPtr => size_of::<usize>(),
        }
    }

    pub fn align(self) -> usize {
        match self {
            Primitive::Void => 1,
            Primitive::I64 | Primitive::U64 => std::mem::align_of::<u64>(),
            Primitive::F64 => std::mem::align_of::<f64>(),
            other => other.size(),
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Primitive::Bool
                | Primitive::Char
                | Primitive::WChar
                | Primitive::I8
                | Primitive::U8
                | Primitive::I16
                | Primitive::U16
                | Primitive::I32
                | Primitive::U32
                | Primitive::I64
                | Primitive::U64
                | Primitive::ISize
                | Primitive::USize
        )
    }

    /// Canonical C spelling used when describing layouts.
    pub fn c_name(self) -> &'static str {
        match self {
            Primitive::Void => "void",
            Primitive::Bool => "bool",
            Primitive::Char => "char",
            Primitive::WChar => "wchar",
            Primitive::I8 => "int8",
            Primitive::U8 => "uint8",
            Primitive::I16 => "int16",
            Primitive::U16 => "uint16",
            Primitive::I32 => "int32",
            Primitive::U32 => "uint32",
            Primitive::I64 => "int64",
            Primitive::U64 => "uint64",
            Primitive::ISize => "intptr_t",
            Primitive::USize => "uintptr_t",
            Primitive::F32 => "float",
            Primitive::F64 => "double",
            Primitive::CStr => "char*",
            Primitive::WStr => "wchar*",
            Primitive::VoidPtr => "void*",
        }
    }
}

/// Native wide character: UTF-16 code unit on Windows, UTF-32 elsewhere.
#[cfg(windows)]
pub type WChar = u16;
#[cfg(not(windows))]
pub type WChar = u32;

/// The resolved, ABI-concrete shape of a type.
#[derive(Debug, Clone, PartialEq)]
pub enum Layout {
    Primitive(Primitive),
    /// `depth` plain pointer layers over `to`. Never nested directly inside
    /// another `Pointer`.
    Pointer { to: Box<Layout>, depth: usize },
    Array { of: Box<Layout>, len: usize },
    Struct(Arc<StructLayout>),
    /// A function pointer type.
    Function(Arc<FunctionSig>),
}

impl Layout {
    pub const VOID: Layout = Layout::Primitive(Primitive::Void);

    /// Wrap in one more plain pointer layer.
    pub fn pointer(self) -> Layout {
        match self {
            Layout::Pointer { to, depth } => Layout::Pointer {
                to,
                depth: depth + 1,
            },
            other => Layout::Pointer {
                to: Box::new(other),
                depth: 1,
            },
        }
    }

    pub fn array(self, len: usize) -> Layout {
        Layout::Array {
            of: Box::new(self),
            len,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Layout::Primitive(Primitive::Void))
    }

    pub fn as_struct(&self) -> Option<&Arc<StructLayout>> {
        match self {
            Layout::Struct(s) => Some(s),
            _ => None,
        }
    }
}

/// A struct body. Aliases of one body all share the same `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct StructLayout {
    pub name: String,
    pub fields: Vec<Field>,
    /// `#pragma pack` width in effect when the body was declared.
    pub pack: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: Layout,
}

/// Calling convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallConv {
    /// Platform default.
    #[default]
    Cdecl,
    /// stdcall (Windows x86).
    Stdcall,
    Fastcall,
}

impl CallConv {
    /// Recognise a calling-convention keyword by literal match.
    pub fn from_keyword(word: &str) -> Option<CallConv> {
        match word {
            "__cdecl" => Some(CallConv::Cdecl),
            "__stdcall" => Some(CallConv::Stdcall),
            "__fastcall" => Some(CallConv::Fastcall),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            CallConv::Cdecl => "__cdecl",
            CallConv::Stdcall => "__stdcall",
            CallConv::Fastcall => "__fastcall",
        }
    }
}

/// A function type (function-pointer typedef) or prototype.
///
/// Equality is structural: the display name does not take part.
#[derive(Debug, Clone)]
pub struct FunctionSig {
    /// Display name; structurally irrelevant.
    pub name: Option<String>,
    pub calling_convention: CallConv,
    pub return_type: Layout,
    pub params: Vec<Param>,
}

impl PartialEq for FunctionSig {
    fn eq(&self, other: &Self) -> bool {
        self.calling_convention == other.calling_convention
            && self.return_type == other.return_type
            && self.params.len() == other.params.len()
            && self.params.iter().zip(&other.params).all(|(a, b)| a.ty == b.ty)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Layout,
}

/// Value of a `#define` constant.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
    /// Anything that is neither numeric nor a known macro, kept verbatim.
    Opaque(String),
}

impl ConstantValue {
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            ConstantValue::Signed(v) => Some(v),
            ConstantValue::Unsigned(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            ConstantValue::Signed(v) => u64::try_from(v).ok(),
            ConstantValue::Unsigned(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            ConstantValue::Signed(v) => Some(v as f64),
            ConstantValue::Unsigned(v) => Some(v as f64),
            ConstantValue::Float(v) => Some(v),
            ConstantValue::Opaque(_) => None,
        }
    }
}

impl PartialEq<i64> for ConstantValue {
    fn eq(&self, other: &i64) -> bool {
        self.as_i64() == Some(*other)
    }
}

impl fmt::Display for ConstantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstantValue::Signed(v) => write!(f, "{v}"),
            ConstantValue::Unsigned(v) => write!(f, "{v:#x}"),
            ConstantValue::Float(v) => write!(f, "{v}"),
            ConstantValue::Opaque(s) => f.write_str(s),
        }
    }
}

/// Primitive names every registry starts with.
pub fn seed_primitives() -> Vec<(&'static str, Primitive)> {
    let int = int_of(size_of::<c_int>());
    let uint = uint_of(size_of::<c_int>());
    let short = int_of(size_of::<c_short>());
    let ushort = uint_of(size_of::<c_short>());
    let long = int_of(size_of::<c_long>());
    let ulong = uint_of(size_of::<c_long>());
    vec![
        ("void", Primitive::Void),
        ("bool", Primitive::Bool),
        ("_Bool", Primitive::Bool),
        ("char", Primitive::Char),
        ("unsigned char", Primitive::U8),
        ("wchar", Primitive::WChar),
        ("wchar_t", Primitive::WChar),
        ("byte", Primitive::I8),
        ("ubyte", Primitive::U8),
        ("short", short),
        ("short int", short),
        ("unsigned short", ushort),
        ("unsigned short int", ushort),
        ("int", int),
        ("unsigned int", uint),
        ("long", long),
        ("long int", long),
        ("unsigned long", ulong),
        ("unsigned long int", ulong),
        ("long long", Primitive::I64),
        ("unsigned long long", Primitive::U64),
        ("__int64", Primitive::I64),
        ("unsigned __int64", Primitive::U64),
        ("int8", Primitive::I8),
        ("uint8", Primitive::U8),
        ("int16", Primitive::I16),
        ("uint16", Primitive::U16),
        ("int32", Primitive::I32),
        ("uint32", Primitive::U32),
        ("int64", Primitive::I64),
        ("uint64", Primitive::U64),
        ("int8_t", Primitive::I8),
        ("uint8_t", Primitive::U8),
        ("int16_t", Primitive::I16),
        ("uint16_t", Primitive::U16),
        ("int32_t", Primitive::I32),
        ("uint32_t", Primitive::U32),
        ("int64_t", Primitive::I64),
        ("uint64_t", Primitive::U64),
        ("size_t", Primitive::USize),
        ("ssize_t", Primitive::ISize),
        ("intptr_t", Primitive::ISize),
        ("uintptr_t", Primitive::USize),
        ("float", Primitive::F32),
        ("double", Primitive::F64),
    ]
}

fn int_of(size: usize) -> Primitive {
    match size {
        2 => Primitive::I16,
        8 => Primitive::I64,
        _ => Primitive::I32,
    }
}

fn uint_of(size: usize) -> Primitive {
    match size {
        2 => Primitive::U16,
        8 => Primitive::U64,
        _ => Primitive::U32,
    }
}

/// Type name → fully derived layout.
///
/// Seeded primitives are reserved: later declarations cannot replace them.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: HashMap<String, Layout>,
    reserved: HashSet<&'static str>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        let seed = seed_primitives();
        let reserved = seed.iter().map(|(name, _)| *name).collect();
        let types = seed
            .into_iter()
            .map(|(name, p)| (name.to_string(), Layout::Primitive(p)))
            .collect();
        Self { types, reserved }
    }

    /// Register `name`. Returns `false` (and keeps the old entry) when `name`
    /// is a seeded primitive.
    pub fn insert(&mut self, name: &str, layout: Layout) -> bool {
        if self.is_reserved(name) {
            warn!(name, "ignoring redefinition of a builtin primitive");
            return false;
        }
        self.types.insert(name.to_string(), layout);
        true
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved.contains(name)
    }

    pub fn get(&self, name: &str) -> Option<&Layout> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Layout)> {
        self.types.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries declared on top of the seeded primitives.
    pub fn declared_len(&self) -> usize {
        self.types.len() - self.reserved.len()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Macro name → resolved value.
#[derive(Debug, Clone, Default)]
pub struct ConstantTable {
    values: HashMap<String, ConstantValue>,
}

impl ConstantTable {
    pub fn insert(&mut self, name: &str, value: ConstantValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ConstantValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConstantValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Function name → prototype. Only bare prototypes land here.
#[derive(Debug, Clone, Default)]
pub struct PrototypeTable {
    functions: HashMap<String, FunctionSig>,
}

impl PrototypeTable {
    pub fn insert(&mut self, name: &str, sig: FunctionSig) {
        self.functions.insert(name.to_string(), sig);
    }

    pub fn get(&self, name: &str) -> Option<&FunctionSig> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FunctionSig)> {
        self.functions.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// The three tables a parsing session threads through every parser.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub types: TypeRegistry,
    pub constants: ConstantTable,
    pub prototypes: PrototypeTable,
}

impl Tables {
    pub fn new() -> Self {
        Self::default()
    }
}
