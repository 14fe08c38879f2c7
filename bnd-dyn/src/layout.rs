//! Native ABI layout: sizes, alignments, field offsets, zero-filled
//! instances and declaration strings.

use std::ffi::c_void;
use std::mem::size_of;

use crate::error::{Error, Result};
use crate::model::*;

impl Layout {
    pub fn size(&self) -> usize {
        match self {
            Layout::Primitive(p) => p.size(),
            Layout::Pointer { .. } | Layout::Function(_) => size_of::<usize>(),
            Layout::Array { of, len } => of.size() * len,
            Layout::Struct(s) => s.size(),
        }
    }

    pub fn align(&self) -> usize {
        match self {
            Layout::Primitive(p) => p.align(),
            Layout::Pointer { .. } | Layout::Function(_) => std::mem::align_of::<usize>(),
            Layout::Array { of, .. } => of.align(),
            Layout::Struct(s) => s.align(),
        }
    }

    /// A zero-filled buffer of this layout.
    pub fn instantiate(&self) -> Buffer {
        Buffer::new(self.clone())
    }

    /// C spelling of the type, e.g. `uint32*` or `FILETIME`.
    pub fn type_name(&self) -> String {
        match self {
            Layout::Primitive(p) => p.c_name().to_string(),
            Layout::Pointer { to, depth } => format!("{}{}", to.type_name(), "*".repeat(*depth)),
            Layout::Array { of, len } => format!("{}[{len}]", of.type_name()),
            Layout::Struct(s) => s.name.clone(),
            Layout::Function(f) => f
                .name
                .clone()
                .unwrap_or_else(|| f.pointer_declaration("")),
        }
    }

    /// Declare `name` with this layout, e.g. `wchar cFileName[260]`.
    pub fn declaration(&self, name: &str) -> String {
        match self {
            Layout::Array { of, len } => format!("{} {name}[{len}]", of.type_name()),
            Layout::Function(f) => f.pointer_declaration(name),
            other => format!("{} {name}", other.type_name()),
        }
    }
}

impl StructLayout {
    /// Byte offset of every field, in declaration order.
    pub fn offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.fields.len());
        let mut offset = 0;
        for field in &self.fields {
            offset = round_up(offset, self.field_align(&field.ty));
            offsets.push(offset);
            offset += field.ty.size();
        }
        offsets
    }

    pub fn size(&self) -> usize {
        let end = match (self.fields.last(), self.offsets().last()) {
            (Some(f), Some(off)) => off + f.ty.size(),
            _ => 0,
        };
        round_up(end, self.align())
    }

    pub fn align(&self) -> usize {
        self.fields
            .iter()
            .map(|f| self.field_align(&f.ty))
            .max()
            .unwrap_or(1)
    }

    /// True when packing moves any field off its natural alignment.
    pub fn is_repacked(&self) -> bool {
        self.fields.iter().any(|f| self.field_align(&f.ty) < f.ty.align())
    }

    fn field_align(&self, ty: &Layout) -> usize {
        match self.pack {
            Some(pack) => ty.align().min(pack),
            None => ty.align(),
        }
    }

    /// Field and its offset by name.
    pub fn field(&self, name: &str) -> Option<(usize, &Field)> {
        let idx = self.fields.iter().position(|f| f.name == name)?;
        Some((self.offsets()[idx], &self.fields[idx]))
    }

    /// `struct NAME { ... };`
    pub fn definition(&self) -> String {
        let mut out = format!("struct {} {{\n", self.name);
        for field in &self.fields {
            out.push_str(&format!("    {};\n", field.ty.declaration(&field.name)));
        }
        out.push_str("};");
        out
    }
}

impl FunctionSig {
    fn params_list(&self) -> String {
        if self.params.is_empty() {
            return "void".to_string();
        }
        self.params
            .iter()
            .map(|p| p.ty.declaration(&p.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `RET CONV name(params)`: the prototype form.
    pub fn prototype(&self, name: &str) -> String {
        format!(
            "{} {} {name}({})",
            self.return_type.type_name(),
            self.calling_convention.keyword(),
            self.params_list()
        )
    }

    /// `RET (CONV *name)(params)`: the function-pointer form.
    pub fn pointer_declaration(&self, name: &str) -> String {
        format!(
            "{} ({} *{name})({})",
            self.return_type.type_name(),
            self.calling_convention.keyword(),
            self.params_list()
        )
    }
}

fn round_up(n: usize, align: usize) -> usize {
    n.div_ceil(align.max(1)) * align.max(1)
}

/// A decoded native value.
#[derive(Debug, Clone)]
pub enum Value {
    Void,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Ptr(*mut c_void),
    Struct(Buffer),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Bool(b) => Some(i64::from(b)),
            Value::Int(v) => Some(v),
            Value::UInt(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::Bool(b) => Some(u64::from(b)),
            Value::Int(v) => u64::try_from(v).ok(),
            Value::UInt(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(v),
            Value::Int(v) => Some(v as f64),
            Value::UInt(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn as_ptr(&self) -> Option<*mut c_void> {
        match *self {
            Value::Ptr(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            Value::Int(v) => Some(v != 0),
            Value::UInt(v) => Some(v != 0),
            _ => None,
        }
    }
}

/// Decode `layout` from the start of `bytes`.
pub(crate) fn read_value(layout: &Layout, bytes: &[u8]) -> Result<Value, String> {
    let need = layout.size();
    if bytes.len() < need {
        return Err(format!("{need} bytes needed, {} available", bytes.len()));
    }
    macro_rules! ne {
        ($t:ty) => {
            <$t>::from_ne_bytes(bytes[..size_of::<$t>()].try_into().map_err(|_| "short read")?)
        };
    }
    let value = match layout {
        Layout::Primitive(p) => match p {
            Primitive::Void => Value::Void,
            Primitive::Bool => Value::Bool(bytes[0] != 0),
            Primitive::Char | Primitive::I8 => Value::Int(i64::from(ne!(i8))),
            Primitive::U8 => Value::UInt(u64::from(ne!(u8))),
            Primitive::I16 => Value::Int(i64::from(ne!(i16))),
            Primitive::U16 => Value::UInt(u64::from(ne!(u16))),
            Primitive::WChar => Value::UInt(u64::from(ne!(WChar))),
            Primitive::I32 => Value::Int(i64::from(ne!(i32))),
            Primitive::U32 => Value::UInt(u64::from(ne!(u32))),
            Primitive::I64 => Value::Int(ne!(i64)),
            Primitive::U64 => Value::UInt(ne!(u64)),
            Primitive::ISize => Value::Int(ne!(isize) as i64),
            Primitive::USize => Value::UInt(ne!(usize) as u64),
            Primitive::F32 => Value::Float(f64::from(ne!(f32))),
            Primitive::F64 => Value::Float(ne!(f64)),
            Primitive::CStr | Primitive::WStr | Primitive::VoidPtr => {
                Value::Ptr(ne!(usize) as *mut c_void)
            }
        },
        Layout::Pointer { .. } | Layout::Function(_) => Value::Ptr(ne!(usize) as *mut c_void),
        Layout::Struct(_) => {
            let mut buffer = layout.instantiate();
            buffer.bytes_mut().copy_from_slice(&bytes[..need]);
            Value::Struct(buffer)
        }
        Layout::Array { .. } => return Err("arrays are read element by element".into()),
    };
    Ok(value)
}

/// Encode `value` as `layout` into the start of `out`. Integers are
/// truncated to the target width.
pub(crate) fn write_value(layout: &Layout, value: &Value, out: &mut [u8]) -> Result<(), String> {
    let need = layout.size();
    if out.len() < need {
        return Err(format!("{need} bytes needed, {} available", out.len()));
    }
    let out = &mut out[..need];
    match layout {
        Layout::Primitive(p) if p.is_integer() => {
            let raw = match value {
                Value::Bool(b) => u64::from(*b),
                Value::Int(v) => *v as u64,
                Value::UInt(v) => *v,
                other => return Err(format!("expected an integer, got {other:?}")),
            };
            out.copy_from_slice(&raw.to_ne_bytes()[int_window(need)]);
        }
        Layout::Primitive(Primitive::F32) => {
            let v = value.as_f64().ok_or_else(|| format!("expected a float, got {value:?}"))?;
            out.copy_from_slice(&(v as f32).to_ne_bytes());
        }
        Layout::Primitive(Primitive::F64) => {
            let v = value.as_f64().ok_or_else(|| format!("expected a float, got {value:?}"))?;
            out.copy_from_slice(&v.to_ne_bytes());
        }
        Layout::Primitive(Primitive::Void) => return Err("void has no storage".into()),
        Layout::Primitive(_) | Layout::Pointer { .. } | Layout::Function(_) => {
            let addr = match value {
                Value::Ptr(p) => *p as usize,
                Value::Int(0) | Value::UInt(0) => 0,
                other => return Err(format!("expected a pointer, got {other:?}")),
            };
            out.copy_from_slice(&addr.to_ne_bytes());
        }
        Layout::Struct(_) => match value {
            Value::Struct(b) if b.len() == need => out.copy_from_slice(b.bytes()),
            other => return Err(format!("expected a `{}` buffer, got {other:?}", layout.type_name())),
        },
        Layout::Array { .. } => return Err("arrays are written element by element".into()),
    }
    Ok(())
}

/// Low-order bytes of a `u64` in native byte order.
pub(crate) fn int_window(width: usize) -> std::ops::Range<usize> {
    if cfg!(target_endian = "little") {
        0..width
    } else {
        8 - width..8
    }
}

/// NUL-terminated wide string in the native wide-char encoding.
pub fn wide(s: &str) -> Vec<WChar> {
    #[cfg(windows)]
    let mut units: Vec<WChar> = s.encode_utf16().collect();
    #[cfg(not(windows))]
    let mut units: Vec<WChar> = s.chars().map(u32::from).collect();
    units.push(0);
    units
}

/// Zero-filled, suitably aligned storage for one instance of a layout.
#[derive(Debug, Clone)]
pub struct Buffer {
    layout: Layout,
    storage: Vec<u64>,
    len: usize,
}

impl Buffer {
    pub fn new(layout: Layout) -> Self {
        let len = layout.size();
        Self {
            storage: vec![0; len.div_ceil(8).max(1)],
            layout,
            len,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bytes(&self) -> &[u8] {
        // SAFETY: `storage` holds at least `len` initialised bytes.
        unsafe { std::slice::from_raw_parts(self.storage.as_ptr().cast(), self.len) }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` gives exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.storage.as_mut_ptr().cast(), self.len) }
    }

    pub fn as_ptr(&self) -> *const c_void {
        self.storage.as_ptr().cast()
    }

    pub fn as_mut_ptr(&mut self) -> *mut c_void {
        self.storage.as_mut_ptr().cast()
    }

    /// Whole-buffer value for primitive and pointer layouts.
    pub fn value(&self) -> Result<Value> {
        read_value(&self.layout, self.bytes()).map_err(|reason| Error::FieldType {
            field: self.layout.type_name(),
            reason,
        })
    }

    fn field_slot(&self, field: &str) -> Result<(usize, Layout)> {
        let no_field = || Error::NoField {
            layout: self.layout.type_name(),
            field: field.to_string(),
        };
        let s = self.layout.as_struct().ok_or_else(no_field)?;
        let (offset, f) = s.field(field).ok_or_else(no_field)?;
        Ok((offset, f.ty.clone()))
    }

    /// Read a struct field.
    pub fn get(&self, field: &str) -> Result<Value> {
        let (offset, ty) = self.field_slot(field)?;
        read_value(&ty, &self.bytes()[offset..]).map_err(|reason| Error::FieldType {
            field: field.to_string(),
            reason,
        })
    }

    /// Write a struct field.
    pub fn set(&mut self, field: &str, value: Value) -> Result<()> {
        let (offset, ty) = self.field_slot(field)?;
        write_value(&ty, &value, &mut self.bytes_mut()[offset..]).map_err(|reason| {
            Error::FieldType {
                field: field.to_string(),
                reason,
            }
        })
    }

    /// Read element `index` of an array field.
    pub fn element(&self, field: &str, index: usize) -> Result<Value> {
        let (offset, ty) = self.field_slot(field)?;
        let (of, len) = array_parts(field, &ty)?;
        if index >= len {
            return Err(Error::FieldType {
                field: field.to_string(),
                reason: format!("index {index} out of bounds for length {len}"),
            });
        }
        let at = offset + index * of.size();
        read_value(of, &self.bytes()[at..]).map_err(|reason| Error::FieldType {
            field: field.to_string(),
            reason,
        })
    }

    /// Read a NUL-terminated `char[N]` or `wchar[N]` field.
    pub fn read_string(&self, field: &str) -> Result<String> {
        let (offset, ty) = self.field_slot(field)?;
        let (of, len) = array_parts(field, &ty)?;
        let bytes = &self.bytes()[offset..offset + ty.size()];
        match of {
            Layout::Primitive(Primitive::Char | Primitive::I8 | Primitive::U8) => {
                let end = bytes.iter().position(|b| *b == 0).unwrap_or(len);
                Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
            Layout::Primitive(Primitive::WChar) => {
                let units: Vec<WChar> = bytes
                    .chunks_exact(size_of::<WChar>())
                    .map(|c| WChar::from_ne_bytes(c.try_into().unwrap_or_default()))
                    .take_while(|u| *u != 0)
                    .collect();
                Ok(decode_wide(&units))
            }
            other => Err(Error::FieldType {
                field: field.to_string(),
                reason: format!("`{}` is not a character array", other.type_name()),
            }),
        }
    }

    /// Write `s` into a `char[N]` or `wchar[N]` field, truncating to leave
    /// room for the terminator.
    pub fn write_string(&mut self, field: &str, s: &str) -> Result<()> {
        let (offset, ty) = self.field_slot(field)?;
        let (of, len) = array_parts(field, &ty)?;
        let size = ty.size();
        let encoded: Vec<u8> = match of {
            Layout::Primitive(Primitive::Char | Primitive::I8 | Primitive::U8) => {
                s.bytes().take(len.saturating_sub(1)).collect()
            }
            Layout::Primitive(Primitive::WChar) => wide(s)
                .into_iter()
                .filter(|u| *u != 0)
                .take(len.saturating_sub(1))
                .flat_map(|u| u.to_ne_bytes())
                .collect(),
            other => {
                return Err(Error::FieldType {
                    field: field.to_string(),
                    reason: format!("`{}` is not a character array", other.type_name()),
                });
            }
        };
        let slot = &mut self.bytes_mut()[offset..offset + size];
        slot.fill(0);
        slot[..encoded.len()].copy_from_slice(&encoded);
        Ok(())
    }
}

fn array_parts<'a>(field: &str, ty: &'a Layout) -> Result<(&'a Layout, usize)> {
    match ty {
        Layout::Array { of, len } => Ok((of, *len)),
        other => Err(Error::FieldType {
            field: field.to_string(),
            reason: format!("`{}` is not an array", other.type_name()),
        }),
    }
}

#[cfg(windows)]
fn decode_wide(units: &[WChar]) -> String {
    String::from_utf16_lossy(units)
}

#[cfg(not(windows))]
fn decode_wide(units: &[WChar]) -> String {
    units
        .iter()
        .map(|u| char::from_u32(*u).unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}
