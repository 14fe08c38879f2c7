//! Native call marshalling through libffi.
//!
//! Each bound function prepares its call interface once, when it is bound.
//! Calls then only encode arguments into per-call slots and decode the
//! return value.

use std::ffi::{CStr, c_void};
use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::Arc;

use libffi::middle::{Cif, CodePtr, Type};
use tracing::trace;

use crate::error::{Error, Result};
use crate::layout::{Buffer, Value, int_window, read_value, write_value};
use crate::library::Library;
use crate::model::{CallConv, FunctionSig, Layout, Primitive, WChar};

/// One argument to [`BoundFunction::call`].
#[derive(Debug)]
pub enum CallArg<'a> {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Ptr(*mut c_void),
    Null,
    Str(&'a CStr),
    /// NUL-terminated wide string, see [`crate::layout::wide`].
    WStr(&'a [WChar]),
    /// Copied for struct parameters, passed by address otherwise.
    Buffer(&'a Buffer),
    /// Address of a buffer the callee may write through.
    BufferMut(OutBuffer<'a>),
}

/// Exclusive borrow of a [`Buffer`] handed to native code.
///
/// One `&mut Buffer` yields exactly one writable argument:
///
/// ```compile_fail
/// use bnd_dyn::{CallArg, Layout, Primitive};
///
/// let mut buffer = Layout::Primitive(Primitive::I32).instantiate();
/// let arg = CallArg::out(&mut buffer);
/// let args = [arg, arg];
/// ```
#[derive(Debug)]
pub struct OutBuffer<'a> {
    ptr: NonNull<c_void>,
    len: usize,
    _buffer: PhantomData<&'a mut Buffer>,
}

impl<'a> CallArg<'a> {
    pub fn out(buffer: &'a mut Buffer) -> Self {
        let len = buffer.len();
        let ptr = NonNull::new(buffer.as_mut_ptr()).unwrap_or(NonNull::dangling());
        CallArg::BufferMut(OutBuffer {
            ptr,
            len,
            _buffer: PhantomData,
        })
    }

    fn to_value(&self) -> Value {
        match *self {
            CallArg::Int(v) => Value::Int(v),
            CallArg::UInt(v) => Value::UInt(v),
            CallArg::Float(v) => Value::Float(v),
            CallArg::Bool(v) => Value::Bool(v),
            CallArg::Ptr(p) => Value::Ptr(p),
            CallArg::Null => Value::Ptr(std::ptr::null_mut()),
            CallArg::Str(s) => Value::Ptr(s.as_ptr() as *mut c_void),
            CallArg::WStr(w) => Value::Ptr(w.as_ptr() as *mut c_void),
            CallArg::Buffer(b) => Value::Ptr(b.as_ptr() as *mut c_void),
            CallArg::BufferMut(ref o) => Value::Ptr(o.ptr.as_ptr()),
        }
    }
}

macro_rules! call_arg_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(impl From<$t> for CallArg<'_> {
            fn from(v: $t) -> Self {
                CallArg::$variant(v.into())
            }
        })*
    };
}

call_arg_from!(
    i8 => Int, i16 => Int, i32 => Int, i64 => Int,
    u8 => UInt, u16 => UInt, u32 => UInt, u64 => UInt,
    f32 => Float, f64 => Float, bool => Bool,
);

impl<'a> From<&'a CStr> for CallArg<'a> {
    fn from(s: &'a CStr) -> Self {
        CallArg::Str(s)
    }
}

impl<'a> From<&'a Buffer> for CallArg<'a> {
    fn from(b: &'a Buffer) -> Self {
        CallArg::Buffer(b)
    }
}

impl<'a> From<&'a mut Buffer> for CallArg<'a> {
    fn from(b: &'a mut Buffer) -> Self {
        CallArg::out(b)
    }
}

/// libffi description of `layout` when passed or returned by value.
pub fn ffi_type(layout: &Layout) -> Result<Type> {
    let ty = match layout {
        Layout::Primitive(p) => match p {
            Primitive::Void => Type::void(),
            Primitive::Bool | Primitive::U8 => Type::u8(),
            Primitive::Char | Primitive::I8 => Type::i8(),
            Primitive::I16 => Type::i16(),
            Primitive::U16 => Type::u16(),
            Primitive::WChar if size_of::<WChar>() == 2 => Type::u16(),
            Primitive::WChar => Type::u32(),
            Primitive::I32 => Type::i32(),
            Primitive::U32 => Type::u32(),
            Primitive::I64 => Type::i64(),
            Primitive::U64 => Type::u64(),
            Primitive::ISize => Type::isize(),
            Primitive::USize => Type::usize(),
            Primitive::F32 => Type::f32(),
            Primitive::F64 => Type::f64(),
            Primitive::CStr | Primitive::WStr | Primitive::VoidPtr => Type::pointer(),
        },
        Layout::Pointer { .. } | Layout::Function(_) => Type::pointer(),
        Layout::Array { of, len } => {
            let elem = ffi_type(of)?;
            Type::structure(std::iter::repeat_n(elem, *len))
        }
        Layout::Struct(s) => {
            if s.is_repacked() {
                return Err(Error::Unsupported {
                    what: format!("packed struct `{}` by value", s.name),
                });
            }
            if s.fields.is_empty() {
                return Err(Error::Unsupported {
                    what: format!("empty struct `{}` by value", s.name),
                });
            }
            let fields = s
                .fields
                .iter()
                .filter(|f| f.ty.size() > 0)
                .map(|f| ffi_type(&f.ty))
                .collect::<Result<Vec<_>>>()?;
            Type::structure(fields)
        }
    };
    Ok(ty)
}

/// Parameters declared as arrays decay to pointers.
fn param_layout(layout: &Layout) -> Layout {
    match layout {
        Layout::Array { of, .. } => (**of).clone().pointer(),
        other => other.clone(),
    }
}

fn set_abi(cif: &mut Cif, conv: CallConv) {
    #[cfg(all(windows, target_arch = "x86"))]
    match conv {
        CallConv::Stdcall => cif.set_abi(libffi::raw::ffi_abi_FFI_STDCALL),
        CallConv::Fastcall => cif.set_abi(libffi::raw::ffi_abi_FFI_FASTCALL),
        CallConv::Cdecl => {}
    }
    #[cfg(not(all(windows, target_arch = "x86")))]
    let _ = (cif, conv);
}

/// A resolved native function with its prepared call interface.
pub struct BoundFunction {
    name: String,
    sig: FunctionSig,
    params: Vec<Layout>,
    cif: Cif,
    code: CodePtr,
    library: Arc<dyn Library>,
}

impl BoundFunction {
    /// Prepare a call interface for `sig` at `address`, exported by `library`.
    pub fn new(
        name: &str,
        sig: FunctionSig,
        address: NonNull<c_void>,
        library: Arc<dyn Library>,
    ) -> Result<Self> {
        let params: Vec<Layout> = sig.params.iter().map(|p| param_layout(&p.ty)).collect();
        for (param, layout) in sig.params.iter().zip(&params) {
            if layout.is_void() {
                return Err(Error::Unsupported {
                    what: format!("void parameter `{}` of `{name}`", param.name),
                });
            }
        }
        let arg_types = params.iter().map(ffi_type).collect::<Result<Vec<_>>>()?;
        let mut cif = Cif::new(arg_types, ffi_type(&sig.return_type)?);
        set_abi(&mut cif, sig.calling_convention);
        Ok(Self {
            name: name.to_string(),
            code: CodePtr::from_ptr(address.as_ptr()),
            sig,
            params,
            cif,
            library,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &FunctionSig {
        &self.sig
    }

    pub fn library(&self) -> &Arc<dyn Library> {
        &self.library
    }

    pub fn address(&self) -> *const c_void {
        self.code.as_ptr()
    }

    /// Call the native function.
    ///
    /// Integer arguments are truncated to the parameter width.
    ///
    /// # Safety
    ///
    /// The declared signature must match the native function, and every
    /// pointer argument must be valid for whatever the function does with it.
    pub unsafe fn call(&self, args: &[CallArg<'_>]) -> Result<Value> {
        if args.len() != self.params.len() {
            return Err(Error::Arity {
                function: self.name.clone(),
                expected: self.params.len(),
                got: args.len(),
            });
        }

        let mut slots: Vec<Vec<u64>> = Vec::with_capacity(args.len());
        for (index, (arg, layout)) in args.iter().zip(&self.params).enumerate() {
            let slot = self.encode(index, arg, layout)?;
            slots.push(slot);
        }
        let mut avalue: Vec<*mut c_void> = slots
            .iter_mut()
            .map(|s| s.as_mut_ptr().cast::<c_void>())
            .collect();

        let ret = &self.sig.return_type;
        let words = ret.size().max(size_of::<u64>()).div_ceil(size_of::<u64>());
        let mut rvalue = vec![0u64; words];

        trace!(function = %self.name, args = args.len(), "native call");
        // SAFETY: `cif` was prepared for exactly these argument types, every
        // slot is sized and aligned for its parameter, and `rvalue` is at
        // least one `ffi_arg` wide. Signature agreement is the caller's
        // obligation.
        unsafe {
            libffi::raw::ffi_call(
                self.cif.as_raw_ptr(),
                Some(*self.code.as_fun()),
                rvalue.as_mut_ptr().cast(),
                avalue.as_mut_ptr(),
            );
        }
        self.decode(ret, &rvalue)
    }

    fn encode(&self, index: usize, arg: &CallArg<'_>, layout: &Layout) -> Result<Vec<u64>> {
        let argument = |reason: String| Error::Argument {
            function: self.name.clone(),
            index,
            reason,
        };
        let size = layout.size();
        let mut slot = vec![0u64; size.div_ceil(size_of::<u64>()).max(1)];
        // SAFETY: `slot` owns at least `size` bytes.
        let bytes = unsafe { std::slice::from_raw_parts_mut(slot.as_mut_ptr().cast::<u8>(), size) };

        if layout.as_struct().is_some() {
            let src: &[u8] = match arg {
                CallArg::Buffer(b) if b.len() == size => b.bytes(),
                // SAFETY: `OutBuffer` holds an exclusive borrow of `len` bytes.
                CallArg::BufferMut(o) if o.len == size => unsafe {
                    std::slice::from_raw_parts(o.ptr.as_ptr().cast::<u8>(), o.len)
                },
                other => {
                    return Err(argument(format!(
                        "expected a `{}` buffer, got {other:?}",
                        layout.type_name()
                    )));
                }
            };
            bytes.copy_from_slice(src);
        } else {
            write_value(layout, &arg.to_value(), bytes).map_err(argument)?;
        }
        Ok(slot)
    }

    fn decode(&self, ret: &Layout, rvalue: &[u64]) -> Result<Value> {
        let unsupported = |reason: String| Error::Unsupported {
            what: format!("return value of `{}`: {reason}", self.name),
        };
        // SAFETY: `rvalue` owns `rvalue.len() * 8` initialised bytes.
        let bytes = unsafe {
            std::slice::from_raw_parts(rvalue.as_ptr().cast::<u8>(), rvalue.len() * size_of::<u64>())
        };
        match ret {
            Layout::Primitive(Primitive::Void) => Ok(Value::Void),
            // libffi widens integral returns to a full `ffi_arg`.
            Layout::Primitive(p) if p.is_integer() && p.size() < size_of::<usize>() => {
                let word = usize::from_ne_bytes(
                    bytes[..size_of::<usize>()]
                        .try_into()
                        .map_err(|_| unsupported("short return buffer".into()))?,
                ) as u64;
                read_value(ret, &word.to_ne_bytes()[int_window(p.size())]).map_err(unsupported)
            }
            other => read_value(other, bytes).map_err(unsupported),
        }
    }
}

impl fmt::Debug for BoundFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundFunction")
            .field("name", &self.name)
            .field("signature", &self.sig.prototype(&self.name))
            .field("library", &self.library.path())
            .finish()
    }
}
