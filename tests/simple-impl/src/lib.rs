//! Rust implementation of the simple.h C API.
//!
//! Compiled as a cdylib so the e2e-simple test crate can open it at run time
//! and bind `simple.h` against its exports.

#![allow(non_snake_case)]

use std::ffi::{c_char, c_uint};
use std::sync::atomic::{AtomicI32, Ordering};

// Mirror the C types from simple.h
#[repr(C)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

pub const SIMPLE_NAME_LEN: usize = 16;

#[repr(C)]
pub struct Widget {
    pub name: [c_char; SIMPLE_NAME_LEN],
    pub values: [i32; 4],
    pub color: i32,
}

#[cfg(windows)]
type WChar = u16;
#[cfg(not(windows))]
type WChar = u32;

static DESCRIBED: AtomicI32 = AtomicI32::new(0);

#[unsafe(no_mangle)]
pub extern "system" fn GetCount() -> i32 {
    42
}

#[unsafe(no_mangle)]
pub extern "C" fn add(a: i32, b: i32) -> i32 {
    a.wrapping_add(b)
}

#[unsafe(no_mangle)]
pub extern "C" fn rect_area(r: Rect) -> u64 {
    u64::from(r.width) * u64::from(r.height)
}

#[unsafe(no_mangle)]
/// # Safety
/// `w` must be a valid, non-null pointer to a `Widget`.
pub unsafe extern "C" fn describe_widget(w: *mut Widget, color: i32) {
    if w.is_null() {
        return;
    }
    let n = DESCRIBED.fetch_add(1, Ordering::Relaxed) + 1;
    let name = b"widget";
    unsafe {
        (*w).name = [0; SIMPLE_NAME_LEN];
        for (dst, src) in (*w).name.iter_mut().zip(name) {
            *dst = *src as c_char;
        }
        (*w).values = [n, n * 2, n * 3, n * 4];
        (*w).color = color;
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn described_count() -> i32 {
    DESCRIBED.load(Ordering::Relaxed)
}

#[unsafe(no_mangle)]
pub extern "C" fn scale(v: f64, by: f32) -> f64 {
    v * f64::from(by)
}

#[unsafe(no_mangle)]
/// # Safety
/// `s` must be a valid NUL-terminated string.
pub unsafe extern "C" fn LabelLenA(s: *const c_char) -> c_uint {
    let mut n = 0;
    while unsafe { *s.add(n) } != 0 {
        n += 1;
    }
    n as c_uint
}

#[unsafe(no_mangle)]
/// # Safety
/// `s` must be a valid NUL-terminated wide string.
pub unsafe extern "C" fn LabelLenW(s: *const WChar) -> c_uint {
    let mut n = 0;
    while unsafe { *s.add(n) } != 0 {
        n += 1;
    }
    (n as c_uint) | 0x1000
}
