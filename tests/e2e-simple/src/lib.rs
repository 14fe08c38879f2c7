//! End-to-end: bind `simple.h` against the simple-impl cdylib through
//! `simple.toml`, then call into it.

use std::path::{Path, PathBuf};

use anyhow::Context;
use bnd_dyn::Namespace;

/// Directory holding the simple-impl shared library.
pub const LIB_DIR: &str = env!("SIMPLE_LIB_DIR");

pub fn config_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../fixtures/simple/simple.toml")
}

/// Load the `simple` namespace, searching [`LIB_DIR`] for the library.
pub fn load_simple() -> anyhow::Result<Namespace> {
    let path = config_path();
    let mut cfg = bnd_dyn::config::load_config(&path)?;
    cfg.include_paths.push(PathBuf::from(LIB_DIR));
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut namespaces = bnd_dyn::load_from_config(&cfg, base_dir)?;
    namespaces
        .pop()
        .map(|(_, ns)| ns)
        .context("simple.toml declares no binding")
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;

    use bnd_dyn::{CallArg, ConstantValue, Layout, Primitive, Value, wide};

    use super::*;

    #[test]
    fn test_constants() {
        let ns = load_simple().unwrap();
        assert_eq!(*ns.constant("SIMPLE_VERSION").unwrap(), 3);
        assert_eq!(*ns.constant("SIMPLE_MAX_NAME").unwrap(), 16);
        assert_eq!(*ns.constant("COLOR_BLUE").unwrap(), 2);
        assert_eq!(
            ns.constant("SIMPLE_RATIO").unwrap(),
            &ConstantValue::Float(1.5)
        );
        assert_eq!(
            ns.constant("SIMPLE_GREETING").unwrap(),
            &ConstantValue::Opaque("\"hello\"".into())
        );
    }

    #[test]
    fn test_struct_layout() {
        let ns = load_simple().unwrap();
        let rect = ns.layout("Rect").unwrap();
        assert_eq!(rect.size(), 16);
        assert_eq!(rect.align(), 4);

        let widget = ns.layout("Widget").unwrap();
        assert_eq!(widget.size(), 16 + 16 + 4);
        let (offset, _) = widget.as_struct().unwrap().field("color").unwrap();
        assert_eq!(offset, 32);

        assert!(matches!(ns.layout("CompareFunc").unwrap(), Layout::Function(_)));
        assert_eq!(
            ns.layout("PRect").unwrap(),
            &rect.clone().pointer()
        );
    }

    #[test]
    fn test_get_count() {
        let ns = load_simple().unwrap();
        let f = ns.function("GetCount").unwrap();
        assert_eq!(unsafe { f.call(&[]) }.unwrap().as_i64(), Some(42));
    }

    #[test]
    fn test_scalar_calls() {
        let ns = load_simple().unwrap();
        let add = ns.function("add").unwrap();
        let v = unsafe { add.call(&[CallArg::Int(40), CallArg::Int(2)]) }.unwrap();
        assert_eq!(v.as_i64(), Some(42));

        let scale = ns.function("scale").unwrap();
        let v = unsafe { scale.call(&[CallArg::Float(2.5), CallArg::Float(2.0)]) }.unwrap();
        assert_eq!(v.as_f64(), Some(5.0));
    }

    #[test]
    fn test_struct_by_value() {
        let ns = load_simple().unwrap();
        let mut rect = ns.layout("Rect").unwrap().instantiate();
        rect.set("width", Value::UInt(800)).unwrap();
        rect.set("height", Value::UInt(600)).unwrap();
        let area = ns.function("rect_area").unwrap();
        let v = unsafe { area.call(&[CallArg::Buffer(&rect)]) }.unwrap();
        assert_eq!(v.as_u64(), Some(480_000));
    }

    #[test]
    fn test_out_buffer() {
        let ns = load_simple().unwrap();
        let blue = ns.constant("COLOR_BLUE").unwrap().as_i64().unwrap();
        let mut widget = ns.layout("Widget").unwrap().instantiate();
        let describe = ns.function("describe_widget").unwrap();
        unsafe { describe.call(&[CallArg::out(&mut widget), CallArg::Int(blue)]) }.unwrap();

        assert_eq!(widget.read_string("name").unwrap(), "widget");
        assert_eq!(widget.get("color").unwrap().as_i64(), Some(blue));
        let first = widget.element("values", 0).unwrap().as_i64().unwrap();
        assert!(first >= 1);
        assert_eq!(widget.element("values", 3).unwrap().as_i64(), Some(first * 4));
    }

    #[test]
    fn test_variants() {
        let ns = load_simple().unwrap();
        // charset = "wide" in simple.toml
        let label_len = ns.function("LabelLen").unwrap();
        assert_eq!(label_len.name(), "LabelLenW");
        let w = wide("abc");
        let v = unsafe { label_len.call(&[CallArg::WStr(&w)]) }.unwrap();
        assert_eq!(v.as_u64(), Some(0x1003));

        let ansi = ns.function("LabelLenA").unwrap();
        let s = CString::new("abcde").unwrap();
        let v = unsafe { ansi.call(&[CallArg::Str(&s)]) }.unwrap();
        assert_eq!(v.as_u64(), Some(5));
        assert_eq!(
            ansi.signature().params[0].ty,
            Layout::Primitive(Primitive::CStr)
        );
    }

    #[test]
    fn test_missing_export_is_omitted() {
        let ns = load_simple().unwrap();
        assert!(!ns.contains("not_implemented"));
        assert!(ns.contains("described_count"));
    }

    #[test]
    fn test_library_is_held() {
        let ns = load_simple().unwrap();
        assert_eq!(ns.libraries().len(), 1);
        let lib = ns.libraries()[0].path().to_string();
        assert!(lib.starts_with(LIB_DIR), "{lib} not under {LIB_DIR}");
        let f = ns.function("GetCount").unwrap().clone();
        drop(ns);
        assert_eq!(unsafe { f.call(&[]) }.unwrap().as_i64(), Some(42));
    }
}
