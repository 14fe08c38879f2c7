//! Binding and calling: in-process symbol tables, libc through the running
//! process, namespace merge and A/W variant aliasing.

use std::ffi::{CString, c_void};
use std::sync::Arc;

use bnd_dyn::{CallArg, Charset, ConstantValue, Error, Item, Library, SymbolMap, Value, bind, parse, wide};

#[repr(C)]
struct Point {
    x: i32,
    y: i32,
}

extern "C" fn manhattan(p: Point) -> i32 {
    p.x.abs() + p.y.abs()
}

extern "C" fn translate(p: *mut Point, dx: i32, dy: i32) {
    // SAFETY: the tests pass a live `Point` buffer.
    unsafe {
        (*p).x += dx;
        (*p).y += dy;
    }
}

extern "C" fn scale(v: f64, by: f32) -> f64 {
    v * f64::from(by)
}

extern "C" fn name_len_a(s: *const u8) -> u32 {
    let mut n = 0;
    // SAFETY: callers pass a NUL-terminated string.
    while unsafe { *s.add(n) } != 0 {
        n += 1;
    }
    n as u32 | 0xA000
}

extern "C" fn name_len_w(s: *const bnd_dyn::model::WChar) -> u32 {
    let mut n = 0;
    // SAFETY: callers pass a NUL-terminated wide string.
    while unsafe { *s.add(n) } != 0 {
        n += 1;
    }
    n as u32 | 0xB000
}

const HEADER: &str = "
typedef struct _POINT { int x; int y; } POINT, *PPOINT;
#define ORIGIN 0
int manhattan(POINT p);
void translate(PPOINT p, int dx, int dy);
double scale(double v, float by);
unsigned int NameLenA(const char *s);
unsigned int NameLenW(const wchar_t *s);
";

fn geometry() -> Arc<dyn Library> {
    Arc::new(
        SymbolMap::new("geometry")
            .with("manhattan", manhattan as *const c_void)
            .with("translate", translate as *const c_void)
            .with("scale", scale as *const c_void)
            .with("NameLenA", name_len_a as *const c_void)
            .with("NameLenW", name_len_w as *const c_void),
    )
}

#[test]
fn structs_by_value_and_by_pointer() {
    let ns = bind(&parse(HEADER).unwrap(), &[geometry()]);

    let mut point = ns.layout("POINT").unwrap().instantiate();
    point.set("x", Value::Int(3)).unwrap();
    point.set("y", Value::Int(-4)).unwrap();

    let manhattan = ns.function("manhattan").unwrap();
    let d = unsafe { manhattan.call(&[CallArg::Buffer(&point)]) }.unwrap();
    assert_eq!(d.as_i64(), Some(7));

    let translate = ns.function("translate").unwrap();
    let r = unsafe { translate.call(&[CallArg::out(&mut point), CallArg::Int(1), CallArg::Int(10)]) }
        .unwrap();
    assert!(matches!(r, Value::Void));
    assert_eq!(point.get("x").unwrap().as_i64(), Some(4));
    assert_eq!(point.get("y").unwrap().as_i64(), Some(6));
}

#[test]
fn floats_and_argument_errors() {
    let ns = bind(&parse(HEADER).unwrap(), &[geometry()]);
    let scale = ns.function("scale").unwrap();
    let v = unsafe { scale.call(&[CallArg::Float(1.5), CallArg::Float(4.0)]) }.unwrap();
    assert_eq!(v.as_f64(), Some(6.0));

    let err = unsafe { scale.call(&[CallArg::Float(1.0), CallArg::Null]) }.unwrap_err();
    assert!(matches!(err, Error::Argument { index: 1, .. }), "{err}");

    let manhattan = ns.function("manhattan").unwrap();
    let err = unsafe { manhattan.call(&[CallArg::Int(0)]) }.unwrap_err();
    assert!(matches!(err, Error::Argument { index: 0, .. }), "{err}");
}

#[test]
fn variants_alias_preferred_charset() {
    let ns = bind(&parse(HEADER).unwrap(), &[geometry()]);
    assert!(!ns.contains("NameLen"));

    let name = CString::new("abc").unwrap();
    let wide_ns = ns.with_variants(&["NameLen", "Missing"], Charset::Wide);
    let ansi_ns = ns.with_variants(&["NameLen"], Charset::Ansi);
    assert!(!ns.contains("NameLen"), "the original namespace is unchanged");
    assert!(!wide_ns.contains("Missing"));

    let w = wide("abcd");
    let n = unsafe { wide_ns.function("NameLen").unwrap().call(&[CallArg::WStr(&w)]) }.unwrap();
    assert_eq!(n.as_u64(), Some(0xB004));

    let n = unsafe { ansi_ns.function("NameLen").unwrap().call(&[CallArg::Str(&name)]) }.unwrap();
    assert_eq!(n.as_u64(), Some(0xA003));
}

#[test]
fn variant_falls_back_to_other_charset() {
    let ns = bind(&parse("#define LimitA 1\n").unwrap(), &[]);
    let aliased = ns.with_variants(&["Limit"], Charset::Wide);
    assert_eq!(*aliased.constant("Limit").unwrap(), 1);
}

#[test]
fn merge_adds_and_replaces() {
    let ns = bind(&parse("#define ORIGIN 0\n#define LIMIT 10\n").unwrap(), &[]);
    let merged = ns.merge([
        ("LIMIT", Item::Constant(ConstantValue::Signed(20))),
        ("EXTRA", Item::Constant(ConstantValue::Opaque("x".into()))),
        ("_hidden", Item::Constant(ConstantValue::Signed(1))),
        ("two words", Item::Constant(ConstantValue::Signed(2))),
    ]);
    assert_eq!(*ns.constant("LIMIT").unwrap(), 10);
    assert_eq!(*merged.constant("LIMIT").unwrap(), 20);
    assert_eq!(*merged.constant("ORIGIN").unwrap(), 0);
    assert!(merged.contains("EXTRA"));
    assert!(!merged.contains("_hidden"));
    assert!(!merged.contains("two words"));
    assert_eq!(merged.len(), ns.len() + 1);
}

#[test]
fn inadmissible_names_are_hidden() {
    let ns = bind(&parse(HEADER).unwrap(), &[geometry()]);
    assert!(ns.contains("POINT"));
    assert!(!ns.contains("_POINT"));
    assert!(!ns.contains("unsigned int"));
    assert!(ns.names().all(|n| !n.contains(' ') && !n.starts_with('_')));
}

#[test]
fn functions_keep_their_library_alive() {
    let lib = geometry();
    let ns = bind(&parse(HEADER).unwrap(), &[Arc::clone(&lib)]);
    let f = Arc::clone(ns.function("scale").unwrap());
    drop(ns);
    assert_eq!(f.library().path(), "geometry");
    assert!(Arc::strong_count(&lib) >= 2);
}

#[test]
fn first_library_wins() {
    extern "C" fn one() -> i32 {
        1
    }
    extern "C" fn two() -> i32 {
        2
    }
    let first: Arc<dyn Library> = Arc::new(SymbolMap::new("first").with("pick", one as *const c_void));
    let second: Arc<dyn Library> = Arc::new(SymbolMap::new("second").with("pick", two as *const c_void));
    let ns = bind(&parse("int pick(void);").unwrap(), &[first, second]);
    let pick = ns.function("pick").unwrap();
    assert_eq!(pick.library().path(), "first");
    assert_eq!(unsafe { pick.call(&[]) }.unwrap().as_i64(), Some(1));
}

#[test]
fn packed_struct_by_value_is_omitted() {
    let header = "#pragma pack(push, 1)\n\
                  typedef struct { char tag; int value; } PACKED;\n\
                  #pragma pack(pop)\n\
                  int take(PACKED p);\n\
                  int take_ptr(PACKED *p);\n";
    extern "C" fn stub() -> i32 {
        0
    }
    let lib: Arc<dyn Library> = Arc::new(
        SymbolMap::new("packed")
            .with("take", stub as *const c_void)
            .with("take_ptr", stub as *const c_void),
    );
    let ns = bind(&parse(header).unwrap(), &[lib]);
    assert_eq!(ns.layout("PACKED").unwrap().size(), 5);
    assert!(!ns.contains("take"));
    assert!(ns.contains("take_ptr"));
}

#[cfg(unix)]
mod libc {
    use super::*;
    use bnd_dyn::NativeLibrary;

    fn process() -> Arc<dyn Library> {
        Arc::new(NativeLibrary::this().unwrap())
    }

    #[test]
    fn abs_and_strlen() {
        let tables = parse("int abs(int x);\nsize_t strlen(const char *s);\n").unwrap();
        let ns = bind(&tables, &[process()]);

        let abs = ns.function("abs").unwrap();
        assert_eq!(unsafe { abs.call(&[CallArg::Int(-17)]) }.unwrap().as_i64(), Some(17));

        let s = CString::new("hello, world").unwrap();
        let strlen = ns.function("strlen").unwrap();
        assert_eq!(unsafe { strlen.call(&[CallArg::Str(&s)]) }.unwrap().as_u64(), Some(12));
    }

    #[test]
    fn memset_fills_a_buffer() {
        let tables = parse(
            "typedef struct { unsigned char bytes[16]; } BLOCK;\n\
             void *memset(void *dst, int c, size_t n);\n",
        )
        .unwrap();
        let ns = bind(&tables, &[process()]);
        let mut block = ns.layout("BLOCK").unwrap().instantiate();
        let len = block.len() as u64;
        let memset = ns.function("memset").unwrap();
        let ret = unsafe { memset.call(&[CallArg::out(&mut block), CallArg::Int(0x5A), CallArg::UInt(len)]) }
            .unwrap();
        assert_eq!(ret.as_ptr(), Some(block.as_mut_ptr()));
        assert!(block.bytes().iter().all(|b| *b == 0x5A));
        assert_eq!(block.element("bytes", 15).unwrap().as_u64(), Some(0x5A));
    }
}
