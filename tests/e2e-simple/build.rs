use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};

fn main() {
    let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR").unwrap());

    // The simple-impl cdylib (a build dependency, so it is built first) lands
    // in target/<profile>/ or target/<profile>/deps/, which we can derive from
    // OUT_DIR.
    let target_dir = out_dir
        .ancestors()
        .nth(3) // OUT_DIR -> build/<hash>/out -> build -> debug
        .expect("cannot derive target dir from OUT_DIR");
    let file_name = format!("{DLL_PREFIX}simple{DLL_SUFFIX}");
    let lib_dir = [target_dir.to_path_buf(), target_dir.join("deps")]
        .into_iter()
        .find(|dir| dir.join(&file_name).exists())
        .unwrap_or_else(|| target_dir.to_path_buf());

    // Where the tests look for the library at run time.
    println!("cargo:rustc-env=SIMPLE_LIB_DIR={}", lib_dir.display());

    println!("cargo:rerun-if-changed=../../tests/fixtures/");
    println!("cargo:rerun-if-changed=../simple-impl/src/");
}
