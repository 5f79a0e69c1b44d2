//! Resolves the vendor VME bus library this crate's `extern "C"` block
//! declares against.
//!
//! With `VMEDAQ_VENDOR_LIB` set, link against that shared library by name
//! (the real deployment path: point it at the vendor SDK's `libCAENVME`, or
//! whatever the installed bridge driver calls itself). Otherwise compile and
//! statically link `vendor/stub.c`, a no-hardware stand-in, so the crate
//! links and its tests run without the vendor SDK present.

fn main() {
    println!("cargo:rerun-if-env-changed=VMEDAQ_VENDOR_LIB");
    println!("cargo:rerun-if-changed=vendor/stub.c");

    if let Ok(lib) = std::env::var("VMEDAQ_VENDOR_LIB") {
        println!("cargo:rustc-link-lib=dylib={lib}");
        return;
    }

    cc::Build::new().file("vendor/stub.c").compile("vmedaq_vendor_stub");
}
