fn main() {
    // Only apply the kernel linker script when actually targeting the
    // bare-metal riscv64 binary — `cargo test` builds this crate for the
    // host target, where there's no `_start`/`mtvec` to link against and
    // the custom script would just break the host linker.
    if std::env::var("CARGO_CFG_TARGET_ARCH").as_deref() != Ok("riscv64") {
        return;
    }

    println!("cargo:rustc-link-search=native={}", concat!(env!("CARGO_MANIFEST_DIR"), "/../build"));
    println!("cargo:rustc-link-arg=-Tlinker.ld");
    println!("cargo:rerun-if-changed=../build/linker.ld");
}
