fn main() {
    // `init` only ever builds for the riscv64 target (`cargo build -p init
    // --target riscv64imac-unknown-none-elf`); a host build (unused, but
    // cargo metadata still walks this package) has no `_start` to link
    // against the flat-binary layout below.
    if std::env::var("CARGO_CFG_TARGET_ARCH").as_deref() != Ok("riscv64") {
        return;
    }

    let build_dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("user/init must have parent")
        .parent()
        .expect("user must have parent")
        .join("build");
    println!("cargo:rustc-link-search=native={}", build_dir.display());
    println!("cargo:rustc-link-arg=-Tlinker-init.ld");
    println!("cargo:rerun-if-changed=../../build/linker-init.ld");
}
