use std::env;

fn main() {
    let target = env::var("CARGO_CFG_TARGET_ARCH").unwrap();

    if target == "riscv64" {
        let dir = env::var("CARGO_MANIFEST_DIR").unwrap();
        println!("cargo:rustc-link-arg=-T{dir}/kernel.ld");
        println!("cargo:rerun-if-changed=kernel.ld");
    }

    println!("cargo:rerun-if-changed=build.rs");
}
