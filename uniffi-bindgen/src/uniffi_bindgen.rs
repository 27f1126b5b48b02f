//! Generates Kotlin and Swift bindings for `oraclekit-core`.

fn main() {
    uniffi::uniffi_bindgen_main();
}
