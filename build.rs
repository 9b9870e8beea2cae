const COMMANDS: &[&str] = &[
  "load_products",
  "purchase_product",
  "restore_purchases",
  "can_make_payments",
  "post_message",
  "get_receipt",
];

fn main() {
  tauri_plugin::Builder::new(COMMANDS).build();
  generate_swift_glue();
}

// Swift glue for the StoreKit backend.
#[cfg(target_os = "macos")]
fn generate_swift_glue() {
  if std::env::var_os("CARGO_FEATURE_UNSTABLE").is_none() {
    return;
  }
  let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR").unwrap()).join("swift");
  swift_bridge_build::parse_bridges(vec!["src/macos.rs"])
    .write_all_concatenated(out_dir, env!("CARGO_PKG_NAME"));
  println!("cargo:rerun-if-changed=src/macos.rs");
}

#[cfg(not(target_os = "macos"))]
fn generate_swift_glue() {}
