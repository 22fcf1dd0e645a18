fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the system protoc when one is configured, the bundled one otherwise.
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }
    println!("cargo:rerun-if-changed=proto/ppe.proto");
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/ppe.proto"], &["proto"])?;
    Ok(())
}
