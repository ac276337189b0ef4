fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Fall back to the vendored protoc when the host has none on PATH.
    if std::env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path().map_err(|e| e.to_string())?;
        std::env::set_var("PROTOC", protoc);
    }

    tonic_build::configure().compile_protos(&["proto/metrics.proto"], &["proto"])?;
    println!("cargo:rerun-if-changed=proto/metrics.proto");
    Ok(())
}
