fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Fall back to the vendored protoc when none is installed
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    tonic_build::configure()
        .build_client(true)
        .build_server(true) // Server side backs the in-process kubelet stub in tests
        .compile_protos(&["proto/pod_resources.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/pod_resources.proto");
    Ok(())
}
