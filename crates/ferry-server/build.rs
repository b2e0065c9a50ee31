fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=../../proto/ferry.proto");
    tonic_build::configure()
        .build_server(true)
        .build_client(false) // The client lives in ferry-cli
        .compile_protos(&["../../proto/ferry.proto"], &["../../proto"])?;
    Ok(())
}
