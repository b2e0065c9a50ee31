fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=../../proto/ferry.proto");
    tonic_build::configure()
        .build_server(false) // This is the client
        .build_client(true)
        .compile_protos(&["../../proto/ferry.proto"], &["../../proto"])?;
    Ok(())
}
