/// Builds the gRPC client and server code for `helloworld.proto` using
/// `tonic-prost-build`.
///
/// The generated module is exposed through `hello_stream_core::proto`, and the
/// encoded file descriptor set is written next to it so the server can offer
/// gRPC reflection.
///
/// # Panics
///
/// Panics if code generation fails, which aborts the build with protoc's
/// diagnostics.
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("helloworld_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/helloworld.proto"], &["proto"])
        .unwrap();

    println!("cargo:rerun-if-changed=proto/helloworld.proto");
}
