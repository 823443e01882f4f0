use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the vendored compiler so the fixtures build without a system protoc
    env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    let wkt_include = protoc_bin_vendored::include_path()?;

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let mut config = prost_build::Config::new();
    config.file_descriptor_set_path(out_dir.join("rpcgate_testing.bin"));
    config.compile_protos(
        &["proto/rpcgate/testing/v1/testing.proto"],
        &[PathBuf::from("proto"), wkt_include],
    )?;

    println!("cargo:rerun-if-changed=proto");
    Ok(())
}
