#[allow(unsafe_code)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    unsafe { std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?) };
    tonic_build::configure().compile_protos(
        &[
            "proto/chat.proto",
            "proto/forwarder.proto",
            "proto/user.proto",
        ],
        &["proto"],
    )?;
    Ok(())
}
