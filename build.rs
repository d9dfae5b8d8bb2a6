fn main() {
    println!("cargo:rerun-if-changed=migrations");

    #[cfg(feature = "grpc")]
    {
        tonic_build::configure()
            .build_server(true)
            .build_client(true)
            .compile_protos(&["proto/zkp_auth.proto"], &["proto"])
            .unwrap_or_else(|e| panic!("Failed to compile protos: {e}"));
    }
}
