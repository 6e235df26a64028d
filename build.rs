//! Generates the `ModuleService` gRPC stubs.
//!
//! Message types are declared with prost derives in `src/wire.rs`, so the
//! service is described with the manual builder and no `protoc` is needed.

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let service = tonic_build::manual::Service::builder()
        .name("ModuleService")
        .package("modserve")
        .method(
            tonic_build::manual::Method::builder()
                .name("invoke")
                .route_name("Invoke")
                .input_type("crate::wire::InvocationRequest")
                .output_type("crate::wire::InvocationReply")
                .codec_path("tonic::codec::ProstCodec")
                .build(),
        )
        .method(
            tonic_build::manual::Method::builder()
                .name("ping")
                .route_name("Ping")
                .input_type("crate::wire::Empty")
                .output_type("crate::wire::Pong")
                .codec_path("tonic::codec::ProstCodec")
                .build(),
        )
        .build();

    tonic_build::manual::Builder::new().compile(&[service]);
}
