pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod fault;
pub mod grpc;
pub mod naming;
pub mod node;
pub mod queue;
pub mod shutdown;
pub mod storage;
pub mod tls;
pub mod wire;

// Generated gRPC service plumbing over the hand-written messages in `wire`
pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/modserve.ModuleService.rs"));
}
