pub mod module_service;
pub mod server;

pub use module_service::{ModuleServiceImpl, BUSY_MESSAGE};
pub use server::GrpcServer;
