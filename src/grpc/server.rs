use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::grpc::module_service::ModuleServiceImpl;
use crate::proto::module_service_server::ModuleServiceServer;
use crate::tls::TlsIdentity;

pub struct GrpcServer {
    addr: SocketAddr,
    service: ModuleServiceImpl,
    tls_identity: Option<TlsIdentity>,
    max_message_size: usize,
}

impl GrpcServer {
    pub fn new(
        addr: SocketAddr,
        service: ModuleServiceImpl,
        tls_identity: Option<TlsIdentity>,
        max_message_size: usize,
    ) -> Self {
        Self {
            addr,
            service,
            tls_identity,
            max_message_size,
        }
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), tonic::transport::Error> {
        let service = ModuleServiceServer::new(self.service)
            .max_decoding_message_size(self.max_message_size)
            .max_encoding_message_size(self.max_message_size);

        let mut builder = Server::builder();
        if let Some(identity) = &self.tls_identity {
            builder = builder.tls_config(identity.server_tls_config())?;
        }

        tracing::info!(
            addr = %self.addr,
            tls = self.tls_identity.is_some(),
            "Starting gRPC server"
        );

        builder
            .add_service(service)
            .serve_with_shutdown(self.addr, shutdown.cancelled_owned())
            .await
    }
}
