use crate::api::{FrontEndError, KvFrontEnd};
use crate::grpc::grpc_key_value_server::{GrpcKeyValue, GrpcKeyValueServer};
use crate::grpc::{ProtoGetReq, ProtoPutReq, ProtoTestSetReq, ProtoValueReply};
use crate::server::ShutdownSignal;
use std::net::SocketAddr;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// RpcServer is the type that implements the key-value gRPC interface.
pub(crate) struct RpcServer {
    logger: slog::Logger,
    front_end: KvFrontEnd,
}

impl RpcServer {
    pub(crate) fn new(logger: slog::Logger, front_end: KvFrontEnd) -> Self {
        RpcServer { logger, front_end }
    }

    pub(crate) async fn run(self, socket_addr: SocketAddr, shutdown_signal: ShutdownSignal) {
        let logger = self.logger.clone();
        slog::info!(logger, "Listening for clients on '{:?}'", socket_addr);

        let result = Server::builder()
            .add_service(GrpcKeyValueServer::new(self))
            .serve_with_shutdown(socket_addr, shutdown_signal.wait())
            .await;

        slog::info!(logger, "Server run() has exited: {:?}", result);
    }

    fn convert_result(app_result: Result<String, FrontEndError>) -> Result<ProtoValueReply, Status> {
        match app_result {
            Ok(value) => Ok(ProtoValueReply { value }),
            Err(e @ FrontEndError::Admin(_)) => Err(Status::invalid_argument(e.to_string())),
            Err(e @ FrontEndError::DispatcherExited) => Err(Status::unavailable(e.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl GrpcKeyValue for RpcServer {
    async fn get(&self, rpc_request_wrapped: Request<ProtoGetReq>) -> Result<Response<ProtoValueReply>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = Self::convert_result(self.front_end.get(rpc_request.key).await);
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn put(&self, rpc_request_wrapped: Request<ProtoPutReq>) -> Result<Response<ProtoValueReply>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = Self::convert_result(self.front_end.put(rpc_request.key, rpc_request.value).await);
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn test_set(
        &self,
        rpc_request_wrapped: Request<ProtoTestSetReq>,
    ) -> Result<Response<ProtoValueReply>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = Self::convert_result(
            self.front_end
                .test_set(rpc_request.key, rpc_request.test_value, rpc_request.new_value)
                .await,
        );
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }
}
