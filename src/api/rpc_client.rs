use crate::grpc::grpc_key_value_client::GrpcKeyValueClient;
use crate::grpc::{ProtoGetReq, ProtoPutReq, ProtoTestSetReq};
use std::error::Error;
use std::net::SocketAddr;
use tonic::codegen::http::uri;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;

/// KvRpcClient talks to a coordinator's client-facing gRPC endpoint.
pub struct KvRpcClient {
    inner: GrpcKeyValueClient<Channel>,
}

impl KvRpcClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self, ConnectError> {
        let url = format!("http://{}", addr);
        let endpoint = Endpoint::from_shared(url)?;

        let connection = endpoint.connect().await?;

        Ok(KvRpcClient {
            inner: GrpcKeyValueClient::new(connection),
        })
    }

    pub async fn get(&mut self, key: impl Into<String>) -> Result<String, Status> {
        let request = ProtoGetReq { key: key.into() };
        let reply = self.inner.get(request).await?;
        Ok(reply.into_inner().value)
    }

    pub async fn put(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<String, Status> {
        let request = ProtoPutReq {
            key: key.into(),
            value: value.into(),
        };
        let reply = self.inner.put(request).await?;
        Ok(reply.into_inner().value)
    }

    pub async fn test_set(
        &mut self,
        key: impl Into<String>,
        test_value: impl Into<String>,
        new_value: impl Into<String>,
    ) -> Result<String, Status> {
        let request = ProtoTestSetReq {
            key: key.into(),
            test_value: test_value.into(),
            new_value: new_value.into(),
        };
        let reply = self.inner.test_set(request).await?;
        Ok(reply.into_inner().value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Invalid coordinator address")]
    InvalidUri(#[from] uri::InvalidUri),
    #[error("Failed to connect to coordinator")]
    ConnectFailure(Box<dyn Error + Send + Sync>),
}

impl From<tonic::transport::Error> for ConnectError {
    fn from(e: tonic::transport::Error) -> Self {
        ConnectError::ConnectFailure(e.into())
    }
}
