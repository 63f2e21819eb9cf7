#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoGetReq {
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoPutReq {
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub value: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoTestSetReq {
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub test_value: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub new_value: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoValueReply {
    #[prost(string, tag = "1")]
    pub value: ::prost::alloc::string::String,
}
#[doc = r" Generated client implementations."]
pub mod grpc_key_value_client {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    #[doc = " Client facing key-value API served by the coordinator."]
    #[doc = ""]
    #[doc = " Failures are reported in-band: a `ProtoValueReply` whose value is \"unavailable\" means every"]
    #[doc = " replica of the key failed. Admin commands are issued through `Get` with a key starting with"]
    #[doc = " \"CMD\"."]
    pub struct GrpcKeyValueClient<T> {
        inner: tonic::client::Grpc<T>,
    }
    impl GrpcKeyValueClient<tonic::transport::Channel> {
        #[doc = r" Attempt to create a new client by connecting to a given endpoint."]
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: std::convert::TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }
    impl<T> GrpcKeyValueClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::ResponseBody: Body + HttpBody + Send + 'static,
        T::Error: Into<StdError>,
        <T::ResponseBody as HttpBody>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }
        pub fn with_interceptor(inner: T, interceptor: impl Into<tonic::Interceptor>) -> Self {
            let inner = tonic::client::Grpc::with_interceptor(inner, interceptor);
            Self { inner }
        }
        pub async fn get(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoGetReq>,
        ) -> Result<tonic::Response<super::ProtoValueReply>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/kvstore.GrpcKeyValue/Get");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn put(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoPutReq>,
        ) -> Result<tonic::Response<super::ProtoValueReply>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/kvstore.GrpcKeyValue/Put");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn test_set(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoTestSetReq>,
        ) -> Result<tonic::Response<super::ProtoValueReply>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/kvstore.GrpcKeyValue/TestSet");
            self.inner.unary(request.into_request(), path, codec).await
        }
    }
    impl<T: Clone> Clone for GrpcKeyValueClient<T> {
        fn clone(&self) -> Self {
            Self {
                inner: self.inner.clone(),
            }
        }
    }
    impl<T> std::fmt::Debug for GrpcKeyValueClient<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "GrpcKeyValueClient {{ ... }}")
        }
    }
}
#[doc = r" Generated server implementations."]
pub mod grpc_key_value_server {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    #[doc = "Generated trait containing gRPC methods that should be implemented for use with GrpcKeyValueServer."]
    #[async_trait]
    pub trait GrpcKeyValue: Send + Sync + 'static {
        async fn get(
            &self,
            request: tonic::Request<super::ProtoGetReq>,
        ) -> Result<tonic::Response<super::ProtoValueReply>, tonic::Status>;
        async fn put(
            &self,
            request: tonic::Request<super::ProtoPutReq>,
        ) -> Result<tonic::Response<super::ProtoValueReply>, tonic::Status>;
        async fn test_set(
            &self,
            request: tonic::Request<super::ProtoTestSetReq>,
        ) -> Result<tonic::Response<super::ProtoValueReply>, tonic::Status>;
    }
    #[doc = " Client facing key-value API served by the coordinator."]
    #[doc = ""]
    #[doc = " Failures are reported in-band: a `ProtoValueReply` whose value is \"unavailable\" means every"]
    #[doc = " replica of the key failed. Admin commands are issued through `Get` with a key starting with"]
    #[doc = " \"CMD\"."]
    #[derive(Debug)]
    pub struct GrpcKeyValueServer<T: GrpcKeyValue> {
        inner: _Inner<T>,
    }
    struct _Inner<T>(Arc<T>, Option<tonic::Interceptor>);
    impl<T: GrpcKeyValue> GrpcKeyValueServer<T> {
        pub fn new(inner: T) -> Self {
            let inner = Arc::new(inner);
            let inner = _Inner(inner, None);
            Self { inner }
        }
        pub fn with_interceptor(inner: T, interceptor: impl Into<tonic::Interceptor>) -> Self {
            let inner = Arc::new(inner);
            let inner = _Inner(inner, Some(interceptor.into()));
            Self { inner }
        }
    }
    impl<T, B> Service<http::Request<B>> for GrpcKeyValueServer<T>
    where
        T: GrpcKeyValue,
        B: HttpBody + Send + Sync + 'static,
        B::Error: Into<StdError> + Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = Never;
        type Future = BoxFuture<Self::Response, Self::Error>;
        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            let inner = self.inner.clone();
            match req.uri().path() {
                "/kvstore.GrpcKeyValue/Get" => {
                    #[allow(non_camel_case_types)]
                    struct GetSvc<T: GrpcKeyValue>(pub Arc<T>);
                    impl<T: GrpcKeyValue> tonic::server::UnaryService<super::ProtoGetReq> for GetSvc<T> {
                        type Response = super::ProtoValueReply;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoGetReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).get(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = GetSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/kvstore.GrpcKeyValue/Put" => {
                    #[allow(non_camel_case_types)]
                    struct PutSvc<T: GrpcKeyValue>(pub Arc<T>);
                    impl<T: GrpcKeyValue> tonic::server::UnaryService<super::ProtoPutReq> for PutSvc<T> {
                        type Response = super::ProtoValueReply;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoPutReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).put(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = PutSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/kvstore.GrpcKeyValue/TestSet" => {
                    #[allow(non_camel_case_types)]
                    struct TestSetSvc<T: GrpcKeyValue>(pub Arc<T>);
                    impl<T: GrpcKeyValue> tonic::server::UnaryService<super::ProtoTestSetReq> for TestSetSvc<T> {
                        type Response = super::ProtoValueReply;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoTestSetReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).test_set(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = TestSetSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                _ => Box::pin(async move {
                    Ok(http::Response::builder()
                        .status(200)
                        .header("grpc-status", "12")
                        .header("content-type", "application/grpc")
                        .body(tonic::body::BoxBody::empty())
                        .unwrap())
                }),
            }
        }
    }
    impl<T: GrpcKeyValue> Clone for GrpcKeyValueServer<T> {
        fn clone(&self) -> Self {
            let inner = self.inner.clone();
            Self { inner }
        }
    }
    impl<T: GrpcKeyValue> Clone for _Inner<T> {
        fn clone(&self) -> Self {
            Self(self.0.clone(), self.1.clone())
        }
    }
    impl<T: std::fmt::Debug> std::fmt::Debug for _Inner<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self.0)
        }
    }
    impl<T: GrpcKeyValue> tonic::transport::NamedService for GrpcKeyValueServer<T> {
        const NAME: &'static str = "kvstore.GrpcKeyValue";
    }
}
