mod api;
mod coordinator;
mod logging;
mod node;
mod server;
mod wire;
mod grpc {
    include!("../generated/kvstore.rs");
}

pub use api::start_coordinator;
pub use api::ConnectError;
pub use api::Coordinator;
pub use api::CoordinatorConfig;
pub use api::CoordinatorCreationError;
pub use api::CoordinatorOptions;
pub use api::FrontEndError;
pub use api::KvFrontEnd;
pub use api::KvRpcClient;
pub use api::UNAVAILABLE;
pub use coordinator::AdminError;
pub use logging::create_root_logger_for_file;
pub use logging::create_root_logger_for_stdout;
pub use node::run_storage_node;
pub use node::NodeExit;
pub use node::StorageNodeConfig;
pub use node::StorageNodeError;
pub use wire::FrameError;
pub use wire::KeyOp;
pub use wire::LineFrameCodec;
pub use wire::Opcode;
pub use wire::RequestBatch;
pub use wire::ResponseBatch;
pub use wire::VersionedValue;

