//! This mod is meant to hold most of the code for the library's client-facing API.
mod front_end;
mod options;
mod rpc_client;
mod wiring;

pub use front_end::FrontEndError;
pub use front_end::KvFrontEnd;
pub use front_end::UNAVAILABLE;
pub use options::CoordinatorOptions;
pub use rpc_client::ConnectError;
pub use rpc_client::KvRpcClient;
pub use wiring::start_coordinator;
pub use wiring::Coordinator;
pub use wiring::CoordinatorConfig;
pub use wiring::CoordinatorCreationError;
