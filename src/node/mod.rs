mod node;
mod store;

pub use node::run_storage_node;
pub use node::NodeExit;
pub use node::StorageNodeConfig;
pub use node::StorageNodeError;

// So coordinator tests can stand in for a node without a socket.
#[cfg(test)]
pub(crate) use store::KvStore;
