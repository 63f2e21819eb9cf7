//! The coordinator: request dispatch, node connections, membership and replication. Everything in
//! here shares one `SharedMetadata` table.
mod admin;
mod connection;
mod dispatcher;
mod fan_in;
mod mailbox;
mod membership;
mod metadata;
mod replication;
#[cfg(test)]
mod test_utils;

pub use admin::AdminError;

pub(crate) use admin::execute as execute_admin_command;
pub(crate) use admin::AdminCommand;
pub(crate) use connection::{ConnectionSettings, NodeListener};
pub(crate) use dispatcher::create as create_dispatcher;
pub(crate) use dispatcher::{DispatcherClient, Operation};
pub(crate) use membership::create as create_membership_engine;
pub(crate) use metadata::SharedMetadata;
