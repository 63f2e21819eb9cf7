use crate::coordinator::{self, AdminCommand, AdminError, DispatcherClient, Operation, SharedMetadata};

/// Value returned in place of a real value when no replica could serve the request.
pub const UNAVAILABLE: &str = "unavailable";

#[derive(Debug, thiserror::Error)]
pub enum FrontEndError {
    #[error("Invalid admin command: {0}")]
    Admin(#[from] AdminError),
    // Dispatcher runs on a background task. This error is returned if the task has exited.
    #[error("Dispatcher task has exited")]
    DispatcherExited,
}

/// KvFrontEnd is the client-facing side of the coordinator. Each call blocks until a replica has
/// answered or the key is found unavailable.
#[derive(Clone)]
pub struct KvFrontEnd {
    logger: slog::Logger,
    dispatcher: DispatcherClient,
    metadata: SharedMetadata,
}

impl KvFrontEnd {
    pub(crate) fn new(logger: slog::Logger, dispatcher: DispatcherClient, metadata: SharedMetadata) -> Self {
        KvFrontEnd {
            logger,
            dispatcher,
            metadata,
        }
    }

    /// Reads `key`. Keys starting with `CMD` that form a valid admin command run that command
    /// instead.
    pub async fn get(&self, key: String) -> Result<String, FrontEndError> {
        if let Some(command) = AdminCommand::parse(&key) {
            let command = command?;
            slog::info!(self.logger, "Admin command {:?}", command);
            return Ok(coordinator::execute_admin_command(&self.logger, &self.metadata, command).await);
        }

        self.submit(key, Operation::Get).await
    }

    pub async fn put(&self, key: String, value: String) -> Result<String, FrontEndError> {
        self.submit(key, Operation::Put { value }).await
    }

    /// Sets `key` to `new_value` if it currently holds `test_value`. Returns the value held
    /// afterwards either way.
    pub async fn test_set(&self, key: String, test_value: String, new_value: String) -> Result<String, FrontEndError> {
        self.submit(key, Operation::TestSet { test_value, new_value }).await
    }

    async fn submit(&self, key: String, operation: Operation) -> Result<String, FrontEndError> {
        let mut response = self
            .dispatcher
            .submit(key.clone(), operation)
            .await
            .map_err(|_| FrontEndError::DispatcherExited)?;

        if response.unavailable {
            return Ok(UNAVAILABLE.to_string());
        }
        let value = response
            .values
            .remove(&key)
            .map(|versioned| versioned.value)
            .unwrap_or_else(|| UNAVAILABLE.to_string());

        Ok(value)
    }
}
