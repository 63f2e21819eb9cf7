use tokio::sync::watch;

pub(crate) fn shutdown_signal() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(());

    (ShutdownHandle { _tx: tx }, ShutdownSignal { rx })
}

/// Dropping the handle fires every clone of its signal.
pub(crate) struct ShutdownHandle {
    _tx: watch::Sender<()>,
}

#[derive(Clone)]
pub(crate) struct ShutdownSignal {
    rx: watch::Receiver<()>,
}

impl ShutdownSignal {
    pub(crate) async fn wait(mut self) {
        // We don't care if the handle sent a value or dropped.
        let _ = self.rx.changed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn dropping_handle_fires_every_clone() {
        let (handle, signal) = shutdown_signal();
        let other = signal.clone();

        drop(handle);

        tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .expect("Signal did not fire");
        tokio::time::timeout(Duration::from_secs(1), other.wait())
            .await
            .expect("Clone did not fire");
    }
}
