use tokio::sync::broadcast;

/// Listens for the server-wide shutdown signal.
///
/// Each connection task holds one of these; the signal fires when the
/// server's `broadcast::Sender` sends a value or is dropped.
pub struct Shutdown {
    is_shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify,
        }
    }

    /// True once the shutdown signal has been observed.
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// Wait for the shutdown signal.
    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }

        // Either a sent value or a closed channel means shutdown.
        let _ = self.notify.recv().await;

        self.is_shutdown = true;
    }
}
