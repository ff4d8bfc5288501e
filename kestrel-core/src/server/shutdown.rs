//! cooperative shutdown plumbing
use tokio::sync::broadcast;

/// Listens for the server shutdown signal.
///
/// Shutdown is signalled when the paired `broadcast::Sender` is
/// dropped; every task holding a `Shutdown` then unblocks. A task also
/// holds a clone of the shutdown-complete mpsc sender so the server can
/// wait for all tasks to finish draining.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` once the signal has been received
    is_shutdown: bool,
    /// channel used to listen for the signal
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    /// new `Shutdown` backed by the given receiver
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify,
        }
    }

    /// has the signal been received
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// wait for the shutdown notice, if one hasn't already arrived
    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }
        // Err(Closed) also counts as a shutdown notice
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}
