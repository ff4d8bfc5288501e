use tokio::sync::broadcast;

/// Listens for the shutdown notification from the engine owner.
/// Once the broadcast sender is dropped, `recv` resolves and the
/// listener task exits.
pub(crate) struct Shutdown {
    is_shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub(crate) fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify,
        }
    }

    pub(crate) async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }
        // the only error is Closed, which also means shut down
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}
