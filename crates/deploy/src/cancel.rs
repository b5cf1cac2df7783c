//! Cooperative cancellation of a deployment run.

use tokio::sync::watch;

/// Raises the cancellation signal, e.g. from a Ctrl+C handler.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // Receivers may all be gone once the run has finished.
        let _ = self.tx.send(true);
    }
}

/// Observes the cancellation signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

/// Create a linked cancellation handle and signal.
pub fn cancellation() -> (CancelHandle, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, Cancellation { rx })
}

impl Cancellation {
    /// A signal that is never raised.
    pub fn never() -> Self {
        cancellation().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested. Never resolves if the handle is dropped first.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
