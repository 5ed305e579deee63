//! Cooperative cancellation over a one-slot channel.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::cell::Cell;
use std::time::Duration;

/// Create a connected source/token pair
///
/// Dropping every source also cancels the token, so a loop never outlives
/// whoever could have stopped it.
pub fn cancellation() -> (CancelSource, CancelToken) {
    let (tx, rx) = bounded(1);
    (
        CancelSource { tx },
        CancelToken {
            rx,
            fired: Cell::new(false),
        },
    )
}

/// Requests cancellation; cheap to clone into signal handlers
#[derive(Debug, Clone)]
pub struct CancelSource {
    tx: Sender<()>,
}

impl CancelSource {
    pub fn cancel(&self) {
        // A full slot means cancellation is already pending.
        let _ = self.tx.try_send(());
    }
}

/// Observes cancellation; owned by the thread that polls it
#[derive(Debug)]
pub struct CancelToken {
    rx: Receiver<()>,
    fired: Cell<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        if self.fired.get() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                self.fired.set(true);
                true
            }
            Err(TryRecvError::Empty) => false,
        }
    }

    /// Block for up to `timeout`; true when cancelled meanwhile
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.fired.get() {
            return true;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.fired.set(true);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}
