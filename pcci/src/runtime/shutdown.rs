use std::sync::Arc;

use tokio::sync::watch;

/// Interrupt signal shared between the signal handler and a running worker.
///
/// Clones observe the same state. Cancellation is sticky: once cancelled a
/// token stays cancelled, and [`cancelled`](Self::cancelled) resolves
/// immediately for every later caller.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    state: Arc<watch::Sender<bool>>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// Mark the token cancelled and wake every waiter.
    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}
