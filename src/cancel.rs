use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("translation cancelled")]
pub struct Cancelled;

/// Caller-owned cancellation signal with an optional deadline. Cloned into
/// every in-flight service call.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    signal: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

impl Cancellation {
    /// A token that never fires.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn new() -> (CancelHandle, Self) {
        let (sender, receiver) = watch::channel(false);
        (
            CancelHandle { sender },
            Self {
                signal: Some(receiver),
                deadline: None,
            },
        )
    }

    /// Adds a deadline `timeout` from now. An earlier deadline is kept; a
    /// timeout too large to represent adds none.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self;
        };
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn is_cancelled(&self) -> bool {
        let signalled = self
            .signal
            .as_ref()
            .map(|receiver| *receiver.borrow())
            .unwrap_or(false);
        let expired = self
            .deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false);
        signalled || expired
    }

    /// Resolves once the handle fires or the deadline passes.
    pub async fn cancelled(&self) {
        let signal = async {
            let Some(mut receiver) = self.signal.clone() else {
                return std::future::pending::<()>().await;
            };
            loop {
                if *receiver.borrow_and_update() {
                    return;
                }
                if receiver.changed().await.is_err() {
                    // handle dropped without cancelling
                    return std::future::pending::<()>().await;
                }
            }
        };
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = signal => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => signal.await,
        }
    }

    /// Races `future` against cancellation. Cancellation observed before the
    /// first poll wins without starting the future.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, Cancelled> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Cancelled),
            output = future => Ok(output),
        }
    }
}
