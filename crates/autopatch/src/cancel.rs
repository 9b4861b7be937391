//! Run cancellation.
//!
//! The binary flips the handle on SIGINT/SIGTERM; tests flip it directly.
//! The orchestrator races each stage against `CancelToken::cancelled`.

use tokio::sync::watch;

/// Triggers cancellation
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observes cancellation
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
    // Keeps the channel open for tokens that can never fire
    _keepalive: Option<watch::Sender<bool>>,
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (
        CancelHandle { tx },
        CancelToken {
            rx,
            _keepalive: None,
        },
    )
}

impl CancelToken {
    /// Token that is never cancelled
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(tx),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if the handle
    /// is dropped without cancelling
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
