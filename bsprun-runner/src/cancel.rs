// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cooperative cancellation.
//!
//! A [`CancelSource`] fires once; every [`CancelToken`] created from it observes the
//! cancellation. Nothing is aborted forcibly: holders of a token check it at their own
//! suspension points.

use std::sync::Arc;
use tokio::sync::watch;

/// The sending half of a cancellation signal.
#[derive(Clone, Debug)]
pub struct CancelSource {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelSource {
    /// Creates a new, not yet cancelled, source.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Returns a token observing this source.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            receiver: self.sender.subscribe(),
        }
    }

    /// Fires the cancellation. Calling this more than once has no further effect.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns true if [`Self::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// The receiving half of a cancellation signal.
#[derive(Clone, Debug)]
pub struct CancelToken {
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    /// Returns a token that is never cancelled.
    pub fn never() -> Self {
        let (_, receiver) = watch::channel(false);
        Self { receiver }
    }

    /// Returns true if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Completes once cancellation has been requested.
    ///
    /// If the source is dropped without being cancelled, this never completes.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
