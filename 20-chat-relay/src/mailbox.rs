//! Bounded per-client outbound queues.
//!
//! Every push is a `try_send`: a mailbox that is full or closed refuses the
//! frame immediately and the caller drops the recipient. Nothing that pushes
//! onto a mailbox ever awaits.

use std::sync::Arc;

use thiserror::Error;
use tokio::{
    select,
    sync::{mpsc, watch},
};

use crate::protocol::Frame;

/// Capacity used when none is configured.
pub const DEFAULT_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("mailbox is full")]
    Full,
    #[error("mailbox is closed")]
    Closed,
}

/// Producer side of a client's queue. Clones share the same queue.
#[derive(Debug, Clone)]
pub struct Mailbox {
    frames: mpsc::Sender<Frame>,
    closed: Arc<watch::Sender<bool>>,
}

/// Consumer side, drained by the connection's writer task.
#[derive(Debug)]
pub struct Inbox {
    frames: mpsc::Receiver<Frame>,
    closed: watch::Receiver<bool>,
}

/// Creates a mailbox holding at most `capacity` undelivered frames.
///
/// # Panics
/// Panics if `capacity` is zero.
pub fn mailbox(capacity: usize) -> (Mailbox, Inbox) {
    let (frames_tx, frames_rx) = mpsc::channel(capacity);
    let (closed_tx, closed_rx) = watch::channel(false);
    (
        Mailbox {
            frames: frames_tx,
            closed: Arc::new(closed_tx),
        },
        Inbox {
            frames: frames_rx,
            closed: closed_rx,
        },
    )
}

impl Mailbox {
    pub fn try_deliver(&self, frame: Frame) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        self.frames.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Marks the mailbox closed. Returns `true` only for the call that
    /// performed the transition.
    pub fn close(&self) -> bool {
        self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.frames.is_closed()
    }

    /// Resolves once the mailbox has been closed.
    pub async fn closed(&self) {
        wait_closed(&mut self.closed.subscribe()).await;
    }
}

impl Inbox {
    /// Next frame to write, or `None` once the mailbox is closed. Frames still
    /// queued at close time are discarded. If every producer is dropped
    /// without closing, the queued frames are still handed out first.
    pub async fn next(&mut self) -> Option<Frame> {
        if *self.closed.borrow() {
            return None;
        }
        select! {
            biased;
            // `false` means the producers are gone; the branch is disabled and
            // `recv` drains what is left.
            true = wait_closed(&mut self.closed) => None,
            frame = self.frames.recv() => frame,
        }
    }
}

/// Returns `true` when the mailbox was closed, `false` when every producer
/// was dropped first.
async fn wait_closed(closed: &mut watch::Receiver<bool>) -> bool {
    closed.wait_for(|closed| *closed).await.is_ok()
}
