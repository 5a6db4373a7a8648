//! Status delivery loop.
//!
//! Outcome codes travel through their own queue so a slow sender can never
//! hold up the router. Delivery follows the mailbox policy: try once, and on
//! failure close the target and ask the router to forget it.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    protocol::{Frame, StatusCode},
    registry::ClientHandle,
    router::RouterEvent,
};

#[derive(Debug)]
pub struct StatusEvent {
    pub target: ClientHandle,
    pub code: StatusCode,
}

/// Producer side of the status queue. Never blocks.
#[derive(Debug, Clone)]
pub struct StatusSender {
    events: mpsc::UnboundedSender<StatusEvent>,
}

impl StatusSender {
    pub fn new(events: mpsc::UnboundedSender<StatusEvent>) -> Self {
        Self { events }
    }

    pub fn notify(&self, target: &ClientHandle, code: StatusCode) {
        let event = StatusEvent {
            target: target.clone(),
            code,
        };
        if self.events.send(event).is_err() {
            debug!(client = %target.id(), %code, "status notifier is gone; dropping status");
        }
    }
}

pub struct StatusNotifier {
    events: mpsc::UnboundedReceiver<StatusEvent>,
    router: mpsc::WeakUnboundedSender<RouterEvent>,
}

impl StatusNotifier {
    /// The router queue is held weakly so that the notifier alone does not
    /// keep the router alive.
    pub fn new(
        events: mpsc::UnboundedReceiver<StatusEvent>,
        router: mpsc::WeakUnboundedSender<RouterEvent>,
    ) -> Self {
        Self { events, router }
    }

    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            self.deliver(event);
        }
        debug!("status queue closed; notifier stopping");
    }

    pub fn deliver(&self, StatusEvent { target, code }: StatusEvent) {
        match target.deliver(Frame::Status(code)) {
            Ok(()) => debug!(client = %target.id(), %code, "status sent"),
            Err(err) => {
                warn!(client = %target.id(), %code, error = %err, "status undeliverable; dropping client");
                target.mailbox().close();
                if let Some(router) = self.router.upgrade() {
                    let _ = router.send(RouterEvent::Unregister { client: target.id() });
                }
            }
        }
    }
}
