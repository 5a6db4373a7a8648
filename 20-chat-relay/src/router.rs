//! The message router.
//!
//! A single task owns the [`Registry`] and applies [`RouterEvent`]s one at a
//! time, so membership needs no locking. Connection tasks only ever talk to it
//! through a [`RouterHandle`]. Outcomes go back to senders via the
//! [`StatusNotifier`](crate::notifier::StatusNotifier), and every mailbox push
//! is fail-fast: a recipient that cannot take a frame right now is dropped.

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    notifier::{StatusNotifier, StatusSender},
    protocol::{Frame, StatusCode},
    registry::{ClientHandle, ClientId, Registry},
};

#[derive(Debug)]
pub enum RouterEvent {
    /// Claim `name` for `client` and enter the registry.
    Register { client: ClientHandle, name: String },
    Unregister { client: ClientId },
    Broadcast { sender: ClientHandle, text: String },
    Direct {
        sender: ClientHandle,
        to: String,
        text: String,
    },
    List { client: ClientHandle },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("router has shut down")]
pub struct RouterClosed;

/// Cloneable producer side of the router queue.
#[derive(Debug, Clone)]
pub struct RouterHandle {
    events: mpsc::UnboundedSender<RouterEvent>,
}

impl RouterHandle {
    pub fn new(events: mpsc::UnboundedSender<RouterEvent>) -> Self {
        Self { events }
    }

    pub fn register(&self, client: &ClientHandle, name: String) -> Result<(), RouterClosed> {
        self.send(RouterEvent::Register {
            client: client.clone(),
            name,
        })
    }

    pub fn unregister(&self, client: ClientId) -> Result<(), RouterClosed> {
        self.send(RouterEvent::Unregister { client })
    }

    pub fn broadcast(&self, sender: &ClientHandle, text: String) -> Result<(), RouterClosed> {
        self.send(RouterEvent::Broadcast {
            sender: sender.clone(),
            text,
        })
    }

    pub fn direct(
        &self,
        sender: &ClientHandle,
        to: String,
        text: String,
    ) -> Result<(), RouterClosed> {
        self.send(RouterEvent::Direct {
            sender: sender.clone(),
            to,
            text,
        })
    }

    pub fn list(&self, client: &ClientHandle) -> Result<(), RouterClosed> {
        self.send(RouterEvent::List {
            client: client.clone(),
        })
    }

    fn send(&self, event: RouterEvent) -> Result<(), RouterClosed> {
        self.events.send(event).map_err(|_| RouterClosed)
    }
}

pub struct Router {
    events: mpsc::UnboundedReceiver<RouterEvent>,
    registry: Registry,
    status: StatusSender,
}

impl Router {
    pub fn new(events: mpsc::UnboundedReceiver<RouterEvent>, status: StatusSender) -> Self {
        Self {
            events,
            registry: Registry::new(),
            status,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            self.apply(event);
        }
        debug!("router queue closed; router stopping");
    }

    /// Applies one event. Never awaits.
    pub fn apply(&mut self, event: RouterEvent) {
        match event {
            RouterEvent::Register { client, name } => self.register(client, name),
            RouterEvent::Unregister { client } => self.unregister(client),
            RouterEvent::Broadcast { sender, text } => self.broadcast(&sender, text),
            RouterEvent::Direct { sender, to, text } => self.direct(&sender, &to, text),
            RouterEvent::List { client } => self.list(&client),
        }
    }

    fn register(&mut self, client: ClientHandle, name: String) {
        let target = client.clone();
        match self.registry.insert(client, name.clone()) {
            Ok(()) => {
                info!(
                    client = %target.id(),
                    peer = %target.peer(),
                    %name,
                    total_clients = self.registry.len(),
                    "client joined"
                );
                self.status.notify(&target, StatusCode::Authenticated);
            }
            Err(err) => {
                debug!(client = %target.id(), %name, error = %err, "registration refused");
                self.status.notify(&target, StatusCode::Rejected);
            }
        }
    }

    fn unregister(&mut self, client: ClientId) {
        if let Some(member) = self.registry.remove(client) {
            member.client.mailbox().close();
            info!(
                %client,
                name = %member.name,
                total_clients = self.registry.len(),
                "client left"
            );
        }
    }

    fn broadcast(&mut self, sender: &ClientHandle, text: String) {
        let Some(from) = self.registry.name_of(sender.id()) else {
            self.status.notify(sender, StatusCode::NotAuthenticated);
            return;
        };
        let frame = Frame::Msg {
            from: from.to_string(),
            text,
        };

        let mut delivered = 0usize;
        let mut dropped = Vec::new();
        for (id, member) in self.registry.iter() {
            if id == sender.id() {
                continue;
            }
            match member.client.deliver(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(client = %id, name = %member.name, error = %err, "recipient cannot keep up; dropping");
                    dropped.push(id);
                }
            }
        }
        for id in dropped {
            self.unregister(id);
        }

        let code = if delivered > 0 {
            StatusCode::Delivered
        } else {
            StatusCode::NoRecipients
        };
        debug!(client = %sender.id(), delivered, "broadcast routed");
        self.status.notify(sender, code);
    }

    fn direct(&mut self, sender: &ClientHandle, to: &str, text: String) {
        let Some(from) = self.registry.name_of(sender.id()) else {
            self.status.notify(sender, StatusCode::NotAuthenticated);
            return;
        };
        let Some(recipient) = self.registry.find_by_name(to) else {
            self.status.notify(sender, StatusCode::RecipientNotFound);
            return;
        };

        let frame = Frame::Msg {
            from: from.to_string(),
            text,
        };
        match recipient.deliver(frame) {
            Ok(()) => self.status.notify(sender, StatusCode::Delivered),
            Err(err) => {
                let recipient = recipient.id();
                warn!(client = %recipient, name = %to, error = %err, "recipient cannot keep up; dropping");
                self.status.notify(sender, StatusCode::DeliveryFailed);
                self.unregister(recipient);
            }
        }
    }

    fn list(&mut self, client: &ClientHandle) {
        if !self.registry.contains(client.id()) {
            self.status.notify(client, StatusCode::NotAuthenticated);
            return;
        }
        let mut names: Vec<String> = self
            .registry
            .iter()
            .filter(|(id, _)| *id != client.id())
            .map(|(_, member)| member.name.clone())
            .collect();
        names.sort();

        if let Err(err) = client.deliver(Frame::Users(names)) {
            warn!(client = %client.id(), error = %err, "list reply undeliverable; dropping client");
            self.unregister(client.id());
        }
    }
}

/// Producer handles for a running router/notifier pair.
#[derive(Debug, Clone)]
pub struct Relay {
    pub router: RouterHandle,
    pub status: StatusSender,
}

/// Spawns the router and status notifier loops on the current runtime.
///
/// Both loops stop once every handle in the returned [`Relay`] (and its
/// clones) has been dropped.
pub fn spawn_relay() -> Relay {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = mpsc::unbounded_channel();
    let status = StatusSender::new(status_tx);

    let router = Router::new(events_rx, status.clone());
    let notifier = StatusNotifier::new(status_rx, events_tx.downgrade());
    tokio::spawn(router.run());
    tokio::spawn(notifier.run());

    Relay {
        router: RouterHandle::new(events_tx),
        status,
    }
}
