//! Client identities and the router-owned membership set.

use std::{collections::HashMap, fmt, net::SocketAddr};

use thiserror::Error;

use crate::{
    mailbox::{DeliveryError, Mailbox},
    protocol::Frame,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the router keeps for one connection: who it is and where its frames go.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    peer: SocketAddr,
    mailbox: Mailbox,
}

impl ClientHandle {
    pub fn new(id: ClientId, peer: SocketAddr, mailbox: Mailbox) -> Self {
        Self { id, peer, mailbox }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn deliver(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.mailbox.try_deliver(frame)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("client is already registered")]
    AlreadyRegistered,
    #[error("name '{0}' is held by another client")]
    NameTaken(String),
}

#[derive(Debug)]
pub struct Member {
    pub name: String,
    pub client: ClientHandle,
}

/// Authenticated clients, keyed by id. Names are unique across members.
#[derive(Debug, Default)]
pub struct Registry {
    members: HashMap<ClientId, Member>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, client: ClientHandle, name: String) -> Result<(), RegisterError> {
        if self.members.contains_key(&client.id()) {
            return Err(RegisterError::AlreadyRegistered);
        }
        if self.find_by_name(&name).is_some() {
            return Err(RegisterError::NameTaken(name));
        }
        self.members.insert(client.id(), Member { name, client });
        Ok(())
    }

    pub fn remove(&mut self, id: ClientId) -> Option<Member> {
        self.members.remove(&id)
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn name_of(&self, id: ClientId) -> Option<&str> {
        self.members.get(&id).map(|member| member.name.as_str())
    }

    pub fn find_by_name(&self, name: &str) -> Option<&ClientHandle> {
        self.members
            .values()
            .find(|member| member.name == name)
            .map(|member| &member.client)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClientId, &Member)> {
        self.members.iter().map(|(id, member)| (*id, member))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
