//! Multi-client text chat relay.
//!
//! Clients connect over TCP, register or log in against a flat account file,
//! and exchange broadcast or direct messages through a single router task.
//!
//! - [`router`] owns the set of authenticated clients and decides who gets
//!   what. It is the only place membership changes.
//! - [`notifier`] delivers `/status` outcome codes on its own queue so a slow
//!   sender never stalls routing.
//! - [`mailbox`] is the bounded per-client outbound queue. Pushes never wait;
//!   a client whose mailbox is full is disconnected.
//! - [`registry`] holds client handles and enforces unique names.
//! - [`server`] accepts connections and runs the reader/writer task pair for
//!   each one.
//! - [`accounts`] reads and rewrites the JSON account file.
//! - [`protocol`] parses command lines and renders outbound frames.
//! - [`cli`] and [`client`] provide the binary's server and terminal modes.

pub mod accounts;
pub mod cli;
pub mod client;
pub mod mailbox;
pub mod notifier;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
