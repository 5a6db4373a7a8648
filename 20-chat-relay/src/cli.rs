use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use clap::{Args, Parser, Subcommand};

use crate::{mailbox::DEFAULT_CAPACITY, server::ServerConfig};

pub const DEFAULT_PORT: u16 = 30000;
pub const LOCAL_RELAY: &str = "localhost:30000";
pub const REMOTE_RELAY: &str = "convo.southeastasia.azurecontainer.io:30000";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, accepting TCP connections.
    Server(ServerArgs),
    /// Connect to a relay and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Interface to bind.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// JSON file with registered accounts.
    #[arg(long, default_value = "account.json")]
    pub accounts: PathBuf,

    /// Frames a client may have waiting before it is disconnected.
    #[arg(long, default_value_t = DEFAULT_CAPACITY, value_parser = parse_capacity)]
    pub mailbox_capacity: usize,

    /// Allow `/connect <name>` to join without an account.
    #[arg(long)]
    pub open_connect: bool,
}

impl ServerArgs {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn config(&self) -> ServerConfig {
        ServerConfig {
            accounts: self.accounts.clone(),
            mailbox_capacity: self.mailbox_capacity,
            open_connect: self.open_connect,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Connect to a relay on this machine.
    #[arg(long, conflicts_with = "server")]
    pub local: bool,

    /// Relay address; defaults to the public relay.
    #[arg(long)]
    pub server: Option<String>,
}

impl ClientArgs {
    pub fn target(&self) -> &str {
        if self.local {
            return LOCAL_RELAY;
        }
        self.server.as_deref().unwrap_or(REMOTE_RELAY)
    }
}

fn parse_capacity(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("capacity must be at least 1".to_string()),
        Ok(capacity) => Ok(capacity),
        Err(err) => Err(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let cli = Cli::try_parse_from(["chat_relay", "server", "--port", "4000"]).unwrap();
        let Command::Server(args) = cli.command else {
            panic!("expected server command");
        };
        assert_eq!(args.listen_addr(), "0.0.0.0:4000".parse().unwrap());
        assert_eq!(args.mailbox_capacity, DEFAULT_CAPACITY);
        assert!(!args.open_connect);
    }

    #[test]
    fn zero_capacity_is_refused() {
        let result =
            Cli::try_parse_from(["chat_relay", "server", "--mailbox-capacity", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn client_target_selection() {
        let parse = |args: &[&str]| match Cli::try_parse_from(args).unwrap().command {
            Command::Client(args) => args,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(parse(&["chat_relay", "client", "--local"]).target(), LOCAL_RELAY);
        assert_eq!(parse(&["chat_relay", "client"]).target(), REMOTE_RELAY);
        assert_eq!(
            parse(&["chat_relay", "client", "--server", "10.0.0.2:9"]).target(),
            "10.0.0.2:9"
        );
        assert!(
            Cli::try_parse_from(["chat_relay", "client", "--local", "--server", "x:1"]).is_err()
        );
    }
}
