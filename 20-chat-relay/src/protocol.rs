//! Text-line wire protocol.
//!
//! Clients send one command per line, fields separated by single spaces.
//! The relay answers with `/msg`, `/users` and `/status` frames, also one per
//! line.

use std::fmt;

use thiserror::Error;

/// Upper bound on bytes consumed by a single inbound read.
pub const READ_BUFFER: usize = 4096;

/// A parsed inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register { name: String, secret: String },
    Login { name: String, secret: String },
    /// Announce-only login, no secret involved.
    Connect { name: String },
    Broadcast { text: String },
    Chat { to: String, text: String },
    List,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("'{0}' is missing arguments")]
    MissingArguments(&'static str),
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        let (verb, rest) = match line.split_once(' ') {
            Some((verb, rest)) => (verb, rest),
            None => (line, ""),
        };
        let args: Vec<&str> = rest.split(' ').filter(|arg| !arg.is_empty()).collect();

        match verb {
            "/register" => {
                let &[name, secret, ..] = args.as_slice() else {
                    return Err(ParseError::MissingArguments("/register"));
                };
                Ok(Command::Register {
                    name: name.to_string(),
                    secret: secret.to_string(),
                })
            }
            "/login" => {
                let &[name, secret, ..] = args.as_slice() else {
                    return Err(ParseError::MissingArguments("/login"));
                };
                Ok(Command::Login {
                    name: name.to_string(),
                    secret: secret.to_string(),
                })
            }
            "/connect" => match args.first() {
                Some(name) => Ok(Command::Connect {
                    name: name.to_string(),
                }),
                None => Err(ParseError::MissingArguments("/connect")),
            },
            "/broadcast" => {
                let text = rest.trim_start();
                if text.is_empty() {
                    return Err(ParseError::MissingArguments("/broadcast"));
                }
                Ok(Command::Broadcast {
                    text: text.to_string(),
                })
            }
            "/chat" => {
                let Some((to, text)) = rest.trim_start().split_once(' ') else {
                    return Err(ParseError::MissingArguments("/chat"));
                };
                let text = text.trim_start();
                if text.is_empty() {
                    return Err(ParseError::MissingArguments("/chat"));
                }
                Ok(Command::Chat {
                    to: to.to_string(),
                    text: text.to_string(),
                })
            }
            "/list" if args.is_empty() => Ok(Command::List),
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

/// Outcome codes carried by `/status` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Delivered,
    NoRecipients,
    Malformed,
    Authenticated,
    Registered,
    Rejected,
    NameTaken,
    NotAuthenticated,
    RecipientNotFound,
    DeliveryFailed,
    StoreUnavailable,
}

impl StatusCode {
    const ALL: [StatusCode; 11] = [
        StatusCode::Delivered,
        StatusCode::NoRecipients,
        StatusCode::Malformed,
        StatusCode::Authenticated,
        StatusCode::Registered,
        StatusCode::Rejected,
        StatusCode::NameTaken,
        StatusCode::NotAuthenticated,
        StatusCode::RecipientNotFound,
        StatusCode::DeliveryFailed,
        StatusCode::StoreUnavailable,
    ];

    pub fn code(self) -> u8 {
        match self {
            StatusCode::Delivered => 1,
            StatusCode::NoRecipients => 2,
            StatusCode::Malformed => 3,
            StatusCode::Authenticated => 4,
            StatusCode::Registered => 5,
            StatusCode::Rejected => 6,
            StatusCode::NameTaken => 7,
            StatusCode::NotAuthenticated => 8,
            StatusCode::RecipientNotFound => 9,
            StatusCode::DeliveryFailed => 10,
            StatusCode::StoreUnavailable => 11,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.code() == code)
    }

    pub fn label(self) -> &'static str {
        match self {
            StatusCode::Delivered => "delivered",
            StatusCode::NoRecipients => "no recipients",
            StatusCode::Malformed => "malformed command",
            StatusCode::Authenticated => "authenticated",
            StatusCode::Registered => "registered",
            StatusCode::Rejected => "rejected",
            StatusCode::NameTaken => "name taken",
            StatusCode::NotAuthenticated => "not authenticated",
            StatusCode::RecipientNotFound => "recipient not found",
            StatusCode::DeliveryFailed => "delivery failed",
            StatusCode::StoreUnavailable => "account store unavailable",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An outbound frame queued on a client's mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Msg { from: String, text: String },
    Users(Vec<String>),
    Status(StatusCode),
}

impl Frame {
    /// Reads a frame back from its wire form. Used by the interactive client.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        match verb {
            "/msg" => {
                let (from, text) = rest.split_once(' ').unwrap_or((rest, ""));
                Some(Frame::Msg {
                    from: from.to_string(),
                    text: text.to_string(),
                })
            }
            "/users" => Some(Frame::Users(
                rest.split_whitespace().map(str::to_string).collect(),
            )),
            "/status" => rest
                .trim()
                .parse()
                .ok()
                .and_then(StatusCode::from_code)
                .map(Frame::Status),
            _ => None,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Msg { from, text } => write!(f, "/msg {from} {text}"),
            Frame::Users(names) => {
                f.write_str("/users")?;
                for name in names {
                    write!(f, " {name}")?;
                }
                Ok(())
            }
            Frame::Status(code) => write!(f, "/status {}", code.code()),
        }
    }
}
