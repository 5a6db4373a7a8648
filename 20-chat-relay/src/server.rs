use std::{
    future::Future,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    accounts::{AccountStore, AuthOutcome},
    mailbox::{DEFAULT_CAPACITY, Inbox, mailbox},
    protocol::{Command, READ_BUFFER, StatusCode},
    registry::{ClientHandle, ClientId},
    router::{Relay, RouterHandle, spawn_relay},
};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// JSON file holding the name to secret mapping.
    pub accounts: PathBuf,
    /// Frames a client may have queued before it is dropped.
    pub mailbox_capacity: usize,
    /// Accept `/connect <name>` without an account.
    pub open_connect: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            accounts: PathBuf::from("account.json"),
            mailbox_capacity: DEFAULT_CAPACITY,
            open_connect: false,
        }
    }
}

pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl Server {
    /// Wraps a bound listener and starts the router and notifier loops.
    /// Must be called from within a Tokio runtime.
    pub fn new(listener: TcpListener, config: ServerConfig) -> Self {
        Self {
            listener,
            state: Arc::new(ServerState::new(config)),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, state } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("relay shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<ServerState>,
) {
    match result {
        Ok((stream, peer)) => spawn_connection(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection(stream: TcpStream, peer: SocketAddr, state: &Arc<ServerState>) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, peer, state).await {
            warn!(peer = %peer, error = ?err, "connection closed with error");
        }
    });
}

struct ServerState {
    relay: Relay,
    accounts: AccountStore,
    mailbox_capacity: usize,
    open_connect: bool,
    next_id: AtomicU64,
}

impl ServerState {
    fn new(config: ServerConfig) -> Self {
        Self {
            relay: spawn_relay(),
            accounts: AccountStore::open(config.accounts),
            mailbox_capacity: config.mailbox_capacity.max(1),
            open_connect: config.open_connect,
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> ClientId {
        ClientId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
) -> Result<()> {
    let id = state.next_id();
    let (mailbox, inbox) = mailbox(state.mailbox_capacity);
    let client = ClientHandle::new(id, peer, mailbox);
    info!(client = %id, %peer, "connection accepted");

    let (reader, writer) = stream.into_split();
    let writer_task = tokio::spawn(run_writer(
        writer,
        inbox,
        client.clone(),
        state.relay.router.clone(),
    ));

    let mut reader = BufReader::new(reader);
    let result = run_reader(&mut reader, &client, &state).await;

    // Whatever ended the session, the router is the one that forgets us.
    if let Err(err) = state.relay.router.unregister(id) {
        debug!(client = %id, error = %err, "could not request unregistration");
    }
    client.mailbox().close();
    if let Err(err) = writer_task.await {
        debug!(client = %id, error = %err, "writer task failed");
    }
    info!(client = %id, %peer, "connection closed");

    result
}

async fn run_reader<R>(reader: &mut R, client: &ClientHandle, state: &ServerState) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_BUFFER);
    loop {
        buf.clear();
        let mut limited = (&mut *reader).take(READ_BUFFER as u64);
        let read = select! {
            biased;
            _ = client.mailbox().closed() => {
                debug!(client = %client.id(), "mailbox closed; ending session");
                return Ok(());
            }
            read = limited.read_until(b'\n', &mut buf) => read,
        };

        if read? == 0 {
            debug!(client = %client.id(), "peer closed the connection");
            return Ok(());
        }
        match std::str::from_utf8(&buf) {
            Ok(line) => {
                debug!(client = %client.id(), line = %line.trim_end(), "received");
                handle_line(line, client, state).await?;
            }
            Err(err) => {
                debug!(client = %client.id(), error = %err, "line is not valid UTF-8");
                state.relay.status.notify(client, StatusCode::Malformed);
            }
        }
    }
}

async fn handle_line(line: &str, client: &ClientHandle, state: &ServerState) -> Result<()> {
    let status = &state.relay.status;
    let router = &state.relay.router;

    let command = match Command::parse(line) {
        Ok(command) => command,
        Err(err) => {
            debug!(client = %client.id(), error = %err, "malformed command");
            status.notify(client, StatusCode::Malformed);
            return Ok(());
        }
    };

    match command {
        Command::Register { name, secret } => {
            let code = match state.accounts.register(&name, &secret).await {
                Ok(AuthOutcome::Registered) => StatusCode::Registered,
                Ok(_) => StatusCode::NameTaken,
                Err(err) => {
                    warn!(client = %client.id(), error = %err, "account store unavailable");
                    StatusCode::StoreUnavailable
                }
            };
            status.notify(client, code);
        }
        Command::Login { name, secret } => {
            match state.accounts.authenticate(&name, &secret).await {
                Ok(AuthOutcome::Authenticated) => router.register(client, name)?,
                Ok(_) => status.notify(client, StatusCode::Rejected),
                Err(err) => {
                    warn!(client = %client.id(), error = %err, "account store unavailable");
                    status.notify(client, StatusCode::StoreUnavailable);
                }
            }
        }
        Command::Connect { name } => {
            if state.open_connect {
                router.register(client, name)?;
            } else {
                status.notify(client, StatusCode::Rejected);
            }
        }
        Command::Broadcast { text } => router.broadcast(client, text)?,
        Command::Chat { to, text } => router.direct(client, to, text)?,
        Command::List => router.list(client)?,
    }

    Ok(())
}

async fn run_writer<W>(mut writer: W, mut inbox: Inbox, client: ClientHandle, router: RouterHandle)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = inbox.next().await {
        let mut encoded = frame.to_string();
        encoded.push('\n');
        // A peer that stops reading blocks the write; closing the mailbox must
        // still end this task.
        let written = select! {
            biased;
            _ = client.mailbox().closed() => {
                debug!(client = %client.id(), "mailbox closed during write; dropping socket");
                return;
            }
            written = writer.write_all(encoded.as_bytes()) => written,
        };
        if let Err(err) = written {
            debug!(client = %client.id(), ?err, "failed to write frame");
            client.mailbox().close();
            if let Err(err) = router.unregister(client.id()) {
                debug!(client = %client.id(), error = %err, "could not request unregistration");
            }
            break;
        }
    }

    if let Err(err) = writer.shutdown().await {
        debug!(client = %client.id(), ?err, "failed to shut down writer");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{io::duplex, sync::mpsc, time::timeout};

    use super::*;
    use crate::protocol::Frame;

    fn client(capacity: usize) -> (ClientHandle, Inbox) {
        let (mailbox, inbox) = mailbox(capacity);
        let handle = ClientHandle::new(
            ClientId::new(1),
            "127.0.0.1:0".parse().expect("valid addr"),
            mailbox,
        );
        (handle, inbox)
    }

    #[tokio::test]
    async fn writer_stops_on_close_while_peer_is_not_reading() {
        let (events, _events_rx) = mpsc::unbounded_channel();
        let (client, inbox) = client(4);
        // Tiny pipe and a peer that never reads: the write below cannot finish.
        let (writer, _peer) = duplex(64);
        let task = tokio::spawn(run_writer(
            writer,
            inbox,
            client.clone(),
            RouterHandle::new(events),
        ));

        client
            .deliver(Frame::Msg {
                from: "alice".into(),
                text: "x".repeat(1000),
            })
            .expect("frame fits");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished(), "writer should be stuck on the full pipe");

        client.mailbox().close();
        timeout(Duration::from_secs(1), task)
            .await
            .expect("writer should stop once the mailbox closes")
            .expect("writer task");
    }

    #[tokio::test]
    async fn writer_reports_broken_pipe_to_router() {
        let (events, mut events_rx) = mpsc::unbounded_channel();
        let (client, inbox) = client(4);
        let (writer, peer) = duplex(64);
        drop(peer);
        let task = tokio::spawn(run_writer(
            writer,
            inbox,
            client.clone(),
            RouterHandle::new(events),
        ));

        client
            .deliver(Frame::Status(StatusCode::Delivered))
            .expect("frame fits");
        timeout(Duration::from_secs(1), task)
            .await
            .expect("writer should stop on write error")
            .expect("writer task");

        assert!(client.mailbox().is_closed());
        assert!(matches!(
            events_rx.try_recv(),
            Ok(crate::router::RouterEvent::Unregister { .. })
        ));
    }
}
