use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("chat_relay");
    let dir = tempfile::tempdir()?;
    let accounts = dir.path().join("account.json");

    let (mut server_child, mut server_stdout) = spawn_server(&binary, &accounts).await?;
    let addr = read_server_addr(&mut server_stdout).await?;

    // Drain additional relay logs in the background so the pipe never fills.
    let server_log_task = tokio::spawn(async move {
        drain_stdout(server_stdout).await;
    });

    let mut alice = spawn_client(&binary, &addr).await?;
    let mut bob = spawn_client(&binary, &addr).await?;

    alice.login("alice").await?;
    bob.login("bob").await?;

    // Alice broadcasts; Bob hears it and Alice gets the delivery status.
    alice.send_line("/broadcast hi").await?;
    let bob_hears_alice = read_line_expect(&mut bob.stdout, "waiting for bob to hear alice").await?;
    assert_eq!(bob_hears_alice, "<alice> hi");
    let alice_status = read_line_expect(&mut alice.stdout, "waiting for broadcast status").await?;
    assert_eq!(alice_status, "*** delivered");

    // Bob whispers to someone who is not here.
    bob.send_line("/chat carol hello").await?;
    let bob_status = read_line_expect(&mut bob.stdout, "waiting for chat status").await?;
    assert_eq!(bob_status, "*** recipient not found");

    bob.send_line("/chat alice psst").await?;
    let alice_hears_bob = read_line_expect(&mut alice.stdout, "waiting for whisper").await?;
    assert_eq!(alice_hears_bob, "<bob> psst");
    let bob_status = read_line_expect(&mut bob.stdout, "waiting for whisper status").await?;
    assert_eq!(bob_status, "*** delivered");

    bob.send_line("/list").await?;
    let roster = read_line_expect(&mut bob.stdout, "waiting for roster").await?;
    assert_eq!(roster, "*** online: alice");

    alice.send_line("/quit").await?;
    let alice_quit = read_line_expect(&mut alice.stdout, "waiting for alice to quit").await?;
    assert_eq!(alice_quit, "*** leaving chat");
    bob.send_line("/quit").await?;
    let bob_quit = read_line_expect(&mut bob.stdout, "waiting for bob to quit").await?;
    assert_eq!(bob_quit, "*** leaving chat");

    ensure_success(&mut alice.child, "alice client").await?;
    ensure_success(&mut bob.child, "bob client").await?;

    // The relay has no shutdown command; terminate it manually.
    let _ = server_child.kill().await;
    let _ = server_child.wait().await;
    let _ = server_log_task.await;

    let stored = std::fs::read_to_string(&accounts)?;
    assert!(stored.contains("\"alice\""));
    assert!(stored.contains("\"bob\""));

    Ok(())
}

struct ClientProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ClientProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn login(&mut self, name: &str) -> Result<()> {
        self.send_line(&format!("/register {name} secret")).await?;
        let registered = read_line_expect(&mut self.stdout, "waiting for registration").await?;
        assert_eq!(registered, "*** registered");

        self.send_line(&format!("/login {name} secret")).await?;
        let authenticated = read_line_expect(&mut self.stdout, "waiting for login").await?;
        assert_eq!(authenticated, "*** authenticated");
        Ok(())
    }
}

async fn spawn_server(binary: &Path, accounts: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("server")
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg("0")
        .arg("--accounts")
        .arg(accounts)
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn relay")?;
    let stdout = child
        .stdout
        .take()
        .context("relay stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_server_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    let line = read_line(reader)
        .await?
        .context("relay did not emit listening address")?;
    let trimmed = line.trim();
    let addr = trimmed
        .split_whitespace()
        .last()
        .context("unexpected relay banner format")?;
    if !addr.contains(':') {
        return Err(anyhow!("relay banner missing socket: {trimmed}"));
    }
    Ok(addr.to_string())
}

async fn spawn_client(binary: &Path, addr: &str) -> Result<ClientProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("client")
        .arg("--server")
        .arg(addr)
        .env("RUST_LOG", "warn")
        .env("NO_COLOR", "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn client")?;

    let stdin = child
        .stdin
        .take()
        .context("client stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("client stdout missing after spawn")?;

    let mut process = ClientProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    };

    let banner = read_line_expect(&mut process.stdout, "waiting for connect banner").await?;
    if banner != format!("*** connected to {addr}") {
        return Err(anyhow!("unexpected connect banner '{banner}'"));
    }

    Ok(process)
}

async fn read_line_expect(
    reader: &mut BufReader<ChildStdout>,
    description: &str,
) -> Result<String> {
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let bytes = match timeout(READ_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(result) => result?,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    if bytes == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while let Ok(bytes) = reader.read_line(&mut buffer).await {
        if bytes == 0 {
            break;
        }
        buffer.clear();
    }
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = child
        .wait()
        .await
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
