use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{cli::ClientArgs, protocol::Frame};

pub async fn run(args: ClientArgs) -> Result<()> {
    let target = args.target();
    let (mut reader, mut writer) = establish_connection(target).await?;
    write_stdout(&format!("*** connected to {target}")).await?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    run_client_loop(&mut reader, &mut writer, &mut stdin).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(target: &str) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(target)
        .await
        .with_context(|| format!("failed to connect to {target}"))?;

    info!("connected to {}", target);

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

async fn run_client_loop(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    stdin: &mut BufReader<tokio::io::Stdin>,
) -> Result<()> {
    let mut input = String::new();
    let mut incoming = String::new();
    loop {
        select! {
            bytes_read = reader.read_line(&mut incoming) => {
                if !handle_server_line(bytes_read, &incoming).await? {
                    break;
                }
                incoming.clear();
            }
            bytes_read = stdin.read_line(&mut input) => {
                if !handle_stdin_input(bytes_read, &input, writer).await? {
                    break;
                }
                input.clear();
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_line(bytes_read: io::Result<usize>, line: &str) -> Result<bool> {
    if bytes_read? == 0 {
        write_stdout("*** server closed the connection").await?;
        return Ok(false);
    }
    let line = line.trim_end();
    match Frame::parse(line) {
        Some(frame) => render_frame(frame).await?,
        None => write_stdout(line).await?,
    }
    Ok(true)
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    if bytes_read? == 0 {
        return Ok(false);
    }

    let text = input.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    writer.write_all(text.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn render_frame(frame: Frame) -> io::Result<()> {
    match frame {
        Frame::Msg { from, text } => write_stdout(&format!("<{from}> {text}")).await,
        Frame::Users(names) if names.is_empty() => {
            write_stdout("*** nobody else is online").await
        }
        Frame::Users(names) => write_stdout(&format!("*** online: {}", names.join(", "))).await,
        Frame::Status(code) => write_stdout(&format!("*** {code}")).await,
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
