use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    select,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};
use tracing::{info, warn};

use crate::{cli::ClientArgs, message::TranscriptLine};

type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn run(args: ClientArgs) -> Result<()> {
    let socket = establish_connection(&args.server).await?;
    write_stdout(&format!("*** connected to {}", args.server)).await?;

    let (mut writer, mut reader) = socket.split();
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    loop {
        input.clear();
        select! {
            frame = reader.next() => {
                if !handle_server_frame(frame).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(&mut input) => {
                match handle_stdin_input(bytes_read, &input, args.speaker.as_deref()).await? {
                    StdinAction::Send(frame) => {
                        writer.send(frame).await.context("failed to send message")?;
                    }
                    StdinAction::Skip => {}
                    StdinAction::Quit => break,
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }

    if let Err(error) = writer.close().await {
        warn!(?error, "failed to close connection cleanly");
    }

    Ok(())
}

async fn establish_connection(server: &str) -> Result<RelaySocket> {
    let (socket, _response) = connect_async(server)
        .await
        .with_context(|| format!("failed to connect to {server}"))?;
    info!("connected to {server}");
    Ok(socket)
}

async fn handle_server_frame(frame: Option<Result<Message, tungstenite::Error>>) -> Result<bool> {
    match frame {
        Some(Ok(Message::Text(text))) => {
            write_stdout(&render_text(text.as_str())).await?;
            Ok(true)
        }
        Some(Ok(Message::Binary(bytes))) => {
            write_stdout(&format!("*** {} binary bytes", bytes.len())).await?;
            Ok(true)
        }
        Some(Ok(Message::Close(_))) | None => {
            write_stdout("*** server closed the connection").await?;
            Ok(false)
        }
        Some(Ok(_)) => Ok(true),
        Some(Err(err)) => Err(err).context("connection to relay failed"),
    }
}

#[derive(Debug, PartialEq)]
enum StdinAction {
    Send(Message),
    Skip,
    Quit,
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    speaker: Option<&str>,
) -> Result<StdinAction> {
    if bytes_read? == 0 {
        return Ok(StdinAction::Quit);
    }

    let text = input.trim_end_matches(['\r', '\n']);
    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving relay").await?;
        return Ok(StdinAction::Quit);
    }

    outgoing_frame(text, speaker)
}

/// Plain lines go out verbatim, empty ones included. Speaker lines are
/// wrapped in a transcript envelope and blank ones are skipped.
fn outgoing_frame(text: &str, speaker: Option<&str>) -> Result<StdinAction> {
    match speaker {
        Some(_) if text.trim().is_empty() => Ok(StdinAction::Skip),
        Some(speaker) => {
            let line = TranscriptLine::now(speaker, text.trim()).encode()?;
            Ok(StdinAction::Send(Message::text(line)))
        }
        None => Ok(StdinAction::Send(Message::text(text))),
    }
}

fn render_text(text: &str) -> String {
    match TranscriptLine::decode(text) {
        Some(line) => format!("{}: {}", line.speaker, line.text),
        None => text.to_string(),
    }
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_sent_verbatim() {
        let frame = outgoing_frame("  spaced  ", None).expect("frame");
        assert_eq!(frame, StdinAction::Send(Message::text("  spaced  ")));
    }

    #[test]
    fn empty_plain_line_is_still_sent() {
        let frame = outgoing_frame("", None).expect("frame");
        assert_eq!(frame, StdinAction::Send(Message::text("")));
    }

    #[test]
    fn speaker_lines_are_wrapped() {
        let frame = outgoing_frame("hello there", Some("Agent")).expect("frame");
        let StdinAction::Send(Message::Text(text)) = frame else {
            panic!("expected text frame");
        };
        let line = TranscriptLine::decode(text.as_str()).expect("transcript");
        assert_eq!(line.speaker, "Agent");
        assert_eq!(line.text, "hello there");
    }

    #[test]
    fn blank_speaker_lines_are_dropped() {
        assert_eq!(
            outgoing_frame("   ", Some("Agent")).expect("frame"),
            StdinAction::Skip
        );
    }

    #[test]
    fn transcript_lines_render_with_speaker() {
        let timestamped =
            r#"{"speaker": "Agent", "text": "hello", "timestamp": "2024-05-01 10:00:00"}"#;
        let untimed = r#"{"speaker": "Speaker 1", "text": "hello"}"#;
        assert_eq!(render_text(timestamped), "Agent: hello");
        assert_eq!(render_text(untimed), "Speaker 1: hello");
        assert_eq!(render_text("raw text"), "raw text");
    }
}
