use anyhow::{anyhow, Context, Result};
use chat_relay_core::{ControlEvent, OutboundEvent, SYSTEM_SENDER};
use clap::{Args, Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval_at, timeout, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use crate::config::ServerArgs;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "chat-relay", version, about = "Presence-aware chat relay server and debug client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub server: ServerArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Join a running relay from the terminal
    Chat(ChatArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ChatArgs {
    /// Relay WebSocket URL
    #[arg(short, long, default_value = "ws://127.0.0.1:8080/chat")]
    pub url: String,

    /// Display name to announce
    #[arg(short, long, default_value = "Guest")]
    pub name: String,

    /// Seconds between heartbeats
    #[arg(long, default_value_t = 5)]
    pub heartbeat_secs: u64,
}

pub async fn run_chat_client(args: ChatArgs) -> Result<()> {
    let (ws_stream, _) = timeout(CONNECT_TIMEOUT, connect_async(args.url.as_str()))
        .await
        .map_err(|_| anyhow!("timed out connecting to {} - is the relay running?", args.url))?
        .with_context(|| format!("failed to connect to {}", args.url))?;
    let (mut write, mut read) = ws_stream.split();
    debug!(url = %args.url, "connected");

    let name = args.name.trim();
    let name = if name.is_empty() { "Guest" } else { name };
    send_json(&mut write, json!({ "type": "setName", "name": name })).await?;

    let period = Duration::from_secs(args.heartbeat_secs.max(1));
    let mut heartbeat = interval_at(Instant::now() + period, period);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<OutboundEvent>(text.as_str()) {
                        Ok(event) => {
                            if let Some(line) = render_event(&event) {
                                println!("{line}");
                            }
                        }
                        Err(err) => debug!(error = %err, "ignoring unexpected frame"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    println!("* disconnected from relay");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err).context("websocket receive failed"),
            },
            line = lines.next_line() => match line.context("failed to read stdin")? {
                Some(line) => {
                    let text = line.trim();
                    if text.is_empty() {
                        continue;
                    }
                    send_json(&mut write, json!({ "text": text })).await?;
                    send_json(&mut write, json!({ "type": "typing", "typing": false })).await?;
                }
                None => break,
            },
            _ = heartbeat.tick() => {
                send_json(&mut write, json!({ "type": "ping" })).await?;
            }
        }
    }

    let _ = write.close().await;
    Ok(())
}

async fn send_json<S>(write: &mut S, value: Value) -> Result<()>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    write
        .send(Message::Text(value.to_string().into()))
        .await
        .context("failed to send frame")
}

/// Terminal rendering of one relay event. Typing-stopped indicators render nothing.
pub fn render_event(event: &OutboundEvent) -> Option<String> {
    match event {
        OutboundEvent::Line(line) if line.sender == SYSTEM_SENDER => Some(format!("* {}", line.text)),
        OutboundEvent::Line(line) => Some(format!("{}: {}", line.sender, line.text)),
        OutboundEvent::Control(ControlEvent::Typing { sender, typing }) => {
            typing.then(|| format!("({sender} is typing...)"))
        }
        OutboundEvent::Control(ControlEvent::ActiveUsers { users }) => {
            let listed: Vec<String> = users
                .iter()
                .map(|user| {
                    if user.online {
                        user.name.clone()
                    } else {
                        format!("{} (disconnected)", user.name)
                    }
                })
                .collect();
            Some(format!("Active users: {}", listed.join(", ")))
        }
    }
}
