// Feedback channel terminal client: reads commands from stdin, prints server traffic.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use feedback_client::{
    config, Client, ClientEvent, ClientOptions, DownloadDir, EventReceiver, FileSettings,
};
use feedback_core::{HistoryKind, Message};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const HELP: &str = "\
commands:
  <text>                          send a message
  /file <path>                    send a file inline
  /read <message_id>              mark a message as read
  /get <file_id> <name>           request a shared file from the server
  /download <file_id> <url> <name>  fetch a file over HTTP
  /name <username>                change username (next connect)
  /server <host> <port>           change server (next connect)
  /reconnect                      drop and re-establish the connection
  /quit                           exit";

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("feedback-client {}", VERSION);
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,feedback_client=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load();
    let settings = Arc::new(FileSettings::new(FileSettings::default_path()));
    let sink = Arc::new(DownloadDir::new(&cfg.downloads_dir));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (client, events) = Client::new(ClientOptions::from_config(&cfg), settings, sink);
        info!(
            username = %client.username(),
            server = %format!("{}:{}", client.server_host(), client.server_port()),
            "Starting feedback client"
        );
        let manual = Arc::new(AtomicBool::new(false));
        tokio::spawn(print_events(
            client.clone(),
            events,
            cfg.auto_reconnect,
            manual.clone(),
        ));

        // Failures are reported through the event stream.
        let _ = client.connect().await;

        tokio::select! {
            r = command_loop(client.clone(), manual.clone()) => r?,
            r = shutdown_signal() => r?,
        }
        manual.store(true, Ordering::SeqCst);
        client.disconnect().await;
        Ok::<_, anyhow::Error>(())
    })?;
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Say(&'a str),
    File(&'a str),
    Read(&'a str),
    Get { file_id: &'a str, name: &'a str },
    Download { file_id: &'a str, url: &'a str, name: &'a str },
    Name(&'a str),
    Server { host: &'a str, port: u16 },
    Reconnect,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<Command<'_>>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Say(line)));
    };
    let (cmd, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let args = args.trim();
    let words: Vec<&str> = args.split_whitespace().collect();
    let cmd = match (cmd, words.as_slice()) {
        ("file", &[_, ..]) => Command::File(args),
        ("read", &[id]) => Command::Read(id),
        ("get", &[file_id, name]) => Command::Get { file_id, name },
        ("download", &[file_id, url, name]) => Command::Download { file_id, url, name },
        ("name", &[_, ..]) => Command::Name(args),
        ("server", &[host, port]) => Command::Server {
            host,
            port: port.parse().map_err(|_| format!("invalid port: {port}"))?,
        },
        ("reconnect", &[]) => Command::Reconnect,
        ("help", _) => Command::Help,
        ("quit" | "exit", &[]) => Command::Quit,
        _ => return Err(format!("unrecognised command: /{rest} (try /help)")),
    };
    Ok(Some(cmd))
}

async fn command_loop(client: Client, manual: Arc<AtomicBool>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let cmd = match parse_command(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        let result = match cmd {
            Command::Say(text) => client.send_message(text).await.map(|pending| {
                if pending > 0 {
                    println!("(queued, {pending} pending)");
                }
            }),
            Command::File(path) => match tokio::fs::read(path).await {
                Ok(bytes) => {
                    let name = Path::new(path)
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or(path);
                    client.send_file(name, &bytes).await
                }
                Err(e) => {
                    println!("cannot read {path}: {e}");
                    continue;
                }
            },
            Command::Read(id) => client.mark_message_read(id).await,
            Command::Get { file_id, name } => client.request_file(file_id, name).await,
            Command::Download { file_id, url, name } => {
                client.download_file(file_id, url, name).await.map(|_| ())
            }
            Command::Name(name) => client.set_username(name),
            Command::Server { host, port } => client.set_server(host, port),
            Command::Reconnect => {
                if client.is_connected() {
                    manual.store(true, Ordering::SeqCst);
                }
                client.disconnect().await;
                client.connect().await
            }
            Command::Help => {
                println!("{HELP}");
                Ok(())
            }
            Command::Quit => break,
        };
        if let Err(e) = result {
            println!("error: {e}");
        }
    }
    Ok(())
}

async fn print_events(
    client: Client,
    mut events: EventReceiver,
    auto_reconnect: bool,
    manual: Arc<AtomicBool>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::Connected(status) => println!("* {status}"),
            ClientEvent::Disconnected(reason) => {
                println!("* disconnected: {reason}");
                if manual.swap(false, Ordering::SeqCst) || !auto_reconnect {
                    continue;
                }
                let c = client.clone();
                tokio::spawn(async move {
                    if let Err(e) = c.reconnect().await {
                        warn!(error = %e, "Auto-reconnect stopped");
                        println!("* reconnect failed: {e}");
                    }
                });
            }
            ClientEvent::Error(e) => println!("! {e}"),
            ClientEvent::FileProgress { file_id, percent } => {
                println!("* receiving {file_id}: {percent}%")
            }
            ClientEvent::FileDownloadCompleted { file_name, path, .. } => {
                println!("* saved {file_name} to {}", path.display())
            }
            ClientEvent::MessageReceived(msg) => {
                for line in render(&msg) {
                    println!("{line}");
                }
            }
        }
    }
}

/// Terminal lines for one server message; transfer plumbing renders as nothing.
fn render(msg: &Message) -> Vec<String> {
    match msg {
        Message::RegisterSuccess {
            user,
            recent_messages,
        } => {
            let mut out = vec![format!(
                "* registered as {} ({} recent messages)",
                user.username,
                recent_messages.len()
            )];
            for entry in recent_messages {
                let m = &entry.message;
                out.push(match entry.kind {
                    HistoryKind::File | HistoryKind::FileDownloadUrl => format!(
                        "  [{}] shared {} ({})",
                        m.username,
                        m.name.as_deref().unwrap_or("?"),
                        m.file_id.as_deref().unwrap_or(&m.id)
                    ),
                    _ => format!(
                        "  [{}] {}",
                        m.username,
                        m.content.as_deref().unwrap_or_default()
                    ),
                });
            }
            out
        }
        Message::NewMessage(m) => vec![match (&m.content, &m.name) {
            (Some(text), _) => format!("[{}] {} (id {})", m.username, text, m.id),
            (None, Some(name)) => format!(
                "[{}] shared {} ({})",
                m.username,
                name,
                m.file_id.as_deref().unwrap_or(&m.id)
            ),
            (None, None) => format!("[{}] (id {})", m.username, m.id),
        }],
        Message::File(f) => vec![format!(
            "[{}] sent file {} ({} bytes)",
            f.username.as_deref().unwrap_or("?"),
            f.name,
            f.size
        )],
        Message::FileDownloadUrl {
            file_id, name, url, ..
        } => vec![format!(
            "* file {name} available: /download {file_id} {url} {name}"
        )],
        Message::ReadStatusUpdate {
            message_id,
            read_by_count,
            total_users,
        } => vec![format!(
            "* {message_id} read by {read_by_count}/{total_users}"
        )],
        Message::UserOnline { username, .. } => vec![format!("* {username} is online")],
        Message::UserOffline { username } => vec![format!("* {username} went offline")],
        Message::SystemMessage { content, .. } => vec![format!("# {content}")],
        Message::RefreshTrigger => vec!["* server asked for a refresh".to_owned()],
        Message::Error { .. } => vec![format!(
            "! server: {}",
            msg.error_text().unwrap_or("unknown error")
        )],
        _ => Vec::new(),
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
