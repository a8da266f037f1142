//! LAN Group Chat - Entry Point
//!
//! `lan_chat server [port]` hosts a hub and lets the operator broadcast from
//! the console. `lan_chat client <host> [port]` joins a hub as a participant.

use std::env;
use std::error::Error;
use std::io::{BufRead, BufReader, Read};

use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lan_chat::{
    lan_addresses, ChatConfig, ChatHistory, ClientConfig, Connector, Envelope, HandlerEvent,
    Listener, OutboundSession, Room, RoomNotice, ServerConfig,
};

/// Display name for messages typed at the hub console
const OPERATOR_NAME: &str = "Server";

const USAGE: &str = "usage: lan_chat server [port]\n       lan_chat client <host> [port]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=lan_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lan_chat=info")),
        )
        .init();

    let config = ChatConfig::load()?;

    match parse_mode(env::args().skip(1), &config) {
        Some(Mode::Server { port }) => run_server(config.server.with_port(port)).await,
        Some(Mode::Client { host, port }) => run_client(config.client, &host, port).await,
        None => {
            eprintln!("{USAGE}");
            Err("missing or invalid arguments".into())
        }
    }
}

/// What the command line asked for
#[derive(Debug, PartialEq, Eq)]
enum Mode {
    Server { port: u16 },
    Client { host: String, port: u16 },
}

fn parse_mode(mut args: impl Iterator<Item = String>, config: &ChatConfig) -> Option<Mode> {
    let port = |arg: Option<String>, default: u16| match arg {
        Some(port) => port.parse().ok(),
        None => Some(default),
    };

    match args.next().as_deref() {
        Some("server") => Some(Mode::Server {
            port: port(args.next(), config.server.port)?,
        }),
        Some("client") => {
            let host = args.next()?;
            Some(Mode::Client {
                port: port(args.next(), config.client.port)?,
                host,
            })
        }
        _ => None,
    }
}

fn is_quit(line: &str) -> bool {
    line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit")
}

/// Forward console lines from a plain thread
///
/// A blocking stdin read cannot be cancelled, and the runtime waits for its
/// own blocking tasks on shutdown. A detached thread does not hold up exit.
fn spawn_stdin_lines() -> mpsc::UnboundedReceiver<String> {
    spawn_line_reader(std::io::stdin())
}

fn spawn_line_reader<R>(input: R) -> mpsc::UnboundedReceiver<String>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in BufReader::new(input).lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn print_notice(notice: &RoomNotice) {
    match notice {
        RoomNotice::Joined { name, count, .. } => {
            println!("{name} connected ({count} online)");
        }
        RoomNotice::Message { name, text, .. } => {
            println!("{}", Envelope::new(name, text));
        }
        RoomNotice::Left { name, count, .. } => {
            println!("{name} disconnected ({count} online)");
        }
    }
}

async fn run_server(config: ServerConfig) -> Result<(), Box<dyn Error>> {
    let listener = Listener::bind(&config)?;
    let (room, mut notices) = Room::spawn(&config);
    println!("Chat hub listening on {}", listener.local_addr());

    if config.bind_address.is_unspecified() {
        let addrs = lan_addresses(listener.local_addr().port()).await;
        if !addrs.is_empty() {
            println!("Participants can connect to:");
            for addr in addrs {
                println!("  {addr}");
            }
        }
    }

    let notice_task = tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            print_notice(&notice);
        }
    });

    let accept_room = room.clone();
    let listener = listener.start(move |connection, peer| {
        let room = accept_room.clone();
        async move {
            if let Err(e) = room.add(connection, peer.as_str()).await {
                error!(peer = %peer, error = %e, "Failed to register connection");
            }
        }
    });

    println!("Type a message to broadcast, or 'quit' to stop the hub.");
    let mut lines = spawn_stdin_lines();

    loop {
        let line = tokio::select! {
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if is_quit(line) {
            break;
        }

        if room.count().await? == 0 {
            println!("No clients connected yet.");
            continue;
        }
        room.broadcast_all(OPERATOR_NAME, line).await?;
    }

    info!("Shutting down hub");
    // Waits for in-flight registrations, so stop_all sees every peer
    listener.stop().await;
    room.stop_all().await?;
    notice_task.abort();

    Ok(())
}

async fn run_client(config: ClientConfig, host: &str, port: u16) -> Result<(), Box<dyn Error>> {
    let connection = Connector::new(config.clone()).connect(host, port).await?;
    println!("Connected to {host}:{port}. Type 'quit' to leave.");

    let mut session = OutboundSession::new(connection, &config);
    let mut events = session.start()?;
    let history = ChatHistory::new();
    let mut lines = spawn_stdin_lines();

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if is_quit(line) {
                    break;
                }
                session.send(line)?;
                history.add("You", line);
            }
            event = events.recv() => match event {
                Some(HandlerEvent::Message { text, .. }) => {
                    println!("{text}");
                    history.add("", text);
                }
                Some(HandlerEvent::Disconnected { .. }) | None => {
                    println!("Disconnected from the hub.");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.stop().await;
    println!("Messages exchanged: {}", history.len());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter()
            .map(|arg| arg.to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn test_parse_server_mode() {
        let config = ChatConfig::default();
        assert_eq!(
            parse_mode(args(&["server"]), &config),
            Some(Mode::Server { port: 54000 })
        );
        assert_eq!(
            parse_mode(args(&["server", "6000"]), &config),
            Some(Mode::Server { port: 6000 })
        );
    }

    #[test]
    fn test_parse_client_mode() {
        let config = ChatConfig::default();
        assert_eq!(
            parse_mode(args(&["client", "10.0.0.5", "6000"]), &config),
            Some(Mode::Client {
                host: "10.0.0.5".to_string(),
                port: 6000,
            })
        );
    }

    #[test]
    fn test_parse_rejects_bad_arguments() {
        let config = ChatConfig::default();
        assert_eq!(parse_mode(args(&[]), &config), None);
        assert_eq!(parse_mode(args(&["client"]), &config), None);
        assert_eq!(parse_mode(args(&["server", "not-a-port"]), &config), None);
        assert_eq!(parse_mode(args(&["relay"]), &config), None);
    }

    #[test]
    fn test_quit_words() {
        assert!(is_quit("quit"));
        assert!(is_quit("EXIT"));
        assert!(!is_quit("quitting"));
    }

    #[tokio::test]
    async fn test_line_reader_forwards_then_ends() {
        let mut lines = spawn_line_reader(Cursor::new(b"hello\nquit\n".to_vec()));
        let wait = Duration::from_secs(5);

        let mut received = Vec::new();
        while let Some(line) = tokio::time::timeout(wait, lines.recv()).await.unwrap() {
            received.push(line);
        }
        assert_eq!(received, ["hello", "quit"]);
    }
}
