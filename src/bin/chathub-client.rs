//! Terminal client for a Chathub server
//!
//! Lines typed on stdin are sent as chat messages. `/users` lists who is
//! online, `/reconnect` re-establishes the connection and `/quit` exits.

use std::env;

use anyhow::{bail, Context, Result};
use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use chathub::client::{ChatClient, ClientConfig, ClientEvent};
use chathub::models::ChatMessage;

const DEFAULT_URL: &str = "ws://127.0.0.1:5051/ws";

struct Args {
    url: String,
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(());
    }

    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        println!("chathub-client {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let args = parse_args(&args[1..])?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let client = ChatClient::new(ClientConfig::new(args.url, args.name));
    let printer = tokio::spawn(print_events(client.clone()));

    client
        .connect()
        .await
        .context("Failed to connect to chat server")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {}
            "/quit" => break,
            "/users" => print_users(&client),
            "/reconnect" => {
                if let Err(e) = client.reconnect().await {
                    eprintln!("Reconnect failed: {}", e);
                }
            }
            text => {
                if let Err(e) = client.send_text(text).await {
                    eprintln!("Send failed: {}", e);
                }
            }
        }
    }

    client.disconnect().await;
    printer.abort();
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut url = env::var("CHATHUB_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let mut name = env::var("CHATHUB_USER").unwrap_or_default();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--url" => url = iter.next().context("--url needs a value")?.clone(),
            "--name" => name = iter.next().context("--name needs a value")?.clone(),
            other => bail!("Unknown argument: {} (see --help)", other),
        }
    }

    Ok(Args { url, name })
}

async fn print_events(client: ChatClient) {
    let mut events = client.subscribe();
    loop {
        match events.recv().await {
            Ok(ClientEvent::MessageReceived(message)) => println!("{}", format_message(&message)),
            Ok(ClientEvent::OnlineUsersUpdated(users)) => {
                println!("* {} user(s) online", users.len());
            }
            Ok(ClientEvent::ConnectionStateChanged(true)) => println!("* connected"),
            Ok(ClientEvent::ConnectionStateChanged(false)) => println!("* disconnected"),
            Ok(ClientEvent::Error(e)) => eprintln!("! {}", e),
            Err(RecvError::Lagged(skipped)) => eprintln!("! skipped {} events", skipped),
            Err(RecvError::Closed) => return,
        }
    }
}

fn print_users(client: &ChatClient) {
    let users = client.online_users();
    println!("* {} user(s) online", users.len());
    for user in users {
        println!("  {}", user.user_name);
    }
}

fn format_message(message: &ChatMessage) -> String {
    format!(
        "[{}] {}: {}",
        message.timestamp.with_timezone(&Local).format("%H:%M:%S"),
        message.user_name,
        message.content
    )
}

fn print_help() {
    println!(
        r#"chathub-client {}

USAGE:
    chathub-client [OPTIONS]

OPTIONS:
    --url <URL>             Chat server endpoint (default: {})
    --name <NAME>           User name; empty means the server picks one
    -h, --help              Print this help message
    -V, --version           Print version information

ENVIRONMENT:
    CHATHUB_URL             Default for --url
    CHATHUB_USER            Default for --name

COMMANDS:
    /users                  List online users
    /reconnect              Reconnect to the server
    /quit                   Disconnect and exit"#,
        env!("CARGO_PKG_VERSION"),
        DEFAULT_URL
    );
}
