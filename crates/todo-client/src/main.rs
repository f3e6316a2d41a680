//! todo-client: edit a shared todo list from the terminal.
//!
//! Reads commands from stdin, syncs them to the server over a WebSocket and
//! prints the list whenever the server pushes a new snapshot.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use todo_client::{render, ClientCommand, ClientConfig, ClientEvent, SyncClient};

#[derive(Parser, Debug)]
#[command(name = "todo-client")]
#[command(about = "Live todo list client")]
struct Args {
    /// WebSocket URL of the list (ws://host:port/lists/<id>)
    url: String,

    /// Session id sent as the session cookie
    #[arg(long, env = "TODO_SESSION")]
    session: Option<String>,

    /// Name of the session cookie
    #[arg(long, default_value = "session")]
    cookie_name: String,

    /// How often pending edits are flushed, in milliseconds
    #[arg(long, default_value_t = 1000)]
    flush_ms: u64,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("todo_client=debug,todo_core=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("todo_client=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = ClientConfig::new(args.url);
    config.session = args.session;
    config.cookie_name = args.cookie_name;
    config.flush_interval = Duration::from_millis(args.flush_ms.max(1));

    let (client, handle) = SyncClient::new(config);
    let client_task = tokio::spawn(client.run());

    let mut events = handle.events;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::Snapshot(snapshot) => print!("{}", render(&snapshot)),
                ClientEvent::State { snapshot, busy } => {
                    match snapshot {
                        Some(snapshot) => print!("{}", render(&snapshot)),
                        None => println!("(no data yet)"),
                    }
                    if busy {
                        println!("(saving...)");
                    }
                }
                ClientEvent::Added(id) => println!("added {}", id),
                ClientEvent::CommandFailed(e) => eprintln!("error: {}", e),
                ClientEvent::Connected => tracing::info!("Live"),
                ClientEvent::Disconnected(reason) => tracing::warn!("Offline: {}", reason),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.parse::<ClientCommand>() {
            Ok(command) => {
                if handle.commands.send(command).is_err() {
                    break;
                }
            }
            Err(todo_client::CommandError::Empty) => {}
            Err(e) => eprintln!("{}", e),
        }
    }

    // Closing the command channel flushes what is left and stops the client
    drop(handle.commands);
    client_task.await??;
    let _ = printer.await;
    Ok(())
}
