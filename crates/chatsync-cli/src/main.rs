//! Chatsync terminal client.
//!
//! # Usage
//!
//! ```bash
//! # Sign in with a token from the environment
//! CHATSYNC_TOKEN=... chatsync --endpoint ws://localhost:8080/ws --api http://localhost:8080/api
//!
//! # Or start signed out and type `/login <username> <password>`
//! chatsync
//! ```
//!
//! Lines typed on stdin are commands (`/open 3`, `/rooms`, `/quit`, ...) or,
//! without a leading slash, messages for the open room.

#![allow(clippy::print_stdout, reason = "terminal client writes to stdout")]

use std::time::Duration;

use chatsync_client::{ClientConfig, ClientHandle, RuntimeError, spawn_client};
use chatsync_core::{ConnectionPhase, SharedCredentials, SyncSnapshot};
use chatsync_proto::{MessageId, RoomId, UserId};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Chatsync terminal client
#[derive(Parser, Debug)]
#[command(name = "chatsync")]
#[command(about = "Realtime chat client")]
#[command(version)]
struct Args {
    /// Realtime endpoint
    #[arg(short, long, default_value = "ws://localhost:8080/ws")]
    endpoint: String,

    /// Request/response API base URL
    #[arg(short, long, default_value = chatsync_client::config::DEFAULT_API_BASE)]
    api: String,

    /// Session token
    #[arg(short, long, env = "CHATSYNC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Close the connection after this many seconds without inbound traffic
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    /// Stay disconnected when the server rejects the token
    #[arg(long)]
    stop_on_auth_rejection: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(&self.endpoint, &self.api);
        config.sync.connection.idle_timeout = self.idle_timeout_secs.map(Duration::from_secs);
        config.sync.connection.stop_on_auth_rejection = self.stop_on_auth_rejection;
        config
    }
}

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Open(RoomId),
    Close,
    Rooms,
    Friends,
    Direct(UserId),
    AddFriend(String),
    Login { username: String, password: String },
    Token(String),
    Logout,
    Status,
    Help,
    Quit,
    Say(String),
}

fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Say(line.to_string()));
    };

    let (name, arg) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let arg = arg.trim();
    let id = |what: &str| arg.parse::<u64>().map_err(|_| format!("usage: /{name} <{what}>"));

    match name {
        "open" => id("room id").map(Command::Open),
        "close" => Ok(Command::Close),
        "rooms" => Ok(Command::Rooms),
        "friends" => Ok(Command::Friends),
        "dm" => id("friend id").map(Command::Direct),
        "add" if !arg.is_empty() => Ok(Command::AddFriend(arg.to_string())),
        "add" => Err("usage: /add <username>".to_string()),
        "login" => match arg.split_once(char::is_whitespace) {
            Some((username, password)) if !password.trim().is_empty() => Ok(Command::Login {
                username: username.to_string(),
                password: password.trim().to_string(),
            }),
            _ => Err("usage: /login <username> <password>".to_string()),
        },
        "token" if !arg.is_empty() => Ok(Command::Token(arg.to_string())),
        "token" => Err("usage: /token <token>".to_string()),
        "logout" => Ok(Command::Logout),
        "status" => Ok(Command::Status),
        "help" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(format!("unknown command /{other}, try /help")),
    }
}

const HELP: &str = "\
/open <room>   open a room
/close         close the open room
/rooms         list rooms
/friends       list friends
/dm <friend>   open a direct room
/add <user>    add a friend
/login <user> <password>
               sign in
/token <token> sign in with a session token
/logout        sign out
/status        connection phase
/quit          exit
anything else  send to the open room";

fn print_rooms(snapshot: &SyncSnapshot) {
    if snapshot.rooms.is_empty() {
        println!("(no rooms)");
    }
    for room in &snapshot.rooms {
        let marker = if snapshot.active_room == Some(room.id) { '*' } else { ' ' };
        println!("{marker} #{:<6} {:<32} unread {}", room.id, room.members.join(", "), room.unread_count);
    }
}

fn print_friends(snapshot: &SyncSnapshot) {
    if snapshot.friends.is_empty() {
        println!("(no friends)");
    }
    for friend in &snapshot.friends {
        let status = if friend.online { "online" } else { "offline" };
        println!("  {:<6} {:<24} {status}", friend.id, friend.username);
    }
}

/// Print phase changes and messages not shown yet.
async fn render(handle: ClientHandle) {
    let mut snapshots = handle.subscribe();
    let mut phase = ConnectionPhase::Disconnected;
    let mut room = None;
    let mut shown: Option<MessageId> = None;

    loop {
        {
            let snapshot = snapshots.borrow_and_update();
            if snapshot.phase != phase {
                phase = snapshot.phase;
                println!("-- {phase}");
            }
            if snapshot.active_room != room {
                room = snapshot.active_room;
                shown = None;
            }
            for message in &snapshot.messages {
                if !shown.is_none_or(|last| message.id > last) {
                    continue;
                }
                let sender = message.sender_name.as_deref().unwrap_or("?");
                let content = if message.deleted { "(deleted)" } else { message.content.as_deref().unwrap_or("") };
                let unread = if message.unread_count > 0 { format!(" [{}]", message.unread_count) } else { String::new() };
                println!("{sender}: {content}{unread}");
                shown = Some(message.id);
            }
        }
        if snapshots.changed().await.is_err() {
            return;
        }
    }
}

async fn execute(handle: &ClientHandle, command: Command) -> Result<bool, RuntimeError> {
    match command {
        Command::Open(room_id) => handle.open_room(room_id).await?,
        Command::Close => handle.close_room().await?,
        Command::Rooms => print_rooms(&handle.snapshot()),
        Command::Friends => print_friends(&handle.snapshot()),
        Command::Direct(friend_id) => handle.open_direct_room(friend_id).await?,
        Command::AddFriend(username) => handle.add_friend(&username).await?,
        Command::Login { username, password } => handle.login(&username, &password).await?,
        Command::Token(token) => handle.sign_in(token).await?,
        Command::Logout => handle.sign_out().await?,
        Command::Status => {
            let snapshot = handle.snapshot();
            let who = snapshot.account.as_ref().map_or("-", |account| account.username.as_str());
            println!("{} as {who} ({} rooms, {} unread)", snapshot.phase, snapshot.rooms.len(), snapshot.total_unread());
        },
        Command::Help => println!("{HELP}"),
        Command::Quit => return Ok(false),
        Command::Say(text) => {
            let Some(room_id) = handle.snapshot().active_room else {
                println!("no open room, try /open <room>");
                return Ok(true);
            };
            handle.send_message(room_id, text).await?;
        },
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(std::io::stderr)).with(filter).init();

    tracing::info!(endpoint = %args.endpoint, api = %args.api, "chatsync starting");
    if args.token.is_none() {
        tracing::warn!("no token given; use /login <username> <password>");
    }

    let credentials = SharedCredentials::new(args.token.clone());
    let (handle, task) = spawn_client(args.client_config(), credentials)?;
    let renderer = tokio::spawn(render(handle.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(usage) => {
                println!("{usage}");
                continue;
            },
        };
        match execute(&handle, command).await {
            Ok(true) => {},
            Ok(false) => break,
            Err(RuntimeError::Stopped) => break,
            Err(error) => println!("error: {error}"),
        }
    }

    handle.shutdown().await;
    task.await??;
    renderer.abort();
    Ok(())
}
