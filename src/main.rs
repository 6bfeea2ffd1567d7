use std::error::Error;
use std::sync::Arc;

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};

use moto_chat::network::{RealtimeTransport, WebSocketConnector};
use moto_chat::storage::SessionDatabase;
use moto_chat::{
    ChatConfig, ChatMessage, ConnectionState, ConversationState, ConversationViewModel,
    HistoryStatus, SessionTokenHolder,
};

#[derive(Parser)]
#[command(name = "moto-chat", version, about = "Accident chat client")]
struct Cli {
    /// REST base URL (overrides MOTO_API_URL)
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,
    /// Socket base URL (overrides MOTO_SOCKET_URL)
    #[arg(long, value_name = "URL")]
    socket_url: Option<String>,
    /// Session database (overrides MOTO_DB_PATH)
    #[arg(long, value_name = "FILE")]
    db: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a session token
    Login {
        #[arg(long)]
        token: String,
    },
    /// Forget the stored session token
    Logout,
    /// Open a conversation; every stdin line is sent as a message
    Chat {
        #[arg(long)]
        conversation: i64,
        #[arg(long)]
        user: i64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut config = ChatConfig::from_env();
    if let Some(url) = cli.api_url {
        config.api_url = url;
    }
    if let Some(url) = cli.socket_url {
        config.socket_url = url;
    }
    if let Some(path) = cli.db {
        config.db_path = path;
    }

    let session = SessionTokenHolder::restore(SessionDatabase::with_path(&config.db_path)?);

    match cli.command {
        Command::Login { token } => {
            session.set(token)?;
            println!("Logged in");
        }
        Command::Logout => {
            session.clear();
            println!("Logged out");
        }
        Command::Chat { conversation, user } => {
            run_chat(&config, session, conversation, user).await?;
        }
    }
    Ok(())
}

async fn run_chat(
    config: &ChatConfig,
    session: SessionTokenHolder,
    conversation: i64,
    user: i64,
) -> Result<(), Box<dyn Error>> {
    if !session.is_authenticated() {
        log::warn!("No session token stored; run `moto-chat login --token ...` first");
    }

    let transport = RealtimeTransport::spawn(
        WebSocketConnector,
        config.transport_options()?,
        session.subscribe(),
    );
    let mut view_model = ConversationViewModel::new(
        transport.clone(),
        Arc::new(config.history_client()),
        session,
        user,
    );
    view_model.open(conversation);

    let Some(mut state) = view_model.observe() else {
        return Ok(());
    };
    let mut connection = view_model.connection_state();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    render(&state.borrow_and_update(), *connection.borrow_and_update(), user);
    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                render(&state.borrow_and_update(), *connection.borrow(), user);
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("[{}]", indicator(*connection.borrow_and_update()));
            }
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Err(err) = view_model.send(&line) {
                        eprintln!("Not sent: {err}");
                    }
                }
                None => break,
            },
        }
    }

    view_model.close();
    transport.shutdown();
    Ok(())
}

fn render(state: &ConversationState, connection: ConnectionState, user: i64) {
    println!("--- conversation {} [{}] ---", state.conversation_id, indicator(connection));
    match &state.history {
        HistoryStatus::Loading => println!("(loading history)"),
        HistoryStatus::Failed(reason) => println!("(history unavailable: {reason})"),
        HistoryStatus::Loaded => {}
    }
    if state.is_empty() {
        println!("(no messages yet)");
    }
    for message in &state.messages {
        println!("{}", format_line(message, user));
    }
}

fn indicator(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Idle => "offline",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "online",
        ConnectionState::Disconnected => "reconnecting",
    }
}

fn format_line(message: &ChatMessage, user: i64) -> String {
    let time = Local
        .timestamp_millis_opt(message.timestamp)
        .single()
        .map(|time| time.format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string());
    let author = if message.is_from(user) {
        "me"
    } else {
        message.sender_name.as_str()
    };
    format!("{time} {author}: {}", message.body)
}
