use std::error::Error;
use std::sync::Arc;

use billsplit_chat::chat::{ChatSession, ConversationView};
use billsplit_chat::common::{ChatError, ConnectionState, Identity, UserId};
use billsplit_chat::config::{self, ChatConfig};
use billsplit_chat::network::HttpChatApi;
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

#[derive(Parser)]
#[command(
    name = "billsplit-chat",
    version,
    about = "Console client for the private chat broker"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    #[command(subcommand)]
    mode: Option<Mode>,
    #[command(flatten)]
    login: Login,
}

#[derive(Subcommand)]
enum Mode {
    /// Write the effective config (defaults merged with the file) back to disk
    InitConfig,
}

#[derive(Args)]
struct Login {
    /// Numeric id of the logged-in user
    #[arg(long)]
    user_id: Option<UserId>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    name: Option<String>,
    /// Bearer token for the broker and the REST API
    #[arg(long, env = "CHAT_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// Open a conversation with this user right away
    #[arg(long)]
    peer: Option<UserId>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let chat_config = config::load_config(&cli.config);

    if let Some(Mode::InitConfig) = cli.mode {
        config::save_config(&cli.config, &chat_config)?;
        log::info!("Wrote config to {}", cli.config);
        return Ok(());
    }

    run_client(chat_config, cli.login).await
}

async fn run_client(chat_config: ChatConfig, login: Login) -> Result<(), Box<dyn Error>> {
    let (Some(user_id), Some(email), Some(token)) = (login.user_id, login.email, login.token)
    else {
        return Err(ChatError::Config("--user-id, --email and --token are required".into()).into());
    };
    let identity = Identity {
        id: user_id,
        display_name: login.name.unwrap_or_else(|| email.clone()),
        email,
    };

    let api = Arc::new(HttpChatApi::new(&chat_config.api_base_url, &token));
    let session = ChatSession::start(&chat_config, identity, &token, api)?;

    tokio::spawn(log_connection_changes(session.subscribe_state()));

    match session.presence().refresh().await {
        Ok(count) => log::info!("{count} user(s) online"),
        Err(err) => log::warn!("Presence unavailable: {err}"),
    }
    match session.recent_contacts().await {
        Ok(contacts) => {
            for contact in &contacts {
                let status = if session.is_peer_online(contact) { "online" } else { "offline" };
                println!("  [{}] {} <{}> {status}", contact.id, contact.display_name, contact.email);
            }
        }
        Err(err) => log::warn!("Could not load recent contacts: {err}"),
    }

    if let Some(peer_id) = login.peer {
        tokio::spawn(print_conversation(session.conversation().subscribe(), user_id));
        if let Err(err) = session.conversation().open(peer_id).await {
            log::error!("Could not open conversation with {peer_id}: {err}");
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim() == "/quit" {
                    break;
                }
                handle_input(&session, &line);
            }
        }
    }

    session.shutdown();
    Ok(())
}

fn handle_input(session: &ChatSession, line: &str) {
    let conversation = session.conversation();
    if line.trim().is_empty() {
        return;
    }
    if let Err(err) = conversation.send_typing().and_then(|_| conversation.send(line)) {
        match err {
            ChatError::NoConversation => println!("No conversation open; start with --peer <id>"),
            err => log::warn!("Message not sent: {err}"),
        }
    }
}

async fn log_connection_changes(mut state: watch::Receiver<ConnectionState>) {
    while state.changed().await.is_ok() {
        let current = *state.borrow_and_update();
        log::info!("Broker connection {current}");
    }
}

/// Prints new transcript lines plus typing and "Seen" changes as the view updates.
async fn print_conversation(mut view: watch::Receiver<ConversationView>, user_id: UserId) {
    let mut printed = 0;
    let mut typing = false;
    let mut seen = None;
    while view.changed().await.is_ok() {
        let current = view.borrow_and_update().clone();
        if current.messages.len() < printed {
            printed = 0;
        }
        if current.history_failed {
            println!("(history unavailable; reopen to retry)");
        }
        for message in &current.messages[printed..] {
            let who = if message.sender_id == user_id {
                "you".to_string()
            } else {
                message
                    .sender_name
                    .clone()
                    .unwrap_or_else(|| message.sender_id.to_string())
            };
            println!("{who}: {}", message.text());
        }
        printed = current.messages.len();

        if current.typing != typing {
            typing = current.typing;
            if typing {
                println!("(typing...)");
            }
        }
        if current.seen_index != seen {
            seen = current.seen_index;
            if seen.is_some() {
                println!("(seen)");
            }
        }
    }
}
