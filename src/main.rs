//! rag-chat - terminal front end for the question-answering assistant

use async_trait::async_trait;
use futures::StreamExt;
use rag_chat::api::{Conversation, Message, Role};
use rag_chat::conversations::{ConfirmDelete, CreateOutcome, DeleteOutcome};
use rag_chat::send::{SendOutcome, SendRejection};
use rag_chat::store::StoreEvent;
use rag_chat::{ChatClient, ClientConfig};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::BroadcastStream;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "\
Commands:
  /register <username> <email> <password>
  /login <email> <password>
  /logout
  /list                 show your conversations
  /new                  start an empty conversation
  /open <n|id>          switch to a conversation
  /info <n|id>          show a conversation's details
  /delete <n|id>        delete a conversation
  /refresh              reload the open conversation
  /help
  /quit
Anything else is sent as a message.";

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Register {
        username: &'a str,
        email: &'a str,
        password: &'a str,
    },
    Login {
        email: &'a str,
        password: &'a str,
    },
    Logout,
    List,
    New,
    Open(&'a str),
    Info(&'a str),
    Delete(&'a str),
    Refresh,
    Help,
    Quit,
    Send(&'a str),
    Usage(&'static str),
    Unknown(&'a str),
}

fn parse_command(line: &str) -> Option<Command<'_>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Send(line));
    };

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    let command = match (name, args.as_slice()) {
        ("register", &[username, email, password]) => Command::Register {
            username,
            email,
            password,
        },
        ("register", _) => Command::Usage("/register <username> <email> <password>"),
        ("login", &[email, password]) => Command::Login { email, password },
        ("login", _) => Command::Usage("/login <email> <password>"),
        ("logout", []) => Command::Logout,
        ("list", []) => Command::List,
        ("new", []) => Command::New,
        ("open", &[target]) => Command::Open(target),
        ("open", _) => Command::Usage("/open <n|id>"),
        ("info", &[target]) => Command::Info(target),
        ("info", _) => Command::Usage("/info <n|id>"),
        ("delete", &[target]) => Command::Delete(target),
        ("delete", _) => Command::Usage("/delete <n|id>"),
        ("refresh", []) => Command::Refresh,
        ("help", _) => Command::Help,
        ("quit" | "exit", _) => Command::Quit,
        _ => Command::Unknown(name),
    };
    Some(command)
}

/// Resolve a 1-based list position or a literal conversation id
fn resolve_target(target: &str, conversations: &[Conversation]) -> Option<String> {
    if let Ok(n) = target.parse::<usize>() {
        return n
            .checked_sub(1)
            .and_then(|i| conversations.get(i))
            .map(|c| c.id.clone());
    }
    Some(target.to_string())
}

fn render_message(message: &Message) -> String {
    let who = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    format!("[{}] {who}: {}", message.created_at.format("%H:%M"), message.content)
}

/// Stdin lines shared by the command loop and the delete prompt
struct Input {
    lines: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl Input {
    fn spawn() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to read stdin");
                        break;
                    }
                }
            }
        });
        Arc::new(Self {
            lines: Mutex::new(rx),
        })
    }

    async fn next_line(&self) -> Option<String> {
        self.lines.lock().await.recv().await
    }
}

struct PromptConfirm {
    input: Arc<Input>,
}

#[async_trait]
impl ConfirmDelete for PromptConfirm {
    async fn confirm_delete(&self, conversation_id: &str, title: Option<&str>) -> bool {
        println!(
            "Delete \"{}\"? This cannot be undone. [y/N]",
            title.unwrap_or(conversation_id)
        );
        self.input
            .next_line()
            .await
            .is_some_and(|answer| matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
    }
}

fn spawn_renderer(client: &ChatClient) {
    let mut events = BroadcastStream::new(client.store.subscribe());
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(StoreEvent::ActiveChanged {
                    conversation_id: Some(id),
                }) => println!("--- conversation {id} ---"),
                Ok(StoreEvent::ActiveChanged {
                    conversation_id: None,
                }) => println!("--- no conversation open ---"),
                Ok(StoreEvent::LoadStarted { .. }) => println!("(loading messages)"),
                Ok(StoreEvent::MessagesReplaced { messages, .. }) => {
                    if messages.is_empty() {
                        println!("(no messages yet)");
                    }
                    for message in &messages {
                        println!("{}", render_message(message));
                    }
                }
                Ok(StoreEvent::MessageAppended { message }) => {
                    println!("{}", render_message(&message));
                }
                Ok(StoreEvent::MessagesCleared) => println!("(transcript cleared)"),
                Ok(StoreEvent::LoadFailed { message, .. }) => {
                    println!("! Could not load messages: {message}");
                }
                Err(e) => tracing::warn!(error = %e, "Transcript renderer fell behind"),
            }
        }
    });
}

fn print_list(client: &ChatClient) {
    let view = client.conversations.snapshot();
    if let Some(error) = &view.error {
        println!("! {error}");
    }
    if view.conversations.is_empty() {
        println!("No conversations yet.");
        return;
    }
    let active = client.store.active_conversation_id();
    for (i, conversation) in view.conversations.iter().enumerate() {
        let marker = if active.as_deref() == Some(conversation.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{marker}{:>3}. {} ({})",
            i + 1,
            conversation.title,
            conversation.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
}

fn spawn_send(client: &Arc<ChatClient>, text: String) {
    let client = client.clone();
    tokio::spawn(async move {
        match client.sender.send(&text).await {
            SendOutcome::Rejected(SendRejection::AlreadySending) => {
                println!("! A message is still being answered.");
            }
            SendOutcome::Rejected(SendRejection::SignedOut) => {
                println!("! Sign in first: /login or /register.");
            }
            SendOutcome::Rejected(SendRejection::BlankInput) => {}
            SendOutcome::CreateFailed(e) => println!("! {}", e.message),
            SendOutcome::Answered { created, shown, conversation_id, .. } => {
                if !shown {
                    println!("(an answer arrived in conversation {conversation_id})");
                }
                if created.is_some() {
                    let _ = client.conversations.load().await;
                }
            }
            SendOutcome::Failed { created, .. } => {
                if let Some(banner) = client.sender.banner() {
                    println!("! {banner}");
                }
                if created.is_some() {
                    let _ = client.conversations.load().await;
                }
            }
        }
    });
}

/// Returns false when the shell should exit
#[allow(clippy::too_many_lines)]
async fn dispatch(client: &Arc<ChatClient>, command: Command<'_>) -> bool {
    match command {
        Command::Register {
            username,
            email,
            password,
        } => match client.auth.register(username, email, password).await {
            Ok(user) => {
                println!("Welcome, {}.", user.username);
                let _ = client.conversations.load().await;
            }
            Err(e) => println!("! {}", e.message),
        },
        Command::Login { email, password } => match client.auth.login(email, password).await {
            Ok(user) => {
                println!("Signed in as {}.", user.username);
                let _ = client.conversations.load().await;
                print_list(client);
            }
            Err(e) => println!("! {}", e.message),
        },
        Command::Logout => {
            client.logout();
            println!("Signed out.");
        }
        Command::List => {
            let _ = client.conversations.load().await;
            print_list(client);
        }
        Command::New => match client.conversations.create_new().await {
            Ok(CreateOutcome::Created(conversation)) => {
                println!("Started \"{}\".", conversation.title);
            }
            Ok(CreateOutcome::AlreadyCreating) => println!("! Already creating a conversation."),
            Ok(CreateOutcome::SignedOut) => println!("! Sign in first: /login or /register."),
            Err(e) => println!("! {}", e.message),
        },
        Command::Open(target) => {
            let conversations = client.conversations.conversations();
            match resolve_target(target, &conversations) {
                Some(id) => {
                    // Failures are rendered from the LoadFailed event
                    let _ = client.store.set_active(Some(&id)).await;
                }
                None => println!("! No conversation {target}."),
            }
        }
        Command::Info(target) => {
            let conversations = client.conversations.conversations();
            let Some(id) = resolve_target(target, &conversations) else {
                println!("! No conversation {target}.");
                return true;
            };
            match client.conversations.details(&id).await {
                Ok(c) => println!(
                    "{}\n  id: {}\n  created: {}\n  updated: {}",
                    c.title,
                    c.id,
                    c.created_at.to_rfc3339(),
                    c.updated_at.to_rfc3339()
                ),
                Err(e) => println!("! {}", e.message),
            }
        }
        Command::Delete(target) => {
            let conversations = client.conversations.conversations();
            let Some(id) = resolve_target(target, &conversations) else {
                println!("! No conversation {target}.");
                return true;
            };
            match client.conversations.delete(&id).await {
                Ok(DeleteOutcome::Deleted { .. }) => println!("Deleted."),
                Ok(DeleteOutcome::Cancelled) => println!("Kept."),
                Err(e) => println!("! {}", e.message),
            }
        }
        Command::Refresh => {
            if client.store.active_conversation_id().is_none() {
                println!("No conversation open.");
            } else {
                let _ = client.store.refresh().await;
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => return false,
        Command::Send(text) => spawn_send(client, text.to_string()),
        Command::Usage(usage) => println!("Usage: {usage}"),
        Command::Unknown(name) => println!("! Unknown command /{name}. Try /help."),
    }
    true
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries the transcript
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rag_chat=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ClientConfig::from_env();
    tracing::info!(
        api = %config.api_base_url,
        session_dir = %config.session_dir.display(),
        "Starting rag-chat"
    );

    let input = Input::spawn();
    let confirm = Arc::new(PromptConfirm {
        input: input.clone(),
    });
    let client = Arc::new(ChatClient::connect(config, confirm)?);
    spawn_renderer(&client);

    match client.verify_session().await {
        Ok(true) => {
            if let Some(user) = client.session.current_user() {
                println!("Signed in as {}.", user.username);
            }
            let _ = client.conversations.load().await;
            print_list(&client);
        }
        Ok(false) => println!("Sign in with /login or /register. /help lists commands."),
        Err(e) => {
            tracing::warn!(error = %e, "Could not verify stored session");
            println!("! {}", e.message);
        }
    }

    while let Some(line) = input.next_line().await {
        let Some(command) = parse_command(&line) else {
            continue;
        };
        if !dispatch(&client, command).await {
            break;
        }
    }

    tracing::info!("Exiting");
    Ok(())
}
