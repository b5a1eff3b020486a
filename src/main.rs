//! Interactive chat session
//!
//! Reads turns and commands from stdin and prints the streamed replies.

use chat_session::api::{has_model, load_models, HttpApi};
use chat_session::config::{ClientConfig, SessionConfig};
use chat_session::conversation::{Message, Role};
use chat_session::preview::{fetch_preview, Preview};
use chat_session::runtime::{SessionHandle, SessionRuntime, SessionUpdate, SessionView};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "Commands: /reset, /regen <n>, /history, /load <id>, /delete <id>, /models, /preview <n> <k>, /quit";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Say(String),
    Reset,
    Regenerate(usize),
    History,
    Load(String),
    Delete(String),
    Models,
    Preview(usize, usize),
    Quit,
    Help,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return (!line.is_empty()).then(|| Command::Say(line.to_string()));
        };
        let mut parts = rest.split_whitespace();
        let command = match (parts.next()?, parts.next(), parts.next()) {
            ("reset", None, _) => Command::Reset,
            ("regen", Some(n), None) => Command::Regenerate(n.parse().ok()?),
            ("history", None, _) => Command::History,
            ("load", Some(id), None) => Command::Load(id.to_string()),
            ("delete", Some(id), None) => Command::Delete(id.to_string()),
            ("models", None, _) => Command::Models,
            ("preview", Some(n), Some(k)) => Command::Preview(n.parse().ok()?, k.parse().ok()?),
            ("quit" | "exit", None, _) => Command::Quit,
            _ => Command::Help,
        };
        Some(command)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries the conversation
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_session=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let client_config = ClientConfig::from_env();
    let config = SessionConfig::load(&client_config.session_path, client_config.default_session())?;
    tracing::info!(
        api_url = %client_config.api_url,
        model = %config.model,
        authenticated = client_config.token.is_some(),
        "Starting chat session"
    );

    let api = Arc::new(HttpApi::new(&client_config)?);
    let models = match load_models(&*api).await {
        Ok(models) => {
            if !models.is_empty() && !has_model(&models, &config.model) {
                tracing::warn!(model = %config.model, "Configured model is not offered by the service");
            }
            models
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not list models");
            vec![]
        }
    };

    let runtime = SessionRuntime::new(config, api.clone(), api.clone());
    let handle = runtime.handle();
    let view = Arc::new(Mutex::new(SessionView::default()));
    let printer = tokio::spawn(print_updates(handle.clone(), view.clone()));
    let runtime = tokio::spawn(runtime.run());

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(command) = Command::parse(&line) else {
            continue;
        };
        let result = match command {
            Command::Say(text) => handle.submit(text, vec![], vec![]).await,
            Command::Reset => handle.reset().await,
            Command::Regenerate(index) => handle.regenerate(index).await,
            Command::History => match handle.list_chats().await {
                Ok(chats) => {
                    for chat in chats {
                        println!("{}  {}", chat.id, chat.title());
                    }
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Command::Load(id) => handle.load_chat(&id).await,
            Command::Delete(id) => handle.delete_chat(&id).await,
            Command::Models => {
                if models.is_empty() {
                    println!("No models available");
                }
                for model in &models {
                    println!("{}", model.model_name);
                }
                Ok(())
            }
            Command::Preview(index, source) => {
                let document = view.lock().await.source(index, source).cloned();
                match document {
                    Some(document) => fetch_preview(&*api, &document).await.map(show_preview),
                    None => {
                        println!("No source {source} on message {index}");
                        Ok(())
                    }
                }
            }
            Command::Help => {
                println!("{HELP}");
                Ok(())
            }
            Command::Quit => break,
        };
        if let Err(e) = result {
            eprintln!("! {e}");
        }
    }

    handle.shutdown();
    let config = runtime.await?;
    config.save(&client_config.session_path)?;
    tracing::info!(path = %client_config.session_path.display(), "Saved session config");
    printer.abort();
    Ok(())
}

/// Render updates to stdout and keep `view` current
async fn print_updates(handle: SessionHandle<HttpApi>, view: Arc<Mutex<SessionView>>) {
    let mut updates = BroadcastStream::new(handle.subscribe());
    let mut shown = 0;

    while let Some(update) = updates.next().await {
        let update = match update {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!(error = %e, "Display fell behind");
                continue;
            }
        };
        view.lock().await.apply(&update);

        match &update {
            SessionUpdate::MessageAppended { message, .. } if message.role == Role::Assistant => {
                shown = 0;
                print!("assistant: ");
            }
            SessionUpdate::Partial { content }
            | SessionUpdate::Finalized {
                message: Message { content, .. },
                ..
            } => {
                if let Some(delta) = content.get(shown..) {
                    print!("{delta}");
                }
                shown = content.len();
                if matches!(update, SessionUpdate::Finalized { .. }) {
                    println!();
                }
            }
            SessionUpdate::ReplyDiscarded => println!(),
            SessionUpdate::Notice { message, .. } => eprintln!("! {message}"),
            SessionUpdate::InputSeeded { text, .. } => println!("Edit and resend: {text}"),
            SessionUpdate::ConversationReset => println!("-- new conversation --"),
            SessionUpdate::ConversationLoaded { session_id, messages } => {
                println!("-- loaded {session_id} --");
                for (i, message) in messages.iter().enumerate() {
                    println!("[{}] {}: {}", i + 1, message.role.as_str(), message.content);
                }
            }
            _ => {}
        }
        let _ = std::io::stdout().flush();
    }
}

fn show_preview(preview: Preview) {
    match preview {
        Preview::Text(text) => println!("{text}"),
        Preview::Csv(rows) => {
            for row in rows {
                println!("{}", row.join(" | "));
            }
        }
        Preview::External(document) => println!("Open {} ({})", document.src, document.media_type),
    }
}
