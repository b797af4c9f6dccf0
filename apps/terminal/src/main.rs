use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    config::load_settings, ClientEvent, ConversationController, HttpBackend, ImageUpload,
};
use shared::domain::{Language, Role, TranscriptEntry};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
    task::JoinHandle,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "crop-assist",
    about = "Chat with the crop assistant and send plant photos for diagnosis"
)]
struct Args {
    /// Base address of the assistant backend; overrides the derived one.
    #[arg(long)]
    backend_url: Option<String>,
    /// Address the client is served from; the backend defaults to its host on port 8000.
    #[arg(long)]
    origin_url: Option<String>,
    #[arg(long)]
    language: Option<Language>,
    /// Per-request timeout in seconds, 0 to wait indefinitely.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Debug, PartialEq, Eq)]
enum Intent {
    Say(String),
    ListLanguages,
    SetLanguage(String),
    Image(PathBuf),
    Help,
    Quit,
}

fn parse_intent(line: &str) -> Intent {
    let trimmed = line.trim();
    let (command, rest) = trimmed
        .split_once(char::is_whitespace)
        .map(|(command, rest)| (command, rest.trim()))
        .unwrap_or((trimmed, ""));
    match command {
        "/quit" | "/exit" => Intent::Quit,
        "/help" => Intent::Help,
        "/lang" if rest.is_empty() => Intent::ListLanguages,
        "/lang" => Intent::SetLanguage(rest.to_string()),
        "/image" => Intent::Image(PathBuf::from(rest)),
        _ => Intent::Say(line.to_string()),
    }
}

fn format_entry(entry: &TranscriptEntry) -> String {
    let speaker = match entry.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    format!(
        "[{}] {speaker}> {}",
        entry.sent_at.format("%H:%M:%S"),
        entry.content
    )
}

fn print_help() {
    println!("Type a message and press enter to send it.");
    println!("  /image <path>  send a plant photo for diagnosis");
    println!("  /lang          list languages");
    println!("  /lang <code>   switch language for the next requests");
    println!("  /quit          leave");
}

fn print_languages(current: Language) {
    for language in Language::ALL {
        let marker = if language == current { "*" } else { " " };
        println!("{marker} {}  {}", language.code(), language.label());
    }
}

/// `None` when no usable file was picked.
async fn load_image(path: &Path) -> Option<ImageUpload> {
    if path.as_os_str().is_empty() {
        eprintln!("usage: /image <path>");
        return None;
    }
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("terminal: cannot read image path={}: {err}", path.display());
            eprintln!("cannot read {}: {err}", path.display());
            return None;
        }
    };
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let mime_type = mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string());
    Some(ImageUpload {
        filename,
        mime_type,
        bytes,
    })
}

fn spawn_renderer(controller: &ConversationController) -> JoinHandle<()> {
    let mut events = controller.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ClientEvent::EntryAppended(entry)) => println!("{}", format_entry(&entry)),
                Ok(ClientEvent::BusyChanged(true)) => println!("… waiting for the assistant"),
                Ok(ClientEvent::BusyChanged(false)) => {}
                Ok(ClientEvent::LanguageChanged(language)) => {
                    println!("language set to {} ({})", language.label(), language.code());
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("terminal: renderer skipped {skipped} events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(v) = args.backend_url {
        settings.backend_url = Some(v);
    }
    if let Some(v) = args.origin_url {
        settings.origin_url = v;
    }
    if let Some(v) = args.language {
        settings.language = v;
    }
    if let Some(v) = args.timeout_secs {
        settings.request_timeout_secs = v;
    }

    let backend = HttpBackend::from_settings(&settings).context("failed to configure backend")?;
    println!("backend: {}", backend.base_url());
    let controller = ConversationController::with_backend(Arc::new(backend));
    controller.select_language(settings.language);
    println!(
        "session {} · {} · /help for commands",
        controller.session_id(),
        controller.language().label()
    );
    for entry in controller.transcript() {
        println!("{}", format_entry(&entry));
    }

    let renderer = spawn_renderer(&controller);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: Option<JoinHandle<()>> = None;

    while let Some(line) = lines.next_line().await.context("failed to read input")? {
        let exchange_open =
            controller.is_busy() || pending.as_ref().is_some_and(|task| !task.is_finished());
        match parse_intent(&line) {
            Intent::Quit => break,
            Intent::Help => print_help(),
            Intent::ListLanguages => print_languages(controller.language()),
            Intent::SetLanguage(code) => {
                if let Err(err) = controller.set_language(&code) {
                    eprintln!("{err}; /lang lists the supported codes");
                }
            }
            Intent::Say(_) | Intent::Image(_) if exchange_open => {
                eprintln!("still waiting for the assistant; send again once it replies");
            }
            Intent::Say(text) => {
                let controller = Arc::clone(&controller);
                pending = Some(tokio::spawn(async move {
                    controller.submit_text(&text).await;
                }));
            }
            Intent::Image(path) => {
                let controller = Arc::clone(&controller);
                pending = Some(tokio::spawn(async move {
                    let image = load_image(&path).await;
                    controller.submit_image(image).await;
                }));
            }
        }
    }

    if let Some(task) = pending {
        if let Err(err) = task.await {
            warn!("terminal: submission task failed: {err}");
        }
    }
    renderer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_messages() {
        assert_eq!(
            parse_intent("  will it rain? "),
            Intent::Say("  will it rain? ".to_string())
        );
        assert_eq!(parse_intent("/unknown thing"), Intent::Say("/unknown thing".to_string()));
    }

    #[test]
    fn commands_are_recognized() {
        assert_eq!(parse_intent("/quit"), Intent::Quit);
        assert_eq!(parse_intent(" /exit "), Intent::Quit);
        assert_eq!(parse_intent("/help"), Intent::Help);
        assert_eq!(parse_intent("/lang"), Intent::ListLanguages);
        assert_eq!(parse_intent("/lang  es "), Intent::SetLanguage("es".to_string()));
        assert_eq!(
            parse_intent("/image photos/leaf one.jpg"),
            Intent::Image(PathBuf::from("photos/leaf one.jpg"))
        );
        assert_eq!(parse_intent("/image"), Intent::Image(PathBuf::new()));
    }

    #[test]
    fn entries_render_with_speaker() {
        let line = format_entry(&TranscriptEntry::assistant("Hola"));
        assert!(line.ends_with("assistant> Hola"), "{line}");
        let line = format_entry(&TranscriptEntry::user("hi"));
        assert!(line.ends_with("you> hi"), "{line}");
    }

    #[tokio::test]
    async fn missing_image_path_yields_no_upload() {
        assert_eq!(load_image(Path::new("")).await, None);
        assert_eq!(
            load_image(Path::new("/definitely/not/here/leaf.jpg")).await,
            None
        );
    }
}
