pub mod animator;
pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod poller;
pub mod profile;
pub mod session;
pub mod store;
pub mod stream;
pub mod theme;
pub mod transcript;

use api::HttpBackend;
use cli::render::{ format_message, spawn_renderer };
use cli::{ Args, Command, ProfileAction };
use config::prompt::load_prompts;
use config::SessionConfig;
use log::{ info, warn };
use models::document::DocumentKind;
use models::profile::SessionProfile;
use session::ChatSession;
use std::error::Error;
use std::sync::Arc;
use tokio::io::{ AsyncBufReadExt, BufReader };

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("API Base URL: {}", args.api_base_url);
    info!("Store Type: {}", args.store_type);
    if args.store_type.eq_ignore_ascii_case("redis") {
        info!("Store Redis URL: {}", args.store_redis_url);
        info!("Store Redis Prefix: {}", args.store_redis_prefix);
    } else {
        info!("Data Dir: {}", args.data_dir);
    }
    info!("Prompts Path: {}", args.prompts_path.as_deref().unwrap_or("<built-in>"));
    info!("Poll Interval: {}ms", args.poll_interval_ms);
    info!("Quiet Window: {}ms", args.quiet_window_ms);
    info!("Typing Cadence: {}ms", args.typing_cadence_ms);
    info!("Export Dir: {}", args.export_dir);
    info!("-------------------------");

    let config = SessionConfig::from_args(&args)?;
    let prompts = load_prompts(args.prompts_path.as_deref())?;
    let store = store::initialize_store(&args)?;

    let command = args.command.clone().unwrap_or(Command::Chat);
    let backend = Arc::new(HttpBackend::new(&config.api_base_url)?);
    let session = ChatSession::new(&config, prompts, backend, store).await;

    match command {
        Command::Chat => chat(&session).await?,
        Command::Send { text } => {
            session.start().await?;
            let outcome = session.send(&text).await?;
            if let stream::StreamClosure::Failed(e) = &outcome.closure {
                warn!("Reply ended early: {}", e);
            }
            println!("{}", outcome.content);
        }
        Command::History => {
            session.start().await?;
            for message in session.visible_messages() {
                println!("{}", format_message(&message));
            }
        }
        Command::Reset => session.reset().await,
        Command::Profile { action } => update_profile(&session, action).await?,
        Command::Export { kind } => export(&session, kind).await?,
        Command::Theme { toggle } => {
            let current = if toggle { session.toggle_theme().await? } else { session.theme().await };
            println!("{}", current);
        }
    }

    Ok(())
}

async fn update_profile(session: &ChatSession, action: ProfileAction) -> Result<(), Box<dyn Error + Send + Sync>> {
    let profile = session.profile();
    match action {
        ProfileAction::Show => {
            match profile.current() {
                Some(current) => println!("{}", serde_json::to_string_pretty(&current)?),
                None => println!("No profile saved"),
            }
        }
        ProfileAction::Set { age, height, weight, goal, activity, medical_notes } => {
            let mut updated = profile.current().unwrap_or_default();
            updated.age = age.or(updated.age);
            updated.height = height.or(updated.height);
            updated.weight = weight.or(updated.weight);
            updated.goal = goal.or(updated.goal);
            updated.activity = activity.or(updated.activity);
            updated.medical_notes = medical_notes.or(updated.medical_notes);
            profile.save(updated).await?;
        }
        ProfileAction::Clear => profile.save(SessionProfile::default()).await?,
    }
    Ok(())
}

async fn export(session: &ChatSession, kind: DocumentKind) -> Result<(), Box<dyn Error + Send + Sync>> {
    match session.request_document(kind).await? {
        Some(path) => println!("{}", path.display()),
        None => println!("No {} plan available to export", kind),
    }
    Ok(())
}

/// Interactive loop. Plain lines are sent as messages; `/reset`, `/routine`,
/// `/diet` and `/quit` are handled locally.
async fn chat(session: &ChatSession) -> Result<(), Box<dyn Error + Send + Sync>> {
    let renderer = spawn_renderer(session);
    let history = session.visible_messages();
    for message in &history {
        println!("{}", format_message(message));
    }
    if session.start().await?.is_none() {
        for message in session.visible_messages().iter().skip(history.len()) {
            println!("{}", format_message(message));
        }
    }
    let poller = session.spawn_poller();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {
                continue;
            }
            "/quit" | "/exit" => {
                break;
            }
            "/reset" => session.reset().await,
            "/routine" => export(session, DocumentKind::Routine).await?,
            "/diet" => export(session, DocumentKind::Diet).await?,
            text => {
                let outcome = session.send(text).await?;
                if let stream::StreamClosure::Failed(e) = &outcome.closure {
                    warn!("Reply ended early: {}", e);
                }
            }
        }
    }

    poller.stop().await;
    renderer.abort();
    Ok(())
}
