//! docsync: CLI client for the contract-backed document store.
//!
//! Each invocation connects as the given owner, runs one operation through a
//! `SyncController`, and prints the resulting view of the collection.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use docsync_cli::config;
use docsync_cli::http_store::HttpStore;
use docsync_core::{
    Address, CollectionDocument, EventBus, Profile, SessionState, Settings, SocialLinks,
    StoreConfig, SyncController, SyncEvent, Todo,
};

#[derive(Parser, Debug)]
#[command(name = "docsync")]
#[command(about = "Client for the on-chain document store")]
struct Args {
    /// Owner wallet address (0x-prefixed)
    #[arg(short, long)]
    owner: String,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the todos collection
    Todos {
        #[command(subcommand)]
        action: TodoAction,
    },
    /// Show or update the owner profile
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Show or update the owner settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand, Debug)]
enum TodoAction {
    /// List todos, newest first
    List,
    /// Add a todo and wait for confirmation
    Add {
        title: String,
        #[arg(default_value = "")]
        text: String,
    },
    /// Flip a todo's completion flag
    Toggle { id: String },
    /// Delete a todo
    Rm { id: String },
}

#[derive(Subcommand, Debug)]
enum ProfileAction {
    /// Print the stored profile
    Show,
    /// Update profile fields (unset fields keep their current value)
    Set {
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long)]
        bio: Option<String>,
        #[arg(long)]
        avatar: Option<String>,
        #[arg(long)]
        twitter: Option<String>,
        #[arg(long)]
        github: Option<String>,
        #[arg(long)]
        website: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    /// Print the stored settings
    Show,
    /// Update settings fields (unset fields keep their current value)
    Set {
        #[arg(long)]
        dark_mode: Option<bool>,
        #[arg(long)]
        notifications: Option<bool>,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        timezone: Option<String>,
    },
}

fn controller<T: CollectionDocument>(
    store: Arc<HttpStore>,
    config: &Arc<StoreConfig>,
    events: &Arc<EventBus>,
) -> SyncController<T, Arc<HttpStore>> {
    SyncController::new(store, Arc::clone(config), Arc::clone(events))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Respects RUST_LOG, defaults to info (or debug with --verbose).
    let default_filter = if args.verbose {
        "debug,docsync=debug"
    } else {
        "info,docsync=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Arc::new(config::load_from_env()?);
    info!("Document store: {}", config.document_store);
    info!("Treasury: {}", config.treasury);
    info!("RPC endpoint: {}", config.rpc_url);
    info!("REST endpoint: {}", config.rest_url);

    let owner: Address = args
        .owner
        .parse()
        .with_context(|| format!("invalid owner address {:?}", args.owner))?;

    let store = Arc::new(HttpStore::new(config.rest_url.clone()));
    let events = Arc::new(EventBus::new());
    let _log_sub = events.subscribe(|event| match &event {
        SyncEvent::ConfirmationTimedOut { key, attempts, .. } => {
            println!("note: write {key} not yet confirmed after {attempts} polls; it may still land");
        }
        other => debug!(?other, "sync event"),
    });

    match args.command {
        Command::Todos { action } => {
            let todos: SyncController<Todo, _> = controller(store, &config, &events);
            todos.set_session(SessionState::Connected(owner)).await;
            match action {
                TodoAction::List => {}
                TodoAction::Add { title, text } => {
                    todos.create(Todo::new(title, text)).await?;
                }
                TodoAction::Toggle { id } => {
                    todos.modify(&id, Todo::toggle).await?;
                }
                TodoAction::Rm { id } => {
                    todos.remove(&id).await?;
                }
            }
            for todo in todos.documents() {
                let mark = if todo.completed { "x" } else { " " };
                println!("[{mark}] {}  {}  ({})", todo.id, todo.title, todo.created_at);
            }
        }
        Command::Profile { action } => {
            let profiles: SyncController<Profile, _> = controller(store, &config, &events);
            profiles.set_session(SessionState::Connected(owner)).await;
            if let ProfileAction::Set {
                display_name,
                bio,
                avatar,
                twitter,
                github,
                website,
            } = action
            {
                let mut profile = profiles.documents().into_iter().next().unwrap_or_default();
                apply(&mut profile.display_name, display_name);
                apply(&mut profile.bio, bio);
                apply(&mut profile.avatar, avatar);
                let links = SocialLinks {
                    twitter: twitter.or(profile.social_links.twitter),
                    github: github.or(profile.social_links.github),
                    website: website.or(profile.social_links.website),
                };
                profile.social_links = links;
                profiles.create(profile).await?;
            }
            print_single(&profiles.documents())?;
        }
        Command::Settings { action } => {
            let settings: SyncController<Settings, _> = controller(store, &config, &events);
            settings.set_session(SessionState::Connected(owner)).await;
            if let SettingsAction::Set {
                dark_mode,
                notifications,
                language,
                timezone,
            } = action
            {
                let mut current = settings.documents().into_iter().next().unwrap_or_default();
                apply(&mut current.dark_mode, dark_mode);
                apply(&mut current.notifications, notifications);
                apply(&mut current.language, language);
                apply(&mut current.timezone, timezone);
                settings.create(current).await?;
            }
            print_single(&settings.documents())?;
        }
    }

    Ok(())
}

fn apply<V>(slot: &mut V, value: Option<V>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn print_single<T: serde::Serialize>(docs: &[T]) -> Result<()> {
    match docs.first() {
        Some(doc) => println!("{}", serde_json::to_string_pretty(doc)?),
        None => println!("(nothing stored yet)"),
    }
    Ok(())
}
