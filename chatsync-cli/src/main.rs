use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use chatsync_common::models::cache::{DEFAULT_CONTEXT_WINDOW, DEFAULT_MAX_MESSAGES, DEFAULT_STORAGE_KEY};
use chatsync_common::models::{CacheConfig, Message, PendingEviction, ServerMessage, TrimPolicy};
use chatsync_core::utils::time::millis_to_rfc3339;
use chatsync_core::{ChatSyncService, Error, FileStore};

#[derive(Parser, Debug, Clone)]
#[command(name = "chatsync")]
#[command(author, version, about = "Inspect and drive a persisted chat message cache")]
struct Args {
    /// Directory holding the persisted cache. Defaults to the platform data dir.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Key the cache is stored under.
    #[arg(long, default_value = DEFAULT_STORAGE_KEY)]
    storage_key: String,

    /// Maximum number of messages kept before the oldest are evicted.
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGES)]
    max_messages: usize,

    /// Never evict unconfirmed messages while confirmed ones remain.
    #[arg(long, default_value = "false")]
    protect_pending: bool,

    /// Size of the context window returned by `context`.
    #[arg(long, default_value_t = DEFAULT_CONTEXT_WINDOW)]
    context_window: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Add an optimistic outgoing message; prints its temp id.
    Send { content: String },
    /// Confirm a pending message with its server id.
    Confirm {
        temp_id: String,
        id: String,
        /// Server-side content, if it differs from what was sent.
        #[arg(long)]
        content: Option<String>,
    },
    /// Mark a pending message as failed.
    Fail { temp_id: String },
    /// Move a failed message back to sending; prints it.
    Retry { temp_id: String },
    /// Add a message pushed by the server.
    Receive {
        id: String,
        content: String,
        /// The message was authored by the local user.
        #[arg(long, default_value = "false")]
        user: bool,
    },
    /// Merge a history page from a JSON array of server messages.
    History {
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value = "false")]
        has_more: bool,
        /// Append to the tail instead of replacing the cache.
        #[arg(long, default_value = "false")]
        append: bool,
    },
    /// Print every message in display order, one JSON object per line.
    List,
    /// Print the most recent messages used as conversation context.
    Context {
        #[arg(long)]
        max: Option<usize>,
    },
    /// Print cache counters.
    Status,
    /// Drop every message and the persisted copy.
    Clear,
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("chatsync=info".parse().unwrap_or_default());
    let sub = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(sub)
        .expect("Failed to set global subscriber");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    if let Err(e) = run(args) {
        error!("chatsync error: {:?}", e);
        return Err(e.into());
    }
    Ok(())
}

fn build_config(args: &Args) -> CacheConfig {
    CacheConfig {
        trim_policy: TrimPolicy {
            max_total_messages: args.max_messages,
            pending_eviction: if args.protect_pending {
                PendingEviction::Protect
            } else {
                PendingEviction::Evict
            },
        },
        storage_key: args.storage_key.clone(),
        context_window: args.context_window,
    }
}

fn run(args: Args) -> Result<(), Error> {
    let data_dir = match args.data_dir.clone().or_else(FileStore::default_dir) {
        Some(dir) => dir,
        None => {
            return Err(Error::InvalidArgument(
                "no platform data directory; pass --data-dir".into(),
            ));
        }
    };
    let store = FileStore::open(&data_dir)?;
    info!("Using cache at {} (key '{}')", data_dir.display(), args.storage_key);

    let mut service = ChatSyncService::create(Arc::new(store), build_config(&args));

    match args.command {
        Command::Send { content } => {
            let temp_id = service.add_optimistic_message(content);
            println!("{}", temp_id);
        }
        Command::Confirm { temp_id, id, content } => {
            let content = match content {
                Some(c) => c,
                None => service
                    .get_message(&temp_id)
                    .map(|m| m.content.clone())
                    .ok_or_else(|| Error::NotFound(format!("no pending message {}", temp_id)))?,
            };
            service.confirm_message(&temp_id, ServerMessage::new(id, content, true));
        }
        Command::Fail { temp_id } => {
            service.mark_message_failed(&temp_id);
        }
        Command::Retry { temp_id } => match service.retry_message(&temp_id) {
            Some(message) => print_message(&message)?,
            None => {
                return Err(Error::NotFound(format!("no failed message {}", temp_id)));
            }
        },
        Command::Receive { id, content, user } => {
            service.add_received_message(ServerMessage::new(id, content, user));
        }
        Command::History { file, page, has_more, append } => {
            let raw = fs::read_to_string(&file)?;
            let messages: Vec<ServerMessage> = serde_json::from_str(&raw)?;
            info!("Merging {} history messages from {}", messages.len(), file.display());
            service.add_history_messages(messages, has_more, page, append);
        }
        Command::List => {
            for message in service.get_messages_for_render() {
                print_message(&message)?;
            }
        }
        Command::Context { max } => {
            let messages = match max {
                Some(n) => service.get_recent_messages_for_context(n),
                None => service.recent_context(),
            };
            for message in messages {
                print_message(&message)?;
            }
        }
        Command::Status => {
            let snap = service.snapshot();
            let newest = service
                .get_recent_messages_for_context(1)
                .first()
                .and_then(Message::client_time)
                .map(|t| t.to_rfc3339());
            let status = serde_json::json!({
                "total": snap.total_count,
                "confirmed": snap.confirmed.len(),
                "pending": snap.pending.len(),
                "failed": service.failed_messages().len(),
                "page": snap.page,
                "hasMore": snap.has_more,
                "lastSync": snap.last_sync_timestamp.map(millis_to_rfc3339),
                "newestAt": newest,
            });
            println!("{}", status);
        }
        Command::Clear => {
            service.clear_all();
        }
    }
    Ok(())
}

fn print_message(message: &Message) -> Result<(), Error> {
    println!("{}", serde_json::to_string(message)?);
    Ok(())
}
