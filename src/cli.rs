//! agent-memory CLI - inspect and edit a memory data directory
//!
//! Usage:
//!   agent-memory sessions                      List sessions
//!   agent-memory session <id>                  Show one session
//!   agent-memory search <agent> "query"        Search an agent's memories
//!   agent-memory remember <agent> <session> "content"
//!                                              Store a memory
//!   agent-memory forget <agent> <id>...        Delete memories
//!   agent-memory usage <agent> <session>       Token usage of stored history

use agent_memory::{
    MemoryRecord, MemorySystem, MemorySystemConfig, MemoryType, Message, SessionOrder,
};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "agent-memory")]
#[command(about = "Inspect the context & memory store of conversational agents")]
#[command(version)]
struct Cli {
    /// Path to data directory
    #[arg(short, long, env = "AGENT_MEMORY_DATA_DIR", default_value = "./agent_memory_data")]
    data_dir: PathBuf,

    /// JSON configuration file (overrides defaults; --data-dir still wins)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List sessions, most recent first
    Sessions {
        #[arg(short, long, default_value = "20")]
        limit: i64,

        #[arg(long, default_value = "0")]
        offset: i64,

        /// Order by creation or last activity
        #[arg(short, long, value_enum, default_value = "active")]
        order: CliSessionOrder,
    },

    /// Show a session summary
    Session {
        /// Session ID
        id: String,

        /// Also print the raw messages
        #[arg(short, long)]
        messages: bool,
    },

    /// Search an agent's memories
    Search {
        agent: String,

        query: String,

        #[arg(short = 't', long, value_enum)]
        memory_type: Option<CliMemoryType>,

        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Store a memory
    Remember {
        agent: String,

        session: String,

        content: String,

        #[arg(short = 't', long, value_enum, default_value = "episodic")]
        memory_type: CliMemoryType,

        /// Importance (0.0-1.0)
        #[arg(short, long, default_value = "0.5")]
        importance: f32,
    },

    /// Delete memories owned by an agent
    Forget {
        agent: String,

        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Token usage of an agent's stored conversation
    Usage { agent: String, session: String },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum CliMemoryType {
    Working,
    Episodic,
    Semantic,
}

impl From<CliMemoryType> for MemoryType {
    fn from(cli: CliMemoryType) -> Self {
        match cli {
            CliMemoryType::Working => MemoryType::Working,
            CliMemoryType::Episodic => MemoryType::Episodic,
            CliMemoryType::Semantic => MemoryType::Semantic,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum CliSessionOrder {
    Created,
    Active,
}

impl From<CliSessionOrder> for SessionOrder {
    fn from(cli: CliSessionOrder) -> Self {
        match cli {
            CliSessionOrder::Created => SessionOrder::CreatedAt,
            CliSessionOrder::Active => SessionOrder::LastActive,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "info,agent_memory=debug"
    } else {
        "warn"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = match &cli.config {
        Some(path) => MemorySystemConfig::from_json_file(path)?,
        None => MemorySystemConfig::default(),
    };
    config.data_dir = cli.data_dir.clone();

    let system = MemorySystem::open(config).await?;

    match cli.command {
        Commands::Sessions {
            limit,
            offset,
            order,
        } => cmd_sessions(&system, limit, offset, order).await,
        Commands::Session { id, messages } => cmd_session(&system, &id, messages).await,
        Commands::Search {
            agent,
            query,
            memory_type,
            limit,
        } => cmd_search(&system, &agent, &query, memory_type, limit).await,
        Commands::Remember {
            agent,
            session,
            content,
            memory_type,
            importance,
        } => cmd_remember(&system, &agent, &session, content, memory_type, importance).await,
        Commands::Forget { agent, ids } => cmd_forget(&system, &agent, &ids).await,
        Commands::Usage { agent, session } => cmd_usage(&system, &agent, &session).await,
    }
}

async fn cmd_sessions(
    system: &MemorySystem,
    limit: i64,
    offset: i64,
    order: CliSessionOrder,
) -> anyhow::Result<()> {
    let sessions = system.list_sessions(limit, offset, order.into()).await?;

    if sessions.is_empty() {
        println!("{}", "No sessions found".yellow());
        return Ok(());
    }

    println!("{}", format!("{} sessions:", sessions.len()).bold().green());
    for session in sessions {
        println!(
            "  {}  created {}  active {}",
            session.id.cyan(),
            session.created_at.format("%Y-%m-%d %H:%M"),
            session.last_active.format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

async fn cmd_session(system: &MemorySystem, id: &str, show_messages: bool) -> anyhow::Result<()> {
    let Some(summary) = system.session_summary(id).await? else {
        println!("{}", format!("Session not found: {}", id).red());
        return Ok(());
    };

    println!("{}", "Session Details".bold().underline());
    println!("  ID:          {}", summary.session_id.cyan());
    println!("  Created:     {}", summary.created_at);
    println!("  Last active: {}", summary.last_active);
    println!("  Messages:    {}", summary.message_count);
    if !summary.metadata.is_empty() {
        println!(
            "  Metadata:    {}",
            serde_json::to_string_pretty(&summary.metadata)?
        );
    }

    if show_messages {
        let messages = system.manager().get_messages(id, None, 0, None).await?;
        println!();
        for message in messages {
            println!(
                "  [{}] {} ({}): {}",
                message.timestamp.format("%H:%M:%S"),
                message.sender.bold(),
                message.kind,
                message.content
            );
        }
    }

    Ok(())
}

async fn cmd_search(
    system: &MemorySystem,
    agent: &str,
    query: &str,
    memory_type: Option<CliMemoryType>,
    limit: usize,
) -> anyhow::Result<()> {
    let results = system
        .search_memories(agent, query, memory_type.map(Into::into), Some(limit))
        .await?;

    if results.is_empty() {
        println!("{}", "No memories found".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("Found {} memories:", results.len()).bold().green()
    );
    println!();

    for memory in &results {
        let importance = format!("{:.2}", memory.importance_score);
        let importance = if memory.importance_score >= 0.7 {
            importance.green()
        } else if memory.importance_score >= 0.4 {
            importance.yellow()
        } else {
            importance.red()
        };

        println!(
            "  #{} [{}] {} {}",
            memory.id.unwrap_or_default().to_string().cyan(),
            memory.memory_type,
            importance,
            memory.content
        );
        println!(
            "      session {}  accessed {}x",
            memory.session_id.dimmed(),
            memory.access_count
        );
    }

    Ok(())
}

async fn cmd_remember(
    system: &MemorySystem,
    agent: &str,
    session: &str,
    content: String,
    memory_type: CliMemoryType,
    importance: f32,
) -> anyhow::Result<()> {
    let record = MemoryRecord::new(agent, session, memory_type.into(), content)
        .with_importance(importance);
    let id = system.store_memory(record).await?;

    println!("{}", "Memory stored".green().bold());
    println!("  ID: {}", id.to_string().cyan());

    Ok(())
}

async fn cmd_forget(system: &MemorySystem, agent: &str, ids: &[i64]) -> anyhow::Result<()> {
    let deleted = system.delete_memories(agent, ids).await?;

    if deleted == 0 {
        println!("{}", "No matching memories".yellow());
    } else {
        println!("{}", format!("Deleted {} memories", deleted).green());
    }

    Ok(())
}

async fn cmd_usage(system: &MemorySystem, agent: &str, session: &str) -> anyhow::Result<()> {
    let history = system.get_conversation_history(agent, session, None).await?;
    let messages: Vec<Message> = history.iter().map(|entry| entry.to_message()).collect();
    let usage = system.get_token_usage(&messages);

    println!("{}", "Token Usage".bold().underline());
    println!("  Messages:  {}", usage.message_count);
    println!(
        "  Tokens:    {} / {} (max {}, buffer {})",
        usage.total_tokens, usage.effective_max_tokens, usage.max_tokens, usage.buffer_tokens
    );
    println!("  Available: {}", usage.available_tokens);

    if usage.needs_pruning {
        println!("{}", "  Over budget: pruning required".red());
    } else {
        println!("{}", "  Within budget".green());
    }

    Ok(())
}
