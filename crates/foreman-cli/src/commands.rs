use clap::{Parser, Subcommand};
use std::path::PathBuf;

use foreman_config::{ConfigLoader, ForemanConfig};
use foreman_core::{ForemanError, Result};
use foreman_runtime::ChatService;

mod chat;

/// Foreman: multi-agent conversation orchestrator
#[derive(Parser)]
#[command(name = "foreman", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to foreman.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered apps
    Apps,
    /// List sessions, oldest first
    Sessions,
    /// Create a session bound to an app
    New {
        /// App id, e.g. iiot or assistant
        app: String,
    },
    /// Interactive chat against an existing session
    Chat {
        /// Session ID (see `foreman new`)
        #[arg(short, long)]
        session: String,
        /// Customer scope for customer-owned records
        #[arg(long)]
        customer: Option<String>,
        /// User scope for the user profile
        #[arg(long)]
        user: Option<String>,
        /// Workspace scope for workspace knowledge
        #[arg(long)]
        workspace: Option<String>,
        /// Stream replies as they are produced
        #[arg(long)]
        stream: bool,
    },
    /// Print the visible history of a session
    Messages {
        session: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // Resolve log level: --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level.as_deref().unwrap_or(&config.logging.level)
        };
        init_logging(&config.logging.format, log_level);

        match self.command {
            Commands::Config { json } => Self::cmd_config(&config, json),
            Commands::Apps => Self::cmd_apps(&service(&config)?),
            Commands::Sessions => Self::cmd_sessions(&service(&config)?).await,
            Commands::New { app } => Self::cmd_new(&service(&config)?, &app).await,
            Commands::Messages { session, json } => {
                Self::cmd_messages(&service(&config)?, &session, json).await
            }
            Commands::Chat {
                session,
                customer,
                user,
                workspace,
                stream,
            } => {
                let scope = chat::Scope {
                    session,
                    customer,
                    user,
                    workspace,
                };
                chat::cmd_chat(service(&config)?, scope, stream).await
            }
        }
    }

    fn cmd_apps(service: &ChatService) -> Result<()> {
        for app in service.list_apps() {
            println!("  {:<12} {} v{}  {}", app.id, app.name, app.version, app.description);
        }
        Ok(())
    }

    async fn cmd_sessions(service: &ChatService) -> Result<()> {
        let sessions = service.list_sessions().await?;
        if sessions.is_empty() {
            println!("No sessions yet. Create one with `foreman new <app>`.");
        }
        for s in sessions {
            println!(
                "  {}  {:<10} {}",
                s.id,
                s.app_name,
                s.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        Ok(())
    }

    async fn cmd_new(service: &ChatService, app: &str) -> Result<()> {
        let session = service.create_session(app).await?;
        println!("{}", session.id);
        Ok(())
    }

    async fn cmd_messages(service: &ChatService, session: &str, json: bool) -> Result<()> {
        let messages = service.list_messages(session).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&messages)?);
            return Ok(());
        }
        for m in messages {
            println!("\x1b[1m{:>5}>\x1b[0m {}", m.role, m.content);
        }
        Ok(())
    }

    fn cmd_config(config: &ForemanConfig, json: bool) -> Result<()> {
        // Never print the key itself
        let mut shown = config.clone();
        if shown.model.api_key.is_some() {
            shown.model.api_key = Some("********".into());
        }
        if json {
            println!("{}", serde_json::to_string_pretty(&shown)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&shown).map_err(|e| ForemanError::Config(e.to_string()))?
            );
        }
        Ok(())
    }
}

fn service(config: &ForemanConfig) -> Result<ChatService> {
    ChatService::from_config(config)
}

/// Initialize tracing. Logs go to stderr so replies on stdout stay clean.
fn init_logging(format: &str, level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init(),
    }
}
