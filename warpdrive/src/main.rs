use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use warpdrive::{
    ClientKey, LedgerKind, LockoutKind, OptionScope, SqliteOptionStore, Warpdrive,
    WarpdriveError,
};

/// Administer warpdrive login throttling
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database connection string
    #[arg(long, env = "WARPDRIVE_DATABASE_URL")]
    database_url: String,

    /// Use the options shared by every site of a network installation
    #[arg(long)]
    network: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Print lockout statistics
    Stats,
    /// Show the throttle status of a client
    Status {
        /// Client address
        client: String,
    },
    /// Lift the lockout of a client
    Unlock {
        /// Client address
        client: String,
    },
    /// Reset throttling state
    Reset {
        #[arg(value_enum)]
        target: ResetTarget,
    },
    /// Show or change the configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print a lockout log
    Log {
        #[arg(value_enum, default_value_t = LogKind::Login)]
        kind: LogKind,

        /// Empty the log after printing it
        #[arg(long)]
        clear: bool,
    },
    /// Purge expired entries from every ledger
    Cleanup,
}

#[derive(Clone, Copy, ValueEnum)]
enum ResetTarget {
    /// Every login lockout, and the lockout statistic
    Lockouts,
    /// Every registration count, and the registration statistic
    Registrations,
    /// Every failed login count
    Attempts,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the active configuration
    Show,
    /// Restore the default configuration
    Reset,
    /// Apply a JSON object of changes, e.g. '{"allowed_attempts": 3}'
    Set { json: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogKind {
    Login,
    Registration,
}

impl From<LogKind> for LockoutKind {
    fn from(kind: LogKind) -> Self {
        match kind {
            LogKind::Login => LockoutKind::Login,
            LogKind::Registration => LockoutKind::Registration,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warpdrive=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "Command failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), WarpdriveError> {
    let scope = if cli.network {
        OptionScope::Network
    } else {
        OptionScope::Site
    };
    let store = SqliteOptionStore::connect(&cli.database_url)
        .await?
        .with_scope(scope);

    if let Commands::Migrate = cli.command {
        let applied = store.run_migrations().await?;
        println!("Applied {applied} migration(s)");
        return Ok(());
    }

    let warpdrive = Warpdrive::new(Arc::new(store)).await?;
    let admin = warpdrive.admin();

    match cli.command {
        Commands::Migrate => {}
        Commands::Stats => print_json(&admin.statistics().await?)?,
        Commands::Status { client } => {
            let status = warpdrive.limits().login_status(&ClientKey::new(client)).await;
            print_json(&status)?;
        }
        Commands::Unlock { client } => {
            let client = ClientKey::new(client);
            if admin.unlock(&client).await? {
                println!("Unlocked {client}");
            } else {
                println!("{client} is not locked out");
            }
        }
        Commands::Reset { target } => {
            match target {
                ResetTarget::Lockouts => admin.reset_lockouts().await?,
                ResetTarget::Registrations => admin.reset_registration_lockouts().await?,
                ResetTarget::Attempts => admin.reset_ledger(LedgerKind::Attempts).await?,
            }
            println!("Reset done");
        }
        Commands::Config { command } => {
            let config = match command {
                ConfigCommand::Show => admin.config().await,
                ConfigCommand::Reset => admin.reset_config_to_defaults().await?,
                ConfigCommand::Set { json } => {
                    let update = serde_json::from_str(&json).map_err(|e| {
                        WarpdriveError::ConfigError(format!("not a JSON object: {e}"))
                    })?;
                    admin.update_config_json(update).await?
                }
            };
            print_json(&config)?;
        }
        Commands::Log { kind, clear } => {
            print_json(&admin.lockout_log(kind.into()).await?)?;
            if clear {
                admin.clear_lockout_log(kind.into()).await?;
            }
        }
        Commands::Cleanup => {
            let summary = warpdrive.limits().cleanup().await?;
            print_json(&summary)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), WarpdriveError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| WarpdriveError::StorageError(e.to_string()))?;
    println!("{json}");
    Ok(())
}
