mod commands;
mod config;
mod local;

use clap::{Parser, Subcommand};
use config::CliConfig;
use local::{JournalTreasury, ManualRandomness};
use rentpool_core::{PoolError, Storage};
use rentpool_lottery::{ErrorKind, LotteryError, LotteryService, Result, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rentpool")]
#[command(about = "Round-based lottery with rentable tickets")]
#[command(version)]
struct Cli {
    /// Data directory holding the pool database
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Address to act as
    #[arg(short, long, global = true)]
    caller: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the pool settings
    Init(commands::InitArgs),

    /// Round lifecycle commands
    #[command(subcommand)]
    Round(commands::RoundCommands),

    /// Enter the current round with a deposit
    Deposit {
        /// Amount in units; 0 is reserved for whitelisted addresses
        amount: u64,
    },

    /// Rent another holder's ticket for the current round
    Rent {
        /// Ticket id
        ticket: u64,
        /// Amount paid, defaults to the configured rent amount
        #[arg(short, long)]
        amount: Option<u64>,
    },

    /// Collect winnings and withdrawable balance
    Claim,

    /// Deliver randomness for a pending request (operator)
    Deliver {
        /// Request handle printed by `round break`
        handle: String,
        /// Random values, one per winner
        values: Vec<u64>,
        /// Draw the values locally instead
        #[arg(short, long, conflicts_with = "values")]
        random: bool,
    },

    /// Admin parameters
    #[command(subcommand)]
    Admin(commands::AdminCommands),

    /// Whitelist commands
    #[command(subcommand)]
    Whitelist(commands::WhitelistCommands),

    /// Ticket commands
    #[command(subcommand)]
    Ticket(commands::TicketCommands),

    /// Show a withdrawable balance and its transfers
    Balance {
        /// Address, defaults to the caller
        address: Option<String>,
    },
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "rentpool={},rentpool_core={},rentpool_lottery={}",
            log_level, log_level, log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CliConfig::new(cli.data_dir, cli.caller);
    tokio::fs::create_dir_all(&config.data_dir).await?;
    let storage = Arc::new(Storage::new(&config.db_path()).await?);

    let result = match cli.command {
        Commands::Init(args) => commands::handle_init(args, &storage).await,
        Commands::Whitelist(cmd) if cmd.is_offline() => commands::handle_whitelist_offline(cmd),
        command => run(command, storage, &config).await,
    };

    if let Err(e) = result {
        report(&e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(command: Commands, storage: Arc<Storage>, config: &CliConfig) -> Result<()> {
    let service = LotteryService::open(
        storage.clone(),
        Arc::new(JournalTreasury::new(storage)),
        Arc::new(ManualRandomness),
        Arc::new(SystemClock),
    )
    .await?;
    tracing::debug!("Opened pool at {}", config.db_path().display());

    match command {
        Commands::Round(cmd) => commands::handle_round_command(cmd, &service, config).await,
        Commands::Deposit { amount } => commands::handle_deposit(&service, config, amount).await,
        Commands::Rent { ticket, amount } => {
            commands::handle_rent(&service, config, ticket, amount).await
        }
        Commands::Claim => commands::handle_claim(&service, config).await,
        Commands::Deliver {
            handle,
            values,
            random,
        } => commands::handle_deliver(&service, config, &handle, values, random).await,
        Commands::Admin(cmd) => commands::handle_admin_command(cmd, &service, config).await,
        Commands::Whitelist(cmd) => commands::handle_whitelist_command(cmd, &service, config).await,
        Commands::Ticket(cmd) => commands::handle_ticket_command(cmd, &service, config).await,
        Commands::Balance { address } => commands::handle_balance(&service, config, address).await,
        Commands::Init(_) => Err(LotteryError::internal("init is handled before opening the pool")),
    }
}

fn report(e: &LotteryError) {
    match e {
        LotteryError::Core(PoolError::NotInitialized) => {
            eprintln!("Error: pool is not initialized");
            eprintln!("Use 'rentpool init --admin <address> --operator <address>' first");
        }
        LotteryError::TooEarly { ready_at } => {
            eprintln!("Error: too early");
            eprintln!("Try again after {}", ready_at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        _ => match e.kind() {
            ErrorKind::Authorization => {
                eprintln!("Error: {}", e);
                eprintln!("Pass the authorized identity with --caller");
            }
            ErrorKind::Eligibility => {
                eprintln!("Nothing claimable: {}", e);
            }
            ErrorKind::Transfer => {
                eprintln!("Error: {}", e);
                eprintln!("The operation was rolled back");
            }
            _ => {
                eprintln!("Error: {}", e);
            }
        },
    }
}
