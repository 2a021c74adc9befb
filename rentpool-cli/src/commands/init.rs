use clap::Args;
use dialoguer::Confirm;
use rentpool_core::{Address, LedgerStore, PoolConfig, Storage};
use rentpool_lottery::whitelist::{parse_proof, MerkleTree};
use rentpool_lottery::{LotteryError, LotteryService, Result};

#[derive(Args)]
pub struct InitArgs {
    /// Address allowed to run admin commands
    #[arg(long)]
    admin: String,
    /// Address allowed to deliver randomness
    #[arg(long)]
    operator: String,
    /// Whitelist merkle root, hex encoded (defaults to the empty whitelist)
    #[arg(long)]
    merkle_root: Option<String>,
    /// Seconds a round stays open for deposits
    #[arg(long, default_value_t = 7 * 24 * 60 * 60)]
    deposit_window: i64,
    /// Seconds winners have to claim before the round can close
    #[arg(long, default_value_t = 7 * 24 * 60 * 60)]
    break_window: i64,
    /// Seconds before an unanswered randomness request may be retried
    #[arg(long, default_value_t = 24 * 60 * 60)]
    randomness_timeout: i64,
    /// Overwrite existing settings without confirmation
    #[arg(short, long)]
    force: bool,
}

pub async fn handle_init(args: InitArgs, storage: &Storage) -> Result<()> {
    let existing = LedgerStore::new(storage).load_pool_config().await?;
    if existing.is_some() && !args.force {
        let overwrite = Confirm::new()
            .with_prompt("Pool already initialized. Overwrite its settings?")
            .default(false)
            .interact()
            .map_err(|e| LotteryError::internal(format!("prompt failed: {}", e)))?;

        if !overwrite {
            println!("Aborted, settings unchanged.");
            return Ok(());
        }
    }

    let root = match &args.merkle_root {
        Some(root) => parse_proof(&[root])?
            .pop()
            .ok_or_else(|| LotteryError::InvalidParameter("empty merkle root".to_string()))?,
        None => MerkleTree::new(&[]).root(),
    };

    let admin: Address = args.admin.parse()?;
    let operator: Address = args.operator.parse()?;
    let mut config = PoolConfig::new(admin, operator, root);
    config.deposit_window_secs = args.deposit_window;
    config.break_window_secs = args.break_window;
    config.randomness_timeout_secs = args.randomness_timeout;

    LotteryService::initialize(storage, &config).await?;

    println!("Pool initialized");
    println!("  Admin: {}", config.admin);
    println!("  Randomness operator: {}", config.randomness_operator);
    println!("  Merkle root: {}", config.merkle_root);
    println!("  Deposit window: {}s", config.deposit_window_secs);
    println!("  Break window: {}s", config.break_window_secs);
    println!("  Randomness timeout: {}s", config.randomness_timeout_secs);
    Ok(())
}
