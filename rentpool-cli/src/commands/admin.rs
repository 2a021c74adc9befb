use crate::config::CliConfig;
use clap::Subcommand;
use rentpool_core::Amount;
use rentpool_lottery::{LotteryService, Result};

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Set how many winners the next break draws (1-500)
    Winners { count: u32 },
    /// Set the protocol fee in basis points
    ProtocolFee { bps: u16 },
    /// Set the owner's cut of borrower winnings in basis points
    RentFee { bps: u16 },
    /// Set the price of renting a ticket for one round
    RentAmount { amount: u64 },
    /// Transfer accrued protocol fees to the admin
    CollectFees,
    /// Show current parameters
    Show,
}

pub async fn handle_admin_command(
    cmd: AdminCommands,
    service: &LotteryService,
    config: &CliConfig,
) -> Result<()> {
    match cmd {
        AdminCommands::Winners { count } => {
            service.set_winner_count(&config.caller()?, count).await?;
            println!("Winner count set to {}", count);
        }

        AdminCommands::ProtocolFee { bps } => {
            service.set_protocol_fee(&config.caller()?, bps).await?;
            println!("Protocol fee set to {} bps", bps);
        }

        AdminCommands::RentFee { bps } => {
            service.set_rent_fee(&config.caller()?, bps).await?;
            println!("Rent fee set to {} bps", bps);
        }

        AdminCommands::RentAmount { amount } => {
            let amount = Amount::from_units(amount);
            service.set_rent_amount(&config.caller()?, amount).await?;
            println!("Rent amount set to {}", amount);
        }

        AdminCommands::CollectFees => {
            let transfer = service.collect_protocol_fees(&config.caller()?).await?;
            println!("Collected {} to {}", transfer.amount, transfer.recipient);
        }

        AdminCommands::Show => {
            let pool = service.config();
            let admin = service.admin_config();

            println!("Pool settings:");
            println!("  Admin: {}", pool.admin);
            println!("  Randomness operator: {}", pool.randomness_operator);
            println!("  Merkle root: {}", pool.merkle_root);
            println!("  Deposit window: {}s", pool.deposit_window_secs);
            println!("  Break window: {}s", pool.break_window_secs);
            println!("  Randomness timeout: {}s", pool.randomness_timeout_secs);
            println!();
            println!("Parameters:");
            println!("  Winner count: {}", admin.winner_count);
            println!("  Protocol fee: {} bps", admin.protocol_fee_bps);
            println!("  Rent fee: {} bps", admin.rent_fee_bps);
            println!("  Rent amount: {}", admin.rent_amount);
            println!("  Accrued protocol fees: {}", service.accrued_fees());
        }
    }

    Ok(())
}
