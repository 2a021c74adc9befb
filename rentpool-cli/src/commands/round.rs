use crate::config::CliConfig;
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Table};
use rentpool_core::{Round, RoundId, RoundState};
use rentpool_lottery::{LotteryError, LotteryService, Result};

#[derive(Subcommand)]
pub enum RoundCommands {
    /// Open the next round (admin)
    Start,
    /// End the deposit window and request randomness (admin)
    Break,
    /// Re-request randomness after the timeout elapsed (admin)
    Retry,
    /// Close the round after the break window (admin)
    Close,
    /// Show a round, the current one by default
    Show {
        /// Round id
        #[arg(short, long)]
        id: Option<u64>,
        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
    },
    /// List all rounds
    List,
}

pub async fn handle_round_command(
    cmd: RoundCommands,
    service: &LotteryService,
    config: &CliConfig,
) -> Result<()> {
    match cmd {
        RoundCommands::Start => {
            let id = service.start_round(&config.caller()?).await?;
            println!("Round {} is open for deposits", id);
        }

        RoundCommands::Break => {
            let handle = service.request_break(&config.caller()?).await?;
            println!("Deposits closed, waiting for randomness (handle {})", handle);
        }

        RoundCommands::Retry => {
            let handle = service.retry_randomness(&config.caller()?).await?;
            println!("Randomness re-requested (handle {})", handle);
        }

        RoundCommands::Close => {
            let id = service.finalize_close(&config.caller()?).await?;
            println!("Round {} closed", id);
            println!("Unclaimed winnings were credited to ticket owners' balances");
        }

        RoundCommands::Show { id, json } => {
            let round = match id {
                Some(id) => service.round(RoundId(id)),
                None => service.current_round(),
            }
            .ok_or(LotteryError::NoRound)?;

            if json {
                let json = serde_json::to_string_pretty(&round)
                    .map_err(|e| LotteryError::internal(e.to_string()))?;
                println!("{}", json);
            } else {
                print_round(&round, service);
            }
        }

        RoundCommands::List => {
            let rounds = service.rounds();
            if rounds.is_empty() {
                println!("No rounds yet.");
                println!("Start one with: rentpool --caller <admin> round start");
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["Round", "State", "Opened", "Deposits", "Pot", "Winners"]);
            for round in rounds {
                table.add_row(vec![
                    round.id.to_string(),
                    round.state.to_string(),
                    round.opened_at.format("%Y-%m-%d %H:%M").to_string(),
                    round.deposit_count().to_string(),
                    pot(&round),
                    round.winners.len().to_string(),
                ]);
            }
            println!("{}", table);
        }
    }

    Ok(())
}

fn pot(round: &Round) -> String {
    round
        .total_deposited()
        .map(|total| total.to_string())
        .unwrap_or_else(|| "overflow".to_string())
}

fn print_round(round: &Round, service: &LotteryService) {
    println!("Round {} ({})", round.id, round.state);
    println!("  Opened: {}", round.opened_at);
    if let Some(at) = round.break_requested_at {
        println!("  Break requested: {}", at);
    }
    if let Some(at) = round.broken_at {
        println!("  Resolved: {}", at);
    }
    if let Some(at) = round.closed_at {
        println!("  Closed: {}", at);
    }
    if let Some(handle) = round.request {
        println!("  Randomness handle: {}", handle);
    }
    println!(
        "  Winners: {}  Protocol fee: {} bps  Rent fee: {} bps",
        round.winner_count, round.protocol_fee_bps, round.rent_fee_bps
    );
    println!("  Pot: {}", pot(round));

    if !round.deposits.is_empty() {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["#", "Ticket", "Depositor", "Relation", "Amount", "Draws"]);
        for (index, deposit) in round.deposits.iter().enumerate() {
            table.add_row(vec![
                index.to_string(),
                deposit.ticket.to_string(),
                deposit.depositor.to_string(),
                deposit.relation.to_string(),
                deposit.amount.to_string(),
                round.draws(deposit.ticket).to_string(),
            ]);
        }
        println!("{}", table);
    }

    if round.state == RoundState::Break || round.state == RoundState::Closed {
        println!("  Share per draw: {}", round.pot_share);
        println!("  Protocol fee: {}", round.protocol_fee);
    }

    if round.state == RoundState::Break {
        if let Ok(winners) = service.winner_addresses(round.id) {
            for (ticket, address) in round.winners.iter().zip(winners) {
                let status = if round.is_settled(*ticket) {
                    "settled"
                } else {
                    "unclaimed"
                };
                println!("  Winner: ticket {} ({}) {}", ticket, address, status);
            }
        }
    }
}
