use crate::config::CliConfig;
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Table};
use rand::Rng;
use rentpool_core::{Address, Amount, LedgerStore, RequestHandle, TicketId};
use rentpool_lottery::{LotteryError, LotteryService, Result};

#[derive(Subcommand)]
pub enum TicketCommands {
    /// Show a ticket and its state in the current round
    Show {
        /// Ticket id; defaults to the caller's own ticket
        id: Option<u64>,
    },
}

pub async fn handle_deposit(service: &LotteryService, config: &CliConfig, amount: u64) -> Result<()> {
    let receipt = service
        .deposit(&config.caller()?, Amount::from_units(amount))
        .await?;

    println!(
        "Deposited {} on ticket {} in round {} as {}",
        receipt.amount, receipt.ticket, receipt.round, receipt.relation
    );
    Ok(())
}

pub async fn handle_rent(
    service: &LotteryService,
    config: &CliConfig,
    ticket: u64,
    amount: Option<u64>,
) -> Result<()> {
    let amount = amount
        .map(Amount::from_units)
        .unwrap_or_else(|| service.admin_config().rent_amount);
    let receipt = service
        .rent(&config.caller()?, TicketId(ticket), amount)
        .await?;

    println!(
        "Rented ticket {} for round {}; {} paid to {}",
        receipt.ticket, receipt.round, receipt.amount, receipt.owner
    );
    println!("Deposit to enter the round under it: rentpool deposit <amount>");
    Ok(())
}

pub async fn handle_claim(service: &LotteryService, config: &CliConfig) -> Result<()> {
    let receipt = service.claim(&config.caller()?).await?;

    println!("Claimed {} in round {}", receipt.total()?, receipt.round);
    if !receipt.tickets.is_empty() {
        println!("  Winnings: {}", receipt.winnings);
    }
    if !receipt.withdrawn.is_zero() {
        println!("  Withdrawn balance: {}", receipt.withdrawn);
    }
    for (owner, amount) in &receipt.owner_credits {
        println!("  Credited {} to ticket owner {}", amount, owner);
    }
    Ok(())
}

/// Deliver randomness as the operator. `random` draws the values locally.
pub async fn handle_deliver(
    service: &LotteryService,
    config: &CliConfig,
    handle: &str,
    values: Vec<u64>,
    random: bool,
) -> Result<()> {
    let handle: RequestHandle = handle.parse()?;

    let values = if random {
        let count = service
            .current_round()
            .map(|r| r.winner_count)
            .ok_or(LotteryError::NoRound)?;
        let mut rng = rand::thread_rng();
        let drawn: Vec<u64> = (0..count).map(|_| rng.gen::<u64>()).collect();
        tracing::debug!("Drew {} local random values: {:?}", drawn.len(), drawn);
        drawn
    } else {
        values
    };

    let round = service
        .deliver_randomness(&config.caller()?, handle, &values)
        .await?;

    println!("Round {} resolved", round);
    for (ticket, address) in service
        .winning_tickets(round)?
        .into_iter()
        .zip(service.winner_addresses(round)?)
    {
        println!("  Winning ticket {} ({})", ticket, address);
    }
    Ok(())
}

pub async fn handle_ticket_command(
    cmd: TicketCommands,
    service: &LotteryService,
    config: &CliConfig,
) -> Result<()> {
    match cmd {
        TicketCommands::Show { id } => {
            let id = match id {
                Some(id) => TicketId(id),
                None => {
                    let caller = config.caller()?;
                    service.ticket_of(&caller).ok_or_else(|| {
                        LotteryError::InvalidParameter(format!("{} holds no ticket", caller))
                    })?
                }
            };
            let info = service
                .ticket_info(id)
                .ok_or(LotteryError::InvalidTicket(id))?;

            println!("Ticket {}", info.id);
            println!("  Owner: {}", info.owner);
            println!("  Created: {}", info.created_at);
            println!(
                "  Renter: {}",
                info.renter
                    .as_ref()
                    .map(Address::to_string)
                    .unwrap_or_else(|| "-".to_string())
            );
            println!("  Deposited: {}", if info.deposited { "yes" } else { "no" });
            if info.deposited {
                println!("  Price: {}", info.price);
            }
            println!("  Tickets issued: {}", service.holder_count());
        }
    }

    Ok(())
}

/// Withdrawable balance and transfer history of an address.
pub async fn handle_balance(
    service: &LotteryService,
    config: &CliConfig,
    address: Option<String>,
) -> Result<()> {
    let address: Address = match address {
        Some(address) => address.parse()?,
        None => config.caller()?,
    };

    println!("Withdrawable balance of {}: {}", address, service.balance_of(&address));

    if let Some(round) = service.current_round() {
        for (ticket, relation) in service.relations(round.id, &address) {
            println!("  Round {}: ticket {} as {}", round.id, ticket, relation);
        }
    }

    let transfers = LedgerStore::new(service.storage())
        .list_transfers(Some(&address))
        .await?;
    if transfers.is_empty() {
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Time", "Amount", "Memo"]);
    for transfer in transfers {
        table.add_row(vec![
            transfer.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            transfer.amount.to_string(),
            transfer.memo,
        ]);
    }
    println!("{}", table);
    Ok(())
}
