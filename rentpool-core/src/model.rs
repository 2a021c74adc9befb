//! Persistent lottery state: rounds, tickets, whitelist, balances and admin parameters.
//!
//! These are plain data records. The rules that move them between states live in
//! `rentpool-lottery`; the SQLite mapping lives in [`crate::storage`].

use crate::types::{
    Address, Amount, DepositorRelation, RequestHandle, RequestStatus, RoundId, RoundState,
    SettlementKind, TicketId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tunable parameters, mutated only by the admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminConfig {
    pub winner_count: u32,
    pub protocol_fee_bps: u16,
    pub rent_fee_bps: u16,
    pub rent_amount: Amount,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            winner_count: 1,
            protocol_fee_bps: 0,
            rent_fee_bps: 0,
            rent_amount: Amount::from_units(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub owner: Address,
    pub created_at: DateTime<Utc>,
}

/// One ticket entered into one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub ticket: TicketId,
    pub depositor: Address,
    pub relation: DepositorRelation,
    pub amount: Amount,
    pub deposited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub ticket: TicketId,
    pub kind: SettlementKind,
    /// Address that received `paid` (claimant) or `owner_credit` (credited at close).
    pub beneficiary: Address,
    pub paid: Amount,
    pub owner_credit: Amount,
    pub settled_at: DateTime<Utc>,
}

impl Settlement {
    pub fn total(&self) -> Option<Amount> {
        self.paid.checked_add(self.owner_credit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub state: RoundState,
    pub opened_at: DateTime<Utc>,
    pub break_requested_at: Option<DateTime<Utc>>,
    pub broken_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub winner_count: u32,
    pub protocol_fee_bps: u16,
    pub rent_fee_bps: u16,
    /// Deposit order is the index space randomness is reduced into.
    pub deposits: Vec<Deposit>,
    pub rentals: BTreeMap<TicketId, Address>,
    pub request: Option<RequestHandle>,
    pub winners: Vec<TicketId>,
    pub pot_share: Amount,
    pub protocol_fee: Amount,
    pub settlements: BTreeMap<TicketId, Settlement>,
    /// Withdrawable balance paid out to each address while this round was current.
    pub withdrawals: BTreeMap<Address, Amount>,
}

impl Round {
    pub fn open(id: RoundId, config: &AdminConfig, now: DateTime<Utc>) -> Self {
        Self {
            id,
            state: RoundState::Open,
            opened_at: now,
            break_requested_at: None,
            broken_at: None,
            closed_at: None,
            winner_count: config.winner_count,
            protocol_fee_bps: config.protocol_fee_bps,
            rent_fee_bps: config.rent_fee_bps,
            deposits: Vec::new(),
            rentals: BTreeMap::new(),
            request: None,
            winners: Vec::new(),
            pot_share: Amount::ZERO,
            protocol_fee: Amount::ZERO,
            settlements: BTreeMap::new(),
            withdrawals: BTreeMap::new(),
        }
    }

    pub fn deposit_count(&self) -> usize {
        self.deposits.len()
    }

    /// `None` once the pot would exceed [`Amount::MAX`].
    pub fn total_deposited(&self) -> Option<Amount> {
        Amount::checked_sum(self.deposits.iter().map(|d| d.amount))
    }

    pub fn deposit_of(&self, ticket: TicketId) -> Option<&Deposit> {
        self.deposits.iter().find(|d| d.ticket == ticket)
    }

    pub fn is_deposited(&self, ticket: TicketId) -> bool {
        self.deposit_of(ticket).is_some()
    }

    pub fn renter_of(&self, ticket: TicketId) -> Option<&Address> {
        self.rentals.get(&ticket)
    }

    /// Deposits made by `address` this round, in deposit order.
    pub fn deposits_by<'a>(&'a self, address: &'a Address) -> impl Iterator<Item = &'a Deposit> {
        self.deposits.iter().filter(move |d| &d.depositor == address)
    }

    /// Number of draws that selected `ticket`.
    pub fn draws(&self, ticket: TicketId) -> u64 {
        self.winners.iter().filter(|w| **w == ticket).count() as u64
    }

    pub fn is_winner(&self, ticket: TicketId) -> bool {
        self.winners.contains(&ticket)
    }

    /// Winning tickets without repeats, in first-draw order.
    pub fn distinct_winners(&self) -> Vec<TicketId> {
        let mut seen = Vec::with_capacity(self.winners.len());
        for ticket in &self.winners {
            if !seen.contains(ticket) {
                seen.push(*ticket);
            }
        }
        seen
    }

    pub fn is_settled(&self, ticket: TicketId) -> bool {
        self.settlements.contains_key(&ticket)
    }

    /// Value released so far through settlements (paid out plus credited).
    pub fn settled_total(&self) -> Option<Amount> {
        self.settlements
            .values()
            .try_fold(Amount::ZERO, |total, s| total.checked_add(s.total()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomnessRequest {
    pub handle: RequestHandle,
    pub round: RoundId,
    pub count: u32,
    pub requested_at: DateTime<Utc>,
    pub status: RequestStatus,
}

/// Everything that must survive a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    pub admin: AdminConfig,
    /// Protocol fees withheld from resolved rounds and not yet collected.
    pub accrued_fees: Amount,
    pub rounds: BTreeMap<RoundId, Round>,
    /// Indexed by ticket id.
    pub tickets: Vec<Ticket>,
    pub whitelist: Vec<Address>,
    pub balances: BTreeMap<Address, Amount>,
    pub requests: BTreeMap<RequestHandle, RandomnessRequest>,
}

impl PoolState {
    pub fn current_round(&self) -> Option<&Round> {
        self.rounds.values().next_back()
    }

    pub fn current_round_mut(&mut self) -> Option<&mut Round> {
        self.rounds.values_mut().next_back()
    }

    pub fn ticket(&self, id: TicketId) -> Option<&Ticket> {
        usize::try_from(id.0).ok().and_then(|i| self.tickets.get(i))
    }

    pub fn ticket_owned_by(&self, owner: &Address) -> Option<&Ticket> {
        self.tickets.iter().find(|t| &t.owner == owner)
    }

    pub fn balance_of(&self, address: &Address) -> Amount {
        self.balances.get(address).copied().unwrap_or_default()
    }

    pub fn is_whitelisted(&self, address: &Address) -> bool {
        self.whitelist.contains(address)
    }
}
