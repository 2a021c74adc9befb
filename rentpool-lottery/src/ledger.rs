use crate::treasury::{Transfer, TransferReason};
use crate::{LotteryError, Result};
use chrono::{DateTime, Utc};
use rentpool_core::{
    Address, Amount, Deposit, DepositorRelation, PoolState, Round, RoundId, RoundState, Ticket,
    TicketId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositReceipt {
    pub round: RoundId,
    pub ticket: TicketId,
    pub relation: DepositorRelation,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentReceipt {
    pub round: RoundId,
    pub ticket: TicketId,
    pub owner: Address,
    pub renter: Address,
    pub amount: Amount,
}

impl RentReceipt {
    /// Rent is forwarded straight to the owner, never held by the pool.
    pub fn transfer(&self) -> Transfer {
        Transfer {
            recipient: self.owner.clone(),
            amount: self.amount,
            reason: TransferReason::Rent {
                round: self.round,
                ticket: self.ticket,
            },
        }
    }
}

/// A ticket as seen from the current round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketInfo {
    pub id: TicketId,
    pub owner: Address,
    pub created_at: DateTime<Utc>,
    pub renter: Option<Address>,
    pub deposited: bool,
    pub price: Amount,
}

/// Ticket identity, ownership, rentals and per-round deposits.
pub struct TicketLedger<'a> {
    state: &'a mut PoolState,
}

impl<'a> TicketLedger<'a> {
    pub fn new(state: &'a mut PoolState) -> Self {
        Self { state }
    }

    pub fn deposit(
        &mut self,
        caller: &Address,
        value: Amount,
        now: DateTime<Utc>,
    ) -> Result<DepositReceipt> {
        let whitelisted = self.state.is_whitelisted(caller);
        let owned = self.state.ticket_owned_by(caller).map(|t| t.id);
        let next_id = TicketId(self.state.tickets.len() as u64);
        let round = open_round(&*self.state)?;
        let round_id = round.id;

        let borrowed = if value.is_zero() {
            None
        } else {
            undeposited_rental(round, caller)
        };

        let (ticket, relation) = match borrowed {
            Some(ticket) => (ticket, DepositorRelation::Borrower),
            None if value.is_zero() => {
                if !whitelisted {
                    return Err(LotteryError::InvalidAmount(
                        "zero deposits are reserved for whitelisted addresses".to_string(),
                    ));
                }
                (owned.unwrap_or(next_id), DepositorRelation::Whitelisted)
            }
            None => match owned {
                Some(ticket) => (ticket, DepositorRelation::Owner),
                None => (next_id, DepositorRelation::NewDepositor),
            },
        };

        if relation != DepositorRelation::Borrower {
            if round.is_deposited(ticket) {
                return Err(LotteryError::DepositedAlready(ticket));
            }
            if round.renter_of(ticket).is_some() {
                return Err(LotteryError::RentedToOther(ticket));
            }
        }

        if round
            .total_deposited()
            .and_then(|total| total.checked_add(value))
            .is_none()
        {
            return Err(LotteryError::InvalidAmount(format!(
                "round {} pot cannot exceed {}",
                round_id,
                Amount::MAX
            )));
        }

        if relation != DepositorRelation::Borrower && owned.is_none() {
            self.state.tickets.push(Ticket {
                id: next_id,
                owner: caller.clone(),
                created_at: now,
            });
            tracing::info!("Allocated ticket {} to {}", next_id, caller);
        }

        let round = self
            .state
            .current_round_mut()
            .ok_or(LotteryError::NotOpen)?;
        round.deposits.push(Deposit {
            ticket,
            depositor: caller.clone(),
            relation,
            amount: value,
            deposited_at: now,
        });

        tracing::info!(
            "{} deposited {} on ticket {} in round {} as {}",
            caller,
            value,
            ticket,
            round_id,
            relation
        );

        Ok(DepositReceipt {
            round: round_id,
            ticket,
            relation,
            amount: value,
        })
    }

    /// Record `caller` as this round's renter of `ticket`. The returned receipt's transfer
    /// must be issued to the owner.
    pub fn rent(
        &mut self,
        caller: &Address,
        ticket: TicketId,
        value: Amount,
    ) -> Result<RentReceipt> {
        let rent_amount = self.state.admin.rent_amount;
        let owner = self
            .state
            .ticket(ticket)
            .map(|t| t.owner.clone())
            .ok_or(LotteryError::InvalidTicket(ticket))?;
        let round = open_round(&*self.state)?;

        if &owner == caller {
            return Err(LotteryError::CannotRentOwnTicket(ticket));
        }
        if round.is_deposited(ticket) {
            return Err(LotteryError::DepositedAlready(ticket));
        }
        if round.renter_of(ticket).is_some() {
            return Err(LotteryError::AlreadyRented(ticket));
        }
        if value != rent_amount {
            return Err(LotteryError::InvalidAmount(format!(
                "rent costs {}, got {}",
                rent_amount, value
            )));
        }

        let round = self
            .state
            .current_round_mut()
            .ok_or(LotteryError::NotOpen)?;
        round.rentals.insert(ticket, caller.clone());

        tracing::info!(
            "{} rented ticket {} from {} for round {}",
            caller,
            ticket,
            owner,
            round.id
        );

        Ok(RentReceipt {
            round: round.id,
            ticket,
            owner,
            renter: caller.clone(),
            amount: value,
        })
    }
}

fn open_round(state: &PoolState) -> Result<&Round> {
    state
        .current_round()
        .filter(|r| r.state == RoundState::Open)
        .ok_or(LotteryError::NotOpen)
}

/// First ticket `caller` rented this round and has not deposited yet.
fn undeposited_rental(round: &Round, caller: &Address) -> Option<TicketId> {
    round
        .rentals
        .iter()
        .find(|(ticket, renter)| *renter == caller && !round.is_deposited(**ticket))
        .map(|(ticket, _)| *ticket)
}

pub fn ticket_info(state: &PoolState, id: TicketId) -> Option<TicketInfo> {
    let ticket = state.ticket(id)?;
    let round = state.current_round().filter(|r| r.state.is_active());
    let deposit = round.and_then(|r| r.deposit_of(id));

    Some(TicketInfo {
        id,
        owner: ticket.owner.clone(),
        created_at: ticket.created_at,
        renter: round.and_then(|r| r.renter_of(id)).cloned(),
        deposited: deposit.is_some(),
        price: deposit.map(|d| d.amount).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rentpool_core::{AdminConfig, Round};

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    fn units(n: u64) -> Amount {
        Amount::from_units(n)
    }

    fn open_state() -> PoolState {
        let mut state = PoolState::default();
        state.admin = AdminConfig {
            rent_amount: units(1),
            ..AdminConfig::default()
        };
        let round = Round::open(RoundId::FIRST, &state.admin, Utc::now());
        state.rounds.insert(round.id, round);
        state
    }

    #[test]
    fn test_new_depositor_then_owner() {
        let mut state = open_state();
        let now = Utc::now();
        let receipt = TicketLedger::new(&mut state)
            .deposit(&addr("alice"), units(5), now)
            .unwrap();
        assert_eq!(receipt.ticket, TicketId(0));
        assert_eq!(receipt.relation, DepositorRelation::NewDepositor);

        let err = TicketLedger::new(&mut state)
            .deposit(&addr("alice"), units(5), now)
            .unwrap_err();
        assert!(matches!(err, LotteryError::DepositedAlready(TicketId(0))));

        // next round the same address enters as owner
        state.rounds.values_mut().next_back().unwrap().state = RoundState::Closed;
        let round = Round::open(RoundId(2), &state.admin, now);
        state.rounds.insert(round.id, round);
        let receipt = TicketLedger::new(&mut state)
            .deposit(&addr("alice"), units(3), now)
            .unwrap();
        assert_eq!(receipt.relation, DepositorRelation::Owner);
        assert_eq!(state.tickets.len(), 1);
        assert_eq!(ticket_info(&state, TicketId(0)).unwrap().price, units(3));
    }

    #[test]
    fn test_zero_deposit_requires_whitelist() {
        let mut state = open_state();
        let err = TicketLedger::new(&mut state)
            .deposit(&addr("bob"), Amount::ZERO, Utc::now())
            .unwrap_err();
        assert!(matches!(err, LotteryError::InvalidAmount(_)));
        assert!(state.tickets.is_empty());

        state.whitelist.push(addr("bob"));
        let receipt = TicketLedger::new(&mut state)
            .deposit(&addr("bob"), Amount::ZERO, Utc::now())
            .unwrap();
        assert_eq!(receipt.relation, DepositorRelation::Whitelisted);
        assert_eq!(state.tickets[0].owner, addr("bob"));
    }

    #[test]
    fn test_deposit_cannot_overflow_round_pot() {
        let mut state = open_state();
        let now = Utc::now();
        let half = units(u64::MAX / 2 + 1);

        let err = TicketLedger::new(&mut state)
            .deposit(&addr("whale"), half, now)
            .unwrap_err();
        assert!(matches!(err, LotteryError::InvalidAmount(_)));
        assert!(state.tickets.is_empty());

        TicketLedger::new(&mut state)
            .deposit(&addr("alice"), Amount::MAX, now)
            .unwrap();
        let err = TicketLedger::new(&mut state)
            .deposit(&addr("bob"), units(1), now)
            .unwrap_err();
        assert!(matches!(err, LotteryError::InvalidAmount(_)));
        assert_eq!(state.tickets.len(), 1);

        let round = state.current_round().unwrap();
        assert_eq!(round.total_deposited(), Some(Amount::MAX));
    }

    #[test]
    fn test_deposit_requires_open_round() {
        let mut state = PoolState::default();
        let err = TicketLedger::new(&mut state)
            .deposit(&addr("alice"), units(5), Utc::now())
            .unwrap_err();
        assert!(matches!(err, LotteryError::NotOpen));
    }

    #[test]
    fn test_rent_checks_in_order() {
        let mut state = open_state();
        let now = Utc::now();
        state.tickets.push(Ticket {
            id: TicketId(0),
            owner: addr("owner"),
            created_at: now,
        });

        let mut ledger = TicketLedger::new(&mut state);
        assert!(matches!(
            ledger.rent(&addr("renter"), TicketId(5), units(1)),
            Err(LotteryError::InvalidTicket(TicketId(5)))
        ));
        assert!(matches!(
            ledger.rent(&addr("owner"), TicketId(0), units(1)),
            Err(LotteryError::CannotRentOwnTicket(_))
        ));
        assert!(matches!(
            ledger.rent(&addr("renter"), TicketId(0), units(2)),
            Err(LotteryError::InvalidAmount(_))
        ));

        let receipt = ledger.rent(&addr("renter"), TicketId(0), units(1)).unwrap();
        assert_eq!(receipt.transfer().recipient, addr("owner"));
        assert_eq!(receipt.transfer().amount, units(1));

        assert!(matches!(
            ledger.rent(&addr("other"), TicketId(0), units(1)),
            Err(LotteryError::AlreadyRented(_))
        ));

        // owner is locked out while rented
        assert!(matches!(
            ledger.deposit(&addr("owner"), units(5), now),
            Err(LotteryError::RentedToOther(TicketId(0)))
        ));

        let receipt = ledger.deposit(&addr("renter"), units(5), now).unwrap();
        assert_eq!(receipt.relation, DepositorRelation::Borrower);
        assert_eq!(receipt.ticket, TicketId(0));
        // the renter did not get a ticket of their own
        assert_eq!(state.tickets.len(), 1);
    }

    #[test]
    fn test_rent_after_owner_deposit_fails() {
        let mut state = open_state();
        let now = Utc::now();
        let mut ledger = TicketLedger::new(&mut state);
        ledger.deposit(&addr("owner"), units(5), now).unwrap();

        assert!(matches!(
            ledger.rent(&addr("renter"), TicketId(0), units(1)),
            Err(LotteryError::DepositedAlready(TicketId(0)))
        ));
    }
}
