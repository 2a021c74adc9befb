use crate::round::credit;
use crate::treasury::{Transfer, TransferReason};
use crate::{LotteryError, Result};
use chrono::{DateTime, Utc};
use rentpool_core::{
    Address, Amount, DepositorRelation, PoolState, Round, RoundId, RoundState, Settlement,
    SettlementKind, TicketId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    pub round: RoundId,
    pub claimant: Address,
    /// Winning tickets settled by this claim.
    pub tickets: Vec<TicketId>,
    /// Entitlements paid to the claimant.
    pub winnings: Amount,
    /// Withdrawable balance paid to the claimant.
    pub withdrawn: Amount,
    /// Rent-fee remainders credited to ticket owners.
    pub owner_credits: Vec<(Address, Amount)>,
}

impl ClaimReceipt {
    pub fn total(&self) -> Result<Amount> {
        self.winnings
            .checked_add(self.withdrawn)
            .ok_or(LotteryError::Overflow("claim total"))
    }

    pub fn transfer(&self) -> Result<Transfer> {
        Ok(Transfer {
            recipient: self.claimant.clone(),
            amount: self.total()?,
            reason: TransferReason::Claim { round: self.round },
        })
    }
}

struct Entitlement {
    ticket: TicketId,
    kind: SettlementKind,
    paid: Amount,
    owner: Address,
    owner_credit: Amount,
}

/// Pot shares, claim eligibility and withdrawable balances.
pub struct PayoutAccount<'a> {
    state: &'a mut PoolState,
}

impl<'a> PayoutAccount<'a> {
    pub fn new(state: &'a mut PoolState) -> Self {
        Self { state }
    }

    pub fn claim(&mut self, caller: &Address, now: DateTime<Utc>) -> Result<ClaimReceipt> {
        let round = self.state.current_round().ok_or(LotteryError::NoRound)?;
        if !matches!(round.state, RoundState::Break | RoundState::Closed) {
            return Err(LotteryError::NotClaimable {
                round: round.id,
                state: round.state,
            });
        }

        let entitlements = if round.state == RoundState::Break {
            unsettled_entitlements(&*self.state, round, caller)?
        } else {
            Vec::new()
        };
        let withdrawn = self.state.balance_of(caller);

        if entitlements.is_empty() && withdrawn.is_zero() {
            return Err(ineligibility(&*self.state, round, caller));
        }

        let round_id = round.id;
        let mut winnings = Amount::ZERO;
        let mut owner_credits = Vec::new();
        for entitlement in &entitlements {
            winnings = winnings
                .checked_add(entitlement.paid)
                .ok_or(LotteryError::Overflow("claim total"))?;
            if !entitlement.owner_credit.is_zero() {
                owner_credits.push((entitlement.owner.clone(), entitlement.owner_credit));
            }
        }

        let total = winnings
            .checked_add(withdrawn)
            .ok_or(LotteryError::Overflow("claim total"))?;

        for (owner, amount) in &owner_credits {
            credit(self.state, owner, *amount)?;
        }
        if !withdrawn.is_zero() {
            self.state.balances.remove(caller);
        }

        let round = self
            .state
            .current_round_mut()
            .ok_or(LotteryError::NoRound)?;
        for entitlement in &entitlements {
            round.settlements.insert(
                entitlement.ticket,
                Settlement {
                    ticket: entitlement.ticket,
                    kind: entitlement.kind,
                    beneficiary: caller.clone(),
                    paid: entitlement.paid,
                    owner_credit: entitlement.owner_credit,
                    settled_at: now,
                },
            );
        }
        if !withdrawn.is_zero() {
            let total = round.withdrawals.entry(caller.clone()).or_default();
            *total = total
                .checked_add(withdrawn)
                .ok_or(LotteryError::Overflow("withdrawals"))?;
        }

        tracing::info!(
            "{} claimed {} in round {} ({} winnings, {} withdrawn)",
            caller,
            total,
            round_id,
            winnings,
            withdrawn
        );

        Ok(ClaimReceipt {
            round: round_id,
            claimant: caller.clone(),
            tickets: entitlements.iter().map(|e| e.ticket).collect(),
            winnings,
            withdrawn,
            owner_credits,
        })
    }

    /// Hand every accrued protocol fee to `admin`.
    pub fn collect_fees(&mut self, admin: &Address) -> Result<Transfer> {
        let amount = self.state.accrued_fees;
        if amount.is_zero() {
            return Err(LotteryError::NothingToClaim);
        }

        self.state.accrued_fees = Amount::ZERO;
        tracing::info!("Collected {} protocol fees for {}", amount, admin);

        Ok(Transfer {
            recipient: admin.clone(),
            amount,
            reason: TransferReason::ProtocolFees,
        })
    }
}

/// Winning tickets deposited by `caller` that nobody has settled yet.
fn unsettled_entitlements(
    state: &PoolState,
    round: &Round,
    caller: &Address,
) -> Result<Vec<Entitlement>> {
    let mut entitlements = Vec::new();

    for ticket in round.distinct_winners() {
        if round.is_settled(ticket) {
            continue;
        }
        let Some(deposit) = round.deposit_of(ticket) else {
            continue;
        };
        if &deposit.depositor != caller {
            continue;
        }

        let full = round
            .pot_share
            .checked_mul(round.draws(ticket))
            .ok_or(LotteryError::Overflow("entitlement"))?;
        let owner = state
            .ticket(ticket)
            .map(|t| t.owner.clone())
            .ok_or_else(|| LotteryError::internal(format!("ticket {} has no owner", ticket)))?;

        let (kind, paid) = match deposit.relation {
            DepositorRelation::Borrower => (
                SettlementKind::BorrowerSplit,
                full.net_of_bps(round.rent_fee_bps),
            ),
            DepositorRelation::Owner
            | DepositorRelation::NewDepositor
            | DepositorRelation::Whitelisted => (SettlementKind::Claimed, full),
        };
        let owner_credit = full
            .checked_sub(paid)
            .ok_or(LotteryError::Overflow("rent fee"))?;

        entitlements.push(Entitlement {
            ticket,
            kind,
            paid,
            owner,
            owner_credit,
        });
    }

    Ok(entitlements)
}

/// The most specific reason `caller` has nothing to collect.
fn ineligibility(state: &PoolState, round: &Round, caller: &Address) -> LotteryError {
    let claimed = round.withdrawals.contains_key(caller)
        || round
            .settlements
            .values()
            .any(|s| s.kind != SettlementKind::CreditedAtClose && &s.beneficiary == caller);
    if claimed {
        return LotteryError::AlreadyClaimed;
    }

    let borrowed: Vec<TicketId> = round
        .deposits_by(caller)
        .filter(|d| d.relation == DepositorRelation::Borrower)
        .map(|d| d.ticket)
        .collect();
    if !borrowed.is_empty() {
        if round.state == RoundState::Closed {
            return LotteryError::BorrowerWindowElapsed;
        }
        if !borrowed.iter().any(|t| round.is_winner(*t)) {
            return LotteryError::BorrowerNotWinner;
        }
    }

    if round.state == RoundState::Break {
        let pending = round.deposits.iter().find(|d| {
            d.relation == DepositorRelation::Borrower
                && round.is_winner(d.ticket)
                && !round.is_settled(d.ticket)
                && state.ticket(d.ticket).map_or(false, |t| &t.owner == caller)
        });
        if let Some(deposit) = pending {
            return LotteryError::OwnerMustWaitForBorrower(deposit.ticket);
        }
    }

    LotteryError::NothingToClaim
}

/// Winning tickets of `round_id`, available only while it is in its break period.
pub fn winning_tickets(state: &PoolState, round_id: RoundId) -> Result<Vec<TicketId>> {
    state
        .rounds
        .get(&round_id)
        .filter(|r| r.state == RoundState::Break)
        .map(|r| r.winners.clone())
        .ok_or(LotteryError::InvalidOrTooLate(round_id))
}

/// Depositor of each winning draw, in draw order.
pub fn winner_addresses(state: &PoolState, round_id: RoundId) -> Result<Vec<Address>> {
    let round = state
        .rounds
        .get(&round_id)
        .filter(|r| r.state == RoundState::Break)
        .ok_or(LotteryError::InvalidOrTooLate(round_id))?;

    round
        .winners
        .iter()
        .map(|ticket| {
            round
                .deposit_of(*ticket)
                .map(|d| d.depositor.clone())
                .ok_or_else(|| LotteryError::internal(format!("winner {} was never deposited", ticket)))
        })
        .collect()
}
