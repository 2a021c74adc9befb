//! Round lifecycle: OPEN → AWAITING_RANDOMNESS → BREAK → CLOSED, then the next round.
//!
//! Transitions that talk to the randomness provider are split in two: `prepare_*` validates
//! against the current state without touching it and `commit_*` applies the transition once
//! the provider has issued a handle.

use crate::randomness::RandomnessGateway;
use crate::{LotteryError, Result};
use chrono::{DateTime, Duration, Utc};
use rentpool_core::{
    Address, Amount, PoolState, RequestHandle, Round, RoundId, RoundState, Settlement,
    SettlementKind, TicketId,
};

/// What a break transition needs from the randomness provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawRequest {
    pub round: RoundId,
    pub count: u32,
    /// Pending handle being replaced, when retrying.
    pub replaces: Option<RequestHandle>,
}

pub struct RoundManager<'a> {
    state: &'a mut PoolState,
}

impl<'a> RoundManager<'a> {
    pub fn new(state: &'a mut PoolState) -> Self {
        Self { state }
    }

    pub fn start_round(&mut self, now: DateTime<Utc>) -> Result<RoundId> {
        let id = match self.state.current_round() {
            Some(round) if round.state != RoundState::Closed => {
                return Err(LotteryError::RoundStillActive {
                    round: round.id,
                    state: round.state,
                });
            }
            Some(round) => round.id.next(),
            None => RoundId::FIRST,
        };

        let round = Round::open(id, &self.state.admin, now);
        self.state.rounds.insert(id, round);

        tracing::info!("Round {} opened", id);
        Ok(id)
    }

    pub fn prepare_break(&self, deposit_window: Duration, now: DateTime<Utc>) -> Result<DrawRequest> {
        let round = expect_state(&*self.state, RoundState::Open)?;

        let ready_at = round.opened_at + deposit_window;
        if now < ready_at {
            return Err(LotteryError::TooEarly { ready_at });
        }
        if round.deposits.is_empty() {
            return Err(LotteryError::NoDeposits(round.id));
        }

        if crate::randomness::outstanding_for(&self.state.requests, round.id).is_some() {
            return Err(LotteryError::RequestOutstanding(round.id));
        }

        Ok(DrawRequest {
            round: round.id,
            count: self.state.admin.winner_count,
            replaces: None,
        })
    }

    /// Snapshot the admin parameters into the round and wait for `handle`.
    pub fn commit_break(
        &mut self,
        draw: &DrawRequest,
        handle: RequestHandle,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let admin = self.state.admin.clone();
        let PoolState {
            rounds, requests, ..
        } = &mut *self.state;

        let round = rounds
            .get_mut(&draw.round)
            .filter(|r| r.state == RoundState::Open)
            .ok_or(LotteryError::NotOpen)?;

        RandomnessGateway::new(requests).register(handle, round.id, draw.count, now)?;

        round.winner_count = draw.count;
        round.protocol_fee_bps = admin.protocol_fee_bps;
        round.rent_fee_bps = admin.rent_fee_bps;
        round.request = Some(handle);
        round.break_requested_at = Some(now);
        round.state = RoundState::AwaitingRandomness;

        tracing::info!(
            "Round {} awaiting randomness with {} deposits ({} draws)",
            round.id,
            round.deposit_count(),
            draw.count
        );
        Ok(())
    }

    pub fn prepare_retry(&self, timeout: Duration, now: DateTime<Utc>) -> Result<DrawRequest> {
        let round = expect_state(&*self.state, RoundState::AwaitingRandomness)?;

        let requested_at = round.break_requested_at.unwrap_or(round.opened_at);
        let ready_at = requested_at + timeout;
        if now < ready_at {
            return Err(LotteryError::TooEarly { ready_at });
        }

        Ok(DrawRequest {
            round: round.id,
            count: round.winner_count,
            replaces: round.request,
        })
    }

    pub fn commit_retry(
        &mut self,
        draw: &DrawRequest,
        handle: RequestHandle,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let PoolState {
            rounds, requests, ..
        } = &mut *self.state;

        let round = rounds.get_mut(&draw.round).ok_or(LotteryError::NoRound)?;
        if round.state != RoundState::AwaitingRandomness {
            return Err(LotteryError::WrongState {
                round: round.id,
                expected: RoundState::AwaitingRandomness,
                actual: round.state,
            });
        }

        let mut gateway = RandomnessGateway::new(requests);
        if let Some(previous) = draw.replaces {
            gateway.abandon(previous)?;
        }
        gateway.register(handle, round.id, draw.count, now)?;

        round.request = Some(handle);
        round.break_requested_at = Some(now);

        tracing::warn!("Round {} re-requested randomness (handle {})", round.id, handle);
        Ok(())
    }

    /// Consume a delivery and resolve the round's winners against its deposit list.
    pub fn resolve(
        &mut self,
        handle: RequestHandle,
        values: &[u64],
        now: DateTime<Utc>,
    ) -> Result<RoundId> {
        let PoolState {
            rounds,
            requests,
            accrued_fees,
            ..
        } = &mut *self.state;

        let round_id = RandomnessGateway::new(requests).accept(handle, values)?;

        let round = rounds
            .get_mut(&round_id)
            .filter(|r| r.state == RoundState::AwaitingRandomness && r.request == Some(handle))
            .ok_or(LotteryError::RequestConsumed(handle))?;

        round.winners = draw_winners(round, values);

        let total = round
            .total_deposited()
            .ok_or(LotteryError::Overflow("round pot"))?;
        let share = total
            .net_of_bps(round.protocol_fee_bps)
            .split(u64::from(round.winner_count));
        let distributed = share
            .checked_mul(round.winners.len() as u64)
            .ok_or(LotteryError::Overflow("pot distribution"))?;

        round.pot_share = share;
        round.protocol_fee = total
            .checked_sub(distributed)
            .ok_or(LotteryError::Overflow("protocol fee"))?;
        *accrued_fees = accrued_fees
            .checked_add(round.protocol_fee)
            .ok_or(LotteryError::Overflow("accrued fees"))?;

        round.broken_at = Some(now);
        round.state = RoundState::Break;

        tracing::info!(
            "Round {} resolved: winners {:?}, share {}, protocol fee {}",
            round.id,
            round.winners.iter().map(|t| t.0).collect::<Vec<_>>(),
            round.pot_share,
            round.protocol_fee
        );
        Ok(round_id)
    }

    /// Close the round, crediting every unsettled winning ticket's full entitlement to its
    /// owner's withdrawable balance.
    pub fn finalize_close(&mut self, break_window: Duration, now: DateTime<Utc>) -> Result<RoundId> {
        let round = expect_state(&*self.state, RoundState::Break)?;

        let broken_at = round.broken_at.unwrap_or(round.opened_at);
        let ready_at = broken_at + break_window;
        if now < ready_at {
            return Err(LotteryError::TooEarly { ready_at });
        }

        let mut credits = Vec::new();
        for ticket in round.distinct_winners() {
            if round.is_settled(ticket) {
                continue;
            }
            let owner = self
                .state
                .ticket(ticket)
                .map(|t| t.owner.clone())
                .ok_or_else(|| LotteryError::internal(format!("winning ticket {} has no owner", ticket)))?;
            let entitlement = round
                .pot_share
                .checked_mul(round.draws(ticket))
                .ok_or(LotteryError::Overflow("entitlement"))?;
            credits.push((ticket, owner, entitlement));
        }

        for (_, owner, entitlement) in &credits {
            credit(self.state, owner, *entitlement)?;
        }

        let round = self
            .state
            .current_round_mut()
            .ok_or(LotteryError::NoRound)?;
        for (ticket, owner, entitlement) in credits {
            tracing::info!(
                "Round {}: credited {} to {} for unclaimed ticket {}",
                round.id,
                entitlement,
                owner,
                ticket
            );
            round.settlements.insert(
                ticket,
                Settlement {
                    ticket,
                    kind: SettlementKind::CreditedAtClose,
                    beneficiary: owner,
                    paid: Amount::ZERO,
                    owner_credit: entitlement,
                    settled_at: now,
                },
            );
        }

        round.closed_at = Some(now);
        round.state = RoundState::Closed;

        tracing::info!("Round {} closed", round.id);
        Ok(round.id)
    }
}

/// Each value picks a deposit by `value mod count`, counting from the most recent deposit.
/// A round without deposits has no winners.
fn draw_winners(round: &Round, values: &[u64]) -> Vec<TicketId> {
    let count = round.deposits.len() as u64;
    if count == 0 {
        return Vec::new();
    }

    values
        .iter()
        .filter_map(|value| {
            let index = count - 1 - value % count;
            usize::try_from(index)
                .ok()
                .and_then(|i| round.deposits.get(i))
                .map(|d| d.ticket)
        })
        .collect()
}

pub(crate) fn credit(state: &mut PoolState, address: &Address, amount: Amount) -> Result<()> {
    if amount.is_zero() {
        return Ok(());
    }
    let balance = state.balances.entry(address.clone()).or_default();
    *balance = balance
        .checked_add(amount)
        .ok_or(LotteryError::Overflow("withdrawable balance"))?;
    Ok(())
}

fn expect_state(state: &PoolState, expected: RoundState) -> Result<&Round> {
    let round = state.current_round().ok_or(LotteryError::NoRound)?;
    if round.state != expected {
        return Err(LotteryError::WrongState {
            round: round.id,
            expected,
            actual: round.state,
        });
    }
    Ok(round)
}
