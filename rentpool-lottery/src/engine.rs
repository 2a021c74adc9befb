use crate::admin::AdminSettings;
use crate::ledger::{self, DepositReceipt, RentReceipt, TicketInfo, TicketLedger};
use crate::payout::{self, ClaimReceipt, PayoutAccount};
use crate::randomness;
use crate::round::{DrawRequest, RoundManager};
use crate::treasury::Transfer;
use crate::whitelist::{Hash, WhitelistVerifier};
use crate::{LotteryError, Result};
use chrono::{DateTime, Utc};
use rentpool_core::{
    Address, AdminConfig, Amount, DepositorRelation, PoolConfig, PoolState, RandomnessRequest,
    RequestHandle, Round, RoundId, TicketId,
};

/// The lottery state machine without I/O. Every mutating call either succeeds or leaves the
/// state exactly as it found it.
#[derive(Debug, Clone)]
pub struct Lottery {
    config: PoolConfig,
    verifier: WhitelistVerifier,
    state: PoolState,
}

impl Lottery {
    pub fn new(config: PoolConfig, state: PoolState) -> Result<Self> {
        config.validate()?;
        let verifier = WhitelistVerifier::new(config.merkle_root_bytes()?);

        Ok(Self {
            config,
            verifier,
            state,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn state(&self) -> &PoolState {
        &self.state
    }

    pub fn snapshot(&self) -> PoolState {
        self.state.clone()
    }

    pub fn restore(&mut self, snapshot: PoolState) {
        self.state = snapshot;
    }

    fn ensure_admin(&self, caller: &Address, operation: &'static str) -> Result<()> {
        if caller != &self.config.admin {
            return Err(LotteryError::unauthorized(caller, operation));
        }
        Ok(())
    }

    fn atomically<T>(&mut self, op: impl FnOnce(&mut PoolState) -> Result<T>) -> Result<T> {
        let snapshot = self.state.clone();
        op(&mut self.state).map_err(|e| {
            self.state = snapshot;
            e
        })
    }

    // Round lifecycle

    pub fn start_round(&mut self, caller: &Address, now: DateTime<Utc>) -> Result<RoundId> {
        self.ensure_admin(caller, "start a round")?;
        self.atomically(|state| RoundManager::new(state).start_round(now))
    }

    pub fn prepare_break(&mut self, caller: &Address, now: DateTime<Utc>) -> Result<DrawRequest> {
        self.ensure_admin(caller, "request a break")?;
        let window = self.config.deposit_window();
        RoundManager::new(&mut self.state).prepare_break(window, now)
    }

    pub fn commit_break(
        &mut self,
        draw: &DrawRequest,
        handle: RequestHandle,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.atomically(|state| RoundManager::new(state).commit_break(draw, handle, now))
    }

    pub fn prepare_retry(&mut self, caller: &Address, now: DateTime<Utc>) -> Result<DrawRequest> {
        self.ensure_admin(caller, "retry randomness")?;
        let timeout = self.config.randomness_timeout();
        RoundManager::new(&mut self.state).prepare_retry(timeout, now)
    }

    pub fn commit_retry(
        &mut self,
        draw: &DrawRequest,
        handle: RequestHandle,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.atomically(|state| RoundManager::new(state).commit_retry(draw, handle, now))
    }

    pub fn deliver_randomness(
        &mut self,
        caller: &Address,
        handle: RequestHandle,
        values: &[u64],
        now: DateTime<Utc>,
    ) -> Result<RoundId> {
        if caller != &self.config.randomness_operator {
            return Err(LotteryError::UnauthorizedOperator(caller.clone()));
        }
        self.atomically(|state| RoundManager::new(state).resolve(handle, values, now))
    }

    pub fn finalize_close(&mut self, caller: &Address, now: DateTime<Utc>) -> Result<RoundId> {
        self.ensure_admin(caller, "close a round")?;
        let window = self.config.break_window();
        self.atomically(|state| RoundManager::new(state).finalize_close(window, now))
    }

    // Admin parameters

    pub fn set_winner_count(&mut self, caller: &Address, count: u32) -> Result<()> {
        self.ensure_admin(caller, "set the winner count")?;
        AdminSettings::new(&mut self.state.admin).set_winner_count(count)
    }

    pub fn set_protocol_fee(&mut self, caller: &Address, bps: u16) -> Result<()> {
        self.ensure_admin(caller, "set the protocol fee")?;
        AdminSettings::new(&mut self.state.admin).set_protocol_fee(bps)
    }

    pub fn set_rent_fee(&mut self, caller: &Address, bps: u16) -> Result<()> {
        self.ensure_admin(caller, "set the rent fee")?;
        AdminSettings::new(&mut self.state.admin).set_rent_fee(bps)
    }

    pub fn set_rent_amount(&mut self, caller: &Address, amount: Amount) -> Result<()> {
        self.ensure_admin(caller, "set the rent amount")?;
        AdminSettings::new(&mut self.state.admin).set_rent_amount(amount)
    }

    /// Returns whether `address` was newly added. Bad proofs are not an error.
    pub fn verify_whitelist(
        &mut self,
        caller: &Address,
        proof: &[Hash],
        address: &Address,
    ) -> Result<bool> {
        self.ensure_admin(caller, "verify whitelist proofs")?;
        Ok(self
            .verifier
            .verify(&mut self.state.whitelist, proof, address))
    }

    pub fn collect_fees(&mut self, caller: &Address) -> Result<Transfer> {
        self.ensure_admin(caller, "collect protocol fees")?;
        let admin = self.config.admin.clone();
        self.atomically(|state| PayoutAccount::new(state).collect_fees(&admin))
    }

    // Participants

    pub fn deposit(
        &mut self,
        caller: &Address,
        value: Amount,
        now: DateTime<Utc>,
    ) -> Result<DepositReceipt> {
        self.atomically(|state| TicketLedger::new(state).deposit(caller, value, now))
    }

    pub fn rent(&mut self, caller: &Address, ticket: TicketId, value: Amount) -> Result<RentReceipt> {
        self.atomically(|state| TicketLedger::new(state).rent(caller, ticket, value))
    }

    pub fn claim(&mut self, caller: &Address, now: DateTime<Utc>) -> Result<ClaimReceipt> {
        self.atomically(|state| PayoutAccount::new(state).claim(caller, now))
    }

    // Reads

    pub fn admin_config(&self) -> &AdminConfig {
        &self.state.admin
    }

    pub fn accrued_fees(&self) -> Amount {
        self.state.accrued_fees
    }

    pub fn round(&self, id: RoundId) -> Option<&Round> {
        self.state.rounds.get(&id)
    }

    pub fn current_round(&self) -> Option<&Round> {
        self.state.current_round()
    }

    pub fn rounds(&self) -> impl Iterator<Item = &Round> {
        self.state.rounds.values()
    }

    pub fn ticket_info(&self, id: TicketId) -> Option<TicketInfo> {
        ledger::ticket_info(&self.state, id)
    }

    pub fn ticket_of(&self, owner: &Address) -> Option<TicketId> {
        self.state.ticket_owned_by(owner).map(|t| t.id)
    }

    /// Number of tickets ever allocated.
    pub fn holder_count(&self) -> usize {
        self.state.tickets.len()
    }

    pub fn whitelist_len(&self) -> usize {
        self.state.whitelist.len()
    }

    pub fn whitelist_member(&self, index: usize) -> Option<&Address> {
        self.state.whitelist.get(index)
    }

    pub fn is_whitelisted(&self, address: &Address) -> bool {
        self.state.is_whitelisted(address)
    }

    pub fn balance_of(&self, address: &Address) -> Amount {
        self.state.balance_of(address)
    }

    /// Tickets `address` deposited in `round` and the capacity it deposited them in.
    pub fn relations(&self, round: RoundId, address: &Address) -> Vec<(TicketId, DepositorRelation)> {
        self.round(round)
            .map(|r| r.deposits_by(address).map(|d| (d.ticket, d.relation)).collect())
            .unwrap_or_default()
    }

    pub fn winning_tickets(&self, round: RoundId) -> Result<Vec<TicketId>> {
        payout::winning_tickets(&self.state, round)
    }

    pub fn winner_addresses(&self, round: RoundId) -> Result<Vec<Address>> {
        payout::winner_addresses(&self.state, round)
    }

    pub fn randomness_handle(&self, round: RoundId) -> Option<RequestHandle> {
        self.round(round).and_then(|r| r.request)
    }

    pub fn pending_request(&self, round: RoundId) -> Option<&RandomnessRequest> {
        randomness::outstanding_for(&self.state.requests, round)
    }
}
