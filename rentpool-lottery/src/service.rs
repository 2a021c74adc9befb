//! Async front of the lottery: one writer at a time, state persisted before value leaves the
//! pool, and a failed transfer rolls the whole operation back.

use crate::clock::Clock;
use crate::engine::Lottery;
use crate::ledger::{DepositReceipt, RentReceipt, TicketInfo};
use crate::payout::ClaimReceipt;
use crate::randomness::RandomnessProvider;
use crate::round::DrawRequest;
use crate::treasury::{Transfer, Treasury};
use crate::whitelist::Hash;
use crate::{LotteryError, Result};
use parking_lot::RwLock;
use rentpool_core::{
    Address, AdminConfig, Amount, DepositorRelation, LedgerStore, PoolConfig, PoolError,
    PoolState, RequestHandle, Round, RoundId, StateStore, Storage, TicketId,
};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

// Set while a treasury or randomness provider call is awaited.
tokio::task_local! {
    static IN_CALLOUT: ();
}

pub struct LotteryService {
    storage: Arc<Storage>,
    lottery: RwLock<Lottery>,
    writer: Mutex<()>,
    treasury: Arc<dyn Treasury>,
    randomness: Arc<dyn RandomnessProvider>,
    clock: Arc<dyn Clock>,
}

impl LotteryService {
    /// Write the deployment settings for a fresh pool.
    pub async fn initialize(storage: &Storage, config: &PoolConfig) -> Result<()> {
        config.validate()?;
        LedgerStore::new(storage).save_pool_config(config).await?;
        tracing::info!(
            "Initialized pool with admin {} and randomness operator {}",
            config.admin,
            config.randomness_operator
        );
        Ok(())
    }

    /// Load the pool persisted in `storage`.
    pub async fn open(
        storage: Arc<Storage>,
        treasury: Arc<dyn Treasury>,
        randomness: Arc<dyn RandomnessProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let config = LedgerStore::new(&storage)
            .load_pool_config()
            .await?
            .ok_or(PoolError::NotInitialized)?;
        let state = StateStore::new(&storage).load().await?;

        tracing::debug!(
            "Loaded pool: {} rounds, {} tickets, {} whitelisted",
            state.rounds.len(),
            state.tickets.len(),
            state.whitelist.len()
        );

        Ok(Self {
            storage,
            lottery: RwLock::new(Lottery::new(config, state)?),
            writer: Mutex::new(()),
            treasury,
            randomness,
            clock,
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn config(&self) -> PoolConfig {
        self.lottery.read().config().clone()
    }

    async fn begin_write(&self) -> Result<MutexGuard<'_, ()>> {
        if IN_CALLOUT.try_with(|_| ()).is_ok() {
            tracing::warn!("Rejected mutation issued from inside a collaborator call");
            return Err(LotteryError::Reentrant);
        }
        Ok(self.writer.lock().await)
    }

    async fn persist(&self) -> Result<()> {
        let state = self.lottery.read().snapshot();
        StateStore::new(&self.storage).save(&state).await?;
        Ok(())
    }

    /// Run `op` on the in-memory lottery and persist the result. Returns the pre-call state
    /// so a later transfer failure can undo it. Callers must hold the writer lock.
    async fn apply<T>(&self, op: impl FnOnce(&mut Lottery) -> Result<T>) -> Result<(PoolState, T)> {
        let (snapshot, value) = {
            let mut lottery = self.lottery.write();
            let snapshot = lottery.snapshot();
            match op(&mut *lottery) {
                Ok(value) => (snapshot, value),
                Err(e) => {
                    lottery.restore(snapshot);
                    return Err(e);
                }
            }
        };

        if let Err(e) = self.persist().await {
            self.lottery.write().restore(snapshot);
            return Err(e);
        }

        Ok((snapshot, value))
    }

    /// Issue `transfer`, restoring `snapshot` in memory and on disk if it fails.
    async fn pay(&self, snapshot: PoolState, transfer: Transfer) -> Result<()> {
        if transfer.amount.is_zero() {
            return Ok(());
        }

        let result = IN_CALLOUT
            .scope((), self.treasury.transfer(&transfer))
            .await;

        match result {
            Ok(()) => {
                tracing::info!(
                    "Transferred {} to {} ({})",
                    transfer.amount,
                    transfer.recipient,
                    transfer.reason
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    "Transfer of {} to {} failed, rolling back: {}",
                    transfer.amount,
                    transfer.recipient,
                    e
                );
                self.lottery.write().restore(snapshot);
                self.persist().await?;
                Err(match e {
                    LotteryError::TransferFailed(msg) => LotteryError::TransferFailed(msg),
                    other => LotteryError::TransferFailed(other.to_string()),
                })
            }
        }
    }

    async fn request_randomness(&self, draw: &DrawRequest) -> Result<RequestHandle> {
        IN_CALLOUT
            .scope((), self.randomness.request(draw.round, draw.count))
            .await
            .map_err(|e| match e {
                LotteryError::RandomnessUnavailable(msg) => LotteryError::RandomnessUnavailable(msg),
                other => LotteryError::RandomnessUnavailable(other.to_string()),
            })
    }

    // Admin

    pub async fn start_round(&self, caller: &Address) -> Result<RoundId> {
        let _writer = self.begin_write().await?;
        let now = self.clock.now();
        let (_, id) = self.apply(|lottery| lottery.start_round(caller, now)).await?;
        Ok(id)
    }

    /// Close deposits and ask the provider for `winner_count` values.
    pub async fn request_break(&self, caller: &Address) -> Result<RequestHandle> {
        let _writer = self.begin_write().await?;
        let now = self.clock.now();

        let draw = self.lottery.write().prepare_break(caller, now)?;
        let handle = self.request_randomness(&draw).await?;
        self.apply(|lottery| lottery.commit_break(&draw, handle, now))
            .await?;

        Ok(handle)
    }

    pub async fn retry_randomness(&self, caller: &Address) -> Result<RequestHandle> {
        let _writer = self.begin_write().await?;
        let now = self.clock.now();

        let draw = self.lottery.write().prepare_retry(caller, now)?;
        let handle = self.request_randomness(&draw).await?;
        self.apply(|lottery| lottery.commit_retry(&draw, handle, now))
            .await?;

        Ok(handle)
    }

    pub async fn finalize_close(&self, caller: &Address) -> Result<RoundId> {
        let _writer = self.begin_write().await?;
        let now = self.clock.now();
        let (_, id) = self
            .apply(|lottery| lottery.finalize_close(caller, now))
            .await?;
        Ok(id)
    }

    pub async fn set_winner_count(&self, caller: &Address, count: u32) -> Result<()> {
        let _writer = self.begin_write().await?;
        self.apply(|lottery| lottery.set_winner_count(caller, count))
            .await?;
        Ok(())
    }

    pub async fn set_protocol_fee(&self, caller: &Address, bps: u16) -> Result<()> {
        let _writer = self.begin_write().await?;
        self.apply(|lottery| lottery.set_protocol_fee(caller, bps))
            .await?;
        Ok(())
    }

    pub async fn set_rent_fee(&self, caller: &Address, bps: u16) -> Result<()> {
        let _writer = self.begin_write().await?;
        self.apply(|lottery| lottery.set_rent_fee(caller, bps))
            .await?;
        Ok(())
    }

    pub async fn set_rent_amount(&self, caller: &Address, amount: Amount) -> Result<()> {
        let _writer = self.begin_write().await?;
        self.apply(|lottery| lottery.set_rent_amount(caller, amount))
            .await?;
        Ok(())
    }

    pub async fn verify_whitelist(
        &self,
        caller: &Address,
        proof: &[Hash],
        address: &Address,
    ) -> Result<bool> {
        let _writer = self.begin_write().await?;
        let (_, added) = self
            .apply(|lottery| lottery.verify_whitelist(caller, proof, address))
            .await?;
        Ok(added)
    }

    pub async fn collect_protocol_fees(&self, caller: &Address) -> Result<Transfer> {
        let _writer = self.begin_write().await?;
        let (snapshot, transfer) = self.apply(|lottery| lottery.collect_fees(caller)).await?;
        self.pay(snapshot, transfer.clone()).await?;
        Ok(transfer)
    }

    // Participants

    pub async fn deposit(&self, caller: &Address, value: Amount) -> Result<DepositReceipt> {
        let _writer = self.begin_write().await?;
        let now = self.clock.now();
        let (_, receipt) = self
            .apply(|lottery| lottery.deposit(caller, value, now))
            .await?;
        Ok(receipt)
    }

    pub async fn rent(&self, caller: &Address, ticket: TicketId, value: Amount) -> Result<RentReceipt> {
        let _writer = self.begin_write().await?;
        let (snapshot, receipt) = self
            .apply(|lottery| lottery.rent(caller, ticket, value))
            .await?;
        self.pay(snapshot, receipt.transfer()).await?;
        Ok(receipt)
    }

    pub async fn claim(&self, caller: &Address) -> Result<ClaimReceipt> {
        let _writer = self.begin_write().await?;
        let now = self.clock.now();
        let (snapshot, (receipt, transfer)) = self
            .apply(|lottery| {
                let receipt = lottery.claim(caller, now)?;
                let transfer = receipt.transfer()?;
                Ok((receipt, transfer))
            })
            .await?;
        self.pay(snapshot, transfer).await?;
        Ok(receipt)
    }

    // Randomness callback

    pub async fn deliver_randomness(
        &self,
        caller: &Address,
        handle: RequestHandle,
        values: &[u64],
    ) -> Result<RoundId> {
        let _writer = self.begin_write().await?;
        let now = self.clock.now();
        let (_, round) = self
            .apply(|lottery| lottery.deliver_randomness(caller, handle, values, now))
            .await?;
        Ok(round)
    }

    // Reads

    pub fn admin_config(&self) -> AdminConfig {
        self.lottery.read().admin_config().clone()
    }

    pub fn accrued_fees(&self) -> Amount {
        self.lottery.read().accrued_fees()
    }

    pub fn round(&self, id: RoundId) -> Option<Round> {
        self.lottery.read().round(id).cloned()
    }

    pub fn current_round(&self) -> Option<Round> {
        self.lottery.read().current_round().cloned()
    }

    pub fn rounds(&self) -> Vec<Round> {
        self.lottery.read().rounds().cloned().collect()
    }

    pub fn ticket_info(&self, id: TicketId) -> Option<TicketInfo> {
        self.lottery.read().ticket_info(id)
    }

    pub fn ticket_of(&self, owner: &Address) -> Option<TicketId> {
        self.lottery.read().ticket_of(owner)
    }

    pub fn holder_count(&self) -> usize {
        self.lottery.read().holder_count()
    }

    pub fn whitelist_len(&self) -> usize {
        self.lottery.read().whitelist_len()
    }

    pub fn whitelist_member(&self, index: usize) -> Option<Address> {
        self.lottery.read().whitelist_member(index).cloned()
    }

    pub fn is_whitelisted(&self, address: &Address) -> bool {
        self.lottery.read().is_whitelisted(address)
    }

    pub fn balance_of(&self, address: &Address) -> Amount {
        self.lottery.read().balance_of(address)
    }

    pub fn relations(&self, round: RoundId, address: &Address) -> Vec<(TicketId, DepositorRelation)> {
        self.lottery.read().relations(round, address)
    }

    pub fn winning_tickets(&self, round: RoundId) -> Result<Vec<TicketId>> {
        self.lottery.read().winning_tickets(round)
    }

    pub fn winner_addresses(&self, round: RoundId) -> Result<Vec<Address>> {
        self.lottery.read().winner_addresses(round)
    }

    pub fn randomness_handle(&self, round: RoundId) -> Option<RequestHandle> {
        self.lottery.read().randomness_handle(round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::treasury::TransferReason;
    use crate::whitelist::MerkleTree;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use rentpool_core::{RoundState, TransferRecord};
    use std::sync::Weak;
    use tempfile::{tempdir, TempDir};

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    fn units(n: u64) -> Amount {
        Amount::from_units(n)
    }

    /// Journals transfers through the ledger store, optionally failing or calling back in.
    #[derive(Default)]
    struct MockTreasury {
        storage: parking_lot::Mutex<Option<Arc<Storage>>>,
        fail: parking_lot::Mutex<bool>,
        reenter: parking_lot::Mutex<Option<Weak<LotteryService>>>,
        observed: parking_lot::Mutex<Vec<String>>,
        sent: parking_lot::Mutex<Vec<Transfer>>,
    }

    #[async_trait]
    impl Treasury for MockTreasury {
        async fn transfer(&self, transfer: &Transfer) -> Result<()> {
            let service = self.reenter.lock().as_ref().and_then(Weak::upgrade);
            if let Some(service) = service {
                let err = service.deposit(&addr("sneaky"), units(1)).await.unwrap_err();
                self.observed.lock().push(format!("{:?}", err));
                // reads still work and see the pending state
                let balance = service.balance_of(&transfer.recipient);
                self.observed.lock().push(balance.to_string());
            }

            if *self.fail.lock() {
                return Err(LotteryError::TransferFailed("insufficient funds".to_string()));
            }

            let storage = self.storage.lock().clone();
            if let Some(storage) = storage {
                LedgerStore::new(&storage)
                    .record_transfer(&transfer.recipient, transfer.amount, &transfer.memo())
                    .await?;
            }
            self.sent.lock().push(transfer.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockRandomness {
        fail: parking_lot::Mutex<bool>,
        issued: parking_lot::Mutex<Vec<(RoundId, u32)>>,
        reenter: parking_lot::Mutex<Option<Weak<LotteryService>>>,
        observed: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RandomnessProvider for MockRandomness {
        async fn request(&self, round: RoundId, count: u32) -> Result<RequestHandle> {
            if *self.fail.lock() {
                return Err(LotteryError::RandomnessUnavailable("offline".to_string()));
            }
            self.issued.lock().push((round, count));
            let handle = RequestHandle::new();

            let service = self.reenter.lock().as_ref().and_then(Weak::upgrade);
            if let Some(service) = service {
                let err = service
                    .deliver_randomness(&addr("oracle"), handle, &[0])
                    .await
                    .unwrap_err();
                self.observed.lock().push(format!("{:?}", err));
            }
            Ok(handle)
        }
    }

    struct Harness {
        _dir: TempDir,
        storage: Arc<Storage>,
        service: Arc<LotteryService>,
        treasury: Arc<MockTreasury>,
        randomness: Arc<MockRandomness>,
        clock: Arc<ManualClock>,
        members: Vec<Address>,
    }

    impl Harness {
        async fn new() -> Self {
            let dir = tempdir().unwrap();
            let storage = Arc::new(Storage::new(&dir.path().join("rentpool.db")).await.unwrap());
            let members = vec![addr("wl1"), addr("wl2"), addr("wl3")];
            let config = PoolConfig::new(
                addr("admin"),
                addr("oracle"),
                MerkleTree::new(&members).root(),
            );
            LotteryService::initialize(&storage, &config).await.unwrap();

            let treasury = Arc::new(MockTreasury::default());
            *treasury.storage.lock() = Some(storage.clone());
            let randomness = Arc::new(MockRandomness::default());
            // whole seconds, matching the precision timestamps are stored with
            let start = DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap();
            let clock = Arc::new(ManualClock::new(start));
            let service = Arc::new(
                LotteryService::open(
                    storage.clone(),
                    treasury.clone(),
                    randomness.clone(),
                    clock.clone(),
                )
                .await
                .unwrap(),
            );

            Self {
                _dir: dir,
                storage,
                service,
                treasury,
                randomness,
                clock,
                members,
            }
        }

        async fn reopen(&self) -> LotteryService {
            LotteryService::open(
                self.storage.clone(),
                self.treasury.clone(),
                self.randomness.clone(),
                self.clock.clone(),
            )
            .await
            .unwrap()
        }

        fn admin(&self) -> Address {
            addr("admin")
        }

        async fn break_with(&self, values: &[u64]) {
            self.clock.advance(Duration::days(7));
            let handle = self.service.request_break(&self.admin()).await.unwrap();
            self.service
                .deliver_randomness(&addr("oracle"), handle, values)
                .await
                .unwrap();
        }

        async fn close(&self) {
            self.clock.advance(Duration::days(7));
            self.service.finalize_close(&self.admin()).await.unwrap();
        }

        async fn journal(&self, who: &str) -> Vec<TransferRecord> {
            LedgerStore::new(&self.storage)
                .list_transfers(Some(&addr(who)))
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_three_depositor_scenario() {
        let h = Harness::new().await;
        let admin = h.admin();
        h.service.set_protocol_fee(&admin, 1_000).await.unwrap();
        h.service.start_round(&admin).await.unwrap();
        for name in ["u1", "u2", "u3"] {
            h.service.deposit(&addr(name), units(5)).await.unwrap();
        }

        // 4 % 3 = 1, the middle deposit
        h.break_with(&[4]).await;
        assert_eq!(
            h.service.winner_addresses(RoundId(1)).unwrap(),
            vec![addr("u2")]
        );

        let receipt = h.service.claim(&addr("u2")).await.unwrap();
        assert_eq!(receipt.total().unwrap(), units(13));
        assert_eq!(h.journal("u2").await.len(), 1);
        assert_eq!(h.journal("u2").await[0].amount, units(13));

        for loser in ["u1", "u3"] {
            let err = h.service.claim(&addr(loser)).await.unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::Eligibility);
        }
        assert!(matches!(
            h.service.claim(&addr("u2")).await,
            Err(LotteryError::AlreadyClaimed)
        ));
        assert_eq!(h.service.accrued_fees(), units(2));

        let fees = h.service.collect_protocol_fees(&admin).await.unwrap();
        assert_eq!(fees.amount, units(2));
        assert_eq!(fees.reason, TransferReason::ProtocolFees);
        assert!(h.service.accrued_fees().is_zero());
    }

    #[tokio::test]
    async fn test_rent_pays_owner_immediately() {
        let h = Harness::new().await;
        let admin = h.admin();
        h.service.start_round(&admin).await.unwrap();
        h.service.deposit(&addr("owner"), units(5)).await.unwrap();
        h.break_with(&[0]).await;
        h.close().await;

        h.service.start_round(&admin).await.unwrap();
        let receipt = h
            .service
            .rent(&addr("renter"), TicketId(0), units(1))
            .await
            .unwrap();
        assert_eq!(receipt.owner, addr("owner"));

        let journal = h.journal("owner").await;
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].amount, units(1));
        assert_eq!(h.service.ticket_info(TicketId(0)).unwrap().renter, Some(addr("renter")));

        assert!(matches!(
            h.service.deposit(&addr("owner"), units(5)).await,
            Err(LotteryError::RentedToOther(TicketId(0)))
        ));
        assert!(matches!(
            h.service.rent(&addr("other"), TicketId(0), units(1)).await,
            Err(LotteryError::AlreadyRented(TicketId(0)))
        ));
        assert!(matches!(
            h.service.rent(&addr("other"), TicketId(9), units(1)).await,
            Err(LotteryError::InvalidTicket(TicketId(9)))
        ));
    }

    #[tokio::test]
    async fn test_borrower_split_and_owner_credit_at_close() {
        let h = Harness::new().await;
        let admin = h.admin();
        h.service.set_winner_count(&admin, 2).await.unwrap();
        h.service.set_protocol_fee(&admin, 5_000).await.unwrap();
        h.service.set_rent_fee(&admin, 1_000).await.unwrap();

        h.service.start_round(&admin).await.unwrap();
        for name in ["user4", "user3", "user2"] {
            h.service.deposit(&addr(name), units(40)).await.unwrap();
        }
        h.break_with(&[3, 2]).await;
        assert_eq!(
            h.service.winner_addresses(RoundId(1)).unwrap(),
            vec![addr("user2"), addr("user4")]
        );
        h.service.claim(&addr("user4")).await.unwrap();
        h.close().await;
        // user2 never claimed round 1
        assert_eq!(h.service.balance_of(&addr("user2")), units(30));

        h.service.start_round(&admin).await.unwrap();
        h.service
            .rent(&addr("user1"), TicketId(0), units(1))
            .await
            .unwrap();
        h.service
            .rent(&addr("user6"), TicketId(2), units(1))
            .await
            .unwrap();
        h.service.deposit(&addr("user6"), units(40)).await.unwrap();
        h.service.deposit(&addr("user5"), units(40)).await.unwrap();
        h.service.deposit(&addr("user1"), units(40)).await.unwrap();
        assert_eq!(
            h.service.relations(RoundId(2), &addr("user5")),
            vec![(TicketId(3), DepositorRelation::NewDepositor)]
        );

        h.break_with(&[7, 3]).await;
        assert_eq!(
            h.service.winning_tickets(RoundId(2)).unwrap(),
            vec![TicketId(3), TicketId(0)]
        );

        assert_eq!(h.service.claim(&addr("user5")).await.unwrap().total().unwrap(), units(30));
        assert!(matches!(
            h.service.claim(&addr("user6")).await,
            Err(LotteryError::BorrowerNotWinner)
        ));
        assert!(matches!(
            h.service.claim(&addr("user4")).await,
            Err(LotteryError::OwnerMustWaitForBorrower(TicketId(0)))
        ));

        let receipt = h.service.claim(&addr("user1")).await.unwrap();
        assert_eq!(receipt.total().unwrap(), units(27));
        assert_eq!(h.service.balance_of(&addr("user4")), units(3));
    }

    #[tokio::test]
    async fn test_owner_takes_full_entitlement_when_borrower_misses_break() {
        let h = Harness::new().await;
        let admin = h.admin();
        h.service.set_rent_fee(&admin, 1_000).await.unwrap();
        h.service.start_round(&admin).await.unwrap();
        h.service.deposit(&addr("owner"), units(10)).await.unwrap();
        h.break_with(&[0]).await;
        h.service.claim(&addr("owner")).await.unwrap();
        h.close().await;

        h.service.start_round(&admin).await.unwrap();
        h.service
            .rent(&addr("renter"), TicketId(0), units(1))
            .await
            .unwrap();
        h.service.deposit(&addr("renter"), units(20)).await.unwrap();
        h.break_with(&[0]).await;
        h.close().await;

        assert!(matches!(
            h.service.claim(&addr("renter")).await,
            Err(LotteryError::BorrowerWindowElapsed)
        ));
        let receipt = h.service.claim(&addr("owner")).await.unwrap();
        assert_eq!(receipt.withdrawn, units(20));
        assert!(matches!(
            h.service.claim(&addr("owner")).await,
            Err(LotteryError::AlreadyClaimed)
        ));
    }

    #[tokio::test]
    async fn test_whitelist_and_read_guards() {
        let h = Harness::new().await;
        let admin = h.admin();
        let tree = MerkleTree::new(&h.members);
        let proof = tree.proof(&h.members[1]).unwrap();

        assert!(h
            .service
            .verify_whitelist(&admin, &proof, &h.members[1])
            .await
            .unwrap());
        assert!(!h
            .service
            .verify_whitelist(&admin, &proof, &addr("outsider"))
            .await
            .unwrap());
        assert_eq!(h.service.whitelist_len(), 1);

        h.service.start_round(&admin).await.unwrap();
        assert!(matches!(
            h.service.winner_addresses(RoundId(1)),
            Err(LotteryError::InvalidOrTooLate(_))
        ));
        let receipt = h.service.deposit(&h.members[1], Amount::ZERO).await.unwrap();
        assert_eq!(receipt.relation, DepositorRelation::Whitelisted);
        assert!(matches!(
            h.service.deposit(&addr("outsider"), Amount::ZERO).await,
            Err(LotteryError::InvalidAmount(_))
        ));

        h.break_with(&[0]).await;
        h.close().await;
        assert!(matches!(
            h.service.winner_addresses(RoundId(1)),
            Err(LotteryError::InvalidOrTooLate(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_transfer_rolls_back() {
        let h = Harness::new().await;
        let admin = h.admin();
        h.service.start_round(&admin).await.unwrap();
        h.service.deposit(&addr("alice"), units(8)).await.unwrap();
        h.break_with(&[0]).await;

        *h.treasury.fail.lock() = true;
        let err = h.service.claim(&addr("alice")).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Transfer);
        assert!(h.service.current_round().unwrap().settlements.is_empty());

        // the rollback reached the database too
        let reopened = h.reopen().await;
        assert!(reopened.current_round().unwrap().settlements.is_empty());

        *h.treasury.fail.lock() = false;
        assert_eq!(h.service.claim(&addr("alice")).await.unwrap().total().unwrap(), units(8));
        assert_eq!(h.journal("alice").await.len(), 1);
    }

    #[tokio::test]
    async fn test_reentrant_mutation_rejected() {
        let h = Harness::new().await;
        let admin = h.admin();
        h.service.start_round(&admin).await.unwrap();
        h.service.deposit(&addr("alice"), units(8)).await.unwrap();
        h.break_with(&[0]).await;

        *h.treasury.reenter.lock() = Some(Arc::downgrade(&h.service));
        h.service.claim(&addr("alice")).await.unwrap();

        let observed = h.treasury.observed.lock().clone();
        assert_eq!(observed[0], "Reentrant");
        assert_eq!(observed[1], Amount::ZERO.to_string());
        assert!(h.service.ticket_of(&addr("sneaky")).is_none());
    }

    #[tokio::test]
    async fn test_provider_callback_during_request_rejected() {
        let h = Harness::new().await;
        let admin = h.admin();
        h.service.start_round(&admin).await.unwrap();
        h.service.deposit(&addr("alice"), units(8)).await.unwrap();

        *h.randomness.reenter.lock() = Some(Arc::downgrade(&h.service));
        h.clock.advance(Duration::days(7));
        let handle = h.service.request_break(&admin).await.unwrap();

        assert_eq!(h.randomness.observed.lock().clone(), vec!["Reentrant".to_string()]);
        assert_eq!(
            h.service.current_round().unwrap().state,
            RoundState::AwaitingRandomness
        );

        *h.randomness.reenter.lock() = None;
        h.service
            .deliver_randomness(&addr("oracle"), handle, &[0])
            .await
            .unwrap();
        assert_eq!(h.service.current_round().unwrap().state, RoundState::Break);
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let h = Harness::new().await;
        let admin = h.admin();
        h.service.set_rent_amount(&admin, units(2)).await.unwrap();
        h.service.start_round(&admin).await.unwrap();
        h.service.deposit(&addr("alice"), units(3)).await.unwrap();
        h.service.deposit(&addr("bob"), units(4)).await.unwrap();
        h.break_with(&[1]).await;

        let reopened = h.reopen().await;
        assert_eq!(reopened.admin_config().rent_amount, units(2));
        assert_eq!(reopened.holder_count(), 2);
        let round = reopened.current_round().unwrap();
        assert_eq!(round.state, RoundState::Break);
        assert_eq!(round, h.service.current_round().unwrap());
        assert_eq!(
            reopened.randomness_handle(RoundId(1)),
            h.service.randomness_handle(RoundId(1))
        );
    }

    #[tokio::test]
    async fn test_randomness_retry_after_timeout() {
        let h = Harness::new().await;
        let admin = h.admin();
        h.service.start_round(&admin).await.unwrap();
        h.service.deposit(&addr("alice"), units(3)).await.unwrap();

        h.clock.advance(Duration::days(7));
        *h.randomness.fail.lock() = true;
        assert!(matches!(
            h.service.request_break(&admin).await,
            Err(LotteryError::RandomnessUnavailable(_))
        ));
        assert_eq!(h.service.current_round().unwrap().state, RoundState::Open);

        *h.randomness.fail.lock() = false;
        let first = h.service.request_break(&admin).await.unwrap();
        assert!(matches!(
            h.service.request_break(&admin).await,
            Err(LotteryError::WrongState { .. })
        ));
        assert!(matches!(
            h.service.retry_randomness(&admin).await,
            Err(LotteryError::TooEarly { .. })
        ));

        h.clock.advance(Duration::days(1));
        let second = h.service.retry_randomness(&admin).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(h.randomness.issued.lock().len(), 2);

        assert!(matches!(
            h.service
                .deliver_randomness(&addr("oracle"), first, &[0])
                .await,
            Err(LotteryError::RequestConsumed(_))
        ));
        h.service
            .deliver_randomness(&addr("oracle"), second, &[0])
            .await
            .unwrap();
        assert_eq!(h.service.current_round().unwrap().state, RoundState::Break);
    }

    #[tokio::test]
    async fn test_round_ids_strictly_increase() {
        let h = Harness::new().await;
        let admin = h.admin();
        assert_eq!(h.service.start_round(&admin).await.unwrap(), RoundId(1));
        assert!(matches!(
            h.service.start_round(&admin).await,
            Err(LotteryError::RoundStillActive { .. })
        ));

        h.clock.advance(Duration::days(14));
        assert!(matches!(
            h.service.request_break(&admin).await,
            Err(LotteryError::NoDeposits(RoundId(1)))
        ));
        assert!(h.randomness.issued.lock().is_empty());

        h.service.deposit(&addr("alice"), units(1)).await.unwrap();
        h.break_with(&[0]).await;
        h.close().await;
        assert_eq!(h.service.start_round(&admin).await.unwrap(), RoundId(2));
        assert_eq!(h.service.rounds().len(), 2);
    }

    #[tokio::test]
    async fn test_oversized_deposits_rejected_and_pot_stays_storable() {
        let h = Harness::new().await;
        let admin = h.admin();
        h.service.start_round(&admin).await.unwrap();

        assert!(matches!(
            h.service.deposit(&addr("whale"), units(u64::MAX)).await,
            Err(LotteryError::InvalidAmount(_))
        ));
        let half = units(u64::MAX / 2 + 1);
        assert!(matches!(
            h.service.deposit(&addr("whale"), half).await,
            Err(LotteryError::InvalidAmount(_))
        ));
        assert!(matches!(
            h.service.set_rent_amount(&admin, units(u64::MAX)).await,
            Err(LotteryError::InvalidParameter(_))
        ));

        let big = units(Amount::MAX.to_units() - 1);
        h.service.deposit(&addr("alice"), big).await.unwrap();
        h.service.deposit(&addr("bob"), units(1)).await.unwrap();
        assert!(matches!(
            h.service.deposit(&addr("carol"), units(1)).await,
            Err(LotteryError::InvalidAmount(_))
        ));
        assert_eq!(h.service.holder_count(), 2);

        // 0 selects the latest deposit
        h.break_with(&[0]).await;
        assert_eq!(
            h.service.winner_addresses(RoundId(1)).unwrap(),
            vec![addr("bob")]
        );
        let receipt = h.service.claim(&addr("bob")).await.unwrap();
        assert_eq!(receipt.total().unwrap(), Amount::MAX);
        assert_eq!(h.journal("bob").await[0].amount, Amount::MAX);

        let reopened = h.reopen().await;
        let round = reopened.current_round().unwrap();
        assert_eq!(round.total_deposited(), Some(Amount::MAX));
        assert_eq!(round, h.service.current_round().unwrap());
    }
}
