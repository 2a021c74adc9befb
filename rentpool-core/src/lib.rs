//! rentpool core - data model and persistence for round-based lotteries
//!
//! Holds the records a rentable-ticket lottery keeps across restarts (rounds, tickets,
//! whitelist, balances, randomness requests, admin parameters) and their SQLite mapping.
//! The rules that drive them live in `rentpool-lottery`.

pub mod config;
pub mod error;
pub mod model;
pub mod storage;
pub mod types;

pub use config::PoolConfig;
pub use error::{PoolError, Result};
pub use model::{
    AdminConfig, Deposit, PoolState, RandomnessRequest, Round, Settlement, Ticket,
};
pub use storage::{LedgerStore, RoundStore, StateStore, Storage, TicketStore, TransferRecord};
pub use types::{
    Address, Amount, DepositorRelation, RequestHandle, RequestStatus, RoundId, RoundState,
    SettlementKind, TicketId, BPS_DENOMINATOR,
};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_pool_config_round_trip() {
        let temp_dir = tempdir().unwrap();
        let storage = Storage::new(&temp_dir.path().join("rentpool.db"))
            .await
            .unwrap();
        let ledger = LedgerStore::new(&storage);

        assert!(ledger.load_pool_config().await.unwrap().is_none());

        let config = PoolConfig::new(
            Address::new("admin").unwrap(),
            Address::new("oracle").unwrap(),
            [1u8; 32],
        );
        ledger.save_pool_config(&config).await.unwrap();
        assert_eq!(ledger.load_pool_config().await.unwrap(), Some(config));
    }

    #[tokio::test]
    async fn test_store_lookups() {
        let temp_dir = tempdir().unwrap();
        let storage = Storage::new(&temp_dir.path().join("rentpool.db"))
            .await
            .unwrap();
        let alice = Address::new("alice").unwrap();

        let mut state = PoolState::default();
        state.tickets.push(Ticket {
            id: TicketId(0),
            owner: alice.clone(),
            created_at: Utc::now(),
        });
        state.balances.insert(alice.clone(), Amount::from_units(3));
        state
            .rounds
            .insert(RoundId::FIRST, Round::open(RoundId::FIRST, &state.admin, Utc::now()));
        StateStore::new(&storage).save(&state).await.unwrap();

        let tickets = TicketStore::new(&storage);
        assert_eq!(tickets.holder_count().await.unwrap(), 1);
        assert_eq!(
            tickets.find_by_owner(&alice).await.unwrap().map(|t| t.id),
            Some(TicketId(0))
        );
        assert!(tickets.load_ticket(TicketId(9)).await.unwrap().is_none());

        let ledger = LedgerStore::new(&storage);
        assert_eq!(ledger.balance_of(&alice).await.unwrap(), Amount::from_units(3));

        let rounds = RoundStore::new(&storage);
        assert_eq!(rounds.list_rounds().await.unwrap().len(), 1);
        assert_eq!(
            rounds
                .load_round(RoundId::FIRST)
                .await
                .unwrap()
                .map(|r| r.state),
            Some(RoundState::Open)
        );

        let record = ledger
            .record_transfer(&alice, Amount::from_units(2), "claim")
            .await
            .unwrap();
        let journal = ledger.list_transfers(Some(&alice)).await.unwrap();
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].id, record.id);
    }

    #[tokio::test]
    async fn test_balance_rejects_out_of_range_column() {
        let temp_dir = tempdir().unwrap();
        let storage = Storage::new(&temp_dir.path().join("rentpool.db"))
            .await
            .unwrap();
        {
            let conn = storage.get_connection().await;
            conn.execute(
                "INSERT INTO balances (address, amount) VALUES ('mallory', -1)",
                [],
            )
            .unwrap();
        }

        let ledger = LedgerStore::new(&storage);
        assert!(matches!(
            ledger.balance_of(&Address::new("mallory").unwrap()).await,
            Err(PoolError::Storage(_))
        ));
        assert_eq!(
            ledger.balance_of(&Address::new("nobody").unwrap()).await.unwrap(),
            Amount::ZERO
        );
    }
}
