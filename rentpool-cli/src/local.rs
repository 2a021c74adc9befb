//! Local stand-ins for the value-moving and randomness collaborators.

use async_trait::async_trait;
use rentpool_core::{LedgerStore, RequestHandle, RoundId, Storage};
use rentpool_lottery::{RandomnessProvider, Result, Transfer, Treasury};
use std::sync::Arc;

/// Records every outgoing transfer in the `transfers` journal.
pub struct JournalTreasury {
    storage: Arc<Storage>,
}

impl JournalTreasury {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Treasury for JournalTreasury {
    async fn transfer(&self, transfer: &Transfer) -> Result<()> {
        LedgerStore::new(&self.storage)
            .record_transfer(&transfer.recipient, transfer.amount, &transfer.memo())
            .await?;
        Ok(())
    }
}

/// Issues handles locally; values are supplied later with `rentpool deliver`.
pub struct ManualRandomness;

#[async_trait]
impl RandomnessProvider for ManualRandomness {
    async fn request(&self, round: RoundId, count: u32) -> Result<RequestHandle> {
        let handle = RequestHandle::new();
        tracing::debug!("Issued randomness handle {} for round {} ({} values)", handle, round, count);
        println!(
            "Randomness requested for round {}: deliver {} value(s) with",
            round, count
        );
        println!("  rentpool --caller <operator> deliver {} <values>...", handle);
        Ok(handle)
    }
}
