use super::ledger_store::{
    put_admin_config, put_balances, put_requests, put_whitelist, read_admin_config,
    read_balances, read_requests, read_whitelist,
};
use super::round_store::{put_round, read_rounds};
use super::ticket_store::{put_tickets, read_tickets};
use super::Storage;
use crate::error::{PoolError, Result};
use crate::model::PoolState;
use crate::types::TicketId;

/// Whole-state load and save, each in a single SQLite transaction.
pub struct StateStore<'a> {
    storage: &'a Storage,
}

impl<'a> StateStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Persist `state`. Only the current round is rewritten: earlier rounds are frozen once
    /// their successor opens.
    pub async fn save(&self, state: &PoolState) -> Result<()> {
        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction()?;

        put_admin_config(&tx, &state.admin, state.accrued_fees)?;
        put_tickets(&tx, &state.tickets)?;
        put_whitelist(&tx, &state.whitelist)?;
        put_balances(&tx, &state.balances)?;
        put_requests(&tx, state.requests.values())?;
        if let Some(round) = state.current_round() {
            put_round(&tx, round)?;
        }

        tx.commit()?;
        Ok(())
    }

    pub async fn load(&self) -> Result<PoolState> {
        let conn = self.storage.get_connection().await;

        let mut state = PoolState::default();
        if let Some((admin, accrued_fees)) = read_admin_config(&conn)? {
            state.admin = admin;
            state.accrued_fees = accrued_fees;
        }

        state.tickets = read_tickets(&conn)?;
        for (index, ticket) in state.tickets.iter().enumerate() {
            if ticket.id != TicketId(index as u64) {
                return Err(PoolError::corrupt(
                    "tickets",
                    format!("ticket ids are not contiguous at {}", ticket.id),
                ));
            }
        }

        state.whitelist = read_whitelist(&conn)?;
        state.balances = read_balances(&conn)?;
        state.requests = read_requests(&conn)?
            .into_iter()
            .map(|r| (r.handle, r))
            .collect();
        state.rounds = read_rounds(&conn)?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        tracing::debug!(
            "Loaded pool state: {} rounds, {} tickets, {} whitelisted",
            state.rounds.len(),
            state.tickets.len(),
            state.whitelist.len()
        );
        Ok(state)
    }
}
