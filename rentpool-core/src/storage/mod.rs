pub mod ledger_store;
pub mod round_store;
pub mod state_store;
pub mod ticket_store;

pub use ledger_store::{LedgerStore, TransferRecord};
pub use round_store::RoundStore;
pub use state_store::StateStore;
pub use ticket_store::TicketStore;

use crate::error::{PoolError, Result};
use crate::types::Amount;
use chrono::{DateTime, Utc};
use rusqlite::types::{ToSqlOutput, Type};
use rusqlite::{Connection, ToSql};
use std::path::Path;
use std::str::FromStr;
use tokio::sync::Mutex;

pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    pub async fn new(db_path: &Path) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PoolError::internal(format!("Failed to create directory: {}", e)))?;
        }

        let conn = Connection::open(db_path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };

        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        // Deployment settings (JSON values)
        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        // Singleton admin parameters
        conn.execute(
            "CREATE TABLE IF NOT EXISTS admin_config (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                winner_count INTEGER NOT NULL,
                protocol_fee_bps INTEGER NOT NULL,
                rent_fee_bps INTEGER NOT NULL,
                rent_amount INTEGER NOT NULL,
                accrued_fees INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS rounds (
                id INTEGER PRIMARY KEY,
                state TEXT NOT NULL,
                opened_at INTEGER NOT NULL,
                break_requested_at INTEGER,
                broken_at INTEGER,
                closed_at INTEGER,
                winner_count INTEGER NOT NULL,
                protocol_fee_bps INTEGER NOT NULL,
                rent_fee_bps INTEGER NOT NULL,
                request_handle TEXT,
                winners TEXT NOT NULL,
                pot_share INTEGER NOT NULL,
                protocol_fee INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS round_deposits (
                round_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                ticket_id INTEGER NOT NULL,
                depositor TEXT NOT NULL,
                relation TEXT NOT NULL,
                amount INTEGER NOT NULL,
                deposited_at INTEGER NOT NULL,
                FOREIGN KEY (round_id) REFERENCES rounds(id),
                PRIMARY KEY (round_id, ticket_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS rentals (
                round_id INTEGER NOT NULL,
                ticket_id INTEGER NOT NULL,
                renter TEXT NOT NULL,
                FOREIGN KEY (round_id) REFERENCES rounds(id),
                PRIMARY KEY (round_id, ticket_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS settlements (
                round_id INTEGER NOT NULL,
                ticket_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                beneficiary TEXT NOT NULL,
                paid INTEGER NOT NULL,
                owner_credit INTEGER NOT NULL,
                settled_at INTEGER NOT NULL,
                FOREIGN KEY (round_id) REFERENCES rounds(id),
                PRIMARY KEY (round_id, ticket_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS withdrawals (
                round_id INTEGER NOT NULL,
                address TEXT NOT NULL,
                amount INTEGER NOT NULL,
                FOREIGN KEY (round_id) REFERENCES rounds(id),
                PRIMARY KEY (round_id, address)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tickets (
                id INTEGER PRIMARY KEY,
                owner TEXT UNIQUE NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS whitelist (
                position INTEGER PRIMARY KEY,
                address TEXT UNIQUE NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS balances (
                address TEXT PRIMARY KEY,
                amount INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS randomness_requests (
                handle TEXT PRIMARY KEY,
                round_id INTEGER NOT NULL,
                count INTEGER NOT NULL,
                requested_at INTEGER NOT NULL,
                status TEXT NOT NULL
            )",
            [],
        )?;

        // Outgoing transfer journal
        conn.execute(
            "CREATE TABLE IF NOT EXISTS transfers (
                id TEXT PRIMARY KEY,
                recipient TEXT NOT NULL,
                amount INTEGER NOT NULL,
                memo TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    pub async fn get_connection(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

pub(crate) fn to_datetime(idx: usize, ts: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ts))
}

pub(crate) fn to_amount(idx: usize, units: i64) -> rusqlite::Result<Amount> {
    u64::try_from(units)
        .map(Amount::from_units)
        .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, units))
}

/// Amounts are stored as SQLite integers; anything above `Amount::MAX` is refused on write.
impl ToSql for Amount {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let units = i64::try_from(self.to_units())
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        Ok(ToSqlOutput::from(units))
    }
}

pub(crate) fn parse_column<T>(idx: usize, value: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = PoolError>,
{
    value
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
