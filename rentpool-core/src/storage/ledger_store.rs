use super::{parse_column, to_amount, to_datetime, Storage};
use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::model::{AdminConfig, RandomnessRequest};
use crate::types::{Address, Amount};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

const POOL_CONFIG_KEY: &str = "pool_config";

/// One outgoing value transfer recorded by the local treasury.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: String,
    pub recipient: Address,
    pub amount: Amount,
    pub memo: String,
    pub created_at: DateTime<Utc>,
}

/// Settings, whitelist, balances and the transfer journal.
pub struct LedgerStore<'a> {
    storage: &'a Storage,
}

impl<'a> LedgerStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    pub async fn save_pool_config(&self, config: &PoolConfig) -> Result<()> {
        let conn = self.storage.get_connection().await;
        let config_json = serde_json::to_string(config)?;

        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![POOL_CONFIG_KEY, config_json],
        )?;

        Ok(())
    }

    pub async fn load_pool_config(&self) -> Result<Option<PoolConfig>> {
        let conn = self.storage.get_connection().await;

        let config_json: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![POOL_CONFIG_KEY],
                |row| row.get(0),
            )
            .optional()?;

        config_json
            .map(|json| serde_json::from_str(&json).map_err(PoolError::from))
            .transpose()
    }

    pub async fn balance_of(&self, address: &Address) -> Result<Amount> {
        let conn = self.storage.get_connection().await;

        let balance = conn
            .query_row(
                "SELECT amount FROM balances WHERE address = ?1",
                params![address.as_str()],
                |row| to_amount(0, row.get(0)?),
            )
            .optional()?;

        Ok(balance.unwrap_or_default())
    }

    pub async fn record_transfer(
        &self,
        recipient: &Address,
        amount: Amount,
        memo: &str,
    ) -> Result<TransferRecord> {
        let conn = self.storage.get_connection().await;

        let record = TransferRecord {
            id: Uuid::new_v4().to_string(),
            recipient: recipient.clone(),
            amount,
            memo: memo.to_string(),
            created_at: Utc::now(),
        };

        conn.execute(
            "INSERT INTO transfers (id, recipient, amount, memo, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id,
                record.recipient.as_str(),
                record.amount,
                record.memo,
                record.created_at.timestamp(),
            ],
        )?;

        tracing::debug!("Journaled transfer {} of {} to {}", record.id, amount, recipient);
        Ok(record)
    }

    pub async fn list_transfers(&self, recipient: Option<&Address>) -> Result<Vec<TransferRecord>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(
            "SELECT id, recipient, amount, memo, created_at FROM transfers
             WHERE ?1 IS NULL OR recipient = ?1
             ORDER BY created_at DESC",
        )?;

        let transfer_iter = stmt.query_map(params![recipient.map(|r| r.as_str())], |row| {
            let recipient: String = row.get(1)?;
            Ok(TransferRecord {
                id: row.get(0)?,
                recipient: parse_column(1, &recipient)?,
                amount: to_amount(2, row.get(2)?)?,
                memo: row.get(3)?,
                created_at: to_datetime(4, row.get(4)?)?,
            })
        })?;

        let mut transfers = Vec::new();
        for transfer in transfer_iter {
            transfers.push(transfer?);
        }

        Ok(transfers)
    }
}

pub(crate) fn put_admin_config(
    conn: &Connection,
    admin: &AdminConfig,
    accrued_fees: Amount,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO admin_config
         (id, winner_count, protocol_fee_bps, rent_fee_bps, rent_amount, accrued_fees)
         VALUES (1, ?1, ?2, ?3, ?4, ?5)",
        params![
            admin.winner_count,
            admin.protocol_fee_bps,
            admin.rent_fee_bps,
            admin.rent_amount,
            accrued_fees,
        ],
    )?;

    Ok(())
}

pub(crate) fn read_admin_config(conn: &Connection) -> Result<Option<(AdminConfig, Amount)>> {
    let row = conn
        .query_row(
            "SELECT winner_count, protocol_fee_bps, rent_fee_bps, rent_amount, accrued_fees
             FROM admin_config WHERE id = 1",
            [],
            |row| {
                Ok((
                    AdminConfig {
                        winner_count: row.get(0)?,
                        protocol_fee_bps: row.get(1)?,
                        rent_fee_bps: row.get(2)?,
                        rent_amount: to_amount(3, row.get(3)?)?,
                    },
                    to_amount(4, row.get(4)?)?,
                ))
            },
        )
        .optional()?;

    Ok(row)
}

/// The whitelist is append-only; positions never move.
pub(crate) fn put_whitelist(conn: &Connection, members: &[Address]) -> Result<()> {
    let mut stmt =
        conn.prepare("INSERT OR IGNORE INTO whitelist (position, address) VALUES (?1, ?2)")?;

    for (position, address) in members.iter().enumerate() {
        stmt.execute(params![position as i64, address.as_str()])?;
    }

    Ok(())
}

pub(crate) fn read_whitelist(conn: &Connection) -> Result<Vec<Address>> {
    let mut stmt = conn.prepare("SELECT address FROM whitelist ORDER BY position ASC")?;
    let member_iter = stmt.query_map([], |row| {
        let address: String = row.get(0)?;
        parse_column::<Address>(0, &address)
    })?;

    let mut members = Vec::new();
    for member in member_iter {
        members.push(member?);
    }

    Ok(members)
}

pub(crate) fn put_balances(conn: &Connection, balances: &BTreeMap<Address, Amount>) -> Result<()> {
    conn.execute("DELETE FROM balances", [])?;

    let mut stmt = conn.prepare("INSERT INTO balances (address, amount) VALUES (?1, ?2)")?;
    for (address, amount) in balances.iter().filter(|(_, a)| !a.is_zero()) {
        stmt.execute(params![address.as_str(), amount])?;
    }

    Ok(())
}

pub(crate) fn read_balances(conn: &Connection) -> Result<BTreeMap<Address, Amount>> {
    let mut stmt = conn.prepare("SELECT address, amount FROM balances")?;
    let balance_iter = stmt.query_map([], |row| {
        let address: String = row.get(0)?;
        Ok((
            parse_column::<Address>(0, &address)?,
            to_amount(1, row.get(1)?)?,
        ))
    })?;

    let mut balances = BTreeMap::new();
    for entry in balance_iter {
        let (address, amount) = entry?;
        balances.insert(address, amount);
    }

    Ok(balances)
}

pub(crate) fn put_requests<'r>(
    conn: &Connection,
    requests: impl IntoIterator<Item = &'r RandomnessRequest>,
) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT OR REPLACE INTO randomness_requests
         (handle, round_id, count, requested_at, status)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;

    for request in requests {
        stmt.execute(params![
            request.handle.to_string(),
            request.round.0 as i64,
            request.count,
            request.requested_at.timestamp(),
            request.status.as_str(),
        ])?;
    }

    Ok(())
}

pub(crate) fn read_requests(conn: &Connection) -> Result<Vec<RandomnessRequest>> {
    let mut stmt = conn.prepare(
        "SELECT handle, round_id, count, requested_at, status
         FROM randomness_requests ORDER BY requested_at ASC",
    )?;

    let request_iter = stmt.query_map([], |row| {
        let handle: String = row.get(0)?;
        let status: String = row.get(4)?;
        Ok(RandomnessRequest {
            handle: parse_column(0, &handle)?,
            round: crate::types::RoundId(row.get::<_, i64>(1)? as u64),
            count: row.get(2)?,
            requested_at: to_datetime(3, row.get(3)?)?,
            status: parse_column(4, &status)?,
        })
    })?;

    let mut requests = Vec::new();
    for request in request_iter {
        requests.push(request?);
    }

    Ok(requests)
}
