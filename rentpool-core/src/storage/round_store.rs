use super::{parse_column, to_amount, to_datetime, Storage};
use crate::error::Result;
use crate::model::{Deposit, Round, Settlement};
use crate::types::{Address, RoundId, TicketId};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;

pub struct RoundStore<'a> {
    storage: &'a Storage,
}

impl<'a> RoundStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    pub async fn load_round(&self, id: RoundId) -> Result<Option<Round>> {
        let conn = self.storage.get_connection().await;
        let round = read_round_row(&conn, id)?;

        match round {
            Some(mut round) => {
                read_round_children(&conn, &mut round)?;
                Ok(Some(round))
            }
            None => Ok(None),
        }
    }

    pub async fn list_rounds(&self) -> Result<Vec<Round>> {
        let conn = self.storage.get_connection().await;
        read_rounds(&conn)
    }
}

/// Rewrite one round and everything hanging off it.
pub(crate) fn put_round(conn: &Connection, round: &Round) -> Result<()> {
    let winners_json = serde_json::to_string(&round.winners)?;
    let round_id = round.id.0 as i64;

    conn.execute(
        "INSERT OR REPLACE INTO rounds
         (id, state, opened_at, break_requested_at, broken_at, closed_at, winner_count,
          protocol_fee_bps, rent_fee_bps, request_handle, winners, pot_share, protocol_fee)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            round_id,
            round.state.as_str(),
            round.opened_at.timestamp(),
            round.break_requested_at.map(|t| t.timestamp()),
            round.broken_at.map(|t| t.timestamp()),
            round.closed_at.map(|t| t.timestamp()),
            round.winner_count,
            round.protocol_fee_bps,
            round.rent_fee_bps,
            round.request.map(|h| h.to_string()),
            winners_json,
            round.pot_share,
            round.protocol_fee,
        ],
    )?;

    // Children are small; replace them wholesale
    conn.execute(
        "DELETE FROM round_deposits WHERE round_id = ?1",
        params![round_id],
    )?;
    for (position, deposit) in round.deposits.iter().enumerate() {
        conn.execute(
            "INSERT INTO round_deposits
             (round_id, position, ticket_id, depositor, relation, amount, deposited_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                round_id,
                position as i64,
                deposit.ticket.0 as i64,
                deposit.depositor.as_str(),
                deposit.relation.as_str(),
                deposit.amount,
                deposit.deposited_at.timestamp(),
            ],
        )?;
    }

    conn.execute("DELETE FROM rentals WHERE round_id = ?1", params![round_id])?;
    for (ticket, renter) in &round.rentals {
        conn.execute(
            "INSERT INTO rentals (round_id, ticket_id, renter) VALUES (?1, ?2, ?3)",
            params![round_id, ticket.0 as i64, renter.as_str()],
        )?;
    }

    conn.execute(
        "DELETE FROM settlements WHERE round_id = ?1",
        params![round_id],
    )?;
    for settlement in round.settlements.values() {
        conn.execute(
            "INSERT INTO settlements
             (round_id, ticket_id, kind, beneficiary, paid, owner_credit, settled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                round_id,
                settlement.ticket.0 as i64,
                settlement.kind.as_str(),
                settlement.beneficiary.as_str(),
                settlement.paid,
                settlement.owner_credit,
                settlement.settled_at.timestamp(),
            ],
        )?;
    }

    conn.execute(
        "DELETE FROM withdrawals WHERE round_id = ?1",
        params![round_id],
    )?;
    for (address, amount) in &round.withdrawals {
        conn.execute(
            "INSERT INTO withdrawals (round_id, address, amount) VALUES (?1, ?2, ?3)",
            params![round_id, address.as_str(), amount],
        )?;
    }

    Ok(())
}

pub(crate) fn read_rounds(conn: &Connection) -> Result<Vec<Round>> {
    let ids: Vec<i64> = {
        let mut stmt = conn.prepare("SELECT id FROM rounds ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    let mut rounds = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(mut round) = read_round_row(conn, RoundId(id as u64))? {
            read_round_children(conn, &mut round)?;
            rounds.push(round);
        }
    }

    Ok(rounds)
}

fn read_round_row(conn: &Connection, id: RoundId) -> Result<Option<Round>> {
    let round = conn
        .query_row(
            "SELECT id, state, opened_at, break_requested_at, broken_at, closed_at, winner_count,
                    protocol_fee_bps, rent_fee_bps, request_handle, winners, pot_share, protocol_fee
             FROM rounds WHERE id = ?1",
            params![id.0 as i64],
            |row| {
                let state: String = row.get(1)?;
                let break_requested_at: Option<i64> = row.get(3)?;
                let broken_at: Option<i64> = row.get(4)?;
                let closed_at: Option<i64> = row.get(5)?;
                let request: Option<String> = row.get(9)?;
                let winners_json: String = row.get(10)?;

                let winners: Vec<TicketId> = serde_json::from_str(&winners_json).map_err(|_| {
                    rusqlite::Error::InvalidColumnType(
                        10,
                        "winners".to_string(),
                        rusqlite::types::Type::Text,
                    )
                })?;

                Ok(Round {
                    id: RoundId(row.get::<_, i64>(0)? as u64),
                    state: parse_column(1, &state)?,
                    opened_at: to_datetime(2, row.get(2)?)?,
                    break_requested_at: break_requested_at
                        .map(|ts| to_datetime(3, ts))
                        .transpose()?,
                    broken_at: broken_at.map(|ts| to_datetime(4, ts)).transpose()?,
                    closed_at: closed_at.map(|ts| to_datetime(5, ts)).transpose()?,
                    winner_count: row.get(6)?,
                    protocol_fee_bps: row.get(7)?,
                    rent_fee_bps: row.get(8)?,
                    deposits: Vec::new(),
                    rentals: BTreeMap::new(),
                    request: request.map(|h| parse_column(9, &h)).transpose()?,
                    winners,
                    pot_share: to_amount(11, row.get(11)?)?,
                    protocol_fee: to_amount(12, row.get(12)?)?,
                    settlements: BTreeMap::new(),
                    withdrawals: BTreeMap::new(),
                })
            },
        )
        .optional()?;

    Ok(round)
}

fn read_round_children(conn: &Connection, round: &mut Round) -> Result<()> {
    let round_id = round.id.0 as i64;

    let mut stmt = conn.prepare(
        "SELECT ticket_id, depositor, relation, amount, deposited_at
         FROM round_deposits WHERE round_id = ?1 ORDER BY position ASC",
    )?;
    let deposits = stmt.query_map(params![round_id], |row| {
        let depositor: String = row.get(1)?;
        let relation: String = row.get(2)?;
        Ok(Deposit {
            ticket: TicketId(row.get::<_, i64>(0)? as u64),
            depositor: parse_column(1, &depositor)?,
            relation: parse_column(2, &relation)?,
            amount: to_amount(3, row.get(3)?)?,
            deposited_at: to_datetime(4, row.get(4)?)?,
        })
    })?;
    for deposit in deposits {
        round.deposits.push(deposit?);
    }

    let mut stmt = conn.prepare("SELECT ticket_id, renter FROM rentals WHERE round_id = ?1")?;
    let rentals = stmt.query_map(params![round_id], |row| {
        let renter: String = row.get(1)?;
        Ok((
            TicketId(row.get::<_, i64>(0)? as u64),
            parse_column::<Address>(1, &renter)?,
        ))
    })?;
    for rental in rentals {
        let (ticket, renter) = rental?;
        round.rentals.insert(ticket, renter);
    }

    let mut stmt = conn.prepare(
        "SELECT ticket_id, kind, beneficiary, paid, owner_credit, settled_at
         FROM settlements WHERE round_id = ?1",
    )?;
    let settlements = stmt.query_map(params![round_id], |row| {
        let kind: String = row.get(1)?;
        let beneficiary: String = row.get(2)?;
        Ok(Settlement {
            ticket: TicketId(row.get::<_, i64>(0)? as u64),
            kind: parse_column(1, &kind)?,
            beneficiary: parse_column(2, &beneficiary)?,
            paid: to_amount(3, row.get(3)?)?,
            owner_credit: to_amount(4, row.get(4)?)?,
            settled_at: to_datetime(5, row.get(5)?)?,
        })
    })?;
    for settlement in settlements {
        let settlement = settlement?;
        round.settlements.insert(settlement.ticket, settlement);
    }

    let mut stmt =
        conn.prepare("SELECT address, amount FROM withdrawals WHERE round_id = ?1")?;
    let withdrawals = stmt.query_map(params![round_id], |row| {
        let address: String = row.get(0)?;
        Ok((
            parse_column::<Address>(0, &address)?,
            to_amount(1, row.get(1)?)?,
        ))
    })?;
    for withdrawal in withdrawals {
        let (address, amount) = withdrawal?;
        round.withdrawals.insert(address, amount);
    }

    Ok(())
}
