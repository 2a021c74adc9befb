use super::{parse_column, to_datetime, Storage};
use crate::error::Result;
use crate::model::Ticket;
use crate::types::{Address, TicketId};
use rusqlite::{params, Connection, OptionalExtension};

pub struct TicketStore<'a> {
    storage: &'a Storage,
}

impl<'a> TicketStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    pub async fn load_ticket(&self, id: TicketId) -> Result<Option<Ticket>> {
        let conn = self.storage.get_connection().await;

        let ticket = conn
            .query_row(
                "SELECT id, owner, created_at FROM tickets WHERE id = ?1",
                params![id.0 as i64],
                row_to_ticket,
            )
            .optional()?;

        Ok(ticket)
    }

    pub async fn find_by_owner(&self, owner: &Address) -> Result<Option<Ticket>> {
        let conn = self.storage.get_connection().await;

        let ticket = conn
            .query_row(
                "SELECT id, owner, created_at FROM tickets WHERE owner = ?1",
                params![owner.as_str()],
                row_to_ticket,
            )
            .optional()?;

        Ok(ticket)
    }

    pub async fn holder_count(&self) -> Result<u64> {
        let conn = self.storage.get_connection().await;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tickets", [], |row| row.get(0))?;

        Ok(count as u64)
    }
}

/// Tickets are immutable once allocated, so existing rows are left alone.
pub(crate) fn put_tickets(conn: &Connection, tickets: &[Ticket]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO tickets (id, owner, created_at) VALUES (?1, ?2, ?3)",
    )?;

    for ticket in tickets {
        stmt.execute(params![
            ticket.id.0 as i64,
            ticket.owner.as_str(),
            ticket.created_at.timestamp(),
        ])?;
    }

    Ok(())
}

pub(crate) fn read_tickets(conn: &Connection) -> Result<Vec<Ticket>> {
    let mut stmt = conn.prepare("SELECT id, owner, created_at FROM tickets ORDER BY id ASC")?;
    let ticket_iter = stmt.query_map([], row_to_ticket)?;

    let mut tickets = Vec::new();
    for ticket in ticket_iter {
        tickets.push(ticket?);
    }

    Ok(tickets)
}

fn row_to_ticket(row: &rusqlite::Row<'_>) -> rusqlite::Result<Ticket> {
    let owner: String = row.get(1)?;

    Ok(Ticket {
        id: TicketId(row.get::<_, i64>(0)? as u64),
        owner: parse_column(1, &owner)?,
        created_at: to_datetime(2, row.get(2)?)?,
    })
}
