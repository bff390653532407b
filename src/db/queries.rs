use std::collections::HashSet;

use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{Role, Session};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, TS_FORMAT).unwrap_or_else(|_| Utc::now().naive_utc())
}

// ── Sessions ──

pub fn create_session(conn: &Connection, session: &Session) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO sessions (id, user_id, user_name, role, access_token, refresh_token, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            session.id,
            session.user_id,
            session.user_name,
            session.role.as_str(),
            session.access_token,
            session.refresh_token,
            format_ts(&session.created_at),
            format_ts(&session.expires_at),
        ],
    )?;
    Ok(())
}

/// Returns the session if it exists and has not expired.
pub fn get_session(conn: &Connection, id: &str) -> anyhow::Result<Option<Session>> {
    let now = format_ts(&Utc::now().naive_utc());
    let session = conn
        .query_row(
            "SELECT id, user_id, user_name, role, access_token, refresh_token, created_at, expires_at
             FROM sessions WHERE id = ?1 AND expires_at > ?2",
            params![id, now],
            |row| {
                let role: String = row.get(3)?;
                let created_at: String = row.get(6)?;
                let expires_at: String = row.get(7)?;
                Ok(Session {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    user_name: row.get(2)?,
                    role: Role::parse(&role),
                    access_token: row.get(4)?,
                    refresh_token: row.get(5)?,
                    created_at: parse_ts(&created_at),
                    expires_at: parse_ts(&expires_at),
                })
            },
        )
        .optional()?;
    Ok(session)
}

pub fn update_session_tokens(
    conn: &Connection,
    id: &str,
    access_token: &str,
    refresh_token: Option<&str>,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE sessions SET access_token = ?1, refresh_token = COALESCE(?2, refresh_token) WHERE id = ?3",
        params![access_token, refresh_token, id],
    )?;
    Ok(count > 0)
}

/// Drops stored credentials but keeps the row, so the caller can still
/// tell an expired login apart from an unknown session.
pub fn clear_session_tokens(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE sessions SET access_token = NULL, refresh_token = NULL WHERE id = ?1",
        params![id],
    )?;
    Ok(count > 0)
}

pub fn delete_session(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

pub fn expire_old_sessions(conn: &Connection) -> anyhow::Result<usize> {
    let now = format_ts(&Utc::now().naive_utc());
    let count = conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", params![now])?;
    Ok(count)
}

pub fn session_ids(conn: &Connection) -> anyhow::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT id FROM sessions")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<HashSet<String>, _>>()?;
    Ok(ids)
}

// ── Quoted totals ──

pub fn record_quoted_total(
    conn: &Connection,
    booking_id: &str,
    session_id: &str,
    total_payable: f64,
) -> anyhow::Result<()> {
    let now = format_ts(&Utc::now().naive_utc());
    conn.execute(
        "INSERT INTO quoted_totals (booking_id, session_id, total_payable, recorded_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(booking_id) DO UPDATE SET
           session_id = excluded.session_id,
           total_payable = excluded.total_payable,
           recorded_at = excluded.recorded_at",
        params![booking_id, session_id, total_payable, now],
    )?;
    Ok(())
}

pub fn get_quoted_total(conn: &Connection, booking_id: &str) -> anyhow::Result<Option<f64>> {
    let total = conn
        .query_row(
            "SELECT total_payable FROM quoted_totals WHERE booking_id = ?1",
            params![booking_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(total)
}
