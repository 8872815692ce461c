use crate::Database;
use crate::models::{MessageRow, SessionRow, UserRow};
use anyhow::{Result, anyhow};
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    pub fn get_username_by_id(&self, id: &str) -> Result<String> {
        self.with_conn(|conn| {
            conn.query_row("SELECT username FROM users WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .map_err(|_| anyhow!("User not found: {}", id))
        })
    }

    // -- Sessions --

    pub fn create_session(
        &self,
        id: &str,
        skill_name: &str,
        provider_id: &str,
        requester_id: &str,
        scheduled_at: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, skill_name, provider_id, requester_id, scheduled_at, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
                (id, skill_name, provider_id, requester_id, scheduled_at, created_at),
            )?;
            Ok(())
        })
    }

    pub fn get_session(&self, id: &str) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, skill_name, provider_id, requester_id, scheduled_at, status, created_at
                 FROM sessions WHERE id = ?1",
            )?;

            let row = stmt.query_row([id], map_session_row).optional()?;
            Ok(row)
        })
    }

    pub fn update_session_status(&self, id: &str, status: &str) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE sessions SET status = ?2 WHERE id = ?1",
                (id, status),
            )?;
            if updated == 0 {
                return Err(anyhow!("Session not found: {}", id));
            }
            Ok(())
        })
    }

    /// All sessions where the user is provider or requester, newest first.
    pub fn sessions_for_user(&self, user_id: &str) -> Result<Vec<SessionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, skill_name, provider_id, requester_id, scheduled_at, status, created_at
                 FROM sessions
                 WHERE provider_id = ?1 OR requester_id = ?1
                 ORDER BY created_at DESC",
            )?;

            let rows = stmt
                .query_map([user_id], map_session_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        session_id: &str,
        sender_id: &str,
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, session_id, sender_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, session_id, sender_id, content, created_at),
            )?;
            Ok(())
        })
    }

    /// Persisted history for a session, oldest first.
    pub fn get_messages(&self, session_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, session_id))
    }
}

fn map_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        skill_name: row.get(1)?,
        provider_id: row.get(2)?,
        requester_id: row.get(3)?,
        scheduled_at: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare("SELECT id, username, password, created_at FROM users WHERE username = ?1")?;

    let row = stmt
        .query_row([username], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_messages(conn: &Connection, session_id: &str) -> Result<Vec<MessageRow>> {
    // JOIN users to fetch sender_username in a single query (eliminates N+1)
    let mut stmt = conn.prepare(
        "SELECT m.id, m.session_id, m.sender_id, u.username, m.content, m.created_at
         FROM messages m
         LEFT JOIN users u ON m.sender_id = u.id
         WHERE m.session_id = ?1
         ORDER BY m.created_at ASC",
    )?;

    let rows = stmt
        .query_map([session_id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                session_id: row.get(1)?,
                sender_id: row.get(2)?,
                sender_username: row
                    .get::<_, Option<String>>(3)?
                    .unwrap_or_else(|| "unknown".to_string()),
                content: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
