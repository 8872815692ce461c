/// Database row types — these map directly to SQLite rows.
/// Distinct from campuslink-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

pub struct SessionRow {
    pub id: String,
    pub skill_name: String,
    pub provider_id: String,
    pub requester_id: String,
    pub scheduled_at: String,
    pub status: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub session_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub content: String,
    pub created_at: String,
}
