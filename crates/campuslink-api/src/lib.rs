pub mod auth;
pub mod bookings;
pub mod messages;
pub mod middleware;

/// Parse a timestamp column. Rows written by the handlers are RFC 3339;
/// SQLite column defaults come back as "YYYY-MM-DD HH:MM:SS" without a
/// timezone, so fall back to parsing that as naive UTC.
pub(crate) fn parse_db_timestamp(raw: &str, context: &str) -> chrono::DateTime<chrono::Utc> {
    raw.parse::<chrono::DateTime<chrono::Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::warn!("Corrupt timestamp '{}' on {}: {}", raw, context, e);
            chrono::DateTime::default()
        })
}
