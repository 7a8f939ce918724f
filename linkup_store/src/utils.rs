use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

pub const APP_NAME: &str = "linkup_store";

/// Fixed-width RFC 3339 so stored timestamps sort as text.
pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp '{raw}'"))
}

/// First eight characters of an id, for terminal output.
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
