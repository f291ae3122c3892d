//! Ticket numbers: `TKT-YYYYMMDD-NNNN`, NNNN counting up within a day

use crate::db::models::{TicketColumn, TicketEntity};
use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect};

/// Day prefix, e.g. `TKT-20250314-`
pub fn day_prefix(now: DateTime<Utc>) -> String {
    format!("TKT-{}-", now.format("%Y%m%d"))
}

/// Highest sequence that still fits the four-digit field
const MAX_DAILY_SEQUENCE: u32 = 9999;

/// Trailing sequence of a number carrying `prefix`
fn sequence_of(number: &str, prefix: &str) -> Option<u32> {
    number.strip_prefix(prefix)?.parse().ok()
}

/// Next free number for the day of `now`: highest same-day sequence + 1
pub async fn next_ticket_number<C: ConnectionTrait>(conn: &C, now: DateTime<Utc>) -> Result<String> {
    let prefix = day_prefix(now);

    let today: Vec<String> = TicketEntity::find()
        .select_only()
        .column(TicketColumn::TicketNumber)
        .filter(TicketColumn::TicketNumber.starts_with(&prefix))
        .into_tuple()
        .all(conn)
        .await?;

    let last = today.iter().filter_map(|n| sequence_of(n, &prefix)).max();
    format_number(&prefix, last)
}

fn format_number(prefix: &str, last: Option<u32>) -> Result<String> {
    let next = last.map_or(1, |last| last.saturating_add(1));
    if next > MAX_DAILY_SEQUENCE {
        return Err(AppError::Conflict {
            message: format!("Daily ticket numbers for {} are exhausted", prefix.trim_end_matches('-')),
        });
    }

    Ok(format!("{}{:04}", prefix, next))
}
