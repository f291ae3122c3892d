//! History ledger: one append-only row per ticket event

use crate::auth::Actor;
use crate::db::models::{
    HistoryAction, TicketHistory, TicketHistoryActiveModel, TicketHistoryColumn,
    TicketHistoryEntity, TicketStatus,
};
use crate::errors::Result;
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use uuid::Uuid;

/// A history row about to be written
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub ticket_id: Uuid,
    pub user_id: Uuid,
    pub action: HistoryAction,
    pub old_status: Option<TicketStatus>,
    pub new_status: Option<TicketStatus>,
    pub notes: Option<String>,
}

impl HistoryEntry {
    pub fn new(ticket_id: Uuid, actor: &Actor, action: HistoryAction) -> Self {
        Self {
            ticket_id,
            user_id: actor.id,
            action,
            old_status: None,
            new_status: None,
            notes: None,
        }
    }

    pub fn statuses(mut self, old: Option<TicketStatus>, new: Option<TicketStatus>) -> Self {
        self.old_status = old;
        self.new_status = new;
        self
    }

    pub fn note(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Insert a history row; call inside the transaction of the event it records
pub async fn append<C: ConnectionTrait>(conn: &C, entry: HistoryEntry, at: DateTime<Utc>) -> Result<TicketHistory> {
    let row = TicketHistoryActiveModel {
        id: Set(Uuid::now_v7()),
        ticket_id: Set(entry.ticket_id),
        user_id: Set(entry.user_id),
        action: Set(entry.action),
        old_status: Set(entry.old_status.map(|s| s.to_string())),
        new_status: Set(entry.new_status.map(|s| s.to_string())),
        notes: Set(entry.notes),
        created_at: Set(at.into()),
    };

    row.insert(conn).await.map_err(Into::into)
}

/// Entries of a ticket in the order they happened
pub async fn for_ticket<C: ConnectionTrait>(conn: &C, ticket_id: Uuid) -> Result<Vec<TicketHistory>> {
    TicketHistoryEntity::find()
        .filter(TicketHistoryColumn::TicketId.eq(ticket_id))
        .order_by_asc(TicketHistoryColumn::CreatedAt)
        .order_by_asc(TicketHistoryColumn::Id)
        .all(conn)
        .await
        .map_err(Into::into)
}
