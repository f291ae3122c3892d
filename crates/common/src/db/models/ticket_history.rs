//! Append-only audit trail of ticket events

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event tag recorded for every state-changing ticket operation
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    #[sea_orm(string_value = "created")]
    Created,

    #[sea_orm(string_value = "updated")]
    Updated,

    #[sea_orm(string_value = "revised")]
    Revised,

    #[sea_orm(string_value = "sent_to_lecturer")]
    SentToLecturer,

    #[sea_orm(string_value = "reviewed")]
    Reviewed,

    #[sea_orm(string_value = "approved")]
    Approved,

    #[sea_orm(string_value = "rejected")]
    Rejected,

    #[sea_orm(string_value = "rejected_by_admin")]
    RejectedByAdmin,

    #[sea_orm(string_value = "completed")]
    Completed,

    #[sea_orm(string_value = "document_uploaded")]
    DocumentUploaded,

    #[sea_orm(string_value = "document_deleted")]
    DocumentDeleted,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Created => "created",
            HistoryAction::Updated => "updated",
            HistoryAction::Revised => "revised",
            HistoryAction::SentToLecturer => "sent_to_lecturer",
            HistoryAction::Reviewed => "reviewed",
            HistoryAction::Approved => "approved",
            HistoryAction::Rejected => "rejected",
            HistoryAction::RejectedByAdmin => "rejected_by_admin",
            HistoryAction::Completed => "completed",
            HistoryAction::DocumentUploaded => "document_uploaded",
            HistoryAction::DocumentDeleted => "document_deleted",
        }
    }
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ticket_histories")]
pub struct Model {
    /// UUIDv7, so id order follows insertion order
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub ticket_id: Uuid,

    pub user_id: Uuid,

    pub action: HistoryAction,

    #[sea_orm(column_type = "Text", nullable)]
    pub old_status: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub new_status: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::ticket::Entity",
        from = "Column::TicketId",
        to = "super::ticket::Column::Id",
        on_delete = "Cascade"
    )]
    Ticket,

    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::ticket::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Ticket.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
