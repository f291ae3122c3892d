//! Ticket entity: one correspondence request moving through the review workflow

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Workflow status
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[sea_orm(string_value = "pending")]
    Pending,

    #[sea_orm(string_value = "in_review")]
    InReview,

    #[sea_orm(string_value = "approved")]
    Approved,

    #[sea_orm(string_value = "rejected")]
    Rejected,

    #[sea_orm(string_value = "completed")]
    Completed,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 5] = [
        TicketStatus::Pending,
        TicketStatus::InReview,
        TicketStatus::Approved,
        TicketStatus::Rejected,
        TicketStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Pending => "pending",
            TicketStatus::InReview => "in_review",
            TicketStatus::Approved => "approved",
            TicketStatus::Rejected => "rejected",
            TicketStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of letter being requested
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum TicketCategory {
    #[sea_orm(string_value = "surat_keterangan")]
    SuratKeterangan,

    #[sea_orm(string_value = "surat_rekomendasi")]
    SuratRekomendasi,

    #[sea_orm(string_value = "ijin")]
    Ijin,

    #[sea_orm(string_value = "lainnya")]
    Lainnya,
}

impl TicketCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketCategory::SuratKeterangan => "surat_keterangan",
            TicketCategory::SuratRekomendasi => "surat_rekomendasi",
            TicketCategory::Ijin => "ijin",
            TicketCategory::Lainnya => "lainnya",
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    #[sea_orm(string_value = "low")]
    Low,

    #[default]
    #[sea_orm(string_value = "medium")]
    Medium,

    #[sea_orm(string_value = "high")]
    High,
}

impl TicketPriority {
    pub const ALL: [TicketPriority; 3] = [TicketPriority::Low, TicketPriority::Medium, TicketPriority::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketPriority::Low => "low",
            TicketPriority::Medium => "medium",
            TicketPriority::High => "high",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tickets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// TKT-YYYYMMDD-NNNN
    #[sea_orm(column_type = "Text", unique)]
    pub ticket_number: String,

    pub student_id: Uuid,

    pub lecturer_id: Option<Uuid>,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub description: String,

    pub category: TicketCategory,

    pub status: TicketStatus,

    pub priority: TicketPriority,

    #[sea_orm(column_type = "Text", nullable)]
    pub admin_notes: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub lecturer_notes: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub rejection_reason: Option<String>,

    /// Letter number, assigned once on approval
    #[sea_orm(column_type = "Text", nullable, unique)]
    pub nomor_surat: Option<String>,

    pub submitted_at: DateTimeWithTimeZone,

    pub reviewed_at: Option<DateTimeWithTimeZone>,

    pub approved_at: Option<DateTimeWithTimeZone>,

    pub completed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.student_id == user_id
    }

    pub fn is_assigned_to(&self, user_id: Uuid) -> bool {
        self.lecturer_id == Some(user_id)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::StudentId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    Student,

    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::LecturerId",
        to = "super::user::Column::Id",
        on_delete = "SetNull"
    )]
    Lecturer,

    #[sea_orm(has_many = "super::document::Entity")]
    Documents,

    #[sea_orm(has_many = "super::ticket_history::Entity")]
    Histories,
}

impl Related<super::document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Documents.def()
    }
}

impl Related<super::ticket_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Histories.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
