//! Document entity: a file attached to a ticket

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// Supporting material supplied with the request
    #[sea_orm(string_value = "attachment")]
    Attachment,

    /// The signed letter itself
    #[sea_orm(string_value = "signed_document")]
    SignedDocument,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Attachment => "attachment",
            DocumentType::SignedDocument => "signed_document",
        }
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attachment" => Ok(DocumentType::Attachment),
            "signed_document" => Ok(DocumentType::SignedDocument),
            other => Err(format!(
                "document_type must be one of attachment, signed_document (got '{}')",
                other
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "documents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub ticket_id: Uuid,

    /// Original client-side file name
    #[sea_orm(column_type = "Text")]
    pub file_name: String,

    /// Key inside the blob store
    #[sea_orm(column_type = "Text")]
    pub file_path: String,

    /// Lower-cased extension, empty when the name has none
    #[sea_orm(column_type = "Text")]
    pub file_type: String,

    pub file_size: i64,

    pub document_type: DocumentType,

    pub uploaded_by: Uuid,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    /// File size in human readable format
    pub fn file_size_human(&self) -> String {
        let units = ["B", "KB", "MB", "GB"];
        let mut size = self.file_size as f64;
        let mut unit = 0;
        while size > 1024.0 && unit < units.len() - 1 {
            size /= 1024.0;
            unit += 1;
        }
        format!("{} {}", (size * 100.0).round() / 100.0, units[unit])
    }
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
        from = "Column::UploadedBy",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    Uploader,
}

impl Related<super::ticket::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Ticket.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Uploader.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
