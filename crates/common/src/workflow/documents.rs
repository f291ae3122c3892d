//! Document manager
//!
//! Blob bytes go to the `BlobStore` first; the metadata row and its history
//! entry commit together afterwards. A failed commit removes the blob again.

use crate::auth::Actor;
use crate::db::models::*;
use crate::db::{DbPool, Repository, UserSummary};
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::storage::{document_key, BlobStore};
use crate::workflow::clock::Clock;
use crate::workflow::history::{self, HistoryEntry};
use crate::workflow::policy;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// An incoming file
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub data: Vec<u8>,
    pub document_type: String,
}

/// Document metadata as returned to clients
#[derive(Debug, Clone, Serialize)]
pub struct DocumentView {
    #[serde(flatten)]
    pub document: Document,
    pub file_size_human: String,
    pub uploader: Option<UserSummary>,
}

impl DocumentView {
    pub fn new(uploader: Option<UserSummary>, document: Document) -> Self {
        Self {
            file_size_human: document.file_size_human(),
            uploader,
            document,
        }
    }
}

/// Lowercased extension of a file name, empty when there is none
fn file_type_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

async fn load_ticket<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<Ticket> {
    TicketEntity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| AppError::TicketNotFound { id: id.to_string() })
}

async fn load_document<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<Document> {
    DocumentEntity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| AppError::DocumentNotFound { id: id.to_string() })
}

#[derive(Clone)]
pub struct DocumentManager {
    db: DbPool,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    max_upload_bytes: usize,
}

impl DocumentManager {
    pub fn new(
        db: DbPool,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            db,
            blobs,
            clock,
            max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Attach a file to a ticket the actor can see
    pub async fn upload(&self, actor: &Actor, ticket_id: Uuid, upload: Upload) -> Result<DocumentView> {
        let ticket = load_ticket(self.db.read(), ticket_id).await?;
        policy::ensure_can_view(actor, &ticket)?;

        if upload.data.len() > self.max_upload_bytes {
            return Err(AppError::PayloadTooLarge {
                size: upload.data.len(),
                limit: self.max_upload_bytes,
            });
        }

        let document_type: DocumentType = upload
            .document_type
            .parse()
            .map_err(|e: String| AppError::invalid_field("document_type", e))?;

        let file_name = upload.file_name.trim().to_string();
        if file_name.is_empty() {
            return Err(AppError::invalid_field("file", "The file must have a name"));
        }
        if upload.data.is_empty() {
            return Err(AppError::invalid_field("file", "The file is empty"));
        }

        // Resolved before any write so a failed read leaves nothing stored
        let uploader = Repository::new(self.db.clone())
            .find_user_by_id(actor.id)
            .await?
            .map(|u| UserSummary::from(&u));

        let key = document_key(ticket_id, &file_name);
        self.blobs.put(&key, &upload.data).await?;

        let document = match self
            .record_upload(actor, &ticket, &key, &file_name, document_type, upload.data.len())
            .await
        {
            Ok(document) => document,
            Err(e) => {
                if let Err(cleanup) = self.blobs.delete(&key).await {
                    warn!(key = %key, error = %cleanup, "Failed to remove orphaned blob");
                }
                return Err(e);
            }
        };

        metrics::record_upload(document_type.as_str(), document.file_size as u64);
        info!(
            ticket_id = %ticket_id,
            document_id = %document.id,
            file_name = %document.file_name,
            size = document.file_size,
            "Document uploaded"
        );

        Ok(DocumentView::new(uploader, document))
    }

    async fn record_upload(
        &self,
        actor: &Actor,
        ticket: &Ticket,
        key: &str,
        file_name: &str,
        document_type: DocumentType,
        size: usize,
    ) -> Result<Document> {
        let now = self.clock.now();
        let txn = self.db.write().begin().await?;

        let document = DocumentActiveModel {
            id: Set(Uuid::new_v4()),
            ticket_id: Set(ticket.id),
            file_name: Set(file_name.to_string()),
            file_path: Set(key.to_string()),
            file_type: Set(file_type_of(file_name)),
            file_size: Set(size as i64),
            document_type: Set(document_type),
            uploaded_by: Set(actor.id),
            created_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;

        history::append(
            &txn,
            HistoryEntry::new(ticket.id, actor, HistoryAction::DocumentUploaded)
                .note(format!("Document uploaded: {}", file_name)),
            now,
        )
        .await?;

        txn.commit().await?;
        Ok(document)
    }

    /// Documents of a ticket, oldest first
    pub async fn list(&self, actor: &Actor, ticket_id: Uuid) -> Result<Vec<DocumentView>> {
        let conn = self.db.read();
        let ticket = load_ticket(conn, ticket_id).await?;
        policy::ensure_can_view(actor, &ticket)?;

        let documents = DocumentEntity::find()
            .filter(DocumentColumn::TicketId.eq(ticket_id))
            .order_by_asc(DocumentColumn::CreatedAt)
            .all(conn)
            .await?;

        let uploaders = Repository::new(self.db.clone())
            .user_summaries(documents.iter().map(|d| d.uploaded_by))
            .await?;

        Ok(documents
            .into_iter()
            .map(|d| DocumentView::new(uploaders.get(&d.uploaded_by).cloned(), d))
            .collect())
    }

    /// Metadata and bytes of one document
    pub async fn download(&self, actor: &Actor, document_id: Uuid) -> Result<(Document, Vec<u8>)> {
        let conn = self.db.read();
        let document = load_document(conn, document_id).await?;
        let ticket = load_ticket(conn, document.ticket_id).await?;
        policy::ensure_can_view(actor, &ticket)?;

        let data = self.blobs.get(&document.file_path).await?;

        Ok((document, data))
    }

    /// Remove a document row and its blob
    pub async fn delete(&self, actor: &Actor, document_id: Uuid) -> Result<()> {
        let now = self.clock.now();
        let txn = self.db.write().begin().await?;

        let document = load_document(&txn, document_id).await?;
        let ticket = load_ticket(&txn, document.ticket_id).await?;
        policy::ensure_can_delete_document(actor, &ticket, &document)?;

        DocumentEntity::delete_by_id(document.id).exec(&txn).await?;

        history::append(
            &txn,
            HistoryEntry::new(ticket.id, actor, HistoryAction::DocumentDeleted)
                .note(format!("Document deleted: {}", document.file_name)),
            now,
        )
        .await?;

        txn.commit().await?;

        match self.blobs.delete(&document.file_path).await {
            Ok(true) => {}
            Ok(false) => warn!(key = %document.file_path, "Document blob was already missing"),
            Err(e) => warn!(key = %document.file_path, error = %e, "Failed to remove document blob"),
        }

        info!(ticket_id = %ticket.id, document_id = %document_id, "Document deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewUser;
    use crate::storage::MemoryBlobStore;
    use crate::workflow::clock::SystemClock;

    struct Fixture {
        manager: DocumentManager,
        db: DbPool,
        blobs: Arc<MemoryBlobStore>,
        ticket: Ticket,
        student: Actor,
        lecturer: Actor,
        admin: Actor,
    }

    async fn user(repo: &Repository, name: &str, role: UserRole) -> Actor {
        let user = repo
            .create_user(NewUser {
                name: name.to_string(),
                email: format!("{}@example.com", name.to_lowercase()),
                nim_nip: format!("ID-{}", name.to_uppercase()),
                role,
                phone: None,
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap();
        Actor::from(&user)
    }

    async fn fixture(max_upload_bytes: usize) -> Fixture {
        let db = DbPool::in_memory().await.unwrap();
        let repo = Repository::new(db.clone());
        let student = user(&repo, "Andi", UserRole::Student).await;
        let lecturer = user(&repo, "Budi", UserRole::Lecturer).await;
        let admin = user(&repo, "Admin", UserRole::Admin).await;

        let now = chrono::Utc::now();
        let ticket = TicketActiveModel {
            id: Set(Uuid::new_v4()),
            ticket_number: Set("TKT-20250314-0001".into()),
            student_id: Set(student.id),
            lecturer_id: Set(Some(lecturer.id)),
            title: Set("Ijin penelitian".into()),
            description: Set("Penelitian tugas akhir".into()),
            category: Set(TicketCategory::Ijin),
            status: Set(TicketStatus::Pending),
            priority: Set(TicketPriority::Medium),
            admin_notes: Set(None),
            lecturer_notes: Set(None),
            rejection_reason: Set(None),
            nomor_surat: Set(None),
            submitted_at: Set(now.into()),
            reviewed_at: Set(None),
            approved_at: Set(None),
            completed_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(db.write())
        .await
        .unwrap();

        let blobs = Arc::new(MemoryBlobStore::new());
        Fixture {
            manager: DocumentManager::new(
                db.clone(),
                blobs.clone(),
                Arc::new(SystemClock),
                max_upload_bytes,
            ),
            db,
            blobs,
            ticket,
            student,
            lecturer,
            admin,
        }
    }

    fn pdf(name: &str) -> Upload {
        Upload {
            file_name: name.to_string(),
            data: b"%PDF-1.4 test".to_vec(),
            document_type: "attachment".to_string(),
        }
    }

    #[test]
    fn test_file_type_of() {
        assert_eq!(file_type_of("KTM.PDF"), "pdf");
        assert_eq!(file_type_of("archive.tar.gz"), "gz");
        assert_eq!(file_type_of("README"), "");
    }

    #[tokio::test]
    async fn test_upload_list_download_delete() {
        let f = fixture(1024).await;

        let view = f
            .manager
            .upload(&f.student, f.ticket.id, pdf("KTM Scan.pdf"))
            .await
            .unwrap();
        assert_eq!(view.document.file_type, "pdf");
        assert_eq!(view.document.document_type, DocumentType::Attachment);
        assert_eq!(view.uploader.as_ref().map(|u| u.id), Some(f.student.id));
        assert!(view
            .document
            .file_path
            .starts_with(&format!("documents/{}/", f.ticket.id)));
        assert_eq!(f.blobs.len().await, 1);

        let listed = f.manager.list(&f.admin, f.ticket.id).await.unwrap();
        assert_eq!(listed.len(), 1);

        let (doc, bytes) = f
            .manager
            .download(&f.student, view.document.id)
            .await
            .unwrap();
        assert_eq!(doc.file_name, "KTM Scan.pdf");
        assert_eq!(bytes, b"%PDF-1.4 test");

        f.manager
            .delete(&f.student, view.document.id)
            .await
            .unwrap();
        assert!(f.blobs.is_empty().await);
        assert!(f.manager.list(&f.student, f.ticket.id).await.unwrap().is_empty());

        let entries = history::for_ticket(f.db.read(), f.ticket.id).await.unwrap();
        let actions: Vec<HistoryAction> = entries.iter().map(|h| h.action).collect();
        assert_eq!(
            actions,
            vec![HistoryAction::DocumentUploaded, HistoryAction::DocumentDeleted]
        );
        // Document events are not status changes
        assert!(entries
            .iter()
            .all(|h| h.old_status.is_none() && h.new_status.is_none()));
    }

    #[tokio::test]
    async fn test_failed_uploader_read_stores_nothing() {
        let f = fixture(1024).await;

        // Replica that still serves the ticket but has lost its users table
        let replica = DbPool::in_memory().await.unwrap().primary;
        replica
            .execute_unprepared("PRAGMA foreign_keys = OFF")
            .await
            .unwrap();
        TicketActiveModel::from(f.ticket.clone())
            .reset_all()
            .insert(&replica)
            .await
            .unwrap();
        replica.execute_unprepared("DROP TABLE users").await.unwrap();

        let pool = DbPool {
            primary: f.db.primary.clone(),
            replica: Some(replica),
        };
        let manager = DocumentManager::new(pool, f.blobs.clone(), Arc::new(SystemClock), 1024);

        assert!(manager
            .upload(&f.student, f.ticket.id, pdf("a.pdf"))
            .await
            .is_err());
        assert!(f.blobs.is_empty().await);
        assert!(DocumentEntity::find()
            .all(f.db.write())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_upload_limits() {
        let f = fixture(8).await;

        let err = f
            .manager
            .upload(&f.student, f.ticket.id, pdf("big.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge { .. }));

        let mut bad_type = pdf("a.pdf");
        bad_type.data = b"ok".to_vec();
        bad_type.document_type = "invoice".into();
        let err = f
            .manager
            .upload(&f.student, f.ticket.id, bad_type)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));

        let mut empty = pdf("a.pdf");
        empty.data = Vec::new();
        assert!(f.manager.upload(&f.student, f.ticket.id, empty).await.is_err());

        assert!(f.blobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_lecturer_cannot_see_pending_documents() {
        let f = fixture(1024).await;

        let err = f
            .manager
            .upload(&f.lecturer, f.ticket.id, pdf("a.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));

        let err = f.manager.list(&f.lecturer, f.ticket.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_only_uploader_or_admin_deletes() {
        let f = fixture(1024).await;
        let view = f
            .manager
            .upload(&f.admin, f.ticket.id, pdf("surat.pdf"))
            .await
            .unwrap();

        let err = f
            .manager
            .delete(&f.student, view.document.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));

        let err = f
            .manager
            .delete(&f.admin, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DocumentNotFound { .. }));

        f.manager
            .delete(&f.admin, view.document.id)
            .await
            .unwrap();
    }
}
