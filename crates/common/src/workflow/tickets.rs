//! Ticket state machine
//!
//! Every operation loads the ticket inside a transaction, asks the policy
//! for the target status, applies the effect, appends one history entry
//! and commits. A failure anywhere rolls the whole operation back.

use crate::auth::Actor;
use crate::db::models::*;
use crate::db::{
    DbPool, Page, Repository, TicketFilter, TicketStatistics, TicketSummary, UserSummary,
};
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::storage::BlobStore;
use crate::workflow::clock::Clock;
use crate::workflow::documents::DocumentView;
use crate::workflow::history::{self, HistoryEntry};
use crate::workflow::letter_number::{LetterNumberGenerator, TicketLetterStore};
use crate::workflow::policy::{self, TicketAction};
use crate::workflow::ticket_number;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set, SqlErr, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Longest accepted title
pub const MAX_TITLE_LEN: usize = 255;

/// Fields of a new ticket
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub title: String,
    pub description: String,
    pub category: TicketCategory,
    pub priority: Option<TicketPriority>,
    pub lecturer_id: Uuid,
}

/// Student edit; `None` leaves the field unchanged
#[derive(Debug, Clone, Default)]
pub struct TicketChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<TicketCategory>,
    pub priority: Option<TicketPriority>,
    pub lecturer_id: Option<Uuid>,
}

/// Status-changing operations on an existing ticket
#[derive(Debug, Clone)]
pub enum TicketCommand {
    SendToLecturer { admin_notes: Option<String> },
    Review { lecturer_notes: Option<String> },
    Approve { lecturer_notes: Option<String> },
    Reject { reason: String },
    AdminReject { reason: String },
    Complete { admin_notes: Option<String> },
}

impl TicketCommand {
    pub fn action(&self) -> TicketAction {
        match self {
            TicketCommand::SendToLecturer { .. } => TicketAction::SendToLecturer,
            TicketCommand::Review { .. } => TicketAction::Review,
            TicketCommand::Approve { .. } => TicketAction::Approve,
            TicketCommand::Reject { .. } => TicketAction::Reject,
            TicketCommand::AdminReject { .. } => TicketAction::AdminReject,
            TicketCommand::Complete { .. } => TicketAction::Complete,
        }
    }
}

/// History row with the acting user resolved
#[derive(Debug, Clone, Serialize)]
pub struct HistoryView {
    #[serde(flatten)]
    pub entry: TicketHistory,
    pub user: Option<UserSummary>,
}

/// Everything shown on a ticket's page
#[derive(Debug, Clone, Serialize)]
pub struct TicketDetail {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub student: Option<UserSummary>,
    pub lecturer: Option<UserSummary>,
    pub documents: Vec<DocumentView>,
    pub histories: Vec<HistoryView>,
}

/// Blank notes count as absent
fn clean_note(note: Option<String>) -> Option<String> {
    note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

fn validate_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::invalid_field("title", "The title field is required"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::invalid_field(
            "title",
            format!("The title may not be greater than {} characters", MAX_TITLE_LEN),
        ));
    }
    Ok(title.to_string())
}

fn validate_description(description: &str) -> Result<String> {
    let description = description.trim();
    if description.is_empty() {
        return Err(AppError::invalid_field(
            "description",
            "The description field is required",
        ));
    }
    Ok(description.to_string())
}

fn required_reason(reason: &str) -> Result<String> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::invalid_field(
            "rejection_reason",
            "The rejection reason field is required",
        ));
    }
    Ok(reason.to_string())
}

/// Unique index violations surface as conflicts rather than server errors
fn unique_violation_as_conflict(err: DbErr, what: &str) -> AppError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => AppError::Conflict {
            message: format!("{} was taken by a concurrent request, please retry", what),
        },
        _ => err.into(),
    }
}

async fn load_ticket<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<Ticket> {
    TicketEntity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| AppError::TicketNotFound { id: id.to_string() })
}

async fn ensure_lecturer<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<()> {
    match UserEntity::find_by_id(id).one(conn).await? {
        Some(user) if user.is_lecturer() => Ok(()),
        _ => Err(AppError::invalid_field(
            "lecturer_id",
            "The selected lecturer is invalid",
        )),
    }
}

/// The ticket state machine
#[derive(Clone)]
pub struct TicketWorkflow {
    db: DbPool,
    clock: Arc<dyn Clock>,
    letters: LetterNumberGenerator,
    blobs: Arc<dyn BlobStore>,
}

impl TicketWorkflow {
    pub fn new(
        db: DbPool,
        clock: Arc<dyn Clock>,
        letters: LetterNumberGenerator,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self { db, clock, letters, blobs }
    }

    fn repo(&self) -> Repository {
        Repository::new(self.db.clone())
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Open a new ticket in `pending`
    pub async fn create(&self, actor: &Actor, new: NewTicket) -> Result<Ticket> {
        policy::authorize_create(actor)?;

        let title = validate_title(&new.title)?;
        let description = validate_description(&new.description)?;
        let now = self.clock.now();

        let txn = self.db.write().begin().await?;
        ensure_lecturer(&txn, new.lecturer_id).await?;

        let ticket_number = ticket_number::next_ticket_number(&txn, now).await?;

        let ticket = TicketActiveModel {
            id: Set(Uuid::new_v4()),
            ticket_number: Set(ticket_number),
            student_id: Set(actor.id),
            lecturer_id: Set(Some(new.lecturer_id)),
            title: Set(title),
            description: Set(description),
            category: Set(new.category),
            status: Set(TicketStatus::Pending),
            priority: Set(new.priority.unwrap_or_default()),
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
        .insert(&txn)
        .await
        .map_err(|e| unique_violation_as_conflict(e, "Ticket number"))?;

        history::append(
            &txn,
            HistoryEntry::new(ticket.id, actor, HistoryAction::Created)
                .statuses(None, Some(TicketStatus::Pending))
                .note("Ticket created"),
            now,
        )
        .await?;

        txn.commit().await?;

        metrics::record_transition(TicketAction::Create.as_str());
        info!(
            ticket_id = %ticket.id,
            ticket_number = %ticket.ticket_number,
            student_id = %actor.id,
            "Ticket created"
        );

        Ok(ticket)
    }

    /// Student edit of a pending ticket, or revision of a rejected one
    pub async fn update(&self, actor: &Actor, id: Uuid, changes: TicketChanges) -> Result<Ticket> {
        let now = self.clock.now();
        let txn = self.db.write().begin().await?;

        let ticket = load_ticket(&txn, id).await?;
        policy::authorize(actor, &ticket, TicketAction::Update)?;

        let title = changes.title.as_deref().map(validate_title).transpose()?;
        let description = changes
            .description
            .as_deref()
            .map(validate_description)
            .transpose()?;
        if let Some(lecturer_id) = changes.lecturer_id {
            ensure_lecturer(&txn, lecturer_id).await?;
        }

        let old_status = ticket.status;
        let revising = old_status == TicketStatus::Rejected;

        let mut active: TicketActiveModel = ticket.into();
        if let Some(title) = title {
            active.title = Set(title);
        }
        if let Some(description) = description {
            active.description = Set(description);
        }
        if let Some(category) = changes.category {
            active.category = Set(category);
        }
        if let Some(priority) = changes.priority {
            active.priority = Set(priority);
        }
        if let Some(lecturer_id) = changes.lecturer_id {
            active.lecturer_id = Set(Some(lecturer_id));
        }
        if revising {
            active.status = Set(TicketStatus::Pending);
            active.rejection_reason = Set(None);
            active.lecturer_notes = Set(None);
        }
        active.updated_at = Set(now.into());

        let ticket = active.update(&txn).await?;

        let (action, note) = if revising {
            (HistoryAction::Revised, "Ticket revised and resubmitted after rejection")
        } else {
            (HistoryAction::Updated, "Ticket updated")
        };
        history::append(
            &txn,
            HistoryEntry::new(ticket.id, actor, action)
                .statuses(Some(old_status), Some(ticket.status))
                .note(note),
            now,
        )
        .await?;

        txn.commit().await?;

        metrics::record_transition(TicketAction::Update.as_str());
        info!(ticket_id = %ticket.id, revised = revising, "Ticket updated");

        Ok(ticket)
    }

    /// Apply a status-changing command
    pub async fn execute(&self, actor: &Actor, id: Uuid, command: TicketCommand) -> Result<Ticket> {
        let action = command.action();
        let now = self.clock.now();
        let txn = self.db.write().begin().await?;

        let ticket = load_ticket(&txn, id).await?;
        let old_status = ticket.status;
        let new_status = policy::authorize(actor, &ticket, action)?.unwrap_or(old_status);

        let mut active: TicketActiveModel = ticket.clone().into();
        active.status = Set(new_status);
        active.updated_at = Set(now.into());

        let (history_action, note) = match command {
            TicketCommand::SendToLecturer { admin_notes } => {
                if ticket.lecturer_id.is_none() {
                    return Err(AppError::invalid_field(
                        "lecturer_id",
                        "Ticket has no assigned lecturer",
                    ));
                }
                let admin_notes = clean_note(admin_notes);
                if let Some(ref notes) = admin_notes {
                    active.admin_notes = Set(Some(notes.clone()));
                }
                (
                    HistoryAction::SentToLecturer,
                    admin_notes.unwrap_or_else(|| "Ticket sent to lecturer by admin".to_string()),
                )
            }
            TicketCommand::Review { lecturer_notes } => {
                let lecturer_notes = clean_note(lecturer_notes);
                if let Some(ref notes) = lecturer_notes {
                    active.lecturer_notes = Set(Some(notes.clone()));
                }
                active.reviewed_at = Set(Some(now.into()));
                (
                    HistoryAction::Reviewed,
                    lecturer_notes.unwrap_or_else(|| "Ticket reviewed by lecturer".to_string()),
                )
            }
            TicketCommand::Approve { lecturer_notes } => {
                if ticket.nomor_surat.is_some() {
                    return Err(AppError::Conflict {
                        message: "Ticket already carries a letter number".to_string(),
                    });
                }
                let nomor_surat = self
                    .letters
                    .generate(&TicketLetterStore::new(&txn), ticket.category)
                    .await?;

                let lecturer_notes = clean_note(lecturer_notes);
                if let Some(ref notes) = lecturer_notes {
                    active.lecturer_notes = Set(Some(notes.clone()));
                }
                active.approved_at = Set(Some(now.into()));
                active.nomor_surat = Set(Some(nomor_surat.clone()));
                (
                    HistoryAction::Approved,
                    format!(
                        "{} | Nomor Surat: {}",
                        lecturer_notes.as_deref().unwrap_or("Ticket approved by lecturer"),
                        nomor_surat
                    ),
                )
            }
            TicketCommand::Reject { reason } => {
                let reason = required_reason(&reason)?;
                active.rejection_reason = Set(Some(reason.clone()));
                (HistoryAction::Rejected, reason)
            }
            TicketCommand::AdminReject { reason } => {
                let reason = required_reason(&reason)?;
                active.rejection_reason = Set(Some(reason.clone()));
                active.admin_notes = Set(Some(reason.clone()));
                (HistoryAction::RejectedByAdmin, reason)
            }
            TicketCommand::Complete { admin_notes } => {
                let admin_notes = clean_note(admin_notes);
                if let Some(ref notes) = admin_notes {
                    active.admin_notes = Set(Some(notes.clone()));
                }
                active.completed_at = Set(Some(now.into()));
                (
                    HistoryAction::Completed,
                    admin_notes.unwrap_or_else(|| "Ticket completed by admin".to_string()),
                )
            }
        };

        let ticket = active
            .update(&txn)
            .await
            .map_err(|e| unique_violation_as_conflict(e, "Letter number"))?;

        history::append(
            &txn,
            HistoryEntry::new(ticket.id, actor, history_action)
                .statuses(Some(old_status), Some(new_status))
                .note(note),
            now,
        )
        .await?;

        txn.commit().await?;

        metrics::record_transition(action.as_str());
        info!(
            ticket_id = %ticket.id,
            action = %action,
            from = %old_status,
            to = %new_status,
            actor_id = %actor.id,
            "Ticket transition"
        );

        Ok(ticket)
    }

    /// Remove a ticket with its documents, history and blobs
    pub async fn delete(&self, actor: &Actor, id: Uuid) -> Result<()> {
        let txn = self.db.write().begin().await?;

        let ticket = load_ticket(&txn, id).await?;
        policy::authorize(actor, &ticket, TicketAction::Delete)?;

        let documents = DocumentEntity::find()
            .filter(DocumentColumn::TicketId.eq(id))
            .all(&txn)
            .await?;

        DocumentEntity::delete_many()
            .filter(DocumentColumn::TicketId.eq(id))
            .exec(&txn)
            .await?;
        TicketHistoryEntity::delete_many()
            .filter(TicketHistoryColumn::TicketId.eq(id))
            .exec(&txn)
            .await?;
        TicketEntity::delete_by_id(id).exec(&txn).await?;

        txn.commit().await?;

        for document in &documents {
            if let Err(e) = self.blobs.delete(&document.file_path).await {
                warn!(key = %document.file_path, error = %e, "Failed to remove document blob");
            }
        }

        metrics::record_transition(TicketAction::Delete.as_str());
        info!(
            ticket_id = %id,
            ticket_number = %ticket.ticket_number,
            documents = documents.len(),
            "Ticket deleted"
        );

        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Tickets visible to the actor, filtered and paginated
    pub async fn list(&self, actor: &Actor, filter: &TicketFilter) -> Result<Page<TicketSummary>> {
        self.repo().list_tickets(policy::scope_for(actor), filter).await
    }

    /// Totals over the tickets visible to the actor
    pub async fn statistics(&self, actor: &Actor) -> Result<TicketStatistics> {
        self.repo().ticket_statistics(policy::scope_for(actor)).await
    }

    /// Lecturers a student can address a ticket to
    pub async fn lecturers(&self) -> Result<Vec<UserSummary>> {
        self.repo().list_lecturers().await
    }

    /// A ticket with its people, documents and history
    pub async fn detail(&self, actor: &Actor, id: Uuid) -> Result<TicketDetail> {
        let repo = self.repo();
        let conn = self.db.read();

        let ticket = load_ticket(conn, id).await?;
        policy::ensure_can_view(actor, &ticket)?;

        let documents = DocumentEntity::find()
            .filter(DocumentColumn::TicketId.eq(id))
            .order_by_asc(DocumentColumn::CreatedAt)
            .all(conn)
            .await?;
        let histories = history::for_ticket(conn, id).await?;

        let people = repo
            .user_summaries(
                std::iter::once(ticket.student_id)
                    .chain(ticket.lecturer_id)
                    .chain(documents.iter().map(|d| d.uploaded_by))
                    .chain(histories.iter().map(|h| h.user_id)),
            )
            .await?;

        Ok(TicketDetail {
            student: people.get(&ticket.student_id).cloned(),
            lecturer: ticket.lecturer_id.and_then(|l| people.get(&l).cloned()),
            documents: documents
                .into_iter()
                .map(|d| DocumentView::new(people.get(&d.uploaded_by).cloned(), d))
                .collect(),
            histories: histories
                .into_iter()
                .map(|h| HistoryView {
                    user: people.get(&h.user_id).cloned(),
                    entry: h,
                })
                .collect(),
            ticket,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewUser;
    use crate::storage::MemoryBlobStore;
    use crate::workflow::clock::FixedClock;
    use crate::workflow::letter_number::{self, RandomSuffix};
    use chrono::{TimeZone, Utc};
    use regex_lite::Regex;
    use sea_orm::PaginatorTrait;

    struct Fixture {
        workflow: TicketWorkflow,
        db: DbPool,
        blobs: Arc<MemoryBlobStore>,
        student: Actor,
        other_student: Actor,
        lecturer: Actor,
        other_lecturer: Actor,
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

    async fn fixture() -> Fixture {
        let db = DbPool::in_memory().await.unwrap();
        let repo = Repository::new(db.clone());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap(),
        ));
        let blobs = Arc::new(MemoryBlobStore::new());
        let letters = LetterNumberGenerator::new(clock.clone(), Arc::new(RandomSuffix));

        Fixture {
            workflow: TicketWorkflow::new(db.clone(), clock, letters, blobs.clone()),
            db,
            blobs,
            student: user(&repo, "Andi", UserRole::Student).await,
            other_student: user(&repo, "Sari", UserRole::Student).await,
            lecturer: user(&repo, "Budi", UserRole::Lecturer).await,
            other_lecturer: user(&repo, "Dewi", UserRole::Lecturer).await,
            admin: user(&repo, "Admin", UserRole::Admin).await,
        }
    }

    fn new_ticket(lecturer: &Actor) -> NewTicket {
        NewTicket {
            title: "Surat keterangan aktif kuliah".to_string(),
            description: "Diperlukan untuk pengajuan beasiswa".to_string(),
            category: TicketCategory::SuratKeterangan,
            priority: None,
            lecturer_id: lecturer.id,
        }
    }

    async fn history_actions(db: &DbPool, ticket_id: Uuid) -> Vec<HistoryAction> {
        history::for_ticket(db.read(), ticket_id)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.action)
            .collect()
    }

    async fn in_review(f: &Fixture) -> Ticket {
        let ticket = f.workflow.create(&f.student, new_ticket(&f.lecturer)).await.unwrap();
        f.workflow
            .execute(
                &f.admin,
                ticket.id,
                TicketCommand::SendToLecturer { admin_notes: None },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_pending_and_number() {
        let f = fixture().await;

        let first = f.workflow.create(&f.student, new_ticket(&f.lecturer)).await.unwrap();
        let second = f.workflow.create(&f.student, new_ticket(&f.lecturer)).await.unwrap();

        assert_eq!(first.status, TicketStatus::Pending);
        assert_eq!(first.priority, TicketPriority::Medium);
        assert!(first.nomor_surat.is_none());
        assert_eq!(first.ticket_number, "TKT-20250314-0001");
        assert_eq!(second.ticket_number, "TKT-20250314-0002");

        let grammar = Regex::new(r"^TKT-\d{8}-\d{4}$").unwrap();
        assert!(grammar.is_match(&first.ticket_number));

        assert_eq!(history_actions(&f.db, first.id).await, vec![HistoryAction::Created]);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let f = fixture().await;

        let err = f
            .workflow
            .create(&f.lecturer, new_ticket(&f.lecturer))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));

        // Addressed to a student instead of a lecturer
        let err = f
            .workflow
            .create(&f.student, new_ticket(&f.other_student))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));

        let mut blank = new_ticket(&f.lecturer);
        blank.title = "   ".to_string();
        let err = f.workflow.create(&f.student, blank).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));

        let mut long = new_ticket(&f.lecturer);
        long.title = "x".repeat(MAX_TITLE_LEN + 1);
        assert!(f.workflow.create(&f.student, long).await.is_err());
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let f = fixture().await;
        let ticket = in_review(&f).await;
        assert_eq!(ticket.status, TicketStatus::InReview);

        let reviewed = f
            .workflow
            .execute(
                &f.lecturer,
                ticket.id,
                TicketCommand::Review {
                    lecturer_notes: Some("Sedang diperiksa".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(reviewed.status, TicketStatus::InReview);
        assert!(reviewed.reviewed_at.is_some());

        let approved = f
            .workflow
            .execute(
                &f.lecturer,
                ticket.id,
                TicketCommand::Approve { lecturer_notes: None },
            )
            .await
            .unwrap();
        assert_eq!(approved.status, TicketStatus::Approved);
        assert!(approved.approved_at.is_some());
        let nomor = approved.nomor_surat.clone().unwrap();
        assert!(letter_number::is_well_formed(&nomor), "{}", nomor);
        assert!(nomor.starts_with("001/TE-UNILA/SKP/III/2025/"));

        let completed = f
            .workflow
            .execute(
                &f.admin,
                ticket.id,
                TicketCommand::Complete { admin_notes: None },
            )
            .await
            .unwrap();
        assert_eq!(completed.status, TicketStatus::Completed);
        assert!(completed.completed_at.is_some());
        assert_eq!(completed.nomor_surat.as_deref(), Some(nomor.as_str()));

        let histories = history::for_ticket(f.db.read(), ticket.id).await.unwrap();
        let actions: Vec<HistoryAction> = histories.iter().map(|h| h.action).collect();
        assert_eq!(
            actions,
            vec![
                HistoryAction::Created,
                HistoryAction::SentToLecturer,
                HistoryAction::Reviewed,
                HistoryAction::Approved,
                HistoryAction::Completed,
            ]
        );

        let approval = &histories[3];
        assert_eq!(approval.old_status.as_deref(), Some("in_review"));
        assert_eq!(approval.new_status.as_deref(), Some("approved"));
        assert_eq!(
            approval.notes.as_deref(),
            Some(format!("Ticket approved by lecturer | Nomor Surat: {}", nomor).as_str())
        );
    }

    #[tokio::test]
    async fn test_second_approval_in_month_increments_sequence() {
        let f = fixture().await;

        let first = in_review(&f).await;
        f.workflow
            .execute(&f.lecturer, first.id, TicketCommand::Approve { lecturer_notes: None })
            .await
            .unwrap();

        let second = in_review(&f).await;
        let approved = f
            .workflow
            .execute(&f.lecturer, second.id, TicketCommand::Approve { lecturer_notes: None })
            .await
            .unwrap();

        assert!(approved.nomor_surat.unwrap().starts_with("002/"));
    }

    #[tokio::test]
    async fn test_letter_number_is_immutable_after_approval() {
        let f = fixture().await;
        let ticket = in_review(&f).await;
        let approved = f
            .workflow
            .execute(&f.lecturer, ticket.id, TicketCommand::Approve { lecturer_notes: None })
            .await
            .unwrap();

        let err = f
            .workflow
            .execute(
                &f.lecturer,
                ticket.id,
                TicketCommand::Reject { reason: "late".into() },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StateConflict { .. }));

        let err = f
            .workflow
            .execute(
                &f.admin,
                ticket.id,
                TicketCommand::AdminReject { reason: "late".into() },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StateConflict { .. }));

        let err = f
            .workflow
            .execute(&f.lecturer, ticket.id, TicketCommand::Approve { lecturer_notes: None })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StateConflict { .. }));

        let stored = Repository::new(f.db.clone()).find_ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(stored.nomor_surat, approved.nomor_surat);
    }

    #[tokio::test]
    async fn test_lecturer_cannot_approve_pending() {
        let f = fixture().await;
        let ticket = f.workflow.create(&f.student, new_ticket(&f.lecturer)).await.unwrap();

        let err = f
            .workflow
            .execute(&f.lecturer, ticket.id, TicketCommand::Approve { lecturer_notes: None })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StateConflict { .. }));

        let stored = Repository::new(f.db.clone()).find_ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TicketStatus::Pending);
        assert!(stored.nomor_surat.is_none());
        assert_eq!(history_actions(&f.db, ticket.id).await, vec![HistoryAction::Created]);
    }

    #[tokio::test]
    async fn test_only_assigned_lecturer_acts() {
        let f = fixture().await;
        let ticket = in_review(&f).await;

        let err = f
            .workflow
            .execute(
                &f.other_lecturer,
                ticket.id,
                TicketCommand::Approve { lecturer_notes: None },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_rejection_round_trip() {
        let f = fixture().await;
        let ticket = in_review(&f).await;

        let err = f
            .workflow
            .execute(&f.lecturer, ticket.id, TicketCommand::Reject { reason: "  ".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));

        let rejected = f
            .workflow
            .execute(
                &f.lecturer,
                ticket.id,
                TicketCommand::Reject {
                    reason: "incomplete".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(rejected.status, TicketStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("incomplete"));

        let revised = f
            .workflow
            .update(
                &f.student,
                ticket.id,
                TicketChanges {
                    description: Some("Lampiran sudah dilengkapi".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(revised.status, TicketStatus::Pending);
        assert!(revised.rejection_reason.is_none());
        assert!(revised.lecturer_notes.is_none());

        let actions = history_actions(&f.db, ticket.id).await;
        assert_eq!(
            actions.iter().filter(|a| **a == HistoryAction::Revised).count(),
            1
        );
        assert_eq!(actions.last(), Some(&HistoryAction::Revised));
    }

    #[tokio::test]
    async fn test_admin_reject_copies_reason_to_notes() {
        let f = fixture().await;
        let ticket = f.workflow.create(&f.student, new_ticket(&f.lecturer)).await.unwrap();

        let rejected = f
            .workflow
            .execute(
                &f.admin,
                ticket.id,
                TicketCommand::AdminReject {
                    reason: "Salah kategori".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(rejected.status, TicketStatus::Rejected);
        assert_eq!(rejected.admin_notes.as_deref(), Some("Salah kategori"));
        assert_eq!(
            history_actions(&f.db, ticket.id).await.last(),
            Some(&HistoryAction::RejectedByAdmin)
        );
    }

    #[tokio::test]
    async fn test_student_cannot_update_after_sending() {
        let f = fixture().await;
        let ticket = in_review(&f).await;

        let err = f
            .workflow
            .update(
                &f.student,
                ticket.id,
                TicketChanges {
                    title: Some("New title".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StateConflict { .. }));

        let err = f
            .workflow
            .update(&f.other_student, ticket.id, TicketChanges::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_delete_removes_documents_and_history() {
        let f = fixture().await;
        let ticket = f.workflow.create(&f.student, new_ticket(&f.lecturer)).await.unwrap();

        f.blobs.put("documents/x/a.pdf", b"%PDF").await.unwrap();
        DocumentActiveModel {
            id: Set(Uuid::new_v4()),
            ticket_id: Set(ticket.id),
            file_name: Set("a.pdf".into()),
            file_path: Set("documents/x/a.pdf".into()),
            file_type: Set("pdf".into()),
            file_size: Set(4),
            document_type: Set(DocumentType::Attachment),
            uploaded_by: Set(f.student.id),
            created_at: Set(Utc::now().into()),
        }
        .insert(f.db.write())
        .await
        .unwrap();

        let err = f.workflow.delete(&f.other_student, ticket.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));

        f.workflow.delete(&f.student, ticket.id).await.unwrap();

        assert!(Repository::new(f.db.clone()).find_ticket(ticket.id).await.unwrap().is_none());
        assert!(history::for_ticket(f.db.read(), ticket.id).await.unwrap().is_empty());
        let orphans = DocumentEntity::find()
            .filter(DocumentColumn::TicketId.eq(ticket.id))
            .count(f.db.read())
            .await
            .unwrap();
        assert_eq!(orphans, 0);
        assert!(f.blobs.is_empty().await);

        let err = f.workflow.delete(&f.admin, ticket.id).await.unwrap_err();
        assert!(matches!(err, AppError::TicketNotFound { .. }));
    }

    #[tokio::test]
    async fn test_visibility_in_lists_and_detail() {
        let f = fixture().await;
        let pending = f.workflow.create(&f.student, new_ticket(&f.lecturer)).await.unwrap();
        let sent = in_review(&f).await;

        let lecturer_list = f.workflow.list(&f.lecturer, &TicketFilter::default()).await.unwrap();
        assert_eq!(lecturer_list.total, 1);
        assert_eq!(lecturer_list.data[0].ticket.id, sent.id);
        assert_eq!(
            lecturer_list.data[0].student.as_ref().map(|s| s.name.as_str()),
            Some("Andi")
        );

        let err = f.workflow.detail(&f.lecturer, pending.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));

        let other = f.workflow.list(&f.other_student, &TicketFilter::default()).await.unwrap();
        assert_eq!(other.total, 0);

        let admin = f.workflow.list(&f.admin, &TicketFilter::default()).await.unwrap();
        assert_eq!(admin.total, 2);

        let detail = f.workflow.detail(&f.lecturer, sent.id).await.unwrap();
        assert_eq!(detail.histories.len(), 2);
        assert_eq!(
            detail.histories[1].user.as_ref().map(|u| u.id),
            Some(f.admin.id)
        );

        let err = f.workflow.detail(&f.admin, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::TicketNotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_filters() {
        let f = fixture().await;
        f.workflow.create(&f.student, new_ticket(&f.lecturer)).await.unwrap();
        let mut urgent = new_ticket(&f.lecturer);
        urgent.title = "Ijin penelitian".into();
        urgent.category = TicketCategory::Ijin;
        urgent.priority = Some(TicketPriority::High);
        f.workflow.create(&f.student, urgent).await.unwrap();

        let by_priority = f
            .workflow
            .list(
                &f.student,
                &TicketFilter {
                    priority: Some(TicketPriority::High),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_priority.total, 1);

        let by_search = f
            .workflow
            .list(
                &f.student,
                &TicketFilter {
                    search: Some("penelitian".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_search.total, 1);
        assert_eq!(by_search.data[0].ticket.category, TicketCategory::Ijin);

        let paged = f
            .workflow
            .list(
                &f.student,
                &TicketFilter {
                    per_page: 1,
                    page: 2,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(paged.data.len(), 1);
        assert_eq!(paged.last_page, 2);
    }

    #[tokio::test]
    async fn test_statistics_by_role() {
        let f = fixture().await;
        f.workflow.create(&f.student, new_ticket(&f.lecturer)).await.unwrap();
        in_review(&f).await;

        let admin = f.workflow.statistics(&f.admin).await.unwrap();
        assert_eq!(admin.total, 2);
        assert_eq!(admin.pending, 1);
        assert_eq!(admin.in_review, 1);
        assert_eq!(admin.by_priority.medium, 2);

        let lecturer = f.workflow.statistics(&f.lecturer).await.unwrap();
        assert_eq!(lecturer.total, 1);
        assert_eq!(lecturer.pending, 0);

        let other = f.workflow.statistics(&f.other_lecturer).await.unwrap();
        assert_eq!(other, TicketStatistics::default());
    }
}
