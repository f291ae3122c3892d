//! Authorization policy and ticket transition table
//!
//! Every ticket operation is checked by one function, `authorize`, against
//! the `RULES` table. Checks run in a fixed order: role, then ownership
//! scope, then current status. The first two fail as `Forbidden`, the last
//! as `StateConflict`.

use crate::auth::Actor;
use crate::db::models::{Document, Ticket, TicketStatus, UserRole};
use crate::db::TicketScope;
use crate::errors::{AppError, Result};
use std::fmt;

/// Statuses a lecturer can see on tickets assigned to them
pub const LECTURER_VISIBLE: &[TicketStatus] = &[
    TicketStatus::InReview,
    TicketStatus::Approved,
    TicketStatus::Rejected,
    TicketStatus::Completed,
];

/// Operations governed by the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketAction {
    Create,
    Update,
    SendToLecturer,
    Review,
    Approve,
    Reject,
    AdminReject,
    Complete,
    Delete,
}

impl TicketAction {
    /// Verb used in error messages
    pub fn verb(&self) -> &'static str {
        match self {
            TicketAction::Create => "create",
            TicketAction::Update => "update",
            TicketAction::SendToLecturer => "send to lecturer",
            TicketAction::Review => "review",
            TicketAction::Approve => "approve",
            TicketAction::Reject | TicketAction::AdminReject => "reject",
            TicketAction::Complete => "complete",
            TicketAction::Delete => "delete",
        }
    }

    /// Stable label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketAction::Create => "create",
            TicketAction::Update => "update",
            TicketAction::SendToLecturer => "send_to_lecturer",
            TicketAction::Review => "review",
            TicketAction::Approve => "approve",
            TicketAction::Reject => "reject",
            TicketAction::AdminReject => "admin_reject",
            TicketAction::Complete => "complete",
            TicketAction::Delete => "delete",
        }
    }
}

impl fmt::Display for TicketAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which tickets of its role a rule reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The ticket's student
    Owner,
    /// The ticket's lecturer
    Assignee,
    /// Any ticket
    Any,
}

impl Scope {
    fn covers(&self, actor: &Actor, ticket: &Ticket) -> bool {
        match self {
            Scope::Owner => ticket.is_owned_by(actor.id),
            Scope::Assignee => ticket.is_assigned_to(actor.id),
            Scope::Any => true,
        }
    }
}

/// One row of the transition table
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub action: TicketAction,
    pub role: UserRole,
    pub scope: Scope,
    pub from: &'static [TicketStatus],
    /// Status after the operation; `None` when the ticket is removed
    pub to: Option<TicketStatus>,
}

use TicketStatus::{Approved, Completed, InReview, Pending, Rejected};

const ANY_STATUS: &[TicketStatus] = &[Pending, InReview, Approved, Rejected, Completed];

pub const RULES: &[Rule] = &[
    Rule {
        action: TicketAction::Create,
        role: UserRole::Student,
        scope: Scope::Any,
        from: &[],
        to: Some(Pending),
    },
    Rule {
        action: TicketAction::Update,
        role: UserRole::Student,
        scope: Scope::Owner,
        from: &[Pending, Rejected],
        to: Some(Pending),
    },
    Rule {
        action: TicketAction::SendToLecturer,
        role: UserRole::Admin,
        scope: Scope::Any,
        from: &[Pending],
        to: Some(InReview),
    },
    Rule {
        action: TicketAction::Review,
        role: UserRole::Lecturer,
        scope: Scope::Assignee,
        from: &[InReview],
        to: Some(InReview),
    },
    Rule {
        action: TicketAction::Approve,
        role: UserRole::Lecturer,
        scope: Scope::Assignee,
        from: &[InReview],
        to: Some(Approved),
    },
    Rule {
        action: TicketAction::Reject,
        role: UserRole::Lecturer,
        scope: Scope::Assignee,
        from: &[InReview],
        to: Some(Rejected),
    },
    Rule {
        action: TicketAction::AdminReject,
        role: UserRole::Admin,
        scope: Scope::Any,
        from: &[Pending, InReview],
        to: Some(Rejected),
    },
    Rule {
        action: TicketAction::Complete,
        role: UserRole::Admin,
        scope: Scope::Any,
        from: &[Approved],
        to: Some(Completed),
    },
    Rule {
        action: TicketAction::Delete,
        role: UserRole::Admin,
        scope: Scope::Any,
        from: ANY_STATUS,
        to: None,
    },
    Rule {
        action: TicketAction::Delete,
        role: UserRole::Student,
        scope: Scope::Owner,
        from: &[Pending],
        to: None,
    },
];

fn roles_for(action: TicketAction) -> String {
    let mut roles: Vec<&str> = RULES
        .iter()
        .filter(|r| r.action == action)
        .map(|r| r.role.as_str())
        .collect();
    roles.dedup();
    roles.join(" or ")
}

fn rules_for_role(actor: &Actor, action: TicketAction) -> impl Iterator<Item = &'static Rule> + '_ {
    RULES
        .iter()
        .filter(move |r| r.action == action && r.role == actor.role)
}

/// Check that the actor's role may create tickets at all
pub fn authorize_create(actor: &Actor) -> Result<()> {
    if rules_for_role(actor, TicketAction::Create).next().is_some() {
        Ok(())
    } else {
        Err(AppError::forbidden(format!(
            "Creating tickets is reserved for the {} role",
            roles_for(TicketAction::Create)
        )))
    }
}

/// Evaluate the transition table for an operation on an existing ticket.
///
/// Returns the status the ticket moves to, or `None` for deletion.
pub fn authorize(actor: &Actor, ticket: &Ticket, action: TicketAction) -> Result<Option<TicketStatus>> {
    let by_role: Vec<&Rule> = rules_for_role(actor, action).collect();
    if by_role.is_empty() {
        return Err(AppError::forbidden(format!(
            "Only the {} role can {} this ticket",
            roles_for(action),
            action.verb()
        )));
    }

    let in_scope: Vec<&Rule> = by_role
        .into_iter()
        .filter(|r| r.scope.covers(actor, ticket))
        .collect();
    if in_scope.is_empty() {
        let whose = if actor.is_lecturer() {
            "assigned to you"
        } else {
            "you own"
        };
        return Err(AppError::forbidden(format!(
            "You can only {} tickets {}",
            action.verb(),
            whose
        )));
    }

    in_scope
        .iter()
        .find(|r| r.from.contains(&ticket.status))
        .map(|r| r.to)
        .ok_or_else(|| AppError::StateConflict {
            action: action.verb().to_string(),
            status: ticket.status.to_string(),
        })
}

/// Read access to a ticket and its documents
pub fn can_view(actor: &Actor, ticket: &Ticket) -> bool {
    match actor.role {
        UserRole::Admin => true,
        UserRole::Student => ticket.is_owned_by(actor.id),
        UserRole::Lecturer => {
            ticket.is_assigned_to(actor.id) && LECTURER_VISIBLE.contains(&ticket.status)
        }
    }
}

pub fn ensure_can_view(actor: &Actor, ticket: &Ticket) -> Result<()> {
    if can_view(actor, ticket) {
        Ok(())
    } else {
        Err(AppError::forbidden("You do not have access to this ticket"))
    }
}

/// Document deletion: ticket access plus being the uploader or an admin
pub fn ensure_can_delete_document(actor: &Actor, ticket: &Ticket, document: &Document) -> Result<()> {
    ensure_can_view(actor, ticket)?;

    if actor.is_admin() || document.uploaded_by == actor.id {
        Ok(())
    } else {
        Err(AppError::forbidden(
            "Only the uploader or an admin can delete this document",
        ))
    }
}

/// Which tickets show up in an actor's lists and statistics
pub fn scope_for(actor: &Actor) -> TicketScope {
    match actor.role {
        UserRole::Admin => TicketScope::All,
        UserRole::Student => TicketScope::Owned(actor.id),
        UserRole::Lecturer => TicketScope::Assigned {
            lecturer_id: actor.id,
            statuses: LECTURER_VISIBLE,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{DocumentType, TicketCategory, TicketPriority};
    use uuid::Uuid;

    struct Cast {
        student: Actor,
        other_student: Actor,
        lecturer: Actor,
        other_lecturer: Actor,
        admin: Actor,
    }

    fn cast() -> Cast {
        Cast {
            student: Actor::new(Uuid::new_v4(), UserRole::Student),
            other_student: Actor::new(Uuid::new_v4(), UserRole::Student),
            lecturer: Actor::new(Uuid::new_v4(), UserRole::Lecturer),
            other_lecturer: Actor::new(Uuid::new_v4(), UserRole::Lecturer),
            admin: Actor::new(Uuid::new_v4(), UserRole::Admin),
        }
    }

    fn ticket(cast: &Cast, status: TicketStatus) -> Ticket {
        let now = chrono::Utc::now().fixed_offset();
        Ticket {
            id: Uuid::new_v4(),
            ticket_number: "TKT-20250314-0001".into(),
            student_id: cast.student.id,
            lecturer_id: Some(cast.lecturer.id),
            title: "Surat keterangan aktif kuliah".into(),
            description: "Untuk beasiswa".into(),
            category: TicketCategory::SuratKeterangan,
            status,
            priority: TicketPriority::Medium,
            admin_notes: None,
            lecturer_notes: None,
            rejection_reason: None,
            nomor_surat: None,
            submitted_at: now,
            reviewed_at: None,
            approved_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn is_forbidden<T>(r: Result<T>) -> bool {
        matches!(r, Err(AppError::Forbidden { .. }))
    }

    fn is_conflict<T>(r: Result<T>) -> bool {
        matches!(r, Err(AppError::StateConflict { .. }))
    }

    #[test]
    fn test_happy_path_targets() {
        let c = cast();
        assert_eq!(
            authorize(&c.admin, &ticket(&c, Pending), TicketAction::SendToLecturer).unwrap(),
            Some(InReview)
        );
        assert_eq!(
            authorize(&c.lecturer, &ticket(&c, InReview), TicketAction::Review).unwrap(),
            Some(InReview)
        );
        assert_eq!(
            authorize(&c.lecturer, &ticket(&c, InReview), TicketAction::Approve).unwrap(),
            Some(Approved)
        );
        assert_eq!(
            authorize(&c.admin, &ticket(&c, Approved), TicketAction::Complete).unwrap(),
            Some(Completed)
        );
        assert_eq!(
            authorize(&c.student, &ticket(&c, Rejected), TicketAction::Update).unwrap(),
            Some(Pending)
        );
    }

    #[test]
    fn test_role_checked_before_state() {
        let c = cast();
        // Wrong role on a ticket in the wrong state is still a role failure
        assert!(is_forbidden(authorize(
            &c.student,
            &ticket(&c, Completed),
            TicketAction::Approve
        )));
        assert!(is_forbidden(authorize(
            &c.lecturer,
            &ticket(&c, Pending),
            TicketAction::Complete
        )));
    }

    #[test]
    fn test_scope_checked_before_state() {
        let c = cast();
        assert!(is_forbidden(authorize(
            &c.other_lecturer,
            &ticket(&c, Pending),
            TicketAction::Approve
        )));
        assert!(is_forbidden(authorize(
            &c.other_student,
            &ticket(&c, Completed),
            TicketAction::Update
        )));
    }

    #[test]
    fn test_lecturer_cannot_approve_outside_review() {
        let c = cast();
        for status in [Pending, Approved, Rejected, Completed] {
            assert!(is_conflict(authorize(
                &c.lecturer,
                &ticket(&c, status),
                TicketAction::Approve
            )));
        }
    }

    #[test]
    fn test_student_update_only_pending_or_rejected() {
        let c = cast();
        for status in [InReview, Approved, Completed] {
            assert!(is_conflict(authorize(
                &c.student,
                &ticket(&c, status),
                TicketAction::Update
            )));
        }
    }

    #[test]
    fn test_admin_reject_only_before_decision() {
        let c = cast();
        assert!(authorize(&c.admin, &ticket(&c, Pending), TicketAction::AdminReject).is_ok());
        assert!(authorize(&c.admin, &ticket(&c, InReview), TicketAction::AdminReject).is_ok());
        for status in [Approved, Rejected, Completed] {
            assert!(is_conflict(authorize(
                &c.admin,
                &ticket(&c, status),
                TicketAction::AdminReject
            )));
        }
    }

    #[test]
    fn test_delete_rules() {
        let c = cast();
        for status in ANY_STATUS.iter().copied() {
            assert_eq!(
                authorize(&c.admin, &ticket(&c, status), TicketAction::Delete).unwrap(),
                None
            );
        }
        assert!(authorize(&c.student, &ticket(&c, Pending), TicketAction::Delete).is_ok());
        assert!(is_conflict(authorize(
            &c.student,
            &ticket(&c, InReview),
            TicketAction::Delete
        )));
        assert!(is_forbidden(authorize(
            &c.other_student,
            &ticket(&c, Pending),
            TicketAction::Delete
        )));
        assert!(is_forbidden(authorize(
            &c.lecturer,
            &ticket(&c, Pending),
            TicketAction::Delete
        )));
    }

    #[test]
    fn test_create_role() {
        let c = cast();
        assert!(authorize_create(&c.student).is_ok());
        assert!(is_forbidden(authorize_create(&c.lecturer)));
        assert!(is_forbidden(authorize_create(&c.admin)));
    }

    #[test]
    fn test_visibility() {
        let c = cast();
        let pending = ticket(&c, Pending);
        let in_review = ticket(&c, InReview);

        assert!(can_view(&c.admin, &pending));
        assert!(can_view(&c.student, &pending));
        assert!(!can_view(&c.other_student, &pending));
        assert!(!can_view(&c.lecturer, &pending));
        assert!(can_view(&c.lecturer, &in_review));
        assert!(!can_view(&c.other_lecturer, &in_review));
    }

    #[test]
    fn test_document_delete_requires_uploader_or_admin() {
        let c = cast();
        let t = ticket(&c, InReview);
        let doc = Document {
            id: Uuid::new_v4(),
            ticket_id: t.id,
            file_name: "a.pdf".into(),
            file_path: "documents/a.pdf".into(),
            file_type: "pdf".into(),
            file_size: 10,
            document_type: DocumentType::Attachment,
            uploaded_by: c.student.id,
            created_at: chrono::Utc::now().fixed_offset(),
        };

        assert!(ensure_can_delete_document(&c.student, &t, &doc).is_ok());
        assert!(ensure_can_delete_document(&c.admin, &t, &doc).is_ok());
        assert!(ensure_can_delete_document(&c.lecturer, &t, &doc).is_err());
        assert!(ensure_can_delete_document(&c.other_student, &t, &doc).is_err());
    }

    #[test]
    fn test_scope_for_roles() {
        let c = cast();
        assert_eq!(scope_for(&c.admin), TicketScope::All);
        assert_eq!(scope_for(&c.student), TicketScope::Owned(c.student.id));
        assert!(matches!(
            scope_for(&c.lecturer),
            TicketScope::Assigned { lecturer_id, .. } if lecturer_id == c.lecturer.id
        ));
    }
}
