//! Ticket handlers
//!
//! Thin adapters from HTTP onto `TicketWorkflow`; every role, ownership
//! and status rule lives in the workflow policy.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::handlers::{Envelope, MessageResponse};
use crate::AppState;
use sitejo_common::{
    auth::AuthUser,
    db::{
        models::{Ticket, TicketCategory, TicketPriority},
        Page, TicketFilter, TicketStatistics, TicketSummary, UserSummary,
    },
    errors::Result,
    workflow::{NewTicket, TicketChanges, TicketCommand, TicketDetail},
};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTicketRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: String,

    #[validate(length(min = 1))]
    pub description: String,

    #[serde(alias = "type")]
    pub category: TicketCategory,

    pub priority: Option<TicketPriority>,

    pub lecturer_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTicketRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,

    #[validate(length(min = 1))]
    pub description: Option<String>,

    #[serde(alias = "type")]
    pub category: Option<TicketCategory>,

    pub priority: Option<TicketPriority>,

    pub lecturer_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AdminNotesRequest {
    pub admin_notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LecturerNotesRequest {
    pub lecturer_notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    pub rejection_reason: Option<String>,
}

/// Role-scoped, filtered ticket list
pub async fn list_tickets(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(filter): Query<TicketFilter>,
) -> Result<Json<Page<TicketSummary>>> {
    let page = state.tickets.list(&auth.actor(), &filter).await?;
    Ok(Json(page))
}

pub async fn statistics(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<TicketStatistics>> {
    let stats = state.tickets.statistics(&auth.actor()).await?;
    Ok(Json(stats))
}

/// Lecturers a ticket can be addressed to
pub async fn lecturers(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<Vec<UserSummary>>> {
    let lecturers = state.tickets.lecturers().await?;
    Ok(Json(lecturers))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<TicketDetail>> {
    let detail = state.tickets.detail(&auth.actor(), id).await?;
    Ok(Json(detail))
}

pub async fn create_ticket(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<CreateTicketRequest>,
) -> Result<(StatusCode, Json<Envelope<Ticket>>)> {
    request.validate()?;

    let ticket = state
        .tickets
        .create(
            &auth.actor(),
            NewTicket {
                title: request.title,
                description: request.description,
                category: request.category,
                priority: request.priority,
                lecturer_id: request.lecturer_id,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(Envelope::new("Ticket created successfully", ticket)),
    ))
}

pub async fn update_ticket(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateTicketRequest>,
) -> Result<Json<Envelope<Ticket>>> {
    request.validate()?;

    let ticket = state
        .tickets
        .update(
            &auth.actor(),
            id,
            TicketChanges {
                title: request.title,
                description: request.description,
                category: request.category,
                priority: request.priority,
                lecturer_id: request.lecturer_id,
            },
        )
        .await?;

    Ok(Json(Envelope::new("Ticket updated successfully", ticket)))
}

pub async fn delete_ticket(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>> {
    state.tickets.delete(&auth.actor(), id).await?;
    Ok(Json(MessageResponse {
        message: "Ticket deleted successfully",
    }))
}

pub async fn send_to_lecturer(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    body: Option<Json<AdminNotesRequest>>,
) -> Result<Json<Envelope<Ticket>>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let ticket = state
        .tickets
        .execute(
            &auth.actor(),
            id,
            TicketCommand::SendToLecturer {
                admin_notes: request.admin_notes,
            },
        )
        .await?;

    Ok(Json(Envelope::new("Ticket sent to lecturer", ticket)))
}

pub async fn review(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    body: Option<Json<LecturerNotesRequest>>,
) -> Result<Json<Envelope<Ticket>>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let ticket = state
        .tickets
        .execute(
            &auth.actor(),
            id,
            TicketCommand::Review {
                lecturer_notes: request.lecturer_notes,
            },
        )
        .await?;

    Ok(Json(Envelope::new("Ticket reviewed", ticket)))
}

pub async fn approve(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    body: Option<Json<LecturerNotesRequest>>,
) -> Result<Json<Envelope<Ticket>>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let ticket = state
        .tickets
        .execute(
            &auth.actor(),
            id,
            TicketCommand::Approve {
                lecturer_notes: request.lecturer_notes,
            },
        )
        .await?;

    Ok(Json(Envelope::new("Ticket approved", ticket)))
}

/// Lecturer rejection, or admin rejection when the caller is an admin
pub async fn reject(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    body: Option<Json<RejectRequest>>,
) -> Result<Json<Envelope<Ticket>>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let reason = request.rejection_reason.unwrap_or_default();

    let actor = auth.actor();
    let command = if actor.is_admin() {
        TicketCommand::AdminReject { reason }
    } else {
        TicketCommand::Reject { reason }
    };

    let ticket = state.tickets.execute(&actor, id, command).await?;

    Ok(Json(Envelope::new("Ticket rejected", ticket)))
}

pub async fn complete(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    body: Option<Json<AdminNotesRequest>>,
) -> Result<Json<Envelope<Ticket>>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let ticket = state
        .tickets
        .execute(
            &auth.actor(),
            id,
            TicketCommand::Complete {
                admin_notes: request.admin_notes,
            },
        )
        .await?;

    Ok(Json(Envelope::new("Ticket completed", ticket)))
}
