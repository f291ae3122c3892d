//! Public letter-number verification

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use sitejo_common::{
    db::{
        models::{TicketCategory, TicketStatus},
        UserSummary,
    },
    errors::{AppError, Result},
    workflow::{letter_number, ParsedLetterNumber, RegisteredLetter, Verification},
};

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub nomor: Option<String>,
}

/// Name and institutional ID, nothing else
#[derive(Debug, Serialize)]
pub struct PersonInfo {
    pub name: String,
    pub nim_nip: String,
}

impl From<UserSummary> for PersonInfo {
    fn from(user: UserSummary) -> Self {
        Self {
            name: user.name,
            nim_nip: user.nim_nip,
        }
    }
}

/// Redacted view of the ticket behind a letter
#[derive(Debug, Serialize)]
pub struct VerifiedTicket {
    pub id: Uuid,
    pub title: String,
    #[serde(rename = "type")]
    pub category: TicketCategory,
    pub status: TicketStatus,
    pub student: Option<PersonInfo>,
    pub lecturer: Option<PersonInfo>,
    pub approved_at: Option<DateTime<FixedOffset>>,
}

impl From<RegisteredLetter> for VerifiedTicket {
    fn from(letter: RegisteredLetter) -> Self {
        Self {
            id: letter.ticket.id,
            title: letter.ticket.title,
            category: letter.ticket.category,
            status: letter.ticket.status,
            student: letter.student.map(PersonInfo::from),
            lecturer: letter.lecturer.map(PersonInfo::from),
            approved_at: letter.ticket.approved_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub message: &'static str,
    pub nomor_surat: String,
    pub ticket: Option<VerifiedTicket>,
    pub info: Option<ParsedLetterNumber>,
}

/// The code is checked exactly as received; surrounding whitespace fails the grammar
async fn run_verification(state: &AppState, code: String) -> Result<(StatusCode, Json<VerifyResponse>)> {
    let outcome = letter_number::verify(&state.repo, &code).await?;

    let response = match outcome {
        Verification::Valid(letter) => (
            StatusCode::OK,
            VerifyResponse {
                valid: true,
                message: "Nomor surat valid",
                info: letter_number::parse(&code),
                ticket: Some(VerifiedTicket::from(*letter)),
                nomor_surat: code,
            },
        ),
        Verification::InvalidFormat => (
            StatusCode::NOT_FOUND,
            VerifyResponse {
                valid: false,
                message: "Invalid letter number format",
                nomor_surat: code,
                ticket: None,
                info: None,
            },
        ),
        Verification::NotFound => (
            StatusCode::NOT_FOUND,
            VerifyResponse {
                valid: false,
                message: "Letter number not found",
                nomor_surat: code,
                ticket: None,
                info: None,
            },
        ),
    };

    Ok((response.0, Json(response.1)))
}

/// `GET /verify-letter/{*code}`; the code spans several path segments
pub async fn verify_letter(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<(StatusCode, Json<VerifyResponse>)> {
    run_verification(&state, code).await
}

/// `GET /verify-letter?nomor=...`
pub async fn verify_letter_query(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Result<(StatusCode, Json<VerifyResponse>)> {
    let code = query
        .nomor
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| AppError::MissingField {
            field: "nomor".to_string(),
        })?;

    run_verification(&state, code).await
}
