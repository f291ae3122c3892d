//! Repository pattern for database operations
//!
//! Provides a clean interface for account, token and ticket read access
//! with proper error handling. Ticket mutations live in `workflow`, where
//! each one shares a transaction with its history entry.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

/// Default page size for list endpoints
pub const DEFAULT_PER_PAGE: u64 = 15;

/// Largest page size a client may request
pub const MAX_PER_PAGE: u64 = 100;

fn default_page() -> u64 { 1 }
fn default_per_page() -> u64 { DEFAULT_PER_PAGE }

/// One page of results
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub last_page: u64,
}

impl<T> Page<T> {
    fn new(data: Vec<T>, total: u64, page: u64, per_page: u64) -> Self {
        let last_page = total.div_ceil(per_page).max(1);
        Self { data, total, page, per_page, last_page }
    }
}

/// Clamp client pagination input to sane bounds, returning (page, per_page)
fn pagination(page: u64, per_page: u64) -> (u64, u64) {
    (page.max(1), per_page.clamp(1, MAX_PER_PAGE))
}

fn search_term(search: &Option<String>) -> Option<&str> {
    search.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Public view of a user embedded in ticket responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub nim_nip: String,
    pub role: UserRole,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            nim_nip: user.nim_nip.clone(),
            role: user.role,
        }
    }
}

/// Which tickets an actor may see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketScope {
    All,
    Owned(Uuid),
    Assigned {
        lecturer_id: Uuid,
        statuses: &'static [TicketStatus],
    },
}

impl TicketScope {
    fn condition(&self) -> Condition {
        match self {
            TicketScope::All => Condition::all(),
            TicketScope::Owned(student_id) => {
                Condition::all().add(TicketColumn::StudentId.eq(*student_id))
            }
            TicketScope::Assigned { lecturer_id, statuses } => Condition::all()
                .add(TicketColumn::LecturerId.eq(*lecturer_id))
                .add(TicketColumn::Status.is_in(statuses.iter().copied())),
        }
    }
}

/// Ticket list filters, as accepted on the query string
#[derive(Debug, Clone, Deserialize)]
pub struct TicketFilter {
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub search: Option<String>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

impl Default for TicketFilter {
    fn default() -> Self {
        Self {
            status: None,
            priority: None,
            search: None,
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

/// Ticket row with its people resolved
#[derive(Debug, Clone, Serialize)]
pub struct TicketSummary {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub student: Option<UserSummary>,
    pub lecturer: Option<UserSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PriorityCounts {
    pub low: u64,
    pub medium: u64,
    pub high: u64,
}

/// Ticket totals by status and priority
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TicketStatistics {
    pub total: u64,
    pub pending: u64,
    pub in_review: u64,
    pub approved: u64,
    pub rejected: u64,
    pub completed: u64,
    pub by_priority: PriorityCounts,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserFilter {
    pub role: Option<UserRole>,
    pub search: Option<String>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

impl Default for UserFilter {
    fn default() -> Self {
        Self {
            role: None,
            search: None,
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

/// Fields for a new account; the password is already hashed
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub nim_nip: String,
    pub role: UserRole,
    pub phone: Option<String>,
    pub password_hash: String,
}

/// Partial account update; `None` leaves the column unchanged
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub nim_nip: Option<String>,
    pub role: Option<UserRole>,
    pub phone: Option<String>,
    pub password_hash: Option<String>,
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // User Operations
    // ========================================================================

    /// Find user by ID
    pub async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        UserEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Find user by login identifier.
    ///
    /// Email wins over NIM/NIP, and both win over the display name, which is
    /// not unique.
    pub async fn find_user_by_identifier(&self, identifier: &str) -> Result<Option<User>> {
        let conn = self.write_conn();

        let by_email = UserEntity::find()
            .filter(UserColumn::Email.eq(identifier.to_lowercase()))
            .one(conn)
            .await?;
        if by_email.is_some() {
            return Ok(by_email);
        }

        let by_nim_nip = UserEntity::find()
            .filter(UserColumn::NimNip.eq(identifier))
            .one(conn)
            .await?;
        if by_nim_nip.is_some() {
            return Ok(by_nim_nip);
        }

        UserEntity::find()
            .filter(UserColumn::Name.eq(identifier))
            .order_by_asc(UserColumn::CreatedAt)
            .one(conn)
            .await
            .map_err(Into::into)
    }

    /// List users with optional role filter and search
    pub async fn list_users(&self, filter: &UserFilter) -> Result<Page<User>> {
        let (page, per_page) = pagination(filter.page, filter.per_page);

        let mut query = UserEntity::find();
        if let Some(role) = filter.role {
            query = query.filter(UserColumn::Role.eq(role));
        }
        if let Some(term) = search_term(&filter.search) {
            query = query.filter(
                Condition::any()
                    .add(UserColumn::Name.contains(term))
                    .add(UserColumn::Email.contains(term))
                    .add(UserColumn::NimNip.contains(term)),
            );
        }

        let paginator = query
            .order_by_desc(UserColumn::CreatedAt)
            .order_by_asc(UserColumn::Id)
            .paginate(self.read_conn(), per_page);

        let total = paginator.num_items().await?;
        let users = paginator.fetch_page(page - 1).await?;

        Ok(Page::new(users, total, page, per_page))
    }

    /// All lecturer accounts ordered by name
    pub async fn list_lecturers(&self) -> Result<Vec<UserSummary>> {
        let lecturers = UserEntity::find()
            .filter(UserColumn::Role.eq(UserRole::Lecturer))
            .order_by_asc(UserColumn::Name)
            .all(self.read_conn())
            .await?;

        Ok(lecturers.iter().map(UserSummary::from).collect())
    }

    /// Resolve a set of user IDs to summaries
    pub async fn user_summaries(
        &self,
        ids: impl IntoIterator<Item = Uuid>,
    ) -> Result<HashMap<Uuid, UserSummary>> {
        let mut ids: Vec<Uuid> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();

        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let users = UserEntity::find()
            .filter(UserColumn::Id.is_in(ids))
            .all(self.read_conn())
            .await?;

        Ok(users.iter().map(|u| (u.id, UserSummary::from(u))).collect())
    }

    /// Check whether an email is used by any account other than `except`
    pub async fn email_taken(&self, email: &str, except: Option<Uuid>) -> Result<bool> {
        let mut query = UserEntity::find().filter(UserColumn::Email.eq(email));
        if let Some(id) = except {
            query = query.filter(UserColumn::Id.ne(id));
        }
        Ok(query.count(self.write_conn()).await? > 0)
    }

    /// Check whether a NIM/NIP is used by any account other than `except`
    pub async fn nim_nip_taken(&self, nim_nip: &str, except: Option<Uuid>) -> Result<bool> {
        let mut query = UserEntity::find().filter(UserColumn::NimNip.eq(nim_nip));
        if let Some(id) = except {
            query = query.filter(UserColumn::Id.ne(id));
        }
        Ok(query.count(self.write_conn()).await? > 0)
    }

    async fn ensure_unique(
        &self,
        name: Option<&str>,
        email: Option<&str>,
        nim_nip: Option<&str>,
        except: Option<Uuid>,
    ) -> Result<()> {
        // Names must not collide with another account's login keys
        if let Some(name) = name {
            if self.email_taken(&name.to_lowercase(), except).await?
                || self.nim_nip_taken(name, except).await?
            {
                return Err(AppError::Duplicate {
                    field: "name".to_string(),
                    message: "The name matches another account's email or NIM/NIP".to_string(),
                });
            }
        }
        if let Some(email) = email {
            if self.email_taken(email, except).await? {
                return Err(AppError::Duplicate {
                    field: "email".to_string(),
                    message: "The email has already been taken".to_string(),
                });
            }
        }
        if let Some(nim_nip) = nim_nip {
            if self.nim_nip_taken(nim_nip, except).await? {
                return Err(AppError::Duplicate {
                    field: "nim_nip".to_string(),
                    message: "The NIM/NIP has already been taken".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Create a new user
    pub async fn create_user(&self, new_user: NewUser) -> Result<User> {
        self.ensure_unique(
            Some(&new_user.name),
            Some(&new_user.email),
            Some(&new_user.nim_nip),
            None,
        )
        .await?;

        let now = Utc::now();
        let user = UserActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(new_user.name),
            email: Set(new_user.email),
            nim_nip: Set(new_user.nim_nip),
            role: Set(new_user.role),
            phone: Set(new_user.phone),
            password_hash: Set(new_user.password_hash),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        let user = user.insert(self.write_conn()).await?;
        info!(user_id = %user.id, role = %user.role, "User created");

        Ok(user)
    }

    /// Apply a partial update to a user
    pub async fn update_user(&self, id: Uuid, changes: UserChanges) -> Result<User> {
        let user = UserEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::UserNotFound { id: id.to_string() })?;

        self.ensure_unique(
            changes.name.as_deref(),
            changes.email.as_deref(),
            changes.nim_nip.as_deref(),
            Some(id),
        )
        .await?;

        let mut active: UserActiveModel = user.into();
        if let Some(name) = changes.name {
            active.name = Set(name);
        }
        if let Some(email) = changes.email {
            active.email = Set(email);
        }
        if let Some(nim_nip) = changes.nim_nip {
            active.nim_nip = Set(nim_nip);
        }
        if let Some(role) = changes.role {
            active.role = Set(role);
        }
        if let Some(phone) = changes.phone {
            active.phone = Set(Some(phone));
        }
        if let Some(password_hash) = changes.password_hash {
            active.password_hash = Set(password_hash);
        }
        active.updated_at = Set(Utc::now().into());

        active.update(self.write_conn()).await.map_err(Into::into)
    }

    /// Delete a user together with the tickets they own.
    ///
    /// Refused when the user has acted on other people's tickets or is the
    /// lecturer of a ticket that has already been sent. Returns the blob keys
    /// of the removed documents so the caller can clean up storage.
    pub async fn delete_user(&self, id: Uuid) -> Result<Vec<String>> {
        let txn = self.write_conn().begin().await?;

        let user = UserEntity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::UserNotFound { id: id.to_string() })?;

        let owned: Vec<Uuid> = TicketEntity::find()
            .filter(TicketColumn::StudentId.eq(id))
            .all(&txn)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();

        let assigned_in_flight = TicketEntity::find()
            .filter(TicketColumn::LecturerId.eq(id))
            .filter(TicketColumn::Status.ne(TicketStatus::Pending))
            .count(&txn)
            .await?;
        let foreign_history = TicketHistoryEntity::find()
            .filter(TicketHistoryColumn::UserId.eq(id))
            .filter(TicketHistoryColumn::TicketId.is_not_in(owned.clone()))
            .count(&txn)
            .await?;
        let foreign_documents = DocumentEntity::find()
            .filter(DocumentColumn::UploadedBy.eq(id))
            .filter(DocumentColumn::TicketId.is_not_in(owned.clone()))
            .count(&txn)
            .await?;

        if assigned_in_flight + foreign_history + foreign_documents > 0 {
            return Err(AppError::Conflict {
                message: "User has workflow activity on other users' tickets and cannot be deleted"
                    .to_string(),
            });
        }

        let blob_keys: Vec<String> = DocumentEntity::find()
            .filter(DocumentColumn::TicketId.is_in(owned.clone()))
            .all(&txn)
            .await?
            .into_iter()
            .map(|d| d.file_path)
            .collect();

        DocumentEntity::delete_many()
            .filter(DocumentColumn::TicketId.is_in(owned.clone()))
            .exec(&txn)
            .await?;
        TicketHistoryEntity::delete_many()
            .filter(TicketHistoryColumn::TicketId.is_in(owned))
            .exec(&txn)
            .await?;
        TicketEntity::delete_many()
            .filter(TicketColumn::StudentId.eq(id))
            .exec(&txn)
            .await?;
        TicketEntity::update_many()
            .col_expr(TicketColumn::LecturerId, Expr::value(Option::<Uuid>::None))
            .filter(TicketColumn::LecturerId.eq(id))
            .exec(&txn)
            .await?;
        AccessTokenEntity::delete_many()
            .filter(AccessTokenColumn::UserId.eq(id))
            .exec(&txn)
            .await?;
        UserEntity::delete_by_id(id).exec(&txn).await?;

        txn.commit().await?;

        info!(user_id = %user.id, role = %user.role, documents = blob_keys.len(), "User deleted");

        Ok(blob_keys)
    }

    // ========================================================================
    // Access Token Operations
    // ========================================================================

    /// Record an issued token
    pub async fn store_token(
        &self,
        user_id: Uuid,
        token_hash: String,
        expires_at: DateTime<Utc>,
    ) -> Result<AccessToken> {
        let token = AccessTokenActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            token_hash: Set(token_hash),
            created_at: Set(Utc::now().into()),
            expires_at: Set(expires_at.into()),
        };

        token.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// Find a stored, unexpired token by its hash
    pub async fn find_active_token(&self, token_hash: &str) -> Result<Option<AccessToken>> {
        let token = AccessTokenEntity::find()
            .filter(AccessTokenColumn::TokenHash.eq(token_hash))
            .one(self.write_conn())
            .await?;

        Ok(token.filter(|t| !t.is_expired()))
    }

    /// Revoke a single token
    pub async fn revoke_token(&self, token_hash: &str) -> Result<bool> {
        let result = AccessTokenEntity::delete_many()
            .filter(AccessTokenColumn::TokenHash.eq(token_hash))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Revoke every token of a user
    pub async fn revoke_user_tokens(&self, user_id: Uuid) -> Result<u64> {
        let result = AccessTokenEntity::delete_many()
            .filter(AccessTokenColumn::UserId.eq(user_id))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected)
    }

    // ========================================================================
    // Ticket Read Operations
    // ========================================================================

    /// Find ticket by ID
    pub async fn find_ticket(&self, id: Uuid) -> Result<Option<Ticket>> {
        TicketEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Find ticket by its letter number
    pub async fn find_ticket_by_letter_number(&self, nomor_surat: &str) -> Result<Option<Ticket>> {
        TicketEntity::find()
            .filter(TicketColumn::NomorSurat.eq(nomor_surat))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// List tickets inside a scope, newest first
    pub async fn list_tickets(
        &self,
        scope: TicketScope,
        filter: &TicketFilter,
    ) -> Result<Page<TicketSummary>> {
        let (page, per_page) = pagination(filter.page, filter.per_page);

        let mut query = TicketEntity::find().filter(scope.condition());
        if let Some(status) = filter.status {
            query = query.filter(TicketColumn::Status.eq(status));
        }
        if let Some(priority) = filter.priority {
            query = query.filter(TicketColumn::Priority.eq(priority));
        }
        if let Some(term) = search_term(&filter.search) {
            query = query.filter(
                Condition::any()
                    .add(TicketColumn::TicketNumber.contains(term))
                    .add(TicketColumn::Title.contains(term))
                    .add(TicketColumn::Description.contains(term)),
            );
        }

        let paginator = query
            .order_by_desc(TicketColumn::CreatedAt)
            .order_by_desc(TicketColumn::TicketNumber)
            .paginate(self.read_conn(), per_page);

        let total = paginator.num_items().await?;
        let tickets = paginator.fetch_page(page - 1).await?;

        let people = self
            .user_summaries(
                tickets
                    .iter()
                    .flat_map(|t| std::iter::once(t.student_id).chain(t.lecturer_id)),
            )
            .await?;

        let rows = tickets
            .into_iter()
            .map(|ticket| TicketSummary {
                student: people.get(&ticket.student_id).cloned(),
                lecturer: ticket.lecturer_id.and_then(|id| people.get(&id).cloned()),
                ticket,
            })
            .collect();

        Ok(Page::new(rows, total, page, per_page))
    }

    async fn count_tickets(&self, scope: TicketScope, extra: Condition) -> Result<u64> {
        TicketEntity::find()
            .filter(scope.condition())
            .filter(extra)
            .count(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Totals by status and priority inside a scope
    pub async fn ticket_statistics(&self, scope: TicketScope) -> Result<TicketStatistics> {
        let mut stats = TicketStatistics {
            total: self.count_tickets(scope, Condition::all()).await?,
            ..Default::default()
        };

        for status in TicketStatus::ALL {
            let n = self
                .count_tickets(scope, Condition::all().add(TicketColumn::Status.eq(status)))
                .await?;
            match status {
                TicketStatus::Pending => stats.pending = n,
                TicketStatus::InReview => stats.in_review = n,
                TicketStatus::Approved => stats.approved = n,
                TicketStatus::Rejected => stats.rejected = n,
                TicketStatus::Completed => stats.completed = n,
            }
        }

        for priority in TicketPriority::ALL {
            let n = self
                .count_tickets(scope, Condition::all().add(TicketColumn::Priority.eq(priority)))
                .await?;
            match priority {
                TicketPriority::Low => stats.by_priority.low = n,
                TicketPriority::Medium => stats.by_priority.medium = n,
                TicketPriority::High => stats.by_priority.high = n,
            }
        }

        Ok(stats)
    }
}
