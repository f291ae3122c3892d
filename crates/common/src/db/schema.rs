//! Table bootstrap from the entity definitions

use crate::db::models::*;
use crate::errors::Result;
use sea_orm::{ConnectionTrait, EntityName, EntityTrait, Schema};
use tracing::debug;

/// Create every table that does not exist yet.
///
/// Tables are created parents first so foreign keys resolve.
pub async fn create_schema<C: ConnectionTrait>(conn: &C) -> Result<()> {
    let schema = Schema::new(conn.get_database_backend());

    create_table(conn, &schema, UserEntity).await?;
    create_table(conn, &schema, AccessTokenEntity).await?;
    create_table(conn, &schema, TicketEntity).await?;
    create_table(conn, &schema, DocumentEntity).await?;
    create_table(conn, &schema, TicketHistoryEntity).await?;

    Ok(())
}

async fn create_table<C, E>(conn: &C, schema: &Schema, entity: E) -> Result<()>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    debug!(table = %entity.table_name(), "Ensuring table exists");

    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();
    conn.execute(conn.get_database_backend().build(&stmt)).await?;

    Ok(())
}
