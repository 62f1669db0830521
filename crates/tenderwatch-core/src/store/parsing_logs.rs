use sqlx::PgPool;

use crate::error::Result;
use crate::types::{ParsingLog, RunStatus};

const SELECT_COLUMNS: &str = r#"
    id, started_at, finished_at, total_found, new_added, duplicates,
    status, error_message
"#;

/// Open a run record with status = running. Updated once at run end.
pub async fn open_run(pool: &PgPool) -> Result<ParsingLog> {
    let log = sqlx::query_as::<_, ParsingLog>(&format!(
        "INSERT INTO parsing_logs DEFAULT VALUES RETURNING {SELECT_COLUMNS}"
    ))
    .fetch_one(pool)
    .await?;
    Ok(log)
}

pub async fn complete_run(
    pool: &PgPool,
    id: i64,
    total_found: i32,
    new_added: i32,
    duplicates: i32,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE parsing_logs
        SET finished_at = now(), total_found = $2, new_added = $3,
            duplicates = $4, status = $5
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(total_found)
    .bind(new_added)
    .bind(duplicates)
    .bind(RunStatus::Completed)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fail_run(pool: &PgPool, id: i64, error_message: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE parsing_logs
        SET finished_at = now(), status = $2, error_message = $3
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(RunStatus::Failed)
    .bind(error_message)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn last_runs(pool: &PgPool, limit: i64) -> Result<Vec<ParsingLog>> {
    let logs = sqlx::query_as::<_, ParsingLog>(&format!(
        "SELECT {SELECT_COLUMNS} FROM parsing_logs ORDER BY started_at DESC LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(logs)
}
