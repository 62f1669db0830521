use sqlx::PgPool;

use crate::error::Result;
use crate::types::{ActionKind, ManagerAction};

/// Append one audit entry. Audit rows are never updated or deleted.
pub async fn record(
    pool: &PgPool,
    announcement_id: i64,
    manager_id: i64,
    manager_name: &str,
    chat_id: i64,
    action: ActionKind,
    comment: Option<&str>,
) -> Result<ManagerAction> {
    let recorded = sqlx::query_as::<_, ManagerAction>(
        r#"
        INSERT INTO manager_actions
            (announcement_id, manager_id, manager_name, chat_id, action, comment)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, announcement_id, manager_id, manager_name, chat_id,
                  action, comment, created_at
        "#,
    )
    .bind(announcement_id)
    .bind(manager_id)
    .bind(manager_name)
    .bind(chat_id)
    .bind(action)
    .bind(comment)
    .fetch_one(pool)
    .await?;
    Ok(recorded)
}

pub async fn by_announcement(pool: &PgPool, announcement_id: i64) -> Result<Vec<ManagerAction>> {
    let actions = sqlx::query_as::<_, ManagerAction>(
        r#"
        SELECT id, announcement_id, manager_id, manager_name, chat_id,
               action, comment, created_at
        FROM manager_actions
        WHERE announcement_id = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(announcement_id)
    .fetch_all(pool)
    .await?;
    Ok(actions)
}

pub async fn recent_by_manager(
    pool: &PgPool,
    manager_id: i64,
    limit: i64,
) -> Result<Vec<ManagerAction>> {
    let actions = sqlx::query_as::<_, ManagerAction>(
        r#"
        SELECT id, announcement_id, manager_id, manager_name, chat_id,
               action, comment, created_at
        FROM manager_actions
        WHERE manager_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(manager_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(actions)
}
