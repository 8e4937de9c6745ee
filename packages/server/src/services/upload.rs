//! One-shot upload session tokens handed to the (external) ingestion flow.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, ModelTrait, TransactionTrait, Set};
use tracing::info;
use uuid::Uuid;

use crate::entity::upload_session;
use crate::error::{Result, ServiceError};
use crate::state::AppState;

/// Open an upload session. `replace_problem_id` marks the session as a
/// replacement of an existing problem rather than a fresh one.
pub async fn create_upload_session(
    state: &AppState,
    contest_id: &str,
    replace_problem_id: Option<String>,
) -> Result<String> {
    let token = Uuid::new_v4().to_string();
    let row = upload_session::ActiveModel {
        id: Set(token.clone()),
        contest_id: Set(contest_id.to_string()),
        replace_problem_id: Set(replace_problem_id),
        created_at: Set(Utc::now()),
    };
    row.insert(&state.db).await?;
    info!(contest_id, "Upload session opened");
    Ok(token)
}

/// Redeem an upload session token. Find-and-delete in one transaction, so a
/// token is consumed exactly once; a second redemption sees NotFound.
pub async fn consume_upload_session(
    state: &AppState,
    token: &str,
) -> Result<upload_session::Model> {
    let txn = state.db.begin().await?;
    let session = upload_session::Entity::find_by_id(token)
        .one(&txn)
        .await?
        .ok_or(ServiceError::NotFound("upload session"))?;
    session.clone().delete(&txn).await?;
    txn.commit().await?;
    Ok(session)
}
