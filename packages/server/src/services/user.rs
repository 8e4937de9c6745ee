use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use tracing::info;
use uuid::Uuid;

use crate::entity::user;
use crate::error::{Result, ServiceError};
use crate::state::AppState;

fn user_key(user_id: &str) -> String {
    format!("user:{user_id}")
}

pub async fn create_user(state: &AppState, username: String, name: String) -> Result<String> {
    let user_id = Uuid::new_v4().to_string();
    let row = user::ActiveModel {
        id: Set(user_id.clone()),
        username: Set(username),
        name: Set(name),
        created_at: Set(Utc::now()),
    };
    row.insert(&state.db).await?;
    info!(user_id, "User created");
    Ok(user_id)
}

pub async fn fetch_user(state: &AppState, user_id: &str) -> Result<user::Model> {
    state
        .cache
        .read_through(&user_key(user_id), || async {
            user::Entity::find_by_id(user_id)
                .one(&state.db)
                .await?
                .ok_or(ServiceError::NotFound("user"))
        })
        .await?
}
