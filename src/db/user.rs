use chrono::Utc;
use uuid::Uuid;

use super::{
    DBClient, StoreError,
    query::{Field, Filter, FindQuery},
};
use crate::models::User;

/// Deactivated accounts are invisible to every user query.
pub fn active_scope() -> Vec<Filter> {
    vec![Filter::ne(Field::boolean("active"), false)]
}

/// User database operations
pub trait UserExt {
    /// Active user by id
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;

    /// Active user by email, compared in lowercase
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Active user holding this reset token digest, if it has not expired
    async fn get_user_by_reset_token(&self, hashed_token: &str) -> Result<Option<User>, StoreError>;

    /// Active users among `ids`, in id order
    async fn get_users_by_ids(&self, ids: &[Uuid]) -> Result<Vec<User>, StoreError>;

    async fn save_user(&self, user: &User) -> Result<User, StoreError>;

    /// Persist changes to an existing user. `None` when it was deleted
    /// meanwhile.
    async fn update_user(&self, user: &User) -> Result<Option<User>, StoreError>;
}

impl UserExt for DBClient {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        self.find_by_id(user_id, &active_scope()).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let mut filters = active_scope();
        filters.push(Filter::eq(Field::text("email"), email.trim().to_lowercase()));
        self.find_one(filters).await
    }

    async fn get_user_by_reset_token(&self, hashed_token: &str) -> Result<Option<User>, StoreError> {
        let mut filters = active_scope();
        filters.push(Filter::eq(Field::text("passwordResetToken"), hashed_token));
        filters.push(Filter::gt(Field::time("passwordResetExpires"), Utc::now()));
        self.find_one(filters).await
    }

    async fn get_users_by_ids(&self, ids: &[Uuid]) -> Result<Vec<User>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut filters = active_scope();
        filters.push(Filter::is_in(Field::id("id"), ids.iter().copied()));
        self.find(&FindQuery::filtered(filters)).await
    }

    async fn save_user(&self, user: &User) -> Result<User, StoreError> {
        self.insert(user).await
    }

    async fn update_user(&self, user: &User) -> Result<Option<User>, StoreError> {
        self.replace(user).await
    }
}
