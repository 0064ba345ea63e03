use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::database::Database;

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub is_admin: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_logged_in: Option<DateTime<Utc>>,
}

/// Public view of a user; never includes the password hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub is_admin: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_logged_in: Option<DateTime<Utc>>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        UserProfile {
            id: user.id,
            name: user.name,
            email: user.email,
            phone: user.phone,
            is_admin: user.is_admin,
            is_active: user.is_active,
            created_at: user.created_at,
            last_logged_in: user.last_logged_in,
        }
    }
}

pub const USER_COLUMNS: &str =
    "id, name, email, phone, password_hash, is_admin, is_active, created_at, last_logged_in";

impl User {
    pub async fn find_by_email(email: &str, db: &Database) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE LOWER(email) = LOWER($1)",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&db.pool)
        .await
    }

    pub async fn find_by_id(id: i64, db: &Database) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&db.pool)
            .await
    }

    /// bcrypt is CPU-bound, so hashing runs on the blocking pool.
    pub async fn hash_password(password: String) -> anyhow::Result<String> {
        let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
            .await??;
        Ok(hash)
    }

    pub async fn verify_password(&self, password: String) -> anyhow::Result<bool> {
        let hash = self.password_hash.clone();
        let valid = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await??;
        Ok(valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_hash(hash: String) -> User {
        User {
            id: 1,
            name: "Asha".to_string(),
            email: "asha@example.com".to_string(),
            phone: None,
            password_hash: hash,
            is_admin: false,
            is_active: true,
            created_at: Utc::now(),
            last_logged_in: None,
        }
    }

    #[tokio::test]
    async fn password_hash_verifies() {
        let hash = User::hash_password("backwaters".to_string()).await.unwrap();
        let user = user_with_hash(hash);
        assert!(user.verify_password("backwaters".to_string()).await.unwrap());
        assert!(!user.verify_password("wrong".to_string()).await.unwrap());
    }

    #[test]
    fn profile_omits_password_hash() {
        let profile = UserProfile::from(user_with_hash("secret-hash".to_string()));
        let json = serde_json::to_value(&profile).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert_eq!(json["isAdmin"], false);
    }
}
