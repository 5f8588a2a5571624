//! SQLite database operations
//!
//! All database access goes through this module.

use chrono::Utc;
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use crate::error::AppError;

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Connect to the SQLite database and run migrations
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Persistence(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Account (single user)
    // =========================================================================

    /// Get the single local account
    pub async fn get_account(&self) -> Result<Option<Account>, AppError> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM account LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        Ok(account)
    }

    /// Get the local account if it has the given username
    pub async fn get_account_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Account>, AppError> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM account WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(account)
    }

    /// Insert the account only when the table is empty.
    ///
    /// # Returns
    /// `true` if inserted, `false` if an account already existed.
    pub async fn insert_account_if_empty(&self, account: &Account) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO account (
                id, username, display_name, private_key_pem, public_key_pem,
                created_at, updated_at
            )
            SELECT ?, ?, ?, ?, ?, ?, ?
            WHERE NOT EXISTS (SELECT 1 FROM account)
            "#,
        )
        .bind(&account.id)
        .bind(&account.username)
        .bind(&account.display_name)
        .bind(&account.private_key_pem)
        .bind(&account.public_key_pem)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Update username and display name, keeping the key pair.
    pub async fn update_account_profile(
        &self,
        id: &str,
        username: &str,
        display_name: Option<&str>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE account SET username = ?, display_name = ?, updated_at = ? WHERE id = ?",
        )
        .bind(username)
        .bind(display_name)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Outgoing activities
    // =========================================================================

    /// Persist an outgoing activity
    pub async fn insert_activity(&self, activity: &StoredActivity) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO activities (id, uri, actor, activity_type, payload, public, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&activity.id)
        .bind(&activity.uri)
        .bind(&activity.actor)
        .bind(&activity.activity_type)
        .bind(&activity.payload)
        .bind(activity.public)
        .bind(activity.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get an outgoing activity by its ActivityPub id
    pub async fn get_activity_by_uri(&self, uri: &str) -> Result<Option<StoredActivity>, AppError> {
        let activity =
            sqlx::query_as::<_, StoredActivity>("SELECT * FROM activities WHERE uri = ?")
                .bind(uri)
                .fetch_optional(&self.pool)
                .await?;

        Ok(activity)
    }

    /// Newest-first public outgoing activities of one actor
    pub async fn get_public_activities_by_actor(
        &self,
        actor: &str,
        limit: usize,
    ) -> Result<Vec<StoredActivity>, AppError> {
        let activities = sqlx::query_as::<_, StoredActivity>(
            r#"
            SELECT * FROM activities
            WHERE actor = ? AND public = 1
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(actor)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(activities)
    }

    /// Count public outgoing activities of one actor
    pub async fn count_public_activities_by_actor(&self, actor: &str) -> Result<i64, AppError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM activities WHERE actor = ? AND public = 1")
                .bind(actor)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    // =========================================================================
    // Inbound activities
    // =========================================================================

    /// Record a verified inbound activity.
    ///
    /// # Returns
    /// `false` if an activity with the same id was already recorded.
    pub async fn record_inbound_activity(
        &self,
        activity: &InboundActivity,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO inbound_activities (
                activity_id, actor, activity_type, key_id, payload, received_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&activity.activity_id)
        .bind(&activity.actor)
        .bind(&activity.activity_type)
        .bind(&activity.key_id)
        .bind(&activity.payload)
        .bind(activity.received_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Get a recorded inbound activity by id
    pub async fn get_inbound_activity(
        &self,
        activity_id: &str,
    ) -> Result<Option<InboundActivity>, AppError> {
        let activity = sqlx::query_as::<_, InboundActivity>(
            "SELECT * FROM inbound_activities WHERE activity_id = ?",
        )
        .bind(activity_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(activity)
    }

    // =========================================================================
    // Shared inboxes
    // =========================================================================

    /// Remember a shared inbox.
    ///
    /// # Returns
    /// `true` if the inbox was not known before.
    pub async fn insert_shared_inbox(&self, inbox_uri: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO shared_inboxes (inbox_uri, discovered_at) VALUES (?, ?)",
        )
        .bind(inbox_uri)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// All remembered shared inboxes
    pub async fn get_all_shared_inboxes(&self) -> Result<Vec<String>, AppError> {
        let inboxes: Vec<String> =
            sqlx::query_scalar("SELECT inbox_uri FROM shared_inboxes ORDER BY inbox_uri")
                .fetch_all(&self.pool)
                .await?;

        Ok(inboxes)
    }
}
