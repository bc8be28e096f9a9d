//! Read-Only Content Collaborators
//!
//! The dispatch engine consumes contact groups and message templates but
//! never manages them; these seams expose exactly the reads it needs. The
//! SQLite implementation also carries insert helpers for tests and demo
//! seeding.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::info;

use bw_common::{ContactRecord, GroupSnapshot, MessageTemplate};

use crate::Result;

/// Read-only view of contact groups. The snapshot is taken once per call;
/// later changes to the group never affect a job created from it.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// The group's members in insertion order, or None for an unknown group
    async fn group_snapshot(&self, group_id: &str) -> Result<Option<GroupSnapshot>>;
}

/// Read-only view of stored message templates
#[async_trait]
pub trait TemplateCatalog: Send + Sync {
    async fn template(&self, message_id: &str) -> Result<Option<MessageTemplate>>;
}

pub struct SqliteContentStore {
    pool: SqlitePool,
}

impl SqliteContentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS contact_groups (\
                id TEXT PRIMARY KEY, \
                name TEXT NOT NULL)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contacts (
                id TEXT PRIMARY KEY,
                group_id TEXT NOT NULL,
                name TEXT,
                phone TEXT NOT NULL,
                variable1 TEXT,
                variable2 TEXT,
                variable3 TEXT,
                position INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_contacts_group ON contacts (group_id, position)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS message_templates (\
                id TEXT PRIMARY KEY, \
                title TEXT NOT NULL, \
                body TEXT NOT NULL, \
                image_url TEXT)",
        )
        .execute(&self.pool)
        .await?;

        info!("content store schema initialized");
        Ok(())
    }

    pub async fn insert_group(&self, id: &str, name: &str) -> Result<()> {
        sqlx::query("INSERT INTO contact_groups (id, name) VALUES (?, ?)")
            .bind(id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_contact(
        &self,
        group_id: &str,
        contact: &ContactRecord,
        position: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO contacts (id, group_id, name, phone, variable1, variable2, variable3, position) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&contact.contact_id)
        .bind(group_id)
        .bind(&contact.name)
        .bind(&contact.phone)
        .bind(&contact.variable1)
        .bind(&contact.variable2)
        .bind(&contact.variable3)
        .bind(position)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_template(&self, template: &MessageTemplate) -> Result<()> {
        sqlx::query(
            "INSERT INTO message_templates (id, title, body, image_url) VALUES (?, ?, ?, ?)",
        )
        .bind(&template.id)
        .bind(&template.title)
        .bind(&template.body)
        .bind(&template.image_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl GroupDirectory for SqliteContentStore {
    async fn group_snapshot(&self, group_id: &str) -> Result<Option<GroupSnapshot>> {
        let group = sqlx::query("SELECT id, name FROM contact_groups WHERE id = ?")
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(group) = group else {
            return Ok(None);
        };
        let group_name: String = group.get("name");

        let rows = sqlx::query(
            "SELECT id, name, phone, variable1, variable2, variable3 \
             FROM contacts WHERE group_id = ? ORDER BY position ASC",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        let contacts = rows
            .iter()
            .map(|row| ContactRecord {
                contact_id: row.get("id"),
                name: row.get("name"),
                phone: row.get("phone"),
                variable1: row.get("variable1"),
                variable2: row.get("variable2"),
                variable3: row.get("variable3"),
            })
            .collect();

        Ok(Some(GroupSnapshot {
            group_id: group_id.to_string(),
            group_name,
            contacts,
        }))
    }
}

#[async_trait]
impl TemplateCatalog for SqliteContentStore {
    async fn template(&self, message_id: &str) -> Result<Option<MessageTemplate>> {
        let row = sqlx::query("SELECT id, title, body, image_url FROM message_templates WHERE id = ?")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| MessageTemplate {
            id: row.get("id"),
            title: row.get("title"),
            body: row.get("body"),
            image_url: row.get("image_url"),
        }))
    }
}
