//! SQLite Delivery Status Store
//!
//! Jobs and recipient rows live in two tables with integer status codes and
//! millisecond timestamps. Every status write is a guarded UPDATE so the
//! dispatch loop and the acknowledgment listener can race on the same row
//! without ever regressing it, and count maintenance shares the transaction
//! with the transition it reflects.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use bw_common::{
    AckStatus, JobCounts, JobState, RecipientDelivery, RecipientStatus, SendJob,
};

use crate::error::StoreError;
use crate::{AckOutcome, DeliveryStore, JobFilter, NewJob, Page, RecipientFilter, Result};

/// Derived overall status as SQL, mirroring `OverallStatus::derive` so the
/// jobs list can filter on it. The two must stay in lockstep.
const OVERALL_STATUS_CASE: &str = "CASE \
     WHEN total_contacts = 0 THEN 5 \
     WHEN created_count > 0 AND (sent_count > 0 OR delivered_count > 0 OR read_count > 0) THEN 4 \
     WHEN created_count > 0 THEN 0 \
     WHEN sent_count > 0 THEN 1 \
     WHEN delivered_count > 0 THEN 2 \
     ELSE 3 END";

const JOB_COLUMNS: &str = "id, group_id, group_name, message_id, message_title, \
     total_contacts, created_count, sent_count, delivered_count, read_count, \
     state, stopped_at_index, created_at, finished_at";

const RECIPIENT_COLUMNS: &str =
    "id, job_id, contact_id, name, phone, status, error_message, transport_message_id, sent_at";

pub struct SqliteDeliveryStore {
    pool: SqlitePool,
}

impl SqliteDeliveryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist
    pub async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS send_jobs (
                id TEXT PRIMARY KEY,
                group_id TEXT NOT NULL,
                group_name TEXT NOT NULL,
                message_id TEXT NOT NULL,
                message_title TEXT NOT NULL,
                total_contacts INTEGER NOT NULL,
                created_count INTEGER NOT NULL DEFAULT 0,
                sent_count INTEGER NOT NULL DEFAULT 0,
                delivered_count INTEGER NOT NULL DEFAULT 0,
                read_count INTEGER NOT NULL DEFAULT 0,
                state TEXT NOT NULL,
                stopped_at_index INTEGER,
                created_at INTEGER NOT NULL,
                finished_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_send_jobs_state ON send_jobs (state)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_send_jobs_created ON send_jobs (created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_recipients (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                contact_id TEXT NOT NULL,
                name TEXT,
                phone TEXT NOT NULL,
                status INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                transport_message_id TEXT,
                sent_at INTEGER,
                position INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_job_recipients_job ON job_recipients (job_id, position)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_job_recipients_tmid ON job_recipients (transport_message_id)",
        )
        .execute(&self.pool)
        .await?;

        info!("delivery store schema initialized");
        Ok(())
    }

    fn parse_job(row: &sqlx::sqlite::SqliteRow) -> Result<SendJob> {
        let created_at = from_millis(row.get("created_at"))?;
        let finished_at = row
            .get::<Option<i64>, _>("finished_at")
            .map(from_millis)
            .transpose()?;
        let state: String = row.get("state");

        Ok(SendJob {
            id: row.get("id"),
            group_id: row.get("group_id"),
            group_name: row.get("group_name"),
            message_id: row.get("message_id"),
            message_title: row.get("message_title"),
            counts: JobCounts {
                total_contacts: row.get("total_contacts"),
                created_count: row.get("created_count"),
                sent_count: row.get("sent_count"),
                delivered_count: row.get("delivered_count"),
                read_count: row.get("read_count"),
            },
            state: JobState::from_str_or_running(&state),
            stopped_at_index: row.get("stopped_at_index"),
            created_at,
            finished_at,
        })
    }

    fn parse_recipient(row: &sqlx::sqlite::SqliteRow) -> Result<RecipientDelivery> {
        let sent_at = row
            .get::<Option<i64>, _>("sent_at")
            .map(from_millis)
            .transpose()?;

        Ok(RecipientDelivery {
            id: row.get("id"),
            job_id: row.get("job_id"),
            contact_id: row.get("contact_id"),
            name: row.get("name"),
            phone: row.get("phone"),
            status: RecipientStatus::from_code(row.get("status")),
            error_message: row.get("error_message"),
            transport_message_id: row.get("transport_message_id"),
            sent_at,
        })
    }

    fn job_where_clause(filter: &JobFilter) -> String {
        let mut conds: Vec<String> = Vec::new();
        if filter.date_from.is_some() {
            conds.push("created_at >= ?".to_string());
        }
        if filter.date_to.is_some() {
            conds.push("created_at <= ?".to_string());
        }
        if filter.group_id.is_some() {
            conds.push("group_id = ?".to_string());
        }
        if filter.message_id.is_some() {
            conds.push("message_id = ?".to_string());
        }
        if filter.status.is_some() {
            conds.push(format!("({}) = ?", OVERALL_STATUS_CASE));
        }
        if filter.search.is_some() {
            conds.push("(id LIKE ? OR group_name LIKE ? OR message_title LIKE ?)".to_string());
        }
        if conds.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conds.join(" AND "))
        }
    }

    fn bind_job_filter<'q>(
        mut q: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
        filter: &'q JobFilter,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        if let Some(from) = filter.date_from {
            q = q.bind(from.timestamp_millis());
        }
        if let Some(to) = filter.date_to {
            q = q.bind(to.timestamp_millis());
        }
        if let Some(ref group_id) = filter.group_id {
            q = q.bind(group_id);
        }
        if let Some(ref message_id) = filter.message_id {
            q = q.bind(message_id);
        }
        if let Some(status) = filter.status {
            q = q.bind(status.code());
        }
        if let Some(ref search) = filter.search {
            let pattern = format!("%{}%", search);
            q = q.bind(pattern.clone()).bind(pattern.clone()).bind(pattern);
        }
        q
    }

    fn recipient_where_clause(filter: &RecipientFilter) -> String {
        let mut conds: Vec<&str> = vec!["job_id = ?"];
        if filter.status.is_some() {
            conds.push("status = ?");
        }
        if filter.search.is_some() {
            conds.push("(name LIKE ? OR phone LIKE ?)");
        }
        format!(" WHERE {}", conds.join(" AND "))
    }

    fn bind_recipient_filter<'q>(
        mut q: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
        job_id: &'q str,
        filter: &'q RecipientFilter,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        q = q.bind(job_id);
        if let Some(status) = filter.status {
            q = q.bind(status.code());
        }
        if let Some(ref search) = filter.search {
            let pattern = format!("%{}%", search);
            q = q.bind(pattern.clone()).bind(pattern);
        }
        q
    }
}

#[async_trait]
impl DeliveryStore for SqliteDeliveryStore {
    async fn create_job(&self, new_job: NewJob) -> Result<SendJob> {
        let mut tx = self.pool.begin().await?;

        // The active-job check shares the transaction with the insert so two
        // concurrent starts cannot both pass it.
        let active: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM send_jobs WHERE state = 'RUNNING'")
                .fetch_one(&mut *tx)
                .await?;
        if active > 0 {
            return Err(StoreError::JobAlreadyActive);
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let total = new_job.contacts.len() as i64;

        sqlx::query(
            "INSERT INTO send_jobs \
             (id, group_id, group_name, message_id, message_title, total_contacts, \
              created_count, sent_count, delivered_count, read_count, state, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, 0, 'RUNNING', ?)",
        )
        .bind(&job_id)
        .bind(&new_job.group_id)
        .bind(&new_job.group_name)
        .bind(&new_job.message_id)
        .bind(&new_job.message_title)
        .bind(total)
        .bind(total)
        .bind(now.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        for (position, contact) in new_job.contacts.iter().enumerate() {
            sqlx::query(
                "INSERT INTO job_recipients (id, job_id, contact_id, name, phone, status, position) \
                 VALUES (?, ?, ?, ?, ?, 0, ?)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&job_id)
            .bind(&contact.contact_id)
            .bind(&contact.name)
            .bind(&contact.phone)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(job_id = %job_id, total_contacts = total, "send job created");

        Ok(SendJob {
            id: job_id,
            group_id: new_job.group_id,
            group_name: new_job.group_name,
            message_id: new_job.message_id,
            message_title: new_job.message_title,
            counts: JobCounts {
                total_contacts: total,
                created_count: total,
                sent_count: 0,
                delivered_count: 0,
                read_count: 0,
            },
            state: JobState::Running,
            stopped_at_index: None,
            created_at: now,
            finished_at: None,
        })
    }

    async fn job(&self, job_id: &str) -> Result<Option<SendJob>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM send_jobs WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_job).transpose()
    }

    async fn active_job(&self) -> Result<Option<SendJob>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM send_jobs WHERE state = 'RUNNING' LIMIT 1",
            JOB_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_job).transpose()
    }

    async fn recipients_in_order(&self, job_id: &str) -> Result<Vec<RecipientDelivery>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM job_recipients WHERE job_id = ? ORDER BY position ASC",
            RECIPIENT_COLUMNS
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_recipient).collect()
    }

    async fn mark_sent(
        &self,
        job_id: &str,
        recipient_id: &str,
        transport_message_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(
            "UPDATE job_recipients \
             SET status = ?, transport_message_id = ?, sent_at = ? \
             WHERE id = ? AND job_id = ? AND status = 0",
        )
        .bind(RecipientStatus::Sent.code())
        .bind(transport_message_id)
        .bind(sent_at.timestamp_millis())
        .bind(recipient_id)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("UPDATE send_jobs SET sent_count = sent_count + 1 WHERE id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn mark_failed(&self, job_id: &str, recipient_id: &str, error: &str) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE job_recipients SET status = ?, error_message = ? \
             WHERE id = ? AND job_id = ? AND status = 0",
        )
        .bind(RecipientStatus::Failed.code())
        .bind(error)
        .bind(recipient_id)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    async fn apply_ack(&self, transport_message_id: &str, status: AckStatus) -> Result<AckOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT id, job_id, status FROM job_recipients WHERE transport_message_id = ? LIMIT 1",
        )
        .bind(transport_message_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(AckOutcome::UnknownMessage);
        };

        let recipient_id: String = row.get("id");
        let job_id: String = row.get("job_id");
        let current = RecipientStatus::from_code(row.get("status"));
        let new_status = status.recipient_status();

        // Applied only when the row has been Sent and the new status moves
        // it strictly forward on the ladder. The guard re-checks under the
        // write so a racing ack cannot slip a regression through.
        let res = sqlx::query(
            "UPDATE job_recipients SET status = ? WHERE id = ? AND status >= 1 AND status < ?",
        )
        .bind(new_status.code())
        .bind(&recipient_id)
        .bind(new_status.code())
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() == 0 {
            return Ok(AckOutcome::OutOfOrder { current });
        }

        let count_column = match status {
            AckStatus::Delivered => "delivered_count",
            AckStatus::Read => "read_count",
        };
        sqlx::query(&format!(
            "UPDATE send_jobs SET {col} = {col} + 1 WHERE id = ?",
            col = count_column
        ))
        .bind(&job_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            job_id = %job_id,
            recipient_id = %recipient_id,
            status = ?new_status,
            "acknowledgment applied"
        );

        Ok(AckOutcome::Applied {
            job_id,
            status: new_status,
        })
    }

    async fn finish_job(
        &self,
        job_id: &str,
        state: JobState,
        stopped_at_index: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE send_jobs SET state = ?, stopped_at_index = ?, finished_at = ? \
             WHERE id = ? AND state = 'RUNNING'",
        )
        .bind(state.as_str())
        .bind(stopped_at_index)
        .bind(Utc::now().timestamp_millis())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_jobs(&self, filter: &JobFilter, page: Page) -> Result<(Vec<SendJob>, i64)> {
        let where_sql = Self::job_where_clause(filter);

        let count_sql = format!("SELECT COUNT(*) FROM send_jobs{}", where_sql);
        let total: i64 = Self::bind_job_filter(sqlx::query(&count_sql), filter)
            .fetch_one(&self.pool)
            .await?
            .get(0);

        let page_sql = format!(
            "SELECT {} FROM send_jobs{} ORDER BY created_at DESC LIMIT ? OFFSET ?",
            JOB_COLUMNS, where_sql
        );
        let rows = Self::bind_job_filter(sqlx::query(&page_sql), filter)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        let jobs = rows
            .iter()
            .map(Self::parse_job)
            .collect::<Result<Vec<_>>>()?;
        Ok((jobs, total))
    }

    async fn list_recipients(
        &self,
        job_id: &str,
        filter: &RecipientFilter,
        page: Page,
    ) -> Result<(Vec<RecipientDelivery>, i64)> {
        let where_sql = Self::recipient_where_clause(filter);

        let count_sql = format!("SELECT COUNT(*) FROM job_recipients{}", where_sql);
        let total: i64 = Self::bind_recipient_filter(sqlx::query(&count_sql), job_id, filter)
            .fetch_one(&self.pool)
            .await?
            .get(0);

        let page_sql = format!(
            "SELECT {} FROM job_recipients{} ORDER BY position ASC LIMIT ? OFFSET ?",
            RECIPIENT_COLUMNS, where_sql
        );
        let rows = Self::bind_recipient_filter(sqlx::query(&page_sql), job_id, filter)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        let recipients = rows
            .iter()
            .map(Self::parse_recipient)
            .collect::<Result<Vec<_>>>()?;
        Ok((recipients, total))
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::CorruptRow(format!("invalid timestamp: {}", ms)))
}
