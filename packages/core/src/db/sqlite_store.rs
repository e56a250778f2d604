//! SqliteStore - libsql-backed PageStore
//!
//! Persists pages and attachments in an embedded libsql (SQLite-compatible)
//! database. Each transaction runs on its own connection opened with
//! `BEGIN IMMEDIATE`, so concurrent writers queue on the database lock (bounded by
//! `busy_timeout`) instead of failing half-way through a cascade.
//!
//! # Schema
//!
//! - `pages`: one row per page, soft-delete columns included
//! - `attachments`: files keyed by page, cascaded on hard delete
//! - `idx_pages_sibling_position`: UNIQUE over `(space_id, parent, position)`,
//!   with root-level rows folded onto `''` so NULL parents collide too
//!
//! Timestamps are RFC 3339 text with microsecond precision and a `Z` suffix, so
//! lexical comparison in SQL matches chronological order.

use crate::db::error::{StoreError, StoreResult};
use crate::db::page_store::{PageStore, PageTransaction};
use crate::models::{Attachment, Page, PagePatch};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Builder, Connection, Database, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Upper bound on ids bound into a single `IN (...)` list
const MAX_BATCH_PARAMS: usize = 500;

const PAGE_COLUMNS: &str = "id, space_id, parent_page_id, position, title, icon, creator_id, \
     last_updated_by_id, created_at, updated_at, deleted_at, deleted_by_id";

const ATTACHMENT_COLUMNS: &str = "id, page_id, space_id, file_name, created_at";

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str, column: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt_row(format!("{} '{}': {}", column, raw, e)))
}

fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

fn nullable_text(value: Option<&str>) -> Value {
    match value {
        Some(v) => Value::Text(v.to_string()),
        None => Value::Null,
    }
}

fn placeholders(count: usize, offset: usize) -> String {
    (1..=count)
        .map(|i| format!("?{}", i + offset))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Execute a PRAGMA statement
///
/// PRAGMA statements may return rows, so they go through `query()` rather than `execute()`.
async fn execute_pragma(conn: &Connection, pragma: &str) -> StoreResult<()> {
    let mut stmt = conn
        .prepare(pragma)
        .await
        .map_err(|e| StoreError::sql_execution(format!("Failed to execute '{}': {}", pragma, e)))?;
    let _ = stmt
        .query(())
        .await
        .map_err(|e| StoreError::sql_execution(format!("Failed to execute '{}': {}", pragma, e)))?;
    Ok(())
}

fn row_to_page(row: &libsql::Row) -> StoreResult<Page> {
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    let deleted_at: Option<String> = row.get(10)?;

    Ok(Page {
        id: row.get(0)?,
        space_id: row.get(1)?,
        parent_page_id: row.get(2)?,
        position: row.get(3)?,
        title: row.get(4)?,
        icon: row.get(5)?,
        creator_id: row.get(6)?,
        last_updated_by_id: row.get(7)?,
        created_at: parse_timestamp(&created_at, "created_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
        deleted_at: deleted_at
            .map(|raw| parse_timestamp(&raw, "deleted_at"))
            .transpose()?,
        deleted_by_id: row.get(11)?,
    })
}

fn row_to_attachment(row: &libsql::Row) -> StoreResult<Attachment> {
    let created_at: String = row.get(4)?;
    Ok(Attachment {
        id: row.get(0)?,
        page_id: row.get(1)?,
        space_id: row.get(2)?,
        file_name: row.get(3)?,
        created_at: parse_timestamp(&created_at, "created_at")?,
    })
}

/// libsql page store
///
/// # Examples
///
/// ```rust,no_run
/// use pagespace_core::db::SqliteStore;
/// use std::path::PathBuf;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = SqliteStore::new(PathBuf::from("./data/pages.db")).await?;
/// # Ok(())
/// # }
/// ```
pub struct SqliteStore {
    db: Arc<Database>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and initialize the schema
    ///
    /// # Errors
    ///
    /// - `DirectoryCreationFailed` if the parent directory cannot be created
    /// - `ConnectionFailed` if libsql cannot open the file
    /// - `SqlExecution` if schema setup fails
    pub async fn new(db_path: PathBuf) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| StoreError::connection_failed(db_path.clone(), e))?;

        let store = Self {
            db: Arc::new(db),
            db_path,
        };
        store.initialize_schema().await?;

        tracing::info!("Opened page store at {}", store.db_path.display());
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Open a connection with the per-connection pragmas applied
    async fn connect(&self) -> StoreResult<Connection> {
        let conn = self
            .db
            .connect()
            .map_err(|e| StoreError::connection_failed(self.db_path.clone(), e))?;
        execute_pragma(&conn, "PRAGMA busy_timeout = 5000").await?;
        execute_pragma(&conn, "PRAGMA foreign_keys = ON").await?;
        Ok(conn)
    }

    async fn initialize_schema(&self) -> StoreResult<()> {
        let conn = self.connect().await?;
        execute_pragma(&conn, "PRAGMA journal_mode = WAL").await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS pages (
                id TEXT PRIMARY KEY,
                space_id TEXT NOT NULL,
                parent_page_id TEXT REFERENCES pages(id),
                position TEXT NOT NULL,
                title TEXT,
                icon TEXT,
                creator_id TEXT,
                last_updated_by_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT,
                deleted_by_id TEXT
            )",
            (),
        )
        .await
        .map_err(|e| StoreError::sql_execution(format!("Failed to create pages table: {}", e)))?;

        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_pages_sibling_position
             ON pages(space_id, COALESCE(parent_page_id, ''), position)",
            (),
        )
        .await
        .map_err(|e| {
            StoreError::sql_execution(format!("Failed to create sibling position index: {}", e))
        })?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_pages_parent ON pages(parent_page_id)",
            (),
        )
        .await
        .map_err(|e| StoreError::sql_execution(format!("Failed to create parent index: {}", e)))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_pages_space_deleted ON pages(space_id, deleted_at)",
            (),
        )
        .await
        .map_err(|e| StoreError::sql_execution(format!("Failed to create space index: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS attachments (
                id TEXT PRIMARY KEY,
                page_id TEXT NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
                space_id TEXT NOT NULL,
                file_name TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            (),
        )
        .await
        .map_err(|e| {
            StoreError::sql_execution(format!("Failed to create attachments table: {}", e))
        })?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_attachments_page ON attachments(page_id)",
            (),
        )
        .await
        .map_err(|e| {
            StoreError::sql_execution(format!("Failed to create attachment index: {}", e))
        })?;

        Ok(())
    }
}

#[async_trait]
impl PageStore for SqliteStore {
    async fn begin(&self) -> StoreResult<Box<dyn PageTransaction>> {
        let conn = self.connect().await?;
        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| StoreError::from_sql("Failed to begin transaction", e))?;
        Ok(Box::new(SqliteTransaction { conn: Some(conn) }))
    }
}

/// Transaction on a dedicated connection
///
/// Dropping without `commit` closes the connection, which rolls back.
struct SqliteTransaction {
    conn: Option<Connection>,
}

impl SqliteTransaction {
    fn conn(&self) -> StoreResult<&Connection> {
        self.conn.as_ref().ok_or(StoreError::TransactionClosed)
    }

    async fn query_pages(&self, sql: &str, params: Vec<Value>) -> StoreResult<Vec<Page>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(sql)
            .await
            .map_err(|e| StoreError::from_sql("Failed to prepare page query", e))?;
        let mut rows = stmt
            .query(params)
            .await
            .map_err(|e| StoreError::from_sql("Failed to query pages", e))?;

        let mut pages = Vec::new();
        while let Some(row) = rows.next().await? {
            pages.push(row_to_page(&row)?);
        }
        Ok(pages)
    }

    /// Build the SET clause for `patch`, numbering parameters from `?1`
    fn set_clause(patch: &PagePatch) -> (String, Vec<Value>) {
        let mut columns = Vec::new();
        let mut params = Vec::new();

        if let Some(parent) = &patch.parent_page_id {
            columns.push("parent_page_id");
            params.push(nullable_text(parent.as_deref()));
        }
        if let Some(space_id) = &patch.space_id {
            columns.push("space_id");
            params.push(text(space_id.as_str()));
        }
        if let Some(position) = &patch.position {
            columns.push("position");
            params.push(text(position.as_str()));
        }
        if let Some(deleted_at) = &patch.deleted_at {
            columns.push("deleted_at");
            params.push(match deleted_at {
                Some(ts) => text(format_timestamp(ts)),
                None => Value::Null,
            });
        }
        if let Some(deleted_by) = &patch.deleted_by_id {
            columns.push("deleted_by_id");
            params.push(nullable_text(deleted_by.as_deref()));
        }
        if let Some(updated_by) = &patch.last_updated_by_id {
            columns.push("last_updated_by_id");
            params.push(nullable_text(updated_by.as_deref()));
        }
        columns.push("updated_at");
        params.push(text(format_timestamp(&Utc::now())));

        let clause = columns
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{} = ?{}", column, i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        (clause, params)
    }
}

#[async_trait]
impl PageTransaction for SqliteTransaction {
    async fn find_by_id(&mut self, id: &str) -> StoreResult<Option<Page>> {
        let sql = format!("SELECT {} FROM pages WHERE id = ?1", PAGE_COLUMNS);
        Ok(self.query_pages(&sql, vec![text(id)]).await?.into_iter().next())
    }

    async fn insert(&mut self, page: &Page) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO pages ({}) VALUES ({})",
            PAGE_COLUMNS,
            placeholders(12, 0)
        );
        let params = vec![
            text(page.id.as_str()),
            text(page.space_id.as_str()),
            nullable_text(page.parent_page_id.as_deref()),
            text(page.position.as_str()),
            nullable_text(page.title.as_deref()),
            nullable_text(page.icon.as_deref()),
            nullable_text(page.creator_id.as_deref()),
            nullable_text(page.last_updated_by_id.as_deref()),
            text(format_timestamp(&page.created_at)),
            text(format_timestamp(&page.updated_at)),
            page.deleted_at
                .as_ref()
                .map(|ts| text(format_timestamp(ts)))
                .unwrap_or(Value::Null),
            nullable_text(page.deleted_by_id.as_deref()),
        ];
        self.conn()?
            .execute(&sql, params)
            .await
            .map_err(|e| StoreError::from_insert(&page.id, e))?;
        Ok(())
    }

    async fn update_one(&mut self, id: &str, patch: &PagePatch) -> StoreResult<u64> {
        self.update_many(&[id.to_string()], patch).await
    }

    async fn update_many(&mut self, ids: &[String], patch: &PagePatch) -> StoreResult<u64> {
        let (clause, base_params) = Self::set_clause(patch);
        let conn = self.conn()?;
        let mut changed = 0;
        for chunk in ids.chunks(MAX_BATCH_PARAMS) {
            let sql = format!(
                "UPDATE pages SET {} WHERE id IN ({})",
                clause,
                placeholders(chunk.len(), base_params.len())
            );
            let mut params = base_params.clone();
            params.extend(chunk.iter().map(|id| text(id.as_str())));
            changed += conn
                .execute(&sql, params)
                .await
                .map_err(|e| StoreError::from_sql("Failed to update pages", e))?;
        }
        Ok(changed)
    }

    async fn delete_one(&mut self, id: &str) -> StoreResult<u64> {
        self.conn()?
            .execute("DELETE FROM pages WHERE id = ?1", vec![text(id)])
            .await
            .map_err(|e| StoreError::from_sql(&format!("Failed to delete page {}", id), e))
    }

    async fn delete_many(&mut self, ids: &[String]) -> StoreResult<u64> {
        let conn = self.conn()?;
        let mut removed = 0;
        // Chunks preserve caller order, so descendants go before ancestors
        for chunk in ids.chunks(MAX_BATCH_PARAMS) {
            let sql = format!(
                "DELETE FROM pages WHERE id IN ({})",
                placeholders(chunk.len(), 0)
            );
            let params: Vec<Value> = chunk.iter().map(|id| text(id.as_str())).collect();
            removed += conn
                .execute(&sql, params)
                .await
                .map_err(|e| StoreError::from_sql("Failed to delete pages", e))?;
        }
        Ok(removed)
    }

    async fn find_children(
        &mut self,
        space_id: &str,
        parent_id: Option<&str>,
        include_deleted: bool,
    ) -> StoreResult<Vec<Page>> {
        let sql = format!(
            "SELECT {} FROM pages WHERE space_id = ?1 AND parent_page_id IS ?2{} ORDER BY position, id",
            PAGE_COLUMNS,
            if include_deleted { "" } else { " AND deleted_at IS NULL" }
        );
        self.query_pages(&sql, vec![text(space_id), nullable_text(parent_id)])
            .await
    }

    async fn last_sibling_position(
        &mut self,
        space_id: &str,
        parent_id: Option<&str>,
    ) -> StoreResult<Option<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT MAX(position) FROM pages WHERE space_id = ?1 AND parent_page_id IS ?2")
            .await
            .map_err(|e| StoreError::from_sql("Failed to prepare sibling query", e))?;
        let mut rows = stmt
            .query(vec![text(space_id), nullable_text(parent_id)])
            .await
            .map_err(|e| StoreError::from_sql("Failed to query last sibling", e))?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<Option<String>>(0)?),
            None => Ok(None),
        }
    }

    async fn has_children(&mut self, parent_id: &str, include_deleted: bool) -> StoreResult<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM pages WHERE parent_page_id = ?1{})",
            if include_deleted { "" } else { " AND deleted_at IS NULL" }
        );
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&sql)
            .await
            .map_err(|e| StoreError::from_sql("Failed to prepare children check", e))?;
        let mut rows = stmt
            .query([parent_id])
            .await
            .map_err(|e| StoreError::from_sql("Failed to check children", e))?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)? != 0),
            None => Ok(false),
        }
    }

    async fn find_by_space(&mut self, space_id: &str) -> StoreResult<Vec<Page>> {
        let sql = format!(
            "SELECT {} FROM pages WHERE space_id = ?1 ORDER BY position, id",
            PAGE_COLUMNS
        );
        self.query_pages(&sql, vec![text(space_id)]).await
    }

    async fn find_deleted(
        &mut self,
        space_id: &str,
        before: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<Page>> {
        let mut params = vec![text(space_id)];
        let cutoff = match before {
            Some(ts) => {
                params.push(text(format_timestamp(&ts)));
                " AND deleted_at < ?2"
            }
            None => "",
        };
        let sql = format!(
            "SELECT {} FROM pages WHERE space_id = ?1 AND deleted_at IS NOT NULL{} ORDER BY position, id",
            PAGE_COLUMNS, cutoff
        );
        self.query_pages(&sql, params).await
    }

    async fn insert_attachment(&mut self, attachment: &Attachment) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO attachments ({}) VALUES (?1, ?2, ?3, ?4, ?5)",
            ATTACHMENT_COLUMNS
        );
        self.conn()?
            .execute(
                &sql,
                vec![
                    text(attachment.id.as_str()),
                    text(attachment.page_id.as_str()),
                    text(attachment.space_id.as_str()),
                    text(attachment.file_name.as_str()),
                    text(format_timestamp(&attachment.created_at)),
                ],
            )
            .await
            .map_err(|e| StoreError::from_sql("Failed to insert attachment", e))?;
        Ok(())
    }

    async fn find_attachments(&mut self, page_ids: &[String]) -> StoreResult<Vec<Attachment>> {
        let conn = self.conn()?;
        let mut attachments = Vec::new();
        for chunk in page_ids.chunks(MAX_BATCH_PARAMS) {
            let sql = format!(
                "SELECT {} FROM attachments WHERE page_id IN ({}) ORDER BY created_at, id",
                ATTACHMENT_COLUMNS,
                placeholders(chunk.len(), 0)
            );
            let mut stmt = conn
                .prepare(&sql)
                .await
                .map_err(|e| StoreError::from_sql("Failed to prepare attachment query", e))?;
            let params: Vec<Value> = chunk.iter().map(|id| text(id.as_str())).collect();
            let mut rows = stmt
                .query(params)
                .await
                .map_err(|e| StoreError::from_sql("Failed to query attachments", e))?;
            while let Some(row) = rows.next().await? {
                attachments.push(row_to_attachment(&row)?);
            }
        }
        Ok(attachments)
    }

    async fn reassign_attachments(&mut self, page_ids: &[String], space_id: &str) -> StoreResult<u64> {
        let conn = self.conn()?;
        let mut changed = 0;
        for chunk in page_ids.chunks(MAX_BATCH_PARAMS) {
            let sql = format!(
                "UPDATE attachments SET space_id = ?1 WHERE page_id IN ({})",
                placeholders(chunk.len(), 1)
            );
            let mut params = vec![text(space_id)];
            params.extend(chunk.iter().map(|id| text(id.as_str())));
            changed += conn
                .execute(&sql, params)
                .await
                .map_err(|e| StoreError::from_sql("Failed to reassign attachments", e))?;
        }
        Ok(changed)
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let conn = self.conn.take().ok_or(StoreError::TransactionClosed)?;
        if let Err(e) = conn.execute("COMMIT", ()).await {
            let _rollback = conn.execute("ROLLBACK", ()).await;
            return Err(StoreError::from_sql("Failed to commit transaction", e));
        }
        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        let conn = self.conn.take().ok_or(StoreError::TransactionClosed)?;
        conn.execute("ROLLBACK", ())
            .await
            .map_err(|e| StoreError::from_sql("Failed to roll back transaction", e))?;
        Ok(())
    }
}
