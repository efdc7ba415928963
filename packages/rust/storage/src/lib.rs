//! libSQL storage layer (local file mode), the system of record for notices.
//!
//! The [`Storage`] struct wraps a libSQL database holding the `notice` table
//! and the crawl-run history.
//!
//! **Access rules:**
//! - Crawl: read-write via [`Storage::open`]
//! - Index: read-only via [`Storage::open_readonly`]
//!
//! A fresh connection is taken for every operation so that no connection
//! outlives a single read or write.

mod migrations;

use std::path::Path;

use chrono::{NaiveDate, Utc};
use libsql::{Connection, Database, params};
use noticeharvest_shared::{DATE_FORMAT, Notice, NoticeHarvestError, Result};
use uuid::Uuid;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    db: Database,
    readonly: bool,
}

/// A stored crawl-run record.
#[derive(Debug, Clone)]
pub struct CrawlRun {
    pub id: String,
    pub category: String,
    pub mode: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub stats_json: Option<String>,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| NoticeHarvestError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode (used by the indexer).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(NoticeHarvestError::Storage(format!(
                "database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?;

        Ok(Self { db, readonly: true })
    }

    fn connect(&self) -> Result<Connection> {
        self.db
            .connect()
            .map_err(|e| NoticeHarvestError::Storage(e.to_string()))
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let conn = self.connect()?;
        let current_version = schema_version(&conn).await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                conn.execute_batch(migration.sql).await.map_err(|e| {
                    NoticeHarvestError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    pub async fn get_schema_version(&self) -> u32 {
        match self.connect() {
            Ok(conn) => schema_version(&conn).await,
            Err(_) => 0,
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(NoticeHarvestError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Notice operations
    // -----------------------------------------------------------------------

    /// Point lookup of the stored `posted_date` for a key.
    pub async fn get_posted_date(
        &self,
        category: &str,
        post_number: u64,
    ) -> Result<Option<NaiveDate>> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT posted_date FROM notice WHERE category = ?1 AND post_number = ?2",
                params![category, to_sql_int(post_number)?],
            )
            .await
            .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let raw: String = row
                    .get(0)
                    .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?;
                Ok(Some(parse_date(&raw)?))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(NoticeHarvestError::Storage(e.to_string())),
        }
    }

    /// Insert or fully overwrite the row keyed by `(category, post_number)`.
    ///
    /// Every column is replaced, including NULLs for a missing summary or
    /// embedding.
    pub async fn upsert_notice(&self, notice: &Notice) -> Result<()> {
        self.check_writable()?;
        let embedding_json = match &notice.embedding {
            Some(v) => Some(
                serde_json::to_string(v)
                    .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?,
            ),
            None => None,
        };
        let now = Utc::now().to_rfc3339();

        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO notice (category, post_number, title, link, summary, embedding_vector, posted_date, department, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(category, post_number) DO UPDATE SET
               title = excluded.title,
               link = excluded.link,
               summary = excluded.summary,
               embedding_vector = excluded.embedding_vector,
               posted_date = excluded.posted_date,
               department = excluded.department,
               updated_at = excluded.updated_at",
            params![
                notice.category.as_str(),
                to_sql_int(notice.post_number)?,
                notice.title.as_str(),
                notice.link.as_str(),
                notice.summary.as_deref(),
                embedding_json,
                notice.posted_date.format(DATE_FORMAT).to_string(),
                notice.department.as_deref(),
                now.as_str(),
            ],
        )
        .await
        .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Fetch a full notice row by key.
    pub async fn get_notice(&self, category: &str, post_number: u64) -> Result<Option<Notice>> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT category, post_number, title, link, summary, embedding_vector, posted_date, department
                 FROM notice WHERE category = ?1 AND post_number = ?2",
                params![category, to_sql_int(post_number)?],
            )
            .await
            .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_notice(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(NoticeHarvestError::Storage(e.to_string())),
        }
    }

    /// Notices eligible for indexing: non-empty title and summary, optionally
    /// posted on or after `since`. Ordered by key for deterministic chunking.
    pub async fn list_indexable(&self, since: Option<NaiveDate>) -> Result<Vec<Notice>> {
        let conn = self.connect()?;
        let base = "SELECT category, post_number, title, link, summary, embedding_vector, posted_date, department
                    FROM notice
                    WHERE title IS NOT NULL AND TRIM(title) <> ''
                      AND summary IS NOT NULL AND TRIM(summary) <> ''";

        let mut rows = match since {
            Some(date) => {
                let sql = format!("{base} AND posted_date >= ?1 ORDER BY category, post_number");
                conn.query(&sql, params![date.format(DATE_FORMAT).to_string()])
                    .await
            }
            None => {
                let sql = format!("{base} ORDER BY category, post_number");
                conn.query(&sql, params![]).await
            }
        }
        .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?
        {
            results.push(row_to_notice(&row)?);
        }
        Ok(results)
    }

    /// Count stored notices, optionally for one category.
    pub async fn count_notices(&self, category: Option<&str>) -> Result<u64> {
        let conn = self.connect()?;
        let mut rows = match category {
            Some(cat) => {
                conn.query(
                    "SELECT COUNT(*) FROM notice WHERE category = ?1",
                    params![cat],
                )
                .await
            }
            None => conn.query("SELECT COUNT(*) FROM notice", params![]).await,
        }
        .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0).max(0) as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(NoticeHarvestError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Crawl run history
    // -----------------------------------------------------------------------

    /// Record the start of a crawl run for one category. Returns the run ID.
    pub async fn insert_crawl_run(&self, category: &str, mode: &str) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO crawl_runs (id, category, mode, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![id.as_str(), category, mode, now.as_str()],
        )
        .await
        .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Mark a crawl run as finished and attach its stats.
    pub async fn finish_crawl_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let conn = self.connect()?;
        conn.execute(
            "UPDATE crawl_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
            params![now.as_str(), stats_json, run_id],
        )
        .await
        .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Most recent crawl runs, newest first.
    pub async fn list_crawl_runs(&self, limit: u32) -> Result<Vec<CrawlRun>> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT id, category, mode, started_at, finished_at, stats_json
                 FROM crawl_runs ORDER BY id DESC LIMIT ?1",
                params![i64::from(limit)],
            )
            .await
            .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?
        {
            results.push(CrawlRun {
                id: row
                    .get::<String>(0)
                    .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?,
                category: row
                    .get::<String>(1)
                    .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?,
                mode: row
                    .get::<String>(2)
                    .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?,
                started_at: row
                    .get::<String>(3)
                    .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?,
                finished_at: row.get::<String>(4).ok(),
                stats_json: row.get::<String>(5).ok(),
            });
        }
        Ok(results)
    }
}

async fn schema_version(conn: &Connection) -> u32 {
    let result = conn
        .query("SELECT MAX(version) FROM schema_migrations", params![])
        .await;

    match result {
        Ok(mut rows) => {
            if let Ok(Some(row)) = rows.next().await {
                row.get::<u32>(0).unwrap_or(0)
            } else {
                0
            }
        }
        Err(_) => 0, // Table doesn't exist yet
    }
}

fn to_sql_int(value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| NoticeHarvestError::validation(format!("post number {value} out of range")))
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|e| NoticeHarvestError::Storage(format!("invalid posted_date '{raw}': {e}")))
}

fn row_to_notice(row: &libsql::Row) -> Result<Notice> {
    let post_number = row
        .get::<i64>(1)
        .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?;
    let embedding = match row.get::<String>(5).ok() {
        Some(raw) => Some(
            serde_json::from_str::<Vec<f32>>(&raw)
                .map_err(|e| NoticeHarvestError::Storage(format!("invalid embedding: {e}")))?,
        ),
        None => None,
    };
    let posted_date: String = row
        .get(6)
        .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?;

    Ok(Notice {
        category: row
            .get::<String>(0)
            .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?,
        post_number: u64::try_from(post_number)
            .map_err(|_| NoticeHarvestError::Storage(format!("negative post number {post_number}")))?,
        title: row
            .get::<String>(2)
            .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?,
        link: row
            .get::<String>(3)
            .map_err(|e| NoticeHarvestError::Storage(e.to_string()))?,
        summary: row.get::<String>(4).ok(),
        embedding,
        posted_date: parse_date(&posted_date)?,
        department: row.get::<String>(7).ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("nh_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn sample_notice(post_number: u64, posted: &str) -> Notice {
        Notice {
            category: "GENERAL".into(),
            post_number,
            title: format!("Notice {post_number}"),
            department: Some("Student Affairs".into()),
            posted_date: date(posted),
            link: format!("https://example.com/view.do?list_id=FA1&seq={post_number}"),
            summary: Some("Applications close on 2024-05-31 at 18:00.".into()),
            embedding: Some(vec![0.1, 0.2, 0.3]),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("nh_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn posted_date_lookup() {
        let storage = test_storage().await;
        assert_eq!(storage.get_posted_date("GENERAL", 1506).await.unwrap(), None);

        storage
            .upsert_notice(&sample_notice(1506, "2024-05-02"))
            .await
            .expect("upsert");

        let found = storage.get_posted_date("GENERAL", 1506).await.unwrap();
        assert_eq!(found, Some(date("2024-05-02")));
        // Same post number under another category is a different key
        assert_eq!(storage.get_posted_date("ACADEMIC", 1506).await.unwrap(), None);
    }

    #[tokio::test]
    async fn upsert_overwrites_every_column() {
        let storage = test_storage().await;
        storage
            .upsert_notice(&sample_notice(1506, "2024-05-02"))
            .await
            .unwrap();

        let updated = Notice {
            title: "Notice 1506 (revised)".into(),
            posted_date: date("2024-05-09"),
            department: None,
            summary: None,
            embedding: None,
            ..sample_notice(1506, "2024-05-02")
        };
        storage.upsert_notice(&updated).await.expect("overwrite");

        let row = storage.get_notice("GENERAL", 1506).await.unwrap().unwrap();
        assert_eq!(row.title, "Notice 1506 (revised)");
        assert_eq!(row.posted_date, date("2024-05-09"));
        assert_eq!(row.department, None);
        assert_eq!(row.summary, None);
        assert_eq!(row.embedding, None);
        assert_eq!(storage.count_notices(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn embedding_roundtrips_as_json() {
        let storage = test_storage().await;
        storage
            .upsert_notice(&sample_notice(7, "2024-01-01"))
            .await
            .unwrap();
        let row = storage.get_notice("GENERAL", 7).await.unwrap().unwrap();
        assert_eq!(row.embedding, Some(vec![0.1, 0.2, 0.3]));
    }

    #[tokio::test]
    async fn list_indexable_filters_and_orders() {
        let storage = test_storage().await;
        storage
            .upsert_notice(&sample_notice(20, "2024-03-01"))
            .await
            .unwrap();
        storage
            .upsert_notice(&sample_notice(10, "2024-06-01"))
            .await
            .unwrap();
        let mut no_summary = sample_notice(30, "2024-07-01");
        no_summary.summary = None;
        storage.upsert_notice(&no_summary).await.unwrap();
        let mut blank_summary = sample_notice(40, "2024-07-01");
        blank_summary.summary = Some("   ".into());
        storage.upsert_notice(&blank_summary).await.unwrap();

        let all = storage.list_indexable(None).await.unwrap();
        let numbers: Vec<u64> = all.iter().map(|n| n.post_number).collect();
        assert_eq!(numbers, vec![10, 20]);

        let recent = storage
            .list_indexable(Some(date("2024-06-01")))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].post_number, 10);
    }

    #[tokio::test]
    async fn crawl_run_lifecycle() {
        let storage = test_storage().await;
        let run_id = storage
            .insert_crawl_run("GENERAL", "recent")
            .await
            .expect("insert run");
        assert!(!run_id.is_empty());

        storage
            .finish_crawl_run(&run_id, r#"{"inserted": 3}"#)
            .await
            .expect("finish run");

        let runs = storage.list_crawl_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].mode, "recent");
        assert!(runs[0].finished_at.is_some());
        assert_eq!(runs[0].stats_json.as_deref(), Some(r#"{"inserted": 3}"#));
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("nh_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.upsert_notice(&sample_notice(1, "2024-01-01")).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.list_indexable(None).await.unwrap().len(), 1);
        let result = ro.upsert_notice(&sample_notice(2, "2024-01-02")).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn row_errors_surface_from_list_indexable() {
        let storage = test_storage().await;
        // Swap the table for a view whose title column fails to evaluate on
        // the second row, so stepping the cursor errors mid-scan.
        let conn = storage.connect().unwrap();
        conn.execute_batch(
            "DROP TABLE notice;
             CREATE TABLE notice_raw (category TEXT, post_number INTEGER, doc TEXT,
                                      summary TEXT, posted_date TEXT);
             INSERT INTO notice_raw VALUES ('GENERAL', 1, '{\"title\":\"ok\"}', 'body', '2024-01-01');
             INSERT INTO notice_raw VALUES ('GENERAL', 2, '{broken', 'body', '2024-01-02');
             CREATE VIEW notice AS
               SELECT category, post_number, json_extract(doc, '$.title') AS title,
                      'https://example.com' AS link, summary, NULL AS embedding_vector,
                      posted_date, NULL AS department
               FROM notice_raw;",
        )
        .await
        .expect("install failing view");

        let result = storage.list_indexable(None).await;
        assert!(matches!(result, Err(NoticeHarvestError::Storage(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn readonly_missing_file_errors() {
        let tmp = std::env::temp_dir().join(format!("nh_missing_{}.db", Uuid::now_v7()));
        assert!(Storage::open_readonly(&tmp).await.is_err());
    }
}
