//! SQL migration definitions for the NoticeHarvest database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: notice",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per (category, post_number); every write overwrites all columns
CREATE TABLE IF NOT EXISTS notice (
    category         TEXT NOT NULL,
    post_number      INTEGER NOT NULL,
    title            TEXT NOT NULL,
    link             TEXT NOT NULL,
    summary          TEXT,
    embedding_vector TEXT,
    posted_date      TEXT NOT NULL,
    department       TEXT,
    updated_at       TEXT NOT NULL,
    PRIMARY KEY (category, post_number)
);

CREATE INDEX IF NOT EXISTS idx_notice_posted_date ON notice(posted_date);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Crawl run history",
            sql: r#"
CREATE TABLE IF NOT EXISTS crawl_runs (
    id          TEXT PRIMARY KEY,
    category    TEXT NOT NULL,
    mode        TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

CREATE INDEX IF NOT EXISTS idx_crawl_runs_category ON crawl_runs(category);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
