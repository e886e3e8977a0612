use crate::config::DatabaseConfig;
use crate::db::{
    ContentStore, DatabaseError, FileStore, MaintenanceStore, SubjectStore, UserStore,
};
use std::path::Path;
use std::sync::Arc;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use tracing::info;

use crate::db::models::{DatabaseExport, EXPORT_FORMAT_VERSION, ImportSummary, Role};
use crate::db::schema::schema_migrations;
use crate::db::sqlite::{
    Pool, SqliteContentStore, SqliteFileStore, SqliteMaintenanceStore, SqliteSubjectStore,
    SqliteUserStore, build_pool, now_string, run_blocking, string_to_datetime,
};

/// Ordered schema migrations. A version is applied once, inside a transaction.
const MIGRATIONS: &[(i32, &[&str])] = &[
    (
        1,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS subjects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('admin', 'teacher', 'student')),
                assigned_subject_id INTEGER REFERENCES subjects(id) ON DELETE SET NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS content (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                body TEXT NOT NULL DEFAULT '',
                type TEXT NOT NULL CHECK (type IN ('news', 'preparation', 'material')),
                subject_id INTEGER REFERENCES subjects(id) ON DELETE SET NULL,
                author_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                media_urls TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content_id INTEGER NOT NULL REFERENCES content(id) ON DELETE CASCADE,
                filename TEXT NOT NULL,
                stored_filename TEXT NOT NULL UNIQUE,
                mime_type TEXT NOT NULL,
                size INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )
            "#,
        ],
    ),
    (
        2,
        &[
            "CREATE INDEX IF NOT EXISTS idx_content_subject ON content(subject_id)",
            "CREATE INDEX IF NOT EXISTS idx_content_author ON content(author_id)",
            "CREATE INDEX IF NOT EXISTS idx_content_type_created ON content(type, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_files_content ON files(content_id)",
            "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
        ],
    ),
];

#[derive(Clone)]
pub struct DatabaseManager {
    pool: Pool,
    sqlite_path: String,
    user_store: Arc<dyn UserStore>,
    subject_store: Arc<dyn SubjectStore>,
    content_store: Arc<dyn ContentStore>,
    file_store: Arc<dyn FileStore>,
    maintenance_store: Arc<dyn MaintenanceStore>,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let path = config.sqlite_path();
        if let Some(parent) = Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::Connection(format!(
                        "cannot create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let pool = build_pool(&path, config.max_connections())?;

        Ok(Self {
            user_store: Arc::new(SqliteUserStore::new(pool.clone())),
            subject_store: Arc::new(SqliteSubjectStore::new(pool.clone())),
            content_store: Arc::new(SqliteContentStore::new(pool.clone())),
            file_store: Arc::new(SqliteFileStore::new(pool.clone())),
            maintenance_store: Arc::new(SqliteMaintenanceStore::new(pool.clone())),
            pool,
            sqlite_path: path,
        })
    }

    /// Applies pending migrations and returns the resulting schema version.
    pub async fn migrate(&self) -> Result<i32, DatabaseError> {
        let applied = run_blocking(&self.pool, |conn| {
            conn.batch_execute(
                r#"
                PRAGMA journal_mode = WAL;
                CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );
                "#,
            )
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

            let current = current_version(conn)?;
            let mut applied = Vec::new();
            for (version, statements) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
                apply_migration(conn, *version, statements)?;
                applied.push(*version);
            }
            Ok(applied)
        })
        .await?;

        for version in &applied {
            info!(version, path = %self.sqlite_path, "applied schema migration");
        }

        Ok(MIGRATIONS.last().map(|(v, _)| *v).unwrap_or(0))
    }

    /// Checks an export document before it is allowed to replace the database.
    pub fn validate_import(export: &DatabaseExport) -> Result<(), DatabaseError> {
        if export.version != EXPORT_FORMAT_VERSION {
            return Err(DatabaseError::Invalid(format!(
                "unsupported export version {} (expected {})",
                export.version, EXPORT_FORMAT_VERSION
            )));
        }
        if !export.users.iter().any(|user| user.role == Role::Admin) {
            return Err(DatabaseError::Invalid(
                "import must contain at least one admin user".to_string(),
            ));
        }

        // Timestamps are stored verbatim and parsed on every read.
        let mut timestamps: Vec<(&str, i64, &str)> = Vec::new();
        for user in &export.users {
            timestamps.push(("user", user.id, user.created_at.as_str()));
            timestamps.push(("user", user.id, user.updated_at.as_str()));
        }
        for subject in &export.subjects {
            timestamps.push(("subject", subject.id, subject.created_at.as_str()));
            timestamps.push(("subject", subject.id, subject.updated_at.as_str()));
        }
        for post in &export.content {
            timestamps.push(("content", post.id, post.created_at.as_str()));
            timestamps.push(("content", post.id, post.updated_at.as_str()));
        }
        for file in &export.files {
            timestamps.push(("file", file.id, file.created_at.as_str()));
        }
        if let Some((table, id, value)) = timestamps
            .into_iter()
            .find(|(_, _, value)| string_to_datetime(value).is_err())
        {
            return Err(DatabaseError::Invalid(format!(
                "{table} {id}: invalid timestamp {value:?}"
            )));
        }
        Ok(())
    }

    pub async fn export(&self) -> Result<DatabaseExport, DatabaseError> {
        self.maintenance_store.export_all().await
    }

    pub async fn import(&self, export: &DatabaseExport) -> Result<ImportSummary, DatabaseError> {
        Self::validate_import(export)?;
        let summary = self.maintenance_store.import_all(export).await?;
        info!(
            users = summary.users,
            subjects = summary.subjects,
            content = summary.content,
            files = summary.files,
            "database import completed"
        );
        Ok(summary)
    }

    pub fn user_store(&self) -> Arc<dyn UserStore> {
        self.user_store.clone()
    }

    pub fn subject_store(&self) -> Arc<dyn SubjectStore> {
        self.subject_store.clone()
    }

    pub fn content_store(&self) -> Arc<dyn ContentStore> {
        self.content_store.clone()
    }

    pub fn file_store(&self) -> Arc<dyn FileStore> {
        self.file_store.clone()
    }

    pub fn maintenance_store(&self) -> Arc<dyn MaintenanceStore> {
        self.maintenance_store.clone()
    }

    pub fn sqlite_path(&self) -> &str {
        &self.sqlite_path
    }
}

fn current_version(conn: &mut SqliteConnection) -> Result<i32, DatabaseError> {
    let version = schema_migrations::table
        .select(diesel::dsl::max(schema_migrations::version))
        .first::<Option<i32>>(conn)
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;
    Ok(version.unwrap_or(0))
}

fn apply_migration(
    conn: &mut SqliteConnection,
    version: i32,
    statements: &[&str],
) -> Result<(), DatabaseError> {
    conn.transaction::<_, DatabaseError, _>(|conn| {
        for statement in statements {
            diesel::sql_query(*statement)
                .execute(conn)
                .map_err(|e| DatabaseError::Migration(format!("v{}: {}", version, e)))?;
        }
        diesel::insert_into(schema_migrations::table)
            .values((
                schema_migrations::version.eq(version),
                schema_migrations::applied_at.eq(now_string()),
            ))
            .execute(conn)
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        Ok(())
    })
}
