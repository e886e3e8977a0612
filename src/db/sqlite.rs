use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection};
use diesel::sql_types::BigInt;
use diesel::sqlite::{Sqlite, SqliteConnection};
use tracing::warn;

use crate::db::schema::{content, files, subjects, users};

use super::{
    DatabaseError,
    models::{
        Content, ContentChanges, ContentFilter, ContentType, DatabaseExport, EXPORT_FORMAT_VERSION,
        ExportedContent, ExportedFile, ExportedSubject, ExportedUser, FileRecord, ImportSummary,
        NewContent, NewFileRecord, NewSubject, NewUser, Page, PageRequest, Role, Stats, Subject,
        SubjectChanges, User, UserChanges, UserCredentials,
    },
};

pub type Pool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

diesel::define_sql_function! {
    fn last_insert_rowid() -> BigInt;
}

#[derive(Debug)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
        conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .map_err(r2d2::Error::QueryError)
    }
}

pub fn build_pool(path: &str, max_connections: u32) -> Result<Pool, DatabaseError> {
    let manager = ConnectionManager::<SqliteConnection>::new(path);
    r2d2::Pool::builder()
        .max_size(max_connections)
        .connection_customizer(Box::new(SqlitePragmas))
        .build(manager)
        .map_err(|e| DatabaseError::Connection(e.to_string()))
}

/// Runs `f` on a pooled connection inside the blocking thread pool.
pub(crate) async fn run_blocking<T, F>(pool: &Pool, f: F) -> Result<T, DatabaseError>
where
    T: Send + 'static,
    F: FnOnce(&mut SqliteConnection) -> Result<T, DatabaseError> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        f(&mut *conn)
    })
    .await
    .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
}

pub(crate) fn now_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// Accepts RFC 3339 as written by this crate and SQLite's `datetime('now')` form.
pub(crate) fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| DatabaseError::Query(format!("invalid datetime format: {}", e)))
}

/// Builds a `LIKE` pattern matching `term` anywhere, with wildcards escaped by `\`.
pub(crate) fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

fn last_id(conn: &mut SqliteConnection) -> Result<i32, DatabaseError> {
    let id = diesel::select(last_insert_rowid()).get_result::<i64>(conn)?;
    i32::try_from(id)
        .map_err(|_| DatabaseError::Query(format!("rowid {id} exceeds INTEGER key range")))
}

/// Narrows an API id to the key width of the schema. Larger ids never name a row.
pub(crate) fn row_key(id: i64) -> Result<i32, DatabaseError> {
    i32::try_from(id).map_err(|_| DatabaseError::Invalid(format!("id {id} is out of range")))
}

fn parse_media_urls(content_id: i32, raw: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_else(|err| {
        warn!(content_id, "malformed media_urls column: {}", err);
        Vec::new()
    })
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(Sqlite))]
struct DbUser {
    id: i32,
    username: String,
    password_hash: String,
    role: String,
    assigned_subject_id: Option<i32>,
    created_at: String,
    updated_at: String,
}

impl DbUser {
    fn to_user(&self) -> Result<User, DatabaseError> {
        Ok(User {
            id: self.id as i64,
            username: self.username.clone(),
            role: self.role.parse::<Role>().map_err(DatabaseError::Query)?,
            assigned_subject_id: self.assigned_subject_id.map(i64::from),
            created_at: string_to_datetime(&self.created_at)?,
            updated_at: string_to_datetime(&self.updated_at)?,
        })
    }

    fn into_credentials(self) -> Result<UserCredentials, DatabaseError> {
        let user = self.to_user()?;
        Ok(UserCredentials {
            user,
            password_hash: self.password_hash,
        })
    }

    fn into_exported(self) -> Result<ExportedUser, DatabaseError> {
        Ok(ExportedUser {
            id: self.id as i64,
            role: self.role.parse::<Role>().map_err(DatabaseError::Query)?,
            username: self.username,
            password_hash: self.password_hash,
            assigned_subject_id: self.assigned_subject_id.map(i64::from),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUserRow<'a> {
    id: Option<i32>,
    username: &'a str,
    password_hash: &'a str,
    role: &'a str,
    assigned_subject_id: Option<i32>,
    created_at: &'a str,
    updated_at: &'a str,
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
struct UserChangeset<'a> {
    username: Option<&'a str>,
    password_hash: Option<&'a str>,
    role: Option<&'a str>,
    assigned_subject_id: Option<Option<i32>>,
    updated_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = subjects)]
#[diesel(check_for_backend(Sqlite))]
struct DbSubject {
    id: i32,
    name: String,
    description: Option<String>,
    created_at: String,
    updated_at: String,
}

impl DbSubject {
    fn to_subject(&self, content_count: i64) -> Result<Subject, DatabaseError> {
        Ok(Subject {
            id: self.id as i64,
            name: self.name.clone(),
            description: self.description.clone(),
            content_count,
            created_at: string_to_datetime(&self.created_at)?,
            updated_at: string_to_datetime(&self.updated_at)?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = subjects)]
struct NewSubjectRow<'a> {
    id: Option<i32>,
    name: &'a str,
    description: Option<&'a str>,
    created_at: &'a str,
    updated_at: &'a str,
}

#[derive(AsChangeset)]
#[diesel(table_name = subjects)]
struct SubjectChangeset<'a> {
    name: Option<&'a str>,
    description: Option<Option<&'a str>>,
    updated_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = content)]
#[diesel(check_for_backend(Sqlite))]
struct DbContent {
    id: i32,
    title: String,
    body: String,
    kind: String,
    subject_id: Option<i32>,
    author_id: Option<i32>,
    media_urls: String,
    created_at: String,
    updated_at: String,
}

impl DbContent {
    fn to_content(
        &self,
        subject_name: Option<String>,
        author_username: Option<String>,
    ) -> Result<Content, DatabaseError> {
        Ok(Content {
            id: self.id as i64,
            title: self.title.clone(),
            body: self.body.clone(),
            kind: self.kind.parse::<ContentType>().map_err(DatabaseError::Query)?,
            subject_id: self.subject_id.map(i64::from),
            subject_name,
            author_id: self.author_id.map(i64::from),
            author_username,
            media_urls: parse_media_urls(self.id, &self.media_urls),
            files: None,
            created_at: string_to_datetime(&self.created_at)?,
            updated_at: string_to_datetime(&self.updated_at)?,
        })
    }

    fn into_exported(self) -> Result<ExportedContent, DatabaseError> {
        Ok(ExportedContent {
            id: self.id as i64,
            kind: self.kind.parse::<ContentType>().map_err(DatabaseError::Query)?,
            media_urls: parse_media_urls(self.id, &self.media_urls),
            title: self.title,
            body: self.body,
            subject_id: self.subject_id.map(i64::from),
            author_id: self.author_id.map(i64::from),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = content)]
struct NewContentRow<'a> {
    id: Option<i32>,
    title: &'a str,
    body: &'a str,
    kind: &'a str,
    subject_id: Option<i32>,
    author_id: Option<i32>,
    media_urls: String,
    created_at: &'a str,
    updated_at: &'a str,
}

#[derive(AsChangeset)]
#[diesel(table_name = content)]
struct ContentChangeset<'a> {
    title: Option<&'a str>,
    body: Option<&'a str>,
    kind: Option<&'a str>,
    subject_id: Option<Option<i32>>,
    media_urls: Option<String>,
    updated_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = files)]
#[diesel(check_for_backend(Sqlite))]
struct DbFile {
    id: i32,
    content_id: i32,
    filename: String,
    stored_filename: String,
    mime_type: String,
    size: i64,
    created_at: String,
}

impl DbFile {
    fn to_file_record(&self) -> Result<FileRecord, DatabaseError> {
        Ok(FileRecord {
            id: self.id as i64,
            content_id: self.content_id as i64,
            filename: self.filename.clone(),
            stored_filename: self.stored_filename.clone(),
            mime_type: self.mime_type.clone(),
            size: self.size,
            url: FileRecord::public_url(&self.stored_filename),
            created_at: string_to_datetime(&self.created_at)?,
        })
    }

    fn into_exported(self) -> ExportedFile {
        ExportedFile {
            id: self.id as i64,
            content_id: self.content_id as i64,
            filename: self.filename,
            stored_filename: self.stored_filename,
            mime_type: self.mime_type,
            size: self.size,
            created_at: self.created_at,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = files)]
struct NewFileRow<'a> {
    id: Option<i32>,
    content_id: i32,
    filename: &'a str,
    stored_filename: &'a str,
    mime_type: &'a str,
    size: i64,
    created_at: &'a str,
}

fn load_user(conn: &mut SqliteConnection, user_id: i32) -> Result<Option<DbUser>, DatabaseError> {
    Ok(users::table
        .find(user_id)
        .select(DbUser::as_select())
        .first::<DbUser>(conn)
        .optional()?)
}

fn load_subject(
    conn: &mut SqliteConnection,
    subject_id: i32,
) -> Result<Option<Subject>, DatabaseError> {
    let row = subjects::table
        .find(subject_id)
        .select(DbSubject::as_select())
        .first::<DbSubject>(conn)
        .optional()?;

    match row {
        Some(row) => {
            let count = content::table
                .filter(content::subject_id.eq(subject_id))
                .count()
                .get_result::<i64>(conn)?;
            row.to_subject(count).map(Some)
        }
        None => Ok(None),
    }
}

/// Resolves author and subject names for a batch of rows with two lookups.
fn hydrate_content(
    conn: &mut SqliteConnection,
    rows: Vec<DbContent>,
) -> Result<Vec<Content>, DatabaseError> {
    let author_ids: Vec<i32> = rows.iter().filter_map(|row| row.author_id).collect();
    let subject_ids: Vec<i32> = rows.iter().filter_map(|row| row.subject_id).collect();

    let authors: HashMap<i32, String> = if author_ids.is_empty() {
        HashMap::new()
    } else {
        users::table
            .filter(users::id.eq_any(author_ids))
            .select((users::id, users::username))
            .load::<(i32, String)>(conn)?
            .into_iter()
            .collect()
    };

    let subject_names: HashMap<i32, String> = if subject_ids.is_empty() {
        HashMap::new()
    } else {
        subjects::table
            .filter(subjects::id.eq_any(subject_ids))
            .select((subjects::id, subjects::name))
            .load::<(i32, String)>(conn)?
            .into_iter()
            .collect()
    };

    rows.iter()
        .map(|row| {
            row.to_content(
                row.subject_id.and_then(|id| subject_names.get(&id).cloned()),
                row.author_id.and_then(|id| authors.get(&id).cloned()),
            )
        })
        .collect()
}

fn load_content(
    conn: &mut SqliteConnection,
    content_id: i32,
) -> Result<Option<Content>, DatabaseError> {
    let row = content::table
        .find(content_id)
        .select(DbContent::as_select())
        .first::<DbContent>(conn)
        .optional()?;

    match row {
        Some(row) => Ok(hydrate_content(conn, vec![row])?.into_iter().next()),
        None => Ok(None),
    }
}

fn load_files(
    conn: &mut SqliteConnection,
    for_content: i32,
) -> Result<Vec<FileRecord>, DatabaseError> {
    files::table
        .filter(files::content_id.eq(for_content))
        .order(files::id.asc())
        .select(DbFile::as_select())
        .load::<DbFile>(conn)?
        .iter()
        .map(DbFile::to_file_record)
        .collect()
}

fn content_query(
    filter: &ContentFilter,
) -> Result<content::BoxedQuery<'static, Sqlite>, DatabaseError> {
    let mut query = content::table.into_boxed();

    if let Some(kind) = filter.kind {
        query = query.filter(content::kind.eq(kind.as_str()));
    }
    if let Some(subject_id) = filter.subject_id {
        query = query.filter(content::subject_id.eq(row_key(subject_id)?));
    }
    if let Some(author_id) = filter.author_id {
        query = query.filter(content::author_id.eq(row_key(author_id)?));
    }
    if let Some(term) = filter.query.as_deref() {
        let pattern = like_pattern(term);
        query = query.filter(
            content::title
                .like(pattern.clone())
                .escape('\\')
                .or(content::body.like(pattern).escape('\\')),
        );
    }

    Ok(query)
}

pub struct SqliteUserStore {
    pool: Pool,
}

impl SqliteUserStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::UserStore for SqliteUserStore {
    async fn get_user(&self, id: i64) -> Result<Option<User>, DatabaseError> {
        run_blocking(&self.pool, move |conn| {
            load_user(conn, row_key(id)?)?.map(|u| u.to_user()).transpose()
        })
        .await
    }

    async fn get_credentials(&self, id: i64) -> Result<Option<UserCredentials>, DatabaseError> {
        run_blocking(&self.pool, move |conn| {
            load_user(conn, row_key(id)?)?
                .map(DbUser::into_credentials)
                .transpose()
        })
        .await
    }

    async fn get_credentials_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserCredentials>, DatabaseError> {
        let username = username.to_string();
        run_blocking(&self.pool, move |conn| {
            users::table
                .filter(users::username.eq(username))
                .select(DbUser::as_select())
                .first::<DbUser>(conn)
                .optional()?
                .map(DbUser::into_credentials)
                .transpose()
        })
        .await
    }

    async fn list_users(
        &self,
        role: Option<Role>,
        page: PageRequest,
    ) -> Result<Page<User>, DatabaseError> {
        run_blocking(&self.pool, move |conn| {
            let mut count_query = users::table.into_boxed();
            let mut list_query = users::table.into_boxed();
            if let Some(role) = role {
                count_query = count_query.filter(users::role.eq(role.as_str()));
                list_query = list_query.filter(users::role.eq(role.as_str()));
            }

            let total = count_query.count().get_result::<i64>(conn)?;
            let items = list_query
                .order(users::username.asc())
                .limit(page.limit)
                .offset(page.offset())
                .select(DbUser::as_select())
                .load::<DbUser>(conn)?
                .iter()
                .map(DbUser::to_user)
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Page::new(items, page, total))
        })
        .await
    }

    async fn count_users(&self) -> Result<i64, DatabaseError> {
        run_blocking(&self.pool, |conn| {
            Ok(users::table.count().get_result::<i64>(conn)?)
        })
        .await
    }

    async fn count_admins(&self) -> Result<i64, DatabaseError> {
        run_blocking(&self.pool, count_admin_rows).await
    }

    async fn create_user(&self, user: &NewUser) -> Result<User, DatabaseError> {
        let user = user.clone();
        run_blocking(&self.pool, move |conn| {
            conn.transaction::<_, DatabaseError, _>(|conn| {
                let now = now_string();
                let row = NewUserRow {
                    id: None,
                    username: &user.username,
                    password_hash: &user.password_hash,
                    role: user.role.as_str(),
                    assigned_subject_id: user.assigned_subject_id.map(row_key).transpose()?,
                    created_at: &now,
                    updated_at: &now,
                };

                diesel::insert_into(users::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(|e| DatabaseError::from(e).conflict_as("username already exists"))?;

                let id = last_id(conn)?;
                load_user(conn, id)?
                    .ok_or_else(|| DatabaseError::NotFound("user vanished after insert".into()))?
                    .to_user()
            })
        })
        .await
    }

    async fn update_user(
        &self,
        id: i64,
        changes: &UserChanges,
    ) -> Result<Option<User>, DatabaseError> {
        let changes = changes.clone();
        run_blocking(&self.pool, move |conn| {
            let key = row_key(id)?;
            let changeset = UserChangeset {
                username: changes.username.as_deref(),
                password_hash: changes.password_hash.as_deref(),
                role: changes.role.map(|role| role.as_str()),
                assigned_subject_id: changes
                    .assigned_subject_id
                    .map(|assigned| assigned.map(row_key).transpose())
                    .transpose()?,
                updated_at: now_string(),
            };

            // IMMEDIATE takes the write lock first, so the admin count cannot go stale.
            conn.immediate_transaction::<_, DatabaseError, _>(|conn| {
                let Some(existing) = load_user(conn, key)? else {
                    return Ok(None);
                };
                let demoting = existing.role == Role::Admin.as_str()
                    && changes.role.is_some_and(|role| role != Role::Admin);
                if demoting && count_admin_rows(conn)? <= 1 {
                    return Err(DatabaseError::Conflict("cannot demote the last admin".to_string()));
                }

                diesel::update(users::table.find(key))
                    .set(&changeset)
                    .execute(conn)
                    .map_err(|e| DatabaseError::from(e).conflict_as("username already exists"))?;
                load_user(conn, key)?.map(|u| u.to_user()).transpose()
            })
        })
        .await
    }

    async fn delete_user(&self, id: i64) -> Result<bool, DatabaseError> {
        run_blocking(&self.pool, move |conn| {
            let key = row_key(id)?;
            conn.immediate_transaction::<_, DatabaseError, _>(|conn| {
                let Some(existing) = load_user(conn, key)? else {
                    return Ok(false);
                };
                if existing.role == Role::Admin.as_str() && count_admin_rows(conn)? <= 1 {
                    return Err(DatabaseError::Conflict("cannot delete the last admin".to_string()));
                }
                let affected = diesel::delete(users::table.find(key)).execute(conn)?;
                Ok(affected > 0)
            })
        })
        .await
    }
}

fn count_admin_rows(conn: &mut SqliteConnection) -> Result<i64, DatabaseError> {
    Ok(users::table
        .filter(users::role.eq(Role::Admin.as_str()))
        .count()
        .get_result::<i64>(conn)?)
}

pub struct SqliteSubjectStore {
    pool: Pool,
}

impl SqliteSubjectStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::SubjectStore for SqliteSubjectStore {
    async fn list_subjects(&self) -> Result<Vec<Subject>, DatabaseError> {
        run_blocking(&self.pool, |conn| {
            let rows = subjects::table
                .order(subjects::name.asc())
                .select(DbSubject::as_select())
                .load::<DbSubject>(conn)?;

            let counts: HashMap<i32, i64> = content::table
                .filter(content::subject_id.is_not_null())
                .group_by(content::subject_id)
                .select((content::subject_id, diesel::dsl::count_star()))
                .load::<(Option<i32>, i64)>(conn)?
                .into_iter()
                .filter_map(|(subject_id, count)| subject_id.map(|id| (id, count)))
                .collect();

            rows.iter()
                .map(|row| row.to_subject(counts.get(&row.id).copied().unwrap_or(0)))
                .collect()
        })
        .await
    }

    async fn get_subject(&self, id: i64) -> Result<Option<Subject>, DatabaseError> {
        run_blocking(&self.pool, move |conn| load_subject(conn, row_key(id)?)).await
    }

    async fn create_subject(&self, subject: &NewSubject) -> Result<Subject, DatabaseError> {
        let subject = subject.clone();
        run_blocking(&self.pool, move |conn| {
            conn.transaction::<_, DatabaseError, _>(|conn| {
                let now = now_string();
                let row = NewSubjectRow {
                    id: None,
                    name: &subject.name,
                    description: subject.description.as_deref(),
                    created_at: &now,
                    updated_at: &now,
                };

                diesel::insert_into(subjects::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(|e| DatabaseError::from(e).conflict_as("subject already exists"))?;

                let id = last_id(conn)?;
                load_subject(conn, id)?.ok_or_else(|| {
                    DatabaseError::NotFound("subject vanished after insert".into())
                })
            })
        })
        .await
    }

    async fn update_subject(
        &self,
        id: i64,
        changes: &SubjectChanges,
    ) -> Result<Option<Subject>, DatabaseError> {
        let changes = changes.clone();
        run_blocking(&self.pool, move |conn| {
            let changeset = SubjectChangeset {
                name: changes.name.as_deref(),
                description: changes
                    .description
                    .as_ref()
                    .map(|description| description.as_deref()),
                updated_at: now_string(),
            };

            let affected = diesel::update(subjects::table.find(row_key(id)?))
                .set(&changeset)
                .execute(conn)
                .map_err(|e| DatabaseError::from(e).conflict_as("subject already exists"))?;
            if affected == 0 {
                return Ok(None);
            }

            load_subject(conn, row_key(id)?)
        })
        .await
    }

    async fn delete_subject(&self, id: i64) -> Result<bool, DatabaseError> {
        run_blocking(&self.pool, move |conn| {
            let affected = diesel::delete(subjects::table.find(row_key(id)?)).execute(conn)?;
            Ok(affected > 0)
        })
        .await
    }
}

pub struct SqliteContentStore {
    pool: Pool,
}

impl SqliteContentStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::ContentStore for SqliteContentStore {
    async fn list_content(
        &self,
        filter: &ContentFilter,
        page: PageRequest,
    ) -> Result<Page<Content>, DatabaseError> {
        let filter = filter.clone();
        run_blocking(&self.pool, move |conn| {
            let total = content_query(&filter)?.count().get_result::<i64>(conn)?;
            let rows = content_query(&filter)?
                .order((content::created_at.desc(), content::id.desc()))
                .limit(page.limit)
                .offset(page.offset())
                .select(DbContent::as_select())
                .load::<DbContent>(conn)?;

            let items = hydrate_content(conn, rows)?;
            Ok(Page::new(items, page, total))
        })
        .await
    }

    async fn get_content(&self, id: i64) -> Result<Option<Content>, DatabaseError> {
        run_blocking(&self.pool, move |conn| load_content(conn, row_key(id)?)).await
    }

    async fn create_content(&self, new_content: &NewContent) -> Result<Content, DatabaseError> {
        let new_content = new_content.clone();
        run_blocking(&self.pool, move |conn| {
            let media_urls = serde_json::to_string(&new_content.media_urls)?;
            conn.transaction::<_, DatabaseError, _>(|conn| {
                let now = now_string();
                let row = NewContentRow {
                    id: None,
                    title: &new_content.title,
                    body: &new_content.body,
                    kind: new_content.kind.as_str(),
                    subject_id: new_content.subject_id.map(row_key).transpose()?,
                    author_id: new_content.author_id.map(row_key).transpose()?,
                    media_urls,
                    created_at: &now,
                    updated_at: &now,
                };

                diesel::insert_into(content::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(|e| {
                        DatabaseError::from(e).conflict_as("subject or author does not exist")
                    })?;

                let id = last_id(conn)?;
                load_content(conn, id)?.ok_or_else(|| {
                    DatabaseError::NotFound("content vanished after insert".into())
                })
            })
        })
        .await
    }

    async fn update_content(
        &self,
        id: i64,
        changes: &ContentChanges,
    ) -> Result<Option<Content>, DatabaseError> {
        let changes = changes.clone();
        run_blocking(&self.pool, move |conn| {
            let media_urls = changes
                .media_urls
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let changeset = ContentChangeset {
                title: changes.title.as_deref(),
                body: changes.body.as_deref(),
                kind: changes.kind.map(|kind| kind.as_str()),
                subject_id: changes
                    .subject_id
                    .map(|subject| subject.map(row_key).transpose())
                    .transpose()?,
                media_urls,
                updated_at: now_string(),
            };

            let affected = diesel::update(content::table.find(row_key(id)?))
                .set(&changeset)
                .execute(conn)
                .map_err(|e| DatabaseError::from(e).conflict_as("subject does not exist"))?;
            if affected == 0 {
                return Ok(None);
            }

            load_content(conn, row_key(id)?)
        })
        .await
    }

    async fn delete_content(&self, id: i64) -> Result<Option<Vec<FileRecord>>, DatabaseError> {
        run_blocking(&self.pool, move |conn| {
            conn.transaction::<_, DatabaseError, _>(|conn| {
                let attached = load_files(conn, row_key(id)?)?;
                let affected = diesel::delete(content::table.find(row_key(id)?)).execute(conn)?;
                if affected == 0 {
                    return Ok(None);
                }
                Ok(Some(attached))
            })
        })
        .await
    }
}

pub struct SqliteFileStore {
    pool: Pool,
}

impl SqliteFileStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::FileStore for SqliteFileStore {
    async fn list_files(&self, content_id: i64) -> Result<Vec<FileRecord>, DatabaseError> {
        run_blocking(&self.pool, move |conn| load_files(conn, row_key(content_id)?)).await
    }

    async fn get_file(&self, id: i64) -> Result<Option<FileRecord>, DatabaseError> {
        run_blocking(&self.pool, move |conn| {
            files::table
                .find(row_key(id)?)
                .select(DbFile::as_select())
                .first::<DbFile>(conn)
                .optional()?
                .as_ref()
                .map(DbFile::to_file_record)
                .transpose()
        })
        .await
    }

    async fn create_files(
        &self,
        new_files: &[NewFileRecord],
    ) -> Result<Vec<FileRecord>, DatabaseError> {
        let new_files = new_files.to_vec();
        run_blocking(&self.pool, move |conn| {
            conn.transaction::<_, DatabaseError, _>(|conn| {
                let now = now_string();
                let mut created = Vec::with_capacity(new_files.len());
                for file in &new_files {
                    let row = NewFileRow {
                        id: None,
                        content_id: row_key(file.content_id)?,
                        filename: &file.filename,
                        stored_filename: &file.stored_filename,
                        mime_type: &file.mime_type,
                        size: file.size,
                        created_at: &now,
                    };
                    diesel::insert_into(files::table)
                        .values(&row)
                        .execute(conn)
                        .map_err(|e| DatabaseError::from(e).conflict_as("content does not exist"))?;

                    let id = last_id(conn)?;
                    let stored = files::table
                        .find(id)
                        .select(DbFile::as_select())
                        .first::<DbFile>(conn)?;
                    created.push(stored.to_file_record()?);
                }
                Ok(created)
            })
        })
        .await
    }

    async fn delete_file(&self, id: i64) -> Result<Option<FileRecord>, DatabaseError> {
        run_blocking(&self.pool, move |conn| {
            conn.transaction::<_, DatabaseError, _>(|conn| {
                let existing = files::table
                    .find(row_key(id)?)
                    .select(DbFile::as_select())
                    .first::<DbFile>(conn)
                    .optional()?;
                let Some(existing) = existing else {
                    return Ok(None);
                };

                diesel::delete(files::table.find(row_key(id)?)).execute(conn)?;
                existing.to_file_record().map(Some)
            })
        })
        .await
    }
}

pub struct SqliteMaintenanceStore {
    pool: Pool,
}

impl SqliteMaintenanceStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn import_rows(
    conn: &mut SqliteConnection,
    export: &DatabaseExport,
) -> Result<ImportSummary, DatabaseError> {
    diesel::delete(files::table).execute(conn)?;
    diesel::delete(content::table).execute(conn)?;
    diesel::delete(users::table).execute(conn)?;
    diesel::delete(subjects::table).execute(conn)?;

    for subject in &export.subjects {
        diesel::insert_into(subjects::table)
            .values(&NewSubjectRow {
                id: Some(row_key(subject.id)?),
                name: &subject.name,
                description: subject.description.as_deref(),
                created_at: &subject.created_at,
                updated_at: &subject.updated_at,
            })
            .execute(conn)?;
    }

    for user in &export.users {
        diesel::insert_into(users::table)
            .values(&NewUserRow {
                id: Some(row_key(user.id)?),
                username: &user.username,
                password_hash: &user.password_hash,
                role: user.role.as_str(),
                assigned_subject_id: user.assigned_subject_id.map(row_key).transpose()?,
                created_at: &user.created_at,
                updated_at: &user.updated_at,
            })
            .execute(conn)?;
    }

    for post in &export.content {
        diesel::insert_into(content::table)
            .values(&NewContentRow {
                id: Some(row_key(post.id)?),
                title: &post.title,
                body: &post.body,
                kind: post.kind.as_str(),
                subject_id: post.subject_id.map(row_key).transpose()?,
                author_id: post.author_id.map(row_key).transpose()?,
                media_urls: serde_json::to_string(&post.media_urls)?,
                created_at: &post.created_at,
                updated_at: &post.updated_at,
            })
            .execute(conn)?;
    }

    for file in &export.files {
        diesel::insert_into(files::table)
            .values(&NewFileRow {
                id: Some(row_key(file.id)?),
                content_id: row_key(file.content_id)?,
                filename: &file.filename,
                stored_filename: &file.stored_filename,
                mime_type: &file.mime_type,
                size: file.size,
                created_at: &file.created_at,
            })
            .execute(conn)?;
    }

    Ok(ImportSummary {
        users: export.users.len(),
        subjects: export.subjects.len(),
        content: export.content.len(),
        files: export.files.len(),
    })
}

#[async_trait]
impl super::MaintenanceStore for SqliteMaintenanceStore {
    async fn export_all(&self) -> Result<DatabaseExport, DatabaseError> {
        run_blocking(&self.pool, |conn| {
            conn.transaction::<_, DatabaseError, _>(|conn| {
                let users = users::table
                    .order(users::id.asc())
                    .select(DbUser::as_select())
                    .load::<DbUser>(conn)?
                    .into_iter()
                    .map(DbUser::into_exported)
                    .collect::<Result<Vec<_>, _>>()?;

                let subjects = subjects::table
                    .order(subjects::id.asc())
                    .select(DbSubject::as_select())
                    .load::<DbSubject>(conn)?
                    .into_iter()
                    .map(|row| ExportedSubject {
                        id: row.id as i64,
                        name: row.name,
                        description: row.description,
                        created_at: row.created_at,
                        updated_at: row.updated_at,
                    })
                    .collect();

                let content = content::table
                    .order(content::id.asc())
                    .select(DbContent::as_select())
                    .load::<DbContent>(conn)?
                    .into_iter()
                    .map(DbContent::into_exported)
                    .collect::<Result<Vec<_>, _>>()?;

                let files = files::table
                    .order(files::id.asc())
                    .select(DbFile::as_select())
                    .load::<DbFile>(conn)?
                    .into_iter()
                    .map(DbFile::into_exported)
                    .collect();

                Ok(DatabaseExport {
                    version: EXPORT_FORMAT_VERSION,
                    exported_at: Utc::now(),
                    users,
                    subjects,
                    content,
                    files,
                })
            })
        })
        .await
    }

    async fn import_all(&self, export: &DatabaseExport) -> Result<ImportSummary, DatabaseError> {
        let export = export.clone();
        run_blocking(&self.pool, move |conn| {
            conn.transaction::<_, DatabaseError, _>(|conn| import_rows(conn, &export))
                .map_err(|err| match err {
                    DatabaseError::Conflict(message) => {
                        DatabaseError::Invalid(format!("import rejected: {}", message))
                    }
                    other => other,
                })
        })
        .await
    }

    async fn stats(&self) -> Result<Stats, DatabaseError> {
        run_blocking(&self.pool, |conn| {
            // Every role and type is listed, zero when absent.
            let mut users_by_role: BTreeMap<String, i64> = Role::ALL
                .iter()
                .map(|role| (role.to_string(), 0))
                .collect();
            users_by_role.extend(
                users::table
                    .group_by(users::role)
                    .select((users::role, diesel::dsl::count_star()))
                    .load::<(String, i64)>(conn)?,
            );

            let mut content_by_type: BTreeMap<String, i64> = ContentType::ALL
                .iter()
                .map(|kind| (kind.to_string(), 0))
                .collect();
            content_by_type.extend(
                content::table
                    .group_by(content::kind)
                    .select((content::kind, diesel::dsl::count_star()))
                    .load::<(String, i64)>(conn)?,
            );

            let file_count = files::table.count().get_result::<i64>(conn)?;
            let stored_bytes = files::table
                .select(diesel::dsl::sql::<diesel::sql_types::Nullable<BigInt>>("SUM(size)"))
                .first::<Option<i64>>(conn)?
                .unwrap_or(0);

            Ok(Stats {
                users_total: users_by_role.values().sum(),
                users_by_role,
                subjects: subjects::table.count().get_result::<i64>(conn)?,
                content_total: content_by_type.values().sum(),
                content_by_type,
                files: file_count,
                stored_bytes,
            })
        })
        .await
    }
}
