use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Public prefix under which stored uploads are served.
pub const UPLOADS_URL_PREFIX: &str = "/uploads";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Teacher, Role::Student];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    News,
    Preparation,
    Material,
}

impl ContentType {
    pub const ALL: [ContentType; 3] = [
        ContentType::News,
        ContentType::Preparation,
        ContentType::Material,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::News => "news",
            ContentType::Preparation => "preparation",
            ContentType::Material => "material",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "news" => Ok(ContentType::News),
            "preparation" => Ok(ContentType::Preparation),
            "material" => Ok(ContentType::Material),
            other => Err(format!("unknown content type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub assigned_subject_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user together with the stored password hash. Never rendered to clients.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub assigned_subject_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub username: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<Role>,
    /// `Some(None)` clears the assignment.
    pub assigned_subject_id: Option<Option<i64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub content_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSubject {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SubjectChanges {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub id: i64,
    pub title: String,
    pub body: String,
    #[serde(rename = "type")]
    pub kind: ContentType,
    pub subject_id: Option<i64>,
    pub subject_name: Option<String>,
    pub author_id: Option<i64>,
    pub author_username: Option<String>,
    pub media_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileRecord>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewContent {
    pub title: String,
    pub body: String,
    pub kind: ContentType,
    pub subject_id: Option<i64>,
    pub author_id: Option<i64>,
    pub media_urls: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ContentChanges {
    pub title: Option<String>,
    pub body: Option<String>,
    pub kind: Option<ContentType>,
    pub subject_id: Option<Option<i64>>,
    pub media_urls: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    pub kind: Option<ContentType>,
    pub subject_id: Option<i64>,
    pub author_id: Option<i64>,
    /// Substring matched against title and body.
    pub query: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub content_id: i64,
    pub filename: String,
    pub stored_filename: String,
    pub mime_type: String,
    pub size: i64,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn public_url(stored_filename: &str) -> String {
        format!("{}/{}", UPLOADS_URL_PREFIX, stored_filename)
    }
}

#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub content_id: i64,
    pub filename: String,
    pub stored_filename: String,
    pub mime_type: String,
    pub size: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
}

impl PageRequest {
    /// Clamps `page` to at least 1 and `limit` into `1..=max_limit`.
    pub fn new(page: Option<i64>, limit: Option<i64>, default_limit: i64, max_limit: i64) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(default_limit).clamp(1, max_limit.max(1)),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total: i64) -> Self {
        let total_pages = if total == 0 {
            0
        } else {
            (total + request.limit - 1) / request.limit
        };
        Self {
            items,
            pagination: Pagination {
                page: request.page,
                limit: request.limit,
                total,
                total_pages,
            },
        }
    }
}

pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// Full logical dump of every table, password hashes included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseExport {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub users: Vec<ExportedUser>,
    pub subjects: Vec<ExportedSubject>,
    pub content: Vec<ExportedContent>,
    pub files: Vec<ExportedFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedUser {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub assigned_subject_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedSubject {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedContent {
    pub id: i64,
    pub title: String,
    pub body: String,
    #[serde(rename = "type")]
    pub kind: ContentType,
    pub subject_id: Option<i64>,
    pub author_id: Option<i64>,
    pub media_urls: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedFile {
    pub id: i64,
    pub content_id: i64,
    pub filename: String,
    pub stored_filename: String,
    pub mime_type: String,
    pub size: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub users: usize,
    pub subjects: usize,
    pub content: usize,
    pub files: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    pub users_total: i64,
    pub users_by_role: BTreeMap<String, i64>,
    pub subjects: i64,
    pub content_total: i64,
    pub content_by_type: BTreeMap<String, i64>,
    pub files: i64,
    pub stored_bytes: i64,
}
