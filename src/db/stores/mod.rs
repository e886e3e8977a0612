use async_trait::async_trait;

use super::DatabaseError;
use super::models::{
    Content, ContentChanges, ContentFilter, DatabaseExport, FileRecord, ImportSummary, NewContent,
    NewFileRecord, NewSubject, NewUser, Page, PageRequest, Role, Stats, Subject, SubjectChanges,
    User, UserChanges, UserCredentials,
};

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, id: i64) -> Result<Option<User>, DatabaseError>;
    async fn get_credentials(&self, id: i64) -> Result<Option<UserCredentials>, DatabaseError>;
    async fn get_credentials_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserCredentials>, DatabaseError>;
    async fn list_users(
        &self,
        role: Option<Role>,
        page: PageRequest,
    ) -> Result<Page<User>, DatabaseError>;
    async fn count_users(&self) -> Result<i64, DatabaseError>;
    async fn count_admins(&self) -> Result<i64, DatabaseError>;
    async fn create_user(&self, user: &NewUser) -> Result<User, DatabaseError>;
    async fn update_user(
        &self,
        id: i64,
        changes: &UserChanges,
    ) -> Result<Option<User>, DatabaseError>;
    async fn delete_user(&self, id: i64) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait SubjectStore: Send + Sync {
    async fn list_subjects(&self) -> Result<Vec<Subject>, DatabaseError>;
    async fn get_subject(&self, id: i64) -> Result<Option<Subject>, DatabaseError>;
    async fn create_subject(&self, subject: &NewSubject) -> Result<Subject, DatabaseError>;
    async fn update_subject(
        &self,
        id: i64,
        changes: &SubjectChanges,
    ) -> Result<Option<Subject>, DatabaseError>;
    async fn delete_subject(&self, id: i64) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn list_content(
        &self,
        filter: &ContentFilter,
        page: PageRequest,
    ) -> Result<Page<Content>, DatabaseError>;
    async fn get_content(&self, id: i64) -> Result<Option<Content>, DatabaseError>;
    async fn create_content(&self, content: &NewContent) -> Result<Content, DatabaseError>;
    async fn update_content(
        &self,
        id: i64,
        changes: &ContentChanges,
    ) -> Result<Option<Content>, DatabaseError>;
    /// Returns the file rows removed by the cascade, or `None` if no such post.
    async fn delete_content(&self, id: i64) -> Result<Option<Vec<FileRecord>>, DatabaseError>;
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn list_files(&self, content_id: i64) -> Result<Vec<FileRecord>, DatabaseError>;
    async fn get_file(&self, id: i64) -> Result<Option<FileRecord>, DatabaseError>;
    async fn create_files(&self, files: &[NewFileRecord]) -> Result<Vec<FileRecord>, DatabaseError>;
    async fn delete_file(&self, id: i64) -> Result<Option<FileRecord>, DatabaseError>;
}

#[async_trait]
pub trait MaintenanceStore: Send + Sync {
    async fn export_all(&self) -> Result<DatabaseExport, DatabaseError>;
    /// Replaces every row with the contents of `export` in one transaction.
    async fn import_all(&self, export: &DatabaseExport) -> Result<ImportSummary, DatabaseError>;
    async fn stats(&self) -> Result<Stats, DatabaseError>;
}
