pub use self::error::DatabaseError;
pub use self::manager::DatabaseManager;
pub use self::models::{
    Content, ContentChanges, ContentFilter, ContentType, DatabaseExport, FileRecord,
    ImportSummary, NewContent, NewFileRecord, NewSubject, NewUser, Page, PageRequest, Role, Stats,
    Subject, SubjectChanges, User, UserChanges, UserCredentials,
};
pub use self::stores::{ContentStore, FileStore, MaintenanceStore, SubjectStore, UserStore};

pub mod error;
pub mod manager;
pub mod models;
pub mod schema;
pub mod sqlite;
pub mod stores;
