use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::UploadsConfig;

const FALLBACK_MIME: &str = "application/octet-stream";
const MAX_EXTENSION_LEN: usize = 10;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("no files were uploaded")]
    Empty,
    #[error("too many files: {count} (max {max})")]
    TooMany { count: usize, max: usize },
    #[error("file too large: {filename} is {size} bytes (max {max})")]
    TooLarge { filename: String, size: u64, max: u64 },
    #[error("file type not allowed: {0}")]
    MimeNotAllowed(String),
    #[error("failed to store upload: {0}")]
    Io(#[from] io::Error),
}

/// An uploaded part already spooled to a temporary file.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub name: Option<String>,
    pub path: PathBuf,
    pub size: u64,
    pub content_type: Option<String>,
}

impl IncomingFile {
    pub fn display_name(&self) -> String {
        normalize_upload_name(self.name.as_deref().unwrap_or_default())
    }

    pub fn mime_type(&self) -> String {
        self.content_type
            .as_deref()
            .map(str::trim)
            .filter(|mime| !mime.is_empty())
            .unwrap_or(FALLBACK_MIME)
            .to_ascii_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    pub filename: String,
    pub stored_filename: String,
    pub mime_type: String,
    pub size: u64,
}

pub struct MediaStorage {
    root: PathBuf,
    max_file_size: u64,
    max_files: usize,
    allowed_mime_prefixes: Vec<String>,
}

impl MediaStorage {
    pub fn new(config: &UploadsConfig) -> Self {
        Self {
            root: config.dir.clone(),
            max_file_size: config.max_file_size,
            max_files: config.max_files,
            allowed_mime_prefixes: config
                .allowed_mime_prefixes
                .iter()
                .map(|prefix| prefix.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Upper bound for a whole multipart request body.
    pub fn max_request_size(&self) -> usize {
        let files = self.max_file_size.saturating_mul(self.max_files as u64);
        usize::try_from(files.saturating_add(1024 * 1024)).unwrap_or(usize::MAX)
    }

    pub async fn ensure_dir(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    /// Validates a batch before anything is written.
    pub fn check_batch(&self, files: &[IncomingFile]) -> Result<(), MediaError> {
        if files.is_empty() {
            return Err(MediaError::Empty);
        }
        if files.len() > self.max_files {
            return Err(MediaError::TooMany {
                count: files.len(),
                max: self.max_files,
            });
        }
        for file in files {
            if file.size > self.max_file_size {
                warn!(
                    "rejecting upload {}: {} bytes (max {})",
                    file.display_name(),
                    file.size,
                    self.max_file_size
                );
                return Err(MediaError::TooLarge {
                    filename: file.display_name(),
                    size: file.size,
                    max: self.max_file_size,
                });
            }
            let mime = file.mime_type();
            if !mime_allowed(&mime, &self.allowed_mime_prefixes) {
                return Err(MediaError::MimeNotAllowed(mime));
            }
        }
        Ok(())
    }

    /// Copies every file into the upload directory. On failure, files already
    /// copied by this call are removed again.
    pub async fn store_all(&self, files: &[IncomingFile]) -> Result<Vec<StoredUpload>, MediaError> {
        self.check_batch(files)?;
        self.ensure_dir().await?;

        let mut stored = Vec::with_capacity(files.len());
        for file in files {
            match self.store(file).await {
                Ok(upload) => stored.push(upload),
                Err(err) => {
                    let copied: Vec<String> =
                        stored.iter().map(|s| s.stored_filename.clone()).collect();
                    self.remove_all(&copied).await;
                    return Err(err);
                }
            }
        }
        Ok(stored)
    }

    async fn store(&self, file: &IncomingFile) -> Result<StoredUpload, MediaError> {
        let filename = file.display_name();
        let stored_filename = stored_name_for(&filename);
        let destination = self.root.join(&stored_filename);

        let size = tokio::fs::copy(&file.path, &destination).await?;
        debug!("stored upload {} as {} ({} bytes)", filename, stored_filename, size);

        Ok(StoredUpload {
            filename,
            stored_filename,
            mime_type: file.mime_type(),
            size,
        })
    }

    /// Resolves a stored name to its path, refusing anything that is not a
    /// plain file name inside the upload directory.
    pub fn path_for(&self, stored_filename: &str) -> Option<PathBuf> {
        let candidate = Path::new(stored_filename);
        let mut components = candidate.components();
        match (components.next(), components.next()) {
            (Some(std::path::Component::Normal(_)), None) => Some(self.root.join(candidate)),
            _ => None,
        }
    }

    pub async fn remove(&self, stored_filename: &str) -> io::Result<()> {
        let Some(path) = self.path_for(stored_filename) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing to remove {}", stored_filename),
            ));
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Best-effort removal; failures are logged and otherwise ignored.
    pub async fn remove_all(&self, stored_filenames: &[String]) {
        for name in stored_filenames {
            if let Err(err) = self.remove(name).await {
                warn!("failed to remove stored upload {}: {}", name, err);
            }
        }
    }
}

/// Recovers UTF-8 names that a multipart parser decoded as Latin-1, then
/// strips any directory part. An empty result becomes `file`.
pub fn normalize_upload_name(raw: &str) -> String {
    let decoded = reencode_latin1(raw).unwrap_or_else(|| raw.to_string());
    let base = decoded
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();

    if base.is_empty() || base == "." || base == ".." {
        "file".to_string()
    } else {
        base
    }
}

fn reencode_latin1(raw: &str) -> Option<String> {
    if !raw.chars().any(|c| c as u32 >= 0x80) {
        return None;
    }
    let bytes = raw
        .chars()
        .map(|c| u8::try_from(c as u32).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

pub fn stored_name_for(original: &str) -> String {
    match extension_of(original) {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
        None => Uuid::new_v4().to_string(),
    }
}

fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > MAX_EXTENSION_LEN {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn mime_allowed(mime: &str, allowed_prefixes: &[String]) -> bool {
    allowed_prefixes.is_empty()
        || allowed_prefixes
            .iter()
            .any(|prefix| mime.starts_with(prefix.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    fn storage(dir: &Path, max_file_size: u64, prefixes: &[&str]) -> MediaStorage {
        MediaStorage::new(&UploadsConfig {
            dir: dir.to_path_buf(),
            max_file_size,
            max_files: 2,
            allowed_mime_prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        })
    }

    fn incoming(dir: &Path, name: &str, body: &[u8], mime: Option<&str>) -> IncomingFile {
        let path = dir.join(format!("tmp-{}", Uuid::new_v4()));
        std::fs::write(&path, body).expect("write temp upload");
        IncomingFile {
            name: Some(name.to_string()),
            path,
            size: body.len() as u64,
            content_type: mime.map(str::to_string),
        }
    }

    #[test_case("report.pdf", "report.pdf"; "ascii untouched")]
    #[test_case("Ã\u{9c}bung.pdf", "Übung.pdf"; "latin1 mojibake repaired")]
    #[test_case("Ð´Ð¾ÐºÑ\u{83}Ð¼ÐµÐ½Ñ\u{82}.docx", "документ.docx"; "cyrillic repaired")]
    #[test_case("Übung.pdf", "Übung.pdf"; "already utf8 kept")]
    #[test_case("C:\\Users\\me\\notes.txt", "notes.txt"; "windows path stripped")]
    #[test_case("../../etc/passwd", "passwd"; "traversal stripped")]
    #[test_case("", "file"; "empty name")]
    #[test_case("..", "file"; "dot dot")]
    fn upload_names_are_normalized(raw: &str, expected: &str) {
        assert_eq!(normalize_upload_name(raw), expected);
    }

    #[test_case("photo.JPG", Some("jpg"))]
    #[test_case("archive.tar.gz", Some("gz"))]
    #[test_case(".bashrc", None)]
    #[test_case("noext", None)]
    #[test_case("weird.ex t", None)]
    fn extensions(name: &str, expected: Option<&str>) {
        assert_eq!(extension_of(name).as_deref(), expected);
    }

    #[test]
    fn stored_names_are_unique_and_keep_extension() {
        let a = stored_name_for("Lesson.PDF");
        let b = stored_name_for("Lesson.PDF");
        assert_ne!(a, b);
        assert!(a.ends_with(".pdf"));
    }

    #[test]
    fn path_for_rejects_traversal() {
        let storage = storage(Path::new("/srv/uploads"), 10, &[]);
        assert_eq!(
            storage.path_for("abc.png"),
            Some(PathBuf::from("/srv/uploads/abc.png"))
        );
        assert!(storage.path_for("../secret").is_none());
        assert!(storage.path_for("a/b.png").is_none());
        assert!(storage.path_for("").is_none());
    }

    #[test]
    fn mime_prefixes_filter() {
        let allowed = vec!["image/".to_string(), "application/pdf".to_string()];
        assert!(mime_allowed("image/png", &allowed));
        assert!(mime_allowed("application/pdf", &allowed));
        assert!(!mime_allowed("text/html", &allowed));
        assert!(mime_allowed("text/html", &[]));
    }

    #[tokio::test]
    async fn store_all_copies_files() {
        let dir = TempDir::new().expect("temp dir");
        let uploads = dir.path().join("uploads");
        let storage = storage(&uploads, 1024, &[]);
        let file = incoming(dir.path(), "Ã\u{9c}bung.PDF", b"%PDF-1.4", Some("application/pdf"));

        let stored = storage.store_all(&[file]).await.expect("store");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].filename, "Übung.PDF");
        assert_eq!(stored[0].size, 8);
        assert!(stored[0].stored_filename.ends_with(".pdf"));

        let on_disk = uploads.join(&stored[0].stored_filename);
        assert_eq!(std::fs::read(&on_disk).expect("read"), b"%PDF-1.4");

        storage
            .remove(&stored[0].stored_filename)
            .await
            .expect("remove");
        assert!(!on_disk.exists());
        storage
            .remove(&stored[0].stored_filename)
            .await
            .expect("removing twice is fine");
    }

    #[tokio::test]
    async fn remove_all_runs_inside_spawned_tasks() {
        let dir = TempDir::new().expect("temp dir");
        let uploads = dir.path().join("uploads");
        let storage = std::sync::Arc::new(storage(&uploads, 1024, &[]));
        let files = [
            incoming(dir.path(), "a.txt", b"a", Some("text/plain")),
            incoming(dir.path(), "b.txt", b"b", Some("text/plain")),
        ];
        let stored = storage.store_all(&files).await.expect("store");
        let mut names: Vec<String> = stored.into_iter().map(|s| s.stored_filename).collect();
        names.push("../outside.txt".to_string());

        let task_storage = storage.clone();
        let task_names = names.clone();
        tokio::spawn(async move { task_storage.remove_all(&task_names).await })
            .await
            .expect("join");

        for name in &names[..2] {
            assert!(!uploads.join(name).exists());
        }
    }

    #[tokio::test]
    async fn batch_limits_are_enforced() {
        let dir = TempDir::new().expect("temp dir");
        let storage = storage(&dir.path().join("uploads"), 4, &["image/"]);

        assert!(matches!(storage.check_batch(&[]), Err(MediaError::Empty)));

        let big = incoming(dir.path(), "big.png", b"12345", Some("image/png"));
        assert!(matches!(
            storage.check_batch(std::slice::from_ref(&big)),
            Err(MediaError::TooLarge { size: 5, .. })
        ));

        let html = incoming(dir.path(), "x.html", b"<p>", Some("text/html"));
        assert!(matches!(
            storage.check_batch(&[html]),
            Err(MediaError::MimeNotAllowed(_))
        ));

        let small = incoming(dir.path(), "a.png", b"1", Some("image/png"));
        assert!(matches!(
            storage.check_batch(&[small.clone(), small.clone(), small]),
            Err(MediaError::TooMany { count: 3, max: 2 })
        ));
    }

    #[test]
    fn missing_content_type_falls_back() {
        let file = IncomingFile {
            name: None,
            path: PathBuf::from("/tmp/x"),
            size: 0,
            content_type: None,
        };
        assert_eq!(file.mime_type(), "application/octet-stream");
        assert_eq!(file.display_name(), "file");
    }
}
