//! Local-disk storage for expediente documents.
//!
//! Every file lives under `<root>/propiedades/<expedienteId>/`. The owner id
//! is parsed into an integer before any path is built, and the resulting
//! directory is checked to be a descendant of the root.

use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};

use crate::error::AppError;

pub const PROPERTY_DIR: &str = "propiedades";

pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "image/jpeg",
    "image/jpg",
    "image/png",
    "application/octet-stream",
];
pub const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "jpg", "jpeg", "png"];

const GENERIC_BINARY: &str = "application/octet-stream";
const MAX_NAME_ATTEMPTS: u32 = 100;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("the `{0}` field is required")]
    MissingField(&'static str),
    #[error("propiedadId must be a positive integer")]
    InvalidOwnerId,
    #[error("resolved upload path is outside the storage root")]
    PathEscape,
    #[error("only PDF or image files (JPG, PNG) are allowed")]
    UnsupportedFileType,
    #[error("file exceeds the maximum size of {limit_bytes} bytes")]
    FileTooLarge { limit_bytes: usize },
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<UploadError> for AppError {
    fn from(value: UploadError) -> Self {
        if let UploadError::Io(err) = value {
            return if err.kind() == ErrorKind::NotFound {
                AppError::not_found_with("stored file not found")
            } else {
                AppError::internal(format!("storage error: {err}"))
            };
        }

        let code = match &value {
            UploadError::MissingField(_) => "MISSING_FIELD",
            UploadError::InvalidOwnerId => "INVALID_OWNER_ID",
            UploadError::PathEscape => "PATH_ESCAPE",
            UploadError::UnsupportedFileType => "UNSUPPORTED_FILE_TYPE",
            UploadError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            UploadError::Io(_) => "INTERNAL",
        };
        AppError::bad_request(value.to_string()).with_code(code)
    }
}

/// Maps the current (`propiedadId`) and legacy (`expedienteId`) form field
/// names onto one value. The current name wins when both are present.
pub fn normalize_owner_field<'a>(
    propiedad_id: Option<&'a str>,
    expediente_id: Option<&'a str>,
) -> Option<&'a str> {
    [propiedad_id, expediente_id]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
}

pub fn parse_owner_id(raw: Option<&str>) -> Result<i32, UploadError> {
    let raw = raw.ok_or(UploadError::MissingField("propiedadId"))?.trim();
    if raw.is_empty() {
        return Err(UploadError::MissingField("propiedadId"));
    }
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UploadError::InvalidOwnerId);
    }

    match raw.parse::<i32>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(UploadError::InvalidOwnerId),
    }
}

/// Lower-cased extension of `filename`, if it is a plain alphanumeric one.
fn extension_of(filename: &str) -> Option<String> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let ext = Path::new(base).extension()?.to_str()?;
    (!ext.is_empty() && ext.bytes().all(|b| b.is_ascii_alphanumeric()))
        .then(|| ext.to_ascii_lowercase())
}

fn has_allowed_extension(filename: &str) -> bool {
    extension_of(filename)
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Content filter: an allowed MIME type is enough, except generic binary
/// which also needs an allowed extension. When the MIME type is not
/// recognised the extension alone decides.
pub fn is_accepted_file(content_type: Option<&str>, filename: &str) -> bool {
    let mime = content_type
        .map(|value| value.split(';').next().unwrap_or(value).trim().to_ascii_lowercase());

    if let Some(mime) = mime.as_deref() {
        if ALLOWED_MIME_TYPES.contains(&mime) && mime != GENERIC_BINARY {
            return true;
        }
    }

    has_allowed_extension(filename)
}

/// `propiedad-{id}-{timestamp}{.ext}` with colons removed from the timestamp.
pub fn stored_filename(owner_id: i32, original_name: &str, now: DateTime<Utc>) -> String {
    let timestamp = now.format("%Y-%m-%dT%H-%M-%S");
    let extension = extension_of(original_name)
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();
    format!("propiedad-{owner_id}-{timestamp}{extension}")
}

fn with_suffix(filename: &str, attempt: u32) -> String {
    if attempt == 0 {
        return filename.to_string();
    }
    match filename.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}-{attempt}.{ext}"),
        None => format!("{filename}-{attempt}"),
    }
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    /// Path relative to the storage root, always `/`-separated.
    pub relative_path: String,
    pub filename: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
    max_bytes: usize,
}

impl UploadStore {
    /// Creates the root directory if needed and pins it to an absolute path.
    pub fn open(root: impl AsRef<Path>, max_bytes: usize) -> std::io::Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.canonicalize()?,
            max_bytes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn ensure_within_limit(&self, received: usize) -> Result<(), UploadError> {
        if received > self.max_bytes {
            return Err(UploadError::FileTooLarge {
                limit_bytes: self.max_bytes,
            });
        }
        Ok(())
    }

    pub fn owner_dir(&self, owner_id: i32) -> Result<PathBuf, UploadError> {
        if owner_id <= 0 {
            return Err(UploadError::InvalidOwnerId);
        }
        let dir = self.root.join(PROPERTY_DIR).join(owner_id.to_string());
        if !dir.starts_with(&self.root) {
            return Err(UploadError::PathEscape);
        }
        Ok(dir)
    }

    /// Creates the owner directory. Safe to race with other requests.
    pub async fn prepare_owner_dir(&self, owner_id: i32) -> Result<PathBuf, UploadError> {
        let dir = self.owner_dir(owner_id)?;
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Writes `bytes` under the owner's directory with a name nobody else
    /// holds. A partially written file is removed on failure.
    pub async fn store(
        &self,
        owner_id: i32,
        original_name: &str,
        bytes: &[u8],
        now: DateTime<Utc>,
    ) -> Result<StoredFile, UploadError> {
        self.ensure_within_limit(bytes.len())?;
        let dir = self.prepare_owner_dir(owner_id).await?;
        let base = stored_filename(owner_id, original_name, now);

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let filename = with_suffix(&base, attempt);
            let path = dir.join(&filename);
            let mut file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            };

            let written = async {
                file.write_all(bytes).await?;
                file.flush().await
            }
            .await;
            if let Err(err) = written {
                drop(file);
                let _ = fs::remove_file(&path).await;
                return Err(err.into());
            }

            return Ok(StoredFile {
                relative_path: format!("{PROPERTY_DIR}/{owner_id}/{filename}"),
                filename,
                size: bytes.len() as u64,
            });
        }

        Err(UploadError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("could not find a free file name for {base}"),
        )))
    }

    /// Resolves a stored relative path, refusing anything but plain segments.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, UploadError> {
        let relative = Path::new(relative);
        let plain = relative.components().next().is_some()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !plain {
            return Err(UploadError::PathEscape);
        }

        let path = self.root.join(relative);
        if !path.starts_with(&self.root) {
            return Err(UploadError::PathEscape);
        }
        Ok(path)
    }

    pub async fn read(&self, relative: &str) -> Result<Vec<u8>, UploadError> {
        let path = self.resolve(relative)?;
        Ok(fs::read(path).await?)
    }

    pub async fn remove(&self, relative: &str) -> Result<(), UploadError> {
        let path = self.resolve(relative)?;
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
