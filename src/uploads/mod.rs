//! Image uploads stored on local disk and served under `/uploads/`.
//!
//! Paths in the database are always the public form `/uploads/<file>`. Older
//! rows may carry other shapes (Windows separators, a doubled `uploads/`
//! prefix, a bare filename, or a full URL). `normalize_image_path` maps all
//! of them back to the canonical form.

use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

pub const PUBLIC_PREFIX: &str = "/uploads/";

/// Accepted image MIME types and the extension files are stored with
const ALLOWED_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
];

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Unsupported image type: {0}")]
    UnsupportedType(String),
    #[error("Image exceeds the {0} byte limit")]
    TooLarge(usize),
    #[error("Empty upload")]
    Empty,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub struct UploadStore {
    root: PathBuf,
    max_bytes: usize,
}

impl UploadStore {
    /// Create the store, making sure the upload directory exists
    pub fn new(root: impl Into<PathBuf>, max_bytes: usize) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, max_bytes })
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Extension for an accepted content type, or an error for anything else
    pub fn extension_for(content_type: &str) -> Result<&'static str, UploadError> {
        ALLOWED_TYPES
            .iter()
            .find(|(mime, _)| mime.eq_ignore_ascii_case(content_type))
            .map(|(_, ext)| *ext)
            .ok_or_else(|| UploadError::UnsupportedType(content_type.to_string()))
    }

    /// Write an image to disk and return its public path
    pub fn save_image(&self, data: &[u8], content_type: &str) -> Result<String, UploadError> {
        let ext = Self::extension_for(content_type)?;
        if data.is_empty() {
            return Err(UploadError::Empty);
        }
        if data.len() > self.max_bytes {
            return Err(UploadError::TooLarge(self.max_bytes));
        }

        let filename = format!("{}.{}", Uuid::new_v4(), ext);
        std::fs::write(self.root.join(&filename), data)?;
        log::debug!("Stored upload {} ({} bytes)", filename, data.len());

        Ok(format!("{}{}", PUBLIC_PREFIX, filename))
    }

    /// Map a public (or legacy) path to a file inside the upload root.
    /// Returns None for anything that would escape the root.
    pub fn resolve(&self, public_path: &str) -> Option<PathBuf> {
        let canonical = normalize_image_path(public_path)?;
        let relative = canonical.strip_prefix(PUBLIC_PREFIX)?;

        let relative = Path::new(relative);
        if relative.components().any(|c| !matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.root.join(relative))
    }

    /// Remove a previously stored image. A missing file is not an error.
    pub fn remove(&self, public_path: &str) {
        let Some(path) = self.resolve(public_path) else {
            return;
        };
        match std::fs::remove_file(&path) {
            Ok(_) => log::debug!("Removed upload {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::warn!("Upload {} already missing", path.display())
            }
            Err(e) => log::error!("Failed to remove upload {}: {}", path.display(), e),
        }
    }
}

/// Canonicalize a stored image path to `/uploads/<relative>`.
/// Returns None for empty input.
pub fn normalize_image_path(raw: &str) -> Option<String> {
    let mut path = raw.trim().replace('\\', "/");
    if path.is_empty() {
        return None;
    }

    // Absolute URL pointing at our uploads: keep only the path part
    if let Some(idx) = path.find("://") {
        let after_scheme = &path[idx + 3..];
        path = match after_scheme.find('/') {
            Some(slash) => after_scheme[slash..].to_string(),
            None => return None,
        };
    }

    let mut rest = path.trim_start_matches('/');
    while let Some(stripped) = rest.strip_prefix("uploads/") {
        rest = stripped.trim_start_matches('/');
    }
    if rest.is_empty() {
        return None;
    }

    Some(format!("{}{}", PUBLIC_PREFIX, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_legacy_shapes() {
        assert_eq!(normalize_image_path("/uploads/a.jpg").as_deref(), Some("/uploads/a.jpg"));
        assert_eq!(normalize_image_path("uploads/a.jpg").as_deref(), Some("/uploads/a.jpg"));
        assert_eq!(normalize_image_path("uploads\\a.jpg").as_deref(), Some("/uploads/a.jpg"));
        assert_eq!(normalize_image_path("a.jpg").as_deref(), Some("/uploads/a.jpg"));
        assert_eq!(
            normalize_image_path("/uploads/uploads//a.jpg").as_deref(),
            Some("/uploads/a.jpg")
        );
        assert_eq!(
            normalize_image_path("http://localhost:5000/uploads/a.jpg").as_deref(),
            Some("/uploads/a.jpg")
        );
        assert_eq!(normalize_image_path("   ").as_deref(), None);
        assert_eq!(normalize_image_path("/uploads/").as_deref(), None);
    }

    #[test]
    fn test_save_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = UploadStore::new(dir.path(), 1024).unwrap();

        let public = uploads.save_image(&[0xFF, 0xD8, 0xFF], "image/jpeg").unwrap();
        assert!(public.starts_with("/uploads/"));
        assert!(public.ends_with(".jpg"));

        let file = uploads.resolve(&public).unwrap();
        assert_eq!(std::fs::read(&file).unwrap(), vec![0xFF, 0xD8, 0xFF]);

        uploads.remove(&public);
        assert!(!file.exists());
        // second removal only logs
        uploads.remove(&public);
    }

    #[test]
    fn test_rejects_bad_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = UploadStore::new(dir.path(), 4).unwrap();

        assert!(matches!(
            uploads.save_image(b"text", "text/plain"),
            Err(UploadError::UnsupportedType(_))
        ));
        assert!(matches!(
            uploads.save_image(&[1, 2, 3, 4, 5], "image/png"),
            Err(UploadError::TooLarge(4))
        ));
        assert!(matches!(uploads.save_image(&[], "image/png"), Err(UploadError::Empty)));
    }

    #[test]
    fn test_resolve_blocks_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = UploadStore::new(dir.path(), 1024).unwrap();

        assert!(uploads.resolve("/uploads/../secret.txt").is_none());
        assert!(uploads.resolve("uploads/nested/../../x").is_none());
        assert!(uploads.resolve("/uploads/nested/pic.png").is_some());
    }
}
