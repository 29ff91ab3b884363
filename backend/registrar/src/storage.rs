//! Object storage for speaker and moderator photos.
//!
//! Objects are written once under a random name and never read back by the
//! application; browsers fetch them through the public URL.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{AppError, Result};

pub const EVENT_IMAGES_BUCKET: &str = "event-images";

const MAX_EXTENSION_LEN: usize = 10;

/// An image attached to the event form but not yet uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
    bucket: &'static str,
    public_base_url: String,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            bucket: EVENT_IMAGES_BUCKET,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Directory the bucket's objects live in.
    pub fn bucket_dir(&self) -> PathBuf {
        self.root.join(self.bucket)
    }

    /// URL path prefix the bucket is served under.
    pub fn route_prefix(&self) -> String {
        format!("/storage/{}", self.bucket)
    }

    pub async fn ensure_bucket(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.bucket_dir()).await?;
        info!("Object storage bucket at {}", self.bucket_dir().display());
        Ok(())
    }

    /// Store the image under a fresh random name and return its public URL.
    pub async fn upload(&self, image: &ImageUpload) -> Result<String> {
        if image.bytes.is_empty() {
            return Err(AppError::Upload(format!("{} is empty", image.file_name)));
        }

        let object_name = format!("{}.{}", Uuid::new_v4().simple(), extension_of(&image.file_name));
        let path = self.bucket_dir().join(&object_name);
        tokio::fs::write(&path, &image.bytes).await.map_err(|e| {
            AppError::Upload(format!("could not store {}: {e}", image.file_name))
        })?;

        debug!("Stored {} as {object_name}", image.file_name);
        Ok(self.public_url(&object_name))
    }

    pub fn public_url(&self, object_name: &str) -> String {
        format!("{}{}/{object_name}", self.public_base_url, self.route_prefix())
    }
}

/// Lower-cased extension of the original file name, `bin` when there is no
/// usable one.
fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "bin".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str) -> ImageUpload {
        ImageUpload {
            file_name: name.to_string(),
            bytes: vec![0x89, 0x50, 0x4e, 0x47],
        }
    }

    #[test]
    fn extensions() {
        assert_eq!(extension_of("photo.PNG"), "png");
        assert_eq!(extension_of("archive.tar.gz"), "gz");
        assert_eq!(extension_of("noext"), "bin");
        assert_eq!(extension_of("../../etc/passwd"), "bin");
        assert_eq!(extension_of("x.p/ng"), "bin");
    }

    #[tokio::test]
    async fn upload_writes_random_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path(), "http://localhost:3001/");
        store.ensure_bucket().await.unwrap();

        let first = store.upload(&image("a.jpg")).await.unwrap();
        let second = store.upload(&image("a.jpg")).await.unwrap();

        assert_ne!(first, second);
        assert!(first.starts_with("http://localhost:3001/storage/event-images/"));
        assert!(first.ends_with(".jpg"));

        let object_name = first.rsplit('/').next().unwrap();
        let stored = std::fs::read(store.bucket_dir().join(object_name)).unwrap();
        assert_eq!(stored, image("a.jpg").bytes);
    }

    #[tokio::test]
    async fn empty_upload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path(), "http://localhost:3001");
        store.ensure_bucket().await.unwrap();
        let err = store
            .upload(&ImageUpload {
                file_name: "x.png".to_string(),
                bytes: Vec::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Upload(_)));
    }
}
