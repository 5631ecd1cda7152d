//! File-per-user face store.
//!
//! Each registered user owns `user_<id>.json` (the [`FaceRecord`]) and one
//! JPEG photo `user_<id>_<unix-timestamp>.jpg` in the same directory.
//! Enumeration reads every record from disk on each call; there is no cache,
//! so writes are visible to the next recognition immediately.

use chrono::{Local, Utc};
use faceprint_core::{Embedding, FaceRecord, UserId};
use image::{ImageFormat, RgbImage};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

const RECORD_EXT: &str = "json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("face data not found for user {0}")]
    NotFound(UserId),
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("corrupt face record {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("saving photo {path}: {source}")]
    Photo {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("photo writer task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn io_err<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(std::io::Error) -> StoreError + 'a {
    move |source| StoreError::Io {
        op,
        path: path.to_path_buf(),
        source,
    }
}

pub struct FaceStore {
    dir: PathBuf,
    /// Serializes put/delete so a record and its photo change together.
    write_lock: Mutex<()>,
}

impl FaceStore {
    /// Open (creating if needed) the storage directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(io_err("creating", &dir))?;
        tracing::info!(dir = %dir.display(), "face store opened");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn record_path(&self, user_id: &UserId) -> PathBuf {
        self.dir.join(format!("{}.{RECORD_EXT}", user_id.file_stem()))
    }

    /// Encode `image` as JPEG next to the user's record and return its path.
    pub async fn save_photo(&self, user_id: &UserId, image: RgbImage) -> Result<PathBuf, StoreError> {
        let now = Utc::now();
        let name = format!(
            "{}_{}.{:06}.jpg",
            user_id.file_stem(),
            now.timestamp(),
            now.timestamp_subsec_micros()
        );
        let path = self.dir.join(name);

        let target = path.clone();
        tokio::task::spawn_blocking(move || image.save_with_format(&target, ImageFormat::Jpeg))
            .await?
            .map_err(|source| StoreError::Photo {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(%user_id, path = %path.display(), "photo saved");
        Ok(path)
    }

    /// Write (or overwrite) the record for `user_id`.
    ///
    /// When an earlier registration pointed at a different photo, that photo
    /// is removed so re-registration leaves no orphan behind.
    pub async fn put(
        &self,
        user_id: &UserId,
        embedding: Embedding,
        photo_path: &Path,
    ) -> Result<FaceRecord, StoreError> {
        let _guard = self.write_lock.lock().await;

        let previous = match self.get(user_id).await {
            Ok(previous) => previous,
            Err(StoreError::Corrupt { path, source }) => {
                tracing::warn!(%user_id, path = %path.display(), error = %source, "overwriting unreadable face record");
                None
            }
            Err(e) => return Err(e),
        };
        let record = FaceRecord {
            user_id: user_id.clone(),
            embedding,
            photo_path: photo_path.to_path_buf(),
            registered_at: Local::now().naive_local(),
        };

        let path = self.record_path(user_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(&record).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(io_err("writing", &tmp))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(io_err("renaming", &tmp))?;

        if let Some(old) = previous.filter(|old| old.photo_path != record.photo_path) {
            remove_if_exists(&old.photo_path).await;
        }

        tracing::info!(%user_id, dim = record.embedding.dim(), "face record stored");
        Ok(record)
    }

    /// Look up a single record.
    pub async fn get(&self, user_id: &UserId) -> Result<Option<FaceRecord>, StoreError> {
        read_record(&self.record_path(user_id)).await
    }

    /// Every stored `(user_id, embedding)`, ordered by file name.
    ///
    /// A missing directory or one without records yields an empty list.
    pub async fn get_all(&self) -> Result<Vec<(UserId, Embedding)>, StoreError> {
        let mut records = Vec::new();
        for path in self.record_files().await? {
            // Deleted between listing and reading.
            if let Some(record) = read_record(&path).await? {
                records.push((record.user_id, record.embedding));
            }
        }
        Ok(records)
    }

    /// Remove the user's record and its photo.
    pub async fn delete(&self, user_id: &UserId) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        // An unreadable record still names a file; drop it so the user can re-register.
        match self.get(user_id).await {
            Ok(Some(record)) => remove_if_exists(&record.photo_path).await,
            Ok(None) => return Err(StoreError::NotFound(user_id.clone())),
            Err(StoreError::Corrupt { path, source }) => {
                tracing::warn!(%user_id, path = %path.display(), error = %source, "deleting unreadable face record");
            }
            Err(e) => return Err(e),
        }

        let path = self.record_path(user_id);
        tokio::fs::remove_file(&path)
            .await
            .map_err(io_err("removing", &path))?;

        tracing::info!(%user_id, "face record deleted");
        Ok(())
    }

    /// Number of stored records.
    pub async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.record_files().await?.len())
    }

    async fn record_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err("listing", &self.dir)(e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(io_err("listing", &self.dir))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == RECORD_EXT) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

async fn read_record(path: &Path) -> Result<Option<FaceRecord>, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err("reading", path)(e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Best-effort photo removal; failures are logged, not propagated.
pub async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "photo removed"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove photo"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    async fn open_store() -> (FaceStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FaceStore::open(dir.path()).await.unwrap();
        (store, dir)
    }

    fn photo() -> RgbImage {
        RgbImage::from_pixel(8, 8, Rgb([200, 100, 50]))
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (store, _dir) = open_store().await;
        let id = UserId::Number(1);
        let photo_path = store.save_photo(&id, photo()).await.unwrap();
        assert!(photo_path.exists());
        assert!(photo_path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("user_1_"));

        store
            .put(&id, Embedding::new(vec![0.1, 0.2, 0.3]), &photo_path)
            .await
            .unwrap();

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.user_id, id);
        assert_eq!(record.embedding.values, vec![0.1, 0.2, 0.3]);
        assert_eq!(record.photo_path, photo_path);
        assert!(store.get(&UserId::Number(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_all_and_count_ignore_other_files() {
        let (store, dir) = open_store().await;
        for (n, v) in [(2, 0.2f32), (1, 0.1f32)] {
            let id = UserId::Number(n);
            let path = store.save_photo(&id, photo()).await.unwrap();
            store.put(&id, Embedding::new(vec![v]), &path).await.unwrap();
        }
        std::fs::write(dir.path().join("user_9.json.tmp"), b"partial").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

        let all = store.get_all().await.unwrap();
        let ids: Vec<UserId> = all.iter().map(|(id, _)| id.clone()).collect();
        assert_eq!(ids, vec![UserId::Number(1), UserId::Number(2)]);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_get_all_empty_and_missing_dir() {
        let (store, dir) = open_store().await;
        assert!(store.get_all().await.unwrap().is_empty());

        std::fs::remove_dir_all(dir.path()).unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reregister_replaces_record_and_photo() {
        let (store, _dir) = open_store().await;
        let id = UserId::Text("alice".into());

        let first = store.save_photo(&id, photo()).await.unwrap();
        store.put(&id, Embedding::new(vec![0.0]), &first).await.unwrap();
        let second = store.save_photo(&id, photo()).await.unwrap();
        store.put(&id, Embedding::new(vec![1.0]), &second).await.unwrap();

        assert!(!first.exists());
        assert!(second.exists());
        let all = store.get_all().await.unwrap();
        assert_eq!(all, vec![(id.clone(), Embedding::new(vec![1.0]))]);
    }

    #[tokio::test]
    async fn test_delete_removes_record_and_photo() {
        let (store, _dir) = open_store().await;
        let id = UserId::Number(5);
        let path = store.save_photo(&id, photo()).await.unwrap();
        store.put(&id, Embedding::new(vec![0.5]), &path).await.unwrap();

        store.delete(&id).await.unwrap();
        assert!(!path.exists());
        assert!(store.get(&id).await.unwrap().is_none());
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_is_not_found() {
        let (store, _dir) = open_store().await;
        let id = UserId::Number(1);
        let path = store.save_photo(&id, photo()).await.unwrap();
        store.put(&id, Embedding::new(vec![0.5]), &path).await.unwrap();

        let err = store.delete(&UserId::Number(404)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(UserId::Number(404))));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_photo() {
        let (store, _dir) = open_store().await;
        let id = UserId::Number(3);
        store
            .put(&id, Embedding::new(vec![0.5]), Path::new("/nonexistent/photo.jpg"))
            .await
            .unwrap();
        store.delete(&id).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reads_legacy_record() {
        let (store, dir) = open_store().await;
        std::fs::write(
            dir.path().join("user_12.json"),
            r#"{"user_id": 12, "encoding": [0.5, 0.25], "photo_path": "face_data/user_12_1.jpg", "registered_at": "2024-01-02T03:04:05.678901"}"#,
        )
        .unwrap();

        let all = store.get_all().await.unwrap();
        assert_eq!(all, vec![(UserId::Number(12), Embedding::new(vec![0.5, 0.25]))]);
    }

    #[tokio::test]
    async fn test_put_overwrites_corrupt_record() {
        let (store, dir) = open_store().await;
        std::fs::write(dir.path().join("user_1.json"), b"{not json").unwrap();

        let id = UserId::Number(1);
        let path = store.save_photo(&id, photo()).await.unwrap();
        store.put(&id, Embedding::new(vec![0.5]), &path).await.unwrap();

        let all = store.get_all().await.unwrap();
        assert_eq!(all, vec![(id, Embedding::new(vec![0.5]))]);
    }

    #[tokio::test]
    async fn test_delete_removes_corrupt_record() {
        let (store, dir) = open_store().await;
        let file = dir.path().join("user_1.json");
        std::fs::write(&file, b"{not json").unwrap();

        store.delete(&UserId::Number(1)).await.unwrap();
        assert!(!file.exists());
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_an_error() {
        let (store, dir) = open_store().await;
        std::fs::write(dir.path().join("user_1.json"), b"{not json").unwrap();
        assert!(matches!(store.get_all().await, Err(StoreError::Corrupt { .. })));
    }
}
