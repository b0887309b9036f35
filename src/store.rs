use crate::util::*;
use anyhow::{Context as _, Result};
use fs2::FileExt;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    io::SeekFrom,
    marker::PhantomData,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::Mutex,
};

async fn open_read_append(path: impl AsRef<Path>) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(&path)
        .await?)
}

/// A JSON-backed file that is rewritten atomically on every [`PersistentStore::store`] call and
/// held open under an exclusive file lock for the lifetime of the process. Backs both
/// `events.json` and `responses.json` (spec.md §6.1); there is no incremental journal, each save
/// is a full rewrite.
#[derive(Debug)]
pub struct PersistentStore<T> {
    path: PathBuf,
    file: Mutex<File>,
    data_type: PhantomData<T>,
}

impl<T> PersistentStore<T>
where
    T: Default + Serialize + DeserializeOwned,
{
    /// Opens (creating if needed) the JSON store file at `path` and takes an exclusive lock on
    /// it. Fails if another process (or another `PersistentStore` in this one) already holds the
    /// lock, which guards against two stores silently clobbering each other's writes.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.with_context(|| {
                    format!("Failed to create parent dir for {}", path.display())
                })?;
            }
        }

        let file = open_read_append(&path)
            .await
            .with_context(|| format!("Failed to open store file: {}", path.display()))?;

        let std_file = file
            .try_into_std()
            .expect("No operations should be in-flight");
        std_file.try_lock_exclusive().with_context(|| {
            format!(
                "Failed to lock store file ({}) exclusively; is another instance running?",
                path.display()
            )
        })?;

        Ok(PersistentStore {
            path,
            file: Mutex::new(File::from_std(std_file)),
            data_type: PhantomData,
        })
    }

    /// Loads and deserializes the full contents of the store file. Per spec.md §4.1, a missing
    /// or empty file is not an error: it yields `T::default()` so the caller proceeds with an
    /// empty cache. Malformed JSON surfaces as an `Err` so the caller can log and fall back
    /// without overwriting the file.
    pub async fn load(&self) -> Result<T> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(0))
            .await
            .context("Couldn't seek to start of file")?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .await
            .context("Failed to read store file")?;

        if bytes.is_empty() {
            return Ok(T::default());
        }

        let value = serde_json::from_slice(&bytes).with_context(|| {
            format!(
                "Failed to deserialize store file as {}",
                std::any::type_name::<T>()
            )
        })?;
        Ok(value)
    }

    /// Serializes `value` and atomically replaces the store file's contents via a tempfile +
    /// rename, so a crash mid-write never leaves a half-written file on disk.
    pub async fn store(&self, value: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(value)
            .with_context(|| format!("Failed to serialize {}", std::any::type_name::<T>()))?;

        let mut file = self.file.lock().await;

        let (temppath, mut tempfile) = tempfile().await.context("Unable to create tempfile")?;
        tempfile
            .write_all(&json)
            .await
            .context("Failed to write store file")?;
        tempfile
            .flush()
            .await
            .context("Failed to flush store file")?;
        std::mem::drop(tempfile);

        fs::rename(&temppath, &self.path).await.with_context(|| {
            format!(
                "Failed to atomically replace store file: {}",
                self.path.display()
            )
        })?;

        // Reopen the file now that it's been replaced; the old fd still points at the unlinked
        // inode otherwise.
        *file = open_read_append(&self.path)
            .await
            .with_context(|| format!("Failed to reopen store file: {}", self.path.display()))?;

        Ok(())
    }
}

/// Reads a sibling legacy file (e.g. the old `waitlist.json`) without taking a lock on it, for
/// the migration path in [`crate::persistence`]. `None` if the file doesn't exist.
pub async fn read_optional(path: impl AsRef<Path>) -> Result<Option<Vec<u8>>> {
    match fs::read(path.as_ref()).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.as_ref().display())),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Dummy {
        name: String,
        n: u32,
    }

    #[tokio::test]
    async fn test_store_lock_collision() {
        let tempdir = TempDir::new().unwrap();
        let path = tempdir.path().join("foo.json");

        let _store = PersistentStore::<Dummy>::open(&path).await.unwrap();
        assert!(PersistentStore::<Dummy>::open(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_store_roundtrip() {
        let tempdir = TempDir::new().unwrap();
        let path = tempdir.path().join("foo.json");
        let store = PersistentStore::<Dummy>::open(&path).await.unwrap();

        let value = Dummy {
            name: "foobar".to_owned(),
            n: 42,
        };
        store.store(&value).await.unwrap();
        assert_eq!(store.load().await.unwrap(), value);
    }

    #[tokio::test]
    async fn test_store_missing_file_is_default() {
        let tempdir = TempDir::new().unwrap();
        let path = tempdir.path().join("missing.json");
        let store = PersistentStore::<Dummy>::open(&path).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Dummy::default());
    }
}
