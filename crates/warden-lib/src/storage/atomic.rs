// ============================
// warden-lib/src/storage/atomic.rs
// ============================
//! Crash-safe file primitives.
//!
//! Every record write goes through [`write_json`]: serialize, write to a
//! sibling `<path>.tmp`, fsync, then rename over the target. A failure at any
//! point before the rename leaves the target untouched and removes the temp
//! file; a crash between the two phases leaves only a `.tmp` behind, which
//! [`cleanup_orphaned_temp`] removes on the next start.
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::{fs as tokio_fs, io::AsyncWriteExt};

use super::StorageError;

pub const TMP_SUFFIX: &str = ".tmp";

/// `path` with `.tmp` appended to its file name.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

/// Atomically replace `path` with the JSON form of `record`.
pub async fn write_json<T>(path: &Path, record: &T) -> Result<(), StorageError>
where
    T: Serialize + ?Sized,
{
    let bytes = serde_json::to_vec_pretty(record)?;
    write_bytes(path, &bytes).await
}

/// Atomically replace `path` with `bytes`.
pub async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        tokio_fs::create_dir_all(parent).await?;
    }

    let tmp = tmp_path(path);
    if let Err(err) = prepare(&tmp, bytes).await {
        discard(&tmp).await;
        return Err(err.into());
    }
    if let Err(err) = tokio_fs::rename(&tmp, path).await {
        discard(&tmp).await;
        return Err(err.into());
    }
    Ok(())
}

async fn prepare(tmp: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio_fs::File::create(tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

async fn discard(tmp: &Path) {
    if let Err(err) = tokio_fs::remove_file(tmp).await {
        if err.kind() != ErrorKind::NotFound {
            tracing::warn!(path = %tmp.display(), error = %err, "failed to remove temp file");
        }
    }
}

/// Read and decode `path`.
///
/// A missing file is `Ok(None)`. A file that does not decode is logged and
/// also reported as `Ok(None)`, so one bad record cannot take the whole auth
/// path down. Other I/O failures are returned.
pub async fn read_json<T>(path: &Path) -> Result<Option<T>, StorageError>
where
    T: DeserializeOwned,
{
    let bytes = match tokio_fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "corrupt record treated as absent");
            Ok(None)
        },
    }
}

/// Like [`read_json`] but substitutes `T::default()` for an absent record.
pub async fn read_json_or_default<T>(path: &Path) -> Result<T, StorageError>
where
    T: DeserializeOwned + Default,
{
    Ok(read_json(path).await?.unwrap_or_default())
}

pub async fn exists(path: &Path) -> bool {
    tokio_fs::try_exists(path).await.unwrap_or(false)
}

/// Remove `path`. Removing an absent file succeeds.
pub async fn delete(path: &Path) -> Result<(), StorageError> {
    match tokio_fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Append one line (a newline is added) to `path`, creating it if needed.
pub async fn append_line(path: &Path, line: &str) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        tokio_fs::create_dir_all(parent).await?;
    }
    let mut file = tokio_fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    file.write_all(&buf).await?;
    file.flush().await?;
    Ok(())
}

/// Remove every leftover `*.tmp` under `dir`, recursively. Returns the
/// number of files removed. The interrupted writes are not replayed.
pub async fn cleanup_orphaned_temp(dir: &Path) -> Result<usize, StorageError> {
    let mut removed = 0;
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = match tokio_fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(TMP_SUFFIX))
            {
                tracing::info!(path = %path.display(), "removing orphaned temp file");
                delete(&path).await?;
                removed += 1;
            }
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serializer};
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: u32,
    }

    /// Serializes a few fields and then fails.
    struct Exploding;

    impl Serialize for Exploding {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            use serde::ser::{Error, SerializeMap};
            let mut map = serializer.serialize_map(None)?;
            map.serialize_entry("name", "half-written")?;
            Err(S::Error::custom("injected failure"))
        }
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("record.json");
        let record = Record { name: "a".into(), count: 3 };

        write_json(&path, &record).await.unwrap();
        let back: Option<Record> = read_json(&path).await.unwrap();
        assert_eq!(back, Some(record));
        assert!(!exists(&tmp_path(&path)).await);
    }

    #[tokio::test]
    async fn test_failed_serialization_leaves_original() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("record.json");
        let original = Record { name: "original".into(), count: 1 };
        write_json(&path, &original).await.unwrap();

        let result = write_json(&path, &Exploding).await;
        assert!(matches!(result, Err(StorageError::Serialization(_))));

        let back: Option<Record> = read_json(&path).await.unwrap();
        assert_eq!(back, Some(original));
        assert!(!exists(&tmp_path(&path)).await);
    }

    #[tokio::test]
    async fn test_missing_and_corrupt_read_as_absent() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.json");
        assert_eq!(read_json::<Record>(&missing).await.unwrap(), None);

        let corrupt = dir.path().join("corrupt.json");
        tokio_fs::write(&corrupt, b"{ not json").await.unwrap();
        assert!(exists(&corrupt).await);
        assert_eq!(read_json::<Record>(&corrupt).await.unwrap(), None);

        let fallback: Vec<u32> = read_json_or_default(&corrupt).await.unwrap();
        assert!(fallback.is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.json");
        write_json(&path, &1u32).await.unwrap();
        delete(&path).await.unwrap();
        delete(&path).await.unwrap();
        assert!(!exists(&path).await);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_temp_files() {
        let dir = TempDir::new().unwrap();
        let keep = dir.path().join("users").join("u1").join("user.json");
        write_json(&keep, &1u32).await.unwrap();

        let stale_root = dir.path().join("invitations.json.tmp");
        let stale_nested = tmp_path(&keep);
        tokio_fs::write(&stale_root, b"partial").await.unwrap();
        tokio_fs::write(&stale_nested, b"partial").await.unwrap();

        let removed = cleanup_orphaned_temp(dir.path()).await.unwrap();
        assert_eq!(removed, 2);
        assert!(exists(&keep).await);
        assert!(!exists(&stale_root).await);
        assert!(!exists(&stale_nested).await);
    }

    #[tokio::test]
    async fn test_append_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.log");
        append_line(&path, "{\"a\":1}").await.unwrap();
        append_line(&path, "{\"a\":2}").await.unwrap();
        let content = tokio_fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "{\"a\":1}\n{\"a\":2}\n");
    }
}
