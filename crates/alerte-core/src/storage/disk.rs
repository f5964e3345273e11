use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use super::CacheStorage;
use crate::error::StorageError;
use crate::request::{CachedEntry, RequestKey};

/// Extension of the per-entry metadata file
const META_EXTENSION: &str = "json";

/// Extension of the per-entry body snapshot
const BODY_EXTENSION: &str = "body";

/// Prefix of directories holding a batch that is still being written
const STAGING_PREFIX: &str = ".staging-";

/// Staging directories untouched for this long belong to a dead install
const STALE_STAGING_AGE: Duration = Duration::from_secs(60 * 60);

/// Bytes escaped in generation directory names. Dots are escaped too, so an
/// encoded name never starts with one.
const GENERATION_ESCAPES: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct EntryFile {
    key: RequestKey,
    entry: CachedEntry,
}

/// Cache storage backed by a directory tree:
///
/// ```text
/// <root>/<generation>/<sha256 of key>.json   key, status, headers, cached_at
/// <root>/<generation>/<sha256 of key>.body   raw body bytes
/// <root>/.staging-<generation>-<pid>-<n>/    batch being written
/// ```
///
/// Generation directories are percent-encoded. Within an entry the metadata
/// file is written last, so an entry without one is treated as absent.
/// `put_all` writes into a staging directory and renames it into place, so
/// a batch for a new generation is visible completely or not at all.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generation_dir(&self, generation: &str) -> PathBuf {
        self.root.join(generation_dir_name(generation))
    }

    fn staging_dir(&self, generation: &str) -> PathBuf {
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        self.root.join(format!(
            "{}{}-{}-{}",
            STAGING_PREFIX,
            generation_dir_name(generation),
            std::process::id(),
            seq
        ))
    }

    /// Remove staging directories of this generation left behind by
    /// installs that died before promoting them.
    async fn sweep_stale_staging(&self, generation: &str) {
        let prefix = format!("{}{}-", STAGING_PREFIX, generation_dir_name(generation));
        let Ok(mut dir) = fs::read_dir(&self.root).await else {
            return;
        };
        while let Ok(Some(item)) = dir.next_entry().await {
            let is_ours = item
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(&prefix));
            if !is_ours {
                continue;
            }
            let stale = item
                .metadata()
                .await
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                .is_some_and(|age| age >= STALE_STAGING_AGE);
            if stale {
                debug!(path = ?item.path(), "Removing abandoned staging directory");
                if let Err(e) = fs::remove_dir_all(item.path()).await {
                    warn!(path = ?item.path(), error = %e, "Failed to remove abandoned staging directory");
                }
            }
        }
    }
}

fn generation_dir_name(generation: &str) -> String {
    utf8_percent_encode(generation, GENERATION_ESCAPES).to_string()
}

/// Generation id stored in a directory, or `None` for directories this
/// storage would never have created.
fn generation_from_dir_name(name: &str) -> Option<String> {
    let decoded = percent_decode_str(name).decode_utf8().ok()?;
    (generation_dir_name(&decoded) == name).then(|| decoded.into_owned())
}

fn entry_paths(dir: &Path, key: &RequestKey) -> (PathBuf, PathBuf) {
    let mut hasher = Sha256::new();
    hasher.update(key.method.as_bytes());
    hasher.update(b" ");
    hasher.update(key.url.as_bytes());
    let stem = format!("{:x}", hasher.finalize());
    (
        dir.join(format!("{}.{}", stem, META_EXTENSION)),
        dir.join(format!("{}.{}", stem, BODY_EXTENSION)),
    )
}

async fn write_entry(dir: &Path, key: &RequestKey, entry: CachedEntry) -> Result<(), StorageError> {
    let (meta_path, body_path) = entry_paths(dir, key);

    fs::write(&body_path, &entry.response.body)
        .await
        .map_err(|e| StorageError::io(format!("write body of {}", key), e))?;

    let file = EntryFile {
        key: key.clone(),
        entry,
    };
    let contents = serde_json::to_string_pretty(&file)
        .map_err(|e| StorageError::corrupt(format!("encode {}", key), e))?;
    fs::write(&meta_path, contents)
        .await
        .map_err(|e| StorageError::io(format!("write metadata of {}", key), e))
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

/// Move staged files into an existing generation, bodies before metadata.
async fn merge_into(staging: &Path, target: &Path) -> Result<(), StorageError> {
    let context = format!("merge staged entries into {}", target.display());
    let mut dir = fs::read_dir(staging)
        .await
        .map_err(|e| StorageError::io(context.clone(), e))?;

    let mut files = Vec::new();
    while let Some(item) = dir
        .next_entry()
        .await
        .map_err(|e| StorageError::io(context.clone(), e))?
    {
        files.push(item.path());
    }
    files.sort_by_key(|path| {
        path.extension().and_then(|ext| ext.to_str()) == Some(META_EXTENSION)
    });

    for path in files {
        if let Some(name) = path.file_name() {
            fs::rename(&path, target.join(name))
                .await
                .map_err(|e| StorageError::io(context.clone(), e))?;
        }
    }
    Ok(())
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn generations(&self) -> Result<Vec<String>, StorageError> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io("list generations", e)),
        };

        let mut generations = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| StorageError::io("list generations", e))?
        {
            let is_dir = item
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            match item.file_name().to_str().and_then(generation_from_dir_name) {
                Some(name) => generations.push(name),
                None => debug!(path = ?item.path(), "Skipping foreign directory in cache root"),
            }
        }
        generations.sort();
        Ok(generations)
    }

    async fn open(&self, generation: &str) -> Result<(), StorageError> {
        fs::create_dir_all(self.generation_dir(generation))
            .await
            .map_err(|e| StorageError::io(format!("open generation {}", generation), e))
    }

    async fn put(
        &self,
        generation: &str,
        key: &RequestKey,
        entry: CachedEntry,
    ) -> Result<(), StorageError> {
        self.open(generation).await?;
        write_entry(&self.generation_dir(generation), key, entry).await?;
        debug!(generation, key = %key, "Stored cache entry");
        Ok(())
    }

    async fn put_all(
        &self,
        generation: &str,
        entries: Vec<(RequestKey, CachedEntry)>,
    ) -> Result<(), StorageError> {
        self.sweep_stale_staging(generation).await;

        let staging = self.staging_dir(generation);
        let target = self.generation_dir(generation);
        let count = entries.len();

        let staged = async {
            fs::create_dir_all(&staging)
                .await
                .map_err(|e| StorageError::io(format!("stage generation {}", generation), e))?;
            for (key, entry) in entries {
                write_entry(&staging, &key, entry).await?;
            }
            if let Err(e) = fs::rename(&staging, &target).await {
                // Rename cannot replace a populated directory
                if !is_dir(&target).await {
                    return Err(StorageError::io(
                        format!("promote generation {}", generation),
                        e,
                    ));
                }
                merge_into(&staging, &target).await?;
            }
            Ok::<(), StorageError>(())
        }
        .await;

        if let Err(e) = fs::remove_dir_all(&staging).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = ?staging, error = %e, "Failed to remove staging directory");
            }
        }
        staged?;

        debug!(generation, entries = count, "Stored cache batch");
        Ok(())
    }

    async fn lookup(
        &self,
        generation: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedEntry>, StorageError> {
        let (meta_path, body_path) = entry_paths(&self.generation_dir(generation), key);

        let contents = match fs::read_to_string(&meta_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(format!("read metadata of {}", key), e)),
        };
        let file: EntryFile = serde_json::from_str(&contents)
            .map_err(|e| StorageError::corrupt(format!("parse metadata of {}", key), e))?;
        if file.key != *key {
            return Ok(None);
        }

        let body = fs::read(&body_path)
            .await
            .map_err(|e| StorageError::io(format!("read body of {}", key), e))?;

        let mut entry = file.entry;
        entry.response.body = body;
        Ok(Some(entry))
    }

    async fn keys(&self, generation: &str) -> Result<Vec<RequestKey>, StorageError> {
        let context = format!("list entries of {}", generation);
        let mut dir = match fs::read_dir(self.generation_dir(generation)).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(context, e)),
        };

        let mut keys = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| StorageError::io(context.clone(), e))?
        {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(META_EXTENSION) {
                continue;
            }
            let contents = fs::read_to_string(&path)
                .await
                .map_err(|e| StorageError::io(context.clone(), e))?;
            let file: EntryFile = serde_json::from_str(&contents)
                .map_err(|e| StorageError::corrupt(format!("parse {}", path.display()), e))?;
            keys.push(file.key);
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, generation: &str) -> Result<bool, StorageError> {
        match fs::remove_dir_all(self.generation_dir(generation)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(format!("delete generation {}", generation), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Response;

    fn entry(body: &str) -> CachedEntry {
        CachedEntry::new(Response::new(200, body))
    }

    #[test]
    fn test_generation_dir_names() {
        for name in ["alerte-calendrier-v1", "v1.2", "..", "été/ç"] {
            let encoded = generation_dir_name(name);
            assert!(!encoded.contains('/'));
            assert!(!encoded.starts_with('.'));
            assert_eq!(generation_from_dir_name(&encoded).as_deref(), Some(name));
        }
        assert_eq!(generation_from_dir_name("abc%4"), None);
        assert_eq!(generation_from_dir_name("%+1"), None);
        assert_eq!(generation_from_dir_name(".staging-v1-1-0"), None);
    }

    #[tokio::test]
    async fn test_entries_survive_a_new_storage_handle() {
        let dir = tempfile::tempdir().unwrap();
        let key = RequestKey::get("http://localhost:8080/icon-192.png");
        let response = Response::new(200, vec![0x89, b'P', b'N', b'G'])
            .with_header("content-type", "image/png");

        DiskStorage::new(dir.path())
            .put("alerte-calendrier-v1", &key, CachedEntry::new(response.clone()))
            .await
            .unwrap();

        let reopened = DiskStorage::new(dir.path());
        let entry = reopened
            .lookup("alerte-calendrier-v1", &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.response, response);
        assert_eq!(
            reopened.keys("alerte-calendrier-v1").await.unwrap(),
            vec![key]
        );
    }

    #[tokio::test]
    async fn test_long_urls_are_stored() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path());
        let key = RequestKey::get(&format!("http://localhost:8080/assets/{}.js", "a".repeat(300)));

        storage.put("v1", &key, entry("bundle")).await.unwrap();

        let stored = storage.lookup("v1", &key).await.unwrap().unwrap();
        assert_eq!(stored.response.body, b"bundle");
        assert_eq!(storage.keys("v1").await.unwrap(), vec![key]);
    }

    #[tokio::test]
    async fn test_missing_root_and_entries_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path().join("not-created"));

        assert!(storage.generations().await.unwrap().is_empty());
        assert!(storage.keys("v1").await.unwrap().is_empty());
        assert!(storage
            .lookup("v1", &RequestKey::get("/"))
            .await
            .unwrap()
            .is_none());
        assert!(!storage.delete("v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_generations_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path());
        storage.open("alerte-calendrier-v1").await.unwrap();
        storage.open("alerte-calendrier-v2").await.unwrap();
        std::fs::write(dir.path().join("stray.txt"), "not a generation").unwrap();
        std::fs::create_dir(dir.path().join("%+1")).unwrap();

        assert_eq!(
            storage.generations().await.unwrap(),
            vec!["alerte-calendrier-v1", "alerte-calendrier-v2"]
        );

        assert!(storage.delete("alerte-calendrier-v1").await.unwrap());
        assert_eq!(
            storage.generations().await.unwrap(),
            vec!["alerte-calendrier-v2"]
        );
    }

    #[tokio::test]
    async fn test_put_all_promotes_a_new_generation() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path());
        let keys = [RequestKey::get("/"), RequestKey::get("/index.html")];

        storage
            .put_all(
                "v1",
                keys.iter().map(|key| (key.clone(), entry(&key.url))).collect(),
            )
            .await
            .unwrap();

        assert_eq!(storage.generations().await.unwrap(), vec!["v1"]);
        assert_eq!(storage.keys("v1").await.unwrap(), keys.to_vec());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|item| item.ok())
            .filter(|item| item.file_name().to_string_lossy().starts_with(STAGING_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_put_all_merges_into_existing_generation() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path());
        let kept = RequestKey::get("/kept.js");
        let replaced = RequestKey::get("/index.html");
        storage.put("v1", &kept, entry("kept")).await.unwrap();
        storage.put("v1", &replaced, entry("old")).await.unwrap();

        storage
            .put_all("v1", vec![(replaced.clone(), entry("new"))])
            .await
            .unwrap();

        let page = storage.lookup("v1", &replaced).await.unwrap().unwrap();
        assert_eq!(page.response.body, b"new");
        assert!(storage.lookup("v1", &kept).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_interrupted_batch_is_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path());
        let key = RequestKey::get("/");

        // What an install killed between two writes leaves behind
        let staging = dir.path().join(format!("{}v1-4242-0", STAGING_PREFIX));
        std::fs::create_dir_all(&staging).unwrap();
        write_entry(&staging, &key, entry("partial")).await.unwrap();

        assert!(storage.generations().await.unwrap().is_empty());
        assert!(storage.lookup("v1", &key).await.unwrap().is_none());
    }
}
