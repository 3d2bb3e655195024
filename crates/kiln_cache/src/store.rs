//! The cache store: fingerprint-keyed entries on disk.
//!
//! Entries live at `<dir>/objects/<xx>/<fingerprint>.entry`, where `xx` is the
//! first two hex digits of the fingerprint. Size is bounded the same way per
//! shard after each insert (each shard gets 1/256 of the limit) and globally
//! by [`CacheStore::trim`], evicting least recently used entries first.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use kiln_common::{ByteSize, ContentHash};
use kiln_config::CacheSettings;
use serde::Serialize;

use crate::entry::{decode_entry, encode_entry, CacheEntry};
use crate::error::CacheError;
use crate::fs::{atomic_write, remove_best_effort, TMP_MARKER};

/// Subdirectory holding all entry shards.
const OBJECTS_SUBDIR: &str = "objects";

/// File extension for entries.
const ENTRY_EXT: &str = "entry";

/// Number of shard directories (two hex digits).
const SHARD_COUNT: u64 = 256;

/// Trimming stops once the store is at or below this share of the limit.
const TRIM_TARGET_PERCENT: u64 = 90;

/// Temporary files older than this are leftovers of crashed writers.
const STALE_TMP_AGE: Duration = Duration::from_secs(60 * 60);

/// Size summary of the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of entries.
    pub entries: u64,
    /// Total size of all entry files in bytes.
    pub bytes: u64,
}

/// Outcome of a trim pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrimReport {
    /// Entries removed.
    pub removed: u64,
    /// Bytes freed.
    pub freed: u64,
    /// Store size after trimming.
    pub remaining: CacheStats,
}

/// One entry file seen while scanning.
struct EntryFile {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

/// Fingerprint-keyed store of compiled objects.
///
/// Safe to use from many processes at once: inserts are atomic renames,
/// lookups validate what they read, and maintenance tolerates files vanishing
/// underneath it.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    compression: Option<u32>,
    max_size: ByteSize,
}

impl CacheStore {
    /// Creates a store from resolved settings. Nothing is touched on disk.
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            root: settings.dir.clone(),
            compression: settings.compress.then_some(settings.compress_level),
            max_size: settings.max_size,
        }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the file path for the entry with the given fingerprint.
    pub fn entry_path(&self, key: &ContentHash) -> PathBuf {
        let hex = key.to_string();
        self.root
            .join(OBJECTS_SUBDIR)
            .join(&hex[..2])
            .join(format!("{hex}.{ENTRY_EXT}"))
    }

    /// Looks up an entry.
    ///
    /// Returns `None` when the entry is absent or fails validation. A hit
    /// refreshes the entry's modification time so trimming keeps it longer.
    pub fn lookup(&self, key: &ContentHash) -> Option<CacheEntry> {
        let path = self.entry_path(key);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(
                        target: "kiln.cache",
                        path = %path.display(),
                        error = %err,
                        "failed to read cache entry"
                    );
                }
                return None;
            }
        };

        let Some(entry) = decode_entry(&raw) else {
            tracing::debug!(
                target: "kiln.cache",
                path = %path.display(),
                "discarding invalid cache entry"
            );
            remove_best_effort(&path);
            return None;
        };

        touch(&path);
        Some(entry)
    }

    /// Returns true if a valid entry exists for `key`.
    pub fn contains(&self, key: &ContentHash) -> bool {
        fs::read(self.entry_path(key))
            .ok()
            .and_then(|raw| decode_entry(&raw))
            .is_some()
    }

    /// Stores an entry, replacing any previous one for the same fingerprint.
    ///
    /// Afterwards older entries in the same shard are evicted until the shard
    /// fits its share of the size limit. The new entry itself is never
    /// evicted, even when it alone exceeds that share.
    pub fn insert(&self, key: &ContentHash, entry: &CacheEntry) -> Result<(), CacheError> {
        let bytes = encode_entry(entry, self.compression)?;
        let path = self.entry_path(key);
        atomic_write(&path, &bytes)?;
        tracing::debug!(
            target: "kiln.cache",
            key = %key,
            size = bytes.len(),
            "stored cache entry"
        );

        if let Some(shard) = path.parent() {
            let limit = (self.max_size.bytes() / SHARD_COUNT).max(1);
            let files = scan_dir(shard)?;
            let total: u64 = files.iter().map(|f| f.size).sum();
            if total > limit {
                evict(files, limit, Some(path.as_path()));
            }
        }
        Ok(())
    }

    /// Returns the number and total size of stored entries.
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let files = self.scan_all()?;
        Ok(summarize(&files))
    }

    /// Evicts least recently used entries until the store fits in `limit`.
    ///
    /// Eviction continues down to 90% of `limit` so that the next few inserts
    /// don't immediately trigger another pass. Stale temporary files are
    /// removed as well.
    pub fn trim(&self, limit: ByteSize) -> Result<TrimReport, CacheError> {
        let files = self.scan_all()?;
        let before = summarize(&files);
        if before.bytes <= limit.bytes() {
            return Ok(TrimReport {
                removed: 0,
                freed: 0,
                remaining: before,
            });
        }

        let (removed, freed) = evict(files, limit.bytes(), None);
        Ok(TrimReport {
            removed,
            freed,
            remaining: CacheStats {
                entries: before.entries - removed,
                bytes: before.bytes - freed,
            },
        })
    }

    /// Trims the store to its configured maximum size.
    pub fn trim_to_max(&self) -> Result<TrimReport, CacheError> {
        self.trim(self.max_size)
    }

    /// Removes every entry. Returns the number removed.
    pub fn clear(&self) -> Result<u64, CacheError> {
        let files = self.scan_all()?;
        let mut removed = 0;
        for file in &files {
            if fs::remove_file(&file.path).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Collects every entry file across all shards.
    fn scan_all(&self) -> Result<Vec<EntryFile>, CacheError> {
        let objects = self.root.join(OBJECTS_SUBDIR);
        if !objects.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let shards = fs::read_dir(&objects).map_err(|e| CacheError::io(&objects, e))?;
        for shard in shards {
            let shard = shard.map_err(|e| CacheError::io(&objects, e))?;
            let path = shard.path();
            if path.is_dir() {
                files.extend(scan_dir(&path)?);
            }
        }
        Ok(files)
    }
}

/// Lists entry files in one shard, removing stale temporary files on the way.
fn scan_dir(dir: &Path) -> Result<Vec<EntryFile>, CacheError> {
    let mut files = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(err) => return Err(CacheError::io(dir, err)),
    };

    let now = SystemTime::now();
    for entry in entries {
        let entry = entry.map_err(|e| CacheError::io(dir, e))?;
        let path = entry.path();
        // Another process may delete files while we scan.
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.contains(TMP_MARKER) {
            let age = now.duration_since(modified).unwrap_or_default();
            if age > STALE_TMP_AGE {
                remove_best_effort(&path);
            }
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
            continue;
        }

        files.push(EntryFile {
            path,
            size: meta.len(),
            modified,
        });
    }
    Ok(files)
}

fn summarize(files: &[EntryFile]) -> CacheStats {
    CacheStats {
        entries: files.len() as u64,
        bytes: files.iter().map(|f| f.size).sum(),
    }
}

/// Removes oldest files first until the total is within the trim target of
/// `limit`, never touching `keep`. Returns `(removed, freed)`.
fn evict(mut files: Vec<EntryFile>, limit: u64, keep: Option<&Path>) -> (u64, u64) {
    let target = limit / 100 * TRIM_TARGET_PERCENT;
    let mut total: u64 = files.iter().map(|f| f.size).sum();
    files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));

    let mut removed = 0;
    let mut freed = 0;
    for file in files {
        if total <= target {
            break;
        }
        if keep == Some(file.path.as_path()) {
            continue;
        }
        match fs::remove_file(&file.path) {
            Ok(()) => {
                removed += 1;
                freed += file.size;
            }
            // A concurrent trimmer got there first.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::debug!(
                    target: "kiln.cache",
                    path = %file.path.display(),
                    error = %err,
                    "failed to evict cache entry"
                );
                continue;
            }
        }
        total = total.saturating_sub(file.size);
    }
    tracing::debug!(target: "kiln.cache", removed, freed, "trimmed cache");
    (removed, freed)
}

/// Marks an entry as recently used. Best-effort.
fn touch(path: &Path) {
    let result = fs::OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|file| file.set_modified(SystemTime::now()));
    if let Err(err) = result {
        tracing::debug!(
            target: "kiln.cache",
            path = %path.display(),
            error = %err,
            "failed to refresh entry mtime"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_config::FingerprintMode;

    fn settings(dir: &Path, compress: bool, max_size: u64) -> CacheSettings {
        CacheSettings {
            dir: dir.to_path_buf(),
            max_size: ByteSize::new(max_size),
            compress,
            compress_level: 6,
            fingerprint: FingerprintMode::Direct,
        }
    }

    fn make_store() -> (tempfile::TempDir, CacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(&settings(dir.path(), true, 1 << 30));
        (dir, store)
    }

    fn entry(fill: u8, len: usize) -> CacheEntry {
        CacheEntry {
            object: vec![fill; len],
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    fn age(path: &Path, secs_ago: u64) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(secs_ago))
            .unwrap();
    }

    #[test]
    fn lookup_miss_on_empty_store() {
        let (_dir, store) = make_store();
        assert!(store.lookup(&ContentHash::from_bytes(b"nothing")).is_none());
        assert!(!store.contains(&ContentHash::from_bytes(b"nothing")));
    }

    #[test]
    fn insert_then_lookup() {
        let (_dir, store) = make_store();
        let key = ContentHash::from_bytes(b"gcc -c main.c");
        let stored = CacheEntry {
            object: b"\x7fELF object bytes".to_vec(),
            stdout: Vec::new(),
            stderr: b"warning: unused\n".to_vec(),
        };
        store.insert(&key, &stored).unwrap();
        assert!(store.contains(&key));
        assert_eq!(store.lookup(&key), Some(stored));
    }

    #[test]
    fn uncompressed_store_works() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(&settings(dir.path(), false, 1 << 30));
        let key = ContentHash::from_bytes(b"k");
        store.insert(&key, &entry(7, 100)).unwrap();
        assert_eq!(store.lookup(&key), Some(entry(7, 100)));
    }

    #[test]
    fn entry_path_is_sharded() {
        let (dir, store) = make_store();
        let key = ContentHash::from_bytes(b"shard me");
        let hex = key.to_string();
        let path = store.entry_path(&key);
        assert_eq!(
            path,
            dir.path()
                .join("objects")
                .join(&hex[..2])
                .join(format!("{hex}.entry"))
        );
    }

    #[test]
    fn same_key_last_writer_wins() {
        let (_dir, store) = make_store();
        let key = ContentHash::from_bytes(b"dup");
        store.insert(&key, &entry(1, 10)).unwrap();
        store.insert(&key, &entry(2, 10)).unwrap();
        assert_eq!(store.lookup(&key), Some(entry(2, 10)));
    }

    #[test]
    fn corrupt_entry_is_miss_and_removed() {
        let (_dir, store) = make_store();
        let key = ContentHash::from_bytes(b"corrupt");
        let path = store.entry_path(&key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not an entry").unwrap();
        assert!(store.lookup(&key).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn concurrent_inserts_of_distinct_keys() {
        let (_dir, store) = make_store();
        let keys: Vec<ContentHash> = (0..16u8).map(|i| ContentHash::from_bytes(&[i])).collect();

        std::thread::scope(|scope| {
            for (i, key) in keys.iter().enumerate() {
                let store = &store;
                scope.spawn(move || store.insert(key, &entry(i as u8, 512)).unwrap());
            }
        });

        for (i, key) in keys.iter().enumerate() {
            assert_eq!(store.lookup(key), Some(entry(i as u8, 512)));
        }
        assert_eq!(store.stats().unwrap().entries, 16);
    }

    #[test]
    fn stats_counts_entries_and_bytes() {
        let (_dir, store) = make_store();
        assert_eq!(store.stats().unwrap(), CacheStats::default());
        store.insert(&ContentHash::from_bytes(b"a"), &entry(1, 10)).unwrap();
        store.insert(&ContentHash::from_bytes(b"b"), &entry(2, 10)).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.entries, 2);
        assert!(stats.bytes > 20);
    }

    #[test]
    fn trim_evicts_least_recently_used() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(&settings(dir.path(), false, 1 << 30));
        let old = ContentHash::from_bytes(b"old");
        let new = ContentHash::from_bytes(b"new");
        store.insert(&old, &entry(1, 1000)).unwrap();
        store.insert(&new, &entry(2, 1000)).unwrap();
        age(&store.entry_path(&old), 3600);

        let one_entry = fs::metadata(store.entry_path(&new)).unwrap().len();
        let report = store.trim(ByteSize::new(one_entry + one_entry / 2)).unwrap();

        assert_eq!(report.removed, 1);
        assert!(!store.contains(&old));
        assert!(store.contains(&new));
        assert_eq!(report.remaining.entries, 1);
    }

    #[test]
    fn trim_under_limit_is_noop() {
        let (_dir, store) = make_store();
        store.insert(&ContentHash::from_bytes(b"a"), &entry(1, 10)).unwrap();
        let report = store.trim(ByteSize::new(1 << 20)).unwrap();
        assert_eq!(report.removed, 0);
        assert_eq!(report.remaining.entries, 1);
    }

    #[test]
    fn lookup_refreshes_recency() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(&settings(dir.path(), false, 1 << 30));
        let a = ContentHash::from_bytes(b"a");
        let b = ContentHash::from_bytes(b"b");
        store.insert(&a, &entry(1, 1000)).unwrap();
        store.insert(&b, &entry(2, 1000)).unwrap();
        age(&store.entry_path(&a), 7200);
        age(&store.entry_path(&b), 3600);

        // Using `a` makes `b` the least recently used.
        assert!(store.lookup(&a).is_some());
        let one_entry = fs::metadata(store.entry_path(&a)).unwrap().len();
        store.trim(ByteSize::new(one_entry + one_entry / 2)).unwrap();

        assert!(store.contains(&a));
        assert!(!store.contains(&b));
    }

    /// A key whose entry lands in the same shard as `key`.
    fn shard_neighbour(key: &ContentHash) -> ContentHash {
        let shard = key.to_string()[..2].to_string();
        (0u32..)
            .map(|i| ContentHash::from_bytes(&i.to_le_bytes()))
            .find(|k| *k != *key && k.to_string()[..2] == shard)
            .unwrap()
    }

    #[test]
    fn oversized_entry_survives_its_own_insert() {
        let dir = tempfile::tempdir().unwrap();
        // Each shard may hold one byte; the entry alone is far larger.
        let store = CacheStore::new(&settings(dir.path(), false, 256));
        let key = ContentHash::from_bytes(b"big");
        store.insert(&key, &entry(0, 4096)).unwrap();
        assert_eq!(store.lookup(&key), Some(entry(0, 4096)));
        assert_eq!(store.stats().unwrap().entries, 1);
    }

    #[test]
    fn insert_evicts_older_entries_in_its_shard() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(&settings(dir.path(), false, 256));
        let old = ContentHash::from_bytes(b"old");
        let new = shard_neighbour(&old);

        store.insert(&old, &entry(1, 1000)).unwrap();
        age(&store.entry_path(&old), 3600);
        store.insert(&new, &entry(2, 1000)).unwrap();

        assert!(!store.contains(&old));
        assert_eq!(store.lookup(&new), Some(entry(2, 1000)));
    }

    #[test]
    fn stale_temp_files_are_removed() {
        let (_dir, store) = make_store();
        let key = ContentHash::from_bytes(b"a");
        store.insert(&key, &entry(1, 10)).unwrap();
        let shard = store.entry_path(&key).parent().unwrap().to_path_buf();
        let stale = shard.join("x.entry.tmp.1.0");
        let fresh = shard.join("y.entry.tmp.1.1");
        fs::write(&stale, b"partial").unwrap();
        fs::write(&fresh, b"partial").unwrap();
        age(&stale, 2 * 3600);

        let stats = store.stats().unwrap();
        assert_eq!(stats.entries, 1, "temp files are never counted");
        assert!(!stale.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn clear_removes_everything() {
        let (_dir, store) = make_store();
        for i in 0..5u8 {
            store.insert(&ContentHash::from_bytes(&[i]), &entry(i, 10)).unwrap();
        }
        assert_eq!(store.clear().unwrap(), 5);
        assert_eq!(store.stats().unwrap().entries, 0);
    }

    #[test]
    fn missing_root_has_empty_stats() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(&settings(&dir.path().join("absent"), true, 1 << 30));
        assert_eq!(store.stats().unwrap(), CacheStats::default());
        assert_eq!(store.clear().unwrap(), 0);
    }
}
