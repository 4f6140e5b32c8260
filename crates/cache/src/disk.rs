//! Persistent journaled disk cache with LRU eviction
//!
//! Entries are stored as one file per key in a flat directory. Every change is
//! recorded in an append-only journal so the cache index survives restarts:
//!
//! ```text
//! image-loader.disk-cache
//! 1
//! <app version>
//!
//! DIRTY <key>
//! CLEAN <key> <length> <written-at-millis>
//! READ <key>
//! REMOVE <key>
//! ```
//!
//! Writes go through an [`Editor`] into `<key>.tmp` and only become visible
//! once committed, so a crash mid-write never leaves a partial entry behind.
//! On open the journal is replayed; unreadable trailing records are discarded
//! and the journal is rewritten.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::key::KeyNamer;

const JOURNAL_FILE: &str = "journal";
const JOURNAL_FILE_TEMP: &str = "journal.tmp";
const JOURNAL_FILE_BACKUP: &str = "journal.bkp";
const MAGIC: &str = "image-loader.disk-cache";
const VERSION: &str = "1";
const TEMP_SUFFIX: &str = ".tmp";
const MAX_KEY_LEN: usize = 120;

/// Compact the journal once this many records are redundant
const REDUNDANT_OP_COMPACT_THRESHOLD: usize = 2000;

/// How the disk cache decides what to drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Never evict
    Unlimited,
    /// Keep the total size of clean entries at or below this many bytes
    TotalSize(u64),
    /// Keep at most this many clean entries
    FileCount(usize),
    /// Drop entries older than this on access
    MaxAge(Duration),
}

impl Default for EvictionPolicy {
    /// 25MB total size
    fn default() -> Self {
        EvictionPolicy::TotalSize(25 * 1024 * 1024)
    }
}

/// Statistics for monitoring disk cache performance
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskCacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped by the eviction policy
    pub evictions: u64,
    /// Number of readable entries
    pub entry_count: usize,
    /// Total bytes of readable entries
    pub disk_used: u64,
}

impl DiskCacheStats {
    /// Calculate cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Persistent identifier → bytes store.
///
/// Implementations must be safe for concurrent access to different
/// identifiers. Callers serialize access to a single identifier themselves.
pub trait DiskCache: Send + Sync {
    /// Root directory of the cache
    fn directory(&self) -> &Path;

    /// Open the stored bytes for `uri`, or `None` if absent. Corrupt entries
    /// are deleted and reported as absent.
    fn get(&self, uri: &str) -> Option<Snapshot>;

    /// Store everything readable from `source` under `uri`.
    ///
    /// Returns `Ok(false)` if the entry is currently being written by someone
    /// else. On error nothing is published.
    fn put(&self, uri: &str, source: &mut dyn Read) -> io::Result<bool>;

    /// Delete the entry for `uri`. Returns true if something was removed.
    fn remove(&self, uri: &str) -> bool;

    fn exists(&self, uri: &str) -> bool;

    /// Delete every entry not currently being written
    fn clear(&self);
}

impl<C: DiskCache + ?Sized> DiskCache for Arc<C> {
    fn directory(&self) -> &Path {
        (**self).directory()
    }

    fn get(&self, uri: &str) -> Option<Snapshot> {
        (**self).get(uri)
    }

    fn put(&self, uri: &str, source: &mut dyn Read) -> io::Result<bool> {
        (**self).put(uri, source)
    }

    fn remove(&self, uri: &str) -> bool {
        (**self).remove(uri)
    }

    fn exists(&self, uri: &str) -> bool {
        (**self).exists(uri)
    }

    fn clear(&self) {
        (**self).clear()
    }
}

/// Readable handle on a committed cache entry
#[derive(Debug)]
pub struct Snapshot {
    path: PathBuf,
    length: u64,
    file: File,
}

impl Snapshot {
    /// Open a file as a snapshot
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        let length = file.metadata()?.len();
        Ok(Self { path, length, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the entry in bytes
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Read the whole entry into memory
    pub fn into_bytes(mut self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.length as usize);
        self.file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

impl Read for Snapshot {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Record {
    Dirty(String),
    Clean {
        key: String,
        length: u64,
        written_at: u64,
    },
    Read(String),
    Remove(String),
}

impl Record {
    fn parse(line: &str) -> Option<Record> {
        let mut parts = line.split(' ');
        let op = parts.next()?;
        let key = parts.next().filter(|k| is_valid_key(k))?.to_string();
        let record = match op {
            "DIRTY" => Record::Dirty(key),
            "READ" => Record::Read(key),
            "REMOVE" => Record::Remove(key),
            "CLEAN" => Record::Clean {
                key,
                length: parts.next()?.parse().ok()?,
                written_at: parts.next()?.parse().ok()?,
            },
            _ => return None,
        };
        parts.next().is_none().then_some(record)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Dirty(key) => write!(f, "DIRTY {key}"),
            Record::Clean {
                key,
                length,
                written_at,
            } => write!(f, "CLEAN {key} {length} {written_at}"),
            Record::Read(key) => write!(f, "READ {key}"),
            Record::Remove(key) => write!(f, "REMOVE {key}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Entry {
    /// Committed at least once
    readable: bool,
    /// An editor is open
    editing: bool,
    length: u64,
    written_at: u64,
}

#[derive(Default)]
struct JournalState {
    entries: HashMap<String, Entry>,
    /// Front = least recently used
    lru_queue: VecDeque<String>,
    /// Total bytes of readable entries
    size: u64,
    redundant_ops: usize,
    journal: Option<BufWriter<File>>,
    stats: DiskCacheStats,
}

impl JournalState {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.lru_queue.iter().position(|k| k == key) {
            if let Some(k) = self.lru_queue.remove(pos) {
                self.lru_queue.push_back(k);
            }
        } else {
            self.lru_queue.push_back(key.to_string());
        }
    }

    fn forget(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            if entry.readable {
                self.size = self.size.saturating_sub(entry.length);
            }
        }
        self.lru_queue.retain(|k| k != key);
    }

    fn readable_count(&self) -> usize {
        self.entries.values().filter(|e| e.readable).count()
    }

    fn append(&mut self, record: Record) -> io::Result<()> {
        let writer = self
            .journal
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "disk cache journal is closed"))?;
        writeln!(writer, "{record}")?;
        writer.flush()
    }

    fn over_limit(&self, policy: EvictionPolicy) -> bool {
        match policy {
            EvictionPolicy::TotalSize(max) => self.size > max,
            EvictionPolicy::FileCount(max) => self.readable_count() > max,
            EvictionPolicy::Unlimited | EvictionPolicy::MaxAge(_) => false,
        }
    }

    fn should_compact(&self) -> bool {
        self.redundant_ops >= REDUNDANT_OP_COMPACT_THRESHOLD
            && self.redundant_ops >= self.entries.len()
    }
}

fn is_journal_file(name: &str) -> bool {
    name == JOURNAL_FILE || name == JOURNAL_FILE_TEMP || name == JOURNAL_FILE_BACKUP
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
}

fn validate_key(key: &str) -> io::Result<()> {
    if is_valid_key(key) {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("disk cache keys must match [a-z0-9_-]{{1,{MAX_KEY_LEN}}}: {key:?}"),
        ))
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// Outcome of replaying an existing journal
enum Replay {
    /// Journal matches the index exactly; keep appending to it
    Clean,
    /// Index was repaired; the journal must be rewritten
    NeedsRebuild,
}

/// Journaled LRU disk cache
///
/// Thread-safe; the index is guarded by a mutex while entry bodies are
/// written outside it, so writes to different keys proceed in parallel.
///
/// ```no_run
/// use image_loader_cache::{DiskCache, EvictionPolicy, HashCodeKeyNamer, LruDiskCache};
///
/// let cache = LruDiskCache::open(
///     "/tmp/image-loader",
///     1,
///     EvictionPolicy::TotalSize(50 * 1024 * 1024),
///     Box::new(HashCodeKeyNamer),
/// )?;
/// cache.put("http://example.com/a.png", &mut &b"png bytes"[..])?;
/// let bytes = cache.get("http://example.com/a.png").map(|s| s.into_bytes());
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct LruDiskCache {
    directory: PathBuf,
    app_version: u32,
    policy: EvictionPolicy,
    namer: Box<dyn KeyNamer>,
    state: Mutex<JournalState>,
}

impl LruDiskCache {
    /// Open (or create) a cache in `directory`, replaying its journal.
    ///
    /// A journal written by a different `app_version`, or with an unreadable
    /// header, is discarded together with the entries it describes.
    pub fn open<P: AsRef<Path>>(
        directory: P,
        app_version: u32,
        policy: EvictionPolicy,
        namer: Box<dyn KeyNamer>,
    ) -> io::Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;

        let journal = directory.join(JOURNAL_FILE);
        let backup = directory.join(JOURNAL_FILE_BACKUP);
        if backup.exists() {
            if journal.exists() {
                fs::remove_file(&backup)?;
            } else {
                fs::rename(&backup, &journal)?;
            }
        }

        let cache = Self {
            directory,
            app_version,
            policy,
            namer,
            state: Mutex::new(JournalState::default()),
        };

        {
            let mut state = cache.state.lock();
            if journal.exists() {
                match cache.replay_journal(&mut state) {
                    Ok(Replay::Clean) => state.journal = Some(open_append(&journal)?),
                    Ok(Replay::NeedsRebuild) => cache.rebuild_journal(&mut state)?,
                    Err(err) => {
                        warn!(
                            directory = %cache.directory.display(),
                            error = %err,
                            "Disk cache journal unusable, starting empty"
                        );
                        cache.wipe(&mut state)?;
                        cache.rebuild_journal(&mut state)?;
                    }
                }
            } else {
                cache.rebuild_journal(&mut state)?;
            }
            cache.trim(&mut state)?;
            debug!(
                directory = %cache.directory.display(),
                entries = state.readable_count(),
                bytes = state.size,
                "Opened disk cache"
            );
        }

        Ok(cache)
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Total bytes of readable entries
    pub fn size(&self) -> u64 {
        self.state.lock().size
    }

    /// Number of readable entries
    pub fn len(&self) -> usize {
        self.state.lock().readable_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> DiskCacheStats {
        let state = self.state.lock();
        DiskCacheStats {
            entry_count: state.readable_count(),
            disk_used: state.size,
            ..state.stats
        }
    }

    /// Cache file name used for `uri`
    pub fn key_for(&self, uri: &str) -> String {
        self.namer.name(uri)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.directory.join(key)
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{key}{TEMP_SUFFIX}"))
    }

    fn is_expired(&self, written_at: u64) -> bool {
        match self.policy {
            EvictionPolicy::MaxAge(max_age) => {
                now_millis().saturating_sub(written_at) > max_age.as_millis() as u64
            }
            _ => false,
        }
    }

    /// Start writing `key`. Returns `None` if another editor is open on it.
    pub fn edit(&self, key: &str) -> io::Result<Option<Editor<'_>>> {
        validate_key(key)?;

        {
            let mut state = self.state.lock();
            match state.entries.get_mut(key) {
                Some(entry) if entry.editing => return Ok(None),
                Some(entry) => entry.editing = true,
                None => {
                    state.entries.insert(
                        key.to_string(),
                        Entry {
                            editing: true,
                            ..Entry::default()
                        },
                    );
                    state.lru_queue.push_back(key.to_string());
                }
            }
            if let Err(err) = state.append(Record::Dirty(key.to_string())) {
                let _ = self.complete_edit_locked(&mut state, key, false);
                return Err(err);
            }
        }

        match File::create(self.temp_path(key)) {
            Ok(file) => Ok(Some(Editor {
                cache: self,
                key: key.to_string(),
                file: Some(BufWriter::new(file)),
                done: false,
            })),
            Err(err) => {
                let _ = self.complete_edit(key, false);
                Err(err)
            }
        }
    }

    /// Open a committed entry.
    ///
    /// Expired, missing or truncated entries are removed and reported as a
    /// miss.
    pub fn snapshot(&self, key: &str) -> io::Result<Option<Snapshot>> {
        validate_key(key)?;
        let mut state = self.state.lock();

        let (length, written_at) = match state.entries.get(key) {
            Some(entry) if entry.readable => (entry.length, entry.written_at),
            _ => {
                state.stats.misses += 1;
                return Ok(None);
            }
        };

        if self.is_expired(written_at) {
            debug!(key, "Disk cache entry expired");
            self.remove_locked(&mut state, key)?;
            state.stats.misses += 1;
            return Ok(None);
        }

        let snapshot = match Snapshot::open(self.entry_path(key)) {
            Ok(snapshot) if snapshot.length() == length => snapshot,
            Ok(snapshot) => {
                warn!(
                    key,
                    expected = length,
                    actual = snapshot.length(),
                    "Disk cache entry has unexpected length, removing"
                );
                drop(snapshot);
                self.remove_locked(&mut state, key)?;
                state.stats.misses += 1;
                return Ok(None);
            }
            Err(err) => {
                warn!(key, error = %err, "Disk cache entry unreadable, removing");
                self.remove_locked(&mut state, key)?;
                state.stats.misses += 1;
                return Ok(None);
            }
        };

        state.stats.hits += 1;
        state.touch(key);
        state.redundant_ops += 1;
        state.append(Record::Read(key.to_string()))?;
        self.compact_if_needed(&mut state)?;
        Ok(Some(snapshot))
    }

    /// True if `key` has a committed, unexpired entry
    pub fn contains_key(&self, key: &str) -> io::Result<bool> {
        validate_key(key)?;
        let mut state = self.state.lock();
        let written_at = match state.entries.get(key) {
            Some(entry) if entry.readable => entry.written_at,
            _ => return Ok(false),
        };
        if self.is_expired(written_at) {
            self.remove_locked(&mut state, key)?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Delete `key`. Entries with an open editor are left alone.
    pub fn remove_entry(&self, key: &str) -> io::Result<bool> {
        validate_key(key)?;
        let mut state = self.state.lock();
        let removed = self.remove_locked(&mut state, key)?;
        self.compact_if_needed(&mut state)?;
        Ok(removed)
    }

    /// Delete every entry without an open editor and rewrite the journal
    pub fn clear_entries(&self) -> io::Result<()> {
        let mut state = self.state.lock();
        let keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.editing)
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            self.remove_locked(&mut state, &key)?;
        }
        self.rebuild_journal(&mut state)
    }

    fn remove_locked(&self, state: &mut JournalState, key: &str) -> io::Result<bool> {
        match state.entries.get(key) {
            Some(entry) if !entry.editing => {}
            _ => return Ok(false),
        }

        remove_if_exists(&self.entry_path(key))?;
        state.forget(key);
        state.redundant_ops += 1;
        state.append(Record::Remove(key.to_string()))?;
        Ok(true)
    }

    /// Drop least recently used clean entries until the policy is satisfied
    fn trim(&self, state: &mut JournalState) -> io::Result<()> {
        while state.over_limit(self.policy) {
            let victim = state
                .lru_queue
                .iter()
                .find(|key| {
                    state
                        .entries
                        .get(*key)
                        .is_some_and(|entry| entry.readable && !entry.editing)
                })
                .cloned();

            let Some(key) = victim else {
                break;
            };
            self.remove_locked(state, &key)?;
            state.stats.evictions += 1;
            debug!(key = %key, bytes = state.size, "Evicted disk cache entry");
        }
        Ok(())
    }

    fn complete_edit(&self, key: &str, success: bool) -> io::Result<()> {
        let mut state = self.state.lock();
        self.complete_edit_locked(&mut state, key, success)
    }

    fn complete_edit_locked(
        &self,
        state: &mut JournalState,
        key: &str,
        success: bool,
    ) -> io::Result<()> {
        let temp = self.temp_path(key);
        let Some((was_readable, old_length, old_written_at)) =
            state.entries.get_mut(key).map(|entry| {
                entry.editing = false;
                (entry.readable, entry.length, entry.written_at)
            })
        else {
            return remove_if_exists(&temp);
        };

        let published = if success {
            let path = self.entry_path(key);
            match fs::rename(&temp, &path).and_then(|()| fs::metadata(&path)) {
                Ok(meta) => Some(meta.len()),
                Err(err) => {
                    warn!(key, error = %err, "Failed to publish disk cache entry");
                    None
                }
            }
        } else {
            None
        };

        match published {
            Some(length) => {
                let written_at = now_millis();
                if let Some(entry) = state.entries.get_mut(key) {
                    entry.readable = true;
                    entry.length = length;
                    entry.written_at = written_at;
                }
                if was_readable {
                    state.size = state.size.saturating_sub(old_length);
                }
                state.size += length;
                state.touch(key);
                state.append(Record::Clean {
                    key: key.to_string(),
                    length,
                    written_at,
                })?;
            }
            None => {
                remove_if_exists(&temp)?;
                if was_readable {
                    state.append(Record::Clean {
                        key: key.to_string(),
                        length: old_length,
                        written_at: old_written_at,
                    })?;
                } else {
                    state.forget(key);
                    state.append(Record::Remove(key.to_string()))?;
                }
            }
        }

        state.redundant_ops += 1;
        self.trim(state)?;
        self.compact_if_needed(state)?;

        if success && published.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("failed to publish disk cache entry {key}"),
            ));
        }
        Ok(())
    }

    fn compact_if_needed(&self, state: &mut JournalState) -> io::Result<()> {
        if state.should_compact() {
            debug!(redundant = state.redundant_ops, "Compacting disk cache journal");
            self.rebuild_journal(state)?;
        }
        Ok(())
    }

    fn replay_journal(&self, state: &mut JournalState) -> io::Result<Replay> {
        let mut content = Vec::new();
        File::open(self.directory.join(JOURNAL_FILE))?.read_to_end(&mut content)?;

        let mut lines = content.split(|&b| b == b'\n');
        let expected = [MAGIC.to_string(), VERSION.to_string(), self.app_version.to_string(), String::new()];
        for want in &expected {
            let line = lines.next().unwrap_or_default();
            if line != want.as_bytes() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "unexpected journal header line {:?}, expected {want:?}",
                        String::from_utf8_lossy(line)
                    ),
                ));
            }
        }

        // The segment after the final newline is either empty or a torn write
        let mut records: Vec<&[u8]> = lines.collect();
        let mut needs_rebuild = !records.pop().is_some_and(|tail| tail.is_empty());

        let mut dirty = HashSet::new();
        let mut line_count: usize = 0;
        for raw in records {
            let Some(record) = std::str::from_utf8(raw).ok().and_then(Record::parse) else {
                warn!(
                    record = %String::from_utf8_lossy(raw),
                    "Skipping unreadable disk cache journal record"
                );
                needs_rebuild = true;
                continue;
            };
            line_count += 1;
            match record {
                Record::Clean {
                    key,
                    length,
                    written_at,
                } => {
                    dirty.remove(&key);
                    state.touch(&key);
                    state.entries.insert(
                        key,
                        Entry {
                            readable: true,
                            editing: false,
                            length,
                            written_at,
                        },
                    );
                }
                Record::Dirty(key) => {
                    state.touch(&key);
                    state.entries.entry(key.clone()).or_default();
                    dirty.insert(key);
                }
                Record::Remove(key) => {
                    dirty.remove(&key);
                    state.entries.remove(&key);
                    state.lru_queue.retain(|k| *k != key);
                }
                Record::Read(key) => {
                    if state.entries.contains_key(&key) {
                        state.touch(&key);
                    }
                }
            }
        }

        // Interrupted writes leave their temp file; unpublished ones are dropped
        for key in dirty {
            remove_if_exists(&self.temp_path(&key))?;
            let readable = state.entries.get(&key).is_some_and(|e| e.readable);
            if !readable {
                remove_if_exists(&self.entry_path(&key))?;
                state.entries.remove(&key);
                state.lru_queue.retain(|k| *k != key);
            }
            needs_rebuild = true;
        }

        let missing: Vec<String> = state
            .entries
            .iter()
            .filter(|(key, entry)| {
                fs::metadata(self.entry_path(key))
                    .map(|meta| meta.len() != entry.length)
                    .unwrap_or(true)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in missing {
            warn!(key = %key, "Disk cache entry missing or resized, dropping");
            let _ = remove_if_exists(&self.entry_path(&key));
            state.entries.remove(&key);
            state.lru_queue.retain(|k| *k != key);
            needs_rebuild = true;
        }

        if self.remove_orphans(state)? > 0 {
            needs_rebuild = true;
        }

        state.size = state.entries.values().map(|e| e.length).sum();
        state.redundant_ops = line_count.saturating_sub(state.entries.len());

        Ok(if needs_rebuild {
            Replay::NeedsRebuild
        } else {
            Replay::Clean
        })
    }

    /// Rewrite the journal from the in-memory index
    fn rebuild_journal(&self, state: &mut JournalState) -> io::Result<()> {
        state.journal = None;

        let temp = self.directory.join(JOURNAL_FILE_TEMP);
        {
            let mut writer = BufWriter::new(File::create(&temp)?);
            writeln!(writer, "{MAGIC}")?;
            writeln!(writer, "{VERSION}")?;
            writeln!(writer, "{}", self.app_version)?;
            writeln!(writer)?;
            for key in &state.lru_queue {
                let Some(entry) = state.entries.get(key) else {
                    continue;
                };
                let record = if entry.editing {
                    Record::Dirty(key.clone())
                } else {
                    Record::Clean {
                        key: key.clone(),
                        length: entry.length,
                        written_at: entry.written_at,
                    }
                };
                writeln!(writer, "{record}")?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        let journal = self.directory.join(JOURNAL_FILE);
        let backup = self.directory.join(JOURNAL_FILE_BACKUP);
        if journal.exists() {
            fs::rename(&journal, &backup)?;
        }
        fs::rename(&temp, &journal)?;
        remove_if_exists(&backup)?;

        state.journal = Some(open_append(&journal)?);
        state.redundant_ops = 0;
        Ok(())
    }

    /// Delete entry and temp files the index doesn't know about. Returns how
    /// many were removed.
    fn remove_orphans(&self, state: &JournalState) -> io::Result<usize> {
        let mut removed = 0;
        for dir_entry in fs::read_dir(&self.directory)? {
            let path = dir_entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if is_journal_file(name) || !path.is_file() {
                continue;
            }
            let orphan = match name.strip_suffix(TEMP_SUFFIX) {
                Some(key) => is_valid_key(key),
                None => is_valid_key(name) && !state.entries.contains_key(name),
            };
            if orphan {
                warn!(file = name, "Removing untracked disk cache file");
                remove_if_exists(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Delete every cache-owned file in the directory and reset the index
    fn wipe(&self, state: &mut JournalState) -> io::Result<()> {
        for dir_entry in fs::read_dir(&self.directory)? {
            let path = dir_entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let owned = is_journal_file(name)
                || is_valid_key(name.strip_suffix(TEMP_SUFFIX).unwrap_or(name));
            if owned && path.is_file() {
                remove_if_exists(&path)?;
            }
        }
        *state = JournalState::default();
        Ok(())
    }
}

impl DiskCache for LruDiskCache {
    fn directory(&self) -> &Path {
        &self.directory
    }

    fn get(&self, uri: &str) -> Option<Snapshot> {
        let key = self.namer.name(uri);
        self.snapshot(&key).unwrap_or_else(|err| {
            warn!(uri, key = %key, error = %err, "Disk cache read failed");
            None
        })
    }

    fn put(&self, uri: &str, source: &mut dyn Read) -> io::Result<bool> {
        let key = self.namer.name(uri);
        let Some(mut editor) = self.edit(&key)? else {
            return Ok(false);
        };
        io::copy(source, &mut editor)?;
        editor.commit()?;
        Ok(true)
    }

    fn remove(&self, uri: &str) -> bool {
        let key = self.namer.name(uri);
        self.remove_entry(&key).unwrap_or_else(|err| {
            warn!(uri, key = %key, error = %err, "Disk cache remove failed");
            false
        })
    }

    fn exists(&self, uri: &str) -> bool {
        let key = self.namer.name(uri);
        self.contains_key(&key).unwrap_or(false)
    }

    fn clear(&self) {
        if let Err(err) = self.clear_entries() {
            warn!(directory = %self.directory.display(), error = %err, "Disk cache clear failed");
        }
    }
}

/// Pending write to a disk cache entry.
///
/// Dropping an editor without calling [`Editor::commit`] aborts the write.
pub struct Editor<'a> {
    cache: &'a LruDiskCache,
    key: String,
    file: Option<BufWriter<File>>,
    done: bool,
}

impl Editor<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Publish the written bytes
    pub fn commit(mut self) -> io::Result<()> {
        self.done = true;
        let flushed = match self.file.take() {
            Some(mut writer) => writer.flush().and_then(|()| writer.get_ref().sync_all()),
            None => Ok(()),
        };
        match flushed {
            Ok(()) => self.cache.complete_edit(&self.key, true),
            Err(err) => {
                let _ = self.cache.complete_edit(&self.key, false);
                Err(err)
            }
        }
    }

    /// Discard the written bytes; any previously committed value stays
    pub fn abort(mut self) -> io::Result<()> {
        self.done = true;
        self.file.take();
        self.cache.complete_edit(&self.key, false)
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "editor already closed"))
    }
}

impl Write for Editor<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer()?.flush()
    }
}

impl Drop for Editor<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.file.take();
            if let Err(err) = self.cache.complete_edit(&self.key, false) {
                warn!(key = %self.key, error = %err, "Failed to abort disk cache edit");
            }
        }
    }
}
