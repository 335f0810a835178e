//! Chunk loader — owns the resident chunk set and the trie built from it.
//!
//! All mutation happens under a single reader-writer guard: load, evict, and
//! the rebuild that follows an evict take the write half; completion
//! traversal and stats take the read half, so a reader sees the pre-evict or
//! post-evict trie and never a partial reconstruction. A single background
//! worker services a bounded queue of chunk-ID load requests with linear
//! backoff on failure.

use crate::materialize::{self, MaterializeError, MaterializeOptions};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use dashmap::DashMap;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use wordserve_core::codec::{self, score_from_rank, ChunkReader, ExpectedFormat, FormatError};
use wordserve_core::{Score, Trie};

/// Capacity of the background load queue. A full queue drops the request;
/// chunks are idempotent to re-request.
pub const LOAD_QUEUE_CAPACITY: usize = 10;

/// Background attempts per chunk before it is marked failed.
const MAX_LOAD_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("chunk {id} is not on disk")]
    UnknownChunk { id: u32 },

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("not enough chunks on disk: wanted {wanted}, found {available}")]
    InsufficientChunks { wanted: usize, available: usize },

    #[error("load queue is full or the worker is stopped")]
    QueueFull,

    #[error("could not scan data directory {}", .0.display())]
    Discover(PathBuf, #[source] std::io::Error),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Newly resident, with the number of words inserted.
    Loaded(usize),
    /// Idempotent no-op.
    AlreadyLoaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictOutcome {
    Evicted,
    NotLoaded,
}

/// Terminal background-load failure, kept for the stats surface.
#[derive(Debug, Clone)]
pub struct LoadFailure {
    pub attempts: u32,
    pub last_error: String,
}

/// Point-in-time loader counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub total_words: usize,
    pub loaded_chunks: usize,
    pub available_chunks: usize,
    pub max_frequency: Score,
    pub is_loading: bool,
}

/// Metadata for one on-disk chunk, from the discovery scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    pub id: u32,
    pub path: PathBuf,
    pub entry_count: u32,
}

// ---------------------------------------------------------------------------
// The index: trie plus per-chunk membership
// ---------------------------------------------------------------------------

/// Everything guarded by the loader's reader-writer lock. Per-chunk word
/// lists are kept so eviction can rebuild the trie from the survivors — the
/// radix trie has no removal.
pub struct DictIndex {
    trie: Trie,
    chunks: BTreeMap<u32, Vec<(Box<str>, Score)>>,
    total_words: usize,
    max_frequency: Score,
}

impl DictIndex {
    fn new() -> Self {
        DictIndex { trie: Trie::new(), chunks: BTreeMap::new(), total_words: 0, max_frequency: 0 }
    }

    pub fn trie(&self) -> &Trie {
        &self.trie
    }

    pub fn total_words(&self) -> usize {
        self.total_words
    }

    pub fn max_frequency(&self) -> Score {
        self.max_frequency
    }

    pub fn resident_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_resident(&self, id: u32) -> bool {
        self.chunks.contains_key(&id)
    }

    /// Resident chunk IDs in ascending order.
    pub fn resident_ids(&self) -> Vec<u32> {
        self.chunks.keys().copied().collect()
    }

    fn insert_chunk(&mut self, id: u32, words: Vec<(Box<str>, Score)>) {
        for (word, score) in &words {
            self.trie.insert(word.as_bytes(), *score);
            if *score > self.max_frequency {
                self.max_frequency = *score;
            }
        }
        self.total_words += words.len();
        self.chunks.insert(id, words);
    }

    fn remove_chunk(&mut self, id: u32) -> bool {
        self.chunks.remove(&id).is_some()
    }

    /// Re-insert every surviving chunk into a fresh trie, recomputing the
    /// word total and maximum frequency along the walk.
    fn rebuild(&mut self) {
        let mut trie = Trie::new();
        let mut max_frequency = 0;
        let mut total_words = 0;
        for words in self.chunks.values() {
            for (word, score) in words {
                trie.insert(word.as_bytes(), *score);
                if *score > max_frequency {
                    max_frequency = *score;
                }
            }
            total_words += words.len();
        }
        self.trie = trie;
        self.total_words = total_words;
        self.max_frequency = max_frequency;
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

pub struct ChunkLoader {
    data_dir: PathBuf,
    chunk_size: usize,
    max_word_count: u32,
    materialize_options: MaterializeOptions,
    index: RwLock<DictIndex>,
    /// Discovery cache, invalidated by [`refresh`](Self::refresh).
    discovered: RwLock<Option<Arc<Vec<ChunkInfo>>>>,
    /// Chunks the background worker gave up on.
    failures: DashMap<u32, LoadFailure>,
    queue: Mutex<Option<Sender<u32>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    pending_loads: AtomicUsize,
}

impl ChunkLoader {
    pub fn new(
        data_dir: PathBuf,
        chunk_size: usize,
        max_word_count: u32,
        materialize_options: MaterializeOptions,
    ) -> Arc<Self> {
        Arc::new(ChunkLoader {
            data_dir,
            chunk_size: chunk_size.max(1),
            max_word_count,
            materialize_options,
            index: RwLock::new(DictIndex::new()),
            discovered: RwLock::new(None),
            failures: DashMap::new(),
            queue: Mutex::new(None),
            worker: Mutex::new(None),
            pending_loads: AtomicUsize::new(0),
        })
    }

    /// Borrow the index for one traversal. The read guard is held for the
    /// caller's scope; load/evict block until it drops.
    pub fn index(&self) -> RwLockReadGuard<'_, DictIndex> {
        self.index.read().unwrap()
    }

    // -----------------------------------------------------------------------
    // Discovery
    // -----------------------------------------------------------------------

    /// Enumerate `dict_NNNN.bin` files, sorted ascending by ID. Cached; call
    /// [`refresh`](Self::refresh) after the directory changes.
    pub fn discover(&self) -> Result<Arc<Vec<ChunkInfo>>, LoaderError> {
        if let Some(cached) = self.discovered.read().unwrap().clone() {
            return Ok(cached);
        }
        let infos = Arc::new(self.scan_chunks()?);
        *self.discovered.write().unwrap() = Some(Arc::clone(&infos));
        Ok(infos)
    }

    /// Invalidate the discovery cache.
    pub fn refresh(&self) {
        *self.discovered.write().unwrap() = None;
    }

    fn scan_chunks(&self) -> Result<Vec<ChunkInfo>, LoaderError> {
        let entries = std::fs::read_dir(&self.data_dir)
            .map_err(|e| LoaderError::Discover(self.data_dir.clone(), e))?;

        let mut candidates: Vec<(u32, PathBuf)> = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(id) = parse_chunk_id(name) else { continue };
            candidates.push((id, entry.path()));
        }

        // Header reads in parallel; a corrupt chunk is skipped here and will
        // keep failing at load time where the error is surfaced.
        let max_word_count = self.max_word_count;
        let mut infos: Vec<ChunkInfo> = candidates
            .par_iter()
            .filter_map(|(id, path)| {
                if let Err(e) = codec::validate(path, ExpectedFormat::Binary, max_word_count) {
                    warn!(chunk = id, error = %e, "Skipping invalid chunk file");
                    return None;
                }
                match codec::read_entry_count(path) {
                    Ok(entry_count) => {
                        Some(ChunkInfo { id: *id, path: path.clone(), entry_count })
                    }
                    Err(e) => {
                        warn!(chunk = id, error = %e, "Skipping unreadable chunk header");
                        None
                    }
                }
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        debug!(chunks = infos.len(), dir = %self.data_dir.display(), "Discovered chunks");
        Ok(infos)
    }

    fn chunk_info(&self, id: u32) -> Result<ChunkInfo, LoaderError> {
        self.discover()?
            .iter()
            .find(|info| info.id == id)
            .cloned()
            .ok_or(LoaderError::UnknownChunk { id })
    }

    // -----------------------------------------------------------------------
    // Load / evict
    // -----------------------------------------------------------------------

    /// Make chunk `id` resident. Loading an already-resident chunk is a
    /// no-op success. File reads happen before the write guard is taken.
    pub fn load(&self, id: u32) -> Result<LoadOutcome, LoaderError> {
        if self.index.read().unwrap().is_resident(id) {
            return Ok(LoadOutcome::AlreadyLoaded);
        }
        let info = self.chunk_info(id)?;
        let words = read_chunk_words(&info, self.max_word_count)?;

        let mut index = self.index.write().unwrap();
        if index.is_resident(id) {
            // Raced with the background worker.
            return Ok(LoadOutcome::AlreadyLoaded);
        }
        let count = words.len();
        index.insert_chunk(id, words);
        self.failures.remove(&id);
        debug!(chunk = id, words = count, total = index.total_words(), "Chunk loaded");
        Ok(LoadOutcome::Loaded(count))
    }

    /// Drop chunk `id` and rebuild the trie from the remaining residents.
    pub fn evict(&self, id: u32) -> EvictOutcome {
        let mut index = self.index.write().unwrap();
        if !index.remove_chunk(id) {
            return EvictOutcome::NotLoaded;
        }
        index.rebuild();
        debug!(chunk = id, total = index.total_words(), "Chunk evicted, trie rebuilt");
        EvictOutcome::Evicted
    }

    /// Resize the resident set to exactly `n` chunks: grow with the
    /// lowest-ID unloaded chunks, shrink by evicting the highest IDs first.
    /// A short data directory triggers the materialization contract before
    /// failing with `InsufficientChunks`.
    pub fn set_resident_chunk_count(&self, n: usize) -> Result<(), LoaderError> {
        let mut available = self.discover()?;
        if available.len() < n {
            let present = materialize::ensure_chunks(
                &self.data_dir,
                n,
                self.chunk_size,
                &self.materialize_options,
            )?;
            if present < n {
                return Err(LoaderError::InsufficientChunks { wanted: n, available: present });
            }
            self.refresh();
            available = self.discover()?;
            if available.len() < n {
                return Err(LoaderError::InsufficientChunks {
                    wanted: n,
                    available: available.len(),
                });
            }
        }

        let resident = self.index.read().unwrap().resident_ids();
        if resident.len() < n {
            let mut loaded = resident.len();
            for info in available.iter() {
                if loaded >= n {
                    break;
                }
                if resident.binary_search(&info.id).is_ok() {
                    continue;
                }
                self.load(info.id)?;
                loaded += 1;
            }
        } else if resident.len() > n {
            let excess = &resident[n..];
            let mut index = self.index.write().unwrap();
            for &id in excess {
                index.remove_chunk(id);
            }
            index.rebuild();
            info!(evicted = excess.len(), resident = n, "Shrunk resident chunk set");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Background loading
    // -----------------------------------------------------------------------

    /// Start the background load worker. Call once after construction.
    pub fn spawn_worker(self: &Arc<Self>) {
        let (tx, rx) = bounded::<u32>(LOAD_QUEUE_CAPACITY);
        *self.queue.lock().unwrap() = Some(tx);
        let weak = Arc::downgrade(self);
        let handle = std::thread::spawn(move || worker_loop(weak, rx));
        *self.worker.lock().unwrap() = Some(handle);
    }

    /// Queue asynchronous loads to cover roughly `additional_words` more
    /// words. Never blocks; a full queue drops the remainder with a warning
    /// (the next call re-requests them).
    pub fn request_more(&self, additional_words: usize) {
        let chunks_needed = additional_words.div_ceil(self.chunk_size);
        let available = match self.discover() {
            Ok(a) => a,
            Err(e) => {
                warn!(error = %e, "Cannot request more chunks");
                return;
            }
        };
        let resident = self.index.read().unwrap().resident_ids();
        let mut queued = 0;
        for info in available.iter() {
            if queued >= chunks_needed {
                break;
            }
            if resident.binary_search(&info.id).is_ok() {
                continue;
            }
            match self.enqueue_load(info.id) {
                Ok(()) => queued += 1,
                Err(LoaderError::QueueFull) => {
                    warn!(chunk = info.id, "Load queue full, dropping request");
                    break;
                }
                Err(e) => {
                    warn!(chunk = info.id, error = %e, "Could not queue chunk load");
                    break;
                }
            }
        }
        if queued > 0 {
            debug!(queued, "Queued background chunk loads");
        }
    }

    /// Push one chunk ID onto the load queue without blocking.
    pub fn enqueue_load(&self, id: u32) -> Result<(), LoaderError> {
        let guard = self.queue.lock().unwrap();
        let Some(tx) = guard.as_ref() else {
            return Err(LoaderError::QueueFull);
        };
        match tx.try_send(id) {
            Ok(()) => {
                self.pending_loads.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                Err(LoaderError::QueueFull)
            }
        }
    }

    /// Close the load queue and join the worker after it drains.
    pub fn shutdown(&self) {
        self.queue.lock().unwrap().take();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> Stats {
        let available_chunks = self.discover().map(|infos| infos.len()).unwrap_or(0);
        let index = self.index.read().unwrap();
        Stats {
            total_words: index.total_words(),
            loaded_chunks: index.resident_count(),
            available_chunks,
            max_frequency: index.max_frequency(),
            is_loading: self.pending_loads.load(Ordering::SeqCst) > 0,
        }
    }

    /// Terminal background-load failures (chunk ID, failure info).
    pub fn failed_chunks(&self) -> Vec<(u32, LoadFailure)> {
        self.failures.iter().map(|e| (*e.key(), e.value().clone())).collect()
    }

    fn load_with_retry(&self, id: u32) {
        let mut error_count = 0u32;
        loop {
            match self.load(id) {
                Ok(_) => return,
                Err(e) => {
                    error_count += 1;
                    if error_count >= MAX_LOAD_ATTEMPTS {
                        warn!(chunk = id, attempts = error_count, error = %e, "Giving up on chunk");
                        self.failures.insert(
                            id,
                            LoadFailure { attempts: error_count, last_error: e.to_string() },
                        );
                        return;
                    }
                    debug!(chunk = id, attempt = error_count, error = %e, "Chunk load failed, backing off");
                    std::thread::sleep(Duration::from_secs(u64::from(error_count)));
                }
            }
        }
    }
}

impl Drop for ChunkLoader {
    fn drop(&mut self) {
        // The worker only holds a Weak reference, so the drop always runs on
        // the owning side; closing the queue lets the thread drain and exit.
        self.shutdown();
    }
}

fn worker_loop(loader: Weak<ChunkLoader>, rx: Receiver<u32>) {
    for id in rx.iter() {
        let Some(loader) = loader.upgrade() else { break };
        loader.load_with_retry(id);
        loader.pending_loads.fetch_sub(1, Ordering::SeqCst);
    }
    debug!("Chunk load worker drained");
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse `dict_NNNN.bin` into its chunk ID. IDs start at 1.
fn parse_chunk_id(name: &str) -> Option<u32> {
    let id = name.strip_prefix("dict_")?.strip_suffix(".bin")?;
    match id.parse::<u32>() {
        Ok(0) | Err(_) => None,
        Ok(id) => Some(id),
    }
}

/// Read a whole chunk into `(word, score)` pairs, converting stored ranks.
fn read_chunk_words(
    info: &ChunkInfo,
    max_word_count: u32,
) -> Result<Vec<(Box<str>, Score)>, LoaderError> {
    let reader = ChunkReader::open(&info.path, max_word_count)?;
    let mut words = Vec::with_capacity(reader.entry_count() as usize);
    for entry in reader {
        let entry = entry?;
        let word: Box<str> = String::from_utf8_lossy(&entry.word).into();
        words.push((word, score_from_rank(entry.rank)));
    }
    Ok(words)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
