//! RocksDB-backed compact block cache.
//!
//! Holds a contiguous window of compact blocks `[first, last]` keyed by
//! height, bounded by a retention limit, with an in-memory hash → height
//! index covering exactly that window. Each entry is a single RocksDB value
//! (height, hash, payload, BLAKE3 checksum) and every mutation, including
//! eviction and the window bounds, is one atomic [`WriteBatch`].
//!
//! One writer at a time goes through [`BlockCache::add`]; readers only take
//! the state lock long enough to check the window or the hash index, never
//! while touching the database.
//!
//! On open, the window and hash index are rebuilt by scanning the stored
//! window. A record that is missing, truncated, fails its checksum, or sits
//! at the wrong height ends the usable window: it and everything after it
//! are deleted and must be ingested again.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rocksdb::{ColumnFamilyDescriptor, DB, Options, WriteBatch};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use lightd_core::compact::CompactBlock;
use lightd_core::error::CacheError;
use lightd_core::types::Hash256;

// --- Column family names ---

const CF_BLOCKS: &str = "blocks";
const CF_METADATA: &str = "metadata";

/// All column family names.
const ALL_CFS: &[&str] = &[CF_BLOCKS, CF_METADATA];

// --- Metadata keys ---

const META_FIRST_HEIGHT: &[u8] = b"first_height";
const META_LAST_HEIGHT: &[u8] = b"last_height";

/// One stored cache entry.
#[derive(bincode::Encode, bincode::Decode)]
struct CacheRecord {
    height: u64,
    hash: Hash256,
    block: Vec<u8>,
    checksum: [u8; 32],
}

impl CacheRecord {
    fn new(height: u64, hash: Hash256, block: Vec<u8>) -> Self {
        let checksum = Self::digest(height, &hash, &block);
        Self {
            height,
            hash,
            block,
            checksum,
        }
    }

    fn digest(height: u64, hash: &Hash256, block: &[u8]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&height.to_be_bytes());
        hasher.update(hash.as_bytes());
        hasher.update(block);
        *hasher.finalize().as_bytes()
    }

    fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        let (record, read): (Self, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| CacheError::CorruptState(e.to_string()))?;
        if read != bytes.len() {
            return Err(CacheError::CorruptState("trailing bytes in record".into()));
        }
        Ok(record)
    }

    fn encode(&self) -> Result<Vec<u8>, CacheError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CacheError::Storage(e.to_string()))
    }

    /// Check the record is intact and belongs at `height`.
    fn verify(&self, height: u64) -> Result<(), CacheError> {
        if self.height != height {
            return Err(CacheError::CorruptState(format!(
                "record at height {height} claims height {}",
                self.height
            )));
        }
        if Self::digest(self.height, &self.hash, &self.block) != self.checksum {
            return Err(CacheError::CorruptState(format!(
                "checksum mismatch at height {height}"
            )));
        }
        Ok(())
    }
}

/// Inclusive range of heights currently retained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub first: u64,
    pub last: u64,
}

impl Window {
    /// Number of heights in the window.
    pub fn len(&self) -> u64 {
        self.last - self.first + 1
    }

    pub fn contains(&self, height: u64) -> bool {
        self.first <= height && height <= self.last
    }
}

/// In-memory view of the retained window.
///
/// `hashes[i]` is the hash of the block at `first + i`; `by_hash` maps every
/// one of those hashes back to its height.
#[derive(Default)]
struct CacheState {
    first: u64,
    hashes: VecDeque<Hash256>,
    by_hash: HashMap<Hash256, u64>,
}

impl CacheState {
    fn window(&self) -> Option<Window> {
        if self.hashes.is_empty() {
            return None;
        }
        Some(Window {
            first: self.first,
            last: self.first + self.hashes.len() as u64 - 1,
        })
    }

    fn contains(&self, height: u64) -> bool {
        self.window().is_some_and(|w| w.contains(height))
    }

    fn forget(&mut self, hash: &Hash256, height: u64) {
        if self.by_hash.get(hash) == Some(&height) {
            self.by_hash.remove(hash);
        }
    }
}

/// How an accepted `add` changes the window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Placement {
    /// First entry of an empty cache.
    Start,
    /// Replace the entry at an existing height.
    Overwrite,
    /// Extend the window by one at the top, evicting the oldest entry if the
    /// window would exceed the retention limit.
    Append { evict: bool },
    /// Extend the window by one at the bottom.
    Prepend,
}

/// Durable, height-indexed cache of compact blocks.
pub struct BlockCache {
    db: DB,
    retention: u64,
    state: RwLock<CacheState>,
    writer: Mutex<()>,
}

impl BlockCache {
    /// Open or create a cache at `path` retaining at most `retention` blocks.
    ///
    /// Rebuilds the window and hash index from disk before returning. If the
    /// stored window is larger than `retention` (the limit was lowered), the
    /// oldest entries are evicted.
    pub fn open(path: impl AsRef<Path>, retention: u64) -> Result<Self, CacheError> {
        if retention == 0 {
            return Err(CacheError::Storage("retention limit must be at least 1".into()));
        }

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| CacheError::Storage(e.to_string()))?;

        let cache = Self {
            db,
            retention,
            state: RwLock::new(CacheState::default()),
            writer: Mutex::new(()),
        };
        cache.recover()?;
        Ok(cache)
    }

    /// Current window, or `None` when the cache is empty.
    pub fn window(&self) -> Option<Window> {
        self.state.read().window()
    }

    /// Number of cached blocks.
    pub fn len(&self) -> u64 {
        self.window().map_or(0, |w| w.len())
    }

    pub fn is_empty(&self) -> bool {
        self.window().is_none()
    }

    /// Store the compact block `block` at `height`.
    ///
    /// The bytes must decode as a compact block for that height. A height
    /// already in the window is overwritten (the replaced hash leaves the
    /// index); `last + 1` extends the window, evicting the oldest entry when
    /// full; `first - 1` extends it downward while there is room. Any other
    /// height is rejected without touching the cache.
    pub fn add(&self, height: u64, block: &[u8]) -> Result<(), CacheError> {
        let compact = CompactBlock::decode(block).map_err(CacheError::InvalidBlock)?;
        if compact.height != height {
            return Err(CacheError::InvalidBlock(format!(
                "block claims height {}, added at {height}",
                compact.height
            )));
        }
        let hash = compact.hash;

        let _writer = self.writer.lock();
        let window = self.state.read().window();
        let placement = self.place(window, height)?;

        let evicted = match (placement, window) {
            (Placement::Append { evict: true }, Some(w)) => Some(w.first),
            _ => None,
        };
        let new_window = match (placement, window) {
            (Placement::Start, _) | (_, None) => Window {
                first: height,
                last: height,
            },
            (Placement::Overwrite, Some(w)) => w,
            (Placement::Append { evict }, Some(w)) => Window {
                first: if evict { w.first + 1 } else { w.first },
                last: height,
            },
            (Placement::Prepend, Some(w)) => Window {
                first: height,
                last: w.last,
            },
        };

        let record = CacheRecord::new(height, hash, block.to_vec()).encode()?;
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf_blocks, Self::height_key(height), &record);
        if let Some(old) = evicted {
            batch.delete_cf(cf_blocks, Self::height_key(old));
        }
        batch.put_cf(cf_meta, META_FIRST_HEIGHT, new_window.first.to_le_bytes());
        batch.put_cf(cf_meta, META_LAST_HEIGHT, new_window.last.to_le_bytes());
        self.db
            .write(batch)
            .map_err(|e| CacheError::Storage(e.to_string()))?;

        let mut state = self.state.write();
        match placement {
            Placement::Start => {
                state.first = height;
                state.hashes.push_back(hash);
            }
            Placement::Overwrite => {
                let slot = (height - state.first) as usize;
                let old = std::mem::replace(&mut state.hashes[slot], hash);
                if old != hash {
                    debug!(height, old = %old, new = %hash, "overwrote cached block");
                }
                state.forget(&old, height);
            }
            Placement::Append { evict } => {
                state.hashes.push_back(hash);
                if evict {
                    let first = state.first;
                    if let Some(old) = state.hashes.pop_front() {
                        state.forget(&old, first);
                    }
                    state.first += 1;
                }
            }
            Placement::Prepend => {
                state.hashes.push_front(hash);
                state.first = height;
            }
        }
        state.by_hash.insert(hash, height);
        Ok(())
    }

    /// Decide where `height` goes relative to `window`, or why it cannot.
    fn place(&self, window: Option<Window>, height: u64) -> Result<Placement, CacheError> {
        let Some(w) = window else {
            return Ok(Placement::Start);
        };
        if w.contains(height) {
            return Ok(Placement::Overwrite);
        }
        if height > w.last {
            if height != w.last + 1 {
                return Err(CacheError::HeightGap {
                    expected: w.last + 1,
                    got: height,
                });
            }
            return Ok(Placement::Append {
                evict: w.len() >= self.retention,
            });
        }
        // Below the window.
        if w.first - height > self.retention || w.len() >= self.retention {
            return Err(CacheError::HeightTooOld {
                height,
                first: w.first,
                retention: self.retention,
            });
        }
        if height + 1 != w.first {
            return Err(CacheError::HeightGap {
                expected: w.first - 1,
                got: height,
            });
        }
        Ok(Placement::Prepend)
    }

    /// Compact block bytes stored at `height`.
    pub fn get(&self, height: u64) -> Result<Bytes, CacheError> {
        if !self.state.read().contains(height) {
            return Err(CacheError::NotFound(height));
        }
        // Evicted between the window check and the read.
        let record = self
            .read_record(height)?
            .ok_or(CacheError::NotFound(height))?;
        record.verify(height)?;
        Ok(Bytes::from(record.block))
    }

    /// Compact block bytes for the block with `hash`, if it is still retained.
    pub fn get_by_hash(&self, hash: &Hash256) -> Result<Bytes, CacheError> {
        let height = self
            .state
            .read()
            .by_hash
            .get(hash)
            .copied()
            .ok_or_else(|| CacheError::HashNotFound(hash.to_string()))?;
        self.get(height)
    }

    /// Height of the newest cached block.
    pub fn latest_height(&self) -> Result<u64, CacheError> {
        self.window().map(|w| w.last).ok_or(CacheError::Empty)
    }

    /// Hash of the cached block at `height`, from the in-memory index.
    pub fn hash_at(&self, height: u64) -> Option<Hash256> {
        let state = self.state.read();
        if !state.contains(height) {
            return None;
        }
        state.hashes.get((height - state.first) as usize).copied()
    }

    /// Height and hash of the newest cached block.
    pub fn latest(&self) -> Result<(u64, Hash256), CacheError> {
        let state = self.state.read();
        match (state.window(), state.hashes.back()) {
            (Some(w), Some(hash)) => Ok((w.last, *hash)),
            _ => Err(CacheError::Empty),
        }
    }

    /// Stream the blocks in `[start, end]` in ascending order.
    ///
    /// Blocks are read one at a time on a blocking thread and handed over a
    /// channel of capacity one, so at most one block is buffered. The first
    /// unavailable height is sent as an error and ends the stream. Dropping
    /// the receiver stops the producer at its next hand-off.
    pub fn get_range(
        self: &Arc<Self>,
        start: u64,
        end: u64,
    ) -> mpsc::Receiver<Result<Bytes, CacheError>> {
        let (tx, rx) = mpsc::channel(1);
        let cache = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            for height in start..=end {
                let item = cache.get(height);
                let failed = item.is_err();
                if tx.blocking_send(item).is_err() {
                    debug!(height, "range consumer went away");
                    return;
                }
                if failed {
                    return;
                }
            }
        });
        rx
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), CacheError> {
        self.db
            .flush()
            .map_err(|e| CacheError::Storage(e.to_string()))
    }

    // --- Recovery ---

    /// Rebuild the in-memory state from disk.
    fn recover(&self) -> Result<(), CacheError> {
        let first = self.get_meta_u64(META_FIRST_HEIGHT)?;
        let last = self.get_meta_u64(META_LAST_HEIGHT)?;

        let (first, last) = match (first, last) {
            (None, None) => {
                info!("opened empty block cache");
                return Ok(());
            }
            (Some(first), Some(last)) if first <= last => (first, last),
            (first, last) => {
                warn!(?first, ?last, "inconsistent cache bounds, discarding cache");
                return self.discard_from(None);
            }
        };

        let mut state = CacheState {
            first,
            ..CacheState::default()
        };
        for height in first..=last {
            let checked = self
                .read_record(height)
                .and_then(|r| {
                    r.ok_or_else(|| {
                        CacheError::CorruptState(format!("missing record at height {height}"))
                    })
                })
                .and_then(|r| r.verify(height).map(|_| r));
            match checked {
                Ok(record) => {
                    state.hashes.push_back(record.hash);
                    state.by_hash.insert(record.hash, height);
                }
                Err(e @ CacheError::Storage(_)) => return Err(e),
                Err(e) => {
                    warn!(height, error = %e, "corrupt cache entry, truncating cache");
                    *self.state.write() = state;
                    if height == first {
                        return self.discard_from(None);
                    }
                    self.discard_from(Some((first, height - 1)))?;
                    return self.enforce_retention();
                }
            }
        }

        *self.state.write() = state;
        info!(first, last, "recovered block cache");
        self.enforce_retention()
    }

    /// Durably drop every entry above the kept window, or all of them when
    /// `keep` is `None`.
    fn discard_from(&self, keep: Option<(u64, u64)>) -> Result<(), CacheError> {
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;
        let mut batch = WriteBatch::default();

        let from = keep.map_or(0, |(_, kept_last)| kept_last + 1);
        batch.delete_range_cf(cf_blocks, Self::height_key(from), Self::height_key(u64::MAX));
        match keep {
            Some((first, kept_last)) => {
                batch.put_cf(cf_meta, META_FIRST_HEIGHT, first.to_le_bytes());
                batch.put_cf(cf_meta, META_LAST_HEIGHT, kept_last.to_le_bytes());
            }
            None => {
                batch.delete_cf(cf_meta, META_FIRST_HEIGHT);
                batch.delete_cf(cf_meta, META_LAST_HEIGHT);
                *self.state.write() = CacheState::default();
            }
        }
        self.db
            .write(batch)
            .map_err(|e| CacheError::Storage(e.to_string()))?;
        if let Some((first, kept_last)) = keep {
            info!(first, last = kept_last, "recovered block cache after truncation");
        }
        Ok(())
    }

    /// Evict the oldest entries while the window exceeds the retention limit.
    fn enforce_retention(&self) -> Result<(), CacheError> {
        let Some(w) = self.window() else {
            return Ok(());
        };
        if w.len() <= self.retention {
            return Ok(());
        }
        let new_first = w.last + 1 - self.retention;
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;
        let mut batch = WriteBatch::default();
        for height in w.first..new_first {
            batch.delete_cf(cf_blocks, Self::height_key(height));
        }
        batch.put_cf(cf_meta, META_FIRST_HEIGHT, new_first.to_le_bytes());
        self.db
            .write(batch)
            .map_err(|e| CacheError::Storage(e.to_string()))?;

        let mut state = self.state.write();
        while state.first < new_first {
            let first = state.first;
            if let Some(old) = state.hashes.pop_front() {
                state.forget(&old, first);
            }
            state.first += 1;
        }
        info!(evicted = new_first - w.first, "trimmed cache to retention limit");
        Ok(())
    }

    // --- Internal helpers ---

    fn read_record(&self, height: u64) -> Result<Option<CacheRecord>, CacheError> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        match self
            .db
            .get_cf(&cf, Self::height_key(height))
            .map_err(|e| CacheError::Storage(e.to_string()))?
        {
            Some(bytes) => CacheRecord::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Get a u64 from the metadata column family.
    fn get_meta_u64(&self, key: &[u8]) -> Result<Option<u64>, CacheError> {
        let cf = self.cf_handle(CF_METADATA)?;
        match self
            .db
            .get_cf(&cf, key)
            .map_err(|e| CacheError::Storage(e.to_string()))?
        {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| CacheError::CorruptState("invalid metadata value length".into()))?;
                Ok(Some(u64::from_le_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    /// Get a column family handle.
    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, CacheError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| CacheError::Storage(format!("missing column family: {name}")))
    }

    /// Encode a height as big-endian bytes for ordered iteration.
    fn height_key(height: u64) -> [u8; 8] {
        height.to_be_bytes()
    }
}
