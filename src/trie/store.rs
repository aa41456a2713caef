use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::config::Config;
use crate::errcorrupt;
use crate::error::Result;
use crate::flock::FileLock;
use crate::trie::meta::{Meta, META_SIZE};
use crate::trie::mmap::{self, MmapFile};
use crate::trie::node::INode;
use crate::trie::ops;
use crate::trie::pool::Pool;
use crate::trie::tx::Tx;

/// An embedded ordered key-value store.
///
/// One `Ember` owns one memory-mapped data file. Any number of read
/// transactions run in parallel with each other and with the single active
/// write transaction; the writer mutex also carries the node pool so its
/// arena is reused from one commit to the next.
pub struct Ember {
    config: Config,
    lock: Option<FileLock>,
    mmap: MmapFile,
    /// File offset of the current root. The `Release` store at commit is the
    /// linearization point; readers `Acquire`-load it once per transaction.
    root: AtomicU64,
    writer: Mutex<Pool>,
}

impl Ember {
    /// Opens the store, creating the data file and the version-0 root on
    /// first use. The store directory is locked against other processes for
    /// the lifetime of the returned handle.
    pub fn open(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;
        let lock = FileLock::lock(config.lock_path())?;

        let (mmap, created) = MmapFile::open_or_create(&config.data_path(), config.initial_size)?;
        let root_offset = if created {
            Self::init_root(&mmap)?
        } else {
            Self::recover(&mmap)?
        };

        tracing::info!(
            path = %config.data_path().display(),
            root_offset,
            created,
            "opened store"
        );

        Ok(Self {
            config,
            lock: Some(lock),
            mmap,
            root: AtomicU64::new(root_offset),
            writer: Mutex::new(Pool::new()),
        })
    }

    /// Writes the empty version-0 root into a fresh file and publishes it.
    fn init_root(mmap: &MmapFile) -> Result<u64> {
        let mut pool = Pool::new();
        let root_slot = pool.alloc(INode::new(0));

        let base = META_SIZE as u64;
        mmap.set_cursor(base);
        let mut buf = Vec::new();
        let root_offset = ops::stage(&mut pool, root_slot, base, &mut buf)?;

        mmap.append(&buf, 0)?;
        mmap.flush_range(base, buf.len() as u64)?;

        mmap.write_at(0, &Meta::new(root_offset, 0, mmap.cursor()).encode())?;
        mmap.flush_range(0, META_SIZE as u64)?;
        Ok(root_offset)
    }

    /// Adopts the root descriptor of an existing file. Bytes past the
    /// recorded append cursor are unpublished leftovers from an interrupted
    /// commit and are simply overwritten by the next one.
    fn recover(mmap: &MmapFile) -> Result<u64> {
        let map = mmap.load()?;
        let meta = Meta::decode(mmap::read(&map, 0, META_SIZE as u64)?)?;

        if meta.append_cursor > map.len() as u64 {
            return errcorrupt!(
                "append cursor {} beyond {} byte file",
                meta.append_cursor,
                map.len()
            );
        }
        if meta.root_offset >= meta.append_cursor {
            return errcorrupt!(
                "root offset {} at or past append cursor {}",
                meta.root_offset,
                meta.append_cursor
            );
        }
        // The root must be readable before we serve transactions from it.
        let root = ops::read_inode(&map, meta.root_offset)?;

        mmap.set_cursor(meta.append_cursor);
        tracing::debug!(
            root_offset = meta.root_offset,
            version = root.version,
            cursor = meta.append_cursor,
            "recovered root descriptor"
        );
        Ok(meta.root_offset)
    }

    /// Runs `f` inside the exclusive write transaction and commits on `Ok`.
    /// Any error from `f` or the commit pipeline aborts: the pool is
    /// discarded and no on-disk state becomes visible.
    pub fn update_tx<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Tx) -> Result<()>,
    {
        let mut guard = self.writer.lock()?;
        guard.reset();

        let map = self.mmap.load()?;
        let root_offset = self.root.load(Ordering::Acquire);
        let root = ops::read_inode(&map, root_offset)?;
        let version = root.version + 1;
        let root_slot = guard.alloc(ops::copy_inode(&root, version));

        let mut tx = Tx::write(
            map,
            root_offset,
            version,
            &mut guard,
            root_slot,
            self.config.strict_delete,
        );
        f(&mut tx)?;
        self.commit(tx)
    }

    /// Runs `f` against an immutable snapshot: the root published most
    /// recently before the call. Writes through the handle fail with
    /// `ReadOnly`.
    pub fn read_tx<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Tx) -> Result<T>,
    {
        let root_offset = self.root.load(Ordering::Acquire);
        let map = self.mmap.load()?;
        let root = ops::read_inode(&map, root_offset)?;
        let mut tx = Tx::read(map, root_offset, root.version);
        f(&mut tx)
    }

    /// Serializes the transaction's dirty path, appends and flushes it, then
    /// publishes the new root. Publication order is the crash-safety
    /// contract: node bytes, node flush, metadata, metadata flush, and only
    /// then the in-memory root pointer.
    fn commit(&self, mut tx: Tx) -> Result<()> {
        let Some(state) = tx.write.as_mut() else {
            return Ok(());
        };
        if !state.dirty {
            tracing::trace!("transaction made no changes, skipping publication");
            return Ok(());
        }

        let base = self.mmap.cursor();
        let mut buf = Vec::new();
        let new_root = ops::stage(&mut *state.pool, state.root_slot, base, &mut buf)?;

        self.mmap.append(&buf, self.config.max_size)?;
        self.mmap.flush_range(base, buf.len() as u64)?;
        self.publish_root(new_root, tx.root_offset)?;

        tracing::debug!(
            version = tx.version(),
            root_offset = new_root,
            bytes = buf.len(),
            "committed"
        );
        Ok(())
    }

    /// Rewrites and flushes the root descriptor, then swaps the in-memory
    /// root pointer. Readers either see the previous root or the new one,
    /// never an intermediate state.
    fn publish_root(&self, root_offset: u64, prev_root_offset: u64) -> Result<()> {
        let cursor = self.mmap.cursor();
        self.mmap
            .write_at(0, &Meta::new(root_offset, prev_root_offset, cursor).encode())?;
        self.mmap.flush_range(0, META_SIZE as u64)?;
        self.root.store(root_offset, Ordering::Release);
        Ok(())
    }

    /// Size of the data file in bytes.
    pub fn file_size(&self) -> Result<u64> {
        Ok(fs::metadata(self.config.data_path())?.len())
    }

    /// Flushes the mapped file and releases the process lock.
    pub fn close(mut self) -> Result<()> {
        let cursor = self.mmap.cursor();
        self.mmap.flush_range(0, cursor)?;
        if let Some(lock) = self.lock.take() {
            lock.unlock()?;
        }
        tracing::info!(path = %self.config.data_path().display(), "closed store");
        Ok(())
    }

    /// Closes the store and deletes its data and lock files.
    pub fn remove(mut self) -> Result<()> {
        let data_path = self.config.data_path();
        let lock_path = self.config.lock_path();
        if let Some(lock) = self.lock.take() {
            lock.unlock()?;
        }
        fs::remove_file(&data_path)?;
        let _ = fs::remove_file(&lock_path);
        tracing::info!(path = %data_path.display(), "removed store");
        Ok(())
    }
}
