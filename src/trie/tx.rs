use std::sync::Arc;

use memmap2::MmapRaw;
use serde::{Deserialize, Serialize};

use crate::errinput;
use crate::error::{Error, Result};
use crate::format::{Formatter, Raw};
use crate::trie::codec;
use crate::trie::iterate;
use crate::trie::node::MAX_KEY_SIZE;
use crate::trie::ops;
use crate::trie::pool::Pool;

/// A key and its value, as returned by lookups and scans.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValuePair {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Optional hook applied to every pair a lookup or scan emits, e.g. to
/// decode or project values on the way out.
pub type Transform = dyn Fn(KeyValuePair) -> KeyValuePair + Send + Sync;

pub(crate) struct WriteState<'a> {
    pub pool: &'a mut Pool,
    pub root_slot: usize,
    pub dirty: bool,
}

/// Handle to a transaction's snapshot of the store.
///
/// A read transaction operates against the root observed when it began and
/// never blocks. A write transaction additionally owns the working copy of
/// the mutated path and observes its own uncommitted changes; it publishes
/// on successful return from the transaction closure.
pub struct Tx<'a> {
    pub(crate) map: Arc<MmapRaw>,
    pub(crate) root_offset: u64,
    pub(crate) version: u64,
    pub(crate) write: Option<WriteState<'a>>,
    strict_delete: bool,
}

impl<'a> Tx<'a> {
    pub(crate) fn read(map: Arc<MmapRaw>, root_offset: u64, version: u64) -> Self {
        Self {
            map,
            root_offset,
            version,
            write: None,
            strict_delete: false,
        }
    }

    pub(crate) fn write(
        map: Arc<MmapRaw>,
        root_offset: u64,
        version: u64,
        pool: &'a mut Pool,
        root_slot: usize,
        strict_delete: bool,
    ) -> Self {
        Self {
            map,
            root_offset,
            version,
            write: Some(WriteState {
                pool,
                root_slot,
                dirty: false,
            }),
            strict_delete,
        }
    }

    /// The transaction's version: the snapshot version for reads, the
    /// version being built for writes.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Inserts or overwrites a key-value pair.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        check_key(key)?;
        if value.len() > codec::max_value_size(key.len()) {
            return Err(Error::ValueTooLong(value.len()));
        }

        let version = self.version;
        let Some(state) = self.write.as_mut() else {
            return Err(Error::ReadOnly);
        };
        ops::put(&mut *state.pool, &self.map, state.root_slot, key, value, 0, version)?;
        state.dirty = true;
        tracing::trace!(key = %Raw::key(key), "put");
        Ok(())
    }

    /// Looks up a key. An absent key is `Ok(None)`.
    pub fn get(&self, key: &[u8], transform: Option<&Transform>) -> Result<Option<KeyValuePair>> {
        if key.is_empty() || key.len() > MAX_KEY_SIZE {
            return Ok(None);
        }

        let found = match &self.write {
            Some(state) => ops::get_in_tx(&*state.pool, &self.map, state.root_slot, key)?,
            None => ops::get(&self.map, self.root_offset, key)?,
        };
        Ok(found.map(|(key, value)| {
            let pair = KeyValuePair { key, value };
            match transform {
                Some(transform) => transform(pair),
                None => pair,
            }
        }))
    }

    /// Removes a key. Deleting an absent key succeeds unless the store was
    /// configured with `strict_delete`.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        check_key(key)?;

        let version = self.version;
        let strict = self.strict_delete;
        let Some(state) = self.write.as_mut() else {
            return Err(Error::ReadOnly);
        };
        let removed = ops::delete(&mut *state.pool, &self.map, state.root_slot, key, 0, version)?;
        if removed {
            state.dirty = true;
            tracing::trace!(key = %Raw::key(key), "delete");
        } else if strict {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Collects up to `limit` pairs with keys >= `start_key` in ascending
    /// lexicographic order. `None` (or an empty key) starts from the lowest
    /// key in the store.
    pub fn iterate(
        &self,
        start_key: Option<&[u8]>,
        limit: usize,
        transform: Option<&Transform>,
    ) -> Result<Vec<KeyValuePair>> {
        let start_key = start_key.filter(|key| !key.is_empty());
        let mut acc = Vec::new();

        match &self.write {
            Some(state) => iterate::iterate(
                Some(&*state.pool),
                &self.map,
                state.pool.inode(state.root_slot),
                0,
                start_key,
                limit,
                0,
                &mut acc,
                transform,
            )?,
            None => {
                let root = ops::read_inode(&self.map, self.root_offset)?;
                iterate::iterate(None, &self.map, &root, 0, start_key, limit, 0, &mut acc, transform)?
            }
        }
        Ok(acc)
    }

    /// Collects every pair with `start_key <= key <= end_key` in ascending
    /// lexicographic order. Reversed bounds are swapped; an empty bound is
    /// unbounded on that side.
    pub fn range(
        &self,
        start_key: &[u8],
        end_key: &[u8],
        transform: Option<&Transform>,
    ) -> Result<Vec<KeyValuePair>> {
        let (start_key, end_key) = if !end_key.is_empty() && start_key > end_key {
            (end_key, start_key)
        } else {
            (start_key, end_key)
        };
        let start_key = (!start_key.is_empty()).then_some(start_key);
        let end_key = (!end_key.is_empty()).then_some(end_key);

        let mut acc = Vec::new();
        match &self.write {
            Some(state) => iterate::range(
                Some(&*state.pool),
                &self.map,
                state.pool.inode(state.root_slot),
                0,
                start_key,
                end_key,
                0,
                &mut acc,
                transform,
            )?,
            None => {
                let root = ops::read_inode(&self.map, self.root_offset)?;
                iterate::range(None, &self.map, &root, 0, start_key, end_key, 0, &mut acc, transform)?
            }
        }
        Ok(acc)
    }
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return errinput!("keys must not be empty");
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(Error::KeyTooLong(key.len()));
    }
    Ok(())
}
