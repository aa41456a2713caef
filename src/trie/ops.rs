//! Core trie operations: lookup, copy-on-write mutation, and commit staging.
//!
//! Every mutation copies the root-to-leaf path it touches into the
//! transaction pool, stamps the copies with the transaction version, and
//! leaves the persisted tree untouched. Commit staging then serializes the
//! dirty subtree into one contiguous region, children before parents, so the
//! root lands last with every pointer already resolved.

use memmap2::MmapRaw;

use crate::errcorrupt;
use crate::error::Result;
use crate::trie::codec::{self, NODE_END_OFFSET_IDX};
use crate::trie::mmap;
use crate::trie::node::{self, Child, INode, LNode};
use crate::trie::pool::Pool;

/// Materializes an internal node from the map, leaf included.
pub fn read_inode(map: &MmapRaw, offset: u64) -> Result<INode> {
    let end_offset = mmap::read_u16(map, offset + NODE_END_OFFSET_IDX as u64)?;
    let bytes = mmap::read(map, offset, u64::from(end_offset) + 1)?;

    let mut inode = codec::decode_inode(bytes)?;
    if inode.start_offset != offset {
        return errcorrupt!(
            "internal node at {offset} recorded as written at {}",
            inode.start_offset
        );
    }

    inode.leaf = read_lnode(map, inode.leaf.start_offset)?;
    Ok(inode)
}

/// Materializes a leaf node from the map.
pub fn read_lnode(map: &MmapRaw, offset: u64) -> Result<LNode> {
    let end_offset = mmap::read_u16(map, offset + NODE_END_OFFSET_IDX as u64)?;
    let bytes = mmap::read(map, offset, u64::from(end_offset) + 1)?;

    let lnode = codec::decode_lnode(bytes)?;
    if lnode.start_offset != offset {
        return errcorrupt!(
            "leaf node at {offset} recorded as written at {}",
            lnode.start_offset
        );
    }
    Ok(lnode)
}

/// Copies a node for path mutation: same bitmap, leaf, and children, stamped
/// with the transaction version and not yet assigned a file offset.
pub fn copy_inode(source: &INode, version: u64) -> INode {
    INode {
        version,
        start_offset: 0,
        end_offset: 0,
        bitmap: source.bitmap,
        leaf: source.leaf.clone(),
        children: source.children.clone(),
    }
}

/// Looks up `key` against a persisted root. Walks one node per key byte; the
/// node reached when the key is exhausted holds the pair, unless its leaf is
/// the sentinel.
pub fn get(map: &MmapRaw, root_offset: u64, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    let mut current = read_inode(map, root_offset)?;

    for level in 0..key.len() {
        let index = key[level];
        if !node::is_bit_set(&current.bitmap, index) {
            return Ok(None);
        }
        let position = node::bit_position(&current.bitmap, index);
        let offset = match current.children[position] {
            Child::Stored(offset) => offset,
            Child::Dirty(slot) => {
                return errcorrupt!("persisted node references pool slot {slot}")
            }
        };
        current = read_inode(map, offset)?;
    }

    if current.leaf.is_sentinel() {
        return Ok(None);
    }
    Ok(Some((current.leaf.key, current.leaf.value)))
}

/// Looks up `key` against the working tree of a write transaction, so the
/// transaction observes its own uncommitted puts and deletes.
pub fn get_in_tx(
    pool: &Pool,
    map: &MmapRaw,
    root_slot: usize,
    key: &[u8],
) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    let mut owned: INode;
    let mut current: &INode = pool.inode(root_slot);

    for level in 0..key.len() {
        let index = key[level];
        if !node::is_bit_set(&current.bitmap, index) {
            return Ok(None);
        }
        let position = node::bit_position(&current.bitmap, index);
        let child = current.children[position];
        match child {
            Child::Dirty(slot) => current = pool.inode(slot),
            Child::Stored(offset) => {
                owned = read_inode(map, offset)?;
                current = &owned;
            }
        }
    }

    if current.leaf.is_sentinel() {
        return Ok(None);
    }
    Ok(Some((current.leaf.key.clone(), current.leaf.value.clone())))
}

/// Inserts or overwrites `key` below the pool node at `slot`, which is
/// already a copy owned by this transaction. Levels missing from the tree are
/// spliced in as empty nodes until the key is exhausted, where the leaf is
/// replaced.
pub fn put(
    pool: &mut Pool,
    map: &MmapRaw,
    slot: usize,
    key: &[u8],
    value: &[u8],
    level: usize,
    version: u64,
) -> Result<()> {
    if level == key.len() {
        pool.inode_mut(slot).leaf = LNode::new(version, key.to_vec(), value.to_vec());
        return Ok(());
    }

    let index = key[level];
    let child_slot = if node::is_bit_set(&pool.inode(slot).bitmap, index) {
        materialize_child(pool, map, slot, index, version)?
    } else {
        let position = node::bit_position(&pool.inode(slot).bitmap, index);
        let child_slot = pool.alloc(INode::new(version));
        let parent = pool.inode_mut(slot);
        node::set_bit(&mut parent.bitmap, index);
        parent.children.insert(position, Child::Dirty(child_slot));
        child_slot
    };

    put(pool, map, child_slot, key, value, level + 1, version)
}

/// Removes `key` below the pool node at `slot`. Returns whether the key was
/// present. Nodes left with no children and no terminating key are pruned
/// from their parent on the way back up; the root is never pruned.
pub fn delete(
    pool: &mut Pool,
    map: &MmapRaw,
    slot: usize,
    key: &[u8],
    level: usize,
    version: u64,
) -> Result<bool> {
    if level == key.len() {
        if pool.inode(slot).leaf.is_sentinel() {
            return Ok(false);
        }
        pool.inode_mut(slot).leaf = LNode::sentinel(version);
        return Ok(true);
    }

    let index = key[level];
    if !node::is_bit_set(&pool.inode(slot).bitmap, index) {
        return Ok(false);
    }

    let child_slot = materialize_child(pool, map, slot, index, version)?;
    let removed = delete(pool, map, child_slot, key, level + 1, version)?;

    if removed && pool.inode(child_slot).is_reclaimable() {
        let position = node::bit_position(&pool.inode(slot).bitmap, index);
        let parent = pool.inode_mut(slot);
        node::clear_bit(&mut parent.bitmap, index);
        parent.children.remove(position);
    }
    Ok(removed)
}

/// Brings the child for byte `index` onto the mutation path: a child already
/// copied by this transaction is reused, a persisted child is read from the
/// map and copied into the pool.
fn materialize_child(
    pool: &mut Pool,
    map: &MmapRaw,
    slot: usize,
    index: u8,
    version: u64,
) -> Result<usize> {
    let position = node::bit_position(&pool.inode(slot).bitmap, index);
    let child = pool.inode(slot).children[position];
    match child {
        Child::Dirty(child_slot) => Ok(child_slot),
        Child::Stored(offset) => {
            let persisted = read_inode(map, offset)?;
            let child_slot = pool.alloc(copy_inode(&persisted, version));
            pool.inode_mut(slot).children[position] = Child::Dirty(child_slot);
            Ok(child_slot)
        }
    }
}

/// Serializes the dirty subtree rooted at `slot` into `buf`, whose first byte
/// will land at file offset `base`. Children are staged before their parent
/// so every encoded pointer is already final; each node is followed by its
/// leaf. Returns the file offset assigned to the subtree root.
pub fn stage(pool: &mut Pool, slot: usize, base: u64, buf: &mut Vec<u8>) -> Result<u64> {
    for position in 0..pool.inode(slot).children.len() {
        let child = pool.inode(slot).children[position];
        if let Child::Dirty(child_slot) = child {
            let offset = stage(pool, child_slot, base, buf)?;
            pool.inode_mut(slot).children[position] = Child::Stored(offset);
        }
    }

    let inode = pool.inode_mut(slot);
    let offset = base + buf.len() as u64;
    inode.start_offset = offset;
    inode.end_offset = inode.determine_end_offset();
    inode.leaf.start_offset = offset + u64::from(inode.end_offset) + 1;
    inode.leaf.end_offset = inode.leaf.determine_end_offset();

    let encoded = codec::encode_inode(inode)?;
    buf.extend_from_slice(&encoded);
    buf.extend_from_slice(&codec::encode_lnode(&inode.leaf));
    Ok(offset)
}
