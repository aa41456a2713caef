//! Ordered traversal over the trie.
//!
//! Both walks are depth-first in ascending bit order, which by construction
//! is ascending lexicographic key order: a node's own leaf is emitted before
//! its children, and a leaf key is a strict prefix of every key below it.
//! The accumulator therefore comes back sorted without a separate pass.
//!
//! While the walk is still seeking the start key it descends the child whose
//! bit index matches the next start-key byte, carrying the start key along;
//! any child to the right of the seek position covers keys past the start
//! key and is walked whole. The range walk bounds the right edge the same
//! way with the end key.

use memmap2::MmapRaw;

use crate::errcorrupt;
use crate::error::Result;
use crate::trie::node::{self, Child, INode, LNode};
use crate::trie::ops;
use crate::trie::pool::Pool;
use crate::trie::tx::{KeyValuePair, Transform};

/// Collects up to `limit` pairs with keys >= `start_key` in ascending order.
///
/// `pool` carries the write transaction's arena when the walk runs over an
/// uncommitted tree; persisted children are materialized from the map either
/// way.
#[allow(clippy::too_many_arguments)]
pub fn iterate(
    pool: Option<&Pool>,
    map: &MmapRaw,
    current: &INode,
    min_version: u64,
    start_key: Option<&[u8]>,
    limit: usize,
    level: usize,
    acc: &mut Vec<KeyValuePair>,
    transform: Option<&Transform>,
) -> Result<()> {
    let mut start_pos = 0;
    let mut follow: Option<&[u8]> = None;

    if level > 0 {
        if acc.len() == limit {
            return Ok(());
        }
        match start_key {
            // The seek landed exactly on this node; its leaf, when real, is
            // the start key itself.
            Some(start) if start.len() == level => {
                if !current.leaf.is_sentinel() && current.leaf.version >= min_version {
                    emit(acc, &current.leaf, transform);
                }
            }
            // Still seeking. A leaf on the seek path is a strict prefix of
            // the start key and compares below it.
            Some(start) => {
                if !current.leaf.is_sentinel()
                    && current.leaf.key.as_slice() >= start
                    && current.leaf.version >= min_version
                {
                    emit(acc, &current.leaf, transform);
                }
                let index = node::index_for_level(start, level);
                start_pos = node::bit_position(&current.bitmap, index);
                if node::is_bit_set(&current.bitmap, index) {
                    follow = Some(start);
                }
            }
            None => {
                if !current.leaf.is_sentinel() && current.leaf.version >= min_version {
                    emit(acc, &current.leaf, transform);
                }
            }
        }
    } else if let Some(start) = start_key {
        let index = node::index_for_level(start, 0);
        start_pos = node::bit_position(&current.bitmap, index);
        if node::is_bit_set(&current.bitmap, index) {
            follow = Some(start);
        }
    }

    for position in start_pos..current.children.len() {
        if acc.len() == limit {
            break;
        }
        let child_start = if position == start_pos { follow } else { None };
        let mut owned = None;
        let child = resolve_child(pool, map, current.children[position], &mut owned)?;
        iterate(
            pool,
            map,
            child,
            min_version,
            child_start,
            limit,
            level + 1,
            acc,
            transform,
        )?;
    }
    Ok(())
}

/// Collects every pair with `start_key <= key <= end_key` in ascending order.
#[allow(clippy::too_many_arguments)]
pub fn range(
    pool: Option<&Pool>,
    map: &MmapRaw,
    current: &INode,
    min_version: u64,
    start_key: Option<&[u8]>,
    end_key: Option<&[u8]>,
    level: usize,
    acc: &mut Vec<KeyValuePair>,
    transform: Option<&Transform>,
) -> Result<()> {
    if level > 0
        && !current.leaf.is_sentinel()
        && current.leaf.version >= min_version
        && start_key.map_or(true, |start| current.leaf.key.as_slice() >= start)
        && end_key.map_or(true, |end| current.leaf.key.as_slice() <= end)
    {
        emit(acc, &current.leaf, transform);
    }

    let mut start_pos = 0;
    let mut follow_start: Option<&[u8]> = None;
    if let Some(start) = start_key {
        if start.len() > level {
            let index = node::index_for_level(start, level);
            start_pos = node::bit_position(&current.bitmap, index);
            if node::is_bit_set(&current.bitmap, index) {
                follow_start = Some(start);
            }
        }
    }

    // One past the last child still within the end bound.
    let mut end_pos = current.children.len();
    let mut follow_end: Option<&[u8]> = None;
    if let Some(end) = end_key {
        if end.len() > level {
            let index = node::index_for_level(end, level);
            let position = node::bit_position(&current.bitmap, index);
            if node::is_bit_set(&current.bitmap, index) {
                end_pos = end_pos.min(position + 1);
                follow_end = Some(end);
            } else {
                end_pos = end_pos.min(position);
            }
        } else {
            // The end key terminates at this node; every deeper key has it
            // as a proper prefix and sorts above it.
            end_pos = 0;
        }
    }

    for position in start_pos..end_pos {
        let child_start = if position == start_pos { follow_start } else { None };
        let child_end = if position + 1 == end_pos { follow_end } else { None };
        let mut owned = None;
        let child = resolve_child(pool, map, current.children[position], &mut owned)?;
        range(
            pool,
            map,
            child,
            min_version,
            child_start,
            child_end,
            level + 1,
            acc,
            transform,
        )?;
    }
    Ok(())
}

fn emit(acc: &mut Vec<KeyValuePair>, leaf: &LNode, transform: Option<&Transform>) {
    let pair = KeyValuePair {
        key: leaf.key.clone(),
        value: leaf.value.clone(),
    };
    acc.push(match transform {
        Some(transform) => transform(pair),
        None => pair,
    });
}

/// Resolves a child reference against the pool for in-flight nodes or the
/// map for persisted ones. `owned` anchors the lifetime of a node read from
/// the map.
fn resolve_child<'a>(
    pool: Option<&'a Pool>,
    map: &MmapRaw,
    child: Child,
    owned: &'a mut Option<INode>,
) -> Result<&'a INode> {
    match child {
        Child::Dirty(slot) => match pool {
            Some(pool) => Ok(pool.inode(slot)),
            None => errcorrupt!("unpersisted child slot {slot} reachable outside a write transaction"),
        },
        Child::Stored(offset) => Ok(owned.insert(ops::read_inode(map, offset)?)),
    }
}
