//! Fixed little-endian byte layout for trie nodes.
//!
//! Every node starts with a common header:
//!
//! ```text
//! offset  size  field
//! 0       8     version (u64)
//! 8       8     start offset (u64, self-offset kept for auditing)
//! 16      2     end offset (u16, last valid byte relative to start)
//! ```
//!
//! An internal node continues with the 256-bit presence bitmap, the file
//! offset of its leaf, and one 8-byte offset per child, dense and in
//! ascending bit order. A leaf node continues with a single key-length byte,
//! the key, and the value filling the remainder.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::Result;
use crate::errcorrupt;
use crate::trie::node::{self, Bitmap, Child, INode, LNode, BITMAP_WORDS};

pub const NODE_VERSION_IDX: usize = 0;
pub const NODE_START_OFFSET_IDX: usize = 8;
pub const NODE_END_OFFSET_IDX: usize = 16;

/// Internal node body.
pub const NODE_BITMAP_IDX: usize = 18;
pub const NODE_LEAF_OFFSET_IDX: usize = 50;
pub const NODE_CHILDREN_IDX: usize = 58;
pub const NODE_CHILD_PTR_SIZE: usize = 8;

/// Leaf node body.
pub const NODE_KEY_LENGTH_IDX: usize = 18;
pub const NODE_KEY_IDX: usize = 19;

/// Largest value that still fits a leaf whose end offset is a u16.
pub fn max_value_size(key_len: usize) -> usize {
    u16::MAX as usize + 1 - NODE_KEY_IDX - key_len
}

fn put_header(buf: &mut [u8], version: u64, start_offset: u64, end_offset: u16) {
    LittleEndian::write_u64(&mut buf[NODE_VERSION_IDX..], version);
    LittleEndian::write_u64(&mut buf[NODE_START_OFFSET_IDX..], start_offset);
    LittleEndian::write_u16(&mut buf[NODE_END_OFFSET_IDX..], end_offset);
}

/// Serializes an internal node. All children must already have assigned file
/// offsets; commit staging guarantees this by serializing children first.
pub fn encode_inode(node: &INode) -> Result<Vec<u8>> {
    let len = NODE_CHILDREN_IDX + node.children.len() * NODE_CHILD_PTR_SIZE;
    let mut buf = vec![0u8; len];
    put_header(&mut buf, node.version, node.start_offset, node.end_offset);

    for (word, chunk) in node
        .bitmap
        .iter()
        .zip(buf[NODE_BITMAP_IDX..NODE_LEAF_OFFSET_IDX].chunks_exact_mut(4))
    {
        LittleEndian::write_u32(chunk, *word);
    }
    LittleEndian::write_u64(&mut buf[NODE_LEAF_OFFSET_IDX..], node.leaf.start_offset);

    for (rank, child) in node.children.iter().enumerate() {
        let offset = match child {
            Child::Stored(offset) => *offset,
            Child::Dirty(slot) => {
                return errcorrupt!("child at rank {rank} in pool slot {slot} has no file offset")
            }
        };
        let at = NODE_CHILDREN_IDX + rank * NODE_CHILD_PTR_SIZE;
        LittleEndian::write_u64(&mut buf[at..], offset);
    }

    Ok(buf)
}

/// Deserializes an internal node. The leaf comes back as a stub carrying only
/// its start offset; the caller materializes it with a second read.
pub fn decode_inode(bytes: &[u8]) -> Result<INode> {
    if bytes.len() < NODE_CHILDREN_IDX {
        return errcorrupt!(
            "internal node of {} bytes shorter than {NODE_CHILDREN_IDX} byte minimum",
            bytes.len()
        );
    }

    let version = LittleEndian::read_u64(&bytes[NODE_VERSION_IDX..]);
    let start_offset = LittleEndian::read_u64(&bytes[NODE_START_OFFSET_IDX..]);
    let end_offset = LittleEndian::read_u16(&bytes[NODE_END_OFFSET_IDX..]);

    let mut bitmap: Bitmap = [0; BITMAP_WORDS];
    for (word, chunk) in bitmap
        .iter_mut()
        .zip(bytes[NODE_BITMAP_IDX..NODE_LEAF_OFFSET_IDX].chunks_exact(4))
    {
        *word = LittleEndian::read_u32(chunk);
    }
    let leaf_offset = LittleEndian::read_u64(&bytes[NODE_LEAF_OFFSET_IDX..]);

    let child_count = node::bit_count(&bitmap);
    let expected = NODE_CHILDREN_IDX + child_count * NODE_CHILD_PTR_SIZE;
    if bytes.len() != expected || usize::from(end_offset) + 1 != expected {
        return errcorrupt!(
            "internal node length {} disagrees with bitmap ({child_count} children) and end offset {end_offset}",
            bytes.len()
        );
    }

    let mut children = Vec::with_capacity(child_count);
    for rank in 0..child_count {
        let at = NODE_CHILDREN_IDX + rank * NODE_CHILD_PTR_SIZE;
        children.push(Child::Stored(LittleEndian::read_u64(&bytes[at..])));
    }

    let mut leaf = LNode::sentinel(version);
    leaf.start_offset = leaf_offset;

    Ok(INode {
        version,
        start_offset,
        end_offset,
        bitmap,
        leaf,
        children,
    })
}

/// Serializes a leaf node.
pub fn encode_lnode(node: &LNode) -> Vec<u8> {
    let len = NODE_KEY_IDX + node.key.len() + node.value.len();
    let mut buf = vec![0u8; len];
    put_header(&mut buf, node.version, node.start_offset, node.end_offset);

    buf[NODE_KEY_LENGTH_IDX] = node.key.len() as u8;
    buf[NODE_KEY_IDX..NODE_KEY_IDX + node.key.len()].copy_from_slice(&node.key);
    buf[NODE_KEY_IDX + node.key.len()..].copy_from_slice(&node.value);
    buf
}

/// Deserializes a leaf node.
pub fn decode_lnode(bytes: &[u8]) -> Result<LNode> {
    if bytes.len() < NODE_KEY_IDX {
        return errcorrupt!(
            "leaf node of {} bytes shorter than {NODE_KEY_IDX} byte minimum",
            bytes.len()
        );
    }

    let version = LittleEndian::read_u64(&bytes[NODE_VERSION_IDX..]);
    let start_offset = LittleEndian::read_u64(&bytes[NODE_START_OFFSET_IDX..]);
    let end_offset = LittleEndian::read_u16(&bytes[NODE_END_OFFSET_IDX..]);

    if usize::from(end_offset) + 1 != bytes.len() {
        return errcorrupt!(
            "leaf node length {} disagrees with end offset {end_offset}",
            bytes.len()
        );
    }

    let key_length = usize::from(bytes[NODE_KEY_LENGTH_IDX]);
    if NODE_KEY_IDX + key_length > bytes.len() {
        return errcorrupt!("leaf key of {key_length} bytes overruns {} byte node", bytes.len());
    }
    if key_length == 0 && bytes.len() != NODE_KEY_IDX {
        return errcorrupt!("sentinel leaf carries {} value bytes", bytes.len() - NODE_KEY_IDX);
    }

    let key = bytes[NODE_KEY_IDX..NODE_KEY_IDX + key_length].to_vec();
    let value = bytes[NODE_KEY_IDX + key_length..].to_vec();

    Ok(LNode {
        version,
        start_offset,
        end_offset,
        key,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn sample_inode() -> INode {
        let mut node = INode::new(7);
        node.start_offset = 4096;
        node::set_bit(&mut node.bitmap, b'a');
        node::set_bit(&mut node.bitmap, b'q');
        node.children = vec![Child::Stored(200), Child::Stored(300)];
        node.end_offset = node.determine_end_offset();
        node.leaf = LNode {
            version: 7,
            start_offset: 150,
            end_offset: 0,
            key: Vec::new(),
            value: Vec::new(),
        };
        node
    }

    #[test]
    fn test_inode_round_trip() {
        let node = sample_inode();
        let bytes = encode_inode(&node).expect("encode failed");
        assert_eq!(bytes.len(), usize::from(node.end_offset) + 1);

        let decoded = decode_inode(&bytes).expect("decode failed");
        assert_eq!(decoded.version, 7);
        assert_eq!(decoded.start_offset, 4096);
        assert_eq!(decoded.bitmap, node.bitmap);
        assert_eq!(decoded.children, node.children);
        assert_eq!(decoded.leaf.start_offset, 150);
    }

    #[test]
    fn test_inode_rejects_dirty_children() {
        let mut node = sample_inode();
        node.children[1] = Child::Dirty(3);
        assert!(matches!(encode_inode(&node), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_inode_decode_validates_lengths() {
        let node = sample_inode();
        let bytes = encode_inode(&node).expect("encode failed");

        // Truncated child table no longer matches the bitmap.
        assert!(matches!(
            decode_inode(&bytes[..bytes.len() - 8]),
            Err(Error::Corrupt(_))
        ));
        assert!(matches!(decode_inode(&bytes[..10]), Err(Error::Corrupt(_))));

        // A flipped bitmap bit disagrees with the encoded child count.
        let mut flipped = bytes.clone();
        flipped[NODE_BITMAP_IDX] |= 1;
        assert!(matches!(decode_inode(&flipped), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_lnode_round_trip() {
        let mut leaf = LNode::new(9, b"apple".to_vec(), b"crisp".to_vec());
        leaf.start_offset = 777;
        leaf.end_offset = leaf.determine_end_offset();

        let bytes = encode_lnode(&leaf);
        assert_eq!(bytes.len(), usize::from(leaf.end_offset) + 1);

        let decoded = decode_lnode(&bytes).expect("decode failed");
        assert_eq!(decoded, leaf);
    }

    #[test]
    fn test_lnode_empty_value() {
        let mut leaf = LNode::new(2, b"k".to_vec(), Vec::new());
        leaf.end_offset = leaf.determine_end_offset();
        let decoded = decode_lnode(&encode_lnode(&leaf)).expect("decode failed");
        assert_eq!(decoded.key, b"k");
        assert!(decoded.value.is_empty());
    }

    #[test]
    fn test_sentinel_round_trip() {
        let mut leaf = LNode::sentinel(3);
        leaf.end_offset = leaf.determine_end_offset();
        let bytes = encode_lnode(&leaf);
        assert_eq!(bytes.len(), NODE_KEY_IDX);

        let decoded = decode_lnode(&bytes).expect("decode failed");
        assert!(decoded.is_sentinel());
    }

    #[test]
    fn test_lnode_decode_validates_lengths() {
        let mut leaf = LNode::new(1, b"key".to_vec(), b"value".to_vec());
        leaf.end_offset = leaf.determine_end_offset();
        let bytes = encode_lnode(&leaf);

        assert!(matches!(
            decode_lnode(&bytes[..bytes.len() - 1]),
            Err(Error::Corrupt(_))
        ));

        // Key length byte pointing past the end of the node.
        let mut oversized = bytes.clone();
        oversized[NODE_KEY_LENGTH_IDX] = 250;
        assert!(matches!(decode_lnode(&oversized), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_max_value_size() {
        assert_eq!(max_value_size(0), 65536 - NODE_KEY_IDX);
        assert_eq!(max_value_size(255), 65536 - NODE_KEY_IDX - 255);
    }
}
