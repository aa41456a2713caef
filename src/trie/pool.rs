use crate::trie::node::INode;

/// Arena of internal nodes built up by a write transaction.
///
/// Path copying allocates a handful of nodes per operation; the arena hands
/// out slots addressed by `Child::Dirty` and is reset between transactions so
/// its backing storage is reused across commits. The pool travels inside the
/// writer mutex and is never shared across transactions: an abort simply
/// leaves the contents for the next reset.
#[derive(Debug, Default)]
pub struct Pool {
    inodes: Vec<INode>,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves a node into the arena and returns its slot.
    pub fn alloc(&mut self, node: INode) -> usize {
        self.inodes.push(node);
        self.inodes.len() - 1
    }

    pub fn inode(&self, slot: usize) -> &INode {
        &self.inodes[slot]
    }

    pub fn inode_mut(&mut self, slot: usize) -> &mut INode {
        &mut self.inodes[slot]
    }

    /// Number of nodes allocated by the current transaction.
    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }

    /// Discards all allocations, keeping capacity for the next transaction.
    pub fn reset(&mut self) {
        self.inodes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::node::Child;

    #[test]
    fn test_alloc_and_access() {
        let mut pool = Pool::new();
        let a = pool.alloc(INode::new(1));
        let b = pool.alloc(INode::new(1));
        assert_eq!(pool.len(), 2);

        pool.inode_mut(a).children.push(Child::Dirty(b));
        assert_eq!(pool.inode(a).children, vec![Child::Dirty(b)]);
        assert_eq!(pool.inode(b).version, 1);
    }

    #[test]
    fn test_reset_discards_nodes() {
        let mut pool = Pool::new();
        pool.alloc(INode::new(1));
        pool.alloc(INode::new(1));
        pool.reset();
        assert!(pool.is_empty());

        let slot = pool.alloc(INode::new(2));
        assert_eq!(slot, 0);
    }
}
