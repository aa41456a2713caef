//! Copy-on-write trie storage engine over a memory-mapped file.
//!
//! This module implements an ordered key-value store as a radix-256 hash
//! array mapped trie whose nodes live in an append-only, memory-mapped data
//! file. Keys are decomposed one byte per level, so depth-first traversal in
//! ascending bit order is ascending lexicographic key order.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────┐  exclusive   ┌─────────────┐
//!            │  update_tx   │─────────────►│  node pool  │
//!            └──────┬───────┘  path copy   └──────┬──────┘
//!                   │ commit: stage, append,      │
//!                   │ flush, publish root         │
//!                   ▼                             ▼
//!  ┌───────────────────────────────────────────────────────────┐
//!  │ metadata block │ node │ node │ node │ ... │ append cursor │
//!  └───────────────────────────────────────────────────────────┘
//!                   ▲      memory-mapped data file
//!                   │ lock-free snapshot reads
//!            ┌──────┴───────┐
//!            │   read_tx    │  (any number, in parallel)
//!            └──────────────┘
//! ```
//!
//! # Write path
//!
//! 1. **Path copy**: the writer copies the root and every node on the
//!    mutated path into the per-transaction pool, stamped with the new
//!    version. The persisted tree is never modified in place.
//! 2. **Stage**: on commit the dirty subtree is serialized children-first
//!    into one buffer, so every encoded pointer is already final and the new
//!    root lands last.
//! 3. **Append and flush**: the buffer goes in at the append cursor and the
//!    region is synced before anything references it.
//! 4. **Publish**: the metadata block is rewritten and flushed, then the
//!    in-memory root pointer is swapped. That single store is the
//!    linearization point of the commit.
//!
//! # Read path
//!
//! A read transaction loads the root pointer once and clones the map handle;
//! both stay fixed for its lifetime, which is all snapshot isolation
//! requires. Nodes are deserialized lazily from the map as the walk
//! descends. Readers never block writers and vice versa.
//!
//! # Durability
//!
//! Appended regions and the metadata block are flushed before the root
//! pointer moves, so a crash at any earlier point leaves the previous root
//! intact and the partial append unreferenced. Space held by unreachable
//! nodes is not reclaimed here; that is a compaction concern outside this
//! engine.

pub mod codec;
pub mod iterate;
pub mod meta;
pub mod mmap;
pub mod node;
pub mod ops;
pub mod pool;
pub mod store;
pub mod tx;

pub use store::Ember;
pub use tx::{KeyValuePair, Transform, Tx};
