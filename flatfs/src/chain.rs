//! Linked block chains describing file contents.
//!
//! Each file's data is an ordered sequence of [`ExtentNode`]s drawn from a
//! shared fixed-size pool. A node names one physical block and the node that
//! follows it, so a file can span any set of blocks regardless of where they
//! sit in the region.

use crate::io::BlockNumber;
use thiserror::Error;

/// A chain that cannot be walked to its end. Reported by the read-only
/// traversals; `release` treats the same conditions as fatal.
#[derive(Error, Debug, PartialEq)]
pub enum ChainError {
    #[error("extent chain revisits node {0}, chain is cyclic")]
    Cycle(usize),
    #[error("extent chain links unused node {0}")]
    UnusedNode(usize),
    #[error("extent chain shorter than file size")]
    Truncated,
}

/// Index of a node in the [`ExtentPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeRef(usize);

impl NodeRef {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExtentNode {
    /// `None` while the node sits unused in the pool.
    block: Option<BlockNumber>,
    /// `None` terminates the chain.
    next: Option<NodeRef>,
}

impl ExtentNode {
    pub fn block_index(&self) -> Option<BlockNumber> {
        self.block
    }

    pub fn next(&self) -> Option<NodeRef> {
        self.next
    }

    pub fn is_unused(&self) -> bool {
        self.block.is_none()
    }

    fn reset(&mut self) {
        self.block = None;
        self.next = None;
    }
}

/// Pool of chain nodes. Sized to the block count, one node can exist per
/// physical block so the pool never runs dry while the bitmap has space.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtentPool {
    nodes: Vec<ExtentNode>,
}

impl ExtentPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            nodes: vec![ExtentNode::default(); capacity],
        }
    }

    pub fn node(&self, node: NodeRef) -> &ExtentNode {
        &self.nodes[node.0]
    }

    /// Number of nodes currently linked into some chain.
    pub fn in_use(&self) -> usize {
        self.nodes.iter().filter(|node| !node.is_unused()).count()
    }

    /// Links one node per block in the given order and returns the head. An
    /// empty block list produces no chain.
    ///
    /// # Panics
    ///
    /// Panics if the pool has fewer unused nodes than blocks. Callers allocate
    /// the blocks from a bitmap of the same capacity first, so this cannot
    /// happen while the pool and bitmap agree.
    pub fn build(&mut self, blocks: &[BlockNumber]) -> Option<NodeRef> {
        let slots: Vec<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_unused())
            .map(|(i, _)| i)
            .take(blocks.len())
            .collect();
        assert_eq!(
            slots.len(),
            blocks.len(),
            "extent pool exhausted while bitmap reported free blocks"
        );

        for (pos, (&slot, &blocknr)) in slots.iter().zip(blocks).enumerate() {
            self.nodes[slot] = ExtentNode {
                block: Some(blocknr),
                next: slots.get(pos + 1).map(|&i| NodeRef(i)),
            };
        }
        slots.first().map(|&i| NodeRef(i))
    }

    /// Block numbers of the chain starting at `head`, in file order.
    pub fn blocks(&self, head: Option<NodeRef>) -> Result<Vec<BlockNumber>, ChainError> {
        self.walk(head).collect()
    }

    /// Unlinks every node of the chain, returning the blocks they held in
    /// file order.
    ///
    /// # Panics
    ///
    /// Panics on a cycle or a link into an unused node. Either means two
    /// files share nodes and the volume can no longer be trusted.
    pub fn release(&mut self, head: Option<NodeRef>) -> Vec<BlockNumber> {
        let mut visited = vec![false; self.nodes.len()];
        let mut freed = Vec::new();
        let mut cursor = head;
        while let Some(node) = cursor {
            assert!(
                !visited[node.0],
                "extent chain revisits node {}, chain is cyclic",
                node.0
            );
            visited[node.0] = true;

            let entry = &mut self.nodes[node.0];
            let blocknr = entry
                .block
                .unwrap_or_else(|| panic!("extent chain links unused node {}", node.0));
            cursor = entry.next;
            entry.reset();
            freed.push(blocknr);
        }
        freed
    }

    /// Reads `size` bytes of the chain into `buf` using `read_block` for every
    /// block visited. The final block contributes only the bytes still needed.
    /// Stops after `ceil(size / block_size)` blocks even if the chain is
    /// longer. Broken chains surface as `E::from(ChainError)`.
    pub fn read_into<F, E>(
        &self,
        head: Option<NodeRef>,
        size: usize,
        block_size: usize,
        mut read_block: F,
        buf: &mut Vec<u8>,
    ) -> Result<(), E>
    where
        F: FnMut(BlockNumber, &mut [u8]) -> Result<(), E>,
        E: From<ChainError>,
    {
        let mut scratch = vec![0; block_size];
        let mut remaining = size;
        let mut chain = self.walk(head);
        while remaining > 0 {
            let blocknr = match chain.next() {
                Some(blocknr) => blocknr?,
                None => return Err(ChainError::Truncated.into()),
            };
            read_block(blocknr, &mut scratch)?;
            let take = std::cmp::min(remaining, block_size);
            buf.extend_from_slice(&scratch[..take]);
            remaining -= take;
        }
        Ok(())
    }

    fn walk(&self, head: Option<NodeRef>) -> ChainIter<'_> {
        ChainIter {
            pool: self,
            cursor: head,
            visited: vec![false; self.nodes.len()],
        }
    }

    #[cfg(test)]
    pub(crate) fn relink(&mut self, node: NodeRef, next: Option<NodeRef>) {
        self.nodes[node.0].next = next;
    }
}

struct ChainIter<'a> {
    pool: &'a ExtentPool,
    cursor: Option<NodeRef>,
    visited: Vec<bool>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = Result<BlockNumber, ChainError>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.cursor.take()?;
        if self.visited[node.0] {
            return Some(Err(ChainError::Cycle(node.0)));
        }
        self.visited[node.0] = true;

        let entry = self.pool.node(node);
        match entry.block_index() {
            Some(blocknr) => {
                self.cursor = entry.next();
                Some(Ok(blocknr))
            }
            None => Some(Err(ChainError::UnusedNode(node.0))),
        }
    }
}
