use crate::io::BlockNumber;
use zerocopy::AsBytes;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum State {
    Free,
    Used,
}

/// Free-block bitmap with one bit per physical block. A set bit means the block
/// is in use. The first `reserved` blocks are set at construction and can never
/// be freed or handed out.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    /// Bits packed into words, block `n` lives at bit `n % 64` of word `n / 64`.
    words: Vec<u64>,
    /// Number of addressable blocks, bits past this in the last word stay zero.
    len: usize,
    reserved: usize,
    free: usize,
}

impl Bitmap {
    pub fn new(len: usize, reserved: usize) -> Self {
        assert!(reserved <= len, "reserved region exceeds bitmap length");
        let mut bmp = Self {
            words: vec![0; (len + 63) / 64],
            len,
            reserved,
            free: len,
        };
        for blocknr in 0..reserved {
            bmp.set_reserved(blocknr);
        }
        bmp
    }

    /// Raw bit words, useful to compare two bitmap states byte for byte.
    pub fn serialize(&self) -> &[u8] {
        self.words.as_slice().as_bytes()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn reserved(&self) -> usize {
        self.reserved
    }

    pub fn free_count(&self) -> usize {
        self.free
    }

    pub fn get(&self, blocknr: BlockNumber) -> State {
        assert!(blocknr < self.len, "block {} outside bitmap", blocknr);
        // Grab of the u64 containing the significant bit.
        let word = self.words[blocknr / 64];

        let inner_offset = blocknr % 64;
        let mask = 0b01_u64 << inner_offset;
        match (word & mask) >> inner_offset {
            0 => State::Free,
            1 => State::Used,
            _ => unreachable!("Block state returned a non 0 or 1 value. This likely indicates an error with bitmasking"),
        }
    }

    fn set_reserved(&mut self, blocknr: BlockNumber) {
        if self.get(blocknr) == State::Used {
            return;
        }
        self.words[blocknr / 64] |= 0b01_u64 << (blocknr % 64);
        self.free -= 1;
    }

    fn set_free(&mut self, blocknr: BlockNumber) {
        if self.get(blocknr) == State::Free {
            return;
        }
        self.words[blocknr / 64] &= !(0b01_u64 << (blocknr % 64));
        self.free += 1;
    }

    /// Hands out `count` free blocks, lowest index first. Either every block is
    /// marked used or, when not enough are free, the bitmap is left untouched.
    pub fn allocate(&mut self, count: usize) -> Option<Vec<BlockNumber>> {
        if count > self.free {
            return None;
        }
        let blocks: Vec<BlockNumber> = NextAvailableAllocation::new(self).take(count).collect();
        debug_assert_eq!(blocks.len(), count);
        for &blocknr in &blocks {
            self.set_reserved(blocknr);
        }
        Some(blocks)
    }

    /// Marks every block free. Releasing an already free block is a no-op and
    /// reserved blocks are never released.
    pub fn release(&mut self, blocks: &[BlockNumber]) {
        for &blocknr in blocks {
            if blocknr < self.reserved {
                warn!("refusing to release reserved block {}", blocknr);
                continue;
            }
            self.set_free(blocknr);
        }
    }
}

/// Implements a naive block allocation policy for new data block requirements. This policy will
/// retrieve the next available sequential block and on each call to the iterator will return the
/// next consecutive available blocks.
///
/// ## Other Pre-Allocation Policies
///
/// 1. Allocation that attempts to find enough contiguous available blocks so data can be allocated
///    close together (speed ups through sequential reads).
/// 2. Allocation that attempts to spread randomly over blocks to prevent wear of physical devices
///    in the front section (that may be rewritten many times before allocating to the back).
struct NextAvailableAllocation<'a> {
    /// Keeps track of the next starting place for looking for available blocks.
    marker: usize,
    bitmap: &'a Bitmap,
}

impl<'a> NextAvailableAllocation<'a> {
    fn new(bitmap: &'a Bitmap) -> Self {
        Self {
            marker: bitmap.reserved,
            bitmap,
        }
    }
}

impl<'a> Iterator for NextAvailableAllocation<'a> {
    type Item = BlockNumber;

    fn next(&mut self) -> Option<Self::Item> {
        while self.marker < self.bitmap.len {
            let i = self.marker;
            self.marker += 1;
            if let State::Free = self.bitmap.get(i) {
                return Some(i);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_blocks_start_used() {
        let bmp = Bitmap::new(10, 1);

        assert_eq!(bmp.get(0), State::Used);
        assert_eq!(bmp.get(1), State::Free);
        assert_eq!(bmp.free_count(), 9);
    }

    #[test]
    fn can_set_values_at_ends_of_bitmap() {
        let mut bmp = Bitmap::new(130, 0);

        bmp.set_reserved(0);
        bmp.set_reserved(129);

        assert_eq!(bmp.get(0), State::Used);
        assert_eq!(bmp.get(64), State::Free);
        assert_eq!(bmp.get(129), State::Used);
        assert_eq!(bmp.free_count(), 128);
    }

    #[test]
    fn can_toggle_block_between_free_and_used() {
        let mut bmp = Bitmap::new(16, 0);
        bmp.set_reserved(11);

        bmp.set_reserved(10);
        assert_eq!(bmp.get(10), State::Used);

        bmp.set_free(10);
        assert_eq!(bmp.get(10), State::Free);
        // Neighbouring bits survive the clear.
        assert_eq!(bmp.get(11), State::Used);
    }

    #[test]
    fn allocation_is_first_fit_from_first_unreserved_block() {
        let mut bmp = Bitmap::new(10, 1);

        assert_eq!(bmp.allocate(3), Some(vec![1, 2, 3]));
        bmp.release(&[2]);
        assert_eq!(bmp.allocate(2), Some(vec![2, 4]));
        assert_eq!(bmp.free_count(), 4);
    }

    #[test]
    fn failed_allocation_leaves_bitmap_untouched() {
        let mut bmp = Bitmap::new(10, 1);
        bmp.allocate(5).unwrap();
        let before = bmp.clone();

        assert_eq!(bmp.allocate(5), None);
        assert_eq!(bmp.serialize(), before.serialize());
        assert_eq!(bmp.free_count(), 4);
    }

    #[test]
    fn zero_block_allocation_succeeds_without_changes() {
        let mut bmp = Bitmap::new(4, 4);
        assert_eq!(bmp.allocate(0), Some(vec![]));
        assert_eq!(bmp.free_count(), 0);
    }

    #[test]
    fn release_is_idempotent_and_skips_reserved() {
        let mut bmp = Bitmap::new(8, 2);
        let blocks = bmp.allocate(2).unwrap();

        bmp.release(&blocks);
        bmp.release(&blocks);
        bmp.release(&[0, 1]);

        assert_eq!(bmp.free_count(), 6);
        assert_eq!(bmp.get(0), State::Used);
        assert_eq!(bmp.get(1), State::Used);
    }
}
