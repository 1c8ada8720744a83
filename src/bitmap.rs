//! Defines the [`Bitmap`] struct used to track block occupancy inside a page.

const WORD_BITS: usize = u64::BITS as usize;

pub const BITMAP_WORDS: usize = 8;
pub const BITMAP_BITS: usize = BITMAP_WORDS * WORD_BITS;

/// A fixed-width occupancy map, one bit per block, where a set bit means occupied.
///
/// The width is sized for the smallest size class. Pages of larger classes hold
/// fewer blocks, the bits past their capacity are called padding and are set
/// when the bitmap is created so that they always read as occupied.
/// Nothing but [`Bitmap::new`] ever writes padding bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct Bitmap {
    words: [u64; BITMAP_WORDS],
}

impl Bitmap {
    /// Creates a bitmap for a page holding `capacity` blocks, all of them free.
    ///
    /// # Panics
    /// Panics if `capacity` exceeds [`BITMAP_BITS`].
    pub const fn new(capacity: usize) -> Self {
        assert!(capacity <= BITMAP_BITS, "capacity exceeds bitmap width");
        let mut words = [u64::MAX; BITMAP_WORDS];
        let mut i = 0;
        while i < BITMAP_WORDS {
            let start = i * WORD_BITS;
            if capacity >= start + WORD_BITS {
                words[i] = 0;
            } else if capacity > start {
                words[i] = u64::MAX << (capacity - start);
            }
            i += 1;
        }
        Bitmap { words }
    }

    #[inline(always)]
    fn locate(index: usize) -> (usize, u64) {
        debug_assert!(index < BITMAP_BITS);
        (index / WORD_BITS, 1 << (index % WORD_BITS))
    }

    /// Mask of the real (non-padding) bits of word `word` for a page with `capacity` blocks.
    #[inline(always)]
    fn real_mask(word: usize, capacity: usize) -> u64 {
        let start = word * WORD_BITS;
        if capacity >= start + WORD_BITS {
            u64::MAX
        } else {
            (1 << (capacity - start)) - 1
        }
    }

    /// Flips the occupancy of block `index`.
    /// The same call marks a block occupied and marks it free again.
    #[inline]
    pub fn toggle(&mut self, index: usize) {
        let (word, mask) = Self::locate(index);
        self.words[word] ^= mask;
    }

    #[inline]
    pub fn is_set(&self, index: usize) -> bool {
        let (word, mask) = Self::locate(index);
        self.words[word] & mask != 0
    }

    /// Returns whether no block is free.
    #[inline]
    pub fn is_fully_occupied(&self) -> bool {
        self.words.iter().all(|&w| w == u64::MAX)
    }

    /// Returns the index of the lowest free block among the first `capacity` blocks.
    ///
    /// Words with every bit set are skipped whole.
    pub fn first_free(&self, capacity: usize) -> Option<usize> {
        let words = capacity.div_ceil(WORD_BITS);
        for (i, &word) in self.words[..words].iter().enumerate() {
            if word == u64::MAX {
                continue;
            }
            let index = i * WORD_BITS + word.trailing_ones() as usize;
            return (index < capacity).then_some(index);
        }
        None
    }

    /// Returns whether all of the first `capacity` blocks are free.
    pub fn is_clear(&self, capacity: usize) -> bool {
        let words = capacity.div_ceil(WORD_BITS);
        self.words[..words]
            .iter()
            .enumerate()
            .all(|(i, &w)| w & Self::real_mask(i, capacity) == 0)
    }

    /// Returns the number of occupied blocks among the first `capacity` blocks.
    pub fn occupied(&self, capacity: usize) -> usize {
        let words = capacity.div_ceil(WORD_BITS);
        self.words[..words]
            .iter()
            .enumerate()
            .map(|(i, &w)| (w & Self::real_mask(i, capacity)).count_ones() as usize)
            .sum()
    }
}
