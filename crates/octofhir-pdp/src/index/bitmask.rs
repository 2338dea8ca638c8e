//! Fixed-width bit set over conjunction and formula indices.

/// A fixed-width set of small integers backed by 64-bit words.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bitmask {
    words: Vec<u64>,
    len: usize,
}

const WORD: usize = u64::BITS as usize;

impl Bitmask {
    /// An empty mask able to hold indices `0..len`.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(WORD)],
            len,
        }
    }

    /// A mask with every index in `0..len` set.
    pub fn full(len: usize) -> Self {
        let mut mask = Self::new(len);
        for index in 0..len {
            mask.set(index);
        }
        mask
    }

    pub fn set(&mut self, index: usize) {
        self.words[index / WORD] |= 1u64 << (index % WORD);
    }

    pub fn clear(&mut self, index: usize) {
        self.words[index / WORD] &= !(1u64 << (index % WORD));
    }

    pub fn get(&self, index: usize) -> bool {
        index < self.len && self.words[index / WORD] & (1u64 << (index % WORD)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// `self &= !other`
    pub fn and_not(&mut self, other: &Bitmask) {
        for (word, mask) in self.words.iter_mut().zip(&other.words) {
            *word &= !mask;
        }
    }

    pub fn intersects(&self, other: &Bitmask) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .any(|(a, b)| a & b != 0)
    }

    /// Indices of set bits, ascending.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, word)| {
            let mut bits = *word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(w * WORD + bit)
            })
        })
    }
}
