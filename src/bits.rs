//! Bitset buffers for structural dependency propagation.
//!
//! A [`BitBuffer`] holds one [`Bvec`] word per nonzero slot of a node. Each
//! bit of a word is an independent seeding direction, so one sweep propagates
//! up to [`BVEC_BITS`] dependency patterns at once. These buffers are only
//! used by the sparsity passes and never alias numeric buffers.

/// Dependency word: bit `b` set means "may depend on seed direction `b`".
pub type Bvec = u64;

/// Number of directions carried by one [`Bvec`].
pub const BVEC_BITS: usize = Bvec::BITS as usize;

/// One dependency word per nonzero slot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BitBuffer {
    words: Vec<Bvec>,
}

impl BitBuffer {
    /// All-clear buffer with `len` slots.
    pub fn zeros(len: usize) -> Self {
        BitBuffer {
            words: vec![0; len],
        }
    }

    pub fn from_words(words: Vec<Bvec>) -> Self {
        BitBuffer { words }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    #[inline]
    pub fn get(&self, k: usize) -> Bvec {
        self.words[k]
    }

    #[inline]
    pub fn set(&mut self, k: usize, w: Bvec) {
        self.words[k] = w;
    }

    /// `self[k] |= w`.
    #[inline]
    pub fn or(&mut self, k: usize, w: Bvec) {
        self.words[k] |= w;
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// True if any slot has any bit set.
    pub fn any(&self) -> bool {
        self.words.iter().any(|&w| w != 0)
    }

    #[inline]
    pub fn as_slice(&self) -> &[Bvec] {
        &self.words
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [Bvec] {
        &mut self.words
    }

    pub fn into_words(self) -> Vec<Bvec> {
        self.words
    }
}

impl From<Vec<Bvec>> for BitBuffer {
    fn from(words: Vec<Bvec>) -> Self {
        BitBuffer { words }
    }
}
