//! Validity bitmap for columnar data.
//!
//! Each bit represents one row: 1 = valid, 0 = null. Stored as `u64` words
//! so the same layout can be copied to device memory unchanged.

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bitmap {
    /// Bit `i` of word `i / 64` is the validity of row `i`.
    words: Vec<u64>,
    len: usize,
}

impl Bitmap {
    /// All rows valid.
    pub fn new_valid(len: usize) -> Self {
        let mut words = vec![u64::MAX; len.div_ceil(64)];
        if len % 64 != 0 {
            if let Some(last) = words.last_mut() {
                *last = (1u64 << (len % 64)) - 1;
            }
        }
        Self { words, len }
    }

    /// All rows null.
    pub fn new_null(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(64)],
            len,
        }
    }

    pub fn from_bools(valid: impl IntoIterator<Item = bool>) -> Self {
        let mut bitmap = Self::new_null(0);
        for v in valid {
            bitmap.push(v);
        }
        bitmap
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Panics
    /// Panics if `row >= len`.
    pub fn is_valid(&self, row: usize) -> bool {
        assert!(row < self.len, "row {} out of bounds ({})", row, self.len);
        (self.words[row / 64] >> (row % 64)) & 1 == 1
    }

    /// # Panics
    /// Panics if `row >= len`.
    pub fn set(&mut self, row: usize, valid: bool) {
        assert!(row < self.len, "row {} out of bounds ({})", row, self.len);
        let mask = 1u64 << (row % 64);
        if valid {
            self.words[row / 64] |= mask;
        } else {
            self.words[row / 64] &= !mask;
        }
    }

    pub fn push(&mut self, valid: bool) {
        if self.len % 64 == 0 {
            self.words.push(0);
        }
        self.len += 1;
        self.set(self.len - 1, valid);
    }

    pub fn null_count(&self) -> usize {
        self.len - self.words.iter().map(|w| w.count_ones() as usize).sum::<usize>()
    }

    pub fn all_valid(&self) -> bool {
        self.null_count() == 0
    }

    /// Row-wise AND of two validity masks.
    pub fn and(&self, other: &Bitmap) -> Bitmap {
        debug_assert_eq!(self.len, other.len);
        Bitmap {
            words: self
                .words
                .iter()
                .zip(&other.words)
                .map(|(a, b)| a & b)
                .collect(),
            len: self.len,
        }
    }

    pub fn slice(&self, offset: usize, len: usize) -> Bitmap {
        Bitmap::from_bools((offset..offset + len).map(|i| self.is_valid(i)))
    }

    pub fn extend_from(&mut self, other: &Bitmap) {
        for i in 0..other.len {
            self.push(other.is_valid(i));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|i| self.is_valid(i))
    }

    pub fn as_words(&self) -> &[u64] {
        &self.words
    }
}

/// Combine optional validity masks; `None` means all rows valid.
pub fn combine_validity(a: Option<&Bitmap>, b: Option<&Bitmap>) -> Option<Bitmap> {
    match (a, b) {
        (None, None) => None,
        (Some(a), None) => Some(a.clone()),
        (None, Some(b)) => Some(b.clone()),
        (Some(a), Some(b)) => Some(a.and(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_valid_has_no_nulls() {
        let bm = Bitmap::new_valid(100);
        assert_eq!(bm.len(), 100);
        assert_eq!(bm.null_count(), 0);
        assert!((0..100).all(|i| bm.is_valid(i)));
    }

    #[test]
    fn set_across_word_boundary() {
        let mut bm = Bitmap::new_valid(130);
        bm.set(0, false);
        bm.set(63, false);
        bm.set(64, false);
        bm.set(129, false);
        assert_eq!(bm.null_count(), 4);
        assert!(bm.is_valid(1));
        assert!(!bm.is_valid(64));
        bm.set(64, true);
        assert_eq!(bm.null_count(), 3);
    }

    #[test]
    fn push_and_slice() {
        let bm = Bitmap::from_bools([true, false, true, true, false]);
        assert_eq!(bm.null_count(), 2);
        let s = bm.slice(1, 3);
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![false, true, true]);
    }

    #[test]
    fn and_combines() {
        let a = Bitmap::from_bools([true, true, false]);
        let b = Bitmap::from_bools([true, false, true]);
        assert_eq!(a.and(&b).iter().collect::<Vec<_>>(), vec![true, false, false]);
        assert!(combine_validity(None, None).is_none());
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn out_of_bounds_panics() {
        Bitmap::new_valid(10).is_valid(10);
    }

    #[test]
    fn empty_bitmap() {
        let bm = Bitmap::new_null(0);
        assert!(bm.is_empty());
        assert_eq!(bm.null_count(), 0);
        assert!(bm.as_words().is_empty());
    }
}
