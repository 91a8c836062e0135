macro_rules! div_round_up {
    ($n:expr, $d:expr) => {
        $n.div_ceil($d)
    };
}

/// Bitmap sized at runtime, one bit per device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageBitmap {
    words: Vec<u64>,
    len: u32,
}

impl UsageBitmap {
    /// Creates a bitmap of `len` bits, all cleared.
    pub fn new(len: u32) -> Self {
        Self {
            words: vec![0; div_round_up!(len, u64::BITS) as usize],
            len,
        }
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the bit of the `offset` position.
    /// None if `offset` is outside the bitmap.
    pub fn test(&self, offset: u32) -> Option<bool> {
        if offset >= self.len {
            return None;
        }
        let bit_mask = Self::bit_mask(offset);
        let row = self.words[(offset / u64::BITS) as usize];
        Some((row & bit_mask) == bit_mask)
    }

    /// Set the bit at the `offset` position to `val`,
    /// and return the value before it was set.
    /// None if `offset` is outside the bitmap, in which case nothing changes.
    pub fn test_and_set(&mut self, offset: u32, val: bool) -> Option<bool> {
        if offset >= self.len {
            return None;
        }
        let bit_mask = Self::bit_mask(offset);
        let idx = (offset / u64::BITS) as usize;
        let row = self.words[idx];
        self.words[idx] = if val { row | bit_mask } else { row & !bit_mask };
        Some((row & bit_mask) == bit_mask)
    }

    /// Offsets of all set bits, ascending.
    pub fn iter_ones(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len).filter(|&offset| self.test(offset) == Some(true))
    }

    #[inline(always)]
    fn bit_mask(offset: u32) -> u64 {
        (1 << (u64::BITS - 1)) >> (offset & (u64::BITS - 1))
    }
}

#[cfg(test)]
mod test {
    use similar_asserts::assert_eq;

    use super::UsageBitmap;

    #[test]
    fn bitmap_test() {
        let mut bitmap = UsageBitmap::new(128);
        assert_eq!(bitmap.test(1), Some(false));
        bitmap.test_and_set(1, true);
        assert_eq!(bitmap.test(1), Some(true));

        assert_eq!(bitmap.test(127), Some(false));
        bitmap.test_and_set(127, true);
        assert_eq!(bitmap.test(127), Some(true));
    }

    #[test]
    fn bitmap_test_and_set_across_words() {
        let mut bitmap = UsageBitmap::new(130);
        for offset in [0, 1, 63, 64, 65, 129] {
            assert_eq!(bitmap.test_and_set(offset, true), Some(false));
            assert_eq!(bitmap.test_and_set(offset, true), Some(true));
        }
        assert_eq!(
            bitmap.iter_ones().collect::<Vec<_>>(),
            vec![0, 1, 63, 64, 65, 129]
        );
    }

    #[test]
    fn bitmap_clear() {
        let mut bitmap = UsageBitmap::new(101);
        bitmap.test_and_set(0, true);
        bitmap.test_and_set(0, false);
        assert_eq!(bitmap.test_and_set(0, true), Some(false));

        bitmap.test_and_set(1, true);
        bitmap.test_and_set(2, true);
        bitmap.test_and_set(1, false);
        assert_eq!(bitmap.test(0), Some(true));
        assert_eq!(bitmap.test(1), Some(false));
        assert_eq!(bitmap.test(2), Some(true));

        bitmap.test_and_set(100, false);
        assert_eq!(bitmap.test_and_set(100, true), Some(false));
    }

    #[test]
    fn bitmap_out_of_range() {
        let mut bitmap = UsageBitmap::new(4);
        assert_eq!(bitmap.len(), 4);
        assert!(!bitmap.is_empty());
        assert_eq!(bitmap.test(4), None);
        assert_eq!(bitmap.test_and_set(4, true), None);
        // padding bits in the last word stay untouched
        assert_eq!(bitmap.test_and_set(63, true), None);
        assert_eq!(bitmap.iter_ones().count(), 0);
    }

    #[test]
    fn empty_bitmap() {
        let bitmap = UsageBitmap::new(0);
        assert!(bitmap.is_empty());
        assert_eq!(bitmap.len(), 0);
        assert_eq!(bitmap.test(0), None);
    }
}
