// Bit arrays for block and inode allocation state
// Bit n lives in byte n / 8 at position n % 8, the ext2 on-disk order

/// Fixed-length bit array, either built in memory or decoded from disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    data: Vec<u8>,
    size_bits: usize,
}

impl Bitmap {
    /// Create a cleared bitmap with the specified number of bits
    pub fn new(size_bits: usize) -> Self {
        Self {
            data: vec![0u8; size_bits.div_ceil(8)],
            size_bits,
        }
    }

    /// Interpret on-disk bytes as a bitmap of `size_bits` bits.
    ///
    /// Missing trailing bytes read as clear bits.
    pub fn from_bytes(bytes: &[u8], size_bits: usize) -> Self {
        let mut bitmap = Self::new(size_bits);
        let len = bitmap.data.len().min(bytes.len());
        bitmap.data[..len].copy_from_slice(&bytes[..len]);
        bitmap
    }

    pub fn len(&self) -> usize {
        self.size_bits
    }

    pub fn is_empty(&self) -> bool {
        self.size_bits == 0
    }

    /// Set a bit (mark as used); out-of-range indices are ignored
    pub fn set(&mut self, index: usize) {
        if index >= self.size_bits {
            return;
        }
        self.data[index / 8] |= 1 << (index % 8);
    }

    /// Check if a bit is set; out-of-range indices read as clear
    pub fn is_set(&self, index: usize) -> bool {
        if index >= self.size_bits {
            return false;
        }
        (self.data[index / 8] & (1 << (index % 8))) != 0
    }

    /// Set a range of bits
    pub fn set_range(&mut self, start: usize, count: usize) {
        for i in start..start.saturating_add(count).min(self.size_bits) {
            self.set(i);
        }
    }

    pub fn count_set(&self) -> usize {
        (0..self.size_bits).filter(|&i| self.is_set(i)).count()
    }

    pub fn count_free(&self) -> usize {
        self.size_bits - self.count_set()
    }
}
