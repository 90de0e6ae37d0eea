/// Variable-length encoding of a fixed number of `u32` values.
///
/// The words form a single bit stream, read from the most significant
/// bit of the first word onward.  Each value is stored as a 5-bit
/// length `n - 1`, followed by the value itself in `n` bits.  Small
/// values therefore take as little as 6 bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedDwords {
    words: Vec<u32>,
}

const LENGTH_BITS: usize = 5;
const BITS_PER_WORD: usize = 32;

impl PackedDwords {
    pub fn new(words: Vec<u32>) -> Self {
        Self { words }
    }

    /// Decode from little-endian words.  Trailing bytes that do not
    /// form a full word are ignored.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let words = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Self { words }
    }

    pub fn push(&mut self, word: u32) {
        self.words.push(word);
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    fn total_bits(&self) -> usize {
        self.words.len() * BITS_PER_WORD
    }

    fn bit(&self, offset: usize) -> u32 {
        let word = self.words[offset / BITS_PER_WORD];
        let shift = BITS_PER_WORD - 1 - (offset % BITS_PER_WORD);
        (word >> shift) & 1
    }

    /// Read `length` bits starting at `offset`, most significant
    /// first.  Returns `None` if the range runs past the end.
    fn bits(&self, offset: usize, length: usize) -> Option<u32> {
        if offset + length > self.total_bits() {
            return None;
        }
        Some(
            (offset..offset + length)
                .fold(0u32, |value, i| (value << 1) | self.bit(i)),
        )
    }

    /// The value at `index`, if the stream holds that many values.
    pub fn get(&self, index: usize) -> Option<u32> {
        let mut offset = 0;
        for _ in 0..index {
            let length = self.bits(offset, LENGTH_BITS)? as usize + 1;
            offset += LENGTH_BITS + length;
        }
        let length = self.bits(offset, LENGTH_BITS)? as usize + 1;
        self.bits(offset + LENGTH_BITS, length)
    }

    /// Encode `values` using the minimum length for each.
    pub fn encode(values: &[u32]) -> Self {
        let mut bits: Vec<bool> = Vec::new();
        for &value in values {
            let length = (BITS_PER_WORD - value.leading_zeros() as usize).max(1);
            let prefix = (length - 1) as u32;
            bits.extend((0..LENGTH_BITS).rev().map(|i| (prefix >> i) & 1 == 1));
            bits.extend((0..length).rev().map(|i| (value >> i) & 1 == 1));
        }

        let words = bits
            .chunks(BITS_PER_WORD)
            .map(|chunk| {
                chunk
                    .iter()
                    .enumerate()
                    .filter(|(_, bit)| **bit)
                    .fold(0u32, |word, (i, _)| word | (1 << (BITS_PER_WORD - 1 - i)))
            })
            .collect();
        Self { words }
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|word| word.to_le_bytes()).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single_word_layout() {
        // Value 5 needs 3 bits: prefix 0b00010, then 0b101.
        let packed = PackedDwords::encode(&[5]);
        assert_eq!(packed.words(), &[0b00010_101 << 24]);
        assert_eq!(packed.get(0), Some(5));
        assert_eq!(packed.get(1), Some(0));
    }

    #[test]
    fn values_straddle_words() {
        let values = [3, 0, 0xffff_ffff, 70000, 1, 12, 0, 0, 0, 0, 9];
        let packed = PackedDwords::encode(&values);
        assert!(packed.words().len() > 2);

        for (i, value) in values.iter().enumerate() {
            assert_eq!(packed.get(i), Some(*value), "value {i}");
        }
    }

    #[test]
    fn truncated_stream() {
        let packed = PackedDwords::new(vec![0xffff_ffff]);
        assert_eq!(packed.get(0), None);
    }

    #[test]
    fn complete_after_push() {
        let full = PackedDwords::encode(&[3, 0, 0xffff_ffff, 9]);
        let mut partial = PackedDwords::new(Vec::new());
        for word in full.words() {
            assert_eq!(partial.get(3), None);
            partial.push(*word);
        }
        assert_eq!(partial.get(3), Some(9));
    }

    #[test]
    fn little_endian_words() {
        let packed = PackedDwords::encode(&[17, 4]);
        let decoded = PackedDwords::from_le_bytes(&packed.to_le_bytes());
        assert_eq!(decoded, packed);
    }
}
