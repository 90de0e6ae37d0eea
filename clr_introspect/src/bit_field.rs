/// A run of bits within an integer word, counted from the least
/// significant bit.
///
/// Runtime records pack several values into each 32-bit word.  Each
/// packed value is documented as a `BitField` constant next to the
/// record it belongs to, so that the encoding can be tested without
/// any memory layout involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitField {
    pub shift: u32,
    pub width: u32,
}

impl BitField {
    pub const fn new(shift: u32, width: u32) -> Self {
        assert!(width > 0 && shift + width <= 64);
        Self { shift, width }
    }

    /// A single-bit flag.
    pub const fn flag(bit: u32) -> Self {
        Self::new(bit, 1)
    }

    /// Bits of the value, before shifting into position.
    pub const fn value_mask(&self) -> u64 {
        if self.width == 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }

    /// Bits occupied by the field within the word.
    pub const fn mask(&self) -> u64 {
        self.value_mask() << self.shift
    }

    /// Largest value the field can hold.
    pub const fn max_value(&self) -> u64 {
        self.value_mask()
    }

    pub const fn decode(&self, raw: u64) -> u64 {
        (raw >> self.shift) & self.value_mask()
    }

    pub const fn is_set(&self, raw: u64) -> bool {
        self.decode(raw) != 0
    }

    /// Replace the field within `raw`, leaving all other bits
    /// unchanged.  Bits of `value` that do not fit are discarded.
    pub const fn encode(&self, raw: u64, value: u64) -> u64 {
        (raw & !self.mask()) | ((value & self.value_mask()) << self.shift)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const OFFSET: BitField = BitField::new(0, 27);
    const ELEMENT_TYPE: BitField = BitField::new(27, 5);

    #[test]
    fn decode_adjacent_fields() {
        let raw = (0x12u64 << 27) | 0x0001_2345;
        assert_eq!(OFFSET.decode(raw), 0x0001_2345);
        assert_eq!(ELEMENT_TYPE.decode(raw), 0x12);
    }

    #[test]
    fn encode_leaves_other_bits() {
        let raw = ELEMENT_TYPE.encode(0, 0x11);
        let raw = OFFSET.encode(raw, 0x40);
        assert_eq!(ELEMENT_TYPE.decode(raw), 0x11);
        assert_eq!(OFFSET.decode(raw), 0x40);

        let raw = OFFSET.encode(raw, u64::MAX);
        assert_eq!(OFFSET.decode(raw), OFFSET.max_value());
        assert_eq!(ELEMENT_TYPE.decode(raw), 0x11);
    }

    #[test]
    fn flags() {
        let flag = BitField::flag(31);
        assert_eq!(flag.mask(), 0x8000_0000);
        assert!(flag.is_set(0x8000_0000));
        assert!(!flag.is_set(0x7fff_ffff));
    }
}
