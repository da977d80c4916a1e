//! Fixed-capacity bit buffer used to stage a single scan.

use bitvec::prelude::*;

/// Eight bytes of scan data, addressed bit by bit.
///
/// Bit 0 of byte 0 is the first bit on the wire, matching the order in which
/// the shift engine consumes TMS/TDI and produces TDO.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BitScratch {
    bits: BitArray<[u8; 8], Lsb0>,
}

impl BitScratch {
    /// Number of bits a single scan may occupy.
    pub const BITS: usize = 64;

    /// An all-zero buffer.
    pub fn new() -> Self {
        Self::from_bytes([0; 8])
    }

    /// Wrap bytes received from (or destined for) the wire.
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self {
            bits: BitArray::new(bytes),
        }
    }

    /// Set or clear a single bit.
    ///
    /// Panics if `index` is outside the buffer.
    pub fn set_bit(&mut self, index: usize, high: bool) {
        self.bits.set(index, high);
    }

    /// Read a single bit.
    pub fn get_bit(&self, index: usize) -> bool {
        self.bits[index]
    }

    /// Store the low `count` bits of `value` starting at bit `offset`.
    ///
    /// Panics if the field does not fit in the buffer.
    pub fn set_bits(&mut self, offset: usize, count: usize, value: u64) {
        assert!(offset + count <= Self::BITS, "scan exceeds scratch capacity");
        if count == 0 {
            return;
        }
        self.bits[offset..][..count].store_le(value);
    }

    /// Read `count` bits starting at bit `offset`.
    pub fn get_bits(&self, offset: usize, count: usize) -> u64 {
        assert!(offset + count <= Self::BITS, "scan exceeds scratch capacity");
        if count == 0 {
            return 0;
        }
        self.bits[offset..][..count].load_le()
    }

    /// Set `count` consecutive bits starting at `offset`.
    pub fn fill_ones(&mut self, offset: usize, count: usize) {
        assert!(offset + count <= Self::BITS, "scan exceeds scratch capacity");
        self.bits[offset..][..count].fill(true);
    }

    /// Little-endian byte view, in wire order.
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.bits.data
    }

    /// Mutable byte view, used as the TDO destination of a shift.
    pub fn as_bytes_mut(&mut self) -> &mut [u8; 8] {
        &mut self.bits.data
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for BitScratch {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "BitScratch({=[u8]:x})", &self.as_bytes()[..])
    }
}
