use num_bigint::{BigInt, BigUint};

use crate::cell::util::{get_bit, read_bigint, read_biguint, read_bits, read_u64};
use crate::cell::{ArcCell, CellBuilder, CellError};
use crate::types::TonHash;

/// A read cursor over a cell: a bit window and a ref window that only ever
/// shrink from the front.
///
/// `fetch_*` advances the cursor, `prefetch_*` does not.
#[derive(Clone, Debug)]
pub struct OwnedCellSlice {
    cell: ArcCell,
    bit_start: usize,
    bit_end: usize,
    ref_start: usize,
    ref_end: usize,
}

impl OwnedCellSlice {
    pub fn new(cell: ArcCell) -> Result<Self, CellError> {
        if cell.is_special() {
            return Err(CellError::InvalidSpecialCell(
                "cannot take a slice of a special cell".to_owned(),
            ));
        }
        Ok(Self::new_allow_special(cell))
    }

    pub fn new_allow_special(cell: ArcCell) -> Self {
        let bit_end = cell.bit_len();
        let ref_end = cell.references().len();
        Self {
            cell,
            bit_start: 0,
            bit_end,
            ref_start: 0,
            ref_end,
        }
    }

    pub fn cell(&self) -> &ArcCell {
        &self.cell
    }

    pub(crate) fn bit_pos(&self) -> usize {
        self.bit_start
    }

    pub fn remaining_bits(&self) -> usize {
        self.bit_end - self.bit_start
    }

    pub fn remaining_refs(&self) -> usize {
        self.ref_end - self.ref_start
    }

    pub fn is_data_empty(&self) -> bool {
        self.remaining_bits() == 0
    }

    pub fn is_empty(&self) -> bool {
        self.is_data_empty() && self.remaining_refs() == 0
    }

    fn ensure_bits(&self, requested: usize) -> Result<(), CellError> {
        if requested > self.remaining_bits() {
            return Err(CellError::Underflow {
                requested,
                remaining: self.remaining_bits(),
            });
        }
        Ok(())
    }

    fn ensure_refs(&self, requested: usize) -> Result<(), CellError> {
        if requested > self.remaining_refs() {
            return Err(CellError::Underflow {
                requested,
                remaining: self.remaining_refs(),
            });
        }
        Ok(())
    }

    pub fn fetch_bit(&mut self) -> Result<bool, CellError> {
        let bit = self.prefetch_bit()?;
        self.bit_start += 1;
        Ok(bit)
    }

    pub fn prefetch_bit(&self) -> Result<bool, CellError> {
        self.ensure_bits(1)?;
        Ok(get_bit(self.cell.data(), self.bit_start))
    }

    pub fn fetch_u64(&mut self, bit_len: usize) -> Result<u64, CellError> {
        let val = self.prefetch_u64(bit_len)?;
        self.bit_start += bit_len;
        Ok(val)
    }

    pub fn prefetch_u64(&self, bit_len: usize) -> Result<u64, CellError> {
        debug_assert!(bit_len <= 64);
        self.ensure_bits(bit_len)?;
        Ok(read_u64(self.cell.data(), self.bit_start, bit_len))
    }

    /// Reads up to `bit_len` bits, zero-padding past the end of the slice;
    /// used to peek opcode words.
    pub fn prefetch_u64_padded(&self, bit_len: usize) -> u64 {
        let avail = bit_len.min(self.remaining_bits());
        read_u64(self.cell.data(), self.bit_start, avail) << (bit_len - avail)
    }

    pub fn fetch_uint(&mut self, bit_len: usize) -> Result<BigUint, CellError> {
        let val = self.prefetch_uint(bit_len)?;
        self.bit_start += bit_len;
        Ok(val)
    }

    pub fn prefetch_uint(&self, bit_len: usize) -> Result<BigUint, CellError> {
        self.ensure_bits(bit_len)?;
        Ok(read_biguint(self.cell.data(), self.bit_start, bit_len))
    }

    pub fn fetch_int(&mut self, bit_len: usize) -> Result<BigInt, CellError> {
        let val = self.prefetch_int(bit_len)?;
        self.bit_start += bit_len;
        Ok(val)
    }

    pub fn prefetch_int(&self, bit_len: usize) -> Result<BigInt, CellError> {
        self.ensure_bits(bit_len)?;
        Ok(read_bigint(self.cell.data(), self.bit_start, bit_len))
    }

    /// Fetches `bit_len` bits into a left-aligned byte buffer.
    pub fn fetch_bits(&mut self, bit_len: usize) -> Result<Vec<u8>, CellError> {
        self.ensure_bits(bit_len)?;
        let out = read_bits(self.cell.data(), self.bit_start, bit_len);
        self.bit_start += bit_len;
        Ok(out)
    }

    pub fn prefetch_bits(&self, bit_len: usize) -> Result<Vec<u8>, CellError> {
        self.ensure_bits(bit_len)?;
        Ok(read_bits(self.cell.data(), self.bit_start, bit_len))
    }

    pub fn fetch_bytes(&mut self, len: usize) -> Result<Vec<u8>, CellError> {
        self.fetch_bits(len * 8)
    }

    /// Variable-length "coins" value: 4-bit byte count then the integer.
    pub fn fetch_coins(&mut self) -> Result<BigUint, CellError> {
        let num_bytes = self.fetch_u64(4)? as usize;
        self.fetch_uint(num_bytes * 8)
    }

    pub fn fetch_ref(&mut self) -> Result<ArcCell, CellError> {
        let cell = self.prefetch_ref()?;
        self.ref_start += 1;
        Ok(cell)
    }

    pub fn prefetch_ref(&self) -> Result<ArcCell, CellError> {
        self.prefetch_ref_at(0)
    }

    pub fn prefetch_ref_at(&self, idx: usize) -> Result<ArcCell, CellError> {
        self.ensure_refs(idx + 1)?;
        Ok(self.cell.references()[self.ref_start + idx].clone())
    }

    pub fn skip_bits(&mut self, bit_len: usize) -> Result<&mut Self, CellError> {
        self.ensure_bits(bit_len)?;
        self.bit_start += bit_len;
        Ok(self)
    }

    pub fn skip_refs(&mut self, refs: usize) -> Result<&mut Self, CellError> {
        self.ensure_refs(refs)?;
        self.ref_start += refs;
        Ok(self)
    }

    /// Splits off the first `bit_len` bits and `refs` refs as a new slice.
    pub fn fetch_subslice(&mut self, bit_len: usize, refs: usize) -> Result<Self, CellError> {
        self.ensure_bits(bit_len)?;
        self.ensure_refs(refs)?;
        let sub = Self {
            cell: self.cell.clone(),
            bit_start: self.bit_start,
            bit_end: self.bit_start + bit_len,
            ref_start: self.ref_start,
            ref_end: self.ref_start + refs,
        };
        self.bit_start += bit_len;
        self.ref_start += refs;
        Ok(sub)
    }

    pub fn prefetch_subslice(&self, bit_len: usize, refs: usize) -> Result<Self, CellError> {
        self.ensure_bits(bit_len)?;
        self.ensure_refs(refs)?;
        Ok(Self {
            cell: self.cell.clone(),
            bit_start: self.bit_start,
            bit_end: self.bit_start + bit_len,
            ref_start: self.ref_start,
            ref_end: self.ref_start + refs,
        })
    }

    /// Restricts this slice to its first `bit_len` bits and `refs` refs.
    pub fn only_first(&mut self, bit_len: usize, refs: usize) -> Result<&mut Self, CellError> {
        self.ensure_bits(bit_len)?;
        self.ensure_refs(refs)?;
        self.bit_end = self.bit_start + bit_len;
        self.ref_end = self.ref_start + refs;
        Ok(self)
    }

    /// Drops everything but the last `bit_len` bits and `refs` refs.
    pub fn only_last(&mut self, bit_len: usize, refs: usize) -> Result<&mut Self, CellError> {
        self.ensure_bits(bit_len)?;
        self.ensure_refs(refs)?;
        self.bit_start = self.bit_end - bit_len;
        self.ref_start = self.ref_end - refs;
        Ok(self)
    }

    /// True if the remaining data of `self` starts with all of `prefix`.
    pub fn starts_with(&self, prefix: &OwnedCellSlice) -> bool {
        let n = prefix.remaining_bits();
        if n > self.remaining_bits() {
            return false;
        }
        (0..n).all(|i| {
            get_bit(self.cell.data(), self.bit_start + i)
                == get_bit(prefix.cell.data(), prefix.bit_start + i)
        })
    }

    /// Length of the longest common prefix of the remaining data.
    pub fn common_prefix_len(&self, other: &OwnedCellSlice) -> usize {
        let n = self.remaining_bits().min(other.remaining_bits());
        (0..n)
            .take_while(|&i| {
                get_bit(self.cell.data(), self.bit_start + i)
                    == get_bit(other.cell.data(), other.bit_start + i)
            })
            .count()
    }

    pub fn content_eq(&self, other: &OwnedCellSlice) -> Result<bool, CellError> {
        if self.remaining_bits() != other.remaining_bits()
            || self.remaining_refs() != other.remaining_refs()
        {
            return Ok(false);
        }
        if !self.starts_with(other) {
            return Ok(false);
        }
        for i in 0..self.remaining_refs() {
            if self.prefetch_ref_at(i)?.repr_hash() != other.prefetch_ref_at(i)?.repr_hash() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Packs the remainder of the slice back into an ordinary cell.
    pub fn to_cell(&self) -> Result<ArcCell, CellError> {
        let mut builder = CellBuilder::new();
        builder.store_slice(self)?;
        Ok(builder.build()?.to_arc())
    }

    /// Representation hash of the remainder, as if packed into a cell.
    pub fn slice_hash(&self) -> Result<TonHash, CellError> {
        Ok(self.to_cell()?.repr_hash())
    }
}

impl std::fmt::Display for OwnedCellSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bits = self.remaining_bits();
        let data = read_bits(self.cell.data(), self.bit_start, bits);
        let mut hex = String::new();
        for chunk in 0..bits / 4 {
            let nibble = read_u64(&data, chunk * 4, 4);
            hex.push(char::from_digit(nibble as u32, 16).unwrap_or('?').to_ascii_uppercase());
        }
        if bits % 4 != 0 {
            let tail = read_u64(&data, bits / 4 * 4, bits % 4);
            let completed = (tail << 1 | 1) << (3 - bits % 4);
            hex.push(char::from_digit(completed as u32, 16).unwrap_or('?').to_ascii_uppercase());
            hex.push('_');
        }
        write!(f, "x{{{hex}}}")
    }
}

#[cfg(test)]
mod tests {
    use num_bigint::BigInt;

    use super::*;
    use crate::cell::CellBuilder;

    fn slice_of(f: impl FnOnce(&mut CellBuilder)) -> OwnedCellSlice {
        let mut builder = CellBuilder::new();
        f(&mut builder);
        OwnedCellSlice::new(builder.build().unwrap().to_arc()).unwrap()
    }

    #[test]
    fn int_round_trip_at_width() -> Result<(), CellError> {
        for bits in [1usize, 7, 8, 64, 100, 257] {
            for val in [-1i64, 0, 1, -37, 42] {
                let big = BigInt::from(val);
                let half = BigInt::from(1) << (bits - 1);
                if big >= half || big < -&half {
                    continue;
                }
                let mut builder = CellBuilder::new();
                builder.store_int(bits, &big)?;
                let mut slice = OwnedCellSlice::new(builder.build()?.to_arc())?;
                assert_eq!(slice.fetch_int(bits)?, big, "width {bits} value {val}");
            }
        }
        Ok(())
    }

    #[test]
    fn underflow_is_reported() {
        let mut slice = slice_of(|b| {
            b.store_u64(8, 0xAB).unwrap();
        });
        assert_eq!(slice.fetch_u64(8).unwrap(), 0xAB);
        assert!(matches!(
            slice.fetch_bit(),
            Err(CellError::Underflow { .. })
        ));
    }

    #[test]
    fn subslice_and_prefix() -> Result<(), CellError> {
        let mut slice = slice_of(|b| {
            b.store_u64(16, 0b1010_1010_1111_0000).unwrap();
        });
        let head = slice.fetch_subslice(8, 0)?;
        assert_eq!(head.remaining_bits(), 8);
        assert_eq!(head.prefetch_u64(8)?, 0b1010_1010);
        assert_eq!(slice.remaining_bits(), 8);
        assert_eq!(slice.prefetch_u64(8)?, 0b1111_0000);
        Ok(())
    }

    #[test]
    fn padded_peek() {
        let slice = slice_of(|b| {
            b.store_u64(8, 0xA0).unwrap();
        });
        assert_eq!(slice.prefetch_u64_padded(24), 0xA0_00_00);
    }

    #[test]
    fn display_completion_tag() {
        let slice = slice_of(|b| {
            b.store_u64(4, 0x7).unwrap();
            b.store_bit(true).unwrap();
        });
        assert_eq!(slice.to_string(), "x{7C_}");
    }
}
