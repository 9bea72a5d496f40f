use num_bigint::{BigInt, BigUint};
use num_traits::Zero;

use crate::cell::util::get_bit;
use crate::cell::{ArcCell, Cell, CellError, OwnedCellSlice, MAX_CELL_BITS, MAX_CELL_REFS};

/// A write accumulator that finalizes into an immutable [`Cell`].
///
/// Unlike a finalized cell, a builder is a plain mutable value; the VM keeps
/// builders on the stack behind an `Arc` and forks them on write.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    references: Vec<ArcCell>,
    is_special: bool,
}

impl CellBuilder {
    pub fn new() -> CellBuilder {
        CellBuilder::default()
    }

    pub fn bits(&self) -> usize {
        self.bit_len
    }

    pub fn refs(&self) -> usize {
        self.references.len()
    }

    pub fn remaining_bits(&self) -> usize {
        MAX_CELL_BITS - self.bit_len
    }

    pub fn remaining_refs(&self) -> usize {
        MAX_CELL_REFS - self.references.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn references(&self) -> &[ArcCell] {
        &self.references
    }

    pub fn set_special(&mut self, val: bool) -> &mut Self {
        self.is_special = val;
        self
    }

    fn ensure_bits(&self, extra: usize) -> Result<(), CellError> {
        if self.bit_len + extra > MAX_CELL_BITS {
            return Err(CellError::builder_error(format!(
                "cell must contain at most {MAX_CELL_BITS} bits, asked for {}",
                self.bit_len + extra
            )));
        }
        Ok(())
    }

    pub fn store_bit(&mut self, val: bool) -> Result<&mut Self, CellError> {
        self.ensure_bits(1)?;
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if val {
            let idx = self.bit_len;
            self.data[idx / 8] |= 0x80 >> (idx % 8);
        }
        self.bit_len += 1;
        Ok(self)
    }

    /// Appends `bit_len` bits taken MSB-first from `src`, starting at
    /// `bit_offset` within `src`.
    pub fn store_bits_with_offset(
        &mut self,
        src: &[u8],
        bit_offset: usize,
        bit_len: usize,
    ) -> Result<&mut Self, CellError> {
        if bit_offset + bit_len > src.len() * 8 {
            return Err(CellError::builder_error(format!(
                "can't extract {} bits from {} bytes",
                bit_offset + bit_len,
                src.len()
            )));
        }
        self.ensure_bits(bit_len)?;
        for i in 0..bit_len {
            self.store_bit(get_bit(src, bit_offset + i))?;
        }
        Ok(self)
    }

    pub fn store_bits(&mut self, bit_len: usize, src: &[u8]) -> Result<&mut Self, CellError> {
        self.store_bits_with_offset(src, 0, bit_len)
    }

    pub fn store_u64(&mut self, bit_len: usize, val: u64) -> Result<&mut Self, CellError> {
        if bit_len > 64 {
            return Err(CellError::builder_error(format!(
                "store_u64 supports at most 64 bits, got {bit_len}"
            )));
        }
        if bit_len < 64 && val >> bit_len != 0 {
            return Err(CellError::builder_error(format!(
                "cannot write {val} in {bit_len} bits"
            )));
        }
        self.ensure_bits(bit_len)?;
        for i in (0..bit_len).rev() {
            self.store_bit(val >> i & 1 != 0)?;
        }
        Ok(self)
    }

    pub fn store_u8(&mut self, bit_len: usize, val: u8) -> Result<&mut Self, CellError> {
        self.store_u64(bit_len, val as u64)
    }

    pub fn store_u32(&mut self, bit_len: usize, val: u32) -> Result<&mut Self, CellError> {
        self.store_u64(bit_len, val as u64)
    }

    pub fn store_byte(&mut self, val: u8) -> Result<&mut Self, CellError> {
        self.store_u64(8, val as u64)
    }

    pub fn store_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, CellError> {
        self.ensure_bits(bytes.len() * 8)?;
        if self.bit_len % 8 == 0 {
            // Fast path, byte-aligned tail.
            self.data.extend_from_slice(bytes);
            self.bit_len += bytes.len() * 8;
            Ok(self)
        } else {
            self.store_bits(bytes.len() * 8, bytes)
        }
    }

    pub fn store_string(&mut self, val: &str) -> Result<&mut Self, CellError> {
        self.store_bytes(val.as_bytes())
    }

    pub fn store_uint(&mut self, bit_len: usize, val: &BigUint) -> Result<&mut Self, CellError> {
        let min_bits = val.bits() as usize;
        if min_bits > bit_len {
            return Err(CellError::builder_error(format!(
                "cannot write {val} in {bit_len} bits (requires at least {min_bits})"
            )));
        }
        self.ensure_bits(bit_len)?;
        for _ in 0..bit_len - min_bits {
            self.store_bit(false)?;
        }
        if min_bits > 0 {
            let bytes = val.to_bytes_be();
            self.store_bits_with_offset(&bytes, bytes.len() * 8 - min_bits, min_bits)?;
        }
        Ok(self)
    }

    /// Stores a signed two's-complement integer.
    pub fn store_int(&mut self, bit_len: usize, val: &BigInt) -> Result<&mut Self, CellError> {
        if bit_len == 0 {
            if val.is_zero() {
                return Ok(self);
            }
            return Err(CellError::builder_error(format!(
                "cannot write non-zero {val} as 0 bits"
            )));
        }
        let half = BigInt::from(1) << (bit_len - 1);
        if *val >= half || *val < -&half {
            return Err(CellError::builder_error(format!(
                "{val} does not fit in {bit_len} signed bits"
            )));
        }
        let stored = if val.sign() == num_bigint::Sign::Minus {
            val + (BigInt::from(1) << bit_len)
        } else {
            val.clone()
        };
        let unsigned = stored
            .to_biguint()
            .ok_or_else(|| CellError::InternalError("two's complement gone negative".to_owned()))?;
        self.store_uint(bit_len, &unsigned)
    }

    /// Variable-length "coins" encoding: a 4-bit byte count then the value.
    pub fn store_coins(&mut self, val: &BigUint) -> Result<&mut Self, CellError> {
        if val.is_zero() {
            self.store_u8(4, 0)
        } else {
            let num_bytes = (val.bits() as usize).div_ceil(8);
            self.store_u8(4, num_bytes as u8)?;
            self.store_uint(num_bytes * 8, val)
        }
    }

    pub fn store_reference(&mut self, cell: &ArcCell) -> Result<&mut Self, CellError> {
        if self.references.len() >= MAX_CELL_REFS {
            return Err(CellError::builder_error(format!(
                "cell already has {MAX_CELL_REFS} refs"
            )));
        }
        self.references.push(cell.clone());
        Ok(self)
    }

    pub fn store_references(&mut self, refs: &[ArcCell]) -> Result<&mut Self, CellError> {
        for r in refs {
            self.store_reference(r)?;
        }
        Ok(self)
    }

    pub fn store_child(&mut self, cell: Cell) -> Result<&mut Self, CellError> {
        self.store_reference(&cell.to_arc())
    }

    /// Appends the remaining data bits and refs of a slice.
    pub fn store_slice(&mut self, slice: &OwnedCellSlice) -> Result<&mut Self, CellError> {
        self.store_slice_data(slice)?;
        for i in 0..slice.remaining_refs() {
            self.store_reference(&slice.prefetch_ref_at(i)?)?;
        }
        Ok(self)
    }

    pub fn store_slice_data(&mut self, slice: &OwnedCellSlice) -> Result<&mut Self, CellError> {
        self.store_bits_with_offset(slice.cell().data(), slice.bit_pos(), slice.remaining_bits())
    }

    /// Appends the bits and refs accumulated in another builder.
    pub fn store_builder(&mut self, other: &CellBuilder) -> Result<&mut Self, CellError> {
        self.store_bits_with_offset(&other.data, 0, other.bit_len)?;
        self.store_references(&other.references)?;
        Ok(self)
    }

    pub fn build(&self) -> Result<Cell, CellError> {
        Cell::new(
            self.data.clone(),
            self.bit_len,
            self.references.clone(),
            self.is_special,
        )
    }
}

#[cfg(test)]
mod tests {
    use num_bigint::{BigInt, BigUint};

    use super::*;
    use crate::cell::CellError;

    #[test]
    fn store_bit_and_read_back() -> Result<(), CellError> {
        let mut builder = CellBuilder::new();
        let cell = builder.store_bit(true)?.store_bit(false)?.build()?;
        assert_eq!(cell.data(), [0b1000_0000]);
        assert_eq!(cell.bit_len(), 2);
        Ok(())
    }

    #[test]
    fn store_numbers_unaligned() -> Result<(), CellError> {
        let mut builder = CellBuilder::new();
        builder.store_bit(true)?;
        builder.store_u64(7, 0x2A)?;
        builder.store_u64(32, 0xFAD45AAD)?;
        let cell = builder.build()?;
        assert_eq!(cell.bit_len(), 40);
        let mut slice = OwnedCellSlice::new(cell.to_arc())?;
        assert!(slice.fetch_bit()?);
        assert_eq!(slice.fetch_u64(7)?, 0x2A);
        assert_eq!(slice.fetch_u64(32)?, 0xFAD45AAD);
        Ok(())
    }

    #[test]
    fn store_signed_ints() -> Result<(), CellError> {
        let mut builder = CellBuilder::new();
        builder.store_int(5, &BigInt::from(-5))?;
        builder.store_int(8, &BigInt::from(-1))?;
        let cell = builder.build()?;
        assert_eq!(cell.data()[0], 0b1101_1111);
        let mut slice = OwnedCellSlice::new(cell.to_arc())?;
        assert_eq!(slice.fetch_int(5)?, BigInt::from(-5));
        assert_eq!(slice.fetch_int(8)?, BigInt::from(-1));
        Ok(())
    }

    #[test]
    fn signed_range_is_checked() {
        let mut builder = CellBuilder::new();
        assert!(builder.store_int(8, &BigInt::from(128)).is_err());
        assert!(builder.store_int(8, &BigInt::from(-129)).is_err());
        assert!(builder.store_int(8, &BigInt::from(127)).is_ok());
        assert!(builder.store_int(8, &BigInt::from(-128)).is_ok());
    }

    #[test]
    fn bits_overflow() -> Result<(), CellError> {
        let mut builder = CellBuilder::new();
        builder.store_uint(1023, &BigUint::from(0u32))?;
        assert!(builder.store_bit(false).is_err());
        assert_eq!(builder.build()?.bit_len(), 1023);
        Ok(())
    }

    #[test]
    fn refs_overflow() -> Result<(), CellError> {
        let child = CellBuilder::new().build()?.to_arc();
        let mut builder = CellBuilder::new();
        for _ in 0..4 {
            builder.store_reference(&child)?;
        }
        assert!(builder.store_reference(&child).is_err());
        Ok(())
    }

    #[test]
    fn store_coins_round_trip() -> Result<(), CellError> {
        let mut builder = CellBuilder::new();
        builder.store_coins(&BigUint::from(1_000_000_000u64))?;
        builder.store_coins(&BigUint::from(0u32))?;
        let cell = builder.build()?;
        let mut slice = OwnedCellSlice::new(cell.to_arc())?;
        assert_eq!(slice.fetch_coins()?, BigUint::from(1_000_000_000u64));
        assert_eq!(slice.fetch_coins()?, BigUint::from(0u32));
        Ok(())
    }
}
