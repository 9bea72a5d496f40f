use std::io::Cursor;

use bitstream_io::{BigEndian, BitRead, BitReader, Numeric};
use num_bigint::BigUint;

use crate::cell::{ArcCell, CellError, MapCellError};

/// A borrowing bit reader over a cell's data, used by the BoC codecs.
///
/// The VM works with [`crate::cell::OwnedCellSlice`] instead; this reader
/// exists for byte-stream style deserialization.
pub struct CellParser<'a> {
    bit_len: usize,
    bit_reader: BitReader<Cursor<&'a [u8]>, BigEndian>,
    references: &'a [ArcCell],
    next_ref: usize,
}

impl<'a> CellParser<'a> {
    pub fn new(bit_len: usize, data: &'a [u8], references: &'a [ArcCell]) -> Self {
        CellParser {
            bit_len,
            bit_reader: BitReader::endian(Cursor::new(data), BigEndian),
            references,
            next_ref: 0,
        }
    }

    pub fn remaining_bits(&mut self) -> usize {
        let pos = self.bit_reader.position_in_bits().unwrap_or_default() as usize;
        self.bit_len.saturating_sub(pos)
    }

    pub fn remaining_bytes(&mut self) -> usize {
        self.remaining_bits() / 8
    }

    pub fn remaining_refs(&self) -> usize {
        self.references.len() - self.next_ref
    }

    fn ensure_enough_bits(&mut self, requested: usize) -> Result<(), CellError> {
        let remaining = self.remaining_bits();
        if requested > remaining {
            return Err(CellError::Underflow {
                requested,
                remaining,
            });
        }
        Ok(())
    }

    pub fn load_bit(&mut self) -> Result<bool, CellError> {
        self.ensure_enough_bits(1)?;
        self.bit_reader.read_bit().map_parser_error()
    }

    pub fn load_number<N: Numeric>(&mut self, bit_len: usize) -> Result<N, CellError> {
        self.ensure_enough_bits(bit_len)?;
        self.bit_reader
            .read::<N>(bit_len as u32)
            .map_parser_error()
    }

    pub fn load_u8(&mut self, bit_len: usize) -> Result<u8, CellError> {
        self.load_number(bit_len)
    }

    pub fn load_u16(&mut self, bit_len: usize) -> Result<u16, CellError> {
        self.load_number(bit_len)
    }

    pub fn load_u32(&mut self, bit_len: usize) -> Result<u32, CellError> {
        self.load_number(bit_len)
    }

    pub fn load_u64(&mut self, bit_len: usize) -> Result<u64, CellError> {
        self.load_number(bit_len)
    }

    pub fn load_uint(&mut self, bit_len: usize) -> Result<BigUint, CellError> {
        self.ensure_enough_bits(bit_len)?;
        let bytes = self.load_bits(bit_len)?;
        Ok(BigUint::from_bytes_be(&bytes) >> (bytes.len() * 8 - bit_len))
    }

    pub fn load_slice(&mut self, target: &mut [u8]) -> Result<(), CellError> {
        self.ensure_enough_bits(target.len() * 8)?;
        self.bit_reader.read_bytes(target).map_parser_error()
    }

    pub fn load_bytes(&mut self, num_bytes: usize) -> Result<Vec<u8>, CellError> {
        let mut res = vec![0_u8; num_bytes];
        self.load_slice(&mut res)?;
        Ok(res)
    }

    /// Loads `num_bits` into a left-aligned byte buffer.
    pub fn load_bits(&mut self, num_bits: usize) -> Result<Vec<u8>, CellError> {
        self.ensure_enough_bits(num_bits)?;
        let mut res = vec![0_u8; num_bits.div_ceil(8)];
        let full_bytes = num_bits / 8;
        let rem_bits = num_bits % 8;
        self.bit_reader
            .read_bytes(&mut res[..full_bytes])
            .map_parser_error()?;
        if rem_bits > 0 {
            let last: u8 = self.bit_reader.read(rem_bits as u32).map_parser_error()?;
            res[full_bytes] = last << (8 - rem_bits);
        }
        Ok(res)
    }

    pub fn skip_bits(&mut self, num_bits: usize) -> Result<(), CellError> {
        self.ensure_enough_bits(num_bits)?;
        self.bit_reader.skip(num_bits as u32).map_parser_error()
    }

    pub fn next_reference(&mut self) -> Result<&'a ArcCell, CellError> {
        if self.next_ref < self.references.len() {
            let reference = &self.references[self.next_ref];
            self.next_ref += 1;
            Ok(reference)
        } else {
            Err(CellError::InvalidIndex {
                idx: self.next_ref,
                ref_count: self.references.len(),
            })
        }
    }

    pub fn ensure_empty(&mut self) -> Result<(), CellError> {
        let remaining_bits = self.remaining_bits();
        let remaining_refs = self.references.len() - self.next_ref;
        if remaining_bits == 0 && remaining_refs == 0 {
            Ok(())
        } else {
            Err(CellError::parser_error(format!(
                "reader is not empty ({remaining_bits} bits, {remaining_refs} refs left)"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::cell::CellBuilder;

    #[test]
    fn parser_round_trip() -> anyhow::Result<()> {
        let mut builder = CellBuilder::new();
        builder.store_bit(true)?;
        builder.store_u64(15, 12345)?;
        builder.store_bytes(&[0xDE, 0xAD])?;
        let cell = builder.build()?;

        let mut parser = cell.parser();
        assert!(parser.load_bit()?);
        assert_eq!(parser.load_u16(15)?, 12345);
        assert_eq!(parser.load_bytes(2)?, vec![0xDE, 0xAD]);
        parser.ensure_empty()?;
        Ok(())
    }
}
