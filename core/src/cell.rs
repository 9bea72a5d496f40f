use std::fmt;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use lazy_static::lazy_static;
use sha2::{Digest, Sha256};

pub use boc::*;
pub use builder::*;
pub use error::*;
pub use loader::*;
pub use parser::*;
pub use slice::*;

use crate::cell::cell_type::CellType;
use crate::cell::level_mask::LevelMask;
use crate::types::{TonHash, TON_HASH_BYTES};

mod boc;
mod builder;
mod cell_type;
pub mod dict;
mod error;
mod level_mask;
mod loader;
mod parser;
mod slice;
pub(crate) mod util;

pub(crate) use crate::types::DEPTH_BYTES;

pub const MAX_CELL_BITS: usize = 1023;
pub const MAX_CELL_REFS: usize = 4;
pub const MAX_CELL_DEPTH: u16 = 1024;
pub(crate) const MAX_LEVEL: u8 = 3;

pub type ArcCell = Arc<Cell>;

lazy_static! {
    pub static ref EMPTY_CELL: ArcCell = Arc::new(Cell::default());
}

/// An immutable DAG node carrying up to 1023 data bits and up to 4 child
/// references, content-addressed by its representation hash.
///
/// Hashes and depths for every level are computed once at construction;
/// a finalized cell is never mutated.
#[derive(PartialEq, Eq, Clone, Hash)]
pub struct Cell {
    data: Vec<u8>,
    bit_len: usize,
    references: Vec<ArcCell>,
    cell_type: CellType,
    level_mask: LevelMask,
    hashes: [TonHash; 4],
    depths: [u16; 4],
}

impl Cell {
    pub fn new(
        data: Vec<u8>,
        bit_len: usize,
        references: Vec<ArcCell>,
        is_special: bool,
    ) -> Result<Self, CellError> {
        if bit_len > MAX_CELL_BITS {
            return Err(CellError::builder_error(format!(
                "cell data must fit in {MAX_CELL_BITS} bits, got {bit_len}"
            )));
        }
        if references.len() > MAX_CELL_REFS {
            return Err(CellError::builder_error(format!(
                "cell must have at most {MAX_CELL_REFS} refs, got {}",
                references.len()
            )));
        }

        let cell_type = if is_special {
            CellType::from_type_byte(&data)?
        } else {
            CellType::Ordinary
        };
        cell_type.validate(&data, bit_len, &references)?;
        let level_mask = cell_type.level_mask(&data, bit_len, &references)?;
        let (hashes, depths) =
            compute_hashes_and_depths(cell_type, &data, bit_len, &references, level_mask)?;

        if depths[MAX_LEVEL as usize] > MAX_CELL_DEPTH {
            return Err(CellError::builder_error(format!(
                "cell depth must not exceed {MAX_CELL_DEPTH}, got {}",
                depths[MAX_LEVEL as usize]
            )));
        }

        Ok(Self {
            data,
            bit_len,
            references,
            cell_type,
            level_mask,
            hashes,
            depths,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn references(&self) -> &[ArcCell] {
        &self.references
    }

    pub fn reference(&self, idx: usize) -> Result<&ArcCell, CellError> {
        self.references.get(idx).ok_or(CellError::InvalidIndex {
            idx,
            ref_count: self.references.len(),
        })
    }

    pub fn level_mask(&self) -> LevelMask {
        self.level_mask
    }

    pub fn level(&self) -> u8 {
        self.level_mask.level()
    }

    pub fn is_special(&self) -> bool {
        self.cell_type != CellType::Ordinary
    }

    pub fn is_library(&self) -> bool {
        self.cell_type == CellType::Library
    }

    pub(crate) fn cell_type(&self) -> CellType {
        self.cell_type
    }

    pub fn hash(&self, level: u8) -> TonHash {
        self.hashes[level.min(MAX_LEVEL) as usize]
    }

    pub fn depth(&self, level: u8) -> u16 {
        self.depths[level.min(MAX_LEVEL) as usize]
    }

    /// The representation hash identifying this cell.
    pub fn repr_hash(&self) -> TonHash {
        self.hash(MAX_LEVEL)
    }

    pub fn repr_depth(&self) -> u16 {
        self.depth(MAX_LEVEL)
    }

    /// Library cells point at their library by hash in the payload.
    pub fn library_hash(&self) -> Option<TonHash> {
        if self.cell_type != CellType::Library {
            return None;
        }
        self.data[1..33].try_into().ok()
    }

    pub fn parser(&self) -> CellParser<'_> {
        CellParser::new(self.bit_len, &self.data, &self.references)
    }

    pub fn parse<F, T>(&self, parse: F) -> Result<T, CellError>
    where
        F: FnOnce(&mut CellParser) -> Result<T, CellError>,
    {
        let mut parser = self.parser();
        parse(&mut parser)
    }

    pub fn parse_fully<F, T>(&self, parse: F) -> Result<T, CellError>
    where
        F: FnOnce(&mut CellParser) -> Result<T, CellError>,
    {
        let mut parser = self.parser();
        let res = parse(&mut parser)?;
        parser.ensure_empty()?;
        Ok(res)
    }

    pub fn to_arc(self) -> ArcCell {
        Arc::new(self)
    }
}

impl Default for Cell {
    fn default() -> Self {
        Cell::new(vec![], 0, vec![], false).expect("empty ordinary cell is valid")
    }
}

impl Debug for Cell {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let completion_tag = if self.bit_len % 8 != 0 { "_" } else { "" };
        write!(
            f,
            "Cell{{ {:?} bits: {}, data: {}{}, refs: {} }}",
            self.cell_type,
            self.bit_len,
            hex::encode(&self.data),
            completion_tag,
            self.references.len()
        )
    }
}

/// Serialized representation of one level of a cell, the SHA-256 preimage of
/// its hash at that level.
fn level_repr(
    (original_data, original_bit_len): (&[u8], usize),
    (data, bit_len): (&[u8], usize),
    refs: &[ArcCell],
    level_mask: LevelMask,
    level: u8,
    cell_type: CellType,
) -> Vec<u8> {
    let mut repr = Vec::with_capacity(2 + data.len() + refs.len() * (TON_HASH_BYTES + 2));
    repr.push(refs_descriptor(
        cell_type,
        refs.len(),
        level_mask.apply(level).mask(),
    ));
    repr.push(bits_descriptor(original_bit_len));
    repr.extend_from_slice(&padded_data(data, bit_len));
    let child_level = cell_type.child_level(level);
    for child in refs {
        repr.extend_from_slice(&child.depth(child_level).to_be_bytes());
    }
    for child in refs {
        repr.extend_from_slice(&child.hash(child_level));
    }
    repr
}

fn compute_hashes_and_depths(
    cell_type: CellType,
    data: &[u8],
    bit_len: usize,
    references: &[ArcCell],
    level_mask: LevelMask,
) -> Result<([TonHash; 4], [u16; 4]), CellError> {
    // A pruned branch stores lower-level hashes inline and only hashes itself
    // at its own level.
    let hash_count = if cell_type == CellType::PrunedBranch {
        1
    } else {
        level_mask.hash_count()
    };
    let hash_i_offset = level_mask.hash_count() - hash_count;

    let mut hashes: Vec<TonHash> = Vec::with_capacity(hash_count);
    let mut depths: Vec<u16> = Vec::with_capacity(hash_count);

    for (hash_i, level_i) in (0..=level_mask.level())
        .filter(|&i| level_mask.is_significant(i))
        .enumerate()
    {
        if hash_i < hash_i_offset {
            continue;
        }

        // Higher levels hash the previous level's hash instead of the data.
        let (current_data, current_bit_len) = if hash_i == hash_i_offset {
            (data, bit_len)
        } else {
            let prev = hashes
                .get(hash_i - hash_i_offset - 1)
                .ok_or_else(|| CellError::InternalError("missing previous hash".to_owned()))?;
            (prev.as_slice(), 256)
        };

        let child_level = cell_type.child_level(level_i);
        let depth = references
            .iter()
            .map(|r| r.depth(child_level) + 1)
            .max()
            .unwrap_or(0);

        let repr = level_repr(
            (data, bit_len),
            (current_data, current_bit_len),
            references,
            level_mask,
            level_i,
            cell_type,
        );
        let hash: TonHash = Sha256::new_with_prefix(repr).finalize()[..]
            .try_into()
            .map_err(|_| CellError::InternalError("bad digest length".to_owned()))?;

        hashes.push(hash);
        depths.push(depth);
    }

    cell_type.resolve_hashes_and_depths(hashes, depths, data, bit_len, level_mask)
}

pub(crate) fn refs_descriptor(cell_type: CellType, ref_count: usize, level_mask: u32) -> u8 {
    ref_count as u8 + 8 * (cell_type != CellType::Ordinary) as u8 + level_mask as u8 * 32
}

pub(crate) fn bits_descriptor(bit_len: usize) -> u8 {
    (bit_len / 8 + bit_len.div_ceil(8)) as u8
}

/// Byte-aligned data with the completion tag: a terminal `1` bit and zero
/// padding appended to sub-byte tails.
pub(crate) fn padded_data(data: &[u8], bit_len: usize) -> Vec<u8> {
    let mut padded = data[..bit_len.div_ceil(8)].to_vec();
    let rest_bits = bit_len % 8;
    if rest_bits != 0 {
        let last = padded.last_mut().expect("non-empty on unaligned bit_len");
        *last = (*last & !(0xFF >> rest_bits)) | 1 << (7 - rest_bits);
    }
    padded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cell_hash_is_stable() -> anyhow::Result<()> {
        // SHA-256 of the two descriptor bytes of the empty ordinary cell.
        let expected: TonHash = Sha256::digest([0u8, 0u8])[..].try_into()?;
        assert_eq!(EMPTY_CELL.repr_hash(), expected);
        assert_eq!(
            hex::encode(EMPTY_CELL.repr_hash()),
            "96a296d224f285c67bee93c30f8a309157f0daa35dc5b87e410b78630a09cfc7"
        );
        Ok(())
    }

    #[test]
    fn hash_depends_only_on_content() -> anyhow::Result<()> {
        let child = CellBuilder::new().store_u32(32, 0xdeadbeef)?.build()?;
        let a = CellBuilder::new()
            .store_bit(true)?
            .store_reference(&child.clone().to_arc())?
            .build()?;
        let b = CellBuilder::new()
            .store_bit(true)?
            .store_reference(&child.to_arc())?
            .build()?;
        assert_eq!(a.repr_hash(), b.repr_hash());
        assert_eq!(a.depth(0), 1);
        Ok(())
    }

    #[test]
    fn padded_data_sets_completion_tag() {
        assert_eq!(padded_data(&[0b1010_0000], 3), vec![0b1011_0000]);
        assert_eq!(padded_data(&[0xFF], 8), vec![0xFF]);
        assert_eq!(padded_data(&[], 0), Vec::<u8>::new());
    }
}
