use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bitstream_io::{BigEndian, BitWrite, BitWriter, ByteRead, ByteReader};
use crc::Crc;
use lazy_static::lazy_static;

use crate::cell::{ArcCell, Cell, CellError, MapCellError};
use crate::types::TonHash;

lazy_static! {
    pub(crate) static ref CRC_32_ISCSI: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISCSI);
}

const GENERIC_BOC_MAGIC: u32 = 0xb5ee9c72;

/// A serializable collection of cell DAGs sharing common subtrees.
#[derive(Debug, Clone)]
pub struct BagOfCells {
    pub roots: Vec<ArcCell>,
}

/// Flattened cell with references as indices into the bag.
#[derive(Debug, Clone)]
struct FlatCell {
    data: Vec<u8>,
    bit_len: usize,
    references: Vec<usize>,
    is_special: bool,
    level_mask: u32,
}

impl BagOfCells {
    pub fn new(roots: &[ArcCell]) -> BagOfCells {
        BagOfCells {
            roots: roots.to_vec(),
        }
    }

    pub fn from_root(root: Cell) -> BagOfCells {
        BagOfCells {
            roots: vec![Arc::new(root)],
        }
    }

    pub fn single_root(mut self) -> Result<ArcCell, CellError> {
        if self.roots.len() != 1 {
            return Err(CellError::boc_deserialization_error(format!(
                "single root expected, got {}",
                self.roots.len()
            )));
        }
        Ok(self.roots.pop().expect("checked length"))
    }

    pub fn parse(serial: &[u8]) -> Result<BagOfCells, CellError> {
        let mut reader: ByteReader<Cursor<&[u8]>, BigEndian> =
            ByteReader::endian(Cursor::new(serial), BigEndian);

        // serialized_boc#b5ee9c72 has_idx:(## 1) has_crc32c:(## 1)
        //   has_cache_bits:(## 1) flags:(## 2) size:(## 3) { size <= 4 }
        let magic = reader.read::<u32>().map_boc_deserialization_error()?;
        if magic != GENERIC_BOC_MAGIC {
            return Err(CellError::boc_deserialization_error(format!(
                "unsupported BoC magic {magic:#x}"
            )));
        }
        let header = reader.read::<u8>().map_boc_deserialization_error()?;
        let has_idx = header & 0b1000_0000 != 0;
        let has_crc32c = header & 0b0100_0000 != 0;
        let size = header & 0b0000_0111;
        if size > 4 {
            return Err(CellError::boc_deserialization_error(format!(
                "invalid ref size {size}"
            )));
        }

        if has_crc32c {
            if serial.len() < 4 {
                return Err(CellError::boc_deserialization_error("truncated BoC"));
            }
            let body = &serial[..serial.len() - 4];
            let expected = u32::from_le_bytes(serial[serial.len() - 4..].try_into().unwrap());
            let actual = CRC_32_ISCSI.checksum(body);
            if expected != actual {
                return Err(CellError::boc_deserialization_error(format!(
                    "CRC mismatch: stored {expected:#x}, computed {actual:#x}"
                )));
            }
        }

        let off_bytes = reader.read::<u8>().map_boc_deserialization_error()?;
        let cell_count = read_var_size(&mut reader, size)?;
        let root_count = read_var_size(&mut reader, size)?;
        let _absent = read_var_size(&mut reader, size)?;
        let _tot_cells_size = read_var_size(&mut reader, off_bytes)?;
        let mut root_list = Vec::with_capacity(root_count);
        for _ in 0..root_count {
            root_list.push(read_var_size(&mut reader, size)?);
        }
        if has_idx {
            for _ in 0..cell_count {
                read_var_size(&mut reader, off_bytes)?;
            }
        }

        let mut flat_cells = Vec::with_capacity(cell_count);
        for _ in 0..cell_count {
            flat_cells.push(read_flat_cell(&mut reader, size)?);
        }

        // Cells reference only later cells; build them back to front.
        let mut cells: Vec<ArcCell> = Vec::with_capacity(cell_count);
        for (cell_index, flat) in flat_cells.into_iter().enumerate().rev() {
            let mut references = Vec::with_capacity(flat.references.len());
            for &ref_index in &flat.references {
                if ref_index <= cell_index {
                    return Err(CellError::boc_deserialization_error(
                        "backward cell reference",
                    ));
                }
                references.push(cells[cell_count - 1 - ref_index].clone());
            }
            let cell = Cell::new(flat.data, flat.bit_len, references, flat.is_special)
                .map_boc_deserialization_error()?;
            cells.push(cell.to_arc());
        }

        let roots = root_list
            .into_iter()
            .map(|r| {
                cells
                    .get(cell_count - 1 - r)
                    .cloned()
                    .ok_or_else(|| CellError::boc_deserialization_error("root index out of range"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(BagOfCells { roots })
    }

    pub fn parse_hex(hex_str: &str) -> Result<BagOfCells, CellError> {
        let cleaned: String = hex_str.chars().filter(|c| !c.is_whitespace()).collect();
        let bin = hex::decode(cleaned).map_boc_deserialization_error()?;
        Self::parse(&bin)
    }

    pub fn parse_base64(b64: &str) -> Result<BagOfCells, CellError> {
        let bin = STANDARD.decode(b64).map_boc_deserialization_error()?;
        Self::parse(&bin)
    }

    pub fn serialize(&self, has_crc32c: bool) -> Result<Vec<u8>, CellError> {
        let (order, index_by_hash) = topological_order(&self.roots)?;
        let flat: Vec<FlatCell> = order
            .iter()
            .map(|cell| flatten_cell(cell, &index_by_hash))
            .collect::<Result<_, _>>()?;

        let cell_count = flat.len() as u32;
        let ref_bytes = byte_width(cell_count);
        let full_size: u32 = flat.iter().map(|c| flat_cell_size(c, ref_bytes)).sum();
        let offset_bytes = byte_width(full_size);

        let mut writer = BitWriter::endian(Vec::new(), BigEndian);
        writer
            .write(32, GENERIC_BOC_MAGIC)
            .map_boc_serialization_error()?;
        writer.write_bit(false).map_boc_serialization_error()?; // has_idx
        writer
            .write_bit(has_crc32c)
            .map_boc_serialization_error()?;
        writer.write_bit(false).map_boc_serialization_error()?; // has_cache_bits
        writer.write(2, 0u8).map_boc_serialization_error()?; // flags
        writer
            .write(3, ref_bytes)
            .map_boc_serialization_error()?;
        writer
            .write(8, offset_bytes)
            .map_boc_serialization_error()?;
        writer
            .write(8 * ref_bytes, cell_count)
            .map_boc_serialization_error()?;
        writer
            .write(8 * ref_bytes, self.roots.len() as u32)
            .map_boc_serialization_error()?;
        writer
            .write(8 * ref_bytes, 0u32)
            .map_boc_serialization_error()?;
        writer
            .write(8 * offset_bytes, full_size)
            .map_boc_serialization_error()?;
        for root in &self.roots {
            let index = index_by_hash[&root.repr_hash()];
            writer
                .write(8 * ref_bytes, index as u32)
                .map_boc_serialization_error()?;
        }
        for cell in &flat {
            write_flat_cell(&mut writer, cell, ref_bytes)?;
        }

        let mut bytes = writer
            .writer()
            .ok_or_else(|| CellError::boc_serialization_error("stream is not byte-aligned"))?
            .clone();
        if has_crc32c {
            let cs = CRC_32_ISCSI.checksum(&bytes);
            bytes.extend_from_slice(&cs.to_le_bytes());
        }
        Ok(bytes)
    }
}

/// Orders all distinct cells so that every cell precedes its references.
///
/// Cells are ranked by their maximum distance from a root; references always
/// go from a lower rank to a strictly higher one.
fn topological_order(
    roots: &[ArcCell],
) -> Result<(Vec<ArcCell>, HashMap<TonHash, usize>), CellError> {
    fn visit(
        cell: &ArcCell,
        rank: u16,
        ranks: &mut HashMap<TonHash, (ArcCell, u16, usize)>,
        seen_counter: &mut usize,
    ) {
        let hash = cell.repr_hash();
        if let Some(entry) = ranks.get_mut(&hash) {
            if entry.1 >= rank {
                return;
            }
            entry.1 = rank;
        } else {
            ranks.insert(hash, (cell.clone(), rank, *seen_counter));
            *seen_counter += 1;
        }
        for child in cell.references() {
            visit(child, rank + 1, ranks, seen_counter);
        }
    }

    let mut ranks = HashMap::new();
    let mut seen_counter = 0;
    for root in roots {
        visit(root, 0, &mut ranks, &mut seen_counter);
    }

    let mut order: Vec<(ArcCell, u16, usize)> = ranks.into_values().collect();
    order.sort_by_key(|(_, rank, seen)| (*rank, *seen));

    let index_by_hash = order
        .iter()
        .enumerate()
        .map(|(i, (cell, _, _))| (cell.repr_hash(), i))
        .collect();
    Ok((order.into_iter().map(|(cell, _, _)| cell).collect(), index_by_hash))
}

fn flatten_cell(
    cell: &ArcCell,
    index_by_hash: &HashMap<TonHash, usize>,
) -> Result<FlatCell, CellError> {
    let references = cell
        .references()
        .iter()
        .map(|r| {
            index_by_hash
                .get(&r.repr_hash())
                .copied()
                .ok_or_else(|| CellError::boc_serialization_error("dangling reference"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FlatCell {
        data: cell.data().to_vec(),
        bit_len: cell.bit_len(),
        references,
        is_special: cell.is_special(),
        level_mask: cell.level_mask().mask(),
    })
}

fn flat_cell_size(cell: &FlatCell, ref_bytes: u32) -> u32 {
    2 + cell.bit_len.div_ceil(8) as u32 + cell.references.len() as u32 * ref_bytes
}

fn byte_width(val: u32) -> u32 {
    ((32 - val.leading_zeros()) as u32).div_ceil(8).max(1)
}

fn read_flat_cell(
    reader: &mut ByteReader<Cursor<&[u8]>, BigEndian>,
    size: u8,
) -> Result<FlatCell, CellError> {
    let d1 = reader.read::<u8>().map_boc_deserialization_error()?;
    let d2 = reader.read::<u8>().map_boc_deserialization_error()?;

    let ref_num = (d1 & 0b111) as usize;
    let is_special = d1 & 0b1000 != 0;
    let has_hashes = d1 & 0b10000 != 0;
    let level_mask = (d1 >> 5) as u32;
    let data_size = ((d2 >> 1) + (d2 & 1)) as usize;
    let full_bytes = d2 & 1 == 0;

    if has_hashes {
        let hash_count = crate::cell::level_mask::LevelMask::new(level_mask).hash_count();
        reader
            .skip(hash_count as u32 * (32 + 2))
            .map_boc_deserialization_error()?;
    }

    let mut data = reader
        .read_to_vec(data_size)
        .map_boc_deserialization_error()?;
    let padding_len = if !data.is_empty() && !full_bytes {
        let num_zeros = data.last().expect("non-empty").trailing_zeros();
        if num_zeros >= 8 {
            return Err(CellError::boc_deserialization_error(
                "missing completion tag in last data byte",
            ));
        }
        let last = data.last_mut().expect("non-empty");
        *last &= !(1 << num_zeros);
        num_zeros as usize + 1
    } else {
        0
    };
    let bit_len = data.len() * 8 - padding_len;

    let mut references = Vec::with_capacity(ref_num);
    for _ in 0..ref_num {
        references.push(read_var_size(reader, size)?);
    }
    Ok(FlatCell {
        data,
        bit_len,
        references,
        is_special,
        level_mask,
    })
}

fn write_flat_cell(
    writer: &mut BitWriter<Vec<u8>, BigEndian>,
    cell: &FlatCell,
    ref_bytes: u32,
) -> Result<(), CellError> {
    let d1 =
        cell.references.len() as u32 + 8 * cell.is_special as u32 + cell.level_mask * 32;
    let data_len = cell.bit_len.div_ceil(8);
    let full_bytes = cell.bit_len % 8 == 0;
    let d2 = (data_len * 2 - !full_bytes as usize) as u8;

    writer.write(8, d1).map_boc_serialization_error()?;
    writer.write(8, d2).map_boc_serialization_error()?;
    if full_bytes {
        writer
            .write_bytes(&cell.data[..data_len])
            .map_boc_serialization_error()?;
    } else {
        writer
            .write_bytes(&cell.data[..data_len - 1])
            .map_boc_serialization_error()?;
        let last = cell.data[data_len - 1] | 1 << (7 - cell.bit_len % 8);
        writer.write(8, last).map_boc_serialization_error()?;
    }
    for &r in &cell.references {
        writer
            .write(8 * ref_bytes, r as u32)
            .map_boc_serialization_error()?;
    }
    Ok(())
}

fn read_var_size(
    reader: &mut ByteReader<Cursor<&[u8]>, BigEndian>,
    n: u8,
) -> Result<usize, CellError> {
    let bytes = reader
        .read_to_vec(n as usize)
        .map_boc_deserialization_error()?;
    let mut result = 0usize;
    for &byte in &bytes {
        result = result << 8 | byte as usize;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellBuilder;

    fn sample_tree() -> ArcCell {
        let leaf = CellBuilder::new()
            .store_u64(32, 0xCAFEBABE)
            .unwrap()
            .build()
            .unwrap()
            .to_arc();
        let mid = CellBuilder::new()
            .store_u64(7, 0x55)
            .unwrap()
            .store_reference(&leaf)
            .unwrap()
            .build()
            .unwrap()
            .to_arc();
        // The leaf is shared by two parents, it must be emitted once.
        CellBuilder::new()
            .store_u64(8, 0x01)
            .unwrap()
            .store_reference(&mid)
            .unwrap()
            .store_reference(&leaf)
            .unwrap()
            .build()
            .unwrap()
            .to_arc()
    }

    #[test]
    fn boc_round_trip() -> anyhow::Result<()> {
        let root = sample_tree();
        for crc in [false, true] {
            let bytes = BagOfCells::new(&[root.clone()]).serialize(crc)?;
            let parsed = BagOfCells::parse(&bytes)?.single_root()?;
            assert_eq!(parsed.repr_hash(), root.repr_hash());
        }
        Ok(())
    }

    #[test]
    fn crc_mismatch_is_detected() -> anyhow::Result<()> {
        let root = sample_tree();
        let mut bytes = BagOfCells::new(&[root]).serialize(true)?;
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(BagOfCells::parse(&bytes).is_err());
        Ok(())
    }

    #[test]
    fn empty_cell_boc_is_canonical() -> anyhow::Result<()> {
        let bytes = BagOfCells::new(&[crate::cell::EMPTY_CELL.clone()]).serialize(false)?;
        let parsed = BagOfCells::parse(&bytes)?.single_root()?;
        assert_eq!(parsed.bit_len(), 0);
        assert_eq!(parsed.references().len(), 0);
        Ok(())
    }
}
