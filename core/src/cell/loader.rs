use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::cell::level_mask::LevelMask;
use crate::cell::{
    bits_descriptor, padded_data, refs_descriptor, ArcCell, BagOfCells, Cell, CellError,
    DEPTH_BYTES,
};
use crate::types::{TonHash, TON_HASH_BYTES};

/// Capability handing out raw storage records by cell hash.
///
/// Implementations may be backed by a disk key-value store; they must be
/// shareable across threads.
pub trait CellDbReader: Send + Sync {
    fn load(&self, hash: &TonHash) -> Result<Option<Vec<u8>>, CellError>;
}

/// In-memory reader used by tests and by the Fift `vmlibs` machinery.
#[derive(Default)]
pub struct InMemoryCellDb {
    records: Mutex<HashMap<TonHash, Vec<u8>>>,
}

impl InMemoryCellDb {
    pub fn insert(&self, hash: TonHash, record: Vec<u8>) {
        self.records.lock().expect("poisoned").insert(hash, record);
    }

    pub fn erase(&self, hash: &TonHash) {
        self.records.lock().expect("poisoned").remove(hash);
    }

    pub fn store_tree(&self, root: &ArcCell, as_boc: bool) -> Result<(), CellError> {
        self.insert(root.repr_hash(), encode_cell_record(root, 1, as_boc)?);
        if !as_boc {
            for child in root.references() {
                self.store_tree(child, false)?;
            }
        }
        Ok(())
    }
}

impl CellDbReader for InMemoryCellDb {
    fn load(&self, hash: &TonHash) -> Result<Option<Vec<u8>>, CellError> {
        Ok(self.records.lock().expect("poisoned").get(hash).cloned())
    }
}

const BOC_RECORD_TAG: u8 = 0xFF;

/// Storage codec: either `0xFF` followed by a framed BoC, or a varint
/// refcount, the two descriptor bytes, padded data and per-child metadata
/// (level mask byte, hashes, then depths).
///
/// The refcount varint encodes `refcnt << 1`, so its first byte always has a
/// clear low bit and can never be confused with the BoC tag.
pub fn encode_cell_record(cell: &ArcCell, refcnt: u64, as_boc: bool) -> Result<Vec<u8>, CellError> {
    if as_boc {
        let mut out = vec![BOC_RECORD_TAG];
        write_uleb128(&mut out, refcnt << 1);
        out.extend_from_slice(&BagOfCells::new(std::slice::from_ref(cell)).serialize(false)?);
        return Ok(out);
    }

    let mut out = Vec::new();
    write_uleb128(&mut out, refcnt << 1);
    out.push(refs_descriptor(
        cell.cell_type(),
        cell.references().len(),
        cell.level_mask().mask(),
    ));
    out.push(bits_descriptor(cell.bit_len()));
    out.extend_from_slice(&padded_data(cell.data(), cell.bit_len()));
    for child in cell.references() {
        let mask = child.level_mask();
        out.push(mask.mask() as u8);
        for level in significant_levels(mask) {
            out.extend_from_slice(&child.hash(level));
        }
        for level in significant_levels(mask) {
            out.extend_from_slice(&child.depth(level).to_be_bytes());
        }
    }
    Ok(out)
}

fn significant_levels(mask: LevelMask) -> impl Iterator<Item = u8> {
    (0..=mask.level()).filter(move |&l| mask.is_significant(l))
}

/// Metadata of an unloaded child: everything a parent needs without
/// touching storage.
#[derive(Debug, Clone)]
pub struct ExtCellMeta {
    level_mask: LevelMask,
    hashes: Vec<TonHash>,
    depths: Vec<u16>,
}

impl ExtCellMeta {
    pub fn level_mask(&self) -> LevelMask {
        self.level_mask
    }

    pub fn hash(&self, level: u8) -> TonHash {
        self.hashes[self.level_mask.apply(level.min(3)).hash_index()]
    }

    pub fn depth(&self, level: u8) -> u16 {
        self.depths[self.level_mask.apply(level.min(3)).hash_index()]
    }

    pub fn repr_hash(&self) -> TonHash {
        self.hash(3)
    }
}

/// A decoded storage record before its children are loaded.
#[derive(Debug, Clone)]
pub struct CellRecord {
    pub refcnt: u64,
    pub stored_as_boc: bool,
    data: Vec<u8>,
    bit_len: usize,
    is_special: bool,
    children: Vec<ExtCellMeta>,
    loaded: Option<ArcCell>,
}

impl CellRecord {
    pub fn children(&self) -> &[ExtCellMeta] {
        &self.children
    }
}

pub fn decode_cell_record(bytes: &[u8]) -> Result<CellRecord, CellError> {
    if bytes.first() == Some(&BOC_RECORD_TAG) {
        let mut pos = 1;
        let refcnt = read_uleb128(bytes, &mut pos)?;
        let root = BagOfCells::parse(&bytes[pos..])?.single_root()?;
        return Ok(CellRecord {
            refcnt: refcnt >> 1,
            stored_as_boc: true,
            data: vec![],
            bit_len: 0,
            is_special: false,
            children: vec![],
            loaded: Some(root),
        });
    }

    let mut pos = 0;
    let refcnt_raw = read_uleb128(bytes, &mut pos)?;
    if refcnt_raw & 1 != 0 {
        return Err(CellError::boc_deserialization_error("bad refcount varint"));
    }
    let refcnt = refcnt_raw >> 1;

    let d1 = *bytes
        .get(pos)
        .ok_or_else(|| CellError::boc_deserialization_error("not enough data"))?;
    let d2 = *bytes
        .get(pos + 1)
        .ok_or_else(|| CellError::boc_deserialization_error("not enough data"))?;
    pos += 2;

    let ref_count = (d1 & 0b111) as usize;
    let is_special = d1 & 0b1000 != 0;
    let data_size = ((d2 >> 1) + (d2 & 1)) as usize;
    let full_bytes = d2 & 1 == 0;
    if bytes.len() < pos + data_size {
        return Err(CellError::boc_deserialization_error("not enough data"));
    }
    let mut data = bytes[pos..pos + data_size].to_vec();
    pos += data_size;
    let padding = if !data.is_empty() && !full_bytes {
        let zeros = data.last().expect("non-empty").trailing_zeros();
        if zeros >= 8 {
            return Err(CellError::boc_deserialization_error("missing completion tag"));
        }
        let last = data.last_mut().expect("non-empty");
        *last &= !(1 << zeros);
        zeros as usize + 1
    } else {
        0
    };
    let bit_len = data.len() * 8 - padding;

    let mut children = Vec::with_capacity(ref_count);
    for _ in 0..ref_count {
        let mask_byte = *bytes
            .get(pos)
            .ok_or_else(|| CellError::boc_deserialization_error("not enough data"))?;
        pos += 1;
        let level_mask = LevelMask::new(mask_byte as u32);
        let count = level_mask.hash_count();
        let need = count * (TON_HASH_BYTES + DEPTH_BYTES);
        if bytes.len() < pos + need {
            return Err(CellError::boc_deserialization_error("not enough data"));
        }
        let mut hashes = Vec::with_capacity(count);
        for i in 0..count {
            let from = pos + i * TON_HASH_BYTES;
            hashes.push(
                bytes[from..from + TON_HASH_BYTES]
                    .try_into()
                    .expect("length checked"),
            );
        }
        pos += count * TON_HASH_BYTES;
        let mut depths = Vec::with_capacity(count);
        for i in 0..count {
            let from = pos + i * DEPTH_BYTES;
            depths.push(u16::from_be_bytes(
                bytes[from..from + DEPTH_BYTES]
                    .try_into()
                    .expect("length checked"),
            ));
        }
        pos += count * DEPTH_BYTES;
        children.push(ExtCellMeta {
            level_mask,
            hashes,
            depths,
        });
    }

    Ok(CellRecord {
        refcnt,
        stored_as_boc: false,
        data,
        bit_len,
        is_special,
        children,
        loaded: None,
    })
}

/// A shared cell store resolving hashes through a [`CellDbReader`] and
/// keeping everything it has loaded alive for outstanding [`ExtCell`]s.
pub struct CellDb {
    reader: Arc<dyn CellDbReader>,
    cache: Mutex<HashMap<TonHash, ArcCell>>,
}

impl CellDb {
    pub fn new(reader: Arc<dyn CellDbReader>) -> Arc<Self> {
        Arc::new(CellDb {
            reader,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn load_record(self: &Arc<Self>, hash: &TonHash) -> Result<CellRecord, CellError> {
        let bytes = self
            .reader
            .load(hash)?
            .ok_or_else(|| CellError::CellNotFound(hex::encode(hash)))?;
        decode_cell_record(&bytes)
    }

    /// Loads a cell and, recursively, every child it needs. Loaded cells are
    /// cached so repeated loads resolve without touching the reader.
    pub fn load_cell(self: &Arc<Self>, hash: &TonHash) -> Result<ArcCell, CellError> {
        if let Some(cell) = self.cache.lock().expect("poisoned").get(hash) {
            return Ok(cell.clone());
        }
        let record = self.load_record(hash)?;
        let cell = match record.loaded {
            Some(cell) => cell,
            None => {
                let mut references = Vec::with_capacity(record.children.len());
                for child in &record.children {
                    references.push(self.load_cell(&child.repr_hash())?);
                }
                Cell::new(record.data, record.bit_len, references, record.is_special)?.to_arc()
            }
        };
        if cell.repr_hash() != *hash {
            return Err(CellError::boc_deserialization_error(format!(
                "stored cell hash mismatch for {}",
                hex::encode(hash)
            )));
        }
        self.cache
            .lock()
            .expect("poisoned")
            .insert(*hash, cell.clone());
        Ok(cell)
    }

    /// Shallow load: the record's children as lazily-resolvable stubs.
    pub fn load_ext(self: &Arc<Self>, hash: &TonHash) -> Result<Vec<ExtCell>, CellError> {
        let record = self.load_record(hash)?;
        Ok(record
            .children
            .iter()
            .map(|meta| ExtCell {
                meta: meta.clone(),
                db: self.clone(),
            })
            .collect())
    }
}

/// An unloaded cell stub: exposes `(level_mask, hash, depth)` and resolves
/// lazily through the owning [`CellDb`].
#[derive(Clone)]
pub struct ExtCell {
    meta: ExtCellMeta,
    db: Arc<CellDb>,
}

impl ExtCell {
    pub fn level_mask(&self) -> LevelMask {
        self.meta.level_mask()
    }

    pub fn hash(&self, level: u8) -> TonHash {
        self.meta.hash(level)
    }

    pub fn depth(&self, level: u8) -> u16 {
        self.meta.depth(level)
    }

    pub fn resolve(&self) -> Result<ArcCell, CellError> {
        self.db.load_cell(&self.meta.repr_hash())
    }
}

fn write_uleb128(out: &mut Vec<u8>, mut val: u64) {
    loop {
        let byte = (val & 0x7F) as u8;
        val >>= 7;
        if val == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_uleb128(bytes: &[u8], pos: &mut usize) -> Result<u64, CellError> {
    let mut acc = 0u64;
    let mut shift = 0;
    loop {
        let byte = *bytes
            .get(*pos)
            .ok_or_else(|| CellError::boc_deserialization_error("truncated varint"))?;
        *pos += 1;
        acc |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(acc);
        }
        shift += 7;
        if shift >= 64 {
            return Err(CellError::boc_deserialization_error("varint too long"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellBuilder;

    fn tree() -> ArcCell {
        let leaf = CellBuilder::new()
            .store_u64(16, 0xBEEF)
            .unwrap()
            .build()
            .unwrap()
            .to_arc();
        CellBuilder::new()
            .store_u64(3, 0b101)
            .unwrap()
            .store_reference(&leaf)
            .unwrap()
            .build()
            .unwrap()
            .to_arc()
    }

    #[test]
    fn record_round_trip() -> anyhow::Result<()> {
        let root = tree();
        let record = encode_cell_record(&root, 7, false)?;
        let decoded = decode_cell_record(&record)?;
        assert_eq!(decoded.refcnt, 7);
        assert!(!decoded.stored_as_boc);
        assert_eq!(decoded.children().len(), 1);
        assert_eq!(
            decoded.children()[0].repr_hash(),
            root.reference(0)?.repr_hash()
        );
        Ok(())
    }

    #[test]
    fn load_through_reader() -> anyhow::Result<()> {
        let root = tree();
        let store = Arc::new(InMemoryCellDb::default());
        store.store_tree(&root, false)?;
        let db = CellDb::new(store);
        let loaded = db.load_cell(&root.repr_hash())?;
        assert_eq!(loaded.repr_hash(), root.repr_hash());
        // Second load hits the cache and still agrees.
        assert_eq!(db.load_cell(&root.repr_hash())?.repr_hash(), root.repr_hash());
        Ok(())
    }

    #[test]
    fn missing_hash_is_reported() {
        let db = CellDb::new(Arc::new(InMemoryCellDb::default()));
        let err = db.load_cell(&[0xAB; 32]).unwrap_err();
        assert!(matches!(err, CellError::CellNotFound(_)));
    }

    #[test]
    fn ext_cell_resolves_lazily() -> anyhow::Result<()> {
        let root = tree();
        let store = Arc::new(InMemoryCellDb::default());
        store.store_tree(&root, false)?;
        let db = CellDb::new(store);
        let ext = db.load_ext(&root.repr_hash())?;
        assert_eq!(ext.len(), 1);
        let child = &ext[0];
        assert_eq!(child.hash(3), root.reference(0)?.repr_hash());
        assert_eq!(child.depth(3), 0);
        assert_eq!(child.resolve()?.repr_hash(), root.reference(0)?.repr_hash());
        Ok(())
    }

    #[test]
    fn boc_record_round_trip() -> anyhow::Result<()> {
        let root = tree();
        let record = encode_cell_record(&root, 3, true)?;
        let decoded = decode_cell_record(&record)?;
        assert_eq!(decoded.refcnt, 3);
        assert!(decoded.stored_as_boc);
        Ok(())
    }
}
