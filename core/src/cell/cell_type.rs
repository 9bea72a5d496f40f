use crate::cell::level_mask::LevelMask;
use crate::cell::{ArcCell, Cell, CellError, DEPTH_BYTES, MAX_LEVEL};
use crate::types::{TonHash, TON_HASH_BYTES, ZERO_HASH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CellType {
    #[default]
    Ordinary,
    PrunedBranch,
    Library,
    MerkleProof,
    MerkleUpdate,
}

#[derive(Debug, Clone)]
pub(crate) struct PrunedHash {
    pub hash: TonHash,
    pub depth: u16,
}

impl CellType {
    pub(crate) fn from_type_byte(data: &[u8]) -> Result<Self, CellError> {
        let Some(type_byte) = data.first() else {
            return Err(CellError::InvalidSpecialCell(
                "no data for the type byte".to_owned(),
            ));
        };
        match type_byte {
            1 => Ok(CellType::PrunedBranch),
            2 => Ok(CellType::Library),
            3 => Ok(CellType::MerkleProof),
            4 => Ok(CellType::MerkleUpdate),
            other => Err(CellError::InvalidSpecialCell(format!(
                "unknown special cell type byte {other}"
            ))),
        }
    }

    pub(crate) fn type_byte(&self) -> Option<u8> {
        match self {
            CellType::Ordinary => None,
            CellType::PrunedBranch => Some(1),
            CellType::Library => Some(2),
            CellType::MerkleProof => Some(3),
            CellType::MerkleUpdate => Some(4),
        }
    }

    pub(crate) fn validate(
        &self,
        data: &[u8],
        bit_len: usize,
        references: &[ArcCell],
    ) -> Result<(), CellError> {
        match self {
            CellType::Ordinary => Ok(()),
            CellType::PrunedBranch => self.validate_pruned(data, bit_len, references),
            CellType::Library => self.validate_library(bit_len, references),
            CellType::MerkleProof => self.validate_merkle_proof(data, bit_len, references),
            CellType::MerkleUpdate => self.validate_merkle_update(data, bit_len, references),
        }
    }

    pub(crate) fn level_mask(
        &self,
        data: &[u8],
        bit_len: usize,
        references: &[ArcCell],
    ) -> Result<LevelMask, CellError> {
        let mask = match self {
            CellType::Ordinary => references
                .iter()
                .fold(LevelMask::new(0), |mask, r| mask.apply_or(r.level_mask())),
            CellType::PrunedBranch => self.pruned_level_mask(data, bit_len)?,
            CellType::Library => LevelMask::new(0),
            CellType::MerkleProof => references[0].level_mask().shift_right(),
            CellType::MerkleUpdate => references[0]
                .level_mask()
                .apply_or(references[1].level_mask())
                .shift_right(),
        };
        Ok(mask)
    }

    /// Merkle cells reference their children one level higher than their own.
    pub(crate) fn child_level(&self, level: u8) -> u8 {
        match self {
            CellType::MerkleProof | CellType::MerkleUpdate => level + 1,
            _ => level,
        }
    }

    pub(crate) fn resolve_hashes_and_depths(
        &self,
        hashes: Vec<TonHash>,
        depths: Vec<u16>,
        data: &[u8],
        bit_len: usize,
        level_mask: LevelMask,
    ) -> Result<([TonHash; 4], [u16; 4]), CellError> {
        let mut resolved_hashes = [ZERO_HASH; 4];
        let mut resolved_depths = [0; 4];

        for i in 0..4 {
            let hash_index = level_mask.apply(i).hash_index();

            let (hash, depth) = if self == &CellType::PrunedBranch {
                let this_hash_index = level_mask.hash_index();
                if hash_index != this_hash_index {
                    // Levels below our own are stored inline in the payload.
                    let pruned = self.pruned_payload(data, bit_len, level_mask)?;
                    (pruned[hash_index].hash, pruned[hash_index].depth)
                } else {
                    (hashes[0], depths[0])
                }
            } else {
                (hashes[hash_index], depths[hash_index])
            };

            resolved_hashes[i as usize] = hash;
            resolved_depths[i as usize] = depth;
        }

        Ok((resolved_hashes, resolved_depths))
    }

    fn validate_pruned(
        &self,
        data: &[u8],
        bit_len: usize,
        references: &[ArcCell],
    ) -> Result<(), CellError> {
        if !references.is_empty() {
            return Err(CellError::InvalidSpecialCell(format!(
                "pruned branch cell must have no refs, got {}",
                references.len()
            )));
        }
        if bit_len < 16 {
            return Err(CellError::InvalidSpecialCell(
                "pruned branch cell is too short".to_owned(),
            ));
        }
        let level_mask = self.pruned_level_mask(data, bit_len)?;
        let level = level_mask.level();
        if level == 0 || level > MAX_LEVEL {
            return Err(CellError::InvalidSpecialCell(format!(
                "pruned branch level must be in 1..=3, got {level}"
            )));
        }
        let expected_bits =
            (2 + level_mask.apply(level - 1).hash_count() * (TON_HASH_BYTES + DEPTH_BYTES)) * 8;
        if bit_len != expected_bits {
            return Err(CellError::InvalidSpecialCell(format!(
                "pruned branch cell must have exactly {expected_bits} bits, got {bit_len}"
            )));
        }
        Ok(())
    }

    fn validate_library(&self, bit_len: usize, references: &[ArcCell]) -> Result<(), CellError> {
        const BITS: usize = (1 + TON_HASH_BYTES) * 8;
        if bit_len != BITS {
            return Err(CellError::InvalidSpecialCell(format!(
                "library cell must have exactly {BITS} bits, got {bit_len}"
            )));
        }
        if !references.is_empty() {
            return Err(CellError::InvalidSpecialCell(format!(
                "library cell must have no refs, got {}",
                references.len()
            )));
        }
        Ok(())
    }

    fn validate_merkle_proof(
        &self,
        data: &[u8],
        bit_len: usize,
        references: &[ArcCell],
    ) -> Result<(), CellError> {
        const BITS: usize = (1 + TON_HASH_BYTES + DEPTH_BYTES) * 8;
        if bit_len != BITS {
            return Err(CellError::InvalidSpecialCell(format!(
                "merkle proof cell must have exactly {BITS} bits, got {bit_len}"
            )));
        }
        if references.len() != 1 {
            return Err(CellError::InvalidSpecialCell(format!(
                "merkle proof cell must have exactly 1 ref, got {}",
                references.len()
            )));
        }
        let proof_hash: TonHash = data[1..1 + TON_HASH_BYTES]
            .try_into()
            .map_err(|_| CellError::InvalidSpecialCell("bad proof hash".to_owned()))?;
        let proof_depth = u16::from_be_bytes(
            data[1 + TON_HASH_BYTES..1 + TON_HASH_BYTES + DEPTH_BYTES]
                .try_into()
                .map_err(|_| CellError::InvalidSpecialCell("bad proof depth".to_owned()))?,
        );
        let child = &references[0];
        if proof_hash != child.hash(0) || proof_depth != child.depth(0) {
            return Err(CellError::InvalidSpecialCell(
                "merkle proof does not match its child".to_owned(),
            ));
        }
        Ok(())
    }

    fn validate_merkle_update(
        &self,
        data: &[u8],
        bit_len: usize,
        references: &[ArcCell],
    ) -> Result<(), CellError> {
        const BITS: usize = (1 + 2 * (TON_HASH_BYTES + DEPTH_BYTES)) * 8;
        if bit_len != BITS {
            return Err(CellError::InvalidSpecialCell(format!(
                "merkle update cell must have exactly {BITS} bits, got {bit_len}"
            )));
        }
        if references.len() != 2 {
            return Err(CellError::InvalidSpecialCell(format!(
                "merkle update cell must have exactly 2 refs, got {}",
                references.len()
            )));
        }
        for i in 0..2 {
            let hash_from = 1 + i * TON_HASH_BYTES;
            let expected_hash: TonHash = data[hash_from..hash_from + TON_HASH_BYTES]
                .try_into()
                .map_err(|_| CellError::InvalidSpecialCell("bad update hash".to_owned()))?;
            let depth_from = 1 + 2 * TON_HASH_BYTES + i * DEPTH_BYTES;
            let expected_depth = u16::from_be_bytes(
                data[depth_from..depth_from + DEPTH_BYTES]
                    .try_into()
                    .map_err(|_| CellError::InvalidSpecialCell("bad update depth".to_owned()))?,
            );
            let child = &references[i];
            if expected_hash != child.hash(0) || expected_depth != child.depth(0) {
                return Err(CellError::InvalidSpecialCell(format!(
                    "merkle update does not match child {i}"
                )));
            }
        }
        Ok(())
    }

    fn pruned_level_mask(&self, data: &[u8], _bit_len: usize) -> Result<LevelMask, CellError> {
        if data.len() < 2 {
            return Err(CellError::InvalidSpecialCell(
                "pruned branch cell has no level mask byte".to_owned(),
            ));
        }
        Ok(LevelMask::new(data[1] as u32))
    }

    pub(crate) fn pruned_payload(
        &self,
        data: &[u8],
        bit_len: usize,
        level_mask: LevelMask,
    ) -> Result<Vec<PrunedHash>, CellError> {
        let count = level_mask.hash_index();
        let expected = 2 + count * (TON_HASH_BYTES + DEPTH_BYTES);
        if bit_len < expected * 8 {
            return Err(CellError::InvalidSpecialCell(
                "pruned branch payload is truncated".to_owned(),
            ));
        }
        let mut result = Vec::with_capacity(count);
        for i in 0..count {
            let hash_from = 2 + i * TON_HASH_BYTES;
            let hash: TonHash = data[hash_from..hash_from + TON_HASH_BYTES]
                .try_into()
                .map_err(|_| CellError::InvalidSpecialCell("bad pruned hash".to_owned()))?;
            let depth_from = 2 + count * TON_HASH_BYTES + i * DEPTH_BYTES;
            let depth = u16::from_be_bytes(
                data[depth_from..depth_from + DEPTH_BYTES]
                    .try_into()
                    .map_err(|_| CellError::InvalidSpecialCell("bad pruned depth".to_owned()))?,
            );
            result.push(PrunedHash { hash, depth });
        }
        Ok(result)
    }
}
