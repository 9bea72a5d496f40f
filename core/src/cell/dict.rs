//! Hashmap(n) dictionaries stored in cells.
//!
//! A dictionary with fixed key length `n` is either an empty root (no cell)
//! or a tree of edge-labelled nodes: each node carries a label (`hm_label`)
//! eating some key bits, then either the value (when the key is exhausted)
//! or two children implicitly prefixed with `0` and `1`.

use num_bigint::{BigInt, BigUint, Sign};

use crate::cell::util::get_bit;
use crate::cell::{ArcCell, CellBuilder, CellError, OwnedCellSlice};

/// A left-aligned bit string key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBits {
    data: Vec<u8>,
    len: usize,
}

impl KeyBits {
    pub fn new(data: Vec<u8>, len: usize) -> Self {
        debug_assert!(data.len() * 8 >= len);
        KeyBits { data, len }
    }

    pub fn empty() -> Self {
        KeyBits {
            data: vec![],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn bit(&self, idx: usize) -> bool {
        get_bit(&self.data, idx)
    }

    pub fn push(&mut self, bit: bool) {
        if self.len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            self.data[self.len / 8] |= 0x80 >> (self.len % 8);
        }
        self.len += 1;
    }

    pub fn append(&mut self, other: &KeyBits) {
        for i in 0..other.len {
            self.push(other.bit(i));
        }
    }

    pub fn slice_from(&self, from: usize) -> KeyBits {
        let mut out = KeyBits::empty();
        for i in from..self.len {
            out.push(self.bit(i));
        }
        out
    }

    pub fn common_prefix_len(&self, other: &KeyBits) -> usize {
        let n = self.len.min(other.len);
        (0..n).take_while(|&i| self.bit(i) == other.bit(i)).count()
    }

    /// Interprets the key as an integer, two's complement when signed.
    pub fn to_int(&self, signed: bool) -> BigInt {
        if self.len == 0 {
            return BigInt::from(0);
        }
        let unsigned = crate::cell::util::read_biguint(&self.data, 0, self.len);
        if signed && self.bit(0) {
            BigInt::from_biguint(Sign::Plus, unsigned) - (BigInt::from(1) << self.len)
        } else {
            BigInt::from_biguint(Sign::Plus, unsigned)
        }
    }

    /// Builds a fixed-width key from an integer; `None` when out of range.
    pub fn from_int(x: &BigInt, bits: usize, signed: bool) -> Option<KeyBits> {
        let value = if signed {
            let half = BigInt::from(1) << (bits.max(1) - 1);
            if *x >= half || *x < -&half {
                return None;
            }
            if x.sign() == Sign::Minus {
                x + (BigInt::from(1) << bits)
            } else {
                x.clone()
            }
        } else {
            if x.sign() == Sign::Minus || *x >= BigInt::from(1) << bits {
                return None;
            }
            x.clone()
        };
        let unsigned: BigUint = value.to_biguint()?;
        let bytes = unsigned.to_bytes_be();
        let min_bits = unsigned.bits() as usize;
        let mut out = KeyBits::empty();
        for _ in 0..bits - min_bits {
            out.push(false);
        }
        for i in 0..min_bits {
            out.push(get_bit(&bytes, bytes.len() * 8 - min_bits + i));
        }
        Some(out)
    }

}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// Store regardless of previous state.
    Set,
    /// Store only if the key is already present.
    Replace,
    /// Store only if the key is absent.
    Add,
}

/// What to store under a key.
#[derive(Debug, Clone)]
pub enum DictValue {
    Slice(OwnedCellSlice),
    /// A single reference and no data bits; the `*SETREF` convention.
    CellRef(ArcCell),
}

impl DictValue {
    fn store_into(&self, builder: &mut CellBuilder) -> Result<(), CellError> {
        match self {
            DictValue::Slice(slice) => {
                builder.store_slice(slice)?;
            }
            DictValue::CellRef(cell) => {
                builder.store_reference(cell)?;
            }
        }
        Ok(())
    }
}

/// Reads an `hm_label` covering at most `max_len` bits.
fn read_label(slice: &mut OwnedCellSlice, max_len: usize) -> Result<KeyBits, CellError> {
    let len_bits = bits_for(max_len);
    if !slice.fetch_bit()? {
        // hml_short$0 unary length then the bits.
        let mut n = 0;
        while slice.fetch_bit()? {
            n += 1;
        }
        let mut label = KeyBits::empty();
        for _ in 0..n {
            label.push(slice.fetch_bit()?);
        }
        Ok(label)
    } else if !slice.fetch_bit()? {
        // hml_long$10 length then the bits.
        let n = slice.fetch_u64(len_bits)? as usize;
        if n > max_len {
            return Err(CellError::parser_error("dictionary label is too long"));
        }
        let mut label = KeyBits::empty();
        for _ in 0..n {
            label.push(slice.fetch_bit()?);
        }
        Ok(label)
    } else {
        // hml_same$11 one repeated bit.
        let bit = slice.fetch_bit()?;
        let n = slice.fetch_u64(len_bits)? as usize;
        if n > max_len {
            return Err(CellError::parser_error("dictionary label is too long"));
        }
        let mut label = KeyBits::empty();
        for _ in 0..n {
            label.push(bit);
        }
        Ok(label)
    }
}

/// Writes `label` in its cheapest encoding.
fn write_label(
    builder: &mut CellBuilder,
    label: &KeyBits,
    max_len: usize,
) -> Result<(), CellError> {
    let n = label.len();
    let len_bits = bits_for(max_len);
    let same_bit = n > 0 && (0..n).all(|i| label.bit(i) == label.bit(0));

    let short_cost = 1 + n + 1 + n;
    let long_cost = 2 + len_bits + n;
    let same_cost = 3 + 1 + len_bits;

    if same_bit && same_cost <= short_cost && same_cost <= long_cost {
        builder.store_u8(3, 0b110)?;
        builder.store_bit(label.bit(0))?;
        builder.store_u64(len_bits, n as u64)?;
    } else if short_cost <= long_cost {
        builder.store_bit(false)?;
        for _ in 0..n {
            builder.store_bit(true)?;
        }
        builder.store_bit(false)?;
        for i in 0..n {
            builder.store_bit(label.bit(i))?;
        }
    } else {
        builder.store_u8(2, 0b10)?;
        builder.store_u64(len_bits, n as u64)?;
        for i in 0..n {
            builder.store_bit(label.bit(i))?;
        }
    }
    Ok(())
}

/// Bits needed to encode a length in `0..=max_len`.
fn bits_for(max_len: usize) -> usize {
    let mut bits = 0;
    while 1usize << bits <= max_len {
        bits += 1;
    }
    bits
}

fn node_slice(cell: &ArcCell) -> Result<OwnedCellSlice, CellError> {
    OwnedCellSlice::new(cell.clone())
}

/// Builds one node: label, then value or children.
fn build_node(
    label: &KeyBits,
    max_len: usize,
    payload: NodePayload,
) -> Result<ArcCell, CellError> {
    let mut builder = CellBuilder::new();
    write_label(&mut builder, label, max_len)?;
    match payload {
        NodePayload::Value(value) => value.store_into(&mut builder)?,
        NodePayload::Fork(left, right) => {
            builder.store_reference(&left)?;
            builder.store_reference(&right)?;
        }
    }
    Ok(builder.build()?.to_arc())
}

enum NodePayload {
    Value(DictValue),
    Fork(ArcCell, ArcCell),
}

pub fn dict_get(
    root: Option<&ArcCell>,
    key: &KeyBits,
) -> Result<Option<OwnedCellSlice>, CellError> {
    let Some(mut cell) = root.cloned() else {
        return Ok(None);
    };
    let mut remaining = key.clone();
    loop {
        let mut slice = node_slice(&cell)?;
        let label = read_label(&mut slice, remaining.len())?;
        if label.len() > remaining.len() || label.common_prefix_len(&remaining) < label.len() {
            return Ok(None);
        }
        if label.len() == remaining.len() {
            return Ok(Some(slice));
        }
        let branch = remaining.bit(label.len());
        remaining = remaining.slice_from(label.len() + 1);
        cell = slice.prefetch_ref_at(branch as usize)?;
    }
}

pub fn dict_set(
    root: Option<&ArcCell>,
    key: &KeyBits,
    value: &DictValue,
    mode: SetMode,
) -> Result<(Option<ArcCell>, bool), CellError> {
    match set_node(root, key, value, mode)? {
        Some(new_root) => Ok((Some(new_root), true)),
        None => Ok((root.cloned(), false)),
    }
}

/// Returns the new subtree root, or `None` when nothing changed.
fn set_node(
    node: Option<&ArcCell>,
    key: &KeyBits,
    value: &DictValue,
    mode: SetMode,
) -> Result<Option<ArcCell>, CellError> {
    let Some(cell) = node else {
        if mode == SetMode::Replace {
            return Ok(None);
        }
        return Ok(Some(build_node(
            key,
            key.len(),
            NodePayload::Value(value.clone()),
        )?));
    };

    let mut slice = node_slice(cell)?;
    let label = read_label(&mut slice, key.len())?;
    let common = label.common_prefix_len(key);

    if common == label.len() && label.len() == key.len() {
        // Exact hit.
        if mode == SetMode::Add {
            return Ok(None);
        }
        return Ok(Some(build_node(
            key,
            key.len(),
            NodePayload::Value(value.clone()),
        )?));
    }

    if common == label.len() {
        // The label is a proper prefix; descend.
        let branch = key.bit(common);
        let rest = key.slice_from(common + 1);
        let left = slice.prefetch_ref_at(0)?;
        let right = slice.prefetch_ref_at(1)?;
        let child = if branch { &right } else { &left };
        let Some(new_child) = set_node(Some(child), &rest, value, mode)? else {
            return Ok(None);
        };
        let (new_left, new_right) = if branch {
            (left, new_child)
        } else {
            (new_child, right)
        };
        return Ok(Some(build_node(
            &label,
            key.len(),
            NodePayload::Fork(new_left, new_right),
        )?));
    }

    // Keys diverge inside the label; fork at the common prefix.
    if mode == SetMode::Replace {
        return Ok(None);
    }
    let mut shared = KeyBits::empty();
    for i in 0..common {
        shared.push(label.bit(i));
    }
    let old_branch = label.bit(common);
    let child_max = key.len() - common - 1;

    // Rebuild the existing subtree one level down with its shortened label.
    let old_rest = label.slice_from(common + 1);
    let mut old_builder = CellBuilder::new();
    write_label(&mut old_builder, &old_rest, child_max)?;
    old_builder.store_slice(&slice)?;
    let old_child = old_builder.build()?.to_arc();

    let new_rest = key.slice_from(common + 1);
    let new_child = build_node(&new_rest, child_max, NodePayload::Value(value.clone()))?;

    let (left, right) = if old_branch {
        (new_child, old_child)
    } else {
        (old_child, new_child)
    };
    Ok(Some(build_node(
        &shared,
        key.len(),
        NodePayload::Fork(left, right),
    )?))
}

pub fn dict_delete(
    root: Option<&ArcCell>,
    key: &KeyBits,
) -> Result<(Option<ArcCell>, Option<OwnedCellSlice>), CellError> {
    let Some(cell) = root else {
        return Ok((None, None));
    };
    match delete_node(cell, key)? {
        None => Ok((Some(cell.clone()), None)),
        Some((new_node, old_value)) => Ok((new_node, Some(old_value))),
    }
}

/// `None` when the key is absent; otherwise the replacement subtree (possibly
/// empty) and the removed value.
#[allow(clippy::type_complexity)]
fn delete_node(
    cell: &ArcCell,
    key: &KeyBits,
) -> Result<Option<(Option<ArcCell>, OwnedCellSlice)>, CellError> {
    let mut slice = node_slice(cell)?;
    let label = read_label(&mut slice, key.len())?;
    let common = label.common_prefix_len(key);
    if common < label.len() {
        return Ok(None);
    }
    if label.len() == key.len() {
        return Ok(Some((None, slice)));
    }

    let branch = key.bit(label.len());
    let rest = key.slice_from(label.len() + 1);
    let left = slice.prefetch_ref_at(0)?;
    let right = slice.prefetch_ref_at(1)?;
    let child = if branch { &right } else { &left };
    let Some((new_child, old_value)) = delete_node(child, &rest)? else {
        return Ok(None);
    };

    let child_max = rest.len();
    let new_node = match new_child {
        Some(new_child) => {
            let (l, r) = if branch {
                (left, new_child)
            } else {
                (new_child, right)
            };
            build_node(&label, key.len(), NodePayload::Fork(l, r))?
        }
        None => {
            // One branch vanished: pull the sibling up, fusing labels.
            let sibling = if branch { left } else { right };
            let mut sibling_slice = node_slice(&sibling)?;
            let sibling_label = read_label(&mut sibling_slice, child_max)?;
            let mut fused = label.clone();
            fused.push(!branch);
            fused.append(&sibling_label);
            let mut builder = CellBuilder::new();
            write_label(&mut builder, &fused, key.len())?;
            builder.store_slice(&sibling_slice)?;
            builder.build()?.to_arc()
        }
    };
    Ok(Some((Some(new_node), old_value)))
}

/// Smallest (or largest) key in the dictionary.
///
/// `invert_first` flips the branch taken for the very first key bit, which
/// turns unsigned order into two's-complement signed order.
pub fn dict_min(
    root: Option<&ArcCell>,
    key_len: usize,
    largest: bool,
    invert_first: bool,
) -> Result<Option<(KeyBits, OwnedCellSlice)>, CellError> {
    let Some(mut cell) = root.cloned() else {
        return Ok(None);
    };
    let mut key = KeyBits::empty();
    loop {
        let mut slice = node_slice(&cell)?;
        let label = read_label(&mut slice, key_len - key.len())?;
        key.append(&label);
        if key.len() == key_len {
            return Ok(Some((key, slice)));
        }
        let at_first_bit = key.len() == 0;
        let branch = largest != (invert_first && at_first_bit);
        key.push(branch);
        cell = slice.prefetch_ref_at(branch as usize)?;
    }
}

/// Visits every entry in key order; the callback returns `false` to stop.
/// Returns `true` when the whole dictionary was visited.
pub fn dict_foreach<F>(
    root: Option<&ArcCell>,
    key_len: usize,
    reverse: bool,
    f: &mut F,
) -> Result<bool, CellError>
where
    F: FnMut(&KeyBits, OwnedCellSlice) -> Result<bool, CellError>,
{
    let Some(cell) = root else {
        return Ok(true);
    };
    foreach_node(cell, key_len, &KeyBits::empty(), reverse, f)
}

fn foreach_node<F>(
    cell: &ArcCell,
    key_len: usize,
    prefix: &KeyBits,
    reverse: bool,
    f: &mut F,
) -> Result<bool, CellError>
where
    F: FnMut(&KeyBits, OwnedCellSlice) -> Result<bool, CellError>,
{
    let mut slice = node_slice(cell)?;
    let label = read_label(&mut slice, key_len - prefix.len())?;
    let mut key = prefix.clone();
    key.append(&label);
    if key.len() == key_len {
        return f(&key, slice);
    }
    let order = if reverse { [true, false] } else { [false, true] };
    for branch in order {
        let child = slice.prefetch_ref_at(branch as usize)?;
        let mut child_prefix = key.clone();
        child_prefix.push(branch);
        if !foreach_node(&child, key_len, &child_prefix, reverse, f)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Smallest stored key strictly greater than `key` (or mirrored); signed
/// order when `invert_first`. Scans in key order.
pub fn dict_next(
    root: Option<&ArcCell>,
    key_len: usize,
    key: &KeyBits,
    towards_max: bool,
    allow_eq: bool,
    invert_first: bool,
) -> Result<Option<(KeyBits, OwnedCellSlice)>, CellError> {
    let pivot = key.to_int(invert_first);
    let mut best: Option<(BigInt, KeyBits, OwnedCellSlice)> = None;
    dict_foreach(root, key_len, false, &mut |k, v| {
        let candidate = k.to_int(invert_first);
        let fits = if towards_max {
            candidate > pivot || (allow_eq && candidate == pivot)
        } else {
            candidate < pivot || (allow_eq && candidate == pivot)
        };
        if fits {
            let better = match &best {
                None => true,
                Some((b, _, _)) => {
                    if towards_max {
                        candidate < *b
                    } else {
                        candidate > *b
                    }
                }
            };
            if better {
                best = Some((candidate, k.clone(), v));
            }
        }
        Ok(true)
    })?;
    Ok(best.map(|(_, k, v)| (k, v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellBuilder;

    fn val(n: u64) -> DictValue {
        let mut b = CellBuilder::new();
        b.store_u64(32, n).unwrap();
        DictValue::Slice(OwnedCellSlice::new(b.build().unwrap().to_arc()).unwrap())
    }

    fn key(n: i64, bits: usize) -> KeyBits {
        KeyBits::from_int(&BigInt::from(n), bits, true).unwrap()
    }

    fn get_u32(root: Option<&ArcCell>, k: &KeyBits) -> Option<u64> {
        dict_get(root, k)
            .unwrap()
            .map(|mut s| s.fetch_u64(32).unwrap())
    }

    #[test]
    fn set_get_delete() -> Result<(), CellError> {
        let mut root: Option<ArcCell> = None;
        for (k, v) in [(5i64, 50u64), (-3, 30), (7, 70), (0, 1)] {
            let (new_root, changed) = dict_set(root.as_ref(), &key(k, 16), &val(v), SetMode::Set)?;
            assert!(changed);
            root = new_root;
        }
        assert_eq!(get_u32(root.as_ref(), &key(5, 16)), Some(50));
        assert_eq!(get_u32(root.as_ref(), &key(-3, 16)), Some(30));
        assert_eq!(get_u32(root.as_ref(), &key(9, 16)), None);

        let (root_after, old) = dict_delete(root.as_ref(), &key(5, 16))?;
        assert_eq!(old.map(|mut s| s.fetch_u64(32).unwrap()), Some(50));
        assert_eq!(get_u32(root_after.as_ref(), &key(5, 16)), None);
        assert_eq!(get_u32(root_after.as_ref(), &key(-3, 16)), Some(30));

        let (root_miss, old) = dict_delete(root_after.as_ref(), &key(5, 16))?;
        assert!(old.is_none());
        assert!(root_miss.is_some());
        Ok(())
    }

    #[test]
    fn add_and_replace_modes() -> Result<(), CellError> {
        let (root, _) = dict_set(None, &key(1, 8), &val(10), SetMode::Set)?;
        let (_, changed) = dict_set(root.as_ref(), &key(1, 8), &val(11), SetMode::Add)?;
        assert!(!changed);
        let (_, changed) = dict_set(root.as_ref(), &key(2, 8), &val(20), SetMode::Replace)?;
        assert!(!changed);
        let (root2, changed) = dict_set(root.as_ref(), &key(1, 8), &val(11), SetMode::Replace)?;
        assert!(changed);
        assert_eq!(get_u32(root2.as_ref(), &key(1, 8)), Some(11));
        Ok(())
    }

    #[test]
    fn min_max_signed_and_unsigned() -> Result<(), CellError> {
        let mut root: Option<ArcCell> = None;
        for k in [3i64, -7, 12, 0] {
            root = dict_set(root.as_ref(), &key(k, 8), &val(k.unsigned_abs()), SetMode::Set)?.0;
        }
        // Unsigned order: -7 is 0xF9, the largest bit pattern.
        let (min_u, _) = dict_min(root.as_ref(), 8, false, false)?.unwrap();
        assert_eq!(min_u.to_int(false), BigInt::from(0));
        let (max_u, _) = dict_min(root.as_ref(), 8, true, false)?.unwrap();
        assert_eq!(max_u.to_int(true), BigInt::from(-7));
        // Signed order.
        let (min_s, _) = dict_min(root.as_ref(), 8, false, true)?.unwrap();
        assert_eq!(min_s.to_int(true), BigInt::from(-7));
        let (max_s, _) = dict_min(root.as_ref(), 8, true, true)?.unwrap();
        assert_eq!(max_s.to_int(true), BigInt::from(12));
        Ok(())
    }

    #[test]
    fn next_prev() -> Result<(), CellError> {
        let mut root: Option<ArcCell> = None;
        for k in [2i64, 5, 9] {
            root = dict_set(root.as_ref(), &key(k, 8), &val(k as u64), SetMode::Set)?.0;
        }
        let (k, _) = dict_next(root.as_ref(), 8, &key(5, 8), true, false, true)?.unwrap();
        assert_eq!(k.to_int(true), BigInt::from(9));
        let (k, _) = dict_next(root.as_ref(), 8, &key(5, 8), true, true, true)?.unwrap();
        assert_eq!(k.to_int(true), BigInt::from(5));
        let (k, _) = dict_next(root.as_ref(), 8, &key(5, 8), false, false, true)?.unwrap();
        assert_eq!(k.to_int(true), BigInt::from(2));
        assert!(dict_next(root.as_ref(), 8, &key(9, 8), true, false, true)?.is_none());
        Ok(())
    }

    #[test]
    fn foreach_visits_in_order() -> Result<(), CellError> {
        let mut root: Option<ArcCell> = None;
        for k in [200i64 - 256, 1, 77] {
            root = dict_set(
                root.as_ref(),
                &key(k, 8),
                &val((k & 0xFF) as u64),
                SetMode::Set,
            )?
            .0;
        }
        let mut seen = vec![];
        dict_foreach(root.as_ref(), 8, false, &mut |k, _| {
            seen.push(k.to_int(false));
            Ok(true)
        })?;
        assert_eq!(
            seen,
            vec![BigInt::from(1), BigInt::from(77), BigInt::from(200)]
        );
        Ok(())
    }

    #[test]
    fn ref_values() -> Result<(), CellError> {
        let payload = CellBuilder::new().store_u64(8, 0xAA)?.build()?.to_arc();
        let (root, _) = dict_set(
            None,
            &key(4, 8),
            &DictValue::CellRef(payload.clone()),
            SetMode::Set,
        )?;
        let slice = dict_get(root.as_ref(), &key(4, 8))?.unwrap();
        assert_eq!(slice.remaining_bits(), 0);
        assert_eq!(slice.prefetch_ref()?.repr_hash(), payload.repr_hash());
        Ok(())
    }
}
