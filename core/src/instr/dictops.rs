use crate::cell::dict::{
    dict_delete, dict_foreach, dict_get, dict_min, dict_next, dict_set, DictValue, KeyBits,
    SetMode,
};
use crate::cell::{ArcCell, CellBuilder, OwnedCellSlice};
use crate::dispatch::{mkfixedrange, mksimple, OpcodeTable};
use crate::error::{as_dict_error, VmError, VmResult};
use crate::stack::StackValue;
use crate::vm::VmState;

/// Key flavour of a dictionary opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Slice,
    Int,
    Uint,
}

/// Decodes the opcode grid shared by the get/set/replace/add/delete
/// families: stride 2 per key kind, +1 for the by-reference variant.
fn grid(selector: u32) -> (KeyKind, bool) {
    let kind = match selector >> 1 {
        0 => KeyKind::Slice,
        1 => KeyKind::Int,
        _ => KeyKind::Uint,
    };
    (kind, selector & 1 != 0)
}

fn pop_key(st: &mut VmState, kind: KeyKind, key_len: usize) -> VmResult<KeyBits> {
    match kind {
        KeyKind::Slice => {
            let mut slice = st.stack.pop_slice()?;
            if slice.remaining_bits() < key_len {
                return Err(VmError::cell_und("dictionary key slice is too short"));
            }
            Ok(KeyBits::new(slice.fetch_bits(key_len)?, key_len))
        }
        KeyKind::Int => {
            let x = st.stack.pop_finite()?;
            KeyBits::from_int(x.finite()?, key_len, true)
                .ok_or_else(|| VmError::range_chk(format!("key {x} does not fit {key_len} bits")))
        }
        KeyKind::Uint => {
            let x = st.stack.pop_finite()?;
            KeyBits::from_int(x.finite()?, key_len, false)
                .ok_or_else(|| VmError::range_chk(format!("key {x} does not fit {key_len} bits")))
        }
    }
}

fn push_key(st: &mut VmState, kind: KeyKind, key: &KeyBits) -> VmResult<()> {
    match kind {
        KeyKind::Slice => {
            let mut builder = CellBuilder::new();
            builder
                .store_bits(key.len(), key.data())
                .map_err(as_dict_error)?;
            let cell = builder.build().map_err(as_dict_error)?.to_arc();
            st.stack
                .push_slice(OwnedCellSlice::new(cell).map_err(as_dict_error)?);
        }
        KeyKind::Int => st.stack.push_int(key.to_int(true)),
        KeyKind::Uint => st.stack.push_int(key.to_int(false)),
    }
    Ok(())
}

fn pop_dict_root(st: &mut VmState) -> VmResult<(Option<ArcCell>, usize)> {
    let key_len = st.stack.pop_smallint_range(1023)? as usize;
    let root = st.stack.pop_maybe_cell()?;
    if let Some(root) = &root {
        st.register_cell_load(root.repr_hash())?;
    }
    Ok((root, key_len))
}

fn push_maybe_root(st: &mut VmState, root: Option<ArcCell>) {
    match root {
        Some(cell) => st.stack.push_cell(cell),
        None => st.stack.push(StackValue::Null),
    }
}

/// Extracts the value for a by-reference variant: the payload must be a
/// single reference with no data bits.
fn value_as_ref(value: &OwnedCellSlice) -> VmResult<ArcCell> {
    if value.remaining_bits() != 0 || value.remaining_refs() != 1 {
        return Err(VmError::dict_err("dictionary value is not a plain reference"));
    }
    Ok(value.prefetch_ref().map_err(as_dict_error)?)
}

fn exec_dictget(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let (kind, by_ref) = grid(opc & 0x7);
    let (root, key_len) = pop_dict_root(st)?;
    let key = pop_key(st, kind, key_len)?;
    match dict_get(root.as_ref(), &key).map_err(as_dict_error)? {
        Some(value) => {
            if by_ref {
                st.stack.push_cell(value_as_ref(&value)?);
            } else {
                st.stack.push_slice(value);
            }
            st.stack.push_bool(true);
        }
        None => st.stack.push_bool(false),
    }
    Ok(None)
}

fn exec_dictset(st: &mut VmState, opc: u32, mode: SetMode) -> VmResult<Option<i32>> {
    let (kind, by_ref) = grid(opc & 0x7);
    let (root, key_len) = pop_dict_root(st)?;
    let key = pop_key(st, kind, key_len)?;
    let value = if by_ref {
        DictValue::CellRef(st.stack.pop_cell()?)
    } else {
        DictValue::Slice(st.stack.pop_slice()?)
    };
    let (new_root, changed) =
        dict_set(root.as_ref(), &key, &value, mode).map_err(as_dict_error)?;
    if changed {
        st.register_cell_create()?;
    }
    push_maybe_root(st, new_root);
    if mode != SetMode::Set {
        st.stack.push_bool(changed);
    }
    Ok(None)
}

/// Delete grid: stride 2 per key kind, +1 returns the removed value.
fn exec_dictdel(st: &mut VmState, selector: u32) -> VmResult<Option<i32>> {
    let kind = match selector >> 1 {
        0 => KeyKind::Slice,
        1 => KeyKind::Int,
        _ => KeyKind::Uint,
    };
    let return_value = selector & 1 != 0;
    let (root, key_len) = pop_dict_root(st)?;
    let key = pop_key(st, kind, key_len)?;
    let (new_root, old) = dict_delete(root.as_ref(), &key).map_err(as_dict_error)?;
    push_maybe_root(st, new_root);
    match old {
        Some(value) => {
            if return_value {
                st.stack.push_slice(value);
            }
            st.stack.push_bool(true);
        }
        None => st.stack.push_bool(false),
    }
    Ok(None)
}

fn exec_dictmin(st: &mut VmState, opc: u32, largest: bool) -> VmResult<Option<i32>> {
    let (kind, by_ref) = grid(opc & 0x7);
    let (root, key_len) = pop_dict_root(st)?;
    let signed = kind == KeyKind::Int;
    match dict_min(root.as_ref(), key_len, largest, signed).map_err(as_dict_error)? {
        Some((key, value)) => {
            if by_ref {
                st.stack.push_cell(value_as_ref(&value)?);
            } else {
                st.stack.push_slice(value);
            }
            push_key(st, kind, &key)?;
            st.stack.push_bool(true);
        }
        None => st.stack.push_bool(false),
    }
    Ok(None)
}

fn exec_dictgetnear(
    st: &mut VmState,
    kind: KeyKind,
    towards_max: bool,
    allow_eq: bool,
) -> VmResult<Option<i32>> {
    let (root, key_len) = pop_dict_root(st)?;
    let pivot = match kind {
        KeyKind::Int => {
            let x = st.stack.pop_finite()?;
            // Out-of-range pivots clamp to the domain edge.
            KeyBits::from_int(x.finite()?, key_len, true)
        }
        _ => {
            let x = st.stack.pop_finite()?;
            KeyBits::from_int(x.finite()?, key_len, false)
        }
    };
    let Some(pivot) = pivot else {
        return Err(VmError::range_chk("search key out of range"));
    };
    let signed = kind == KeyKind::Int;
    match dict_next(root.as_ref(), key_len, &pivot, towards_max, allow_eq, signed)
        .map_err(as_dict_error)?
    {
        Some((key, value)) => {
            st.stack.push_slice(value);
            push_key(st, kind, &key)?;
            st.stack.push_bool(true);
        }
        None => st.stack.push_bool(false),
    }
    Ok(None)
}

/// `DICTIGETJMP` / `DICTIGETEXEC` and unsigned forms: look the key up and
/// transfer control to the value as a continuation; absent keys fall
/// through.
fn exec_dictgetjmp(st: &mut VmState, kind: KeyKind, call: bool) -> VmResult<Option<i32>> {
    let (root, key_len) = pop_dict_root(st)?;
    let idx = st.stack.pop_finite()?;
    let signed = kind == KeyKind::Int;
    let Some(key) = KeyBits::from_int(idx.finite()?, key_len, signed) else {
        return Ok(None);
    };
    match dict_get(root.as_ref(), &key).map_err(as_dict_error)? {
        Some(value) => {
            let cont = crate::cont::Continuation::ordinary(value, st.cp());
            if call {
                st.call(cont)
            } else {
                st.jump(cont)
            }
        }
        None => Ok(None),
    }
}

fn exec_stdict(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let builder = st.stack.pop_builder()?;
    let root = st.stack.pop_maybe_cell()?;
    let mut fork = super::cellops::builder_mut(builder);
    match root {
        Some(cell) => {
            fork.store_bit(true).map_err(as_dict_error)?;
            fork.store_reference(&cell).map_err(as_dict_error)?;
        }
        None => {
            fork.store_bit(false).map_err(as_dict_error)?;
        }
    }
    st.stack.push_builder(fork);
    Ok(None)
}

fn exec_lddict(st: &mut VmState, prefetch: bool) -> VmResult<Option<i32>> {
    let mut slice = st.stack.pop_slice()?;
    let root = if slice.fetch_bit()? {
        Some(slice.fetch_ref()?)
    } else {
        None
    };
    push_maybe_root(st, root);
    if !prefetch {
        st.stack.push_slice(slice);
    }
    Ok(None)
}

fn exec_skipdict(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let mut slice = st.stack.pop_slice()?;
    if slice.fetch_bit()? {
        slice.skip_refs(1)?;
    }
    st.stack.push_slice(slice);
    Ok(None)
}

/// Longest stored key that is a prefix of the given slice.
fn exec_pfxdictget(st: &mut VmState, quiet: bool) -> VmResult<Option<i32>> {
    let (root, key_len) = pop_dict_root(st)?;
    let slice = st.stack.pop_slice()?;
    let probe_bits = slice.remaining_bits().min(key_len);
    let probe = KeyBits::new(
        slice.prefetch_bits(probe_bits).map_err(as_dict_error)?,
        probe_bits,
    );

    let mut best: Option<(KeyBits, OwnedCellSlice)> = None;
    dict_foreach(root.as_ref(), key_len, false, &mut |key, value| {
        let matches = key.len() <= probe.len()
            && (0..key.len()).all(|i| key.bit(i) == probe.bit(i));
        if matches {
            let better = best
                .as_ref()
                .map(|(b, _)| key.len() > b.len())
                .unwrap_or(true);
            if better {
                best = Some((key.clone(), value));
            }
        }
        Ok(true)
    })
    .map_err(as_dict_error)?;

    match best {
        Some((key, value)) => {
            let mut rest = slice;
            rest.skip_bits(key.len())?;
            push_key(st, KeyKind::Slice, &key)?;
            st.stack.push_slice(value);
            st.stack.push_slice(rest);
            st.stack.push_bool(true);
        }
        None => {
            if !quiet {
                return Err(VmError::dict_err("no prefix of the slice is in the dictionary"));
            }
            st.stack.push_slice(slice);
            st.stack.push_bool(false);
        }
    }
    Ok(None)
}

pub fn register(t: &mut OpcodeTable) {
    t.insert(mksimple(0xF400, 16, "STDICT", exec_stdict));
    t.insert(mksimple(0xF401, 16, "SKIPDICT", exec_skipdict));
    t.insert(mksimple(0xF404, 16, "LDDICT", |st, _| exec_lddict(st, false)));
    t.insert(mksimple(0xF405, 16, "PLDDICT", |st, _| exec_lddict(st, true)));

    t.insert(mkfixedrange(0xF40A, 0xF410, 16, "DICTGET", |st, opc| {
        exec_dictget(st, opc - 0xA)
    }));
    t.insert(mkfixedrange(0xF412, 0xF418, 16, "DICTSET", |st, opc| {
        exec_dictset(st, opc - 0x2, SetMode::Set)
    }));
    t.insert(mkfixedrange(0xF422, 0xF428, 16, "DICTREPLACE", |st, opc| {
        exec_dictset(st, opc - 0x2, SetMode::Replace)
    }));
    t.insert(mkfixedrange(0xF432, 0xF438, 16, "DICTADD", |st, opc| {
        exec_dictset(st, opc - 0x2, SetMode::Add)
    }));
    t.insert(mkfixedrange(0xF450, 0xF456, 16, "DICTDEL", |st, opc| {
        exec_dictdel(st, opc & 0x7)
    }));

    t.insert(mksimple(0xF460, 16, "DICTIGETNEXT", |st, _| {
        exec_dictgetnear(st, KeyKind::Int, true, false)
    }));
    t.insert(mksimple(0xF461, 16, "DICTIGETNEXTEQ", |st, _| {
        exec_dictgetnear(st, KeyKind::Int, true, true)
    }));
    t.insert(mksimple(0xF462, 16, "DICTIGETPREV", |st, _| {
        exec_dictgetnear(st, KeyKind::Int, false, false)
    }));
    t.insert(mksimple(0xF463, 16, "DICTIGETPREVEQ", |st, _| {
        exec_dictgetnear(st, KeyKind::Int, false, true)
    }));
    t.insert(mksimple(0xF464, 16, "DICTUGETNEXT", |st, _| {
        exec_dictgetnear(st, KeyKind::Uint, true, false)
    }));
    t.insert(mksimple(0xF465, 16, "DICTUGETNEXTEQ", |st, _| {
        exec_dictgetnear(st, KeyKind::Uint, true, true)
    }));
    t.insert(mksimple(0xF466, 16, "DICTUGETPREV", |st, _| {
        exec_dictgetnear(st, KeyKind::Uint, false, false)
    }));
    t.insert(mksimple(0xF467, 16, "DICTUGETPREVEQ", |st, _| {
        exec_dictgetnear(st, KeyKind::Uint, false, true)
    }));

    t.insert(mkfixedrange(0xF470, 0xF476, 16, "DICTMIN", |st, opc| {
        exec_dictmin(st, opc, false)
    }));
    t.insert(mkfixedrange(0xF478, 0xF47E, 16, "DICTMAX", |st, opc| {
        exec_dictmin(st, opc, true)
    }));

    t.insert(mksimple(0xF4A0, 16, "DICTIGETJMP", |st, _| {
        exec_dictgetjmp(st, KeyKind::Int, false)
    }));
    t.insert(mksimple(0xF4A1, 16, "DICTUGETJMP", |st, _| {
        exec_dictgetjmp(st, KeyKind::Uint, false)
    }));
    t.insert(mksimple(0xF4A2, 16, "DICTIGETEXEC", |st, _| {
        exec_dictgetjmp(st, KeyKind::Int, true)
    }));
    t.insert(mksimple(0xF4A3, 16, "DICTUGETEXEC", |st, _| {
        exec_dictgetjmp(st, KeyKind::Uint, true)
    }));

    t.insert(mksimple(0xF4B0, 16, "PFXDICTGETQ", |st, _| {
        exec_pfxdictget(st, true)
    }));
    t.insert(mksimple(0xF4B1, 16, "PFXDICTGET", |st, _| {
        exec_pfxdictget(st, false)
    }));
}
