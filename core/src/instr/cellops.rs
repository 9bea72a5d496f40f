use std::collections::HashSet;
use std::sync::Arc;

use num_bigint::{BigInt, BigUint, Sign};

use crate::cell::{ArcCell, CellBuilder, OwnedCellSlice};
use crate::cont::Continuation;
use crate::dispatch::{mkext, mkfixed, mkfixedrange, mksimple, OpcodeTable};
use crate::error::{Excno, VmError, VmResult};
use crate::stack::StackValue;
use crate::vm::VmState;

/// Forks a shared builder for mutation; clones only when it is aliased.
pub(crate) fn builder_mut(builder: Arc<CellBuilder>) -> CellBuilder {
    Arc::try_unwrap(builder).unwrap_or_else(|shared| (*shared).clone())
}

fn finalize(st: &mut VmState, builder: &CellBuilder) -> VmResult<ArcCell> {
    st.register_cell_create()?;
    Ok(builder
        .build()
        .map_err(|e| VmError::new(Excno::CellOverflow, e.to_string()))?
        .to_arc())
}

/// Reads a completion-tagged literal: the payload is the bits before the
/// last set bit of the stored window.
fn fetch_tagged_slice(st: &mut VmState, bits: usize, refs: usize) -> VmResult<OwnedCellSlice> {
    let window = st.code().fetch_subslice(bits, refs)?;
    let raw = window.prefetch_bits(window.remaining_bits())?;
    let payload_bits = (0..window.remaining_bits())
        .rev()
        .find(|&i| crate::cell::util::get_bit(&raw, i))
        .ok_or_else(|| VmError::inv_opcode("slice literal has no completion tag"))?;
    let mut payload = window;
    payload.only_first(payload_bits, refs)?;
    Ok(payload)
}

fn exec_pushref(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cell = st.code().fetch_ref()?;
    st.stack.push_cell(cell);
    Ok(None)
}

fn exec_pushrefslice(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cell = st.code().fetch_ref()?;
    let slice = st.convert_code_cell(cell)?;
    st.stack.push_slice(slice);
    Ok(None)
}

fn exec_pushrefcont(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cell = st.code().fetch_ref()?;
    let cont = st.ref_to_cont(cell)?;
    st.stack.push_cont(cont);
    Ok(None)
}

fn exec_pushslice_short(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let x = (opc & 0xF) as usize;
    let slice = fetch_tagged_slice(st, 8 * x + 4, 0)?;
    st.stack.push_slice(slice);
    Ok(None)
}

fn exec_pushslice_refs(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let refs = ((opc >> 5) & 0b11) as usize;
    let x = (opc & 0x1F) as usize;
    let slice = fetch_tagged_slice(st, 8 * x + 4, refs)?;
    st.stack.push_slice(slice);
    Ok(None)
}

fn exec_pushcont_short(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let bytes = (opc & 0xF) as usize;
    let code = st.code().fetch_subslice(bytes * 8, 0)?;
    st.stack.push_cont(Continuation::ordinary(code, st.cp()));
    Ok(None)
}

fn exec_pushcont(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let refs = ((opc >> 7) & 0b11) as usize;
    let bytes = (opc & 0x7F) as usize;
    let code = st.code().fetch_subslice(bytes * 8, refs)?;
    st.stack.push_cont(Continuation::ordinary(code, st.cp()));
    Ok(None)
}

fn exec_newc(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    st.stack.push_builder(CellBuilder::new());
    Ok(None)
}

fn exec_endc(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let builder = st.stack.pop_builder()?;
    let cell = finalize(st, &builder)?;
    st.stack.push_cell(cell);
    Ok(None)
}

fn store_int_impl(st: &mut VmState, bits: usize, signed: bool, quiet: bool) -> VmResult<Option<i32>> {
    let builder = st.stack.pop_builder()?;
    let x = st.stack.pop_int()?;
    let fits = if signed {
        x.signed_fits(bits as u64)
    } else {
        x.unsigned_fits(bits as u64)
    };
    if !fits {
        if quiet {
            st.stack.push_int(x);
            st.stack.push(StackValue::Builder(builder));
            st.stack.push_int(1i64);
            return Ok(None);
        }
        return Err(VmError::range_chk(format!(
            "{x} does not fit in {bits} {} bits",
            if signed { "signed" } else { "unsigned" }
        )));
    }
    let mut fork = builder_mut(builder);
    let value = x.into_finite()?;
    let stored = if signed {
        fork.store_int(bits, &value)
    } else {
        fork.store_uint(bits, &value.to_biguint().expect("checked non-negative"))
    };
    match stored {
        Ok(_) => {
            st.stack.push_builder(fork);
            if quiet {
                st.stack.push_int(0i64);
            }
            Ok(None)
        }
        Err(e) => Err(VmError::new(Excno::CellOverflow, e.to_string())),
    }
}

fn exec_sti(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    store_int_impl(st, (opc & 0xFF) as usize + 1, true, false)
}

fn exec_stu(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    store_int_impl(st, (opc & 0xFF) as usize + 1, false, false)
}

fn exec_stix(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let bits = st.stack.pop_int_range(0, 1023)? as usize;
    store_int_impl(st, bits, true, false)
}

fn exec_stux(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let bits = st.stack.pop_int_range(0, 1023)? as usize;
    store_int_impl(st, bits, false, false)
}

fn exec_stref(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let builder = st.stack.pop_builder()?;
    let cell = st.stack.pop_cell()?;
    let mut fork = builder_mut(builder);
    fork.store_reference(&cell)
        .map_err(|e| VmError::new(Excno::CellOverflow, e.to_string()))?;
    st.stack.push_builder(fork);
    Ok(None)
}

/// `STBREFR`: finalizes the top builder and stores it as a reference in the
/// builder below.
fn exec_stbrefr(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let inner = st.stack.pop_builder()?;
    let outer = st.stack.pop_builder()?;
    let cell = finalize(st, &inner)?;
    let mut fork = builder_mut(outer);
    fork.store_reference(&cell)
        .map_err(|e| VmError::new(Excno::CellOverflow, e.to_string()))?;
    st.stack.push_builder(fork);
    Ok(None)
}

fn exec_stbref(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let outer = st.stack.pop_builder()?;
    let inner = st.stack.pop_builder()?;
    let cell = finalize(st, &inner)?;
    let mut fork = builder_mut(outer);
    fork.store_reference(&cell)
        .map_err(|e| VmError::new(Excno::CellOverflow, e.to_string()))?;
    st.stack.push_builder(fork);
    Ok(None)
}

fn exec_stslice(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let builder = st.stack.pop_builder()?;
    let slice = st.stack.pop_slice()?;
    let mut fork = builder_mut(builder);
    fork.store_slice(&slice)
        .map_err(|e| VmError::new(Excno::CellOverflow, e.to_string()))?;
    st.stack.push_builder(fork);
    Ok(None)
}

fn exec_stb(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let outer = st.stack.pop_builder()?;
    let inner = st.stack.pop_builder()?;
    let mut fork = builder_mut(outer);
    fork.store_builder(&inner)
        .map_err(|e| VmError::new(Excno::CellOverflow, e.to_string()))?;
    st.stack.push_builder(fork);
    Ok(None)
}

fn store_le_impl(st: &mut VmState, bytes: usize, signed: bool) -> VmResult<Option<i32>> {
    let builder = st.stack.pop_builder()?;
    let x = st.stack.pop_finite()?;
    let bits = bytes as u64 * 8;
    let fits = if signed {
        x.signed_fits(bits)
    } else {
        x.unsigned_fits(bits)
    };
    if !fits {
        return Err(VmError::range_chk(format!("{x} does not fit in {bits} bits")));
    }
    let value = x.into_finite()?;
    let unsigned = if value.sign() == Sign::Minus {
        (value + (BigInt::from(1) << bits)).to_biguint().expect("wrapped")
    } else {
        value.to_biguint().expect("non-negative")
    };
    let mut le_bytes = unsigned.to_bytes_le();
    le_bytes.resize(bytes, 0);
    let mut fork = builder_mut(builder);
    fork.store_bytes(&le_bytes)
        .map_err(|e| VmError::new(Excno::CellOverflow, e.to_string()))?;
    st.stack.push_builder(fork);
    Ok(None)
}

fn builder_bits_refs(st: &mut VmState, bits: bool, refs: bool, remaining: bool) -> VmResult<Option<i32>> {
    let builder = st.stack.pop_builder()?;
    if bits {
        let val = if remaining {
            builder.remaining_bits()
        } else {
            builder.bits()
        };
        st.stack.push_int(val as i64);
    }
    if refs {
        let val = if remaining {
            builder.remaining_refs()
        } else {
            builder.refs()
        };
        st.stack.push_int(val as i64);
    }
    Ok(None)
}

fn exec_ctos(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cell = st.stack.pop_cell()?;
    let slice = st.convert_code_cell(cell)?;
    st.stack.push_slice(slice);
    Ok(None)
}

fn exec_ends(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let slice = st.stack.pop_slice()?;
    if !slice.is_empty() {
        return Err(VmError::cell_und(format!(
            "ENDS with {} bits and {} refs left",
            slice.remaining_bits(),
            slice.remaining_refs()
        )));
    }
    Ok(None)
}

fn load_int_impl(
    st: &mut VmState,
    bits: usize,
    signed: bool,
    prefetch: bool,
    quiet: bool,
) -> VmResult<Option<i32>> {
    let mut slice = st.stack.pop_slice()?;
    if slice.remaining_bits() < bits {
        if quiet {
            st.stack.push_slice(slice);
            st.stack.push_int(0i64);
            return Ok(None);
        }
        return Err(VmError::cell_und(format!(
            "cannot load {bits} bits from a slice of {}",
            slice.remaining_bits()
        )));
    }
    let value = if prefetch {
        if signed {
            slice.prefetch_int(bits)?
        } else {
            BigInt::from_biguint(Sign::Plus, slice.prefetch_uint(bits)?)
        }
    } else if signed {
        slice.fetch_int(bits)?
    } else {
        BigInt::from_biguint(Sign::Plus, slice.fetch_uint(bits)?)
    };
    st.stack.push_int(value);
    if !prefetch {
        st.stack.push_slice(slice);
    }
    if quiet {
        st.stack.push_int(-1i64);
    }
    Ok(None)
}

fn exec_ldi(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    load_int_impl(st, (opc & 0xFF) as usize + 1, true, false, false)
}

fn exec_ldu(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    load_int_impl(st, (opc & 0xFF) as usize + 1, false, false, false)
}

fn exec_ldref(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let mut slice = st.stack.pop_slice()?;
    let cell = slice.fetch_ref()?;
    st.stack.push_cell(cell);
    st.stack.push_slice(slice);
    Ok(None)
}

fn exec_ldrefrtos(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let mut slice = st.stack.pop_slice()?;
    let cell = slice.fetch_ref()?;
    let loaded = st.convert_code_cell(cell)?;
    st.stack.push_slice(slice);
    st.stack.push_slice(loaded);
    Ok(None)
}

fn exec_ldslice(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let bits = (opc & 0xFF) as usize + 1;
    let mut slice = st.stack.pop_slice()?;
    let sub = slice.fetch_subslice(bits, 0)?;
    st.stack.push_slice(sub);
    st.stack.push_slice(slice);
    Ok(None)
}

fn load_int_var(st: &mut VmState, signed: bool, prefetch: bool, quiet: bool) -> VmResult<Option<i32>> {
    let bits = st.stack.pop_int_range(0, if signed { 257 } else { 256 })? as usize;
    load_int_impl(st, bits, signed, prefetch, quiet)
}

fn exec_ldslicex(st: &mut VmState, prefetch: bool) -> VmResult<Option<i32>> {
    let bits = st.stack.pop_int_range(0, 1023)? as usize;
    let mut slice = st.stack.pop_slice()?;
    let sub = if prefetch {
        slice.prefetch_subslice(bits, 0)?
    } else {
        slice.fetch_subslice(bits, 0)?
    };
    st.stack.push_slice(sub);
    if !prefetch {
        st.stack.push_slice(slice);
    }
    Ok(None)
}

fn exec_sdcutfirst(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let bits = st.stack.pop_int_range(0, 1023)? as usize;
    let mut slice = st.stack.pop_slice()?;
    slice.only_first(bits, 0)?;
    st.stack.push_slice(slice);
    Ok(None)
}

fn exec_sdskipfirst(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let bits = st.stack.pop_int_range(0, 1023)? as usize;
    let mut slice = st.stack.pop_slice()?;
    slice.skip_bits(bits)?;
    st.stack.push_slice(slice);
    Ok(None)
}

fn exec_sdcutlast(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let bits = st.stack.pop_int_range(0, 1023)? as usize;
    let mut slice = st.stack.pop_slice()?;
    slice.only_last(bits, 0)?;
    st.stack.push_slice(slice);
    Ok(None)
}

fn exec_sdskiplast(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let bits = st.stack.pop_int_range(0, 1023)? as usize;
    let mut slice = st.stack.pop_slice()?;
    let keep = slice
        .remaining_bits()
        .checked_sub(bits)
        .ok_or_else(|| VmError::cell_und("SDSKIPLAST beyond slice size"))?;
    let refs = slice.remaining_refs();
    slice.only_first(keep, refs)?;
    st.stack.push_slice(slice);
    Ok(None)
}

fn exec_sdbeginsx(st: &mut VmState, quiet: bool) -> VmResult<Option<i32>> {
    let prefix = st.stack.pop_slice()?;
    let mut slice = st.stack.pop_slice()?;
    if slice.starts_with(&prefix) {
        slice.skip_bits(prefix.remaining_bits())?;
        st.stack.push_slice(slice);
        if quiet {
            st.stack.push_bool(true);
        }
    } else {
        if !quiet {
            return Err(VmError::cell_und("slice does not begin with the prefix"));
        }
        st.stack.push_slice(slice);
        st.stack.push_bool(false);
    }
    Ok(None)
}

fn exec_sempty(st: &mut VmState, data: bool, refs: bool) -> VmResult<Option<i32>> {
    let slice = st.stack.pop_slice()?;
    let empty = (!data || slice.is_data_empty()) && (!refs || slice.remaining_refs() == 0);
    st.stack.push_bool(empty);
    Ok(None)
}

fn exec_sbits(st: &mut VmState, bits: bool, refs: bool) -> VmResult<Option<i32>> {
    let slice = st.stack.pop_slice()?;
    if bits {
        st.stack.push_int(slice.remaining_bits() as i64);
    }
    if refs {
        st.stack.push_int(slice.remaining_refs() as i64);
    }
    Ok(None)
}

fn exec_pldref(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let slice = st.stack.pop_slice()?;
    let cell = slice.prefetch_ref()?;
    st.stack.push_cell(cell);
    Ok(None)
}

fn load_le_impl(st: &mut VmState, bytes: usize, signed: bool, prefetch: bool) -> VmResult<Option<i32>> {
    let mut slice = st.stack.pop_slice()?;
    let raw = if prefetch {
        let sub = slice.prefetch_subslice(bytes * 8, 0)?;
        sub.prefetch_bits(bytes * 8)?
    } else {
        slice.fetch_bytes(bytes)?
    };
    let unsigned = BigUint::from_bytes_le(&raw);
    let value = if signed && raw.last().map(|b| b & 0x80 != 0).unwrap_or(false) {
        BigInt::from_biguint(Sign::Plus, unsigned) - (BigInt::from(1) << (bytes * 8))
    } else {
        BigInt::from_biguint(Sign::Plus, unsigned)
    };
    st.stack.push_int(value);
    if !prefetch {
        st.stack.push_slice(slice);
    }
    Ok(None)
}

fn exec_sdepth(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let slice = st.stack.pop_slice()?;
    let depth = (0..slice.remaining_refs())
        .map(|i| {
            slice
                .prefetch_ref_at(i)
                .map(|c| c.repr_depth() + 1)
                .unwrap_or(0)
        })
        .max()
        .unwrap_or(0);
    st.stack.push_int(depth as i64);
    Ok(None)
}

fn exec_cdepth(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let depth = match st.stack.pop()? {
        StackValue::Null => 0,
        StackValue::Cell(cell) => cell.repr_depth(),
        other => {
            return Err(VmError::type_chk(format!(
                "expected a cell or null, got {}",
                other.type_name()
            )))
        }
    };
    st.stack.push_int(depth as i64);
    Ok(None)
}

/// Counts distinct cells, data bits and refs of a DAG, bounded by a popped
/// limit.
fn datasize_impl(st: &mut VmState, quiet: bool, from_slice: bool) -> VmResult<Option<i32>> {
    let limit = st.stack.pop_int_range(0, i64::MAX)? as u64;
    let mut visited: HashSet<crate::types::TonHash> = HashSet::new();
    let mut queue: Vec<ArcCell> = vec![];
    let mut bits = 0u64;
    let mut refs = 0u64;

    if from_slice {
        let slice = st.stack.pop_slice()?;
        bits += slice.remaining_bits() as u64;
        refs += slice.remaining_refs() as u64;
        for i in 0..slice.remaining_refs() {
            queue.push(slice.prefetch_ref_at(i)?);
        }
    } else {
        match st.stack.pop()? {
            StackValue::Null => {}
            StackValue::Cell(cell) => queue.push(cell),
            other => {
                return Err(VmError::type_chk(format!(
                    "expected a cell or null, got {}",
                    other.type_name()
                )))
            }
        }
    }

    let mut ok = true;
    while let Some(cell) = queue.pop() {
        if !visited.insert(cell.repr_hash()) {
            continue;
        }
        if visited.len() as u64 > limit {
            ok = false;
            break;
        }
        st.register_cell_load(cell.repr_hash())?;
        bits += cell.bit_len() as u64;
        refs += cell.references().len() as u64;
        for child in cell.references() {
            queue.push(child.clone());
        }
    }

    if ok {
        st.stack.push_int(visited.len() as u64);
        st.stack.push_int(bits);
        st.stack.push_int(refs);
        if quiet {
            st.stack.push_bool(true);
        }
    } else if quiet {
        st.stack.push_bool(false);
    } else {
        return Err(VmError::cell_ov("cell count limit exceeded"));
    }
    Ok(None)
}

pub fn register(t: &mut OpcodeTable) {
    t.insert(mksimple(0x88, 8, "PUSHREF", exec_pushref));
    t.insert(mksimple(0x89, 8, "PUSHREFSLICE", exec_pushrefslice));
    t.insert(mksimple(0x8A, 8, "PUSHREFCONT", exec_pushrefcont));
    t.insert(mkext(0x8B, 8, 4, "PUSHSLICE", exec_pushslice_short));
    t.insert(mkext(0x8C, 8, 7, "PUSHSLICE", exec_pushslice_refs));
    t.insert(mkfixedrange(0x8E00, 0x9000, 16, "PUSHCONT", exec_pushcont));
    t.insert(mkfixed(0x9, 4, 4, "PUSHCONT", exec_pushcont_short));

    t.insert(mksimple(0xC8, 8, "NEWC", exec_newc));
    t.insert(mksimple(0xC9, 8, "ENDC", exec_endc));
    t.insert(mkfixed(0xCA, 8, 8, "STI", exec_sti));
    t.insert(mkfixed(0xCB, 8, 8, "STU", exec_stu));
    t.insert(mksimple(0xCC, 8, "STREF", exec_stref));
    t.insert(mksimple(0xCD, 8, "STBREFR", exec_stbrefr));
    t.insert(mksimple(0xCE, 8, "STSLICE", exec_stslice));
    t.insert(mksimple(0xCF00, 16, "STIX", exec_stix));
    t.insert(mksimple(0xCF01, 16, "STUX", exec_stux));
    t.insert(mksimple(0xCF10, 16, "STREFALT", exec_stref));
    t.insert(mksimple(0xCF11, 16, "STBREF", exec_stbref));
    t.insert(mksimple(0xCF13, 16, "STB", exec_stb));
    t.insert(mksimple(0xCF28, 16, "STILE4", |st, _| store_le_impl(st, 4, true)));
    t.insert(mksimple(0xCF29, 16, "STULE4", |st, _| store_le_impl(st, 4, false)));
    t.insert(mksimple(0xCF2A, 16, "STILE8", |st, _| store_le_impl(st, 8, true)));
    t.insert(mksimple(0xCF2B, 16, "STULE8", |st, _| store_le_impl(st, 8, false)));
    t.insert(mksimple(0xCF31, 16, "BBITS", |st, _| {
        builder_bits_refs(st, true, false, false)
    }));
    t.insert(mksimple(0xCF32, 16, "BREFS", |st, _| {
        builder_bits_refs(st, false, true, false)
    }));
    t.insert(mksimple(0xCF33, 16, "BBITREFS", |st, _| {
        builder_bits_refs(st, true, true, false)
    }));
    t.insert(mksimple(0xCF35, 16, "BREMBITS", |st, _| {
        builder_bits_refs(st, true, false, true)
    }));
    t.insert(mksimple(0xCF36, 16, "BREMREFS", |st, _| {
        builder_bits_refs(st, false, true, true)
    }));
    t.insert(mksimple(0xCF37, 16, "BREMBITREFS", |st, _| {
        builder_bits_refs(st, true, true, true)
    }));

    t.insert(mksimple(0xD0, 8, "CTOS", exec_ctos));
    t.insert(mksimple(0xD1, 8, "ENDS", exec_ends));
    t.insert(mkfixed(0xD2, 8, 8, "LDI", exec_ldi));
    t.insert(mkfixed(0xD3, 8, 8, "LDU", exec_ldu));
    t.insert(mksimple(0xD4, 8, "LDREF", exec_ldref));
    t.insert(mksimple(0xD5, 8, "LDREFRTOS", exec_ldrefrtos));
    t.insert(mkfixed(0xD6, 8, 8, "LDSLICE", exec_ldslice));

    t.insert(mksimple(0xD700, 16, "LDIX", |st, _| {
        load_int_var(st, true, false, false)
    }));
    t.insert(mksimple(0xD701, 16, "LDUX", |st, _| {
        load_int_var(st, false, false, false)
    }));
    t.insert(mksimple(0xD702, 16, "PLDIX", |st, _| {
        load_int_var(st, true, true, false)
    }));
    t.insert(mksimple(0xD703, 16, "PLDUX", |st, _| {
        load_int_var(st, false, true, false)
    }));
    t.insert(mksimple(0xD704, 16, "LDIXQ", |st, _| {
        load_int_var(st, true, false, true)
    }));
    t.insert(mksimple(0xD705, 16, "LDUXQ", |st, _| {
        load_int_var(st, false, false, true)
    }));
    t.insert(mksimple(0xD718, 16, "LDSLICEX", |st, _| exec_ldslicex(st, false)));
    t.insert(mksimple(0xD719, 16, "PLDSLICEX", |st, _| exec_ldslicex(st, true)));
    t.insert(mksimple(0xD720, 16, "SDCUTFIRST", exec_sdcutfirst));
    t.insert(mksimple(0xD721, 16, "SDSKIPFIRST", exec_sdskipfirst));
    t.insert(mksimple(0xD722, 16, "SDCUTLAST", exec_sdcutlast));
    t.insert(mksimple(0xD723, 16, "SDSKIPLAST", exec_sdskiplast));
    t.insert(mksimple(0xD726, 16, "SDBEGINSX", |st, _| exec_sdbeginsx(st, false)));
    t.insert(mksimple(0xD727, 16, "SDBEGINSXQ", |st, _| exec_sdbeginsx(st, true)));
    t.insert(mksimple(0xD745, 16, "SEMPTY", |st, _| exec_sempty(st, true, true)));
    t.insert(mksimple(0xD746, 16, "SDEMPTY", |st, _| exec_sempty(st, true, false)));
    t.insert(mksimple(0xD747, 16, "SREMPTY", |st, _| exec_sempty(st, false, true)));
    t.insert(mksimple(0xD749, 16, "SBITS", |st, _| exec_sbits(st, true, false)));
    t.insert(mksimple(0xD74A, 16, "SREFS", |st, _| exec_sbits(st, false, true)));
    t.insert(mksimple(0xD74B, 16, "SBITREFS", |st, _| exec_sbits(st, true, true)));
    t.insert(mksimple(0xD74C, 16, "PLDREF", exec_pldref));
    t.insert(mksimple(0xD750, 16, "LDILE4", |st, _| load_le_impl(st, 4, true, false)));
    t.insert(mksimple(0xD751, 16, "LDULE4", |st, _| load_le_impl(st, 4, false, false)));
    t.insert(mksimple(0xD752, 16, "LDILE8", |st, _| load_le_impl(st, 8, true, false)));
    t.insert(mksimple(0xD753, 16, "LDULE8", |st, _| load_le_impl(st, 8, false, false)));
    t.insert(mksimple(0xD754, 16, "PLDILE4", |st, _| load_le_impl(st, 4, true, true)));
    t.insert(mksimple(0xD755, 16, "PLDULE4", |st, _| load_le_impl(st, 4, false, true)));
    t.insert(mksimple(0xD756, 16, "PLDILE8", |st, _| load_le_impl(st, 8, true, true)));
    t.insert(mksimple(0xD757, 16, "PLDULE8", |st, _| load_le_impl(st, 8, false, true)));
    t.insert(mksimple(0xD764, 16, "SDEPTH", exec_sdepth));
    t.insert(mksimple(0xD765, 16, "CDEPTH", exec_cdepth));

    t.insert(mksimple(0xF940, 16, "CDATASIZEQ", |st, _| {
        datasize_impl(st, true, false)
    }));
    t.insert(mksimple(0xF941, 16, "CDATASIZE", |st, _| {
        datasize_impl(st, false, false)
    }));
    t.insert(mksimple(0xF942, 16, "SDATASIZEQ", |st, _| {
        datasize_impl(st, true, true)
    }));
    t.insert(mksimple(0xF943, 16, "SDATASIZE", |st, _| {
        datasize_impl(st, false, true)
    }));
}
