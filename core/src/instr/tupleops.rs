use std::sync::Arc;

use crate::dispatch::{mkfixed, mksimple, OpcodeTable};
use crate::error::{VmError, VmResult};
use crate::stack::{StackValue, MAX_TUPLE_LEN};
use crate::vm::VmState;

fn exec_push_null(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    st.stack.push(StackValue::Null);
    Ok(None)
}

fn exec_is_null(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let value = st.stack.pop()?;
    st.stack.push_bool(value.is_null());
    Ok(None)
}

fn make_tuple(st: &mut VmState, n: usize) -> VmResult<()> {
    let values = st.stack.pop_many(n)?;
    st.consume_tuple_gas(n)?;
    st.stack.push(StackValue::tuple(values));
    Ok(())
}

fn exec_tuple(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    make_tuple(st, (opc & 0xF) as usize)?;
    Ok(None)
}

fn exec_tuple_var(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let n = st.stack.pop_smallint_range(MAX_TUPLE_LEN as u32)? as usize;
    make_tuple(st, n)?;
    Ok(None)
}

fn index_impl(st: &mut VmState, idx: usize, quiet: bool) -> VmResult<()> {
    match st.stack.pop()? {
        StackValue::Tuple(tuple) => match tuple.get(idx) {
            Some(value) => st.stack.push(value.clone()),
            None if quiet => st.stack.push(StackValue::Null),
            None => {
                return Err(VmError::range_chk(format!(
                    "tuple index {idx} out of range (len {})",
                    tuple.len()
                )))
            }
        },
        StackValue::Null if quiet => st.stack.push(StackValue::Null),
        other => return Err(VmError::type_chk(format!(
            "expected a tuple, got {}",
            other.type_name()
        ))),
    }
    Ok(())
}

fn exec_index(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    index_impl(st, (opc & 0xF) as usize, false)?;
    Ok(None)
}

fn exec_index_quiet(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    index_impl(st, (opc & 0xF) as usize, true)?;
    Ok(None)
}

fn exec_index_var(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let idx = st.stack.pop_smallint_range(MAX_TUPLE_LEN as u32)? as usize;
    index_impl(st, idx, false)?;
    Ok(None)
}

fn exec_index_var_quiet(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let idx = st.stack.pop_smallint_range(MAX_TUPLE_LEN as u32)? as usize;
    index_impl(st, idx, true)?;
    Ok(None)
}

fn untuple_impl(st: &mut VmState, expected: Option<usize>, prefix: Option<usize>) -> VmResult<()> {
    let tuple = st.stack.pop_tuple()?;
    if let Some(expected) = expected {
        if tuple.len() != expected {
            return Err(VmError::type_chk(format!(
                "expected a tuple of {expected} entries, got {}",
                tuple.len()
            )));
        }
    }
    let take = prefix.unwrap_or(tuple.len());
    if take > tuple.len() {
        return Err(VmError::type_chk(format!(
            "cannot unpack {take} entries from a tuple of {}",
            tuple.len()
        )));
    }
    st.consume_tuple_gas(take)?;
    for value in tuple.iter().take(take) {
        st.stack.push(value.clone());
    }
    Ok(())
}

fn exec_untuple(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    untuple_impl(st, Some((opc & 0xF) as usize), None)?;
    Ok(None)
}

fn exec_unpackfirst(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    untuple_impl(st, None, Some((opc & 0xF) as usize))?;
    Ok(None)
}

/// `EXPLODE n`: unpacks a tuple of at most `n` entries and pushes its length.
fn exec_explode(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    explode_impl(st, (opc & 0xF) as usize)?;
    Ok(None)
}

fn exec_explode_var(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let n = st.stack.pop_smallint_range(MAX_TUPLE_LEN as u32)? as usize;
    explode_impl(st, n)?;
    Ok(None)
}

fn explode_impl(st: &mut VmState, max: usize) -> VmResult<()> {
    let tuple = st.stack.pop_tuple()?;
    if tuple.len() > max {
        return Err(VmError::type_chk(format!(
            "tuple of {} entries does not fit in {max}",
            tuple.len()
        )));
    }
    st.consume_tuple_gas(tuple.len())?;
    let len = tuple.len() as i64;
    for value in tuple.iter() {
        st.stack.push(value.clone());
    }
    st.stack.push_int(len);
    Ok(())
}

fn setindex_impl(st: &mut VmState, idx: usize, quiet: bool) -> VmResult<()> {
    let value = st.stack.pop()?;
    let tuple = match st.stack.pop()? {
        StackValue::Tuple(tuple) => tuple,
        StackValue::Null if quiet => Arc::new(vec![]),
        other => {
            return Err(VmError::type_chk(format!(
                "expected a tuple, got {}",
                other.type_name()
            )))
        }
    };
    let mut entries = (*tuple).clone();
    if idx >= entries.len() {
        if !quiet {
            return Err(VmError::range_chk(format!(
                "tuple index {idx} out of range (len {})",
                entries.len()
            )));
        }
        if idx >= MAX_TUPLE_LEN {
            return Err(VmError::range_chk("tuple too long"));
        }
        entries.resize(idx + 1, StackValue::Null);
    }
    entries[idx] = value;
    st.consume_tuple_gas(entries.len())?;
    st.stack.push(StackValue::tuple(entries));
    Ok(())
}

fn exec_setindex(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    setindex_impl(st, (opc & 0xF) as usize, false)?;
    Ok(None)
}

fn exec_setindex_quiet(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    setindex_impl(st, (opc & 0xF) as usize, true)?;
    Ok(None)
}

fn exec_tlen(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let tuple = st.stack.pop_tuple()?;
    st.stack.push_int(tuple.len() as i64);
    Ok(None)
}

fn exec_qtlen(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    match st.stack.pop()? {
        StackValue::Tuple(tuple) => st.stack.push_int(tuple.len() as i64),
        _ => st.stack.push_int(-1i64),
    }
    Ok(None)
}

fn exec_istuple(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let is_tuple = matches!(st.stack.pop()?, StackValue::Tuple(_));
    st.stack.push_bool(is_tuple);
    Ok(None)
}

fn exec_last(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let tuple = st.stack.pop_tuple()?;
    match tuple.last() {
        Some(value) => st.stack.push(value.clone()),
        None => return Err(VmError::type_chk("LAST on an empty tuple")),
    }
    Ok(None)
}

fn exec_tpush(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let value = st.stack.pop()?;
    let tuple = st.stack.pop_tuple()?;
    if tuple.len() >= MAX_TUPLE_LEN {
        return Err(VmError::type_chk("tuple already has 255 entries"));
    }
    let mut entries = (*tuple).clone();
    entries.push(value);
    st.consume_tuple_gas(entries.len())?;
    st.stack.push(StackValue::tuple(entries));
    Ok(None)
}

fn exec_tpop(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let tuple = st.stack.pop_tuple()?;
    let mut entries = (*tuple).clone();
    let value = entries
        .pop()
        .ok_or_else(|| VmError::type_chk("TPOP on an empty tuple"))?;
    st.consume_tuple_gas(entries.len())?;
    st.stack.push(StackValue::tuple(entries));
    st.stack.push(value);
    Ok(None)
}

/// `NULLSWAPIF` / `NULLROTRIF` family: pushes a null under the top when the
/// top is a non-zero integer.
fn exec_null_swap_if(st: &mut VmState, invert: bool, depth: usize) -> VmResult<Option<i32>> {
    let flag = st.stack.fetch(0)?;
    let fire = match flag.as_int() {
        Some(x) => x.is_true() != invert,
        None => return Err(VmError::type_chk("expected an integer at the top")),
    };
    if fire {
        st.stack.push(StackValue::Null);
        st.stack.roll_rev(depth)?;
    }
    Ok(None)
}

pub fn register(t: &mut OpcodeTable) {
    t.insert(mksimple(0x6D, 8, "PUSHNULL", exec_push_null));
    t.insert(mksimple(0x6E, 8, "ISNULL", exec_is_null));
    t.insert(mkfixed(0x6F0, 12, 4, "TUPLE", exec_tuple));
    t.insert(mkfixed(0x6F1, 12, 4, "INDEX", exec_index));
    t.insert(mkfixed(0x6F2, 12, 4, "UNTUPLE", exec_untuple));
    t.insert(mkfixed(0x6F3, 12, 4, "UNPACKFIRST", exec_unpackfirst));
    t.insert(mkfixed(0x6F4, 12, 4, "EXPLODE", exec_explode));
    t.insert(mkfixed(0x6F5, 12, 4, "SETINDEX", exec_setindex));
    t.insert(mkfixed(0x6F6, 12, 4, "INDEXQ", exec_index_quiet));
    t.insert(mkfixed(0x6F7, 12, 4, "SETINDEXQ", exec_setindex_quiet));
    t.insert(mksimple(0x6F80, 16, "TUPLEVAR", exec_tuple_var));
    t.insert(mksimple(0x6F81, 16, "INDEXVAR", exec_index_var));
    t.insert(mksimple(0x6F84, 16, "EXPLODEVAR", exec_explode_var));
    t.insert(mksimple(0x6F86, 16, "INDEXVARQ", exec_index_var_quiet));
    t.insert(mksimple(0x6F88, 16, "TLEN", exec_tlen));
    t.insert(mksimple(0x6F89, 16, "QTLEN", exec_qtlen));
    t.insert(mksimple(0x6F8A, 16, "ISTUPLE", exec_istuple));
    t.insert(mksimple(0x6F8B, 16, "LAST", exec_last));
    t.insert(mksimple(0x6F8C, 16, "TPUSH", exec_tpush));
    t.insert(mksimple(0x6F8D, 16, "TPOP", exec_tpop));
    t.insert(mksimple(0x6FA0, 16, "NULLSWAPIF", |st, _| {
        exec_null_swap_if(st, false, 1)
    }));
    t.insert(mksimple(0x6FA1, 16, "NULLSWAPIFNOT", |st, _| {
        exec_null_swap_if(st, true, 1)
    }));
    t.insert(mksimple(0x6FA2, 16, "NULLROTRIF", |st, _| {
        exec_null_swap_if(st, false, 2)
    }));
    t.insert(mksimple(0x6FA3, 16, "NULLROTRIFNOT", |st, _| {
        exec_null_swap_if(st, true, 2)
    }));
}
