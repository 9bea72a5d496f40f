use num_bigint::{BigInt, Sign};
use num_traits::Zero;

use crate::cell::dict::{dict_get, KeyBits};
use crate::cell::{ArcCell, CellBuilder, OwnedCellSlice};
use crate::dispatch::{mkfixed, mksimple, OpcodeTable};
use crate::error::{as_dict_error, VmError, VmResult};
use crate::gas::price;
use crate::num::{Int257, Round};
use crate::stack::{StackValue, Tuple};
use crate::vm::VmState;

const SEND_MSG_TAG: u64 = 0x0ec3c86d;
const RESERVE_TAG: u64 = 0x36e6b809;
const SET_CODE_TAG: u64 = 0xad4de08e;
const CHANGE_LIBRARY_TAG: u64 = 0x26fa1dd4;

/// `SENDMSG` mode bit: estimate the fee without recording the action.
const SEND_MSG_ESTIMATE_ONLY: i64 = 1024;

fn exec_accept(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    st.accept();
    Ok(None)
}

fn exec_setgaslimit(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let limit = st.stack.pop_finite()?;
    let limit = limit.to_i64().unwrap_or(i64::MAX / 4);
    st.change_gas_limit(limit);
    st.gas.check()?;
    Ok(None)
}

fn exec_gasconsumed(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let consumed = st.gas.consumed();
    st.stack.push_int(consumed);
    Ok(None)
}

fn exec_commit(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    st.try_commit();
    Ok(None)
}

fn exec_getparam(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let value = st.get_param((opc & 0xF) as usize);
    st.stack.push(value);
    Ok(None)
}

fn exec_getparam_at(st: &mut VmState, idx: usize) -> VmResult<Option<i32>> {
    let value = st.get_param(idx);
    st.stack.push(value);
    Ok(None)
}

fn exec_getglob(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    getglob_impl(st, (opc & 0xF) as usize)
}

fn exec_getglobvar(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let idx = st.stack.pop_smallint_range(254)? as usize;
    getglob_impl(st, idx)
}

fn getglob_impl(st: &mut VmState, idx: usize) -> VmResult<Option<i32>> {
    let value = st
        .cr
        .c7
        .as_ref()
        .and_then(|c7| c7.get(idx).cloned())
        .unwrap_or(StackValue::Null);
    st.stack.push(value);
    Ok(None)
}

fn exec_setglob(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    setglob_impl(st, (opc & 0xF) as usize)
}

fn exec_setglobvar(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let idx = st.stack.pop_smallint_range(254)? as usize;
    setglob_impl(st, idx)
}

fn setglob_impl(st: &mut VmState, idx: usize) -> VmResult<Option<i32>> {
    let value = st.stack.pop()?;
    let c7 = st.cr.c7.clone().unwrap_or_default();
    let mut entries = (*c7).clone();
    while entries.len() <= idx {
        entries.push(StackValue::Null);
    }
    entries[idx] = value;
    st.consume_tuple_gas(entries.len())?;
    st.cr.c7 = Some(std::sync::Arc::new(entries));
    Ok(None)
}

fn exec_randu256(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let z = st.mix_rand_seed(None)?;
    st.stack.push_int(z);
    Ok(None)
}

fn exec_rand(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let range = st.stack.pop_finite()?;
    let z = st.mix_rand_seed(None)?;
    // floor(z * range / 2^256)
    let (scaled, _) = z.mul_rshift_rem(&range, 256, Round::Floor);
    st.stack.push_int_checked(scaled, false)?;
    Ok(None)
}

fn exec_setrand(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let seed = st.stack.pop_finite()?;
    if !seed.unsigned_fits(256) {
        return Err(VmError::range_chk("random seed must fit 256 unsigned bits"));
    }
    st.set_param(6, StackValue::Int(seed))?;
    Ok(None)
}

fn exec_addrand(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let entropy = st.stack.pop_finite()?;
    let bytes = entropy
        .to_unsigned_bytes(32)
        .ok_or_else(|| VmError::range_chk("entropy must fit 256 unsigned bits"))?;
    st.mix_rand_seed(Some(&bytes))?;
    Ok(None)
}

fn config_dict(st: &VmState) -> Option<ArcCell> {
    match st.get_param(9) {
        StackValue::Cell(cell) => Some(cell),
        _ => None,
    }
}

fn exec_configdict(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    match config_dict(st) {
        Some(cell) => st.stack.push_cell(cell),
        None => st.stack.push(StackValue::Null),
    }
    st.stack.push_int(32i64);
    Ok(None)
}

fn config_param(st: &mut VmState, idx: &Int257) -> VmResult<Option<ArcCell>> {
    let Some(root) = config_dict(st) else {
        return Ok(None);
    };
    st.register_cell_load(root.repr_hash())?;
    let Some(key) = KeyBits::from_int(idx.finite()?, 32, true) else {
        return Ok(None);
    };
    match dict_get(Some(&root), &key).map_err(as_dict_error)? {
        Some(value) if value.remaining_refs() > 0 => Ok(Some(value.prefetch_ref()?)),
        _ => Ok(None),
    }
}

fn exec_configparam(st: &mut VmState, opt: bool) -> VmResult<Option<i32>> {
    let idx = st.stack.pop_finite()?;
    let param = config_param(st, &idx)?;
    if opt {
        match param {
            Some(cell) => st.stack.push_cell(cell),
            None => st.stack.push(StackValue::Null),
        }
    } else {
        match param {
            Some(cell) => {
                st.stack.push_cell(cell);
                st.stack.push_bool(true);
            }
            None => st.stack.push_bool(false),
        }
    }
    Ok(None)
}

fn exec_globalid(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let param = config_param(st, &Int257::from(19i64))?;
    let Some(cell) = param else {
        return Err(VmError::dict_err("global id is not in the config"));
    };
    st.register_cell_load(cell.repr_hash())?;
    let mut slice = OwnedCellSlice::new(cell)?;
    let id = slice.fetch_int(32)?;
    st.stack.push_int(id);
    Ok(None)
}

/// Price tuples inside `c7[0][14]`: `[0]` gas `[flat_limit, flat_price,
/// gas_price]`, `[1]` storage `[bit_price, cell_price]`, `[2]` forward
/// `[lump_price, bit_price, cell_price]`.
fn unpacked_config(st: &VmState, idx: usize) -> VmResult<Tuple> {
    let StackValue::Tuple(config) = st.get_param(14) else {
        return Err(VmError::type_chk("unpacked config tuple is not set"));
    };
    match config.get(idx) {
        Some(StackValue::Tuple(prices)) => Ok(prices.clone()),
        _ => Err(VmError::type_chk("missing price tuple in unpacked config")),
    }
}

fn tuple_int(prices: &Tuple, idx: usize) -> VmResult<Int257> {
    match prices.get(idx) {
        Some(StackValue::Int(val)) => Ok(val.clone()),
        _ => Err(VmError::type_chk("price entry is not an integer")),
    }
}

fn exec_getgasfee(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let _is_masterchain = st.stack.pop_bool()?;
    let gas = st.stack.pop_finite()?;
    let prices = unpacked_config(st, 0)?;
    let flat_limit = tuple_int(&prices, 0)?;
    let flat_price = tuple_int(&prices, 1)?;
    let gas_price = tuple_int(&prices, 2)?;

    let over = gas.sub(&flat_limit);
    let fee = if over.sign().unwrap_or(0) <= 0 {
        flat_price
    } else {
        // Prices are fixed-point with a 16-bit fractional part.
        let (extra, _) = over.mul_rshift_rem(&gas_price, 16, Round::Ceil);
        flat_price.add(&extra)
    };
    st.stack.push_int_checked(fee, false)?;
    Ok(None)
}

fn exec_getgasfeesimple(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let _is_masterchain = st.stack.pop_bool()?;
    let gas = st.stack.pop_finite()?;
    let prices = unpacked_config(st, 0)?;
    let gas_price = tuple_int(&prices, 2)?;
    let (fee, _) = gas.mul_rshift_rem(&gas_price, 16, Round::Ceil);
    st.stack.push_int_checked(fee, false)?;
    Ok(None)
}

fn exec_getstoragefee(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let _is_masterchain = st.stack.pop_bool()?;
    let seconds = st.stack.pop_finite()?;
    let bits = st.stack.pop_finite()?;
    let cells = st.stack.pop_finite()?;
    let prices = unpacked_config(st, 1)?;
    let bit_price = tuple_int(&prices, 0)?;
    let cell_price = tuple_int(&prices, 1)?;
    let total = bits.mul(&bit_price).add(&cells.mul(&cell_price));
    let (fee, _) = total.mul_rshift_rem(&seconds, 16, Round::Ceil);
    st.stack.push_int_checked(fee, false)?;
    Ok(None)
}

fn fwd_fee(st: &VmState, bits: &Int257, cells: &Int257) -> VmResult<Int257> {
    let prices = unpacked_config(st, 2)?;
    let lump = tuple_int(&prices, 0)?;
    let bit_price = tuple_int(&prices, 1)?;
    let cell_price = tuple_int(&prices, 2)?;
    let weighted = bits.mul(&bit_price).add(&cells.mul(&cell_price));
    let (scaled, _) = weighted.mul_rshift_rem(&Int257::from(1i64), 16, Round::Ceil);
    Ok(lump.add(&scaled))
}

fn exec_getforwardfee(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let _is_masterchain = st.stack.pop_bool()?;
    let bits = st.stack.pop_finite()?;
    let cells = st.stack.pop_finite()?;
    let fee = fwd_fee(st, &bits, &cells)?;
    st.stack.push_int_checked(fee, false)?;
    Ok(None)
}

fn exec_getforwardfeesimple(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let _is_masterchain = st.stack.pop_bool()?;
    let bits = st.stack.pop_finite()?;
    let cells = st.stack.pop_finite()?;
    let prices = unpacked_config(st, 2)?;
    let bit_price = tuple_int(&prices, 1)?;
    let cell_price = tuple_int(&prices, 2)?;
    let weighted = bits.mul(&bit_price).add(&cells.mul(&cell_price));
    let (fee, _) = weighted.mul_rshift_rem(&Int257::from(1i64), 16, Round::Ceil);
    st.stack.push_int_checked(fee, false)?;
    Ok(None)
}

/// Recovers the original forward fee from the 1/(1+f) share a message
/// carries after fees were deducted.
fn exec_getoriginalfwdfee(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let _is_masterchain = st.stack.pop_bool()?;
    let fwd_fee = st.stack.pop_finite()?;
    // first_frac is 21845/65536 in the production config.
    let first_frac = Int257::from(21845i64);
    let denom = Int257::from(65536i64).sub(&first_frac);
    let (fee, _) = fwd_fee.mul_div_rem(&Int257::from(65536i64), &denom, Round::Ceil);
    st.stack.push_int_checked(fee, false)?;
    Ok(None)
}

fn exec_getprecompiledgas(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    exec_getparam_at(st, 16)
}

fn exec_getextrabalance(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let id = st.stack.pop_finite()?;
    let cheap = st.register_extra_balance_call();
    if cheap {
        st.consume_free_gas(price::GET_EXTRA_BALANCE_CHEAP_MAX);
    } else {
        st.consume_gas(price::GET_EXTRA_BALANCE_CHEAP_MAX)?;
    }
    let StackValue::Tuple(balance) = st.get_param(7) else {
        return Err(VmError::type_chk("balance pair is not set"));
    };
    let extra = match balance.get(1) {
        Some(StackValue::Cell(cell)) => Some(cell.clone()),
        _ => None,
    };
    let Some(root) = extra else {
        st.stack.push_int(0i64);
        return Ok(None);
    };
    st.register_cell_load(root.repr_hash())?;
    let Some(key) = KeyBits::from_int(id.finite()?, 32, false) else {
        return Err(VmError::range_chk("extra currency id out of range"));
    };
    match dict_get(Some(&root), &key).map_err(as_dict_error)? {
        Some(mut value) => {
            let len = value.fetch_u64(5)? as usize;
            let amount = value.fetch_uint(len * 8)?;
            st.stack
                .push_int(BigInt::from_biguint(Sign::Plus, amount));
        }
        None => st.stack.push_int(0i64),
    }
    Ok(None)
}

/// Appends an action cell: the first reference is the previous list head.
fn install_action(
    st: &mut VmState,
    build: impl FnOnce(&mut CellBuilder) -> VmResult<()>,
) -> VmResult<()> {
    let head = st
        .cr
        .d[1]
        .clone()
        .ok_or_else(|| VmError::fatal("c5 is unset"))?;
    let mut builder = CellBuilder::new();
    builder.store_reference(&head)?;
    build(&mut builder)?;
    st.register_cell_create()?;
    let new_head = builder.build()?.to_arc();
    st.cr.d[1] = Some(new_head);
    Ok(())
}

fn exec_sendrawmsg(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let mode = st.stack.pop_smallint_range(255)? as u64;
    let msg = st.stack.pop_cell()?;
    install_action(st, |builder| {
        builder.store_u64(32, SEND_MSG_TAG)?;
        builder.store_u64(8, mode)?;
        builder.store_reference(&msg)?;
        Ok(())
    })?;
    Ok(None)
}

fn exec_sendmsg(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let mode = st.stack.pop_int_range(0, 2047)?;
    let msg = st.stack.pop_cell()?;

    st.register_cell_load(msg.repr_hash())?;
    let bits = Int257::from(msg.bit_len() as u64);
    let cells = Int257::from(msg.references().len() as u64);
    let fee = fwd_fee(st, &bits, &cells)?;

    if mode & SEND_MSG_ESTIMATE_ONLY == 0 {
        install_action(st, |builder| {
            builder.store_u64(32, SEND_MSG_TAG)?;
            builder.store_u64(8, (mode & 0xFF) as u64)?;
            builder.store_reference(&msg)?;
            Ok(())
        })?;
    }
    st.stack.push_int_checked(fee, false)?;
    Ok(None)
}

fn exec_rawreserve(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let mode = st.stack.pop_smallint_range(31)? as u64;
    let amount = st.stack.pop_finite()?;
    let grams = amount
        .finite()?
        .to_biguint()
        .ok_or_else(|| VmError::range_chk("reserve amount must be non-negative"))?;
    install_action(st, |builder| {
        builder.store_u64(32, RESERVE_TAG)?;
        builder.store_u64(8, mode)?;
        builder.store_coins(&grams)?;
        builder.store_bit(false)?;
        Ok(())
    })?;
    Ok(None)
}

fn exec_rawreservex(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let mode = st.stack.pop_smallint_range(31)? as u64;
    let extra = st.stack.pop_maybe_cell()?;
    let amount = st.stack.pop_finite()?;
    let grams = amount
        .finite()?
        .to_biguint()
        .ok_or_else(|| VmError::range_chk("reserve amount must be non-negative"))?;
    install_action(st, |builder| {
        builder.store_u64(32, RESERVE_TAG)?;
        builder.store_u64(8, mode)?;
        builder.store_coins(&grams)?;
        match &extra {
            Some(cell) => {
                builder.store_bit(true)?;
                builder.store_reference(cell)?;
            }
            None => {
                builder.store_bit(false)?;
            }
        }
        Ok(())
    })?;
    Ok(None)
}

fn exec_setcode(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let code = st.stack.pop_cell()?;
    install_action(st, |builder| {
        builder.store_u64(32, SET_CODE_TAG)?;
        builder.store_reference(&code)?;
        Ok(())
    })?;
    Ok(None)
}

fn exec_setlibcode(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let mode = st.stack.pop_smallint_range(2)? as u64;
    let code = st.stack.pop_cell()?;
    install_action(st, |builder| {
        builder.store_u64(32, CHANGE_LIBRARY_TAG)?;
        builder.store_u64(7, mode * 2 + 1)?;
        builder.store_reference(&code)?;
        Ok(())
    })?;
    Ok(None)
}

fn exec_changelib(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let mode = st.stack.pop_smallint_range(2)? as u64;
    let hash = st.stack.pop_finite()?;
    let hash_bytes = hash
        .to_unsigned_bytes(32)
        .ok_or_else(|| VmError::range_chk("library hash must fit 256 bits"))?;
    install_action(st, |builder| {
        builder.store_u64(32, CHANGE_LIBRARY_TAG)?;
        builder.store_u64(7, mode * 2)?;
        builder.store_bytes(&hash_bytes)?;
        Ok(())
    })?;
    Ok(None)
}

/// TL-B `MsgAddress` prefix length in bits, tag included; `None` when the
/// slice does not hold a well-formed address.
fn msg_addr_bits(slice: &OwnedCellSlice) -> Option<usize> {
    let tag = slice.prefetch_u64(2).ok()?;
    match tag {
        0 => Some(2),
        1 => {
            let probe = slice.prefetch_subslice(2 + 9, 0).ok()?;
            let len = probe.prefetch_u64_padded(11) & 0x1FF;
            Some(2 + 9 + len as usize)
        }
        2 => {
            // addr_std$10 anycast:(Maybe Anycast) wc:int8 addr:bits256
            let probe = slice.prefetch_subslice(3, 0).ok()?;
            let anycast = probe.prefetch_u64_padded(3) & 1;
            if anycast != 0 {
                // Anycast rewrite prefixes are not produced by this engine.
                return None;
            }
            Some(2 + 1 + 8 + 256)
        }
        3 => {
            let probe = slice.prefetch_subslice(2 + 1 + 9, 0).ok()?;
            let word = probe.prefetch_u64_padded(12);
            let anycast = word >> 9 & 1;
            if anycast != 0 {
                return None;
            }
            let len = (word & 0x1FF) as usize;
            Some(2 + 1 + 9 + 32 + len)
        }
        _ => None,
    }
}

fn exec_ldmsgaddr(st: &mut VmState, quiet: bool) -> VmResult<Option<i32>> {
    let mut slice = st.stack.pop_slice()?;
    match msg_addr_bits(&slice) {
        Some(bits) if bits <= slice.remaining_bits() => {
            let addr = slice.fetch_subslice(bits, 0)?;
            st.stack.push_slice(addr);
            st.stack.push_slice(slice);
            if quiet {
                st.stack.push_bool(true);
            }
        }
        _ => {
            if !quiet {
                return Err(VmError::cell_und("malformed message address"));
            }
            st.stack.push_slice(slice);
            st.stack.push_bool(false);
        }
    }
    Ok(None)
}

fn exec_parsemsgaddr(st: &mut VmState, quiet: bool) -> VmResult<Option<i32>> {
    let slice = st.stack.pop_slice()?;
    match parse_msg_addr(&slice) {
        Ok(tuple) => {
            st.stack.push(StackValue::Tuple(tuple));
            if quiet {
                st.stack.push_bool(true);
            }
        }
        Err(err) => {
            if !quiet {
                return Err(err);
            }
            st.stack.push_bool(false);
        }
    }
    Ok(None)
}

fn parse_msg_addr(slice: &OwnedCellSlice) -> VmResult<Tuple> {
    let mut s = slice.clone();
    let tag = s.fetch_u64(2)?;
    let entries = match tag {
        0 => vec![StackValue::int(0i64)],
        1 => {
            let len = s.fetch_u64(9)? as usize;
            let addr = s.fetch_subslice(len, 0)?;
            vec![StackValue::int(1i64), StackValue::Slice(addr)]
        }
        2 => {
            if s.fetch_bit()? {
                return Err(VmError::cell_und("anycast addresses are not supported"));
            }
            let wc = s.fetch_int(8)?;
            let addr = s.fetch_subslice(256, 0)?;
            vec![
                StackValue::int(2i64),
                StackValue::Null,
                StackValue::int(wc),
                StackValue::Slice(addr),
            ]
        }
        3 => {
            if s.fetch_bit()? {
                return Err(VmError::cell_und("anycast addresses are not supported"));
            }
            let len = s.fetch_u64(9)? as usize;
            let wc = s.fetch_int(32)?;
            let addr = s.fetch_subslice(len, 0)?;
            vec![
                StackValue::int(3i64),
                StackValue::Null,
                StackValue::int(wc),
                StackValue::Slice(addr),
            ]
        }
        _ => return Err(VmError::cell_und("bad address tag")),
    };
    Ok(std::sync::Arc::new(entries))
}

fn exec_rewritestdaddr(st: &mut VmState, quiet: bool, var: bool) -> VmResult<Option<i32>> {
    let slice = st.stack.pop_slice()?;
    let parsed = parse_msg_addr(&slice);
    let result = parsed.and_then(|tuple| {
        let tag = match tuple.first() {
            Some(StackValue::Int(tag)) => tag.to_i64().unwrap_or(-1),
            _ => -1,
        };
        if tag != 2 && !(var && tag == 3) {
            return Err(VmError::cell_und("not an internal address"));
        }
        let wc = match tuple.get(2) {
            Some(StackValue::Int(wc)) => wc.clone(),
            _ => return Err(VmError::cell_und("missing workchain")),
        };
        let addr = match tuple.get(3) {
            Some(StackValue::Slice(addr)) => addr.clone(),
            _ => return Err(VmError::cell_und("missing address body")),
        };
        if !var && addr.remaining_bits() != 256 {
            return Err(VmError::cell_und("address is not 256 bits"));
        }
        Ok((wc, addr))
    });
    match result {
        Ok((wc, addr)) => {
            st.stack.push_int(wc);
            if var {
                st.stack.push_slice(addr);
            } else {
                let value = addr.prefetch_uint(256)?;
                st.stack
                    .push_int(BigInt::from_biguint(Sign::Plus, value));
            }
            if quiet {
                st.stack.push_bool(true);
            }
        }
        Err(err) => {
            if !quiet {
                return Err(err);
            }
            st.stack.push_bool(false);
        }
    }
    Ok(None)
}

/// Variable-length integer load: a length prefix of `len_bits` bits, then
/// that many bytes.
fn exec_ldvarint(st: &mut VmState, len_bits: usize, signed: bool) -> VmResult<Option<i32>> {
    let mut slice = st.stack.pop_slice()?;
    let len = slice.fetch_u64(len_bits)? as usize;
    let value = if signed {
        slice.fetch_int(len * 8)?
    } else {
        BigInt::from_biguint(Sign::Plus, slice.fetch_uint(len * 8)?)
    };
    st.stack.push_int(value);
    st.stack.push_slice(slice);
    Ok(None)
}

fn exec_stvarint(st: &mut VmState, len_bits: usize, signed: bool) -> VmResult<Option<i32>> {
    let builder = st.stack.pop_builder()?;
    let x = st.stack.pop_finite()?;
    let max_bytes = (1usize << len_bits) - 1;
    let value = x.finite()?;
    let byte_len = if signed {
        let mut bits = 1u64;
        while !x.signed_fits(bits) {
            bits += 1;
        }
        (bits as usize).div_ceil(8)
    } else {
        if value.sign() == Sign::Minus {
            return Err(VmError::range_chk("cannot store a negative value unsigned"));
        }
        (value.bits() as usize).div_ceil(8)
    };
    let byte_len = if value.is_zero() { 0 } else { byte_len };
    if byte_len > max_bytes {
        return Err(VmError::range_chk(format!(
            "value does not fit in {max_bytes} bytes"
        )));
    }
    let mut fork = super::cellops::builder_mut(builder);
    fork.store_u64(len_bits, byte_len as u64)?;
    if byte_len > 0 {
        if signed {
            fork.store_int(byte_len * 8, value)?;
        } else {
            fork.store_uint(
                byte_len * 8,
                &value.to_biguint().expect("checked non-negative"),
            )?;
        }
    }
    st.stack.push_builder(fork);
    Ok(None)
}

pub fn register(t: &mut OpcodeTable) {
    t.insert(mksimple(0xF800, 16, "ACCEPT", exec_accept));
    t.insert(mksimple(0xF801, 16, "SETGASLIMIT", exec_setgaslimit));
    t.insert(mksimple(0xF807, 16, "GASCONSUMED", exec_gasconsumed).with_version(4));
    t.insert(mksimple(0xF80F, 16, "COMMIT", exec_commit));

    t.insert(mksimple(0xF810, 16, "RANDU256", exec_randu256));
    t.insert(mksimple(0xF811, 16, "RAND", exec_rand));
    t.insert(mksimple(0xF814, 16, "SETRAND", exec_setrand));
    t.insert(mksimple(0xF815, 16, "ADDRAND", exec_addrand));

    t.insert(mkfixed(0xF82, 12, 4, "GETPARAM", exec_getparam));
    t.insert(mksimple(0xF830, 16, "CONFIGDICT", exec_configdict));
    t.insert(mksimple(0xF832, 16, "CONFIGPARAM", |st, _| {
        exec_configparam(st, false)
    }));
    t.insert(mksimple(0xF833, 16, "CONFIGOPTPARAM", |st, _| {
        exec_configparam(st, true)
    }));
    t.insert(mksimple(0xF835, 16, "GLOBALID", exec_globalid).with_version(4));
    t.insert(mksimple(0xF836, 16, "GETGASFEE", exec_getgasfee).with_version(6));
    t.insert(mksimple(0xF837, 16, "GETSTORAGEFEE", exec_getstoragefee).with_version(6));
    t.insert(mksimple(0xF838, 16, "GETFORWARDFEE", exec_getforwardfee).with_version(6));
    t.insert(mksimple(0xF839, 16, "GETPRECOMPILEDGAS", exec_getprecompiledgas).with_version(6));
    t.insert(mksimple(0xF83A, 16, "GETORIGINALFWDFEE", exec_getoriginalfwdfee).with_version(6));
    t.insert(mksimple(0xF83B, 16, "GETGASFEESIMPLE", exec_getgasfeesimple).with_version(6));
    t.insert(
        mksimple(0xF83C, 16, "GETFORWARDFEESIMPLE", exec_getforwardfeesimple).with_version(6),
    );
    t.insert(mksimple(0xF83D, 16, "INMSGPARAMS", |st, _| {
        exec_getparam_at(st, 17)
    })
    .with_version(11));
    t.insert(mksimple(0xF83E, 16, "GETEXTRABALANCE", exec_getextrabalance).with_version(10));

    t.insert(mksimple(0xF840, 16, "GETGLOBVAR", exec_getglobvar));
    t.insert(mkfixed(0xF85, 12, 4, "GETGLOB", exec_getglob));
    t.insert(mksimple(0xF860, 16, "SETGLOBVAR", exec_setglobvar));
    t.insert(mkfixed(0xF87, 12, 4, "SETGLOB", exec_setglob));

    t.insert(mksimple(0xFA00, 16, "LDGRAMS", |st, _| {
        exec_ldvarint(st, 4, false)
    }));
    t.insert(mksimple(0xFA01, 16, "LDVARINT16", |st, _| {
        exec_ldvarint(st, 4, true)
    }));
    t.insert(mksimple(0xFA02, 16, "STGRAMS", |st, _| {
        exec_stvarint(st, 4, false)
    }));
    t.insert(mksimple(0xFA03, 16, "STVARINT16", |st, _| {
        exec_stvarint(st, 4, true)
    }));
    t.insert(mksimple(0xFA04, 16, "LDVARUINT32", |st, _| {
        exec_ldvarint(st, 5, false)
    }));
    t.insert(mksimple(0xFA05, 16, "LDVARINT32", |st, _| {
        exec_ldvarint(st, 5, true)
    }));
    t.insert(mksimple(0xFA06, 16, "STVARUINT32", |st, _| {
        exec_stvarint(st, 5, false)
    }));
    t.insert(mksimple(0xFA07, 16, "STVARINT32", |st, _| {
        exec_stvarint(st, 5, true)
    }));

    t.insert(mksimple(0xFA40, 16, "LDMSGADDR", |st, _| {
        exec_ldmsgaddr(st, false)
    }));
    t.insert(mksimple(0xFA41, 16, "LDMSGADDRQ", |st, _| {
        exec_ldmsgaddr(st, true)
    }));
    t.insert(mksimple(0xFA42, 16, "PARSEMSGADDR", |st, _| {
        exec_parsemsgaddr(st, false)
    }));
    t.insert(mksimple(0xFA43, 16, "PARSEMSGADDRQ", |st, _| {
        exec_parsemsgaddr(st, true)
    }));
    t.insert(mksimple(0xFA44, 16, "REWRITESTDADDR", |st, _| {
        exec_rewritestdaddr(st, false, false)
    }));
    t.insert(mksimple(0xFA45, 16, "REWRITESTDADDRQ", |st, _| {
        exec_rewritestdaddr(st, true, false)
    }));
    t.insert(mksimple(0xFA46, 16, "REWRITEVARADDR", |st, _| {
        exec_rewritestdaddr(st, false, true)
    })
    .with_version(10));
    t.insert(mksimple(0xFA47, 16, "REWRITEVARADDRQ", |st, _| {
        exec_rewritestdaddr(st, true, true)
    })
    .with_version(10));

    t.insert(mksimple(0xFB00, 16, "SENDRAWMSG", exec_sendrawmsg));
    t.insert(mksimple(0xFB02, 16, "RAWRESERVE", exec_rawreserve));
    t.insert(mksimple(0xFB03, 16, "RAWRESERVEX", exec_rawreservex));
    t.insert(mksimple(0xFB04, 16, "SETCODE", exec_setcode));
    t.insert(mksimple(0xFB06, 16, "SETLIBCODE", exec_setlibcode));
    t.insert(mksimple(0xFB07, 16, "CHANGELIB", exec_changelib));
    t.insert(mksimple(0xFB08, 16, "SENDMSG", exec_sendmsg).with_version(4));
}
