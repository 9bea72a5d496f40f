use num_bigint::BigInt;

use crate::dispatch::{mkext, mkfixed, mkfixedrange, mksimple, OpcodeTable};
use crate::error::{VmError, VmResult};
use crate::num::{Int257, Round};
use crate::vm::VmState;

fn sign_extend(value: u32, bits: u8) -> i64 {
    let shift = 64 - bits as i64;
    ((value as i64) << shift) >> shift
}

fn exec_push_tinyint(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    // 0x70..0x7A push 0..10, 0x7B..0x7F push -5..-1.
    let val = (((opc as i64 + 5) & 0xF) - 5) as i64;
    st.stack.push_int(val);
    Ok(None)
}

fn exec_push_int8(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    st.stack.push_int(sign_extend(opc & 0xFF, 8));
    Ok(None)
}

fn exec_push_int16(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    st.stack.push_int(sign_extend(opc & 0xFFFF, 16));
    Ok(None)
}

/// `PUSHINT` for wide literals: a 5-bit length `l` encodes an
/// `8*l + 19`-bit signed integer read from the code slice.
fn exec_push_int_wide(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let l = (opc & 0x1F) as usize;
    let bits = 8 * l + 19;
    let val = st.code().fetch_int(bits)?;
    st.stack.push_int(val);
    Ok(None)
}

fn exec_push_pow2(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let c = opc & 0xFF;
    if c == 0xFF {
        // PUSHNAN
        st.stack.push(crate::stack::StackValue::Int(Int257::nan()));
        return Ok(None);
    }
    st.stack
        .push_int(Int257::from_bigint(BigInt::from(1) << (c + 1)));
    Ok(None)
}

fn exec_push_pow2dec(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let c = opc & 0xFF;
    st.stack
        .push_int(Int257::from_bigint((BigInt::from(1) << (c + 1)) - 1));
    Ok(None)
}

fn exec_push_negpow2(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let c = opc & 0xFF;
    st.stack
        .push_int(Int257::from_bigint(-(BigInt::from(1) << (c + 1))));
    Ok(None)
}

fn binary_op(
    st: &mut VmState,
    quiet: bool,
    f: impl FnOnce(&Int257, &Int257) -> Int257,
) -> VmResult<Option<i32>> {
    let y = st.stack.pop_int()?;
    let x = st.stack.pop_int()?;
    st.stack.push_int_checked(f(&x, &y), quiet)?;
    Ok(None)
}

fn unary_op(
    st: &mut VmState,
    quiet: bool,
    f: impl FnOnce(&Int257) -> Int257,
) -> VmResult<Option<i32>> {
    let x = st.stack.pop_int()?;
    st.stack.push_int_checked(f(&x), quiet)?;
    Ok(None)
}

fn exec_add(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    binary_op(st, false, |x, y| x.add(y))
}

fn exec_sub(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    binary_op(st, false, |x, y| x.sub(y))
}

fn exec_subr(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    binary_op(st, false, |x, y| y.sub(x))
}

fn exec_mul(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    binary_op(st, false, |x, y| x.mul(y))
}

fn exec_negate(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    unary_op(st, false, |x| x.negate())
}

fn exec_inc(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    unary_op(st, false, |x| x.add(&Int257::from(1i64)))
}

fn exec_dec(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    unary_op(st, false, |x| x.sub(&Int257::from(1i64)))
}

fn exec_addint(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let c = sign_extend(opc & 0xFF, 8);
    unary_op(st, false, |x| x.add(&Int257::from(c)))
}

fn exec_mulint(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let c = sign_extend(opc & 0xFF, 8);
    unary_op(st, false, |x| x.mul(&Int257::from(c)))
}

fn exec_quiet_add(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    binary_op(st, true, |x, y| x.add(y))
}

fn exec_quiet_sub(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    binary_op(st, true, |x, y| x.sub(y))
}

fn exec_quiet_mul(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    binary_op(st, true, |x, y| x.mul(y))
}

/// Shared executor for the division family.
///
/// The argument byte is laid out as `pp oo rr` (two bits spare):
/// premultiply `pp` (0 none, 1 multiply, 2 left shift by a popped count),
/// output `oo` (1 quotient, 2 remainder, 3 both), rounding `rr`
/// (0 floor, 1 ceil, 2 nearest).
fn exec_divmod(st: &mut VmState, opc: u32, quiet: bool) -> VmResult<Option<i32>> {
    let args = opc & 0xFF;
    let round = match args & 0b11 {
        0 => Round::Floor,
        1 => Round::Ceil,
        2 => Round::Nearest,
        _ => return Err(VmError::inv_opcode("bad rounding mode")),
    };
    let output = (args >> 2) & 0b11;
    if output == 0 {
        return Err(VmError::inv_opcode("bad division output selector"));
    }
    let premultiply = (args >> 6) & 0b11;

    let (quot, rem) = match premultiply {
        0 => {
            let y = st.stack.pop_int()?;
            let x = st.stack.pop_int()?;
            x.div_rem(&y, round)
        }
        1 => {
            let z = st.stack.pop_int()?;
            let y = st.stack.pop_int()?;
            let x = st.stack.pop_int()?;
            x.mul_div_rem(&y, &z, round)
        }
        2 => {
            let z = st.stack.pop_int()?;
            let shift = st.stack.pop_int_range(0, 1023)? as usize;
            let x = st.stack.pop_int()?;
            x.lshift_div_rem(shift, &z, round)
        }
        _ => return Err(VmError::inv_opcode("bad premultiply selector")),
    };

    // A zero divisor (NaN result) is a range-check failure unless quiet.
    if !quiet && quot.is_nan() {
        return Err(VmError::range_chk("division by zero or NaN operand"));
    }
    if output & 0b01 != 0 {
        st.stack.push_int_checked(quot, quiet)?;
    }
    if output & 0b10 != 0 {
        st.stack.push_int_checked(rem, quiet)?;
    }
    Ok(None)
}

fn exec_div(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    exec_divmod(st, opc, false)
}

fn exec_quiet_div(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    exec_divmod(st, opc, true)
}

fn exec_lshift_const(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let shift = (opc & 0xFF) as usize + 1;
    unary_op(st, false, |x| x.lshift(shift))
}

fn exec_rshift_const(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let shift = (opc & 0xFF) as usize + 1;
    unary_op(st, false, |x| x.rshift(shift, Round::Floor))
}

fn exec_lshift(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let shift = st.stack.pop_int_range(0, 1023)? as usize;
    unary_op(st, false, |x| x.lshift(shift))
}

fn exec_rshift(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let shift = st.stack.pop_int_range(0, 1023)? as usize;
    unary_op(st, false, |x| x.rshift(shift, Round::Floor))
}

fn exec_pow2(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let n = st.stack.pop_int_range(0, 1023)? as usize;
    st.stack
        .push_int_checked(Int257::from(1i64).lshift(n), false)?;
    Ok(None)
}

fn exec_and(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    binary_op(st, false, |x, y| x.bit_and(y))
}

fn exec_or(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    binary_op(st, false, |x, y| x.bit_or(y))
}

fn exec_xor(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    binary_op(st, false, |x, y| x.bit_xor(y))
}

fn exec_not(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    unary_op(st, false, |x| x.bit_not())
}

fn exec_fits(st: &mut VmState, opc: u32, signed: bool, quiet: bool) -> VmResult<Option<i32>> {
    let bits = (opc & 0xFF) as u64 + 1;
    fits_impl(st, bits, signed, quiet)
}

fn exec_fitsx(st: &mut VmState, signed: bool) -> VmResult<Option<i32>> {
    let bits = st.stack.pop_int_range(0, 1023)? as u64;
    fits_impl(st, bits, signed, false)
}

fn fits_impl(st: &mut VmState, bits: u64, signed: bool, quiet: bool) -> VmResult<Option<i32>> {
    let x = st.stack.pop_int()?;
    let ok = if signed {
        x.signed_fits(bits)
    } else {
        x.unsigned_fits(bits)
    };
    if ok {
        st.stack.push_int(x);
    } else {
        st.stack.push_int_checked(Int257::nan(), quiet)?;
    }
    Ok(None)
}

fn exec_bitsize(st: &mut VmState, signed: bool) -> VmResult<Option<i32>> {
    let x = st.stack.pop_int()?;
    match x.bit_size(signed) {
        Some(bits) => st.stack.push_int(bits),
        None => return Err(VmError::range_chk("bit size of a negative or NaN value")),
    }
    Ok(None)
}

fn exec_min(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let y = st.stack.pop_finite()?;
    let x = st.stack.pop_finite()?;
    let min = if x.cmp_finite(&y) == Some(std::cmp::Ordering::Greater) {
        y
    } else {
        x
    };
    st.stack.push_int(min);
    Ok(None)
}

fn exec_max(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let y = st.stack.pop_finite()?;
    let x = st.stack.pop_finite()?;
    let max = if x.cmp_finite(&y) == Some(std::cmp::Ordering::Less) {
        y
    } else {
        x
    };
    st.stack.push_int(max);
    Ok(None)
}

fn exec_minmax(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let y = st.stack.pop_finite()?;
    let x = st.stack.pop_finite()?;
    let (min, max) = if x.cmp_finite(&y) == Some(std::cmp::Ordering::Greater) {
        (y, x)
    } else {
        (x, y)
    };
    st.stack.push_int(min);
    st.stack.push_int(max);
    Ok(None)
}

fn exec_abs(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    unary_op(st, false, |x| x.abs())
}

fn exec_sgn(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let x = st.stack.pop_finite()?;
    st.stack.push_int(x.sign().unwrap_or(0) as i64);
    Ok(None)
}

/// Comparison executor; `mode` encodes the result for less/equal/greater as
/// three packed signed crumbs.
fn exec_cmp(st: &mut VmState, lt: i64, eq: i64, gt: i64) -> VmResult<Option<i32>> {
    let y = st.stack.pop_finite()?;
    let x = st.stack.pop_finite()?;
    let res = match x.cmp_finite(&y) {
        Some(std::cmp::Ordering::Less) => lt,
        Some(std::cmp::Ordering::Equal) => eq,
        Some(std::cmp::Ordering::Greater) => gt,
        None => return Err(VmError::int_ov("comparison with NaN")),
    };
    st.stack.push_int(res);
    Ok(None)
}

fn exec_cmp_int(st: &mut VmState, opc: u32, lt: i64, eq: i64, gt: i64) -> VmResult<Option<i32>> {
    let c = sign_extend(opc & 0xFF, 8);
    let x = st.stack.pop_finite()?;
    let res = match x.cmp_finite(&Int257::from(c)) {
        Some(std::cmp::Ordering::Less) => lt,
        Some(std::cmp::Ordering::Equal) => eq,
        Some(std::cmp::Ordering::Greater) => gt,
        None => return Err(VmError::int_ov("comparison with NaN")),
    };
    st.stack.push_int(res);
    Ok(None)
}

fn exec_is_nan(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let x = st.stack.pop_int()?;
    st.stack.push_bool(x.is_nan());
    Ok(None)
}

fn exec_chk_nan(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let x = st.stack.pop_int()?;
    if x.is_nan() {
        return Err(VmError::int_ov("CHKNAN on NaN"));
    }
    st.stack.push_int(x);
    Ok(None)
}

pub fn register(t: &mut OpcodeTable) {
    t.insert(mkfixedrange(0x70, 0x80, 8, "PUSHINT", exec_push_tinyint));
    t.insert(mkfixed(0x80, 8, 8, "PUSHINT", exec_push_int8));
    t.insert(mkfixed(0x81, 8, 16, "PUSHINT", exec_push_int16));
    t.insert(mkext(0x82, 8, 5, "PUSHINT", exec_push_int_wide));
    t.insert(mkfixed(0x83, 8, 8, "PUSHPOW2", exec_push_pow2));
    t.insert(mkfixed(0x84, 8, 8, "PUSHPOW2DEC", exec_push_pow2dec));
    t.insert(mkfixed(0x85, 8, 8, "PUSHNEGPOW2", exec_push_negpow2));

    t.insert(mksimple(0xA0, 8, "ADD", exec_add));
    t.insert(mksimple(0xA1, 8, "SUB", exec_sub));
    t.insert(mksimple(0xA2, 8, "SUBR", exec_subr));
    t.insert(mksimple(0xA3, 8, "NEGATE", exec_negate));
    t.insert(mksimple(0xA4, 8, "INC", exec_inc));
    t.insert(mksimple(0xA5, 8, "DEC", exec_dec));
    t.insert(mkfixed(0xA6, 8, 8, "ADDINT", exec_addint));
    t.insert(mkfixed(0xA7, 8, 8, "MULINT", exec_mulint));
    t.insert(mksimple(0xA8, 8, "MUL", exec_mul));
    t.insert(mkfixed(0xA9, 8, 8, "DIV", exec_div));
    t.insert(mkfixed(0xAA, 8, 8, "LSHIFT#", exec_lshift_const));
    t.insert(mkfixed(0xAB, 8, 8, "RSHIFT#", exec_rshift_const));
    t.insert(mksimple(0xAC, 8, "LSHIFT", exec_lshift));
    t.insert(mksimple(0xAD, 8, "RSHIFT", exec_rshift));
    t.insert(mksimple(0xAE, 8, "POW2", exec_pow2));

    t.insert(mksimple(0xB0, 8, "AND", exec_and));
    t.insert(mksimple(0xB1, 8, "OR", exec_or));
    t.insert(mksimple(0xB2, 8, "XOR", exec_xor));
    t.insert(mksimple(0xB3, 8, "NOT", exec_not));
    t.insert(mkfixed(0xB4, 8, 8, "FITS", |st, opc| {
        exec_fits(st, opc, true, false)
    }));
    t.insert(mkfixed(0xB5, 8, 8, "UFITS", |st, opc| {
        exec_fits(st, opc, false, false)
    }));
    t.insert(mksimple(0xB600, 16, "FITSX", |st, _| exec_fitsx(st, true)));
    t.insert(mksimple(0xB601, 16, "UFITSX", |st, _| exec_fitsx(st, false)));
    t.insert(mksimple(0xB602, 16, "BITSIZE", |st, _| {
        exec_bitsize(st, true)
    }));
    t.insert(mksimple(0xB603, 16, "UBITSIZE", |st, _| {
        exec_bitsize(st, false)
    }));
    t.insert(mksimple(0xB608, 16, "MIN", exec_min));
    t.insert(mksimple(0xB609, 16, "MAX", exec_max));
    t.insert(mksimple(0xB60A, 16, "MINMAX", exec_minmax));
    t.insert(mksimple(0xB60B, 16, "ABS", exec_abs));

    t.insert(mksimple(0xB7A0, 16, "QADD", exec_quiet_add));
    t.insert(mksimple(0xB7A1, 16, "QSUB", exec_quiet_sub));
    t.insert(mksimple(0xB7A8, 16, "QMUL", exec_quiet_mul));
    t.insert(mkfixed(0xB7A9, 16, 8, "QDIV", exec_quiet_div));
    t.insert(mkfixed(0xB7B4, 16, 8, "QFITS", |st, opc| {
        exec_fits(st, opc, true, true)
    }));
    t.insert(mkfixed(0xB7B5, 16, 8, "QUFITS", |st, opc| {
        exec_fits(st, opc, false, true)
    }));

    t.insert(mksimple(0xB8, 8, "SGN", exec_sgn));
    t.insert(mksimple(0xB9, 8, "LESS", |st, _| {
        exec_cmp(st, -1, 0, 0)
    }));
    t.insert(mksimple(0xBA, 8, "EQUAL", |st, _| {
        exec_cmp(st, 0, -1, 0)
    }));
    t.insert(mksimple(0xBB, 8, "LEQ", |st, _| {
        exec_cmp(st, -1, -1, 0)
    }));
    t.insert(mksimple(0xBC, 8, "GREATER", |st, _| {
        exec_cmp(st, 0, 0, -1)
    }));
    t.insert(mksimple(0xBD, 8, "NEQ", |st, _| {
        exec_cmp(st, -1, 0, -1)
    }));
    t.insert(mksimple(0xBE, 8, "GEQ", |st, _| {
        exec_cmp(st, 0, -1, -1)
    }));
    t.insert(mksimple(0xBF, 8, "CMP", |st, _| {
        exec_cmp(st, -1, 0, 1)
    }));
    t.insert(mkfixed(0xC0, 8, 8, "EQINT", |st, opc| {
        exec_cmp_int(st, opc, 0, -1, 0)
    }));
    t.insert(mkfixed(0xC1, 8, 8, "LESSINT", |st, opc| {
        exec_cmp_int(st, opc, -1, 0, 0)
    }));
    t.insert(mkfixed(0xC2, 8, 8, "GTINT", |st, opc| {
        exec_cmp_int(st, opc, 0, 0, -1)
    }));
    t.insert(mkfixed(0xC3, 8, 8, "NEQINT", |st, opc| {
        exec_cmp_int(st, opc, -1, 0, -1)
    }));
    t.insert(mksimple(0xC4, 8, "ISNAN", exec_is_nan));
    t.insert(mksimple(0xC5, 8, "CHKNAN", exec_chk_nan));
}

/// Argument bytes for the `DIV` family (the `A9` opcode).
pub mod div_args {
    pub const DIV: u32 = 0b00_00_01_00;
    pub const DIVC: u32 = 0b00_00_01_01;
    pub const DIVR: u32 = 0b00_00_01_10;
    pub const MOD: u32 = 0b00_00_10_00;
    pub const DIVMOD: u32 = 0b00_00_11_00;
    pub const MULDIV: u32 = 0b01_00_01_00;
    pub const MULDIVC: u32 = 0b01_00_01_01;
    pub const MULDIVR: u32 = 0b01_00_01_10;
    pub const MULMOD: u32 = 0b01_00_10_00;
    pub const MULDIVMOD: u32 = 0b01_00_11_00;
    pub const LSHIFTDIV: u32 = 0b10_00_01_00;
    pub const LSHIFTDIVMOD: u32 = 0b10_00_11_00;
}
