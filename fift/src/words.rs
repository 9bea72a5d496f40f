//! The built-in word set: stack manipulation, arithmetic, strings, cells,
//! boxes, tuples, atoms, hashmaps, dictionaries, control flow, the
//! compiler brackets and the TVM bridge.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use crc::Crc;
use lazy_static::lazy_static;
use num_bigint::{BigInt, Sign};
use sha2::{Digest, Sha256};

use tonvm_core::cell::dict as celldict;
use tonvm_core::cell::{BagOfCells, CellBuilder, OwnedCellSlice};
use tonvm_core::gas::GasLimits;
use tonvm_core::num::{Int257, Round};
use tonvm_core::stack::{Atom, SharedBox, Stack, StackValue};
use tonvm_core::vm::{run_vm_code, VmOptions, DEFAULT_GLOBAL_VERSION};

use crate::cont::{as_cont, chain, pop_cont, push_cont, FiftCont, FiftContObj, WordListBuilder};
use crate::ctx::{parse_number, IntCtx};
use crate::dictionary::{hashmap_from_value, hashmap_value, DictEntry, Dictionary};
use crate::errors::{FiftError, FiftResult};
use crate::hashmap::{self, DictKey};

lazy_static! {
    static ref CRC16_XMODEM: Crc<u16> = Crc::<u16>::new(&crc::CRC_16_XMODEM);
    static ref CRC32_ISO: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
    static ref CRC32_C: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISCSI);
}

fn err(msg: impl Into<String>) -> FiftError {
    FiftError::new(msg)
}

fn pop_usize(stack: &mut Stack, max: u32) -> FiftResult<usize> {
    Ok(stack.pop_smallint_range(max)? as usize)
}

fn pop_int257(stack: &mut Stack) -> FiftResult<Int257> {
    Ok(stack.pop_finite()?)
}

fn builder_mut(builder: Arc<CellBuilder>) -> CellBuilder {
    Arc::try_unwrap(builder).unwrap_or_else(|shared| (*shared).clone())
}

/// Registers every built-in word into `d`.
pub fn init_words(d: &Dictionary) {
    init_stack_words(d);
    init_arith_words(d);
    init_print_words(d);
    init_string_words(d);
    init_cell_words(d);
    init_box_tuple_words(d);
    init_atom_words(d);
    init_hashmap_words(d);
    init_cell_dict_words(d);
    init_control_words(d);
    init_compiler_words(d);
    init_interp_words(d);
    init_crypto_words(d);
    init_ton_words(d);
    init_vm_words(d);
}

fn init_stack_words(d: &Dictionary) {
    d.def_word("nop", FiftCont::nop());
    d.def_stack_word("drop", |s| Ok(s.pop().map(|_| ())?));
    d.def_stack_word("2drop", |s| Ok(s.drop_many(2)?));
    d.def_stack_word("dup", |s| Ok(s.dup()?));
    d.def_stack_word("over", |s| Ok(s.over()?));
    d.def_stack_word("2dup", |s| {
        s.check_underflow(2)?;
        s.pick(1)?;
        s.pick(1)?;
        Ok(())
    });
    d.def_stack_word("2over", |s| {
        s.check_underflow(4)?;
        s.pick(3)?;
        s.pick(3)?;
        Ok(())
    });
    d.def_stack_word("swap", |s| Ok(s.swap(0, 1)?));
    d.def_stack_word("2swap", |s| {
        s.check_underflow(4)?;
        s.swap(0, 2)?;
        s.swap(1, 3)?;
        Ok(())
    });
    d.def_stack_word("tuck", |s| {
        s.swap(0, 1)?;
        s.pick(1)?;
        Ok(())
    });
    d.def_stack_word("nip", |s| {
        s.swap(0, 1)?;
        s.pop()?;
        Ok(())
    });
    d.def_stack_word("rot", |s| Ok(s.roll(2)?));
    d.def_stack_word("-rot", |s| Ok(s.roll_rev(2)?));
    d.def_stack_word("pick", |s| {
        let n = s.pop_smallint_range(255)? as usize;
        Ok(s.pick(n)?)
    });
    d.def_stack_word("roll", |s| {
        let n = s.pop_smallint_range(255)? as usize;
        Ok(s.roll(n)?)
    });
    d.def_stack_word("-roll", |s| {
        let n = s.pop_smallint_range(255)? as usize;
        Ok(s.roll_rev(n)?)
    });
    d.def_stack_word("exch", |s| {
        let n = s.pop_smallint_range(255)? as usize;
        Ok(s.swap(0, n)?)
    });
    d.def_stack_word("exch2", |s| {
        let j = s.pop_smallint_range(255)? as usize;
        let i = s.pop_smallint_range(255)? as usize;
        Ok(s.swap(i, j)?)
    });
    d.def_stack_word("reverse", |s| {
        let m = s.pop_smallint_range(255)? as usize;
        let n = s.pop_smallint_range(255)? as usize;
        Ok(s.reverse(n, m)?)
    });
    d.def_stack_word("depth", |s| {
        let depth = s.depth() as i64;
        s.push_int(depth);
        Ok(())
    });
    d.def_stack_word("?dup", |s| {
        let top = s.fetch(0)?;
        let fire = match &top {
            StackValue::Int(i) => i.is_true(),
            other => !other.is_null(),
        };
        if fire {
            s.push(top);
        }
        Ok(())
    });
}

fn binary_int(s: &mut Stack, f: impl FnOnce(&Int257, &Int257) -> Int257) -> FiftResult<()> {
    let y = pop_int257(s)?;
    let x = pop_int257(s)?;
    let result = f(&x, &y);
    if result.is_nan() {
        return Err(err("integer overflow"));
    }
    s.push(StackValue::Int(result));
    Ok(())
}

fn div_word(s: &mut Stack, round: Round, quot: bool, rem: bool) -> FiftResult<()> {
    let y = pop_int257(s)?;
    let x = pop_int257(s)?;
    let (q, r) = x.div_rem(&y, round);
    if (quot && q.is_nan()) || (rem && r.is_nan()) {
        return Err(err("division by zero"));
    }
    if quot {
        s.push(StackValue::Int(q));
    }
    if rem {
        s.push(StackValue::Int(r));
    }
    Ok(())
}

fn muldiv_word(s: &mut Stack, round: Round, quot: bool, rem: bool) -> FiftResult<()> {
    let z = pop_int257(s)?;
    let y = pop_int257(s)?;
    let x = pop_int257(s)?;
    let (q, r) = x.mul_div_rem(&y, &z, round);
    if (quot && q.is_nan()) || (rem && r.is_nan()) {
        return Err(err("division by zero or overflow"));
    }
    if quot {
        s.push(StackValue::Int(q));
    }
    if rem {
        s.push(StackValue::Int(r));
    }
    Ok(())
}

fn cmp_word(s: &mut Stack, lt: i64, eq: i64, gt: i64) -> FiftResult<()> {
    let y = pop_int257(s)?;
    let x = pop_int257(s)?;
    let result = match x.cmp_finite(&y).ok_or_else(|| err("NaN comparison"))? {
        std::cmp::Ordering::Less => lt,
        std::cmp::Ordering::Equal => eq,
        std::cmp::Ordering::Greater => gt,
    };
    s.push_int(result);
    Ok(())
}

fn sgn_word(s: &mut Stack, lt: i64, eq: i64, gt: i64) -> FiftResult<()> {
    let x = pop_int257(s)?;
    let result = match x.sign().ok_or_else(|| err("NaN sign"))? {
        -1 => lt,
        0 => eq,
        _ => gt,
    };
    s.push_int(result);
    Ok(())
}

fn init_arith_words(d: &Dictionary) {
    d.def_stack_word("+", |s| binary_int(s, |x, y| x.add(y)));
    d.def_stack_word("-", |s| binary_int(s, |x, y| x.sub(y)));
    d.def_stack_word("*", |s| binary_int(s, |x, y| x.mul(y)));
    d.def_stack_word("negate", |s| binary_unary(s, |x| x.negate()));
    d.def_stack_word("abs", |s| binary_unary(s, |x| x.abs()));
    d.def_stack_word("1+", |s| binary_unary(s, |x| x.add(&Int257::from(1i64))));
    d.def_stack_word("1-", |s| binary_unary(s, |x| x.sub(&Int257::from(1i64))));
    d.def_stack_word("2+", |s| binary_unary(s, |x| x.add(&Int257::from(2i64))));
    d.def_stack_word("2-", |s| binary_unary(s, |x| x.sub(&Int257::from(2i64))));
    d.def_stack_word("2*", |s| binary_unary(s, |x| x.lshift(1)));
    d.def_stack_word("2/", |s| binary_unary(s, |x| x.rshift(1, Round::Floor)));
    d.def_stack_word("/", |s| div_word(s, Round::Floor, true, false));
    d.def_stack_word("/c", |s| div_word(s, Round::Ceil, true, false));
    d.def_stack_word("/r", |s| div_word(s, Round::Nearest, true, false));
    d.def_stack_word("mod", |s| div_word(s, Round::Floor, false, true));
    d.def_stack_word("cmod", |s| div_word(s, Round::Ceil, false, true));
    d.def_stack_word("rmod", |s| div_word(s, Round::Nearest, false, true));
    d.def_stack_word("/mod", |s| div_word(s, Round::Floor, true, true));
    d.def_stack_word("/cmod", |s| div_word(s, Round::Ceil, true, true));
    d.def_stack_word("/rmod", |s| div_word(s, Round::Nearest, true, true));
    d.def_stack_word("*/", |s| muldiv_word(s, Round::Floor, true, false));
    d.def_stack_word("*/c", |s| muldiv_word(s, Round::Ceil, true, false));
    d.def_stack_word("*/r", |s| muldiv_word(s, Round::Nearest, true, false));
    d.def_stack_word("*/mod", |s| muldiv_word(s, Round::Floor, true, true));
    d.def_stack_word("*/cmod", |s| muldiv_word(s, Round::Ceil, true, true));
    d.def_stack_word("*/rmod", |s| muldiv_word(s, Round::Nearest, true, true));
    d.def_stack_word("*mod", |s| muldiv_word(s, Round::Floor, false, true));
    d.def_stack_word("min", |s| {
        let y = pop_int257(s)?;
        let x = pop_int257(s)?;
        let keep_y = x.cmp_finite(&y) == Some(std::cmp::Ordering::Greater);
        s.push(StackValue::Int(if keep_y { y } else { x }));
        Ok(())
    });
    d.def_stack_word("max", |s| {
        let y = pop_int257(s)?;
        let x = pop_int257(s)?;
        let keep_y = x.cmp_finite(&y) == Some(std::cmp::Ordering::Less);
        s.push(StackValue::Int(if keep_y { y } else { x }));
        Ok(())
    });
    d.def_stack_word("<<", |s| {
        let n = pop_usize(s, 1023)?;
        let x = pop_int257(s)?;
        let r = x.lshift(n);
        if r.is_nan() {
            return Err(err("integer overflow"));
        }
        s.push(StackValue::Int(r));
        Ok(())
    });
    d.def_stack_word(">>", |s| rshift_word(s, Round::Floor));
    d.def_stack_word(">>c", |s| rshift_word(s, Round::Ceil));
    d.def_stack_word(">>r", |s| rshift_word(s, Round::Nearest));
    d.def_stack_word("1<<", |s| {
        let n = pop_usize(s, 1023)?;
        let r = Int257::from(1i64).lshift(n);
        if r.is_nan() {
            return Err(err("integer overflow"));
        }
        s.push(StackValue::Int(r));
        Ok(())
    });
    d.def_stack_word("-1<<", |s| {
        let n = pop_usize(s, 1023)?;
        let r = Int257::minus_one().lshift(n);
        if r.is_nan() {
            return Err(err("integer overflow"));
        }
        s.push(StackValue::Int(r));
        Ok(())
    });
    d.def_stack_word("1<<1-", |s| {
        let n = pop_usize(s, 1023)?;
        s.push(StackValue::Int(Int257::from_bigint(
            (BigInt::from(1) << n) - 1,
        )));
        Ok(())
    });
    d.def_stack_word("%1<<", |s| {
        let n = pop_usize(s, 1023)?;
        let x = pop_int257(s)?;
        let mask = (BigInt::from(1) << n) - 1;
        let v = x.finite().map_err(|_| err("NaN"))?.clone() & mask;
        s.push(StackValue::Int(Int257::from_bigint(v)));
        Ok(())
    });
    d.def_stack_word("and", |s| binary_int(s, |x, y| x.bit_and(y)));
    d.def_stack_word("or", |s| binary_int(s, |x, y| x.bit_or(y)));
    d.def_stack_word("xor", |s| binary_int(s, |x, y| x.bit_xor(y)));
    d.def_stack_word("not", |s| binary_unary(s, |x| x.bit_not()));
    d.def_stack_word("cmp", |s| cmp_word(s, -1, 0, 1));
    d.def_stack_word("=", |s| cmp_word(s, 0, -1, 0));
    d.def_stack_word("<>", |s| cmp_word(s, -1, 0, -1));
    d.def_stack_word("<", |s| cmp_word(s, -1, 0, 0));
    d.def_stack_word(">", |s| cmp_word(s, 0, 0, -1));
    d.def_stack_word("<=", |s| cmp_word(s, -1, -1, 0));
    d.def_stack_word(">=", |s| cmp_word(s, 0, -1, -1));
    d.def_stack_word("sgn", |s| sgn_word(s, -1, 0, 1));
    d.def_stack_word("0=", |s| sgn_word(s, 0, -1, 0));
    d.def_stack_word("0<>", |s| sgn_word(s, -1, 0, -1));
    d.def_stack_word("0<", |s| sgn_word(s, -1, 0, 0));
    d.def_stack_word("0>", |s| sgn_word(s, 0, 0, -1));
    d.def_stack_word("0<=", |s| sgn_word(s, -1, -1, 0));
    d.def_stack_word("0>=", |s| sgn_word(s, 0, -1, -1));
    d.def_stack_word("fits", |s| {
        let n = pop_usize(s, 1023)?;
        let x = pop_int257(s)?;
        s.push_bool(x.signed_fits(n as u64));
        Ok(())
    });
    d.def_stack_word("ufits", |s| {
        let n = pop_usize(s, 1023)?;
        let x = pop_int257(s)?;
        s.push_bool(x.unsigned_fits(n as u64));
        Ok(())
    });
    d.def_stack_word("integer?", |s| {
        let v = s.pop()?;
        s.push_bool(matches!(v, StackValue::Int(_)));
        Ok(())
    });
    d.def_word("true", Arc::new(FiftCont::IntLit(Int257::minus_one())));
    d.def_word("false", Arc::new(FiftCont::IntLit(Int257::zero())));
    d.def_word("bl", Arc::new(FiftCont::IntLit(Int257::from(32i64))));
}

fn binary_unary(s: &mut Stack, f: impl FnOnce(&Int257) -> Int257) -> FiftResult<()> {
    let x = pop_int257(s)?;
    let r = f(&x);
    if r.is_nan() {
        return Err(err("integer overflow"));
    }
    s.push(StackValue::Int(r));
    Ok(())
}

fn rshift_word(s: &mut Stack, round: Round) -> FiftResult<()> {
    let n = pop_usize(s, 1023)?;
    let x = pop_int257(s)?;
    s.push(StackValue::Int(x.rshift(n, round)));
    Ok(())
}

fn int_to_radix(x: &Int257, radix: u32, upper: bool) -> String {
    let value = match x.as_bigint() {
        Some(v) => v.to_str_radix(radix),
        None => return "NaN".to_owned(),
    };
    if upper {
        value.to_uppercase()
    } else {
        value
    }
}

fn init_print_words(d: &Dictionary) {
    d.def_ctx_word(".", |ctx| {
        let x = pop_int257(&mut ctx.stack)?;
        ctx.write_str(&format!("{x} "))
    });
    d.def_ctx_word("._", |ctx| {
        let x = pop_int257(&mut ctx.stack)?;
        ctx.write_str(&x.to_string())
    });
    d.def_ctx_word("x.", |ctx| {
        let x = pop_int257(&mut ctx.stack)?;
        let text = int_to_radix(&x, 16, false);
        ctx.write_str(&format!("{text} "))
    });
    d.def_ctx_word("x._", |ctx| {
        let x = pop_int257(&mut ctx.stack)?;
        ctx.write_str(&int_to_radix(&x, 16, false))
    });
    d.def_ctx_word("X.", |ctx| {
        let x = pop_int257(&mut ctx.stack)?;
        let text = int_to_radix(&x, 16, true);
        ctx.write_str(&format!("{text} "))
    });
    d.def_ctx_word("X._", |ctx| {
        let x = pop_int257(&mut ctx.stack)?;
        ctx.write_str(&int_to_radix(&x, 16, true))
    });
    d.def_ctx_word("b.", |ctx| {
        let x = pop_int257(&mut ctx.stack)?;
        let text = int_to_radix(&x, 2, false);
        ctx.write_str(&format!("{text} "))
    });
    d.def_ctx_word("b._", |ctx| {
        let x = pop_int257(&mut ctx.stack)?;
        ctx.write_str(&int_to_radix(&x, 2, false))
    });
    d.def_stack_word("(.)", |s| {
        let x = pop_int257(s)?;
        s.push_string(x.to_string());
        Ok(())
    });
    d.def_ctx_word(".s", |ctx| {
        let dump = ctx.stack.dump();
        ctx.write_str(&format!("{} \n", dump.trim_start()))
    });
    d.def_ctx_word("cr", |ctx| ctx.write_str("\n"));
    d.def_ctx_word("space", |ctx| ctx.write_str(" "));
    d.def_ctx_word("emit", |ctx| {
        let code = ctx.stack.pop_smallint_range(0x10FFFF)?;
        let ch = char::from_u32(code).ok_or_else(|| err("invalid code point"))?;
        ctx.write_str(&ch.to_string())
    });
    d.def_ctx_word("type", |ctx| {
        let text = ctx.stack.pop_string()?;
        ctx.write_str(&text)
    });
    d.def_stack_word("chr", |s| {
        let code = s.pop_smallint_range(0x10FFFF)?;
        let ch = char::from_u32(code).ok_or_else(|| err("invalid code point"))?;
        s.push_string(ch.to_string());
        Ok(())
    });
    d.def_stack_word("hold", |s| {
        let code = s.pop_smallint_range(0x10FFFF)?;
        let mut text = s.pop_string()?;
        let ch = char::from_u32(code).ok_or_else(|| err("invalid code point"))?;
        text.push(ch);
        s.push_string(text);
        Ok(())
    });
    d.def_stack_word("(number)", |s| {
        let text = s.pop_string()?;
        match parse_number(&text) {
            Some(values) => {
                let n = values.len() as i64;
                for value in values {
                    s.push(value);
                }
                s.push_int(n);
            }
            None => s.push_int(0i64),
        }
        Ok(())
    });
}

fn init_string_words(d: &Dictionary) {
    d.def_stack_word("$+", |s| {
        let b = s.pop_string()?;
        let mut a = s.pop_string()?;
        a.push_str(&b);
        s.push_string(a);
        Ok(())
    });
    d.def_stack_word("$=", |s| {
        let b = s.pop_string()?;
        let a = s.pop_string()?;
        s.push_bool(a == b);
        Ok(())
    });
    d.def_stack_word("$cmp", |s| {
        let b = s.pop_string()?;
        let a = s.pop_string()?;
        s.push_int(match a.cmp(&b) {
            std::cmp::Ordering::Less => -1i64,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        });
        Ok(())
    });
    d.def_stack_word("$len", |s| {
        let a = s.pop_string()?;
        s.push_int(a.len() as i64);
        Ok(())
    });
    d.def_stack_word("$reverse", |s| {
        let a = s.pop_string()?;
        s.push_string(a.chars().rev().collect::<String>());
        Ok(())
    });
    d.def_stack_word("$|", |s| {
        let at = pop_usize(s, u32::MAX)?;
        let a = s.pop_string()?;
        if at > a.len() {
            return Err(err("split point past the end"));
        }
        let (head, tail) = a.split_at(at);
        s.push_string(head.to_owned());
        s.push_string(tail.to_owned());
        Ok(())
    });
    d.def_stack_word("$pos", |s| {
        let needle = s.pop_string()?;
        let haystack = s.pop_string()?;
        match haystack.find(&needle) {
            Some(idx) => s.push_int(idx as i64),
            None => s.push_int(-1i64),
        }
        Ok(())
    });
    d.def_stack_word("-trailing", |s| {
        let a = s.pop_string()?;
        s.push_string(a.trim_end_matches(' ').to_owned());
        Ok(())
    });
    d.def_stack_word("(-trailing)", |s| {
        let code = s.pop_smallint_range(255)? as u8 as char;
        let a = s.pop_string()?;
        s.push_string(a.trim_end_matches(code).to_owned());
        Ok(())
    });
    d.def_stack_word("string?", |s| {
        let v = s.pop()?;
        s.push_bool(matches!(v, StackValue::String(_)));
        Ok(())
    });
    d.def_stack_word("$>B", |s| {
        let a = s.pop_string()?;
        s.push(StackValue::Bytes(a.into_bytes()));
        Ok(())
    });
    d.def_stack_word("B>$", |s| {
        let b = s.pop_bytes()?;
        let text = String::from_utf8(b).map_err(|_| err("invalid UTF-8"))?;
        s.push_string(text);
        Ok(())
    });
    d.def_stack_word("Blen", |s| {
        let b = s.pop_bytes()?;
        s.push_int(b.len() as i64);
        Ok(())
    });
    d.def_stack_word("B+", |s| {
        let b = s.pop_bytes()?;
        let mut a = s.pop_bytes()?;
        a.extend_from_slice(&b);
        s.push(StackValue::Bytes(a));
        Ok(())
    });
    d.def_stack_word("B=", |s| {
        let b = s.pop_bytes()?;
        let a = s.pop_bytes()?;
        s.push_bool(a == b);
        Ok(())
    });
    d.def_stack_word("Bcmp", |s| {
        let b = s.pop_bytes()?;
        let a = s.pop_bytes()?;
        s.push_int(match a.cmp(&b) {
            std::cmp::Ordering::Less => -1i64,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        });
        Ok(())
    });
    d.def_stack_word("B|", |s| {
        let at = pop_usize(s, u32::MAX)?;
        let a = s.pop_bytes()?;
        if at > a.len() {
            return Err(err("split point past the end"));
        }
        let tail = a[at..].to_vec();
        let head = a[..at].to_vec();
        s.push(StackValue::Bytes(head));
        s.push(StackValue::Bytes(tail));
        Ok(())
    });
    d.def_stack_word("B>X", |s| {
        let b = s.pop_bytes()?;
        s.push_string(hex::encode_upper(b));
        Ok(())
    });
    d.def_stack_word("B>x", |s| {
        let b = s.pop_bytes()?;
        s.push_string(hex::encode(b));
        Ok(())
    });
    d.def_stack_word("x>B", |s| {
        let a = s.pop_string()?;
        let b = hex::decode(a.trim()).map_err(|_| err("invalid hex string"))?;
        s.push(StackValue::Bytes(b));
        Ok(())
    });
    d.def_stack_word("x>B?", |s| {
        let a = s.pop_string()?;
        match hex::decode(a.trim()) {
            Ok(b) => {
                s.push(StackValue::Bytes(b));
                s.push_bool(true);
            }
            Err(_) => s.push_bool(false),
        }
        Ok(())
    });
    d.def_stack_word("u>B", |s| int_to_bytes(s, false));
    d.def_stack_word("i>B", |s| int_to_bytes(s, true));
    d.def_stack_word("B>u@", |s| bytes_fetch_int(s, false, false));
    d.def_stack_word("B>i@", |s| bytes_fetch_int(s, true, false));
    d.def_stack_word("B>u@+", |s| bytes_fetch_int(s, false, true));
    d.def_stack_word("B>i@+", |s| bytes_fetch_int(s, true, true));
    d.def_stack_word("Bhash", |s| {
        let b = s.pop_bytes()?;
        let digest = Sha256::digest(&b);
        s.push(StackValue::Int(Int257::from_unsigned_bytes(&digest)));
        Ok(())
    });
    d.def_stack_word("Bhashu", |s| {
        let b = s.pop_bytes()?;
        let digest = Sha256::digest(&b);
        s.push(StackValue::Int(Int257::from_unsigned_bytes(&digest)));
        Ok(())
    });
    d.def_stack_word("BhashB", |s| {
        let b = s.pop_bytes()?;
        let digest = Sha256::digest(&b);
        s.push(StackValue::Bytes(digest.to_vec()));
        Ok(())
    });
    d.def_stack_word("crc16", |s| {
        let b = s.pop_bytes()?;
        s.push_int(CRC16_XMODEM.checksum(&b) as i64);
        Ok(())
    });
    d.def_stack_word("crc32", |s| {
        let b = s.pop_bytes()?;
        s.push_int(CRC32_ISO.checksum(&b) as i64);
        Ok(())
    });
    d.def_stack_word("crc32c", |s| {
        let b = s.pop_bytes()?;
        s.push_int(CRC32_C.checksum(&b) as i64);
        Ok(())
    });
    d.def_stack_word("B>base64", |s| {
        let b = s.pop_bytes()?;
        s.push_string(STANDARD.encode(b));
        Ok(())
    });
    d.def_stack_word("base64>B", |s| {
        let a = s.pop_string()?;
        let b = STANDARD.decode(a).map_err(|_| err("invalid base64"))?;
        s.push(StackValue::Bytes(b));
        Ok(())
    });
    d.def_stack_word("B>base64url", |s| {
        let b = s.pop_bytes()?;
        s.push_string(URL_SAFE_NO_PAD.encode(b));
        Ok(())
    });
    d.def_stack_word("base64url>B", |s| {
        let a = s.pop_string()?;
        let b = URL_SAFE_NO_PAD.decode(a).map_err(|_| err("invalid base64"))?;
        s.push(StackValue::Bytes(b));
        Ok(())
    });
}

fn int_to_bytes(s: &mut Stack, signed: bool) -> FiftResult<()> {
    let bits = pop_usize(s, 256)?;
    if bits % 8 != 0 || bits == 0 {
        return Err(err("byte count must be positive and whole"));
    }
    let x = pop_int257(s)?;
    let fits = if signed {
        x.signed_fits(bits as u64)
    } else {
        x.unsigned_fits(bits as u64)
    };
    if !fits {
        return Err(err(format!("{x} does not fit in {bits} bits")));
    }
    let value = x.finite().map_err(|_| err("NaN"))?.clone();
    let wrapped = if value.sign() == Sign::Minus {
        value + (BigInt::from(1) << bits)
    } else {
        value
    };
    let raw = wrapped.to_biguint().expect("wrapped non-negative").to_bytes_be();
    let mut out = vec![0u8; bits / 8 - raw.len()];
    out.extend_from_slice(&raw);
    s.push(StackValue::Bytes(out));
    Ok(())
}

fn bytes_fetch_int(s: &mut Stack, signed: bool, advance: bool) -> FiftResult<()> {
    let bits = pop_usize(s, 256)?;
    if bits % 8 != 0 {
        return Err(err("bit count must be whole bytes"));
    }
    let bytes = s.pop_bytes()?;
    let len = bits / 8;
    if bytes.len() < len {
        return Err(err("not enough bytes"));
    }
    let head = &bytes[..len];
    let unsigned = num_bigint::BigUint::from_bytes_be(head);
    let value = if signed && len > 0 && head[0] & 0x80 != 0 {
        BigInt::from_biguint(Sign::Plus, unsigned) - (BigInt::from(1) << bits)
    } else {
        BigInt::from_biguint(Sign::Plus, unsigned)
    };
    if advance {
        s.push(StackValue::Bytes(bytes[len..].to_vec()));
        s.push(StackValue::Int(Int257::from_bigint(value)));
    } else {
        s.push(StackValue::Int(Int257::from_bigint(value)));
    }
    Ok(())
}

fn init_cell_words(d: &Dictionary) {
    d.def_stack_word("<b", |s| {
        s.push_builder(CellBuilder::new());
        Ok(())
    });
    d.def_stack_word("i,", |s| store_int_word(s, true));
    d.def_stack_word("u,", |s| store_int_word(s, false));
    d.def_stack_word("ref,", |s| {
        let cell = s.pop_cell()?;
        let builder = s.pop_builder()?;
        let mut fork = builder_mut(builder);
        fork.store_reference(&cell)?;
        s.push_builder(fork);
        Ok(())
    });
    d.def_stack_word("$,", |s| {
        let text = s.pop_string()?;
        let builder = s.pop_builder()?;
        let mut fork = builder_mut(builder);
        fork.store_string(&text)?;
        s.push_builder(fork);
        Ok(())
    });
    d.def_stack_word("B,", |s| {
        let bytes = s.pop_bytes()?;
        let builder = s.pop_builder()?;
        let mut fork = builder_mut(builder);
        fork.store_bytes(&bytes)?;
        s.push_builder(fork);
        Ok(())
    });
    d.def_stack_word("s,", |s| {
        let slice = s.pop_slice()?;
        let builder = s.pop_builder()?;
        let mut fork = builder_mut(builder);
        fork.store_slice(&slice)?;
        s.push_builder(fork);
        Ok(())
    });
    d.def_stack_word("sr,", |s| {
        let slice = s.pop_slice()?;
        let builder = s.pop_builder()?;
        let mut fork = builder_mut(builder);
        fork.store_reference(&slice.to_cell()?)?;
        s.push_builder(fork);
        Ok(())
    });
    d.def_stack_word("b+", |s| {
        let b2 = s.pop_builder()?;
        let b1 = s.pop_builder()?;
        let mut fork = builder_mut(b1);
        fork.store_builder(&b2)?;
        s.push_builder(fork);
        Ok(())
    });
    d.def_stack_word("b>", |s| {
        let builder = s.pop_builder()?;
        s.push_cell(builder.build()?.to_arc());
        Ok(())
    });
    d.def_stack_word("b>spec", |s| {
        let builder = s.pop_builder()?;
        let mut fork = builder_mut(builder);
        fork.set_special(true);
        s.push_cell(fork.build()?.to_arc());
        Ok(())
    });
    d.def_stack_word("bbits", |s| {
        let builder = s.pop_builder()?;
        s.push_int(builder.bits() as i64);
        Ok(())
    });
    d.def_stack_word("brefs", |s| {
        let builder = s.pop_builder()?;
        s.push_int(builder.refs() as i64);
        Ok(())
    });
    d.def_stack_word("bbitrefs", |s| {
        let builder = s.pop_builder()?;
        s.push_int(builder.bits() as i64);
        s.push_int(builder.refs() as i64);
        Ok(())
    });
    d.def_stack_word("brembits", |s| {
        let builder = s.pop_builder()?;
        s.push_int(builder.remaining_bits() as i64);
        Ok(())
    });
    d.def_stack_word("bremrefs", |s| {
        let builder = s.pop_builder()?;
        s.push_int(builder.remaining_refs() as i64);
        Ok(())
    });
    d.def_stack_word("brembitrefs", |s| {
        let builder = s.pop_builder()?;
        s.push_int(builder.remaining_bits() as i64);
        s.push_int(builder.remaining_refs() as i64);
        Ok(())
    });
    d.def_stack_word("hash", |s| {
        let cell = s.pop_cell()?;
        s.push(StackValue::Int(Int257::from_unsigned_bytes(
            &cell.repr_hash(),
        )));
        Ok(())
    });
    d.def_stack_word("hashu", |s| {
        let cell = s.pop_cell()?;
        s.push(StackValue::Int(Int257::from_unsigned_bytes(
            &cell.repr_hash(),
        )));
        Ok(())
    });
    d.def_stack_word("hashB", |s| {
        let cell = s.pop_cell()?;
        s.push(StackValue::Bytes(cell.repr_hash().to_vec()));
        Ok(())
    });
    d.def_stack_word("<s", |s| {
        let cell = s.pop_cell()?;
        s.push_slice(OwnedCellSlice::new(cell)?);
        Ok(())
    });
    d.def_stack_word("s>", |s| {
        let slice = s.pop_slice()?;
        if !slice.is_empty() {
            return Err(err("slice is not empty"));
        }
        Ok(())
    });
    d.def_stack_word("empty?", |s| {
        let slice = s.pop_slice()?;
        s.push_bool(slice.is_empty());
        Ok(())
    });
    d.def_stack_word("remaining", |s| {
        let slice = s.pop_slice()?;
        s.push_int(slice.remaining_bits() as i64);
        s.push_int(slice.remaining_refs() as i64);
        Ok(())
    });
    d.def_stack_word("sbits", |s| {
        let slice = s.pop_slice()?;
        s.push_int(slice.remaining_bits() as i64);
        Ok(())
    });
    d.def_stack_word("srefs", |s| {
        let slice = s.pop_slice()?;
        s.push_int(slice.remaining_refs() as i64);
        Ok(())
    });
    d.def_stack_word("sbitrefs", |s| {
        let slice = s.pop_slice()?;
        s.push_int(slice.remaining_bits() as i64);
        s.push_int(slice.remaining_refs() as i64);
        Ok(())
    });
    d.def_stack_word("i@", |s| fetch_int_word(s, true, false, false));
    d.def_stack_word("u@", |s| fetch_int_word(s, false, false, false));
    d.def_stack_word("i@+", |s| fetch_int_word(s, true, true, false));
    d.def_stack_word("u@+", |s| fetch_int_word(s, false, true, false));
    d.def_stack_word("i@?", |s| fetch_int_word(s, true, false, true));
    d.def_stack_word("u@?", |s| fetch_int_word(s, false, false, true));
    d.def_stack_word("i@?+", |s| fetch_int_word(s, true, true, true));
    d.def_stack_word("u@?+", |s| fetch_int_word(s, false, true, true));
    d.def_stack_word("$@", |s| fetch_bytes_word(s, true, false));
    d.def_stack_word("B@", |s| fetch_bytes_word(s, false, false));
    d.def_stack_word("$@+", |s| fetch_bytes_word(s, true, true));
    d.def_stack_word("B@+", |s| fetch_bytes_word(s, false, true));
    d.def_stack_word("ref@", |s| {
        let slice = s.pop_slice()?;
        s.push_cell(slice.prefetch_ref()?);
        Ok(())
    });
    d.def_stack_word("ref@+", |s| {
        let mut slice = s.pop_slice()?;
        let cell = slice.fetch_ref()?;
        s.push_cell(cell);
        s.push_slice(slice);
        Ok(())
    });
    d.def_stack_word("s@", |s| {
        let bits = pop_usize(s, 1023)?;
        let slice = s.pop_slice()?;
        s.push_slice(slice.prefetch_subslice(bits, 0)?);
        Ok(())
    });
    d.def_stack_word("s@+", |s| {
        let bits = pop_usize(s, 1023)?;
        let mut slice = s.pop_slice()?;
        let sub = slice.fetch_subslice(bits, 0)?;
        s.push_slice(sub);
        s.push_slice(slice);
        Ok(())
    });
    d.def_stack_word("ref@?", |s| {
        let slice = s.pop_slice()?;
        match slice.prefetch_ref() {
            Ok(cell) => {
                s.push_cell(cell);
                s.push_bool(true);
            }
            Err(_) => s.push_bool(false),
        }
        Ok(())
    });
    d.def_stack_word("boc>B", |s| {
        let cell = s.pop_cell()?;
        let bytes = BagOfCells::new(&[cell]).serialize(true)?;
        s.push(StackValue::Bytes(bytes));
        Ok(())
    });
    d.def_stack_word("B>boc", |s| {
        let bytes = s.pop_bytes()?;
        let root = BagOfCells::parse(&bytes)?.single_root()?;
        s.push_cell(root);
        Ok(())
    });
}

fn store_int_word(s: &mut Stack, signed: bool) -> FiftResult<()> {
    let bits = pop_usize(s, 1023)?;
    let builder = s.pop_builder()?;
    let x = pop_int257(s)?;
    let value = x.finite().map_err(|_| err("NaN"))?.clone();
    let mut fork = builder_mut(builder);
    if signed {
        fork.store_int(bits, &value)?;
    } else {
        let unsigned = value
            .to_biguint()
            .ok_or_else(|| err("negative value stored unsigned"))?;
        fork.store_uint(bits, &unsigned)?;
    }
    s.push_builder(fork);
    Ok(())
}

fn fetch_int_word(s: &mut Stack, signed: bool, advance: bool, quiet: bool) -> FiftResult<()> {
    let bits = pop_usize(s, 1023)?;
    let mut slice = s.pop_slice()?;
    if slice.remaining_bits() < bits {
        if quiet {
            if advance {
                s.push_slice(slice);
            }
            s.push_bool(false);
            return Ok(());
        }
        return Err(err("cell underflow"));
    }
    let value = if signed {
        if advance {
            slice.fetch_int(bits)?
        } else {
            slice.prefetch_int(bits)?
        }
    } else if advance {
        BigInt::from_biguint(Sign::Plus, slice.fetch_uint(bits)?)
    } else {
        BigInt::from_biguint(Sign::Plus, slice.prefetch_uint(bits)?)
    };
    s.push(StackValue::Int(Int257::from_bigint(value)));
    if advance {
        s.push_slice(slice);
    }
    if quiet {
        s.push_bool(true);
    }
    Ok(())
}

fn fetch_bytes_word(s: &mut Stack, as_string: bool, advance: bool) -> FiftResult<()> {
    let len = pop_usize(s, 127)?;
    let mut slice = s.pop_slice()?;
    let bytes = slice.fetch_bytes(len)?;
    if as_string {
        let text = String::from_utf8(bytes).map_err(|_| err("invalid UTF-8"))?;
        s.push_string(text);
    } else {
        s.push(StackValue::Bytes(bytes));
    }
    if advance {
        s.push_slice(slice);
    }
    Ok(())
}

fn init_box_tuple_words(d: &Dictionary) {
    d.def_stack_word("hole", |s| {
        s.push(StackValue::Box(SharedBox::empty()));
        Ok(())
    });
    d.def_stack_word("box", |s| {
        let value = s.pop()?;
        s.push(StackValue::Box(SharedBox::new(value)));
        Ok(())
    });
    d.def_stack_word("@", |s| {
        let holder = s.pop_box()?;
        s.push(holder.fetch());
        Ok(())
    });
    d.def_stack_word("!", |s| {
        let holder = s.pop_box()?;
        let value = s.pop()?;
        holder.store(value);
        Ok(())
    });
    d.def_stack_word("null", |s| {
        s.push(StackValue::Null);
        Ok(())
    });
    d.def_stack_word("null?", |s| {
        let value = s.pop()?;
        s.push_bool(value.is_null());
        Ok(())
    });
    d.def_stack_word("box?", |s| {
        let value = s.pop()?;
        s.push_bool(matches!(value, StackValue::Box(_)));
        Ok(())
    });
    d.def_stack_word("|", |s| {
        s.push(StackValue::tuple(vec![]));
        Ok(())
    });
    d.def_stack_word(",", |s| {
        let value = s.pop()?;
        let tuple = s.pop_tuple()?;
        let mut entries = (*tuple).clone();
        entries.push(value);
        s.push(StackValue::tuple(entries));
        Ok(())
    });
    d.def_stack_word("tpop", |s| {
        let tuple = s.pop_tuple()?;
        let mut entries = (*tuple).clone();
        let value = entries.pop().ok_or_else(|| err("tuple is empty"))?;
        s.push(StackValue::tuple(entries));
        s.push(value);
        Ok(())
    });
    d.def_stack_word("[]", |s| {
        let idx = pop_usize(s, 255)?;
        let tuple = s.pop_tuple()?;
        let value = tuple
            .get(idx)
            .cloned()
            .ok_or_else(|| err("tuple index out of range"))?;
        s.push(value);
        Ok(())
    });
    d.def_stack_word("[]=", |s| {
        let idx = pop_usize(s, 255)?;
        let value = s.pop()?;
        let tuple = s.pop_tuple()?;
        let mut entries = (*tuple).clone();
        if idx >= entries.len() {
            return Err(err("tuple index out of range"));
        }
        entries[idx] = value;
        s.push(StackValue::tuple(entries));
        Ok(())
    });
    d.def_stack_word("count", |s| {
        let tuple = s.pop_tuple()?;
        s.push_int(tuple.len() as i64);
        Ok(())
    });
    d.def_stack_word("tuple?", |s| {
        let value = s.pop()?;
        s.push_bool(matches!(value, StackValue::Tuple(_)));
        Ok(())
    });
    d.def_stack_word("tuple", |s| {
        let n = pop_usize(s, 255)?;
        let values = s.pop_many(n)?;
        s.push(StackValue::tuple(values));
        Ok(())
    });
    d.def_stack_word("untuple", |s| {
        let n = pop_usize(s, 255)?;
        let tuple = s.pop_tuple()?;
        if tuple.len() != n {
            return Err(err(format!(
                "expected a tuple of {n} entries, got {}",
                tuple.len()
            )));
        }
        for value in tuple.iter() {
            s.push(value.clone());
        }
        Ok(())
    });
    d.def_stack_word("explode", |s| {
        let tuple = s.pop_tuple()?;
        let len = tuple.len() as i64;
        for value in tuple.iter() {
            s.push(value.clone());
        }
        s.push_int(len);
        Ok(())
    });
    d.def_stack_word("allot", |s| {
        let n = pop_usize(s, 255)?;
        let entries = (0..n)
            .map(|_| StackValue::Box(SharedBox::empty()))
            .collect();
        s.push(StackValue::tuple(entries));
        Ok(())
    });
}

fn init_atom_words(d: &Dictionary) {
    d.def_stack_word("anon", |s| {
        s.push(StackValue::Atom(Atom::anonymous()));
        Ok(())
    });
    d.def_stack_word("(atom)", |s| {
        let _create = s.pop_bool()?;
        let name = s.pop_string()?;
        s.push(StackValue::Atom(Atom::named(&name)));
        s.push_bool(true);
        Ok(())
    });
    d.def_stack_word("atom>$", |s| {
        let atom = s.pop_atom()?;
        s.push_string(atom.name());
        Ok(())
    });
    d.def_stack_word("atom?", |s| {
        let value = s.pop()?;
        s.push_bool(matches!(value, StackValue::Atom(_)));
        Ok(())
    });
    d.def_stack_word("eq?", |s| {
        let b = s.pop()?;
        let a = s.pop()?;
        s.push_bool(a.identical(&b));
        Ok(())
    });
    d.def_stack_word("eqv?", |s| {
        let b = s.pop()?;
        let a = s.pop()?;
        s.push_bool(a.eqv(&b));
        Ok(())
    });
}

fn pop_hashmap(s: &mut Stack) -> FiftResult<crate::hashmap::HashmapRef> {
    let value = s.pop()?;
    hashmap_from_value(&value).ok_or_else(|| err("expected a hashmap or null"))
}

fn pop_dict_key(s: &mut Stack) -> FiftResult<DictKey> {
    let value = s.pop()?;
    DictKey::from_value(&value).ok_or_else(|| err("invalid hashmap key kind"))
}

fn init_hashmap_words(d: &Dictionary) {
    d.def_stack_word("hmapnew", |s| {
        s.push(StackValue::Null);
        Ok(())
    });
    d.def_stack_word("hmap!", |s| {
        let key = pop_dict_key(s)?;
        let value = s.pop()?;
        let root = pop_hashmap(s)?;
        s.push(hashmap_value(hashmap::set(&root, key, value)));
        Ok(())
    });
    d.def_stack_word("hmap!+", |s| {
        let key = pop_dict_key(s)?;
        let value = s.pop()?;
        let root = pop_hashmap(s)?;
        if hashmap::lookup(&root, &key).is_some() {
            s.push(hashmap_value(root));
            s.push_bool(false);
        } else {
            s.push(hashmap_value(hashmap::set(&root, key, value)));
            s.push_bool(true);
        }
        Ok(())
    });
    d.def_stack_word("hmap@", |s| {
        let key = pop_dict_key(s)?;
        let root = pop_hashmap(s)?;
        let value = hashmap::lookup(&root, &key)
            .cloned()
            .ok_or_else(|| err("key not found in hashmap"))?;
        s.push(value);
        Ok(())
    });
    d.def_stack_word("hmap@?", |s| {
        let key = pop_dict_key(s)?;
        let root = pop_hashmap(s)?;
        match hashmap::lookup(&root, &key).cloned() {
            Some(value) => {
                s.push(value);
                s.push_bool(true);
            }
            None => s.push_bool(false),
        }
        Ok(())
    });
    d.def_stack_word("hmap-", |s| {
        let key = pop_dict_key(s)?;
        let root = pop_hashmap(s)?;
        let (new_root, _) = hashmap::remove(&root, &key);
        s.push(hashmap_value(new_root));
        Ok(())
    });
    d.def_stack_word("hmap-?", |s| {
        let key = pop_dict_key(s)?;
        let root = pop_hashmap(s)?;
        let (new_root, old) = hashmap::remove(&root, &key);
        s.push(hashmap_value(new_root));
        s.push_bool(old.is_some());
        Ok(())
    });
    d.def_stack_word("hmap@-", |s| {
        let key = pop_dict_key(s)?;
        let root = pop_hashmap(s)?;
        let (new_root, old) = hashmap::remove(&root, &key);
        s.push(hashmap_value(new_root));
        match old {
            Some(value) => {
                s.push(value);
                s.push_bool(true);
            }
            None => s.push_bool(false),
        }
        Ok(())
    });
    d.def_stack_word("hmapempty?", |s| {
        let root = pop_hashmap(s)?;
        s.push_bool(hashmap::is_empty(&root));
        Ok(())
    });
    d.def_stack_word("hmapunpack", |s| {
        let root = pop_hashmap(s)?;
        match root {
            Some(node) => {
                s.push(node.key().to_value());
                s.push(node.value().clone());
                s.push(hashmap_value(node.left().clone()));
                s.push(hashmap_value(node.right().clone()));
                s.push_bool(true);
            }
            None => s.push_bool(false),
        }
        Ok(())
    });
    d.def_tail_word("hmapforeach", |ctx| {
        let body = pop_cont(&mut ctx.stack)?;
        let root = pop_hashmap(&mut ctx.stack)?;
        let mut entries: Vec<(StackValue, StackValue)> = vec![];
        hashmap::foreach(&root, false, &mut |key, value| {
            entries.push((key.to_value(), value.clone()));
            true
        });
        let mut cont: Option<Arc<FiftCont>> =
            Some(Arc::new(FiftCont::IntLit(Int257::minus_one())));
        for (key, value) in entries.into_iter().rev() {
            let lits = Arc::new(FiftCont::MultiLit(vec![key, value]));
            cont = Some(chain(lits, Some(chain(body.clone(), cont))));
        }
        Ok(cont)
    });
}

fn pop_cell_dict(s: &mut Stack) -> FiftResult<(Option<tonvm_core::cell::ArcCell>, usize)> {
    let key_len = pop_usize(s, 1023)?;
    let root = s.pop_maybe_cell()?;
    Ok((root, key_len))
}

fn dict_key_from_int(s: &mut Stack, key_len: usize, signed: bool) -> FiftResult<celldict::KeyBits> {
    let x = pop_int257(s)?;
    celldict::KeyBits::from_int(x.finite().map_err(|_| err("NaN key"))?, key_len, signed)
        .ok_or_else(|| err("dictionary key out of range"))
}

fn dict_key_from_slice(s: &mut Stack, key_len: usize) -> FiftResult<celldict::KeyBits> {
    let mut slice = s.pop_slice()?;
    if slice.remaining_bits() < key_len {
        return Err(err("key slice is too short"));
    }
    Ok(celldict::KeyBits::new(slice.fetch_bits(key_len)?, key_len))
}

#[derive(Clone, Copy)]
enum CellKeyKind {
    Signed,
    Unsigned,
    Slice,
}

fn cell_dict_set(
    s: &mut Stack,
    kind: CellKeyKind,
    mode: celldict::SetMode,
    builder_value: bool,
) -> FiftResult<()> {
    let (root, key_len) = pop_cell_dict(s)?;
    let key = match kind {
        CellKeyKind::Signed => dict_key_from_int(s, key_len, true)?,
        CellKeyKind::Unsigned => dict_key_from_int(s, key_len, false)?,
        CellKeyKind::Slice => dict_key_from_slice(s, key_len)?,
    };
    let value = if builder_value {
        let builder = s.pop_builder()?;
        let cell = builder.build()?.to_arc();
        celldict::DictValue::Slice(OwnedCellSlice::new(cell)?)
    } else {
        celldict::DictValue::Slice(s.pop_slice()?)
    };
    let (new_root, changed) = celldict::dict_set(root.as_ref(), &key, &value, mode)?;
    match new_root {
        Some(cell) => s.push_cell(cell),
        None => s.push(StackValue::Null),
    }
    s.push_bool(changed);
    Ok(())
}

fn cell_dict_get(s: &mut Stack, kind: CellKeyKind) -> FiftResult<()> {
    let (root, key_len) = pop_cell_dict(s)?;
    let key = match kind {
        CellKeyKind::Signed => dict_key_from_int(s, key_len, true)?,
        CellKeyKind::Unsigned => dict_key_from_int(s, key_len, false)?,
        CellKeyKind::Slice => dict_key_from_slice(s, key_len)?,
    };
    match celldict::dict_get(root.as_ref(), &key)? {
        Some(value) => {
            s.push_slice(value);
            s.push_bool(true);
        }
        None => s.push_bool(false),
    }
    Ok(())
}

fn cell_dict_del(s: &mut Stack, kind: CellKeyKind) -> FiftResult<()> {
    let (root, key_len) = pop_cell_dict(s)?;
    let key = match kind {
        CellKeyKind::Signed => dict_key_from_int(s, key_len, true)?,
        CellKeyKind::Unsigned => dict_key_from_int(s, key_len, false)?,
        CellKeyKind::Slice => dict_key_from_slice(s, key_len)?,
    };
    let (new_root, old) = celldict::dict_delete(root.as_ref(), &key)?;
    match new_root {
        Some(cell) => s.push_cell(cell),
        None => s.push(StackValue::Null),
    }
    s.push_bool(old.is_some());
    Ok(())
}

fn init_cell_dict_words(d: &Dictionary) {
    d.def_stack_word("dictnew", |s| {
        s.push(StackValue::Null);
        Ok(())
    });
    d.def_stack_word("dict,", |s| {
        let builder = s.pop_builder()?;
        let root = s.pop_maybe_cell()?;
        let mut fork = builder_mut(builder);
        match root {
            Some(cell) => {
                fork.store_bit(true)?;
                fork.store_reference(&cell)?;
            }
            None => {
                fork.store_bit(false)?;
            }
        }
        s.push_builder(fork);
        Ok(())
    });
    d.def_stack_word("dict@", |s| {
        let mut slice = s.pop_slice()?;
        if slice.fetch_bit()? {
            s.push_cell(slice.fetch_ref()?);
        } else {
            s.push(StackValue::Null);
        }
        Ok(())
    });
    d.def_stack_word("dict@+", |s| {
        let mut slice = s.pop_slice()?;
        if slice.fetch_bit()? {
            let cell = slice.fetch_ref()?;
            s.push_cell(cell);
        } else {
            s.push(StackValue::Null);
        }
        s.push_slice(slice);
        Ok(())
    });
    d.def_stack_word("dict>s", |s| {
        let root = s.pop_maybe_cell()?;
        let mut builder = CellBuilder::new();
        match root {
            Some(cell) => {
                builder.store_bit(true)?;
                builder.store_reference(&cell)?;
            }
            None => {
                builder.store_bit(false)?;
            }
        }
        s.push_slice(OwnedCellSlice::new(builder.build()?.to_arc())?);
        Ok(())
    });
    for (name, kind) in [
        ("idict", CellKeyKind::Signed),
        ("udict", CellKeyKind::Unsigned),
        ("sdict", CellKeyKind::Slice),
    ] {
        d.def_stack_word(&format!("{name}!"), move |s| {
            cell_dict_set(s, kind, celldict::SetMode::Set, false)
        });
        d.def_stack_word(&format!("{name}!+"), move |s| {
            cell_dict_set(s, kind, celldict::SetMode::Add, false)
        });
        d.def_stack_word(&format!("b>{name}!"), move |s| {
            cell_dict_set(s, kind, celldict::SetMode::Set, true)
        });
        d.def_stack_word(&format!("b>{name}!+"), move |s| {
            cell_dict_set(s, kind, celldict::SetMode::Add, true)
        });
        d.def_stack_word(&format!("{name}@"), move |s| cell_dict_get(s, kind));
        d.def_stack_word(&format!("{name}-"), move |s| cell_dict_del(s, kind));
    }
    d.def_tail_word("dictforeach", |ctx| cell_dict_foreach(ctx, false));
    d.def_tail_word("idictforeach", |ctx| cell_dict_foreach(ctx, true));
}

/// Runs a body for every `(key, value)` of a cell dictionary; leaves -1
/// when the traversal completed.
fn cell_dict_foreach(ctx: &mut IntCtx, int_keys: bool) -> FiftResult<Option<Arc<FiftCont>>> {
    let body = pop_cont(&mut ctx.stack)?;
    let (root, key_len) = pop_cell_dict(&mut ctx.stack)?;
    let mut entries: Vec<(StackValue, StackValue)> = vec![];
    celldict::dict_foreach(root.as_ref(), key_len, false, &mut |key, value| {
        let key_value = if int_keys {
            StackValue::Int(Int257::from_bigint(key.to_int(true)))
        } else {
            let mut builder = CellBuilder::new();
            builder.store_bits(key.len(), key.data())?;
            StackValue::Slice(OwnedCellSlice::new(builder.build()?.to_arc())?)
        };
        entries.push((key_value, StackValue::Slice(value)));
        Ok(true)
    })?;
    let mut cont: Option<Arc<FiftCont>> = Some(Arc::new(FiftCont::IntLit(Int257::minus_one())));
    for (key, value) in entries.into_iter().rev() {
        let lits = Arc::new(FiftCont::MultiLit(vec![key, value]));
        cont = Some(chain(lits, Some(chain(body.clone(), cont))));
    }
    Ok(cont)
}

fn init_control_words(d: &Dictionary) {
    d.def_tail_word("execute", |ctx| Ok(Some(pop_cont(&mut ctx.stack)?)));
    d.def_tail_word("times", |ctx| {
        let count = ctx.stack.pop_int_range(i64::MIN, i64::MAX)?;
        let body = pop_cont(&mut ctx.stack)?;
        if count <= 0 {
            return Ok(None);
        }
        Ok(Some(Arc::new(FiftCont::Times {
            body,
            after: ctx.next.take(),
            count,
        })))
    });
    d.def_tail_word("if", |ctx| {
        let body = pop_cont(&mut ctx.stack)?;
        if ctx.stack.pop_bool()? {
            Ok(Some(body))
        } else {
            Ok(None)
        }
    });
    d.def_tail_word("ifnot", |ctx| {
        let body = pop_cont(&mut ctx.stack)?;
        if ctx.stack.pop_bool()? {
            Ok(None)
        } else {
            Ok(Some(body))
        }
    });
    d.def_tail_word("cond", |ctx| {
        let else_body = pop_cont(&mut ctx.stack)?;
        let then_body = pop_cont(&mut ctx.stack)?;
        if ctx.stack.pop_bool()? {
            Ok(Some(then_body))
        } else {
            Ok(Some(else_body))
        }
    });
    d.def_tail_word("while", |ctx| {
        let body = pop_cont(&mut ctx.stack)?;
        let cond = pop_cont(&mut ctx.stack)?;
        Ok(Some(Arc::new(FiftCont::While {
            cond,
            body,
            after: ctx.next.take(),
            chkcond: false,
        })))
    });
    d.def_tail_word("until", |ctx| {
        let body = pop_cont(&mut ctx.stack)?;
        ctx.next = Some(Arc::new(FiftCont::Until {
            body: body.clone(),
            after: ctx.next.take(),
        }));
        Ok(Some(body))
    });
}

/// Opens a new word list on the stack and enters compile mode.
fn open_wordlist(ctx: &mut IntCtx) -> FiftResult<()> {
    ctx.check_not_internal()?;
    ctx.stack
        .push(StackValue::Object(WordListBuilder::new()));
    ctx.state += 1;
    Ok(())
}

/// Closes the word list on the stack and leaves its execution token.
fn close_wordlist(ctx: &mut IntCtx) -> FiftResult<Arc<FiftCont>> {
    ctx.check_compile()?;
    let closed = ctx.with_wordlist(|builder| builder.close())?;
    ctx.stack.pop()?;
    ctx.state -= 1;
    Ok(closed)
}

fn init_compiler_words(d: &Dictionary) {
    d.def_active("{", |ctx| {
        open_wordlist(ctx)?;
        Ok(None)
    });
    d.def_active("}", |ctx| {
        let closed = close_wordlist(ctx)?;
        if ctx.state > 0 {
            // Nested block: the inner list is a literal of the outer one.
            ctx.compile_literals(std::slice::from_ref(&StackValue::Object(Arc::new(
                FiftContObj(closed),
            ))))?;
        } else {
            push_cont(&mut ctx.stack, closed);
        }
        Ok(None)
    });
    d.def_stack_word("({)", |s| {
        s.push(StackValue::Object(WordListBuilder::new()));
        Ok(())
    });
    d.def_stack_word("(})", |s| {
        let top = s.fetch(0)?;
        let builder = top
            .as_object::<WordListBuilder>()
            .ok_or_else(|| err("no word list under construction"))?;
        let closed = builder.close();
        s.pop()?;
        push_cont(s, closed);
        Ok(())
    });
    d.def_stack_word("(compile)", |s| {
        let word = pop_cont(s)?;
        let count = s.pop_smallint_range(255)? as usize;
        let literals = s.pop_many(count)?;
        let top = s.fetch(0)?;
        let builder = top
            .as_object::<WordListBuilder>()
            .ok_or_else(|| err("no word list under construction"))?;
        for value in literals {
            builder.push(Arc::new(FiftCont::Lit(value)));
        }
        if !matches!(&*word, FiftCont::Nop) {
            builder.push(word);
        }
        Ok(())
    });
    d.def_tail_word("(execute)", |ctx| {
        let word = pop_cont(&mut ctx.stack)?;
        let count = ctx.stack.pop_smallint_range(255)? as usize;
        ctx.stack.check_underflow(count)?;
        Ok(Some(word))
    });

    // Colon definitions: `: name body ;` with `::` marking active words.
    for (name, mode) in [(":", 0i64), ("::", 1), (":_", 2), ("::_", 3)] {
        d.def_active(name, move |ctx| {
            ctx.check_not_internal()?;
            let word = ctx
                .parser
                .as_mut()
                .ok_or_else(|| err("no input"))?
                .scan_word()?;
            ctx.stack.push_string(word);
            ctx.stack.push_int(mode);
            open_wordlist(ctx)?;
            Ok(None)
        });
    }
    d.def_active(";", |ctx| {
        let closed = close_wordlist(ctx)?;
        let mode = ctx.stack.pop_int_range(0, 3)?;
        let name = ctx.stack.pop_string()?;
        ctx.current.def_entry(
            &name,
            DictEntry {
                def: closed,
                active: mode & 1 != 0,
            },
        );
        Ok(None)
    });
    d.def_active("[", |ctx| {
        ctx.check_compile()?;
        ctx.bracket_frames.push((ctx.state, ctx.stack.depth()));
        ctx.state = -1;
        Ok(None)
    });
    d.def_active("]", |ctx| {
        if ctx.state >= 0 {
            return Err(err("`]` outside of internal interpret mode"));
        }
        let (saved_state, saved_depth) = ctx
            .bracket_frames
            .pop()
            .ok_or_else(|| err("unmatched `]`"))?;
        ctx.state = saved_state;
        // Everything produced inside the brackets compiles as literals.
        let produced = ctx.stack.depth().saturating_sub(saved_depth);
        let values = ctx.stack.pop_many(produced)?;
        ctx.compile_literals(&values)?;
        Ok(None)
    });
    d.def_active("'", |ctx| {
        let word = ctx
            .parser
            .as_mut()
            .ok_or_else(|| err("no input"))?
            .scan_word()?;
        let entry = ctx
            .context
            .lookup(&word)
            .ok_or_else(|| err(format!("undefined word `{word}`")))?;
        let token = StackValue::Object(Arc::new(FiftContObj(entry.def)));
        ctx.push_or_compile(token)?;
        Ok(None)
    });
    {
        let nop_token = StackValue::Object(Arc::new(FiftContObj(FiftCont::nop())));
        d.def_word("'nop", Arc::new(FiftCont::Lit(nop_token)));
    }
    d.def_ctx_word("create", |ctx| {
        let word = ctx
            .parser
            .as_mut()
            .ok_or_else(|| err("no input"))?
            .scan_word()?;
        let def = pop_cont(&mut ctx.stack)?;
        ctx.current.def_word(&word, def);
        Ok(())
    });
    d.def_ctx_word("(create)", |ctx| {
        let mode = ctx.stack.pop_int_range(0, 3)?;
        let name = ctx.stack.pop_string()?;
        let def = pop_cont(&mut ctx.stack)?;
        ctx.current.def_entry(
            &name,
            DictEntry {
                def,
                active: mode & 1 != 0,
            },
        );
        Ok(())
    });
    d.def_ctx_word("constant", |ctx| {
        let word = ctx
            .parser
            .as_mut()
            .ok_or_else(|| err("no input"))?
            .scan_word()?;
        let value = ctx.stack.pop()?;
        ctx.current.def_word(&word, Arc::new(FiftCont::Lit(value)));
        Ok(())
    });
    d.def_active("=:", |ctx| {
        let word = ctx
            .parser
            .as_mut()
            .ok_or_else(|| err("no input"))?
            .scan_word()?;
        let value = ctx.stack.pop()?;
        ctx.current.def_word(&word, Arc::new(FiftCont::Lit(value)));
        Ok(None)
    });
    d.def_ctx_word("find", |ctx| {
        let name = ctx.stack.pop_string()?;
        match ctx.context.lookup(&name) {
            Some(entry) => {
                push_cont(&mut ctx.stack, entry.def);
                ctx.stack.push_int(if entry.active { 1i64 } else { -1 });
            }
            None => ctx.stack.push_int(0i64),
        }
        Ok(())
    });
    d.def_ctx_word("forget", |ctx| {
        let word = ctx
            .parser
            .as_mut()
            .ok_or_else(|| err("no input"))?
            .scan_word()?;
        if !ctx.current.undef_word(&word) {
            return Err(err(format!("undefined word `{word}`")));
        }
        Ok(())
    });
    d.def_ctx_word("(forget)", |ctx| {
        let word = ctx.stack.pop_string()?;
        if !ctx.current.undef_word(&word) {
            return Err(err(format!("undefined word `{word}`")));
        }
        Ok(())
    });
    d.def_ctx_word("words", |ctx| {
        let names = ctx.context.word_names();
        let list = names.join(" ");
        ctx.write_str(&format!("{list} \n"))
    });
    d.def_ctx_word("current@", |ctx| {
        let b = ctx.current.get_box();
        ctx.stack.push(StackValue::Box(b));
        Ok(())
    });
    d.def_ctx_word("current!", |ctx| {
        let b = ctx.stack.pop_box()?;
        ctx.current = Dictionary::from_box(b);
        Ok(())
    });
    d.def_ctx_word("context@", |ctx| {
        let b = ctx.context.get_box();
        ctx.stack.push(StackValue::Box(b));
        Ok(())
    });
    d.def_ctx_word("context!", |ctx| {
        let b = ctx.stack.pop_box()?;
        ctx.context = Dictionary::from_box(b);
        Ok(())
    });
    d.def_ctx_word("Fift", |ctx| {
        ctx.context = ctx.main_dictionary.clone();
        Ok(())
    });
}

fn init_interp_words(d: &Dictionary) {
    d.def_active("\"", |ctx| {
        let parser = ctx.parser.as_mut().ok_or_else(|| err("no input"))?;
        parser.skip_one_space();
        let text = parser.scan_word_to('"')?;
        ctx.push_or_compile(StackValue::String(text))?;
        Ok(None)
    });
    d.def_active("char", |ctx| {
        let word = ctx
            .parser
            .as_mut()
            .ok_or_else(|| err("no input"))?
            .scan_word()?;
        let ch = word
            .chars()
            .next()
            .ok_or_else(|| err("char expects a character"))?;
        ctx.push_or_compile(StackValue::int(ch as u32 as i64))?;
        Ok(None)
    });
    d.def_stack_word("(char)", |s| {
        let text = s.pop_string()?;
        let ch = text
            .chars()
            .next()
            .ok_or_else(|| err("empty string"))?;
        s.push_int(ch as u32 as i64);
        Ok(())
    });
    d.def_active(".\"", |ctx| {
        let parser = ctx.parser.as_mut().ok_or_else(|| err("no input"))?;
        parser.skip_one_space();
        let text = parser.scan_word_to('"')?;
        if ctx.state > 0 {
            ctx.compile_literals(std::slice::from_ref(&StackValue::String(text)))?;
            let print = FiftCont::primitive("type", |ctx: &mut IntCtx| {
                let text = ctx.stack.pop_string()?;
                ctx.write_str(&text)?;
                Ok(None)
            });
            ctx.compile_cont(print)?;
        } else {
            ctx.write_str(&text)?;
        }
        Ok(None)
    });
    d.def_active("x{", |ctx| {
        let parser = ctx.parser.as_mut().ok_or_else(|| err("no input"))?;
        let body = parser.scan_word_to('}')?;
        let slice = parse_hex_literal(&body)?;
        ctx.push_or_compile(StackValue::Slice(slice))?;
        Ok(None)
    });
    d.def_active("b{", |ctx| {
        let parser = ctx.parser.as_mut().ok_or_else(|| err("no input"))?;
        let body = parser.scan_word_to('}')?;
        let slice = parse_binary_literal(&body)?;
        ctx.push_or_compile(StackValue::Slice(slice))?;
        Ok(None)
    });
    d.def_ctx_word("abort", |ctx| {
        let msg = ctx.stack.pop_string()?;
        Err(err(msg))
    });
    d.def_active("abort\"", |ctx| {
        let parser = ctx.parser.as_mut().ok_or_else(|| err("no input"))?;
        parser.skip_one_space();
        let msg = parser.scan_word_to('"')?;
        if ctx.state > 0 {
            ctx.compile_literals(std::slice::from_ref(&StackValue::String(msg)))?;
            ctx.compile_cont(abort_if_cont())?;
        } else {
            ctx.stack.push_string(msg);
            let abort = abort_if_cont();
            return Ok(Some(abort));
        }
        Ok(None)
    });
    d.def_tail_word("quit", |_ctx| {
        Ok(Some(Arc::new(FiftCont::Quit { exit_code: -1 })))
    });
    d.def_tail_word("bye", |_ctx| {
        Ok(Some(Arc::new(FiftCont::Quit { exit_code: 0 })))
    });
    d.def_tail_word("halt", |ctx| {
        let code = ctx.stack.pop_int_range(i32::MIN as i64, i32::MAX as i64)?;
        Ok(Some(Arc::new(FiftCont::Quit {
            exit_code: !(code as i32),
        })))
    });
    d.def_ctx_word("include", |ctx| {
        let filename = ctx.stack.pop_string()?;
        let path = resolve_include(ctx, &filename)
            .ok_or_else(|| err(format!("cannot locate `{filename}`")))?;
        let file = std::fs::File::open(&path)?;
        let depth = ctx.include_depth() as u32 + 1;
        let parser = crate::parser::ParseCtx::new(
            Box::new(std::io::BufReader::new(file)),
            path.to_string_lossy().into_owned(),
            depth,
        );
        ctx.enter_source(parser);
        Ok(())
    });
    d.def_ctx_word("include-depth", |ctx| {
        let depth = ctx.include_depth() as i64;
        ctx.stack.push_int(depth);
        Ok(())
    });
    d.def_ctx_word("skip-to-eof", |ctx| {
        if let Some(parser) = ctx.parser.as_mut() {
            parser.skip_to_eof()?;
        }
        Ok(())
    });
    d.def_ctx_word("word", |ctx| {
        let delim = ctx.stack.pop_smallint_range(255)? as u8 as char;
        let parser = ctx.parser.as_mut().ok_or_else(|| err("no input"))?;
        let text = if delim == ' ' {
            parser.scan_word()?
        } else {
            parser.skip_one_space();
            parser.scan_word_to(delim)?
        };
        ctx.stack.push_string(text);
        Ok(())
    });
    d.def_ctx_word("skipspc", |ctx| {
        if let Some(parser) = ctx.parser.as_mut() {
            parser.skip_whitespace();
        }
        Ok(())
    });
    d.def_ctx_word("now", |ctx| {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| err("time went backwards"))?
            .as_secs();
        ctx.stack.push_int(secs as i64);
        Ok(())
    });
    d.def_stack_word("getenv", |s| {
        let name = s.pop_string()?;
        s.push_string(std::env::var(&name).unwrap_or_default());
        Ok(())
    });
    d.def_stack_word("getenv?", |s| {
        let name = s.pop_string()?;
        match std::env::var(&name) {
            Ok(value) => {
                s.push_string(value);
                s.push_bool(true);
            }
            Err(_) => s.push_bool(false),
        }
        Ok(())
    });
    d.def_ctx_word("$*", |ctx| {
        let args = ctx.cmdline_args.clone();
        ctx.stack.push(StackValue::tuple(args));
        Ok(())
    });
    d.def_ctx_word("$#", |ctx| {
        let count = ctx.cmdline_args.len() as i64;
        ctx.stack.push_int(count);
        Ok(())
    });
    d.def_ctx_word("$()", |ctx| {
        let idx = ctx.stack.pop_smallint_range(255)? as usize;
        let value = ctx
            .cmdline_args
            .get(idx)
            .cloned()
            .unwrap_or(StackValue::Null);
        ctx.stack.push(value);
        Ok(())
    });
}

fn abort_if_cont() -> Arc<FiftCont> {
    FiftCont::primitive("abort\"", |ctx: &mut IntCtx| {
        let msg = ctx.stack.pop_string()?;
        if ctx.stack.pop_bool()? {
            return Err(err(msg));
        }
        Ok(None)
    })
}

fn resolve_include(ctx: &IntCtx, filename: &str) -> Option<std::path::PathBuf> {
    let direct = std::path::PathBuf::from(filename);
    if direct.exists() {
        return Some(direct);
    }
    for dir in &ctx.include_dirs {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

/// Builds a slice literal from `x{...}` hex notation with an optional `_`
/// completion tag.
fn parse_hex_literal(body: &str) -> FiftResult<OwnedCellSlice> {
    let mut builder = CellBuilder::new();
    let tagged = body.ends_with('_');
    let digits = body.trim_end_matches('_');
    for ch in digits.chars() {
        let digit = ch
            .to_digit(16)
            .ok_or_else(|| err(format!("invalid hex digit `{ch}`")))?;
        builder.store_u64(4, digit as u64)?;
    }
    finish_bit_literal(builder, tagged)
}

fn parse_binary_literal(body: &str) -> FiftResult<OwnedCellSlice> {
    let mut builder = CellBuilder::new();
    for ch in body.chars() {
        match ch {
            '0' => builder.store_bit(false)?,
            '1' => builder.store_bit(true)?,
            other => return Err(err(format!("invalid binary digit `{other}`"))),
        };
    }
    finish_bit_literal(builder, false)
}

fn finish_bit_literal(builder: CellBuilder, tagged: bool) -> FiftResult<OwnedCellSlice> {
    let cell = builder.build()?.to_arc();
    let mut slice = OwnedCellSlice::new(cell)?;
    if tagged {
        // Drop the trailing zeros and the completion bit itself.
        let total = slice.remaining_bits();
        let raw = slice.prefetch_bits(total)?;
        let last_one = (0..total)
            .rev()
            .find(|&i| raw[i / 8] & (0x80 >> (i % 8)) != 0)
            .ok_or_else(|| err("missing completion tag"))?;
        slice.only_first(last_one, 0)?;
    }
    Ok(slice)
}

fn init_crypto_words(d: &Dictionary) {
    d.def_stack_word("newkeypair", |s| {
        let seed: [u8; 32] = rand::random();
        let pair = nacl::sign::generate_keypair(&seed);
        s.push(StackValue::Bytes(seed.to_vec()));
        s.push(StackValue::Bytes(pair.pkey.to_vec()));
        Ok(())
    });
    d.def_stack_word("priv>pub", |s| {
        let secret = s.pop_bytes()?;
        if secret.len() != 32 {
            return Err(err("private key must be 32 bytes"));
        }
        let pair = nacl::sign::generate_keypair(&secret);
        s.push(StackValue::Bytes(pair.pkey.to_vec()));
        Ok(())
    });
    d.def_stack_word("ed25519_sign", |s| {
        let secret = s.pop_bytes()?;
        let data = s.pop_bytes()?;
        if secret.len() != 32 {
            return Err(err("private key must be 32 bytes"));
        }
        let pair = nacl::sign::generate_keypair(&secret);
        let signed =
            nacl::sign::signature(&data, &pair.skey).map_err(|_| err("signing failed"))?;
        s.push(StackValue::Bytes(signed));
        Ok(())
    });
    d.def_stack_word("ed25519_sign_uint", |s| {
        let secret = s.pop_bytes()?;
        let value = s.pop_finite()?;
        let data = value
            .to_unsigned_bytes(32)
            .ok_or_else(|| err("hash must fit 256 unsigned bits"))?;
        if secret.len() != 32 {
            return Err(err("private key must be 32 bytes"));
        }
        let pair = nacl::sign::generate_keypair(&secret);
        let signed =
            nacl::sign::signature(&data, &pair.skey).map_err(|_| err("signing failed"))?;
        s.push(StackValue::Bytes(signed));
        Ok(())
    });
    d.def_stack_word("ed25519_chksign", |s| {
        let key = s.pop_bytes()?;
        let signature = s.pop_bytes()?;
        let data = s.pop_bytes()?;
        let valid = nacl::sign::verify(&signature, &data, &key).unwrap_or(false);
        s.push_bool(valid);
        Ok(())
    });
}

fn init_ton_words(d: &Dictionary) {
    d.def_stack_word("smca>$", |s| {
        let mode = s.pop_smallint_range(7)?;
        let addr = s.pop_finite()?;
        let wc = s.pop_int_range(-128, 127)? as i8;
        let hash = addr
            .to_unsigned_bytes(32)
            .ok_or_else(|| err("address must fit 256 bits"))?;
        let mut data = Vec::with_capacity(36);
        let mut tag = if mode & 1 != 0 { 0x51u8 } else { 0x11 };
        if mode & 2 != 0 {
            tag |= 0x80;
        }
        data.push(tag);
        data.push(wc as u8);
        data.extend_from_slice(&hash);
        let checksum = CRC16_XMODEM.checksum(&data);
        data.extend_from_slice(&checksum.to_be_bytes());
        s.push_string(URL_SAFE_NO_PAD.encode(data));
        Ok(())
    });
    d.def_stack_word("$>smca", |s| {
        let text = s.pop_string()?;
        let parsed = (|| {
            let data = URL_SAFE_NO_PAD
                .decode(text.trim())
                .or_else(|_| STANDARD.decode(text.trim()))
                .ok()?;
            if data.len() != 36 {
                return None;
            }
            let checksum = CRC16_XMODEM.checksum(&data[..34]);
            if checksum.to_be_bytes() != data[34..36] {
                return None;
            }
            let tag = data[0];
            let mut flags = 0i64;
            if tag & 0x40 != 0 {
                flags |= 1;
            }
            if tag & 0x80 != 0 {
                flags |= 2;
            }
            let wc = data[1] as i8 as i64;
            let addr = Int257::from_unsigned_bytes(&data[2..34]);
            Some((wc, addr, flags))
        })();
        match parsed {
            Some((wc, addr, flags)) => {
                s.push_int(wc);
                s.push(StackValue::Int(addr));
                s.push_int(flags);
                s.push_bool(true);
            }
            None => s.push_bool(false),
        }
        Ok(())
    });
}

fn init_vm_words(d: &Dictionary) {
    d.def_ctx_word("runvmx", |ctx| {
        let flags = ctx.stack.pop_smallint_range(0xFF)?;
        let gas_limit = if flags & 0x20 != 0 {
            Some(ctx.stack.pop_int_range(0, i64::MAX / 2)?)
        } else {
            None
        };
        let c7 = if flags & 0x08 != 0 {
            ctx.stack.pop_maybe_tuple()?
        } else {
            None
        };
        let data = if flags & 0x04 != 0 {
            Some(ctx.stack.pop_cell()?)
        } else {
            None
        };
        let code = ctx.stack.pop_slice()?;
        let args = ctx.stack.pop_smallint_range(255)? as usize;
        let vm_stack = ctx.stack.split_top(args)?;

        let libraries = collect_vm_libraries(ctx);
        let options = VmOptions {
            global_version: DEFAULT_GLOBAL_VERSION,
            gas: match gas_limit {
                Some(limit) => GasLimits::with_limit(limit),
                None => GasLimits::infinite(),
            },
            c7,
            data,
            libraries,
            debug_enabled: true,
            same_c3: flags & 0x01 != 0,
            push_0: flags & 0x02 != 0,
        };
        let output = run_vm_code(code, vm_stack, options);
        for value in output.stack.items() {
            ctx.stack.push(value.clone());
        }
        ctx.stack.push_int(output.exit_code as i64);
        if flags & 0x04 != 0 {
            match output.data {
                Some(cell) => ctx.stack.push_cell(cell),
                None => ctx.stack.push(StackValue::Null),
            }
        }
        if flags & 0x10 != 0 {
            match output.actions {
                Some(cell) => ctx.stack.push_cell(cell),
                None => ctx.stack.push(StackValue::Null),
            }
        }
        if flags & 0x40 != 0 {
            ctx.stack.push_int(output.gas_consumed);
        }
        Ok(())
    });
    d.def_ctx_word("vmlibs", |ctx| {
        let b = ctx.vm_libraries.clone();
        ctx.stack.push(StackValue::Box(b));
        Ok(())
    });
    d.def_stack_word("supported-version", |s| {
        s.push_int(DEFAULT_GLOBAL_VERSION as i64);
        Ok(())
    });
}

/// The `vmlibs` box may hold a cell (a library collection root) or a tuple
/// of cells.
fn collect_vm_libraries(ctx: &IntCtx) -> Vec<tonvm_core::cell::ArcCell> {
    match ctx.vm_libraries.fetch() {
        StackValue::Cell(cell) => vec![cell],
        StackValue::Tuple(cells) => cells
            .iter()
            .filter_map(|v| v.as_cell().cloned())
            .collect(),
        _ => vec![],
    }
}

/// Installs the `'exit-interpret` literal once the context box exists.
pub fn init_exit_interpret(d: &Dictionary, exit_box: SharedBox) {
    d.def_word(
        "'exit-interpret",
        Arc::new(FiftCont::Lit(StackValue::Box(exit_box))),
    );
}

/// Installs `Fift-wordlist`, which needs the main dictionary box.
pub fn init_wordlist_literal(d: &Dictionary, main: &Dictionary) {
    d.def_word(
        "Fift-wordlist",
        Arc::new(FiftCont::Lit(StackValue::Box(main.get_box()))),
    );
}

/// Extracts a word's continuation from an exec-token value; re-exported
/// for embedders and tests.
pub fn cont_of(value: &StackValue) -> Option<Arc<FiftCont>> {
    as_cont(value)
}
