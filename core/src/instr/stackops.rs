use crate::dispatch::{mkfixed, mkfixedrange, mksimple, OpcodeTable};
use crate::error::{VmError, VmResult};
use crate::vm::VmState;

fn exec_nop(_: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    Ok(None)
}

fn exec_xchg0(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    st.stack.swap(0, (opc & 0xF) as usize)?;
    Ok(None)
}

fn exec_xchg(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let i = ((opc >> 4) & 0xF) as usize;
    let j = (opc & 0xF) as usize;
    if i == 0 || i >= j {
        return Err(VmError::inv_opcode("XCHG arguments must satisfy 0 < i < j"));
    }
    st.stack.swap(i, j)?;
    Ok(None)
}

fn exec_xchg0_long(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    st.stack.swap(0, (opc & 0xFF) as usize)?;
    Ok(None)
}

fn exec_xchg1(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    st.stack.swap(1, (opc & 0xF) as usize)?;
    Ok(None)
}

fn exec_push(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    st.stack.pick((opc & 0xF) as usize)?;
    Ok(None)
}

fn exec_push_long(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    st.stack.pick((opc & 0xFF) as usize)?;
    Ok(None)
}

fn exec_pop(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    pop_impl(st, (opc & 0xF) as usize)
}

fn exec_pop_long(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    pop_impl(st, (opc & 0xFF) as usize)
}

fn pop_impl(st: &mut VmState, i: usize) -> VmResult<Option<i32>> {
    if i > 0 {
        st.stack.swap(0, i)?;
    }
    st.stack.pop()?;
    Ok(None)
}

/// `BLKSWAP x, y`: exchanges the block of `x` values under the top `y`
/// values with those `y` values.
fn blkswap(st: &mut VmState, x: usize, y: usize) -> VmResult<()> {
    st.stack.check_underflow(x + y)?;
    st.stack.reverse(x, y)?;
    st.stack.reverse(y, 0)?;
    st.stack.reverse(x + y, 0)?;
    Ok(())
}

fn exec_blkswap(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let x = ((opc >> 4) & 0xF) as usize + 1;
    let y = (opc & 0xF) as usize + 1;
    blkswap(st, x, y)?;
    Ok(None)
}

fn exec_rot(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    st.stack.roll(2)?;
    Ok(None)
}

fn exec_rotrev(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    st.stack.roll_rev(2)?;
    Ok(None)
}

fn exec_2swap(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    st.stack.check_underflow(4)?;
    st.stack.swap(0, 2)?;
    st.stack.swap(1, 3)?;
    Ok(None)
}

fn exec_2drop(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    st.stack.drop_many(2)?;
    Ok(None)
}

fn exec_2dup(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    st.stack.check_underflow(2)?;
    st.stack.pick(1)?;
    st.stack.pick(1)?;
    Ok(None)
}

fn exec_2over(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    st.stack.check_underflow(4)?;
    st.stack.pick(3)?;
    st.stack.pick(3)?;
    Ok(None)
}

fn exec_reverse(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let count = ((opc >> 4) & 0xF) as usize + 2;
    let top = (opc & 0xF) as usize;
    st.stack.reverse(count, top)?;
    Ok(None)
}

/// `5F0j` is `BLKDROP j`; `5Fij` with `i > 0` pushes `s[j]` `i` times.
fn exec_blkdrop_blkpush(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let i = ((opc >> 4) & 0xF) as usize;
    let j = (opc & 0xF) as usize;
    if i == 0 {
        st.stack.drop_many(j)?;
    } else {
        st.stack.check_underflow(j + 1)?;
        for _ in 0..i {
            st.stack.pick(j)?;
        }
    }
    Ok(None)
}

fn exec_pick(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let n = st.stack.pop_smallint_range(255)? as usize;
    st.stack.pick(n)?;
    Ok(None)
}

fn exec_roll(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let n = st.stack.pop_smallint_range(255)? as usize;
    st.stack.roll(n)?;
    Ok(None)
}

fn exec_rollrev(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let n = st.stack.pop_smallint_range(255)? as usize;
    st.stack.roll_rev(n)?;
    Ok(None)
}

fn exec_blkswx(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let y = st.stack.pop_smallint_range(255)? as usize;
    let x = st.stack.pop_smallint_range(255)? as usize;
    blkswap(st, x, y)?;
    Ok(None)
}

fn exec_revx(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let top = st.stack.pop_smallint_range(255)? as usize;
    let count = st.stack.pop_smallint_range(255)? as usize;
    st.stack.reverse(count, top)?;
    Ok(None)
}

fn exec_dropx(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let n = st.stack.pop_smallint_range(255)? as usize;
    st.stack.drop_many(n)?;
    Ok(None)
}

fn exec_tuck(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    st.stack.check_underflow(2)?;
    st.stack.swap(0, 1)?;
    st.stack.pick(1)?;
    Ok(None)
}

fn exec_xchgx(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let n = st.stack.pop_smallint_range(255)? as usize;
    st.stack.swap(0, n)?;
    Ok(None)
}

fn exec_depth(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let depth = st.stack.depth() as i64;
    st.stack.push_int(depth);
    Ok(None)
}

fn exec_chkdepth(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let n = st.stack.pop_smallint_range(255)? as usize;
    st.stack.check_underflow(n)?;
    Ok(None)
}

fn exec_onlytopx(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let n = st.stack.pop_smallint_range(255)? as usize;
    let depth = st.stack.depth();
    if depth > n {
        st.stack.drop_under(depth - n, n)?;
    }
    Ok(None)
}

fn exec_onlyx(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let n = st.stack.pop_smallint_range(255)? as usize;
    let depth = st.stack.depth();
    st.stack.drop_many(depth.saturating_sub(n).min(depth))?;
    Ok(None)
}

fn exec_blkdrop2(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let count = ((opc >> 4) & 0xF) as usize;
    let top = (opc & 0xF) as usize;
    st.stack.drop_under(count, top)?;
    Ok(None)
}

pub fn register(t: &mut OpcodeTable) {
    t.insert(mksimple(0x00, 8, "NOP", exec_nop));
    t.insert(mkfixedrange(0x01, 0x10, 8, "XCHG", exec_xchg0));
    t.insert(mkfixed(0x10, 8, 8, "XCHG", exec_xchg));
    t.insert(mkfixed(0x11, 8, 8, "XCHG", exec_xchg0_long));
    t.insert(mkfixedrange(0x12, 0x20, 8, "XCHG", exec_xchg1));
    t.insert(mkfixedrange(0x20, 0x30, 8, "PUSH", exec_push));
    t.insert(mkfixedrange(0x30, 0x40, 8, "POP", exec_pop));
    t.insert(mkfixed(0x55, 8, 8, "BLKSWAP", exec_blkswap));
    t.insert(mkfixed(0x56, 8, 8, "PUSH", exec_push_long));
    t.insert(mkfixed(0x57, 8, 8, "POP", exec_pop_long));
    t.insert(mksimple(0x58, 8, "ROT", exec_rot));
    t.insert(mksimple(0x59, 8, "ROTREV", exec_rotrev));
    t.insert(mksimple(0x5A, 8, "2SWAP", exec_2swap));
    t.insert(mksimple(0x5B, 8, "2DROP", exec_2drop));
    t.insert(mksimple(0x5C, 8, "2DUP", exec_2dup));
    t.insert(mksimple(0x5D, 8, "2OVER", exec_2over));
    t.insert(mkfixed(0x5E, 8, 8, "REVERSE", exec_reverse));
    t.insert(mkfixed(0x5F, 8, 8, "BLKDROP", exec_blkdrop_blkpush));
    t.insert(mksimple(0x60, 8, "PICK", exec_pick));
    t.insert(mksimple(0x61, 8, "ROLL", exec_roll));
    t.insert(mksimple(0x62, 8, "ROLLREV", exec_rollrev));
    t.insert(mksimple(0x63, 8, "BLKSWX", exec_blkswx));
    t.insert(mksimple(0x64, 8, "REVX", exec_revx));
    t.insert(mksimple(0x65, 8, "DROPX", exec_dropx));
    t.insert(mksimple(0x66, 8, "TUCK", exec_tuck));
    t.insert(mksimple(0x67, 8, "XCHGX", exec_xchgx));
    t.insert(mksimple(0x68, 8, "DEPTH", exec_depth));
    t.insert(mksimple(0x69, 8, "CHKDEPTH", exec_chkdepth));
    t.insert(mksimple(0x6A, 8, "ONLYTOPX", exec_onlytopx));
    t.insert(mksimple(0x6B, 8, "ONLYX", exec_onlyx));
    t.insert(mkfixed(0x6C, 8, 8, "BLKDROP2", exec_blkdrop2));
}
