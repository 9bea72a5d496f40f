use std::sync::Arc;

use crate::cont::{Continuation, ControlData, ControlRegs};
use crate::dispatch::{mkfixed, mkfixedrange, mksimple, OpcodeTable};
use crate::error::{VmError, VmResult};
use crate::gas::{price, GasLimits};
use crate::stack::{Stack, StackValue};
use crate::vm::{VmOptions, VmState};

/// Ensures the continuation can carry control data, wrapping it in a
/// register-save envelope when it cannot.
fn ensure_cdata(cont: &mut Continuation) {
    if cont.cdata().is_none() {
        let inner = std::mem::replace(cont, Continuation::ExcQuit);
        *cont = Continuation::ArgExt {
            inner: Arc::new(inner),
            cdata: ControlData::new(),
        };
    }
}

fn exec_execute(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cont = st.stack.pop_cont()?;
    st.call(cont)
}

fn exec_jmpx(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cont = st.stack.pop_cont()?;
    st.jump(cont)
}

fn exec_callxargs(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let pass = ((opc >> 4) & 0xF) as i32;
    let ret = (opc & 0xF) as i32;
    let cont = st.stack.pop_cont()?;
    st.call_ext(cont, pass, ret)
}

fn exec_callxargs_any(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let pass = (opc & 0xF) as i32;
    let cont = st.stack.pop_cont()?;
    st.call_ext(cont, pass, -1)
}

fn exec_jmpxargs(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let pass = (opc & 0xF) as i32;
    let cont = st.stack.pop_cont()?;
    st.jump_ext(cont, pass)
}

fn exec_retargs(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    st.ret_ext((opc & 0xF) as i32)
}

fn exec_ret(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    st.ret()
}

fn exec_retalt(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    st.ret_alt()
}

fn exec_retbool(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    if st.stack.pop_bool()? {
        st.ret()
    } else {
        st.ret_alt()
    }
}

fn exec_callcc(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cont = st.stack.pop_cont()?;
    let cc = st.extract_cc(true, false)?;
    st.stack.push_cont(cc);
    st.jump(cont)
}

fn exec_callref(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cell = st.code().fetch_ref()?;
    let cont = st.ref_to_cont(cell)?;
    st.call(cont)
}

fn exec_jmpref(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cell = st.code().fetch_ref()?;
    let cont = st.ref_to_cont(cell)?;
    st.jump(cont)
}

/// `RETREF`: continues with the code in the next reference after returning.
fn exec_retref(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cell = st.code().fetch_ref()?;
    let cont = st.ref_to_cont(cell)?;
    st.jump(cont)
}

fn exec_ifret(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    if st.stack.pop_bool()? {
        st.ret()
    } else {
        Ok(None)
    }
}

fn exec_ifnotret(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    if st.stack.pop_bool()? {
        Ok(None)
    } else {
        st.ret()
    }
}

fn exec_if(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cont = st.stack.pop_cont()?;
    if st.stack.pop_bool()? {
        st.call(cont)
    } else {
        Ok(None)
    }
}

fn exec_ifnot(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cont = st.stack.pop_cont()?;
    if st.stack.pop_bool()? {
        Ok(None)
    } else {
        st.call(cont)
    }
}

fn exec_ifjmp(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cont = st.stack.pop_cont()?;
    if st.stack.pop_bool()? {
        st.jump(cont)
    } else {
        Ok(None)
    }
}

fn exec_ifnotjmp(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cont = st.stack.pop_cont()?;
    if st.stack.pop_bool()? {
        Ok(None)
    } else {
        st.jump(cont)
    }
}

fn exec_ifelse(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let else_cont = st.stack.pop_cont()?;
    let then_cont = st.stack.pop_cont()?;
    let cond = st.stack.pop_bool()?;
    st.call(if cond { then_cont } else { else_cont })
}

fn ref_cont(st: &mut VmState) -> VmResult<Arc<Continuation>> {
    let cell = st.code().fetch_ref()?;
    st.ref_to_cont(cell)
}

fn exec_ifref(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cond = st.stack.pop_bool()?;
    if cond {
        let cont = ref_cont(st)?;
        st.call(cont)
    } else {
        st.code().skip_refs(1)?;
        Ok(None)
    }
}

fn exec_ifnotref(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cond = st.stack.pop_bool()?;
    if !cond {
        let cont = ref_cont(st)?;
        st.call(cont)
    } else {
        st.code().skip_refs(1)?;
        Ok(None)
    }
}

fn exec_ifjmpref(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cond = st.stack.pop_bool()?;
    if cond {
        let cont = ref_cont(st)?;
        st.jump(cont)
    } else {
        st.code().skip_refs(1)?;
        Ok(None)
    }
}

fn exec_ifnotjmpref(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cond = st.stack.pop_bool()?;
    if !cond {
        let cont = ref_cont(st)?;
        st.jump(cont)
    } else {
        st.code().skip_refs(1)?;
        Ok(None)
    }
}

fn exec_condsel(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let y = st.stack.pop()?;
    let x = st.stack.pop()?;
    let cond = st.stack.pop_bool()?;
    st.stack.push(if cond { x } else { y });
    Ok(None)
}

fn exec_ifretalt(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    if st.stack.pop_bool()? {
        st.ret_alt()
    } else {
        Ok(None)
    }
}

fn exec_ifnotretalt(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    if st.stack.pop_bool()? {
        Ok(None)
    } else {
        st.ret_alt()
    }
}

fn exec_repeat(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let body = st.stack.pop_cont()?;
    let count = st.stack.pop_int_range(i32::MIN as i64, i32::MAX as i64)?;
    if count <= 0 {
        return Ok(None);
    }
    let after = st.extract_cc(true, false)?;
    st.jump(Arc::new(Continuation::Repeat { body, after, count }))
}

/// `REPEATEND`: the rest of the current code is the loop body.
fn exec_repeatend(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let count = st.stack.pop_int_range(i32::MIN as i64, i32::MAX as i64)?;
    let body = Arc::new(Continuation::Ordinary {
        code: st.code().clone(),
        cdata: ControlData::with_cp(st.cp()),
    });
    let after = st
        .cr
        .c[0]
        .clone()
        .ok_or_else(|| VmError::fatal("c0 is unset"))?;
    if count <= 0 {
        return st.ret();
    }
    st.jump(Arc::new(Continuation::Repeat { body, after, count }))
}

fn exec_until(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let body = st.stack.pop_cont()?;
    let after = st.extract_cc(true, false)?;
    st.cr.set_c0(Arc::new(Continuation::Until {
        body: body.clone(),
        after,
    }));
    st.jump(body)
}

fn exec_untilend(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let body = Arc::new(Continuation::Ordinary {
        code: st.code().clone(),
        cdata: ControlData::with_cp(st.cp()),
    });
    let after = st
        .cr
        .c[0]
        .clone()
        .ok_or_else(|| VmError::fatal("c0 is unset"))?;
    st.cr.set_c0(Arc::new(Continuation::Until {
        body: body.clone(),
        after,
    }));
    st.jump(body)
}

fn exec_while(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let body = st.stack.pop_cont()?;
    let cond = st.stack.pop_cont()?;
    let after = st.extract_cc(true, false)?;
    st.cr.set_c0(Arc::new(Continuation::While {
        cond: cond.clone(),
        body,
        after,
        chkcond: true,
    }));
    st.jump(cond)
}

fn exec_whileend(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cond = st.stack.pop_cont()?;
    let body = Arc::new(Continuation::Ordinary {
        code: st.code().clone(),
        cdata: ControlData::with_cp(st.cp()),
    });
    let after = st
        .cr
        .c[0]
        .clone()
        .ok_or_else(|| VmError::fatal("c0 is unset"))?;
    st.cr.set_c0(Arc::new(Continuation::While {
        cond: cond.clone(),
        body,
        after,
        chkcond: true,
    }));
    st.jump(cond)
}

fn exec_again(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let body = st.stack.pop_cont()?;
    st.jump(Arc::new(Continuation::Again { body }))
}

fn exec_againend(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let body = Arc::new(Continuation::Ordinary {
        code: st.code().clone(),
        cdata: ControlData::with_cp(st.cp()),
    });
    st.jump(Arc::new(Continuation::Again { body }))
}

/// `SETCONTARGS r, n`: moves `r` stack values into the continuation's saved
/// stack and pins its expected argument count to `n` (15 meaning "any").
fn setcontargs_impl(st: &mut VmState, copy: u32, more: i32) -> VmResult<()> {
    let cont = st.stack.pop_cont()?;
    let mut cont = (*cont).clone();
    let values = st.stack.pop_many(copy as usize)?;
    {
        ensure_cdata(&mut cont);
        let cdata = cont.cdata_mut().expect("ensured above");
        let stack = cdata.stack.get_or_insert_with(Stack::new);
        for value in values {
            stack.push(value);
        }
        if more >= 0 {
            let base = stack.depth() as i32;
            cdata.nargs = base + more;
        }
    }
    st.consume_stack_gas(copy as usize)?;
    st.stack.push_cont(Arc::new(cont));
    Ok(())
}

fn exec_setcontargs(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let copy = (opc >> 4) & 0xF;
    let raw_more = (opc & 0xF) as i32;
    let more = if raw_more == 15 { -1 } else { raw_more };
    setcontargs_impl(st, copy, more)?;
    Ok(None)
}

fn exec_setcontvarargs(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let more = st.stack.pop_int_range(-1, 255)? as i32;
    let copy = st.stack.pop_smallint_range(255)?;
    setcontargs_impl(st, copy, more)?;
    Ok(None)
}

fn exec_returnargs(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    returnargs_impl(st, (opc & 0xF) as usize)
}

fn exec_returnvarargs(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let count = st.stack.pop_smallint_range(255)? as usize;
    returnargs_impl(st, count)
}

/// Leaves only the top `count` values; everything below is moved into c0's
/// saved stack.
fn returnargs_impl(st: &mut VmState, count: usize) -> VmResult<Option<i32>> {
    st.stack.check_underflow(count)?;
    let depth = st.stack.depth();
    if depth == count {
        return Ok(None);
    }
    let top = st.stack.split_top(count)?;
    let below = std::mem::replace(&mut st.stack, top);

    let c0 = st.cr.c[0].take().ok_or_else(|| VmError::fatal("c0 is unset"))?;
    let mut cont = (*c0).clone();
    {
        ensure_cdata(&mut cont);
        let cdata = cont.cdata_mut().expect("ensured above");
        let stack = cdata.stack.get_or_insert_with(Stack::new);
        for value in below.items() {
            stack.push(value.clone());
        }
    }
    st.consume_stack_gas(depth - count)?;
    st.cr.set_c0(Arc::new(cont));
    Ok(None)
}

/// `BLESS`: turns a slice into an ordinary continuation.
fn exec_bless(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let slice = st.stack.pop_slice()?;
    st.stack.push_cont(Continuation::ordinary(slice, st.cp()));
    Ok(None)
}

fn exec_blessargs(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let copy = (opc >> 4) & 0xF;
    let raw_more = (opc & 0xF) as i32;
    let more = if raw_more == 15 { -1 } else { raw_more };
    let slice = st.stack.pop_slice()?;
    st.stack.push_cont(Continuation::ordinary(slice, st.cp()));
    setcontargs_impl(st, copy, more)?;
    Ok(None)
}

fn exec_pushctr(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let idx = (opc & 0xF) as usize;
    if !ControlRegs::is_valid_idx(idx) {
        return Err(VmError::range_chk(format!("no control register c{idx}")));
    }
    let value = st.cr.get(idx).unwrap_or(StackValue::Null);
    st.stack.push(value);
    Ok(None)
}

fn exec_popctr(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let idx = (opc & 0xF) as usize;
    let value = st.stack.pop()?;
    st.cr.set(idx, value)?;
    Ok(None)
}

fn exec_pushctrx(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let idx = st.stack.pop_smallint_range(16)? as usize;
    if !ControlRegs::is_valid_idx(idx) {
        return Err(VmError::range_chk(format!("no control register c{idx}")));
    }
    let value = st.cr.get(idx).unwrap_or(StackValue::Null);
    st.stack.push(value);
    Ok(None)
}

fn exec_popctrx(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let idx = st.stack.pop_smallint_range(16)? as usize;
    let value = st.stack.pop()?;
    st.cr.set(idx, value)?;
    Ok(None)
}

/// `SETCONTCTR c(i)`: stores a register value into the continuation's save
/// area.
fn exec_setcontctr(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let idx = (opc & 0xF) as usize;
    let cont = st.stack.pop_cont()?;
    let value = st.stack.pop()?;
    let mut cont = (*cont).clone();
    {
        ensure_cdata(&mut cont);
        let cdata = cont.cdata_mut().expect("ensured above");
        cdata.save.set(idx, value)?;
    }
    st.stack.push_cont(Arc::new(cont));
    Ok(None)
}

fn exec_setretctr(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    set_reg_of(st, 0, (opc & 0xF) as usize)
}

fn exec_setaltctr(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    set_reg_of(st, 1, (opc & 0xF) as usize)
}

/// Stores the popped value into register `idx` of c0 or c1's save area.
fn set_reg_of(st: &mut VmState, target: usize, idx: usize) -> VmResult<Option<i32>> {
    let value = st.stack.pop()?;
    let holder = st
        .cr
        .c[target]
        .take()
        .ok_or_else(|| VmError::fatal("return continuation is unset"))?;
    let mut cont = (*holder).clone();
    {
        ensure_cdata(&mut cont);
        let cdata = cont.cdata_mut().expect("ensured above");
        cdata.save.set(idx, value)?;
    }
    st.cr.c[target] = Some(Arc::new(cont));
    Ok(None)
}

/// `SAVE c(i)`: stores the current value of c(i) into c0's save area, so a
/// return restores it.
fn exec_savectr(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let idx = (opc & 0xF) as usize;
    let value = st
        .cr
        .get(idx)
        .ok_or_else(|| VmError::range_chk(format!("no control register c{idx}")))?;
    let c0 = st.cr.c[0].take().ok_or_else(|| VmError::fatal("c0 is unset"))?;
    let mut cont = (*c0).clone();
    {
        ensure_cdata(&mut cont);
        let cdata = cont.cdata_mut().expect("ensured above");
        cdata.save.define(idx, value)?;
    }
    st.cr.c[0] = Some(Arc::new(cont));
    Ok(None)
}

/// `COMPOS` family: composes two continuations through c0/c1 save slots.
fn compose_impl(st: &mut VmState, set_c0: bool, set_c1: bool) -> VmResult<Option<i32>> {
    let next = st.stack.pop_cont()?;
    let cont = st.stack.pop_cont()?;
    let mut cont = (*cont).clone();
    {
        ensure_cdata(&mut cont);
        let cdata = cont.cdata_mut().expect("ensured above");
        if set_c0 {
            cdata.save.define_c0(next.clone());
        }
        if set_c1 {
            cdata.save.define_c1(next.clone());
        }
    }
    st.stack.push_cont(Arc::new(cont));
    Ok(None)
}

fn exec_atexit(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cont = st.stack.pop_cont()?;
    let cc = st.extract_cc(true, false)?;
    let mut wrapped = (*cont).clone();
    {
        ensure_cdata(&mut wrapped);
        let cdata = wrapped.cdata_mut().expect("ensured above");
        cdata.save.define_c0(cc);
    }
    st.cr.set_c0(Arc::new(wrapped));
    Ok(None)
}

fn exec_atexitalt(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cont = st.stack.pop_cont()?;
    let c1 = st.cr.c[1].clone().ok_or_else(|| VmError::fatal("c1 is unset"))?;
    let mut wrapped = (*cont).clone();
    {
        ensure_cdata(&mut wrapped);
        let cdata = wrapped.cdata_mut().expect("ensured above");
        cdata.save.define_c1(c1);
    }
    st.cr.set_c1(Arc::new(wrapped));
    Ok(None)
}

/// `INVERT`: swaps c0 and c1.
fn exec_invert(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    st.cr.c.swap(0, 1);
    Ok(None)
}

/// `BOOLEVAL`: runs the continuation with c0 pushing -1 and c1 pushing 0.
fn exec_booleval(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cont = st.stack.pop_cont()?;
    let after = st.extract_cc(true, false)?;
    let push_true = make_push_int_cont(-1, after.clone());
    let push_false = make_push_int_cont(0, after);
    st.cr.set_c0(push_true);
    st.cr.set_c1(push_false);
    st.jump(cont)
}

/// A tiny ordinary continuation whose code pushes the given tiny int and
/// falls through to `next` via its saved c0.
fn make_push_int_cont(value: i64, next: Arc<Continuation>) -> Arc<Continuation> {
    let mut builder = crate::cell::CellBuilder::new();
    // PUSHINT tiny encoding: 0x70 + (value & 0xF).
    let opcode = 0x70u64 + (value & 0xF) as u64;
    builder.store_u64(8, opcode).expect("8 bits fit");
    let code = crate::cell::OwnedCellSlice::new(builder.build().expect("valid").to_arc())
        .expect("ordinary");
    let mut cdata = ControlData::new();
    cdata.save.c[0] = Some(next);
    Arc::new(Continuation::Ordinary { code, cdata })
}

fn exec_calldict(st: &mut VmState, opc: u32, args_mask: u32) -> VmResult<Option<i32>> {
    let idx = (opc & args_mask) as i64;
    st.stack.push_int(idx);
    let c3 = st
        .cr
        .c[3]
        .clone()
        .ok_or_else(|| VmError::fatal("c3 is unset"))?;
    st.call(c3)
}

fn exec_jmpdict(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let idx = (opc & 0xFFF) as i64;
    st.stack.push_int(idx);
    let c3 = st
        .cr
        .c[3]
        .clone()
        .ok_or_else(|| VmError::fatal("c3 is unset"))?;
    st.jump(c3)
}

fn exec_preparedict(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let idx = (opc & 0xFFF) as i64;
    st.stack.push_int(idx);
    let c3 = st
        .cr
        .c[3]
        .clone()
        .ok_or_else(|| VmError::fatal("c3 is unset"))?;
    st.stack.push_cont(c3);
    Ok(None)
}

fn exec_throw(_st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let code = (opc & 0x3F) as i64;
    Err(app_exception(code, StackValue::int(0i64)))
}

fn exec_throwif(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let code = (opc & 0x3F) as i64;
    if st.stack.pop_bool()? {
        return Err(app_exception(code, StackValue::int(0i64)));
    }
    Ok(None)
}

fn exec_throwifnot(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let code = (opc & 0x3F) as i64;
    if !st.stack.pop_bool()? {
        return Err(app_exception(code, StackValue::int(0i64)));
    }
    Ok(None)
}

fn exec_throw_long(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let code = (opc & 0x7FF) as i64;
    Err(app_exception(code, StackValue::int(0i64)))
}

fn exec_throwarg(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let code = (opc & 0x7FF) as i64;
    let arg = st.stack.pop()?;
    Err(app_exception(code, arg))
}

fn exec_throwany(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let code = st.stack.pop_int_range(0, 0xFFFF)?;
    Err(app_exception(code, StackValue::int(0i64)))
}

fn exec_throwargany(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let code = st.stack.pop_int_range(0, 0xFFFF)?;
    let arg = st.stack.pop()?;
    Err(app_exception(code, arg))
}

/// Builds an application-level exception carrying an explicit code.
fn app_exception(code: i64, arg: StackValue) -> VmError {
    VmError::app_exception(code, arg)
}

fn try_impl(st: &mut VmState, pass: i32, ret: i32) -> VmResult<Option<i32>> {
    let handler = st.stack.pop_cont()?;
    let body = st.stack.pop_cont()?;

    // The handler restores the current c2 when it fires or is discarded.
    let old_c2 = st.cr.c[2].clone();
    let mut handler_cont = (*handler).clone();
    {
        ensure_cdata(&mut handler_cont);
        let cdata = handler_cont.cdata_mut().expect("ensured above");
        if let Some(old_c2) = &old_c2 {
            cdata.save.c[2] = Some(old_c2.clone());
        }
        if ret >= 0 {
            cdata.nargs = 2;
        }
    }
    let handler = Arc::new(handler_cont);

    let cc = st.extract_cc(true, false)?;
    // Returning from the body must also restore c2.
    let mut ret_cont = (*cc).clone();
    if let Some(cdata) = ret_cont.cdata_mut() {
        if let Some(old_c2) = &old_c2 {
            cdata.save.c[2] = Some(old_c2.clone());
        }
    }
    let ret_cont = Arc::new(ret_cont);
    st.cr.set_c0(ret_cont);
    st.cr.set_c2(handler);
    if pass >= 0 {
        st.call_ext(body, pass, ret)
    } else {
        st.jump(body)
    }
}

fn exec_try(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    try_impl(st, -1, -1)
}

fn exec_tryargs(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let pass = ((opc >> 4) & 0xF) as i32;
    let ret = (opc & 0xF) as i32;
    try_impl(st, pass, ret)
}

fn exec_setcp(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let n = (opc & 0xFF) as i32;
    if n == 0xF0 {
        // SETCPX
        let cp = st.stack.pop_int_range(i16::MIN as i64, i16::MAX as i64)? as i32;
        st.force_cp(cp)?;
        return Ok(None);
    }
    if n >= 240 {
        return Err(VmError::inv_opcode("reserved SETCP argument"));
    }
    st.force_cp(n)?;
    Ok(None)
}

/// `RUNVM` flags (our layout, see DESIGN.md): bit 0 `same_c3`, bit 1
/// `push_0`, bit 2 pop `c4` and return the final one, bit 3 pop `c7`,
/// bit 4 return `c5`, bit 5 pop a gas limit and isolate gas, bit 6 return
/// gas consumed.
fn run_child_vm(st: &mut VmState, flags: u32) -> VmResult<Option<i32>> {
    st.consume_gas(price::RUNVM)?;

    let gas_limit = if flags & 0x20 != 0 {
        Some(st.stack.pop_int_range(0, i64::MAX / 2)?)
    } else {
        None
    };
    let c7 = if flags & 0x08 != 0 {
        st.stack.pop_maybe_tuple()?
    } else {
        None
    };
    let data = if flags & 0x04 != 0 {
        Some(st.stack.pop_cell()?)
    } else {
        None
    };
    let code = st.stack.pop_slice()?;
    let args = st.stack.pop_smallint_range(255)? as usize;
    let child_stack = st.stack.split_top(args)?;

    let child_gas = match gas_limit {
        Some(limit) => GasLimits::with_limit(limit.min(st.gas.gas_remaining.max(0))),
        None => GasLimits::with_limit(st.gas.gas_remaining.max(0)),
    };
    let options = VmOptions {
        global_version: st.global_version(),
        gas: child_gas,
        c7,
        data,
        libraries: st.libraries().to_vec(),
        debug_enabled: st.debug_enabled,
        same_c3: flags & 0x01 != 0,
        push_0: flags & 0x02 != 0,
    };
    let mut child = VmState::new(code, child_stack, options);
    let exit_code = child.run();
    let output = child.into_output(exit_code);

    // Charge the parent for what the child burned unless gas was isolated.
    if flags & 0x20 == 0 {
        st.consume_gas(output.gas_consumed)?;
    }

    let result_depth = output.stack.depth();
    for value in output.stack.items() {
        st.stack.push(value.clone());
    }
    st.consume_stack_gas(result_depth)?;
    st.stack.push_int(exit_code as i64);
    if flags & 0x04 != 0 {
        match &output.data {
            Some(cell) => st.stack.push_cell(cell.clone()),
            None => st.stack.push(StackValue::Null),
        }
    }
    if flags & 0x10 != 0 {
        match &output.actions {
            Some(cell) => st.stack.push_cell(cell.clone()),
            None => st.stack.push(StackValue::Null),
        }
    }
    if flags & 0x40 != 0 {
        st.stack.push_int(output.gas_consumed);
    }
    Ok(None)
}

fn exec_runvm(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    run_child_vm(st, opc & 0xFFF)
}

fn exec_runvmx(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let flags = st.stack.pop_smallint_range(0xFFF)?;
    run_child_vm(st, flags)
}

pub fn register(t: &mut OpcodeTable) {
    t.insert(mksimple(0xD8, 8, "EXECUTE", exec_execute));
    t.insert(mksimple(0xD9, 8, "JMPX", exec_jmpx));
    t.insert(mkfixed(0xDA, 8, 8, "CALLXARGS", exec_callxargs));
    t.insert(mkfixed(0xDB0, 12, 4, "CALLXARGS", exec_callxargs_any));
    t.insert(mkfixed(0xDB1, 12, 4, "JMPXARGS", exec_jmpxargs));
    t.insert(mkfixed(0xDB2, 12, 4, "RETARGS", exec_retargs));
    t.insert(mksimple(0xDB30, 16, "RET", exec_ret));
    t.insert(mksimple(0xDB31, 16, "RETALT", exec_retalt));
    t.insert(mksimple(0xDB32, 16, "RETBOOL", exec_retbool));
    t.insert(mksimple(0xDB34, 16, "CALLCC", exec_callcc));
    t.insert(mksimple(0xDB3C, 16, "CALLREF", exec_callref));
    t.insert(mksimple(0xDB3D, 16, "JMPREF", exec_jmpref));
    t.insert(mksimple(0xDB3E, 16, "RETREF", exec_retref));
    t.insert(mkfixed(0xDB4, 12, 12, "RUNVM", exec_runvm).with_version(4));
    t.insert(mksimple(0xDB50, 16, "RUNVMX", exec_runvmx).with_version(4));

    t.insert(mksimple(0xDC, 8, "IFRET", exec_ifret));
    t.insert(mksimple(0xDD, 8, "IFNOTRET", exec_ifnotret));
    t.insert(mksimple(0xDE, 8, "IF", exec_if));
    t.insert(mksimple(0xDF, 8, "IFNOT", exec_ifnot));
    t.insert(mksimple(0xE0, 8, "IFJMP", exec_ifjmp));
    t.insert(mksimple(0xE1, 8, "IFNOTJMP", exec_ifnotjmp));
    t.insert(mksimple(0xE2, 8, "IFELSE", exec_ifelse));
    t.insert(mksimple(0xE300, 16, "IFREF", exec_ifref));
    t.insert(mksimple(0xE301, 16, "IFNOTREF", exec_ifnotref));
    t.insert(mksimple(0xE302, 16, "IFJMPREF", exec_ifjmpref));
    t.insert(mksimple(0xE303, 16, "IFNOTJMPREF", exec_ifnotjmpref));
    t.insert(mksimple(0xE304, 16, "CONDSEL", exec_condsel));
    t.insert(mksimple(0xE308, 16, "IFRETALT", exec_ifretalt));
    t.insert(mksimple(0xE309, 16, "IFNOTRETALT", exec_ifnotretalt));

    t.insert(mksimple(0xE4, 8, "REPEAT", exec_repeat));
    t.insert(mksimple(0xE5, 8, "REPEATEND", exec_repeatend));
    t.insert(mksimple(0xE6, 8, "UNTIL", exec_until));
    t.insert(mksimple(0xE7, 8, "UNTILEND", exec_untilend));
    t.insert(mksimple(0xE8, 8, "WHILE", exec_while));
    t.insert(mksimple(0xE9, 8, "WHILEEND", exec_whileend));
    t.insert(mksimple(0xEA, 8, "AGAIN", exec_again));
    t.insert(mksimple(0xEB, 8, "AGAINEND", exec_againend));

    t.insert(mkfixed(0xEC, 8, 8, "SETCONTARGS", exec_setcontargs));
    t.insert(mkfixed(0xED0, 12, 4, "RETURNARGS", exec_returnargs));
    t.insert(mksimple(0xED10, 16, "RETURNVARARGS", exec_returnvarargs));
    t.insert(mksimple(0xED11, 16, "SETCONTVARARGS", exec_setcontvarargs));
    t.insert(mksimple(0xED1E, 16, "BLESS", exec_bless));
    t.insert(mkfixed(0xED4, 12, 4, "PUSHCTR", exec_pushctr));
    t.insert(mkfixed(0xED5, 12, 4, "POPCTR", exec_popctr));
    t.insert(mkfixed(0xED6, 12, 4, "SETCONTCTR", exec_setcontctr));
    t.insert(mkfixed(0xED7, 12, 4, "SETRETCTR", exec_setretctr));
    t.insert(mkfixed(0xED8, 12, 4, "SETALTCTR", exec_setaltctr));
    t.insert(mkfixed(0xEDA, 12, 4, "SAVE", exec_savectr));
    t.insert(mksimple(0xEDE0, 16, "PUSHCTRX", exec_pushctrx));
    t.insert(mksimple(0xEDE1, 16, "POPCTRX", exec_popctrx));
    t.insert(mksimple(0xEDF0, 16, "COMPOS", |st, _| {
        compose_impl(st, true, false)
    }));
    t.insert(mksimple(0xEDF1, 16, "COMPOSALT", |st, _| {
        compose_impl(st, false, true)
    }));
    t.insert(mksimple(0xEDF2, 16, "COMPOSBOTH", |st, _| {
        compose_impl(st, true, true)
    }));
    t.insert(mksimple(0xEDF3, 16, "ATEXIT", exec_atexit));
    t.insert(mksimple(0xEDF4, 16, "ATEXITALT", exec_atexitalt));
    t.insert(mksimple(0xEDF8, 16, "INVERT", exec_invert));
    t.insert(mksimple(0xEDF9, 16, "BOOLEVAL", exec_booleval));
    t.insert(mkfixed(0xEE, 8, 8, "BLESSARGS", exec_blessargs));

    t.insert(mkfixed(0xF0, 8, 8, "CALLDICT", |st, opc| {
        exec_calldict(st, opc, 0xFF)
    }));
    t.insert(mkfixed(0xF10, 12, 12, "CALLDICT", |st, opc| {
        exec_calldict(st, opc, 0xFFF)
    }));
    t.insert(mkfixed(0xF12, 12, 12, "JMPDICT", exec_jmpdict));
    t.insert(mkfixed(0xF14, 12, 12, "PREPAREDICT", exec_preparedict));

    t.insert(mkfixedrange(0xF200, 0xF240, 16, "THROW", exec_throw));
    t.insert(mkfixedrange(0xF240, 0xF280, 16, "THROWIF", exec_throwif));
    t.insert(mkfixedrange(0xF280, 0xF2C0, 16, "THROWIFNOT", exec_throwifnot));
    t.insert(mkfixed(0xF2C, 12, 11, "THROW", exec_throw_long));
    t.insert(mkfixed(0xF2D, 12, 11, "THROWARG", exec_throwarg));
    t.insert(mksimple(0xF2F0, 16, "THROWANY", exec_throwany));
    t.insert(mksimple(0xF2F1, 16, "THROWARGANY", exec_throwargany));
    t.insert(mksimple(0xF2FF, 16, "TRY", exec_try));
    t.insert(mkfixed(0xF3, 8, 8, "TRYARGS", exec_tryargs));

    t.insert(mkfixed(0xFF, 8, 8, "SETCP", exec_setcp));
}
