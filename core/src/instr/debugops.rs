use crate::dispatch::{mkext, mkfixed, mkfixedrange, mksimple, OpcodeTable};
use crate::error::VmResult;
use crate::vm::VmState;

/// Debug opcodes never perturb the stack or gas beyond the fixed
/// instruction price; with debugging disabled they are plain no-ops, except
/// that `DEBUGSTR` always consumes its inline payload.

fn exec_dumpstk(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    if st.debug_enabled {
        let line = format!("#DEBUG#: stack({}):{}\n", st.stack.depth(), st.stack.dump());
        st.debug_output.extend_from_slice(line.as_bytes());
    }
    Ok(None)
}

fn exec_dump(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    if st.debug_enabled {
        let idx = (opc & 0xF) as usize;
        let line = match st.stack.fetch_ref(idx) {
            Ok(value) => format!("#DEBUG#: s{idx} = {value}\n"),
            Err(_) => format!("#DEBUG#: s{idx} is absent\n"),
        };
        st.debug_output.extend_from_slice(line.as_bytes());
    }
    Ok(None)
}

fn exec_strdump(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    if st.debug_enabled {
        let line = match st.stack.fetch_ref(0) {
            Ok(crate::stack::StackValue::Slice(slice)) => {
                let bits = slice.remaining_bits();
                let bytes = slice.prefetch_bits(bits - bits % 8).unwrap_or_default();
                format!("#DEBUG#: {}\n", String::from_utf8_lossy(&bytes))
            }
            Ok(other) => format!("#DEBUG#: s0 = {other}\n"),
            Err(_) => "#DEBUG#: s0 is absent\n".to_owned(),
        };
        st.debug_output.extend_from_slice(line.as_bytes());
    }
    Ok(None)
}

/// `DEBUGSTR`: `n+1` inline bytes follow the opcode. The payload is always
/// skipped so that code parses identically with debugging off.
fn exec_debugstr(st: &mut VmState, opc: u32) -> VmResult<Option<i32>> {
    let len = (opc & 0xF) as usize + 1;
    let mut payload = st.code().fetch_subslice(len * 8, 0)?;
    if st.debug_enabled {
        let bytes = payload.fetch_bytes(len)?;
        let line = format!("#DEBUG#: {}\n", String::from_utf8_lossy(&bytes));
        st.debug_output.extend_from_slice(line.as_bytes());
    }
    Ok(None)
}

fn exec_debug_nop(_: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    Ok(None)
}

pub fn register(t: &mut OpcodeTable) {
    t.insert(mksimple(0xFE00, 16, "DUMPSTK", exec_dumpstk));
    t.insert(mkfixedrange(0xFE01, 0xFE14, 16, "DEBUG", exec_debug_nop));
    t.insert(mksimple(0xFE14, 16, "STRDUMP", exec_strdump));
    t.insert(mkfixedrange(0xFE15, 0xFE20, 16, "DEBUG", exec_debug_nop));
    t.insert(mkfixed(0xFE2, 12, 4, "DUMP", exec_dump));
    t.insert(mkfixedrange(0xFE30, 0xFEF0, 16, "DEBUG", exec_debug_nop));
    t.insert(mkext(0xFEF, 12, 4, "DEBUGSTR", exec_debugstr));
}
