use std::collections::HashSet;
use std::sync::Arc;

use crate::cell::dict::{dict_get, KeyBits};
use crate::cell::{ArcCell, CellBuilder, OwnedCellSlice, EMPTY_CELL};
use crate::cont::{Continuation, ControlData, ControlRegs};
use crate::dispatch::codepage_table;
use crate::error::{Excno, VmError, VmResult};
use crate::gas::{price, GasLimits};
use crate::num::Int257;
use crate::stack::{Stack, StackValue, Tuple};
use crate::types::TonHash;

/// Engine version assumed when the embedder does not pin one. Opcode table
/// entries above this are inactive.
pub const DEFAULT_GLOBAL_VERSION: u32 = 11;

pub const C7_MAGIC: u64 = 0x076ef1ea;

/// Snapshot of `(c4, c5)` taken by `COMMIT`; surfaces to the embedder iff
/// the final gas check passes.
#[derive(Debug, Clone, Default)]
pub struct CommittedState {
    pub c4: Option<ArcCell>,
    pub c5: Option<ArcCell>,
    pub committed: bool,
}

/// Everything the smart-contract context tuple `c7[0]` carries; see the
/// eighteen-slot layout in `build_c7`.
#[derive(Debug, Clone)]
pub struct SmartContractInfo {
    pub actions: i64,
    pub msgs_sent: i64,
    pub unixtime: u64,
    pub block_lt: u64,
    pub trans_lt: u64,
    pub rand_seed: Int257,
    pub balance: i64,
    pub extra_currencies: Option<ArcCell>,
    pub myself: Option<OwnedCellSlice>,
    pub config_root: Option<ArcCell>,
    pub mycode: Option<ArcCell>,
    pub in_msg_value: i64,
    pub storage_fees: i64,
    pub prev_blocks: Option<Tuple>,
    pub unpacked_config: Option<Tuple>,
    pub due_payment: i64,
    pub precompiled_gas: Option<i64>,
    pub in_msg_params: Option<Tuple>,
    pub global_id: i32,
}

impl Default for SmartContractInfo {
    fn default() -> Self {
        SmartContractInfo {
            actions: 0,
            msgs_sent: 0,
            unixtime: 0,
            block_lt: 0,
            trans_lt: 0,
            rand_seed: Int257::zero(),
            balance: 0,
            extra_currencies: None,
            myself: None,
            config_root: None,
            mycode: None,
            in_msg_value: 0,
            storage_fees: 0,
            prev_blocks: None,
            unpacked_config: None,
            due_payment: 0,
            precompiled_gas: None,
            in_msg_params: None,
            global_id: 0,
        }
    }
}

fn opt_cell(cell: &Option<ArcCell>) -> StackValue {
    match cell {
        Some(cell) => StackValue::Cell(cell.clone()),
        None => StackValue::Null,
    }
}

fn opt_tuple(tuple: &Option<Tuple>) -> StackValue {
    match tuple {
        Some(tuple) => StackValue::Tuple(tuple.clone()),
        None => StackValue::Null,
    }
}

impl SmartContractInfo {
    /// The `c7` register: a one-element tuple holding the context tuple.
    pub fn build_c7(&self) -> Tuple {
        let myself = match &self.myself {
            Some(slice) => StackValue::Slice(slice.clone()),
            None => StackValue::Slice(addr_none_slice()),
        };
        let balance = StackValue::tuple(vec![
            StackValue::int(self.balance),
            opt_cell(&self.extra_currencies),
        ]);
        let in_msg_value = StackValue::tuple(vec![
            StackValue::int(self.in_msg_value),
            StackValue::Null,
        ]);
        let params = vec![
            StackValue::int(C7_MAGIC),                      // 0
            StackValue::int(self.actions),                  // 1
            StackValue::int(self.msgs_sent),                // 2
            StackValue::int(self.unixtime),                 // 3
            StackValue::int(self.block_lt),                 // 4
            StackValue::int(self.trans_lt),                 // 5
            StackValue::Int(self.rand_seed.clone()),        // 6
            balance,                                        // 7
            myself,                                         // 8
            opt_cell(&self.config_root),                    // 9
            opt_cell(&self.mycode),                         // 10
            in_msg_value,                                   // 11
            StackValue::int(self.storage_fees),             // 12
            opt_tuple(&self.prev_blocks),                   // 13
            opt_tuple(&self.unpacked_config),               // 14
            StackValue::int(self.due_payment),              // 15
            match self.precompiled_gas {
                Some(gas) => StackValue::int(gas),          // 16
                None => StackValue::Null,
            },
            opt_tuple(&self.in_msg_params),                 // 17
        ];
        Arc::new(vec![StackValue::tuple(params)])
    }
}

/// `addr_none$00` as a slice.
pub fn addr_none_slice() -> OwnedCellSlice {
    let mut builder = CellBuilder::new();
    builder.store_u8(2, 0).expect("two bits fit");
    OwnedCellSlice::new(builder.build().expect("valid cell").to_arc())
        .expect("ordinary cell")
}

/// Knobs for a fresh VM instance.
pub struct VmOptions {
    pub global_version: u32,
    pub gas: GasLimits,
    pub c7: Option<Tuple>,
    pub data: Option<ArcCell>,
    pub libraries: Vec<ArcCell>,
    pub debug_enabled: bool,
    /// Install the code itself as c3 and push an extra zero, the
    /// convention used when running get methods.
    pub same_c3: bool,
    pub push_0: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            global_version: DEFAULT_GLOBAL_VERSION,
            gas: GasLimits::infinite(),
            c7: None,
            data: None,
            libraries: vec![],
            debug_enabled: false,
            same_c3: false,
            push_0: false,
        }
    }
}

/// Results surfaced to the embedder after a run.
#[derive(Debug)]
pub struct VmOutput {
    pub exit_code: i32,
    pub stack: Stack,
    pub committed: bool,
    pub data: Option<ArcCell>,
    pub actions: Option<ArcCell>,
    pub steps: u64,
    pub gas_consumed: i64,
    pub accepted: bool,
}

enum Entered {
    /// An ordinary continuation installed its code; resume the step loop.
    Code,
    /// The run finished.
    Halt(i32),
    /// Keep jumping through this continuation.
    Next(Arc<Continuation>),
}

/// A single TVM instance: stack, registers, code cursor, gas and the
/// committed-state slot. Runs are a tight single-threaded loop.
pub struct VmState {
    pub stack: Stack,
    pub(crate) code: OwnedCellSlice,
    pub cr: ControlRegs,
    pub gas: GasLimits,
    pub cstate: CommittedState,
    cp: i32,
    steps: u64,
    global_version: u32,
    libraries: Vec<ArcCell>,
    loaded_cells: HashSet<TonHash>,
    pub(crate) debug_enabled: bool,
    pub(crate) debug_output: Vec<u8>,
    chksgn_counter: u64,
    extra_balance_counter: u64,
    free_gas_consumed: i64,
    accepted: bool,
}

impl VmState {
    pub fn new(code: OwnedCellSlice, stack: Stack, options: VmOptions) -> Self {
        let quit0 = Continuation::quit(0);
        let quit1 = Continuation::quit(1);
        let mut cr = ControlRegs::default();
        cr.c[0] = Some(quit0);
        cr.c[1] = Some(quit1);
        cr.c[2] = Some(Arc::new(Continuation::ExcQuit));
        if options.same_c3 {
            cr.c[3] = Some(Continuation::ordinary(code.clone(), 0));
        }
        cr.d[0] = Some(options.data.clone().unwrap_or_else(|| EMPTY_CELL.clone()));
        cr.d[1] = Some(EMPTY_CELL.clone());
        cr.c7 = Some(options.c7.unwrap_or_else(|| Arc::new(vec![])));

        let mut stack = stack;
        if options.push_0 {
            stack.push_int(0i64);
        }

        VmState {
            stack,
            code,
            cr,
            gas: options.gas,
            cstate: CommittedState::default(),
            cp: 0,
            steps: 0,
            global_version: options.global_version,
            libraries: options.libraries,
            loaded_cells: HashSet::new(),
            debug_enabled: options.debug_enabled,
            debug_output: Vec::new(),
            chksgn_counter: 0,
            extra_balance_counter: 0,
            free_gas_consumed: 0,
            accepted: false,
        }
    }

    pub fn global_version(&self) -> u32 {
        self.global_version
    }

    pub fn cp(&self) -> i32 {
        self.cp
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn code(&mut self) -> &mut OwnedCellSlice {
        &mut self.code
    }

    pub fn code_ref(&self) -> &OwnedCellSlice {
        &self.code
    }

    pub fn set_code(&mut self, code: OwnedCellSlice, cp: i32) {
        self.code = code;
        self.cp = cp;
    }

    pub fn force_cp(&mut self, cp: i32) -> VmResult<()> {
        if !crate::dispatch::codepage_exists(cp) {
            return Err(VmError::inv_opcode(format!("unknown codepage {cp}")));
        }
        self.cp = cp;
        Ok(())
    }

    pub fn consume_gas(&mut self, amount: i64) -> VmResult<()> {
        self.gas.consume_chk(amount)
    }

    pub fn consume_free_gas(&mut self, amount: i64) {
        self.free_gas_consumed += amount;
    }

    pub fn consume_stack_gas(&mut self, depth: usize) -> VmResult<()> {
        let billable = depth.saturating_sub(price::FREE_STACK_DEPTH) as i64;
        self.consume_gas(billable * price::STACK_ENTRY)
    }

    pub fn consume_tuple_gas(&mut self, entries: usize) -> VmResult<()> {
        self.consume_gas(entries as i64 * price::TUPLE_ENTRY)
    }

    /// First touch of a cell costs the full load price, later touches the
    /// reload price.
    pub fn register_cell_load(&mut self, hash: TonHash) -> VmResult<()> {
        if self.loaded_cells.insert(hash) {
            self.consume_gas(price::CELL_LOAD)
        } else {
            self.consume_gas(price::CELL_RELOAD)
        }
    }

    pub fn register_cell_create(&mut self) -> VmResult<()> {
        self.consume_gas(price::CELL_CREATE)
    }

    /// Ed25519 signature checks: the first few are paid from the free-gas
    /// pool, the rest cost real gas.
    pub fn register_chksgn_call(&mut self) -> VmResult<()> {
        self.chksgn_counter += 1;
        if self.chksgn_counter > price::CHKSGN_FREE_COUNT {
            self.consume_gas(price::CHKSGN)
        } else {
            self.consume_free_gas(price::CHKSGN);
            Ok(())
        }
    }

    /// True while `GETEXTRABALANCE` still runs in its cheap mode.
    pub fn register_extra_balance_call(&mut self) -> bool {
        self.extra_balance_counter += 1;
        self.extra_balance_counter <= price::GET_EXTRA_BALANCE_CHEAP_COUNT
    }

    pub fn accept(&mut self) {
        self.accepted = true;
        self.gas.change_limit(self.gas.gas_max);
    }

    pub fn change_gas_limit(&mut self, limit: i64) {
        self.gas.change_limit(limit);
    }

    pub fn try_commit(&mut self) -> bool {
        if let (Some(c4), Some(c5)) = (&self.cr.d[0], &self.cr.d[1]) {
            if c4.level() == 0 && c5.level() == 0 {
                self.cstate = CommittedState {
                    c4: Some(c4.clone()),
                    c5: Some(c5.clone()),
                    committed: true,
                };
                return true;
            }
        }
        false
    }

    pub fn libraries(&self) -> &[ArcCell] {
        &self.libraries
    }

    /// Looks the hash up in each library collection in order; collections
    /// are dictionaries keyed by the 256-bit code hash.
    pub fn load_library(&mut self, hash: &TonHash) -> VmResult<Option<ArcCell>> {
        let key = KeyBits::new(hash.to_vec(), 256);
        for root in self.libraries.clone() {
            self.register_cell_load(root.repr_hash())?;
            if let Some(value) = dict_get(Some(&root), &key).map_err(crate::error::as_dict_error)?
            {
                if value.remaining_refs() > 0 {
                    return Ok(Some(value.prefetch_ref()?));
                }
            }
        }
        Ok(None)
    }

    /// Turns a code cell into an executable slice, resolving library cells
    /// through the registered collections.
    pub fn convert_code_cell(&mut self, cell: ArcCell) -> VmResult<OwnedCellSlice> {
        self.register_cell_load(cell.repr_hash())?;
        if let Some(lib_hash) = cell.library_hash() {
            let resolved = self.load_library(&lib_hash)?.ok_or_else(|| {
                VmError::new(
                    Excno::CellUnderflow,
                    format!("library cell {} not found", hex::encode(lib_hash)),
                )
            })?;
            self.register_cell_load(resolved.repr_hash())?;
            return Ok(OwnedCellSlice::new(resolved)?);
        }
        Ok(OwnedCellSlice::new(cell)?)
    }

    pub fn ref_to_cont(&mut self, cell: ArcCell) -> VmResult<Arc<Continuation>> {
        let code = self.convert_code_cell(cell)?;
        Ok(Continuation::ordinary(code, self.cp))
    }

    /// Captures the current code remainder as the continuation `RET` will
    /// return to. `save_c0` stores the current c0 in its save area (and is
    /// replaced by the caller); `save_c1` mirrors it for the alt path.
    pub fn extract_cc(&mut self, save_c0: bool, save_c1: bool) -> VmResult<Arc<Continuation>> {
        let code = std::mem::replace(&mut self.code, empty_code());
        let mut cdata = ControlData::with_cp(self.cp);
        if save_c0 {
            if let Some(c0) = self.cr.c[0].take() {
                cdata.save.c[0] = Some(c0);
            }
        }
        if save_c1 {
            if let Some(c1) = self.cr.c[1].take() {
                cdata.save.c[1] = Some(c1);
            }
        }
        Ok(Arc::new(Continuation::Ordinary { code, cdata }))
    }

    fn apply_control_data(&mut self, cdata: &ControlData) -> VmResult<()> {
        if cdata.nargs >= 0 && self.stack.depth() < cdata.nargs as usize {
            return Err(VmError::stk_und(format!(
                "continuation expects {} arguments, stack depth is {}",
                cdata.nargs,
                self.stack.depth()
            )));
        }
        if let Some(saved) = &cdata.stack {
            let pass = if cdata.nargs >= 0 {
                cdata.nargs as usize
            } else {
                self.stack.depth()
            };
            let mut merged = saved.clone();
            merged.take_from(&mut self.stack, pass)?;
            self.consume_stack_gas(merged.depth())?;
            self.stack = merged;
        } else if cdata.nargs >= 0 {
            let keep = cdata.nargs as usize;
            let depth = self.stack.depth();
            if depth > keep {
                self.stack.drop_under(depth - keep, keep)?;
            }
        }
        self.cr.merge_with(&cdata.save);
        if cdata.cp >= 0 {
            self.force_cp(cdata.cp)?;
        }
        Ok(())
    }

    /// Enters a continuation once; loop continuations hand back the next one.
    fn enter(&mut self, cont: Arc<Continuation>) -> VmResult<Entered> {
        // Fork shared continuations only when their variant needs to consume
        // itself; most variants are read-only here.
        match &*cont {
            Continuation::Ordinary { code, cdata } => {
                let code = code.clone();
                let cdata = cdata.clone();
                self.apply_control_data(&cdata)?;
                let cp = if cdata.cp >= 0 { cdata.cp } else { self.cp };
                self.set_code(code, cp);
                Ok(Entered::Code)
            }
            Continuation::Quit { exit_code } => Ok(Entered::Halt(*exit_code)),
            Continuation::ExcQuit => {
                let code = self.stack.pop_int_range(0, 0xffff)?;
                Ok(Entered::Halt(code as i32))
            }
            Continuation::Repeat { body, after, count } => {
                if *count <= 0 {
                    Ok(Entered::Next(after.clone()))
                } else {
                    self.cr.set_c0(Arc::new(Continuation::Repeat {
                        body: body.clone(),
                        after: after.clone(),
                        count: count - 1,
                    }));
                    Ok(Entered::Next(body.clone()))
                }
            }
            Continuation::Again { body } => {
                self.cr.set_c0(cont.clone());
                Ok(Entered::Next(body.clone()))
            }
            Continuation::Until { body, after } => {
                if self.stack.pop_bool()? {
                    Ok(Entered::Next(after.clone()))
                } else {
                    self.cr.set_c0(cont.clone());
                    Ok(Entered::Next(body.clone()))
                }
            }
            Continuation::While {
                cond,
                body,
                after,
                chkcond,
            } => {
                if !chkcond {
                    self.cr.set_c0(Arc::new(Continuation::While {
                        cond: cond.clone(),
                        body: body.clone(),
                        after: after.clone(),
                        chkcond: true,
                    }));
                    Ok(Entered::Next(cond.clone()))
                } else if self.stack.pop_bool()? {
                    self.cr.set_c0(Arc::new(Continuation::While {
                        cond: cond.clone(),
                        body: body.clone(),
                        after: after.clone(),
                        chkcond: false,
                    }));
                    Ok(Entered::Next(body.clone()))
                } else {
                    Ok(Entered::Next(after.clone()))
                }
            }
            Continuation::ArgExt { inner, cdata } => {
                let cdata = cdata.clone();
                let inner = inner.clone();
                self.apply_control_data(&cdata)?;
                Ok(Entered::Next(inner))
            }
        }
    }

    /// The dispatcher loop: tail-jumps through continuations until one
    /// installs code or ends the run. Nested hops past the free allowance
    /// cost a gas unit each.
    pub fn jump(&mut self, cont: Arc<Continuation>) -> VmResult<Option<i32>> {
        let mut cont = cont;
        let mut hops = 0i64;
        loop {
            hops += 1;
            if hops > price::FREE_NESTED_CONT_JUMP {
                self.consume_gas(1)?;
            }
            match self.enter(cont)? {
                Entered::Code => return Ok(None),
                Entered::Halt(exit_code) => return Ok(Some(exit_code)),
                Entered::Next(next) => cont = next,
            }
        }
    }

    /// Calls a continuation: captures the current code as the return
    /// continuation in c0, unless the target brings its own c0.
    pub fn call(&mut self, cont: Arc<Continuation>) -> VmResult<Option<i32>> {
        if let Some(cdata) = cont.cdata() {
            if cdata.save.c[0].is_some() {
                // The target knows where to return; a call degenerates to a
                // jump.
                return self.jump(cont);
            }
        }
        let ret = self.extract_cc(true, false)?;
        self.cr.set_c0(ret);
        self.jump(cont)
    }

    /// `CALLXARGS`-style call: hand `pass_args` stack values to the callee
    /// and expect `ret_args` (-1 for all) back.
    pub fn call_ext(
        &mut self,
        cont: Arc<Continuation>,
        pass_args: i32,
        ret_args: i32,
    ) -> VmResult<Option<i32>> {
        if pass_args < 0 && ret_args < 0 {
            return self.call(cont);
        }
        let pass = if pass_args >= 0 {
            pass_args as usize
        } else {
            self.stack.depth()
        };
        self.stack.check_underflow(pass)?;
        let callee_stack = self.stack.split_top(pass)?;
        let rest = std::mem::replace(&mut self.stack, callee_stack);
        self.consume_stack_gas(self.stack.depth())?;

        let code = std::mem::replace(&mut self.code, empty_code());
        let mut cdata = ControlData::with_cp(self.cp);
        cdata.nargs = ret_args;
        cdata.stack = Some(rest);
        if let Some(c0) = self.cr.c[0].take() {
            cdata.save.c[0] = Some(c0);
        }
        let ret = Arc::new(Continuation::Ordinary { code, cdata });
        self.cr.set_c0(ret);
        self.jump(cont)
    }

    /// Jump handing over only the top `pass_args` values.
    pub fn jump_ext(&mut self, cont: Arc<Continuation>, pass_args: i32) -> VmResult<Option<i32>> {
        if pass_args >= 0 {
            let keep = pass_args as usize;
            let depth = self.stack.depth();
            self.stack.check_underflow(keep)?;
            if depth > keep {
                self.stack.drop_under(depth - keep, keep)?;
            }
        }
        self.jump(cont)
    }

    pub fn ret(&mut self) -> VmResult<Option<i32>> {
        let c0 = self
            .cr
            .c[0]
            .take()
            .ok_or_else(|| VmError::fatal("c0 is unset"))?;
        self.jump(c0)
    }

    pub fn ret_alt(&mut self) -> VmResult<Option<i32>> {
        let c1 = self
            .cr
            .c[1]
            .take()
            .ok_or_else(|| VmError::fatal("c1 is unset"))?;
        self.jump(c1)
    }

    pub fn ret_ext(&mut self, ret_args: i32) -> VmResult<Option<i32>> {
        if ret_args >= 0 {
            let keep = ret_args as usize;
            let depth = self.stack.depth();
            self.stack.check_underflow(keep)?;
            if depth > keep {
                self.stack.drop_under(depth - keep, keep)?;
            }
        }
        self.ret()
    }

    /// One instruction; empty code falls through to the implicit jump or
    /// return.
    pub fn step(&mut self) -> VmResult<Option<i32>> {
        self.steps += 1;
        if self.code.remaining_bits() == 0 {
            if self.code.remaining_refs() > 0 {
                self.consume_gas(price::IMPLICIT_JMPREF)?;
                let cell = self.code.fetch_ref()?;
                let cont = self.ref_to_cont(cell)?;
                return self.jump(cont);
            }
            self.consume_gas(price::IMPLICIT_RET)?;
            return self.ret();
        }

        let table = codepage_table(self.cp)?;
        let word = self.code.prefetch_u64_padded(24) as u32;
        let entry = table
            .lookup(word)
            .ok_or_else(|| VmError::inv_opcode(format!("no opcode at {word:#08x}")))?;
        if entry.min_version > self.global_version {
            return Err(VmError::inv_opcode(format!(
                "{} requires version {}, engine runs {}",
                entry.name, entry.min_version, self.global_version
            )));
        }
        if (entry.total_bits as usize) > self.code.remaining_bits() {
            return Err(VmError::inv_opcode(format!(
                "not enough bits for {}",
                entry.name
            )));
        }
        self.consume_gas(
            price::PER_INSTRUCTION + entry.total_bits as i64 * price::PER_INSTRUCTION_BIT,
        )?;
        let opc = word >> (24 - entry.total_bits);
        log::trace!("step {}: {}", self.steps, entry.name);
        self.code.skip_bits(entry.total_bits as usize)?;
        (entry.exec)(self, opc)
    }

    /// Builds the `(arg, code)` exception stack and transfers control to c2.
    /// Out-of-gas ends the run immediately with exit code -14.
    fn handle_exception(&mut self, err: VmError) -> VmResult<Option<i32>> {
        if matches!(err.excno, Excno::Fatal | Excno::OutOfGas) {
            return Ok(Some(err.exit_code()));
        }
        log::debug!("vm exception {}: {}", err.excno.code(), err.msg);
        if self.gas.consume_chk(price::EXCEPTION).is_err() {
            return Ok(Some(!Excno::OutOfGas.code()));
        }
        let arg = err.arg.clone().unwrap_or(StackValue::int(0i64));
        let mut exc_stack = Stack::new();
        exc_stack.push(arg);
        exc_stack.push_int(err.code as i64);
        self.stack = exc_stack;
        let handler = match &self.cr.c[2] {
            Some(handler) => handler.clone(),
            None => return Ok(Some(err.exit_code())),
        };
        self.jump(handler)
    }

    /// Runs to completion and returns the exit code.
    pub fn run(&mut self) -> i32 {
        loop {
            match self.step() {
                Ok(None) => continue,
                Ok(Some(exit_code)) => return exit_code,
                Err(err) => match self.handle_exception(err) {
                    Ok(None) => continue,
                    Ok(Some(exit_code)) => return exit_code,
                    Err(follow_up) => return follow_up.exit_code(),
                },
            }
        }
    }

    pub fn into_output(mut self, exit_code: i32) -> VmOutput {
        let committed = self.cstate.committed;
        VmOutput {
            exit_code,
            stack: std::mem::take(&mut self.stack),
            committed,
            data: if committed { self.cstate.c4.clone() } else { None },
            actions: if committed { self.cstate.c5.clone() } else { None },
            steps: self.steps,
            gas_consumed: self.gas.consumed(),
            accepted: self.accepted,
        }
    }

    pub fn take_debug_output(&mut self) -> String {
        String::from_utf8_lossy(&std::mem::take(&mut self.debug_output)).into_owned()
    }

    /// Context-tuple accessor: `c7[0][idx]` or null.
    pub fn get_param(&self, idx: usize) -> StackValue {
        let Some(c7) = &self.cr.c7 else {
            return StackValue::Null;
        };
        let Some(StackValue::Tuple(params)) = c7.first() else {
            return StackValue::Null;
        };
        params.get(idx).cloned().unwrap_or(StackValue::Null)
    }

    /// Replaces `c7[0][idx]`, extending the tuple with nulls as needed.
    pub fn set_param(&mut self, idx: usize, value: StackValue) -> VmResult<()> {
        let c7 = self.cr.c7.clone().unwrap_or_else(|| Arc::new(vec![]));
        let mut outer: Vec<StackValue> = (*c7).clone();
        if outer.is_empty() {
            outer.push(StackValue::tuple(vec![]));
        }
        let mut params = match &outer[0] {
            StackValue::Tuple(params) => (**params).clone(),
            _ => vec![],
        };
        while params.len() <= idx {
            params.push(StackValue::Null);
        }
        params[idx] = value;
        self.consume_tuple_gas(params.len())?;
        outer[0] = StackValue::tuple(params);
        self.consume_tuple_gas(outer.len())?;
        self.cr.c7 = Some(Arc::new(outer));
        Ok(())
    }

    /// Mixes fresh entropy into the random seed: the next 256 bits of
    /// SHA-512 over seed and salt.
    pub fn mix_rand_seed(&mut self, salt: Option<&[u8]>) -> VmResult<Int257> {
        use sha2::{Digest, Sha512};
        let seed = match self.get_param(6) {
            StackValue::Int(seed) => seed,
            _ => Int257::zero(),
        };
        let seed_bytes = seed
            .to_unsigned_bytes(32)
            .ok_or_else(|| VmError::range_chk("random seed out of range"))?;
        let mut hasher = Sha512::new();
        hasher.update(&seed_bytes);
        if let Some(salt) = salt {
            hasher.update(salt);
        }
        let digest = hasher.finalize();
        let new_seed = Int257::from_unsigned_bytes(&digest[0..32]);
        let output = Int257::from_unsigned_bytes(&digest[32..64]);
        self.set_param(6, StackValue::Int(new_seed))?;
        Ok(output)
    }
}

pub(crate) fn empty_code() -> OwnedCellSlice {
    OwnedCellSlice::new(EMPTY_CELL.clone()).expect("empty cell is ordinary")
}

/// Convenience entry point: run `code` over `stack` and collect the output.
pub fn run_vm_code(code: OwnedCellSlice, stack: Stack, options: VmOptions) -> VmOutput {
    let mut vm = VmState::new(code, stack, options);
    let exit_code = vm.run();
    vm.into_output(exit_code)
}
