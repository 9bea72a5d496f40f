use std::fmt;
use std::sync::Arc;

use crate::cell::{ArcCell, OwnedCellSlice};
use crate::error::{VmError, VmResult};
use crate::stack::{Stack, StackValue, Tuple};

/// Control registers c0..c3 (continuations), c4/c5 (cells) and c7 (the
/// context tuple). A register slot may be unset; merging another register
/// file writes only its set slots.
#[derive(Debug, Clone, Default)]
pub struct ControlRegs {
    pub c: [Option<Arc<Continuation>>; 4],
    pub d: [Option<ArcCell>; 2],
    pub c7: Option<Tuple>,
}

impl ControlRegs {
    pub fn get(&self, idx: usize) -> Option<StackValue> {
        match idx {
            0..=3 => self.c[idx].clone().map(StackValue::Cont),
            4 | 5 => self.d[idx - 4].clone().map(StackValue::Cell),
            7 => self.c7.clone().map(StackValue::Tuple),
            _ => None,
        }
    }

    pub fn set(&mut self, idx: usize, value: StackValue) -> VmResult<()> {
        match (idx, value) {
            (0..=3, StackValue::Cont(cont)) => {
                self.c[idx] = Some(cont);
                Ok(())
            }
            (4 | 5, StackValue::Cell(cell)) => {
                self.d[idx - 4] = Some(cell);
                Ok(())
            }
            (7, StackValue::Tuple(tuple)) => {
                self.c7 = Some(tuple);
                Ok(())
            }
            (0..=5 | 7, other) => Err(VmError::type_chk(format!(
                "wrong value kind {} for c{idx}",
                other.type_name()
            ))),
            _ => Err(VmError::range_chk(format!("no control register c{idx}"))),
        }
    }

    pub fn is_valid_idx(idx: usize) -> bool {
        matches!(idx, 0..=5 | 7)
    }

    pub fn set_c0(&mut self, cont: Arc<Continuation>) {
        self.c[0] = Some(cont);
    }

    pub fn set_c1(&mut self, cont: Arc<Continuation>) {
        self.c[1] = Some(cont);
    }

    pub fn set_c2(&mut self, cont: Arc<Continuation>) {
        self.c[2] = Some(cont);
    }

    /// Sets a register only when it is still unset; used to fill the save
    /// area of a captured continuation.
    pub fn define_c0(&mut self, cont: Arc<Continuation>) {
        if self.c[0].is_none() {
            self.c[0] = Some(cont);
        }
    }

    pub fn define_c1(&mut self, cont: Arc<Continuation>) {
        if self.c[1].is_none() {
            self.c[1] = Some(cont);
        }
    }

    pub fn define(&mut self, idx: usize, value: StackValue) -> VmResult<()> {
        let already = match idx {
            0..=3 => self.c[idx].is_some(),
            4 | 5 => self.d[idx - 4].is_some(),
            7 => self.c7.is_some(),
            _ => return Err(VmError::range_chk(format!("no control register c{idx}"))),
        };
        if already {
            return Ok(());
        }
        self.set(idx, value)
    }

    /// Overwrites our slots with every slot set in `other`.
    pub fn merge_with(&mut self, other: &ControlRegs) {
        for i in 0..4 {
            if let Some(cont) = &other.c[i] {
                self.c[i] = Some(cont.clone());
            }
        }
        for i in 0..2 {
            if let Some(cell) = &other.d[i] {
                self.d[i] = Some(cell.clone());
            }
        }
        if let Some(tuple) = &other.c7 {
            self.c7 = Some(tuple.clone());
        }
    }
}

/// Extra state a continuation may carry: an expected argument count, its own
/// saved stack, a register save area and a codepage.
#[derive(Debug, Clone, Default)]
pub struct ControlData {
    /// Number of arguments the continuation expects; -1 for "any".
    pub nargs: i32,
    pub stack: Option<Stack>,
    pub save: ControlRegs,
    /// Codepage to switch to, or -1 to keep the current one.
    pub cp: i32,
}

impl ControlData {
    pub fn new() -> Self {
        ControlData {
            nargs: -1,
            stack: None,
            save: ControlRegs::default(),
            cp: -1,
        }
    }

    pub fn with_cp(cp: i32) -> Self {
        ControlData {
            nargs: -1,
            stack: None,
            save: ControlRegs::default(),
            cp,
        }
    }
}

/// A first-class "what to do next" value.
///
/// All TVM control flow is expressed by constructing one of these and
/// jumping to it; the dispatcher in `vm.rs` interprets each variant.
#[derive(Debug, Clone)]
pub enum Continuation {
    /// Code to execute: the workhorse produced by `PUSHCONT`, `BLESS` and
    /// friends.
    Ordinary {
        code: OwnedCellSlice,
        cdata: ControlData,
    },
    /// Ends the run with the given exit code.
    Quit { exit_code: i32 },
    /// Default exception handler: pops the exception code and ends the run
    /// with it.
    ExcQuit,
    /// Runs `body` `count` more times, then `after`.
    Repeat {
        body: Arc<Continuation>,
        after: Arc<Continuation>,
        count: i64,
    },
    /// Runs `body` forever; only `RETALT` or an exception leaves.
    Again { body: Arc<Continuation> },
    /// Pops a flag after each `body` run: true leaves to `after`.
    Until {
        body: Arc<Continuation>,
        after: Arc<Continuation>,
    },
    /// Alternates `cond` and `body`; entered with `chkcond == false` right
    /// before the condition runs.
    While {
        cond: Arc<Continuation>,
        body: Arc<Continuation>,
        after: Arc<Continuation>,
        chkcond: bool,
    },
    /// Register-save envelope around another continuation.
    ArgExt {
        inner: Arc<Continuation>,
        cdata: ControlData,
    },
}

impl Continuation {
    pub fn quit(exit_code: i32) -> Arc<Continuation> {
        Arc::new(Continuation::Quit { exit_code })
    }

    pub fn ordinary(code: OwnedCellSlice, cp: i32) -> Arc<Continuation> {
        Arc::new(Continuation::Ordinary {
            code,
            cdata: ControlData::with_cp(cp),
        })
    }

    pub fn cdata(&self) -> Option<&ControlData> {
        match self {
            Continuation::Ordinary { cdata, .. } => Some(cdata),
            Continuation::ArgExt { cdata, .. } => Some(cdata),
            _ => None,
        }
    }

    pub fn cdata_mut(&mut self) -> Option<&mut ControlData> {
        match self {
            Continuation::Ordinary { cdata, .. } => Some(cdata),
            Continuation::ArgExt { cdata, .. } => Some(cdata),
            _ => None,
        }
    }
}

impl fmt::Display for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Continuation::Ordinary { code, .. } => write!(f, "Cont{{{code}}}"),
            Continuation::Quit { exit_code } => write!(f, "Quit{{{exit_code}}}"),
            Continuation::ExcQuit => write!(f, "ExcQuit"),
            Continuation::Repeat { count, .. } => write!(f, "Repeat{{{count}}}"),
            Continuation::Again { .. } => write!(f, "Again"),
            Continuation::Until { .. } => write!(f, "Until"),
            Continuation::While { chkcond, .. } => write!(f, "While{{chkcond={chkcond}}}"),
            Continuation::ArgExt { inner, .. } => write!(f, "ArgExt{{{inner}}}"),
        }
    }
}
