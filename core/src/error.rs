use thiserror::Error;

use crate::cell::CellError;
use crate::stack::StackValue;

/// TVM exception codes. The numeric values are part of the observable
/// contract: an uncaught exception surfaces its code to the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Excno {
    Ok = 0,
    Alt = 1,
    StackUnderflow = 2,
    StackOverflow = 3,
    IntOverflow = 4,
    RangeCheck = 5,
    InvalidOpcode = 6,
    TypeCheck = 7,
    CellOverflow = 8,
    CellUnderflow = 9,
    DictError = 10,
    UnknownError = 11,
    Fatal = 12,
    OutOfGas = 13,
    VirtError = 14,
}

impl Excno {
    pub fn code(&self) -> i32 {
        *self as i32
    }
}

#[derive(Error, Debug, Clone)]
#[error("vm exception {code}: {msg}")]
pub struct VmError {
    pub excno: Excno,
    /// Code visible to handlers and the embedder; equals `excno` for
    /// engine-raised exceptions, the thrown value for `THROW n`.
    pub code: i32,
    pub msg: String,
    /// Exception argument handed to the c2 handler; integer zero if absent.
    pub arg: Option<StackValue>,
}

pub type VmResult<T> = Result<T, VmError>;

impl VmError {
    pub fn new(excno: Excno, msg: impl Into<String>) -> Self {
        VmError {
            excno,
            code: excno.code(),
            msg: msg.into(),
            arg: None,
        }
    }

    pub fn with_arg(excno: Excno, msg: impl Into<String>, arg: StackValue) -> Self {
        VmError {
            excno,
            code: excno.code(),
            msg: msg.into(),
            arg: Some(arg),
        }
    }

    /// An application-level `THROW n` with an explicit code and argument.
    pub fn app_exception(code: i64, arg: StackValue) -> Self {
        VmError {
            excno: Excno::UnknownError,
            code: code as i32,
            msg: format!("exception {code}"),
            arg: Some(arg),
        }
    }

    pub fn stk_und(msg: impl Into<String>) -> Self {
        Self::new(Excno::StackUnderflow, msg)
    }

    pub fn type_chk(msg: impl Into<String>) -> Self {
        Self::new(Excno::TypeCheck, msg)
    }

    pub fn range_chk(msg: impl Into<String>) -> Self {
        Self::new(Excno::RangeCheck, msg)
    }

    pub fn int_ov(msg: impl Into<String>) -> Self {
        Self::new(Excno::IntOverflow, msg)
    }

    pub fn inv_opcode(msg: impl Into<String>) -> Self {
        Self::new(Excno::InvalidOpcode, msg)
    }

    pub fn cell_ov(msg: impl Into<String>) -> Self {
        Self::new(Excno::CellOverflow, msg)
    }

    pub fn cell_und(msg: impl Into<String>) -> Self {
        Self::new(Excno::CellUnderflow, msg)
    }

    pub fn dict_err(msg: impl Into<String>) -> Self {
        Self::new(Excno::DictError, msg)
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::new(Excno::Fatal, msg)
    }

    pub fn out_of_gas(msg: impl Into<String>) -> Self {
        Self::new(Excno::OutOfGas, msg)
    }

    /// Exit code reported when this exception ends the run uncaught.
    pub fn exit_code(&self) -> i32 {
        match self.excno {
            Excno::OutOfGas => !Excno::OutOfGas.code(),
            _ => self.code,
        }
    }
}

impl From<CellError> for VmError {
    fn from(err: CellError) -> Self {
        let excno = match &err {
            CellError::BuilderError(_) => Excno::CellOverflow,
            CellError::Underflow { .. } => Excno::CellUnderflow,
            CellError::ParserError(_) => Excno::CellUnderflow,
            CellError::InvalidIndex { .. } => Excno::CellUnderflow,
            CellError::CellNotFound(_) => Excno::CellUnderflow,
            CellError::InvalidSpecialCell(_) => Excno::CellUnderflow,
            _ => Excno::UnknownError,
        };
        VmError::new(excno, err.to_string())
    }
}

/// Remaps any cell-layer failure to a dictionary error; hashmap opcodes
/// report malformed trees this way.
pub fn as_dict_error(err: CellError) -> VmError {
    let excno = match &err {
        CellError::BuilderError(_) => Excno::CellOverflow,
        _ => Excno::DictError,
    };
    VmError::new(excno, err.to_string())
}
