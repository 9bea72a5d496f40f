use crate::error::{VmError, VmResult};

/// Gas prices shared by every codepage.
pub mod price {
    pub const PER_INSTRUCTION: i64 = 10;
    pub const PER_INSTRUCTION_BIT: i64 = 1;

    pub const CELL_LOAD: i64 = 100;
    pub const CELL_RELOAD: i64 = 25;
    pub const CELL_CREATE: i64 = 500;
    pub const EXCEPTION: i64 = 50;
    pub const TUPLE_ENTRY: i64 = 1;
    pub const IMPLICIT_JMPREF: i64 = 10;
    pub const IMPLICIT_RET: i64 = 5;
    pub const FREE_STACK_DEPTH: usize = 32;
    pub const STACK_ENTRY: i64 = 1;
    pub const RUNVM: i64 = 40;
    pub const HASH_EXT_ENTRY: i64 = 1;
    pub const FREE_NESTED_CONT_JUMP: i64 = 8;

    pub const CHKSGN: i64 = 4000;
    pub const CHKSGN_FREE_COUNT: u64 = 10;
    pub const ECRECOVER: i64 = 1500;

    pub const BLS_VERIFY: i64 = 61000;
    pub const BLS_AGGREGATE_BASE: i64 = -2650;
    pub const BLS_AGGREGATE_ELEMENT: i64 = 4350;
    pub const BLS_FAST_AGGREGATE_VERIFY_BASE: i64 = 58000;
    pub const BLS_FAST_AGGREGATE_VERIFY_ELEMENT: i64 = 3000;
    pub const BLS_AGGREGATE_VERIFY_BASE: i64 = 38500;
    pub const BLS_AGGREGATE_VERIFY_ELEMENT: i64 = 22500;

    pub const GET_EXTRA_BALANCE_CHEAP_COUNT: u64 = 5;
    pub const GET_EXTRA_BALANCE_CHEAP_MAX: i64 = 200;
}

/// The credit/limit/max gas triple with a running remainder.
///
/// `consumed = base - remaining`; the committed-state check at the end of a
/// run requires `remaining >= credit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasLimits {
    pub gas_max: i64,
    pub gas_limit: i64,
    pub gas_credit: i64,
    pub gas_remaining: i64,
    pub gas_base: i64,
}

impl GasLimits {
    pub const INFTY: i64 = i64::MAX >> 2;

    pub fn infinite() -> Self {
        GasLimits {
            gas_max: Self::INFTY,
            gas_limit: Self::INFTY,
            gas_credit: 0,
            gas_remaining: Self::INFTY,
            gas_base: Self::INFTY,
        }
    }

    pub fn with_limit(limit: i64) -> Self {
        Self::new(limit, Self::INFTY, 0)
    }

    pub fn new(limit: i64, max: i64, credit: i64) -> Self {
        let base = limit + credit;
        GasLimits {
            gas_max: max,
            gas_limit: limit,
            gas_credit: credit,
            gas_remaining: base,
            gas_base: base,
        }
    }

    pub fn consumed(&self) -> i64 {
        self.gas_base - self.gas_remaining
    }

    pub fn consume(&mut self, amount: i64) {
        self.gas_remaining -= amount;
    }

    pub fn try_consume(&mut self, amount: i64) -> bool {
        self.gas_remaining -= amount;
        self.gas_remaining >= 0
    }

    pub fn consume_chk(&mut self, amount: i64) -> VmResult<()> {
        if !self.try_consume(amount) {
            return Err(self.exhausted());
        }
        Ok(())
    }

    pub fn check(&self) -> VmResult<()> {
        if self.gas_remaining < 0 {
            return Err(self.exhausted());
        }
        Ok(())
    }

    pub fn exhausted(&self) -> VmError {
        VmError::out_of_gas(format!(
            "out of gas: consumed {}, limit {}",
            self.consumed(),
            self.gas_limit
        ))
    }

    /// Raises the limit (bounded by `max`) and re-bases the remainder; used
    /// by `ACCEPT` / `SETGASLIMIT`.
    pub fn change_limit(&mut self, new_limit: i64) {
        let new_limit = new_limit.clamp(0, self.gas_max);
        self.gas_credit = 0;
        self.gas_remaining += new_limit - self.gas_limit;
        self.gas_base += new_limit - self.gas_limit;
        self.gas_limit = new_limit;
    }

    pub fn final_ok(&self) -> bool {
        self.gas_remaining >= self.gas_credit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Excno;

    #[test]
    fn consumed_tracks_remaining() {
        let mut gas = GasLimits::with_limit(1000);
        assert_eq!(gas.consumed(), 0);
        gas.consume(18);
        assert_eq!(gas.consumed(), 18);
        gas.consume(100);
        assert_eq!(gas.consumed(), 118);
        assert_eq!(gas.gas_remaining, 1000 - 118);
    }

    #[test]
    fn exhaustion_raises_out_of_gas() {
        let mut gas = GasLimits::with_limit(10);
        assert!(gas.consume_chk(10).is_ok());
        let err = gas.consume_chk(1).unwrap_err();
        assert_eq!(err.excno, Excno::OutOfGas);
        assert_eq!(err.exit_code(), -14);
    }

    #[test]
    fn credit_must_be_repaid() {
        let mut gas = GasLimits::new(100, GasLimits::INFTY, 50);
        gas.consume(120);
        assert!(!gas.final_ok());
        // ACCEPT-style bump makes the run valid again.
        gas.change_limit(1000);
        assert!(gas.final_ok());
    }
}
