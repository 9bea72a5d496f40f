//! Opcode handlers grouped by family, each with a `register` routine that
//! fills the codepage-0 table.

use crate::dispatch::OpcodeTable;

pub mod arithops;
pub mod cellops;
pub mod contops;
pub mod cryptops;
pub mod debugops;
pub mod dictops;
pub mod stackops;
pub mod tonops;
pub mod tupleops;

pub fn register_all(table: &mut OpcodeTable) {
    stackops::register(table);
    tupleops::register(table);
    arithops::register(table);
    cellops::register(table);
    contops::register(table);
    dictops::register(table);
    tonops::register(table);
    cryptops::register(table);
    debugops::register(table);
}
