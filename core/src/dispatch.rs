use lazy_static::lazy_static;

use crate::error::{VmError, VmResult};
use crate::vm::VmState;

/// Executor for one table entry. Receives the opcode word truncated to the
/// entry's total bit width (prefix and argument bits); extension opcodes
/// read the rest from the code slice themselves.
pub type ExecFn = fn(&mut VmState, u32) -> VmResult<Option<i32>>;

/// Width of the normalized prefix space all entries are mapped into.
pub const DISPATCH_BITS: u8 = 24;

pub struct OpcodeEntry {
    /// Normalized 24-bit range `[min, max)` this entry owns.
    pub min: u32,
    pub max: u32,
    /// Fixed bits the dispatcher skips before invoking `exec`.
    pub total_bits: u8,
    pub name: &'static str,
    /// Entry is inactive below this engine version.
    pub min_version: u32,
    pub exec: ExecFn,
}

impl OpcodeEntry {
    pub fn with_version(mut self, version: u32) -> Self {
        self.min_version = version;
        self
    }
}

/// A fixed-width opcode without arguments.
pub fn mksimple(opcode: u32, pfx_bits: u8, name: &'static str, exec: ExecFn) -> OpcodeEntry {
    mkfixed(opcode, pfx_bits, 0, name, exec)
}

/// A fixed-width opcode followed by `arg_bits` argument bits.
pub fn mkfixed(
    opcode: u32,
    pfx_bits: u8,
    arg_bits: u8,
    name: &'static str,
    exec: ExecFn,
) -> OpcodeEntry {
    assert!(pfx_bits + arg_bits <= DISPATCH_BITS);
    let shift = DISPATCH_BITS - pfx_bits;
    OpcodeEntry {
        min: opcode << shift,
        max: (opcode + 1) << shift,
        total_bits: pfx_bits + arg_bits,
        name,
        min_version: 0,
        exec,
    }
}

/// An opcode owning the range `[opcode_min, opcode_max)` of `total_bits`-wide
/// words; used when argument values are constrained.
pub fn mkfixedrange(
    opcode_min: u32,
    opcode_max: u32,
    total_bits: u8,
    name: &'static str,
    exec: ExecFn,
) -> OpcodeEntry {
    assert!(total_bits <= DISPATCH_BITS);
    let shift = DISPATCH_BITS - total_bits;
    OpcodeEntry {
        min: opcode_min << shift,
        max: opcode_max << shift,
        total_bits,
        name,
        min_version: 0,
        exec,
    }
}

/// An extensible opcode: `total_bits` fixed bits, further payload read from
/// the code slice by the executor.
pub fn mkext(
    opcode: u32,
    pfx_bits: u8,
    arg_bits: u8,
    name: &'static str,
    exec: ExecFn,
) -> OpcodeEntry {
    mkfixed(opcode, pfx_bits, arg_bits, name, exec)
}

/// Prefix-coded opcode table for one codepage: longest-prefix match by
/// binary search over disjoint 24-bit ranges.
pub struct OpcodeTable {
    name: &'static str,
    entries: Vec<OpcodeEntry>,
}

impl OpcodeTable {
    pub fn new(name: &'static str) -> Self {
        OpcodeTable {
            name,
            entries: vec![],
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Registers an entry; ranges must not overlap. Overlap is a programming
    /// error in the table definition, caught at first use.
    pub fn insert(&mut self, entry: OpcodeEntry) -> &mut Self {
        assert!(entry.min < entry.max, "empty range for {}", entry.name);
        let pos = self.entries.partition_point(|e| e.min < entry.min);
        if let Some(prev) = pos.checked_sub(1).and_then(|i| self.entries.get(i)) {
            assert!(
                prev.max <= entry.min,
                "opcode overlap: {} and {}",
                prev.name,
                entry.name
            );
        }
        if let Some(next) = self.entries.get(pos) {
            assert!(
                entry.max <= next.min,
                "opcode overlap: {} and {}",
                entry.name,
                next.name
            );
        }
        self.entries.insert(pos, entry);
        self
    }

    pub fn lookup(&self, word: u32) -> Option<&OpcodeEntry> {
        let pos = self.entries.partition_point(|e| e.max <= word);
        let entry = self.entries.get(pos)?;
        (entry.min <= word).then_some(entry)
    }

    pub fn entries(&self) -> &[OpcodeEntry] {
        &self.entries
    }
}

lazy_static! {
    static ref CP0: OpcodeTable = {
        let mut table = OpcodeTable::new("cp0");
        crate::instr::register_all(&mut table);
        table
    };
}

/// Table for a codepage; only codepage 0 is populated.
pub fn codepage_table(cp: i32) -> VmResult<&'static OpcodeTable> {
    if cp == 0 {
        Ok(&CP0)
    } else {
        Err(VmError::inv_opcode(format!("unknown codepage {cp}")))
    }
}

pub fn codepage_exists(cp: i32) -> bool {
    cp == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop(_: &mut VmState, _: u32) -> VmResult<Option<i32>> {
        Ok(None)
    }

    #[test]
    fn longest_prefix_lookup() {
        let mut table = OpcodeTable::new("test");
        table.insert(mksimple(0x00, 8, "NOP", nop));
        table.insert(mkfixed(0xA9, 8, 8, "DIVMOD", nop));
        table.insert(mkfixedrange(0xF800, 0xF810, 16, "GETPARAM", nop));

        assert_eq!(table.lookup(0x00_00_00).unwrap().name, "NOP");
        assert_eq!(table.lookup(0x00_FF_FF).unwrap().name, "NOP");
        assert_eq!(table.lookup(0xA9_04_00).unwrap().name, "DIVMOD");
        assert_eq!(table.lookup(0xF8_05_00).unwrap().name, "GETPARAM");
        assert!(table.lookup(0xF8_10_00).is_none());
        assert!(table.lookup(0x01_00_00).is_none());
    }

    #[test]
    #[should_panic(expected = "opcode overlap")]
    fn overlap_is_rejected() {
        let mut table = OpcodeTable::new("test");
        table.insert(mksimple(0xA0, 8, "ADD", nop));
        table.insert(mkfixedrange(0xA000, 0xA100, 16, "ADDX", nop));
    }

    #[test]
    fn cp0_is_well_formed() {
        // Forces table construction, which asserts on any range overlap.
        assert!(codepage_table(0).is_ok());
        assert!(codepage_table(1).is_err());
    }
}
