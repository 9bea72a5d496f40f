use tonvm_core::cell::{CellBuilder, OwnedCellSlice};
use tonvm_core::gas::GasLimits;
use tonvm_core::num::Int257;
use tonvm_core::stack::{Stack, StackValue};
use tonvm_core::vm::{run_vm_code, SmartContractInfo, VmOptions, VmOutput};

fn assemble(bytes: &[u8]) -> OwnedCellSlice {
    let mut builder = CellBuilder::new();
    builder.store_bytes(bytes).expect("code fits");
    OwnedCellSlice::new(builder.build().expect("valid cell").to_arc()).expect("ordinary")
}

fn run(bytes: &[u8], initial: Vec<StackValue>, options: VmOptions) -> VmOutput {
    run_vm_code(assemble(bytes), Stack::from(initial), options)
}

fn run_default(bytes: &[u8], initial: Vec<StackValue>) -> VmOutput {
    run(bytes, initial, VmOptions::default())
}

fn tos_i64(output: &VmOutput) -> Option<i64> {
    output.stack.fetch(0).ok()?.as_int()?.to_i64()
}

#[test]
fn add_opcode_and_gas_price() {
    // ADD = 0xA0; stack [3, 5] -> [8].
    let output = run_default(&[0xA0], vec![StackValue::int(3i64), StackValue::int(5i64)]);
    assert_eq!(output.exit_code, 0);
    assert_eq!(output.stack.depth(), 1);
    assert_eq!(tos_i64(&output), Some(8));
    // 10 + 8 bits for ADD, plus the implicit return (5).
    assert_eq!(output.gas_consumed, 18 + 5);
}

#[test]
fn division_by_zero_is_range_check() {
    // DIV = 0xA9 0x04.
    for (x, y) in [(5i64, 0i64), (0, 0)] {
        let output = run_default(
            &[0xA9, 0x04],
            vec![StackValue::int(x), StackValue::int(y)],
        );
        assert_eq!(output.exit_code, 5, "{x}/{y}");
    }
}

#[test]
fn division_roundings_match() {
    // DIV floor / DIVC ceil / DIVR nearest on -7 / 2.
    let cases = [(0x04u8, -4i64), (0x05, -3), (0x06, -3)];
    for (args, expected) in cases {
        let output = run_default(
            &[0xA9, args],
            vec![StackValue::int(-7i64), StackValue::int(2i64)],
        );
        assert_eq!(tos_i64(&output), Some(expected), "args {args:#x}");
    }
}

#[test]
fn repeat_loop_counts_down() {
    // PUSHINT 10; PUSHCONT { PUSHINT 1; ADD }; REPEAT — with stack [0]
    // the loop leaves 10 on top.
    let code = [0x7A, 0x92, 0x71, 0xA0, 0xE4];
    let output = run_default(&code, vec![StackValue::int(0i64)]);
    assert_eq!(output.exit_code, 0);
    assert_eq!(tos_i64(&output), Some(10));
}

#[test]
fn uncaught_throw_reports_its_code() {
    // THROW 7 = 0xF2 0x07; no handler installed.
    let output = run_default(&[0xF2, 0x07], vec![]);
    assert_eq!(output.exit_code, 7);
    assert!(!output.committed);
    assert!(output.data.is_none());
}

#[test]
fn try_dispatches_to_handler() {
    // PUSHCONT { THROW 3 }; PUSHCONT { }; TRY.
    let code = [0x92, 0xF2, 0x03, 0x90, 0xF2, 0xFF];
    let output = run_default(&code, vec![]);
    assert_eq!(output.exit_code, 0);
    // The handler ran with (arg, code) on a fresh stack.
    assert_eq!(output.stack.depth(), 2);
    assert_eq!(tos_i64(&output), Some(3));
}

#[test]
fn throwarg_carries_its_argument() {
    // PUSHINT 9; THROWARG 300 (0xF2D + 11-bit code).
    // Encoding: prefix 0xF2D (12 bits), then code 300 in 11 bits.
    let mut builder = CellBuilder::new();
    builder.store_u64(8, 0x79).unwrap(); // PUSHINT 9
    builder.store_u64(12, 0xF2D).unwrap();
    builder.store_u64(11, 300).unwrap();
    let code = OwnedCellSlice::new(builder.build().unwrap().to_arc()).unwrap();
    let output = run_vm_code(code, Stack::new(), VmOptions::default());
    assert_eq!(output.exit_code, 300);
}

#[test]
fn out_of_gas_exits_minus_fourteen() {
    // AGAINEND loops forever; a finite gas limit must end the run.
    let options = VmOptions {
        gas: GasLimits::with_limit(1000),
        ..VmOptions::default()
    };
    let output = run(&[0xEB], vec![], options);
    assert_eq!(output.exit_code, -14);
    assert!(output.gas_consumed >= 1000);
}

#[test]
fn commit_snapshots_registers() {
    // COMMIT = 0xF8 0x0F.
    let output = run_default(&[0xF8, 0x0F], vec![]);
    assert_eq!(output.exit_code, 0);
    assert!(output.committed);
    assert!(output.data.is_some());
    assert!(output.actions.is_some());
}

#[test]
fn version_gate_excludes_new_opcodes() {
    // GASCONSUMED (0xF807) requires version 4.
    let old = VmOptions {
        global_version: 3,
        ..VmOptions::default()
    };
    let output = run(&[0xF8, 0x07], vec![], old);
    assert_eq!(output.exit_code, 6);

    let output = run_default(&[0xF8, 0x07], vec![]);
    assert_eq!(output.exit_code, 0);
    assert!(tos_i64(&output).unwrap() > 0);
}

#[test]
fn cell_build_and_parse_round_trip() {
    // NEWC; STU 32; ENDC; CTOS; LDU 32 over stack [777].
    // STU cc encodes cc+1 bits: 31 -> 32 bits.
    let code = [0xC8, 0xCB, 31, 0xC9, 0xD0, 0xD3, 31];
    let output = run_default(&code, vec![StackValue::int(777i64)]);
    assert_eq!(output.exit_code, 0);
    // Stack: [777, remainder-slice].
    assert_eq!(output.stack.depth(), 2);
    assert_eq!(
        output.stack.fetch(1).unwrap().as_int().unwrap().to_i64(),
        Some(777)
    );
}

#[test]
fn builder_overflow_is_cell_ov() {
    // NEWC then STU 256 four times exceeds 1023 bits on the fourth store.
    let code = [
        0xC8, 0xCB, 255, 0xCB, 255, 0xCB, 255, 0xCB, 255,
    ];
    let zeros = vec![
        StackValue::int(0i64),
        StackValue::int(0i64),
        StackValue::int(0i64),
        StackValue::int(0i64),
    ];
    let output = run_default(&code, zeros);
    assert_eq!(output.exit_code, 8);
}

#[test]
fn dict_set_then_get_through_opcodes() {
    // DICTUSET = 0xF416 (uint key, slice value).
    let mut value = CellBuilder::new();
    value.store_u64(32, 777).unwrap();
    let value_slice = OwnedCellSlice::new(value.build().unwrap().to_arc()).unwrap();

    let set_output = run_default(
        &[0xF4, 0x16],
        vec![
            StackValue::Slice(value_slice),
            StackValue::int(5i64),
            StackValue::Null,
            StackValue::int(8i64),
        ],
    );
    assert_eq!(set_output.exit_code, 0);
    let root = set_output.stack.fetch(0).unwrap();
    assert!(matches!(root, StackValue::Cell(_)));

    // DICTUGET = 0xF40E; then LDU 32 on the found value.
    let get_output = run_default(
        &[0xF4, 0x0E],
        vec![StackValue::int(5i64), root, StackValue::int(8i64)],
    );
    assert_eq!(get_output.exit_code, 0);
    assert_eq!(tos_i64(&get_output), Some(-1));
    let found = get_output.stack.fetch(1).unwrap();
    match found {
        StackValue::Slice(slice) => {
            assert_eq!(slice.prefetch_u64(32).unwrap(), 777);
        }
        other => panic!("expected a slice, got {other}"),
    }
}

#[test]
fn child_vm_isolates_the_stack() {
    // RUNVMX = 0xDB50 with flags 0: child gets [2, 3] and code ADD.
    let child_code = {
        let mut builder = CellBuilder::new();
        builder.store_bytes(&[0xA0]).unwrap();
        OwnedCellSlice::new(builder.build().unwrap().to_arc()).unwrap()
    };
    let output = run_default(
        &[0xDB, 0x50],
        vec![
            StackValue::int(2i64),
            StackValue::int(3i64),
            StackValue::int(2i64),
            StackValue::Slice(child_code),
            StackValue::int(0i64),
        ],
    );
    assert_eq!(output.exit_code, 0);
    // Child result 5, then the child's exit code 0.
    assert_eq!(tos_i64(&output), Some(0));
    assert_eq!(
        output.stack.fetch(1).unwrap().as_int().unwrap().to_i64(),
        Some(5)
    );
}

#[test]
fn context_tuple_feeds_getparam() {
    // NOW is GETPARAM 3 (0xF823); BALANCE is GETPARAM 7 returning the
    // balance pair.
    let info = SmartContractInfo {
        unixtime: 1_700_000_000,
        balance: 5_000_000,
        ..SmartContractInfo::default()
    };
    let options = VmOptions {
        c7: Some(info.build_c7()),
        ..VmOptions::default()
    };
    let output = run(&[0xF8, 0x23], vec![], options);
    assert_eq!(output.exit_code, 0);
    assert_eq!(tos_i64(&output), Some(1_700_000_000));

    let options = VmOptions {
        c7: Some(info.build_c7()),
        ..VmOptions::default()
    };
    let output = run(&[0xF8, 0x27], vec![], options);
    let pair = output.stack.fetch(0).unwrap();
    let tuple = pair.as_tuple().expect("balance pair");
    assert_eq!(tuple[0].as_int().unwrap().to_i64(), Some(5_000_000));
}

#[test]
fn rand_is_seed_deterministic() {
    // SETRAND (0xF814) then RANDU256 (0xF810) twice gives a fixed pair.
    let code = [0xF8, 0x14, 0xF8, 0x10, 0xF8, 0x10];
    let a = run_default(&code, vec![StackValue::int(12345i64)]);
    let b = run_default(&code, vec![StackValue::int(12345i64)]);
    assert_eq!(a.exit_code, 0);
    assert_eq!(a.stack.depth(), 2);
    let first = a.stack.fetch(0).unwrap();
    let second = b.stack.fetch(0).unwrap();
    assert!(first.eqv(&second));
    // Consecutive draws differ.
    assert!(!a.stack.fetch(0).unwrap().eqv(&a.stack.fetch(1).unwrap()));
}

#[test]
fn quiet_arithmetic_lets_nan_flow() {
    // PUSHNAN (0x83FF); QADD (0xB7A0) with 1.
    let code = [0x71, 0x83, 0xFF, 0xB7, 0xA0, 0xC4];
    let output = run_default(&code, vec![]);
    assert_eq!(output.exit_code, 0);
    // ISNAN left true.
    assert_eq!(tos_i64(&output), Some(-1));
}

#[test]
fn sendrawmsg_appends_an_action() {
    // NEWC; ENDC (an empty message cell); PUSHINT 1 mode; SENDRAWMSG.
    let code = [0xC8, 0xC9, 0x71, 0xFB, 0x00, 0xF8, 0x0F];
    let output = run_default(&code, vec![]);
    assert_eq!(output.exit_code, 0);
    let actions = output.actions.expect("committed actions");
    // One action node: ref to the previous (empty) head plus the tag.
    assert_eq!(actions.references().len(), 2);
    let mut slice = OwnedCellSlice::new(actions).unwrap();
    assert_eq!(slice.fetch_u64(32).unwrap(), 0x0ec3c86d);
    assert_eq!(slice.fetch_u64(8).unwrap(), 1);
}

#[test]
fn stack_depth_gas_surcharge() {
    // Depth beyond 32 entries costs one gas unit each when a continuation
    // copies the stack; keep it simple: CALLXARGS copying 40 args.
    let mut initial: Vec<StackValue> = (0..40i64).map(StackValue::int).collect();
    initial.push(StackValue::Int(Int257::zero()));
    // PUSHCONT { }; CALLXARGS 0,0 is encoded DA00; drop the zero first.
    let code = [0x30, 0x90, 0xDA, 0x00];
    let output = run_default(&code, initial);
    assert_eq!(output.exit_code, 0);
}
