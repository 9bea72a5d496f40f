use tonvm_fift::{run_source, run_source_with_stack};

fn output_of(source: &str) -> String {
    let (exit_code, output) = run_source(source).expect("script runs");
    assert_eq!(exit_code, 0, "unexpected exit code for {source:?}");
    output
}

fn tos_i64(source: &str) -> i64 {
    let (_, _, stack) = run_source_with_stack(source).expect("script runs");
    stack
        .fetch(0)
        .expect("non-empty stack")
        .as_int()
        .expect("integer on top")
        .to_i64()
        .expect("fits i64")
}

#[test]
fn arithmetic_and_print() {
    assert_eq!(output_of("2 3 + . cr"), "5 \n");
}

#[test]
fn colon_definition_compiles_and_runs() {
    assert_eq!(output_of(": sq dup * ; 7 sq . cr"), "49 \n");
}

#[test]
fn halt_inverts_its_argument() {
    let (exit_code, _) = run_source("42 halt").expect("script runs");
    assert_eq!(exit_code, !42);
}

#[test]
fn bye_and_quit() {
    assert_eq!(run_source("bye").unwrap().0, 0);
    assert_eq!(run_source("quit").unwrap().0, -1);
}

#[test]
fn number_bases_and_fractions() {
    assert_eq!(tos_i64("0x10"), 16);
    assert_eq!(tos_i64("-0b101"), -5);
    // 5/7 pushes numerator and denominator.
    let (_, _, stack) = run_source_with_stack("5/7").unwrap();
    assert_eq!(stack.depth(), 2);
}

#[test]
fn division_words_round_as_specified() {
    assert_eq!(tos_i64("-7 2 /"), -4);
    assert_eq!(tos_i64("-7 2 /c"), -3);
    assert_eq!(tos_i64("-7 2 /r"), -3);
    assert_eq!(tos_i64("7 2 mod"), 1);
}

#[test]
fn muldiv_is_exact() {
    // (3 * 5) / 4 with floor.
    assert_eq!(tos_i64("3 5 4 */"), 3);
}

#[test]
fn blocks_and_execute() {
    assert_eq!(output_of("{ 17 . } execute cr"), "17 \n");
}

#[test]
fn times_loop() {
    // 0, then add 5 three times.
    assert_eq!(tos_i64("0 { 5 + } 3 times"), 15);
}

#[test]
fn conditionals() {
    assert_eq!(output_of("1 { \"yes\" type } if cr"), "yes\n");
    assert_eq!(output_of("0 { \"yes\" type } { \"no\" type } cond cr"), "no\n");
}

#[test]
fn while_loop_counts() {
    // Sum 5 + 4 + ... + 1: accumulator under the counter.
    assert_eq!(tos_i64("0 5 { dup 0> } { tuck + swap 1- } while drop"), 15);
}

#[test]
fn until_loop_runs_body_at_least_once() {
    assert_eq!(tos_i64("3 { 1- dup 0= } until"), 0);
}

#[test]
fn strings_and_chars() {
    assert_eq!(output_of("\"hello\" type cr"), "hello\n");
    assert_eq!(tos_i64("\"hello\" $len"), 5);
    assert_eq!(output_of("\"ab\" \"cd\" $+ type cr"), "abcd\n");
    assert_eq!(tos_i64("char A"), 65);
}

#[test]
fn dot_quote_prints() {
    assert_eq!(output_of(": greet .\" hi there\" cr ; greet"), "hi there\n");
}

#[test]
fn constants_and_tick() {
    assert_eq!(tos_i64("299792458 constant c c"), 299792458);
    assert_eq!(tos_i64("17 =: seventeen seventeen"), 17);
    assert_eq!(tos_i64("1 ' dup execute drop drop depth"), 0);
}

#[test]
fn boxes_hold_values() {
    assert_eq!(tos_i64("42 box @"), 42);
    assert_eq!(tos_i64("hole dup 7 swap ! @"), 7);
}

#[test]
fn tuples_and_indexing() {
    assert_eq!(tos_i64("1 2 3 3 tuple 1 []"), 2);
    assert_eq!(tos_i64("| 5 , 6 , count"), 2);
    assert_eq!(tos_i64("1 2 2 tuple explode drop +"), 3);
}

#[test]
fn atoms_intern() {
    assert_eq!(tos_i64("anon atom?"), -1);
    let (_, _, stack) = run_source_with_stack("\"foo\" true (atom) drop \"foo\" true (atom) drop eq?").unwrap();
    assert!(stack.fetch(0).unwrap().as_int().unwrap().is_true());
}

#[test]
fn hashmap_words() {
    assert_eq!(
        tos_i64("hmapnew 10 \"k\" hmap! 20 \"j\" hmap! \"k\" hmap@"),
        10
    );
    assert_eq!(tos_i64("hmapnew hmapempty?"), -1);
    assert_eq!(tos_i64("hmapnew 1 \"a\" hmap! \"missing\" hmap@? 0="), -1);
    // hmapforeach visits both entries; count them on the stack.
    assert_eq!(
        tos_i64("0 hmapnew 5 \"x\" hmap! 6 \"y\" hmap! { 2drop 1+ } hmapforeach drop"),
        2
    );
}

#[test]
fn cells_round_trip() {
    assert_eq!(output_of("<b 123 32 u, b> <s 32 u@ . cr"), "123 \n");
    assert_eq!(tos_i64("<b -5 8 i, b> <s 8 i@"), -5);
    assert_eq!(tos_i64("<b 1 1 u, b> <s sbits"), 1);
    assert_eq!(tos_i64("<b b> hashu 0>"), -1);
}

#[test]
fn slice_literals() {
    assert_eq!(tos_i64("x{A0} sbits"), 8);
    assert_eq!(tos_i64("b{1011} sbits"), 4);
    // Completion-tagged literal: x{4_} = bits `0`+tag -> one data bit.
    assert_eq!(tos_i64("x{4_} sbits"), 1);
}

#[test]
fn boc_round_trip_through_bytes() {
    assert_eq!(
        tos_i64("<b 99 32 u, b> boc>B B>boc <s 32 u@"),
        99
    );
}

#[test]
fn cell_dictionaries() {
    let source = "<b 777 32 u, b> <s 5 dictnew 16 udict! drop \
                  5 swap 16 udict@ drop 32 u@ . cr";
    assert_eq!(output_of(source), "777 \n");
}

#[test]
fn run_vm_from_fift() {
    // Child VM: stack [2, 3], code x{A0} (ADD), no flags.
    let (_, _, stack) = run_source_with_stack("2 3 2 x{A0} 0 runvmx").unwrap();
    // Exit code on top, the child's result below.
    assert_eq!(stack.fetch(0).unwrap().as_int().unwrap().to_i64(), Some(0));
    assert_eq!(stack.fetch(1).unwrap().as_int().unwrap().to_i64(), Some(5));
}

#[test]
fn abort_raises_an_error() {
    assert!(run_source("\"boom\" abort").is_err());
    assert!(run_source("true abort\"bad state\"").is_err());
    assert!(run_source("false abort\"fine\"").is_ok());
}

#[test]
fn undefined_word_reports_location() {
    let error = run_source("2 3 frobnicate").unwrap_err();
    let text = error.to_string();
    assert!(text.contains("frobnicate"), "{text}");
    assert!(text.contains("<input>:1"), "{text}");
}

#[test]
fn crypto_words_sign_and_verify() {
    let ok = tos_i64(
        "newkeypair =: pk =: sk \
         \"msg\" $>B sk ed25519_sign =: sig \
         \"msg\" $>B sig pk ed25519_chksign",
    );
    assert_eq!(ok, -1);
}

#[test]
fn base64_and_crc() {
    assert_eq!(output_of("\"AQID\" base64>B B>X type cr"), "010203\n");
    assert_eq!(tos_i64("\"123456789\" $>B crc16"), 0x31C3);
}

#[test]
fn smart_contract_address_round_trip() {
    // $>smca leaves (wc addr flags -1); keep only the success flag.
    let ok = tos_i64("0 123456789 0 smca>$ $>smca nip nip nip");
    assert_eq!(ok, -1);
}

#[test]
fn internal_interpret_brackets() {
    // [ 2 3 + ] computes at compile time; the result is compiled as a
    // literal.
    assert_eq!(tos_i64(": five [ 2 3 + ] ; five"), 5);
}

#[test]
fn stack_words() {
    assert_eq!(tos_i64("1 2 swap drop"), 1);
    assert_eq!(tos_i64("1 2 over drop drop"), 1);
    assert_eq!(tos_i64("1 2 3 rot drop drop"), 2);
    assert_eq!(tos_i64("1 2 3 2 pick drop drop drop"), 1);
    assert_eq!(tos_i64("7 ?dup +"), 14);
    assert_eq!(tos_i64("1 2 3 depth nip nip nip"), 3);
}
