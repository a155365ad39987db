//! End-to-end scenarios from `spec.md` §8, each driven through the full
//! lex -> parse -> annotate -> mark -> interpret pipeline.

use std::io::Cursor;

use lim_rs::annotator::annotate;
use lim_rs::atom::AtomTable;
use lim_rs::error::RuntimeError;
use lim_rs::interpreter::run_program;
use lim_rs::marker::mark_program;
use lim_rs::parser::parse_program;
use lim_rs::state::State;
use lim_rs::tree::Program;
use pretty_assertions::assert_eq;

fn build(src: &str) -> Program {
    let mut atoms = AtomTable::new();
    let mut prog = parse_program(src, &mut atoms).expect("parse");
    annotate(&mut prog, &mut atoms, false).expect("annotate");
    mark_program(&mut prog, false);
    prog
}

fn run(src: &str, input: &str) -> Result<(bool, Vec<u8>, u32), RuntimeError> {
    let prog = build(src);
    let mut out = Vec::new();
    let result = {
        let mut state: State<_, &mut Vec<u8>> =
            State::new(prog.n_globals, prog.n_mutables, Cursor::new(input.as_bytes().to_vec()), &mut out);
        let ok = run_program(&prog, &mut state)?;
        let chars_read = state.reader_tell();
        state.finish().expect("flush succeeds");
        (ok, chars_read)
    };
    Ok((result.0, out, result.1))
}

#[test]
fn echo() {
    let (ok, out, chars_read) = run("proc Main() do var c = Rd() in Wr(c) end od", "abc").expect("no fatal error");
    assert!(ok);
    assert_eq!(out, b"abc");
    // The final EOF probe that terminates the DO loop does not advance the
    // reader's logical position, so the cursor lands on 3, not 4.
    assert_eq!(chars_read, 3);
}

#[test]
fn alternation_with_predictive_dispatch() {
    let (ok, out, _) = run(r#"proc Main() Rd("a") | Rd("b")"#, "b").expect("no fatal error");
    assert!(ok);
    assert!(out.is_empty());
}

#[test]
fn backtracking_restore() {
    let (ok, out, _) = run(r#"proc Main() (Wr("hello") ; FAIL) | SKIP"#, "").expect("no fatal error");
    assert!(ok);
    assert!(out.is_empty(), "the write inside the failed left branch must be rolled back");
}

#[test]
fn abort_reports_line_and_positions() {
    let prog = build(
        "proc Main() do\n  var c = Rd() in Wr(c) end\nod ;\nabort",
    );
    let mut out = Vec::new();
    let err = {
        let mut state: State<_, &mut Vec<u8>> = State::new(prog.n_globals, prog.n_mutables, Cursor::new(b"ab".to_vec()), &mut out);
        run_program(&prog, &mut state).expect_err("abort is fatal")
    };
    match err {
        RuntimeError::Abort { line, chars_read, chars_written } => {
            assert_eq!(line, 4);
            assert_eq!(chars_read, 2); // 'a' and 'b'; the EOF probe that ends the loop doesn't advance the cursor
            assert_eq!(chars_written, 2);
        }
        other => panic!("expected Abort, got {:?}", other),
    }
}

#[test]
fn division_by_zero_is_fatal_and_reports_its_line() {
    let prog = build("proc Main() var x = 1 / 0 in skip end");
    let mut out = Vec::new();
    let mut state: State<_, &mut Vec<u8>> = State::new(prog.n_globals, prog.n_mutables, Cursor::new(Vec::new()), &mut out);
    let err = run_program(&prog, &mut state).expect_err("division by zero is fatal");
    assert!(matches!(err, RuntimeError::DivisionByZero { line: 1 }));
}

#[test]
fn checkout_consumes_the_literal_exactly() {
    let (ok, _, _) = run(r#"proc Main() Rd("ab")"#, "abc").expect("no fatal error");
    assert!(ok);

    let prog = build(r#"proc Main() Rd("ab")"#);
    let mut out = Vec::new();
    let mut state: State<_, &mut Vec<u8>> = State::new(prog.n_globals, prog.n_mutables, Cursor::new(b"ac".to_vec()), &mut out);
    let ok = run_program(&prog, &mut state).expect("no fatal error");
    assert!(!ok);
    assert_eq!(state.reader_tell(), 0, "a failed checkout must leave the input position unchanged");
}
