//! `lim [-debug=<n>] <progfile>`: the CLI entry point (`spec.md` §6),
//! grounded on the teacher's `clap`-derive argument parsing. Wires
//! lex -> parse -> annotate -> mark -> interpret and maps every outcome to
//! the exit-status/stderr-message contract in §6/§7.

use std::fs;
use std::io::{self, Write as _};
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;

use lim_rs::annotator::annotate;
use lim_rs::atom::AtomTable;
use lim_rs::error::RuntimeError;
use lim_rs::interpreter::run_program;
use lim_rs::marker::mark_program;
use lim_rs::parser::parse_program;
use lim_rs::state::State;

/// LIM: a total-failure-driven backtracking command language.
#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Debug bit mask: 1 = Err pure-on-input, 2 = dump tree before
    /// annotation, 4 = dump tree after annotation, 8 = dump tree after
    /// marking.
    #[arg(long = "debug", default_value_t = 0)]
    debug: u32,

    /// Program source file.
    progfile: String,
}

fn progname() -> String {
    std::env::args()
        .next()
        .map(|p| {
            Path::new(&p)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(p)
        })
        .unwrap_or_else(|| "lim".to_string())
}

fn dump_tree(label: &str, program: &lim_rs::tree::Program) {
    eprintln!("--- {} ---", label);
    eprintln!("{:#?}", program);
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let prog = progname();

    let src = match fs::read_to_string(&args.progfile) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}: {}", prog, e);
            return ExitCode::from(2);
        }
    };

    let mut atoms = AtomTable::new();
    let mut program = match parse_program(&src, &mut atoms) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{}: {}", prog, e);
            return ExitCode::from(2);
        }
    };

    if args.debug & 0x2 != 0 {
        dump_tree("before annotation", &program);
    }

    let err_pure_on_input = args.debug & 0x1 != 0;
    if let Err(errors) = annotate(&mut program, &mut atoms, err_pure_on_input) {
        for e in &errors {
            eprintln!("{}: {}", prog, e);
        }
        return ExitCode::from(2);
    }

    if args.debug & 0x4 != 0 {
        dump_tree("after annotation", &program);
    }

    mark_program(&mut program, err_pure_on_input);

    if args.debug & 0x8 != 0 {
        dump_tree("after marking", &program);
    }

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut state = State::new(program.n_globals, program.n_mutables, stdin.lock(), stdout.lock());

    match run_program(&program, &mut state) {
        Ok(true) => match state.finish() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{}: {}", prog, e);
                ExitCode::from(2)
            }
        },
        Ok(false) => {
            let chars_read = state.reader_tell();
            // "On guard failure, the output is truncated to position zero."
            let _ = state.writer().seek(0);
            let _ = state.finish();
            let _ = writeln!(io::stderr(), "{}: guard failure\nnumber of chars read = {}.", prog, chars_read);
            ExitCode::from(1)
        }
        Err(RuntimeError::Abort {
            line,
            chars_read,
            chars_written,
        }) => {
            let _ = state.finish();
            eprintln!("{} aborted at line {}, read {} chars, wrote {} chars", prog, line, chars_read, chars_written);
            ExitCode::from(2)
        }
        Err(RuntimeError::DivisionByZero { line }) => {
            let _ = state.finish();
            eprintln!("{}: division by zero near line {}", prog, line);
            ExitCode::from(2)
        }
        Err(RuntimeError::ModByZero { line }) => {
            let _ = state.finish();
            eprintln!("{}: mod by zero near line {}", prog, line);
            ExitCode::from(2)
        }
        Err(e) => {
            let _ = state.finish();
            eprintln!("{}: {}", prog, e);
            ExitCode::from(2)
        }
    }
}
