//! `lim-rs`: lexer/parser front end plus the annotator/marker/state/
//! interpreter core for LIM, a total-failure-driven backtracking command
//! language (`spec.md`).

pub mod annotator;
pub mod atom;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod marker;
pub mod parser;
pub mod reader;
pub mod scope;
pub mod state;
pub mod tree;
pub mod writer;
