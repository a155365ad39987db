//! Minimal lexer for the internal front end (see `SPEC_FULL.md` §0.1). Not
//! part of the in-scope core -- it only exists so the CLI and integration
//! tests have something to hand the annotator.

use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tok {
    Ident(String),
    Int(i32),
    Str(Vec<u8>),
    Var,
    Proc,
    Out,
    Inout,
    In,
    Skip,
    Fail,
    Abort,
    Do,
    Od,
    Til,
    Or,
    TilEnd,
    End,
    LParen,
    RParen,
    Comma,
    Semi,
    Assign,
    Bar,
    Arrow,
    AndAnd,
    OrOr,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub tok: Tok,
    pub line: u32,
}

pub fn lex(src: &str) -> Result<Vec<Spanned>, ParseError> {
    let mut out = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0usize;
    let mut line = 1u32;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' => {
                i += 1;
            }
            '\n' => {
                line += 1;
                i += 1;
            }
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '(' => {
                out.push(Spanned { tok: Tok::LParen, line });
                i += 1;
            }
            ')' => {
                out.push(Spanned { tok: Tok::RParen, line });
                i += 1;
            }
            ',' => {
                out.push(Spanned { tok: Tok::Comma, line });
                i += 1;
            }
            ';' => {
                out.push(Spanned { tok: Tok::Semi, line });
                i += 1;
            }
            '|' => {
                out.push(Spanned { tok: Tok::Bar, line });
                i += 1;
            }
            '+' => {
                out.push(Spanned { tok: Tok::Plus, line });
                i += 1;
            }
            '*' => {
                out.push(Spanned { tok: Tok::Star, line });
                i += 1;
            }
            '/' => {
                out.push(Spanned { tok: Tok::Slash, line });
                i += 1;
            }
            '%' => {
                out.push(Spanned { tok: Tok::Percent, line });
                i += 1;
            }
            ':' => {
                if chars.get(i + 1) == Some(&'=') {
                    out.push(Spanned { tok: Tok::Assign, line });
                    i += 2;
                } else {
                    return Err(ParseError::UnexpectedChar(c, line));
                }
            }
            '-' => {
                if chars.get(i + 1) == Some(&'>') {
                    out.push(Spanned { tok: Tok::Arrow, line });
                    i += 2;
                } else {
                    out.push(Spanned { tok: Tok::Minus, line });
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    out.push(Spanned { tok: Tok::AndAnd, line });
                    i += 2;
                } else {
                    return Err(ParseError::UnexpectedChar(c, line));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    out.push(Spanned { tok: Tok::Neq, line });
                    i += 2;
                } else {
                    out.push(Spanned { tok: Tok::Bang, line });
                    i += 1;
                }
            }
            '=' => {
                out.push(Spanned { tok: Tok::Eq, line });
                i += 1;
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    out.push(Spanned { tok: Tok::Le, line });
                    i += 2;
                } else {
                    out.push(Spanned { tok: Tok::Lt, line });
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    out.push(Spanned { tok: Tok::Ge, line });
                    i += 2;
                } else {
                    out.push(Spanned { tok: Tok::Gt, line });
                    i += 1;
                }
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<i32>()
                    .map_err(|_| ParseError::InvalidIntLiteral(text, line))?;
                out.push(Spanned { tok: Tok::Int(value), line });
            }
            '"' => {
                i += 1;
                let mut bytes = Vec::new();
                loop {
                    match chars.get(i) {
                        None => return Err(ParseError::UnterminatedString(line)),
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            let esc = chars.get(i + 1).ok_or(ParseError::UnterminatedString(line))?;
                            let byte = match esc {
                                'n' => b'\n',
                                't' => b'\t',
                                '\\' => b'\\',
                                '"' => b'"',
                                other => *other as u8,
                            };
                            bytes.push(byte);
                            i += 2;
                        }
                        Some(ch) => {
                            bytes.push(*ch as u8);
                            i += 1;
                        }
                    }
                }
                out.push(Spanned { tok: Tok::Str(bytes), line });
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let tok = match text.as_str() {
                    "var" => Tok::Var,
                    "proc" => Tok::Proc,
                    "out" => Tok::Out,
                    "inout" => Tok::Inout,
                    "in" => Tok::In,
                    "skip" => Tok::Skip,
                    "fail" => Tok::Fail,
                    "abort" => Tok::Abort,
                    "do" => Tok::Do,
                    "od" => Tok::Od,
                    "til" => Tok::Til,
                    "or" => Tok::Or,
                    "tilend" => Tok::TilEnd,
                    "end" => Tok::End,
                    _ => Tok::Ident(text),
                };
                out.push(Spanned { tok, line });
            }
            other => return Err(ParseError::UnexpectedChar(other, line)),
        }
    }
    out.push(Spanned { tok: Tok::Eof, line });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_a_minimal_program() {
        let toks = lex("proc Main() do Rd(c) -> Wr(c) od").unwrap();
        assert_eq!(toks.first().unwrap().tok, Tok::Proc);
        assert_eq!(toks.last().unwrap().tok, Tok::Eof);
    }

    #[test]
    fn lexes_string_escapes() {
        let toks = lex("\"a\\nb\"").unwrap();
        assert_eq!(toks[0].tok, Tok::Str(vec![b'a', b'\n', b'b']));
    }

    #[test]
    fn tracks_line_numbers() {
        let toks = lex("skip\nfail").unwrap();
        assert_eq!(toks[0].line, 1);
        assert_eq!(toks[1].line, 2);
    }
}
