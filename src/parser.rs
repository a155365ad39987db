//! Minimal recursive-descent parser for the internal front end (see
//! `SPEC_FULL.md` §0.1). Produces exactly the `tree::Node`/`tree::Program`
//! shapes the annotator consumes; it does no name resolution itself --
//! every `VarRef`/`CallTarget` it emits is a placeholder for the annotator
//! to fill in, matching `spec.md` §4.F's stated input ("the list of
//! top-level declarations").

use crate::atom::AtomTable;
use crate::error::ParseError;
use crate::lexer::{lex, Tok};
use crate::tree::{
    BinOp, Binding, Call, CallTarget, Node, NodeKind, Program, TopDecl, UnOp, VarDecl, VarRef,
};

struct Parser<'a> {
    toks: Vec<crate::lexer::Spanned>,
    pos: usize,
    atoms: &'a mut AtomTable,
}

pub fn parse_program(src: &str, atoms: &mut AtomTable) -> Result<Program, ParseError> {
    let toks = lex(src)?;
    let mut p = Parser { toks, pos: 0, atoms };
    let mut decls = Vec::new();
    let mut procs = Vec::new();
    while p.peek() != &Tok::Eof {
        match p.peek() {
            Tok::Var => {
                decls.extend(p.parse_vardecl()?);
            }
            Tok::Proc => {
                let idx = procs.len();
                let proc = p.parse_procdecl()?;
                procs.push(proc);
                decls.push(TopDecl::Proc(idx));
            }
            _ => return Err(ParseError::UnexpectedToken(format!("{:?}", p.peek()), p.line())),
        }
    }
    Ok(Program {
        decls,
        procs,
        n_globals: 0,
        n_mutables: 0,
        main_index: None,
    })
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Tok {
        &self.toks[self.pos].tok
    }

    fn line(&self) -> u32 {
        self.toks[self.pos].line
    }

    fn advance(&mut self) -> Tok {
        let tok = self.toks[self.pos].tok.clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: &Tok) -> Result<(), ParseError> {
        if self.peek() == want {
            self.advance();
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken(format!("{:?}", self.peek()), self.line()))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.advance() {
            Tok::Ident(s) => Ok(s),
            _ => Err(ParseError::ExpectedIdent(self.line())),
        }
    }

    fn var_placeholder(&mut self, name: &str) -> VarRef {
        let atom = self.atoms.intern(name);
        VarRef {
            name: Some(atom),
            index: 0,
            is_global: false,
        }
    }

    fn parse_vardecl(&mut self) -> Result<Vec<TopDecl>, ParseError> {
        self.expect(&Tok::Var)?;
        let mut out = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let atom = self.atoms.intern(&name);
            let init = if self.peek() == &Tok::Eq {
                self.advance();
                Some(self.parse_expr()?)
            } else {
                None
            };
            out.push(TopDecl::Var(VarDecl {
                name: atom,
                init,
                global_index: 0,
            }));
            if self.peek() == &Tok::Comma {
                self.advance();
                continue;
            }
            break;
        }
        self.expect(&Tok::Semi)?;
        Ok(out)
    }

    fn parse_procdecl(&mut self) -> Result<crate::tree::ProcDecl, ParseError> {
        self.expect(&Tok::Proc)?;
        let name = self.expect_ident()?;
        let name = self.atoms.intern(&name);
        self.expect(&Tok::LParen)?;
        let (outs, inouts, ins) = self.parse_formals()?;
        self.expect(&Tok::RParen)?;
        let body = self.parse_cmd()?;
        Ok(crate::tree::ProcDecl {
            name,
            out_names: outs,
            inout_names: inouts,
            in_names: ins,
            frame_size: 0,
            body,
            mark: crate::tree::Mark::bottom(),
        })
    }

    fn parse_formals(
        &mut self,
    ) -> Result<(Vec<crate::atom::Atom>, Vec<crate::atom::Atom>, Vec<crate::atom::Atom>), ParseError>
    {
        let mut outs = Vec::new();
        let mut inouts = Vec::new();
        let mut ins = Vec::new();
        if self.peek() == &Tok::RParen {
            return Ok((outs, inouts, ins));
        }
        loop {
            let bucket = match self.peek() {
                Tok::Out => {
                    self.advance();
                    0
                }
                Tok::Inout => {
                    self.advance();
                    1
                }
                Tok::In => {
                    self.advance();
                    2
                }
                _ => 2,
            };
            let name = self.expect_ident()?;
            let atom = self.atoms.intern(&name);
            match bucket {
                0 => outs.push(atom),
                1 => inouts.push(atom),
                _ => ins.push(atom),
            }
            if self.peek() == &Tok::Comma {
                self.advance();
                continue;
            }
            break;
        }
        Ok((outs, inouts, ins))
    }

    fn parse_cmd(&mut self) -> Result<Node, ParseError> {
        self.parse_alt()
    }

    fn parse_alt(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_seq()?;
        while self.peek() == &Tok::Bar {
            let line = self.line();
            self.advance();
            let right = self.parse_seq()?;
            left = Node::new(NodeKind::Alt(Box::new(left), Box::new(right)), line);
        }
        Ok(left)
    }

    fn parse_seq(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_guard()?;
        while self.peek() == &Tok::Semi {
            let line = self.line();
            self.advance();
            let right = self.parse_guard()?;
            left = Node::new(NodeKind::Seq(Box::new(left), Box::new(right)), line);
        }
        Ok(left)
    }

    /// `expr -> cmd` is ambiguous with ident-led atomcmds at one token of
    /// lookahead (both can start with an identifier), so this speculatively
    /// parses an expression and backtracks to `atomcmd` if no `->` follows.
    fn parse_guard(&mut self) -> Result<Node, ParseError> {
        let save = self.pos;
        if let Ok(expr) = self.parse_expr() {
            if self.peek() == &Tok::Arrow {
                let line = self.line();
                self.advance();
                let cmd = self.parse_guard_body()?;
                return Ok(Node::new(NodeKind::Guard(Box::new(expr), Box::new(cmd)), line));
            }
        }
        self.pos = save;
        self.parse_atomcmd()
    }

    fn parse_guard_body(&mut self) -> Result<Node, ParseError> {
        self.parse_guard()
    }

    fn parse_atomcmd(&mut self) -> Result<Node, ParseError> {
        let line = self.line();
        match self.peek().clone() {
            Tok::Skip => {
                self.advance();
                Ok(Node::new(NodeKind::Skip, line))
            }
            Tok::Fail => {
                self.advance();
                Ok(Node::new(NodeKind::Fail, line))
            }
            Tok::Abort => {
                self.advance();
                Ok(Node::new(NodeKind::Abort, line))
            }
            Tok::Do => {
                self.advance();
                let body = self.parse_cmd()?;
                self.expect(&Tok::Od)?;
                Ok(Node::new(NodeKind::Do(Box::new(body)), line))
            }
            Tok::Til => {
                self.advance();
                let left = self.parse_cmd()?;
                self.expect(&Tok::Or)?;
                let right = self.parse_cmd()?;
                self.expect(&Tok::TilEnd)?;
                Ok(Node::new(NodeKind::Til(Box::new(left), Box::new(right)), line))
            }
            Tok::Var => {
                self.advance();
                let mut bindings = Vec::new();
                loop {
                    let name = self.expect_ident()?;
                    self.expect(&Tok::Eq)?;
                    let rhs = self.parse_expr()?;
                    bindings.push(Binding {
                        lhs: self.var_placeholder(&name),
                        rhs,
                    });
                    if self.peek() == &Tok::Comma {
                        self.advance();
                        continue;
                    }
                    break;
                }
                self.expect(&Tok::In)?;
                let body = self.parse_cmd()?;
                self.expect(&Tok::End)?;
                Ok(Node::new(NodeKind::Var(bindings, Box::new(body)), line))
            }
            Tok::LParen => {
                self.advance();
                let inner = self.parse_cmd()?;
                self.expect(&Tok::RParen)?;
                Ok(inner)
            }
            Tok::Ident(name) => {
                self.advance();
                if self.peek() == &Tok::Assign {
                    self.advance();
                    let rhs = self.parse_expr()?;
                    Ok(Node::new(
                        NodeKind::Assign(self.var_placeholder(&name), Box::new(rhs)),
                        line,
                    ))
                } else if self.peek() == &Tok::LParen {
                    let call = self.parse_call_args(name)?;
                    Ok(Node::new(NodeKind::Call(call), line))
                } else {
                    Err(ParseError::UnexpectedToken(format!("{:?}", self.peek()), line))
                }
            }
            other => Err(ParseError::UnexpectedToken(format!("{:?}", other), line)),
        }
    }

    fn parse_call_args(&mut self, name: String) -> Result<Call, ParseError> {
        self.expect(&Tok::LParen)?;
        let atom = self.atoms.intern(&name);
        let mut outs = Vec::new();
        let mut inouts = Vec::new();
        let mut ins = Vec::new();
        if self.peek() != &Tok::RParen {
            loop {
                match self.peek() {
                    Tok::Out => {
                        self.advance();
                        let n = self.expect_ident()?;
                        outs.push(self.var_placeholder(&n));
                    }
                    Tok::Inout => {
                        self.advance();
                        let n = self.expect_ident()?;
                        inouts.push(self.var_placeholder(&n));
                    }
                    _ => {
                        ins.push(self.parse_expr()?);
                    }
                }
                if self.peek() == &Tok::Comma {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect(&Tok::RParen)?;
        Ok(Call {
            name: atom,
            outs,
            inouts,
            ins,
            target: CallTarget::Unresolved,
        })
    }

    fn parse_expr(&mut self) -> Result<Node, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_and()?;
        while self.peek() == &Tok::OrOr {
            let line = self.line();
            self.advance();
            let right = self.parse_and()?;
            left = Node::new(NodeKind::Binop(BinOp::Or, Box::new(left), Box::new(right)), line);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_cmp()?;
        while self.peek() == &Tok::AndAnd {
            let line = self.line();
            self.advance();
            let right = self.parse_cmp()?;
            left = Node::new(NodeKind::Binop(BinOp::And, Box::new(left), Box::new(right)), line);
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> Result<Node, ParseError> {
        let left = self.parse_add()?;
        let op = match self.peek() {
            Tok::Eq => BinOp::Eq,
            Tok::Neq => BinOp::Neq,
            Tok::Lt => BinOp::Lt,
            Tok::Le => BinOp::Le,
            Tok::Gt => BinOp::Gt,
            Tok::Ge => BinOp::Ge,
            _ => return Ok(left),
        };
        let line = self.line();
        self.advance();
        let right = self.parse_add()?;
        Ok(Node::new(NodeKind::Binop(op, Box::new(left), Box::new(right)), line))
    }

    fn parse_add(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let right = self.parse_mul()?;
            left = Node::new(NodeKind::Binop(op, Box::new(left), Box::new(right)), line);
        }
        Ok(left)
    }

    fn parse_mul(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::Percent => BinOp::Mod,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let right = self.parse_unary()?;
            left = Node::new(NodeKind::Binop(op, Box::new(left), Box::new(right)), line);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Node, ParseError> {
        let line = self.line();
        match self.peek() {
            Tok::Minus => {
                self.advance();
                let inner = self.parse_unary()?;
                Ok(Node::new(NodeKind::Unop(UnOp::Neg, Box::new(inner)), line))
            }
            Tok::Bang => {
                self.advance();
                let inner = self.parse_unary()?;
                Ok(Node::new(NodeKind::Unop(UnOp::Not, Box::new(inner)), line))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Node, ParseError> {
        let line = self.line();
        match self.advance() {
            Tok::Int(v) => Ok(Node::new(NodeKind::IntConst(v), line)),
            Tok::Str(bytes) => Ok(Node::new(NodeKind::StrConst(bytes), line)),
            Tok::Ident(name) => {
                if self.peek() == &Tok::LParen {
                    let call = self.parse_call_args(name)?;
                    Ok(Node::new(NodeKind::Call(call), line))
                } else {
                    Ok(Node::new(NodeKind::VarUse(self.var_placeholder(&name)), line))
                }
            }
            Tok::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&Tok::RParen)?;
                Ok(inner)
            }
            other => Err(ParseError::UnexpectedToken(format!("{:?}", other), line)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_echo_program() {
        let mut atoms = AtomTable::new();
        let src = "proc Main() do Rd(c) -> Wr(c) od";
        let prog = parse_program(src, &mut atoms).unwrap();
        assert_eq!(prog.procs.len(), 1);
        assert_eq!(atoms.name(prog.procs[0].name), "Main");
    }

    #[test]
    fn parses_alternation_and_guard() {
        let mut atoms = AtomTable::new();
        let src = "proc Main() (Wr(\"hello\") ; fail) | skip";
        let prog = parse_program(src, &mut atoms).unwrap();
        match &prog.procs[0].body.kind {
            crate::tree::NodeKind::Alt(_, _) => {}
            other => panic!("expected Alt at top, got {:?}", other),
        }
    }

    #[test]
    fn parses_vardecl_with_initializer() {
        let mut atoms = AtomTable::new();
        let src = "var x = 1, y; proc Main() skip";
        let prog = parse_program(src, &mut atoms).unwrap();
        assert_eq!(prog.decls.len(), 3);
    }
}
