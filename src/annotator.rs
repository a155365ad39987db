//! Name resolution, signature checking and global partitioning (`spec.md`
//! §4.F "Annotation"), grounded on `parsetree.c`'s `annotate()`,
//! `pushprocformals()`, `annotatevar()`, `builtin()`, `annotateproccall()`
//! and `badsignature()`. Runs in three passes over the parsed `Program`:
//!
//! 1. Prepopulate the top-level scope with every global and procedure name,
//!    so forward references (a procedure calling one declared later) work.
//! 2. Walk every procedure body and every global initializer, resolving
//!    `VarRef`/`Call` placeholders and recording which raw global indices
//!    are ever written through an `out`/`inout` argument or an `ASSIGN`.
//! 3. Partition raw global indices into mutables (low, ascending) and
//!    immutables (high, descending) and rewrite every global `VarRef` to
//!    its final index.
//!
//! Errors are accumulated, not fail-fast, matching `spec.md` §4.F's
//! "Errors accumulate; annotation does not stop at the first one."

use crate::atom::AtomTable;
use crate::error::CompileError;
use crate::scope::{Entity, Scope};
use crate::tree::{
    lookup_builtin_name, Builtin, Call, CallTarget, Node, NodeKind, Program, Signature, TopDecl,
    VarRef,
};

struct Ctx<'a> {
    atoms: &'a mut AtomTable,
    scope: Scope,
    errors: Vec<CompileError>,
    mutant: Vec<bool>,
    sigs: Vec<Signature>,
}

/// Annotates `program` in place. `err_pure_on_input` threads through to
/// `Err`'s mark (`SPEC_FULL.md` §0.4's `-debug` bit 1).
pub fn annotate(
    program: &mut Program,
    atoms: &mut AtomTable,
    err_pure_on_input: bool,
) -> Result<(), Vec<CompileError>> {
    let _span = tracing::debug_span!("annotate").entered();

    let mut ctx = Ctx {
        atoms,
        scope: Scope::new(),
        errors: Vec::new(),
        mutant: Vec::new(),
        sigs: program.procs.iter().map(|p| p.signature()).collect(),
    };

    {
        let _pass = tracing::debug_span!("pass1_prepopulate").entered();
        pass1_prepopulate(program, &mut ctx);
    }

    let n_raw_globals = next_raw_global(program, &ctx);
    ctx.mutant = vec![false; n_raw_globals];

    {
        let _pass = tracing::debug_span!("pass2_annotate_bodies").entered();
        pass2_annotate_bodies(program, &mut ctx);
    }

    if program.main_index.is_none() {
        ctx.errors.push(CompileError::new("no procedure named 'Main'", 0));
    }

    if !ctx.errors.is_empty() {
        tracing::debug!(count = ctx.errors.len(), "annotation failed");
        return Err(ctx.errors);
    }

    {
        let _pass = tracing::debug_span!("pass3_partition_globals").entered();
        pass3_partition_globals(program, &mut ctx, n_raw_globals);
    }

    Ok(())
}

/// One past the highest raw global index assigned in pass 1 (index `0` is
/// never assigned to a user global, so this is also the raw-global count
/// including that unused slot).
fn next_raw_global(program: &Program, ctx: &Ctx) -> usize {
    let _ = ctx;
    let mut next = 1usize;
    for decl in &program.decls {
        if let TopDecl::Var(_) = decl {
            next += 1;
        }
    }
    next
}

fn pass1_prepopulate(program: &mut Program, ctx: &mut Ctx) {
    let mut next_raw = 1usize;
    for decl in &mut program.decls {
        match decl {
            TopDecl::Var(vd) => {
                if ctx.scope.lookup_innermost(vd.name).is_some() {
                    ctx.errors.push(CompileError::new(
                        format!("'{}' is already declared", ctx.atoms.name(vd.name)),
                        0,
                    ));
                } else {
                    ctx.scope.bind(vd.name, Entity::Global(next_raw));
                }
                vd.global_index = next_raw;
                next_raw += 1;
            }
            TopDecl::Proc(idx) => {
                let name = program.procs[*idx].name;
                if ctx.scope.lookup_innermost(name).is_some() {
                    ctx.errors.push(CompileError::new(
                        format!("'{}' is already declared", ctx.atoms.name(name)),
                        0,
                    ));
                } else {
                    ctx.scope.bind(name, Entity::Procedure(*idx));
                }
                if ctx.atoms.name(name) == "Main" {
                    program.main_index = Some(*idx);
                }
            }
        }
    }
}

fn pass2_annotate_bodies(program: &mut Program, ctx: &mut Ctx) {
    for decl in &mut program.decls {
        match decl {
            TopDecl::Var(vd) => {
                if let Some(init) = vd.init.as_mut() {
                    annotate_expr(init, ctx, false);
                }
            }
            TopDecl::Proc(idx) => {
                ctx.scope.save();
                let proc = &mut program.procs[*idx];
                let mut next_local = 0usize;
                for &name in &proc.out_names {
                    ctx.scope.bind(name, Entity::Local(next_local));
                    next_local += 1;
                }
                for &name in &proc.inout_names {
                    ctx.scope.bind(name, Entity::Local(next_local));
                    next_local += 1;
                }
                for &name in &proc.in_names {
                    ctx.scope.bind(name, Entity::Local(next_local));
                    next_local += 1;
                }
                annotate_cmd(&mut proc.body, ctx, &mut next_local);
                proc.frame_size = next_local;
                ctx.scope.restore();
            }
        }
    }
}

fn pass3_partition_globals(program: &mut Program, ctx: &mut Ctx, n_raw_globals: usize) {
    let n_real_globals = n_raw_globals - 1;
    let mut reindex = vec![0usize; n_raw_globals];
    let mut next_mut = 0usize;
    for raw in 1..n_raw_globals {
        if ctx.mutant[raw] {
            reindex[raw] = next_mut;
            next_mut += 1;
        }
    }
    let mut next_immut = n_real_globals;
    for raw in 1..n_raw_globals {
        if !ctx.mutant[raw] {
            next_immut -= 1;
            reindex[raw] = next_immut;
        }
    }

    program.n_globals = n_real_globals;
    program.n_mutables = next_mut;

    for decl in &mut program.decls {
        match decl {
            TopDecl::Var(vd) => {
                vd.global_index = reindex[vd.global_index];
                if let Some(init) = vd.init.as_mut() {
                    reindex_globals_in_node(init, &reindex);
                }
            }
            TopDecl::Proc(idx) => {
                reindex_globals_in_node(&mut program.procs[*idx].body, &reindex);
            }
        }
    }
}

fn reindex_var(v: &mut VarRef, reindex: &[usize]) {
    if v.is_global {
        let raw = v.index as usize;
        v.index = -1 - reindex[raw] as i32;
    }
}

fn reindex_globals_in_node(node: &mut Node, reindex: &[usize]) {
    match &mut node.kind {
        NodeKind::Skip | NodeKind::Fail | NodeKind::Abort | NodeKind::IntConst(_) | NodeKind::StrConst(_) => {}
        NodeKind::Seq(l, r) | NodeKind::Alt(l, r) | NodeKind::Til(l, r) | NodeKind::Guard(l, r) => {
            reindex_globals_in_node(l, reindex);
            reindex_globals_in_node(r, reindex);
        }
        NodeKind::Do(c) | NodeKind::Eval(c) => reindex_globals_in_node(c, reindex),
        NodeKind::Var(bindings, body) => {
            for b in bindings.iter_mut() {
                reindex_globals_in_node(&mut b.rhs, reindex);
            }
            reindex_globals_in_node(body, reindex);
        }
        NodeKind::Assign(lhs, rhs) => {
            reindex_var(lhs, reindex);
            reindex_globals_in_node(rhs, reindex);
        }
        NodeKind::Call(call) => {
            for v in call.outs.iter_mut().chain(call.inouts.iter_mut()) {
                reindex_var(v, reindex);
            }
            for e in call.ins.iter_mut() {
                reindex_globals_in_node(e, reindex);
            }
        }
        NodeKind::Binop(_, l, r) => {
            reindex_globals_in_node(l, reindex);
            reindex_globals_in_node(r, reindex);
        }
        NodeKind::Unop(_, e) => reindex_globals_in_node(e, reindex),
        NodeKind::VarUse(v) => reindex_var(v, reindex),
    }
}

fn annotate_var(ctx: &mut Ctx, v: &mut VarRef, line: u32, is_mutation_target: bool) {
    let name = match v.name {
        Some(n) => n,
        None => return,
    };
    match ctx.scope.lookup(name).copied() {
        Some(Entity::Local(i)) => {
            v.index = i as i32;
            v.is_global = false;
        }
        Some(Entity::Global(raw)) => {
            v.index = raw as i32;
            v.is_global = true;
            if is_mutation_target && raw != 0 {
                ctx.mutant[raw] = true;
            }
        }
        Some(Entity::Procedure(_)) => {
            ctx.errors
                .push(CompileError::new(format!("'{}' is a procedure, not a variable", ctx.atoms.name(name)), line));
        }
        None => {
            ctx.errors
                .push(CompileError::new(format!("undeclared identifier '{}'", ctx.atoms.name(name)), line));
        }
    }
}

fn annotate_cmd(node: &mut Node, ctx: &mut Ctx, next_local: &mut usize) {
    let line = node.line;
    match &mut node.kind {
        NodeKind::Skip | NodeKind::Fail | NodeKind::Abort => {}
        NodeKind::Seq(l, r) | NodeKind::Alt(l, r) | NodeKind::Til(l, r) => {
            annotate_cmd(l, ctx, next_local);
            annotate_cmd(r, ctx, next_local);
        }
        NodeKind::Guard(e, c) => {
            annotate_expr(e, ctx, false);
            annotate_cmd(c, ctx, next_local);
        }
        NodeKind::Do(c) => annotate_cmd(c, ctx, next_local),
        NodeKind::Eval(e) => annotate_expr(e, ctx, false),
        NodeKind::Var(bindings, body) => {
            for b in bindings.iter_mut() {
                annotate_expr(&mut b.rhs, ctx, false);
                let idx = *next_local;
                *next_local += 1;
                let name = b.lhs.name.expect("VAR binding always names its local");
                ctx.scope.bind(name, Entity::Local(idx));
                b.lhs.index = idx as i32;
                b.lhs.is_global = false;
            }
            annotate_cmd(body, ctx, next_local);
        }
        NodeKind::Assign(lhs, rhs) => {
            annotate_expr(rhs, ctx, false);
            annotate_var(ctx, lhs, line, true);
        }
        NodeKind::Call(call) => annotate_call(call, ctx, line, false),
        NodeKind::Binop(_, _, _)
        | NodeKind::Unop(_, _)
        | NodeKind::IntConst(_)
        | NodeKind::StrConst(_)
        | NodeKind::VarUse(_) => {
            // Never produced in command position by this front end's
            // grammar; nothing to resolve.
        }
    }
}

fn annotate_expr(node: &mut Node, ctx: &mut Ctx, allow_str: bool) {
    let line = node.line;
    match &mut node.kind {
        NodeKind::IntConst(_) => {}
        NodeKind::StrConst(_) => {
            if !allow_str {
                ctx.errors
                    .push(CompileError::new("illegal string constant outside a built-in call", line));
            }
        }
        NodeKind::VarUse(v) => annotate_var(ctx, v, line, false),
        NodeKind::Binop(_, l, r) => {
            annotate_expr(l, ctx, false);
            annotate_expr(r, ctx, false);
        }
        NodeKind::Unop(_, e) => annotate_expr(e, ctx, false),
        NodeKind::Call(call) => annotate_call(call, ctx, line, true),
        _ => {
            // Command nodes never appear in expression position in this
            // front end's grammar.
        }
    }
}

/// `true` if `call`'s argument-list shape matches `sig`. In expression
/// position the callee's single out (if any) is implicit -- the call site
/// supplies no `out` argument for it, and it becomes the expression's
/// delivered value instead.
fn sig_matches(call: &Call, sig: Signature, is_expr_form: bool) -> bool {
    if is_expr_form {
        call.outs.is_empty() && sig.outs <= 1 && call.inouts.len() == sig.inouts && call.ins.len() == sig.ins
    } else {
        call.outs.len() == sig.outs && call.inouts.len() == sig.inouts && call.ins.len() == sig.ins
    }
}

fn annotate_call(call: &mut Call, ctx: &mut Ctx, line: u32, is_expr_form: bool) {
    let name_str = ctx.atoms.name(call.name).to_string();

    let resolved: Option<(CallTarget, Signature)> = if let Some(entity) = ctx.scope.lookup(call.name).copied() {
        match entity {
            Entity::Procedure(idx) => {
                let sig = ctx.sigs[idx];
                if !sig_matches(call, sig, is_expr_form) {
                    ctx.errors.push(CompileError::new(
                        format!("wrong number of arguments to '{}'", name_str),
                        line,
                    ));
                }
                Some((CallTarget::User(idx), sig))
            }
            Entity::Local(_) | Entity::Global(_) => {
                ctx.errors
                    .push(CompileError::new(format!("'{}' is not a procedure", name_str), line));
                None
            }
        }
    } else if let Some(b) = lookup_builtin_name(&name_str) {
        let sig = crate::tree::builtin_signature(b);
        if sig_matches(call, sig, is_expr_form) {
            Some((CallTarget::Builtin(b), sig))
        } else if b == Builtin::RdX {
            let rd0_sig = crate::tree::builtin_signature(Builtin::Rd0);
            if sig_matches(call, rd0_sig, is_expr_form) {
                Some((CallTarget::Builtin(Builtin::Rd0), rd0_sig))
            } else {
                ctx.errors
                    .push(CompileError::new("wrong number of arguments to 'Rd'", line));
                Some((CallTarget::Builtin(b), sig))
            }
        } else {
            ctx.errors.push(CompileError::new(
                format!("wrong number of arguments to '{}'", name_str),
                line,
            ));
            Some((CallTarget::Builtin(b), sig))
        }
    } else {
        ctx.errors
            .push(CompileError::new(format!("undeclared procedure '{}'", name_str), line));
        None
    };

    let target = match resolved {
        Some((t, _)) => t,
        None => CallTarget::Unresolved,
    };
    let is_builtin = matches!(target, CallTarget::Builtin(_));
    call.target = target;

    for v in call.outs.iter_mut().chain(call.inouts.iter_mut()) {
        annotate_var(ctx, v, line, true);
    }
    for e in call.ins.iter_mut() {
        annotate_expr(e, ctx, is_builtin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn annotate_src(src: &str) -> Result<Program, Vec<CompileError>> {
        let mut atoms = AtomTable::new();
        let mut prog = parse_program(src, &mut atoms).expect("parse");
        annotate(&mut prog, &mut atoms, false)?;
        Ok(prog)
    }

    #[test]
    fn resolves_echo_program() {
        let prog = annotate_src("proc Main() do var c = Rd() in Wr(c) end od").unwrap();
        assert!(prog.main_index.is_some());
    }

    #[test]
    fn undeclared_identifier_is_an_error() {
        let err = annotate_src("proc Main() skip ; x := 1").unwrap_err();
        assert!(err.iter().any(|e| e.message.contains("undeclared identifier")));
    }

    #[test]
    fn missing_main_is_an_error() {
        let err = annotate_src("proc Helper() skip").unwrap_err();
        assert!(err.iter().any(|e| e.message.contains("Main")));
    }

    #[test]
    fn globals_partition_mutable_before_immutable() {
        let prog =
            annotate_src("var a = 1, b = 2; proc Main() a := a + 1 ; Wr(b)").unwrap();
        assert_eq!(prog.n_globals, 2);
        assert_eq!(prog.n_mutables, 1);
    }

    #[test]
    fn wrong_builtin_arity_is_an_error() {
        let err = annotate_src("proc Main() Wr()").unwrap_err();
        assert!(err.iter().any(|e| e.message.contains("wrong number of arguments")));
    }
}
