//! Fixed-point effect/safety/predictive-dispatch analysis (`spec.md` §4.G),
//! grounded on `parsetree.c`'s `markp()`/`markproc()`/`dorewrite()`. Fills in
//! every node's `Mark` (and `ProcDecl::mark`) in place.
//!
//! The outer loop is a textbook monotone fixed point over the call graph:
//! each round recomputes every procedure whose mark is not yet `stable`
//! from a snapshot of all procedures' marks taken at the start of the
//! round, freezing a procedure once its body comes out stable. A node's own
//! `stable` bit folds in the stability of every user-procedure call it
//! contains, so a procedure's mark is only frozen once every procedure it
//! (transitively) calls has also converged.

use crate::tree::{self, marks, Call, CallTarget, Mark, Node, NodeKind, Program, Signature, TopDecl};

pub fn mark_program(program: &mut Program, err_pure_on_input: bool) {
    let _span = tracing::debug_span!("mark_program").entered();
    let sigs: Vec<Signature> = program.procs.iter().map(|p| p.signature()).collect();

    let mut round = 0u32;
    loop {
        round += 1;
        let _round_span = tracing::trace_span!("fixed_point_round", round).entered();
        let snapshot: Vec<Mark> = program.procs.iter().map(|p| p.mark).collect();
        let mut changed = false;
        for i in 0..program.procs.len() {
            if program.procs[i].mark.stable {
                continue;
            }
            let new_mark = compute_mark(&mut program.procs[i].body, &snapshot, &sigs, err_pure_on_input);
            program.procs[i].mark = new_mark;
            if new_mark != snapshot[i] {
                changed = true;
            }
        }
        if !changed {
            tracing::debug!(rounds = round, "marker reached its fixed point");
            break;
        }
    }

    let final_marks: Vec<Mark> = program.procs.iter().map(|p| p.mark).collect();
    for decl in &mut program.decls {
        if let TopDecl::Var(vd) = decl {
            if let Some(init) = vd.init.as_mut() {
                compute_mark(init, &final_marks, &sigs, err_pure_on_input);
            }
        }
    }
}

/// `a` then `b`, sequentially: `SEQ`'s combination rule, reused verbatim by
/// `GUARD`, `BINOP`, `UNOP`-chained folds, `ASSIGN`'s rhs, and `VAR`'s
/// binding fold.
fn seq_combine(a: Mark, b: Mark) -> Mark {
    let mut inputmask = a.inputmask;
    if a.pure & marks::I != 0 {
        inputmask &= b.inputmask;
    }
    let mut inputvar = a.inputvar;
    if inputvar.is_none() && (a.pure & (marks::I | marks::L | marks::G)) == (marks::I | marks::L | marks::G) {
        inputvar = b.inputvar;
    }
    Mark {
        total: a.total & b.total,
        pure: a.pure & b.pure,
        safe: (a.safe & b.total) | (a.pure & b.safe),
        stable: a.stable && b.stable,
        inputvar,
        inputmask,
    }
}

/// `ALT`/`TIL`'s combination rule.
fn alt_combine(a: Mark, b: Mark) -> Mark {
    Mark {
        total: a.total | b.total,
        pure: a.pure & (a.total | b.pure),
        safe: a.total | b.safe,
        stable: a.stable && b.stable,
        inputvar: if a.inputvar == b.inputvar { a.inputvar } else { None },
        inputmask: a.inputmask | b.inputmask,
    }
}

fn total_pure_safe_stable() -> Mark {
    let mut m = marks::total_pure_safe();
    m.stable = true;
    m
}

fn leaf_mark() -> Mark {
    Mark {
        total: marks::ALL,
        pure: marks::ALL,
        safe: marks::ALL,
        stable: true,
        inputvar: None,
        inputmask: marks::IMASK_ALL,
    }
}

fn fail_mark() -> Mark {
    Mark {
        total: 0,
        pure: marks::ALL,
        safe: marks::ALL,
        stable: true,
        inputvar: None,
        inputmask: marks::IMASK_NONE,
    }
}

/// Recomputes `node`'s mark (and every descendant's) from scratch, applying
/// the `DO` dead-branch tail rewrite opportunistically along the way.
/// `proc_marks`/`proc_sigs` are indexed by `Program::procs` position.
fn compute_mark(node: &mut Node, proc_marks: &[Mark], proc_sigs: &[Signature], err_pure_on_input: bool) -> Mark {
    let m = match &mut node.kind {
        NodeKind::Skip | NodeKind::Abort | NodeKind::IntConst(_) | NodeKind::StrConst(_) => leaf_mark(),
        NodeKind::VarUse(_) => leaf_mark(),
        NodeKind::Fail => fail_mark(),
        NodeKind::Seq(l, r) => {
            let a = compute_mark(l, proc_marks, proc_sigs, err_pure_on_input);
            let b = compute_mark(r, proc_marks, proc_sigs, err_pure_on_input);
            seq_combine(a, b)
        }
        NodeKind::Guard(e, c) => {
            let a = compute_mark(e, proc_marks, proc_sigs, err_pure_on_input);
            let b = compute_mark(c, proc_marks, proc_sigs, err_pure_on_input);
            let mut m = seq_combine(a, b);
            m.total = 0;
            m.pure = a.pure & b.pure;
            m.safe = a.pure & b.safe;
            m
        }
        NodeKind::Alt(l, r) => {
            let a = compute_mark(l, proc_marks, proc_sigs, err_pure_on_input);
            let b = compute_mark(r, proc_marks, proc_sigs, err_pure_on_input);
            alt_combine(a, b)
        }
        NodeKind::Til(l, r) => {
            let a = compute_mark(l, proc_marks, proc_sigs, err_pure_on_input);
            let b = compute_mark(r, proc_marks, proc_sigs, err_pure_on_input);
            alt_combine(a, b)
        }
        NodeKind::Do(c) => {
            let cm = compute_mark(c, proc_marks, proc_sigs, err_pure_on_input);
            let cm = if cm.stable
                && cm.safe != marks::ALL
                && matches!(c.kind, NodeKind::Alt(_, _))
                && !node.do_rewritten
            {
                node.do_rewritten = true;
                append_fail_tail(c);
                compute_mark(c, proc_marks, proc_sigs, err_pure_on_input)
            } else {
                cm
            };
            Mark {
                total: marks::ALL,
                pure: cm.pure | cm.total,
                safe: marks::ALL,
                stable: cm.stable,
                inputvar: None,
                inputmask: marks::IMASK_ALL,
            }
        }
        NodeKind::Eval(e) => compute_mark(e, proc_marks, proc_sigs, err_pure_on_input),
        NodeKind::Var(bindings, body) => {
            let mut acc = total_pure_safe_stable();
            for b in bindings.iter_mut() {
                let rhs_mark = compute_mark(&mut b.rhs, proc_marks, proc_sigs, err_pure_on_input);
                let mut bind_mark = rhs_mark;
                bind_mark.pure &= !marks::L;
                acc = seq_combine(acc, bind_mark);
            }
            let body_mark = compute_mark(body, proc_marks, proc_sigs, err_pure_on_input);
            seq_combine(acc, body_mark)
        }
        NodeKind::Assign(lhs, rhs) => {
            let rhs_mark = compute_mark(rhs, proc_marks, proc_sigs, err_pure_on_input);
            let mut pure = rhs_mark.pure;
            if lhs.is_global {
                pure &= !marks::G;
            } else {
                pure &= !marks::L;
            }
            Mark {
                total: rhs_mark.total,
                pure,
                safe: rhs_mark.safe,
                stable: rhs_mark.stable,
                inputvar: rhs_mark.inputvar,
                inputmask: rhs_mark.inputmask,
            }
        }
        NodeKind::Binop(op, l, r) => {
            let a = compute_mark(l, proc_marks, proc_sigs, err_pure_on_input);
            let b = compute_mark(r, proc_marks, proc_sigs, err_pure_on_input);
            let _ = op; // every binop (logical short-circuit or arithmetic) uses SEQ's rule
            seq_combine(a, b)
        }
        NodeKind::Unop(_, e) => compute_mark(e, proc_marks, proc_sigs, err_pure_on_input),
        NodeKind::Call(call) => mark_call(call, proc_marks, proc_sigs, err_pure_on_input),
    };
    node.mark = m;
    m
}

fn mark_call(call: &mut Call, proc_marks: &[Mark], proc_sigs: &[Signature], err_pure_on_input: bool) -> Mark {
    let mut acc = total_pure_safe_stable();
    for e in call.ins.iter_mut() {
        let m = compute_mark(e, proc_marks, proc_sigs, err_pure_on_input);
        acc = seq_combine(acc, m);
    }

    let (callee_sig, mut callee_mark) = match &call.target {
        CallTarget::Builtin(b) => (tree::builtin_signature(*b), tree::builtin_mark(*b, err_pure_on_input)),
        CallTarget::User(idx) => {
            let mut m = proc_marks[*idx];
            m.safe |= marks::L;
            m.pure |= marks::L;
            (proc_sigs[*idx], m)
        }
        CallTarget::Unresolved => (Signature { outs: 0, inouts: 0, ins: 0 }, Mark::bottom()),
    };
    let callee_stable = match &call.target {
        CallTarget::User(idx) => proc_marks[*idx].stable,
        CallTarget::Builtin(_) => true,
        CallTarget::Unresolved => false,
    };
    callee_mark.stable = callee_stable;

    let mut combined = seq_combine(acc, callee_mark);

    for v in call.outs.iter().chain(call.inouts.iter()) {
        if v.is_global {
            combined.pure &= !marks::G;
        } else {
            combined.pure &= !marks::L;
        }
    }

    // The callee's inputvar/inputmask, once translated into the caller's
    // frame of reference, is combined with the already-evaluated in-args
    // (`acc`) by the same SEQ rule every other two-part construct uses
    // (`seq_combine`) -- it must not unconditionally overwrite `acc`'s
    // own prediction, or a call whose earlier in-argument already reads
    // input (so `acc` is no longer I-pure, or already commits to its own
    // `inputvar`) would have that prediction silently discarded in favor
    // of a later parameter's narrower one (`parsetree.c`'s `markp()` CALL
    // case gates this on `acc.inputvar == NONE && PURE(acc, I|L|G)`).
    let (callee_inputvar, callee_inputmask) = translate_call_inputvar(callee_sig, callee_mark, call);
    let mut inputmask = acc.inputmask;
    if acc.pure & marks::I != 0 {
        inputmask &= callee_inputmask;
    }
    let mut inputvar = acc.inputvar;
    if inputvar.is_none() && (acc.pure & (marks::I | marks::L | marks::G)) == (marks::I | marks::L | marks::G) {
        inputvar = callee_inputvar;
    }
    combined.inputvar = inputvar;
    combined.inputmask = inputmask;
    combined
}

/// Translates the callee's `inputvar` (a formal-parameter index, 0-based
/// across out, then inout, then in formals) into the caller's frame of
/// reference, per `spec.md` §4.G's `CALL` row.
fn translate_call_inputvar(sig: Signature, callee_mark: Mark, call: &Call) -> (Option<i32>, u32) {
    let k = match callee_mark.inputvar {
        None => return (None, callee_mark.inputmask),
        Some(k) => k as usize,
    };
    if k < sig.outs {
        return (None, marks::IMASK_ALL);
    }
    if k < sig.outs + sig.inouts {
        let idx = k - sig.outs;
        return (Some(call.inouts[idx].index), callee_mark.inputmask);
    }
    let idx = k - sig.outs - sig.inouts;
    match &call.ins[idx].kind {
        NodeKind::VarUse(v) => (Some(v.index), callee_mark.inputmask),
        NodeKind::IntConst(n) => (None, marks::add(marks::IMASK_NONE, *n)),
        NodeKind::StrConst(bytes) if !bytes.is_empty() => (None, marks::add(marks::IMASK_NONE, bytes[0] as i32)),
        _ => (None, marks::IMASK_ALL),
    }
}

/// Descends the `ALT` right spine to its final (non-`ALT`) tail and wraps it
/// as `ALT(tail, FAIL)`, in place.
fn append_fail_tail(node: &mut Node) {
    if let NodeKind::Alt(_, r) = &mut node.kind {
        append_fail_tail(r);
        return;
    }
    let line = node.line;
    let placeholder = Node::new(NodeKind::Skip, line);
    let old = std::mem::replace(node, placeholder);
    *node = Node::new(NodeKind::Alt(Box::new(old), Box::new(Node::new(NodeKind::Fail, line))), line);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotator::annotate;
    use crate::atom::AtomTable;
    use crate::parser::parse_program;

    fn mark_src(src: &str) -> Program {
        let mut atoms = AtomTable::new();
        let mut prog = parse_program(src, &mut atoms).expect("parse");
        annotate(&mut prog, &mut atoms, false).expect("annotate");
        mark_program(&mut prog, false);
        prog
    }

    #[test]
    fn skip_is_total_pure_safe() {
        let prog = mark_src("proc Main() skip");
        let m = prog.main().body.mark;
        assert_eq!(m.total, marks::ALL);
        assert_eq!(m.pure, marks::ALL);
        assert_eq!(m.safe, marks::ALL);
        assert!(m.stable);
    }

    #[test]
    fn fail_is_never_total() {
        let prog = mark_src("proc Main() fail");
        assert_eq!(prog.main().body.mark.total, 0);
    }

    #[test]
    fn alt_of_two_totals_is_total() {
        let prog = mark_src("proc Main() skip | fail");
        assert_eq!(prog.main().body.mark.total, marks::ALL);
    }

    #[test]
    fn do_of_safe_body_converges_stable() {
        let prog = mark_src("proc Main() do skip | fail od");
        let do_mark = prog.main().body.mark;
        assert!(do_mark.stable);
        assert_eq!(do_mark.safe, marks::ALL);
    }

    #[test]
    fn calling_a_converged_procedure_stabilizes() {
        let prog = mark_src("proc Helper() skip\nproc Main() Helper()");
        assert!(prog.procs.iter().all(|p| p.mark.stable));
    }

    /// An unconditionally self-recursive procedure never gets proven total
    /// by pure syntactic induction -- the fixed point correctly settles at
    /// `stable == false` forever rather than looping. This asserts the
    /// *outer loop terminates*, not that the analysis is complete.
    #[test]
    fn unconditional_self_recursion_reaches_a_non_stable_fixed_point() {
        let prog = mark_src("proc Loop() skip ; Loop()\nproc Main() skip");
        assert!(!prog.procs[0].mark.stable);
        assert!(prog.procs[1].mark.stable);
    }

    /// `P` predicts on its second in-parameter (it checks out that parameter
    /// with the builtin `Rd`), so a call site binding that parameter to a
    /// string constant would, read in isolation, narrow the call's
    /// `inputmask` to that constant's first byte. But the call's first
    /// argument is `Rd()`, which already consumes a byte of unpredictable
    /// input and so is not I-pure: the call's folded in-argument mark must
    /// win, leaving the whole call's `inputmask` unnarrowed.
    #[test]
    fn an_earlier_impure_in_argument_suppresses_a_later_arguments_prediction() {
        let prog = mark_src("proc P(in a, in b) Rd(b)\nproc Main() P(Rd(), \"x\")");
        assert_eq!(prog.procs[0].mark.inputvar, Some(1));
        let call_mark = prog.main().body.mark;
        assert_eq!(call_mark.inputmask, marks::IMASK_ALL);
        assert_eq!(call_mark.inputvar, None);
    }
}
