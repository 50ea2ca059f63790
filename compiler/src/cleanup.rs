// cleanup.rs — Local simplifications run between inlining rounds
//
// Per method, to a local fixed point:
//   - constant and copy propagation over single-definition locals;
//   - casts to a local's own type become copies;
//   - arithmetic and branches on literals fold;
//   - reads of immutable string fields become the string;
//   - unreachable statements, jumps to the next statement, unused labels,
//     no-ops and dead copies go away.
// Before that, `attributeChanged` calls on generated classes are inlined at
// their call sites so the identity tests inside them can fold.
//
// Preconditions: none beyond a well-formed program.
// Postconditions: every branch target still names a label in the body.
// Failure modes: none.
// Side effects: rewrites bodies in place and renumbers their locals.

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::context::PipelineContext;
use crate::dataflow;
use crate::error::Result;
use crate::id::{Label, LocalId, MethodId, StmtId};
use crate::ir::{
    BinOp, Body, Constant, InvokeKind, Operand, Place, Program, Rvalue, StmtKind, Type, UnOp,
};
use crate::token::Token;

pub fn run(ctx: &mut PipelineContext) -> Result<usize> {
    let mut total = inline_notifications(ctx);
    for method in ctx.program.all_live_methods() {
        let mut body = ctx.take_body(method);
        total += simplify(&ctx.program, &mut body);
        ctx.put_body(method, body);
    }
    if total > 0 {
        tracing::debug!(changes = total, "cleanup");
    }
    Ok(total)
}

/// Simplify one body until nothing changes. Returns the number of edits.
pub fn simplify(program: &Program, body: &mut Body) -> usize {
    let mut total = 0;
    for _ in 0..body.stmts.len() + 8 {
        let n = fold_string_fields(program, body)
            + propagate_constants(body)
            + propagate_copies(body)
            + fold_casts(body)
            + fold_arithmetic(body)
            + fold_branches(body)
            + remove_unreachable(body)
            + remove_redundant_jumps(body)
            + remove_unused_labels(body)
            + remove_dead_copies(body)
            + remove_nops(body);
        if n == 0 {
            break;
        }
        total += n;
    }
    if body.compact_locals() {
        total += 1;
    }
    total
}

// ── Propagation ─────────────────────────────────────────────────────────────

fn fold_string_fields(program: &Program, body: &mut Body) -> usize {
    let mut n = 0;
    for stmt in &mut body.stmts {
        let StmtKind::Assign { value, .. } = &mut stmt.kind else {
            continue;
        };
        let Rvalue::Field { field, .. } = value else { continue };
        let f = program.field(*field);
        if let (true, Type::String, Some(Token::String(s))) = (f.is_final, &f.ty, &f.initial) {
            *value = Rvalue::Use(Operand::Const(Constant::Str(s.clone())));
            n += 1;
        }
    }
    n
}

fn propagate_constants(body: &mut Body) -> usize {
    let consts: HashMap<LocalId, Constant> = (0..body.locals.len())
        .map(|i| LocalId(i as u32))
        .filter_map(|l| match body.single_def(l)?.kind.rvalue()? {
            Rvalue::Use(Operand::Const(c)) => Some((l, c.clone())),
            _ => None,
        })
        .collect();
    if consts.is_empty() {
        return 0;
    }
    let mut n = 0;
    for stmt in &mut body.stmts {
        stmt.kind.for_each_operand_mut(|op| {
            if let Operand::Local(l) = op {
                if let Some(c) = consts.get(l) {
                    *op = Operand::Const(c.clone());
                    n += 1;
                }
            }
        });
    }
    n
}

/// True when some branch jumps backwards.
fn has_back_edges(body: &Body) -> bool {
    body.stmts.iter().enumerate().any(|(i, s)| {
        s.kind
            .branch_target()
            .and_then(|l| body.label_position(l))
            .is_some_and(|target| target <= i)
    })
}

/// Replace `a` by `b` after `a = b` when both have one definition. Only in
/// loop-free bodies, where a single definition reaches every later use.
fn propagate_copies(body: &mut Body) -> usize {
    if has_back_edges(body) {
        return 0;
    }
    let mut n = 0;
    loop {
        let candidate = (0..body.locals.len()).map(|i| LocalId(i as u32)).find_map(|a| {
            let def = body.single_def(a)?;
            let Some(Rvalue::Use(Operand::Local(b))) = def.kind.rvalue() else {
                return None;
            };
            let stable = if body.is_param(*b) {
                body.defs_of(*b).is_empty()
            } else {
                body.single_def(*b).is_some()
            };
            (stable && *b != a).then_some((def.id, a, *b))
        });
        let Some((def, a, b)) = candidate else { break };
        let rename = |l: LocalId| if l == a { b } else { l };
        for stmt in body.stmts.iter_mut().filter(|s| s.id != def) {
            stmt.kind.rename_locals(&rename);
        }
        body.remove(def);
        n += 1;
        if n > body.locals.len() {
            break;
        }
    }
    n
}

fn fold_casts(body: &mut Body) -> usize {
    let mut n = 0;
    let types: Vec<Type> = body.locals.iter().map(|l| l.ty.clone()).collect();
    for stmt in &mut body.stmts {
        if let StmtKind::Assign { value, .. } = &mut stmt.kind {
            let source = match value {
                Rvalue::Cast(ty, Operand::Local(r)) if types[r.index()] == *ty => *r,
                _ => continue,
            };
            *value = Rvalue::Use(Operand::Local(source));
            n += 1;
        }
    }
    n
}

// ── Folding ─────────────────────────────────────────────────────────────────

fn fold_arithmetic(body: &mut Body) -> usize {
    let mut n = 0;
    for stmt in &mut body.stmts {
        let StmtKind::Assign { value, .. } = &mut stmt.kind else {
            continue;
        };
        let folded = match value {
            Rvalue::Binary(op, Operand::Const(a), Operand::Const(b)) => fold_binary(*op, a, b),
            Rvalue::Unary(op, Operand::Const(a)) => fold_unary(*op, a),
            _ => None,
        };
        if let Some(c) = folded {
            *value = Rvalue::Use(Operand::Const(c));
            n += 1;
        }
    }
    n
}

fn fold_branches(body: &mut Body) -> usize {
    let mut n = 0;
    for stmt in &mut body.stmts {
        let StmtKind::If {
            op,
            lhs: Operand::Const(a),
            rhs: Operand::Const(b),
            target,
        } = &stmt.kind
        else {
            continue;
        };
        let Some(Constant::Bool(taken)) = fold_binary(*op, a, b) else {
            continue;
        };
        let target = *target;
        stmt.kind = if taken {
            StmtKind::Goto(target)
        } else {
            StmtKind::Nop
        };
        n += 1;
    }
    n
}

/// Evaluate `a op b` on literals with the machine semantics of the target.
pub fn fold_binary(op: BinOp, a: &Constant, b: &Constant) -> Option<Constant> {
    use Constant::*;
    if op.is_comparison() {
        let ordering = match (a, b) {
            (Int(x), Int(y)) => x.partial_cmp(y),
            (Long(x), Long(y)) => x.partial_cmp(y),
            (Double(x), Double(y)) => x.partial_cmp(y),
            (Bool(x), Bool(y)) if matches!(op, BinOp::Eq | BinOp::Ne) => x.partial_cmp(y),
            (Null, Null) if matches!(op, BinOp::Eq | BinOp::Ne) => Some(std::cmp::Ordering::Equal),
            _ => return None,
        };
        let result = match (op, ordering) {
            (BinOp::Ne, None) => true,
            (_, None) => false,
            (BinOp::Eq, Some(o)) => o.is_eq(),
            (BinOp::Ne, Some(o)) => o.is_ne(),
            (BinOp::Lt, Some(o)) => o.is_lt(),
            (BinOp::Le, Some(o)) => o.is_le(),
            (BinOp::Gt, Some(o)) => o.is_gt(),
            (BinOp::Ge, Some(o)) => o.is_ge(),
            _ => return None,
        };
        return Some(Bool(result));
    }
    Some(match (a, b) {
        (Int(x), Int(y)) => Int(match op {
            BinOp::Add => x.wrapping_add(*y),
            BinOp::Sub => x.wrapping_sub(*y),
            BinOp::Mul => x.wrapping_mul(*y),
            BinOp::Div if *y != 0 => x.wrapping_div(*y),
            BinOp::Rem if *y != 0 => x.wrapping_rem(*y),
            BinOp::And => x & y,
            BinOp::Or => x | y,
            BinOp::Xor => x ^ y,
            BinOp::Shl => x.wrapping_shl(*y as u32),
            BinOp::Shr => x.wrapping_shr(*y as u32),
            BinOp::Ushr => ((*x as u32).wrapping_shr(*y as u32)) as i32,
            _ => return None,
        }),
        (Long(x), Long(y)) => Long(match op {
            BinOp::Add => x.wrapping_add(*y),
            BinOp::Sub => x.wrapping_sub(*y),
            BinOp::Mul => x.wrapping_mul(*y),
            BinOp::Div if *y != 0 => x.wrapping_div(*y),
            BinOp::Rem if *y != 0 => x.wrapping_rem(*y),
            BinOp::And => x & y,
            BinOp::Or => x | y,
            BinOp::Xor => x ^ y,
            _ => return None,
        }),
        (Long(x), Int(y)) => Long(match op {
            BinOp::Shl => x.wrapping_shl(*y as u32),
            BinOp::Shr => x.wrapping_shr(*y as u32),
            BinOp::Ushr => ((*x as u64).wrapping_shr(*y as u32)) as i64,
            _ => return None,
        }),
        (Double(x), Double(y)) => Double(match op {
            BinOp::Add => x + y,
            BinOp::Sub => x - y,
            BinOp::Mul => x * y,
            BinOp::Div => x / y,
            BinOp::Rem => x % y,
            _ => return None,
        }),
        (Bool(x), Bool(y)) => Bool(match op {
            BinOp::And => *x && *y,
            BinOp::Or => *x || *y,
            BinOp::Xor => x ^ y,
            _ => return None,
        }),
        _ => return None,
    })
}

fn fold_unary(op: UnOp, a: &Constant) -> Option<Constant> {
    Some(match (op, a) {
        (UnOp::Neg, Constant::Int(x)) => Constant::Int(x.wrapping_neg()),
        (UnOp::Neg, Constant::Long(x)) => Constant::Long(x.wrapping_neg()),
        (UnOp::Neg, Constant::Double(x)) => Constant::Double(-x),
        (UnOp::Not, Constant::Bool(x)) => Constant::Bool(!x),
        _ => return None,
    })
}

// ── Control flow ────────────────────────────────────────────────────────────

fn remove_unreachable(body: &mut Body) -> usize {
    let n = body.stmts.len();
    if n == 0 {
        return 0;
    }
    let mut reached = vec![false; n];
    let mut work = VecDeque::from([0usize]);
    reached[0] = true;
    while let Some(i) = work.pop_front() {
        for s in dataflow::successors(body, i) {
            if !reached[s] {
                reached[s] = true;
                work.push_back(s);
            }
        }
    }
    let before = body.stmts.len();
    let mut index = 0;
    body.stmts.retain(|_| {
        let keep = reached[index];
        index += 1;
        keep
    });
    before - body.stmts.len()
}

/// `goto L` where `L` is among the labels that directly follow.
fn remove_redundant_jumps(body: &mut Body) -> usize {
    let mut redundant = Vec::new();
    for (i, stmt) in body.stmts.iter().enumerate() {
        let StmtKind::Goto(target) = stmt.kind else { continue };
        let mut next_labels = body.stmts[i + 1..].iter().map_while(|s| match s.kind {
            StmtKind::Label(l) => Some(l),
            _ => None,
        });
        if next_labels.any(|l| l == target) {
            redundant.push(stmt.id);
        }
    }
    remove_all(body, &redundant)
}

fn remove_unused_labels(body: &mut Body) -> usize {
    let targets: BTreeSet<Label> = body
        .stmts
        .iter()
        .filter(|s| !matches!(s.kind, StmtKind::Label(_)))
        .filter_map(|s| s.kind.branch_target())
        .collect();
    let unused: Vec<StmtId> = body
        .stmts
        .iter()
        .filter(|s| matches!(s.kind, StmtKind::Label(l) if !targets.contains(&l)))
        .map(|s| s.id)
        .collect();
    remove_all(body, &unused)
}

/// Assignments of copies, casts and type tests nothing reads.
fn remove_dead_copies(body: &mut Body) -> usize {
    let counts = body.use_counts();
    let dead: Vec<StmtId> = body
        .stmts
        .iter()
        .filter(|s| match &s.kind {
            StmtKind::Assign {
                place: Place::Local(l),
                value: Rvalue::Use(_) | Rvalue::Cast(..) | Rvalue::InstanceOf(..),
            } => counts[l.index()] == 0,
            _ => false,
        })
        .map(|s| s.id)
        .collect();
    remove_all(body, &dead)
}

fn remove_nops(body: &mut Body) -> usize {
    let before = body.stmts.len();
    body.stmts.retain(|s| s.kind != StmtKind::Nop);
    before - body.stmts.len()
}

fn remove_all(body: &mut Body, ids: &[StmtId]) -> usize {
    ids.iter().filter(|id| body.remove(**id)).count()
}

// ── Notification inlining ───────────────────────────────────────────────────

/// Inline `attributeChanged` of generated classes at call sites. Callees
/// that themselves notify are left as calls.
fn inline_notifications(ctx: &mut PipelineContext) -> usize {
    let mut inlined = 0;
    for method in ctx.program.all_live_methods() {
        let sites: Vec<(StmtId, LocalId, Operand, MethodId)> = ctx
            .program
            .method(method)
            .body
            .stmts
            .iter()
            .filter_map(|s| {
                let StmtKind::Invoke(inv) = &s.kind else { return None };
                if inv.kind != InvokeKind::Virtual || !inv.method.is("attributeChanged", 1) {
                    return None;
                }
                let callee = ctx.program.resolve(&inv.method)?;
                let notifies = ctx
                    .program
                    .method(callee)
                    .body
                    .invokes()
                    .any(|(_, i)| i.method.name == "attributeChanged");
                (callee != method && !notifies).then(|| (s.id, inv.base, inv.args[0].clone(), callee))
            })
            .filter_map(|(id, base, arg, callee)| Some((id, base?, arg, callee)))
            .collect();
        if sites.is_empty() {
            continue;
        }
        let mut body = ctx.take_body(method);
        for (stmt, base, arg, callee) in sites {
            splice(&mut body, stmt, &ctx.program.method(callee).body, base, arg);
            inlined += 1;
        }
        ctx.put_body(method, body);
    }
    if inlined > 0 {
        tracing::debug!(inlined, "attributeChanged inlined");
    }
    inlined
}

/// Replace the call at `at` by a renamed copy of `callee` whose returns jump
/// past the copy.
fn splice(caller: &mut Body, at: StmtId, callee: &Body, base: LocalId, arg: Operand) {
    let mut kinds = Vec::with_capacity(callee.stmts.len() + 2);
    let mut map: Vec<LocalId> = Vec::with_capacity(callee.locals.len());
    for (i, local) in callee.locals.iter().enumerate() {
        let id = LocalId(i as u32);
        if callee.this_local == Some(id) {
            map.push(base);
        } else {
            map.push(caller.new_local(&local.name, local.ty.clone()));
        }
    }
    if let Some(p) = callee.param_locals.first() {
        kinds.push(StmtKind::assign(map[p.index()], Rvalue::Use(arg)));
    }
    let labels: HashMap<Label, Label> = callee
        .stmts
        .iter()
        .filter_map(|s| match s.kind {
            StmtKind::Label(l) => Some(l),
            _ => None,
        })
        .map(|l| (l, caller.new_label()))
        .collect();
    let end = caller.new_label();
    for stmt in &callee.stmts {
        let mut kind = match &stmt.kind {
            StmtKind::Return(_) => StmtKind::Goto(end),
            other => other.clone(),
        };
        kind.rename_locals(&|l: LocalId| map[l.index()]);
        kind.rename_labels(&|l: Label| labels.get(&l).copied().unwrap_or(l));
        kinds.push(kind);
    }
    kinds.push(StmtKind::Label(end));
    caller.insert_before(at, kinds);
    caller.remove(at);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Emitter;

    fn count(body: &Body, f: impl Fn(&StmtKind) -> bool) -> usize {
        body.stmts.iter().filter(|s| f(&s.kind)).count()
    }

    #[test]
    fn literal_branches_fold_and_dead_code_goes() {
        let mut body = Body::new();
        let mut em = Emitter::new(&mut body);
        let x = em.constant("x", Constant::Int(2));
        let y = em.value("y", Type::Int, Rvalue::Binary(BinOp::Mul, x.into(), Operand::int(3)));
        let skip = em.label();
        em.branch(BinOp::Eq, y.into(), Operand::int(6), skip);
        em.throw_runtime("unreachable");
        em.place(skip);
        em.ret(Some(y.into()));
        em.append();

        simplify(&Program::new(), &mut body);
        assert_eq!(count(&body, |k| matches!(k, StmtKind::Throw(_))), 0);
        assert_eq!(count(&body, |k| matches!(k, StmtKind::If { .. })), 0);
        assert_eq!(
            body.stmts.last().map(|s| s.kind.clone()),
            Some(StmtKind::Return(Some(Operand::int(6))))
        );
    }

    #[test]
    fn copies_collapse_into_their_source() {
        let mut body = Body::new();
        let this = body.new_local("this", Type::object("C"));
        body.this_local = Some(this);
        let mut em = Emitter::new(&mut body);
        let a = em.value("a", Type::object("C"), Rvalue::Use(this.into()));
        let b = em.cast("b", Type::object("C"), a.into());
        em.ret(Some(b.into()));
        em.append();

        simplify(&Program::new(), &mut body);
        assert_eq!(body.stmts.len(), 1);
        assert_eq!(body.stmts[0].kind, StmtKind::Return(Some(Operand::Local(this))));
        assert_eq!(body.locals.len(), 1);
    }

    #[test]
    fn loops_keep_their_copies() {
        let mut body = Body::new();
        let p = body.new_local("p", Type::Int);
        body.param_locals.push(p);
        let mut em = Emitter::new(&mut body);
        let top = em.label();
        em.place(top);
        let a = em.value("a", Type::Int, Rvalue::Use(p.into()));
        em.branch(BinOp::Lt, a.into(), Operand::int(0), top);
        em.ret(None);
        em.append();

        simplify(&Program::new(), &mut body);
        assert_eq!(count(&body, |k| k.def_local().is_some()), 1);
    }

    #[test]
    fn machine_arithmetic_wraps() {
        assert_eq!(
            fold_binary(BinOp::Add, &Constant::Int(i32::MAX), &Constant::Int(1)),
            Some(Constant::Int(i32::MIN))
        );
        assert_eq!(fold_binary(BinOp::Div, &Constant::Int(1), &Constant::Int(0)), None);
        assert_eq!(
            fold_binary(BinOp::Ushr, &Constant::Int(-1), &Constant::Int(28)),
            Some(Constant::Int(15))
        );
        assert_eq!(
            fold_binary(BinOp::Lt, &Constant::Double(1.0), &Constant::Double(2.0)),
            Some(Constant::Bool(true))
        );
    }
}
