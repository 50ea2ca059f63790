// dce.rs — Dead code, method, field and closure elimination
//
// Four sweeps, each monotone:
//   1. assignments whose local is never read and whose value cannot have an
//      observable effect, and void calls of side-effect-free methods;
//   2. methods not reachable from the lifecycle entry points;
//   3. fields never read, together with their stores;
//   4. closure classes no live method instantiates.
// Only value-token and type-descriptor constructions count as removable
// allocations; arbitrary constructors may have effects that cannot be
// proven absent.
//
// Preconditions: none.
// Postconditions: no removed method is the target of a live call.
// Failure modes: none.
// Side effects: marks methods, fields and classes removed.

use std::collections::BTreeSet;

use crate::context::PipelineContext;
use crate::error::Result;
use crate::framework::{self, LIFECYCLE};
use crate::id::{ClassId, FieldId, MethodId, StmtId};
use crate::ir::{
    BinOp, Body, ClassKind, Constant, InvokeKind, Operand, Place, Program, Rvalue, StmtKind,
};

/// Entry points the runtime calls on every generated class.
fn is_entry_point(name: &str) -> bool {
    matches!(name, "<init>" | "attributeChanged" | "apply" | "latest")
        || LIFECYCLE.iter().any(|(n, _)| *n == name)
}

pub fn run(ctx: &mut PipelineContext) -> Result<usize> {
    let statements = dead_statements(&mut ctx.program);
    let methods = unused_methods(&mut ctx.program);
    let fields = unused_fields(ctx);
    let closures = unused_closures(&mut ctx.program);
    let total = statements + methods + fields + closures;
    if total > 0 {
        tracing::debug!(statements, methods, fields, closures, "dead code removed");
    }
    Ok(total)
}

// ── Statements ──────────────────────────────────────────────────────────────

fn removable(value: &Rvalue) -> bool {
    match value {
        Rvalue::Use(_)
        | Rvalue::Cast(..)
        | Rvalue::InstanceOf(..)
        | Rvalue::Field { .. }
        | Rvalue::Unary(..) => true,
        // Integer division by a variable may trap.
        Rvalue::Binary(BinOp::Div | BinOp::Rem, _, rhs) => match rhs {
            Operand::Const(Constant::Int(v)) => *v != 0,
            Operand::Const(Constant::Long(v)) => *v != 0,
            Operand::Const(Constant::Double(_)) => true,
            _ => false,
        },
        Rvalue::Binary(..) => true,
        Rvalue::New { class, .. } => framework::is_value_class(class),
        Rvalue::Invoke(inv) => {
            inv.kind != InvokeKind::Special && framework::is_side_effect_free(&inv.method)
        }
        Rvalue::ArrayElem { .. } | Rvalue::ArrayLength(_) | Rvalue::NewArray { .. } => false,
    }
}

/// Remove dead statements of one body until none remain.
pub fn sweep_body(body: &mut Body) -> usize {
    let mut total = 0;
    loop {
        let counts = body.use_counts();
        let dead: Vec<StmtId> = body
            .stmts
            .iter()
            .filter(|s| match &s.kind {
                StmtKind::Assign {
                    place: Place::Local(l),
                    value,
                } => counts[l.index()] == 0 && !body.is_param(*l) && removable(value),
                StmtKind::Invoke(inv) => {
                    inv.kind != InvokeKind::Special && framework::is_side_effect_free(&inv.method)
                }
                _ => false,
            })
            .map(|s| s.id)
            .collect();
        if dead.is_empty() {
            break;
        }
        for id in &dead {
            body.remove(*id);
        }
        total += dead.len();
    }
    total
}

fn dead_statements(program: &mut Program) -> usize {
    let mut total = 0;
    for method in program.all_live_methods() {
        total += sweep_body(&mut program.method_mut(method).body);
    }
    total
}

// ── Methods ─────────────────────────────────────────────────────────────────

fn unused_methods(program: &mut Program) -> usize {
    let live = program.all_live_methods();
    let mut reached: BTreeSet<MethodId> = live
        .iter()
        .copied()
        .filter(|m| is_entry_point(&program.method(*m).name))
        .collect();
    let mut work: Vec<MethodId> = reached.iter().copied().collect();
    while let Some(m) = work.pop() {
        for (_, inv) in program.method(m).body.invokes() {
            if let Some(callee) = program.resolve(&inv.method) {
                if reached.insert(callee) {
                    work.push(callee);
                }
            }
        }
    }
    let mut removed = 0;
    for m in live {
        if !reached.contains(&m) {
            tracing::trace!(method = %program.method_name(m), "removing unused method");
            program.remove_method(m);
            removed += 1;
        }
    }
    removed
}

// ── Fields ──────────────────────────────────────────────────────────────────

fn unused_fields(ctx: &mut PipelineContext) -> usize {
    let program = &mut ctx.program;
    let mut read: BTreeSet<FieldId> = BTreeSet::new();
    for m in program.all_live_methods() {
        for stmt in &program.method(m).body.stmts {
            if let Some(Rvalue::Field { field, .. }) = stmt.kind.rvalue() {
                read.insert(*field);
            }
        }
    }
    let unread: Vec<FieldId> = program
        .live_classes()
        .flat_map(|c| program.live_fields(c).collect::<Vec<_>>())
        .filter(|f| !read.contains(f))
        .collect();
    if unread.is_empty() {
        return 0;
    }
    for m in program.all_live_methods() {
        let body = &mut program.method_mut(m).body;
        body.stmts.retain(|s| match &s.kind {
            StmtKind::Assign {
                place: Place::Field { field, .. },
                ..
            } => !unread.contains(field),
            _ => true,
        });
    }
    for f in &unread {
        program.remove_field(*f);
    }
    ctx.ref_fields.retain(|_, f| !unread.contains(f));
    unread.len()
}

// ── Closures ────────────────────────────────────────────────────────────────

fn unused_closures(program: &mut Program) -> usize {
    let closures: Vec<ClassId> = program
        .live_classes()
        .filter(|c| program.class(*c).kind == ClassKind::Closure)
        .collect();
    let mut removed = 0;
    for closure in closures {
        let name = program.class(closure).name.clone();
        let instantiated = program.all_live_methods().into_iter().any(|m| {
            program.method(m).class != closure
                && program.method(m).body.stmts.iter().any(|s| {
                    matches!(s.kind.rvalue(), Some(Rvalue::New { class, .. }) if *class == name)
                })
        });
        if !instantiated {
            program.remove_class(closure);
            removed += 1;
        }
    }
    removed
}
