// inline_tokens.rs — Narrow token operations whose types are known
//
// Consumes `token_types` facts at each statement:
//   - `TypeLattice.compare(a, b)` with both types known folds to the
//     comparison code;
//   - `instanceof` on a token of concrete type folds to a boolean;
//   - `C.convert(t)` where `t` already has the type of `C` becomes a copy;
//   - with unboxing on, arithmetic on two native numeric tokens becomes
//     accessor calls, a primitive operation and one token construction;
//   - accessors such as `intValue()` on a token built from a literal, or
//     read from an immutable value field, fold to the literal.
//
// Preconditions: parameter accesses are already field reads.
// Postconditions: every folded site had non-unknown operand types at that
//   exact program point.
// Failure modes: none. Sites with unknown types are left dynamic.
// Side effects: adds locals and statements to rewritten bodies.

use crate::builder::Emitter;
use crate::context::PipelineContext;
use crate::error::Result;
use crate::framework::{self, data};
use crate::id::{LocalId, MethodId, StmtId};
use crate::ir::{BinOp, Body, Constant, Invoke, InvokeKind, Operand, Program, Rvalue, StmtKind, Type};
use crate::token::Token;
use crate::token_types::{self, TypeFact};
use crate::types::TokenType;

pub fn run(ctx: &mut PipelineContext) -> Result<usize> {
    let mut total = 0;
    for method in ctx.program.all_live_methods() {
        let plans = plan(ctx, method);
        if plans.is_empty() {
            continue;
        }
        total += plans.len();
        let body = &mut ctx.program.method_mut(method).body;
        for p in plans {
            apply(body, p);
        }
    }
    if total > 0 {
        tracing::debug!(rewrites = total, "token operations narrowed");
    }
    Ok(total)
}

enum Plan {
    /// Replace the defining rvalue.
    Fold { stmt: StmtId, dst: LocalId, value: Rvalue },
    /// Primitive arithmetic on two unboxed operands.
    Unbox {
        stmt: StmtId,
        dst: LocalId,
        op: BinOp,
        lhs: LocalId,
        rhs: LocalId,
        ty: TokenType,
    },
}

fn plan(ctx: &PipelineContext, method: MethodId) -> Vec<Plan> {
    let (_, solution) = token_types::analyze_method(ctx, method);
    let body = &ctx.program.method(method).body;
    let mut plans = Vec::new();
    for (i, stmt) in body.stmts.iter().enumerate() {
        let Some(fact) = solution.before(i) else { continue };
        let (Some(dst), Some(value)) = (stmt.kind.def_local(), stmt.kind.rvalue()) else {
            continue;
        };
        let planned = match value {
            Rvalue::InstanceOf(class, Operand::Local(x)) => instance_of(fact, class, *x),
            Rvalue::Invoke(inv) => invoke(ctx, body, fact, inv),
            _ => None,
        };
        match planned {
            Some(Planned::Value(value)) => plans.push(Plan::Fold {
                stmt: stmt.id,
                dst,
                value,
            }),
            Some(Planned::Unbox { op, lhs, rhs, ty }) => plans.push(Plan::Unbox {
                stmt: stmt.id,
                dst,
                op,
                lhs,
                rhs,
                ty,
            }),
            None => {}
        }
    }
    plans
}

enum Planned {
    Value(Rvalue),
    Unbox {
        op: BinOp,
        lhs: LocalId,
        rhs: LocalId,
        ty: TokenType,
    },
}

fn constant(c: Constant) -> Option<Planned> {
    Some(Planned::Value(Rvalue::Use(Operand::Const(c))))
}

fn instance_of(fact: &TypeFact, class: &str, x: LocalId) -> Option<Planned> {
    let ty = fact.local(x);
    if !ty.is_concrete() || !framework::is_value_class(class) {
        return None;
    }
    constant(Constant::Bool(framework::is_runtime_subclass(ty.token_class(), class)))
}

fn invoke(ctx: &PipelineContext, body: &Body, fact: &TypeFact, inv: &Invoke) -> Option<Planned> {
    let m = &inv.method;
    let operand_ty = |op: &Operand| match op {
        Operand::Local(l) => fact.local(*l),
        Operand::Const(_) => TokenType::Unknown,
    };
    match (inv.kind, m.name.as_str()) {
        (InvokeKind::Static, "compare") if m.class == data::TYPE_LATTICE && inv.args.len() == 2 => {
            let a = operand_ty(&inv.args[0]);
            let b = operand_ty(&inv.args[1]);
            if a == TokenType::Unknown || b == TokenType::Unknown {
                return None;
            }
            constant(Constant::Int(a.compare(&b)))
        }
        (InvokeKind::Static, "convert") if inv.args.len() == 1 => {
            let target = TokenType::from_token_class(&m.class)?;
            let arg = inv.args[0].as_local()?;
            (fact.local(arg) == target)
                .then(|| Planned::Value(Rvalue::Cast(Type::object(&m.class), arg.into())))
        }
        (InvokeKind::Virtual, "add" | "subtract" | "multiply" | "divide" | "modulo")
            if ctx.options.unboxing && inv.args.len() == 1 =>
        {
            let lhs = inv.base?;
            let rhs = inv.args[0].as_local()?;
            let (a, b) = (fact.local(lhs), fact.local(rhs));
            if !a.is_native_numeric() || !b.is_native_numeric() {
                return None;
            }
            let ty = a.lub(&b);
            if !ty.is_native_numeric() {
                return None;
            }
            let op = match m.name.as_str() {
                "add" => BinOp::Add,
                "subtract" => BinOp::Sub,
                "multiply" => BinOp::Mul,
                "divide" => BinOp::Div,
                _ => BinOp::Rem,
            };
            Some(Planned::Unbox { op, lhs, rhs, ty })
        }
        (InvokeKind::Virtual, name) if inv.args.is_empty() => {
            let base = inv.base?;
            let token = known_token(&ctx.program, body, base)?;
            accessor_constant(&token, name).map(Planned::Value)
        }
        _ => None,
    }
}

/// The compile-time token `local` holds, following copies and casts back to
/// a literal construction or an immutable value field.
fn known_token(program: &Program, body: &Body, local: LocalId) -> Option<Token> {
    let mut cur = local;
    for _ in 0..body.stmts.len() + 1 {
        match body.single_def(cur)?.kind.rvalue()? {
            Rvalue::Use(Operand::Local(r)) | Rvalue::Cast(_, Operand::Local(r)) => cur = *r,
            Rvalue::New { class, args } => {
                return match args.as_slice() {
                    [Operand::Const(c)] => literal_token(class, c),
                    _ => None,
                };
            }
            Rvalue::Field { field, .. } => {
                let f = program.field(*field);
                return if f.is_final { f.initial.clone() } else { None };
            }
            _ => return None,
        }
    }
    None
}

fn literal_token(class: &str, c: &Constant) -> Option<Token> {
    Some(match (class, c) {
        (data::BOOLEAN_TOKEN, Constant::Bool(b)) => Token::Boolean(*b),
        (data::UNSIGNED_BYTE_TOKEN, Constant::Int(v)) => Token::UnsignedByte(u8::try_from(*v).ok()?),
        (data::INT_TOKEN, Constant::Int(v)) => Token::Int(*v),
        (data::LONG_TOKEN, Constant::Long(v)) => Token::Long(*v),
        (data::DOUBLE_TOKEN, Constant::Double(v)) => Token::Double(*v),
        (data::STRING_TOKEN, Constant::Str(s)) => Token::String(s.clone()),
        _ => return None,
    })
}

/// Value of a native accessor applied to a known token, when the runtime
/// conversion is lossless.
fn accessor_constant(token: &Token, accessor: &str) -> Option<Rvalue> {
    let c = match (accessor, token) {
        ("booleanValue", Token::Boolean(b)) => Constant::Bool(*b),
        ("intValue", Token::UnsignedByte(v)) => Constant::Int(i32::from(*v)),
        ("intValue", Token::Int(v)) => Constant::Int(*v),
        ("longValue", Token::UnsignedByte(v)) => Constant::Long(i64::from(*v)),
        ("longValue", Token::Int(v)) => Constant::Long(i64::from(*v)),
        ("longValue", Token::Long(v)) => Constant::Long(*v),
        ("doubleValue", Token::UnsignedByte(v)) => Constant::Double(f64::from(*v)),
        ("doubleValue", Token::Int(v)) => Constant::Double(f64::from(*v)),
        ("doubleValue", Token::Double(v)) => Constant::Double(*v),
        ("stringValue", Token::String(s)) => Constant::Str(s.clone()),
        _ => return None,
    };
    Some(Rvalue::Use(Operand::Const(c)))
}

fn apply(body: &mut Body, plan: Plan) {
    match plan {
        Plan::Fold { stmt, dst, value } => {
            body.replace(stmt, StmtKind::assign(dst, value));
        }
        Plan::Unbox {
            stmt,
            dst,
            op,
            lhs,
            rhs,
            ty,
        } => {
            let (Some(native), Some(accessor)) = (ty.native_type(), ty.native_accessor()) else {
                return;
            };
            let stmts = {
                let mut em = Emitter::new(body);
                let read = framework::accessor(data::SCALAR_TOKEN, accessor, native.clone());
                let a = em.cast("lhs", Type::object(data::SCALAR_TOKEN), lhs.into());
                let a = em.call_value(a, read.clone(), vec![]);
                let b = em.cast("rhs", Type::object(data::SCALAR_TOKEN), rhs.into());
                let b = em.call_value(b, read, vec![]);
                let r = em.value("native", native, Rvalue::Binary(op, a.into(), b.into()));
                let boxed = em.new_object("boxed", ty.token_class(), vec![r.into()]);
                em.assign(dst, Rvalue::Use(boxed.into()));
                em.finish()
            };
            body.insert_before(stmt, stmts);
            body.remove(stmt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineOptions;
    use crate::model::{tests::DEMO, Model};
    use crate::types::{INCOMPARABLE, SAME};

    fn context(unboxing: bool) -> (PipelineContext, MethodId) {
        let model = Model::from_json(DEMO).unwrap();
        let options = PipelineOptions {
            unboxing,
            ..PipelineOptions::default()
        };
        let mut ctx = PipelineContext::new(model, options);
        let class = ctx
            .program
            .add_class("T", crate::framework::kernel::ATOMIC_ACTOR, crate::ir::ClassKind::Actor);
        let method = ctx.program.add_method(class, "fire", vec![], Type::Void, false);
        (ctx, method)
    }

    fn rvalues(ctx: &PipelineContext, method: MethodId) -> Vec<Rvalue> {
        ctx.program
            .method(method)
            .body
            .stmts
            .iter()
            .filter_map(|s| s.kind.rvalue().cloned())
            .collect()
    }

    #[test]
    fn lattice_comparisons_on_known_types_fold() {
        let (mut ctx, method) = context(true);
        let body = &mut ctx.program.method_mut(method).body;
        let mut em = Emitter::new(body);
        let a = em.new_object("a", data::INT_TOKEN, vec![Operand::int(1)]);
        let b = em.new_object("b", data::INT_TOKEN, vec![Operand::int(2)]);
        let s = em.new_object("s", data::STRING_TOKEN, vec![Operand::str("x")]);
        let same = em.call_static(framework::type_lattice_compare(), vec![a.into(), b.into()]);
        let other = em.call_static(framework::type_lattice_compare(), vec![a.into(), s.into()]);
        let unknown = em.temp("u", framework::token_type());
        let open = em.call_static(framework::type_lattice_compare(), vec![a.into(), unknown.into()]);
        em.ret(None);
        em.append();
        assert!(same.is_some() && other.is_some() && open.is_some());

        assert_eq!(run(&mut ctx).unwrap(), 2);
        let values = rvalues(&ctx, method);
        assert!(values.contains(&Rvalue::Use(Operand::Const(Constant::Int(SAME)))));
        // int is below string in the lattice.
        assert!(!values.contains(&Rvalue::Use(Operand::Const(Constant::Int(INCOMPARABLE)))));
        assert_eq!(
            values
                .iter()
                .filter(|v| matches!(v, Rvalue::Invoke(i) if i.method.name == "compare"))
                .count(),
            1
        );
    }

    #[test]
    fn instanceof_on_known_tokens_folds() {
        let (mut ctx, method) = context(true);
        let body = &mut ctx.program.method_mut(method).body;
        let mut em = Emitter::new(body);
        let d = em.new_object("d", data::DOUBLE_TOKEN, vec![Operand::Const(Constant::Double(1.0))]);
        let scalar = em.value(
            "isScalar",
            Type::Boolean,
            Rvalue::InstanceOf(data::SCALAR_TOKEN.to_string(), d.into()),
        );
        let complex = em.value(
            "isComplex",
            Type::Boolean,
            Rvalue::InstanceOf(data::COMPLEX_TOKEN.to_string(), d.into()),
        );
        em.ret(None);
        em.append();

        run(&mut ctx).unwrap();
        let body = &ctx.program.method(method).body;
        let value_of = |l: LocalId| body.single_def(l).and_then(|s| s.kind.rvalue().cloned());
        assert_eq!(value_of(scalar), Some(Rvalue::Use(Operand::Const(Constant::Bool(true)))));
        assert_eq!(value_of(complex), Some(Rvalue::Use(Operand::Const(Constant::Bool(false)))));
    }

    #[test]
    fn native_arithmetic_is_unboxed_and_literals_fold() {
        let (mut ctx, method) = context(true);
        let body = &mut ctx.program.method_mut(method).body;
        let mut em = Emitter::new(body);
        let a = em.new_object("a", data::INT_TOKEN, vec![Operand::int(3)]);
        let b = em.new_object("b", data::DOUBLE_TOKEN, vec![Operand::Const(Constant::Double(0.5))]);
        let product = em.call_value(b, framework::token_binary("multiply"), vec![a.into()]);
        em.ret(Some(product.into()));
        em.append();

        run(&mut ctx).unwrap();
        let values = rvalues(&ctx, method);
        assert!(values.iter().any(|v| matches!(v, Rvalue::Binary(BinOp::Mul, _, _))));
        assert!(!values
            .iter()
            .any(|v| matches!(v, Rvalue::Invoke(i) if i.method.name == "multiply")));
        assert!(values.iter().any(|v| matches!(
            v,
            Rvalue::New { class, .. } if class == data::DOUBLE_TOKEN
        )));

        // The accessors on the two literals fold on the next round.
        run(&mut ctx).unwrap();
        let values = rvalues(&ctx, method);
        assert!(values.contains(&Rvalue::Use(Operand::Const(Constant::Double(0.5)))));
        assert!(values.contains(&Rvalue::Use(Operand::Const(Constant::Double(3.0)))));
    }

    #[test]
    fn arithmetic_stays_boxed_without_unboxing() {
        let (mut ctx, method) = context(false);
        let body = &mut ctx.program.method_mut(method).body;
        let mut em = Emitter::new(body);
        let a = em.new_object("a", data::INT_TOKEN, vec![Operand::int(3)]);
        let b = em.new_object("b", data::INT_TOKEN, vec![Operand::int(4)]);
        em.call_value(a, framework::token_binary("add"), vec![b.into()]);
        em.ret(None);
        em.append();

        assert_eq!(run(&mut ctx).unwrap(), 0);
    }

    #[test]
    fn unknown_operands_are_left_alone() {
        let (mut ctx, method) = context(true);
        let body = &mut ctx.program.method_mut(method).body;
        let mut em = Emitter::new(body);
        let a = em.new_object("a", data::INT_TOKEN, vec![Operand::int(3)]);
        let u = em.temp("u", framework::token_type());
        em.call_value(a, framework::token_binary("add"), vec![u.into()]);
        let s = em.value(
            "isScalar",
            Type::Boolean,
            Rvalue::InstanceOf(data::SCALAR_TOKEN.to_string(), u.into()),
        );
        em.ret(Some(s.into()));
        em.append();

        assert_eq!(run(&mut ctx).unwrap(), 0);
    }
}
