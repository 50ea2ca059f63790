// inline_params.rs — Parameter reads and writes become value-field accesses
//
// Every variable gets a value-holder field `_CGvalue_<name>` on the class of
// the entity (or director) that owns it, every other settable attribute an
// expression field `_CGexpr_<name>`. Constant variables hold their load-time
// value in an immutable, value-tagged field. Non-constant variables get a
// `_CGcompute_<name>` method generated from their expression; the top-level
// constructor calls these in dependency order once the structure exists.
//
// Call sites on resolved attributes are then rewritten:
//   getToken()        → read of the value field
//   getExpression()   → the expression text, or a read of the expression field
//   setToken(t)       → store, recompute dependents, notify attributeChanged
//   setExpression(e)  → dropped in constructors when it restates the model
//   editor-only calls → dropped
//
// Preconditions: classes are materialized; constant analysis has run.
// Postconditions: no store targets an immutable field.
// Failure modes:
//   - `SpecError::Inconsistency` for a write to a constant variable;
//   - `SpecError::Unsupported` for writes through an ambiguous reference
//     and for expression changes after construction.
// Side effects: adds fields, compute methods and W0300 diagnostics for
//   reads on ambiguous references, which stay dynamic.

use crate::builder::Emitter;
use crate::codegen::{self, ExprGen};
use crate::context::{sanitize, PipelineContext};
use crate::diag::{codes, Diagnostic};
use crate::error::{Result, SpecError};
use crate::framework::{self, kernel};
use crate::id::{ClassId, FieldId, LocalId, MethodId, ObjId, StmtId};
use crate::ir::{Body, Constant, InvokeKind, Operand, Rvalue, StmtKind, Type};
use crate::model::ObjKind;
use crate::named_obj::{self, Binding};
use crate::token::Token;

pub fn run(ctx: &mut PipelineContext) -> Result<usize> {
    let created = create_fields(ctx)?;
    let rewritten = rewrite_sites(ctx)?;
    if created + rewritten > 0 {
        tracing::debug!(created, rewritten, "parameters inlined");
    }
    Ok(created + rewritten)
}

// ── Value holders ───────────────────────────────────────────────────────────

/// Create the fields and compute methods that do not exist yet.
fn create_fields(ctx: &mut PipelineContext) -> Result<usize> {
    let mut created = 0;
    let mut computed = Vec::new();
    for var in ctx.model.variables() {
        if ctx.value_fields.contains_key(&var) {
            continue;
        }
        let Some(owner) = ctx.model.container(var) else { continue };
        let Some(class) = ctx.class_for_object(owner) else { continue };
        let Some(info) = ctx.model.variable(var).cloned() else { continue };
        let name = sanitize(&ctx.model.object(var).name);
        let field = ctx
            .program
            .add_field(class, &format!("_CGvalue_{name}"), framework::token_type());
        ctx.tags.tag_type(field, info.resolved.clone())?;
        ctx.value_fields.insert(var, field);
        if ctx.constants.is_constant(var) {
            let f = ctx.program.field_mut(field);
            f.is_final = true;
            f.initial = info.value.clone();
            if let Some(value) = info.value {
                ctx.tags.tag_value(field, value)?;
            }
        } else {
            let method = build_compute(ctx, var, owner, class, field, &name)?;
            ctx.compute_methods.insert(var, method);
            computed.push(var);
        }
        created += 1;
    }

    let settables: Vec<(ObjId, String)> = ctx
        .model
        .ids()
        .filter(|id| !ctx.expression_fields.contains_key(id))
        .filter_map(|id| match &ctx.model.object(id).kind {
            ObjKind::Settable { expression } => Some((id, expression.clone())),
            _ => None,
        })
        .collect();
    for (attr, expression) in settables {
        let Some(class) = ctx.model.container(attr).and_then(|c| ctx.class_for_object(c)) else {
            continue;
        };
        let name = format!("_CGexpr_{}", sanitize(&ctx.model.object(attr).name));
        let field = ctx.program.add_field(class, &name, Type::String);
        let f = ctx.program.field_mut(field);
        f.is_final = true;
        f.initial = Some(Token::String(expression.clone()));
        ctx.tags.tag_value(field, Token::String(expression))?;
        ctx.expression_fields.insert(attr, field);
        created += 1;
    }

    if !computed.is_empty() {
        call_computes_at_startup(ctx, &computed)?;
    }
    Ok(created)
}

fn build_compute(
    ctx: &mut PipelineContext,
    var: ObjId,
    owner: ObjId,
    class: ClassId,
    field: FieldId,
    name: &str,
) -> Result<MethodId> {
    let method = ctx
        .program
        .add_method(class, &format!("_CGcompute_{name}"), vec![], Type::Void, false);
    let expr = ctx.model.parse(var)?;
    let resolved = ctx.model.variable_type(var);
    let subject = ctx.model.name(var).to_string();
    let mut body = ctx.take_body(method);
    let result = {
        let mut em = Emitter::new(&mut body);
        let this = em.this();
        let emitted = match (this, &expr) {
            (None, _) => Err(SpecError::inconsistency(subject.as_str(), "compute method has no receiver")),
            (Some(this), Some(expr)) => {
                let mut gen = ExprGen::new(ctx, class, Some(owner), Some(var), &subject);
                gen.emit(&mut em, expr).and_then(|(value, ty)| {
                    let value = if resolved.is_concrete() && ty != resolved {
                        codegen::convert(&mut em, value, &resolved)?
                    } else {
                        value
                    };
                    em.field_store(this, field, value.into());
                    Ok(())
                })
            }
            (Some(this), None) => {
                em.field_store(this, field, Operand::Const(Constant::Null));
                Ok(())
            }
        };
        emitted.map(|()| {
            em.ret(None);
            em.append()
        })
    };
    ctx.put_body(method, body);
    result?;
    Ok(method)
}

/// Call the new compute methods from the end of the top-level constructor,
/// dependencies first.
fn call_computes_at_startup(ctx: &mut PipelineContext, vars: &[ObjId]) -> Result<()> {
    let top = ctx.model.top;
    let class = ctx.class_of_object(top)?;
    let init = ctx.method_of(class, "<init>")?;
    let order: Vec<ObjId> = ctx
        .constants
        .non_constant_order()
        .into_iter()
        .filter(|v| vars.contains(v))
        .collect();
    let mut body = ctx.take_body(init);
    let result = emit_compute_calls(ctx, &mut body, top, &order);
    ctx.put_body(init, body);
    result
}

fn emit_compute_calls(ctx: &PipelineContext, body: &mut Body, top: ObjId, order: &[ObjId]) -> Result<()> {
    let this = body
        .this_local
        .ok_or_else(|| SpecError::inconsistency("parameter inlining", "constructor has no receiver"))?;
    let mut em = Emitter::new(body);
    for var in order {
        let Some(method) = ctx.compute_methods.get(var) else { continue };
        let owner = owner_of(ctx, *var)?;
        let target = ctx.reference_path(&mut em, this, top, owner)?;
        em.call(target, ctx.program.method_ref(*method), vec![]);
    }
    let stmts = em.finish();
    body.insert_before_return(stmts);
    Ok(())
}

fn owner_of(ctx: &PipelineContext, attr: ObjId) -> Result<ObjId> {
    ctx.model.container(attr).ok_or_else(|| {
        SpecError::inconsistency("parameter inlining", format!("{} has no container", ctx.model.name(attr)))
    })
}

// ── Call sites ──────────────────────────────────────────────────────────────

enum Edit {
    /// `dst = var.getToken()`
    Read { stmt: StmtId, dst: LocalId, var: ObjId },
    /// `dst = attr.getExpression()` on a variable
    Text { stmt: StmtId, dst: LocalId, text: String },
    /// `dst = attr.getExpression()` on a settable attribute
    Expression { stmt: StmtId, dst: LocalId, attr: ObjId },
    /// `base.setToken(value)`
    Write { stmt: StmtId, base: LocalId, value: Operand, var: ObjId },
    Drop { stmt: StmtId },
}

fn rewrite_sites(ctx: &mut PipelineContext) -> Result<usize> {
    let mut total = 0;
    for method in ctx.program.all_live_methods() {
        let edits = plan(ctx, method)?;
        if edits.is_empty() {
            continue;
        }
        total += edits.len();
        let mut body = ctx.take_body(method);
        let this_obj = ctx.object_of_method(method);
        let result = edits
            .into_iter()
            .try_for_each(|edit| apply(ctx, &mut body, this_obj, edit));
        ctx.put_body(method, body);
        result?;
    }
    Ok(total)
}

fn plan(ctx: &mut PipelineContext, method: MethodId) -> Result<Vec<Edit>> {
    let map = named_obj::analyze_method(ctx, method);
    let m = ctx.program.method(method);
    let in_constructor = m.name == "<init>";
    let has_receiver = m.body.this_local.is_some() && ctx.object_of_method(method).is_some();
    let mut edits = Vec::new();
    let mut ambiguous = Vec::new();
    for stmt in &m.body.stmts {
        let Some(inv) = stmt.kind.invoke() else { continue };
        if inv.kind != InvokeKind::Virtual {
            continue;
        }
        if framework::is_cosmetic(&inv.method) && matches!(stmt.kind, StmtKind::Invoke(_)) {
            edits.push(Edit::Drop { stmt: stmt.id });
            continue;
        }
        let name = inv.method.name.as_str();
        if !matches!(
            (name, inv.args.len()),
            ("getToken", 0) | ("getExpression", 0) | ("setToken", 1) | ("setExpression", 1)
        ) {
            continue;
        }
        let Some(base) = inv.base else { continue };
        let target = match map.get(base) {
            None => continue,
            Some(Binding::Ambiguous) => {
                if name.starts_with("set") {
                    return Err(SpecError::unsupported(
                        ctx.program.method_name(method),
                        format!("{name}() on an ambiguous attribute reference"),
                        "the written attribute cannot be determined statically",
                    ));
                }
                ambiguous.push(name.to_string());
                continue;
            }
            Some(Binding::Object(o)) => o,
        };
        let obj = ctx.model.object(target);
        let dst = stmt.kind.def_local();
        match (name, &obj.kind) {
            ("getToken", ObjKind::Variable(_)) => {
                let live = ctx
                    .value_fields
                    .get(&target)
                    .is_some_and(|f| !ctx.program.field(*f).removed);
                if let (Some(dst), true, true) = (dst, live, has_receiver) {
                    edits.push(Edit::Read { stmt: stmt.id, dst, var: target });
                }
            }
            ("getExpression", ObjKind::Variable(info)) => {
                if let Some(dst) = dst {
                    edits.push(Edit::Text {
                        stmt: stmt.id,
                        dst,
                        text: info.expression.clone(),
                    });
                }
            }
            ("getExpression", ObjKind::Settable { .. }) => {
                if let (Some(dst), true) = (dst, has_receiver && ctx.expression_fields.contains_key(&target)) {
                    edits.push(Edit::Expression { stmt: stmt.id, dst, attr: target });
                }
            }
            ("setToken", ObjKind::Variable(_)) => {
                if ctx.constants.is_constant(target) {
                    return Err(SpecError::inconsistency(
                        obj.full_name.clone(),
                        format!(
                            "{} writes a parameter proven constant",
                            ctx.program.method_name(method)
                        ),
                    ));
                }
                if has_receiver {
                    edits.push(Edit::Write {
                        stmt: stmt.id,
                        base,
                        value: inv.args[0].clone(),
                        var: target,
                    });
                }
            }
            ("setExpression", ObjKind::Variable(_) | ObjKind::Settable { .. }) => {
                let current = ctx.model.expression(target).unwrap_or_default();
                let restates = matches!(&inv.args[0], Operand::Const(Constant::Str(s)) if s == current);
                if in_constructor && restates {
                    edits.push(Edit::Drop { stmt: stmt.id });
                } else {
                    return Err(SpecError::unsupported(
                        obj.full_name.clone(),
                        "changing an expression after construction",
                        "the new expression would have to be parsed at run time",
                    ));
                }
            }
            _ => {}
        }
    }
    if !ambiguous.is_empty() {
        let subject = ctx.program.method_name(method);
        for call in ambiguous {
            ctx.warn(
                Diagnostic::warning(
                    subject.clone(),
                    format!("{call}() on an ambiguous attribute reference left dynamic"),
                )
                .with_code(codes::W0300),
            );
        }
    }
    Ok(edits)
}

fn apply(ctx: &PipelineContext, body: &mut Body, this_obj: Option<ObjId>, edit: Edit) -> Result<()> {
    let this_local = body.this_local;
    let receiver = move || -> Result<(LocalId, ObjId)> {
        match (this_local, this_obj) {
            (Some(t), Some(o)) => Ok((t, o)),
            _ => Err(SpecError::inconsistency("parameter inlining", "rewrite site has no receiver")),
        }
    };
    match edit {
        Edit::Drop { stmt } => {
            body.remove(stmt);
        }
        Edit::Text { stmt, dst, text } => {
            body.replace(stmt, StmtKind::assign(dst, Rvalue::Use(Operand::str(&text))));
        }
        Edit::Read { stmt, dst, var } => {
            let (this, from) = receiver()?;
            let field = value_field(ctx, var)?;
            let mut em = Emitter::new(body);
            let owner = ctx.reference_path(&mut em, this, from, owner_of(ctx, var)?)?;
            let stmts = em.finish();
            body.insert_before(stmt, stmts);
            body.replace(stmt, StmtKind::assign(dst, Rvalue::Field { base: owner, field }));
        }
        Edit::Expression { stmt, dst, attr } => {
            let (this, from) = receiver()?;
            let field = *ctx.expression_fields.get(&attr).ok_or_else(|| {
                SpecError::inconsistency("parameter inlining", "settable attribute has no expression field")
            })?;
            let mut em = Emitter::new(body);
            let owner = ctx.reference_path(&mut em, this, from, owner_of(ctx, attr)?)?;
            let stmts = em.finish();
            body.insert_before(stmt, stmts);
            body.replace(stmt, StmtKind::assign(dst, Rvalue::Field { base: owner, field }));
        }
        Edit::Write { stmt, base, value, var } => {
            let (this, from) = receiver()?;
            let stmts = {
                let mut em = Emitter::new(body);
                emit_write(ctx, &mut em, this, from, base, value, var)?;
                em.finish()
            };
            body.insert_before(stmt, stmts);
            body.remove(stmt);
        }
    }
    Ok(())
}

fn value_field(ctx: &PipelineContext, var: ObjId) -> Result<FieldId> {
    ctx.value_fields.get(&var).copied().ok_or_else(|| {
        SpecError::inconsistency("parameter inlining", format!("{} has no value field", ctx.model.name(var)))
    })
}

/// Store the new value, rerun the compute methods of every dependent
/// variable, then notify each changed variable's owner.
fn emit_write(
    ctx: &PipelineContext,
    em: &mut Emitter,
    this: LocalId,
    from: ObjId,
    base: LocalId,
    value: Operand,
    var: ObjId,
) -> Result<()> {
    let field = value_field(ctx, var)?;
    let resolved = ctx.model.variable_type(var);
    let value = match value {
        Operand::Local(l) if resolved.is_concrete() => Operand::Local(codegen::convert(em, l, &resolved)?),
        other => other,
    };
    let owner = ctx.reference_path(em, this, from, owner_of(ctx, var)?)?;
    em.field_store(owner, field, value);

    let affected = ctx.constants.affected_by(var);
    for w in &affected {
        if let Some(method) = ctx.compute_methods.get(w) {
            let target = ctx.reference_path(em, this, from, owner_of(ctx, *w)?)?;
            em.call(target, ctx.program.method_ref(*method), vec![]);
        }
    }
    for w in std::iter::once(var).chain(affected) {
        let container = owner_of(ctx, w)?;
        let Some(class) = ctx.class_for_object(container) else { continue };
        let Some(changed) = ctx.program.method_by_name(class, "attributeChanged") else {
            continue;
        };
        let target = ctx.reference_path(em, this, from, container)?;
        let attr = if w == var {
            base
        } else {
            ctx.reference_path(em, this, from, w)?
        };
        let arg = em.cast("attribute", Type::object(kernel::ATTRIBUTE), attr.into());
        em.call(target, ctx.program.method_ref(changed), vec![arg.into()]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineOptions;
    use crate::materialize;
    use crate::model::{tests::DEMO, Lookup, Model};
    use crate::types::TokenType;

    fn materialized(json: &str) -> PipelineContext {
        let model = Model::from_json(json).unwrap();
        let mut ctx = PipelineContext::new(model, PipelineOptions::default());
        materialize::run(&mut ctx).unwrap();
        ctx
    }

    fn count_calls(ctx: &PipelineContext, name: &str) -> usize {
        ctx.program
            .all_live_methods()
            .into_iter()
            .map(|m| {
                ctx.program
                    .method(m)
                    .body
                    .invokes()
                    .filter(|(_, i)| i.method.name == name)
                    .count()
            })
            .sum()
    }

    const WRITTEN: &str = r#"{
        "name": "W",
        "parameters": [
            {"name": "a", "expression": "1"},
            {"name": "b", "expression": "a + 1"},
            {"name": "k", "expression": "4"}
        ],
        "entities": [
            {"name": "src", "kind": "Ramp"},
            {"name": "set", "kind": "SetVariable", "parameters": [{"name": "variableName", "expression": "a"}]}
        ],
        "relations": [{"name": "r", "links": ["src.output", "set.input"]}]
    }"#;

    #[test]
    fn constant_parameter_becomes_tagged_immutable_field() {
        let mut ctx = materialized(r#"{"name": "M", "parameters": [{"name": "x", "expression": "2+3"}]}"#);
        run(&mut ctx).unwrap();
        let class = ctx.class_for_object(ctx.model.top).unwrap();
        let field = ctx.program.field_by_name(class, "_CGvalue_x").unwrap();
        let f = ctx.program.field(field);
        assert!(f.is_final);
        assert_eq!(f.initial, Some(Token::Int(5)));
        assert_eq!(ctx.tags.value(field), Some(&Token::Int(5)));
        assert_eq!(ctx.tags.token_type(field), Some(&TokenType::Int));
        assert!(ctx.program.method_by_name(class, "_CGcompute_x").is_none());
    }

    #[test]
    fn parameter_reads_become_field_reads() {
        let mut ctx = materialized(DEMO);
        assert!(count_calls(&ctx, "getToken") > 0);
        run(&mut ctx).unwrap();
        assert_eq!(count_calls(&ctx, "getToken"), 0);
        assert_eq!(count_calls(&ctx, "setExpression"), 0);
    }

    #[test]
    fn written_parameters_get_compute_methods_called_in_order() {
        let mut ctx = materialized(WRITTEN);
        run(&mut ctx).unwrap();
        let top = ctx.class_for_object(ctx.model.top).unwrap();
        let a = ctx.program.method_by_name(top, "_CGcompute_a").unwrap();
        let b = ctx.program.method_by_name(top, "_CGcompute_b").unwrap();
        assert!(ctx.program.method_by_name(top, "_CGcompute_k").is_none());
        let init = ctx.program.method_by_name(top, "<init>").unwrap();
        let calls: Vec<String> = ctx
            .program
            .method(init)
            .body
            .invokes()
            .map(|(_, i)| i.method.name.clone())
            .filter(|n| n.starts_with("_CGcompute_"))
            .collect();
        assert_eq!(calls, vec!["_CGcompute_a", "_CGcompute_b"]);
        let k = ctx.program.field_by_name(top, "_CGvalue_k").unwrap();
        assert!(ctx.program.field(k).is_final);
        let a_field = ctx.program.field_by_name(top, "_CGvalue_a").unwrap();
        assert!(!ctx.program.field(a_field).is_final);
        let _ = (a, b);
    }

    #[test]
    fn writing_a_constant_is_an_inconsistency() {
        let mut ctx = materialized(DEMO);
        let scale = ctx.model.by_name("Demo.scale").unwrap();
        let class = ctx.class_for_object(scale).unwrap();
        let fire = ctx.program.method_by_name(class, "fire").unwrap();
        let body = &mut ctx.program.method_mut(fire).body;
        let this = body.this_local.unwrap();
        let mut em = Emitter::new(body);
        let p = em.lookup(this, Lookup::Attribute, "factor", Type::object(kernel::PARAMETER));
        em.call(p, framework::set_token(), vec![Operand::Const(Constant::Null)]);
        let stmts = em.finish();
        body.insert_before_return(stmts);

        let err = run(&mut ctx).unwrap_err();
        assert!(matches!(err, SpecError::Inconsistency { .. }));
        assert!(err.to_string().contains("Demo.scale.factor"), "{err}");
    }

    #[test]
    fn editor_calls_are_dropped() {
        let mut ctx = materialized(DEMO);
        let top = ctx.class_for_object(ctx.model.top).unwrap();
        let init = ctx.program.method_by_name(top, "<init>").unwrap();
        let body = &mut ctx.program.method_mut(init).body;
        let this = body.this_local.unwrap();
        let mut em = Emitter::new(body);
        let p = em.lookup(this, Lookup::Attribute, "gain", Type::object(kernel::PARAMETER));
        em.call(p, framework::set_persistent(), vec![Operand::Const(Constant::Bool(false))]);
        let stmts = em.finish();
        body.insert_before_return(stmts);

        run(&mut ctx).unwrap();
        assert_eq!(count_calls(&ctx, "setPersistent"), 0);
    }

    #[test]
    fn writes_recompute_dependents_and_notify() {
        let mut ctx = materialized(WRITTEN);
        // Resolve the variable name, then the variable, over a few rounds.
        for _ in 0..4 {
            run(&mut ctx).unwrap();
            crate::reducers::fields_for_attributes(&mut ctx).unwrap();
            crate::cleanup::run(&mut ctx).unwrap();
        }
        assert_eq!(count_calls(&ctx, "setToken"), 0);
        let set = ctx.model.by_name("W.set").unwrap();
        let class = ctx.class_for_object(set).unwrap();
        let fire = ctx.program.method_by_name(class, "fire").unwrap();
        let names: Vec<String> = ctx
            .program
            .method(fire)
            .body
            .invokes()
            .map(|(_, i)| i.method.name.clone())
            .collect();
        assert!(names.iter().any(|n| n == "_CGcompute_b"), "{names:?}");
    }
}
