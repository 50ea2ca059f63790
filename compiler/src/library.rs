// library.rs — Catalogue of supported actor kinds and their code templates
//
// Every atomic actor kind the specializer can compile is described here: its
// ports, its parameters with defaults, the rule giving its output type, and
// the generic lifecycle code of the library actor. Templates are written the
// way the runtime library writes them, with dynamic lookups by name; the
// reduction passes are what turn them into direct field accesses.
//
// Preconditions: the actor's class and lifecycle methods exist.
// Postconditions: the lifecycle bodies end in a return.
// Failure modes: `SpecError::Inconsistency` when an expected method is
//   missing; expression code generation errors for `Expression` actors.
// Side effects: adds state fields and methods to the actor's class.

use crate::builder::Emitter;
use crate::codegen::{Binding, ExprGen};
use crate::context::PipelineContext;
use crate::error::{Result, SpecError};
use crate::framework::{self, data, kernel};
use crate::id::{ClassId, FieldId, LocalId, ObjId};
use crate::ir::{BinOp, Constant, Operand, Rvalue, Type};
use crate::model::{AttributeKind, Lookup};
use crate::types::{TokenType, INCOMPARABLE};

pub const INPUT: &str = "input";
pub const OUTPUT: &str = "output";
pub const VARIABLE_NAME: &str = "variableName";
pub const EXPRESSION: &str = "expression";

// ── Catalogue ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorKind {
    Const,
    Ramp,
    Scale,
    AddSubtract,
    AbsoluteValue,
    Accumulator,
    Expression,
    SetVariable,
    Recorder,
}

pub struct PortDecl {
    pub name: &'static str,
    pub input: bool,
    pub output: bool,
    pub multiport: bool,
    pub ty: Option<&'static str>,
}

pub struct ParamDecl {
    pub name: &'static str,
    pub default: &'static str,
    pub kind: AttributeKind,
    pub ty: Option<&'static str>,
}

pub struct ActorDecl {
    pub ports: &'static [PortDecl],
    pub params: &'static [ParamDecl],
}

const fn input(name: &'static str) -> PortDecl {
    PortDecl {
        name,
        input: true,
        output: false,
        multiport: false,
        ty: None,
    }
}

const fn output(name: &'static str) -> PortDecl {
    PortDecl {
        name,
        input: false,
        output: true,
        multiport: false,
        ty: None,
    }
}

const fn param(name: &'static str, default: &'static str) -> ParamDecl {
    ParamDecl {
        name,
        default,
        kind: AttributeKind::Parameter,
        ty: None,
    }
}

const fn string_attr(name: &'static str) -> ParamDecl {
    ParamDecl {
        name,
        default: "",
        kind: AttributeKind::StringAttribute,
        ty: None,
    }
}

static CONST: ActorDecl = ActorDecl {
    ports: &[output(OUTPUT)],
    params: &[param("value", "1")],
};
static RAMP: ActorDecl = ActorDecl {
    ports: &[output(OUTPUT)],
    params: &[param("init", "0"), param("step", "1")],
};
static SCALE: ActorDecl = ActorDecl {
    ports: &[input(INPUT), output(OUTPUT)],
    params: &[param("factor", "1")],
};
static ADD_SUBTRACT: ActorDecl = ActorDecl {
    ports: &[input("plus"), input("minus"), output(OUTPUT)],
    params: &[],
};
static ABSOLUTE_VALUE: ActorDecl = ActorDecl {
    ports: &[input(INPUT), output(OUTPUT)],
    params: &[],
};
static ACCUMULATOR: ActorDecl = ActorDecl {
    ports: &[input(INPUT), output(OUTPUT)],
    params: &[param("init", "0")],
};
static EXPRESSION_DECL: ActorDecl = ActorDecl {
    ports: &[output(OUTPUT)],
    params: &[string_attr(EXPRESSION)],
};
static SET_VARIABLE: ActorDecl = ActorDecl {
    ports: &[input(INPUT), output(OUTPUT)],
    params: &[string_attr(VARIABLE_NAME)],
};
static RECORDER: ActorDecl = ActorDecl {
    ports: &[input(INPUT)],
    params: &[],
};

pub const ALL_KINDS: [ActorKind; 9] = [
    ActorKind::Const,
    ActorKind::Ramp,
    ActorKind::Scale,
    ActorKind::AddSubtract,
    ActorKind::AbsoluteValue,
    ActorKind::Accumulator,
    ActorKind::Expression,
    ActorKind::SetVariable,
    ActorKind::Recorder,
];

impl ActorKind {
    pub fn parse(name: &str) -> Option<ActorKind> {
        ALL_KINDS.iter().copied().find(|k| k.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            ActorKind::Const => "Const",
            ActorKind::Ramp => "Ramp",
            ActorKind::Scale => "Scale",
            ActorKind::AddSubtract => "AddSubtract",
            ActorKind::AbsoluteValue => "AbsoluteValue",
            ActorKind::Accumulator => "Accumulator",
            ActorKind::Expression => "Expression",
            ActorKind::SetVariable => "SetVariable",
            ActorKind::Recorder => "Recorder",
        }
    }

    pub fn decl(self) -> &'static ActorDecl {
        match self {
            ActorKind::Const => &CONST,
            ActorKind::Ramp => &RAMP,
            ActorKind::Scale => &SCALE,
            ActorKind::AddSubtract => &ADD_SUBTRACT,
            ActorKind::AbsoluteValue => &ABSOLUTE_VALUE,
            ActorKind::Accumulator => &ACCUMULATOR,
            ActorKind::Expression => &EXPRESSION_DECL,
            ActorKind::SetVariable => &SET_VARIABLE,
            ActorKind::Recorder => &RECORDER,
        }
    }

    /// Only `Expression` actors take user-declared input ports.
    pub fn accepts_extra_ports(self) -> bool {
        self == ActorKind::Expression
    }
}

/// Static output type of a library actor given the types of its inputs and
/// parameters. `None` while an input is still unresolved.
pub fn output_type(
    kind: ActorKind,
    port: &str,
    lookup: &dyn Fn(&str) -> Option<TokenType>,
) -> Option<TokenType> {
    if port != OUTPUT {
        return None;
    }
    let join = |a: &str, b: &str| Some(lookup(a)?.lub(&lookup(b)?));
    match kind {
        ActorKind::Const => lookup("value"),
        ActorKind::Ramp => join("init", "step"),
        ActorKind::Scale => join(INPUT, "factor"),
        ActorKind::AddSubtract => match (lookup("plus"), lookup("minus")) {
            (Some(a), Some(b)) => Some(a.lub(&b)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        },
        ActorKind::AbsoluteValue => match lookup(INPUT)? {
            TokenType::Complex => Some(TokenType::Double),
            t => Some(t),
        },
        ActorKind::Accumulator => join(INPUT, "init"),
        ActorKind::SetVariable => lookup(INPUT),
        ActorKind::Expression | ActorKind::Recorder => None,
    }
}

// ── Rejections ──────────────────────────────────────────────────────────────

/// Why a kind outside the catalogue cannot be specialized.
pub fn unsupported_reason(kind: &str) -> &'static str {
    match kind {
        "MathFunction" | "TrigFunction" => "it dynamically creates ports",
        "ArraySort" | "ArrayPeakSearch" => "it creates array tokens from lists",
        "TypeTest" => "it walks around the model",
        "RecordAssembler" | "RecordDisassembler" | "BusAssembler" | "BusDisassembler" => {
            "it iterates over ports"
        }
        "ExpressionToToken" | "ExpressionReader" => "it evaluates expressions at run time",
        _ => "it is not in the library catalogue",
    }
}

/// Attributes that only the graphical editor reads.
pub fn is_editor_attribute(name: &str) -> bool {
    matches!(
        name,
        "_location"
            | "_showName"
            | "_hideName"
            | "_windowProperties"
            | "_iconDescription"
            | "_documentation"
            | "_size"
            | "_color"
    ) || name.starts_with("_vergil")
}

/// Stable rendering of the catalogue, for provenance hashing.
pub fn fingerprint() -> String {
    let mut out = String::new();
    for kind in ALL_KINDS {
        let decl = kind.decl();
        out.push_str(kind.name());
        for p in decl.ports {
            out.push_str(&format!(" {}:{}{}", p.name, p.input as u8, p.output as u8));
        }
        for p in decl.params {
            out.push_str(&format!(" {}={:?}", p.name, p.default));
        }
        out.push('\n');
    }
    out
}

// ── Templates ───────────────────────────────────────────────────────────────

/// Add the state fields and lifecycle code of the library actor `actor`
/// to `class`.
pub fn install(ctx: &mut PipelineContext, actor: ObjId, class: ClassId, kind: ActorKind) -> Result<()> {
    match kind {
        ActorKind::Const => {
            build(ctx, class, "fire", |em, _| {
                let this = receiver(em)?;
                let value = parameter_token(em, this, "value");
                let out = port(em, this, OUTPUT);
                em.send(out, value);
                em.ret(None);
                Ok(())
            })
        }
        ActorKind::Ramp => install_ramp(ctx, class),
        ActorKind::Scale => build(ctx, class, "fire", |em, _| {
            let this = receiver(em)?;
            let end = em.label();
            let inp = port(em, this, INPUT);
            let t = em.read_input(inp, end);
            let factor = parameter_token(em, this, "factor");
            let r = token_call(em, factor, "multiply", t);
            let out = port(em, this, OUTPUT);
            em.send(out, r);
            em.place(end);
            em.ret(None);
            Ok(())
        }),
        ActorKind::AddSubtract => install_add_subtract(ctx, class),
        ActorKind::AbsoluteValue => install_absolute_value(ctx, class),
        ActorKind::Accumulator => install_accumulator(ctx, class),
        ActorKind::Expression => install_expression(ctx, actor, class),
        ActorKind::SetVariable => install_set_variable(ctx, actor, class),
        ActorKind::Recorder => install_recorder(ctx, class),
    }
}

fn install_ramp(ctx: &mut PipelineContext, class: ClassId) -> Result<()> {
    let state = token_field(ctx, class, "_state");
    build(ctx, class, "initialize", |em, _| {
        let this = receiver(em)?;
        let init = parameter_token(em, this, "init");
        em.field_store(this, state, init.into());
        em.ret(None);
        Ok(())
    })?;
    build(ctx, class, "fire", |em, _| {
        let this = receiver(em)?;
        let s = em.field_read("state", framework::token_type(), this, state);
        let out = port(em, this, OUTPUT);
        em.send(out, s);
        em.ret(None);
        Ok(())
    })?;
    build(ctx, class, "postfire", |em, _| {
        let this = receiver(em)?;
        let step = parameter_token(em, this, "step");
        let s = em.field_read("state", framework::token_type(), this, state);
        let next = token_call(em, s, "add", step);
        em.field_store(this, state, next.into());
        em.ret(Some(Operand::Const(Constant::Bool(true))));
        Ok(())
    })?;
    // A new initial value restarts the ramp.
    build(ctx, class, "attributeChanged", |em, _| {
        let this = receiver(em)?;
        let changed = em
            .param(0)
            .ok_or_else(|| SpecError::inconsistency("Ramp template", "attributeChanged has no parameter"))?;
        let done = em.label();
        let init = parameter(em, this, "init");
        em.branch(BinOp::Ne, changed.into(), init.into(), done);
        let t = em.call_value(init, framework::get_token(), vec![]);
        em.field_store(this, state, t.into());
        em.place(done);
        em.ret(None);
        Ok(())
    })
}

fn install_add_subtract(ctx: &mut PipelineContext, class: ClassId) -> Result<()> {
    build(ctx, class, "fire", |em, _| {
        let this = receiver(em)?;
        let sum = em.temp("sum", framework::token_type());
        em.assign(sum, Rvalue::Use(Operand::Const(Constant::Null)));
        for (name, op) in [("plus", "add"), ("minus", "subtract")] {
            let skip = em.label();
            let p = port(em, this, name);
            let t = em.read_input(p, skip);
            let first = em.label();
            let joined = em.label();
            em.branch(BinOp::Eq, sum.into(), Operand::Const(Constant::Null), first);
            let acc = token_call(em, sum, op, t);
            em.assign(sum, Rvalue::Use(acc.into()));
            em.goto(joined);
            em.place(first);
            if op == "subtract" {
                let neg = em.call_value(t, framework::token_unary(data::TOKEN, "negate"), vec![]);
                em.assign(sum, Rvalue::Use(neg.into()));
            } else {
                em.assign(sum, Rvalue::Use(t.into()));
            }
            em.place(joined);
            em.place(skip);
        }
        let done = em.label();
        em.branch(BinOp::Eq, sum.into(), Operand::Const(Constant::Null), done);
        let out = port(em, this, OUTPUT);
        em.send(out, sum);
        em.place(done);
        em.ret(None);
        Ok(())
    })
}

fn install_absolute_value(ctx: &mut PipelineContext, class: ClassId) -> Result<()> {
    build(ctx, class, "fire", |em, _| {
        let this = receiver(em)?;
        let end = em.label();
        let inp = port(em, this, INPUT);
        let t = em.read_input(inp, end);
        let result = em.temp("result", framework::token_type());
        let scalar = em.label();
        let send = em.label();
        let is_complex = em.value(
            "isComplex",
            Type::Boolean,
            Rvalue::InstanceOf(data::COMPLEX_TOKEN.to_string(), t.into()),
        );
        em.branch_false(is_complex, scalar);
        let c = em.cast("complex", Type::object(data::COMPLEX_TOKEN), t.into());
        let mag = em.call_value(c, framework::token_unary(data::COMPLEX_TOKEN, "absolute"), vec![]);
        em.assign(result, Rvalue::Use(mag.into()));
        em.goto(send);
        em.place(scalar);
        let s = em.cast("scalar", Type::object(data::SCALAR_TOKEN), t.into());
        let abs = em.call_value(s, framework::token_unary(data::SCALAR_TOKEN, "absolute"), vec![]);
        em.assign(result, Rvalue::Use(abs.into()));
        em.place(send);
        let out = port(em, this, OUTPUT);
        em.send(out, result);
        em.place(end);
        em.ret(None);
        Ok(())
    })
}

fn install_accumulator(ctx: &mut PipelineContext, class: ClassId) -> Result<()> {
    let sum = token_field(ctx, class, "_sum");
    let pending = token_field(ctx, class, "_pending");
    build(ctx, class, "initialize", |em, _| {
        let this = receiver(em)?;
        let init = parameter_token(em, this, "init");
        em.field_store(this, sum, init.into());
        em.field_store(this, pending, Operand::Const(Constant::Null));
        em.ret(None);
        Ok(())
    })?;
    build(ctx, class, "fire", |em, _| {
        let this = receiver(em)?;
        let end = em.label();
        let ok = em.label();
        let inp = port(em, this, INPUT);
        let t = em.read_input(inp, end);
        let s = em.field_read("sum", framework::token_type(), this, sum);
        let order = em
            .call_static(framework::type_lattice_compare(), vec![s.into(), t.into()])
            .ok_or_else(|| SpecError::inconsistency("Accumulator template", "compare is void"))?;
        em.branch(BinOp::Ne, order.into(), Operand::int(INCOMPARABLE), ok);
        em.throw_runtime("incomparable token types in accumulation");
        em.place(ok);
        let next = token_call(em, s, "add", t);
        em.field_store(this, pending, next.into());
        let out = port(em, this, OUTPUT);
        em.send(out, next);
        em.place(end);
        em.ret(None);
        Ok(())
    })?;
    build(ctx, class, "postfire", |em, _| {
        let this = receiver(em)?;
        let done = em.label();
        let p = em.field_read("pending", framework::token_type(), this, pending);
        em.branch(BinOp::Eq, p.into(), Operand::Const(Constant::Null), done);
        em.field_store(this, sum, p.into());
        em.field_store(this, pending, Operand::Const(Constant::Null));
        em.place(done);
        em.ret(Some(Operand::Const(Constant::Bool(true))));
        Ok(())
    })
}

fn install_expression(ctx: &mut PipelineContext, actor: ObjId, class: ClassId) -> Result<()> {
    let attr = ctx
        .model
        .attribute(actor, EXPRESSION)
        .ok_or_else(|| SpecError::inconsistency("Expression template", "no expression attribute"))?;
    let Some(expr) = ctx.model.parse(attr)? else {
        // An empty expression produces nothing.
        return Ok(());
    };
    let inputs: Vec<(String, TokenType)> = ctx
        .model
        .object(actor)
        .ports
        .iter()
        .filter(|p| ctx.model.port(**p).is_some_and(|i| i.input))
        .map(|p| (ctx.model.object(*p).name.clone(), ctx.model.port_type(*p)))
        .collect();
    let subject = ctx.model.name(attr).to_string();
    let method = ctx.method_of(class, "fire")?;
    let mut body = ctx.take_body(method);
    body.stmts.clear();
    let result = {
        let mut em = Emitter::new(&mut body);
        emit_expression_fire(ctx, &mut em, actor, class, &subject, &inputs, &expr)
            .map(|()| em.append())
    };
    ctx.put_body(method, body);
    result.map(|_| ())
}

fn emit_expression_fire(
    ctx: &mut PipelineContext,
    em: &mut Emitter,
    actor: ObjId,
    class: ClassId,
    subject: &str,
    inputs: &[(String, TokenType)],
    expr: &crate::ast::Expr,
) -> Result<()> {
    let this = receiver(em)?;
    let end = em.label();
    let mut gen = ExprGen::new(ctx, class, Some(actor), Some(actor), subject);
    for (name, ty) in inputs {
        let p = port(em, this, name);
        let t = em.read_input(p, end);
        gen.bind(name, Binding::Token {
            local: t,
            ty: ty.clone(),
        });
    }
    let (value, _) = gen.emit(em, expr)?;
    let out = port(em, this, OUTPUT);
    em.send(out, value);
    em.place(end);
    em.ret(None);
    Ok(())
}

fn install_set_variable(ctx: &mut PipelineContext, actor: ObjId, class: ClassId) -> Result<()> {
    let container = ctx
        .model
        .container(actor)
        .ok_or_else(|| SpecError::inconsistency("SetVariable template", "actor has no container"))?;
    // The named variable may live further up the container chain.
    let scope = ctx
        .model
        .set_variable_target(actor)
        .and_then(|v| ctx.model.container(v))
        .unwrap_or(container);
    build(ctx, class, "fire", |em, ctx| {
        let this = receiver(em)?;
        let end = em.label();
        let inp = port(em, this, INPUT);
        let t = em.read_input(inp, end);
        let owner = ctx.reference_path(em, this, actor, scope)?;
        let name_attr = em.lookup(
            this,
            Lookup::Attribute,
            VARIABLE_NAME,
            Type::object(kernel::STRING_ATTRIBUTE),
        );
        let name = em.call_value(name_attr, framework::get_expression(), vec![]);
        let raw = em.call_value(owner, framework::get_attribute(), vec![name.into()]);
        let var = em.cast("variable", Type::object(kernel::VARIABLE), raw.into());
        em.call(var, framework::set_token(), vec![t.into()]);
        let out = port(em, this, OUTPUT);
        em.send(out, t);
        em.place(end);
        em.ret(None);
        Ok(())
    })
}

fn install_recorder(ctx: &mut PipelineContext, class: ClassId) -> Result<()> {
    let latest = token_field(ctx, class, "_latest");
    ctx.program
        .add_method(class, "latest", vec![], framework::token_type(), false);
    build(ctx, class, "fire", |em, _| {
        let this = receiver(em)?;
        let end = em.label();
        let inp = port(em, this, INPUT);
        let t = em.read_input(inp, end);
        em.field_store(this, latest, t.into());
        em.place(end);
        em.ret(None);
        Ok(())
    })?;
    build(ctx, class, "latest", |em, _| {
        let this = receiver(em)?;
        let l = em.field_read("latest", framework::token_type(), this, latest);
        em.ret(Some(l.into()));
        Ok(())
    })
}

// ── Template helpers ──

/// Replace the body of `class.name` with the statements `f` emits.
fn build(
    ctx: &mut PipelineContext,
    class: ClassId,
    name: &str,
    f: impl FnOnce(&mut Emitter, &PipelineContext) -> Result<()>,
) -> Result<()> {
    let method = match ctx.program.method_by_name(class, name) {
        Some(m) => m,
        None if name == "attributeChanged" => ctx.program.add_method(
            class,
            name,
            vec![Type::object(kernel::ATTRIBUTE)],
            Type::Void,
            false,
        ),
        None => ctx.method_of(class, name)?,
    };
    let mut body = ctx.take_body(method);
    body.stmts.clear();
    let result = {
        let mut em = Emitter::new(&mut body);
        f(&mut em, ctx).map(|()| em.append())
    };
    ctx.put_body(method, body);
    result.map(|_| ())
}

fn token_field(ctx: &mut PipelineContext, class: ClassId, name: &str) -> FieldId {
    ctx.program.add_field(class, name, framework::token_type())
}

fn receiver(em: &Emitter) -> Result<LocalId> {
    em.this()
        .ok_or_else(|| SpecError::inconsistency("library template", "method has no receiver"))
}

fn port(em: &mut Emitter, this: LocalId, name: &str) -> LocalId {
    em.lookup(this, Lookup::Port, name, Type::object(kernel::PORT))
}

fn parameter(em: &mut Emitter, this: LocalId, name: &str) -> LocalId {
    em.lookup(this, Lookup::Attribute, name, Type::object(kernel::PARAMETER))
}

fn parameter_token(em: &mut Emitter, this: LocalId, name: &str) -> LocalId {
    let p = parameter(em, this, name);
    em.call_value(p, framework::get_token(), vec![])
}

fn token_call(em: &mut Emitter, base: LocalId, op: &str, arg: LocalId) -> LocalId {
    em.call_value(base, framework::token_binary(op), vec![arg.into()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn types(pairs: &[(&str, TokenType)]) -> HashMap<String, TokenType> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn scale_output_joins_input_and_factor() {
        let env = types(&[(INPUT, TokenType::Int), ("factor", TokenType::Double)]);
        let lookup = |n: &str| env.get(n).cloned();
        assert_eq!(
            output_type(ActorKind::Scale, OUTPUT, &lookup),
            Some(TokenType::Double)
        );
    }

    #[test]
    fn unresolved_input_leaves_output_open() {
        let env = types(&[("factor", TokenType::Double)]);
        let lookup = |n: &str| env.get(n).cloned();
        assert_eq!(output_type(ActorKind::Scale, OUTPUT, &lookup), None);
    }

    #[test]
    fn absolute_value_of_complex_is_double() {
        let env = types(&[(INPUT, TokenType::Complex)]);
        let lookup = |n: &str| env.get(n).cloned();
        assert_eq!(
            output_type(ActorKind::AbsoluteValue, OUTPUT, &lookup),
            Some(TokenType::Double)
        );
    }

    #[test]
    fn kinds_round_trip_through_names() {
        for kind in ALL_KINDS {
            assert_eq!(ActorKind::parse(kind.name()), Some(kind));
        }
        assert_eq!(ActorKind::parse("MathFunction"), None);
        assert_eq!(unsupported_reason("MathFunction"), "it dynamically creates ports");
    }

    #[test]
    fn editor_attributes() {
        assert!(is_editor_attribute("_location"));
        assert!(is_editor_attribute("_vergilSize"));
        assert!(!is_editor_attribute("factor"));
    }
}
