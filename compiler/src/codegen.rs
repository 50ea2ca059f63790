// codegen.rs — Attribute expressions to IR statements
//
// Emits straight-line token code for a parsed expression: literals become
// token constructions, operators become token method calls, `&&`/`||` and
// `?:` become branches, built-in functions become calls to their native
// implementations with accessor/wrapper conversions, and function literals
// become synthesized closure classes.
//
// Preconditions: identifiers that are not bound locally name variables
//   reachable from the scope owner, or built-in constants.
// Postconditions: the returned local holds a token of the returned static
//   type (or a subtype of it).
// Failure modes:
//   - `SpecError::Unsupported` for calls that need a run-time interpreter
//     (`eval`, `matlab`) or have no native conversion for the argument types.
//   - `SpecError::Expression` for undefined identifiers.
// Side effects: allocates locals and labels; adds closure classes to the
//   program.

use std::collections::BTreeMap;

use crate::ast::{
    BitwiseOp, Expr, Literal, LogicOp, ProductOp, RelOp, ShiftKind, SumOp, UnaryOp,
};
use crate::builder::Emitter;
use crate::context::PipelineContext;
use crate::error::{Result, SpecError};
use crate::framework::{self, data};
use crate::id::{ClassId, FieldId, LocalId, ObjId};
use crate::ir::{ClassKind, Constant, MethodRef, Operand, Rvalue, Type};
use crate::native::{self, CallKind, NativeFunction, NativeKind, Target};
use crate::token::Token;
use crate::types::TokenType;

/// What a name in the expression stands for.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// A token already held in a local.
    Token { local: LocalId, ty: TokenType },
    /// A model variable, read through its attribute.
    Variable(ObjId),
}

pub struct ExprGen<'c> {
    ctx: &'c mut PipelineContext,
    /// Class the statements are emitted into.
    owner: ClassId,
    /// Model object the owner class stands for; `None` inside closures.
    this_obj: Option<ObjId>,
    /// Object whose container chain resolves free identifiers.
    scope_owner: Option<ObjId>,
    subject: String,
    bindings: BTreeMap<String, Binding>,
}

impl<'c> ExprGen<'c> {
    pub fn new(
        ctx: &'c mut PipelineContext,
        owner: ClassId,
        this_obj: Option<ObjId>,
        scope_owner: Option<ObjId>,
        subject: &str,
    ) -> Self {
        Self {
            ctx,
            owner,
            this_obj,
            scope_owner,
            subject: subject.to_string(),
            bindings: BTreeMap::new(),
        }
    }

    pub fn bind(&mut self, name: &str, binding: Binding) {
        self.bindings.insert(name.to_string(), binding);
    }

    fn lookup(&self, name: &str) -> Option<Binding> {
        if let Some(b) = self.bindings.get(name) {
            return Some(b.clone());
        }
        let owner = self.scope_owner?;
        self.ctx
            .model
            .resolve_identifier(owner, name)
            .map(Binding::Variable)
    }

    fn unsupported(&self, construct: impl Into<String>, reason: &str) -> SpecError {
        SpecError::unsupported(self.subject.clone(), construct, reason)
    }

    /// Emit `expr`; returns the local holding its token and its static type.
    pub fn emit(&mut self, em: &mut Emitter, expr: &Expr) -> Result<(LocalId, TokenType)> {
        match expr {
            Expr::Literal(lit) => Ok(literal(em, lit)),
            Expr::Ident(name) => self.identifier(em, name),
            Expr::Sum { first, rest } => {
                let (mut acc, mut ty) = self.emit(em, first)?;
                for (op, e) in rest {
                    let (v, t) = self.emit(em, e)?;
                    let name = match op {
                        SumOp::Add => "add",
                        SumOp::Subtract => "subtract",
                    };
                    acc = em.call_value(acc, framework::token_binary(name), vec![v.into()]);
                    ty = ty.lub(&t);
                }
                Ok((acc, ty))
            }
            Expr::Product { first, rest } => {
                let (mut acc, mut ty) = self.emit(em, first)?;
                for (op, e) in rest {
                    let (v, t) = self.emit(em, e)?;
                    let name = match op {
                        ProductOp::Multiply => "multiply",
                        ProductOp::Divide => "divide",
                        ProductOp::Modulo => "modulo",
                    };
                    acc = em.call_value(acc, framework::token_binary(name), vec![v.into()]);
                    ty = ty.lub(&t);
                }
                Ok((acc, ty))
            }
            Expr::Power { base, exponent } => {
                let (b, ty) = self.emit(em, base)?;
                let (e, _) = self.emit(em, exponent)?;
                let times = int_value(em, e);
                let r = em.call_value(
                    b,
                    framework::token_int_arg(data::TOKEN, "pow"),
                    vec![times.into()],
                );
                Ok((r, ty))
            }
            Expr::Relational { op, lhs, rhs } => {
                let (a, _) = self.emit(em, lhs)?;
                let (b, _) = self.emit(em, rhs)?;
                Ok((relational(em, *op, a, b), TokenType::Boolean))
            }
            Expr::Logical { op, operands } => self.logical(em, *op, operands),
            Expr::Bitwise { op, operands } => {
                let name = match op {
                    BitwiseOp::And => "bitwiseAnd",
                    BitwiseOp::Or => "bitwiseOr",
                    BitwiseOp::Xor => "bitwiseXor",
                };
                let mut iter = operands.iter();
                let first = iter
                    .next()
                    .ok_or_else(|| SpecError::expression(self.subject.clone(), "empty bitwise chain"))?;
                let (mut acc, mut ty) = self.emit(em, first)?;
                for e in iter {
                    let (v, t) = self.emit(em, e)?;
                    acc = em.call_value(acc, framework::token_binary(name), vec![v.into()]);
                    ty = ty.lub(&t);
                }
                Ok((acc, ty))
            }
            Expr::Shift { op, lhs, rhs } => {
                let (a, ty) = self.emit(em, lhs)?;
                let (b, _) = self.emit(em, rhs)?;
                let bits = int_value(em, b);
                let name = match op {
                    ShiftKind::Left => "leftShift",
                    ShiftKind::Right => "rightShift",
                    ShiftKind::LogicalRight => "logicalRightShift",
                };
                let s = em.cast("scalar", Type::object(data::SCALAR_TOKEN), a.into());
                let r = em.call_value(
                    s,
                    framework::token_int_arg(data::SCALAR_TOKEN, name),
                    vec![bits.into()],
                );
                Ok((r, ty))
            }
            Expr::Unary { op, operand } => {
                let (v, ty) = self.emit(em, operand)?;
                Ok(match op {
                    UnaryOp::Negate => (
                        em.call_value(v, framework::token_unary(data::TOKEN, "negate"), vec![]),
                        ty,
                    ),
                    UnaryOp::Not => (not(em, v), TokenType::Boolean),
                    UnaryOp::BitwiseNot => {
                        let s = em.cast("scalar", Type::object(data::SCALAR_TOKEN), v.into());
                        (
                            em.call_value(
                                s,
                                framework::token_unary(data::SCALAR_TOKEN, "bitwiseNot"),
                                vec![],
                            ),
                            ty,
                        )
                    }
                })
            }
            Expr::Cond {
                cond,
                then,
                otherwise,
            } => {
                let (c, _) = self.emit(em, cond)?;
                let flag = boolean_value(em, c);
                let result = em.temp("choice", framework::token_type());
                let other = em.label();
                let end = em.label();
                em.branch_false(flag, other);
                let (a, ta) = self.emit(em, then)?;
                em.assign(result, Rvalue::Use(a.into()));
                em.goto(end);
                em.place(other);
                let (b, tb) = self.emit(em, otherwise)?;
                em.assign(result, Rvalue::Use(b.into()));
                em.place(end);
                Ok((result, ta.lub(&tb)))
            }
            Expr::Apply { func, args } => self.apply(em, func, args),
            Expr::MethodCall { base, name, args } => {
                let mut values = vec![self.emit(em, base)?];
                for a in args {
                    values.push(self.emit(em, a)?);
                }
                self.native_call(em, name, CallKind::Method, values)
            }
            Expr::Member { base, name } => {
                let (b, ty) = self.emit(em, base)?;
                let field_ty = match &ty {
                    TokenType::Record(fields) => fields.get(name).cloned().ok_or_else(|| {
                        SpecError::expression(self.subject.clone(), format!("record has no field '{name}'"))
                    })?,
                    other => {
                        return Err(self.unsupported(
                            format!("member access '.{name}' on {other}"),
                            "only records have named fields",
                        ))
                    }
                };
                let rec = em.cast("record", Type::object(data::RECORD_TOKEN), b.into());
                let r = em.call_value(rec, framework::record_get(), vec![Operand::str(name)]);
                Ok((r, field_ty))
            }
            Expr::Array(items) => {
                let mut values = Vec::new();
                let mut elem: Option<TokenType> = None;
                for e in items {
                    let (v, t) = self.emit(em, e)?;
                    elem = Some(match elem {
                        Some(acc) => acc.lub(&t),
                        None => t,
                    });
                    values.push(Operand::Local(v));
                }
                let elem = elem.unwrap_or(TokenType::General);
                let arr = em.new_array("elements", framework::token_type(), values);
                let t = em.new_object(
                    "array",
                    data::ARRAY_TOKEN,
                    vec![Operand::str(&elem.to_string()), arr.into()],
                );
                Ok((t, TokenType::Array(Box::new(elem))))
            }
            Expr::Record(fields) => {
                let mut labels = Vec::new();
                let mut values = Vec::new();
                let mut types = BTreeMap::new();
                for (label, e) in fields {
                    let (v, t) = self.emit(em, e)?;
                    labels.push(Operand::str(label));
                    values.push(Operand::Local(v));
                    types.insert(label.clone(), t);
                }
                let l = em.new_array("labels", Type::String, labels);
                let v = em.new_array("values", framework::token_type(), values);
                let t = em.new_object("record", data::RECORD_TOKEN, vec![l.into(), v.into()]);
                Ok((t, TokenType::Record(types)))
            }
            Expr::Matrix(rows) => {
                let cols = rows.first().map_or(0, Vec::len);
                let mut values = Vec::new();
                let mut elem: Option<TokenType> = None;
                for row in rows {
                    if row.len() != cols {
                        return Err(SpecError::expression(
                            self.subject.clone(),
                            "matrix rows differ in length",
                        ));
                    }
                    for e in row {
                        let (v, t) = self.emit(em, e)?;
                        elem = Some(match elem {
                            Some(acc) => acc.lub(&t),
                            None => t,
                        });
                        values.push(Operand::Local(v));
                    }
                }
                let ty = TokenType::Matrix(Box::new(elem.unwrap_or(TokenType::General)));
                let arr = em.new_array("elements", framework::token_type(), values);
                let m = em
                    .call_static(
                        framework::array_to_matrix(ty.token_class()),
                        vec![arr.into(), Operand::int(rows.len() as i32), Operand::int(cols as i32)],
                    )
                    .ok_or_else(|| SpecError::inconsistency("codegen", "arrayToMatrix is void"))?;
                Ok((m, ty))
            }
            Expr::Function { params, body } => self.function(em, params, body),
        }
    }

    fn identifier(&mut self, em: &mut Emitter, name: &str) -> Result<(LocalId, TokenType)> {
        match self.lookup(name) {
            Some(Binding::Token { local, ty }) => Ok((local, ty)),
            Some(Binding::Variable(var)) => self.read_variable(em, var),
            None => match native::constant(name) {
                Some(token) => {
                    let ty = token.token_type();
                    Ok((emit_token(em, &token).map_err(|m| self.unsupported(name, &m))?, ty))
                }
                None => Err(SpecError::expression(
                    self.subject.clone(),
                    format!("undefined identifier '{name}'"),
                )),
            },
        }
    }

    fn read_variable(&mut self, em: &mut Emitter, var: ObjId) -> Result<(LocalId, TokenType)> {
        let (this_obj, this) = match (self.this_obj, em.this()) {
            (Some(o), Some(t)) => (o, t),
            _ => {
                return Err(SpecError::inconsistency(
                    "codegen",
                    format!("{}: variable read outside an actor", self.subject),
                ))
            }
        };
        let attr = self.ctx.reference_path(em, this, this_obj, var)?;
        let t = em.call_value(attr, framework::get_token(), vec![]);
        Ok((t, self.ctx.model.variable_type(var)))
    }

    fn logical(&mut self, em: &mut Emitter, op: LogicOp, operands: &[Expr]) -> Result<(LocalId, TokenType)> {
        let result = em.temp("logical", framework::token_type());
        let decided = em.label();
        let end = em.label();
        // `&&` stops at the first false operand, `||` at the first true one.
        let stop_on = op == LogicOp::Or;
        for e in operands {
            let (v, _) = self.emit(em, e)?;
            let flag = boolean_value(em, v);
            em.branch(
                crate::ir::BinOp::Eq,
                flag.into(),
                Operand::Const(Constant::Bool(stop_on)),
                decided,
            );
        }
        let all = em.new_object(
            "bool",
            data::BOOLEAN_TOKEN,
            vec![Operand::Const(Constant::Bool(!stop_on))],
        );
        em.assign(result, Rvalue::Use(all.into()));
        em.goto(end);
        em.place(decided);
        let early = em.new_object(
            "bool",
            data::BOOLEAN_TOKEN,
            vec![Operand::Const(Constant::Bool(stop_on))],
        );
        em.assign(result, Rvalue::Use(early.into()));
        em.place(end);
        Ok((result, TokenType::Boolean))
    }

    fn apply(&mut self, em: &mut Emitter, func: &Expr, args: &[Expr]) -> Result<(LocalId, TokenType)> {
        let (value, ty) = match func {
            Expr::Ident(name) => match self.lookup(name) {
                Some(Binding::Token { local, ty }) => (local, ty),
                Some(Binding::Variable(var)) => self.read_variable(em, var)?,
                None => {
                    if native::is_interpreter_escape(name) {
                        return Err(self.unsupported(
                            format!("call to {name}"),
                            "it requires a run-time interpreter",
                        ));
                    }
                    let mut values = Vec::new();
                    for a in args {
                        values.push(self.emit(em, a)?);
                    }
                    return self.native_call(em, name, CallKind::Function, values);
                }
            },
            other => self.emit(em, other)?,
        };
        let mut values = Vec::new();
        for a in args {
            values.push(self.emit(em, a)?);
        }
        match (&ty, values.as_slice()) {
            (TokenType::Array(elem), [(i, _)]) => {
                let index = int_value(em, *i);
                let arr = em.cast("array", Type::object(data::ARRAY_TOKEN), value.into());
                let r = em.call_value(arr, framework::array_get_element(), vec![index.into()]);
                Ok((r, (**elem).clone()))
            }
            (TokenType::Matrix(elem), [(r, _), (c, _)]) => {
                let row = int_value(em, *r);
                let col = int_value(em, *c);
                let m = em.cast("matrix", Type::object(data::MATRIX_TOKEN), value.into());
                let e = em.call_value(m, framework::matrix_get_element(), vec![row.into(), col.into()]);
                Ok((e, (**elem).clone()))
            }
            (TokenType::Function { .. }, _) => {
                let operands = values.iter().map(|(l, _)| Operand::Local(*l)).collect();
                let arr = em.new_array("arguments", framework::token_type(), operands);
                let f = em.cast("function", Type::object(data::FUNCTION_TOKEN), value.into());
                let r = em.call_value(f, framework::function_apply(), vec![arr.into()]);
                Ok((r, TokenType::General))
            }
            _ => Err(self.unsupported(
                format!("application of a {ty} to {} arguments", values.len()),
                "only arrays, matrices and functions can be applied",
            )),
        }
    }

    fn native_call(
        &mut self,
        em: &mut Emitter,
        name: &str,
        call: CallKind,
        values: Vec<(LocalId, TokenType)>,
    ) -> Result<(LocalId, TokenType)> {
        let types: Vec<TokenType> = values.iter().map(|(_, t)| t.clone()).collect();
        let Some(f) = self.ctx.signatures.resolve(name, call, &types) else {
            let rendered: Vec<String> = types.iter().map(|t| t.to_string()).collect();
            return Err(self.unsupported(
                format!("call {name}({})", rendered.join(", ")),
                "no native conversion exists for these argument types",
            ));
        };
        let r = emit_native(em, f, &values)?;
        Ok((r, f.result_type(&types)))
    }

    fn function(
        &mut self,
        em: &mut Emitter,
        params: &[(String, Option<TokenType>)],
        body: &Expr,
    ) -> Result<(LocalId, TokenType)> {
        let mut captured: Vec<(String, LocalId, TokenType)> = Vec::new();
        let literal = Expr::Function {
            params: params.to_vec(),
            body: Box::new(body.clone()),
        };
        for name in literal.free_identifiers() {
            match self.lookup(&name) {
                Some(Binding::Token { local, ty }) => captured.push((name, local, ty)),
                Some(Binding::Variable(var)) => {
                    let (local, ty) = self.read_variable(em, var)?;
                    captured.push((name, local, ty));
                }
                None if native::constant(&name).is_some() || native::is_known(&name) => {}
                None => {
                    return Err(SpecError::expression(
                        self.subject.clone(),
                        format!("undefined identifier '{name}'"),
                    ))
                }
            }
        }

        let class_name = self.ctx.closure_name(self.owner);
        let class = self
            .ctx
            .program
            .add_class(&class_name, data::FUNCTION_TOKEN, ClassKind::Closure);
        let mut fields = Vec::new();
        for (name, _, ty) in &captured {
            let f = self
                .ctx
                .program
                .add_field(class, &format!("_CGcaptured_{name}"), framework::token_type());
            self.ctx.tags.tag_type(f, ty.clone())?;
            fields.push(f);
        }

        // Constructor: store the captured tokens.
        let init = self.ctx.program.add_method(
            class,
            "<init>",
            vec![framework::token_type(); captured.len()],
            Type::Void,
            false,
        );
        let mut init_body = self.ctx.take_body(init);
        {
            let mut ib = Emitter::new(&mut init_body);
            let this = ib
                .this()
                .ok_or_else(|| SpecError::inconsistency("codegen", "closure constructor has no receiver"))?;
            ib.call_special(
                this,
                framework::init(data::FUNCTION_TOKEN, vec![Type::Int]),
                vec![Operand::int(params.len() as i32)],
            );
            for (i, f) in fields.iter().enumerate() {
                let p = ib
                    .param(i)
                    .ok_or_else(|| SpecError::inconsistency("codegen", "missing closure parameter"))?;
                ib.field_store(this, *f, p.into());
            }
            ib.ret(None);
            ib.append();
        }
        self.ctx.put_body(init, init_body);

        // apply(Token[]): bind parameters and captured values, then the body.
        let apply = self.ctx.program.add_method(
            class,
            "apply",
            vec![Type::array_of(framework::token_type())],
            framework::token_type(),
            false,
        );
        let mut apply_body = self.ctx.take_body(apply);
        let generated = {
            let mut ab = Emitter::new(&mut apply_body);
            let mut inner = ExprGen::new(&mut *self.ctx, class, None, None, &self.subject);
            closure_body(&mut inner, &mut ab, params, &captured, &fields, body).map(|()| ab.append())
        };
        self.ctx.put_body(apply, apply_body);
        generated?;

        let operands = captured.iter().map(|(_, l, _)| Operand::Local(*l)).collect();
        let f = em.new_object("function", &class_name, operands);
        Ok((
            f,
            TokenType::Function {
                arity: params.len(),
            },
        ))
    }
}

/// Body of a closure's `apply(Token[])`.
fn closure_body(
    gen: &mut ExprGen,
    em: &mut Emitter,
    params: &[(String, Option<TokenType>)],
    captured: &[(String, LocalId, TokenType)],
    fields: &[FieldId],
    body: &Expr,
) -> Result<()> {
    let (Some(this), Some(args)) = (em.this(), em.param(0)) else {
        return Err(SpecError::inconsistency("codegen", "closure apply has no receiver"));
    };
    for (i, (name, declared)) in params.iter().enumerate() {
        let raw = em.value(
            name,
            framework::token_type(),
            Rvalue::ArrayElem {
                base: args,
                index: Operand::int(i as i32),
            },
        );
        let (local, ty) = match declared {
            Some(t) => (convert(em, raw, t)?, t.clone()),
            None => (raw, TokenType::Unknown),
        };
        gen.bind(name, Binding::Token { local, ty });
    }
    for ((name, _, ty), f) in captured.iter().zip(fields) {
        let local = em.field_read(name, framework::token_type(), this, *f);
        gen.bind(name, Binding::Token {
            local,
            ty: ty.clone(),
        });
    }
    let (r, _) = gen.emit(em, body)?;
    em.ret(Some(r.into()));
    Ok(())
}

// ── Emission helpers ────────────────────────────────────────────────────────

fn literal(em: &mut Emitter, lit: &Literal) -> (LocalId, TokenType) {
    let (class, value, ty) = match lit {
        Literal::Boolean(b) => (data::BOOLEAN_TOKEN, Constant::Bool(*b), TokenType::Boolean),
        Literal::UnsignedByte(v) => (
            data::UNSIGNED_BYTE_TOKEN,
            Constant::Int(i32::from(*v)),
            TokenType::UnsignedByte,
        ),
        Literal::Int(v) => (data::INT_TOKEN, Constant::Int(*v), TokenType::Int),
        Literal::Long(v) => (data::LONG_TOKEN, Constant::Long(*v), TokenType::Long),
        Literal::Double(v) => (data::DOUBLE_TOKEN, Constant::Double(*v), TokenType::Double),
        Literal::String(s) => (data::STRING_TOKEN, Constant::Str(s.clone()), TokenType::String),
    };
    (em.new_object("literal", class, vec![Operand::Const(value)]), ty)
}

/// Emit code constructing a compile-time token value.
pub fn emit_token(em: &mut Emitter, token: &Token) -> std::result::Result<LocalId, String> {
    let scalar = |class: &str, c: Constant, em: &mut Emitter| {
        em.new_object("constant", class, vec![Operand::Const(c)])
    };
    Ok(match token {
        Token::Boolean(b) => scalar(data::BOOLEAN_TOKEN, Constant::Bool(*b), em),
        Token::UnsignedByte(v) => scalar(data::UNSIGNED_BYTE_TOKEN, Constant::Int(i32::from(*v)), em),
        Token::Int(v) => scalar(data::INT_TOKEN, Constant::Int(*v), em),
        Token::Long(v) => scalar(data::LONG_TOKEN, Constant::Long(*v), em),
        Token::Double(v) => scalar(data::DOUBLE_TOKEN, Constant::Double(*v), em),
        Token::String(s) => scalar(data::STRING_TOKEN, Constant::Str(s.clone()), em),
        Token::Complex { re, im } => {
            let c = em.new_object(
                "complex",
                data::COMPLEX,
                vec![
                    Operand::Const(Constant::Double(*re)),
                    Operand::Const(Constant::Double(*im)),
                ],
            );
            em.new_object("constant", data::COMPLEX_TOKEN, vec![c.into()])
        }
        Token::Array { elem, values } => {
            let mut items = Vec::new();
            for v in values {
                items.push(Operand::Local(emit_token(em, v)?));
            }
            let arr = em.new_array("elements", framework::token_type(), items);
            em.new_object(
                "constant",
                data::ARRAY_TOKEN,
                vec![Operand::str(&elem.to_string()), arr.into()],
            )
        }
        other => return Err(format!("no constant form for {}", other.token_type())),
    })
}

fn boolean_value(em: &mut Emitter, token: LocalId) -> LocalId {
    let b = em.cast("condition", Type::object(data::BOOLEAN_TOKEN), token.into());
    em.call_value(
        b,
        framework::accessor(data::BOOLEAN_TOKEN, "booleanValue", Type::Boolean),
        vec![],
    )
}

fn int_value(em: &mut Emitter, token: LocalId) -> LocalId {
    let s = em.cast("index", Type::object(data::SCALAR_TOKEN), token.into());
    em.call_value(
        s,
        framework::accessor(data::SCALAR_TOKEN, "intValue", Type::Int),
        vec![],
    )
}

fn not(em: &mut Emitter, token: LocalId) -> LocalId {
    let b = em.cast("condition", Type::object(data::BOOLEAN_TOKEN), token.into());
    em.call_value(b, framework::token_unary(data::BOOLEAN_TOKEN, "not"), vec![])
}

fn relational(em: &mut Emitter, op: RelOp, a: LocalId, b: LocalId) -> LocalId {
    let less = |em: &mut Emitter, x: LocalId, y: LocalId| {
        let sx = em.cast("lhs", Type::object(data::SCALAR_TOKEN), x.into());
        let sy = em.cast("rhs", Type::object(data::SCALAR_TOKEN), y.into());
        em.call_value(sx, framework::is_less_than(), vec![sy.into()])
    };
    match op {
        RelOp::Eq => em.call_value(a, framework::is_equal_to(), vec![b.into()]),
        RelOp::Ne => {
            let eq = em.call_value(a, framework::is_equal_to(), vec![b.into()]);
            not(em, eq)
        }
        RelOp::Lt => less(em, a, b),
        RelOp::Gt => less(em, b, a),
        RelOp::Le => {
            let gt = less(em, b, a);
            not(em, gt)
        }
        RelOp::Ge => {
            let lt = less(em, a, b);
            not(em, lt)
        }
    }
}

/// Static `convert` into the declared type's token class.
pub fn convert(em: &mut Emitter, token: LocalId, to: &TokenType) -> Result<LocalId> {
    em.call_static(framework::token_convert(to.token_class()), vec![token.into()])
        .ok_or_else(|| SpecError::inconsistency("codegen", "convert is void"))
}

/// Runtime class whose accessor yields a value of `kind`.
fn accessor_class(kind: NativeKind) -> &'static str {
    match kind {
        NativeKind::Boolean => data::BOOLEAN_TOKEN,
        NativeKind::String => data::STRING_TOKEN,
        NativeKind::TokenArray | NativeKind::Array => data::ARRAY_TOKEN,
        NativeKind::Int
        | NativeKind::Long
        | NativeKind::Double
        | NativeKind::Complex
        | NativeKind::Fix => data::SCALAR_TOKEN,
        NativeKind::Token => data::TOKEN,
        _ => data::MATRIX_TOKEN,
    }
}

/// Call a native function: unwrap each argument with its accessor, call the
/// implementation, and wrap a native result back into a token.
fn emit_native(
    em: &mut Emitter,
    f: &NativeFunction,
    args: &[(LocalId, TokenType)],
) -> Result<LocalId> {
    let mut operands = Vec::new();
    for ((local, _), kind) in args.iter().zip(f.params) {
        let class = accessor_class(*kind);
        let v = match kind.accessor() {
            Some(acc) => {
                let c = em.cast("argument", Type::object(class), (*local).into());
                em.call_value(c, framework::accessor(class, acc, kind.ir_type()), vec![])
            }
            None if *kind == NativeKind::Array => {
                em.cast("argument", Type::object(class), (*local).into())
            }
            None => *local,
        };
        operands.push(Operand::Local(v));
    }
    let params: Vec<Type> = f.params.iter().map(|k| k.ir_type()).collect();
    let raw = match f.target {
        Target::Static { class, method } => em
            .call_static(MethodRef::new(class, method, params, f.ret.ir_type()), operands)
            .ok_or_else(|| SpecError::inconsistency("codegen", "native call is void"))?,
        Target::Virtual { method } => {
            let mut iter = operands.into_iter();
            let receiver = iter
                .next()
                .and_then(|o| o.as_local())
                .ok_or_else(|| SpecError::inconsistency("codegen", "method call without receiver"))?;
            let class = f.params.first().map_or(data::TOKEN, |k| accessor_class(*k));
            em.call_value(
                receiver,
                MethodRef::new(class, method, params[1..].to_vec(), f.ret.ir_type()),
                iter.collect(),
            )
        }
    };
    Ok(match f.ret.wrapper() {
        Some(class) => em.new_object("result", class, vec![raw.into()]),
        None => raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineOptions;
    use crate::ir::{StmtKind, Type};
    use crate::model::Model;
    use crate::parser::parse_expression;

    fn setup() -> (PipelineContext, ClassId) {
        let model = Model::from_json(r#"{"name": "M", "parameters": [{"name": "k", "expression": "3"}]}"#)
            .unwrap();
        let mut ctx = PipelineContext::new(model, PipelineOptions::default());
        let class = ctx
            .program
            .add_class("M", crate::framework::kernel::COMPOSITE_ACTOR, ClassKind::Actor);
        let top = ctx.model.top;
        ctx.register_class(top, class).unwrap();
        (ctx, class)
    }

    fn generate(text: &str, bind: &[(&str, TokenType)]) -> Result<(Vec<StmtKind>, TokenType)> {
        let (mut ctx, class) = setup();
        let top = ctx.model.top;
        let m = ctx.program.add_method(class, "fire", vec![], Type::Void, false);
        let mut body = ctx.take_body(m);
        let mut em = Emitter::new(&mut body);
        let mut gen = ExprGen::new(&mut ctx, class, Some(top), Some(top), "M.test");
        for (name, ty) in bind {
            let l = em.temp(name, framework::token_type());
            gen.bind(name, Binding::Token {
                local: l,
                ty: ty.clone(),
            });
        }
        let expr = parse_expression(text).unwrap();
        let (_, ty) = gen.emit(&mut em, &expr)?;
        Ok((em.finish(), ty))
    }

    fn calls(stmts: &[StmtKind]) -> Vec<String> {
        stmts
            .iter()
            .filter_map(|s| s.invoke().map(|i| i.method.name.clone()))
            .collect()
    }

    #[test]
    fn int_plus_double_is_double() {
        let (stmts, ty) = generate("x + 1.5", &[("x", TokenType::Int)]).unwrap();
        assert_eq!(ty, TokenType::Double);
        assert_eq!(calls(&stmts), vec!["add"]);
    }

    #[test]
    fn conjunction_branches_before_second_operand() {
        let (stmts, ty) = generate("a && b", &[("a", TokenType::Boolean), ("b", TokenType::Boolean)])
            .unwrap();
        assert_eq!(ty, TokenType::Boolean);
        let branches: Vec<usize> = stmts
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, StmtKind::If { .. }))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(branches.len(), 2);
        // The second operand's conversion sits between the two branches.
        let second_read = stmts
            .iter()
            .enumerate()
            .filter(|(_, s)| s.invoke().is_some_and(|i| i.method.name == "booleanValue"))
            .map(|(i, _)| i)
            .nth(1)
            .unwrap();
        assert!(branches[0] < second_read && second_read < branches[1]);
    }

    #[test]
    fn model_variables_are_read_through_their_attribute() {
        let (stmts, ty) = generate("k * 2", &[]).unwrap();
        assert_eq!(ty, TokenType::Int);
        assert_eq!(calls(&stmts), vec!["getAttribute", "getToken", "multiply"]);
    }

    #[test]
    fn interpreter_calls_are_rejected() {
        let err = generate("eval(\"1+1\")", &[]).unwrap_err();
        assert!(err.to_string().contains("run-time interpreter"));
    }

    #[test]
    fn unknown_argument_types_have_no_conversion() {
        let err = generate("sin(x)", &[("x", TokenType::Unknown)]).unwrap_err();
        assert!(matches!(err, SpecError::Unsupported { .. }));
    }

    #[test]
    fn native_call_unwraps_and_rewraps() {
        let (stmts, ty) = generate("sin(x)", &[("x", TokenType::Double)]).unwrap();
        assert_eq!(ty, TokenType::Double);
        assert_eq!(calls(&stmts), vec!["doubleValue", "sin"]);
        assert!(stmts.iter().any(|s| matches!(
            s.rvalue(),
            Some(Rvalue::New { class, .. }) if class == data::DOUBLE_TOKEN
        )));
    }

    #[test]
    fn function_literal_creates_closure_class() {
        let (mut ctx, class) = setup();
        let top = ctx.model.top;
        let m = ctx.program.add_method(class, "fire", vec![], Type::Void, false);
        let mut body = ctx.take_body(m);
        let mut em = Emitter::new(&mut body);
        let mut gen = ExprGen::new(&mut ctx, class, Some(top), Some(top), "M.test");
        let expr = parse_expression("function(x:int) x + k").unwrap();
        let (_, ty) = gen.emit(&mut em, &expr).unwrap();
        assert_eq!(ty, TokenType::Function { arity: 1 });
        let closure = ctx.program.class_by_name("M_CGfunction_1").unwrap();
        assert_eq!(ctx.program.class(closure).kind, ClassKind::Closure);
        assert!(ctx.program.field_by_name(closure, "_CGcaptured_k").is_some());
        assert!(ctx.program.method_by_name(closure, "apply").is_some());
    }
}
