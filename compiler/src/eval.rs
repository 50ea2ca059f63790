// eval.rs — Constant evaluator and static type inference for expressions
//
// `evaluate` computes the value of a parameter expression at compile time,
// given the values of the identifiers it references. `infer_type` computes
// the static token type of an expression from the types of its identifiers;
// the model provider uses it for expression-actor output ports and for
// non-constant parameters whose value is only known at run time.
//
// Both walk the same tree and share the native-function registry with the
// code generator, so the three agree on which calls exist.
//
// Preconditions: `expr` came from `parser::parse_expression`.
// Postconditions: `evaluate` agrees with the runtime token arithmetic;
//   `infer_type(e)` is an upper bound of `evaluate(e).token_type()`.
// Failure modes: undefined identifiers, unresolvable calls, and arithmetic
//   errors return `Err(message)`.
// Side effects: none.

use std::collections::BTreeMap;

use crate::ast::*;
use crate::native::{self, CallKind};
use crate::token::{BitOp, ShiftOp, Token, TokenResult};
use crate::types::TokenType;

// ── Scopes ──────────────────────────────────────────────────────────────────

/// Name resolution for the evaluator.
pub trait Scope {
    fn value(&self, name: &str) -> Option<Token>;
}

impl Scope for BTreeMap<String, Token> {
    fn value(&self, name: &str) -> Option<Token> {
        self.get(name).cloned()
    }
}

/// Name resolution for type inference.
pub trait TypeScope {
    fn type_of(&self, name: &str) -> Option<TokenType>;
}

impl TypeScope for BTreeMap<String, TokenType> {
    fn type_of(&self, name: &str) -> Option<TokenType> {
        self.get(name).cloned()
    }
}

/// Function parameters shadowing an outer scope.
struct Layered<'a, T> {
    bindings: BTreeMap<String, T>,
    parent: &'a dyn Fn(&str) -> Option<T>,
}

impl<T: Clone> Layered<'_, T> {
    fn get(&self, name: &str) -> Option<T> {
        self.bindings
            .get(name)
            .cloned()
            .or_else(|| (self.parent)(name))
    }
}

impl Scope for Layered<'_, Token> {
    fn value(&self, name: &str) -> Option<Token> {
        self.get(name)
    }
}

impl TypeScope for Layered<'_, TokenType> {
    fn type_of(&self, name: &str) -> Option<TokenType> {
        self.get(name)
    }
}

// ── Evaluation ──────────────────────────────────────────────────────────────

pub fn evaluate(expr: &Expr, scope: &dyn Scope) -> TokenResult {
    match expr {
        Expr::Literal(lit) => Ok(literal(lit)),
        Expr::Ident(name) => scope
            .value(name)
            .or_else(|| native::constant(name))
            .ok_or_else(|| format!("undefined identifier '{name}'")),
        Expr::Sum { first, rest } => {
            let mut acc = evaluate(first, scope)?;
            for (op, e) in rest {
                let rhs = evaluate(e, scope)?;
                acc = match op {
                    SumOp::Add => acc.add(&rhs)?,
                    SumOp::Subtract => acc.subtract(&rhs)?,
                };
            }
            Ok(acc)
        }
        Expr::Product { first, rest } => {
            let mut acc = evaluate(first, scope)?;
            for (op, e) in rest {
                let rhs = evaluate(e, scope)?;
                acc = match op {
                    ProductOp::Multiply => acc.multiply(&rhs)?,
                    ProductOp::Divide => acc.divide(&rhs)?,
                    ProductOp::Modulo => acc.modulo(&rhs)?,
                };
            }
            Ok(acc)
        }
        Expr::Power { base, exponent } => {
            let base = evaluate(base, scope)?;
            let exponent = evaluate(exponent, scope)?;
            let times = exponent
                .as_int()
                .ok_or_else(|| format!("exponent must be an int, found {}", exponent.token_type()))?;
            base.pow(times)
        }
        Expr::Relational { op, lhs, rhs } => {
            let a = evaluate(lhs, scope)?;
            let b = evaluate(rhs, scope)?;
            match op {
                RelOp::Eq => a.is_equal_to(&b),
                RelOp::Ne => a.is_equal_to(&b)?.not(),
                RelOp::Lt => a.is_less_than(&b),
                RelOp::Gt => b.is_less_than(&a),
                RelOp::Le => b.is_less_than(&a)?.not(),
                RelOp::Ge => a.is_less_than(&b)?.not(),
            }
        }
        Expr::Logical { op, operands } => {
            // Short-circuit: stop at the first operand that decides the result.
            let decisive = matches!(op, LogicOp::Or);
            for e in operands {
                let v = evaluate(e, scope)?;
                let b = v
                    .as_bool()
                    .ok_or_else(|| format!("logical operand is {}, not boolean", v.token_type()))?;
                if b == decisive {
                    return Ok(Token::Boolean(decisive));
                }
            }
            Ok(Token::Boolean(!decisive))
        }
        Expr::Bitwise { op, operands } => {
            let bit_op = match op {
                BitwiseOp::And => BitOp::And,
                BitwiseOp::Or => BitOp::Or,
                BitwiseOp::Xor => BitOp::Xor,
            };
            let mut iter = operands.iter();
            let first = iter.next().ok_or("empty bitwise chain")?;
            let mut acc = evaluate(first, scope)?;
            for e in iter {
                acc = acc.bitwise(&evaluate(e, scope)?, bit_op)?;
            }
            Ok(acc)
        }
        Expr::Shift { op, lhs, rhs } => {
            let value = evaluate(lhs, scope)?;
            let bits = evaluate(rhs, scope)?;
            let bits = bits
                .as_int()
                .ok_or_else(|| format!("shift distance must be an int, found {}", bits.token_type()))?;
            value.shift(bits, shift_op(*op))
        }
        Expr::Unary { op, operand } => {
            let v = evaluate(operand, scope)?;
            match op {
                UnaryOp::Negate => v.negate(),
                UnaryOp::Not => v.not(),
                UnaryOp::BitwiseNot => v.bitwise_not(),
            }
        }
        Expr::Cond {
            cond,
            then,
            otherwise,
        } => {
            let c = evaluate(cond, scope)?;
            match c.as_bool() {
                Some(true) => evaluate(then, scope),
                Some(false) => evaluate(otherwise, scope),
                None => Err(format!("condition is {}, not boolean", c.token_type())),
            }
        }
        Expr::Apply { func, args } => {
            let args: Vec<Token> = args
                .iter()
                .map(|a| evaluate(a, scope))
                .collect::<Result<_, _>>()?;
            if let Expr::Ident(name) = func.as_ref() {
                match scope.value(name) {
                    Some(target) => apply_value(&target, &args),
                    None => call_native(name, CallKind::Function, &args),
                }
            } else {
                let target = evaluate(func, scope)?;
                apply_value(&target, &args)
            }
        }
        Expr::MethodCall { base, name, args } => {
            let mut all = vec![evaluate(base, scope)?];
            for a in args {
                all.push(evaluate(a, scope)?);
            }
            call_native(name, CallKind::Method, &all)
        }
        Expr::Member { base, name } => evaluate(base, scope)?.record_get(name),
        Expr::Array(items) => {
            let values = items
                .iter()
                .map(|e| evaluate(e, scope))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Token::array(values))
        }
        Expr::Record(fields) => {
            let mut map = BTreeMap::new();
            for (label, e) in fields {
                map.insert(label.clone(), evaluate(e, scope)?);
            }
            Ok(Token::Record(map))
        }
        Expr::Matrix(rows) => {
            let cols = rows.first().map(Vec::len).unwrap_or(0);
            let mut values = Vec::with_capacity(rows.len() * cols);
            for row in rows {
                for e in row {
                    values.push(evaluate(e, scope)?);
                }
            }
            Ok(Token::matrix(rows.len(), cols, values))
        }
        Expr::Function { params, body } => {
            let bound: Vec<&String> = params.iter().map(|(n, _)| n).collect();
            let mut captured = BTreeMap::new();
            for name in expr.free_identifiers() {
                if bound.contains(&&name) {
                    continue;
                }
                if let Some(v) = scope.value(&name) {
                    captured.insert(name, v);
                }
            }
            Ok(Token::Function {
                params: params.clone(),
                body: body.clone(),
                captured,
            })
        }
    }
}

fn literal(lit: &Literal) -> Token {
    match lit {
        Literal::Boolean(b) => Token::Boolean(*b),
        Literal::UnsignedByte(v) => Token::UnsignedByte(*v),
        Literal::Int(v) => Token::Int(*v),
        Literal::Long(v) => Token::Long(*v),
        Literal::Double(v) => Token::Double(*v),
        Literal::String(s) => Token::String(s.clone()),
    }
}

fn shift_op(kind: ShiftKind) -> ShiftOp {
    match kind {
        ShiftKind::Left => ShiftOp::Left,
        ShiftKind::Right => ShiftOp::Right,
        ShiftKind::LogicalRight => ShiftOp::LogicalRight,
    }
}

/// `x(args)` where `x` is a value: array or matrix indexing, or a call.
fn apply_value(target: &Token, args: &[Token]) -> TokenResult {
    match (target, args) {
        (Token::Array { .. }, [i]) => {
            let i = i.as_int().ok_or("array index must be an int")?;
            target.element(i)
        }
        (Token::Matrix { .. }, [r, c]) => {
            let r = r.as_int().ok_or("matrix row must be an int")?;
            let c = c.as_int().ok_or("matrix column must be an int")?;
            target.matrix_element(r, c)
        }
        (
            Token::Function {
                params,
                body,
                captured,
            },
            _,
        ) => {
            if params.len() != args.len() {
                return Err(format!(
                    "function expects {} arguments, got {}",
                    params.len(),
                    args.len()
                ));
            }
            let mut bindings = BTreeMap::new();
            for ((name, declared), arg) in params.iter().zip(args) {
                let value = match declared {
                    Some(t) => arg.convert(t)?,
                    None => arg.clone(),
                };
                bindings.insert(name.clone(), value);
            }
            let parent = |name: &str| captured.get(name).cloned();
            let scope = Layered {
                bindings,
                parent: &parent,
            };
            evaluate(body, &scope)
        }
        _ => Err(format!(
            "cannot apply a {} to {} arguments",
            target.token_type(),
            args.len()
        )),
    }
}

fn call_native(name: &str, call: CallKind, args: &[Token]) -> TokenResult {
    if native::is_interpreter_escape(name) {
        return Err(format!("'{name}' requires a run-time interpreter"));
    }
    let types: Vec<TokenType> = args.iter().map(Token::token_type).collect();
    let f = native::lookup(name, call, &types).ok_or_else(|| no_match(name, &types))?;
    f.evaluate(args)
}

fn no_match(name: &str, types: &[TokenType]) -> String {
    let types: Vec<String> = types.iter().map(|t| t.to_string()).collect();
    format!("no function {}({}) with a native conversion", name, types.join(", "))
}

// ── Type inference ──────────────────────────────────────────────────────────

pub fn infer_type(expr: &Expr, scope: &dyn TypeScope) -> Result<TokenType, String> {
    let join = |types: Vec<TokenType>| -> TokenType {
        let mut iter = types.into_iter();
        match iter.next() {
            Some(first) => iter.fold(first, |acc, t| acc.lub(&t)),
            None => TokenType::General,
        }
    };
    match expr {
        Expr::Literal(lit) => Ok(literal(lit).token_type()),
        Expr::Ident(name) => scope
            .type_of(name)
            .or_else(|| native::constant(name).map(|t| t.token_type()))
            .ok_or_else(|| format!("undefined identifier '{name}'")),
        Expr::Sum { first, rest } => {
            let mut types = vec![infer_type(first, scope)?];
            for (_, e) in rest {
                types.push(infer_type(e, scope)?);
            }
            Ok(join(types))
        }
        Expr::Product { first, rest } => {
            let mut types = vec![infer_type(first, scope)?];
            for (_, e) in rest {
                types.push(infer_type(e, scope)?);
            }
            Ok(join(types))
        }
        Expr::Bitwise { operands, .. } => {
            let types = operands
                .iter()
                .map(|e| infer_type(e, scope))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(join(types))
        }
        Expr::Power { base, exponent } => {
            infer_type(exponent, scope)?;
            infer_type(base, scope)
        }
        Expr::Shift { lhs, rhs, .. } => {
            infer_type(rhs, scope)?;
            infer_type(lhs, scope)
        }
        Expr::Relational { lhs, rhs, .. } => {
            infer_type(lhs, scope)?;
            infer_type(rhs, scope)?;
            Ok(TokenType::Boolean)
        }
        Expr::Logical { operands, .. } => {
            for e in operands {
                infer_type(e, scope)?;
            }
            Ok(TokenType::Boolean)
        }
        Expr::Unary { op, operand } => {
            let t = infer_type(operand, scope)?;
            Ok(match op {
                UnaryOp::Not => TokenType::Boolean,
                _ => t,
            })
        }
        Expr::Cond {
            cond,
            then,
            otherwise,
        } => {
            infer_type(cond, scope)?;
            Ok(infer_type(then, scope)?.lub(&infer_type(otherwise, scope)?))
        }
        Expr::Apply { func, args } => {
            let arg_types = args
                .iter()
                .map(|a| infer_type(a, scope))
                .collect::<Result<Vec<_>, _>>()?;
            let target = match func.as_ref() {
                Expr::Ident(name) => match scope.type_of(name) {
                    Some(t) => t,
                    None => return native_type(name, CallKind::Function, &arg_types),
                },
                other => infer_type(other, scope)?,
            };
            match (&target, arg_types.len()) {
                (TokenType::Array(e), 1) | (TokenType::Matrix(e), 2) => Ok((**e).clone()),
                (TokenType::Function { .. }, _) => Ok(TokenType::General),
                (TokenType::Unknown, _) => Ok(TokenType::Unknown),
                _ => Err(format!(
                    "cannot apply a {} to {} arguments",
                    target,
                    arg_types.len()
                )),
            }
        }
        Expr::MethodCall { base, name, args } => {
            let mut types = vec![infer_type(base, scope)?];
            for a in args {
                types.push(infer_type(a, scope)?);
            }
            native_type(name, CallKind::Method, &types)
        }
        Expr::Member { base, name } => match infer_type(base, scope)? {
            TokenType::Record(fields) => fields
                .get(name)
                .cloned()
                .ok_or_else(|| format!("record has no field '{name}'")),
            TokenType::Unknown => Ok(TokenType::Unknown),
            other => Err(format!("'.{name}' applied to {other}")),
        },
        Expr::Array(items) => {
            let types = items
                .iter()
                .map(|e| infer_type(e, scope))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(TokenType::Array(Box::new(join(types))))
        }
        Expr::Matrix(rows) => {
            let mut types = Vec::new();
            for row in rows {
                for e in row {
                    types.push(infer_type(e, scope)?);
                }
            }
            Ok(TokenType::Matrix(Box::new(join(types))))
        }
        Expr::Record(fields) => {
            let mut map = BTreeMap::new();
            for (label, e) in fields {
                map.insert(label.clone(), infer_type(e, scope)?);
            }
            Ok(TokenType::Record(map))
        }
        Expr::Function { params, body } => {
            let bindings: BTreeMap<String, TokenType> = params
                .iter()
                .map(|(n, t)| (n.clone(), t.clone().unwrap_or(TokenType::Unknown)))
                .collect();
            let parent = |name: &str| scope.type_of(name);
            let inner = Layered {
                bindings,
                parent: &parent,
            };
            infer_type(body, &inner)?;
            Ok(TokenType::Function {
                arity: params.len(),
            })
        }
    }
}

fn native_type(name: &str, call: CallKind, args: &[TokenType]) -> Result<TokenType, String> {
    if native::is_interpreter_escape(name) {
        return Err(format!("'{name}' requires a run-time interpreter"));
    }
    if args.iter().any(|t| *t == TokenType::Unknown) && native::is_known(name) {
        return Ok(TokenType::Unknown);
    }
    native::lookup(name, call, args)
        .map(|f| f.result_type(args))
        .ok_or_else(|| no_match(name, args))
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;

    fn eval_str(source: &str, scope: &[(&str, Token)]) -> TokenResult {
        let expr = parse_expression(source)?;
        let scope: BTreeMap<String, Token> = scope
            .iter()
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect();
        evaluate(&expr, &scope)
    }

    fn type_str(source: &str, scope: &[(&str, TokenType)]) -> Result<TokenType, String> {
        let expr = parse_expression(source)?;
        let scope: BTreeMap<String, TokenType> = scope
            .iter()
            .map(|(n, t)| (n.to_string(), t.clone()))
            .collect();
        infer_type(&expr, &scope)
    }

    #[test]
    fn constant_arithmetic() {
        assert_eq!(eval_str("2+3", &[]), Ok(Token::Int(5)));
        assert_eq!(eval_str("10 - 4 - 3", &[]), Ok(Token::Int(3)));
        assert_eq!(eval_str("1 + 0.5", &[]), Ok(Token::Double(1.5)));
        assert_eq!(eval_str("2^10", &[]), Ok(Token::Int(1024)));
    }

    #[test]
    fn identifiers_come_from_scope() {
        assert_eq!(eval_str("x * 2", &[("x", Token::Int(21))]), Ok(Token::Int(42)));
        assert!(eval_str("y", &[]).is_err());
    }

    #[test]
    fn logical_and_short_circuits() {
        // The right operand would fail if evaluated.
        assert_eq!(eval_str("false && undefinedName", &[]), Ok(Token::Boolean(false)));
        assert_eq!(eval_str("true || undefinedName", &[]), Ok(Token::Boolean(true)));
    }

    #[test]
    fn relational_forms() {
        assert_eq!(eval_str("3 >= 3", &[]), Ok(Token::Boolean(true)));
        assert_eq!(eval_str("3 > 3", &[]), Ok(Token::Boolean(false)));
        assert_eq!(eval_str("2 != 3", &[]), Ok(Token::Boolean(true)));
    }

    #[test]
    fn structures_and_indexing() {
        assert_eq!(eval_str("{10, 20, 30}(1)", &[]), Ok(Token::Int(20)));
        assert_eq!(eval_str("{a = 1, b = 2}.b", &[]), Ok(Token::Int(2)));
        assert_eq!(eval_str("[1, 2; 3, 4](1, 0)", &[]), Ok(Token::Int(3)));
        assert_eq!(eval_str("{1, 2, 3}.length()", &[]), Ok(Token::Int(3)));
    }

    #[test]
    fn function_literals_capture_and_apply() {
        let scope = [("k", Token::Int(10))];
        assert_eq!(
            eval_str("(function(x) x + k)(5)", &scope),
            Ok(Token::Int(15))
        );
        assert_eq!(
            eval_str("(function(x: double) x)(1)", &[]),
            Ok(Token::Double(1.0))
        );
    }

    #[test]
    fn native_functions() {
        assert_eq!(eval_str("max(2, 9)", &[]), Ok(Token::Int(9)));
        assert_eq!(eval_str("sqrt(16)", &[]), Ok(Token::Double(4.0)));
    }

    #[test]
    fn interpreter_escape_is_rejected() {
        let err = eval_str("eval(\"1+1\")", &[]).unwrap_err();
        assert!(err.contains("interpreter"));
    }

    #[test]
    fn inferred_types_follow_the_lattice() {
        assert_eq!(
            type_str("a + b", &[("a", TokenType::Int), ("b", TokenType::Double)]),
            Ok(TokenType::Double)
        );
        assert_eq!(type_str("a > 1", &[("a", TokenType::Int)]), Ok(TokenType::Boolean));
        assert_eq!(
            type_str("{1, 2.0}", &[]),
            Ok(TokenType::Array(Box::new(TokenType::Double)))
        );
        assert_eq!(type_str("sin(a)", &[("a", TokenType::Int)]), Ok(TokenType::Double));
        assert_eq!(
            type_str("a * 2", &[("a", TokenType::Unknown)]),
            Ok(TokenType::Unknown)
        );
    }
}
