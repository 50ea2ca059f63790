// ast.rs — Parse tree for attribute expressions
//
// One node kind per emission rule of the code generator. Chains of the same
// precedence level (sum, product, logical, bitwise) keep their operands and
// the exact operator sequence so that evaluation and code emission can fold
// strictly left to right.

use std::collections::BTreeSet;

use crate::types::TokenType;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Boolean(bool),
    UnsignedByte(u8),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SumOp {
    Add,
    Subtract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductOp {
    Multiply,
    Divide,
    Modulo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitwiseOp {
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftKind {
    Left,
    Right,
    LogicalRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
    BitwiseNot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Ident(String),
    Sum {
        first: Box<Expr>,
        rest: Vec<(SumOp, Expr)>,
    },
    Product {
        first: Box<Expr>,
        rest: Vec<(ProductOp, Expr)>,
    },
    Power {
        base: Box<Expr>,
        exponent: Box<Expr>,
    },
    Relational {
        op: RelOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Short-circuit chain: `a && b && c`.
    Logical {
        op: LogicOp,
        operands: Vec<Expr>,
    },
    Bitwise {
        op: BitwiseOp,
        operands: Vec<Expr>,
    },
    Shift {
        op: ShiftKind,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Cond {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// `f(args)`: function application, array or matrix indexing.
    Apply {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    /// `base.name(args)`
    MethodCall {
        base: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    /// `base.name` on a record.
    Member {
        base: Box<Expr>,
        name: String,
    },
    Array(Vec<Expr>),
    Record(Vec<(String, Expr)>),
    Matrix(Vec<Vec<Expr>>),
    Function {
        params: Vec<(String, Option<TokenType>)>,
        body: Box<Expr>,
    },
}

impl Expr {
    /// Identifiers referenced but not bound by an enclosing function literal,
    /// in sorted order.
    pub fn free_identifiers(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        collect_free(self, &mut Vec::new(), &mut out);
        out
    }
}

fn collect_free(expr: &Expr, bound: &mut Vec<String>, out: &mut BTreeSet<String>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Ident(name) => {
            if !bound.iter().any(|b| b == name) {
                out.insert(name.clone());
            }
        }
        Expr::Sum { first, rest } => {
            collect_free(first, bound, out);
            for (_, e) in rest {
                collect_free(e, bound, out);
            }
        }
        Expr::Product { first, rest } => {
            collect_free(first, bound, out);
            for (_, e) in rest {
                collect_free(e, bound, out);
            }
        }
        Expr::Power { base, exponent } => {
            collect_free(base, bound, out);
            collect_free(exponent, bound, out);
        }
        Expr::Relational { lhs, rhs, .. } | Expr::Shift { lhs, rhs, .. } => {
            collect_free(lhs, bound, out);
            collect_free(rhs, bound, out);
        }
        Expr::Logical { operands, .. } | Expr::Bitwise { operands, .. } | Expr::Array(operands) => {
            for e in operands {
                collect_free(e, bound, out);
            }
        }
        Expr::Unary { operand, .. } => collect_free(operand, bound, out),
        Expr::Cond {
            cond,
            then,
            otherwise,
        } => {
            collect_free(cond, bound, out);
            collect_free(then, bound, out);
            collect_free(otherwise, bound, out);
        }
        Expr::Apply { func, args } => {
            collect_free(func, bound, out);
            for e in args {
                collect_free(e, bound, out);
            }
        }
        Expr::MethodCall { base, args, .. } => {
            collect_free(base, bound, out);
            for e in args {
                collect_free(e, bound, out);
            }
        }
        Expr::Member { base, .. } => collect_free(base, bound, out),
        Expr::Record(fields) => {
            for (_, e) in fields {
                collect_free(e, bound, out);
            }
        }
        Expr::Matrix(rows) => {
            for row in rows {
                for e in row {
                    collect_free(e, bound, out);
                }
            }
        }
        Expr::Function { params, body } => {
            let depth = bound.len();
            bound.extend(params.iter().map(|(n, _)| n.clone()));
            collect_free(body, bound, out);
            bound.truncate(depth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_parameters_are_not_free() {
        let e = Expr::Function {
            params: vec![("x".into(), None)],
            body: Box::new(Expr::Sum {
                first: Box::new(Expr::Ident("x".into())),
                rest: vec![(SumOp::Add, Expr::Ident("y".into()))],
            }),
        };
        let free: Vec<_> = e.free_identifiers().into_iter().collect();
        assert_eq!(free, vec!["y".to_string()]);
    }
}
