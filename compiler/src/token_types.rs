// token_types.rs — Static value types of tokens flowing through a method
//
// Forward dataflow over `dataflow::solve`. The fact maps locals and fields
// to the token type they are known to carry. A missing entry means nothing
// has reached that program point yet; `TokenType::Unknown` is the top.
// Locals merge with the narrow generated-code lattice (`merge_local`);
// arithmetic results and field facts use the value-type join (`lub`).
//
// Preconditions: the named-object map was computed for the same body.
// Postconditions: facts only grow along the iteration.
// Failure modes: none.
// Side effects: none.

use std::collections::BTreeMap;

use crate::context::PipelineContext;
use crate::dataflow::{self, Analysis, Solution};
use crate::framework::{data, kernel};
use crate::id::{FieldId, LocalId, MethodId};
use crate::ir::{Body, Constant, Invoke, InvokeKind, Operand, Place, Program, Rvalue, Stmt, StmtKind, Type};
use crate::model::Model;
use crate::named_obj::{self, ObjectMap};
use crate::tags::TagStore;
use crate::types::TokenType;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeFact {
    pub locals: BTreeMap<LocalId, TokenType>,
    pub fields: BTreeMap<FieldId, TokenType>,
}

impl TypeFact {
    pub fn local(&self, local: LocalId) -> TokenType {
        self.locals.get(&local).cloned().unwrap_or(TokenType::Unknown)
    }

    fn operand(&self, op: &Operand) -> TokenType {
        match op {
            Operand::Local(l) => self.local(*l),
            Operand::Const(_) => TokenType::Unknown,
        }
    }
}

pub struct TokenTypes<'a> {
    pub model: &'a Model,
    pub tags: &'a TagStore,
    pub program: &'a Program,
    pub objects: &'a ObjectMap,
}

impl Analysis for TokenTypes<'_> {
    type Fact = TypeFact;

    fn entry(&self, _: &Body) -> TypeFact {
        TypeFact::default()
    }

    fn merge(&self, a: &TypeFact, b: &TypeFact) -> TypeFact {
        let mut out = a.clone();
        for (l, t) in &b.locals {
            let joined = match a.locals.get(l) {
                Some(existing) => existing.merge_local(t),
                None => t.clone(),
            };
            out.locals.insert(*l, joined);
        }
        for (f, t) in &b.fields {
            let joined = match a.fields.get(f) {
                Some(existing) => existing.lub(t),
                None => t.clone(),
            };
            out.fields.insert(*f, joined);
        }
        out
    }

    fn transfer(&self, stmt: &Stmt, fact: &mut TypeFact) {
        let StmtKind::Assign { place, value } = &stmt.kind else {
            return;
        };
        match place {
            Place::Local(l) => {
                let t = self.rvalue(value, fact).unwrap_or(TokenType::Unknown);
                fact.locals.insert(*l, t);
            }
            Place::Field { field, .. } => {
                if self.tags.token_type(*field).is_some() {
                    return;
                }
                let t = match value {
                    Rvalue::Use(op) => fact.operand(op),
                    _ => TokenType::Unknown,
                };
                fact.fields.insert(*field, t);
            }
            Place::ArrayElem { .. } => {}
        }
    }
}

impl TokenTypes<'_> {
    fn rvalue(&self, value: &Rvalue, fact: &TypeFact) -> Option<TokenType> {
        match value {
            Rvalue::Use(Operand::Local(r)) | Rvalue::Cast(_, Operand::Local(r)) => {
                fact.locals.get(r).cloned()
            }
            Rvalue::New { class, args } => construct(class, args),
            Rvalue::Field { field, .. } => self
                .tags
                .token_type(*field)
                .cloned()
                .or_else(|| match &self.program.field(*field).ty {
                    Type::Object(class) => TokenType::from_token_class(class),
                    _ => None,
                })
                .or_else(|| fact.fields.get(field).cloned()),
            Rvalue::Invoke(inv) => self.invoke(inv, fact),
            _ => None,
        }
    }

    fn invoke(&self, inv: &Invoke, fact: &TypeFact) -> Option<TokenType> {
        let m = &inv.method;
        if inv.kind == InvokeKind::Static {
            return match m.name.as_str() {
                "convert" | "arrayToMatrix" => TokenType::from_token_class(&m.class),
                _ => None,
            };
        }
        let base = inv.base?;
        let base_ty = fact.local(base);
        let arg_ty = |i: usize| inv.args.get(i).map_or(TokenType::Unknown, |a| fact.operand(a));
        match m.name.as_str() {
            "get" if m.class == kernel::PORT => {
                let port = self.objects.object(base)?;
                self.model.port(port)?;
                Some(self.model.port_type(port))
            }
            "getToken" => {
                let var = self.objects.object(base)?;
                self.model.variable(var)?;
                Some(self.model.variable_type(var))
            }
            "add" | "subtract" | "multiply" | "divide" | "modulo" | "bitwiseAnd" | "bitwiseOr"
            | "bitwiseXor" => {
                let other = arg_ty(0);
                if base_ty == TokenType::Unknown || other == TokenType::Unknown {
                    return Some(TokenType::Unknown);
                }
                Some(base_ty.lub(&other))
            }
            "negate" | "bitwiseNot" | "leftShift" | "rightShift" | "logicalRightShift" | "pow" => {
                Some(base_ty)
            }
            "absolute" if base_ty == TokenType::Complex => Some(TokenType::Double),
            "absolute" => Some(base_ty),
            "isEqualTo" | "isLessThan" | "not" => Some(TokenType::Boolean),
            "getElement" | "getElementAsToken" => base_ty.element().cloned(),
            "get" if m.class == data::RECORD_TOKEN => match (&base_ty, inv.args.first()) {
                (TokenType::Record(fields), Some(Operand::Const(Constant::Str(label)))) => {
                    fields.get(label).cloned()
                }
                _ => None,
            },
            _ => None,
        }
    }
}

fn construct(class: &str, args: &[Operand]) -> Option<TokenType> {
    if class == data::ARRAY_TOKEN {
        return match args.first() {
            Some(Operand::Const(Constant::Str(elem))) => {
                TokenType::parse_name(elem).map(|e| TokenType::Array(Box::new(e)))
            }
            _ => None,
        };
    }
    TokenType::from_token_class(class)
}

/// Named-object bindings and token types of one generated method.
pub fn analyze_method(ctx: &PipelineContext, method: MethodId) -> (ObjectMap, Solution<TypeFact>) {
    let objects = named_obj::analyze_method(ctx, method);
    let solution = {
        let analysis = TokenTypes {
            model: &ctx.model,
            tags: &ctx.tags,
            program: &ctx.program,
            objects: &objects,
        };
        dataflow::solve(&analysis, &ctx.program.method(method).body)
    };
    (objects, solution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Emitter;
    use crate::framework;
    use crate::ir::BinOp;
    use crate::model::tests::DEMO;

    fn solve_body(body: &Body) -> Solution<TypeFact> {
        let model = Model::from_json(DEMO).unwrap();
        let tags = TagStore::new();
        let program = Program::new();
        let objects = ObjectMap::default();
        let analysis = TokenTypes {
            model: &model,
            tags: &tags,
            program: &program,
            objects: &objects,
        };
        dataflow::solve(&analysis, body)
    }

    fn int_token(em: &mut Emitter, v: i32) -> LocalId {
        em.new_object("i", data::INT_TOKEN, vec![Operand::int(v)])
    }

    #[test]
    fn arithmetic_takes_the_lattice_join() {
        let mut body = Body::new();
        let mut em = Emitter::new(&mut body);
        let a = int_token(&mut em, 1);
        let b = em.new_object("d", data::DOUBLE_TOKEN, vec![Operand::Const(Constant::Double(2.0))]);
        let sum = em.call_value(a, framework::token_binary("add"), vec![b.into()]);
        let prod = em.call_value(a, framework::token_binary("multiply"), vec![b.into()]);
        em.ret(None);
        em.append();

        let sol = solve_body(&body);
        let last = sol.before(body.stmts.len() - 1).unwrap();
        assert_eq!(last.local(sum), TokenType::Double);
        assert_eq!(last.local(prod), TokenType::Double);
        assert_eq!(last.local(a), TokenType::Int);
    }

    #[test]
    fn identical_types_survive_a_join() {
        let mut body = Body::new();
        let flag = body.new_local("flag", Type::Boolean);
        let mut em = Emitter::new(&mut body);
        let x = em.temp("x", framework::token_type());
        let other = em.label();
        let end = em.label();
        em.branch_false(flag, other);
        let a = int_token(&mut em, 1);
        em.assign(x, Rvalue::Use(a.into()));
        em.goto(end);
        em.place(other);
        let b = int_token(&mut em, 2);
        em.assign(x, Rvalue::Use(b.into()));
        em.place(end);
        em.ret(None);
        em.append();

        let sol = solve_body(&body);
        let last = sol.before(body.stmts.len() - 1).unwrap();
        assert_eq!(last.local(x), TokenType::Int);
    }

    #[test]
    fn differing_local_types_widen_to_unknown() {
        let mut body = Body::new();
        let flag = body.new_local("flag", Type::Boolean);
        let mut em = Emitter::new(&mut body);
        let x = em.temp("x", framework::token_type());
        let end = em.label();
        let a = int_token(&mut em, 1);
        em.assign(x, Rvalue::Use(a.into()));
        em.branch(BinOp::Eq, flag.into(), Operand::Const(Constant::Bool(true)), end);
        let d = em.new_object("d", data::DOUBLE_TOKEN, vec![Operand::Const(Constant::Double(1.5))]);
        em.assign(x, Rvalue::Use(d.into()));
        em.place(end);
        em.ret(None);
        em.append();

        let sol = solve_body(&body);
        let last = sol.before(body.stmts.len() - 1).unwrap();
        assert_eq!(last.local(x), TokenType::Unknown);
    }

    #[test]
    fn array_construction_reads_the_element_type() {
        let mut body = Body::new();
        let mut em = Emitter::new(&mut body);
        let arr = em.new_array("e", framework::token_type(), vec![]);
        let t = em.new_object("a", data::ARRAY_TOKEN, vec![Operand::str("int"), arr.into()]);
        let first = em.call_value(t, framework::array_get_element(), vec![Operand::int(0)]);
        em.ret(None);
        em.append();

        let sol = solve_body(&body);
        let last = sol.before(body.stmts.len() - 1).unwrap();
        assert_eq!(last.local(t), TokenType::Array(Box::new(TokenType::Int)));
        assert_eq!(last.local(first), TokenType::Int);
    }

    /// Delegates to the wrapped analysis and logs every statement visit.
    struct Recording<'a> {
        inner: TokenTypes<'a>,
        visits: std::cell::RefCell<Vec<(*const Stmt, TypeFact, TypeFact)>>,
    }

    impl Analysis for Recording<'_> {
        type Fact = TypeFact;

        fn entry(&self, body: &Body) -> TypeFact {
            self.inner.entry(body)
        }

        fn merge(&self, a: &TypeFact, b: &TypeFact) -> TypeFact {
            self.inner.merge(a, b)
        }

        fn transfer(&self, stmt: &Stmt, fact: &mut TypeFact) {
            let input = fact.clone();
            self.inner.transfer(stmt, fact);
            self.visits
                .borrow_mut()
                .push((stmt as *const Stmt, input, fact.clone()));
        }
    }

    fn grows(prev: &TypeFact, next: &TypeFact) -> bool {
        prev.locals
            .iter()
            .all(|(l, t)| next.locals.get(l).is_some_and(|n| t.leq(n)))
            && prev
                .fields
                .iter()
                .all(|(f, t)| next.fields.get(f).is_some_and(|n| t.leq(n)))
    }

    #[test]
    fn loop_facts_only_grow_between_visits() {
        let mut body = Body::new();
        let flag = body.new_local("flag", Type::Boolean);
        let mut em = Emitter::new(&mut body);
        let x = em.temp("x", framework::token_type());
        let y = em.temp("y", framework::token_type());
        let head = em.label();
        let exit = em.label();
        let a = int_token(&mut em, 1);
        em.assign(x, Rvalue::Use(a.into()));
        em.place(head);
        em.branch_false(flag, exit);
        em.assign(y, Rvalue::Use(x.into()));
        let d = em.new_object("d", data::DOUBLE_TOKEN, vec![Operand::Const(Constant::Double(0.5))]);
        em.assign(x, Rvalue::Use(d.into()));
        em.goto(head);
        em.place(exit);
        em.ret(None);
        em.append();

        let model = Model::from_json(DEMO).unwrap();
        let tags = TagStore::new();
        let program = Program::new();
        let objects = ObjectMap::default();
        let analysis = Recording {
            inner: TokenTypes {
                model: &model,
                tags: &tags,
                program: &program,
                objects: &objects,
            },
            visits: Default::default(),
        };
        let sol = dataflow::solve(&analysis, &body);

        let visits = analysis.visits.into_inner();
        let mut revisited = 0;
        for (i, stmt) in body.stmts.iter().enumerate() {
            let seen: Vec<_> = visits
                .iter()
                .filter(|(s, _, _)| std::ptr::eq(*s, stmt))
                .collect();
            if seen.len() > 1 {
                revisited += 1;
            }
            for pair in seen.windows(2) {
                let (_, in0, out0) = pair[0];
                let (_, in1, out1) = pair[1];
                assert!(grows(in0, in1), "input at {i} shrank: {in0:?} -> {in1:?}");
                assert!(grows(out0, out1), "output at {i} shrank: {out0:?} -> {out1:?}");
            }
        }
        assert!(revisited > 0, "loop body was visited once");

        let last = sol.before(body.stmts.len() - 1).unwrap();
        assert_eq!(last.local(x), TokenType::Unknown);
        assert_eq!(last.local(y), TokenType::Unknown);
    }
}
