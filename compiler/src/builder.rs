// builder.rs — Statement emitter over a method body
//
// Passes that synthesize code (templates, the materializer, expression code
// generation, field reductions) collect statements through an `Emitter`
// instead of pushing into a body directly. The emitter allocates locals and
// labels in the borrowed body but keeps the statements aside, so the caller
// decides where they land: appended, or spliced before/after an existing
// statement.
//
// Preconditions: the body belongs to the method the statements will go into.
// Postconditions: every local an emitted statement names exists in the body.
// Failure modes: none.
// Side effects: allocates locals and labels in the body.

use crate::framework::{self, kernel};
use crate::id::{FieldId, Label, LocalId, StmtId};
use crate::ir::{
    BinOp, Body, Constant, Invoke, InvokeKind, MethodRef, Operand, Place, Rvalue, StmtKind, Type,
};
use crate::model::Lookup;

pub struct Emitter<'b> {
    body: &'b mut Body,
    stmts: Vec<StmtKind>,
}

impl<'b> Emitter<'b> {
    pub fn new(body: &'b mut Body) -> Self {
        Self {
            body,
            stmts: Vec::new(),
        }
    }

    pub fn body(&self) -> &Body {
        self.body
    }

    /// The receiver of the method being built.
    pub fn this(&self) -> Option<LocalId> {
        self.body.this_local
    }

    pub fn param(&self, i: usize) -> Option<LocalId> {
        self.body.param_locals.get(i).copied()
    }

    pub fn local_type(&self, local: LocalId) -> &Type {
        &self.body.local(local).ty
    }

    pub fn temp(&mut self, name: &str, ty: Type) -> LocalId {
        self.body.new_local(name, ty)
    }

    pub fn emit(&mut self, kind: StmtKind) {
        self.stmts.push(kind);
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    /// Number of statements emitted so far.
    pub fn len(&self) -> usize {
        self.stmts.len()
    }

    // ── Values ──

    pub fn assign(&mut self, dst: LocalId, value: Rvalue) {
        self.emit(StmtKind::assign(dst, value));
    }

    /// Fresh local holding `value`.
    pub fn value(&mut self, name: &str, ty: Type, value: Rvalue) -> LocalId {
        let l = self.temp(name, ty);
        self.assign(l, value);
        l
    }

    pub fn constant(&mut self, name: &str, c: Constant) -> LocalId {
        let ty = c.ty();
        self.value(name, ty, Rvalue::Use(Operand::Const(c)))
    }

    pub fn new_object(&mut self, name: &str, class: &str, args: Vec<Operand>) -> LocalId {
        self.value(
            name,
            Type::object(class),
            Rvalue::New {
                class: class.to_string(),
                args,
            },
        )
    }

    pub fn cast(&mut self, name: &str, ty: Type, operand: Operand) -> LocalId {
        self.value(name, ty.clone(), Rvalue::Cast(ty, operand))
    }

    pub fn new_array(&mut self, name: &str, elem: Type, values: Vec<Operand>) -> LocalId {
        let arr = self.value(
            name,
            Type::array_of(elem.clone()),
            Rvalue::NewArray {
                elem,
                len: Operand::int(values.len() as i32),
            },
        );
        for (i, v) in values.into_iter().enumerate() {
            self.emit(StmtKind::Assign {
                place: Place::ArrayElem {
                    base: arr,
                    index: Operand::int(i as i32),
                },
                value: Rvalue::Use(v),
            });
        }
        arr
    }

    pub fn field_read(&mut self, name: &str, ty: Type, base: LocalId, field: FieldId) -> LocalId {
        self.value(name, ty, Rvalue::Field { base, field })
    }

    pub fn field_store(&mut self, base: LocalId, field: FieldId, value: Operand) {
        self.emit(StmtKind::Assign {
            place: Place::Field { base, field },
            value: Rvalue::Use(value),
        });
    }

    // ── Calls ──

    fn invoke(
        &mut self,
        kind: InvokeKind,
        base: Option<LocalId>,
        method: MethodRef,
        args: Vec<Operand>,
    ) -> Option<LocalId> {
        let inv = Invoke {
            kind,
            base,
            method,
            args,
        };
        if inv.method.ret == Type::Void {
            self.emit(StmtKind::Invoke(inv));
            return None;
        }
        let ret = inv.method.ret.clone();
        let name = inv.method.name.clone();
        Some(self.value(&name, ret, Rvalue::Invoke(inv)))
    }

    /// Virtual call; the result local when the method returns a value.
    pub fn call(&mut self, base: LocalId, method: MethodRef, args: Vec<Operand>) -> Option<LocalId> {
        self.invoke(InvokeKind::Virtual, Some(base), method, args)
    }

    /// Virtual call whose result is needed. Void methods yield a null local.
    pub fn call_value(&mut self, base: LocalId, method: MethodRef, args: Vec<Operand>) -> LocalId {
        match self.call(base, method, args) {
            Some(l) => l,
            None => self.constant("void", Constant::Null),
        }
    }

    pub fn call_static(&mut self, method: MethodRef, args: Vec<Operand>) -> Option<LocalId> {
        self.invoke(InvokeKind::Static, None, method, args)
    }

    pub fn call_special(&mut self, base: LocalId, method: MethodRef, args: Vec<Operand>) {
        self.emit(StmtKind::Invoke(Invoke {
            kind: InvokeKind::Special,
            base: Some(base),
            method,
            args,
        }));
    }

    /// `base.getX("name")` followed by a cast to `ty`.
    pub fn lookup(&mut self, base: LocalId, kind: Lookup, name: &str, ty: Type) -> LocalId {
        let method = match kind {
            Lookup::Attribute => framework::get_attribute(),
            Lookup::Port => framework::get_port(),
            Lookup::Entity => framework::get_entity(),
            Lookup::Relation => framework::get_relation(),
        };
        let raw = self.call_value(base, method, vec![Operand::str(name)]);
        self.cast(name, ty, Operand::Local(raw))
    }

    /// `base.getContainer()` cast to `ty`.
    pub fn container(&mut self, base: LocalId, ty: Type) -> LocalId {
        let raw = self.call_value(base, framework::get_container(), vec![]);
        self.cast("container", ty, Operand::Local(raw))
    }

    /// `port.hasToken(0)`, branching to `skip` when empty, then `port.get(0)`.
    pub fn read_input(&mut self, port: LocalId, skip: Label) -> LocalId {
        let has = self.call_value(port, framework::port_has_token(), vec![Operand::int(0)]);
        self.branch_false(has, skip);
        self.call_value(port, framework::port_get(), vec![Operand::int(0)])
    }

    pub fn send(&mut self, port: LocalId, token: LocalId) {
        self.call(
            port,
            framework::port_send(),
            vec![Operand::int(0), Operand::Local(token)],
        );
    }

    pub fn throw_runtime(&mut self, message: &str) {
        let e = self.new_object(
            "exception",
            kernel::RUNTIME_EXCEPTION,
            vec![Operand::str(message)],
        );
        self.emit(StmtKind::Throw(Operand::Local(e)));
    }

    // ── Control ──

    pub fn label(&mut self) -> Label {
        self.body.new_label()
    }

    pub fn place(&mut self, label: Label) {
        self.emit(StmtKind::Label(label));
    }

    pub fn goto(&mut self, label: Label) {
        self.emit(StmtKind::Goto(label));
    }

    pub fn branch(&mut self, op: BinOp, lhs: Operand, rhs: Operand, target: Label) {
        self.emit(StmtKind::If {
            op,
            lhs,
            rhs,
            target,
        });
    }

    /// Jump to `target` when the boolean local is false.
    pub fn branch_false(&mut self, cond: LocalId, target: Label) {
        self.branch(
            BinOp::Eq,
            Operand::Local(cond),
            Operand::Const(Constant::Bool(false)),
            target,
        );
    }

    pub fn ret(&mut self, value: Option<Operand>) {
        self.emit(StmtKind::Return(value));
    }

    // ── Placement ──

    pub fn finish(self) -> Vec<StmtKind> {
        self.stmts
    }

    /// Append everything at the end of the body.
    pub fn append(self) -> Vec<StmtId> {
        let Emitter { body, stmts } = self;
        stmts.into_iter().map(|k| body.push(k)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_are_held_until_placed() {
        let mut body = Body::new();
        let this = body.new_local("this", Type::object("Demo"));
        body.this_local = Some(this);
        body.push(StmtKind::Return(None));

        let mut em = Emitter::new(&mut body);
        let port = em.lookup(this, Lookup::Port, "output", Type::object(kernel::PORT));
        let stmts = em.finish();
        assert_eq!(stmts.len(), 2);
        assert_eq!(body.stmts.len(), 1);
        assert_eq!(body.local(port).ty, Type::object(kernel::PORT));

        let ret = body.stmts[0].id;
        body.insert_before(ret, stmts).unwrap();
        assert_eq!(body.stmts.len(), 3);
        assert!(matches!(body.stmts[2].kind, StmtKind::Return(None)));
    }

    #[test]
    fn void_calls_emit_no_result() {
        let mut body = Body::new();
        let p = body.new_local("p", Type::object(kernel::PORT));
        let t = body.new_local("t", framework::token_type());
        let mut em = Emitter::new(&mut body);
        em.send(p, t);
        let stmts = em.finish();
        assert!(matches!(stmts.as_slice(), [StmtKind::Invoke(_)]));
    }
}
