// ir.rs — Arena program representation for generated classes
//
// Classes, fields and methods live in flat arenas on `Program` and are
// addressed by `ClassId`/`FieldId`/`MethodId`. Each method owns a `Body`: a
// list of three-address statements with stable `StmtId`s and explicit edit
// operations (insert-before/after, replace, remove). Removal of whole classes,
// fields and methods only sets a `removed` flag, so IDs never dangle.
//
// Preconditions: none (data structure).
// Postconditions: every edit keeps StmtIds unique within a body.
// Failure modes: edits addressed to a StmtId that is not in the body are
//   reported by returning `None`/`false`; callers decide whether that is fatal.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;

use crate::id::{ClassId, FieldId, IdAllocator, Label, LocalId, MethodId, StmtId};
use crate::token::Token;

// ── Types ───────────────────────────────────────────────────────────────────

/// Static type of a local, field, parameter or return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Boolean,
    Int,
    Long,
    Double,
    String,
    Object(String),
    Array(Box<Type>),
}

impl Type {
    pub fn object(class: &str) -> Type {
        Type::Object(class.to_string())
    }

    pub fn array_of(elem: Type) -> Type {
        Type::Array(Box::new(elem))
    }

    pub fn class_name(&self) -> Option<&str> {
        match self {
            Type::Object(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Type::Object(_) | Type::Array(_) | Type::String)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Boolean => write!(f, "boolean"),
            Type::Int => write!(f, "int"),
            Type::Long => write!(f, "long"),
            Type::Double => write!(f, "double"),
            Type::String => write!(f, "String"),
            Type::Object(name) => write!(f, "{name}"),
            Type::Array(elem) => write!(f, "{elem}[]"),
        }
    }
}

// ── Values ──────────────────────────────────────────────────────────────────

/// A primitive or string literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Str(String),
}

impl Constant {
    pub fn ty(&self) -> Type {
        match self {
            Constant::Null => Type::object("java.lang.Object"),
            Constant::Bool(_) => Type::Boolean,
            Constant::Int(_) => Type::Int,
            Constant::Long(_) => Type::Long,
            Constant::Double(_) => Type::Double,
            Constant::Str(_) => Type::String,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Null => write!(f, "null"),
            Constant::Bool(b) => write!(f, "{b}"),
            Constant::Int(v) => write!(f, "{v}"),
            Constant::Long(v) => write!(f, "{v}L"),
            Constant::Double(v) => write!(f, "{v:?}"),
            Constant::Str(s) => write!(f, "{s:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Local(LocalId),
    Const(Constant),
}

impl Operand {
    pub fn as_local(&self) -> Option<LocalId> {
        match self {
            Operand::Local(l) => Some(*l),
            Operand::Const(_) => None,
        }
    }

    pub fn as_const(&self) -> Option<&Constant> {
        match self {
            Operand::Const(c) => Some(c),
            Operand::Local(_) => None,
        }
    }

    pub fn str(s: &str) -> Operand {
        Operand::Const(Constant::Str(s.to_string()))
    }

    pub fn int(v: i32) -> Operand {
        Operand::Const(Constant::Int(v))
    }
}

impl From<LocalId> for Operand {
    fn from(l: LocalId) -> Self {
        Operand::Local(l)
    }
}

/// Assignment destination.
#[derive(Debug, Clone, PartialEq)]
pub enum Place {
    Local(LocalId),
    Field { base: LocalId, field: FieldId },
    ArrayElem { base: LocalId, index: Operand },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::Xor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Ushr => ">>>",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    Not,
}

/// Which dispatch an invocation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    Virtual,
    Static,
    /// Constructor chaining and private calls.
    Special,
}

/// Symbolic reference to a method on a runtime or generated class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub class: String,
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
}

impl MethodRef {
    pub fn new(class: &str, name: &str, params: Vec<Type>, ret: Type) -> Self {
        MethodRef {
            class: class.to_string(),
            name: name.to_string(),
            params,
            ret,
        }
    }

    pub fn is(&self, name: &str, arity: usize) -> bool {
        self.name == name && self.params.len() == arity
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invoke {
    pub kind: InvokeKind,
    pub base: Option<LocalId>,
    pub method: MethodRef,
    pub args: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rvalue {
    Use(Operand),
    Cast(Type, Operand),
    InstanceOf(String, Operand),
    Field { base: LocalId, field: FieldId },
    ArrayElem { base: LocalId, index: Operand },
    ArrayLength(LocalId),
    /// Allocation plus constructor call.
    New { class: String, args: Vec<Operand> },
    NewArray { elem: Type, len: Operand },
    Binary(BinOp, Operand, Operand),
    Unary(UnOp, Operand),
    Invoke(Invoke),
}

// ── Statements ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Assign { place: Place, value: Rvalue },
    Invoke(Invoke),
    If {
        op: BinOp,
        lhs: Operand,
        rhs: Operand,
        target: Label,
    },
    Goto(Label),
    Label(Label),
    Return(Option<Operand>),
    Throw(Operand),
    Nop,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub id: StmtId,
    pub kind: StmtKind,
}

impl StmtKind {
    pub fn assign(local: LocalId, value: Rvalue) -> StmtKind {
        StmtKind::Assign {
            place: Place::Local(local),
            value,
        }
    }

    /// Local defined by this statement, if it assigns one.
    pub fn def_local(&self) -> Option<LocalId> {
        match self {
            StmtKind::Assign {
                place: Place::Local(l),
                ..
            } => Some(*l),
            _ => None,
        }
    }

    /// The invocation performed by this statement, if any.
    pub fn invoke(&self) -> Option<&Invoke> {
        match self {
            StmtKind::Invoke(inv)
            | StmtKind::Assign {
                value: Rvalue::Invoke(inv),
                ..
            } => Some(inv),
            _ => None,
        }
    }

    pub fn invoke_mut(&mut self) -> Option<&mut Invoke> {
        match self {
            StmtKind::Invoke(inv)
            | StmtKind::Assign {
                value: Rvalue::Invoke(inv),
                ..
            } => Some(inv),
            _ => None,
        }
    }

    pub fn rvalue(&self) -> Option<&Rvalue> {
        match self {
            StmtKind::Assign { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn branch_target(&self) -> Option<Label> {
        match self {
            StmtKind::If { target, .. } | StmtKind::Goto(target) => Some(*target),
            _ => None,
        }
    }

    /// False for statements after which control never reaches the next one.
    pub fn falls_through(&self) -> bool {
        !matches!(
            self,
            StmtKind::Goto(_) | StmtKind::Return(_) | StmtKind::Throw(_)
        )
    }

    /// Every local read by this statement, including bases of stores.
    pub fn uses(&self) -> Vec<LocalId> {
        let mut out = Vec::new();
        let op = |o: &Operand, out: &mut Vec<LocalId>| {
            if let Operand::Local(l) = o {
                out.push(*l);
            }
        };
        let inv = |i: &Invoke, out: &mut Vec<LocalId>| {
            if let Some(b) = i.base {
                out.push(b);
            }
            for a in &i.args {
                op(a, out);
            }
        };
        match self {
            StmtKind::Assign { place, value } => {
                match place {
                    Place::Local(_) => {}
                    Place::Field { base, .. } => out.push(*base),
                    Place::ArrayElem { base, index } => {
                        out.push(*base);
                        op(index, &mut out);
                    }
                }
                match value {
                    Rvalue::Use(o) | Rvalue::Cast(_, o) | Rvalue::InstanceOf(_, o) => {
                        op(o, &mut out)
                    }
                    Rvalue::Unary(_, o) => op(o, &mut out),
                    Rvalue::Field { base, .. } | Rvalue::ArrayLength(base) => out.push(*base),
                    Rvalue::ArrayElem { base, index } => {
                        out.push(*base);
                        op(index, &mut out);
                    }
                    Rvalue::New { args, .. } => {
                        for a in args {
                            op(a, &mut out);
                        }
                    }
                    Rvalue::NewArray { len, .. } => op(len, &mut out),
                    Rvalue::Binary(_, a, b) => {
                        op(a, &mut out);
                        op(b, &mut out);
                    }
                    Rvalue::Invoke(i) => inv(i, &mut out),
                }
            }
            StmtKind::Invoke(i) => inv(i, &mut out),
            StmtKind::If { lhs, rhs, .. } => {
                op(lhs, &mut out);
                op(rhs, &mut out);
            }
            StmtKind::Return(Some(o)) | StmtKind::Throw(o) => op(o, &mut out),
            StmtKind::Return(None) | StmtKind::Goto(_) | StmtKind::Label(_) | StmtKind::Nop => {}
        }
        out
    }

    /// Visit every operand in a read position. Base locals of field and
    /// invocation expressions are not operands and are not visited.
    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut Operand)) {
        match self {
            StmtKind::Assign { place, value } => {
                if let Place::ArrayElem { index, .. } = place {
                    f(index);
                }
                match value {
                    Rvalue::Use(o)
                    | Rvalue::Cast(_, o)
                    | Rvalue::InstanceOf(_, o)
                    | Rvalue::Unary(_, o) => f(o),
                    Rvalue::ArrayElem { index, .. } => f(index),
                    Rvalue::New { args, .. } => args.iter_mut().for_each(&mut f),
                    Rvalue::NewArray { len, .. } => f(len),
                    Rvalue::Binary(_, a, b) => {
                        f(a);
                        f(b);
                    }
                    Rvalue::Invoke(i) => i.args.iter_mut().for_each(&mut f),
                    Rvalue::Field { .. } | Rvalue::ArrayLength(_) => {}
                }
            }
            StmtKind::Invoke(i) => i.args.iter_mut().for_each(&mut f),
            StmtKind::If { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            StmtKind::Return(Some(o)) | StmtKind::Throw(o) => f(o),
            StmtKind::Return(None) | StmtKind::Goto(_) | StmtKind::Label(_) | StmtKind::Nop => {}
        }
    }

    /// Rename every local mention, definitions included.
    pub fn rename_locals(&mut self, f: &impl Fn(LocalId) -> LocalId) {
        self.for_each_operand_mut(|o| {
            if let Operand::Local(l) = o {
                *l = f(*l);
            }
        });
        match self {
            StmtKind::Assign { place, value } => {
                match place {
                    Place::Local(l) => *l = f(*l),
                    Place::Field { base, .. } | Place::ArrayElem { base, .. } => *base = f(*base),
                }
                match value {
                    Rvalue::Field { base, .. }
                    | Rvalue::ArrayElem { base, .. }
                    | Rvalue::ArrayLength(base) => *base = f(*base),
                    Rvalue::Invoke(i) => {
                        if let Some(b) = &mut i.base {
                            *b = f(*b);
                        }
                    }
                    _ => {}
                }
            }
            StmtKind::Invoke(i) => {
                if let Some(b) = &mut i.base {
                    *b = f(*b);
                }
            }
            _ => {}
        }
    }

    pub fn rename_labels(&mut self, f: &impl Fn(Label) -> Label) {
        match self {
            StmtKind::If { target, .. } | StmtKind::Goto(target) | StmtKind::Label(target) => {
                *target = f(*target)
            }
            _ => {}
        }
    }
}

// ── Bodies ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Local {
    pub name: String,
    pub ty: Type,
}

/// A method body: locals plus an ordered statement list.
#[derive(Debug, Clone, Default)]
pub struct Body {
    pub locals: Vec<Local>,
    pub stmts: Vec<Stmt>,
    pub this_local: Option<LocalId>,
    pub param_locals: Vec<LocalId>,
    ids: IdAllocator,
}

impl Body {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_local(&mut self, name: &str, ty: Type) -> LocalId {
        let id = LocalId(self.locals.len() as u32);
        let name = if self.locals.iter().any(|l| l.name == name) {
            format!("{}{}", name, id.0)
        } else {
            name.to_string()
        };
        self.locals.push(Local { name, ty });
        id
    }

    pub fn local(&self, id: LocalId) -> &Local {
        &self.locals[id.index()]
    }

    pub fn new_label(&mut self) -> Label {
        self.ids.alloc_label()
    }

    fn make(&mut self, kind: StmtKind) -> Stmt {
        Stmt {
            id: self.ids.alloc_stmt(),
            kind,
        }
    }

    pub fn push(&mut self, kind: StmtKind) -> StmtId {
        let stmt = self.make(kind);
        let id = stmt.id;
        self.stmts.push(stmt);
        id
    }

    pub fn position(&self, id: StmtId) -> Option<usize> {
        self.stmts.iter().position(|s| s.id == id)
    }

    pub fn stmt(&self, id: StmtId) -> Option<&Stmt> {
        self.stmts.iter().find(|s| s.id == id)
    }

    pub fn stmt_mut(&mut self, id: StmtId) -> Option<&mut Stmt> {
        self.stmts.iter_mut().find(|s| s.id == id)
    }

    /// Insert statements immediately before `at`. Returns the new IDs in order.
    pub fn insert_before(&mut self, at: StmtId, kinds: Vec<StmtKind>) -> Option<Vec<StmtId>> {
        let pos = self.position(at)?;
        Some(self.insert_at(pos, kinds))
    }

    /// Insert statements immediately after `at`.
    pub fn insert_after(&mut self, at: StmtId, kinds: Vec<StmtKind>) -> Option<Vec<StmtId>> {
        let pos = self.position(at)?;
        Some(self.insert_at(pos + 1, kinds))
    }

    pub fn insert_at(&mut self, pos: usize, kinds: Vec<StmtKind>) -> Vec<StmtId> {
        let stmts: Vec<Stmt> = kinds.into_iter().map(|k| self.make(k)).collect();
        let ids = stmts.iter().map(|s| s.id).collect();
        self.stmts.splice(pos..pos, stmts);
        ids
    }

    /// Insert before the first `return`, or append when there is none.
    pub fn insert_before_return(&mut self, kinds: Vec<StmtKind>) -> Vec<StmtId> {
        let pos = self
            .stmts
            .iter()
            .position(|s| matches!(s.kind, StmtKind::Return(_)))
            .unwrap_or(self.stmts.len());
        self.insert_at(pos, kinds)
    }

    /// Replace the statement kind in place, keeping its ID.
    pub fn replace(&mut self, at: StmtId, kind: StmtKind) -> bool {
        match self.stmt_mut(at) {
            Some(stmt) => {
                stmt.kind = kind;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, at: StmtId) -> bool {
        match self.position(at) {
            Some(pos) => {
                self.stmts.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn label_position(&self, label: Label) -> Option<usize> {
        self.stmts
            .iter()
            .position(|s| s.kind == StmtKind::Label(label))
    }

    /// Statements defining `local`.
    pub fn defs_of(&self, local: LocalId) -> Vec<StmtId> {
        self.stmts
            .iter()
            .filter(|s| s.kind.def_local() == Some(local))
            .map(|s| s.id)
            .collect()
    }

    /// The unique defining statement of `local`, if there is exactly one and
    /// the local is not a parameter.
    pub fn single_def(&self, local: LocalId) -> Option<&Stmt> {
        if self.is_param(local) {
            return None;
        }
        let mut defs = self.stmts.iter().filter(|s| s.kind.def_local() == Some(local));
        let first = defs.next()?;
        if defs.next().is_some() {
            return None;
        }
        Some(first)
    }

    pub fn uses_of(&self, local: LocalId) -> Vec<StmtId> {
        self.stmts
            .iter()
            .filter(|s| s.kind.uses().contains(&local))
            .map(|s| s.id)
            .collect()
    }

    /// Use counts for every local, indexed by `LocalId`.
    pub fn use_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.locals.len()];
        for s in &self.stmts {
            for l in s.kind.uses() {
                counts[l.index()] += 1;
            }
        }
        counts
    }

    pub fn is_param(&self, local: LocalId) -> bool {
        self.this_local == Some(local) || self.param_locals.contains(&local)
    }

    pub fn invokes(&self) -> impl Iterator<Item = (&Stmt, &Invoke)> {
        self.stmts
            .iter()
            .filter_map(|s| s.kind.invoke().map(|i| (s, i)))
    }

    /// Drop unused locals and renumber the survivors densely.
    pub fn compact_locals(&mut self) -> bool {
        let mut used = vec![false; self.locals.len()];
        if let Some(t) = self.this_local {
            used[t.index()] = true;
        }
        for p in &self.param_locals {
            used[p.index()] = true;
        }
        for s in &self.stmts {
            for l in s.kind.uses() {
                used[l.index()] = true;
            }
            if let Some(l) = s.kind.def_local() {
                used[l.index()] = true;
            }
        }
        if used.iter().all(|u| *u) {
            return false;
        }
        let mut remap = vec![LocalId(u32::MAX); self.locals.len()];
        let mut locals = Vec::new();
        for (i, local) in self.locals.iter().enumerate() {
            if used[i] {
                remap[i] = LocalId(locals.len() as u32);
                locals.push(local.clone());
            }
        }
        let f = |l: LocalId| remap[l.index()];
        for s in &mut self.stmts {
            s.kind.rename_locals(&f);
        }
        self.this_local = self.this_local.map(f);
        self.param_locals = self.param_locals.iter().map(|l| f(*l)).collect();
        self.locals = locals;
        true
    }
}

// ── Program arenas ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassKind {
    /// Stands in for an actor (atomic or composite) of the model.
    Actor,
    /// Stands in for a non-value attribute such as a director.
    Attribute,
    /// Synthesized function-literal closure.
    Closure,
}

#[derive(Debug, Clone)]
pub struct Class {
    pub name: String,
    pub superclass: String,
    pub kind: ClassKind,
    pub fields: Vec<FieldId>,
    pub methods: Vec<MethodId>,
    pub removed: bool,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub class: ClassId,
    pub name: String,
    pub ty: Type,
    pub is_final: bool,
    pub initial: Option<Token>,
    pub removed: bool,
}

#[derive(Debug, Clone)]
pub struct Method {
    pub class: ClassId,
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
    pub is_static: bool,
    pub body: Body,
    pub removed: bool,
}

/// The whole-program snapshot mutated by every pass.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub classes: Vec<Class>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    class_index: HashMap<String, ClassId>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_class(&mut self, name: &str, superclass: &str, kind: ClassKind) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(Class {
            name: name.to_string(),
            superclass: superclass.to_string(),
            kind,
            fields: Vec::new(),
            methods: Vec::new(),
            removed: false,
        });
        self.class_index.insert(name.to_string(), id);
        id
    }

    /// Delete a class that was never exposed to the rest of the pipeline.
    /// Only the most recently added class can be withdrawn.
    pub fn withdraw_class(&mut self, id: ClassId) -> bool {
        if id.index() + 1 != self.classes.len() {
            return false;
        }
        let class = &self.classes[id.index()];
        if !class.fields.is_empty() || !class.methods.is_empty() {
            return false;
        }
        self.class_index.remove(&class.name);
        self.classes.pop();
        true
    }

    pub fn add_field(&mut self, class: ClassId, name: &str, ty: Type) -> FieldId {
        let id = FieldId(self.fields.len() as u32);
        self.fields.push(Field {
            class,
            name: name.to_string(),
            ty,
            is_final: false,
            initial: None,
            removed: false,
        });
        self.classes[class.index()].fields.push(id);
        id
    }

    /// Add a method whose body already declares `this` (unless static) and
    /// one local per parameter.
    pub fn add_method(
        &mut self,
        class: ClassId,
        name: &str,
        params: Vec<Type>,
        ret: Type,
        is_static: bool,
    ) -> MethodId {
        let id = MethodId(self.methods.len() as u32);
        let mut body = Body::new();
        if !is_static {
            let class_name = self.classes[class.index()].name.clone();
            body.this_local = Some(body.new_local("this", Type::Object(class_name)));
        }
        for (i, ty) in params.iter().enumerate() {
            let p = body.new_local(&format!("p{i}"), ty.clone());
            body.param_locals.push(p);
        }
        self.methods.push(Method {
            class,
            name: name.to_string(),
            params,
            ret,
            is_static,
            body,
            removed: false,
        });
        self.classes[class.index()].methods.push(id);
        id
    }

    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.index()]
    }

    pub fn field(&self, id: FieldId) -> &Field {
        &self.fields[id.index()]
    }

    pub fn field_mut(&mut self, id: FieldId) -> &mut Field {
        &mut self.fields[id.index()]
    }

    pub fn method(&self, id: MethodId) -> &Method {
        &self.methods[id.index()]
    }

    pub fn method_mut(&mut self, id: MethodId) -> &mut Method {
        &mut self.methods[id.index()]
    }

    pub fn class_by_name(&self, name: &str) -> Option<ClassId> {
        self.class_index
            .get(name)
            .copied()
            .filter(|c| !self.classes[c.index()].removed)
    }

    pub fn live_classes(&self) -> impl Iterator<Item = ClassId> + '_ {
        (0..self.classes.len())
            .map(|i| ClassId(i as u32))
            .filter(|c| !self.classes[c.index()].removed)
    }

    pub fn live_methods(&self, class: ClassId) -> impl Iterator<Item = MethodId> + '_ {
        self.classes[class.index()]
            .methods
            .iter()
            .copied()
            .filter(|m| !self.methods[m.index()].removed)
    }

    pub fn live_fields(&self, class: ClassId) -> impl Iterator<Item = FieldId> + '_ {
        self.classes[class.index()]
            .fields
            .iter()
            .copied()
            .filter(|f| !self.fields[f.index()].removed)
    }

    /// Every live method of every live class.
    pub fn all_live_methods(&self) -> Vec<MethodId> {
        self.live_classes()
            .flat_map(|c| self.live_methods(c).collect::<Vec<_>>())
            .collect()
    }

    pub fn field_by_name(&self, class: ClassId, name: &str) -> Option<FieldId> {
        self.live_fields(class)
            .find(|f| self.fields[f.index()].name == name)
    }

    pub fn method_by_name(&self, class: ClassId, name: &str) -> Option<MethodId> {
        self.live_methods(class)
            .find(|m| self.methods[m.index()].name == name)
    }

    /// Resolve a symbolic reference to a generated method.
    pub fn resolve(&self, method: &MethodRef) -> Option<MethodId> {
        let class = self.class_by_name(&method.class)?;
        self.live_methods(class).find(|m| {
            let m = &self.methods[m.index()];
            m.name == method.name && m.params.len() == method.params.len()
        })
    }

    /// Symbolic reference to a generated method, for emitting calls.
    pub fn method_ref(&self, id: MethodId) -> MethodRef {
        let m = &self.methods[id.index()];
        MethodRef {
            class: self.classes[m.class.index()].name.clone(),
            name: m.name.clone(),
            params: m.params.clone(),
            ret: m.ret.clone(),
        }
    }

    pub fn remove_method(&mut self, id: MethodId) {
        self.methods[id.index()].removed = true;
    }

    pub fn remove_field(&mut self, id: FieldId) {
        self.fields[id.index()].removed = true;
    }

    pub fn remove_class(&mut self, id: ClassId) {
        let class = &mut self.classes[id.index()];
        class.removed = true;
        for m in class.methods.clone() {
            self.methods[m.index()].removed = true;
        }
        for f in self.classes[id.index()].fields.clone() {
            self.fields[f.index()].removed = true;
        }
    }

    /// Qualified `Class.method` name for logs and diagnostics.
    pub fn method_name(&self, id: MethodId) -> String {
        let m = &self.methods[id.index()];
        format!("{}.{}", self.classes[m.class.index()].name, m.name)
    }

    /// Render one method in the dump format.
    pub fn dump_method(&self, id: MethodId) -> String {
        let mut out = String::new();
        let _ = self.write_method(&mut out, id);
        out
    }

    fn write_method(&self, f: &mut impl fmt::Write, id: MethodId) -> fmt::Result {
        let m = &self.methods[id.index()];
        let params: Vec<String> = m.params.iter().map(|p| p.to_string()).collect();
        writeln!(
            f,
            "  {}{} {}({})",
            if m.is_static { "static " } else { "" },
            m.ret,
            m.name,
            params.join(", ")
        )?;
        let body = &m.body;
        if let Some(t) = body.this_local {
            writeln!(f, "    {} := @this", body.local(t).name)?;
        }
        for (i, p) in body.param_locals.iter().enumerate() {
            writeln!(f, "    {} := @param{}", body.local(*p).name, i)?;
        }
        for stmt in &body.stmts {
            let text = StmtDisplay {
                program: self,
                body,
                kind: &stmt.kind,
            };
            match stmt.kind {
                StmtKind::Label(_) => writeln!(f, "   {text}")?,
                _ => writeln!(f, "    {text}")?,
            }
        }
        Ok(())
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

struct StmtDisplay<'a> {
    program: &'a Program,
    body: &'a Body,
    kind: &'a StmtKind,
}

impl StmtDisplay<'_> {
    fn local(&self, l: LocalId) -> &str {
        self.body
            .locals
            .get(l.index())
            .map(|l| l.name.as_str())
            .unwrap_or("<?>")
    }

    fn operand(&self, o: &Operand) -> String {
        match o {
            Operand::Local(l) => self.local(*l).to_string(),
            Operand::Const(c) => c.to_string(),
        }
    }

    fn field(&self, base: LocalId, field: FieldId) -> String {
        let fd = self.program.field(field);
        format!(
            "{}.<{}: {}>",
            self.local(base),
            self.program.class(fd.class).name,
            fd.name
        )
    }

    fn invoke(&self, i: &Invoke) -> String {
        let args: Vec<String> = i.args.iter().map(|a| self.operand(a)).collect();
        let kind = match i.kind {
            InvokeKind::Virtual => "virtualinvoke",
            InvokeKind::Static => "staticinvoke",
            InvokeKind::Special => "specialinvoke",
        };
        match i.base {
            Some(b) => format!(
                "{} {}.<{}: {}>({})",
                kind,
                self.local(b),
                i.method.class,
                i.method.name,
                args.join(", ")
            ),
            None => format!(
                "{} <{}: {}>({})",
                kind,
                i.method.class,
                i.method.name,
                args.join(", ")
            ),
        }
    }

    fn rvalue(&self, v: &Rvalue) -> String {
        match v {
            Rvalue::Use(o) => self.operand(o),
            Rvalue::Cast(t, o) => format!("({}) {}", t, self.operand(o)),
            Rvalue::InstanceOf(c, o) => format!("{} instanceof {}", self.operand(o), c),
            Rvalue::Field { base, field } => self.field(*base, *field),
            Rvalue::ArrayElem { base, index } => {
                format!("{}[{}]", self.local(*base), self.operand(index))
            }
            Rvalue::ArrayLength(b) => format!("lengthof {}", self.local(*b)),
            Rvalue::New { class, args } => {
                let args: Vec<String> = args.iter().map(|a| self.operand(a)).collect();
                format!("new {}({})", class, args.join(", "))
            }
            Rvalue::NewArray { elem, len } => format!("newarray ({})[{}]", elem, self.operand(len)),
            Rvalue::Binary(op, a, b) => {
                format!("{} {} {}", self.operand(a), op.symbol(), self.operand(b))
            }
            Rvalue::Unary(UnOp::Neg, o) => format!("neg {}", self.operand(o)),
            Rvalue::Unary(UnOp::Not, o) => format!("!{}", self.operand(o)),
            Rvalue::Invoke(i) => self.invoke(i),
        }
    }
}

impl fmt::Display for StmtDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            StmtKind::Assign { place, value } => {
                let lhs = match place {
                    Place::Local(l) => self.local(*l).to_string(),
                    Place::Field { base, field } => self.field(*base, *field),
                    Place::ArrayElem { base, index } => {
                        format!("{}[{}]", self.local(*base), self.operand(index))
                    }
                };
                write!(f, "{} = {}", lhs, self.rvalue(value))
            }
            StmtKind::Invoke(i) => write!(f, "{}", self.invoke(i)),
            StmtKind::If {
                op,
                lhs,
                rhs,
                target,
            } => write!(
                f,
                "if {} {} {} goto L{}",
                self.operand(lhs),
                op.symbol(),
                self.operand(rhs),
                target.0
            ),
            StmtKind::Goto(l) => write!(f, "goto L{}", l.0),
            StmtKind::Label(l) => write!(f, "L{}:", l.0),
            StmtKind::Return(None) => write!(f, "return"),
            StmtKind::Return(Some(o)) => write!(f, "return {}", self.operand(o)),
            StmtKind::Throw(o) => write!(f, "throw {}", self.operand(o)),
            StmtKind::Nop => write!(f, "nop"),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for class_id in self.live_classes() {
            let class = self.class(class_id);
            let kind = match class.kind {
                ClassKind::Actor => "actor",
                ClassKind::Attribute => "attribute",
                ClassKind::Closure => "closure",
            };
            writeln!(
                f,
                "class {} extends {} [{}]",
                class.name, class.superclass, kind
            )?;
            for field_id in self.live_fields(class_id) {
                let field = self.field(field_id);
                write!(
                    f,
                    "  field {}{} {}",
                    if field.is_final { "final " } else { "" },
                    field.ty,
                    field.name
                )?;
                if let Some(init) = &field.initial {
                    write!(f, " = {init}")?;
                }
                writeln!(f)?;
            }
            for method_id in self.live_methods(class_id) {
                self.write_method(f, method_id)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Program, MethodId) {
        let mut program = Program::new();
        let c = program.add_class("demo.A", "rt.actor.TypedAtomicActor", ClassKind::Actor);
        let m = program.add_method(c, "fire", vec![], Type::Void, false);
        let body = &mut program.method_mut(m).body;
        let x = body.new_local("x", Type::Int);
        body.push(StmtKind::assign(x, Rvalue::Use(Operand::int(1))));
        body.push(StmtKind::Return(None));
        (program, m)
    }

    #[test]
    fn insert_and_remove_keep_ids_stable() {
        let (mut program, m) = sample();
        let body = &mut program.method_mut(m).body;
        let first = body.stmts[0].id;
        let ret = body.stmts[1].id;
        let inserted = body.insert_before(ret, vec![StmtKind::Nop]).unwrap();
        assert_eq!(body.position(inserted[0]), Some(1));
        assert_eq!(body.position(ret), Some(2));
        assert!(body.remove(first));
        assert_eq!(body.position(ret), Some(1));
        assert!(!body.remove(first));
    }

    #[test]
    fn duplicate_local_names_are_disambiguated() {
        let mut body = Body::new();
        let a = body.new_local("t", Type::Int);
        let b = body.new_local("t", Type::Int);
        assert_ne!(body.local(a).name, body.local(b).name);
    }

    #[test]
    fn compact_locals_renumbers_survivors() {
        let mut body = Body::new();
        let dead = body.new_local("dead", Type::Int);
        let live = body.new_local("live", Type::Int);
        body.push(StmtKind::assign(live, Rvalue::Use(Operand::int(3))));
        body.push(StmtKind::Return(Some(Operand::Local(live))));
        let _ = dead;
        assert!(body.compact_locals());
        assert_eq!(body.locals.len(), 1);
        assert_eq!(body.stmts[0].kind.def_local(), Some(LocalId(0)));
    }

    #[test]
    fn dump_renders_statements() {
        let (program, m) = sample();
        let text = program.dump_method(m);
        assert!(text.contains("void fire()"));
        assert!(text.contains("this := @this"));
        assert!(text.contains("x = 1"));
        assert!(text.contains("return"));
    }

    #[test]
    fn resolve_finds_generated_methods() {
        let (program, m) = sample();
        let r = program.method_ref(m);
        assert_eq!(program.resolve(&r), Some(m));
    }
}
