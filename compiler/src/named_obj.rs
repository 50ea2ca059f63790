// named_obj.rs — Which model object each local denotes
//
// A flow-insensitive fixed point over one method body. Locals start unbound;
// the receiver, constructor parameters and constructor creation sites are
// seeded from the class's model object. Bindings flow both ways through
// copies and casts. A tagged field binds the locals read from it and the
// locals stored into it; an untagged field carries whatever was stored.
// Structural lookups of the runtime object model resolve on bound receivers. Two different objects
// reaching one local make it ambiguous, and it stays ambiguous.
//
// Preconditions: the body belongs to a class registered in the context, or
//   the caller accepts that only explicit seeds are known.
// Postconditions: the returned map is a fixed point; resuming it changes
//   nothing.
// Failure modes: none. Unknown targets simply stay unbound.
// Side effects: none.

use std::collections::BTreeMap;

use crate::context::PipelineContext;
use crate::diag::{codes, Diagnostic};
use crate::error::Result;
use crate::id::{FieldId, LocalId, MethodId, ObjId};
use crate::ir::{BinOp, Body, Constant, Invoke, Operand, Place, Rvalue, StmtKind};
use crate::model::{Lookup, Model};
use crate::tags::TagStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Object(ObjId),
    /// More than one object reaches this local.
    Ambiguous,
}

impl Binding {
    pub fn object(self) -> Option<ObjId> {
        match self {
            Binding::Object(o) => Some(o),
            Binding::Ambiguous => None,
        }
    }

    fn join(current: Option<Binding>, incoming: Binding) -> Binding {
        match (current, incoming) {
            (None, b) => b,
            (Some(Binding::Object(a)), Binding::Object(b)) if a == b => Binding::Object(a),
            _ => Binding::Ambiguous,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectMap {
    locals: Vec<Option<Binding>>,
    /// Identities of untagged fields learned from stores in this method.
    fields: BTreeMap<FieldId, Binding>,
}

impl ObjectMap {
    pub fn get(&self, local: LocalId) -> Option<Binding> {
        self.locals.get(local.index()).copied().flatten()
    }

    pub fn object(&self, local: LocalId) -> Option<ObjId> {
        self.get(local).and_then(Binding::object)
    }

    pub fn is_ambiguous(&self, local: LocalId) -> bool {
        self.get(local) == Some(Binding::Ambiguous)
    }

    pub fn bound(&self) -> usize {
        self.locals.iter().filter(|b| b.is_some()).count()
    }

    fn merge(&mut self, local: LocalId, b: Binding) -> bool {
        if local.index() >= self.locals.len() {
            self.locals.resize(local.index() + 1, None);
        }
        let slot = &mut self.locals[local.index()];
        let next = Binding::join(*slot, b);
        if *slot == Some(next) {
            return false;
        }
        *slot = Some(next);
        true
    }

    fn merge_field(&mut self, field: FieldId, b: Binding) -> bool {
        let next = Binding::join(self.fields.get(&field).copied(), b);
        self.fields.insert(field, next) != Some(next)
    }
}

pub fn analyze(
    body: &Body,
    model: &Model,
    tags: &TagStore,
    this_obj: Option<ObjId>,
    seeds: &[(LocalId, ObjId)],
) -> ObjectMap {
    let mut map = ObjectMap {
        locals: vec![None; body.locals.len()],
        fields: BTreeMap::new(),
    };
    if let (Some(this), Some(obj)) = (body.this_local, this_obj) {
        map.merge(this, Binding::Object(obj));
    }
    for (local, obj) in seeds {
        map.merge(*local, Binding::Object(*obj));
    }
    resume(body, model, tags, map)
}

/// Continue iterating from an existing map until nothing changes.
pub fn resume(body: &Body, model: &Model, tags: &TagStore, mut map: ObjectMap) -> ObjectMap {
    if map.locals.len() < body.locals.len() {
        map.locals.resize(body.locals.len(), None);
    }
    let mut rounds = 0;
    loop {
        rounds += 1;
        let mut changed = false;
        for stmt in &body.stmts {
            changed |= step(&mut map, &stmt.kind, model, tags);
        }
        if !changed {
            break;
        }
    }
    tracing::trace!(rounds, bound = map.bound(), "named-object fixed point");
    map
}

fn step(map: &mut ObjectMap, kind: &StmtKind, model: &Model, tags: &TagStore) -> bool {
    match kind {
        StmtKind::Assign {
            place: Place::Local(l),
            value,
        } => match value {
            // Both names denote the same object after a copy or a cast.
            Rvalue::Use(Operand::Local(r)) | Rvalue::Cast(_, Operand::Local(r)) => {
                let mut changed = false;
                if let Some(b) = map.get(*r) {
                    changed |= map.merge(*l, b);
                }
                if let Some(b) = map.get(*l) {
                    changed |= map.merge(*r, b);
                }
                changed
            }
            Rvalue::Field { field, .. } => {
                let b = tags
                    .object(*field)
                    .map(Binding::Object)
                    .or_else(|| map.fields.get(field).copied());
                match b {
                    Some(b) => map.merge(*l, b),
                    None => false,
                }
            }
            Rvalue::Invoke(inv) => match resolve_call(map, model, inv) {
                Some(b) => map.merge(*l, b),
                None => false,
            },
            _ => false,
        },
        StmtKind::Assign {
            place: Place::Field { field, .. },
            value: Rvalue::Use(Operand::Local(r)),
        } => match (tags.object(*field), map.get(*r)) {
            // A tagged field only ever holds its object, so the stored local does too.
            (Some(obj), _) => map.merge(*r, Binding::Object(obj)),
            (None, Some(b)) => map.merge_field(*field, b),
            (None, None) => false,
        },
        _ => false,
    }
}

/// Object returned by a structural query on a bound receiver.
fn resolve_call(map: &ObjectMap, model: &Model, inv: &Invoke) -> Option<Binding> {
    let base = map.get(inv.base?)?;
    let structural = matches!(
        inv.method.name.as_str(),
        "getContainer" | "getAttribute" | "getPort" | "getEntity" | "getRelation"
    );
    if !structural {
        return None;
    }
    let obj = match base {
        Binding::Object(o) => o,
        Binding::Ambiguous => return Some(Binding::Ambiguous),
    };
    let name = || match inv.args.first() {
        Some(Operand::Const(Constant::Str(s))) => Some(s.as_str()),
        _ => None,
    };
    let target = match inv.method.name.as_str() {
        "getContainer" if inv.args.is_empty() => model.container(obj),
        "getAttribute" => model.lookup(obj, Lookup::Attribute, name()?),
        // A port-parameter's own port.
        "getPort" if inv.args.is_empty() => model.variable(obj)?.port,
        "getPort" => model.lookup(obj, Lookup::Port, name()?),
        "getEntity" => model.lookup(obj, Lookup::Entity, name()?),
        "getRelation" => model.lookup(obj, Lookup::Relation, name()?),
        _ => None,
    };
    target.map(Binding::Object)
}

/// Receiver object and constructor seeds of a generated method.
pub fn method_seeds(ctx: &PipelineContext, method: MethodId) -> (Option<ObjId>, Vec<(LocalId, ObjId)>) {
    let this_obj = ctx.object_of_method(method);
    let m = ctx.program.method(method);
    let mut seeds = Vec::new();
    if m.name == "<init>" {
        if let Some(container) = this_obj.and_then(|o| ctx.model.container(o)) {
            if let Some(p0) = m.body.param_locals.first() {
                seeds.push((*p0, container));
            }
        }
        for (class, obj) in ctx.sites.keys() {
            if *class != m.class {
                continue;
            }
            if let Some((_, local)) = ctx.site_local(*class, *obj) {
                seeds.push((local, *obj));
            }
        }
    }
    (this_obj, seeds)
}

pub fn analyze_method(ctx: &PipelineContext, method: MethodId) -> ObjectMap {
    let (this_obj, seeds) = method_seeds(ctx, method);
    analyze(
        &ctx.program.method(method).body,
        &ctx.model,
        &ctx.tags,
        this_obj,
        &seeds,
    )
}

// ── Identity comparison folding ─────────────────────────────────────────────

/// Fold `==`/`!=` between locals bound to model objects. Returns the number
/// of folded comparisons.
pub fn fold_equality(ctx: &mut PipelineContext) -> Result<usize> {
    let mut folded = 0;
    for method in ctx.program.all_live_methods() {
        let map = analyze_method(ctx, method);
        let mut unresolved = false;
        let body = &mut ctx.program.method_mut(method).body;
        for stmt in &mut body.stmts {
            let replacement = match &stmt.kind {
                StmtKind::If {
                    op,
                    lhs: Operand::Local(a),
                    rhs: Operand::Local(b),
                    target,
                } if matches!(op, BinOp::Eq | BinOp::Ne) => {
                    match same_object(&map, *a, *b) {
                        Some(same) if same == (*op == BinOp::Eq) => Some(StmtKind::Goto(*target)),
                        Some(_) => Some(StmtKind::Nop),
                        None => {
                            unresolved |= map.is_ambiguous(*a) || map.is_ambiguous(*b);
                            None
                        }
                    }
                }
                StmtKind::Assign {
                    place: Place::Local(l),
                    value: Rvalue::Binary(op, Operand::Local(a), Operand::Local(b)),
                } if matches!(op, BinOp::Eq | BinOp::Ne) => same_object(&map, *a, *b).map(|same| {
                    StmtKind::assign(
                        *l,
                        Rvalue::Use(Operand::Const(Constant::Bool(same == (*op == BinOp::Eq)))),
                    )
                }),
                _ => None,
            };
            if let Some(kind) = replacement {
                stmt.kind = kind;
                folded += 1;
            }
        }
        if unresolved {
            let name = ctx.program.method_name(method);
            ctx.warn(
                Diagnostic::warning(name, "identity comparison on an ambiguous object left in place")
                    .with_code(codes::W0300),
            );
        }
    }
    if folded > 0 {
        tracing::debug!(folded, "identity comparisons folded");
    }
    Ok(folded)
}

fn same_object(map: &ObjectMap, a: LocalId, b: LocalId) -> Option<bool> {
    Some(map.object(a)? == map.object(b)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Emitter;
    use crate::framework::kernel;
    use crate::ir::Type;
    use crate::model::tests::DEMO;

    fn demo() -> Model {
        Model::from_json(DEMO).unwrap()
    }

    #[test]
    fn lookups_follow_the_model_structure() {
        let model = demo();
        let src = model.by_name("Demo.src").unwrap();
        let mut body = Body::new();
        let this = body.new_local("this", Type::object("Src"));
        body.this_local = Some(this);
        let mut em = Emitter::new(&mut body);
        let top = em.container(this, Type::object("Demo"));
        let gain = em.lookup(top, Lookup::Attribute, "gain", Type::object(kernel::PARAMETER));
        let out = em.lookup(this, Lookup::Port, "output", Type::object(kernel::PORT));
        em.append();

        let map = analyze(&body, &model, &TagStore::new(), Some(src), &[]);
        assert_eq!(map.object(top), Some(model.top));
        assert_eq!(map.object(gain), model.by_name("Demo.gain"));
        assert_eq!(map.object(out), model.by_name("Demo.src.output"));
    }

    #[test]
    fn copies_propagate_both_ways_and_conflicts_are_ambiguous() {
        let model = demo();
        let src = model.by_name("Demo.src").unwrap();
        let sink = model.by_name("Demo.sink").unwrap();
        let mut body = Body::new();
        let a = body.new_local("a", Type::object(kernel::NAMED_OBJ));
        let b = body.new_local("b", Type::object(kernel::NAMED_OBJ));
        let c = body.new_local("c", Type::object(kernel::NAMED_OBJ));
        body.push(StmtKind::assign(b, Rvalue::Use(a.into())));
        body.push(StmtKind::assign(c, Rvalue::Use(b.into())));

        let map = analyze(&body, &model, &TagStore::new(), None, &[(c, src)]);
        assert_eq!(map.object(a), Some(src));
        assert_eq!(map.object(b), Some(src));

        let map = analyze(&body, &model, &TagStore::new(), None, &[(c, src), (a, sink)]);
        assert!(map.is_ambiguous(a));
        assert!(map.is_ambiguous(c));
    }

    #[test]
    fn resuming_a_fixed_point_changes_nothing() {
        let model = demo();
        let scale = model.by_name("Demo.scale").unwrap();
        let mut body = Body::new();
        let this = body.new_local("this", Type::object("Scale"));
        body.this_local = Some(this);
        let mut em = Emitter::new(&mut body);
        let top = em.container(this, Type::object("Demo"));
        em.lookup(top, Lookup::Entity, "sink", Type::object("Sink"));
        em.append();

        let tags = TagStore::new();
        let first = analyze(&body, &model, &tags, Some(scale), &[]);
        let second = resume(&body, &model, &tags, first.clone());
        assert_eq!(first, second);
    }

    #[test]
    fn untagged_fields_carry_stored_objects() {
        let model = demo();
        let src = model.by_name("Demo.src").unwrap();
        let mut body = Body::new();
        let this = body.new_local("this", Type::object("Demo"));
        let a = body.new_local("a", Type::object(kernel::ENTITY));
        let b = body.new_local("b", Type::object(kernel::ENTITY));
        body.this_local = Some(this);
        let field = FieldId(0);
        body.push(StmtKind::Assign {
            place: Place::Field { base: this, field },
            value: Rvalue::Use(a.into()),
        });
        body.push(StmtKind::assign(b, Rvalue::Field { base: this, field }));
        let map = analyze(&body, &model, &TagStore::new(), None, &[(a, src)]);
        assert_eq!(map.object(b), Some(src));
    }

    #[test]
    fn stores_into_tagged_fields_bind_the_stored_local() {
        let model = demo();
        let src = model.by_name("Demo.src").unwrap();
        let sink = model.by_name("Demo.sink").unwrap();
        let mut body = Body::new();
        let this = body.new_local("this", Type::object("Demo"));
        let a = body.new_local("a", Type::object(kernel::ENTITY));
        body.this_local = Some(this);
        let field = FieldId(0);
        body.push(StmtKind::Assign {
            place: Place::Field { base: this, field },
            value: Rvalue::Use(a.into()),
        });
        let mut tags = TagStore::new();
        tags.tag_object(field, src).unwrap();

        let map = analyze(&body, &model, &tags, None, &[]);
        assert_eq!(map.object(a), Some(src));

        let map = analyze(&body, &model, &tags, None, &[(a, sink)]);
        assert!(map.is_ambiguous(a));
    }

    #[test]
    fn casts_propagate_both_ways() {
        let model = demo();
        let src = model.by_name("Demo.src").unwrap();
        let mut body = Body::new();
        let a = body.new_local("a", Type::object(kernel::NAMED_OBJ));
        let b = body.new_local("b", Type::object(kernel::ENTITY));
        body.push(StmtKind::assign(
            b,
            Rvalue::Cast(Type::object(kernel::ENTITY), a.into()),
        ));

        let map = analyze(&body, &model, &TagStore::new(), None, &[(b, src)]);
        assert_eq!(map.object(a), Some(src));
        let map = analyze(&body, &model, &TagStore::new(), None, &[(a, src)]);
        assert_eq!(map.object(b), Some(src));
    }
}
