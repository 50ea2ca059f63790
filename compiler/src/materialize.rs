// materialize.rs — One generated class per actor and director
//
// Every entity of the model becomes an actor class and every director an
// attribute class. Constructors rebuild the entity's contents with the
// runtime library's constructors (parameters, ports, child entities,
// relations, links); lifecycle methods come from the library templates for
// atomic actors and from a static firing order for composites. The top-level
// class also receives `execute()`, the iteration loop.
//
// Preconditions: the model is loaded and type-resolved.
// Postconditions:
//   - object ↔ class is a bijection over entities and directors;
//   - every object except the top is created by exactly one constructor.
// Failure modes:
//   - `SpecError::Unsupported` for kinds outside the catalogue, nested or
//     non-SDF directors, connected port-parameters and multi-channel
//     multiports. Validation runs before any class is registered, so a
//     rejected model leaves the program empty.
//   - `SpecError::Inconsistency` when bookkeeping is violated.
// Side effects: populates `ctx.program`, the class registry, the creation
//   ledger and the creation sites.

use std::collections::{BTreeMap, BTreeSet};

use crate::builder::Emitter;
use crate::const_analysis;
use crate::context::PipelineContext;
use crate::error::{Result, SpecError};
use crate::framework::{self, data, kernel, LIFECYCLE};
use crate::id::{ClassId, LocalId, ObjId};
use crate::ir::{BinOp, ClassKind, Constant, Operand, Rvalue, Type};
use crate::library;
use crate::model::{Model, ObjKind, ITERATIONS};

/// Obligations established by materialization.
#[derive(Debug, Clone, Default)]
pub struct MaterializeCert {
    /// Every entity and director has exactly one class, and back.
    pub m1_bijection: bool,
    /// Every object except the top has one creator and one creating site.
    pub m2_unique_creation: bool,
}

impl crate::pass::StageCert for MaterializeCert {
    fn all_pass(&self) -> bool {
        self.m1_bijection && self.m2_unique_creation
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("M1_bijection", self.m1_bijection),
            ("M2_unique_creation", self.m2_unique_creation),
        ]
    }
}

pub const SDF: &str = "SDF";

pub fn run(ctx: &mut PipelineContext) -> Result<MaterializeCert> {
    validate(&ctx.model)?;
    ctx.constants = const_analysis::analyze(&ctx.model)?;

    let owners = class_owners(&ctx.model);
    for obj in &owners {
        let name = ctx.class_name(*obj);
        let (superclass, kind) = match &ctx.model.object(*obj).kind {
            ObjKind::Director { .. } => (kernel::SDF_DIRECTOR, ClassKind::Attribute),
            ObjKind::Composite => (kernel::COMPOSITE_ACTOR, ClassKind::Actor),
            _ => (kernel::ATOMIC_ACTOR, ClassKind::Actor),
        };
        let class = ctx.program.add_class(&name, superclass, kind);
        ctx.register_class(*obj, class)?;
    }

    for obj in &owners {
        let class = ctx.class_of_object(*obj)?;
        build_constructor(ctx, *obj, class)?;
        if ctx.model.is_entity(*obj) {
            add_lifecycle(ctx, class);
        }
    }
    for obj in &owners {
        let class = ctx.class_of_object(*obj)?;
        match &ctx.model.object(*obj).kind {
            ObjKind::Composite => schedule_composite(ctx, *obj, class)?,
            ObjKind::Atomic(info) => {
                if let Some(kind) = info.kind {
                    library::install(ctx, *obj, class, kind)?;
                }
            }
            _ => {}
        }
    }
    let top = ctx.model.top;
    build_execute(ctx, top)?;

    let cert = certify(ctx);
    tracing::debug!(classes = owners.len(), "materialized");
    Ok(cert)
}

/// Reject everything the specializer cannot express before touching the
/// program.
pub fn validate(model: &Model) -> Result<()> {
    for e in model.entities() {
        let obj = model.object(e);
        if let ObjKind::Atomic(info) = &obj.kind {
            if info.kind.is_none() {
                return Err(SpecError::unsupported(
                    obj.full_name.clone(),
                    format!("actor kind {}", info.kind_name),
                    library::unsupported_reason(&info.kind_name),
                ));
            }
        }
        if let Some(d) = model.director_of(e) {
            let director = model.object(d);
            if e != model.top {
                return Err(SpecError::unsupported(
                    director.full_name.clone(),
                    "a director inside a composite actor",
                    "only the top-level director drives execution",
                ));
            }
            if let ObjKind::Director { kind } = &director.kind {
                if kind != SDF {
                    return Err(SpecError::unsupported(
                        director.full_name.clone(),
                        format!("director kind {kind}"),
                        "only synchronous dataflow is scheduled statically",
                    ));
                }
            }
        }
        for p in &obj.ports {
            let port = model.object(*p);
            let Some(info) = model.port(*p) else { continue };
            if info.parameter.is_some() && !port.links.is_empty() {
                return Err(SpecError::unsupported(
                    port.full_name.clone(),
                    "a connected port-parameter",
                    "it updates its value from a port at run time",
                ));
            }
            if port.links.len() > 1 {
                return Err(SpecError::unsupported(
                    port.full_name.clone(),
                    format!("a port with {} channels", port.links.len()),
                    "channels are addressed by iterating over the port",
                ));
            }
        }
    }
    Ok(())
}

/// Entities and directors, each after its container.
fn class_owners(model: &Model) -> Vec<ObjId> {
    let mut out = Vec::new();
    for e in model.entities() {
        out.push(e);
        if let Some(d) = model.director_of(e) {
            out.push(d);
        }
    }
    out
}

// ── Constructors ────────────────────────────────────────────────────────────

fn build_constructor(ctx: &mut PipelineContext, obj: ObjId, class: ClassId) -> Result<()> {
    let is_top = obj == ctx.model.top;
    let params = if is_top {
        vec![]
    } else {
        vec![Type::object(kernel::NAMED_OBJ), Type::String]
    };
    let method = ctx.program.add_method(class, "<init>", params, Type::Void, false);
    let superclass = ctx.program.class(class).superclass.clone();
    let mut body = ctx.take_body(method);
    // (object, statement index, created here)
    let mut records: Vec<(ObjId, usize, bool)> = Vec::new();
    let ids = {
        let mut em = Emitter::new(&mut body);
        let result = emit_constructor(ctx, &mut em, obj, is_top, &superclass, &mut records);
        result.map(|()| em.append())
    };
    ctx.put_body(method, body);
    let ids = ids?;
    for (child, index, created) in records {
        let stmt = ids.get(index).copied().ok_or_else(|| {
            SpecError::inconsistency("materialize", "creation site index out of range")
        })?;
        if created {
            ctx.record_creation(child, obj)?;
        }
        ctx.record_site(class, child, stmt, created);
    }
    Ok(())
}

fn emit_constructor(
    ctx: &PipelineContext,
    em: &mut Emitter,
    obj: ObjId,
    is_top: bool,
    superclass: &str,
    records: &mut Vec<(ObjId, usize, bool)>,
) -> Result<()> {
    let this = em
        .this()
        .ok_or_else(|| SpecError::inconsistency("materialize", "constructor has no receiver"))?;
    let model = &ctx.model;
    if is_top {
        em.call_special(this, framework::init(superclass, vec![]), vec![]);
        let name = model.object(obj).name.clone();
        em.call(this, framework::set_name(), vec![Operand::str(&name)]);
    } else {
        let (Some(container), Some(name)) = (em.param(0), em.param(1)) else {
            return Err(SpecError::inconsistency("materialize", "constructor lacks parameters"));
        };
        em.call_special(
            this,
            framework::structural_init(superclass),
            vec![container.into(), name.into()],
        );
    }

    let this_name = |o: ObjId| Operand::str(&model.object(o).name);
    let mut locals: BTreeMap<ObjId, LocalId> = BTreeMap::new();
    let create = |em: &mut Emitter, child: ObjId, class: &str, records: &mut Vec<(ObjId, usize, bool)>| {
        let l = em.new_object(&model.object(child).name, class, vec![this.into(), this_name(child)]);
        records.push((child, em.len() - 1, true));
        l
    };

    let contents = model.object(obj);
    for a in &contents.attributes {
        match &model.object(*a).kind {
            ObjKind::Variable(info) => {
                let class = if info.port_parameter {
                    kernel::PORT_PARAMETER
                } else {
                    kernel::PARAMETER
                };
                let l = create(em, *a, class, records);
                if !info.expression.is_empty() {
                    em.call(l, framework::set_expression(), vec![Operand::str(&info.expression)]);
                }
                if let Some(port) = info.port {
                    let p = em.call_value(l, framework::get_parameter_port(), vec![]);
                    records.push((port, em.len() - 1, true));
                    locals.insert(port, p);
                }
                locals.insert(*a, l);
            }
            ObjKind::Settable { expression } => {
                let l = create(em, *a, kernel::STRING_ATTRIBUTE, records);
                em.call(l, framework::set_expression(), vec![Operand::str(expression)]);
                locals.insert(*a, l);
            }
            ObjKind::Director { .. } => {
                let l = create(em, *a, &ctx.class_name(*a), records);
                locals.insert(*a, l);
            }
            _ => {}
        }
    }
    for p in &contents.ports {
        let Some(info) = model.port(*p) else { continue };
        if info.parameter.is_some() {
            continue;
        }
        let l = em.new_object(
            &model.object(*p).name,
            kernel::PORT,
            vec![
                this.into(),
                this_name(*p),
                Operand::Const(Constant::Bool(info.input)),
                Operand::Const(Constant::Bool(info.output)),
            ],
        );
        records.push((*p, em.len() - 1, true));
        if info.multiport {
            em.call(l, framework::set_multiport(), vec![Operand::Const(Constant::Bool(true))]);
        }
        locals.insert(*p, l);
    }
    for e in &contents.entities {
        let l = create(em, *e, &ctx.class_name(*e), records);
        locals.insert(*e, l);
    }
    for r in &contents.relations {
        let l = create(em, *r, kernel::RELATION, records);
        locals.insert(*r, l);
    }
    for r in &contents.relations {
        let rel = locals[r];
        for q in &model.object(*r).links {
            let port = match locals.get(q) {
                Some(l) => *l,
                None => {
                    let owner = model.container(*q).ok_or_else(|| {
                        SpecError::inconsistency("materialize", "linked port has no container")
                    })?;
                    let owner_local = *locals.get(&owner).ok_or_else(|| {
                        SpecError::inconsistency(
                            "materialize",
                            format!("{} links outside its composite", model.object(*r).full_name),
                        )
                    })?;
                    let l = em.lookup(
                        owner_local,
                        crate::model::Lookup::Port,
                        &model.object(*q).name,
                        Type::object(kernel::PORT),
                    );
                    // The lookup call, not the cast, is the acquiring statement.
                    records.push((*q, em.len() - 2, false));
                    locals.insert(*q, l);
                    l
                }
            };
            em.call(port, framework::link(), vec![rel.into()]);
        }
    }
    em.ret(None);
    Ok(())
}

// ── Lifecycle ───────────────────────────────────────────────────────────────

fn add_lifecycle(ctx: &mut PipelineContext, class: ClassId) {
    for (name, ret) in LIFECYCLE.iter() {
        let m = ctx.program.add_method(class, name, vec![], ret.clone(), false);
        let value = (*ret == Type::Boolean).then(|| Operand::Const(Constant::Bool(true)));
        ctx.program
            .method_mut(m)
            .body
            .push(crate::ir::StmtKind::Return(value));
    }
}

/// Children of `composite` in data-dependency order; ties and cycles keep
/// declaration order.
pub fn firing_order(model: &Model, composite: ObjId) -> Vec<ObjId> {
    let children = model.object(composite).entities.clone();
    let mut preds: BTreeMap<ObjId, BTreeSet<ObjId>> =
        children.iter().map(|c| (*c, BTreeSet::new())).collect();
    for r in &model.object(composite).relations {
        let links = &model.object(*r).links;
        for from in links {
            for to in links {
                let (Some(fa), Some(ta)) = (model.container(*from), model.container(*to)) else {
                    continue;
                };
                if fa == ta || fa == composite || ta == composite {
                    continue;
                }
                let drives = model.port(*from).is_some_and(|p| p.output);
                let receives = model.port(*to).is_some_and(|p| p.input);
                if drives && receives {
                    if let Some(set) = preds.get_mut(&ta) {
                        set.insert(fa);
                    }
                }
            }
        }
    }
    let mut order = Vec::new();
    let mut placed = BTreeSet::new();
    while order.len() < children.len() {
        let next = children
            .iter()
            .find(|c| !placed.contains(*c) && preds[*c].iter().all(|p| placed.contains(p)))
            .or_else(|| children.iter().find(|c| !placed.contains(*c)));
        let Some(next) = next else { break };
        placed.insert(*next);
        order.push(*next);
    }
    order
}

fn schedule_composite(ctx: &mut PipelineContext, composite: ObjId, class: ClassId) -> Result<()> {
    let order = firing_order(&ctx.model, composite);
    let children: Vec<(String, String)> = order
        .iter()
        .map(|c| (ctx.model.object(*c).name.clone(), ctx.class_name(*c)))
        .collect();
    for (name, _) in LIFECYCLE.iter() {
        let method = ctx.method_of(class, name)?;
        let mut body = ctx.take_body(method);
        body.stmts.clear();
        let mut em = Emitter::new(&mut body);
        if let Some(this) = em.this() {
            match *name {
                "prefire" | "postfire" => {}
                "fire" => {
                    for (child, child_class) in &children {
                        let skip = em.label();
                        let c = em.lookup(
                            this,
                            crate::model::Lookup::Entity,
                            child,
                            Type::object(child_class),
                        );
                        let ok = em.call_value(c, framework::lifecycle(child_class, "prefire"), vec![]);
                        em.branch_false(ok, skip);
                        em.call(c, framework::lifecycle(child_class, "fire"), vec![]);
                        em.call(c, framework::lifecycle(child_class, "postfire"), vec![]);
                        em.place(skip);
                    }
                }
                _ => {
                    for (child, child_class) in &children {
                        let c = em.lookup(
                            this,
                            crate::model::Lookup::Entity,
                            child,
                            Type::object(child_class),
                        );
                        em.call(c, framework::lifecycle(child_class, name), vec![]);
                    }
                }
            }
        }
        let value = matches!(*name, "prefire" | "postfire").then(|| Operand::Const(Constant::Bool(true)));
        em.ret(value);
        em.append();
        ctx.put_body(method, body);
    }
    Ok(())
}

/// `execute()`: run the lifecycle for the director's `iterations` count;
/// a count of zero or less runs until `postfire` returns false.
fn build_execute(ctx: &mut PipelineContext, top: ObjId) -> Result<()> {
    let class = ctx.class_of_object(top)?;
    let class_name = ctx.program.class(class).name.clone();
    let director = ctx
        .model
        .director_of(top)
        .ok_or_else(|| SpecError::inconsistency("materialize", "top-level composite has no director"))?;
    let iterations = ctx
        .model
        .attribute(director, ITERATIONS)
        .ok_or_else(|| SpecError::inconsistency("materialize", "director has no iterations"))?;
    let method = ctx.program.add_method(class, "execute", vec![], Type::Void, false);
    let mut body = ctx.take_body(method);
    let result = {
        let mut em = Emitter::new(&mut body);
        emit_execute(ctx, &mut em, top, iterations, &class_name).map(|()| em.append())
    };
    ctx.put_body(method, body);
    result.map(|_| ())
}

fn emit_execute(
    ctx: &PipelineContext,
    em: &mut Emitter,
    top: ObjId,
    iterations: ObjId,
    class_name: &str,
) -> Result<()> {
    let this = em
        .this()
        .ok_or_else(|| SpecError::inconsistency("materialize", "execute has no receiver"))?;
    em.call(this, framework::lifecycle(class_name, "preinitialize"), vec![]);
    em.call(this, framework::lifecycle(class_name, "initialize"), vec![]);
    let param = ctx.reference_path(em, this, top, iterations)?;
    let token = em.call_value(param, framework::get_token(), vec![]);
    let scalar = em.cast("count", Type::object(data::SCALAR_TOKEN), token.into());
    let n = em.call_value(
        scalar,
        framework::accessor(data::SCALAR_TOKEN, "intValue", Type::Int),
        vec![],
    );
    let i = em.constant("i", Constant::Int(0));
    let head = em.label();
    let run = em.label();
    let done = em.label();
    em.place(head);
    em.branch(BinOp::Le, n.into(), Operand::int(0), run);
    em.branch(BinOp::Ge, i.into(), n.into(), done);
    em.place(run);
    let ok = em.call_value(this, framework::lifecycle(class_name, "prefire"), vec![]);
    em.branch_false(ok, done);
    em.call(this, framework::lifecycle(class_name, "fire"), vec![]);
    let more = em.call_value(this, framework::lifecycle(class_name, "postfire"), vec![]);
    em.assign(i, Rvalue::Binary(BinOp::Add, i.into(), Operand::int(1)));
    em.branch_false(more, done);
    em.goto(head);
    em.place(done);
    em.call(this, framework::lifecycle(class_name, "wrapup"), vec![]);
    em.ret(None);
    Ok(())
}

// ── Certificate ─────────────────────────────────────────────────────────────

pub fn certify(ctx: &PipelineContext) -> MaterializeCert {
    let owners = class_owners(&ctx.model);
    let m1_bijection = owners.iter().all(|o| {
        ctx.class_for_object(*o)
            .is_some_and(|c| ctx.object_for_class(c) == Some(*o))
    }) && ctx.registered().count() == owners.len();

    let mut created: BTreeMap<ObjId, usize> = BTreeMap::new();
    for ((_, obj), site) in &ctx.sites {
        if site.created {
            *created.entry(*obj).or_default() += 1;
        }
    }
    let m2_unique_creation = ctx.model.ids().all(|o| {
        if o == ctx.model.top {
            !ctx.ledger.contains_key(&o) && !created.contains_key(&o)
        } else {
            ctx.ledger.contains_key(&o) && created.get(&o) == Some(&1)
        }
    });
    MaterializeCert {
        m1_bijection,
        m2_unique_creation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineOptions;
    use crate::model::tests::DEMO;
    use crate::pass::StageCert;

    fn materialized(json: &str) -> Result<PipelineContext> {
        let model = Model::from_json(json)?;
        let mut ctx = PipelineContext::new(model, PipelineOptions::default());
        let cert = run(&mut ctx)?;
        assert!(cert.all_pass(), "{:?}", cert.obligations());
        Ok(ctx)
    }

    #[test]
    fn one_class_per_entity_and_director() {
        let ctx = materialized(DEMO).unwrap();
        // Demo, director, src, scale, sink
        assert_eq!(ctx.program.live_classes().count(), 5);
        assert_eq!(ctx.actor_classes().len(), 4);
        assert_eq!(ctx.attribute_classes().len(), 1);
        let top = ctx.class_for_object(ctx.model.top).unwrap();
        assert!(ctx.program.method_by_name(top, "execute").is_some());
    }

    #[test]
    fn every_object_is_created_exactly_once() {
        let ctx = materialized(DEMO).unwrap();
        let top = ctx.model.top;
        for id in ctx.model.ids().filter(|o| *o != top) {
            assert!(ctx.ledger.contains_key(&id), "{}", ctx.model.name(id));
        }
        let src = ctx.model.by_name("Demo.src").unwrap();
        assert_eq!(ctx.ledger[&src], top);
        let value = ctx.model.by_name("Demo.src.value").unwrap();
        assert_eq!(ctx.ledger[&value], src);
    }

    #[test]
    fn unsupported_kind_is_rejected_before_any_class() {
        let json = r#"{"name": "M", "entities": [{"name": "fn", "kind": "MathFunction"}]}"#;
        let model = Model::from_json(json).unwrap();
        let mut ctx = PipelineContext::new(model, PipelineOptions::default());
        let err = run(&mut ctx).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("M.fn"), "{text}");
        assert!(text.contains("dynamically creates ports"), "{text}");
        assert_eq!(ctx.program.live_classes().count(), 0);
    }

    #[test]
    fn nested_director_is_rejected() {
        let json = r#"{"name": "M", "entities": [{"name": "inner", "kind": "Composite",
            "director": {"name": "d", "kind": "SDF"}}]}"#;
        let model = Model::from_json(json).unwrap();
        assert!(matches!(validate(&model), Err(SpecError::Unsupported { .. })));
    }

    #[test]
    fn firing_order_follows_data_flow() {
        let json = r#"{
            "name": "M",
            "entities": [
                {"name": "sink", "kind": "Recorder"},
                {"name": "scale", "kind": "Scale"},
                {"name": "src", "kind": "Const"}
            ],
            "relations": [
                {"name": "a", "links": ["src.output", "scale.input"]},
                {"name": "b", "links": ["scale.output", "sink.input"]}
            ]
        }"#;
        let model = Model::from_json(json).unwrap();
        let names: Vec<&str> = firing_order(&model, model.top)
            .into_iter()
            .map(|e| model.object(e).name.as_str())
            .collect();
        assert_eq!(names, vec!["src", "scale", "sink"]);
    }
}
