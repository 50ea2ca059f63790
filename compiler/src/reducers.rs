// reducers.rs — Replace structural lookups with reference fields
//
// `getContainer()`, `getEntity(name)`, `getPort(name)`, `getRelation(name)`
// and `getAttribute(name)` on a receiver the named-object analysis resolves
// become reads of a field on the receiver's generated class. The field is
// created once per (owner, target) pair, tagged with the target object, and
// initialized in the owner's constructor right where the target first
// becomes available.
//
// Preconditions: classes are materialized and creation sites recorded.
// Postconditions: every rewritten read names a field tagged with the object
//   the lookup returned.
// Failure modes: `SpecError::Inconsistency` when a field tag conflicts or the
//   owner has no constructor.
// Side effects: adds fields, constructor stores and W0300 diagnostics for
//   lookups on ambiguous receivers, which stay dynamic.

use crate::builder::Emitter;
use crate::context::{sanitize, PipelineContext};
use crate::diag::{codes, Diagnostic};
use crate::error::Result;
use crate::id::{FieldId, LocalId, MethodId, ObjId, StmtId};
use crate::ir::{Body, Constant, Invoke, InvokeKind, Operand, Rvalue, StmtKind};
use crate::model::Lookup;
use crate::named_obj::{self, Binding};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Container,
    Entity,
    Port,
    Relation,
    Attribute,
}

impl Family {
    fn of(inv: &Invoke) -> Option<Family> {
        if inv.kind != InvokeKind::Virtual {
            return None;
        }
        let family = match (inv.method.name.as_str(), inv.args.len()) {
            ("getContainer", 0) => Family::Container,
            ("getEntity", 1) => Family::Entity,
            ("getPort", 1) => Family::Port,
            ("getRelation", 1) => Family::Relation,
            ("getAttribute", 1) => Family::Attribute,
            _ => return None,
        };
        Some(family)
    }

    fn lookup(self) -> Option<Lookup> {
        match self {
            Family::Container => None,
            Family::Entity => Some(Lookup::Entity),
            Family::Port => Some(Lookup::Port),
            Family::Relation => Some(Lookup::Relation),
            Family::Attribute => Some(Lookup::Attribute),
        }
    }

    fn field_name(self, target: &str) -> String {
        let prefix = match self {
            Family::Container => return "_CGContainer".to_string(),
            Family::Entity => "_CGentity_",
            Family::Port => "_CGport_",
            Family::Relation => "_CGrelation_",
            Family::Attribute => "_CGattr_",
        };
        format!("{prefix}{}", sanitize(target))
    }
}

/// `getContainer` and `getEntity`.
pub fn fields_for_entities(ctx: &mut PipelineContext) -> Result<usize> {
    reduce(ctx, &[Family::Container, Family::Entity])
}

/// `getPort` and `getRelation`.
pub fn fields_for_ports(ctx: &mut PipelineContext) -> Result<usize> {
    reduce(ctx, &[Family::Port, Family::Relation])
}

/// `getAttribute`.
pub fn fields_for_attributes(ctx: &mut PipelineContext) -> Result<usize> {
    reduce(ctx, &[Family::Attribute])
}

struct Rewrite {
    method: MethodId,
    stmt: StmtId,
    dst: LocalId,
    base: LocalId,
    owner: ObjId,
    target: ObjId,
    family: Family,
}

fn reduce(ctx: &mut PipelineContext, families: &[Family]) -> Result<usize> {
    let mut rewrites = Vec::new();
    let mut ambiguous = Vec::new();
    for method in ctx.program.all_live_methods() {
        let map = named_obj::analyze_method(ctx, method);
        for stmt in &ctx.program.method(method).body.stmts {
            let (Some(dst), Some(inv)) = (stmt.kind.def_local(), stmt.kind.invoke()) else {
                continue;
            };
            let Some(family) = Family::of(inv).filter(|f| families.contains(f)) else {
                continue;
            };
            let Some(base) = inv.base else { continue };
            let owner = match map.get(base) {
                None => continue,
                Some(Binding::Ambiguous) => {
                    ambiguous.push((ctx.program.method_name(method), inv.method.name.clone()));
                    continue;
                }
                Some(Binding::Object(o)) => o,
            };
            if ctx.class_for_object(owner).is_none() {
                continue;
            }
            let target = match family.lookup() {
                None => ctx.model.container(owner),
                Some(kind) => match inv.args.first() {
                    Some(Operand::Const(Constant::Str(name))) => ctx.model.lookup(owner, kind, name),
                    _ => None,
                },
            };
            let Some(target) = target else { continue };
            rewrites.push(Rewrite {
                method,
                stmt: stmt.id,
                dst,
                base,
                owner,
                target,
                family,
            });
        }
    }
    for (subject, call) in ambiguous {
        ctx.warn(
            Diagnostic::warning(subject, format!("{call}() on an ambiguous object left dynamic"))
                .with_code(codes::W0300)
                .with_hint("the receiver may denote more than one model object"),
        );
    }
    for r in &rewrites {
        let field = ensure_field(ctx, r.owner, r.target, r.family)?;
        let body = &mut ctx.program.method_mut(r.method).body;
        body.replace(
            r.stmt,
            StmtKind::assign(
                r.dst,
                Rvalue::Field {
                    base: r.base,
                    field,
                },
            ),
        );
    }
    if !rewrites.is_empty() {
        tracing::debug!(families = ?families, rewrites = rewrites.len(), "lookups reduced to fields");
    }
    Ok(rewrites.len())
}

/// The reference field for `target` on `owner`'s class, created and
/// initialized on first use.
fn ensure_field(ctx: &mut PipelineContext, owner: ObjId, target: ObjId, family: Family) -> Result<FieldId> {
    if let Some(f) = ctx.ref_fields.get(&(owner, target)) {
        if !ctx.program.field(*f).removed {
            return Ok(*f);
        }
    }
    let class = ctx.class_of_object(owner)?;
    let name = family.field_name(&ctx.model.object(target).name);
    let field = ctx.program.add_field(class, &name, ctx.object_type(target));
    ctx.tags.tag_object(field, target)?;
    ctx.ref_fields.insert((owner, target), field);

    let site = ctx.site_local(class, target);
    let init = ctx.method_of(class, "<init>")?;
    let mut body = ctx.take_body(init);
    let result = store_reference(ctx, &mut body, owner, target, field, family, site);
    ctx.put_body(init, body);
    result?;
    Ok(field)
}

fn store_reference(
    ctx: &PipelineContext,
    body: &mut Body,
    owner: ObjId,
    target: ObjId,
    field: FieldId,
    family: Family,
    site: Option<(StmtId, LocalId)>,
) -> Result<()> {
    let Some(this) = body.this_local else {
        return Ok(());
    };
    if family == Family::Container {
        if let Some(p0) = body.param_locals.first().copied() {
            let super_init = body
                .stmts
                .iter()
                .find(|s| matches!(&s.kind, StmtKind::Invoke(i) if i.kind == InvokeKind::Special))
                .map(|s| s.id);
            let mut em = Emitter::new(body);
            let c = em.cast("container", ctx.object_type(target), p0.into());
            em.field_store(this, field, c.into());
            let stmts = em.finish();
            match super_init {
                Some(at) => {
                    body.insert_after(at, stmts);
                }
                None => {
                    body.insert_at(0, stmts);
                }
            }
            return Ok(());
        }
    }
    if let Some((at, local)) = site {
        let mut em = Emitter::new(body);
        em.field_store(this, field, local.into());
        let stmts = em.finish();
        body.insert_after(at, stmts);
        return Ok(());
    }
    // The creating statement is gone; navigate to the target once the
    // constructor has built everything.
    let mut em = Emitter::new(body);
    let r = ctx.reference_path(&mut em, this, owner, target)?;
    em.field_store(this, field, r.into());
    let stmts = em.finish();
    body.insert_before_return(stmts);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineOptions;
    use crate::materialize;
    use crate::model::{tests::DEMO, Model};

    fn materialized() -> PipelineContext {
        let model = Model::from_json(DEMO).unwrap();
        let mut ctx = PipelineContext::new(model, PipelineOptions::default());
        materialize::run(&mut ctx).unwrap();
        ctx
    }

    fn calls(ctx: &PipelineContext, class: &str, method: &str, name: &str) -> usize {
        let c = ctx.program.class_by_name(class).unwrap();
        let m = ctx.program.method_by_name(c, method).unwrap();
        ctx.program
            .method(m)
            .body
            .invokes()
            .filter(|(_, i)| i.method.name == name)
            .count()
    }

    #[test]
    fn port_lookups_become_tagged_fields() {
        let mut ctx = materialized();
        assert!(calls(&ctx, "dfsc.generated.Demo_scale", "fire", "getPort") > 0);
        let n = fields_for_ports(&mut ctx).unwrap();
        assert!(n > 0);
        assert_eq!(calls(&ctx, "dfsc.generated.Demo_scale", "fire", "getPort"), 0);

        let class = ctx.program.class_by_name("dfsc.generated.Demo_scale").unwrap();
        let field = ctx.program.field_by_name(class, "_CGport_input").unwrap();
        assert_eq!(ctx.tags.object(field), ctx.model.by_name("Demo.scale.input"));

        // The constructor stores the port right after creating it.
        let init = ctx.program.method_by_name(class, "<init>").unwrap();
        let stores = ctx.program.method(init).body.stmts.iter().filter(|s| {
            matches!(&s.kind, StmtKind::Assign { place: crate::ir::Place::Field { field: f, .. }, .. } if *f == field)
        });
        assert_eq!(stores.count(), 1);
    }

    #[test]
    fn child_lookups_in_composites_become_fields() {
        let mut ctx = materialized();
        fields_for_entities(&mut ctx).unwrap();
        assert_eq!(calls(&ctx, "dfsc.generated.Demo", "fire", "getEntity"), 0);
        let class = ctx.program.class_by_name("dfsc.generated.Demo").unwrap();
        assert!(ctx.program.field_by_name(class, "_CGentity_src").is_some());
    }

    #[test]
    fn fields_are_created_once_per_target() {
        let mut ctx = materialized();
        fields_for_ports(&mut ctx).unwrap();
        let before = ctx.program.fields.len();
        assert_eq!(fields_for_ports(&mut ctx).unwrap(), 0);
        assert_eq!(ctx.program.fields.len(), before);
    }
}
